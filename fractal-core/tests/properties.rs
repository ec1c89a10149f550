use fractal_core::error::DatasetError;
use fractal_core::{DataSetHandle, Map, PartialResult, Sketch};
use futures::StreamExt;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Double;
impl Map<i64, i64> for Double {
    fn apply(&self, input: &i64) -> Result<i64, DatasetError> {
        Ok(input * 2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Failing;
impl Map<i64, i64> for Failing {
    fn apply(&self, _input: &i64) -> Result<i64, DatasetError> {
        Err(DatasetError::UserCodeFailure("boom".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Explode;
impl Map<i64, Vec<i64>> for Explode {
    fn apply(&self, input: &i64) -> Result<Vec<i64>, DatasetError> {
        Ok(vec![*input, *input + 1])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sum;
impl Sketch<i64, i64> for Sum {
    fn zero(&self) -> i64 {
        0
    }
    fn create(&self, input: &i64) -> Result<i64, DatasetError> {
        Ok(*input)
    }
    fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }
}

async fn collect<T: Send + 'static>(
    stream: fractal_stream::ColdStream<Result<PartialResult<T>, DatasetError>>,
) -> Vec<Result<PartialResult<T>, DatasetError>> {
    let (_sub, s) = stream.subscribe();
    s.collect().await
}

fn local_value<T: Clone>(handle: &DataSetHandle<T>) -> T {
    match handle {
        DataSetHandle::Local(v, _) => (**v).clone(),
        _ => panic!("expected a Local leaf"),
    }
}

#[tokio::test]
async fn local_map_sums_progress_to_one() {
    let ds = DataSetHandle::local(21i64);
    let items = collect(ds.map(Double)).await;
    let total: f64 = items.iter().map(|r| r.as_ref().unwrap().delta_done).sum();
    assert!((total - 1.0).abs() < 1e-9);
    let last = items.last().unwrap().as_ref().unwrap();
    assert_eq!(local_value(last.payload.as_ref().unwrap()), 42);
}

#[tokio::test]
async fn local_map_propagates_user_code_failure() {
    let ds = DataSetHandle::local(1i64);
    let items = collect(ds.map(Failing)).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(DatasetError::UserCodeFailure(_))));
}

#[tokio::test]
async fn local_flat_map_produces_parallel_children() {
    let ds = DataSetHandle::local(10i64);
    let items = collect(ds.flat_map(Explode)).await;
    let last = items.last().unwrap().as_ref().unwrap();
    let parallel = last.payload.as_ref().unwrap();
    match parallel {
        DataSetHandle::Parallel(children) => {
            let values: Vec<i64> = children.iter().map(local_value).collect();
            assert_eq!(values, vec![10, 11]);
        }
        _ => panic!("expected Parallel"),
    }
}

#[tokio::test]
async fn local_sketch_emits_zero_then_final() {
    let ds = DataSetHandle::local(5i64);
    let items = collect(ds.sketch(Sum)).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().delta_done, 0.0);
    assert_eq!(items[0].as_ref().unwrap().payload, Some(0));
    assert_eq!(items[1].as_ref().unwrap().delta_done, 1.0);
    assert_eq!(items[1].as_ref().unwrap().payload, Some(5));
}

#[tokio::test]
async fn parallel_map_rescales_progress_and_assembles_children() {
    let ds = DataSetHandle::parallel(vec![
        DataSetHandle::local(1i64),
        DataSetHandle::local(2i64),
        DataSetHandle::local(3i64),
    ]);
    let items = collect(ds.map(Double)).await;
    let total: f64 = items.iter().map(|r| r.as_ref().unwrap().delta_done).sum();
    assert!((total - 1.0).abs() < 1e-9);

    let assembled = items
        .iter()
        .filter_map(|r| r.as_ref().unwrap().payload.as_ref())
        .last()
        .expect("one item carries the assembled handle");
    match assembled {
        DataSetHandle::Parallel(children) => {
            let mut values: Vec<i64> = children.iter().map(local_value).collect();
            values.sort_unstable();
            assert_eq!(values, vec![2, 4, 6]);
        }
        _ => panic!("expected Parallel"),
    }
}

#[tokio::test]
async fn parallel_map_zero_children_is_legal() {
    let ds: DataSetHandle<i64> = DataSetHandle::parallel(vec![]);
    let items = collect(ds.map(Double)).await;
    assert_eq!(items.len(), 1);
    let pr = items[0].as_ref().unwrap();
    assert_eq!(pr.delta_done, 1.0);
    assert_eq!(pr.payload.as_ref().unwrap().child_count(), Some(0));
}

#[tokio::test]
async fn parallel_map_first_error_is_terminal() {
    let ds = DataSetHandle::parallel(vec![DataSetHandle::local(1i64), DataSetHandle::local(2i64)]);
    let items = collect(ds.map(Failing)).await;
    assert!(items.iter().any(|r| r.is_err()));
    assert!(matches!(items.last().unwrap(), Err(_)));
}

#[tokio::test]
async fn parallel_sketch_accumulates_to_the_total_sum() {
    let ds = DataSetHandle::parallel(vec![
        DataSetHandle::local(1i64),
        DataSetHandle::local(2i64),
        DataSetHandle::local(3i64),
        DataSetHandle::local(4i64),
    ]);
    let items = collect(ds.sketch(Sum)).await;
    let last = items.last().unwrap().as_ref().unwrap();
    assert_eq!(last.payload, Some(10));
    let total: f64 = items.iter().map(|r| r.as_ref().unwrap().delta_done).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn zip_local_with_local_pairs_values() {
    let left = DataSetHandle::local(1i64);
    let right = DataSetHandle::local("one".to_string());
    let items = collect(left.zip(&right)).await;
    let pair = local_value(items.last().unwrap().as_ref().unwrap().payload.as_ref().unwrap());
    assert_eq!(pair.0, 1);
    assert_eq!(pair.1, "one");
}

#[tokio::test]
async fn zip_local_with_parallel_is_a_type_mismatch() {
    let left = DataSetHandle::local(1i64);
    let right = DataSetHandle::parallel(vec![DataSetHandle::local(1i64)]);
    let items = collect(left.zip(&right)).await;
    assert!(matches!(items[0], Err(DatasetError::TypeMismatch { .. })));
}

#[tokio::test]
async fn zip_parallel_shape_mismatch_is_reported() {
    let left = DataSetHandle::parallel(vec![DataSetHandle::local(1i64)]);
    let right: DataSetHandle<i64> = DataSetHandle::parallel(vec![
        DataSetHandle::local(1i64),
        DataSetHandle::local(2i64),
    ]);
    let items = collect(left.zip(&right)).await;
    assert!(matches!(items[0], Err(DatasetError::ShapeMismatch { .. })));
}

#[tokio::test]
async fn disposing_a_subscription_stops_delivery() {
    let ds = DataSetHandle::local(1i64);
    let (sub, mut stream) = ds.map(Double).subscribe();
    sub.dispose();
    // The underlying work is a single already-resolved item produced
    // synchronously inside the factory; disposing before polling must
    // not panic and the stream must not hang.
    let _ = stream.next().await;
}

proptest! {
    #[test]
    fn local_map_is_functorial(x in any::<i8>()) {
        // map(double).map(double) and a single map(quadruple) must agree.
        let x = x as i64;
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let ds = DataSetHandle::local(x);
            let once = collect(ds.map(Double)).await;
            let once_value = local_value(
                once.last().unwrap().as_ref().unwrap().payload.as_ref().unwrap(),
            );
            let doubled = DataSetHandle::local(once_value);
            let twice = collect(doubled.map(Double)).await;
            let twice_value = local_value(
                twice.last().unwrap().as_ref().unwrap().payload.as_ref().unwrap(),
            );
            prop_assert_eq!(twice_value, x * 4);
            Ok(())
        })?;
    }
}
