//! Operations on a dataset fanned out across N children. Each function
//! recurses into the same operation on every child (through
//! `DataSetHandle`'s dispatch methods, so a child that is itself
//! `Parallel` or `Remote` keeps working), rescales each child's progress
//! by `1/N`, and assembles the final handle once every child has
//! completed. `merge` (from `fractal_stream`) gives eager first-error
//! propagation to every sibling for free via its cancellation hierarchy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fractal_stream::ColdStream;
use futures::StreamExt;

use crate::contracts::{ElementType, Map, Pair, Sketch};
use crate::dataset::DataSetHandle;
use crate::error::DatasetError;
use crate::partial::PartialResult;

pub fn map<T, S, M>(
    children: Arc<Vec<DataSetHandle<T>>>,
    mapper: M,
) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
    M: Map<T, S>,
{
    let n = children.len();
    if n == 0 {
        return ColdStream::once(Ok(PartialResult::done(DataSetHandle::parallel(vec![]))));
    }
    ColdStream::new(move |token| {
        let slots = Arc::new(Mutex::new(vec![None::<DataSetHandle<S>>; n]));
        let failed = Arc::new(AtomicBool::new(false));
        let child_streams: Vec<_> = children
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, child)| scaled_child(child.map(mapper.clone()), n, i, slots.clone(), failed.clone()))
            .collect();
        let merged = fractal_stream::merge(child_streams).with_cancellation(token);

        async_stream::stream! {
            futures::pin_mut!(merged);
            while let Some(item) = merged.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
            if !failed.load(Ordering::SeqCst) {
                let assembled = take_slots(&slots);
                yield Ok(PartialResult::new(0.0, Some(DataSetHandle::parallel(assembled))));
            }
        }
        .boxed()
    })
}

pub fn flat_map<T, S, M>(
    children: Arc<Vec<DataSetHandle<T>>>,
    mapper: M,
) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
    M: Map<T, Vec<S>>,
{
    let n = children.len();
    if n == 0 {
        return ColdStream::once(Ok(PartialResult::done(DataSetHandle::parallel(vec![]))));
    }
    ColdStream::new(move |token| {
        let slots = Arc::new(Mutex::new(vec![None::<DataSetHandle<S>>; n]));
        let failed = Arc::new(AtomicBool::new(false));
        let child_streams: Vec<_> = children
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, child)| {
                scaled_child(child.flat_map(mapper.clone()), n, i, slots.clone(), failed.clone())
            })
            .collect();
        let merged = fractal_stream::merge(child_streams).with_cancellation(token);

        async_stream::stream! {
            futures::pin_mut!(merged);
            while let Some(item) = merged.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
            if !failed.load(Ordering::SeqCst) {
                // Flatten one level: each slot holds what that child
                // produced, which for a flatMap is itself a Parallel node.
                let mut flattened = Vec::with_capacity(n);
                for slot in take_slots(&slots) {
                    match slot {
                        DataSetHandle::Parallel(grandchildren) => {
                            flattened.extend((*grandchildren).clone());
                        }
                        other => flattened.push(other),
                    }
                }
                yield Ok(PartialResult::new(0.0, Some(DataSetHandle::parallel(flattened))));
            }
        }
        .boxed()
    })
}

pub fn zip<T, S>(
    children: Arc<Vec<DataSetHandle<T>>>,
    other: &DataSetHandle<S>,
) -> ColdStream<Result<PartialResult<DataSetHandle<Pair<T, S>>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
{
    let other_children = match other {
        DataSetHandle::Parallel(c) => c.clone(),
        DataSetHandle::Local(..) => {
            return ColdStream::once(Err(DatasetError::TypeMismatch {
                expected: "Parallel",
                found: "Local",
            }))
        }
        DataSetHandle::Remote(_) => {
            return ColdStream::once(Err(DatasetError::TypeMismatch {
                expected: "Parallel",
                found: "Remote",
            }))
        }
    };
    if other_children.len() != children.len() {
        return ColdStream::once(Err(DatasetError::ShapeMismatch {
            left: children.len(),
            right: other_children.len(),
        }));
    }
    let n = children.len();
    if n == 0 {
        return ColdStream::once(Ok(PartialResult::done(DataSetHandle::parallel(vec![]))));
    }
    ColdStream::new(move |token| {
        let slots = Arc::new(Mutex::new(vec![None::<DataSetHandle<Pair<T, S>>>; n]));
        let failed = Arc::new(AtomicBool::new(false));
        let child_streams: Vec<_> = children
            .iter()
            .cloned()
            .zip(other_children.iter().cloned())
            .enumerate()
            .map(|(i, (left, right))| {
                scaled_child(left.zip(&right), n, i, slots.clone(), failed.clone())
            })
            .collect();
        let merged = fractal_stream::merge(child_streams).with_cancellation(token);

        async_stream::stream! {
            futures::pin_mut!(merged);
            while let Some(item) = merged.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
            if !failed.load(Ordering::SeqCst) {
                let assembled = take_slots(&slots);
                yield Ok(PartialResult::new(0.0, Some(DataSetHandle::parallel(assembled))));
            }
        }
        .boxed()
    })
}

pub fn sketch<T, R, K>(
    children: Arc<Vec<DataSetHandle<T>>>,
    sk: K,
) -> ColdStream<Result<PartialResult<R>, DatasetError>>
where
    T: ElementType,
    R: ElementType,
    K: Sketch<T, R>,
{
    let n = children.len();
    if n == 0 {
        return ColdStream::once(Ok(PartialResult::done(sk.zero())));
    }
    ColdStream::new(move |token| {
        let acc = Arc::new(Mutex::new(sk.zero()));
        let child_streams: Vec<_> = children
            .iter()
            .cloned()
            .map(|child| {
                let acc = acc.clone();
                let sk = sk.clone();
                child.sketch(sk.clone()).map(move |item| {
                    item.map(|pr| {
                        let snapshot = if let Some(r) = pr.payload {
                            let mut guard = acc.lock().unwrap();
                            *guard = sk.add(guard.clone(), r);
                            guard.clone()
                        } else {
                            acc.lock().unwrap().clone()
                        };
                        PartialResult::new(pr.delta_done / n as f64, Some(snapshot))
                    })
                })
            })
            .collect();
        fractal_stream::merge(child_streams).with_cancellation(token)
    })
}

/// Wrap a child's operation stream so progress is rescaled by `1/N`, its
/// final payload is recorded into `slots[i]`, and an error flips `failed`
/// before being forwarded unchanged.
fn scaled_child<U>(
    stream: ColdStream<Result<PartialResult<U>, DatasetError>>,
    n: usize,
    i: usize,
    slots: Arc<Mutex<Vec<Option<U>>>>,
    failed: Arc<AtomicBool>,
) -> ColdStream<Result<PartialResult<U>, DatasetError>>
where
    U: Send + 'static,
{
    stream.map(move |item| match item {
        Ok(pr) => {
            if let Some(p) = pr.payload {
                slots.lock().unwrap()[i] = Some(p);
            }
            Ok(PartialResult::new(pr.delta_done / n as f64, None))
        }
        Err(e) => {
            failed.store(true, Ordering::SeqCst);
            Err(e)
        }
    })
}

fn take_slots<U>(slots: &Mutex<Vec<Option<U>>>) -> Vec<U> {
    slots
        .lock()
        .unwrap()
        .drain(..)
        .map(|o| o.expect("every slot is filled once its child completes without error"))
        .collect()
}
