//! Operations on a dataset whose value lives in this process's memory.
//! `map`/`flatMap`/`sketch` run user code either inline or on the shared
//! compute pool depending on `LocalConfig::separate_thread`; `zip`
//! requires its peer to also be `Local`.

use std::sync::Arc;

use fractal_stream::ColdStream;
use futures::StreamExt;

use crate::contracts::{ElementType, Map, Pair, Sketch};
use crate::dataset::{DataSetHandle, LocalConfig};
use crate::error::DatasetError;
use crate::partial::PartialResult;

pub fn map<T, S, M>(
    value: Arc<T>,
    config: LocalConfig,
    mapper: M,
) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
    M: Map<T, S>,
{
    ColdStream::new(move |_token| {
        async_stream::stream! {
            let outcome = if config.separate_thread {
                let v = value.clone();
                let m = mapper.clone();
                config.pool.run(move || m.apply(&v)).await
            } else {
                mapper.apply(&value)
            };
            let result_config = config.clone();
            yield outcome.map(|s| PartialResult::done(DataSetHandle::local_with_config(s, result_config)));
        }
        .boxed()
    })
}

pub fn flat_map<T, S, M>(
    value: Arc<T>,
    config: LocalConfig,
    mapper: M,
) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
    M: Map<T, Vec<S>>,
{
    ColdStream::new(move |_token| {
        async_stream::stream! {
            let outcome = if config.separate_thread {
                let v = value.clone();
                let m = mapper.clone();
                config.pool.run(move || m.apply(&v)).await
            } else {
                mapper.apply(&value)
            };
            let result_config = config.clone();
            match outcome {
                Ok(items) => {
                    let children = items
                        .into_iter()
                        .map(|s| DataSetHandle::local_with_config(s, result_config.clone()))
                        .collect();
                    yield Ok(PartialResult::done(DataSetHandle::parallel(children)));
                }
                Err(e) => yield Err(e),
            }
        }
        .boxed()
    })
}

pub fn sketch<T, R, K>(
    value: Arc<T>,
    config: LocalConfig,
    sk: K,
) -> ColdStream<Result<PartialResult<R>, DatasetError>>
where
    T: ElementType,
    R: ElementType,
    K: Sketch<T, R>,
{
    ColdStream::new(move |_token| {
        async_stream::stream! {
            yield Ok(PartialResult::new(0.0, Some(sk.zero())));
            let outcome = if config.separate_thread {
                let v = value.clone();
                let s = sk.clone();
                config.pool.run(move || s.create(&v)).await
            } else {
                sk.create(&value)
            };
            yield outcome.map(PartialResult::done);
        }
        .boxed()
    })
}

pub fn zip<T, S>(
    value: Arc<T>,
    other: &DataSetHandle<S>,
) -> ColdStream<Result<PartialResult<DataSetHandle<Pair<T, S>>>, DatasetError>>
where
    T: ElementType,
    S: ElementType,
{
    let other_value = match other {
        DataSetHandle::Local(v, _) => Ok(v.clone()),
        DataSetHandle::Parallel(_) => Err(DatasetError::TypeMismatch {
            expected: "Local",
            found: "Parallel",
        }),
        DataSetHandle::Remote(_) => Err(DatasetError::TypeMismatch {
            expected: "Local",
            found: "Remote",
        }),
    };
    ColdStream::new(move |_token| {
        async_stream::stream! {
            match other_value {
                Ok(ov) => {
                    let pair = Pair((*value).clone(), (*ov).clone());
                    yield Ok(PartialResult::done(DataSetHandle::local(pair)));
                }
                Err(e) => yield Err(e),
            }
        }
        .boxed()
    })
}
