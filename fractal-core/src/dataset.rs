//! The dataset handle itself: a closed, tagged union over the three
//! places a dataset can live. Every operation matches on the tag and
//! delegates to the matching module (`local`, `parallel`, `remote.rs`'s
//! `RemoteDataSet`), so the recursive fan-out that `ParallelDataSet`
//! performs by calling back into these same methods on each child stays
//! visible at the call site instead of hiding behind virtual dispatch.

use std::sync::Arc;

use fractal_stream::{ColdStream, ComputePool};

use crate::contracts::{ElementType, Map, Pair, Sketch};
use crate::error::DatasetError;
use crate::id::ObjectId;
use crate::partial::PartialResult;
pub use crate::remote::RemoteDataSet;
use crate::remote::RpcClient;

/// Execution parameters a `Local` leaf carries along with its value.
/// Threaded explicitly rather than read from a global so a process can
/// host datasets with different pool sizes or synchronous-execution
/// policies side by side.
#[derive(Clone)]
pub struct LocalConfig {
    pub pool: ComputePool,
    pub separate_thread: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            pool: ComputePool::cpu_bound(),
            separate_thread: true,
        }
    }
}

pub enum DataSetHandle<T> {
    Local(Arc<T>, LocalConfig),
    Parallel(Arc<Vec<DataSetHandle<T>>>),
    Remote(RemoteDataSet<T>),
}

impl<T> Clone for DataSetHandle<T> {
    fn clone(&self) -> Self {
        match self {
            DataSetHandle::Local(v, c) => DataSetHandle::Local(v.clone(), c.clone()),
            DataSetHandle::Parallel(c) => DataSetHandle::Parallel(c.clone()),
            DataSetHandle::Remote(r) => DataSetHandle::Remote(r.clone()),
        }
    }
}

impl<T: ElementType> DataSetHandle<T> {
    pub fn local(value: T) -> Self {
        Self::local_with_config(value, LocalConfig::default())
    }

    pub fn local_with_config(value: T, config: LocalConfig) -> Self {
        DataSetHandle::Local(Arc::new(value), config)
    }

    pub fn parallel(children: Vec<DataSetHandle<T>>) -> Self {
        DataSetHandle::Parallel(Arc::new(children))
    }

    pub fn remote(object: ObjectId, client: Arc<dyn RpcClient>) -> Self {
        DataSetHandle::Remote(RemoteDataSet::new(object, client))
    }

    pub fn child_count(&self) -> Option<usize> {
        match self {
            DataSetHandle::Parallel(children) => Some(children.len()),
            _ => None,
        }
    }

    pub fn map<S, M>(
        &self,
        mapper: M,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
    where
        S: ElementType,
        M: Map<T, S>,
    {
        match self {
            DataSetHandle::Local(v, cfg) => crate::local::map(v.clone(), cfg.clone(), mapper),
            DataSetHandle::Parallel(children) => crate::parallel::map(children.clone(), mapper),
            DataSetHandle::Remote(r) => r.map(mapper),
        }
    }

    pub fn flat_map<S, M>(
        &self,
        mapper: M,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
    where
        S: ElementType,
        M: Map<T, Vec<S>>,
    {
        match self {
            DataSetHandle::Local(v, cfg) => crate::local::flat_map(v.clone(), cfg.clone(), mapper),
            DataSetHandle::Parallel(children) => {
                crate::parallel::flat_map(children.clone(), mapper)
            }
            DataSetHandle::Remote(r) => r.flat_map(mapper),
        }
    }

    pub fn zip<S>(
        &self,
        other: &DataSetHandle<S>,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<Pair<T, S>>>, DatasetError>>
    where
        S: ElementType,
    {
        match self {
            DataSetHandle::Local(v, _) => crate::local::zip(v.clone(), other),
            DataSetHandle::Parallel(children) => crate::parallel::zip(children.clone(), other),
            DataSetHandle::Remote(r) => r.zip(other),
        }
    }

    pub fn sketch<R, K>(&self, sk: K) -> ColdStream<Result<PartialResult<R>, DatasetError>>
    where
        R: ElementType,
        K: Sketch<T, R>,
    {
        match self {
            DataSetHandle::Local(v, cfg) => crate::local::sketch(v.clone(), cfg.clone(), sk),
            DataSetHandle::Parallel(children) => crate::parallel::sketch(children.clone(), sk),
            DataSetHandle::Remote(r) => r.sketch(sk),
        }
    }
}
