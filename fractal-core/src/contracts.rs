//! The two extension points user code implements: `Map` transforms one
//! element, `Sketch` folds a whole dataset into a result. Both cross the
//! RPC boundary as opaque bytes, so concrete implementations must be
//! cheap to serialize rather than capture arbitrary closures.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Any type usable as a dataset element, a map/sketch result, or a
/// zip component: cloneable, shareable across threads, and serializable
/// so it can cross the RPC boundary when the dataset it belongs to is
/// remote.
pub trait ElementType: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}
impl<T> ElementType for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A pure, serializable per-element transform from `T` to `S`.
pub trait Map<T, S>: Serialize + DeserializeOwned + Clone + Send + Sync + 'static
where
    T: ElementType,
    S: ElementType,
{
    fn apply(&self, input: &T) -> Result<S, crate::error::DatasetError>;
}

/// A monoid-shaped fold from `T` to `R`: `zero` is the identity, `add` is
/// associative, and `create` lifts a single element into `R`. `sketch`
/// operations rely on these three laws to combine partial results from
/// concurrently-running children without waiting for all of them.
pub trait Sketch<T, R>: Serialize + DeserializeOwned + Clone + Send + Sync + 'static
where
    T: ElementType,
    R: ElementType,
{
    fn zero(&self) -> R;
    fn create(&self, input: &T) -> Result<R, crate::error::DatasetError>;
    fn add(&self, a: R, b: R) -> R;
}

/// The element type produced by `zip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair<A, B>(pub A, pub B);
