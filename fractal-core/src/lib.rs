//! Dataset handles, their three placements (local/parallel/remote), and
//! the `Map`/`Sketch` contracts user code implements against them.

pub mod contracts;
pub mod dataset;
pub mod error;
pub mod id;
mod local;
mod parallel;
pub mod partial;
pub mod remote;

pub use contracts::{ElementType, Map, Pair, Sketch};
pub use dataset::{DataSetHandle, LocalConfig};
pub use error::DatasetError;
pub use id::{ObjectId, ServerId};
pub use partial::PartialResult;
pub use remote::{ManageCommand, RawPartial, RemoteDataSet, RpcClient, WireHandleRef};
