//! Maps the dataset error taxonomy onto gRPC status codes and defines
//! the errors specific to the transport layer itself (session/registry
//! bookkeeping that `fractal-core` has no notion of).
//!
//! The gRPC status code alone only narrows a `DatasetError` down to a
//! handful of buckets (`invalid_argument` covers both `TypeMismatch` and
//! `ShapeMismatch`, for instance), so the exact variant additionally
//! rides along as bincode-encoded bytes in a binary metadata entry and
//! is decoded back verbatim on the client; the status code/message
//! remain for any peer that isn't this crate's own client.

use fractal_core::DatasetError;
use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::Status;

const DATASET_ERROR_METADATA_KEY: &str = "x-dataset-error-bin";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("malformed wire payload: {0}")]
    Decode(String),

    #[error("unknown call id: {0}")]
    UnknownCall(u64),
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Dataset(e) => dataset_error_to_status(&e),
            RpcError::Decode(msg) => Status::invalid_argument(msg),
            RpcError::UnknownCall(id) => Status::not_found(format!("unknown call id {id}")),
        }
    }
}

pub fn dataset_error_to_status(err: &DatasetError) -> Status {
    let mut status = match err {
        DatasetError::UserCodeFailure(msg) => Status::unknown(msg.clone()),
        DatasetError::TypeMismatch { expected, found } => {
            Status::invalid_argument(format!("expected {expected}, found {found}"))
        }
        DatasetError::ShapeMismatch { left, right } => {
            Status::invalid_argument(format!("{left} children vs {right} children"))
        }
        DatasetError::ObjectNotFound(id) => Status::not_found(id.to_string()),
        DatasetError::SessionBusy(msg) => Status::failed_precondition(msg.clone()),
        DatasetError::TransportError(msg) => Status::unavailable(msg.clone()),
        DatasetError::Cancelled => Status::cancelled("operation cancelled"),
        DatasetError::Internal(msg) => Status::internal(msg.clone()),
    };
    if let Ok(encoded) = bincode::serialize(err) {
        status
            .metadata_mut()
            .insert_bin(DATASET_ERROR_METADATA_KEY, MetadataValue::from_bytes(&encoded));
    }
    status
}

/// Recovers the exact `DatasetError` a server-side `dataset_error_to_status`
/// encoded. Falls back to guessing from the gRPC code for statuses that
/// didn't come from this crate (a proxy, a different implementation)
/// and so carry no metadata entry, or whose entry fails to decode.
pub fn status_to_dataset_error(status: &Status) -> DatasetError {
    if let Some(value) = status.metadata().get_bin(DATASET_ERROR_METADATA_KEY) {
        if let Ok(bytes) = value.to_bytes() {
            let leaked: &'static [u8] = Box::leak(bytes.to_vec().into_boxed_slice());
            if let Ok(err) = bincode::deserialize::<DatasetError>(leaked) {
                return err;
            }
        }
    }
    use tonic::Code;
    match status.code() {
        // The precise `ObjectNotFound(id)` needs the id back, which only
        // the metadata entry above carries; without it this is the best a
        // non-conforming peer's code alone can tell us.
        Code::NotFound => DatasetError::TransportError(status.message().to_string()),
        Code::InvalidArgument => DatasetError::TypeMismatch {
            expected: "valid operation",
            found: "invalid operation",
        },
        Code::FailedPrecondition => DatasetError::SessionBusy(status.message().to_string()),
        Code::Cancelled => DatasetError::Cancelled,
        Code::Unavailable => DatasetError::TransportError(status.message().to_string()),
        _ => DatasetError::Internal(status.message().to_string()),
    }
}
