//! The proxy side of a dataset that lives on another process. Talks to
//! the remote object registry through [`RpcClient`], an abstraction that
//! keeps this crate free of any particular transport: a concrete client
//! (gRPC, in-process, whatever) lives one crate up and implements this
//! trait over its own wire format.

use std::marker::PhantomData;
use std::sync::Arc;

use fractal_stream::ColdStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::contracts::{ElementType, Map, Pair, Sketch};
use crate::dataset::DataSetHandle;
use crate::error::DatasetError;
use crate::id::{ObjectId, ServerId};
use crate::partial::PartialResult;

/// The `manage` RPC's command payload: operations on an object's
/// lifecycle that don't fit the map/flatMap/sketch/zip shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ManageCommand {
    /// Bump the registry refcount without keeping a live local handle,
    /// e.g. when a session stores an object id across requests.
    Retain,
    /// Ask the server to describe the object (mainly for diagnostics).
    Describe,
}

/// What a `map`/`flatMap`/`zip` response payload decodes to: a reference
/// to the freshly-registered object on the server, not the value itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHandleRef {
    pub object: ObjectId,
}

/// One item off the wire before it has been decoded into a domain type:
/// the progress fraction plus, if present, the still-opaque payload
/// bytes. Mirrors `PartialResponse` (delta_done/has_payload/payload)
/// without tying this crate to any particular transport's generated
/// types.
#[derive(Debug, Clone)]
pub struct RawPartial {
    pub delta_done: f64,
    pub payload: Option<Vec<u8>>,
}

/// Transport-agnostic handle to a remote object registry. Each method
/// corresponds to one streaming RPC; cancelling the returned `ColdStream`
/// is how the caller signals it no longer wants the in-flight call, and
/// is expected to eventually dispatch the registry's `unsubscribe` RPC.
pub trait RpcClient: Send + Sync + 'static {
    fn map(&self, object: ObjectId, op_bytes: Vec<u8>) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn flat_map(
        &self,
        object: ObjectId,
        op_bytes: Vec<u8>,
    ) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn sketch(
        &self,
        object: ObjectId,
        op_bytes: Vec<u8>,
    ) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn zip(
        &self,
        object: ObjectId,
        peer_bytes: Vec<u8>,
    ) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn manage(
        &self,
        object: ObjectId,
        command: ManageCommand,
    ) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn prune(&self, object: ObjectId) -> ColdStream<Result<RawPartial, DatasetError>>;
    fn server_id(&self) -> &ServerId;
}

struct RemoteInner {
    object: ObjectId,
    client: Arc<dyn RpcClient>,
}

impl Drop for RemoteInner {
    fn drop(&mut self) {
        let stream = self.client.prune(self.object);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let (_sub, mut s) = stream.subscribe();
                while s.next().await.is_some() {}
            });
        }
    }
}

pub struct RemoteDataSet<T> {
    inner: Arc<RemoteInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteDataSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ElementType> RemoteDataSet<T> {
    pub fn new(object: ObjectId, client: Arc<dyn RpcClient>) -> Self {
        Self {
            inner: Arc::new(RemoteInner { object, client }),
            _marker: PhantomData,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.inner.object
    }

    pub fn server_id(&self) -> ServerId {
        self.inner.client.server_id().clone()
    }

    pub fn retain(&self) -> ColdStream<Result<RawPartial, DatasetError>> {
        self.inner.client.manage(self.inner.object, ManageCommand::Retain)
    }

    pub fn map<S, M>(
        &self,
        mapper: M,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
    where
        S: ElementType,
        M: Map<T, S>,
    {
        let op_bytes = bincode::serialize(&mapper).expect("Map implementors are serde-serializable");
        let bytes_stream = self.inner.client.map(self.inner.object, op_bytes);
        decode_handle_stream(self.inner.client.clone(), bytes_stream)
    }

    pub fn flat_map<S, M>(
        &self,
        mapper: M,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
    where
        S: ElementType,
        M: Map<T, Vec<S>>,
    {
        let op_bytes = bincode::serialize(&mapper).expect("Map implementors are serde-serializable");
        let bytes_stream = self.inner.client.flat_map(self.inner.object, op_bytes);
        decode_handle_stream(self.inner.client.clone(), bytes_stream)
    }

    pub fn sketch<R, K>(&self, sk: K) -> ColdStream<Result<PartialResult<R>, DatasetError>>
    where
        R: ElementType,
        K: Sketch<T, R>,
    {
        let op_bytes = bincode::serialize(&sk).expect("Sketch implementors are serde-serializable");
        let bytes_stream = self.inner.client.sketch(self.inner.object, op_bytes);
        decode_partial_stream(bytes_stream)
    }

    pub fn zip<S>(
        &self,
        other: &DataSetHandle<S>,
    ) -> ColdStream<Result<PartialResult<DataSetHandle<Pair<T, S>>>, DatasetError>>
    where
        S: ElementType,
    {
        let peer = match other {
            DataSetHandle::Remote(r) if r.server_id() == self.server_id() => r.object_id(),
            DataSetHandle::Remote(_) => {
                return ColdStream::once(Err(DatasetError::TransportError(
                    "zip requires both datasets to live on the same server".into(),
                )))
            }
            DataSetHandle::Local(..) => {
                return ColdStream::once(Err(DatasetError::TypeMismatch {
                    expected: "Remote",
                    found: "Local",
                }))
            }
            DataSetHandle::Parallel(_) => {
                return ColdStream::once(Err(DatasetError::TypeMismatch {
                    expected: "Remote",
                    found: "Parallel",
                }))
            }
        };
        let peer_bytes =
            bincode::serialize(&WireHandleRef { object: peer }).expect("object ids serialize");
        let bytes_stream = self.inner.client.zip(self.inner.object, peer_bytes);
        decode_handle_stream(self.inner.client.clone(), bytes_stream)
    }
}

fn decode_handle_stream<S>(
    client: Arc<dyn RpcClient>,
    raw_stream: ColdStream<Result<RawPartial, DatasetError>>,
) -> ColdStream<Result<PartialResult<DataSetHandle<S>>, DatasetError>>
where
    S: ElementType,
{
    ColdStream::new(move |token| {
        raw_stream
            .with_cancellation(token)
            .map(move |item| {
                item.and_then(|raw| {
                    let payload = raw
                        .payload
                        .map(|bytes| {
                            let href: WireHandleRef = bincode::deserialize(&bytes)
                                .map_err(|e| DatasetError::TransportError(e.to_string()))?;
                            Ok::<_, DatasetError>(DataSetHandle::remote(href.object, client.clone()))
                        })
                        .transpose()?;
                    Ok(PartialResult::new(raw.delta_done, payload))
                })
            })
            .boxed()
    })
}

fn decode_partial_stream<R>(
    raw_stream: ColdStream<Result<RawPartial, DatasetError>>,
) -> ColdStream<Result<PartialResult<R>, DatasetError>>
where
    R: DeserializeOwned + Send + 'static,
{
    ColdStream::new(move |token| {
        raw_stream
            .with_cancellation(token)
            .map(|item| {
                item.and_then(|raw| {
                    let payload = raw
                        .payload
                        .map(|bytes| {
                            bincode::deserialize::<R>(&bytes)
                                .map_err(|e| DatasetError::TransportError(e.to_string()))
                        })
                        .transpose()?;
                    Ok(PartialResult::new(raw.delta_done, payload))
                })
            })
            .boxed()
    })
}
