//! The gRPC-facing side of the object registry: decodes `Command`s,
//! dispatches into `fractal-core`'s dataset operations, and streams the
//! resulting `PartialResult`s back out as `PartialResponse`s. Generic
//! over one element type `T` and one closed operation type `O` chosen by
//! the binary that wires this service up, rather than generic over
//! arbitrary user code.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fractal_core::{DataSetHandle, ElementType, ManageCommand, Map, ObjectId, Pair, PartialResult, Sketch};
use fractal_stream::{ColdStream, Subscription};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::error::dataset_error_to_status;
use crate::proto::{self, fractal_server::Fractal};
use crate::registry::{ObjectRegistry, SharedRegistry};
use crate::session::SessionId;
use crate::wire;

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<proto::PartialResponse, Status>> + Send>>;

/// `zip` produces datasets of `Pair<T, T>`, a different element type than
/// everything else this service handles, so it gets its own table rather
/// than forcing `registry` to hold a mix of shapes. Nothing downstream
/// needs to `Map`/`Sketch` over pairs — they're a terminal product browsed
/// via `Manage`/`Prune` only, since `O` never claims to transform them.
/// Session bookkeeping (the at-most-one-in-flight rule) always lives on
/// `registry`, the primary table, regardless of which table ends up
/// holding an operation's output.
pub struct FractalService<T, O> {
    registry: SharedRegistry<T>,
    pairs: SharedRegistry<Pair<T, T>>,
    calls: Arc<DashMap<u64, Subscription>>,
    deadline: Option<Duration>,
    _marker: PhantomData<O>,
}

impl<T, O> FractalService<T, O>
where
    T: ElementType,
    O: DeserializeOwned + Map<T, T> + Map<T, Vec<T>> + Sketch<T, T> + Send + Sync + 'static,
{
    pub fn new(registry: SharedRegistry<T>, deadline: Option<Duration>) -> Self {
        Self {
            registry,
            pairs: Arc::new(ObjectRegistry::new()),
            calls: Arc::new(DashMap::new()),
            deadline,
            _marker: PhantomData,
        }
    }

    fn lookup(&self, object: ObjectId) -> Result<DataSetHandle<T>, Status> {
        self.registry
            .lookup(object)
            .map_err(|e| dataset_error_to_status(&e))
    }

    fn begin_session(&self, cmd: &proto::Command) -> Result<SessionId, Status> {
        let session: SessionId = wire::session_from_command(cmd).map_err(Status::from)?;
        self.registry
            .add_session(session)
            .map_err(|e| dataset_error_to_status(&e))?;
        Ok(session)
    }

    fn serve_handle_stream<U: ElementType>(
        &self,
        session: SessionId,
        call_id: u64,
        output: SharedRegistry<U>,
        op_stream: ColdStream<Result<PartialResult<DataSetHandle<U>>, fractal_core::DatasetError>>,
    ) -> ResponseStream {
        let (sub, inner) = op_stream.subscribe();
        self.calls.insert(call_id, sub.clone());
        self.registry.attach_subscription(session, sub);
        let registry = self.registry.clone();
        let calls = self.calls.clone();
        let deadline = self.deadline;
        Box::pin(async_stream::stream! {
            let mut inner = inner;
            loop {
                let next = match deadline {
                    Some(d) => match tokio::time::timeout(d, inner.next()).await {
                        Ok(item) => item,
                        Err(_) => {
                            yield Err(dataset_error_to_status(&fractal_core::DatasetError::Cancelled));
                            break;
                        }
                    },
                    None => inner.next().await,
                };
                match next {
                    Some(Ok(pr)) => {
                        let object_id = pr.payload.map(|h| output.insert(h));
                        yield Ok(wire::encode_handle_response(pr.delta_done, object_id));
                    }
                    Some(Err(e)) => {
                        yield Err(dataset_error_to_status(&e));
                        break;
                    }
                    None => break,
                }
            }
            registry.remove_session(session);
            calls.remove(&call_id);
        })
    }

    fn serve_sketch_stream(
        &self,
        session: SessionId,
        call_id: u64,
        op_stream: ColdStream<Result<PartialResult<T>, fractal_core::DatasetError>>,
    ) -> ResponseStream {
        let (sub, inner) = op_stream.subscribe();
        self.calls.insert(call_id, sub.clone());
        self.registry.attach_subscription(session, sub);
        let registry = self.registry.clone();
        let calls = self.calls.clone();
        let deadline = self.deadline;
        Box::pin(async_stream::stream! {
            let mut inner = inner;
            loop {
                let next = match deadline {
                    Some(d) => match tokio::time::timeout(d, inner.next()).await {
                        Ok(item) => item,
                        Err(_) => {
                            yield Err(dataset_error_to_status(&fractal_core::DatasetError::Cancelled));
                            break;
                        }
                    },
                    None => inner.next().await,
                };
                match next {
                    Some(Ok(pr)) => {
                        yield Ok(wire::encode_partial(pr.delta_done, pr.payload.as_ref()));
                    }
                    Some(Err(e)) => {
                        yield Err(dataset_error_to_status(&e));
                        break;
                    }
                    None => break,
                }
            }
            registry.remove_session(session);
            calls.remove(&call_id);
        })
    }

    fn single_item(item: proto::PartialResponse) -> ResponseStream {
        Box::pin(futures::stream::once(async move { Ok(item) }))
    }
}

#[tonic::async_trait]
impl<T, O> Fractal for FractalService<T, O>
where
    T: ElementType,
    O: DeserializeOwned + Map<T, T> + Map<T, Vec<T>> + Sketch<T, T> + Send + Sync + 'static,
{
    type MapStream = ResponseStream;
    type FlatMapStream = ResponseStream;
    type SketchStream = ResponseStream;
    type ZipStream = ResponseStream;
    type ManageStream = ResponseStream;
    type PruneStream = ResponseStream;

    async fn map(&self, request: Request<proto::Command>) -> Result<Response<Self::MapStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        let session = self.begin_session(&cmd)?;
        let handle = match self.lookup(object) {
            Ok(h) => h,
            Err(status) => {
                self.registry.remove_session(session);
                return Err(status);
            }
        };
        let op: O = match wire::decode_op(&cmd) {
            Ok(op) => op,
            Err(e) => {
                self.registry.remove_session(session);
                return Err(e.into());
            }
        };
        let stream = handle.map(op);
        Ok(Response::new(self.serve_handle_stream(session, cmd.call_id, self.registry.clone(), stream)))
    }

    async fn flat_map(
        &self,
        request: Request<proto::Command>,
    ) -> Result<Response<Self::FlatMapStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        let session = self.begin_session(&cmd)?;
        let handle = match self.lookup(object) {
            Ok(h) => h,
            Err(status) => {
                self.registry.remove_session(session);
                return Err(status);
            }
        };
        let op: O = match wire::decode_op(&cmd) {
            Ok(op) => op,
            Err(e) => {
                self.registry.remove_session(session);
                return Err(e.into());
            }
        };
        let stream = handle.flat_map(op);
        Ok(Response::new(self.serve_handle_stream(session, cmd.call_id, self.registry.clone(), stream)))
    }

    async fn sketch(
        &self,
        request: Request<proto::Command>,
    ) -> Result<Response<Self::SketchStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        let session = self.begin_session(&cmd)?;
        let handle = match self.lookup(object) {
            Ok(h) => h,
            Err(status) => {
                self.registry.remove_session(session);
                return Err(status);
            }
        };
        let op: O = match wire::decode_op(&cmd) {
            Ok(op) => op,
            Err(e) => {
                self.registry.remove_session(session);
                return Err(e.into());
            }
        };
        let stream = handle.sketch(op);
        Ok(Response::new(self.serve_sketch_stream(session, cmd.call_id, stream)))
    }

    async fn zip(&self, request: Request<proto::Command>) -> Result<Response<Self::ZipStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        let session = self.begin_session(&cmd)?;
        let handle = match self.lookup(object) {
            Ok(h) => h,
            Err(status) => {
                self.registry.remove_session(session);
                return Err(status);
            }
        };
        let peer_ref = match wire::decode_peer(&cmd.serialized_op) {
            Ok(p) => p,
            Err(e) => {
                self.registry.remove_session(session);
                return Err(e.into());
            }
        };
        let peer_handle = match self.lookup(peer_ref.object) {
            Ok(h) => h,
            Err(status) => {
                self.registry.remove_session(session);
                return Err(status);
            }
        };
        let stream = handle.zip(&peer_handle);
        Ok(Response::new(self.serve_handle_stream(session, cmd.call_id, self.pairs.clone(), stream)))
    }

    async fn manage(
        &self,
        request: Request<proto::Command>,
    ) -> Result<Response<Self::ManageStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        let command: ManageCommand = wire::decode_op(&cmd)?;
        match command {
            ManageCommand::Retain => {
                if self.registry.retain(object).is_err() {
                    self.pairs
                        .retain(object)
                        .map_err(|e| dataset_error_to_status(&e))?;
                }
                Ok(Response::new(Self::single_item(wire::encode_partial::<bool>(
                    1.0,
                    None,
                ))))
            }
            ManageCommand::Describe => {
                let exists = self.registry.lookup(object).is_ok() || self.pairs.lookup(object).is_ok();
                Ok(Response::new(Self::single_item(wire::encode_partial(
                    1.0,
                    Some(&exists),
                ))))
            }
        }
    }

    async fn prune(&self, request: Request<proto::Command>) -> Result<Response<Self::PruneStream>, Status> {
        let cmd = request.into_inner();
        let object = wire::object_from_command(&cmd);
        if self.registry.prune(object).is_err() {
            self.pairs
                .prune(object)
                .map_err(|e| dataset_error_to_status(&e))?;
        }
        Ok(Response::new(Self::single_item(wire::encode_partial::<bool>(
            1.0, None,
        ))))
    }

    async fn unsubscribe(
        &self,
        request: Request<proto::UnsubscribeRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        let call_id = request.into_inner().call_id;
        if let Some((_, sub)) = self.calls.remove(&call_id) {
            sub.dispose();
            Ok(Response::new(proto::Ack {
                ok: true,
                message: String::new(),
            }))
        } else {
            warn!(call_id, "unsubscribe for unknown or already-finished call");
            Ok(Response::new(proto::Ack {
                ok: false,
                message: format!("unknown call id {call_id}"),
            }))
        }
    }
}
