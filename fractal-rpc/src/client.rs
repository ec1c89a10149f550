//! The client side of [`fractal_core::RpcClient`] over an actual tonic
//! channel. Each streaming call gets a locally-minted `call_id`; a
//! background task watches the `ColdStream`'s cancellation token and
//! fires `Unsubscribe` the moment the caller disposes, so a consumer
//! that stops listening halfway through a fan-out doesn't leave the
//! call running on the server. Every command also carries this client's
//! `session_id`, minted once at construction, so the server's
//! at-most-one-in-flight rule tracks this client across its calls.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use fractal_core::remote::{ManageCommand, RawPartial, RpcClient};
use fractal_core::{DatasetError, ObjectId, ServerId};
use fractal_stream::ColdStream;
use futures::StreamExt;
use tonic::transport::Channel;
use tonic::{Response, Status};

use crate::error::status_to_dataset_error;
use crate::proto;
use crate::proto::fractal_client::FractalClient;
use crate::session::SessionId;
use crate::wire;

pub struct TonicRpcClient {
    client: FractalClient<Channel>,
    server_id: ServerId,
    session_id: SessionId,
    next_call_id: AtomicU64,
}

impl TonicRpcClient {
    pub fn new(channel: Channel, server_id: ServerId) -> Self {
        Self {
            client: FractalClient::new(channel),
            server_id,
            session_id: SessionId::new_random(),
            next_call_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    fn command(&self, object: ObjectId, serialized_op: Vec<u8>) -> proto::Command {
        proto::Command {
            call_id: self.next_id(),
            ids_index: 0,
            high_id: object.high,
            low_id: object.low,
            serialized_op,
            session_id: self.session_id.to_bytes().to_vec(),
        }
    }

    fn run_streaming<F, Fut>(&self, cmd: proto::Command, call: F) -> ColdStream<Result<RawPartial, DatasetError>>
    where
        F: FnOnce(FractalClient<Channel>, proto::Command) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response<tonic::Streaming<proto::PartialResponse>>, Status>> + Send,
    {
        let call_id = cmd.call_id;
        let client = self.client.clone();
        ColdStream::new(move |token| {
            async_stream::stream! {
                let mut unsub_client = client.clone();
                let watch_token = token.clone();
                let watcher = tokio::spawn(async move {
                    watch_token.cancelled().await;
                    let _ = unsub_client
                        .unsubscribe(proto::UnsubscribeRequest { call_id })
                        .await;
                });

                match call(client, cmd).await {
                    Ok(response) => {
                        let mut stream = response.into_inner();
                        loop {
                            match stream.next().await {
                                Some(Ok(resp)) => yield Ok(wire::decode_raw(resp)),
                                Some(Err(status)) => {
                                    yield Err(status_to_dataset_error(&status));
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                    Err(status) => yield Err(status_to_dataset_error(&status)),
                }

                watcher.abort();
            }
            .boxed()
        })
    }
}

impl RpcClient for TonicRpcClient {
    fn map(&self, object: ObjectId, op_bytes: Vec<u8>) -> ColdStream<Result<RawPartial, DatasetError>> {
        let cmd = self.command(object, op_bytes);
        self.run_streaming(cmd, |mut c, cmd| async move { c.map(cmd).await })
    }

    fn flat_map(&self, object: ObjectId, op_bytes: Vec<u8>) -> ColdStream<Result<RawPartial, DatasetError>> {
        let cmd = self.command(object, op_bytes);
        self.run_streaming(cmd, |mut c, cmd| async move { c.flat_map(cmd).await })
    }

    fn sketch(&self, object: ObjectId, op_bytes: Vec<u8>) -> ColdStream<Result<RawPartial, DatasetError>> {
        let cmd = self.command(object, op_bytes);
        self.run_streaming(cmd, |mut c, cmd| async move { c.sketch(cmd).await })
    }

    fn zip(&self, object: ObjectId, peer_bytes: Vec<u8>) -> ColdStream<Result<RawPartial, DatasetError>> {
        let cmd = self.command(object, peer_bytes);
        self.run_streaming(cmd, |mut c, cmd| async move { c.zip(cmd).await })
    }

    fn manage(&self, object: ObjectId, command: ManageCommand) -> ColdStream<Result<RawPartial, DatasetError>> {
        let bytes = match bincode::serialize(&command) {
            Ok(b) => b,
            Err(e) => return ColdStream::once(Err(DatasetError::Internal(e.to_string()))),
        };
        let cmd = self.command(object, bytes);
        self.run_streaming(cmd, |mut c, cmd| async move { c.manage(cmd).await })
    }

    fn prune(&self, object: ObjectId) -> ColdStream<Result<RawPartial, DatasetError>> {
        let cmd = self.command(object, Vec::new());
        self.run_streaming(cmd, |mut c, cmd| async move { c.prune(cmd).await })
    }

    fn server_id(&self) -> &ServerId {
        &self.server_id
    }
}
