//! The browser-facing bridge: a single `/rpc` WebSocket connection is one
//! session (section 4.6) multiplexing subscriptions identified by a
//! client-chosen `subscription_id`, directly against the same object
//! registry the gRPC service uses (no extra network hop). Built on the
//! same `axum` router/state wiring as the rest of the HTTP surface,
//! swapping the request/response shape for a long-lived socket since
//! partial results need to be pushed rather than returned once.
//!
//! At most one `Map`/`FlatMap`/`Sketch`/`Zip` may be in flight per
//! connection at a time, mirroring the gRPC service's per-session rule.
//! A connection that tries to start a second one while the first is
//! still streaming gets a `SessionBusy` reply and the in-flight
//! subscription is left untouched — the connection itself is not torn
//! down, since closing it would also kill the call that's still live.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use fractal_core::{DataSetHandle, ElementType, ManageCommand, Map, ObjectId, Pair, Sketch};
use fractal_stream::Subscription;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::registry::{ObjectRegistry, SharedRegistry};
use crate::session::SessionId;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WsCommand<O> {
    Map {
        subscription_id: String,
        object_high: i64,
        object_low: i64,
        op: O,
    },
    FlatMap {
        subscription_id: String,
        object_high: i64,
        object_low: i64,
        op: O,
    },
    Sketch {
        subscription_id: String,
        object_high: i64,
        object_low: i64,
        op: O,
    },
    Zip {
        subscription_id: String,
        object_high: i64,
        object_low: i64,
        peer_high: i64,
        peer_low: i64,
    },
    Manage {
        subscription_id: String,
        object_high: i64,
        object_low: i64,
        command: ManageCommand,
    },
    Unsubscribe {
        subscription_id: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WsPartial<'a> {
    subscription_id: &'a str,
    delta_done: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<ObjectIdJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    done: bool,
    is_error: bool,
}

#[derive(Debug, Serialize)]
struct ObjectIdJson {
    high: i64,
    low: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WsError<'a> {
    subscription_id: &'a str,
    error: String,
    done: bool,
    is_error: bool,
}

pub struct WsState<T: ElementType, O> {
    pub registry: SharedRegistry<T>,
    pub pairs: SharedRegistry<Pair<T, T>>,
    _marker: std::marker::PhantomData<O>,
}

impl<T: ElementType, O> WsState<T, O> {
    pub fn new(registry: SharedRegistry<T>) -> Self {
        Self {
            registry,
            pairs: Arc::new(ObjectRegistry::new()),
            _marker: std::marker::PhantomData,
        }
    }
}

pub fn router<T, O>(state: Arc<WsState<T, O>>) -> Router
where
    T: ElementType,
    O: serde::de::DeserializeOwned
        + Serialize
        + Map<T, T>
        + Map<T, Vec<T>>
        + Sketch<T, T>
        + Send
        + Sync
        + 'static,
{
    Router::new().route("/rpc", get(upgrade::<T, O>)).with_state(state)
}

async fn upgrade<T, O>(ws: WebSocketUpgrade, State(state): State<Arc<WsState<T, O>>>) -> impl IntoResponse
where
    T: ElementType,
    O: serde::de::DeserializeOwned
        + Serialize
        + Map<T, T>
        + Map<T, Vec<T>>
        + Sketch<T, T>
        + Send
        + Sync
        + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<T, O>(socket: WebSocket, state: Arc<WsState<T, O>>)
where
    T: ElementType,
    O: serde::de::DeserializeOwned
        + Serialize
        + Map<T, T>
        + Map<T, Vec<T>>
        + Sketch<T, T>
        + Send
        + Sync
        + 'static,
{
    let session = SessionId::new_random();
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(AsyncMutex::new(sink));
    let subscriptions: Arc<AsyncMutex<HashMap<String, Subscription>>> =
        Arc::new(AsyncMutex::new(HashMap::new()));

    info!(%session, "websocket session opened");
    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let command: WsCommand<O> = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "malformed websocket command");
                continue;
            }
        };
        dispatch(session, command, &state, &sink, &subscriptions).await;
    }

    state.registry.remove_session(session);
    info!(%session, "websocket session closed");
}

/// Reserves the session for one in-flight operation, replying with
/// `SessionBusy` and leaving everything untouched if one is already
/// running. Returns whether the caller may proceed.
async fn begin_session<T: ElementType, O>(
    session: SessionId,
    subscription_id: &str,
    state: &Arc<WsState<T, O>>,
    sink: &Arc<AsyncMutex<SplitSink<WebSocket, Message>>>,
) -> bool {
    match state.registry.add_session(session) {
        Ok(()) => true,
        Err(e) => {
            send_error(sink, subscription_id, &e.to_string()).await;
            false
        }
    }
}

async fn dispatch<T, O>(
    session: SessionId,
    command: WsCommand<O>,
    state: &Arc<WsState<T, O>>,
    sink: &Arc<AsyncMutex<SplitSink<WebSocket, Message>>>,
    subscriptions: &Arc<AsyncMutex<HashMap<String, Subscription>>>,
) where
    T: ElementType,
    O: Map<T, T> + Map<T, Vec<T>> + Sketch<T, T> + Serialize + Send + Sync + 'static,
{
    match command {
        WsCommand::Unsubscribe { subscription_id } => {
            if let Some(sub) = subscriptions.lock().await.remove(&subscription_id) {
                sub.dispose();
            }
            state.registry.remove_session(session);
        }
        WsCommand::Map {
            subscription_id,
            object_high,
            object_low,
            op,
        } => {
            if !begin_session(session, &subscription_id, state, sink).await {
                return;
            }
            let object = ObjectId { high: object_high, low: object_low };
            match state.registry.lookup(object) {
                Ok(handle) => {
                    let stream = handle.map(op);
                    spawn_handle_stream(
                        session,
                        subscription_id,
                        stream,
                        state.registry.clone(),
                        state.registry.clone(),
                        sink.clone(),
                        subscriptions.clone(),
                    );
                }
                Err(e) => {
                    send_error(sink, &subscription_id, &e.to_string()).await;
                    state.registry.remove_session(session);
                }
            }
        }
        WsCommand::FlatMap {
            subscription_id,
            object_high,
            object_low,
            op,
        } => {
            if !begin_session(session, &subscription_id, state, sink).await {
                return;
            }
            let object = ObjectId { high: object_high, low: object_low };
            match state.registry.lookup(object) {
                Ok(handle) => {
                    let stream = handle.flat_map(op);
                    spawn_handle_stream(
                        session,
                        subscription_id,
                        stream,
                        state.registry.clone(),
                        state.registry.clone(),
                        sink.clone(),
                        subscriptions.clone(),
                    );
                }
                Err(e) => {
                    send_error(sink, &subscription_id, &e.to_string()).await;
                    state.registry.remove_session(session);
                }
            }
        }
        WsCommand::Sketch {
            subscription_id,
            object_high,
            object_low,
            op,
        } => {
            if !begin_session(session, &subscription_id, state, sink).await {
                return;
            }
            let object = ObjectId { high: object_high, low: object_low };
            match state.registry.lookup(object) {
                Ok(handle) => {
                    let stream = handle.sketch(op);
                    spawn_sketch_stream::<T, T>(
                        session,
                        subscription_id,
                        stream,
                        state.registry.clone(),
                        sink.clone(),
                        subscriptions.clone(),
                    );
                }
                Err(e) => {
                    send_error(sink, &subscription_id, &e.to_string()).await;
                    state.registry.remove_session(session);
                }
            }
        }
        WsCommand::Zip {
            subscription_id,
            object_high,
            object_low,
            peer_high,
            peer_low,
        } => {
            if !begin_session(session, &subscription_id, state, sink).await {
                return;
            }
            let object = ObjectId { high: object_high, low: object_low };
            let peer = ObjectId { high: peer_high, low: peer_low };
            match (state.registry.lookup(object), state.registry.lookup(peer)) {
                (Ok(handle), Ok(peer_handle)) => {
                    let stream = handle.zip(&peer_handle);
                    spawn_handle_stream(
                        session,
                        subscription_id,
                        stream,
                        state.pairs.clone(),
                        state.registry.clone(),
                        sink.clone(),
                        subscriptions.clone(),
                    );
                }
                (Err(e), _) | (_, Err(e)) => {
                    send_error(sink, &subscription_id, &e.to_string()).await;
                    state.registry.remove_session(session);
                }
            }
        }
        WsCommand::Manage {
            subscription_id,
            object_high,
            object_low,
            command,
        } => {
            let object = ObjectId { high: object_high, low: object_low };
            let outcome = match command {
                ManageCommand::Retain => state
                    .registry
                    .retain(object)
                    .or_else(|_| state.pairs.retain(object)),
                ManageCommand::Describe => state
                    .registry
                    .lookup(object)
                    .map(|_| ())
                    .or_else(|_| state.pairs.lookup(object).map(|_| ())),
            };
            match outcome {
                Ok(()) => {
                    send_value(sink, &subscription_id, 1.0, None, None, true).await;
                }
                Err(e) => send_error(sink, &subscription_id, &e.to_string()).await,
            }
        }
    }
}

fn spawn_handle_stream<U: ElementType, V: ElementType>(
    session: SessionId,
    subscription_id: String,
    op_stream: fractal_stream::ColdStream<Result<fractal_core::PartialResult<DataSetHandle<U>>, fractal_core::DatasetError>>,
    output: SharedRegistry<U>,
    session_registry: SharedRegistry<V>,
    sink: Arc<AsyncMutex<SplitSink<WebSocket, Message>>>,
    subscriptions: Arc<AsyncMutex<HashMap<String, Subscription>>>,
) {
    let (sub, mut inner) = op_stream.subscribe();
    session_registry.attach_subscription(session, sub.clone());
    let sub_id = subscription_id.clone();
    tokio::spawn(async move {
        subscriptions.lock().await.insert(subscription_id.clone(), sub);
        loop {
            match inner.next().await {
                Some(Ok(pr)) => {
                    let object = pr.payload.map(|h| output.insert(h));
                    send_value(&sink, &subscription_id, pr.delta_done, object, None, false).await;
                }
                Some(Err(e)) => {
                    send_error(&sink, &subscription_id, &e.to_string()).await;
                    break;
                }
                None => {
                    send_value(&sink, &subscription_id, 1.0, None, None, true).await;
                    break;
                }
            }
        }
        subscriptions.lock().await.remove(&subscription_id);
        session_registry.remove_session(session);
    });
    info!(subscription_id = %sub_id, %session, "started subscription");
}

fn spawn_sketch_stream<T, R>(
    session: SessionId,
    subscription_id: String,
    op_stream: fractal_stream::ColdStream<Result<fractal_core::PartialResult<R>, fractal_core::DatasetError>>,
    session_registry: SharedRegistry<T>,
    sink: Arc<AsyncMutex<SplitSink<WebSocket, Message>>>,
    subscriptions: Arc<AsyncMutex<HashMap<String, Subscription>>>,
) where
    T: ElementType,
    R: Serialize + Send + 'static,
{
    let (sub, mut inner) = op_stream.subscribe();
    session_registry.attach_subscription(session, sub.clone());
    tokio::spawn(async move {
        subscriptions.lock().await.insert(subscription_id.clone(), sub);
        loop {
            match inner.next().await {
                Some(Ok(pr)) => {
                    let value = pr.payload.map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null));
                    send_value(&sink, &subscription_id, pr.delta_done, None, value, false).await;
                }
                Some(Err(e)) => {
                    send_error(&sink, &subscription_id, &e.to_string()).await;
                    break;
                }
                None => {
                    send_value(&sink, &subscription_id, 1.0, None, None, true).await;
                    break;
                }
            }
        }
        subscriptions.lock().await.remove(&subscription_id);
        session_registry.remove_session(session);
    });
}

async fn send_value(
    sink: &Arc<AsyncMutex<SplitSink<WebSocket, Message>>>,
    subscription_id: &str,
    delta_done: f64,
    object: Option<ObjectId>,
    value: Option<serde_json::Value>,
    done: bool,
) {
    let payload = WsPartial {
        subscription_id,
        delta_done,
        object: object.map(|o| ObjectIdJson { high: o.high, low: o.low }),
        value,
        done,
        is_error: false,
    };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = sink.lock().await.send(Message::Text(text)).await;
    }
}

async fn send_error(sink: &Arc<AsyncMutex<SplitSink<WebSocket, Message>>>, subscription_id: &str, error: &str) {
    let payload = WsError { subscription_id, error: error.to_string(), done: true, is_error: true };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = sink.lock().await.send(Message::Text(text)).await;
    }
}
