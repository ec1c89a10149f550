//! Transport layer: a Tonic gRPC service and an axum WebSocket bridge,
//! both built on top of one in-process object registry.

pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod wire;
pub mod ws;

pub mod proto {
    tonic::include_proto!("fractal");
}

pub use client::TonicRpcClient;
pub use error::RpcError;
pub use registry::{ObjectRegistry, SharedRegistry};
pub use server::FractalService;
pub use session::SessionId;
pub use ws::WsState;
