mod config;
mod ops;

use std::net::SocketAddr;
use std::sync::Arc;

use fractal_core::DataSetHandle;
use fractal_rpc::proto::fractal_server::FractalServer;
use fractal_rpc::{FractalService, ObjectRegistry, WsState};
use serde_json::Value;
use tonic::transport::Server;
use tracing::{info, Level};

use ops::Operation;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = config::Config::from_env();
    let bind_addr: SocketAddr = config.bind_address.parse()?;
    let http_addr: SocketAddr = config.http_bind_address.parse()?;

    let registry: fractal_rpc::SharedRegistry<Value> = Arc::new(ObjectRegistry::new());
    let root = seed_root_dataset(&config);
    let root_id = registry.insert(root);
    info!(object = %root_id, "seeded root dataset");

    let ws_state = Arc::new(WsState::<Value, Operation>::new(registry.clone()));
    let ws_router = fractal_rpc::ws::router(ws_state);

    let service = FractalService::<Value, Operation>::new(registry, config.rpc_deadline);

    info!(%bind_addr, "starting gRPC listener");
    let grpc = tokio::spawn(async move {
        if let Err(e) = Server::builder()
            .add_service(FractalServer::new(service))
            .serve(bind_addr)
            .await
        {
            tracing::error!(error = %e, "gRPC server exited");
        }
    });

    info!(%http_addr, "starting websocket listener");
    let http = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(http_addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind websocket listener");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, ws_router).await {
            tracing::error!(error = %e, "websocket server exited");
        }
    });

    let _ = tokio::join!(grpc, http);
    Ok(())
}

fn seed_root_dataset(config: &config::Config) -> DataSetHandle<Value> {
    let value = match std::env::var("FRACTAL_SEED_JSON_PATH") {
        Ok(path) => std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| Value::Array(Vec::new())),
        Err(_) => Value::Array(Vec::new()),
    };
    DataSetHandle::local_with_config(value, config.local_config())
}
