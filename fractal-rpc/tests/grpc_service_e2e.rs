use std::net::SocketAddr;

use fractal_core::{DataSetHandle, DatasetError, Map, Sketch};
use fractal_rpc::proto::fractal_client::FractalClient;
use fractal_rpc::proto::fractal_server::FractalServer;
use fractal_rpc::proto::Command;
use fractal_rpc::{FractalService, ObjectRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Op {
    Double,
    Repeat(usize),
    Sum,
}

impl Map<i64, i64> for Op {
    fn apply(&self, input: &i64) -> Result<i64, DatasetError> {
        match self {
            Op::Double => Ok(input * 2),
            other => Err(DatasetError::UserCodeFailure(format!("{other:?} is not a map"))),
        }
    }
}

impl Map<i64, Vec<i64>> for Op {
    fn apply(&self, input: &i64) -> Result<Vec<i64>, DatasetError> {
        match self {
            Op::Repeat(n) => Ok(vec![*input; *n]),
            other => Err(DatasetError::UserCodeFailure(format!("{other:?} is not a flat map"))),
        }
    }
}

impl Sketch<i64, i64> for Op {
    fn zero(&self) -> i64 {
        0
    }
    fn create(&self, input: &i64) -> Result<i64, DatasetError> {
        Ok(*input)
    }
    fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }
}

/// A fresh session id for each logical client. Real clients (`TonicRpcClient`)
/// mint one once at construction; these tests mint theirs explicitly so a
/// test can control whether two calls share a session or not.
fn session(seed: u128) -> Vec<u8> {
    Uuid::from_u128(seed).as_bytes().to_vec()
}

async fn spawn_server(object: i64) -> (i64, String, fractal_core::ObjectId, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let local_addr: SocketAddr = listener.local_addr().expect("local addr");

    let registry = Arc::new(ObjectRegistry::new());
    let id = registry.insert(DataSetHandle::local(object));
    let service = FractalService::<i64, Op>::new(registry, None);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let incoming = TcpListenerStream::new(listener);
        let _ = Server::builder()
            .add_service(FractalServer::new(service))
            .serve_with_incoming_shutdown(incoming, async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (object, format!("http://{local_addr}"), id, shutdown_tx)
}

async fn connect(endpoint: &str) -> FractalClient<Channel> {
    FractalClient::connect(endpoint.to_string())
        .await
        .expect("connect grpc client")
}

#[tokio::test]
async fn map_streams_a_single_doubled_value() {
    let (_, endpoint, id, shutdown_tx) = spawn_server(21).await;
    let mut client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Double).unwrap();
    let mut stream = client
        .map(Command {
            call_id: 1,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op,
            session_id: session(1),
        })
        .await
        .expect("map rpc")
        .into_inner();

    let first = stream.message().await.expect("stream item").expect("one item");
    assert_eq!(first.delta_done, 1.0);
    assert!(first.has_payload);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn flat_map_repeats_the_value() {
    let (_, endpoint, id, shutdown_tx) = spawn_server(7).await;
    let mut client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Repeat(3)).unwrap();
    let mut stream = client
        .flat_map(Command {
            call_id: 2,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op,
            session_id: session(2),
        })
        .await
        .expect("flat_map rpc")
        .into_inner();

    let first = stream.message().await.expect("stream item").expect("one item");
    assert_eq!(first.delta_done, 1.0);
    assert!(first.has_payload);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn sketch_emits_zero_then_the_final_value() {
    let (_, endpoint, id, shutdown_tx) = spawn_server(9).await;
    let mut client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Sum).unwrap();
    let mut stream = client
        .sketch(Command {
            call_id: 3,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op,
            session_id: session(3),
        })
        .await
        .expect("sketch rpc")
        .into_inner();

    let zero_item = stream.message().await.expect("stream item").expect("zero item");
    assert_eq!(zero_item.delta_done, 0.0);

    let final_item = stream.message().await.expect("stream item").expect("final item");
    assert_eq!(final_item.delta_done, 1.0);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn two_sessions_on_the_same_object_do_not_block_each_other() {
    let (_, endpoint, id, shutdown_tx) = spawn_server(1).await;
    let mut first_client = connect(&endpoint).await;
    let mut second_client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Double).unwrap();
    let first = first_client
        .map(Command {
            call_id: 10,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op.clone(),
            session_id: session(100),
        })
        .await;
    let second = second_client
        .map(Command {
            call_id: 11,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op,
            session_id: session(101),
        })
        .await;

    assert!(first.is_ok(), "distinct sessions must not contend for the same object");
    assert!(second.is_ok(), "distinct sessions must not contend for the same object");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn a_second_concurrent_call_on_the_same_session_is_rejected() {
    let (_, endpoint, id, shutdown_tx) = spawn_server(1).await;
    let mut client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Double).unwrap();
    let same_session = session(7);
    let _first = client
        .map(Command {
            call_id: 20,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op.clone(),
            session_id: same_session.clone(),
        })
        .await
        .expect("first map rpc");

    let second = client
        .map(Command {
            call_id: 21,
            ids_index: 0,
            high_id: id.high,
            low_id: id.low,
            serialized_op: op,
            session_id: same_session,
        })
        .await;

    assert_eq!(second.expect_err("second call on the same session should be rejected").code(), tonic::Code::FailedPrecondition);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn map_on_an_unknown_object_reports_not_found() {
    let (_, endpoint, _id, shutdown_tx) = spawn_server(1).await;
    let mut client = connect(&endpoint).await;

    let op = bincode::serialize(&Op::Double).unwrap();
    let result = client
        .map(Command {
            call_id: 30,
            ids_index: 0,
            high_id: 999,
            low_id: 999,
            serialized_op: op,
            session_id: session(30),
        })
        .await;

    assert_eq!(result.expect_err("unknown object should 404").code(), tonic::Code::NotFound);

    let _ = shutdown_tx.send(());
}
