//! Integration test: TCP scoring endpoint
//! Tests: framed round trip → in-band errors → connection isolation → shutdown

use std::sync::Arc;

use tokio::io::BufStream;
use tokio::net::TcpStream;

use modelmux::config::{Attribute, ModelConfig};
use modelmux::manager::ModelManager;
use modelmux::model::{CentroidModel, FeatureValue, SerializedModelFactory};
use modelmux::persist::HeaderStore;
use modelmux::server::proto::{
    decode_request, encode_response, read_frame, write_frame, Request, Response,
};
use modelmux::server::{ConnectionServer, ServerConfig, ServerHandle};

struct TestServer {
    handle: ServerHandle,
    manager: Arc<ModelManager>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(
        ModelManager::open(
            HeaderStore::open(dir.path()).unwrap(),
            Arc::new(SerializedModelFactory),
            2,
        )
        .unwrap(),
    );
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_connections: 16,
    };
    let handle = ConnectionServer::start(config, Arc::clone(manager.dispatcher()))
        .await
        .unwrap();
    TestServer {
        handle,
        manager,
        _dir: dir,
    }
}

fn two_class_config() -> ModelConfig {
    ModelConfig::new(vec![
        Attribute::numeric("x"),
        Attribute::numeric("y"),
        Attribute::categorical("label", vec!["near".into(), "far".into()]),
    ])
}

fn artifact() -> Vec<u8> {
    CentroidModel::new(vec![vec![0.0, 0.0], vec![100.0, 100.0]])
        .unwrap()
        .to_artifact_bytes()
        .unwrap()
}

fn near_point() -> Vec<FeatureValue> {
    vec![
        FeatureValue::Number(1.0),
        FeatureValue::Number(1.0),
        FeatureValue::Symbol("near".into()),
    ]
}

async fn connect(server: &TestServer) -> BufStream<TcpStream> {
    BufStream::new(TcpStream::connect(server.handle.addr()).await.unwrap())
}

async fn round_trip(stream: &mut BufStream<TcpStream>, request: &Request) -> Response {
    let payload = serde_json::to_vec(request).unwrap();
    write_frame(stream, &payload).await.unwrap();
    let reply = read_frame(stream).await.unwrap().expect("server hung up");
    serde_json::from_slice(&reply).unwrap()
}

// ============================================================================
// Round-Trip Tests
// ============================================================================

#[tokio::test]
async fn test_score_round_trip() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    let mut stream = connect(&server).await;
    let response = round_trip(
        &mut stream,
        &Request::Score {
            model_ids: vec![id],
            features: near_point(),
        },
    )
    .await;

    match response {
        Response::Ok { scores } => {
            assert_eq!(scores.len(), 1);
            assert!(scores[0][0] > scores[0][1]);
        }
        Response::Error { kind, message } => panic!("unexpected error {kind}: {message}"),
    }

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_batch_preserves_order_over_wire() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    let far_point = vec![
        FeatureValue::Number(99.0),
        FeatureValue::Number(99.0),
        FeatureValue::Symbol("near".into()),
    ];
    let mut stream = connect(&server).await;
    let response = round_trip(
        &mut stream,
        &Request::ScoreBatch {
            model_id: id,
            instances: vec![near_point(), far_point, near_point()],
        },
    )
    .await;

    match response {
        Response::Ok { scores } => {
            assert_eq!(scores.len(), 3);
            assert!(scores[0][0] > scores[0][1]);
            assert!(scores[1][1] > scores[1][0]);
            assert!(scores[2][0] > scores[2][1]);
        }
        Response::Error { kind, message } => panic!("unexpected error {kind}: {message}"),
    }

    server.handle.shutdown().await;
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_model_answered_in_band() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    let mut stream = connect(&server).await;

    let response = round_trip(
        &mut stream,
        &Request::Score {
            model_ids: vec![uuid::Uuid::new_v4()],
            features: near_point(),
        },
    )
    .await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, "model_not_found"),
        Response::Ok { .. } => panic!("expected an error response"),
    }

    // The connection survives the failed request.
    let response = round_trip(
        &mut stream,
        &Request::Score {
            model_ids: vec![id],
            features: near_point(),
        },
    )
    .await;
    assert!(matches!(response, Response::Ok { .. }));

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_config_mismatch_answered_in_band() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    let mut stream = connect(&server).await;
    let response = round_trip(
        &mut stream,
        &Request::Score {
            model_ids: vec![id],
            features: vec![FeatureValue::Number(1.0)],
        },
    )
    .await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, "config_mismatch"),
        Response::Ok { .. } => panic!("expected an error response"),
    }

    server.handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_request_closes_only_that_connection() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    // Well-framed garbage: the server answers, then hangs up.
    let mut bad = connect(&server).await;
    write_frame(&mut bad, b"{this is not a request}")
        .await
        .unwrap();
    let reply = read_frame(&mut bad)
        .await
        .unwrap()
        .expect("expected error reply");
    let response: Response = serde_json::from_slice(&reply).unwrap();
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, "protocol"),
        Response::Ok { .. } => panic!("expected an error response"),
    }
    assert!(
        read_frame(&mut bad).await.unwrap().is_none(),
        "connection must close"
    );

    // Other clients are unaffected.
    let mut good = connect(&server).await;
    let response = round_trip(
        &mut good,
        &Request::Score {
            model_ids: vec![id],
            features: near_point(),
        },
    )
    .await;
    assert!(matches!(response, Response::Ok { .. }));

    server.handle.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = start_server().await;
    let addr = server.handle.addr();

    server.handle.shutdown().await;

    // The listening socket is gone; a fresh connect must fail or be reset
    // on first use.
    match TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(stream) => {
            let mut stream = BufStream::new(stream);
            let payload = serde_json::to_vec(&Request::ScoreBatch {
                model_id: uuid::Uuid::new_v4(),
                instances: vec![],
            })
            .unwrap();
            let outcome = async {
                write_frame(&mut stream, &payload).await?;
                read_frame(&mut stream).await
            }
            .await;
            assert!(
                matches!(outcome, Err(_) | Ok(None)),
                "server answered after shutdown"
            );
        }
    }
}

#[tokio::test]
async fn test_shutdown_closes_live_connections_between_cycles() {
    let server = start_server().await;
    let id = server
        .manager
        .add_model(two_class_config(), &artifact())
        .unwrap();

    // Complete one full request/response cycle so the handler is idle
    // between frames when shutdown arrives.
    let mut stream = connect(&server).await;
    let response = round_trip(
        &mut stream,
        &Request::Score {
            model_ids: vec![id],
            features: near_point(),
        },
    )
    .await;
    assert!(matches!(response, Response::Ok { .. }));

    server.handle.shutdown().await;

    // The handler must hang up instead of serving another request.
    let payload = serde_json::to_vec(&Request::Score {
        model_ids: vec![id],
        features: near_point(),
    })
    .unwrap();
    let outcome = async {
        write_frame(&mut stream, &payload).await?;
        read_frame(&mut stream).await
    }
    .await;
    assert!(
        matches!(outcome, Err(_) | Ok(None)),
        "connection answered after shutdown"
    );
}

// ============================================================================
// Protocol Sanity Tests
// ============================================================================

#[tokio::test]
async fn test_request_encoding_is_stable() {
    let request = Request::Score {
        model_ids: vec![uuid::Uuid::nil()],
        features: vec![FeatureValue::Number(2.5), FeatureValue::Symbol("near".into())],
    };
    let payload = serde_json::to_vec(&request).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(json["op"], "score");
    assert_eq!(json["features"][0], 2.5);
    assert_eq!(json["features"][1], "near");

    assert!(decode_request(&payload).is_ok());
    let response = encode_response(&Response::Ok { scores: vec![] }).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(json["status"], "ok");
}
