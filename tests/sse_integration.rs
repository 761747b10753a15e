use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use futures::SinkExt;
use mcp_chat_gateway::mcp::sse_transport;
use rmcp::model::ClientJsonRpcMessage;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

async fn serve(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/sse")).unwrap()
}

fn event_stream(body: &'static str) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn record(
    State(tx): State<mpsc::UnboundedSender<Value>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let _ = tx.send(body);
    StatusCode::ACCEPTED
}

#[tokio::test]
async fn posts_messages_to_announced_endpoint() {
    let (posted_tx, mut posted_rx) = mpsc::unbounded_channel::<Value>();
    let app = Router::new()
        .route(
            "/sse",
            get(|| async { event_stream("event: endpoint\ndata: /messages?session=abc\n\n") }),
        )
        .route(
            "/messages",
            post(record),
        )
        .with_state(posted_tx);
    let url = serve(app).await;
    let cancel = CancellationToken::new();

    let (mut sink, _stream) = sse_transport::open(reqwest::Client::new(), url, cancel.clone())
        .await
        .unwrap();

    let message: ClientJsonRpcMessage =
        serde_json::from_value(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .unwrap();
    sink.send(message).await.unwrap();

    let posted = tokio::time::timeout(Duration::from_secs(5), posted_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(posted["method"], "notifications/initialized");

    cancel.cancel();
}

#[tokio::test]
async fn stream_without_endpoint_fails() {
    let app = Router::new().route("/sse", get(|| async { event_stream(": keepalive\n\n") }));
    let url = serve(app).await;

    let err = sse_transport::open(reqwest::Client::new(), url, CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(format!("{err:#}").contains("closed before announcing an endpoint"));
}

#[tokio::test]
async fn error_status_fails_to_open() {
    let app = Router::new().route("/sse", get(|| async { StatusCode::UNAUTHORIZED }));
    let url = serve(app).await;

    let result = sse_transport::open(reqwest::Client::new(), url, CancellationToken::new()).await;

    assert!(result.is_err());
}
