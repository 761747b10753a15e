//! Legacy MCP transport over Server-Sent Events.
//!
//! The client holds a long-lived `GET` event stream. The server first sends an
//! `endpoint` event naming the URL to `POST` requests to, then delivers every
//! JSON-RPC message as a `message` event on the stream.
//!
//! [`open`] returns a `(Sink, Stream)` pair that rmcp accepts as a transport.

use std::time::Duration;

use anyhow::Context;
use futures::{StreamExt, channel::mpsc as sink_mpsc};
use reqwest::header::ACCEPT;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(15);
const CHANNEL_CAPACITY: usize = 64;

/// One decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental Server-Sent Events decoder.
///
/// Bytes may arrive split anywhere, including inside a line. Carriage returns
/// are dropped so `\r\n` framed streams decode like `\n` framed ones.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_double_newline(&self.buf) {
            let block = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Sink half handed to rmcp: every message sent is POSTed to the endpoint.
pub type SseSink = sink_mpsc::Sender<ClientJsonRpcMessage>;

/// Stream half handed to rmcp: server messages read off the event stream.
pub type SseStream = ReceiverStream<ServerJsonRpcMessage>;

/// Open the event stream and wait for the server to announce its endpoint.
///
/// `client` should already carry any configured headers as defaults. Both
/// background tasks stop when `cancel` fires.
pub async fn open(
    client: reqwest::Client,
    url: Url,
    cancel: CancellationToken,
) -> anyhow::Result<(SseSink, SseStream)> {
    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .with_context(|| format!("failed to open event stream at {url}"))?
        .error_for_status()?;

    let (endpoint_tx, endpoint_rx) = oneshot::channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(read_events(
        response,
        url,
        endpoint_tx,
        inbound_tx,
        cancel.clone(),
    ));

    let endpoint = tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx)
        .await
        .context("timed out waiting for the endpoint event")?
        .context("event stream closed before announcing an endpoint")?;
    debug!(name: "mcp.sse.endpoint", endpoint = %endpoint, "SSE endpoint announced");

    let (outbound_tx, outbound_rx) = sink_mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(write_messages(client, endpoint, outbound_rx, cancel));

    Ok((outbound_tx, ReceiverStream::new(inbound_rx)))
}

async fn read_events(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<Url>,
    inbound: mpsc::Sender<ServerJsonRpcMessage>,
    cancel: CancellationToken,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::default();
    let body = response.bytes_stream();
    futures::pin_mut!(body);

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => break,
            chunk = body.next() => chunk,
        };
        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(name: "mcp.sse.read_failed", error = %e, "SSE stream read failed");
                break;
            }
            None => break,
        };

        for event in decoder.push(&bytes) {
            match event.event.as_deref() {
                Some("endpoint") => {
                    let Some(tx) = endpoint_tx.take() else {
                        continue;
                    };
                    match base.join(event.data.trim()) {
                        Ok(endpoint) => {
                            let _ = tx.send(endpoint);
                        }
                        Err(e) => {
                            warn!(name: "mcp.sse.bad_endpoint", data = %event.data, error = %e, "Unusable endpoint event");
                        }
                    }
                }
                None | Some("message") => {
                    match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
                        Ok(message) => {
                            if inbound.send(message).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(name: "mcp.sse.bad_message", error = %e, "Dropping undecodable SSE message");
                        }
                    }
                }
                Some(other) => {
                    debug!(event = other, "Ignoring SSE event");
                }
            }
        }
    }
}

async fn write_messages(
    client: reqwest::Client,
    endpoint: Url,
    mut outbound: sink_mpsc::Receiver<ClientJsonRpcMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = outbound.next() => message,
        };
        let Some(message) = message else {
            break;
        };

        let sent = client
            .post(endpoint.clone())
            .json(&message)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(e) = sent {
            warn!(name: "mcp.sse.post_failed", endpoint = %endpoint, error = %e, "SSE POST failed");
        }
    }
}
