// ── Recall Server: HTTP Core ───────────────────────────────────────────────
//
// Minimal HTTP/1.1 server over a raw TcpListener: read the request head,
// honor Content-Length for bodies, route, write the response. The /chat
// endpoint switches the connection to Server-Sent Events and proxies the
// orchestrator's stream; everything else is JSON over one short exchange.
//
// Errors before headers become HTTP 500 JSON bodies; errors after the SSE
// headers are a single `error` event followed by stream close. A client
// that disconnects mid-stream stops the forwarding loop but not the turn's
// background extraction.

mod routes;

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::orchestrator::{self, Engine, TurnEvent};
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on request head + body we are willing to buffer.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// A parsed inbound request.
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn json_body(&self) -> EngineResult<Value> {
        if self.body.is_empty() {
            return Err(EngineError::Input("request body required".into()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| EngineError::Input(format!("malformed JSON body: {e}")))
    }

    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// What a route handler wants done with the connection.
pub(crate) enum RouteResult {
    Json { status: u16, body: Value },
    /// Switch to SSE and run a chat turn.
    Chat { message: String, conversation_id: Option<String> },
}

pub async fn run_server(engine: Arc<Engine>) -> EngineResult<()> {
    let addr = format!("{}:{}", engine.config.bind_address, engine.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("bind {} failed: {e}", addr)))?;
    info!("[server] Listening on http://{}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, engine).await {
                        warn!("[server] Connection error from {}: {}", peer, e);
                    }
                });
            }
            Err(e) => warn!("[server] Accept error: {}", e),
        }
    }
}

// ── Connection handling ────────────────────────────────────────────────────

async fn handle_connection(mut stream: TcpStream, engine: Arc<Engine>) -> EngineResult<()> {
    let request = match read_request(&mut stream).await? {
        Some(req) => req,
        None => return Ok(()),
    };

    match routes::route(&engine, &request) {
        Ok(RouteResult::Json { status, body }) => {
            write_json(&mut stream, status, &body).await
        }
        Ok(RouteResult::Chat { message, conversation_id }) => {
            serve_chat_stream(stream, engine, message, conversation_id).await
        }
        Err(EngineError::Input(msg)) => {
            write_json(&mut stream, 400, &json!({"error": msg})).await
        }
        Err(e) => {
            warn!("[server] Handler error on {} {}: {}", request.method, request.path, e);
            write_json(&mut stream, 500, &json!({"error": e.to_string()})).await
        }
    }
}

/// Read one HTTP request: head until the blank line, then Content-Length
/// bytes of body. Returns None on an immediately closed connection.
async fn read_request(stream: &mut TcpStream) -> EngineResult<Option<Request>> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(EngineError::Input("truncated request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(EngineError::Input("request head too large".into()));
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_uppercase();
    let target = parts.next().unwrap_or("/");

    let content_length = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .next()
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(EngineError::Input("request body too large".into()));
    }

    let body_start = head_end + 4;
    let mut body: Vec<u8> = buf[body_start.min(buf.len())..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(EngineError::Input("truncated request body".into()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    let (path, query) = parse_target(target);
    Ok(Some(Request { method, path, query, body }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, query_str)) => {
            let query = query_str
                .split('&')
                .filter_map(|pair| {
                    let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                    (!k.is_empty()).then(|| (k.to_string(), v.to_string()))
                })
                .collect();
            (path.to_string(), query)
        }
        None => (target.to_string(), HashMap::new()),
    }
}

// ── Response writing ───────────────────────────────────────────────────────

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

async fn write_json(stream: &mut TcpStream, status: u16, body: &Value) -> EngineResult<()> {
    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Run one chat turn over SSE. P0+P1 run before the headers so their
/// failures still produce an HTTP 500; once the headers are out, every
/// outcome (including errors) is an event on the stream.
async fn serve_chat_stream(
    mut stream: TcpStream,
    engine: Arc<Engine>,
    message: String,
    conversation_id: Option<String>,
) -> EngineResult<()> {
    let turn = match orchestrator::prepare_turn(&engine, message, conversation_id).await {
        Ok(turn) => turn,
        Err(e) => {
            warn!("[server] Chat turn preparation failed: {}", e);
            return write_json(&mut stream, 500, &json!({"error": e.to_string()})).await;
        }
    };

    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
    stream.write_all(headers.as_bytes()).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TurnEvent>();
    tokio::spawn(orchestrator::stream_turn(engine, turn, tx));

    while let Some(event) = rx.recv().await {
        let payload = match &event {
            TurnEvent::Chunk(text) => json!({"chunk": text}),
            TurnEvent::Done => json!({"done": true}),
            TurnEvent::Error(msg) => json!({"error": msg}),
        };
        let frame = format!("data: {}\n\n", payload);
        if stream.write_all(frame.as_bytes()).await.is_err() {
            // Client went away; the turn's background work continues.
            info!("[server] SSE client disconnected mid-stream");
            break;
        }
        if matches!(event, TurnEvent::Done | TurnEvent::Error(_)) {
            break;
        }
    }
    let _ = stream.flush().await;
    Ok(())
}
