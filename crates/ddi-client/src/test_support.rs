//! Scripted HTTP server and handlers shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as TokioMutex;

use crate::client::DdiClient;
use crate::feedback::Feedback;
use crate::handler::EventHandler;
use crate::types::{CancelAction, ConfigRequest, DeploymentBase};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is JSON")
    }
}

/// A scripted answer. The body can be sent in pieces with a pause between
/// them, and a reply can drop the connection without answering.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pieces: usize,
    pause: Duration,
    hang_up: bool,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            pieces: 1,
            pause: Duration::ZERO,
            hang_up: false,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Close the connection after reading the request.
    pub fn hang_up() -> Self {
        Self {
            hang_up: true,
            ..Self::new(500, "")
        }
    }

    /// Send the body in `pieces` parts, waiting `pause` before each later part.
    pub fn paced(mut self, pieces: usize, pause: Duration) -> Self {
        self.pieces = pieces.max(1);
        self.pause = pause;
        self
    }
}

async fn read_http_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    let header_end = loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

async fn write_reply(stream: &mut TcpStream, reply: &Reply, body: &str) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;

    let bytes = body.as_bytes();
    let piece = bytes.len().div_ceil(reply.pieces).max(1);
    for (index, part) in bytes.chunks(piece).enumerate() {
        if index > 0 {
            tokio::time::sleep(reply.pause).await;
        }
        stream.write_all(part).await?;
        stream.flush().await?;
    }
    stream.flush().await
}

/// Serves scripted replies in order and records every request.
///
/// Requests beyond the script get a 500. `{base}` in a reply body is replaced
/// with the server's own base URL so replies can carry absolute links.
pub struct MockServer {
    base_url: String,
    captured: Arc<TokioMutex<Vec<CapturedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(replies)));
        let captured_clone = Arc::clone(&captured);
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                // One connection at a time keeps the script order deterministic.
                let Some(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(request);
                let reply = scripted
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or_else(|| Reply::new(500, "unexpected request"));
                if reply.hang_up {
                    continue;
                }
                let body = reply.body.replace("{base}", &base_url);
                let _ = write_reply(&mut stream, &reply, &body).await;
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            captured,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{}", self.base_url, path)).expect("mock url")
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn on_config_request(&self) -> ConfigRequest {
        ConfigRequest::empty()
    }

    async fn on_cancel_action(&self, _action: CancelAction) -> Feedback {
        Feedback::success()
    }

    async fn on_deployment_action(&self, _deployment: DeploymentBase) -> Feedback {
        Feedback::success()
    }

    async fn on_no_actions(&self) {}
}

pub fn noop_client() -> DdiClient {
    DdiClient::builder(Arc::new(NoopHandler)).build()
}
