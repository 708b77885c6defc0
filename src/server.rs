//! Minimal HTTP/1.1 listener that delivers Firefly III webhooks to a shared
//! [`WebhookHandler`].
//!
//! One request per connection; every response is sent with `Connection: close`.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::webhook::{WebhookError, WebhookHandler};

pub const CLASSIFY_ROUTE: &str = "/classify";
pub const HEALTH_ROUTE: &str = "/health";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Malformed(&'static str),
    #[error("request too large")]
    TooLarge,
    #[error("chunked bodies are not supported")]
    LengthRequired,
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// A JSON response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }).to_string(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            _ => "Unknown",
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Dispatches one request to the handler.
///
/// `POST /classify` answers with the assigned categories. Malformed payloads are
/// the sender's fault (400); a failed update in Firefly is reported as 502.
pub async fn route(handler: &WebhookHandler, method: &str, path: &str, body: &[u8]) -> Response {
    match (method, path) {
        ("POST", CLASSIFY_ROUTE) => match handler.handle_new_transaction(body).await {
            Ok(assigned) => Response::json(200, &assigned),
            Err(e @ WebhookError::Payload(_)) => Response::error(400, &e.to_string()),
            Err(e @ WebhookError::Classify(_)) => Response::error(500, &e.to_string()),
            Err(e @ WebhookError::Update(_)) => Response::error(502, &e.to_string()),
        },
        ("GET", HEALTH_ROUTE) => Response::json(
            200,
            &json!({ "state": handler.service().state().to_string() }),
        ),
        (_, CLASSIFY_ROUTE) | (_, HEALTH_ROUTE) => Response::error(405, "method not allowed"),
        _ => Response::error(404, "not found"),
    }
}

/// Accepts connections until `shutdown` resolves, serving each on its own task.
/// All tasks share the one handler, and through it the one trained model.
pub async fn serve<F>(listener: TcpListener, handler: Arc<WebhookHandler>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    info!("Listening for webhooks on http://{}{}", listener.local_addr()?, CLASSIFY_ROUTE);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down webhook listener");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &handler).await {
                        debug!("Connection from {} ended with error: {}", peer, e);
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, handler: &WebhookHandler) -> io::Result<()> {
    let response = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Err(_) => Response::error(408, "timed out reading request"),
        Ok(Err(RequestError::Io(e))) => return Err(e),
        Ok(Err(e @ RequestError::Malformed(_))) => Response::error(400, &e.to_string()),
        Ok(Err(e @ RequestError::TooLarge)) => Response::error(413, &e.to_string()),
        Ok(Err(e @ RequestError::LengthRequired)) => Response::error(411, &e.to_string()),
        Ok(Ok(request)) => {
            info!("{} {} ({} bytes)", request.method, request.path, request.body.len());
            route(handler, &request.method, &request.path, &request.body).await
        }
    };
    debug!("Responding {}: {}", response.status, response.body);
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

async fn read_request<S>(stream: &mut S) -> Result<Request, RequestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before end of headers"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| RequestError::Malformed("request head is not UTF-8"))?;
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (method, target) = match (request_line.next(), request_line.next(), request_line.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/1.") => {
            (method.to_string(), target)
        }
        _ => return Err(RequestError::Malformed("bad request line")),
    };
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0usize;
    let mut expect_continue = false;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or(RequestError::Malformed("bad header line"))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| RequestError::Malformed("bad Content-Length"))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(RequestError::LengthRequired);
        } else if name.eq_ignore_ascii_case("expect") && value.eq_ignore_ascii_case("100-continue") {
            expect_continue = true;
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }

    let mut body = buf.split_off(head_end + 4);
    if body.len() < content_length {
        if expect_continue && body.is_empty() {
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        }
        let received = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[received..]).await?;
    } else {
        body.truncate(content_length);
    }

    Ok(Request { method, path, body })
}
