//! WebSocket listener using tokio-tungstenite.
//!
//! One TCP port serves both the WebSocket endpoint and the plain-HTTP
//! `GET /health` check. Each accepted upgrade is handed to the server as a
//! [`WebSocketConnection`], which implements [`FrameTransport`].

use futures_util::{SinkExt, StreamExt};
use lucia_core::{FrameTransport, LuciaError, LuciaResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "lucia-server";

const HEALTH_REQUEST_PREFIXES: [&[u8]; 2] = [b"GET /health ", b"GET /health?"];
const HEALTH_PEEK_LEN: usize = 12;
const HEALTH_PEEK_RETRY: Duration = Duration::from_millis(5);
const HEALTH_PEEK_DEADLINE: Duration = Duration::from_secs(2);

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound address (useful with port 0) and a receiver that yields
/// upgraded connections. The accept loop stops once the receiver is dropped.
pub async fn start_listener(
    bind_addr: SocketAddr,
    ws_path: &str,
) -> LuciaResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| LuciaError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, path = %ws_path, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let ws_path = ws_path.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("WebSocket listener stopped");
                    break;
                }
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let tx = tx.clone();
                        let ws_path = ws_path.clone();
                        tokio::spawn(async move {
                            if is_health_request(&stream).await {
                                if let Err(e) = serve_health(stream).await {
                                    debug!(remote = %addr, error = %e, "health response failed");
                                }
                                return;
                            }
                            match accept_on_path(stream, ws_path).await {
                                Ok(ws_stream) => {
                                    debug!(remote = %addr, "WebSocket connection accepted");
                                    let conn = WebSocketConnection {
                                        ws_stream,
                                        remote_addr: addr,
                                    };
                                    if tx.send(conn).await.is_err() {
                                        warn!("WebSocket connection channel closed");
                                    }
                                }
                                Err(e) => {
                                    warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
            }
        }
    });

    Ok((local_addr, rx))
}

/// Complete the upgrade, answering 404 for any path other than `ws_path`.
async fn accept_on_path(
    stream: TcpStream,
    ws_path: String,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error>
{
    let check_path = move |req: &Request, resp: Response| {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };
    tokio_tungstenite::accept_hdr_async(stream, check_path).await
}

/// Peek at the request line without consuming it. A short first segment is
/// re-peeked until enough bytes arrive to decide or the prefix stops matching.
async fn is_health_request(stream: &TcpStream) -> bool {
    let classify = async {
        let mut head = [0u8; HEALTH_PEEK_LEN];
        loop {
            let n = match stream.peek(&mut head).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => n,
            };
            let seen = &head[..n];
            if !is_partial_health_request(seen) {
                return is_health_request_line(seen);
            }
            tokio::time::sleep(HEALTH_PEEK_RETRY).await;
        }
    };
    tokio::time::timeout(HEALTH_PEEK_DEADLINE, classify)
        .await
        .unwrap_or(false)
}

fn is_health_request_line(head: &[u8]) -> bool {
    HEALTH_REQUEST_PREFIXES
        .iter()
        .any(|prefix| head.starts_with(prefix))
}

/// Too short to decide, but still consistent with a health request.
fn is_partial_health_request(seen: &[u8]) -> bool {
    seen.len() < HEALTH_PEEK_LEN
        && HEALTH_REQUEST_PREFIXES
            .iter()
            .any(|prefix| prefix.starts_with(seen))
}

fn health_body() -> String {
    serde_json::json!({ "status": "ok", "service": SERVICE_NAME }).to_string()
}

async fn serve_health(mut stream: TcpStream) -> std::io::Result<()> {
    // Consume the request head; its content is irrelevant.
    let mut request = [0u8; 1024];
    let mut filled = 0;
    while filled < request.len() {
        let n = stream.read(&mut request[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
        if request[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let body = health_body();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

impl FrameTransport for WebSocketConnection {
    async fn send_text(&mut self, frame: String) -> LuciaResult<()> {
        self.ws_stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| LuciaError::Transport(format!("WS send failed: {e}")))
    }

    /// Returns `None` once the peer closes. Text and binary frames are both
    /// accepted; control frames are handled here.
    async fn recv_frame(&mut self) -> LuciaResult<Option<Vec<u8>>> {
        loop {
            match self.ws_stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.ws_stream.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(LuciaError::Transport(format!("WS recv failed: {e}")));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> LuciaResult<()> {
        self.ws_stream
            .close(None)
            .await
            .map_err(|e| LuciaError::Transport(format!("WS close failed: {e}")))
    }

    fn peer(&self) -> String {
        self.remote_addr.to_string()
    }
}
