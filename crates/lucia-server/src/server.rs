//! Core server: accepts WebSocket connections and runs one connection loop
//! per client.
//!
//! Owns the collaborators every connection shares (attestation provider,
//! response generator, application state) and the shutdown broadcast.

use crate::attestation::{
    AttestationProvider, HttpAttestation, MockAttestation, ProviderKind, UnavailableAttestation,
};
use crate::catalog;
use crate::config::ServerConfig;
use crate::connection::{Connection, Services};
use crate::handshake::HandshakeHandler;
use crate::responder::MockResponder;
use crate::router::Router;
use crate::transport::websocket::{self, WebSocketConnection};
use lucia_core::LuciaResult;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// The Lucia server instance.
pub struct LuciaServer {
    config: ServerConfig,
    services: Arc<Services>,
    next_connection_id: AtomicU64,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl LuciaServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> LuciaResult<Self> {
        let attestation: Arc<dyn AttestationProvider> = match config.attestation_provider {
            ProviderKind::Mock => Arc::new(MockAttestation::new(config.verification_url.clone())),
            ProviderKind::Http => Arc::new(HttpAttestation::new(
                &config.attestation_url,
                config.attestation_timeout,
                config.verification_url.clone(),
            )?),
            ProviderKind::Unavailable => Arc::new(UnavailableAttestation),
        };
        info!(provider = ?config.attestation_provider, "attestation provider configured");

        let state = config.state_policy.build(catalog::default_model_id());
        info!(policy = ?config.state_policy, model = %catalog::default_model_id(), "application state ready");

        let services = Arc::new(Services {
            handshake: HandshakeHandler::new(attestation, config.attestation_timeout),
            router: Router::new(state, Arc::new(MockResponder::new(config.latency))),
            policy: config.session,
        });

        Ok(Self {
            config,
            services,
            next_connection_id: AtomicU64::new(1),
            shutdown_tx: broadcast::channel(1).0,
        })
    }

    /// A sender that stops the accept loop and every open connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the listener. Returns the bound address and the stream of
    /// upgraded connections for [`serve`](Self::serve).
    pub async fn bind(&self) -> LuciaResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
        let addr = self.config.bind_addr()?;
        let (local, rx) = websocket::start_listener(addr, &self.config.ws_path).await?;
        info!(
            ws = %format!("ws://{local}{}", self.config.ws_path),
            health = %format!("http://{local}/health"),
            "listening"
        );
        Ok((local, rx))
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> LuciaResult<()> {
        let (_, rx) = self.bind().await?;
        self.serve(rx).await
    }

    /// Spawn a connection loop for every accepted connection until shutdown.
    pub async fn serve(self, mut incoming: mpsc::Receiver<WebSocketConnection>) -> LuciaResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutting down, no longer accepting connections");
                    break;
                }
                conn = incoming.recv() => {
                    let Some(conn) = conn else {
                        debug!("listener closed");
                        break;
                    };
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let connection = Connection::new(
                        id,
                        conn,
                        self.services.clone(),
                        self.shutdown_tx.subscribe(),
                    );
                    tokio::spawn(connection.run());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SessionPolicy;
    use crate::responder::LatencyModel;
    use futures_util::{SinkExt, StreamExt};
    use lucia_core::messages::{ChatMessagePayload, HandshakeResponsePayload};
    use lucia_core::{
        decode_frame, decrypt_envelope, encode_frame, encrypt_envelope, ClientHandshake, Envelope,
        Message, SessionKey, PROTOCOL_VERSION,
    };
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            latency: LatencyModel::None,
            session: SessionPolicy::default(),
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> (SocketAddr, broadcast::Sender<()>) {
        let server = LuciaServer::new(config).unwrap();
        let shutdown = server.shutdown_handle();
        let (addr, rx) = server.bind().await.unwrap();
        tokio::spawn(server.serve(rx));
        (addr, shutdown)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        client
    }

    async fn send(client: &mut Client, envelope: &Envelope) {
        let frame = encode_frame(envelope).unwrap();
        client.send(WsMessage::Text(frame.into())).await.unwrap();
    }

    async fn recv(client: &mut Client) -> Envelope {
        let next = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame");
        match next {
            Some(Ok(WsMessage::Text(text))) => decode_frame(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    async fn handshake(client: &mut Client) -> (HandshakeResponsePayload, SessionKey) {
        let hs = ClientHandshake::new().unwrap();
        send(client, &hs.init_message().into_envelope().unwrap()).await;
        let reply = recv(client).await;
        assert_eq!(reply.msg_type, "handshake.response");
        let Message::HandshakeResponse(response) = reply.message().unwrap() else {
            panic!("handshake.response did not decode");
        };
        let key = hs.finish(&response).unwrap();
        (response, key)
    }

    #[tokio::test]
    async fn handshake_response_carries_attestation() {
        let (addr, _shutdown) = start(test_config()).await;
        let mut client = connect(addr).await;

        let (response, _key) = handshake(&mut client).await;
        assert_eq!(response.protocol_version, PROTOCOL_VERSION);
        assert!(lucia_core::handshake::decode_public_key_b64(&response.server_public_key).is_ok());
        let measurements = response.attestation.tdx.measurements.fields();
        let names: Vec<&str> = measurements.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["mrtd", "rtmr0", "rtmr1", "rtmr2", "rtmr3"]);
        assert!(measurements.iter().all(|(_, digest)| digest.len() == 96));
    }

    #[tokio::test]
    async fn encrypted_ping_round_trip() {
        let (addr, _shutdown) = start(test_config()).await;
        let mut client = connect(addr).await;
        let (_, key) = handshake(&mut client).await;

        let ping = Message::ChatMessage(ChatMessagePayload {
            content: "ping".into(),
            model: None,
        });
        send(&mut client, &encrypt_envelope(&key, &ping.into_envelope().unwrap()).unwrap()).await;

        let outer = recv(&mut client).await;
        assert_eq!(outer.msg_type, "encrypted");
        match decrypt_envelope(&key, &outer).unwrap().message().unwrap() {
            Message::ChatResponse(p) => assert_eq!(p.content, "Pong! E2E encryption verified."),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_choice_is_visible_to_other_connections() {
        let (addr, _shutdown) = start(test_config()).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;
        let (_, k1) = handshake(&mut first).await;
        let (_, k2) = handshake(&mut second).await;

        let chat = Message::ChatMessage(ChatMessagePayload {
            content: "hello".into(),
            model: Some("qwen/qwq-32b".into()),
        });
        send(&mut first, &encrypt_envelope(&k1, &chat.into_envelope().unwrap()).unwrap()).await;
        recv(&mut first).await;

        send(
            &mut second,
            &encrypt_envelope(&k2, &Message::ModelsList.into_envelope().unwrap()).unwrap(),
        )
        .await;
        let outer = recv(&mut second).await;
        match decrypt_envelope(&k2, &outer).unwrap().message().unwrap() {
            Message::ModelsResponse(p) => assert_eq!(p.current_model, "qwen/qwq-32b"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (addr, _shutdown) = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "lucia-server");
    }

    #[tokio::test]
    async fn shutdown_closes_open_connections() {
        let (addr, shutdown) = start(test_config()).await;
        let mut client = connect(addr).await;
        handshake(&mut client).await;

        shutdown.send(()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("connection was not closed");
        assert!(matches!(next, None | Some(Ok(WsMessage::Close(_))) | Some(Err(_))));
    }
}
