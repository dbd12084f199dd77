//! WebSocket server implementation
//!
//! Listens on a configurable address, upgrades requests on the configured path
//! and hands every upgraded socket to a [`Connection`] driven by the echo
//! application loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tracing::{debug, error, info, warn};

use super::EchoHandler;
use crate::config::{DEFAULT_BIND, DEFAULT_PATH, DEFAULT_PORT};
use crate::connection::{Connection, ConnectionOptions};

/// Upper bound on waiting for live connections during shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Path accepted for the upgrade
    pub path: String,
    /// Allowed `Origin` values; empty or `*` allows every origin
    pub allowed_origins: Vec<String>,
    /// Options applied to each accepted connection
    pub connection: ConnectionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND.to_string(), DEFAULT_PORT)
    }
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            path: DEFAULT_PATH.to_string(),
            allowed_origins: Vec::new(),
            connection: ConnectionOptions::default(),
        }
    }

    /// Set the upgrade path
    pub fn with_path(mut self, path: String) -> Self {
        self.path = path;
        self
    }

    /// Restrict the origins allowed to upgrade
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Set per-connection options
    pub fn with_connection(mut self, options: ConnectionOptions) -> Self {
        self.connection = options;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Whether a request carrying this `Origin` may upgrade
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

/// WebSocket server handing each socket to its own connection
pub struct WebSocketServer {
    config: Arc<ServerConfig>,
    active: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Bind the configured address
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        Ok(listener)
    }

    /// Bind and run the WebSocket server
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections until a shutdown signal is received
    ///
    /// Each live connection also listens for the shutdown signal and closes
    /// itself when it arrives.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!("WebSocket server listening on ws://{}{}", addr, self.config.path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let config = Arc::clone(&self.config);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let active = Arc::clone(&self.active);
                            active.fetch_add(1, Ordering::AcqRel);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, config, shutdown_rx).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                                active.fetch_sub(1, Ordering::AcqRel);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let active = self.active_connections();
        if active > 0 {
            info!("Closing {} active connections...", active);
            self.drain(DRAIN_TIMEOUT).await;
        }

        Ok(())
    }

    /// Wait until every connection has finished, or give up after `limit`
    async fn drain(&self, limit: Duration) {
        let drained = tokio::time::timeout(limit, async {
            while self.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}",
                self.active_connections(),
                limit
            );
        }
    }
}

/// Upgrade a socket and serve it until it closes
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    debug!("New TCP connection from {}", peer_addr);

    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        check_upgrade(&config, request)?;
        Ok(response)
    })
    .await?;
    let (sink, stream) = ws_stream.split();

    let tasks = Connection::start(sink, stream, Some(peer_addr), &config.connection);
    let conn = tasks.connection();
    let app = tokio::spawn(EchoHandler::new().run(Arc::clone(&conn)));

    tokio::select! {
        _ = conn.closed() => {}
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, closing connection to {}", peer_addr);
            conn.close();
        }
    }

    tasks.join().await;
    app.await?;
    Ok(())
}

/// Reject upgrades on the wrong path or from a disallowed origin
fn check_upgrade(config: &ServerConfig, request: &Request) -> Result<(), ErrorResponse> {
    if request.uri().path() != config.path {
        debug!("Rejecting upgrade on path {}", request.uri().path());
        return Err(reject(StatusCode::NOT_FOUND, "Not Found"));
    }

    if let Some(origin) = request.headers().get(ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|origin| config.origin_allowed(origin))
            .unwrap_or(false);
        if !allowed {
            warn!("Rejecting upgrade from origin {:?}", origin);
            return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
        }
    }

    Ok(())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn request(path: &str, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new("127.0.0.1".to_string(), 9000);
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");
        assert_eq!(config.path, "/ws");
    }

    #[test]
    fn test_origin_allowed_by_default() {
        let config = ServerConfig::default();
        assert!(config.origin_allowed("https://anything.example"));
    }

    #[test]
    fn test_origin_allow_list() {
        let config = ServerConfig::default()
            .with_allowed_origins(vec!["https://app.example.com".to_string()]);
        assert!(config.origin_allowed("https://app.example.com"));
        assert!(config.origin_allowed("HTTPS://APP.EXAMPLE.COM"));
        assert!(!config.origin_allowed("https://evil.example.com"));
    }

    #[test]
    fn test_wildcard_origin() {
        let config = ServerConfig::default().with_allowed_origins(vec!["*".to_string()]);
        assert!(config.origin_allowed("https://evil.example.com"));
    }

    #[test]
    fn test_check_upgrade_wrong_path() {
        let config = ServerConfig::default();
        let err = check_upgrade(&config, &request("/other", None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_check_upgrade_forbidden_origin() {
        let config = ServerConfig::default()
            .with_allowed_origins(vec!["https://app.example.com".to_string()]);
        let err = check_upgrade(&config, &request("/ws", Some("https://evil.example.com")))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        assert!(check_upgrade(&config, &request("/ws", Some("https://app.example.com"))).is_ok());
        assert!(check_upgrade(&config, &request("/ws?token=1", None)).is_ok());
    }

    async fn start_server(config: ServerConfig) -> (Arc<WebSocketServer>, SocketAddr) {
        let server = Arc::new(WebSocketServer::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.serve(listener).await });
        (server, addr)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_echo_over_tcp() {
        let config = ServerConfig::default()
            .with_connection(ConnectionOptions::new().with_heartbeat_interval(Duration::ZERO));
        let (server, addr) = start_server(config).await;

        let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        client
            .send(WsMessage::Text(r#"{"a":1}"#.to_string()))
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, WsMessage::Text(r#"{"a":1}"#.to_string()));

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_heartbeat_over_tcp() {
        let config = ServerConfig::default()
            .with_connection(ConnectionOptions::new().with_heartbeat_interval(Duration::from_millis(50)));
        let (server, addr) = start_server(config).await;

        let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let beat = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(beat, WsMessage::Text("heartbeat from server".to_string()));

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wrong_path_rejected_over_tcp() {
        let (server, addr) = start_server(ServerConfig::default()).await;
        let result = connect_async(format!("ws://{}/nope", addr)).await;
        assert!(result.is_err());
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forbidden_origin_rejected_over_tcp() {
        let config = ServerConfig::default()
            .with_allowed_origins(vec!["https://app.example.com".to_string()]);
        let (server, addr) = start_server(config).await;

        let mut req = format!("ws://{}/ws", addr).into_client_request().unwrap();
        req.headers_mut()
            .insert(ORIGIN, HeaderValue::from_static("https://evil.example.com"));
        assert!(connect_async(req).await.is_err());

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_waits_for_connections_on_shutdown() {
        let config = ServerConfig::default()
            .with_connection(ConnectionOptions::new().with_heartbeat_interval(Duration::ZERO));
        let server = Arc::new(WebSocketServer::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = Arc::clone(&server);
        let serving = tokio::spawn(async move { runner.serve(listener).await });

        let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while server.active_connections() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        server.shutdown();
        timeout(Duration::from_secs(3), serving)
            .await
            .expect("serve should return once connections drain")
            .unwrap()
            .unwrap();
        assert_eq!(server.active_connections(), 0);

        // The connection was closed gracefully, so the client gets a close frame.
        let close = timeout(Duration::from_secs(2), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Close(_))) => break true,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => break false,
                }
            }
        })
        .await
        .unwrap();
        assert!(close);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_closes_live_connections() {
        let config = ServerConfig::default()
            .with_connection(ConnectionOptions::new().with_heartbeat_interval(Duration::ZERO));
        let (server, addr) = start_server(config).await;

        let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while server.active_connections() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        server.shutdown();

        // The client sees the socket go away: a close frame, an error or end of stream.
        let ended = timeout(Duration::from_secs(3), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(ended.is_ok());
    }
}
