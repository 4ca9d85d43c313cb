use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::assets::ensure_default_assets;
use crate::config::ServerConfig;
use crate::discovery::{self, Advertiser, MdnsAdvertiser, ServiceRecord};
use crate::error::ServerError;
use crate::status::StatusReport;
use crate::websocket::{
    run_receive_loop, BroadcastReport, Broadcaster, Connection, ConnectionRegistry, ConnectionState,
};

/// State shared by the service facade and every request handler.
pub(crate) struct Shared {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    advertiser: Arc<dyn Advertiser>,
    local_ip: Option<Ipv4Addr>,
    /// Set while the listener is bound.
    bound: parking_lot::Mutex<Option<SocketAddr>>,
    last_error: parking_lot::Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn new(config: ServerConfig, advertiser: Arc<dyn Advertiser>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            advertiser,
            local_ip: discovery::local_ipv4(),
            bound: parking_lot::Mutex::new(None),
            last_error: parking_lot::Mutex::new(None),
            config,
        }
    }

    fn port(&self) -> u16 {
        let bound = *self.bound.lock();
        bound.map_or(self.config.port, |addr| addr.port())
    }

    fn is_running(&self) -> bool {
        self.bound.lock().is_some()
    }

    fn address(&self) -> String {
        discovery::format_address(&self.config.mdns_host(), self.port(), self.local_ip)
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            running: self.is_running(),
            mdns: self.advertiser.is_published(),
            address: self.address(),
            local_ip: self.local_ip.map(|ip| ip.to_string()),
            port: self.port(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Shared>,
    /// Cancelled by `stop()`; parent of every connection's token.
    shutdown: CancellationToken,
}

/// Build the Axum router: `/`, `/ws`, `/status`, and the web root for
/// everything else.
pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.shared.config.web_root);
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .fallback_service(static_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Byte-exact comparison; an empty token never matches.
pub fn token_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(token) if !token.is_empty() => token.as_bytes() == expected.as_bytes(),
        _ => false,
    }
}

/// The viewer reads its token from the query string, so it is carried over.
async fn root_handler(RawQuery(query): RawQuery) -> Redirect {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => Redirect::to(&format!("/index.html?{q}")),
        None => Redirect::to("/index.html"),
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.shared.status())
}

/// WebSocket upgrade handler. The upgrade check runs before the token
/// check, so a plain request learns nothing about the token.
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(reason = %rejection, "rejected non-upgrade request to /ws");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let token = query.ok().and_then(|Query(q)| q.token);
    if !token_matches(token.as_deref(), &state.shared.config.token) {
        warn!(token_present = token.is_some(), "rejected WebSocket client with bad token");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Register an accepted socket and run its receive loop to completion.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let conn = Arc::new(Connection::new(sink, state.shutdown.child_token()));
    if conn.is_aborted() {
        debug!("server stopping, dropping new client");
        return;
    }

    let registry = Arc::clone(&state.shared.registry);
    conn.set_state(ConnectionState::Open);
    registry.add(Arc::clone(&conn));
    // stop() may have run close_all between the check above and add().
    if conn.is_aborted() {
        let _ = registry.remove(&conn.id);
        return;
    }
    info!(connection_id = %conn.id, clients = registry.len(), "WebSocket client connected");

    let keep_alive = state.shared.config.keep_alive_interval();
    let _ = run_receive_loop(conn, stream, registry, keep_alive).await;
}

struct RunningServer {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// The broadcast service as seen by the operator layer: start, stop,
/// broadcast, and status getters. Never returns errors; failures show up
/// in the status fields and in `last_error()`.
pub struct BroadcastService {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<RunningServer>>,
}

impl BroadcastService {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_advertiser(config, Arc::new(MdnsAdvertiser::new()))
    }

    pub fn with_advertiser(config: ServerConfig, advertiser: Arc<dyn Advertiser>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, advertiser)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind the listener, serve, and advertise. No-op while running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("broadcast server already running");
            return;
        }

        match self.launch().await {
            Ok(server) => {
                *running = Some(server);
                *self.shared.last_error.lock() = None;
            }
            Err(e) => {
                error!(error = %e, "failed to start broadcast server");
                *self.shared.last_error.lock() = Some(e.to_string());
            }
        }
    }

    async fn launch(&self) -> Result<RunningServer, ServerError> {
        let config = &self.shared.config;

        match ensure_default_assets(&config.web_root) {
            Ok(report) if !report.written.is_empty() => {
                info!(written = report.written.len(), root = %config.web_root.display(), "default assets created");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not prepare web root"),
        }

        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let router = build_router(AppState {
            shared: Arc::clone(&self.shared),
            shutdown: shutdown.clone(),
        });

        let serve_token = shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await
            {
                error!(error = %e, "broadcast server terminated");
            }
        });

        *self.shared.bound.lock() = Some(local_addr);
        info!(port = local_addr.port(), address = %self.shared.address(), "broadcast server started");

        if config.mdns_enabled {
            let record = ServiceRecord {
                instance_name: config.instance_name.clone(),
                service_type: config.service_type.clone(),
                domain: config.domain.clone(),
                port: local_addr.port(),
                ip: self.shared.local_ip,
            };
            if let Err(e) = self.shared.advertiser.publish(&record) {
                warn!(error = %e, "mDNS advertisement failed, reachable by IP only");
            }
        } else {
            debug!("mDNS disabled by config");
        }

        Ok(RunningServer { shutdown, task })
    }

    /// Retract the advertisement, abort every client, and unbind. Bounded by
    /// `shutdown_timeout_secs`. No-op while stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(mut server) = running.take() else {
            debug!("broadcast server not running");
            return;
        };

        self.shared.advertiser.retract();
        server.shutdown.cancel();
        let closed = self.shared.registry.close_all();
        *self.shared.bound.lock() = None;

        let timeout = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(timeout, &mut server.task).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "listener did not stop in time, aborting");
            server.task.abort();
        }
        info!(closed, "broadcast server stopped");
    }

    /// Send `text` to every open client; `None` sends an empty frame.
    pub async fn broadcast_text(&self, text: Option<&str>) -> BroadcastReport {
        self.shared.broadcaster.broadcast(text).await
    }

    /// Human-readable connection string, mDNS name first.
    pub fn address(&self) -> String {
        self.shared.address()
    }

    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        self.shared.local_ip
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn mdns_published(&self) -> bool {
        self.shared.advertiser.is_published()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.bound.lock()
    }

    pub fn status(&self) -> StatusReport {
        self.shared.status()
    }

    /// Why the last `start()` failed, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl Drop for BroadcastService {
    fn drop(&mut self) {
        if let Some(server) = self.running.get_mut().take() {
            self.shared.advertiser.retract();
            server.shutdown.cancel();
            let _ = self.shared.registry.close_all();
            server.task.abort();
        }
    }
}
