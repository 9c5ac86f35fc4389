//! HTTP gateway for heartbeats and interval reads.
//!
//! This module provides an HTTP server that:
//! - Accepts heartbeats via POST /heartbeat and applies them through the aggregator
//! - Serves intervals via GET /all, GET /active, GET /interval/:id and GET /entity/:g/:u/:d
//! - Closes silent intervals on POST /sweep
//!
//! # Architecture
//!
//! ```text
//! client ──→ POST /heartbeat ──→ aggregator ──→ interval store
//! client ──→ GET  /active    ──→ query      ──→ interval store (snapshot)
//! ```
//!
//! Store work is blocking and runs on tokio's blocking pool; request
//! handlers never hold a lock across it.

use crate::config::Config;
use crate::core::{
    EntityKey, Heartbeat, HeartbeatAggregator, Interval, Outcome, QueryService, RetryPolicy,
    StaleSweeper, SweepReport,
};
use crate::error::IntervalError;
use crate::stats::{
    create_shared_stats, create_shared_stats_with_persistence, SharedWriteStats,
    WriteStatsSnapshot,
};
use crate::store::open_shared;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Directory of the interval store
    pub store_path: PathBuf,
    /// Where to persist write stats on shutdown
    pub stats_path: Option<PathBuf>,
    /// Gap threshold in heartbeat epoch units
    pub gap_threshold: i64,
    /// Conflict retry policy
    pub retry: RetryPolicy,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, store_path: PathBuf, gap_threshold: i64) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port,
            store_path,
            stats_path: None,
            gap_threshold,
            retry: RetryPolicy::default(),
            cors_origins: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_stats_path(mut self, path: PathBuf) -> Self {
        self.stats_path = Some(path);
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Derive the server configuration from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            store_path: config.store_path(),
            stats_path: Some(config.stats_path()),
            gap_threshold: config.gap_threshold_secs(),
            retry: config.retry,
            cors_origins: config.cors_origins.clone(),
        }
    }
}

/// Shared server state
pub struct ServerState {
    aggregator: HeartbeatAggregator,
    query: QueryService,
    sweeper: StaleSweeper,
    stats: SharedWriteStats,
    cors_origins: Vec<String>,
}

impl ServerState {
    /// Open the store and build the services on top of it
    pub fn new(config: &ServerConfig) -> Result<Self, IntervalError> {
        let store = open_shared(&config.store_path)?;
        let stats = match config.stats_path {
            Some(ref path) => create_shared_stats_with_persistence(path.clone()),
            None => create_shared_stats(),
        };

        Ok(Self {
            aggregator: HeartbeatAggregator::new(store.clone(), config.gap_threshold, config.retry)
                .with_stats(stats.clone()),
            query: QueryService::new(store.clone()),
            sweeper: StaleSweeper::new(store, config.gap_threshold, config.retry)
                .with_stats(stats.clone()),
            stats,
            cors_origins: config.cors_origins.clone(),
        })
    }

    fn save_stats(&self) {
        if let Err(e) = self.stats.save() {
            tracing::warn!("Failed to save write stats: {}", e);
        }
    }
}

/// Heartbeat from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub g: String,
    pub u: String,
    pub d: String,
    /// Epoch seconds; the server clock is used when omitted
    #[serde(default)]
    pub ts: Option<i64>,
}

/// Response from the heartbeat endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub outcome: Outcome,
    pub interval: Interval,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepParams {
    /// Reference time for staleness; defaults to now
    pub now: Option<i64>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: IntervalError) -> ApiError {
    let status = match e {
        IntervalError::InvalidHeartbeat(_) => StatusCode::BAD_REQUEST,
        IntervalError::WriteContention { .. } | IntervalError::Conflict => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        IntervalError::Io(_) | IntervalError::CorruptRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

/// Run store work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, IntervalError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            tracing::error!("Blocking task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Worker failed: {}", e),
                    code: "WORKER_ERROR".to_string(),
                }),
            )
        })?
        .map_err(api_error)
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /heartbeat
async fn heartbeat(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let Json(req) = payload
        .map_err(|rejection| api_error(IntervalError::InvalidHeartbeat(rejection.body_text())))?;
    let heartbeat = Heartbeat::new(
        EntityKey::new(req.g, req.u, req.d),
        req.ts.unwrap_or_else(|| Utc::now().timestamp()),
    );

    let (interval, outcome) = blocking(move || state.aggregator.record(&heartbeat)).await?;

    Ok(Json(HeartbeatResponse {
        status: "ok".to_string(),
        outcome,
        interval,
    }))
}

/// GET /all
async fn list_all(State(state): State<Arc<ServerState>>) -> Result<Json<Vec<Interval>>, ApiError> {
    Ok(Json(blocking(move || state.query.list_all()).await?))
}

/// GET /active
async fn list_active(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<Interval>>, ApiError> {
    Ok(Json(blocking(move || state.query.list_active()).await?))
}

/// GET /interval/:id
async fn get_interval(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Interval>, ApiError> {
    let lookup = id.clone();
    match blocking(move || state.query.get_by_id(&lookup)).await? {
        Some(interval) => Ok(Json(interval)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No interval with id {}", id),
                code: "NOT_FOUND".to_string(),
            }),
        )),
    }
}

/// GET /entity/:g/:u/:d
async fn list_entity(
    State(state): State<Arc<ServerState>>,
    Path((g, u, d)): Path<(String, String, String)>,
) -> Result<Json<Vec<Interval>>, ApiError> {
    let entity = EntityKey::new(g, u, d);
    Ok(Json(blocking(move || state.query.list_entity(&entity)).await?))
}

/// POST /sweep
async fn sweep(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<SweepParams>,
) -> Result<Json<SweepReport>, ApiError> {
    let now = params.now.unwrap_or_else(|| Utc::now().timestamp());
    Ok(Json(blocking(move || state.sweeper.sweep(now)).await?))
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<WriteStatsSnapshot> {
    Json(state.stats.snapshot())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Build the router over an existing state
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/heartbeat", post(heartbeat))
        .route("/all", get(list_all))
        .route("/active", get(list_active))
        .route("/interval/:id", get(get_interval))
        .route("/entity/:g/:u/:d", get(list_entity))
        .route("/sweep", post(sweep))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait until in-flight requests are
    /// done and the write stats are saved.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await?;
        Ok(())
    }
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<ServerHandle> {
    let state = Arc::new(ServerState::new(&config)?);
    let app = router(state.clone());

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    tracing::info!("Interval server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        state.save_stats();
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx,
        task,
    })
}
