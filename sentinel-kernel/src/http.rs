/**
 * REST API + REALTIME CHANNEL - HTTP surface of the kernel
 *
 * ROUTES:
 * - /health, /system/health           liveness and kernel counters
 * - /ingest                            batch of agent events (gateway)
 * - /infrastructure[/register]         fleet read and explicit upsert
 * - /logs/ingest, /logs/history        log append and newest-first history
 * - /analysis/upload                   multipart `log` -> AnalysisReport
 * - /metrics/realtime, /metrics/history
 * - /realtime                          WebSocket fan-out to dashboards
 *
 * ERRORS:
 * Validation -> 400, persistence on a direct write -> 500, always as
 * `{"error": "..."}`. Agent and analysis-engine outages never surface here.
 */

use crate::analysis::{AnalysisProxy, UploadArtifact};
use crate::broadcast::{RealtimeMessage, SessionManager, Subscription};
use crate::config::KernelConfig;
use crate::health::{HealthTracker, KernelHealth};
use crate::ingest::ingest_batch;
use crate::models::{AnalysisReport, LineSeverity, LogEvent, MetricsSample, NewLogEvent, Node, NodeUpdate, Severity};
use crate::registry::{FleetRegistry, RegistryError, SharedFleetRegistry};
use crate::sampler::SystemSampler;
use crate::state::{new_state, Shared};
use crate::store::{metrics::DEFAULT_CAPACITY, HistoryQuery, LogStore, MetricStore, StoreError};
use crate::ticker::Ticker;
use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest accepted request body (log uploads).
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Number of points returned by `/metrics/history`.
const METRICS_HISTORY_POINTS: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<KernelConfig>,
    pub registry: SharedFleetRegistry,
    pub logs: Arc<LogStore>,
    pub metrics: Arc<MetricStore>,
    pub sessions: SessionManager,
    pub sampler: Shared<SystemSampler>,
    pub analysis: Arc<AnalysisProxy>,
    pub health: HealthTracker,
}

impl AppState {
    /// Builds every component once; they are shared by handle from here on.
    pub async fn bootstrap(cfg: KernelConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir)
            .with_context(|| format!("failed to create data dir {:?}", cfg.data_dir))?;

        let sessions = SessionManager::new(cfg.realtime.session_buffer);

        let mut registry = FleetRegistry::new(cfg.nodes_file()).with_sessions(sessions.clone());
        registry.load_nodes().await.context("failed to load nodes")?;
        let registry: SharedFleetRegistry = Arc::new(registry);

        let logs = LogStore::open(cfg.logs_file())
            .context("failed to open log store")?
            .with_sessions(sessions.clone());
        let metrics = MetricStore::open(cfg.metrics_file(), DEFAULT_CAPACITY)
            .context("failed to open metric store")?;
        let analysis = AnalysisProxy::new(cfg.analysis.backend_url.clone(), cfg.analysis_timeout());

        let state = Self {
            cfg: Arc::new(cfg),
            registry,
            logs: Arc::new(logs),
            metrics: Arc::new(metrics),
            sessions,
            sampler: new_state(SystemSampler::new()),
            analysis: Arc::new(analysis),
            health: HealthTracker::new(),
        };
        state.seed_registry().await;
        Ok(state)
    }

    /// Inserts the configured seed nodes when the registry is empty.
    async fn seed_registry(&self) {
        if self.cfg.seed.is_empty() || !self.registry.is_empty().await {
            return;
        }
        for seed in &self.cfg.seed {
            let update = NodeUpdate {
                hostname: Some(seed.hostname.clone()),
                ip_address: Some(seed.ip_address.clone()),
                region: seed.region.clone(),
                status: seed.status,
                load: seed.load,
            };
            if let Err(e) = self.registry.upsert(update).await {
                warn!("[kernel] failed to seed node {}: {}", seed.hostname, e);
            }
        }
        info!("[kernel] seeded {} nodes", self.cfg.seed.len());
    }

    pub fn ticker(&self) -> Ticker {
        Ticker {
            registry: self.registry.clone(),
            sessions: self.sessions.clone(),
            metrics: self.metrics.clone(),
            sampler: self.sampler.clone(),
            jitter: self
                .cfg
                .realtime
                .jitter_loads
                .then_some(self.cfg.realtime.jitter_amplitude),
        }
    }
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Invalid(msg) => Self::bad_request(msg),
            RegistryError::Store(e) => {
                error!("[http] registry persistence failed: {}", e);
                Self::internal("Failed to register server")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(msg) => Self::bad_request(msg),
            other => {
                error!("[http] log store write failed: {}", other);
                Self::internal("Failed to ingest log")
            }
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/ingest", post(ingest))
        .route("/infrastructure", get(list_infrastructure))
        .route("/infrastructure/register", post(register_node))
        .route("/logs/ingest", post(ingest_log))
        .route("/logs/history", get(log_history))
        .route("/analysis/upload", post(upload_analysis))
        .route("/metrics/realtime", get(metrics_realtime))
        .route("/metrics/history", get(metrics_history))
        .route("/realtime", get(realtime))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let nodes = app.registry.len().await;
    Json(app.health.report(
        nodes,
        app.sessions.session_count(),
        app.logs.len(),
        app.analysis.backend_url(),
    ))
}

#[derive(Debug, Deserialize)]
struct IngestBatch {
    #[serde(default)]
    events: Vec<Value>,
}

// POST /ingest
async fn ingest(State(app): State<AppState>, Json(batch): Json<IngestBatch>) -> Json<Value> {
    let outcome = ingest_batch(&app.registry, &app.logs, batch.events).await;
    Json(json!({
        "status": "ok",
        "received": outcome.accepted,
        "rejected": outcome.rejected,
    }))
}

// GET /infrastructure
async fn list_infrastructure(State(app): State<AppState>) -> Json<Vec<Node>> {
    Json(app.registry.list_nodes().await)
}

#[derive(Debug, Serialize)]
struct Registered {
    message: &'static str,
    #[serde(flatten)]
    node: Node,
}

// POST /infrastructure/register
async fn register_node(
    State(app): State<AppState>,
    Json(update): Json<NodeUpdate>,
) -> Result<(StatusCode, Json<Registered>), ApiError> {
    let has = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
    if !has(&update.hostname) || !has(&update.ip_address) {
        return Err(ApiError::bad_request("Hostname and IP Address are required"));
    }
    let upserted = app.registry.upsert(update).await?;
    let (code, message) = if upserted.created {
        (StatusCode::CREATED, "Server registered")
    } else {
        (StatusCode::OK, "Server updated")
    };
    Ok((code, Json(Registered { message, node: upserted.node })))
}

// POST /logs/ingest
async fn ingest_log(
    State(app): State<AppState>,
    Json(new): Json<NewLogEvent>,
) -> Result<(StatusCode, Json<LogEvent>), ApiError> {
    let event = app.logs.append(new)?;
    Ok((StatusCode::CREATED, Json(event)))
}

// GET /logs/history?limit=&offset=
async fn log_history(State(app): State<AppState>, Query(query): Query<HistoryQuery>) -> Json<Vec<LogEvent>> {
    Json(app.logs.history(&query, app.cfg.history_limit))
}

// POST /analysis/upload (multipart, field `log`)
async fn upload_analysis(
    State(app): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisReport>, ApiError> {
    let mut artifact = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("log") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.log").to_string();
        let mut upload = UploadArtifact::create(&app.cfg.upload_dir, &file_name)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store upload: {e}")))?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?
        {
            upload
                .write_chunk(&chunk)
                .await
                .map_err(|e| ApiError::internal(format!("Failed to store upload: {e}")))?;
        }
        upload
            .finish()
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store upload: {e}")))?;
        artifact = Some(upload);
        break;
    }

    let artifact = artifact.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let report = app
        .analysis
        .analyze(&artifact)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read upload: {e}")))?;
    let file_name = artifact.file_name().to_string();
    drop(artifact);

    record_analysis(&app.logs, &file_name, &report);
    Ok(Json(report))
}

/// One log line per upload so dashboards see analyses happen.
fn record_analysis(logs: &LogStore, file_name: &str, report: &AnalysisReport) {
    let errors = report.count(LineSeverity::Error);
    let warnings = report.count(LineSeverity::Warn);
    let severity = if errors > 0 {
        Severity::High
    } else if warnings > 0 {
        Severity::Medium
    } else {
        Severity::Info
    };
    let note = NewLogEvent {
        severity: Some(severity),
        device: Some("analysis-proxy".to_string()),
        message: Some(format!(
            "Analyzed {}: {} lines, {} warnings, {} errors ({} engine)",
            file_name,
            report.total_lines(),
            warnings,
            errors,
            report.engine.as_str()
        )),
        suggestion: None,
        timestamp: None,
    };
    if let Err(e) = logs.append(note) {
        warn!("[analysis] failed to record analysis of {}: {}", file_name, e);
    }
}

// GET /metrics/realtime
async fn metrics_realtime(State(app): State<AppState>) -> Json<MetricsSample> {
    let sample = app.sampler.lock().sample();
    if let Err(e) = app.metrics.append(&sample) {
        warn!("[metrics] failed to persist point: {}", e);
    }
    Json(sample)
}

// GET /metrics/history
async fn metrics_history(State(app): State<AppState>) -> Json<Vec<MetricsSample>> {
    Json(app.metrics.recent(METRICS_HISTORY_POINTS))
}

// GET /realtime (WebSocket)
async fn realtime(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    // subscribe before reading the snapshot so no update falls in between
    let subscription = app.sessions.subscribe();
    let snapshot = app.registry.list_nodes().await;
    ws.on_upgrade(move |socket| session_loop(socket, subscription, snapshot))
}

async fn session_loop(mut socket: WebSocket, mut subscription: Subscription, snapshot: Vec<Node>) {
    let id = subscription.id();
    debug!("[realtime] session {} connected", id);

    if send_frame(&mut socket, &RealtimeMessage::InfrastructureUpdate(snapshot)).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            frame = subscription.recv() => match frame {
                Some(frame) => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("[realtime] session {} closed", id);
}

async fn send_frame(socket: &mut WebSocket, frame: &RealtimeMessage) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
