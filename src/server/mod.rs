//! REST + WebSocket surface. Thin: every handler delegates to a subsystem
//! and maps failures into the shared error envelope.

pub mod broadcast;
mod ws;

use crate::camera::{CameraControl, PrimaryCamera};
use crate::clock;
use crate::config::Config;
use crate::discovery::registry::{tasks as discovery_tasks, CameraRegistry};
use crate::errors::{ControlError, ControlResult};
use crate::session::manager::SessionManager;
use crate::timesync::TimeSyncService;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use broadcast::{BroadcastFabric, ClientRegistry};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handler context, assembled by the composition root.
#[derive(derive_more::Debug)]
pub struct AppState {
    pub config: Config,
    #[debug(skip)]
    pub camera: Arc<dyn PrimaryCamera>,
    #[debug(skip)]
    pub registry: Arc<CameraRegistry>,
    #[debug(skip)]
    pub manager: Arc<SessionManager>,
    #[debug(skip)]
    pub timesync: Arc<TimeSyncService>,
    #[debug(skip)]
    pub clients: Arc<ClientRegistry>,
    #[debug(skip)]
    pub fabric: Arc<BroadcastFabric>,
}

impl AppState {
    pub(crate) fn require_camera(&self) -> ControlResult<Arc<dyn CameraControl>> {
        self.camera
            .primary()
            .ok_or_else(|| ControlError::camera_offline("no primary camera connected"))
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_envelope())).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ControlError>;

#[derive(Debug, Deserialize)]
struct ConfigurePayload {
    setting: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ValidateIntervalPayload {
    interval: f64,
}

#[derive(Debug, Deserialize)]
struct TitlePayload {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SaveSessionPayload {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SystemTimePayload {
    time: String,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectPayload {
    ip: String,
    #[serde(default)]
    port: Option<u16>,
}

async fn camera_status(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.camera.primary() {
        Some(camera) => {
            let status = camera.connection_status().await;
            Ok(Json(serde_json::to_value(status).unwrap_or_default()))
        }
        None => Ok(Json(json!({ "connected": false }))),
    }
}

async fn camera_settings(State(state): State<Arc<AppState>>) -> ApiResult {
    let camera = state.require_camera()?;
    let settings = camera
        .get_settings()
        .await
        .map_err(|err| err.in_context("camera", "get_settings"))?;
    Ok(Json(serde_json::to_value(settings).unwrap_or_default()))
}

async fn camera_battery(State(state): State<Arc<AppState>>) -> ApiResult {
    let camera = state.require_camera()?;
    let battery = camera
        .battery()
        .await
        .map_err(|err| err.in_context("camera", "battery"))?;
    Ok(Json(battery))
}

async fn camera_photo(State(state): State<Arc<AppState>>) -> ApiResult {
    let camera = state.require_camera()?;
    camera
        .take_photo()
        .await
        .map_err(|err| err.in_context("camera", "take_photo"))?;
    Ok(Json(json!({ "success": true })))
}

async fn camera_reconnect(State(state): State<Arc<AppState>>) -> ApiResult {
    let uuid = state
        .registry
        .primary_uuid()
        .ok_or_else(|| ControlError::camera_offline("no primary camera to reconnect"))?;
    state.registry.connect(uuid.clone()).await;
    Ok(Json(json!({ "success": true, "uuid": uuid })))
}

async fn camera_configure(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfigurePayload>,
) -> ApiResult {
    let camera = state.require_camera()?;
    camera
        .set_setting(&payload.setting, &payload.value)
        .await
        .map_err(|err| err.in_context("camera", "set_setting"))?;
    Ok(Json(json!({ "success": true })))
}

async fn camera_validate_interval(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateIntervalPayload>,
) -> ApiResult {
    let camera = state.require_camera()?;
    let verdict = camera
        .validate_interval(payload.interval)
        .await
        .map_err(|err| err.in_context("camera", "validate_interval"))?;
    Ok(Json(serde_json::to_value(verdict).unwrap_or_default()))
}

async fn intervalometer_start(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ws::StartPayload>,
) -> ApiResult {
    let snapshot = state.manager.create_and_start(payload.into_options()).await?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}

async fn intervalometer_stop(State(state): State<Arc<AppState>>) -> ApiResult {
    state.manager.stop_active().await?;
    Ok(Json(json!({ "success": true })))
}

async fn intervalometer_status(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.manager.current_snapshot().await {
        Some(snapshot) => Ok(Json(serde_json::to_value(snapshot).unwrap_or_default())),
        None => Ok(Json(json!({ "state": null }))),
    }
}

async fn reports_list(State(state): State<Arc<AppState>>) -> ApiResult {
    let reports = state.manager.list_reports().await?;
    Ok(Json(json!({ "reports": reports })))
}

async fn report_get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let report = state.manager.get_report(&id).await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

async fn report_update_title(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<TitlePayload>,
) -> ApiResult {
    let report = state.manager.update_report_title(&id, &payload.title).await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

async fn report_delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    state.manager.delete_report(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn session_save(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveSessionPayload>,
) -> ApiResult {
    let report = state.manager.save_unsaved(id, payload.title.as_deref()).await?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

async fn session_discard(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult {
    state.manager.discard_unsaved(id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn unsaved_session(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.manager.unsaved_session().await {
        Some(unsaved) => Ok(Json(serde_json::to_value(unsaved).unwrap_or_default())),
        None => Ok(Json(json!({ "unsavedSession": null }))),
    }
}

async fn system_time_get(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({
        "time": clock::rfc3339(clock::wall_now()),
        "timesync": state.timesync.status(),
    })))
}

async fn system_time_set(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SystemTimePayload>,
) -> ApiResult {
    let to = time::OffsetDateTime::parse(
        &payload.time,
        &time::format_description::well_known::Rfc3339,
    )
    .map_err(|err| ControlError::invalid_parameter(format!("time: {err}")))?;
    state
        .timesync
        .set_host_time(to, payload.timezone.as_deref())
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn discovery_status(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(serde_json::to_value(state.registry.summary()).unwrap_or_default()))
}

async fn discovery_cameras(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "cameras": state.registry.records() })))
}

async fn discovery_scan(State(state): State<Arc<AppState>>) -> ApiResult {
    let registry = Arc::clone(&state.registry);
    let _ = tokio::spawn(async move {
        if let Err(err) = discovery_tasks::search_once(&registry).await {
            tracing::warn!(%err, "manual SSDP scan failed");
        }
    });
    Ok(Json(json!({ "scanning": true })))
}

async fn discovery_set_primary(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult {
    state.registry.set_primary(&uuid)?;
    Ok(Json(json!({ "success": true, "uuid": uuid })))
}

async fn discovery_connect(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConnectPayload>,
) -> ApiResult {
    let ip = payload
        .ip
        .parse()
        .map_err(|err| ControlError::invalid_parameter(format!("ip: {err}")))?;
    let uuid = state
        .registry
        .add_manual(ip, payload.port.unwrap_or(crate::discovery::CCAPI_PORT))
        .await;
    Ok(Json(json!({ "success": true, "uuid": uuid })))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/camera/status", get(camera_status))
        .route("/api/camera/settings", get(camera_settings))
        .route("/api/camera/battery", get(camera_battery))
        .route("/api/camera/photo", post(camera_photo))
        .route("/api/camera/reconnect", post(camera_reconnect))
        .route("/api/camera/configure", post(camera_configure))
        .route("/api/camera/validate-interval", post(camera_validate_interval))
        .route("/api/intervalometer/start", post(intervalometer_start))
        .route(
            "/api/intervalometer/start-with-title",
            post(intervalometer_start),
        )
        .route("/api/intervalometer/stop", post(intervalometer_stop))
        .route("/api/intervalometer/status", get(intervalometer_status))
        .route("/api/timelapse/reports", get(reports_list))
        .route(
            "/api/timelapse/reports/{id}",
            get(report_get).put(report_update_title).delete(report_delete),
        )
        .route("/api/timelapse/sessions/{id}/save", post(session_save))
        .route("/api/timelapse/sessions/{id}/discard", post(session_discard))
        .route("/api/timelapse/unsaved-session", get(unsaved_session))
        .route("/api/system/time", get(system_time_get).post(system_time_set))
        .route("/api/discovery/status", get(discovery_status))
        .route("/api/discovery/cameras", get(discovery_cameras))
        .route("/api/discovery/scan", post(discovery_scan))
        .route("/api/discovery/primary/{uuid}", post(discovery_set_primary))
        .route("/api/discovery/connect", post(discovery_connect))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Bind and run the HTTP server until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    let listen_addr = state.config.listen_addr;
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let bound_addr = listener.local_addr()?;
    tracing::info!(%bound_addr, "control server listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
