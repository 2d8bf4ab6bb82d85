/**
 * API REST SERRA - Serveur HTTP du kernel télémétrie
 *
 * RÔLE :
 * Expose l'état des modules (santé, statuts capteurs, trous de données)
 * et les commandes de configuration. Interface entre dashboard/CLI et le
 * pipeline d'ingestion.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum sur port 8080 avec middleware auth API key
 * - Routes organisées : /health, /devices, /manifests, /system, /ws
 * - /ws relaie le flux temps réel du broadcaster
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sauf /health et /ws
 * - Validation côté middleware avant traitement métier
 */

use crate::broadcast::Broadcaster;
use crate::health::{build_sensor_statuses, DataGap, DeviceHealthView, GapStats, HealthService,
    SensorStatusView, UnhealthyDevice};
use crate::publisher::ConfigPublisher;
use crate::registry::{ModuleManifest, ModuleRegistry};
use crate::repository::{DeviceHardwareRow, DeviceSystemStatusRow, Repository, RepositoryError};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub registry: Arc<ModuleRegistry>,
    pub health: Arc<HealthService>,
    pub publisher: Arc<ConfigPublisher>,
    pub broadcaster: Broadcaster,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check et flux temps réel toujours accessibles
    if path.starts_with("/health") || path.starts_with("/ws") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("SERRA_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        eprintln!("SECURITY: SERRA_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/health", get(get_device_health))
        .route("/devices/{id}/gaps", get(get_device_gaps))
        .route("/devices/{id}/sensors/status", get(get_sensor_statuses))
        .route(
            "/devices/{id}/sensors/config",
            get(get_sensor_configs).put(update_sensor_config),
        )
        .route("/devices/{id}/sensors/{sensor}/reset", post(reset_sensor))
        .route("/devices/{id}/sensors/enable", post(set_sensor_enabled))
        .route("/system/devices/unhealthy", get(list_unhealthy_devices))
        .route("/system/gaps/stats", get(get_gap_stats))
        .route("/manifests", get(list_manifests))
        .route("/manifests/{id}", get(get_manifest))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

fn internal(e: RepositoryError) -> StatusCode {
    eprintln!("[http] store error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

// ============ DEVICES ============

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceView {
    module_id: String,
    name: Option<String>,
    module_type: Option<String>,
    ip: Option<String>,
    mac: Option<String>,
    rssi: Option<i32>,
    booted_at: Option<String>,
    updated_at: String, // RFC3339 pour l'API
}

fn to_device_view(row: &DeviceSystemStatusRow) -> DeviceView {
    DeviceView {
        module_id: row.module_id.clone(),
        name: row.name.clone(),
        module_type: row.module_type.clone(),
        ip: row.ip.clone(),
        mac: row.mac.clone(),
        rssi: row.rssi,
        booted_at: row.booted_at.and_then(|t| t.format(&Rfc3339).ok()),
        updated_at: row.updated_at.format(&Rfc3339).unwrap_or_default(),
    }
}

// GET /devices (liste)
async fn list_devices(State(app): State<AppState>) -> Result<Json<Vec<DeviceView>>, StatusCode> {
    let mut views = Vec::new();
    for module_id in app.repo.list_module_ids().await.map_err(internal)? {
        if let Some(row) = app.repo.get_system_status(&module_id).await.map_err(internal)? {
            views.push(to_device_view(&row));
        }
    }
    Ok(Json(views))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDetailView {
    #[serde(flatten)]
    device: DeviceView,
    heap_free_kb: Option<i64>,
    heap_min_free_kb: Option<i64>,
    flash_used_kb: Option<i64>,
    flash_free_kb: Option<i64>,
    hardware: Option<DeviceHardwareRow>,
}

// GET /devices/{id} (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceDetailView>, StatusCode> {
    let Some(row) = app.repo.get_system_status(&id).await.map_err(internal)? else {
        return Err(StatusCode::NOT_FOUND);
    };
    let hardware = app.repo.get_hardware_info(&id).await.map_err(internal)?;
    Ok(Json(DeviceDetailView {
        device: to_device_view(&row),
        heap_free_kb: row.heap_free_kb,
        heap_min_free_kb: row.heap_min_free_kb,
        flash_used_kb: row.flash_used_kb,
        flash_free_kb: row.flash_free_kb,
        hardware,
    }))
}

// GET /devices/{id}/health
async fn get_device_health(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceHealthView>, StatusCode> {
    app.health.device_health(&id).await.map(Json).map_err(internal)
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    hours: Option<i64>,
}

// GET /devices/{id}/gaps?hours=24
async fn get_device_gaps(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<DataGap>>, StatusCode> {
    let hours = params.hours.unwrap_or(24).clamp(1, 24 * 30);
    app.health.module_gaps(&id, hours).await.map(Json).map_err(internal)
}

// ============ CAPTEURS ============

// GET /devices/{id}/sensors/status
async fn get_sensor_statuses(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HashMap<String, SensorStatusView>>, StatusCode> {
    let statuses = app.repo.get_sensor_status(&id).await.map_err(internal)?;
    let configs = app.repo.get_sensor_configs(&id).await.map_err(internal)?;
    Ok(Json(build_sensor_statuses(
        &statuses,
        &configs,
        OffsetDateTime::now_utc(),
    )))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorConfigView {
    sensor_type: String,
    interval_seconds: Option<u32>,
    model: Option<String>,
    enabled: bool,
}

// GET /devices/{id}/sensors/config
async fn get_sensor_configs(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SensorConfigView>>, StatusCode> {
    let rows = app.repo.get_sensor_configs(&id).await.map_err(internal)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| SensorConfigView {
                sensor_type: r.sensor_type,
                interval_seconds: r.interval_seconds,
                model: r.model,
                enabled: r.enabled,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfigBody {
    hardware: String,
    interval_seconds: u32,
}

// PUT /devices/{id}/sensors/config
// Le changement arrive au niveau hardware, le manifest le développe en
// clés composites par capteur. Store d'abord, puis publication MQTT.
async fn update_sensor_config(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateConfigBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let module_type = app
        .repo
        .get_system_status(&id)
        .await
        .map_err(internal)?
        .and_then(|r| r.module_type);

    let expanded = module_type
        .as_deref()
        .map(|t| app.registry.expand_hardware_config(t, &body.hardware, body.interval_seconds))
        .unwrap_or_default();

    // Type de module ou hardware hors manifest : clé nue en legacy
    let entries: Vec<(String, u32)> = if expanded.is_empty() {
        vec![(body.hardware.clone(), body.interval_seconds)]
    } else {
        expanded
    };

    let mut data = crate::models::SensorsConfigData::new();
    for (sensor_type, interval) in &entries {
        data.insert(
            sensor_type.clone(),
            crate::models::SensorConfigEntry {
                interval: Some(*interval),
                model: None,
            },
        );
    }
    app.repo.upsert_sensor_config(&id, &data).await.map_err(internal)?;

    let configs = app
        .repo
        .get_enabled_sensor_configs_by_module()
        .await
        .map_err(internal)?;
    if let Some(config) = configs.get(&id) {
        if let Err(e) = app.publisher.publish_config(&id, config).await {
            eprintln!("[http] config publish failed for {id}: {e:?}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    Ok(Json(serde_json::json!({
        "ok": true,
        "updated": entries.len(),
    })))
}

// POST /devices/{id}/sensors/{sensor}/reset
async fn reset_sensor(
    State(app): State<AppState>,
    Path((id, sensor)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = app.publisher.publish_reset(&id, &sensor).await {
        eprintln!("[http] reset publish failed for {id}/{sensor}: {e:?}");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct EnableBody {
    hardware: String,
    enabled: bool,
}

// POST /devices/{id}/sensors/enable
async fn set_sensor_enabled(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnableBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let touched = app
        .repo
        .set_sensor_enabled(&id, &body.hardware, body.enabled)
        .await
        .map_err(internal)?;

    if let Err(e) = app
        .publisher
        .publish_enable(&id, &body.hardware, body.enabled)
        .await
    {
        eprintln!("[http] enable publish failed for {id}: {e:?}");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(serde_json::json!({ "ok": true, "touched": touched })))
}

// ============ SYSTÈME ============

// GET /system/devices/unhealthy
async fn list_unhealthy_devices(
    State(app): State<AppState>,
) -> Result<Json<Vec<UnhealthyDevice>>, StatusCode> {
    app.health.unhealthy_devices().await.map(Json).map_err(internal)
}

// GET /system/gaps/stats?hours=24
async fn get_gap_stats(
    State(app): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<GapStats>, StatusCode> {
    let hours = params.hours.unwrap_or(24).clamp(1, 24 * 30);
    app.health.gap_stats(hours).await.map(Json).map_err(internal)
}

// ============ MANIFESTS ============

// GET /manifests (types de modules connus)
async fn list_manifests(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.registry.module_types())
}

// GET /manifests/{id}
async fn get_manifest(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModuleManifest>, StatusCode> {
    match app.registry.get_manifest(&id) {
        Some(manifest) => Ok(Json(manifest.clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// ============ TEMPS RÉEL ============

// GET /ws : chaque message MQTT traité est relayé en JSON
async fn ws_handler(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| forward_live_updates(socket, app.broadcaster.clone()))
}

async fn forward_live_updates(mut socket: WebSocket, broadcaster: Broadcaster) {
    let mut rx = broadcaster.subscribe();
    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok(update) => {
                        let Ok(txt) = serde_json::to_string(&update) else { continue };
                        if socket.send(Message::Text(txt.into())).await.is_err() {
                            break;
                        }
                    }
                    // Client trop lent : on saute les messages perdus,
                    // le flux continue
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        eprintln!("[ws] client lagged, {skipped} updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                // Le flux est unidirectionnel : on ne lit que pour
                // détecter la déconnexion
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
