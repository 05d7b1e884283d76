use crate::controller::ControllerEvent;
use crate::hls::{self, HlsRegistry};
use crate::proxy::{self, ProxyState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
    Router,
};
use freeradio_proto::custom_stations::{CustomStations, StationError};
use freeradio_proto::favorites::Favorites;
use freeradio_proto::protocol::{Command, NewStation, PlaybackState, Station, StationPatch};
use freeradio_proto::state::StateManager;
use freeradio_proto::stations::{all_stations, favorite_stations, find_station};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<ControllerEvent>,
    pub favorites: Arc<Favorites>,
    pub custom: Arc<CustomStations>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Serialize)]
struct FavoriteStatus {
    id: String,
    favorite: bool,
}

/// Control API routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(list_stations))
        .route("/api/play/{id}", post(play_station))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/stop", post(stop))
        .route("/api/volume/{percent}", post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/favorites", get(list_favorites))
        .route("/api/favorites/stations", get(list_favorite_stations))
        .route(
            "/api/favorites/{id}",
            put(add_favorite).delete(remove_favorite),
        )
        .route("/api/favorites/{id}/toggle", post(toggle_favorite))
        .route(
            "/api/custom-stations",
            get(list_custom).post(add_custom),
        )
        .route(
            "/api/custom-stations/{id}",
            patch(update_custom).delete(remove_custom),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Everything the daemon serves on its one listener: stream proxy, HLS
/// session feeds and the control API.
pub fn build_app(state: AppState, proxy_state: ProxyState, registry: HlsRegistry) -> Router {
    Router::new()
        .merge(proxy::router(proxy_state))
        .merge(hls::router(registry))
        .merge(api_router(state))
}

pub fn start_server(
    bind_address: String,
    port: u16,
    app: Router,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn dispatch(state: &AppState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(ControllerEvent::Command(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward command, controller is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

fn station_error(e: StationError) -> Response {
    let status = if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else if matches!(e, StationError::NotFound(_)) {
        StatusCode::NOT_FOUND
    } else {
        warn!("HTTP API: custom station store failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, e.to_string()).into_response()
}

fn stations(state: &AppState) -> Vec<Station> {
    all_stations(state.custom.list())
}

// ── playback ─────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<AppState>) -> Json<PlaybackState> {
    Json(state.state_manager.get_state().await)
}

async fn list_stations(State(state): State<AppState>) -> Json<Vec<Station>> {
    Json(stations(&state))
}

async fn play_station(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let all = stations(&state);
    let Some(station) = find_station(&all, &id).cloned() else {
        warn!("HTTP API: play for unknown station {}", id);
        return StatusCode::NOT_FOUND;
    };
    info!("HTTP API: Play {} ({})", station.name, station.id);
    dispatch(&state, Command::Play { station }).await
}

async fn pause(State(state): State<AppState>) -> StatusCode {
    info!("HTTP API: Pause");
    dispatch(&state, Command::Pause).await
}

async fn resume(State(state): State<AppState>) -> StatusCode {
    info!("HTTP API: Resume");
    dispatch(&state, Command::Resume).await
}

async fn stop(State(state): State<AppState>) -> StatusCode {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn set_volume(State(state): State<AppState>, Path(percent): Path<i32>) -> StatusCode {
    let value = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", percent);
    dispatch(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<AppState>) -> Json<VolumeStatus> {
    let volume = state.state_manager.get_state().await.volume;
    Json(VolumeStatus {
        volume: (volume * 100.0).round() as u8,
    })
}

// ── favorites ────────────────────────────────────────────────────────────────

async fn list_favorites(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.favorites.list())
}

async fn list_favorite_stations(State(state): State<AppState>) -> Json<Vec<Station>> {
    Json(favorite_stations(&stations(&state), &state.favorites.list()))
}

async fn add_favorite(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.favorites.add(&id) {
        Ok(()) => Json(state.favorites.list()).into_response(),
        Err(e) => {
            warn!("HTTP API: saving favorites failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn remove_favorite(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.favorites.remove(&id) {
        Ok(()) => Json(state.favorites.list()).into_response(),
        Err(e) => {
            warn!("HTTP API: saving favorites failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn toggle_favorite(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.favorites.toggle(&id) {
        Ok(favorite) => Json(FavoriteStatus { id, favorite }).into_response(),
        Err(e) => {
            warn!("HTTP API: saving favorites failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ── custom stations ──────────────────────────────────────────────────────────

async fn list_custom(State(state): State<AppState>) -> Json<Vec<Station>> {
    Json(state.custom.list())
}

async fn add_custom(State(state): State<AppState>, Json(new): Json<NewStation>) -> Response {
    match state.custom.add(new) {
        Ok(station) => (StatusCode::CREATED, Json(station)).into_response(),
        Err(e) => station_error(e),
    }
}

async fn update_custom(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<StationPatch>,
) -> Response {
    match state.custom.update(&id, patch) {
        Ok(station) => Json(station).into_response(),
        Err(e) => station_error(e),
    }
}

async fn remove_custom(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.custom.remove(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => station_error(StationError::NotFound(id)),
        Err(e) => station_error(e),
    }
}
