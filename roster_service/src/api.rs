use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use roster::markers::{MapMarker, MarkerBoard};
use roster::{GeoPoint, Roster, compute_center};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub roster: Arc<RwLock<Roster>>,
    pub board: Arc<RwLock<MarkerBoard>>,
    pub last_refresh: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub stale_after: TimeDelta,
}

pub async fn run_api_server(
    bind_address: String,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(bind_address, "starting roster API server");
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/roster", get(get_roster))
        .route("/markers", get(get_markers))
        .with_state(state);
    let listener = TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let last_refresh = *state.last_refresh.read();

    let Some(last_refresh) = last_refresh else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "No successful feed refresh yet".to_string(),
        );
    };

    if (Utc::now() - last_refresh) > state.stale_after {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Feed not refreshed recently. Last successful refresh: {last_refresh}"),
        )
    } else {
        (
            StatusCode::OK,
            format!("Feed last successfully refreshed: {last_refresh}"),
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RosterRow {
    entity_id: String,
    name: String,
    location: String,
    address: String,
    seen_at: DateTime<Utc>,
}

async fn get_roster(State(state): State<ApiState>) -> Json<Vec<RosterRow>> {
    let snapshot = state.roster.write().snapshot(Utc::now());
    state.board.write().retire_missing(&snapshot);

    let rows = snapshot
        .iter()
        .map(|record| RosterRow {
            entity_id: record.entity_id.clone(),
            name: record.display_name.clone(),
            location: format!(
                "{:.5}, {:.5}",
                record.position.latitude, record.position.longitude
            ),
            address: record.address_label(),
            seen_at: record.recorded_at,
        })
        .collect();

    Json(rows)
}

#[derive(Deserialize)]
struct MarkerParams {
    /// Entity to center the map on, overriding the default center policy.
    focus: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkersResponse {
    markers: Vec<MapMarker>,
    center: Option<GeoPoint>,
}

async fn get_markers(
    State(state): State<ApiState>,
    Query(params): Query<MarkerParams>,
) -> Json<MarkersResponse> {
    let snapshot = state.roster.write().snapshot(Utc::now());
    let board = {
        let mut board = state.board.write();
        board.retire_missing(&snapshot);
        board.markers()
    };

    let focused = params
        .focus
        .as_deref()
        .and_then(|entity_id| {
            snapshot
                .iter()
                .find(|record| record.entity_id == entity_id)
        })
        .map(|record| record.position);
    let center = focused.or_else(|| compute_center(&snapshot));

    Json(MarkersResponse {
        markers: board,
        center,
    })
}
