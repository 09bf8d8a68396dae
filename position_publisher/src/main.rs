#[warn(clippy::pedantic)]
mod error;
mod movement;

use crate::error::{FetchError, MainError, PublishError};
use crate::movement::{Dwell, DwellTracker, PositionFix, distance_meters};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use roster::GeoPoint;
use shared::error::{ConfigError, InitializationError};
use shared::track::event::{LocationUpdate, publish_url};
use shared::track::feed::{FeedLocation, last_location_url};
use shared::{GatewayConfig, PublisherConfig, load_config, shutdown_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(InitializationError::Tracing)?;

    // Set up config
    let config = load_config().unwrap_or_else(|e| {
        error!(error = ?e, "configuration could not be initialized");
        panic!("configuration could not be initialized");
    });
    let publisher_config = config
        .publisher
        .clone()
        .ok_or(ConfigError::MissingSection("publisher"))
        .map_err(InitializationError::from)?;

    let last_attempted_publish = Arc::new(RwLock::new(None));
    let last_successful_publish = Arc::new(RwLock::new(None));
    let last_error = Arc::new(RwLock::new(None));

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let axum_handle = tokio::spawn(run_health_server(
        publisher_config.bind_address.clone(),
        AxumState {
            last_attempted_publish: Arc::clone(&last_attempted_publish),
            last_successful_publish: Arc::clone(&last_successful_publish),
            last_error: Arc::clone(&last_error),
            stale_after: TimeDelta::seconds(publisher_config.poll_seconds as i64 * 4),
        },
        shutdown_token.clone(),
    ));

    let publisher_handle = tokio::spawn(publisher_loop(
        publisher_config,
        config.gateway,
        last_attempted_publish,
        last_successful_publish,
        last_error,
        shutdown_token.clone(),
    ));

    tokio::select! {
        res = axum_handle => {
            shutdown_token.cancel();
            res??;
        }
        res = publisher_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = signal_handle => {
            shutdown_token.cancel();
            res?;
        }
    }

    Ok(())
}

async fn publisher_loop(
    config: PublisherConfig,
    gateway: GatewayConfig,
    last_attempted_publish: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_successful_publish: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_error: Arc<RwLock<Option<PublishError>>>,
    shutdown: CancellationToken,
) {
    // Default reqwest client
    let http_client = reqwest::Client::new();

    info!(entity_id = config.entity_id, "initialized position publisher");

    match fetch_last_location(&http_client, &gateway.base_url, &config.entity_id).await {
        Ok(Some(location)) => {
            info!(
                latitude = location.latitude,
                longitude = location.longitude,
                recorded_at = %location.recorded_at,
                "loaded last persisted location"
            );
        }
        Ok(None) => debug!("no persisted location for this entity yet"),
        Err(e) => warn!(error = ?e, "could not load last persisted location"),
    }

    let mut dwell_tracker = DwellTracker::new(
        config.stationary_radius_meters,
        TimeDelta::seconds(config.dwell_alert_seconds),
    );
    let mut initial_loop = true;
    let mut previous_timestamp: Option<DateTime<Utc>> = None;
    let mut previous_position: Option<GeoPoint> = None;
    loop {
        if initial_loop {
            initial_loop = false;
        } else {
            tokio::select! {
                _ = sleep(Duration::from_secs(config.poll_seconds)) => {},
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, exiting publisher loop");
                    break;
                }
            }
        }

        let now = Utc::now();
        *last_attempted_publish.write() = Some(now);
        let fix = match fetch_position(&http_client, &config.position_url).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!(error = ?e, "failed to fetch position fix");
                *last_error.write() = Some(e.into());
                continue;
            }
        };

        // A fix without usable coordinates is never published.
        if !fix.latitude.is_finite()
            || !fix.longitude.is_finite()
            || (fix.latitude == 0.0 && fix.longitude == 0.0)
        {
            warn!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                "discarding position fix with unusable coordinates"
            );
            continue;
        }

        // If the provider reports the same fix, continue the loop which will
        // sleep at the top.
        if let Some(previous_timestamp) = previous_timestamp
            && previous_timestamp == fix.recorded_at
        {
            debug!(timestamp = ?previous_timestamp, "found no new position fix");
            *last_successful_publish.write() = Some(now);
            continue;
        }
        previous_timestamp = Some(fix.recorded_at);

        let position = GeoPoint {
            latitude: fix.latitude,
            longitude: fix.longitude,
        };
        if let Some(previous) = previous_position {
            debug!(
                meters = distance_meters(previous, position),
                "distance since previous fix"
            );
        }
        previous_position = Some(position);

        if let Dwell::AlertThresholdCrossed(dwell) = dwell_tracker.observe(position, fix.recorded_at)
        {
            info!(
                seconds = dwell.num_seconds(),
                "stationary past the alert threshold"
            );
        }

        let update = LocationUpdate {
            event_id: Uuid::now_v7(),
            entity_id: config.entity_id.clone(),
            latitude: fix.latitude.to_string(),
            longitude: fix.longitude.to_string(),
            recorded_at: fix.recorded_at,
            display_name: config.display_name.clone(),
        };

        if let Err(e) = publish_event(&http_client, &gateway.base_url, &update).await {
            warn!(error = ?e, "could not publish location event");
            *last_error.write() = Some(e);
            continue;
        } else {
            *last_successful_publish.write() = Some(now);
            debug!(event_id = %update.event_id, "published location event");
        }

        // If shutdown was requested during processing, break after finishing
        // the iteration.
        if shutdown.is_cancelled() {
            info!("shutdown requested, publisher loop exiting after current iteration");
            break;
        }
    }
}

async fn fetch_position(
    client: &reqwest::Client,
    position_url: &str,
) -> Result<PositionFix, FetchError> {
    Ok(client
        .get(position_url)
        .send()
        .await?
        .error_for_status()?
        .json::<PositionFix>()
        .await?)
}

async fn fetch_last_location(
    client: &reqwest::Client,
    base_url: &str,
    entity_id: &str,
) -> Result<Option<FeedLocation>, FetchError> {
    let response = client
        .get(last_location_url(base_url, entity_id))
        .send()
        .await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }

    Ok(Some(
        response.error_for_status()?.json::<FeedLocation>().await?,
    ))
}

async fn publish_event(
    client: &reqwest::Client,
    base_url: &str,
    update: &LocationUpdate,
) -> Result<(), PublishError> {
    client
        .post(publish_url(base_url))
        .json(update)
        .send()
        .await
        .map_err(PublishError::Gateway)?
        .error_for_status()
        .map_err(PublishError::Gateway)?;
    Ok(())
}

#[derive(Clone)]
struct AxumState {
    last_attempted_publish: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_successful_publish: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_error: Arc<RwLock<Option<PublishError>>>,
    stale_after: TimeDelta,
}

async fn run_health_server(
    bind_address: String,
    state: AxumState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(bind_address, "starting axum health server");
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(state);
    let listener = TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

async fn health_check(State(state): State<AxumState>) -> impl IntoResponse {
    let last_attempted_publish = *state.last_attempted_publish.read();
    let last_successful_publish = *state.last_successful_publish.read();
    let last_error = if let Some(e) = state.last_error.read().as_ref() {
        format!("{e:?}")
    } else {
        "unknown".to_string()
    };

    let (Some(last_attempted_publish), Some(last_successful_publish)) =
        (last_attempted_publish, last_successful_publish)
    else {
        return if let Some(last_attempted_publish) = last_attempted_publish {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "No location has been successfully published. Last attempted publish: {last_attempted_publish}. Last error: {last_error}"
                ),
            )
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No attempted or successful publishes".to_string(),
            )
        };
    };

    if (Utc::now() - last_successful_publish) > state.stale_after {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "No location published recently. Last successful publish: {last_successful_publish}. Last attempted publish: {last_attempted_publish}. Last error: {last_error}"
            ),
        )
    } else {
        (
            StatusCode::OK,
            format!("Location last successfully published: {last_successful_publish}"),
        )
    }
}
