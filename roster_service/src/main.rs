#[warn(clippy::pedantic)]
mod api;
mod error;
mod subscription;

use crate::api::{ApiState, run_api_server};
use crate::error::{RefreshError, ServiceError};
use crate::subscription::EventSubscription;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use roster::Roster;
use roster::geocode::Geocoder;
use roster::markers::{MarkerBoard, MarkerOp};
use shared::error::{ConfigError, InitializationError};
use shared::track::event::LocationUpdate;
use shared::track::feed::{FeedRoot, latest_locations_url};
use shared::{load_config, shutdown_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, event_enabled, info, warn};
use tracing_subscriber::EnvFilter;

const USER_AGENT: &str = concat!("fieldtrack/", env!("CARGO_PKG_VERSION"));
// Must exceed the subscription long-poll wait.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct ServiceState {
    roster: Arc<RwLock<Roster>>,
    board: Arc<RwLock<MarkerBoard>>,
    geocoder: Geocoder,
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(InitializationError::from)?;

    // Set up config
    let config = load_config().map_err(InitializationError::from)?;
    let roster_config = config
        .roster
        .clone()
        .ok_or(ConfigError::MissingSection("roster"))
        .map_err(InitializationError::from)?;

    let http_client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()?;

    let state = ServiceState {
        roster: Arc::new(RwLock::new(Roster::new(TimeDelta::seconds(
            roster_config.entry_ttl_seconds,
        )))),
        board: Arc::new(RwLock::new(MarkerBoard::default())),
        geocoder: Geocoder::new(http_client.clone(), config.gateway.geocoder_url.clone()),
    };
    let last_refresh = Arc::new(RwLock::new(None));

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let api_state = ApiState {
        roster: Arc::clone(&state.roster),
        board: Arc::clone(&state.board),
        last_refresh: Arc::clone(&last_refresh),
        stale_after: TimeDelta::seconds(roster_config.refresh_seconds as i64 * 4),
    };
    let api_handle = tokio::spawn(run_api_server(
        roster_config.bind_address.clone(),
        api_state,
        shutdown_token.clone(),
    ));

    let refresh_handle = tokio::spawn(refresh_loop(
        http_client.clone(),
        config.gateway.base_url.clone(),
        roster_config.refresh_seconds,
        state.clone(),
        Arc::clone(&last_refresh),
        shutdown_token.clone(),
    ));

    let event_handle = tokio::spawn(event_loop(
        http_client,
        config.gateway.base_url,
        state,
        shutdown_token.clone(),
    ));

    tokio::select! {
        res = api_handle => {
            shutdown_token.cancel();
            res??;
        }
        res = refresh_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = event_handle => {
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

/// Periodic full refresh from the latest-locations feed, the fallback path
/// that also catches entities whose events were missed.
async fn refresh_loop(
    http_client: reqwest::Client,
    base_url: String,
    refresh_seconds: u64,
    state: ServiceState,
    last_refresh: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown: CancellationToken,
) {
    info!("initialized roster feed refresh");
    let mut initial_loop = true;
    let mut previous_timestamp: Option<DateTime<Utc>> = None;
    loop {
        if initial_loop {
            initial_loop = false;
        } else {
            tokio::select! {
                _ = sleep(Duration::from_secs(refresh_seconds)) => {},
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, exiting refresh loop");
                    break;
                }
            }
        }

        let feed = match fetch_latest(&http_client, &base_url).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(error = ?e, "failed to fetch latest locations feed");
                continue;
            }
        };

        // If nothing changed, skip reconciliation but count the refresh as
        // successful for health reporting.
        if let Some(previous) = previous_timestamp
            && previous == feed.updated_at
        {
            debug!(timestamp = ?previous, "found no change to locations feed");
            *last_refresh.write() = Some(Utc::now());
            continue;
        }
        previous_timestamp = Some(feed.updated_at);

        for location in feed.locations {
            ingest_update(&state, &LocationUpdate::from(location));
        }

        let now = Utc::now();
        let snapshot = state.roster.write().snapshot(now);
        let retired = state.board.write().retire_missing(&snapshot);
        if !retired.is_empty() {
            debug!(count = retired.len(), "retired markers for inactive entities");
        }
        *last_refresh.write() = Some(now);
    }
}

async fn fetch_latest(client: &reqwest::Client, base_url: &str) -> Result<FeedRoot, RefreshError> {
    Ok(client
        .get(latest_locations_url(base_url))
        .send()
        .await?
        .error_for_status()?
        .json::<FeedRoot>()
        .await?)
}

/// Push path: long-polls the event subscription and merges every delivered
/// update into the roster.
async fn event_loop(
    http_client: reqwest::Client,
    base_url: String,
    state: ServiceState,
    shutdown: CancellationToken,
) {
    let mut subscription = match EventSubscription::open(&http_client, &base_url).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(
                error = ?e,
                "could not subscribe to location events, continuing with periodic refresh only"
            );
            shutdown.cancelled().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, exiting event loop");
                break;
            }
            received = subscription.recv() => match received {
                Ok(events) => {
                    for event in &events {
                        ingest_update(&state, event);
                    }
                }
                Err(e) => {
                    warn!(error = ?e, "error polling event subscription");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    if let Err(e) = subscription.close().await {
        warn!(error = ?e, "failed to close event subscription");
    }
}

/// Merges one update into the roster and the marker board, then kicks off the
/// address lookup when the reconciler asked for one. The lookup runs on its
/// own task and applies through the ticket guard, so a slow response for an
/// old position can never clobber a newer one.
fn ingest_update(state: &ServiceState, update: &LocationUpdate) {
    let ingested = match state.roster.write().ingest(update) {
        Ok(ingested) => ingested,
        Err(e) => {
            warn!(
                error = %e,
                entity_id = update.entity_id,
                event_id = %update.event_id,
                "skipping location update with invalid coordinates"
            );
            return;
        }
    };

    let ops = state.board.write().place(&ingested.record);
    if event_enabled!(Level::DEBUG) {
        for op in &ops {
            match op {
                MarkerOp::Retire(entity_id) => debug!(entity_id, "retired marker"),
                MarkerOp::Place(marker) => {
                    debug!(entity_id = marker.entity_id, "placed marker");
                }
            }
        }
    }

    if let Some(ticket) = ingested.resolution {
        let state = state.clone();
        tokio::spawn(async move {
            match state.geocoder.reverse(ticket.position).await {
                Ok(address) => {
                    let applied = state.roster.write().apply_resolved_address(&ticket, address);
                    if let Some(record) = applied {
                        state.board.write().place(&record);
                    }
                }
                Err(e) => {
                    debug!(
                        error = %e,
                        entity_id = ticket.entity_id,
                        "address lookup failed, keeping coordinate label"
                    );
                }
            }
        });
    }
}
