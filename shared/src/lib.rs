pub mod track;

use crate::error::ConfigError;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const ENV_VAR_PREFIX: &str = "FIELDTRACK__";
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub roster: Option<RosterConfig>,
    pub publisher: Option<PublisherConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the platform event gateway and latest-locations feed.
    pub base_url: String,
    /// Reverse-geocoding endpoint (Nominatim-style `reverse` resource).
    pub geocoder_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RosterConfig {
    pub refresh_seconds: u64,
    pub entry_ttl_seconds: i64,
    pub bind_address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    pub entity_id: String,
    pub display_name: Option<String>,
    /// Position provider endpoint returning the current fix.
    pub position_url: String,
    pub poll_seconds: u64,
    /// Movement below this distance counts as standing still.
    pub stationary_radius_meters: f64,
    pub dwell_alert_seconds: i64,
    pub bind_address: String,
}

pub fn load_config() -> Result<Config, ConfigError> {
    Ok(Figment::new()
        .merge(Toml::file(SETTINGS_FILE))
        .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
        .extract::<Config>()?)
}

pub mod error {
    use thiserror::Error;
    use tracing::dispatcher::SetGlobalDefaultError;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load configuration: {0}")]
        Figment(#[from] figment::Error),
        #[error("missing configuration section [{0}]")]
        MissingSection(&'static str),
    }

    #[derive(Debug, Error)]
    pub enum InitializationError {
        #[error(transparent)]
        Tracing(#[from] SetGlobalDefaultError),
        #[error(transparent)]
        Config(#[from] ConfigError),
    }
}

pub async fn shutdown_listener(token: Option<CancellationToken>) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal, shutting down"),
        _ = terminate => info!("received SIGTERM signal, shutting down"),
    }

    if let Some(token) = token {
        token.cancel();
    }
}
