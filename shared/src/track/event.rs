use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel the gateway publishes location updates on.
pub const LOCATION_CHANNEL: &str = "location_update";

pub fn publish_url(base_url: &str) -> String {
    format!("{}/events/{LOCATION_CHANNEL}", base_url.trim_end_matches('/'))
}

pub fn subscribe_url(base_url: &str) -> String {
    format!(
        "{}/events/{LOCATION_CHANNEL}/subscriptions",
        base_url.trim_end_matches('/')
    )
}

pub fn poll_url(base_url: &str, subscription_id: Uuid, cursor: u64, wait_seconds: u64) -> String {
    format!(
        "{}/events/{LOCATION_CHANNEL}/subscriptions/{subscription_id}?cursor={cursor}&wait={wait_seconds}",
        base_url.trim_end_matches('/')
    )
}

pub fn unsubscribe_url(base_url: &str, subscription_id: Uuid) -> String {
    format!(
        "{}/events/{LOCATION_CHANNEL}/subscriptions/{subscription_id}",
        base_url.trim_end_matches('/')
    )
}

/// A single location observation as carried on the event channel.
///
/// Event fields are text on the wire; coordinates are parsed and validated at
/// the point of ingest, not here.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct LocationUpdate {
    pub event_id: Uuid,
    pub entity_id: String,
    pub latitude: String,
    pub longitude: String,
    pub recorded_at: DateTime<Utc>,
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct SubscribeAck {
    pub subscription_id: Uuid,
    pub cursor: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct EventBatch {
    pub cursor: u64,
    pub events: Vec<LocationUpdate>,
}
