use crate::track::event::LocationUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn latest_locations_url(base_url: &str) -> String {
    format!("{}/locations/latest", base_url.trim_end_matches('/'))
}

pub fn last_location_url(base_url: &str, entity_id: &str) -> String {
    format!("{}/locations/{entity_id}/last", base_url.trim_end_matches('/'))
}

/// Latest persisted location per entity, as served by the persistence service.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct FeedRoot {
    pub updated_at: DateTime<Utc>,
    pub locations: Vec<FeedLocation>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct FeedLocation {
    pub entity_id: String,
    pub display_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<FeedLocation> for LocationUpdate {
    fn from(location: FeedLocation) -> Self {
        LocationUpdate {
            event_id: Uuid::now_v7(),
            entity_id: location.entity_id,
            // f64 Display produces the shortest representation that parses
            // back to the same value, so this conversion is lossless.
            latitude: location.latitude.to_string(),
            longitude: location.longitude.to_string(),
            recorded_at: location.recorded_at,
            display_name: location.display_name,
        }
    }
}
