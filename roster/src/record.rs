use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Last known location of a tracked entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub entity_id: String,
    pub display_name: String,
    pub position: GeoPoint,
    pub resolved_address: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LocationRecord {
    /// Resolved address if the lookup has completed, coordinate fallback
    /// otherwise. A record never depends on the resolver to be displayable.
    pub fn address_label(&self) -> String {
        match &self.resolved_address {
            Some(address) => address.clone(),
            None => coordinate_label(self.position),
        }
    }
}

pub fn coordinate_label(position: GeoPoint) -> String {
    format!(
        "Lat: {:.4}, Lon: {:.4}",
        position.latitude, position.longitude
    )
}
