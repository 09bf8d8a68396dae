use crate::record::{GeoPoint, LocationRecord};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub entity_id: String,
    pub position: GeoPoint,
    pub title: String,
    pub description: String,
}

impl MapMarker {
    pub fn for_record(record: &LocationRecord) -> Self {
        MapMarker {
            entity_id: record.entity_id.clone(),
            position: record.position,
            title: record.display_name.clone(),
            description: format!(
                "{} ({})",
                record.address_label(),
                record.recorded_at.to_rfc3339()
            ),
        }
    }
}

/// Directive for the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOp {
    Retire(String),
    Place(MapMarker),
}

/// Markers currently on the rendering surface, keyed by entity.
///
/// A new observation retires the entity's previous marker before placing the
/// replacement, so the surface never accumulates stale markers.
#[derive(Debug, Default)]
pub struct MarkerBoard {
    placed: HashMap<String, MapMarker>,
}

impl MarkerBoard {
    pub fn place(&mut self, record: &LocationRecord) -> Vec<MarkerOp> {
        let marker = MapMarker::for_record(record);
        let mut ops = Vec::with_capacity(2);

        match self.placed.get(&record.entity_id) {
            Some(existing) if *existing == marker => return ops,
            Some(_) => ops.push(MarkerOp::Retire(record.entity_id.clone())),
            None => {}
        }

        ops.push(MarkerOp::Place(marker.clone()));
        self.placed.insert(record.entity_id.clone(), marker);
        ops
    }

    /// Retires markers for entities no longer present in the snapshot.
    pub fn retire_missing(&mut self, snapshot: &[LocationRecord]) -> Vec<MarkerOp> {
        let mut ops = Vec::new();
        self.placed.retain(|entity_id, _| {
            let present = snapshot.iter().any(|record| record.entity_id == *entity_id);
            if !present {
                ops.push(MarkerOp::Retire(entity_id.clone()));
            }
            present
        });
        ops
    }

    /// Fresh marker list for rendering.
    pub fn markers(&self) -> Vec<MapMarker> {
        self.placed.values().cloned().collect()
    }

    pub fn marker_for(&self, entity_id: &str) -> Option<&MapMarker> {
        self.placed.get(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(entity_id: &str, latitude: f64, longitude: f64) -> LocationRecord {
        LocationRecord {
            entity_id: entity_id.to_string(),
            display_name: entity_id.to_string(),
            position: GeoPoint {
                latitude,
                longitude,
            },
            resolved_address: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn place_retires_prior_marker_first() {
        let mut board = MarkerBoard::default();
        let ops = board.place(&record("u1", 20.6597, -103.3496));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], MarkerOp::Place(_)));

        let ops = board.place(&record("u1", 20.70, -103.40));
        assert_eq!(ops[0], MarkerOp::Retire("u1".to_string()));
        assert!(matches!(ops[1], MarkerOp::Place(_)));
        assert_eq!(board.markers().len(), 1);
    }

    #[test]
    fn identical_placement_is_a_noop() {
        let mut board = MarkerBoard::default();
        let first = record("u1", 20.6597, -103.3496);
        board.place(&first);
        assert!(board.place(&first).is_empty());
        assert_eq!(board.markers().len(), 1);
    }

    #[test]
    fn retire_missing_follows_snapshot() {
        let mut board = MarkerBoard::default();
        board.place(&record("u1", 20.6597, -103.3496));
        board.place(&record("u2", 19.4326, -99.1332));

        let snapshot = vec![record("u2", 19.4326, -99.1332)];
        let ops = board.retire_missing(&snapshot);
        assert_eq!(ops, vec![MarkerOp::Retire("u1".to_string())]);
        assert!(board.marker_for("u1").is_none());
        assert!(board.marker_for("u2").is_some());
    }

    #[test]
    fn marker_description_carries_address_label() {
        let mut with_address = record("u1", 20.6597, -103.3496);
        with_address.resolved_address = Some("Centro, Guadalajara".to_string());
        let marker = MapMarker::for_record(&with_address);
        assert!(marker.description.starts_with("Centro, Guadalajara"));

        let marker = MapMarker::for_record(&record("u2", 20.6597, -103.3496));
        assert!(marker.description.starts_with("Lat: 20.6597, Lon: -103.3496"));
    }
}
