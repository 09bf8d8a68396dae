use crate::record::{GeoPoint, LocationRecord};
use chrono::{DateTime, TimeDelta, Utc};
use shared::track::event::LocationUpdate;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("latitude {0:?} does not parse as a finite number")]
    Latitude(String),
    #[error("longitude {0:?} does not parse as a finite number")]
    Longitude(String),
}

/// Claim on the address-resolution slot of one entity at one position.
///
/// A ticket is only honored while it still carries the entity's newest
/// sequence number, so a slow resolver response for an old position can never
/// overwrite the address of a newer one.
#[derive(Debug, Clone)]
pub struct ResolutionTicket {
    pub entity_id: String,
    pub position: GeoPoint,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct Ingested {
    pub record: LocationRecord,
    /// Present when the caller should run an address lookup for this update.
    pub resolution: Option<ResolutionTicket>,
}

#[derive(Debug, Clone)]
struct Slot {
    record: LocationRecord,
    seq: u64,
}

/// Mapping from entity id to its most recent location.
///
/// One record per entity, latest observation wins. Entries not refreshed
/// within `entry_ttl` are evicted on the next snapshot.
#[derive(Debug)]
pub struct Roster {
    entries: HashMap<String, Slot>,
    entry_ttl: TimeDelta,
    next_seq: u64,
}

impl Roster {
    pub fn new(entry_ttl: TimeDelta) -> Self {
        Self {
            entries: HashMap::new(),
            entry_ttl,
            next_seq: 0,
        }
    }

    /// Merges one observation into the roster.
    ///
    /// Coordinates must parse as finite numbers; anything else is rejected
    /// without touching the roster. The prior record for the entity, if any,
    /// is replaced wholesale. A previously resolved address survives only
    /// while the position is unchanged.
    pub fn ingest(&mut self, update: &LocationUpdate) -> Result<Ingested, IngestError> {
        let position = parse_position(&update.latitude, &update.longitude)?;
        let display_name = update
            .display_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| update.entity_id.clone());

        let (seq, resolved_address) = match self.entries.get(&update.entity_id) {
            Some(slot) if slot.record.position == position => {
                (slot.seq, slot.record.resolved_address.clone())
            }
            _ => {
                self.next_seq += 1;
                (self.next_seq, None)
            }
        };

        let record = LocationRecord {
            entity_id: update.entity_id.clone(),
            display_name,
            position,
            resolved_address,
            recorded_at: update.recorded_at,
        };

        // A lookup is still wanted for a stationary entity whose previous
        // resolution never completed; the unchanged sequence number keeps
        // either response valid.
        let resolution = record.resolved_address.is_none().then(|| ResolutionTicket {
            entity_id: record.entity_id.clone(),
            position,
            seq,
        });

        trace!(
            entity_id = record.entity_id,
            latitude = position.latitude,
            longitude = position.longitude,
            "ingested location update"
        );

        self.entries.insert(
            update.entity_id.clone(),
            Slot {
                record: record.clone(),
                seq,
            },
        );

        Ok(Ingested { record, resolution })
    }

    /// Applies a completed address lookup, unless the entity has moved (or
    /// been evicted) since the ticket was issued. Returns the updated record
    /// when the address was applied.
    pub fn apply_resolved_address(
        &mut self,
        ticket: &ResolutionTicket,
        address: String,
    ) -> Option<LocationRecord> {
        match self.entries.get_mut(&ticket.entity_id) {
            Some(slot) if slot.seq == ticket.seq => {
                slot.record.resolved_address = Some(address);
                Some(slot.record.clone())
            }
            Some(_) => {
                debug!(
                    entity_id = ticket.entity_id,
                    "discarding stale address resolution"
                );
                None
            }
            None => {
                debug!(
                    entity_id = ticket.entity_id,
                    "discarding address resolution for evicted entity"
                );
                None
            }
        }
    }

    /// Evicts entries older than the time-to-live, then returns an
    /// independent copy of the current records. Ordering follows the map's
    /// iteration at call time and is not insertion-stable across ingests.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Vec<LocationRecord> {
        let ttl = self.entry_ttl;
        self.entries.retain(|entity_id, slot| {
            let fresh = now - slot.record.recorded_at <= ttl;
            if !fresh {
                debug!(
                    entity_id,
                    recorded_at = %slot.record.recorded_at,
                    "evicting stale roster entry"
                );
            }
            fresh
        });

        self.entries
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Center of the rendered view: the first record of the current list.
pub fn compute_center(records: &[LocationRecord]) -> Option<GeoPoint> {
    records.first().map(|record| record.position)
}

// pub fn compute_center(records: &[LocationRecord]) -> Option<GeoPoint> {
//     if records.is_empty() {
//         return None;
//     }
//     let count = records.len() as f64;
//     let latitude = records.iter().map(|r| r.position.latitude).sum::<f64>() / count;
//     let longitude = records.iter().map(|r| r.position.longitude).sum::<f64>() / count;
//     Some(GeoPoint {
//         latitude,
//         longitude,
//     })
// }

fn parse_position(latitude: &str, longitude: &str) -> Result<GeoPoint, IngestError> {
    let lat: f64 = latitude
        .trim()
        .parse()
        .map_err(|_| IngestError::Latitude(latitude.to_string()))?;
    if !lat.is_finite() {
        return Err(IngestError::Latitude(latitude.to_string()));
    }

    let lon: f64 = longitude
        .trim()
        .parse()
        .map_err(|_| IngestError::Longitude(longitude.to_string()))?;
    if !lon.is_finite() {
        return Err(IngestError::Longitude(longitude.to_string()));
    }

    Ok(GeoPoint {
        latitude: lat,
        longitude: lon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn update(
        entity_id: &str,
        latitude: &str,
        longitude: &str,
        recorded_at: DateTime<Utc>,
        display_name: Option<&str>,
    ) -> LocationUpdate {
        LocationUpdate {
            event_id: Uuid::now_v7(),
            entity_id: entity_id.to_string(),
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            recorded_at,
            display_name: display_name.map(str::to_string),
        }
    }

    fn roster() -> Roster {
        Roster::new(TimeDelta::minutes(10))
    }

    #[test]
    fn one_record_per_entity_with_latest_values() {
        let mut roster = roster();
        let now = Utc::now();
        roster
            .ingest(&update("u1", "20.6597", "-103.3496", now, Some("Ana")))
            .unwrap();
        roster
            .ingest(&update("u2", "19.4326", "-99.1332", now, Some("Luis")))
            .unwrap();
        roster
            .ingest(&update("u3", "25.6866", "-100.3161", now, None))
            .unwrap();

        let snapshot = roster.snapshot(now);
        assert_eq!(snapshot.len(), 3);
        let u3 = snapshot.iter().find(|r| r.entity_id == "u3").unwrap();
        assert_eq!(u3.display_name, "u3");
        assert_eq!(u3.position.latitude, 25.6866);
    }

    #[test]
    fn reingest_replaces_without_growth() {
        let mut roster = roster();
        let t1 = Utc::now();
        let t2 = t1 + TimeDelta::seconds(30);
        roster
            .ingest(&update("u1", "20.6597", "-103.3496", t1, Some("Ana")))
            .unwrap();
        roster
            .ingest(&update("u1", "20.70", "-103.40", t2, Some("Ana")))
            .unwrap();

        assert_eq!(roster.len(), 1);
        let snapshot = roster.snapshot(t2);
        assert_eq!(snapshot[0].position.latitude, 20.70);
        assert_eq!(snapshot[0].position.longitude, -103.40);
        assert_eq!(snapshot[0].recorded_at, t2);
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let mut roster = roster();
        let now = Utc::now();
        assert!(matches!(
            roster.ingest(&update("u1", "NaN", "-103.3496", now, None)),
            Err(IngestError::Latitude(_))
        ));
        assert!(matches!(
            roster.ingest(&update("u1", "20.6597", "not a number", now, None)),
            Err(IngestError::Longitude(_))
        ));
        assert!(matches!(
            roster.ingest(&update("u1", "", "-103.3496", now, None)),
            Err(IngestError::Latitude(_))
        ));
        assert!(matches!(
            roster.ingest(&update("u1", "inf", "-103.3496", now, None)),
            Err(IngestError::Latitude(_))
        ));
        assert!(roster.is_empty());
    }

    #[test]
    fn unresolved_record_displays_coordinate_fallback() {
        let mut roster = roster();
        let now = Utc::now();
        let ingested = roster
            .ingest(&update("u1", "20.6597", "-103.3496", now, Some("Ana")))
            .unwrap();

        assert!(ingested.resolution.is_some());
        assert_eq!(
            ingested.record.address_label(),
            "Lat: 20.6597, Lon: -103.3496"
        );
    }

    #[test]
    fn resolution_applies_only_while_current() {
        let mut roster = roster();
        let t1 = Utc::now();
        let t2 = t1 + TimeDelta::seconds(5);
        let first = roster
            .ingest(&update("u1", "20.6597", "-103.3496", t1, Some("Ana")))
            .unwrap();
        let second = roster
            .ingest(&update("u1", "20.70", "-103.40", t2, Some("Ana")))
            .unwrap();

        let stale = first.resolution.unwrap();
        let current = second.resolution.unwrap();
        assert!(
            roster
                .apply_resolved_address(&stale, "Centro, Guadalajara".to_string())
                .is_none()
        );
        let applied = roster
            .apply_resolved_address(&current, "Zapopan".to_string())
            .unwrap();
        assert_eq!(applied.resolved_address.as_deref(), Some("Zapopan"));

        let snapshot = roster.snapshot(t2);
        assert_eq!(snapshot[0].resolved_address.as_deref(), Some("Zapopan"));
    }

    #[test]
    fn stationary_reingest_keeps_resolved_address() {
        let mut roster = roster();
        let t1 = Utc::now();
        let t2 = t1 + TimeDelta::seconds(30);
        let first = roster
            .ingest(&update("u1", "20.6597", "-103.3496", t1, Some("Ana")))
            .unwrap();
        assert!(
            roster
                .apply_resolved_address(&first.resolution.unwrap(), "Centro".to_string())
                .is_some()
        );

        let second = roster
            .ingest(&update("u1", "20.6597", "-103.3496", t2, Some("Ana")))
            .unwrap();
        assert!(second.resolution.is_none());
        assert_eq!(second.record.resolved_address.as_deref(), Some("Centro"));
        assert_eq!(second.record.recorded_at, t2);
    }

    #[test]
    fn stationary_reingest_retries_failed_resolution() {
        let mut roster = roster();
        let t1 = Utc::now();
        let t2 = t1 + TimeDelta::seconds(30);
        // First lookup never completed; the retry ticket must still be valid.
        roster
            .ingest(&update("u1", "20.6597", "-103.3496", t1, Some("Ana")))
            .unwrap();
        let retry = roster
            .ingest(&update("u1", "20.6597", "-103.3496", t2, Some("Ana")))
            .unwrap();

        let ticket = retry.resolution.unwrap();
        assert!(
            roster
                .apply_resolved_address(&ticket, "Centro".to_string())
                .is_some()
        );
    }

    #[test]
    fn snapshot_evicts_stale_entries() {
        let mut roster = Roster::new(TimeDelta::seconds(60));
        let now = Utc::now();
        roster
            .ingest(&update(
                "u1",
                "20.6597",
                "-103.3496",
                now - TimeDelta::seconds(120),
                Some("Ana"),
            ))
            .unwrap();
        roster
            .ingest(&update("u2", "19.4326", "-99.1332", now, Some("Luis")))
            .unwrap();

        let snapshot = roster.snapshot(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].entity_id, "u2");
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn snapshot_returns_independent_copies() {
        let mut roster = roster();
        let now = Utc::now();
        roster
            .ingest(&update("u1", "20.6597", "-103.3496", now, Some("Ana")))
            .unwrap();

        let mut first = roster.snapshot(now);
        first[0].display_name = "mutated".to_string();
        let second = roster.snapshot(now);
        assert_eq!(second[0].display_name, "Ana");
    }

    #[test]
    fn center_of_empty_snapshot_is_none() {
        assert!(compute_center(&[]).is_none());
    }

    #[test]
    fn center_is_first_record() {
        let mut roster = roster();
        let now = Utc::now();
        roster
            .ingest(&update("u1", "20.6597", "-103.3496", now, Some("Ana")))
            .unwrap();
        let snapshot = roster.snapshot(now);

        let center = compute_center(&snapshot).unwrap();
        assert_eq!(center, snapshot[0].position);
    }
}
