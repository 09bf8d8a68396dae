use chrono::{TimeDelta, Utc};
use roster::markers::{MarkerBoard, MarkerOp};
use roster::{Roster, compute_center};
use shared::track::event::LocationUpdate;
use uuid::Uuid;

fn update(entity_id: &str, latitude: &str, longitude: &str, name: &str) -> LocationUpdate {
    LocationUpdate {
        event_id: Uuid::now_v7(),
        entity_id: entity_id.to_string(),
        latitude: latitude.to_string(),
        longitude: longitude.to_string(),
        recorded_at: Utc::now(),
        display_name: Some(name.to_string()),
    }
}

#[test]
fn event_sequence_reconciles_to_one_marker_per_entity() {
    let mut roster = Roster::new(TimeDelta::minutes(10));
    let mut board = MarkerBoard::default();

    let sequence = [
        update("u1", "20.6597", "-103.3496", "Ana"),
        update("u2", "19.4326", "-99.1332", "Luis"),
        update("u1", "20.70", "-103.40", "Ana"),
        update("u2", "19.4326", "-99.1332", "Luis"),
    ];

    for event in &sequence {
        let ingested = roster.ingest(event).expect("valid coordinates");
        board.place(&ingested.record);
    }

    let snapshot = roster.snapshot(Utc::now());
    assert_eq!(snapshot.len(), 2);
    assert_eq!(board.markers().len(), 2);

    let u1 = board.marker_for("u1").expect("u1 marker placed");
    assert_eq!(u1.position.latitude, 20.70);
    assert_eq!(u1.position.longitude, -103.40);

    let center = compute_center(&snapshot).expect("non-empty snapshot");
    assert_eq!(center, snapshot[0].position);
}

#[test]
fn eviction_flows_through_to_the_marker_surface() {
    let mut roster = Roster::new(TimeDelta::seconds(60));
    let mut board = MarkerBoard::default();
    let now = Utc::now();

    let mut stale = update("u1", "20.6597", "-103.3496", "Ana");
    stale.recorded_at = now - TimeDelta::seconds(300);
    let fresh = update("u2", "19.4326", "-99.1332", "Luis");

    for event in [&stale, &fresh] {
        let ingested = roster.ingest(event).expect("valid coordinates");
        board.place(&ingested.record);
    }

    let snapshot = roster.snapshot(now);
    let ops = board.retire_missing(&snapshot);
    assert_eq!(ops, vec![MarkerOp::Retire("u1".to_string())]);
    assert_eq!(board.markers().len(), 1);
}

#[test]
fn resolved_address_updates_the_marker_description() {
    let mut roster = Roster::new(TimeDelta::minutes(10));
    let mut board = MarkerBoard::default();

    let ingested = roster
        .ingest(&update("u1", "20.6597", "-103.3496", "Ana"))
        .expect("valid coordinates");
    board.place(&ingested.record);

    let ticket = ingested.resolution.expect("fresh position needs a lookup");
    let applied = roster.apply_resolved_address(&ticket, "Centro, Guadalajara".to_string());
    assert!(applied.is_some());

    let snapshot = roster.snapshot(Utc::now());
    let ops = board.place(&snapshot[0]);
    assert_eq!(ops.len(), 2, "marker is retired and re-placed");
    let marker = board.marker_for("u1").expect("marker still present");
    assert!(marker.description.starts_with("Centro, Guadalajara"));
}
