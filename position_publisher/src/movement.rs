use chrono::{DateTime, TimeDelta, Utc};
use roster::GeoPoint;
use serde::Deserialize;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A position observation from the position provider.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Great-circle distance between two points (haversine).
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi_a = a.latitude.to_radians();
    let phi_b = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dwell {
    Moving,
    Dwelling(TimeDelta),
    /// Dwell time first crossed the alert threshold; reported once per
    /// stationary period.
    AlertThresholdCrossed(TimeDelta),
}

/// Tracks how long consecutive fixes have stayed within a small radius of an
/// anchor point.
#[derive(Debug)]
pub struct DwellTracker {
    stationary_radius_meters: f64,
    alert_after: TimeDelta,
    anchor: Option<(GeoPoint, DateTime<Utc>)>,
    alerted: bool,
}

impl DwellTracker {
    pub fn new(stationary_radius_meters: f64, alert_after: TimeDelta) -> Self {
        Self {
            stationary_radius_meters,
            alert_after,
            anchor: None,
            alerted: false,
        }
    }

    pub fn observe(&mut self, position: GeoPoint, at: DateTime<Utc>) -> Dwell {
        match self.anchor {
            Some((anchor, since))
                if distance_meters(anchor, position) < self.stationary_radius_meters =>
            {
                let dwell = at - since;
                if dwell >= self.alert_after && !self.alerted {
                    self.alerted = true;
                    Dwell::AlertThresholdCrossed(dwell)
                } else {
                    Dwell::Dwelling(dwell)
                }
            }
            _ => {
                self.anchor = Some((position, at));
                self.alerted = false;
                Dwell::Moving
            }
        }
    }
}
