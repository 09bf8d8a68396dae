pub mod geocode;
pub mod markers;
pub mod reconciler;
pub mod record;

pub use reconciler::{IngestError, Ingested, ResolutionTicket, Roster, compute_center};
pub use record::{GeoPoint, LocationRecord};
