use crate::record::GeoPoint;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("geocoder response has no display name")]
    MissingDisplayName,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Reverse-geocoding client for a Nominatim-style `reverse` endpoint.
///
/// Failures are expected and non-fatal; callers fall back to the coordinate
/// label of the record.
#[derive(Debug, Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    reverse_url: String,
}

impl Geocoder {
    pub fn new(client: reqwest::Client, reverse_url: impl Into<String>) -> Self {
        Self {
            client,
            reverse_url: reverse_url.into(),
        }
    }

    pub async fn reverse(&self, position: GeoPoint) -> Result<String, GeocodeError> {
        let response = self
            .client
            .get(&self.reverse_url)
            .query(&[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
                ("format", "jsonv2".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<ReverseResponse>()
            .await?;

        match response.display_name {
            Some(display_name) => {
                debug!(
                    latitude = position.latitude,
                    longitude = position.longitude,
                    "resolved address from geocoder"
                );
                Ok(display_name)
            }
            None => Err(GeocodeError::MissingDisplayName),
        }
    }
}
