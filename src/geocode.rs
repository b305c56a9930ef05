//! Place names for route centroids.
//!
//! Naming a route is a convenience for the locations report, never a
//! requirement of the run: every geocoder answers with a name, falling back
//! to [`UNKNOWN_LOCATION`] whenever a lookup is unavailable or fails.

use crate::GpsPoint;

/// Name reported when no place name could be resolved.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Turns a coordinate into a human-readable place name.
pub trait ReverseGeocoder {
    /// Never fails; unresolvable points get [`UNKNOWN_LOCATION`].
    fn place_name(&self, point: &GpsPoint) -> String;
}

/// Geocoder that never leaves the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGeocoder;

impl ReverseGeocoder for OfflineGeocoder {
    fn place_name(&self, _point: &GpsPoint) -> String {
        UNKNOWN_LOCATION.to_string()
    }
}

#[cfg(feature = "http")]
pub use nominatim::NominatimGeocoder;

#[cfg(feature = "http")]
mod nominatim {
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use log::{debug, warn};
    use reqwest::Client;
    use serde::Deserialize;
    use tokio::runtime::Runtime;

    use super::{ReverseGeocoder, UNKNOWN_LOCATION};
    use crate::config::GeocodeConfig;
    use crate::error::{Result, RouteStatsError};
    use crate::GpsPoint;

    /// Reverse geocoding against an OSM Nominatim endpoint.
    ///
    /// Requests are issued one at a time and spaced at least
    /// `min_interval_ms` apart, as the public Nominatim usage policy asks.
    pub struct NominatimGeocoder {
        client: Client,
        runtime: Runtime,
        endpoint: String,
        min_interval: Duration,
        last_request: Mutex<Option<Instant>>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ReverseResponse {
        pub display_name: Option<String>,
        #[serde(default)]
        pub address: Option<Address>,
        pub error: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub(super) struct Address {
        pub neighbourhood: Option<String>,
        pub suburb: Option<String>,
        pub village: Option<String>,
        pub town: Option<String>,
        pub city: Option<String>,
        pub county: Option<String>,
        pub state: Option<String>,
    }

    impl NominatimGeocoder {
        pub fn new(config: &GeocodeConfig) -> Result<Self> {
            let client = Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| RouteStatsError::Http {
                    message: format!("Failed to create HTTP client: {}", e),
                    status_code: None,
                })?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| RouteStatsError::Http {
                    message: format!("Failed to create runtime: {}", e),
                    status_code: None,
                })?;

            Ok(Self {
                client,
                runtime,
                endpoint: config.endpoint.clone(),
                min_interval: Duration::from_millis(config.min_interval_ms),
                last_request: Mutex::new(None),
            })
        }

        /// Time to wait before the next request may be sent.
        fn reserve_slot(&self) -> Duration {
            let mut last = match self.last_request.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let wait = match *last {
                Some(previous) => (previous + self.min_interval).saturating_duration_since(now),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        }

        async fn lookup(&self, point: &GpsPoint) -> Result<String> {
            let wait = self.reserve_slot();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let response = self
                .client
                .get(&self.endpoint)
                .query(&[
                    ("format", "jsonv2".to_string()),
                    ("lat", point.latitude.to_string()),
                    ("lon", point.longitude.to_string()),
                    ("zoom", "14".to_string()),
                ])
                .send()
                .await
                .map_err(|e| RouteStatsError::Http {
                    message: e.to_string(),
                    status_code: None,
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(RouteStatsError::Http {
                    message: "reverse lookup rejected".to_string(),
                    status_code: Some(status.as_u16()),
                });
            }

            let body: ReverseResponse = response.json().await.map_err(|e| RouteStatsError::Http {
                message: format!("Unexpected response: {}", e),
                status_code: Some(status.as_u16()),
            })?;

            place_from_response(&body).ok_or_else(|| RouteStatsError::Http {
                message: body.error.unwrap_or_else(|| "no address in response".to_string()),
                status_code: Some(status.as_u16()),
            })
        }
    }

    impl ReverseGeocoder for NominatimGeocoder {
        fn place_name(&self, point: &GpsPoint) -> String {
            match self.runtime.block_on(self.lookup(point)) {
                Ok(name) => {
                    debug!(
                        "[Geocoder] ({:.4}, {:.4}) -> {}",
                        point.latitude, point.longitude, name
                    );
                    name
                }
                Err(e) => {
                    warn!(
                        "[Geocoder] Lookup failed for ({:.4}, {:.4}): {}",
                        point.latitude, point.longitude, e
                    );
                    UNKNOWN_LOCATION.to_string()
                }
            }
        }
    }

    /// "Locality, Region" from the address parts, else the display name.
    pub(super) fn place_from_response(response: &ReverseResponse) -> Option<String> {
        if let Some(address) = &response.address {
            let locality = [
                &address.neighbourhood,
                &address.suburb,
                &address.village,
                &address.town,
                &address.city,
            ]
            .into_iter()
            .flatten()
            .next();
            let region = [&address.city, &address.town, &address.county, &address.state]
                .into_iter()
                .flatten()
                .find(|r| Some(*r) != locality);

            match (locality, region) {
                (Some(l), Some(r)) => return Some(format!("{}, {}", l, r)),
                (Some(l), None) => return Some(l.clone()),
                (None, Some(r)) => return Some(r.clone()),
                (None, None) => {}
            }
        }

        response
            .display_name
            .as_ref()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }
}
