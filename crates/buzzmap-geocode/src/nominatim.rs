//! Nominatim-compatible `/search` adapter.

use std::time::Duration;

use async_trait::async_trait;
use buzzmap_core::Coordinates;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::{GeocodeError, GeocodingProvider};

pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Clone)]
pub struct NominatimSettings {
    pub base_url: String,
    /// Comma-separated ISO 3166-1 alpha-2 codes, e.g. `jp`.
    pub country_codes: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NominatimSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            country_codes: Some("jp".to_owned()),
            timeout_secs: 30,
            user_agent: "buzzmap/0.1 (trend-map)".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

pub struct NominatimClient {
    client: Client,
    search_url: Url,
    country_codes: Option<String>,
}

impl NominatimClient {
    /// # Errors
    ///
    /// Returns [`GeocodeError::InvalidBaseUrl`] for an unparseable base URL
    /// and [`GeocodeError::Client`] if the HTTP client cannot be built.
    pub fn new(settings: &NominatimSettings) -> Result<Self, GeocodeError> {
        let root = Url::parse(&format!("{}/", settings.base_url.trim_end_matches('/')))
            .and_then(|u| u.join("search"))
            .map_err(|e| GeocodeError::InvalidBaseUrl {
                url: settings.base_url.clone(),
                reason: e.to_string(),
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&settings.user_agent)
            .build()?;
        Ok(Self {
            client,
            search_url: root,
            country_codes: settings
                .country_codes
                .clone()
                .filter(|c| !c.trim().is_empty()),
        })
    }

    fn request_url(&self, address: &str) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", address)
                .append_pair("format", "json")
                .append_pair("limit", "1");
            if let Some(codes) = &self.country_codes {
                query.append_pair("countrycodes", codes);
            }
        }
        url
    }
}

fn transient(address: &str, reason: impl Into<String>) -> GeocodeError {
    GeocodeError::Transient {
        address: address.to_owned(),
        reason: reason.into(),
    }
}

#[async_trait]
impl GeocodingProvider for NominatimClient {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let response = self
            .client
            .get(self.request_url(address))
            .send()
            .await
            .map_err(|e| transient(address, e.without_url().to_string()))?;
        let status = response.status();

        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Err(GeocodeError::Unresolved {
                address: address.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(transient(address, format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transient(address, e.without_url().to_string()))?;
        let places: Vec<Place> = serde_json::from_str(&body)
            .map_err(|e| transient(address, format!("malformed response: {e}")))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let (Ok(lat), Ok(lon)) = (place.lat.trim().parse::<f64>(), place.lon.trim().parse::<f64>())
        else {
            tracing::warn!(address, lat = %place.lat, lon = %place.lon, "non-numeric coordinates from geocoder");
            return Ok(None);
        };

        let coordinates = Coordinates::new(lat, lon);
        if coordinates.is_none() {
            tracing::warn!(address, lat, lon, "geocoder returned out-of-range coordinates");
        }
        Ok(coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_carries_country_filter() {
        let client = NominatimClient::new(&NominatimSettings {
            base_url: "http://localhost:9/".to_owned(),
            ..NominatimSettings::default()
        })
        .unwrap();
        let url = client.request_url("東京都渋谷区道玄坂2-1");
        assert_eq!(url.path(), "/search");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("q".to_owned(), "東京都渋谷区道玄坂2-1".to_owned())));
        assert!(pairs.contains(&("limit".to_owned(), "1".to_owned())));
        assert!(pairs.contains(&("countrycodes".to_owned(), "jp".to_owned())));
    }

    #[test]
    fn blank_country_codes_are_omitted() {
        let client = NominatimClient::new(&NominatimSettings {
            base_url: "http://localhost:9".to_owned(),
            country_codes: Some("  ".to_owned()),
            ..NominatimSettings::default()
        })
        .unwrap();
        assert!(!client
            .request_url("x")
            .query_pairs()
            .any(|(k, _)| k == "countrycodes"));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = NominatimClient::new(&NominatimSettings {
            base_url: "not a url".to_owned(),
            ..NominatimSettings::default()
        });
        assert!(matches!(result, Err(GeocodeError::InvalidBaseUrl { .. })));
    }
}
