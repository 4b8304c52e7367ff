use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::modules::address::AddressComponents;
use crate::modules::errors::GeocodeError;
use crate::modules::provider::Geocoder;
use crate::modules::utils::GeocoderConfig;

/// Reverse geocoder for Nominatim-compatible `/reverse` endpoints.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    endpoint: Url,
    language: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<ReverseAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReverseAddress {
    house_number: Option<String>,
    road: Option<String>,
    pedestrian: Option<String>,
    suburb: Option<String>,
    city_district: Option<String>,
    neighbourhood: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    county: Option<String>,
    postcode: Option<String>,
    country: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(1)
            .build()?;

        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        Ok(Self {
            client,
            endpoint: base.join("reverse")?,
            language: config.language.clone(),
        })
    }

    pub fn request_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string())
            .append_pair("addressdetails", "1")
            .append_pair("accept-language", &self.language);
        url
    }
}

/// Maps a `/reverse?format=jsonv2` response to address candidates.
/// Nominatim reports "nothing here" as an `error` field, which maps to no candidates.
fn into_candidates(response: ReverseResponse) -> Vec<AddressComponents> {
    if let Some(error) = response.error {
        log::debug!("Geocoder found nothing: {}", error);
        return vec![];
    }

    let address = response.address.unwrap_or_default();
    let street = match (address.house_number, address.road.or(address.pedestrian)) {
        (Some(number), Some(road)) => Some(format!("{} {}", number, road)),
        (_, road) => road,
    };

    vec![AddressComponents {
        name: response.name.filter(|n| !n.trim().is_empty()),
        street,
        district: address
            .suburb
            .or(address.city_district)
            .or(address.neighbourhood),
        city: address.city.or(address.town).or(address.village),
        region: address.state.or(address.county),
        postal_code: address.postcode,
        country: address.country,
    }]
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<AddressComponents>, GeocodeError> {
        let url = self.request_url(latitude, longitude);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }

        let decoded = response.json::<ReverseResponse>().await?;
        Ok(into_candidates(decoded))
    }
}

/// Geocoder answering every lookup with the same candidates.
/// Used when network geocoding is switched off.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    candidates: Vec<AddressComponents>,
}

impl StaticGeocoder {
    pub fn new(candidates: Vec<AddressComponents>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn reverse_geocode(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Vec<AddressComponents>, GeocodeError> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::address::format_address;

    fn parse(body: &str) -> serde_json::Result<Vec<AddressComponents>> {
        serde_json::from_str::<ReverseResponse>(body).map(into_candidates)
    }

    #[test]
    fn parses_full_address() {
        let body = r#"{
            "place_id": 1,
            "name": "Central Depot",
            "display_name": "Central Depot, 12, Main Street, Downtown, Springfield, Illinois, 62701, USA",
            "address": {
                "house_number": "12",
                "road": "Main Street",
                "suburb": "Downtown",
                "city": "Springfield",
                "state": "Illinois",
                "postcode": "62701",
                "country": "USA"
            }
        }"#;
        let candidates = parse(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            format_address(&candidates[0]),
            "Central Depot, 12 Main Street, Downtown, Springfield, Illinois"
        );
        assert_eq!(candidates[0].postal_code.as_deref(), Some("62701"));
    }

    #[test]
    fn falls_back_to_town_and_county() {
        let body = r#"{"name": "", "address": {"road": "Mill Rd", "town": "Riverton", "county": "Fremont"}}"#;
        let candidates = parse(body).unwrap();
        assert_eq!(candidates[0].name, None);
        assert_eq!(format_address(&candidates[0]), "Mill Rd, Riverton, Fremont");
    }

    #[test]
    fn error_body_means_no_candidates() {
        let candidates = parse(r#"{"error": "Unable to geocode"}"#).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse("<html>busy</html>").is_err());
    }

    #[test]
    fn builds_reverse_url_with_query() {
        let config = GeocoderConfig {
            base_url: "https://geo.example.com/nominatim".to_string(),
            language: "de".to_string(),
            ..Default::default()
        };
        let geocoder = NominatimGeocoder::new(&config).unwrap();
        let url = geocoder.request_url(40.5, -73.25);
        assert_eq!(url.path(), "/nominatim/reverse");
        let query = url.query().unwrap();
        assert!(query.contains("format=jsonv2"));
        assert!(query.contains("lat=40.5"));
        assert!(query.contains("lon=-73.25"));
        assert!(query.contains("accept-language=de"));
    }

    #[tokio::test]
    async fn static_geocoder_returns_candidates() {
        let geocoder = StaticGeocoder::new(vec![AddressComponents {
            city: Some("Springfield".to_string()),
            ..Default::default()
        }]);
        let candidates = geocoder.reverse_geocode(1.0, 2.0).await.unwrap();
        assert_eq!(format_address(&candidates[0]), "Springfield");
    }
}
