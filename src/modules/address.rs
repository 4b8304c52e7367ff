use serde::{Deserialize, Serialize};

use crate::modules::errors::GeocodeError;

pub const UNKNOWN_LOCATION: &str = "Unknown location";
pub const ADDRESS_UNAVAILABLE: &str = "Address unavailable";

/// One reverse-geocode candidate. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddressComponents {
    pub name: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl AddressComponents {
    /// Ordered display fields; postal code and country are not shown.
    fn display_fields(&self) -> [&Option<String>; 5] {
        [&self.name, &self.street, &self.district, &self.city, &self.region]
    }
}

/// Joins the present display fields with ", ".
pub fn format_address(components: &AddressComponents) -> String {
    let parts: Vec<&str> = components
        .display_fields()
        .into_iter()
        .filter_map(|field| field.as_deref())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        UNKNOWN_LOCATION.to_string()
    } else {
        parts.join(", ")
    }
}

/// Turns a geocoder outcome into the label stored on a position.
/// Failures and empty answers degrade to `ADDRESS_UNAVAILABLE`.
pub fn address_label(outcome: Result<Vec<AddressComponents>, GeocodeError>) -> String {
    match outcome {
        Ok(candidates) => match candidates.first() {
            Some(first) => format_address(first),
            None => {
                log::warn!("Reverse geocode returned no candidates");
                ADDRESS_UNAVAILABLE.to_string()
            }
        },
        Err(e) => {
            log::warn!("Reverse geocode failed: {}", e);
            ADDRESS_UNAVAILABLE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn skips_missing_fields() {
        let components = AddressComponents {
            street: some("Main St"),
            city: some("Springfield"),
            ..Default::default()
        };
        assert_eq!(format_address(&components), "Main St, Springfield");
    }

    #[test]
    fn keeps_name_street_district_city_region_order() {
        let components = AddressComponents {
            region: some("IL"),
            city: some("Springfield"),
            district: some("Downtown"),
            street: some("Main St"),
            name: some("Depot 4"),
            postal_code: some("62701"),
            country: some("USA"),
        };
        assert_eq!(
            format_address(&components),
            "Depot 4, Main St, Downtown, Springfield, IL"
        );
    }

    #[test]
    fn empty_components_are_unknown_location() {
        assert_eq!(format_address(&AddressComponents::default()), UNKNOWN_LOCATION);

        let blank = AddressComponents {
            name: some("  "),
            country: some("USA"),
            ..Default::default()
        };
        assert_eq!(format_address(&blank), UNKNOWN_LOCATION);
    }

    #[test]
    fn failures_degrade_to_sentinel() {
        assert_eq!(address_label(Ok(vec![])), ADDRESS_UNAVAILABLE);
        assert_eq!(
            address_label(Err(GeocodeError::Status(503))),
            ADDRESS_UNAVAILABLE
        );
        assert_eq!(
            address_label(Ok(vec![AddressComponents::default()])),
            UNKNOWN_LOCATION
        );
    }
}
