use tracing::debug;

use super::{QWeatherClient, models::City};
use crate::error::{Error, Result};

/// Upper bound on matches returned by [`QWeatherClient::search`].
pub const MAX_SEARCH_RESULTS: usize = 10;

/// A place the weather endpoints can be queried for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: String,
    pub name: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

impl Location {
    /// A bare LocationID with nothing else known about it.
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            lat: None,
            lon: None,
        }
    }

    /// Name shown to the user, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Latitude and longitude, when both are known.
    pub fn coordinates(&self) -> Option<(&str, &str)> {
        match (self.lat.as_deref(), self.lon.as_deref()) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Whether `input` already is a LocationID (nine ASCII digits).
pub fn is_location_id(input: &str) -> bool {
    input.len() == 9 && input.bytes().all(|b| b.is_ascii_digit())
}

/// City name prefixed with its province when the two differ,
/// e.g. `浦东` in `上海` becomes `上海浦东`.
pub fn display_name(city: &City) -> Option<String> {
    let name = city.name.as_deref()?;
    match city.adm1.as_deref() {
        Some(adm1) if adm1 != name => Some(format!("{adm1}{name}")),
        _ => Some(name.to_string()),
    }
}

impl QWeatherClient {
    /// Resolve free text to a [`Location`]. LocationIDs pass through without
    /// a lookup; anything else takes the first search match.
    pub async fn resolve(&self, input: &str) -> Result<Location> {
        let query = input.trim();
        if query.is_empty() {
            return Err(Error::LocationNotFound(input.to_string()));
        }
        if is_location_id(query) {
            debug!(location = query, "Using LocationID as given");
            return Ok(Location::from_id(query));
        }

        let location = self
            .city_lookup(query)
            .await?
            .into_iter()
            .find_map(|city| {
                let name = display_name(&city);
                Some(Location {
                    id: city.id?,
                    name,
                    lat: city.lat,
                    lon: city.lon,
                })
            })
            .ok_or_else(|| Error::LocationNotFound(query.to_string()))?;

        debug!(location = query, id = %location.id, "Resolved location");
        Ok(location)
    }

    /// Up to `limit` (at most [`MAX_SEARCH_RESULTS`]) cities matching `input`.
    pub async fn search(&self, input: &str, limit: usize) -> Result<Vec<City>> {
        let query = input.trim();
        if query.is_empty() {
            return Err(Error::LocationNotFound(input.to_string()));
        }
        let mut cities = self.city_lookup(query).await?;
        if cities.is_empty() {
            return Err(Error::LocationNotFound(query.to_string()));
        }
        cities.truncate(limit.min(MAX_SEARCH_RESULTS));
        Ok(cities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(name: &str, adm1: &str) -> City {
        City {
            name: Some(name.into()),
            adm1: Some(adm1.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_location_id_format() {
        assert!(is_location_id("101010100"));
        assert!(!is_location_id("10101010"));
        assert!(!is_location_id("1010101000"));
        assert!(!is_location_id("北京"));
        assert!(!is_location_id("10101010a"));
        // Full-width digits are not ASCII
        assert!(!is_location_id("１０１０１０１００"));
    }

    #[test]
    fn test_display_name_prefixes_province() {
        assert_eq!(display_name(&city("北京", "北京")).as_deref(), Some("北京"));
        assert_eq!(display_name(&city("浦东", "上海")).as_deref(), Some("上海浦东"));
        assert_eq!(display_name(&City::default()), None);
    }

    #[test]
    fn test_bare_id_has_no_coordinates() {
        let loc = Location::from_id("101010100");
        assert_eq!(loc.display_name(), "101010100");
        assert!(loc.coordinates().is_none());
    }
}
