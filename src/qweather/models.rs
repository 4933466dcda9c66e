//! Response records for the endpoints this server calls.
//!
//! Every printed field is optional and decoded leniently: a missing, null or
//! numeric-instead-of-string value never fails the whole payload.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept a string, number or bool where the provider documents a string.
fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Treat `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `/v7/weather/now`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NowResponse {
    #[serde(default)]
    pub now: Option<NowWeather>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowWeather {
    #[serde(default, deserialize_with = "text")]
    pub obs_time: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub temp: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub feels_like: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind360: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind_dir: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind_scale: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub humidity: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub precip: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub pressure: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub vis: Option<String>,
}

/// `/v7/weather/{N}d`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub daily: Vec<DailyForecast>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    #[serde(default, deserialize_with = "text")]
    pub fx_date: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub temp_max: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub temp_min: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub text_day: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub text_night: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind360_day: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind_dir_day: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub wind_scale_day: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub humidity: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub precip: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub uv_index: Option<String>,
}

/// `/geo/v2/city/lookup`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CityLookupResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub location: Vec<City>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct City {
    #[serde(default, deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub adm1: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub adm2: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub lat: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub lon: Option<String>,
}

/// `/v7/indices/{1d|3d}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicesResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub daily: Vec<LifeIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LifeIndex {
    #[serde(default, deserialize_with = "text")]
    pub date: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "text")]
    pub index_type: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub text: Option<String>,
}

/// `/weatheralert/v1/current/{lat}/{lon}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertResponse {
    #[serde(default)]
    pub metadata: Option<AlertMetadata>,
    #[serde(default, deserialize_with = "nullable")]
    pub alerts: Vec<WeatherAlert>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetadata {
    #[serde(default, deserialize_with = "nullable")]
    pub zero_result: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherAlert {
    #[serde(default, deserialize_with = "text")]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub headline: Option<String>,
    #[serde(default)]
    pub event_type: Option<AlertEventType>,
    #[serde(default, deserialize_with = "text")]
    pub severity: Option<String>,
    #[serde(default)]
    pub color: Option<AlertColor>,
    #[serde(default, deserialize_with = "text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub effective_time: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub expire_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertEventType {
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertColor {
    #[serde(default, deserialize_with = "text")]
    pub code: Option<String>,
}

/// `/airquality/v1/current/{lat}/{lon}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AirQuality {
    #[serde(default, deserialize_with = "nullable")]
    pub indexes: Vec<AqiIndex>,
    #[serde(default, deserialize_with = "nullable")]
    pub pollutants: Vec<Pollutant>,
}

impl AirQuality {
    /// The first index is the locally applicable standard.
    pub fn primary_index(&self) -> Option<&AqiIndex> {
        self.indexes.first()
    }

    pub fn pollutant(&self, code: &str) -> Option<&Pollutant> {
        self.pollutants.iter().find(|p| {
            p.code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AqiIndex {
    #[serde(default, deserialize_with = "text")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub aqi: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub aqi_display: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub category: Option<String>,
    #[serde(default)]
    pub primary_pollutant: Option<PrimaryPollutant>,
    #[serde(default)]
    pub health: Option<Health>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrimaryPollutant {
    #[serde(default, deserialize_with = "text")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Health {
    #[serde(default, deserialize_with = "text")]
    pub effect: Option<String>,
    #[serde(default)]
    pub advice: Option<HealthAdvice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAdvice {
    #[serde(default, deserialize_with = "text")]
    pub general_population: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub sensitive_population: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Pollutant {
    #[serde(default, deserialize_with = "text")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(default)]
    pub concentration: Option<Concentration>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Concentration {
    #[serde(default, deserialize_with = "text")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub unit: Option<String>,
}

/// `/airquality/v1/daily/{lat}/{lon}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirQualityDailyResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub days: Vec<AirQualityDay>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityDay {
    #[serde(default, deserialize_with = "text")]
    pub forecast_start_time: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub indexes: Vec<AqiIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_and_null_fields_are_absent() {
        let now: NowWeather = serde_json::from_value(json!({
            "temp": "5",
            "feelsLike": null,
            "pressure": ""
        }))
        .unwrap();
        assert_eq!(now.temp.as_deref(), Some("5"));
        assert!(now.feels_like.is_none());
        assert!(now.pressure.is_none());
        assert!(now.vis.is_none());
    }

    #[test]
    fn test_numbers_accepted_as_text() {
        let air: AirQuality = serde_json::from_value(json!({
            "indexes": [{"aqi": 46, "aqiDisplay": "46", "category": "优"}],
            "pollutants": [{"code": "pm2p5", "concentration": {"value": 11.5, "unit": "μg/m3"}}]
        }))
        .unwrap();
        assert_eq!(air.primary_index().unwrap().aqi.as_deref(), Some("46"));
        let pm25 = air.pollutant("PM2P5").unwrap();
        assert_eq!(
            pm25.concentration.as_ref().unwrap().value.as_deref(),
            Some("11.5")
        );
    }

    #[test]
    fn test_null_lists_decode_empty() {
        let alerts: AlertResponse = serde_json::from_value(json!({
            "metadata": {"zeroResult": true},
            "alerts": null
        }))
        .unwrap();
        assert!(alerts.alerts.is_empty());
        assert!(alerts.metadata.unwrap().zero_result);
    }
}
