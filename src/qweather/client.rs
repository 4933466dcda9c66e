use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{
    AirQuality, AirQualityDailyResponse, AirQualityDay, AlertResponse, City, CityLookupResponse,
    DailyForecast, DailyResponse, IndicesResponse, LifeIndex, NowResponse, NowWeather,
    WeatherAlert,
};
use crate::{
    auth::TokenCache,
    error::{Error, Result},
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Life index types requested from `/v7/indices`: sport, car wash, dressing,
/// UV, cold risk and air pollution dispersion.
const INDEX_TYPES: &str = "1,2,3,5,8,9";

/// Day span of a life-index request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpan {
    Today,
    ThreeDays,
}

impl IndexSpan {
    fn path(self) -> &'static str {
        match self {
            IndexSpan::Today => "/v7/indices/1d",
            IndexSpan::ThreeDays => "/v7/indices/3d",
        }
    }
}

/// HTTP client for the QWeather REST API.
///
/// Every request carries a bearer token from the shared [`TokenCache`]. A
/// request rejected for authentication is retried once with a fresh token.
#[derive(Clone)]
pub struct QWeatherClient {
    http: reqwest::Client,
    api_host: String,
    tokens: Arc<TokenCache>,
}

impl QWeatherClient {
    pub fn new(api_host: impl Into<String>, tokens: Arc<TokenCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, api_host, tokens))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        api_host: impl Into<String>,
        tokens: Arc<TokenCache>,
    ) -> Self {
        Self {
            http,
            api_host: api_host.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// GET `path` and decode the body into `T`.
    ///
    /// On an authentication failure the cached token is dropped and the
    /// request is sent exactly once more; the second outcome is final.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        match self.send(path, query).await {
            Err(e) if e.is_auth() => {
                warn!(path, error = %e, "Request rejected, retrying with a fresh token");
                self.tokens.invalidate().await;
                self.send(path, query).await
            }
            result => result,
        }
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let token = self.tokens.get_token().await?;
        let url = format!("{}{}", self.api_host, path);
        debug!(%url, ?query, "GET");

        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "HTTP {}{}",
                status.as_u16(),
                problem_detail(&body)
                    .map(|d| format!(": {d}"))
                    .unwrap_or_default()
            )));
        }
        if !status.is_success() {
            return Err(Error::Api {
                code: status.as_u16().to_string(),
                message: problem_detail(&body).unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("HTTP error").to_string()
                }),
            });
        }

        let value: Value = serde_json::from_slice(&body).map_err(|e| Error::Api {
            code: "decode".into(),
            message: format!("invalid JSON response: {e}"),
        })?;
        check_envelope(&value)?;

        serde_json::from_value(value).map_err(|e| Error::Api {
            code: "decode".into(),
            message: format!("unexpected response shape: {e}"),
        })
    }

    /// GeoAPI answers an unmatched query with envelope code 404, reported
    /// here as [`Error::LocationNotFound`].
    pub async fn city_lookup(&self, query: &str) -> Result<Vec<City>> {
        let result = self
            .get_json::<CityLookupResponse>(
                "/geo/v2/city/lookup",
                &[("location", query), ("lang", "zh")],
            )
            .await;
        match result {
            Ok(resp) => Ok(resp.location),
            Err(Error::Api { code, .. }) if code == "404" => {
                Err(Error::LocationNotFound(query.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn weather_now(&self, location_id: &str) -> Result<Option<NowWeather>> {
        let resp: NowResponse = self
            .get_json(
                "/v7/weather/now",
                &[("location", location_id), ("lang", "zh"), ("unit", "m")],
            )
            .await?;
        Ok(resp.now)
    }

    pub async fn weather_daily(&self, location_id: &str, days: u32) -> Result<Vec<DailyForecast>> {
        let path = format!("/v7/weather/{days}d");
        let resp: DailyResponse = self
            .get_json(
                &path,
                &[("location", location_id), ("lang", "zh"), ("unit", "m")],
            )
            .await?;
        Ok(resp.daily)
    }

    pub async fn indices(&self, location_id: &str, span: IndexSpan) -> Result<Vec<LifeIndex>> {
        let resp: IndicesResponse = self
            .get_json(
                span.path(),
                &[("location", location_id), ("type", INDEX_TYPES), ("lang", "zh")],
            )
            .await?;
        Ok(resp.daily)
    }

    pub async fn weather_alerts(&self, lat: &str, lon: &str) -> Result<Vec<WeatherAlert>> {
        let path = format!("/weatheralert/v1/current/{}", coordinate_path(lat, lon)?);
        let resp: AlertResponse = self.get_json(&path, &[("lang", "zh")]).await?;
        if resp.metadata.is_some_and(|m| m.zero_result) {
            return Ok(Vec::new());
        }
        Ok(resp.alerts)
    }

    pub async fn air_quality_now(&self, lat: &str, lon: &str) -> Result<AirQuality> {
        let path = format!("/airquality/v1/current/{}", coordinate_path(lat, lon)?);
        self.get_json(&path, &[("lang", "zh")]).await
    }

    pub async fn air_quality_daily(&self, lat: &str, lon: &str) -> Result<Vec<AirQualityDay>> {
        let path = format!("/airquality/v1/daily/{}", coordinate_path(lat, lon)?);
        let resp: AirQualityDailyResponse = self.get_json(&path, &[("lang", "zh")]).await?;
        Ok(resp.days)
    }
}

/// `{lat}/{lon}` with two decimals, as the v1 endpoints require.
fn coordinate_path(lat: &str, lon: &str) -> Result<String> {
    let parse = |s: &str| {
        s.trim().parse::<f64>().map_err(|_| Error::Api {
            code: "coordinates".into(),
            message: format!("invalid coordinate {s:?}"),
        })
    };
    Ok(format!("{:.2}/{:.2}", parse(lat)?, parse(lon)?))
}

/// Inspect the v7 envelope `code`. Bodies without one (v1 APIs) pass.
fn check_envelope(value: &Value) -> Result<()> {
    let code = match value.get("code") {
        Some(Value::String(code)) => code.as_str(),
        _ => return Ok(()),
    };
    match code {
        "200" => Ok(()),
        "401" | "403" => Err(Error::Auth(format!("JWT Token 无效或已过期 (code {code})"))),
        _ => Err(Error::Api {
            code: code.to_string(),
            message: envelope_message(code),
        }),
    }
}

fn envelope_message(code: &str) -> String {
    match code {
        "204" => "请求成功，但该地区暂无数据".to_string(),
        "400" => "请求参数错误".to_string(),
        "402" => "API 调用次数已用完".to_string(),
        "404" => "请求的资源不存在".to_string(),
        "429" => "请求过于频繁，请稍后再试".to_string(),
        "500" => "服务商内部错误".to_string(),
        other => format!("API 错误: 状态码 {other}"),
    }
}

/// Pull a human readable message out of a v1 error body:
/// `{"error": {"title": ..., "detail": ...}}`.
fn problem_detail(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;
    error
        .get("detail")
        .or_else(|| error.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coordinate_path_rounds_to_two_decimals() {
        assert_eq!(coordinate_path("39.90499", "116.40529").unwrap(), "39.90/116.41");
        assert!(coordinate_path("north", "116.4").is_err());
    }

    #[test]
    fn test_envelope_codes() {
        assert!(check_envelope(&json!({"code": "200"})).is_ok());
        assert!(check_envelope(&json!({"indexes": []})).is_ok());
        assert!(check_envelope(&json!({"code": "401"})).unwrap_err().is_auth());

        match check_envelope(&json!({"code": "402"})).unwrap_err() {
            Error::Api { code, message } => {
                assert_eq!(code, "402");
                assert_eq!(message, "API 调用次数已用完");
            }
            other => panic!("unexpected error {other:?}"),
        }
        match check_envelope(&json!({"code": "999"})).unwrap_err() {
            Error::Api { message, .. } => assert_eq!(message, "API 错误: 状态码 999"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_problem_detail() {
        let body = br#"{"error":{"status":400,"title":"Invalid Parameters",
            "detail":"lat out of range"}}"#;
        assert_eq!(problem_detail(body).as_deref(), Some("lat out of range"));
        assert_eq!(problem_detail(b"not json"), None);
    }
}
