use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    connection::ServerConn,
    context::ServerCtx,
    error::{Error, Result},
    format,
    qweather::{IndexSpan, MAX_SEARCH_RESULTS, QWeatherClient},
    schema::{
        CallToolResult, ClientCapabilities, Cursor, Implementation, InitializeResult,
        LATEST_PROTOCOL_VERSION, ListToolsResult, LoggingLevel, PREVIOUS_PROTOCOL_VERSION, Tool,
        ToolInputSchema,
    },
};

pub const CURRENT_WEATHER_TOOL: &str = "get_current_weather";
pub const FORECAST_TOOL: &str = "get_weather_forecast";
pub const SEARCH_CITY_TOOL: &str = "search_city";

/// Forecast lengths the provider serves.
pub const FORECAST_DAYS: [u32; 5] = [3, 7, 10, 15, 30];
pub const DEFAULT_FORECAST_DAYS: u32 = 7;

const SERVER_NAME: &str = "qweather-mcp";
const INSTRUCTIONS: &str = "查询和风天气：当前天气、未来天气预报、空气质量、天气预警和生活指数。\
location 可以是城市名（如\"北京\"）或 9 位 LocationID。";

fn default_true() -> bool {
    true
}

fn default_days() -> i64 {
    DEFAULT_FORECAST_DAYS as i64
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentWeatherParams {
    /// 城市名称（如"北京"、"上海浦东"）或 9 位 LocationID
    pub location: String,
    /// 是否包含天气预警
    #[serde(default = "default_true")]
    pub include_warning: bool,
    /// 是否包含空气质量
    #[serde(default = "default_true")]
    pub include_air_quality: bool,
    /// 是否包含今日生活指数
    #[serde(default = "default_true")]
    pub include_indices: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForecastParams {
    /// 城市名称（如"北京"）或 9 位 LocationID
    pub location: String,
    /// 预报天数，支持 3/7/10/15/30，其他值按 7 天处理
    #[serde(default = "default_days")]
    pub days: i64,
    /// 是否包含空气质量预报（前 3 天）
    #[serde(default = "default_true")]
    pub include_air_quality: bool,
    /// 是否包含未来 3 天生活指数
    #[serde(default = "default_true")]
    pub include_indices: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchCityParams {
    /// 要搜索的城市名称
    pub city_name: String,
}

/// A requested forecast length, or the default when it is not one the
/// provider serves.
pub fn forecast_days(requested: i64) -> u32 {
    FORECAST_DAYS
        .into_iter()
        .find(|d| i64::from(*d) == requested)
        .unwrap_or(DEFAULT_FORECAST_DAYS)
}

fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    arguments: Option<Map<String, Value>>,
) -> Result<T> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| Error::InvalidParams(format!("{tool}: {e}")))
}

/// MCP connection exposing the QWeather tools.
#[derive(Clone)]
pub struct WeatherServer {
    client: QWeatherClient,
}

impl WeatherServer {
    pub fn new(client: QWeatherClient) -> Self {
        Self { client }
    }

    pub fn tools() -> Vec<Tool> {
        vec![
            Tool::new(
                CURRENT_WEATHER_TOOL,
                ToolInputSchema::from_json_schema::<CurrentWeatherParams>(),
            )
            .with_description("获取指定城市的当前天气，可附带天气预警、空气质量和今日生活指数")
            .with_annotation_title("当前天气")
            .with_read_only_hint(true)
            .with_open_world_hint(true),
            Tool::new(
                FORECAST_TOOL,
                ToolInputSchema::from_json_schema::<ForecastParams>(),
            )
            .with_description("获取指定城市未来 3/7/10/15/30 天的天气预报，可附带空气质量预报和生活指数")
            .with_annotation_title("天气预报")
            .with_read_only_hint(true)
            .with_open_world_hint(true),
            Tool::new(
                SEARCH_CITY_TOOL,
                ToolInputSchema::from_json_schema::<SearchCityParams>(),
            )
            .with_description("按名称搜索城市，返回最多 10 个匹配的城市及其 LocationID")
            .with_annotation_title("城市搜索")
            .with_read_only_hint(true)
            .with_open_world_hint(true),
        ]
    }

    pub async fn current_weather(
        &self,
        ctx: &ServerCtx,
        params: CurrentWeatherParams,
    ) -> Result<String> {
        let location = self.client.resolve(&params.location).await?;
        let coordinates = location.coordinates();
        let id = location.id.as_str();

        let (now, warnings, air_quality, indices) = tokio::join!(
            self.client.weather_now(id),
            async {
                match coordinates {
                    Some((lat, lon)) if params.include_warning => {
                        Some(self.client.weather_alerts(lat, lon).await)
                    }
                    _ => None,
                }
            },
            async {
                match coordinates {
                    Some((lat, lon)) if params.include_air_quality => {
                        Some(self.client.air_quality_now(lat, lon).await)
                    }
                    _ => None,
                }
            },
            async {
                if params.include_indices {
                    Some(self.client.indices(id, IndexSpan::Today).await)
                } else {
                    None
                }
            },
        );

        let Some(now) = now? else {
            return Ok(format!("无法获取 {} 的天气信息", location.display_name()));
        };
        let warnings = optional(ctx, "天气预警", warnings).unwrap_or_default();
        let air_quality = optional(ctx, "空气质量", air_quality);
        let indices = optional(ctx, "生活指数", indices).unwrap_or_default();

        let report = format::current_weather(
            location.display_name(),
            &now,
            &warnings,
            air_quality.as_ref(),
            &indices,
        );
        let mut skipped = Vec::new();
        if coordinates.is_none() {
            if params.include_warning {
                skipped.push("天气预警");
            }
            if params.include_air_quality {
                skipped.push("空气质量");
            }
        }
        Ok(with_note(report, format::missing_coordinates_note(&skipped)))
    }

    pub async fn forecast(&self, ctx: &ServerCtx, params: ForecastParams) -> Result<String> {
        let days = forecast_days(params.days);
        let location = self.client.resolve(&params.location).await?;
        let coordinates = location.coordinates();
        let id = location.id.as_str();

        let (daily, air_quality_days, indices) = tokio::join!(
            self.client.weather_daily(id, days),
            async {
                match coordinates {
                    Some((lat, lon)) if params.include_air_quality => {
                        Some(self.client.air_quality_daily(lat, lon).await)
                    }
                    _ => None,
                }
            },
            async {
                if params.include_indices {
                    Some(self.client.indices(id, IndexSpan::ThreeDays).await)
                } else {
                    None
                }
            },
        );

        let daily = daily?;
        if daily.is_empty() {
            return Ok(format!("无法获取 {} 的天气预报", location.display_name()));
        }
        let air_quality_days =
            optional(ctx, "空气质量预报", air_quality_days).unwrap_or_default();
        let indices = optional(ctx, "生活指数", indices).unwrap_or_default();

        let report = format::forecast(
            location.display_name(),
            days as usize,
            &daily,
            &air_quality_days,
            &indices,
        );
        let skipped: &[&str] = if coordinates.is_none() && params.include_air_quality {
            &["空气质量预报"]
        } else {
            &[]
        };
        Ok(with_note(report, format::missing_coordinates_note(skipped)))
    }

    pub async fn search_city(&self, params: SearchCityParams) -> Result<String> {
        let cities = self
            .client
            .search(&params.city_name, MAX_SEARCH_RESULTS)
            .await?;
        Ok(format::city_list(params.city_name.trim(), &cities))
    }
}

fn with_note(mut report: String, note: Option<String>) -> String {
    if let Some(note) = note {
        report.push('\n');
        report.push_str(&note);
    }
    report
}

/// Unwrap an optional dataset. A failed fetch is logged, reported to the
/// client as a warning and treated as absent.
fn optional<T>(ctx: &ServerCtx, section: &str, result: Option<Result<T>>) -> Option<T> {
    match result? {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(section, error = %e, "Optional dataset unavailable, omitting section");
            ctx.log(
                LoggingLevel::Warning,
                SERVER_NAME,
                format!("获取{section}失败: {e}"),
            );
            None
        }
    }
}

fn tool_result(outcome: Result<String>, error_prefix: &str) -> CallToolResult {
    match outcome {
        Ok(text) => CallToolResult::new().with_text_content(text).is_error(false),
        Err(e) => {
            warn!(error = %e, "Tool call failed");
            CallToolResult::new()
                .with_text_content(format::error_message(error_prefix, &e))
                .is_error(true)
        }
    }
}

#[async_trait]
impl ServerConn for WeatherServer {
    async fn initialize(
        &self,
        _context: &ServerCtx,
        protocol_version: String,
        _capabilities: ClientCapabilities,
        client_info: Implementation,
    ) -> Result<InitializeResult> {
        info!(
            client = %client_info.name,
            version = %client_info.version,
            protocol = %protocol_version,
            "Client initializing"
        );
        let version = if protocol_version == PREVIOUS_PROTOCOL_VERSION {
            PREVIOUS_PROTOCOL_VERSION
        } else {
            LATEST_PROTOCOL_VERSION
        };
        Ok(InitializeResult::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
            .with_protocol_version(version)
            .with_tools(false)
            .with_logging()
            .with_instructions(INSTRUCTIONS))
    }

    async fn list_tools(
        &self,
        _context: &ServerCtx,
        _cursor: Option<Cursor>,
    ) -> Result<ListToolsResult> {
        Ok(ListToolsResult::new().with_tools(Self::tools()))
    }

    async fn call_tool(
        &self,
        context: &ServerCtx,
        name: String,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        info!(tool = %name, "Calling tool");
        match name.as_str() {
            CURRENT_WEATHER_TOOL => {
                let params = parse_arguments(&name, arguments)?;
                Ok(tool_result(
                    self.current_weather(context, params).await,
                    "获取天气失败",
                ))
            }
            FORECAST_TOOL => {
                let params = parse_arguments(&name, arguments)?;
                Ok(tool_result(
                    self.forecast(context, params).await,
                    "获取天气预报失败",
                ))
            }
            SEARCH_CITY_TOOL => {
                let params = parse_arguments(&name, arguments)?;
                Ok(tool_result(self.search_city(params).await, "搜索城市失败"))
            }
            _ => Err(Error::ToolNotFound(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_days_fallback() {
        assert_eq!(forecast_days(3), 3);
        assert_eq!(forecast_days(30), 30);
        assert_eq!(forecast_days(5), 7);
        assert_eq!(forecast_days(-1), 7);
        assert_eq!(forecast_days(0), 7);
    }

    #[test]
    fn test_params_defaults() {
        let params: CurrentWeatherParams =
            parse_arguments("t", serde_json::json!({"location": "北京"}).as_object().cloned())
                .unwrap();
        assert!(params.include_warning && params.include_air_quality && params.include_indices);

        let params: ForecastParams = parse_arguments(
            "t",
            serde_json::json!({"location": "北京", "include_indices": false})
                .as_object()
                .cloned(),
        )
        .unwrap();
        assert_eq!(params.days, 7);
        assert!(!params.include_indices);

        let err = parse_arguments::<ForecastParams>("t", None).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn test_tool_schemas() {
        let tools = WeatherServer::tools();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, [CURRENT_WEATHER_TOOL, FORECAST_TOOL, SEARCH_CITY_TOOL]);

        let forecast = &tools[1].input_schema;
        assert_eq!(forecast.required.as_deref(), Some(&["location".to_string()][..]));
        let props = forecast.properties.as_ref().unwrap();
        assert!(props.contains_key("days"));
        assert!(props.contains_key("include_air_quality"));
    }
}
