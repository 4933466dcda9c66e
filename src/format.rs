//! Plain-text rendering of weather records.
//!
//! Everything here is pure: the same records always render to the same text.

use chrono::{Datelike, NaiveDate};

use crate::{
    error::Error,
    qweather::{
        display_name,
        models::{
            AirQuality, AirQualityDay, AqiIndex, City, DailyForecast, LifeIndex, NowWeather,
            WeatherAlert,
        },
    },
};

/// Warnings listed in a current-weather report.
pub const MAX_WARNINGS: usize = 3;
/// Characters of a warning description kept before truncating.
pub const WARNING_DESCRIPTION_CHARS: usize = 100;
/// Forecast days that get an air-quality line.
pub const AIR_QUALITY_FORECAST_DAYS: usize = 3;

const PLACEHOLDER: &str = "-";

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(PLACEHOLDER)
}

/// UV index to its band: ≤2 弱, ≤5 中等, ≤7 强, otherwise 很强.
pub fn uv_level(uv_index: &str) -> Option<&'static str> {
    let uv: f64 = uv_index.trim().parse().ok()?;
    Some(match uv {
        v if v <= 2.0 => "弱",
        v if v <= 5.0 => "中等",
        v if v <= 7.0 => "强",
        _ => "很强",
    })
}

/// AQI category for a value, following the Chinese national standard bands.
pub fn aqi_category(aqi: f64) -> &'static str {
    match aqi {
        v if v <= 50.0 => "优",
        v if v <= 100.0 => "良",
        v if v <= 150.0 => "轻度污染",
        v if v <= 200.0 => "中度污染",
        v if v <= 300.0 => "重度污染",
        _ => "严重污染",
    }
}

/// Eight-point compass direction for a bearing in degrees.
pub fn wind_direction(wind360: &str) -> Option<&'static str> {
    const POINTS: [&str; 8] = ["北风", "东北风", "东风", "东南风", "南风", "西南风", "西风", "西北风"];
    let degrees: f64 = wind360.trim().parse().ok()?;
    if !(0.0..=360.0).contains(&degrees) {
        return None;
    }
    let sector = ((degrees + 22.5) / 45.0).floor() as usize % 8;
    Some(POINTS[sector])
}

pub fn severity_label(severity: &str) -> &str {
    match severity.to_ascii_lowercase().as_str() {
        "minor" => "轻微",
        "moderate" => "中等",
        "severe" => "严重",
        "extreme" => "极端",
        "unknown" => "未知",
        _ => severity,
    }
}

pub fn color_label(color: &str) -> &str {
    match color.to_ascii_lowercase().as_str() {
        "white" => "白色",
        "blue" => "蓝色",
        "green" => "绿色",
        "yellow" => "黄色",
        "orange" => "橙色",
        "red" => "红色",
        "black" => "黑色",
        _ => color,
    }
}

/// 周一 … 周日 for a `YYYY-MM-DD` date.
pub fn weekday(date: &str) -> Option<&'static str> {
    const NAMES: [&str; 7] = ["周一", "周二", "周三", "周四", "周五", "周六", "周日"];
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(NAMES[date.weekday().num_days_from_monday() as usize])
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// `aqiDisplay (category)`, deriving the category from the value when absent.
fn aqi_summary(index: &AqiIndex) -> String {
    let value = index
        .aqi_display
        .as_deref()
        .or(index.aqi.as_deref())
        .unwrap_or(PLACEHOLDER);
    let category = index.category.clone().or_else(|| {
        index
            .aqi
            .as_deref()
            .or(index.aqi_display.as_deref())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| aqi_category(v).to_string())
    });
    match category {
        Some(category) => format!("{value} ({category})"),
        None => value.to_string(),
    }
}

fn pollutant_value(air: &AirQuality, code: &str) -> Option<String> {
    let concentration = air.pollutant(code)?.concentration.as_ref()?;
    let value = concentration.value.as_deref()?;
    Some(match concentration.unit.as_deref() {
        Some(unit) => format!("{value} {unit}"),
        None => value.to_string(),
    })
}

/// Current conditions for `city`. Empty `warnings` or `indices` and a missing
/// `air_quality` leave their sections out.
pub fn current_weather(
    city: &str,
    now: &NowWeather,
    warnings: &[WeatherAlert],
    air_quality: Option<&AirQuality>,
    indices: &[LifeIndex],
) -> String {
    let wind_dir = now
        .wind_dir
        .as_deref()
        .or_else(|| now.wind360.as_deref().and_then(wind_direction))
        .unwrap_or(PLACEHOLDER);

    let mut lines = vec![
        format!("📍 城市: {city}"),
        format!("🕐 观测时间: {}", or_dash(&now.obs_time)),
        format!("🌡️ 温度: {}°C", or_dash(&now.temp)),
        format!("🤒 体感温度: {}°C", or_dash(&now.feels_like)),
        format!("☁️ 天气: {}", or_dash(&now.text)),
        format!("🧭 风向: {wind_dir}"),
        format!("💨 风力: {}级", or_dash(&now.wind_scale)),
        format!("💧 湿度: {}%", or_dash(&now.humidity)),
    ];
    if let Some(pressure) = &now.pressure {
        lines.push(format!("📊 气压: {pressure}hPa"));
    }
    lines.push(format!("🌧️ 降水量: {}mm", or_dash(&now.precip)));
    lines.push(format!("👁️ 能见度: {}km", or_dash(&now.vis)));

    if !warnings.is_empty() {
        lines.push("\n⚠️ 天气预警:".to_string());
        for (i, alert) in warnings.iter().take(MAX_WARNINGS).enumerate() {
            lines.push(format!("\n  {}. {}", i + 1, or_dash(&alert.headline)));
            let event = alert.event_type.as_ref().and_then(|e| e.name.as_deref());
            lines.push(format!("     类型: {}", event.unwrap_or(PLACEHOLDER)));

            let severity = alert.severity.as_deref().map(severity_label);
            let color = alert
                .color
                .as_ref()
                .and_then(|c| c.code.as_deref())
                .map(color_label);
            let level = match (severity, color) {
                (Some(s), Some(c)) => format!("{s} ({c})"),
                (Some(s), None) => s.to_string(),
                (None, Some(c)) => c.to_string(),
                (None, None) => PLACEHOLDER.to_string(),
            };
            lines.push(format!("     级别: {level}"));

            if let Some(description) = &alert.description {
                lines.push(format!(
                    "     描述: {}",
                    truncate_chars(description, WARNING_DESCRIPTION_CHARS)
                ));
            }
        }
    }

    if let Some(air) = air_quality {
        if let Some(index) = air.primary_index() {
            lines.push("\n🌫️ 空气质量:".to_string());
            lines.push(format!("  AQI: {}", aqi_summary(index)));
            let primary = index
                .primary_pollutant
                .as_ref()
                .and_then(|p| p.name.as_deref())
                .unwrap_or("无");
            lines.push(format!("  首要污染物: {primary}"));
            if let Some(pm25) = pollutant_value(air, "pm2p5") {
                lines.push(format!("  PM2.5: {pm25}"));
            }
            if let Some(pm10) = pollutant_value(air, "pm10") {
                lines.push(format!("  PM10: {pm10}"));
            }
            if let Some(health) = &index.health {
                if let Some(effect) = &health.effect {
                    lines.push(format!("  健康影响: {effect}"));
                }
                if let Some(advice) = health
                    .advice
                    .as_ref()
                    .and_then(|a| a.general_population.as_ref())
                {
                    lines.push(format!("  建议: {advice}"));
                }
            }
        }
    }

    if !indices.is_empty() {
        lines.push("\n📊 今日指数:".to_string());
        for index in indices {
            lines.push(format!(
                "  • {}: {}",
                or_dash(&index.name),
                or_dash(&index.category)
            ));
            if let Some(text) = &index.text {
                lines.push(format!("    {text}"));
            }
        }
    }

    lines.join("\n")
}

/// A `days`-day forecast for `city`. Air quality is shown for the first
/// three days that have data; life indices are grouped by name.
pub fn forecast(
    city: &str,
    days: usize,
    daily: &[DailyForecast],
    air_quality_days: &[AirQualityDay],
    indices: &[LifeIndex],
) -> String {
    let mut lines = vec![format!("📍 {city} 未来{days}天天气预报:\n")];

    for (i, day) in daily.iter().take(days).enumerate() {
        let date = or_dash(&day.fx_date);
        let day_name = day.fx_date.as_deref().and_then(weekday).unwrap_or("");
        let wind_dir = day
            .wind_dir_day
            .as_deref()
            .or_else(|| day.wind360_day.as_deref().and_then(wind_direction))
            .unwrap_or(PLACEHOLDER);

        lines.push(format!("{}. 📅 {date} {day_name}", i + 1));
        lines.push(format!("   ☁️ 天气: {}", or_dash(&day.text_day)));
        lines.push(format!("   🌙 夜间: {}", or_dash(&day.text_night)));
        lines.push(format!(
            "   🌡️ 温度: {}°C ~ {}°C",
            or_dash(&day.temp_min),
            or_dash(&day.temp_max)
        ));
        lines.push(format!(
            "   🧭 风向: {wind_dir} {}级",
            or_dash(&day.wind_scale_day)
        ));
        lines.push(format!("   💧 湿度: {}%", or_dash(&day.humidity)));

        if let Some(precip) = &day.precip {
            if precip.trim().parse::<f64>().is_ok_and(|p| p > 0.0) {
                lines.push(format!("   🌧️ 降水: {precip}mm"));
            }
        }
        if let Some(uv) = &day.uv_index {
            if let Some(level) = uv_level(uv) {
                lines.push(format!("   ☀️ 紫外线: {level} ({uv})"));
            }
        }
        if i < AIR_QUALITY_FORECAST_DAYS {
            if let Some(index) = air_quality_days.get(i).and_then(|d| d.indexes.first()) {
                lines.push(format!("   🌫️ 空气质量: {}", aqi_summary(index)));
            }
        }
        lines.push(String::new());
    }

    if !indices.is_empty() {
        lines.push("\n📊 未来3天生活指数:\n".to_string());
        let mut groups: Vec<(&str, Vec<&LifeIndex>)> = Vec::new();
        for index in indices {
            let name = or_dash(&index.name);
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, members)) => members.push(index),
                None => groups.push((name, vec![index])),
            }
        }
        for (name, members) in groups {
            lines.push(format!("  • {name}:"));
            for index in members {
                lines.push(format!(
                    "    {} - {}",
                    or_dash(&index.category),
                    or_dash(&index.text)
                ));
            }
        }
    }

    lines.join("\n")
}

/// Trailing note for a report looked up by bare LocationID, naming the
/// coordinate-based sections that were left out. `None` if nothing was.
pub fn missing_coordinates_note(sections: &[&str]) -> Option<String> {
    if sections.is_empty() {
        return None;
    }
    Some(format!(
        "\nℹ️ 按 LocationID 查询无坐标信息，已省略{}；使用城市名称查询可获取完整信息。",
        sections.join("和")
    ))
}

/// Search matches, one per line with LocationID and administrative area.
pub fn city_list(query: &str, cities: &[City]) -> String {
    let mut lines = vec![format!("🔍 \"{query}\" 的搜索结果 (共 {} 个):", cities.len())];
    for (i, city) in cities.iter().enumerate() {
        let name = display_name(city).unwrap_or_else(|| PLACEHOLDER.to_string());
        let mut line = format!("{}. {name} (ID: {})", i + 1, or_dash(&city.id));
        let area: Vec<&str> = [city.adm2.as_deref(), city.adm1.as_deref(), city.country.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !area.is_empty() {
            line.push_str(&format!(" - {}", area.join(", ")));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// User-facing text for a failed tool call, e.g. `获取天气失败: 网络错误 ...`.
pub fn error_message(prefix: &str, err: &Error) -> String {
    let detail = match err {
        Error::LocationNotFound(query) => format!("未找到城市: {query}"),
        Error::Network(msg) => format!("网络错误，请检查网络连接 ({msg})"),
        Error::Auth(msg) => format!("鉴权失败: {msg}"),
        Error::Credential(msg) => format!("凭据错误，私钥无法解析或签名失败: {msg}"),
        Error::Config(msg) => format!("配置错误: {msg}"),
        Error::Api { code, message } => format!("API 错误 ({code}): {message}"),
        other => other.to_string(),
    };
    format!("{prefix}: {detail}")
}
