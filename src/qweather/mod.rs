//! Client for the QWeather (和风天气) REST API.

mod client;
mod location;
pub mod models;

pub use client::{IndexSpan, QWeatherClient, REQUEST_TIMEOUT};
pub use location::{Location, MAX_SEARCH_RESULTS, display_name, is_location_id};
