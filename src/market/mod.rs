mod article;
mod plot;
mod polygon;
mod prices;
mod quote;

use axum::{routing::{get, post}, Router};
use reqwest::StatusCode;
use time::{format_description::BorrowedFormatItem, macros::format_description, Date, OffsetDateTime};

use crate::{appresult::ApiError, config::Config, AppState};

pub use article::TimePeriod;
pub use polygon::{Bar, OpenClose};
pub use quote::StockQuote;

pub(crate) const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
pub(crate) const DEFAULT_SYMBOL: &str = "AAPL";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prices", get(prices::prices))
        .route("/plot", get(plot::plot))
        .route("/generate_article", post(article::generate_article))
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("HTTP error occurred: {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected upstream payload: {0}")]
    Malformed(#[source] anyhow::Error),
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

/// Client for the market-data and quote providers.
#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    polygon_base_url: String,
    polygon_api_key: Option<String>,
    quote_base_url: String,
    quote_api_token: Option<String>,
}

impl MarketClient {
    pub fn new(
        http: reqwest::Client,
        polygon_base_url: impl Into<String>,
        polygon_api_key: Option<String>,
        quote_base_url: impl Into<String>,
        quote_api_token: Option<String>,
    ) -> Self {
        Self {
            http,
            polygon_base_url: polygon_base_url.into().trim_end_matches('/').to_owned(),
            polygon_api_key,
            quote_base_url: quote_base_url.into().trim_end_matches('/').to_owned(),
            quote_api_token,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        Self::new(
            http,
            &config.polygon_base_url,
            config.polygon_api_key.clone(),
            &config.quote_base_url,
            config.quote_api_token.clone(),
        )
    }

    #[cfg(test)]
    pub(crate) fn offline() -> Self {
        Self::new(reqwest::Client::new(), "http://127.0.0.1:9", None, "http://127.0.0.1:9", None)
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> Result<serde_json::Value, MarketError> {
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(MarketError::Status { status, body });
        }
        Ok(res.json().await?)
    }
}

/// Ticker symbols go into URL paths; keep them to what exchanges actually use.
pub(crate) fn parse_symbol(symbol: Option<&str>) -> Result<String, ApiError> {
    let symbol = symbol.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SYMBOL);
    let valid = symbol.len() <= 12
        && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(ApiError::bad_request(format!("Invalid symbol: {symbol}")));
    }
    Ok(symbol.to_ascii_uppercase())
}

pub(crate) fn parse_date(raw: Option<&str>, default: Date) -> Result<Date, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => Date::parse(raw, DATE_FORMAT)
            .map_err(|_| ApiError::bad_request(format!("Invalid date: {raw} (expected YYYY-MM-DD)"))),
    }
}

pub(crate) fn yesterday() -> Date {
    let today = OffsetDateTime::now_utc().date();
    today.previous_day().unwrap_or(today)
}

pub(crate) fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}
