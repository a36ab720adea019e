use serde::{Deserialize, Serialize};
use time::Date;

use super::{format_date, MarketClient, MarketError};

/// One daily aggregate. `t` is the bar's start in unix milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bar {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenClose {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

#[derive(Deserialize)]
struct Aggregates {
    #[serde(default)]
    results: Vec<Bar>,
}

impl MarketClient {
    fn polygon_key(&self) -> Result<&str, MarketError> {
        self.polygon_api_key.as_deref().ok_or(MarketError::NotConfigured("POLYGON_API_KEY"))
    }

    /// Daily bars for `[start, end]`, oldest first.
    pub async fn daily_range(&self, symbol: &str, start: Date, end: Date) -> Result<Vec<Bar>, MarketError> {
        let url = format!(
            "{}/v2/aggs/ticker/{symbol}/range/1/day/{}/{}",
            self.polygon_base_url,
            format_date(start),
            format_date(end),
        );
        let req = self.http
            .get(url)
            .query(&[("adjusted", "true"), ("sort", "asc"), ("apiKey", self.polygon_key()?)]);

        let body = self.get_json(req).await?;
        let aggregates: Aggregates = serde_json::from_value(body)
            .map_err(|err| MarketError::Malformed(err.into()))?;
        Ok(aggregates.results)
    }

    pub async fn open_close(&self, symbol: &str, date: Date) -> Result<OpenClose, MarketError> {
        let url = format!("{}/v1/open-close/{symbol}/{}", self.polygon_base_url, format_date(date));
        let req = self.http
            .get(url)
            .query(&[("adjusted", "true"), ("apiKey", self.polygon_key()?)]);

        let body = self.get_json(req).await?;
        serde_json::from_value(body).map_err(|err| MarketError::Malformed(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::{Path, Query}, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use time::macros::date;

    use super::*;
    use crate::market::testing::fake_market;

    #[tokio::test]
    async fn daily_range_hits_aggregates_endpoint() {
        let upstream = Router::new().route(
            "/v2/aggs/ticker/{symbol}/range/1/day/{start}/{end}",
            get(|Path((symbol, start, end)): Path<(String, String, String)>,
                 Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!((symbol.as_str(), start.as_str(), end.as_str()), ("MSFT", "2023-01-09", "2023-01-10"));
                assert_eq!(q["apiKey"], "poly-key");
                assert_eq!(q["sort"], "asc");
                Json(json!({"results": [
                    {"t": 1673240400000i64, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10},
                    {"t": 1673326800000i64, "o": 1.5, "h": 2.5, "l": 1.0, "c": 2.0, "v": 12}
                ]}))
            }),
        );
        let market = fake_market(upstream).await;

        let bars = market.daily_range("MSFT", date!(2023 - 01 - 09), date!(2023 - 01 - 10)).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].c, 2.0);
    }

    #[tokio::test]
    async fn missing_results_means_no_bars() {
        let upstream = Router::new().route(
            "/v2/aggs/ticker/{symbol}/range/1/day/{start}/{end}",
            get(|| async { Json(json!({"resultsCount": 0, "status": "OK"})) }),
        );
        let market = fake_market(upstream).await;
        let bars = market.daily_range("AAPL", date!(2023 - 01 - 07), date!(2023 - 01 - 08)).await.unwrap();
        assert!(bars.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_key_is_reported() {
        let market = MarketClient::offline();
        let err = market.open_close("AAPL", date!(2023 - 01 - 09)).await.unwrap_err();
        assert!(matches!(err, MarketError::NotConfigured("POLYGON_API_KEY")));
    }
}
