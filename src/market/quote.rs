use serde_json::Value;

use super::{MarketClient, MarketError};
use crate::GetField;

/// Snapshot of one listing from the quote provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StockQuote {
    pub name: String,
    pub exchange: String,
    pub price: f64,
    pub prev_close: f64,
    pub open: Option<f64>,
    pub after_hours_price: Option<f64>,
    pub volume: u64,
    pub change_percent: f64,
}

impl StockQuote {
    pub(crate) fn from_row(row: &Value) -> anyhow::Result<StockQuote> {
        let optional = |field: &str| row.get(field).and_then(Value::as_f64);

        Ok(StockQuote {
            name: row.get_str_field("Name")?,
            exchange: row
                .get_str_field("ExchangeShortName")
                .map(|exchange| exchange.to_uppercase())
                .unwrap_or_else(|_| "N/A".to_owned()),
            price: row.get_f64_field("Price")?,
            prev_close: row.get_f64_field("PrevClose")?,
            open: optional("Open").filter(|open| *open != 0.0),
            after_hours_price: optional("AfterHoursPrice"),
            volume: row.get("Volume").and_then(Value::as_u64).unwrap_or_default(),
            change_percent: optional("ChangePercent").unwrap_or_default(),
        })
    }
}

impl MarketClient {
    /// First row of the provider's quote for `symbol`, if it knows the symbol.
    pub async fn quote(&self, symbol: &str) -> Result<Option<StockQuote>, MarketError> {
        let token = self.quote_api_token.as_deref().ok_or(MarketError::NotConfigured("QUOTE_API_TOKEN"))?;
        let req = self.http
            .get(format!("{}/fcon/getQuote.json", self.quote_base_url))
            .query(&[("symbol", symbol), ("T", token)]);

        let body = self.get_json(req).await?;
        let Some(row) = body.get("rows").and_then(Value::as_array).and_then(|rows| rows.first()) else {
            return Ok(None);
        };
        StockQuote::from_row(row).map(Some).map_err(MarketError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_provider_row() {
        let quote = StockQuote::from_row(&json!({
            "Name": "Apple Inc.", "ExchangeShortName": "nasdaq", "Price": 189.123456,
            "PrevClose": 187.5, "Open": 0, "AfterHoursPrice": 190.0, "Volume": 5012345,
            "ChangePercent": 0.87
        }))
        .unwrap();

        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.exchange, "NASDAQ");
        assert_eq!(quote.open, None);
        assert_eq!(quote.after_hours_price, Some(190.0));
        assert_eq!(quote.volume, 5_012_345);
    }

    #[test]
    fn price_is_required() {
        assert!(StockQuote::from_row(&json!({"Name": "Apple Inc.", "PrevClose": 1.0})).is_err());
    }
}
