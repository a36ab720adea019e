use axum::{debug_handler, extract::{Query, State}, Json};
use serde::Deserialize;

use super::{parse_date, parse_symbol, yesterday, MarketClient, OpenClose};
use crate::{appresult::ApiError, AppResult};

#[derive(Debug, Deserialize)]
pub(crate) struct PricesQuery {
    symbol: Option<String>,
    date: Option<String>,
}

/// High, low and close of one trading day. Defaults to AAPL, yesterday.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn prices(
    State(market): State<MarketClient>,
    Query(query): Query<PricesQuery>,
) -> AppResult<Json<OpenClose>> {
    let symbol = parse_symbol(query.symbol.as_deref())?;
    let date = parse_date(query.date.as_deref(), yesterday())?;

    let day = market.open_close(&symbol, date).await.map_err(ApiError::from)?;
    Ok(Json(day))
}
