use std::{fmt, str::FromStr};

use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{parse_symbol, MarketClient, StockQuote};
use crate::{
    appresult::ApiError,
    llm::{LlmClient, Turn},
    render_markdown, AppResult,
};

/// When in the trading day the article is written; picks the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePeriod {
    #[serde(rename = "Mid-day")]
    MidDay,
    #[serde(rename = "Pre-market-bullish")]
    PreMarketBullish,
    #[serde(rename = "Pre-market-bearish")]
    PreMarketBearish,
    #[serde(rename = "Post-market")]
    PostMarket,
}

impl TimePeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            TimePeriod::MidDay => "Mid-day",
            TimePeriod::PreMarketBullish => "Pre-market-bullish",
            TimePeriod::PreMarketBearish => "Pre-market-bearish",
            TimePeriod::PostMarket => "Post-market",
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TimePeriod::MidDay, TimePeriod::PreMarketBullish, TimePeriod::PreMarketBearish, TimePeriod::PostMarket]
            .into_iter()
            .find(|period| period.as_str() == s)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown time_period: {s}")))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArticleQuery {
    symbol: Option<String>,
    time_period: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Article {
    symbol: String,
    name: String,
    price: f64,
    prev_close: f64,
    volume: u64,
    exchange: String,
    change_percent: f64,
    time_period: TimePeriod,
    article: String,
    article_html: String,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Percent move from the previous close to the after-hours price.
fn after_hours_change(quote: &StockQuote) -> f64 {
    let prev_close = round3(quote.prev_close);
    if prev_close == 0.0 {
        return 0.0;
    }
    (round3(quote.after_hours_price.unwrap_or_default()) / prev_close - 1.0) * 100.0
}

pub(crate) fn build_prompt(period: TimePeriod, quote: &StockQuote) -> String {
    let opened = match quote.open {
        Some(open) => format!("opened today at ${}", round3(open)),
        None => " ".to_owned(),
    };
    let price = round3(quote.price);
    let prev_close = round3(quote.prev_close);
    let volume = quote.volume;

    match period {
        TimePeriod::MidDay => {
            let change = round3(quote.change_percent);
            let mut prompt = format!(
                "Write an engaging informative article in 100 words about the stock XYZ {opened}, currently trading at ${price}, previous session close price was ${prev_close}, current volume is {volume}"
            );
            if change > 0.0 {
                prompt += &format!(" and change percent from market open till now is {change}");
            }
            prompt
        }
        TimePeriod::PreMarketBullish => {
            let after_hours = round3(quote.after_hours_price.unwrap_or_default());
            let change = after_hours_change(quote);
            let mut prompt = format!(
                "Write an engaging informative article in 100 words about the stock XYZ that opened at bullish price ${after_hours}, previous session close price was ${prev_close}, current volume is {volume}"
            );
            if change > 0.0 {
                prompt += &format!(" and change percent from market open till now is {change}. ");
            }
            if change > 20.0 {
                prompt += "Article should sound like exciting announcement ";
            }
            prompt
        }
        TimePeriod::PreMarketBearish => {
            let after_hours = round3(quote.after_hours_price.unwrap_or_default());
            let change = after_hours_change(quote);
            let mut prompt = format!(
                "Write an engaging informative article in 100 words about the stock XYZ that opened at bearish price ${after_hours}, previous session close price was ${prev_close}, current volume is {volume}"
            );
            if change < 0.0 {
                prompt += &format!(" and change percent from market open till now is {change}. ");
            }
            if change < -20.0 {
                prompt += "Article should sound like announcement for major stock fall";
            }
            prompt
        }
        TimePeriod::PostMarket => {
            let change = round3(quote.change_percent);
            let movement = if change > 0.0 {
                "showed bullish movement "
            } else if change < 0.0 {
                "showed bearish movement"
            } else {
                ""
            };
            let mut prompt = format!(
                "Write an informative article in 100 words about the stock XYZ {opened}, {movement}, closed at price ${price} and change in percent from market open till now is {change}. "
            );
            if change < -10.0 {
                prompt += "Article should sound like announcement for major stock fall";
            }
            if change > 20.0 {
                prompt += "Article should sound like exciting announcement ";
            }
            prompt
        }
    }
}

/// Swaps the model's `XYZ` placeholder for `Name(EXCHANGE:SYMBOL)`.
pub(crate) fn name_company(article: &str, symbol: &str, quote: &StockQuote) -> String {
    let label = format!("{}({}:{symbol})", quote.name, quote.exchange);
    [
        "The stock of company, XYZ",
        "The company, XYZ",
        "stock XYZ",
        "XYZ stock",
        "stock xyz",
        "XYZ",
        "xyz",
    ]
    .into_iter()
    .fold(article.to_owned(), |text, placeholder| text.replace(placeholder, &label))
}

async fn write_article(llm: &LlmClient, prompt: String) -> Result<String, crate::llm::LlmError> {
    llm.complete(&[
        Turn::system("You are a financial analyst"),
        Turn::user(prompt),
        Turn::user("Do not mention any trading symbol information"),
    ])
    .await
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn generate_article(
    State(market): State<MarketClient>,
    State(llm): State<LlmClient>,
    Json(query): Json<ArticleQuery>,
) -> AppResult<Json<Article>> {
    let (Some(symbol), Some(period)) = (
        query.symbol.filter(|s| !s.trim().is_empty()),
        query.time_period.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing required parameters").into());
    };
    let symbol = parse_symbol(Some(symbol.as_str()))?;
    let period: TimePeriod = period.trim().parse()?;

    let quote = match market.quote(&symbol).await {
        Ok(Some(quote)) => quote,
        Ok(None) => return Err(ApiError::not_found("Failed to fetch stock information").into()),
        Err(err) => {
            tracing::warn!(%symbol, error = %err, "quote lookup failed");
            return Err(ApiError::not_found("Failed to fetch stock information").into());
        }
    };

    let article = match write_article(&llm, build_prompt(period, &quote)).await {
        Ok(text) => name_company(&text, &symbol, &quote),
        Err(err) => {
            tracing::error!(%symbol, error = %err, "article generation failed");
            return Err(ApiError::Internal("Failed to generate article".to_owned()).into());
        }
    };
    tracing::info!(%symbol, %period, "article generated");

    Ok(Json(Article {
        article_html: render_markdown(&article),
        symbol,
        name: quote.name,
        price: round3(quote.price),
        prev_close: round3(quote.prev_close),
        volume: quote.volume,
        exchange: quote.exchange,
        change_percent: round3(quote.change_percent),
        time_period: period,
        article,
    }))
}
