pub mod appresult;
pub mod chat;
pub mod communities;
pub mod config;
pub mod db;
pub mod llm;
pub mod market;
pub mod summary;
pub mod telemetry;

use std::sync::Arc;

use anyhow::anyhow;
use axum::{extract::FromRef, Router};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{ApiError, AppError, AppResult};
use chat::{ChatRelay, LlmModerator};
use config::Config;
use db::SqliteStore;
use llm::LlmClient;
use market::MarketClient;

/// The relay as wired in production.
pub type Relay = ChatRelay<LlmModerator, SqliteStore, SqliteStore>;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: SqliteStore,
    pub relay: Arc<Relay>,
    pub llm: LlmClient,
    pub market: MarketClient,
}

impl AppState {
    pub fn new(config: &Config, store: SqliteStore, http: reqwest::Client) -> AppState {
        let llm = LlmClient::from_config(http.clone(), config);
        let relay = ChatRelay::new(
            LlmModerator::new(llm.clone()),
            store.clone(),
            store.clone(),
            config.chat,
        );

        AppState {
            store,
            relay: Arc::new(relay),
            llm,
            market: MarketClient::from_config(http, config),
        }
    }
}

/// Every route, with CORS open to any origin and request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(chat::router())
        .merge(summary::router())
        .merge(market::router())
        .nest("/api/communities", communities::router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String>;
    fn get_f64_field(&self, field: &str) -> anyhow::Result<f64>;
    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String> {
        Ok(
            self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or_else(|| anyhow!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_f64_field(&self, field: &str) -> anyhow::Result<f64> {
        self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))?
            .as_f64()
            .ok_or_else(|| anyhow!("expected {field} in {self} to be a number"))
    }

    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value> {
        self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))
    }
}

/// Markdown to an HTML fragment.
pub fn render_markdown(markdown: &str) -> String {
    use pulldown_cmark::{Options, Parser};

    let parser = Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
    let mut html_output = String::new();
    pulldown_cmark::html::push_html(&mut html_output, parser);
    html_output
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::testing::test_store;

    /// LLM client with no key: every call fails fast, moderation fails open.
    pub(crate) fn offline_llm() -> LlmClient {
        LlmClient::new(reqwest::Client::new(), "http://127.0.0.1:9", "test-model", None)
    }

    pub(crate) async fn test_state(llm: LlmClient, market: MarketClient) -> AppState {
        let store = test_store().await;
        let relay = ChatRelay::new(
            LlmModerator::new(llm.clone()),
            store.clone(),
            store.clone(),
            config::ChatConfig::default(),
        );
        AppState { store, relay: Arc::new(relay), llm, market }
    }

    pub(crate) async fn test_app() -> (Router, AppState) {
        let state = test_state(offline_llm(), MarketClient::offline()).await;
        (app(state.clone()), state)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn get_field_reports_missing_and_mistyped() {
        let value = json!({"Name": "Apple", "Price": 189.5});
        assert_eq!(value.get_str_field("Name").unwrap(), "Apple");
        assert_eq!(value.get_f64_field("Price").unwrap(), 189.5);
        assert!(value.get_str_field("Price").is_err());
        assert!(value.get_obj_field("Volume").is_err());
    }

    #[test]
    fn markdown_renders_to_html() {
        let html = render_markdown("**Apple** rallied\n\n- up 3%");
        assert!(html.contains("<strong>Apple</strong>"));
        assert!(html.contains("<li>up 3%</li>"));
    }
}
