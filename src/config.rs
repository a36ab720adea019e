use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

const DEFAULT_DATABASE_URL: &str = "sqlite://marketsquare.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_POLYGON_BASE_URL: &str = "https://api.polygon.io";
const DEFAULT_QUOTE_BASE_URL: &str = "https://api.cloudquote.io";

/// Runtime settings, read from the environment (and `.env`) once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,

    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
    pub groq_model: String,

    pub polygon_api_key: Option<String>,
    pub polygon_base_url: String,
    pub quote_base_url: String,
    pub quote_api_token: Option<String>,

    pub chat: ChatConfig,
}

/// Limits enforced by the chat relay.
#[derive(Debug, Clone, Copy)]
pub struct ChatConfig {
    pub max_message_len: usize,
    pub moderation_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 500,
            moderation_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());

        let defaults = ChatConfig::default();
        let chat = ChatConfig {
            max_message_len: parse_or(get("MAX_MESSAGE_LEN"), "MAX_MESSAGE_LEN", defaults.max_message_len)?,
            moderation_timeout: Duration::from_secs(parse_or(
                get("MODERATION_TIMEOUT_SECS"),
                "MODERATION_TIMEOUT_SECS",
                defaults.moderation_timeout.as_secs(),
            )?),
        };
        if chat.max_message_len == 0 {
            return Err(anyhow!("MAX_MESSAGE_LEN must be at least 1"));
        }

        Ok(Config {
            database_url: or("DATABASE_URL", DEFAULT_DATABASE_URL),
            bind_addr: or("BIND_ADDR", DEFAULT_BIND_ADDR),
            groq_api_key: get("GROQ_API_KEY"),
            groq_base_url: or("GROQ_BASE_URL", DEFAULT_GROQ_BASE_URL),
            groq_model: or("GROQ_MODEL", DEFAULT_GROQ_MODEL),
            polygon_api_key: get("POLYGON_API_KEY"),
            polygon_base_url: or("POLYGON_BASE_URL", DEFAULT_POLYGON_BASE_URL),
            quote_base_url: or("QUOTE_BASE_URL", DEFAULT_QUOTE_BASE_URL),
            quote_api_token: get("QUOTE_API_TOKEN"),
            chat,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.chat.max_message_len, 500);
        assert_eq!(config.chat.moderation_timeout, Duration::from_secs(10));
        assert!(config.groq_api_key.is_none());
    }

    #[test]
    fn overrides_and_blank_values() {
        let config = Config::from_lookup(lookup(&[
            ("GROQ_API_KEY", "  "),
            ("MAX_MESSAGE_LEN", "280"),
            ("MODERATION_TIMEOUT_SECS", "3"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert!(config.groq_api_key.is_none());
        assert_eq!(config.chat.max_message_len, 280);
        assert_eq!(config.chat.moderation_timeout, Duration::from_secs(3));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Config::from_lookup(lookup(&[("MAX_MESSAGE_LEN", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_MESSAGE_LEN"));

        assert!(Config::from_lookup(lookup(&[("MAX_MESSAGE_LEN", "0")])).is_err());
    }
}
