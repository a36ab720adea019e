//! Minimal client for an OpenAI-compatible chat-completions API (Groq by default).

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("GROQ_API_KEY is not configured")]
    NotConfigured,

    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm returned {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("llm returned no content")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        Self::new(http, &config.groq_base_url, &config.groq_model, config.groq_api_key.clone())
    }

    /// Free-form completion; returns the first choice's text.
    pub async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError> {
        self.send(messages, None).await
    }

    /// Completion constrained to a JSON object reply.
    pub async fn complete_json(&self, messages: &[Turn]) -> Result<String, LlmError> {
        self.send(messages, Some(ResponseFormat { kind: "json_object" })).await
    }

    async fn send(&self, messages: &[Turn], response_format: Option<ResponseFormat>) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        let res = self.http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                response_format,
            })
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body: CompletionResponse = res.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::{http::{HeaderMap, StatusCode}, routing::post, Json, Router};
    use serde_json::{json, Value};

    use super::*;

    /// Serves a canned chat-completions endpoint on an ephemeral port.
    /// `reply` sees the request body and returns the assistant's text.
    pub(crate) async fn fake_llm<F>(reply: F) -> LlmClient
    where
        F: Fn(&Value) -> Option<String> + Clone + Send + Sync + 'static,
    {
        let app = Router::new().route(
            "/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let reply = reply.clone();
                async move {
                    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
                    }
                    match reply(&body) {
                        Some(text) => (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"role": "assistant", "content": text}}]})),
                        ),
                        None => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "down"}))),
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        LlmClient::new(reqwest::Client::new(), format!("http://{addr}"), "test-model", Some("test-key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::fake_llm, *};

    #[tokio::test]
    async fn returns_first_choice_text() {
        let client = fake_llm(|body| {
            assert_eq!(body["model"], "test-model");
            assert_eq!(body["messages"][0]["role"], "system");
            assert!(body.get("response_format").is_none());
            Some("hello there".into())
        })
        .await;

        let text = client
            .complete(&[Turn::system("be nice"), Turn::user("hi")])
            .await
            .unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn json_mode_sets_response_format() {
        let client = fake_llm(|body| {
            assert_eq!(body["response_format"]["type"], "json_object");
            Some("{}".into())
        })
        .await;

        assert_eq!(client.complete_json(&[Turn::user("x")]).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn upstream_failure_is_status_error() {
        let client = fake_llm(|_| None).await;
        let err = client.complete(&[Turn::user("x")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status, .. } if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn blank_reply_is_empty_response() {
        let client = fake_llm(|_| Some("   ".into())).await;
        assert!(matches!(client.complete(&[Turn::user("x")]).await, Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        let client = LlmClient::new(reqwest::Client::new(), "http://127.0.0.1:9", "m", None);
        assert!(matches!(client.complete(&[Turn::user("x")]).await, Err(LlmError::NotConfigured)));
    }
}
