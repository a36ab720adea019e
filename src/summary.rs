use axum::{debug_handler, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    appresult::ApiError,
    llm::{LlmClient, LlmError, Turn},
    AppResult, AppState,
};

const SUMMARIZER_PROMPT: &str = "You are a helpful assistant that summarizes chat conversations. \
Make sure to identify the language first and after analysing only provide the summary in the \
native language. And only provide summary nothing else. If the language is native but written \
in english, provide the answer in english but with words of native language";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/summarize", post(summarize_chat))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatLine {
    pub sender: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SummarizeQuery {
    messages: Vec<ChatLine>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub summary: String,
}

pub(crate) fn transcript(lines: &[ChatLine]) -> String {
    lines.iter()
        .map(|line| format!("{}: {}", line.sender, line.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn summarize(llm: &LlmClient, lines: &[ChatLine]) -> Result<String, LlmError> {
    llm.complete(&[
        Turn::system(SUMMARIZER_PROMPT),
        Turn::user(format!("Please summarize the following chat conversation:\n\n{}", transcript(lines))),
    ])
    .await
}

/// Shared by `/summarize` and the per-community summary route.
pub(crate) async fn summary_response(llm: &LlmClient, lines: &[ChatLine]) -> AppResult<Json<Summary>> {
    if lines.is_empty() {
        return Err(ApiError::bad_request("No messages to summarize").into());
    }

    match summarize(llm, lines).await {
        Ok(summary) => Ok(Json(Summary { summary })),
        Err(err) => {
            tracing::error!(error = %err, "summarization failed");
            Err(ApiError::Internal("Failed to generate summary".to_owned()).into())
        }
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn summarize_chat(
    State(llm): State<LlmClient>,
    Json(SummarizeQuery { messages }): Json<SummarizeQuery>,
) -> AppResult<Json<Summary>> {
    summary_response(&llm, &messages).await
}
