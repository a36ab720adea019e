use std::future::Future;

use serde::Deserialize;

use crate::llm::{LlmClient, LlmError, Turn};

/// Outcome of reviewing one chat message. `reason` is set only when flagged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub flagged: bool,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn flagged(reason: impl Into<String>) -> Self {
        Self { flagged: true, reason: Some(reason.into()) }
    }
}

/// Classifies message text. Implementations may be slow or fail; the relay
/// bounds the call with a timeout and treats any failure as a clean verdict.
pub trait ModerationOracle: Send + Sync {
    fn review(&self, text: &str) -> impl Future<Output = Result<Verdict, ModerationError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

const MODERATOR_PROMPT: &str = "You are an AI moderator of a finance based community chat. \
Analyze the given message and determine if it's appropriate. The motive is to stop spam and \
inappropriate or misleading marketing messages. Reply with a JSON object of the form \
{\"flagged\": true|false, \"reason\": \"short explanation, or null when not flagged\"}.";

/// Moderation backed by the chat-completions model.
#[derive(Clone)]
pub struct LlmModerator {
    llm: LlmClient,
}

impl LlmModerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

impl ModerationOracle for LlmModerator {
    async fn review(&self, text: &str) -> Result<Verdict, ModerationError> {
        let reply = self.llm
            .complete_json(&[
                Turn::system(MODERATOR_PROMPT),
                Turn::user(format!("Please analyze this message:\n\n{text}")),
            ])
            .await?;

        Ok(parse_verdict(&reply))
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    flagged: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Reads the model's reply. Structured replies are trusted as-is; anything else
/// is flagged only if the prose calls the message inappropriate, and the prose
/// becomes the reason.
pub(crate) fn parse_verdict(reply: &str) -> Verdict {
    if let Ok(RawVerdict { flagged, reason }) = serde_json::from_str::<RawVerdict>(reply.trim()) {
        if !flagged {
            return Verdict::clean();
        }
        let reason = reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Flagged by moderator".to_owned());
        return Verdict::flagged(reason);
    }

    let lower = reply.to_lowercase();
    if lower.contains("inappropriate") || lower.contains("not appropriate") {
        Verdict::flagged(reply.trim())
    } else {
        Verdict::clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::fake_llm;

    #[test]
    fn structured_verdicts() {
        assert_eq!(parse_verdict(r#"{"flagged": false, "reason": null}"#), Verdict::clean());
        assert_eq!(
            parse_verdict(r#"{"flagged": false, "reason": "looks fine"}"#),
            Verdict::clean()
        );
        assert_eq!(
            parse_verdict(r#" {"flagged": true, "reason": "promotional/misleading"} "#),
            Verdict::flagged("promotional/misleading")
        );
        assert_eq!(
            parse_verdict(r#"{"flagged": true}"#),
            Verdict::flagged("Flagged by moderator")
        );
    }

    #[test]
    fn prose_falls_back_to_keywords() {
        let verdict = parse_verdict("This message is inappropriate: it promises guaranteed returns.");
        assert!(verdict.flagged);
        assert!(verdict.reason.unwrap().contains("guaranteed returns"));

        assert_eq!(parse_verdict("The message is a normal question."), Verdict::clean());
    }

    #[tokio::test]
    async fn llm_moderator_sends_text_and_parses_reply() {
        let llm = fake_llm(|body| {
            let user = body["messages"][1]["content"].as_str().unwrap_or_default();
            assert!(user.contains("1000% returns"));
            Some(r#"{"flagged": true, "reason": "promotional/misleading"}"#.into())
        })
        .await;

        let verdict = LlmModerator::new(llm)
            .review("Buy now guaranteed 1000% returns!!!")
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::flagged("promotional/misleading"));
    }

    #[tokio::test]
    async fn llm_failure_surfaces_as_error() {
        let llm = fake_llm(|_| None).await;
        assert!(LlmModerator::new(llm).review("hi").await.is_err());
    }
}
