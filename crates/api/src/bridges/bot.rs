//! Bot NLP bridge
//!
//! The bot is an opaque request/response API taking a multipart form of `name`, `message`
//! and `id_cabang` (branch id), replying with JSON carrying `message` or `output` and an
//! optional `needsHumanHelp` flag.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart::Form, Client};
use serde_json::Value;

use super::{check_status, BridgeError, BridgeResult};

/// Text persisted when the bot answered with nothing usable
pub const FALLBACK_REPLY: &str = "I need to transfer you to a human agent.";

#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    /// Reply text, empty when the bot gave none
    pub text: String,
    /// The bot's own request for a human
    pub needs_human_help: bool,
    /// Raw response body
    pub raw: Value,
}

impl BotReply {
    pub fn from_json(raw: Value) -> Self {
        let text = ["message", "output"]
            .iter()
            .filter_map(|key| raw.get(*key).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default()
            .to_string();
        let needs_human_help = raw
            .get("needsHumanHelp")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Self {
            text,
            needs_human_help,
            raw,
        }
    }

    /// Text to persist as the bot message
    pub fn display_text(&self) -> &str {
        if self.text.trim().is_empty() {
            FALLBACK_REPLY
        } else {
            &self.text
        }
    }
}

#[async_trait]
pub trait BotClient: Send + Sync {
    async fn invoke(&self, name: &str, message: &str, branch_id: &str) -> BridgeResult<BotReply>;
}

/// Decides whether a bot reply means "hand this to a human"
#[derive(Debug, Clone)]
pub struct EscalationDetector {
    /// Lowercased phrases
    phrases: Vec<String>,
}

impl EscalationDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn needs_human(&self, reply: &BotReply) -> bool {
        if reply.needs_human_help || reply.text.trim().is_empty() {
            return true;
        }
        let text = reply.text.to_lowercase();
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// HTTP implementation of [`BotClient`]
pub struct HttpBotClient {
    http: Client,
    url: Option<String>,
}

impl HttpBotClient {
    pub fn new(url: Option<String>, timeout: Duration) -> BridgeResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl BotClient for HttpBotClient {
    async fn invoke(&self, name: &str, message: &str, branch_id: &str) -> BridgeResult<BotReply> {
        let url = self.url.as_deref().ok_or(BridgeError::Disabled("bot"))?;

        let form = Form::new()
            .text("name", name.to_string())
            .text("message", message.to_string())
            .text("id_cabang", branch_id.to_string());

        let response = self.http.post(url).multipart(form).send().await?;
        let response = check_status(response).await?;
        let raw: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;

        let reply = BotReply::from_json(raw);
        tracing::debug!(
            reply_len = reply.text.len(),
            needs_human_help = reply.needs_human_help,
            "Bot replied"
        );
        Ok(reply)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ESCALATION_PHRASES;
    use serde_json::json;

    fn reply(text: &str) -> BotReply {
        BotReply::from_json(json!({ "message": text }))
    }

    #[test]
    fn test_reply_prefers_message_then_output() {
        let r = BotReply::from_json(json!({ "message": "", "output": "from output" }));
        assert_eq!(r.text, "from output");
        assert!(!r.needs_human_help);

        let r = BotReply::from_json(json!({ "needsHumanHelp": true }));
        assert_eq!(r.text, "");
        assert_eq!(r.display_text(), FALLBACK_REPLY);
    }

    #[test]
    fn test_detector_matches_phrases_case_insensitively() {
        let detector = EscalationDetector::new(DEFAULT_ESCALATION_PHRASES);
        assert!(detector.needs_human(&reply("Maaf, saya TIDAK BISA MENJAWAB itu")));
        assert!(detector.needs_human(&reply("akan saya arahkan ke agent manusia ya")));
        assert!(!detector.needs_human(&reply("Silakan cek menu laporan")));
    }

    #[test]
    fn test_detector_escalates_on_flag_or_empty_reply() {
        let detector = EscalationDetector::new(Vec::<String>::new());
        assert!(detector.needs_human(&reply("   ")));
        let flagged = BotReply::from_json(json!({ "message": "ok", "needsHumanHelp": true }));
        assert!(detector.needs_human(&flagged));
    }

    #[tokio::test]
    async fn test_http_bot_posts_multipart_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data.*".to_string()),
            )
            .match_body(mockito::Matcher::Regex("name=\"id_cabang\"\r\n\r\nmain".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output":"Halo kak","needsHumanHelp":false}"#)
            .create_async()
            .await;

        let client =
            HttpBotClient::new(Some(format!("{}/bot", server.url())), Duration::from_secs(5))
                .unwrap();
        let reply = client.invoke("Budi", "halo", "main").await.unwrap();

        assert_eq!(reply.text, "Halo kak");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_bot_non_2xx_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot")
            .with_status(502)
            .create_async()
            .await;

        let client =
            HttpBotClient::new(Some(format!("{}/bot", server.url())), Duration::from_secs(5))
                .unwrap();
        let err = client.invoke("Budi", "halo", "main").await.unwrap_err();
        assert!(matches!(err, BridgeError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_bot_fails() {
        let client = HttpBotClient::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.invoke("a", "b", "main").await,
            Err(BridgeError::Disabled("bot"))
        ));
    }
}
