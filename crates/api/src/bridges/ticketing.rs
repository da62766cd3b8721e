//! Ticketing bridge (ClickUp-style task API)

use async_trait::async_trait;
use chatrelay_shared::{Message, SessionId, TicketRef};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use super::{check_status, BridgeError, BridgeResult};
use crate::config::TicketingConfig;

/// Everything needed to open a ticket for an escalated session
#[derive(Debug, Clone)]
pub struct TicketRequest {
    pub session_id: SessionId,
    pub user_name: String,
    pub reason: String,
    pub history: Vec<Message>,
}

impl TicketRequest {
    pub fn task_name(&self) -> String {
        format!(
            "Tech Escalation: {} - Session #{}",
            self.user_name, self.session_id
        )
    }

    /// Markdown body: the reason followed by the chat transcript
    pub fn description(&self) -> String {
        let history = self
            .history
            .iter()
            .map(|m| {
                let at = m
                    .created_at
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| m.created_at.to_string());
                format!(
                    "**{} ({}):** {}",
                    m.sender.as_str().to_uppercase(),
                    at,
                    m.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            "## Escalation Reason\n{}\n\n## Chat History\n{}",
            self.reason, history
        )
    }
}

#[async_trait]
pub trait TicketingClient: Send + Sync {
    /// Open a task. `Err(BridgeError::Disabled)` when no credentials are configured.
    async fn create_ticket(&self, request: &TicketRequest) -> BridgeResult<TicketRef>;
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    name: String,
    description: String,
    assignees: &'a [u64],
    status: &'static str,
    priority: u8,
    tags: [&'static str; 3],
    /// Milliseconds since the epoch
    due_date: i64,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// HTTP implementation of [`TicketingClient`]
pub struct ClickUpTicketing {
    http: Client,
    config: TicketingConfig,
}

impl ClickUpTicketing {
    pub fn new(config: TicketingConfig) -> BridgeResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl TicketingClient for ClickUpTicketing {
    async fn create_ticket(&self, request: &TicketRequest) -> BridgeResult<TicketRef> {
        let (Some(token), Some(list_id)) = (&self.config.api_token, &self.config.list_id) else {
            return Err(BridgeError::Disabled("ticketing"));
        };

        let due = OffsetDateTime::now_utc() + Duration::days(7);
        let body = CreateTaskBody {
            name: request.task_name(),
            description: request.description(),
            assignees: &self.config.assignees,
            status: "to do",
            priority: 2,
            tags: ["escalation", "tech-support", "live-chat"],
            due_date: (due.unix_timestamp_nanos() / 1_000_000) as i64,
        };

        let url = format!(
            "{}/list/{}/task",
            self.config.api_url.trim_end_matches('/'),
            list_id
        );
        // Personal tokens go in the Authorization header as-is
        let response = self
            .http
            .post(url)
            .header("Authorization", token)
            .json(&body)
            .send()
            .await?;
        let task: CreatedTask = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;

        let url = task.url.filter(|u| !u.is_empty()).unwrap_or_else(|| {
            format!(
                "{}/{}",
                self.config.task_url_base.trim_end_matches('/'),
                task.id
            )
        });

        tracing::info!(session_id = %request.session_id, ticket_id = %task.id, "Ticket created");
        Ok(TicketRef { id: task.id, url })
    }
}
