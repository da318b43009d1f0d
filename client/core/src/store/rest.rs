//! Hosted chat store
//!
//! Talks to a PostgREST-compatible backend with two tables:
//!
//! - `chats (id, title, created_at, updated_at)`
//! - `messages (chat_id, role, content, image_url, created_at)`
//!
//! Every request carries the public key both as `apikey` and as a bearer
//! token, the way the hosted backend expects from an unauthenticated client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChatStore, SessionSummary, StoredSession};
use crate::config::StoreConfig;
use crate::error::ClientError;
use crate::fallback::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::messages::{ChatMessage, MessageRole, SessionId};
use crate::session::DEFAULT_TITLE;

/// Row ids may be uuids or serial integers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowId {
    Text(String),
    Number(i64),
}

impl From<RowId> for SessionId {
    fn from(id: RowId) -> Self {
        match id {
            RowId::Text(id) => SessionId::new(id),
            RowId::Number(id) => SessionId::new(id.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRow {
    id: RowId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRow {
    role: MessageRole,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

/// Chat store backed by a hosted PostgREST API
pub struct RestChatStore<T: HttpTransport> {
    base: String,
    anon_key: String,
    transport: T,
}

impl<T: HttpTransport> RestChatStore<T> {
    /// Create a store for `config`
    pub fn new(config: &StoreConfig, transport: T) -> Self {
        Self {
            base: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            transport,
        }
    }

    fn url(&self, table: &str, query: &[(&str, &str)]) -> Result<String, ClientError> {
        let raw = format!("{}/rest/v1/{table}", self.base);
        let mut url = Url::parse(&raw)
            .map_err(|e| ClientError::Store(format!("invalid store URL {raw}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<serde_json::Value>,
        prefer: Option<&str>,
    ) -> Result<HttpResponse, ClientError> {
        let mut headers = vec![
            ("apikey".to_string(), self.anon_key.clone()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.anon_key),
            ),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(prefer) = prefer {
            headers.push(("Prefer".to_string(), prefer.to_string()));
        }

        let request = HttpRequest {
            method,
            url,
            headers,
            body: body.map(|b| serde_json::to_vec(&b)).transpose()?,
        };
        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            "Chat store request"
        );

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(ClientError::status(response.status, &response.text()));
        }
        Ok(response)
    }
}

#[async_trait]
impl<T: HttpTransport> ChatStore for RestChatStore<T> {
    fn name(&self) -> &str {
        "rest"
    }

    async fn create_session(&self, title: &str) -> Result<SessionId, ClientError> {
        let url = self.url("chats", &[])?;
        let response = self
            .send(
                HttpMethod::Post,
                url,
                Some(json!({ "title": title })),
                Some("return=representation"),
            )
            .await?;

        let rows: Vec<ChatRow> = response.json()?;
        rows.into_iter()
            .next()
            .map(|row| row.id.into())
            .ok_or_else(|| ClientError::UnexpectedResponse("created chat row missing".to_string()))
    }

    async fn append_message(
        &self,
        id: &SessionId,
        message: &ChatMessage,
    ) -> Result<(), ClientError> {
        let mut row = serde_json::to_value(MessageRow {
            role: message.role,
            content: message.content.clone(),
            created_at: message.timestamp,
            image_url: message.image_preview.clone(),
        })?;
        row["chat_id"] = json!(id.as_str());

        let url = self.url("messages", &[])?;
        self.send(HttpMethod::Post, url, Some(row), Some("return=minimal"))
            .await?;
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, ClientError> {
        let filter = format!("eq.{id}");
        let url = self.url(
            "chats",
            &[("id", filter.as_str()), ("select", "id,title,created_at,updated_at")],
        )?;
        let rows: Vec<ChatRow> = self.send(HttpMethod::Get, url, None, None).await?.json()?;
        let Some(chat) = rows.into_iter().next() else {
            return Ok(None);
        };

        let url = self.url(
            "messages",
            &[
                ("chat_id", filter.as_str()),
                ("select", "role,content,created_at,image_url"),
                ("order", "created_at.asc"),
            ],
        )?;
        let rows: Vec<MessageRow> = self.send(HttpMethod::Get, url, None, None).await?.json()?;

        let messages = rows
            .into_iter()
            .map(|row| ChatMessage {
                role: row.role,
                content: row.content,
                timestamp: row.created_at,
                image_preview: row.image_url,
                is_error: false,
            })
            .collect();

        Ok(Some(StoredSession {
            id: chat.id.into(),
            title: chat.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            messages,
        }))
    }

    async fn update_title(&self, id: &SessionId, title: &str) -> Result<(), ClientError> {
        let filter = format!("eq.{id}");
        let url = self.url("chats", &[("id", filter.as_str())])?;
        self.send(
            HttpMethod::Patch,
            url,
            Some(json!({ "title": title, "updated_at": Utc::now() })),
            Some("return=minimal"),
        )
        .await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        let url = self.url(
            "chats",
            &[
                ("select", "id,title,created_at,updated_at"),
                ("order", "updated_at.desc"),
            ],
        )?;
        let rows: Vec<ChatRow> = self.send(HttpMethod::Get, url, None, None).await?.json()?;

        Ok(rows
            .into_iter()
            .map(|row| SessionSummary {
                updated_at: row
                    .updated_at
                    .or(row.created_at)
                    .unwrap_or_else(Utc::now),
                title: row.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                id: row.id.into(),
            })
            .collect())
    }
}
