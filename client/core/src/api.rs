//! MediScan API
//!
//! Typed wrappers for the endpoints the chat layer consumes. Every call goes
//! through the [`FallbackClient`], so each one gets the primary/production
//! retry for free. The analysis and chat models behind these endpoints are
//! opaque; only the request and response shapes matter here.

use serde::{Deserialize, Serialize};

use crate::abort::AbortSignal;
use crate::error::ClientError;
use crate::fallback::{FallbackClient, HttpTransport, RequestOptions};
use crate::messages::{HistoryEntry, SessionId};
use crate::scan::ScanAnalysis;
use crate::upload::ImageAttachment;

/// Body of `POST /api/chat`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The new user message
    pub message: String,
    /// Earlier messages, oldest first
    pub history: Vec<HistoryEntry>,
    /// Attached image as a data URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Conversation the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Context for the model (scan chats)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Body returned by `POST /api/chat`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Assistant reply text
    #[serde(alias = "reply", alias = "content")]
    pub response: String,
}

#[derive(Serialize)]
struct TitleRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct TitleReply {
    title: String,
}

/// Body returned by `GET /api/chat/upload-limit`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLimit {
    /// Whether another image may be attached
    pub can_upload: bool,
    /// Uploads left in the current window
    #[serde(default)]
    pub remaining: Option<u32>,
    /// Uploads allowed per window
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

/// Body of `POST /api/notifications/send`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Recipient
    pub user_id: String,
    /// Notification title
    pub title: String,
    /// Notification body
    pub message: String,
    /// Extra payload for the receiving app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Endpoint wrappers over a [`FallbackClient`]
pub struct MediscanApi<T: HttpTransport> {
    client: FallbackClient<T>,
}

impl<T: HttpTransport> MediscanApi<T> {
    /// Wrap a fallback client
    pub fn new(client: FallbackClient<T>) -> Self {
        Self { client }
    }

    /// The underlying fallback client
    pub fn client(&self) -> &FallbackClient<T> {
        &self.client
    }

    /// Ask the assistant for a reply
    pub async fn chat(
        &self,
        request: &ChatRequest,
        signal: Option<AbortSignal>,
    ) -> Result<ChatReply, ClientError> {
        let mut options = RequestOptions::post_json(request)?;
        if let Some(signal) = signal {
            options = options.with_signal(signal);
        }
        self.client.request_json("/api/chat", options).await
    }

    /// Ask for a short conversation title
    ///
    /// A blank title counts as a failure.
    pub async fn generate_title(&self, message: &str) -> Result<String, ClientError> {
        let options = RequestOptions::post_json(&TitleRequest { message })?;
        let reply: TitleReply = self
            .client
            .request_json("/api/generate-title", options)
            .await?;

        let title = reply.title.trim().trim_matches('"').trim();
        if title.is_empty() {
            return Err(ClientError::UnexpectedResponse(
                "generated title is empty".to_string(),
            ));
        }
        Ok(title.to_string())
    }

    /// Whether the user may attach another image
    pub async fn upload_limit(&self) -> Result<UploadLimit, ClientError> {
        self.client
            .request_json("/api/chat/upload-limit", RequestOptions::get())
            .await
    }

    /// Analyze a photo of medicine packaging
    pub async fn analyze(&self, image: &ImageAttachment) -> Result<ScanAnalysis, ClientError> {
        let options = RequestOptions::post_json(&AnalyzeRequest {
            image: image.data_url(),
        })?;
        let value = self
            .client
            .fetch_with_fallback("/api/analyze", options, true)
            .await?
            .into_json()?;
        Ok(ScanAnalysis::from_value(value))
    }

    /// Send a push notification through the backend
    pub async fn send_notification(
        &self,
        request: &NotificationRequest,
    ) -> Result<serde_json::Value, ClientError> {
        let options = RequestOptions::post_json(request)?;
        self.client
            .request_json("/api/notifications/send", options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::fallback::HttpMethod;
    use crate::messages::MessageRole;
    use crate::testing::{MockReply, MockTransport, PRIMARY, PRODUCTION};

    fn api(transport: &MockTransport) -> MediscanApi<MockTransport> {
        MediscanApi::new(FallbackClient::new(
            Some(PRIMARY.to_string()),
            Some(PRODUCTION.to_string()),
            transport.clone(),
        ))
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let request = ChatRequest {
            message: "And with alcohol?".to_string(),
            history: vec![HistoryEntry {
                role: MessageRole::User,
                content: "Is ibuprofen safe?".to_string(),
            }],
            session_id: Some(SessionId::new("c1")),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "message": "And with alcohol?",
                "history": [{"role": "user", "content": "Is ibuprofen safe?"}],
                "sessionId": "c1",
            })
        );
    }

    #[tokio::test]
    async fn test_chat_reply_aliases() {
        let transport = MockTransport::new();
        transport.route("/api/chat", MockReply::json(200, json!({"reply": "Yes."})));

        let reply = api(&transport)
            .chat(&ChatRequest::default(), None)
            .await
            .unwrap();

        assert_eq!(reply.response, "Yes.");
        assert_eq!(transport.calls()[0].method, HttpMethod::Post);
    }

    #[tokio::test]
    async fn test_missing_reply_field_is_decode_error() {
        let transport = MockTransport::new();
        transport.route("/api/chat", MockReply::json(200, json!({"error": "quota"})));

        let err = api(&transport)
            .chat(&ChatRequest::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_generate_title_trims_quotes() {
        let transport = MockTransport::new();
        transport.route(
            "/api/generate-title",
            MockReply::json(200, json!({"title": " \"Fever Relief\" "})),
        );

        let title = api(&transport).generate_title("I have a fever").await.unwrap();
        assert_eq!(title, "Fever Relief");
        assert_eq!(
            transport.calls()[0].body_text(),
            r#"{"message":"I have a fever"}"#
        );
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let transport = MockTransport::new();
        transport.route("/api/generate-title", MockReply::json(200, json!({"title": "  "})));

        let err = api(&transport).generate_title("hi").await.unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_upload_limit_is_get() {
        let transport = MockTransport::new();
        transport.route(
            "/api/chat/upload-limit",
            MockReply::json(200, json!({"canUpload": false, "remaining": 0, "limit": 5})),
        );

        let limit = api(&transport).upload_limit().await.unwrap();

        assert_eq!(
            limit,
            UploadLimit {
                can_upload: false,
                remaining: Some(0),
                limit: Some(5),
            }
        );
        assert_eq!(transport.calls()[0].method, HttpMethod::Get);
    }

    #[tokio::test]
    async fn test_analyze_extracts_name() {
        let transport = MockTransport::new();
        transport.route(
            "/api/analyze",
            MockReply::json(200, json!({"medicineName": "Ibuprofen 200mg", "dosage": "1 tablet"})),
        );
        let image = ImageAttachment::from_bytes(b"\x89PNG fake", "png").unwrap();

        let analysis = api(&transport).analyze(&image).await.unwrap();

        assert_eq!(analysis.medicine_name.as_deref(), Some("Ibuprofen 200mg"));
        assert_eq!(analysis.data["dosage"], "1 tablet");
        assert!(transport.calls()[0]
            .body_text()
            .starts_with(r#"{"image":"data:image/png;base64,"#));
    }

    #[tokio::test]
    async fn test_send_notification() {
        let transport = MockTransport::new();
        transport.route(
            "/api/notifications/send",
            MockReply::json(200, json!({"success": true})),
        );

        let result = api(&transport)
            .send_notification(&NotificationRequest {
                user_id: "u1".to_string(),
                title: "Reminder".to_string(),
                message: "Take your medicine".to_string(),
                data: None,
            })
            .await
            .unwrap();

        assert_eq!(result, json!({"success": true}));
        let body: serde_json::Value =
            serde_json::from_str(&transport.calls()[0].body_text()).unwrap();
        assert_eq!(body["userId"], "u1");
    }
}
