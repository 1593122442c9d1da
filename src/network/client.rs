use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::api::{
    ConversationDetail, ConversationFilter, ConversationPage, InboxApi, MessagePage,
    NewConversation,
};
use crate::common::{
    Appointment, AppointmentAction, AppointmentId, AttachmentId, ConversationId,
    ConversationSummary, Message, MessageId, OutgoingMessage, Pagination,
};
use crate::error::{SyncError, SyncResult};

/// JSON-over-HTTP implementation of [`InboxApi`].
pub struct HttpInboxApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    data: Vec<ConversationSummary>,
    meta: Pagination,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    metadata: Value,
    attachment_ids: &'a [AttachmentId],
}

#[derive(Serialize)]
struct RespondBody<'a> {
    action: AppointmentAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Deserialize)]
struct RespondResponse {
    #[serde(default)]
    appointment: Option<Appointment>,
}

#[derive(Deserialize)]
struct UnreadCountResponse {
    count: u32,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl HttpInboxApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn execute_empty(&self, request: RequestBuilder) -> SyncResult<()> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await?;
        Err(error_for_status(status, &body))
    }
}

pub(crate) fn filter_query(filter: &ConversationFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("sort", filter.sort.as_str().to_string()),
        ("page", filter.page.to_string()),
        ("per_page", filter.per_page.to_string()),
    ];
    if let Some(kind) = filter.kind {
        query.push(("type", kind.as_str().to_string()));
    }
    if filter.unread_only {
        query.push(("unread", "1".to_string()));
    }
    query
}

/// Maps a non-success response onto the error taxonomy.
pub(crate) fn error_for_status(status: StatusCode, body: &[u8]) -> SyncError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(message),
        StatusCode::CONFLICT => SyncError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Validation(message)
        }
        _ => SyncError::Network(message),
    }
}

#[async_trait]
impl InboxApi for HttpInboxApi {
    async fn list_conversations(&self, filter: &ConversationFilter) -> SyncResult<ConversationPage> {
        let request = self
            .request(Method::GET, "/conversations")
            .query(&filter_query(filter));
        let response: ListResponse = self.execute(request).await?;
        Ok(ConversationPage {
            conversations: response.data,
            pagination: response.meta,
        })
    }

    async fn conversation_detail(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> SyncResult<ConversationDetail> {
        let request = self
            .request(Method::GET, &format!("/conversations/{conversation_id}"))
            .query(&[("limit", limit)]);
        self.execute(request).await
    }

    async fn messages_after(
        &self,
        conversation_id: ConversationId,
        after: Option<MessageId>,
    ) -> SyncResult<MessagePage> {
        let mut request =
            self.request(Method::GET, &format!("/conversations/{conversation_id}/messages"));
        if let Some(after) = after {
            request = request.query(&[("after_id", after.0)]);
        }
        self.execute(request).await
    }

    async fn messages_before(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
        limit: u32,
    ) -> SyncResult<MessagePage> {
        let request = self
            .request(Method::GET, &format!("/conversations/{conversation_id}/messages"))
            .query(&[("before_id", before.0), ("limit", u64::from(limit))]);
        self.execute(request).await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &OutgoingMessage,
    ) -> SyncResult<Message> {
        let body = SendMessageBody {
            content: &message.content,
            kind: message.body.kind(),
            metadata: message.body.metadata(),
            attachment_ids: &message.attachment_ids,
        };
        let request = self
            .request(Method::POST, &format!("/conversations/{conversation_id}/messages"))
            .json(&body);
        self.execute(request).await
    }

    async fn respond_to_appointment(
        &self,
        conversation_id: ConversationId,
        appointment_id: AppointmentId,
        action: AppointmentAction,
        reason: Option<&str>,
    ) -> SyncResult<Option<Appointment>> {
        let request = self
            .request(
                Method::POST,
                &format!("/conversations/{conversation_id}/appointments/{appointment_id}/respond"),
            )
            .json(&RespondBody { action, reason });
        let response: RespondResponse = self.execute(request).await?;
        Ok(response.appointment)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> SyncResult<()> {
        let request = self.request(Method::POST, &format!("/conversations/{conversation_id}/read"));
        self.execute_empty(request).await
    }

    async fn unread_count(&self) -> SyncResult<u32> {
        let request = self.request(Method::GET, "/conversations/unread-count");
        let response: UnreadCountResponse = self.execute(request).await?;
        Ok(response.count)
    }

    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> SyncResult<ConversationSummary> {
        let request = self.request(Method::POST, "/conversations").json(request);
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ConversationKind;
    use crate::network::api::ConversationSort;

    #[test]
    fn status_codes_map_to_taxonomy() {
        let body = br#"{"message": "appointment already resolved"}"#;
        assert_eq!(
            error_for_status(StatusCode::CONFLICT, body),
            SyncError::Conflict("appointment already resolved".to_string())
        );
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, b""),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNPROCESSABLE_ENTITY, b"{}"),
            SyncError::Validation(_)
        ));

        let err = error_for_status(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(err, SyncError::Network("HTTP 502 Bad Gateway".to_string()));
        assert!(err.is_transient());
    }

    #[test]
    fn filter_query_includes_optional_fields() {
        let filter = ConversationFilter {
            kind: Some(ConversationKind::GuestSpot),
            unread_only: true,
            sort: ConversationSort::UnreadFirst,
            page: 2,
            per_page: 10,
        };
        let query = filter_query(&filter);
        assert!(query.contains(&("type", "guest_spot".to_string())));
        assert!(query.contains(&("unread", "1".to_string())));
        assert!(query.contains(&("sort", "unread_first".to_string())));
        assert!(query.contains(&("page", "2".to_string())));

        let plain = filter_query(&ConversationFilter::default());
        assert!(!plain.iter().any(|(key, _)| *key == "type" || *key == "unread"));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let api = HttpInboxApi::new("https://api.example.test/v1/", None);
        assert_eq!(
            api.url("/conversations"),
            "https://api.example.test/v1/conversations"
        );
    }
}
