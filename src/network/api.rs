use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{
    Appointment, AppointmentAction, AppointmentId, ConversationId, ConversationKind,
    ConversationSummary, Message, MessageId, OutgoingMessage, Pagination, UserId,
};
use crate::error::SyncResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSort {
    #[default]
    Newest,
    Oldest,
    UnreadFirst,
}

impl ConversationSort {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationSort::Newest => "newest",
            ConversationSort::Oldest => "oldest",
            ConversationSort::UnreadFirst => "unread_first",
        }
    }
}

/// Server-side filter and page selection for the inbox list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationFilter {
    pub kind: Option<ConversationKind>,
    pub unread_only: bool,
    pub sort: ConversationSort,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ConversationFilter {
    fn default() -> Self {
        Self {
            kind: None,
            unread_only: false,
            sort: ConversationSort::Newest,
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPage {
    pub conversations: Vec<ConversationSummary>,
    pub pagination: Pagination,
}

/// Conversation header plus its most recent page of messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationDetail {
    pub conversation: ConversationSummary,
    #[serde(default)]
    pub appointment: Option<Appointment>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Explicit flag when the server provides one.
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePage {
    #[serde(rename = "data")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewConversation {
    pub recipient_id: UserId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request/response surface of the marketplace messaging API.
#[async_trait]
pub trait InboxApi: Send + Sync {
    async fn list_conversations(&self, filter: &ConversationFilter) -> SyncResult<ConversationPage>;

    async fn conversation_detail(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> SyncResult<ConversationDetail>;

    /// Messages strictly newer than `after`, ascending. `None` fetches from the start.
    async fn messages_after(
        &self,
        conversation_id: ConversationId,
        after: Option<MessageId>,
    ) -> SyncResult<MessagePage>;

    /// Up to `limit` messages strictly older than `before`, ascending.
    async fn messages_before(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
        limit: u32,
    ) -> SyncResult<MessagePage>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &OutgoingMessage,
    ) -> SyncResult<Message>;

    /// Returns the server's view of the appointment when it sends one back.
    async fn respond_to_appointment(
        &self,
        conversation_id: ConversationId,
        appointment_id: AppointmentId,
        action: AppointmentAction,
        reason: Option<&str>,
    ) -> SyncResult<Option<Appointment>>;

    async fn mark_read(&self, conversation_id: ConversationId) -> SyncResult<()>;

    async fn unread_count(&self) -> SyncResult<u32>;

    async fn create_conversation(&self, request: &NewConversation)
    -> SyncResult<ConversationSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MessageBody;

    #[test]
    fn page_survives_a_record_with_unreadable_metadata() {
        let json = r#"{"data": [
            {"id": 104, "conversation_id": 1, "sender_id": 2, "type": "text",
             "content": "see you", "created_at": "2024-05-01T10:00:00Z"},
            {"id": 105, "conversation_id": 1, "sender_id": 2, "type": "reschedule",
             "metadata": {"appointment_id": 9}, "created_at": "2024-05-01T10:01:00Z"}
        ]}"#;
        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].body, MessageBody::Text);
        assert_eq!(page.messages[1].id, MessageId(105));
        assert!(matches!(page.messages[1].body, MessageBody::Other { .. }));
        assert_eq!(page.has_more, None);
    }
}
