use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ConversationId, LastMessage};

/// Payload of `conversation.updated` on the user channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdated {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

/// In-process notifications between synchronizers. Never sent over the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxSignal {
    /// Emitted after the server acknowledged a mark-read call.
    ConversationMarkedRead(ConversationId),
}
