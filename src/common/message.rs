use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{AppointmentId, AttachmentId, ConversationId, MessageId, UserId};
use crate::error::SyncError;

/// Decision state carried by actionable message cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignShare {
    pub design_id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingCard {
    pub appointment_id: AppointmentId,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub deposit_cents: Option<u64>,
    #[serde(default)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount_cents: u64,
    pub currency: String,
    #[serde(default)]
    pub appointment_id: Option<AppointmentId>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub appointment_id: AppointmentId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reschedule {
    pub appointment_id: AppointmentId,
    pub proposed_start: DateTime<Utc>,
    #[serde(default)]
    pub proposed_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ActionStatus,
}

/// Message type together with the metadata schema that type owns.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text,
    Image,
    DesignShare(DesignShare),
    BookingCard(BookingCard),
    DepositRequest(DepositRequest),
    Cancellation(Cancellation),
    Reschedule(Reschedule),
    /// A type this client does not know yet; kept verbatim.
    Other { kind: String, metadata: Value },
}

impl MessageBody {
    /// Decodes the metadata a known type owns. Metadata that does not fit
    /// its schema keeps the message as [`MessageBody::Other`] so one bad
    /// record never fails the page it arrived in.
    pub fn from_parts(kind: &str, metadata: Value) -> Self {
        let decoded = match kind {
            "text" => return MessageBody::Text,
            "image" => return MessageBody::Image,
            "design_share" => serde_json::from_value(metadata.clone()).map(MessageBody::DesignShare),
            "booking_card" => serde_json::from_value(metadata.clone()).map(MessageBody::BookingCard),
            "deposit_request" => {
                serde_json::from_value(metadata.clone()).map(MessageBody::DepositRequest)
            }
            "cancellation" => serde_json::from_value(metadata.clone()).map(MessageBody::Cancellation),
            "reschedule" => serde_json::from_value(metadata.clone()).map(MessageBody::Reschedule),
            _ => {
                return MessageBody::Other {
                    kind: kind.to_string(),
                    metadata,
                };
            }
        };
        decoded.unwrap_or_else(|err| {
            log::warn!("Keeping {kind} message with unreadable metadata as untyped: {err}");
            MessageBody::Other {
                kind: kind.to_string(),
                metadata,
            }
        })
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &str {
        match self {
            MessageBody::Text => "text",
            MessageBody::Image => "image",
            MessageBody::DesignShare(_) => "design_share",
            MessageBody::BookingCard(_) => "booking_card",
            MessageBody::DepositRequest(_) => "deposit_request",
            MessageBody::Cancellation(_) => "cancellation",
            MessageBody::Reschedule(_) => "reschedule",
            MessageBody::Other { kind, .. } => kind,
        }
    }

    pub fn metadata(&self) -> Value {
        let encoded = match self {
            MessageBody::Text | MessageBody::Image => return Value::Null,
            MessageBody::DesignShare(meta) => serde_json::to_value(meta),
            MessageBody::BookingCard(meta) => serde_json::to_value(meta),
            MessageBody::DepositRequest(meta) => serde_json::to_value(meta),
            MessageBody::Cancellation(meta) => serde_json::to_value(meta),
            MessageBody::Reschedule(meta) => serde_json::to_value(meta),
            MessageBody::Other { metadata, .. } => return metadata.clone(),
        };
        encoded.unwrap_or_default()
    }

    /// Status of an actionable card, `None` for plain messages.
    pub fn action_status(&self) -> Option<ActionStatus> {
        match self {
            MessageBody::BookingCard(meta) => Some(meta.status),
            MessageBody::DepositRequest(meta) => Some(meta.status),
            MessageBody::Cancellation(meta) => Some(meta.status),
            MessageBody::Reschedule(meta) => Some(meta.status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A transcript entry as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessage", into = "RawMessage")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub body: MessageBody,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    attachments: Vec<Attachment>,
    created_at: DateTime<Utc>,
}

fn default_kind() -> String {
    "text".to_string()
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        let body = MessageBody::from_parts(&raw.kind, raw.metadata);
        Self {
            id: raw.id,
            conversation_id: raw.conversation_id,
            sender_id: raw.sender_id,
            content: raw.content,
            body,
            attachments: raw.attachments,
            created_at: raw.created_at,
        }
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.body.kind().to_string(),
            metadata: message.body.metadata(),
            attachments: message.attachments,
            created_at: message.created_at,
        }
    }
}

/// A message the user is about to send. There is no local placeholder:
/// the transcript only gains the server's canonical copy.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub content: String,
    pub body: MessageBody,
    pub attachment_ids: Vec<AttachmentId>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            body: MessageBody::Text,
            attachment_ids: Vec::new(),
        }
    }

    pub fn image(attachment_ids: Vec<AttachmentId>) -> Self {
        Self {
            content: String::new(),
            body: MessageBody::Image,
            attachment_ids,
        }
    }

    pub fn booking_card(card: BookingCard) -> Self {
        Self {
            content: String::new(),
            body: MessageBody::BookingCard(card),
            attachment_ids: Vec::new(),
        }
    }

    pub fn deposit_request(request: DepositRequest) -> Self {
        Self {
            content: String::new(),
            body: MessageBody::DepositRequest(request),
            attachment_ids: Vec::new(),
        }
    }

    pub fn cancellation(cancellation: Cancellation) -> Self {
        let content = cancellation.reason.clone().unwrap_or_default();
        Self {
            content,
            body: MessageBody::Cancellation(cancellation),
            attachment_ids: Vec::new(),
        }
    }

    pub fn reschedule(reschedule: Reschedule) -> Self {
        Self {
            content: String::new(),
            body: MessageBody::Reschedule(reschedule),
            attachment_ids: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachment_ids: Vec<AttachmentId>) -> Self {
        self.attachment_ids = attachment_ids;
        self
    }

    /// Rejects sends that would reach the server with nothing to show.
    pub fn validate(&self) -> Result<(), SyncError> {
        match &self.body {
            MessageBody::Text if self.content.trim().is_empty() && self.attachment_ids.is_empty() => {
                Err(SyncError::Validation(
                    "message needs content or an attachment".to_string(),
                ))
            }
            MessageBody::Image if self.attachment_ids.is_empty() => Err(SyncError::Validation(
                "image message needs at least one attachment".to_string(),
            )),
            MessageBody::DepositRequest(request) if request.amount_cents == 0 => Err(
                SyncError::Validation("deposit amount must be positive".to_string()),
            ),
            _ => Ok(()),
        }
    }
}
