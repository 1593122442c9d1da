#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use inbox_sync::common::{
    Appointment, AppointmentAction, AppointmentId, AppointmentStatus, ConversationId,
    ConversationKind, ConversationSummary, LastMessage, Message, MessageBody, MessageId,
    OutgoingMessage, Pagination, Participant, UserId,
};
use inbox_sync::network::channels::{MESSAGE_SENT, conversation_channel};
use inbox_sync::network::{
    ConversationDetail, ConversationFilter, ConversationPage, InboxApi, LocalPushHub,
    MessagePage, NewConversation, PushTransport,
};
use inbox_sync::sync::{PollIntervals, SessionSettings};
use inbox_sync::{InboxSession, SyncError, SyncResult};

pub const ME: UserId = UserId(1);

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600 + seconds, 0).unwrap()
}

pub fn message(conversation: u64, id: u64) -> Message {
    Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation),
        sender_id: UserId(2),
        content: format!("message {id}"),
        body: MessageBody::Text,
        attachments: Vec::new(),
        created_at: at(id as i64),
    }
}

pub fn summary(id: u64, seconds: i64, unread: u32) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId(id),
        kind: ConversationKind::Booking,
        participant: Participant {
            id: UserId(100 + id),
            name: format!("client {id}"),
            avatar_url: None,
        },
        last_message: Some(LastMessage {
            id: MessageId(id * 1000),
            snippet: "hello".into(),
            sender_id: UserId(100 + id),
            created_at: at(seconds),
        }),
        unread_count: unread,
        appointment: None,
        created_at: at(0),
        updated_at: at(seconds),
    }
}

pub fn settings(page_size: u32) -> SessionSettings {
    let intervals = PollIntervals {
        fast: Duration::from_secs(5),
        slow: Duration::from_secs(30),
    };
    SessionSettings {
        user_id: ME,
        page_size,
        active_poll: intervals,
        list_poll: intervals,
        badge_poll: intervals,
    }
}

#[derive(Default)]
struct Server {
    conversations: HashMap<ConversationId, ConversationSummary>,
    messages: HashMap<ConversationId, Vec<Message>>,
    appointments: HashMap<ConversationId, Appointment>,
    next_message_id: u64,
    explicit_has_more: Option<bool>,
}

/// In-memory stand-in for the messaging API with failure injection and
/// gates that hold a call until the test releases it.
#[derive(Default)]
pub struct FakeApi {
    server: Mutex<Server>,
    failures: Mutex<HashMap<&'static str, VecDeque<SyncError>>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_conversation(&self, summary: ConversationSummary) {
        let mut server = self.server.lock();
        server.messages.entry(summary.id).or_default();
        server.conversations.insert(summary.id, summary);
    }

    pub fn add_messages(&self, conversation: u64, ids: impl IntoIterator<Item = u64>) {
        let mut server = self.server.lock();
        let transcript = server.messages.entry(ConversationId(conversation)).or_default();
        for id in ids {
            transcript.push(message(conversation, id));
        }
        transcript.sort_by_key(|message| message.id);
    }

    /// Stores a message the way the server would send it on the wire.
    pub fn add_wire_message(&self, conversation: u64, wire: serde_json::Value) {
        let message: Message = serde_json::from_value(wire).unwrap();
        let mut server = self.server.lock();
        let transcript = server.messages.entry(ConversationId(conversation)).or_default();
        transcript.push(message);
        transcript.sort_by_key(|message| message.id);
    }

    pub fn set_appointment(&self, conversation: u64, appointment: Appointment) {
        self.server
            .lock()
            .appointments
            .insert(ConversationId(conversation), appointment);
    }

    pub fn appointment(&self, conversation: u64) -> Option<Appointment> {
        self.server
            .lock()
            .appointments
            .get(&ConversationId(conversation))
            .cloned()
    }

    pub fn set_unread(&self, conversation: u64, unread: u32) {
        if let Some(summary) = self
            .server
            .lock()
            .conversations
            .get_mut(&ConversationId(conversation))
        {
            summary.unread_count = unread;
        }
    }

    pub fn set_next_message_id(&self, id: u64) {
        self.server.lock().next_message_id = id;
    }

    pub fn set_explicit_has_more(&self, has_more: Option<bool>) {
        self.server.lock().explicit_has_more = has_more;
    }

    pub fn fail_next(&self, op: &'static str, err: SyncError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// The next call to `op` blocks until the returned handle is notified.
    pub fn hold(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(op, gate.clone());
        gate
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Yields until `op` has been called at least `count` times.
    pub async fn wait_for_call(&self, op: &'static str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls(op) < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("call never happened");
    }

    async fn enter(&self, op: &'static str) -> SyncResult<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        let gate = self.gates.lock().remove(op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.failures.lock().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn total_unread(server: &Server) -> u32 {
        server
            .conversations
            .values()
            .map(|summary| summary.unread_count)
            .sum()
    }
}

#[async_trait]
impl InboxApi for FakeApi {
    async fn list_conversations(&self, filter: &ConversationFilter) -> SyncResult<ConversationPage> {
        self.enter("list").await?;
        let server = self.server.lock();
        let conversations: Vec<ConversationSummary> = server
            .conversations
            .values()
            .filter(|summary| filter.kind.is_none_or(|kind| summary.kind == kind))
            .filter(|summary| !filter.unread_only || summary.unread_count > 0)
            .cloned()
            .collect();
        let total = conversations.len() as u64;
        Ok(ConversationPage {
            conversations,
            pagination: Pagination {
                current_page: filter.page,
                last_page: 1,
                per_page: filter.per_page,
                total,
            },
        })
    }

    async fn conversation_detail(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> SyncResult<ConversationDetail> {
        self.enter("detail").await?;
        let server = self.server.lock();
        let conversation = server
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("no conversation {conversation_id}")))?;
        let all = server.messages.get(&conversation_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit as usize);
        Ok(ConversationDetail {
            conversation,
            appointment: server.appointments.get(&conversation_id).cloned(),
            messages: all[start..].to_vec(),
            has_more: server.explicit_has_more,
        })
    }

    async fn messages_after(
        &self,
        conversation_id: ConversationId,
        after: Option<MessageId>,
    ) -> SyncResult<MessagePage> {
        self.enter("after").await?;
        let server = self.server.lock();
        let messages = server
            .messages
            .get(&conversation_id)
            .map(|all| {
                all.iter()
                    .filter(|message| after.is_none_or(|after| message.id > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(MessagePage {
            messages,
            has_more: None,
        })
    }

    async fn messages_before(
        &self,
        conversation_id: ConversationId,
        before: MessageId,
        limit: u32,
    ) -> SyncResult<MessagePage> {
        self.enter("before").await?;
        let server = self.server.lock();
        let older: Vec<Message> = server
            .messages
            .get(&conversation_id)
            .map(|all| all.iter().filter(|message| message.id < before).cloned().collect())
            .unwrap_or_default();
        let start = older.len().saturating_sub(limit as usize);
        Ok(MessagePage {
            messages: older[start..].to_vec(),
            has_more: server.explicit_has_more,
        })
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        outgoing: &OutgoingMessage,
    ) -> SyncResult<Message> {
        self.enter("send").await?;
        let mut server = self.server.lock();
        let transcript_max = server
            .messages
            .get(&conversation_id)
            .and_then(|all| all.last())
            .map(|message| message.id.0)
            .unwrap_or(0);
        let id = server.next_message_id.max(transcript_max + 1);
        server.next_message_id = id + 1;
        let sent = Message {
            id: MessageId(id),
            conversation_id,
            sender_id: ME,
            content: outgoing.content.clone(),
            body: outgoing.body.clone(),
            attachments: Vec::new(),
            created_at: at(id as i64),
        };
        server.messages.entry(conversation_id).or_default().push(sent.clone());
        Ok(sent)
    }

    async fn respond_to_appointment(
        &self,
        conversation_id: ConversationId,
        appointment_id: AppointmentId,
        action: AppointmentAction,
        _reason: Option<&str>,
    ) -> SyncResult<Option<Appointment>> {
        self.enter("respond").await?;
        let mut server = self.server.lock();
        let appointment = server
            .appointments
            .get_mut(&conversation_id)
            .filter(|appointment| appointment.id == appointment_id)
            .ok_or_else(|| SyncError::Validation("unknown appointment".into()))?;
        if appointment.status != AppointmentStatus::Pending {
            return Err(SyncError::Conflict("already resolved".into()));
        }
        appointment.status = action.resulting_status();
        Ok(Some(appointment.clone()))
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.enter("mark_read").await?;
        if let Some(summary) = self.server.lock().conversations.get_mut(&conversation_id) {
            summary.unread_count = 0;
        }
        Ok(())
    }

    async fn unread_count(&self) -> SyncResult<u32> {
        self.enter("unread").await?;
        Ok(Self::total_unread(&self.server.lock()))
    }

    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> SyncResult<ConversationSummary> {
        self.enter("create").await?;
        let mut server = self.server.lock();
        let id = ConversationId(server.conversations.keys().map(|id| id.0).max().unwrap_or(0) + 1);
        let mut created = summary(id.0, 500, 0);
        created.kind = request.kind;
        created.participant.id = request.recipient_id;
        created.last_message = None;
        server.messages.entry(id).or_default();
        server.conversations.insert(id, created.clone());
        Ok(created)
    }
}

pub fn pending_appointment(id: u64) -> Appointment {
    Appointment {
        id: AppointmentId(id),
        status: AppointmentStatus::Pending,
        starts_at: Some(at(86_400)),
        ends_at: None,
        duration_minutes: Some(90),
    }
}

pub fn session(api: &Arc<FakeApi>, hub: Option<&Arc<LocalPushHub>>, page_size: u32) -> InboxSession {
    let transport = hub.map(|hub| hub.clone() as Arc<dyn PushTransport>);
    InboxSession::new(api.clone(), transport, settings(page_size))
}

pub fn push_message(hub: &LocalPushHub, message: &Message) -> usize {
    hub.publish(
        &conversation_channel(message.conversation_id),
        MESSAGE_SENT,
        &serde_json::to_value(message).unwrap(),
    )
}
