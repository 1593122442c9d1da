use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::transport::{PushHandler, PushTransport, SubscriptionId};
use crate::common::{ConversationId, UserId};

/// Event emitted on the user channel when any of the user's conversations changes.
pub const CONVERSATION_UPDATED: &str = "conversation.updated";
/// Event emitted on a conversation channel for every new message.
pub const MESSAGE_SENT: &str = "message.sent";

pub fn user_channel(user_id: UserId) -> String {
    format!("private-user.{user_id}")
}

pub fn conversation_channel(conversation_id: ConversationId) -> String {
    format!("private-conversation.{conversation_id}")
}

/// A live subscription owned by exactly one synchronizer. Dropping the
/// handle removes its route from the transport.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    channel: String,
    event: String,
    released: AtomicBool,
    transport: Arc<dyn PushTransport>,
}

impl SubscriptionHandle {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.unsubscribe(self.id);
        log::debug!("Unsubscribed from {} on {}", self.event, self.channel);
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("event", &self.event)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Wrapper over the optional push transport. Never fails: a missing
/// transport or a refused subscription just means poll-only mode.
#[derive(Clone, Default)]
pub struct ChannelManager {
    transport: Option<Arc<dyn PushTransport>>,
}

impl ChannelManager {
    pub fn new(transport: Option<Arc<dyn PushTransport>>) -> Self {
        Self { transport }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn subscribe(
        &self,
        channel: &str,
        event: &str,
        handler: PushHandler,
    ) -> Option<SubscriptionHandle> {
        let Some(transport) = self.transport.as_ref() else {
            log::debug!("No push transport configured; {channel} will be polled only");
            return None;
        };

        match transport.subscribe(channel, event, handler) {
            Ok(id) => {
                log::debug!("Subscribed to {event} on {channel} ({id})");
                Some(SubscriptionHandle {
                    id,
                    channel: channel.to_string(),
                    event: event.to_string(),
                    released: AtomicBool::new(false),
                    transport: transport.clone(),
                })
            }
            Err(err) => {
                log::warn!("Push subscription to {channel} failed, falling back to polling: {err}");
                None
            }
        }
    }

    /// Idempotent: releasing an already released handle does nothing.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.release();
    }
}
