use std::sync::Arc;

use super::active::ActiveConversationSync;
use super::badge::UnreadBadgeSync;
use super::list::ConversationListSync;
use super::scheduler::PollIntervals;
use super::signals::SignalBus;
use crate::common::{ConversationId, UserId};
use crate::error::SyncResult;
use crate::network::{ChannelManager, ConversationFilter, InboxApi, PushTransport};

/// Tunables shared by the synchronizers of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub user_id: UserId,
    pub page_size: u32,
    pub active_poll: PollIntervals,
    pub list_poll: PollIntervals,
    pub badge_poll: PollIntervals,
}

/// Owns the capabilities of one signed-in session and the three
/// synchronizers built on them. Dropping the session without `shutdown`
/// still aborts every poll loop and releases its push routes.
pub struct InboxSession {
    channels: ChannelManager,
    signals: SignalBus,
    list: ConversationListSync,
    active: ActiveConversationSync,
    badge: UnreadBadgeSync,
}

impl InboxSession {
    pub fn new(
        api: Arc<dyn InboxApi>,
        transport: Option<Arc<dyn PushTransport>>,
        settings: SessionSettings,
    ) -> Self {
        let channels = ChannelManager::new(transport);
        let signals = SignalBus::new();
        let list = ConversationListSync::new(
            api.clone(),
            channels.clone(),
            settings.user_id,
            settings.list_poll,
        );
        let active = ActiveConversationSync::new(
            api.clone(),
            channels.clone(),
            signals.clone(),
            settings.active_poll,
            settings.page_size,
        );
        let badge = UnreadBadgeSync::new(
            api,
            channels.clone(),
            signals.clone(),
            settings.user_id,
            settings.badge_poll,
        );
        Self {
            channels,
            signals,
            list,
            active,
            badge,
        }
    }

    /// Loads the list and badge, then starts their push and poll loops.
    /// Initial load failures are logged; the poll loops recover from them.
    pub async fn start(&self, filter: ConversationFilter) {
        if !self.channels.is_configured() {
            log::info!("No push transport; inbox runs in poll-only mode");
        }
        let (list, badge) = futures::join!(self.list.load(filter), self.badge.refresh());
        if let Err(err) = list {
            log::warn!("Initial conversation list load failed: {err}");
        }
        if let Err(err) = badge {
            log::warn!("Initial unread count failed: {err}");
        }
        self.list.start();
        self.badge.start();
    }

    /// Opens a conversation and clears its unread state everywhere.
    pub async fn select_conversation(&self, conversation_id: ConversationId) -> SyncResult<()> {
        self.active.open(conversation_id).await?;
        self.list.mark_read(conversation_id);
        if let Err(err) = self.active.mark_as_read().await {
            log::debug!("Read receipt for {conversation_id} not delivered: {err}");
        }
        Ok(())
    }

    pub fn list(&self) -> &ConversationListSync {
        &self.list
    }

    pub fn active(&self) -> &ActiveConversationSync {
        &self.active
    }

    pub fn badge(&self) -> &UnreadBadgeSync {
        &self.badge
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn shutdown(&self) {
        self.active.close();
        self.list.stop();
        self.badge.stop();
        log::info!("Inbox session shut down");
    }
}
