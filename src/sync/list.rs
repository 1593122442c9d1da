use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::merge::order_summaries;
use super::scheduler::{PollIntervals, PollScheduler, PollTask};
use crate::common::{ConversationId, ConversationSummary, ConversationUpdated, Pagination, UserId};
use crate::error::{SyncError, SyncResult};
use crate::network::channels::{CONVERSATION_UPDATED, user_channel};
use crate::network::{
    ChannelManager, ConversationFilter, ConversationPage, InboxApi, NewConversation, PushHandler,
    SubscriptionHandle,
};

/// Result of applying a push update to the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// The conversation is not in the list; only a full reload can add it.
    RefreshRequired,
}

/// Summaries keyed by id. Display order is derived on read, never stored.
#[derive(Debug, Clone, Default)]
pub struct ListState {
    summaries: HashMap<ConversationId, ConversationSummary>,
    filter: ConversationFilter,
    pagination: Pagination,
    loading: bool,
    last_error: Option<SyncError>,
}

impl ListState {
    pub fn replace(&mut self, page: ConversationPage) {
        self.summaries = page
            .conversations
            .into_iter()
            .map(|summary| (summary.id, summary))
            .collect();
        self.pagination = page.pagination;
        self.last_error = None;
    }

    /// Patches an existing row in place. Applying the same update twice
    /// leaves the row unchanged.
    pub fn apply_update(&mut self, update: &ConversationUpdated) -> PatchOutcome {
        let Some(summary) = self.summaries.get_mut(&update.conversation_id) else {
            return PatchOutcome::RefreshRequired;
        };

        if let Some(last) = &update.last_message {
            let is_newer = summary
                .last_message
                .as_ref()
                .is_none_or(|current| current.id <= last.id);
            if is_newer {
                summary.last_message = Some(last.clone());
            }
        }
        if let Some(unread) = update.unread_count {
            summary.unread_count = unread;
        }
        summary.updated_at = summary.updated_at.max(update.updated_at);
        PatchOutcome::Patched
    }

    /// Local-only transform; the caller owns the server call.
    pub fn mark_read(&mut self, conversation_id: ConversationId) -> bool {
        match self.summaries.get_mut(&conversation_id) {
            Some(summary) => {
                summary.unread_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(&conversation_id)
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn visible(&self) -> Vec<ConversationSummary> {
        order_summaries(self.summaries.values(), self.filter.sort)
    }

    pub fn filter(&self) -> &ConversationFilter {
        &self.filter
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }
}

/// Immutable view handed to the UI.
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub conversations: Vec<ConversationSummary>,
    pub filter: ConversationFilter,
    pub pagination: Pagination,
    pub loading: bool,
    pub last_error: Option<SyncError>,
}

struct ListRuntime {
    subscription: Option<SubscriptionHandle>,
    poll: PollTask,
}

struct ListInner {
    api: Arc<dyn InboxApi>,
    channels: ChannelManager,
    user_id: UserId,
    intervals: PollIntervals,
    state: Mutex<ListState>,
    load_seq: AtomicU64,
    runtime: Mutex<Option<ListRuntime>>,
}

/// Keeps the inbox list in sync from loads, push updates and poll ticks.
#[derive(Clone)]
pub struct ConversationListSync {
    inner: Arc<ListInner>,
}

impl ConversationListSync {
    pub fn new(
        api: Arc<dyn InboxApi>,
        channels: ChannelManager,
        user_id: UserId,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            inner: Arc::new(ListInner {
                api,
                channels,
                user_id,
                intervals,
                state: Mutex::new(ListState::default()),
                load_seq: AtomicU64::new(0),
                runtime: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<ListInner>) -> Self {
        Self { inner }
    }

    /// Replaces the list with the first result for `filter`. The filter is
    /// only committed together with the rows it produced; on failure the
    /// previous rows, filter and pagination stay and the error is recorded.
    pub async fn load(&self, filter: ConversationFilter) -> SyncResult<()> {
        let seq = self.inner.load_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.lock().loading = true;

        let result = self.inner.api.list_conversations(&filter).await;

        let mut state = self.inner.state.lock();
        if self.inner.load_seq.load(Ordering::SeqCst) != seq {
            log::debug!("Discarding list load #{seq}: a newer load was issued");
            return Err(SyncError::Superseded);
        }
        state.loading = false;
        match result {
            Ok(page) => {
                log::debug!(
                    "Loaded {} conversations (page {}/{})",
                    page.conversations.len(),
                    page.pagination.current_page,
                    page.pagination.last_page
                );
                state.replace(page);
                state.filter = filter;
                Ok(())
            }
            Err(err) => {
                log::warn!("Conversation list load failed, keeping {} rows: {err}", state.len());
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Re-issues the filter of the last successful load.
    pub async fn refresh(&self) -> SyncResult<()> {
        let filter = self.inner.state.lock().filter.clone();
        self.load(filter).await
    }

    pub async fn load_page(&self, page: u32) -> SyncResult<()> {
        let mut filter = self.inner.state.lock().filter.clone();
        filter.page = page.max(1);
        self.load(filter).await
    }

    /// Applies a push update; unknown conversations trigger a full refresh.
    pub async fn on_push_conversation_updated(&self, update: ConversationUpdated) -> SyncResult<()> {
        match self.apply_push_update(&update) {
            PatchOutcome::Patched => Ok(()),
            PatchOutcome::RefreshRequired => self.refresh().await,
        }
    }

    pub fn apply_push_update(&self, update: &ConversationUpdated) -> PatchOutcome {
        let outcome = self.inner.state.lock().apply_update(update);
        if outcome == PatchOutcome::RefreshRequired {
            log::debug!(
                "Conversation {} not in list; full refresh required",
                update.conversation_id
            );
        }
        outcome
    }

    pub fn mark_read(&self, conversation_id: ConversationId) -> bool {
        self.inner.state.lock().mark_read(conversation_id)
    }

    /// Creates a conversation, then reloads so the new row arrives complete.
    pub async fn create(&self, request: &NewConversation) -> SyncResult<ConversationSummary> {
        let summary = self.inner.api.create_conversation(request).await?;
        log::info!("Created conversation {}", summary.id);
        if let Err(err) = self.refresh().await {
            log::warn!("List refresh after creating {} failed: {err}", summary.id);
        }
        Ok(summary)
    }

    pub fn snapshot(&self) -> ListSnapshot {
        let state = self.inner.state.lock();
        ListSnapshot {
            conversations: state.visible(),
            filter: state.filter.clone(),
            pagination: state.pagination,
            loading: state.loading,
            last_error: state.last_error.clone(),
        }
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<ConversationSummary> {
        self.inner.state.lock().get(conversation_id).cloned()
    }

    /// Subscribes to the user channel and starts the list poll loop.
    /// Calling it again restarts both.
    pub fn start(&self) {
        self.stop();

        let scheduler = Arc::new(PollScheduler::new(self.inner.intervals));
        let channel = user_channel(self.inner.user_id);
        let subscription = self.inner.channels.subscribe(
            &channel,
            CONVERSATION_UPDATED,
            push_handler(Arc::downgrade(&self.inner)),
        );
        if subscription.is_some() {
            scheduler.mark_push_connected();
        }

        let weak = Arc::downgrade(&self.inner);
        let poll = scheduler.spawn("conversation-list", move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match ConversationListSync::from_inner(inner).refresh().await {
                    Ok(()) | Err(SyncError::Superseded) => {}
                    Err(err) => log::debug!("List poll failed: {err}"),
                }
            }
        });

        *self.inner.runtime.lock() = Some(ListRuntime { subscription, poll });
    }

    pub fn stop(&self) {
        if let Some(runtime) = self.inner.runtime.lock().take() {
            if let Some(subscription) = &runtime.subscription {
                self.inner.channels.unsubscribe(subscription);
            }
            runtime.poll.stop();
        }
    }

    pub fn is_push_connected(&self) -> bool {
        self.inner
            .runtime
            .lock()
            .as_ref()
            .is_some_and(|runtime| runtime.subscription.is_some())
    }
}

fn push_handler(inner: Weak<ListInner>) -> PushHandler {
    Arc::new(move |payload| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let update = match serde_json::from_value::<ConversationUpdated>(payload.clone()) {
            Ok(update) => update,
            Err(err) => {
                log::warn!("Ignoring malformed {CONVERSATION_UPDATED} payload: {err}");
                return;
            }
        };

        let list = ConversationListSync::from_inner(inner);
        if list.apply_push_update(&update) == PatchOutcome::RefreshRequired {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = list.refresh().await {
                            log::debug!("List refresh after push failed: {err}");
                        }
                    });
                }
                Err(_) => log::warn!("No runtime to refresh the conversation list from push"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ConversationKind, LastMessage, MessageId, Participant};
    use crate::network::ConversationSort;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn summary(id: u64, minute: u32, unread: u32) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId(id),
            kind: ConversationKind::Booking,
            participant: Participant {
                id: UserId(100 + id),
                name: format!("artist {id}"),
                avatar_url: None,
            },
            last_message: Some(LastMessage {
                id: MessageId(id * 10),
                snippet: "hey".into(),
                sender_id: UserId(100 + id),
                created_at: at(minute),
            }),
            unread_count: unread,
            appointment: None,
            created_at: at(0),
            updated_at: at(minute),
        }
    }

    fn state_with(rows: Vec<ConversationSummary>) -> ListState {
        let mut state = ListState::default();
        let total = rows.len() as u64;
        state.replace(ConversationPage {
            conversations: rows,
            pagination: Pagination {
                current_page: 1,
                last_page: 1,
                per_page: 20,
                total,
            },
        });
        state
    }

    #[test]
    fn push_update_patches_and_moves_row_to_top() {
        let mut state = state_with(vec![summary(7, 1, 2), summary(8, 5, 0), summary(9, 3, 0)]);
        let update = ConversationUpdated {
            conversation_id: ConversationId(7),
            last_message: Some(LastMessage {
                id: MessageId(71),
                snippet: "new".into(),
                sender_id: UserId(107),
                created_at: at(9),
            }),
            unread_count: Some(3),
            updated_at: at(9),
        };

        assert_eq!(state.apply_update(&update), PatchOutcome::Patched);
        let visible = state.visible();
        assert_eq!(visible.len(), 3);
        assert_eq!(visible[0].id, ConversationId(7));
        assert_eq!(visible[0].unread_count, 3);

        // Idempotent.
        assert_eq!(state.apply_update(&update), PatchOutcome::Patched);
        assert_eq!(state.visible(), visible);
    }

    #[test]
    fn stale_last_message_does_not_overwrite_newer() {
        let mut state = state_with(vec![summary(7, 5, 0)]);
        let update = ConversationUpdated {
            conversation_id: ConversationId(7),
            last_message: Some(LastMessage {
                id: MessageId(3),
                snippet: "old".into(),
                sender_id: UserId(107),
                created_at: at(1),
            }),
            unread_count: None,
            updated_at: at(1),
        };
        state.apply_update(&update);
        let row = state.get(ConversationId(7)).unwrap();
        assert_eq!(row.last_message.as_ref().unwrap().id, MessageId(70));
        assert_eq!(row.updated_at, at(5));
    }

    #[test]
    fn unknown_conversation_requires_refresh() {
        let mut state = state_with(vec![summary(7, 1, 0)]);
        let update = ConversationUpdated {
            conversation_id: ConversationId(99),
            last_message: None,
            unread_count: Some(1),
            updated_at: at(2),
        };
        assert_eq!(state.apply_update(&update), PatchOutcome::RefreshRequired);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn mark_read_is_local_and_reports_presence() {
        let mut state = state_with(vec![summary(7, 1, 4)]);
        assert!(state.mark_read(ConversationId(7)));
        assert_eq!(state.get(ConversationId(7)).unwrap().unread_count, 0);
        assert!(!state.mark_read(ConversationId(8)));
    }

    #[test]
    fn sort_orders_are_derived() {
        let mut state = state_with(vec![summary(1, 1, 0), summary(2, 3, 1), summary(3, 2, 0)]);
        let ids = |rows: Vec<ConversationSummary>| rows.iter().map(|row| row.id.0).collect::<Vec<_>>();
        assert_eq!(ids(state.visible()), vec![2, 3, 1]);

        state.filter.sort = ConversationSort::Oldest;
        assert_eq!(ids(state.visible()), vec![1, 3, 2]);

        state.filter.sort = ConversationSort::UnreadFirst;
        state.mark_read(ConversationId(2));
        state.summaries.get_mut(&ConversationId(1)).unwrap().unread_count = 5;
        assert_eq!(ids(state.visible()), vec![1, 2, 3]);
    }
}
