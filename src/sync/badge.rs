use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::scheduler::{PollIntervals, PollScheduler, PollTask};
use super::signals::SignalBus;
use crate::common::{InboxSignal, UserId};
use crate::error::{SyncError, SyncResult};
use crate::network::channels::{CONVERSATION_UPDATED, user_channel};
use crate::network::{ChannelManager, InboxApi, PushHandler, SubscriptionHandle};

struct BadgeRuntime {
    subscription: Option<SubscriptionHandle>,
    poll: PollTask,
    listener: JoinHandle<()>,
}

struct BadgeInner {
    api: Arc<dyn InboxApi>,
    channels: ChannelManager,
    signals: SignalBus,
    user_id: UserId,
    intervals: PollIntervals,
    count: watch::Sender<u32>,
    last_error: Mutex<Option<SyncError>>,
    refresh_seq: AtomicU64,
    runtime: Mutex<Option<BadgeRuntime>>,
}

impl BadgeInner {
    /// The count is always fetched outright; it is never patched locally.
    async fn refresh(&self) -> SyncResult<u32> {
        let seq = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.api.unread_count().await;
        if self.refresh_seq.load(Ordering::SeqCst) != seq {
            return Err(SyncError::Superseded);
        }
        match result {
            Ok(count) => {
                let previous = self.count.send_replace(count);
                if previous != count {
                    log::debug!("Unread badge {previous} -> {count}");
                }
                *self.last_error.lock() = None;
                Ok(count)
            }
            Err(err) => {
                log::debug!("Unread count refresh failed, keeping {}: {err}", *self.count.borrow());
                *self.last_error.lock() = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Refresh started by a poll tick, a signal or a push.
    async fn refresh_in_background(&self, trigger: &str) {
        match self.refresh().await {
            Ok(_) | Err(SyncError::Superseded) => {}
            Err(err) => log::debug!("Unread badge {trigger} refresh failed: {err}"),
        }
    }
}

/// Keeps the global unread badge current.
#[derive(Clone)]
pub struct UnreadBadgeSync {
    inner: Arc<BadgeInner>,
}

impl UnreadBadgeSync {
    pub fn new(
        api: Arc<dyn InboxApi>,
        channels: ChannelManager,
        signals: SignalBus,
        user_id: UserId,
        intervals: PollIntervals,
    ) -> Self {
        let (count, _receiver) = watch::channel(0);
        Self {
            inner: Arc::new(BadgeInner {
                api,
                channels,
                signals,
                user_id,
                intervals,
                count,
                last_error: Mutex::new(None),
                refresh_seq: AtomicU64::new(0),
                runtime: Mutex::new(None),
            }),
        }
    }

    pub async fn refresh(&self) -> SyncResult<u32> {
        self.inner.refresh().await
    }

    pub fn count(&self) -> u32 {
        *self.inner.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u32> {
        self.inner.count.subscribe()
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.inner.last_error.lock().clone()
    }

    /// Listens to the user channel, the local mark-read signal and its own
    /// poll loop. Calling it again restarts all three.
    pub fn start(&self) {
        self.stop();

        let scheduler = Arc::new(PollScheduler::new(self.inner.intervals));
        let subscription = self.inner.channels.subscribe(
            &user_channel(self.inner.user_id),
            CONVERSATION_UPDATED,
            push_handler(Arc::downgrade(&self.inner)),
        );
        if subscription.is_some() {
            scheduler.mark_push_connected();
        }

        let weak = Arc::downgrade(&self.inner);
        let poll = scheduler.spawn("unread-badge", move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh_in_background("poll").await;
                }
            }
        });

        let listener = tokio::spawn(listen_for_signals(
            Arc::downgrade(&self.inner),
            self.inner.signals.subscribe(),
        ));

        *self.inner.runtime.lock() = Some(BadgeRuntime {
            subscription,
            poll,
            listener,
        });
    }

    pub fn stop(&self) {
        if let Some(runtime) = self.inner.runtime.lock().take() {
            if let Some(subscription) = &runtime.subscription {
                self.inner.channels.unsubscribe(subscription);
            }
            runtime.poll.stop();
            runtime.listener.abort();
        }
    }
}

async fn listen_for_signals(inner: Weak<BadgeInner>, mut signals: broadcast::Receiver<InboxSignal>) {
    loop {
        match signals.recv().await {
            Ok(InboxSignal::ConversationMarkedRead(conversation_id)) => {
                log::trace!("Conversation {conversation_id} marked read; refreshing badge");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Badge listener skipped {skipped} signals");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.refresh_in_background("signal").await;
    }
}

fn push_handler(inner: Weak<BadgeInner>) -> PushHandler {
    Arc::new(move |_payload| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    inner.refresh_in_background("push").await;
                });
            }
            Err(_) => log::warn!("No runtime to refresh the unread badge from push"),
        }
    })
}
