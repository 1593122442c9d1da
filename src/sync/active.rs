//! Transcript and appointment state for the one open conversation.
//!
//! Every activation gets a fresh epoch. Async work captures the epoch before
//! it suspends and re-checks it before touching state, so a slow response from
//! a conversation that was already left is dropped instead of leaking into
//! the next one.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::merge::Transcript;
use super::scheduler::{PollIntervals, PollScheduler, PollTask};
use super::signals::SignalBus;
use crate::common::{
    Appointment, AppointmentAction, AppointmentId, AppointmentStatus, ConversationId,
    ConversationSummary, InboxSignal, LastMessage, Message, MessageId, OutgoingMessage,
};
use crate::error::{SyncError, SyncResult};
use crate::network::channels::{MESSAGE_SENT, conversation_channel};
use crate::network::{ChannelManager, InboxApi, PushHandler, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    TornDown,
}

#[derive(Debug)]
struct ActiveState {
    epoch: u64,
    phase: Phase,
    conversation_id: Option<ConversationId>,
    conversation: Option<ConversationSummary>,
    appointment: Option<Appointment>,
    transcript: Transcript,
    has_more: bool,
    busy: HashSet<AppointmentId>,
    last_error: Option<SyncError>,
}

impl ActiveState {
    fn new() -> Self {
        Self {
            epoch: 0,
            phase: Phase::Idle,
            conversation_id: None,
            conversation: None,
            appointment: None,
            transcript: Transcript::new(),
            has_more: false,
            busy: HashSet::new(),
            last_error: None,
        }
    }

    /// Drops everything owned by the previous activation and starts a new epoch.
    fn reset(&mut self, phase: Phase, conversation_id: Option<ConversationId>) -> u64 {
        let epoch = self.epoch + 1;
        *self = Self::new();
        self.epoch = epoch;
        self.phase = phase;
        self.conversation_id = conversation_id;
        epoch
    }

    /// Adds messages and keeps the header's last-message preview current.
    fn absorb(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let inserted = self.transcript.merge(messages);
        if inserted > 0 {
            self.refresh_preview();
        }
        inserted
    }

    /// Stores `appointment` and keeps the copy embedded in the conversation
    /// header at the same status.
    fn set_appointment(&mut self, appointment: Appointment) {
        if let Some(embedded) = self
            .conversation
            .as_mut()
            .and_then(|conversation| conversation.appointment.as_mut())
            .filter(|embedded| embedded.id == appointment.id)
        {
            *embedded = appointment.clone();
        }
        self.appointment = Some(appointment);
    }

    fn refresh_preview(&mut self) {
        let (Some(conversation), Some(newest)) = (self.conversation.as_mut(), self.transcript.newest())
        else {
            return;
        };
        let is_newer = conversation
            .last_message
            .as_ref()
            .is_none_or(|last| last.id < newest.id);
        if is_newer {
            conversation.last_message = Some(LastMessage {
                id: newest.id,
                snippet: newest.content.chars().take(120).collect(),
                sender_id: newest.sender_id,
                created_at: newest.created_at,
            });
            conversation.updated_at = conversation.updated_at.max(newest.created_at);
        }
    }
}

/// Immutable view of the open conversation.
#[derive(Debug, Clone)]
pub struct ActiveSnapshot {
    pub phase: Phase,
    pub conversation_id: Option<ConversationId>,
    pub conversation: Option<ConversationSummary>,
    pub appointment: Option<Appointment>,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub push_connected: bool,
    pub last_error: Option<SyncError>,
}

struct Activation {
    epoch: u64,
    subscription: Option<SubscriptionHandle>,
    scheduler: Arc<PollScheduler>,
    poll: PollTask,
}

struct ActiveInner {
    api: Arc<dyn InboxApi>,
    channels: ChannelManager,
    signals: SignalBus,
    intervals: PollIntervals,
    page_size: u32,
    state: Mutex<ActiveState>,
    activation: Mutex<Option<Activation>>,
}

impl ActiveInner {
    /// Runs `apply` only if `epoch` is still the current activation.
    fn with_epoch<R>(&self, epoch: u64, apply: impl FnOnce(&mut ActiveState) -> R) -> SyncResult<R> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Err(SyncError::Superseded);
        }
        Ok(apply(&mut state))
    }

    fn current(&self) -> SyncResult<(u64, ConversationId)> {
        let state = self.state.lock();
        match (state.phase, state.conversation_id) {
            (Phase::Ready, Some(conversation_id)) => Ok((state.epoch, conversation_id)),
            _ => Err(SyncError::NoActiveConversation),
        }
    }

    fn release(&self, activation: Activation) {
        if let Some(subscription) = &activation.subscription {
            self.channels.unsubscribe(subscription);
        }
        activation.poll.stop();
        log::debug!("Released activation epoch {}", activation.epoch);
    }

    /// Tears the previous activation down and resets state for a new one.
    /// The activation lock is held across both steps so no handle of the old
    /// epoch can be installed afterwards.
    fn begin(&self, phase: Phase, conversation_id: Option<ConversationId>) -> u64 {
        let mut activation = self.activation.lock();
        if let Some(previous) = activation.take() {
            self.release(previous);
        }
        self.state.lock().reset(phase, conversation_id)
    }

    fn accept_push(&self, epoch: u64, message: Message) -> SyncResult<bool> {
        self.with_epoch(epoch, |state| {
            if state.conversation_id != Some(message.conversation_id) {
                log::warn!(
                    "Dropping pushed message {} for conversation {}",
                    message.id,
                    message.conversation_id
                );
                return false;
            }
            state.absorb([message]) > 0
        })
    }

    async fn poll_once(&self, epoch: u64, conversation_id: ConversationId) -> SyncResult<usize> {
        let after = self.with_epoch(epoch, |state| state.transcript.newest_id())?;
        let result = self.api.messages_after(conversation_id, after).await;
        self.with_epoch(epoch, |state| match result {
            Ok(page) => {
                state.last_error = None;
                Ok(state.absorb(page.messages))
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                Err(err)
            }
        })?
    }
}

/// Synchronizer for the currently open conversation. At most one activation
/// is live at a time; opening another conversation tears the previous one
/// down first.
#[derive(Clone)]
pub struct ActiveConversationSync {
    inner: Arc<ActiveInner>,
}

impl ActiveConversationSync {
    pub fn new(
        api: Arc<dyn InboxApi>,
        channels: ChannelManager,
        signals: SignalBus,
        intervals: PollIntervals,
        page_size: u32,
    ) -> Self {
        Self {
            inner: Arc::new(ActiveInner {
                api,
                channels,
                signals,
                intervals,
                page_size: page_size.max(1),
                state: Mutex::new(ActiveState::new()),
                activation: Mutex::new(None),
            }),
        }
    }

    /// Loads the conversation header and its newest page, then subscribes
    /// to its channel and starts polling.
    pub async fn open(&self, conversation_id: ConversationId) -> SyncResult<()> {
        let epoch = self.inner.begin(Phase::Loading, Some(conversation_id));
        log::info!("Opening conversation {conversation_id} (epoch {epoch})");

        let result = self
            .inner
            .api
            .conversation_detail(conversation_id, self.inner.page_size)
            .await;

        let page_size = self.inner.page_size as usize;
        self.inner.with_epoch(epoch, |state| match result {
            Ok(detail) => {
                let has_more = detail
                    .has_more
                    .unwrap_or(detail.messages.len() == page_size);
                let appointment = detail
                    .appointment
                    .or_else(|| detail.conversation.appointment.clone());
                state.conversation = Some(detail.conversation);
                if let Some(appointment) = appointment {
                    state.set_appointment(appointment);
                }
                state.transcript = Transcript::from_messages(detail.messages);
                state.refresh_preview();
                state.has_more = has_more;
                state.phase = Phase::Ready;
                Ok(())
            }
            Err(err) => {
                log::warn!("Failed to open conversation {conversation_id}: {err}");
                state.phase = Phase::Idle;
                state.last_error = Some(err.clone());
                Err(err)
            }
        })??;

        self.activate(epoch, conversation_id);
        Ok(())
    }

    fn activate(&self, epoch: u64, conversation_id: ConversationId) {
        let scheduler = Arc::new(PollScheduler::new(self.inner.intervals));
        let subscription = self.inner.channels.subscribe(
            &conversation_channel(conversation_id),
            MESSAGE_SENT,
            push_handler(Arc::downgrade(&self.inner), epoch),
        );
        if subscription.is_some() {
            scheduler.mark_push_connected();
        }

        let weak = Arc::downgrade(&self.inner);
        let poll = scheduler.spawn("active-conversation", move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.poll_once(epoch, conversation_id).await {
                    Ok(0) | Err(SyncError::Superseded) => {}
                    Ok(count) => log::debug!("Poll added {count} messages to {conversation_id}"),
                    Err(err) => log::debug!("Poll of {conversation_id} failed: {err}"),
                }
            }
        });

        let activation = Activation {
            epoch,
            subscription,
            scheduler,
            poll,
        };
        let mut slot = self.inner.activation.lock();
        if self.inner.state.lock().epoch != epoch {
            // Another open() or close() won the race while we were subscribing.
            drop(slot);
            self.inner.release(activation);
            return;
        }
        *slot = Some(activation);
    }

    /// Releases the subscription and poll loop and discards pending results.
    pub fn close(&self) {
        let epoch = self.inner.begin(Phase::TornDown, None);
        log::debug!("Active conversation closed (epoch {epoch})");
    }

    /// Prepends the page of messages older than `before`.
    pub async fn load_older(&self, before: MessageId) -> SyncResult<usize> {
        let (epoch, conversation_id) = self.inner.current()?;
        let page_size = self.inner.page_size;
        let page = self
            .inner
            .api
            .messages_before(conversation_id, before, page_size)
            .await?;
        self.inner.with_epoch(epoch, |state| {
            let has_more = page
                .has_more
                .unwrap_or(page.messages.len() == page_size as usize);
            let inserted = state.absorb(page.messages);
            state.has_more = has_more;
            inserted
        })
    }

    /// Appends a pushed message unless its id already arrived.
    pub fn on_push_message(&self, message: Message) -> SyncResult<bool> {
        let (epoch, _) = self.inner.current()?;
        self.inner.accept_push(epoch, message)
    }

    /// Fetches messages newer than the newest known id.
    pub async fn poll_tick(&self) -> SyncResult<usize> {
        let (epoch, conversation_id) = self.inner.current()?;
        self.inner.poll_once(epoch, conversation_id).await
    }

    /// Sends a message and appends the server's canonical copy. Nothing is
    /// added before the server answers, so a failure leaves the transcript as
    /// it was.
    pub async fn send(&self, message: OutgoingMessage) -> SyncResult<Message> {
        message.validate()?;
        let (epoch, conversation_id) = self.inner.current()?;

        let sent = self.inner.api.send_message(conversation_id, &message).await?;
        let echo = sent.clone();
        match self.inner.with_epoch(epoch, |state| state.absorb([echo])) {
            Ok(_) => {}
            Err(SyncError::Superseded) => {
                log::debug!("Message {} sent after leaving {conversation_id}", sent.id);
            }
            Err(err) => return Err(err),
        }
        Ok(sent)
    }

    /// Optimistically flips a pending appointment, restoring the exact prior
    /// status if the server rejects the response.
    pub async fn respond_to_appointment(
        &self,
        action: AppointmentAction,
        reason: Option<String>,
    ) -> SyncResult<Appointment> {
        let (epoch, conversation_id, appointment_id, previous, optimistic) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let conversation_id = match (state.phase, state.conversation_id) {
                (Phase::Ready, Some(conversation_id)) => conversation_id,
                _ => return Err(SyncError::NoActiveConversation),
            };
            let Some(current) = state.appointment.clone() else {
                return Err(SyncError::Validation(
                    "conversation has no appointment".to_string(),
                ));
            };
            if state.busy.contains(&current.id) {
                return Err(SyncError::AppointmentBusy(current.id));
            }
            if current.status != AppointmentStatus::Pending {
                return Err(SyncError::Conflict(format!(
                    "appointment {} is no longer pending",
                    current.id
                )));
            }

            let mut optimistic = current.clone();
            optimistic.status = action.resulting_status();
            state.busy.insert(current.id);
            state.set_appointment(optimistic.clone());
            (
                state.epoch,
                conversation_id,
                current.id,
                current.status,
                optimistic,
            )
        };

        let result = self
            .inner
            .api
            .respond_to_appointment(conversation_id, appointment_id, action, reason.as_deref())
            .await;

        let mut state = self.inner.state.lock();
        if state.epoch != epoch {
            log::debug!("Appointment {appointment_id} response resolved after leaving {conversation_id}");
            return result.map(|confirmed| confirmed.unwrap_or(optimistic));
        }
        state.busy.remove(&appointment_id);

        match result {
            Ok(confirmed) => {
                let confirmed = confirmed.unwrap_or(optimistic);
                state.set_appointment(confirmed.clone());
                log::info!("Appointment {appointment_id} is now {:?}", confirmed.status);
                Ok(confirmed)
            }
            Err(err) => {
                if let Some(mut restored) = state
                    .appointment
                    .clone()
                    .filter(|appointment| appointment.id == appointment_id)
                {
                    restored.status = previous;
                    state.set_appointment(restored);
                }
                log::warn!("Appointment {appointment_id} response failed, reverted: {err}");
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Best-effort read receipt. The local unread reset is kept even if the
    /// server call fails.
    pub async fn mark_as_read(&self) -> SyncResult<()> {
        let (_, conversation_id) = self.inner.current()?;
        {
            let mut state = self.inner.state.lock();
            if let Some(conversation) = state.conversation.as_mut() {
                conversation.unread_count = 0;
            }
        }

        match self.inner.api.mark_read(conversation_id).await {
            Ok(()) => {
                self.inner
                    .signals
                    .publish(InboxSignal::ConversationMarkedRead(conversation_id));
                Ok(())
            }
            Err(err) => {
                log::warn!("Mark-read for {conversation_id} failed; keeping local state: {err}");
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> ActiveSnapshot {
        let push_connected = self
            .inner
            .activation
            .lock()
            .as_ref()
            .is_some_and(|activation| activation.scheduler.is_push_connected());
        let state = self.inner.state.lock();
        ActiveSnapshot {
            phase: state.phase,
            conversation_id: state.conversation_id,
            conversation: state.conversation.clone(),
            appointment: state.appointment.clone(),
            messages: state.transcript.to_vec(),
            has_more: state.has_more,
            push_connected,
            last_error: state.last_error.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.state.lock().conversation_id
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.inner.state.lock().transcript.ids()
    }

    /// Current poll interval, `None` when nothing is open.
    pub fn poll_interval(&self) -> Option<std::time::Duration> {
        self.inner
            .activation
            .lock()
            .as_ref()
            .map(|activation| activation.scheduler.interval())
    }
}

fn push_handler(inner: Weak<ActiveInner>, epoch: u64) -> PushHandler {
    Arc::new(move |payload| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match serde_json::from_value::<Message>(payload.clone()) {
            Ok(message) => match inner.accept_push(epoch, message) {
                Ok(_) | Err(SyncError::Superseded) => {}
                Err(err) => log::debug!("Pushed message dropped: {err}"),
            },
            Err(err) => log::warn!("Ignoring malformed {MESSAGE_SENT} payload: {err}"),
        }
    })
}
