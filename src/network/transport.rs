use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

/// Raw event payload as delivered by the push transport.
pub type PushPayload = Value;

/// Callback invoked for every event on a subscribed channel.
pub type PushHandler = Arc<dyn Fn(&PushPayload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("push transport is not connected")]
    Disconnected,
    #[error("subscription to {0} rejected")]
    Rejected(String),
}

/// Server push connection shared by every synchronizer in a session.
///
/// Implementations own the connection; subscribers only ever add and remove
/// their own routes and never close the transport.
pub trait PushTransport: Send + Sync {
    fn subscribe(
        &self,
        channel: &str,
        event: &str,
        handler: PushHandler,
    ) -> Result<SubscriptionId, TransportError>;

    fn unsubscribe(&self, id: SubscriptionId);
}

struct Route {
    id: SubscriptionId,
    handler: PushHandler,
}

struct HubState {
    connected: bool,
    routes: HashMap<(String, String), Vec<Route>>,
}

/// In-process push transport.
///
/// Hosts that already own a realtime connection forward its events through
/// [`LocalPushHub::publish`].
pub struct LocalPushHub {
    state: Mutex<HubState>,
}

impl LocalPushHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                connected: true,
                routes: HashMap::new(),
            }),
        }
    }

    /// A hub that refuses subscriptions until [`set_connected`](Self::set_connected).
    pub fn disconnected() -> Self {
        let hub = Self::new();
        hub.set_connected(false);
        hub
    }

    /// While disconnected, new subscriptions fail and published events are
    /// dropped. Existing routes survive, like a socket that silently stalls.
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Deliver `payload` to every handler on `channel`/`event`. Returns the
    /// number of handlers invoked.
    pub fn publish(&self, channel: &str, event: &str, payload: &PushPayload) -> usize {
        let handlers: Vec<PushHandler> = {
            let state = self.state.lock();
            if !state.connected {
                log::debug!("Dropping {event} on {channel}: hub disconnected");
                return 0;
            }
            state
                .routes
                .get(&(channel.to_string(), event.to_string()))
                .map(|routes| routes.iter().map(|route| route.handler.clone()).collect())
                .unwrap_or_default()
        };

        // Handlers run outside the lock so they may subscribe or unsubscribe.
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, channel: &str, event: &str) -> usize {
        self.state
            .lock()
            .routes
            .get(&(channel.to_string(), event.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for LocalPushHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for LocalPushHub {
    fn subscribe(
        &self,
        channel: &str,
        event: &str,
        handler: PushHandler,
    ) -> Result<SubscriptionId, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        let id = SubscriptionId::new();
        state
            .routes
            .entry((channel.to_string(), event.to_string()))
            .or_default()
            .push(Route { id, handler });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        for routes in state.routes.values_mut() {
            routes.retain(|route| route.id != id);
        }
        state.routes.retain(|_, routes| !routes.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> PushHandler {
        let counter = counter.clone();
        Arc::new(move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn publish_reaches_only_matching_routes() {
        let hub = LocalPushHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        hub.subscribe("private-conversation.1", "message.sent", counting_handler(&hits))
            .unwrap();

        assert_eq!(hub.publish("private-conversation.1", "message.sent", &Value::Null), 1);
        assert_eq!(hub.publish("private-conversation.2", "message.sent", &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_route() {
        let hub = LocalPushHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = hub
            .subscribe("private-user.1", "conversation.updated", counting_handler(&hits))
            .unwrap();
        hub.unsubscribe(id);
        hub.unsubscribe(id);

        assert_eq!(hub.subscriber_count("private-user.1", "conversation.updated"), 0);
        assert_eq!(hub.publish("private-user.1", "conversation.updated", &Value::Null), 0);
    }

    #[test]
    fn disconnected_hub_rejects_and_drops() {
        let hub = LocalPushHub::disconnected();
        let hits = Arc::new(AtomicUsize::new(0));
        let err = hub
            .subscribe("private-user.1", "conversation.updated", counting_handler(&hits))
            .unwrap_err();
        assert_eq!(err, TransportError::Disconnected);

        hub.set_connected(true);
        hub.subscribe("private-user.1", "conversation.updated", counting_handler(&hits))
            .unwrap();
        hub.set_connected(false);
        assert_eq!(hub.publish("private-user.1", "conversation.updated", &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
