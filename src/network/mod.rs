pub mod api;
pub mod channels;
pub mod client;
pub mod transport;

pub use api::{
    ConversationDetail, ConversationFilter, ConversationPage, ConversationSort, InboxApi,
    MessagePage, NewConversation,
};
pub use channels::{ChannelManager, SubscriptionHandle};
pub use client::HttpInboxApi;
pub use transport::{LocalPushHub, PushHandler, PushPayload, PushTransport, SubscriptionId, TransportError};
