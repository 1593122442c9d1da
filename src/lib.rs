//! Real-time conversation sync for the marketplace inbox.
//!
//! Three synchronizers share one session: the conversation list, the open
//! conversation and the unread badge. Each merges push events and poll
//! results into local state, and push is always optional.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use sync::InboxSession;
