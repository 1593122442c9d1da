pub mod active;
pub mod badge;
pub mod list;
pub mod merge;
pub mod scheduler;
pub mod session;
pub mod signals;

pub use active::{ActiveConversationSync, ActiveSnapshot, Phase};
pub use badge::UnreadBadgeSync;
pub use list::{ConversationListSync, ListSnapshot, ListState, PatchOutcome};
pub use merge::Transcript;
pub use scheduler::{PollIntervals, PollScheduler, PollTask};
pub use session::{InboxSession, SessionSettings};
pub use signals::SignalBus;
