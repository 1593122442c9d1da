pub mod events;
pub mod message;
pub mod types;

pub use events::{ConversationUpdated, InboxSignal};
pub use message::{
    ActionStatus, Attachment, BookingCard, Cancellation, DepositRequest, DesignShare, Message,
    MessageBody, OutgoingMessage, Reschedule,
};
pub use types::{
    Appointment, AppointmentAction, AppointmentId, AppointmentStatus, AttachmentId,
    ConversationId, ConversationKind, ConversationSummary, LastMessage, MessageId, Pagination,
    Participant, UserId,
};
