//! Dedup and ordering helpers shared by the synchronizers.
//!
//! Records from push, poll and send echoes all land here. The first arrival
//! of an id wins and every later copy is a no-op, so the outcome does not
//! depend on which source was faster.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::common::{ConversationSummary, Message, MessageId};
use crate::network::ConversationSort;

/// Messages of one conversation, unique by id and ascending by id.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: BTreeMap<MessageId, Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut transcript = Self::new();
        transcript.merge(messages);
        transcript
    }

    /// Inserts `message` unless its id is already present. Returns whether
    /// the transcript changed.
    pub fn insert(&mut self, message: Message) -> bool {
        match self.messages.entry(message.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    /// Merges a batch, returning how many messages were new.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> usize {
        let mut inserted = 0;
        for message in incoming {
            if self.insert(message) {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn oldest_id(&self) -> Option<MessageId> {
        self.messages.keys().next().copied()
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.messages.keys().next_back().copied()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.keys().copied().collect()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.values().cloned().collect()
    }
}

/// Display order for inbox rows. Ties fall back to id so the order is total.
pub fn order_summaries<'a>(
    summaries: impl IntoIterator<Item = &'a ConversationSummary>,
    sort: ConversationSort,
) -> Vec<ConversationSummary> {
    let mut ordered: Vec<ConversationSummary> = summaries.into_iter().cloned().collect();
    match sort {
        ConversationSort::Newest => {
            ordered.sort_by_key(|summary| Reverse((summary.activity_at(), summary.id)));
        }
        ConversationSort::Oldest => {
            ordered.sort_by_key(|summary| (summary.activity_at(), summary.id));
        }
        ConversationSort::UnreadFirst => {
            ordered.sort_by_key(|summary| {
                Reverse((summary.unread_count > 0, summary.activity_at(), summary.id))
            });
        }
    }
    ordered
}
