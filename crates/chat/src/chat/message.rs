use std::fmt;

use murmur_storage::{MessageId, MessageRecord, Sender};

/// Client-side identifier of a message that the store has not confirmed yet.
///
/// Unique per controller; never persisted and never reused as a store id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl LocalId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "local-{}", self.0)
    }
}

/// Ordering key of a view entry.
///
/// `Pending` carries the local clock and only orders the entry for display until the store
/// assigns `Committed::seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Pending { local_unix_millis: u64 },
    Committed { seq: u64, unix_millis: u64 },
}

impl Timestamp {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Optimistic copy of a message that is being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalMessage {
    pub local_id: LocalId,
    pub sender: Sender,
    pub text: String,
    pub local_unix_millis: u64,
}

impl ProvisionalMessage {
    pub fn user(local_id: LocalId, text: impl Into<String>, local_unix_millis: u64) -> Self {
        Self {
            local_id,
            sender: Sender::User,
            text: text.into(),
            local_unix_millis,
        }
    }
}

/// One row of the rendered conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEntry {
    Provisional(ProvisionalMessage),
    Confirmed(MessageRecord),
}

impl ViewEntry {
    pub fn sender(&self) -> Sender {
        match self {
            Self::Provisional(message) => message.sender,
            Self::Confirmed(record) => record.sender,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Provisional(message) => &message.text,
            Self::Confirmed(record) => &record.text,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Provisional(message) => Timestamp::Pending {
                local_unix_millis: message.local_unix_millis,
            },
            Self::Confirmed(record) => Timestamp::Committed {
                seq: record.seq,
                unix_millis: record.created_at_unix_millis,
            },
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Provisional(message) => Some(message.local_id),
            Self::Confirmed(_) => None,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.confirmed().map(|record| record.id)
    }

    pub fn confirmed(&self) -> Option<&MessageRecord> {
        match self {
            Self::Provisional(_) => None,
            Self::Confirmed(record) => Some(record),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

/// Lifecycle of a single send turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    PersistingUser {
        local_id: LocalId,
    },
    AwaitingResponder {
        user_message_id: MessageId,
    },
    PersistingReply {
        user_message_id: MessageId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransition {
    Begin(LocalId),
    UserPersisted(MessageId),
    ReplyReceived,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    /// A turn is already running; new turns are not queued.
    TurnInFlight { active: TurnState },
    NoActiveTurn,
    OutOfOrder {
        state: TurnState,
        transition: TurnTransition,
    },
}

impl TurnState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True while the assistant reply is outstanding, which is what the view shows as typing.
    pub fn is_composing(&self) -> bool {
        matches!(
            self,
            Self::AwaitingResponder { .. } | Self::PersistingReply { .. }
        )
    }

    /// Applies one transition. Every step after `Begin` must follow the previous one.
    pub fn apply(
        &self,
        transition: TurnTransition,
    ) -> Result<TurnState, TurnTransitionRejection> {
        match (*self, transition) {
            (Self::Idle, TurnTransition::Begin(local_id)) => Ok(Self::PersistingUser { local_id }),
            (active, TurnTransition::Begin(_)) => {
                Err(TurnTransitionRejection::TurnInFlight { active })
            }
            (Self::PersistingUser { .. }, TurnTransition::UserPersisted(user_message_id)) => {
                Ok(Self::AwaitingResponder { user_message_id })
            }
            (Self::AwaitingResponder { user_message_id }, TurnTransition::ReplyReceived) => {
                Ok(Self::PersistingReply { user_message_id })
            }
            (Self::Idle, TurnTransition::Finish) => Err(TurnTransitionRejection::NoActiveTurn),
            (_, TurnTransition::Finish) => Ok(Self::Idle),
            (state, transition) => Err(TurnTransitionRejection::OutOfOrder { state, transition }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_storage::UserId;

    fn record(seq: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            user_id: UserId::parse("u1").expect("user id"),
            seq,
            sender: Sender::Ai,
            text: "hello there".to_string(),
            created_at_unix_millis: 1_700_000_000_000,
        }
    }

    #[test]
    fn full_turn_walks_every_state() {
        let message_id = MessageId::new_v7();
        let state = TurnState::Idle
            .apply(TurnTransition::Begin(LocalId::new(1)))
            .expect("begin");
        assert_eq!(
            state,
            TurnState::PersistingUser {
                local_id: LocalId::new(1)
            }
        );
        assert!(!state.is_composing());

        let state = state
            .apply(TurnTransition::UserPersisted(message_id))
            .expect("user persisted");
        assert!(state.is_composing());

        let state = state
            .apply(TurnTransition::ReplyReceived)
            .expect("reply received");
        assert_eq!(
            state,
            TurnState::PersistingReply {
                user_message_id: message_id
            }
        );
        assert!(state.is_composing());

        assert_eq!(state.apply(TurnTransition::Finish), Ok(TurnState::Idle));
    }

    #[test]
    fn begin_is_rejected_while_a_turn_runs() {
        let active = TurnState::PersistingUser {
            local_id: LocalId::new(1),
        };
        assert_eq!(
            active.apply(TurnTransition::Begin(LocalId::new(2))),
            Err(TurnTransitionRejection::TurnInFlight { active })
        );
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let rejection = TurnState::PersistingUser {
            local_id: LocalId::new(1),
        }
        .apply(TurnTransition::ReplyReceived);
        assert!(matches!(
            rejection,
            Err(TurnTransitionRejection::OutOfOrder { .. })
        ));
        assert_eq!(
            TurnState::Idle.apply(TurnTransition::Finish),
            Err(TurnTransitionRejection::NoActiveTurn)
        );
    }

    #[test]
    fn entries_expose_their_timestamp_kind() {
        let provisional =
            ViewEntry::Provisional(ProvisionalMessage::user(LocalId::new(7), "hi", 42));
        assert_eq!(
            provisional.timestamp(),
            Timestamp::Pending {
                local_unix_millis: 42
            }
        );
        assert_eq!(provisional.local_id(), Some(LocalId::new(7)));
        assert_eq!(provisional.message_id(), None);

        let confirmed = ViewEntry::Confirmed(record(3));
        assert!(confirmed.timestamp().is_committed());
        assert!(matches!(confirmed.timestamp(), Timestamp::Committed { seq: 3, .. }));
        assert_eq!(confirmed.sender(), Sender::Ai);
        assert_eq!(confirmed.text(), "hello there");
    }
}
