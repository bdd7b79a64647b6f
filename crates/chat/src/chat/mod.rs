/// Turn orchestration and the published conversation snapshot.
pub mod controller;
/// View entries and the per-turn state machine.
pub mod message;
pub mod reconcile;
pub mod view;

pub use controller::{
    ControllerError, ConversationController, ConversationSnapshot, HistoryStatus, Notice,
    NoticeKind, TurnOutcome,
};
pub use message::{
    LocalId, ProvisionalMessage, Timestamp, TurnState, TurnTransition, TurnTransitionRejection,
    ViewEntry,
};
pub use view::ViewProjection;
