use std::sync::Arc;

use tokio::sync::watch;

use super::controller::{
    ControllerError, ConversationController, ConversationSnapshot, HistoryStatus, Notice,
    TurnOutcome,
};
use super::message::ViewEntry;

/// Read side of a conversation. Renders from controller snapshots only and never touches the
/// store; `send` is the one mutation it forwards.
pub struct ViewProjection {
    controller: Arc<ConversationController>,
    receiver: watch::Receiver<ConversationSnapshot>,
}

impl ViewProjection {
    pub fn new(controller: Arc<ConversationController>) -> Self {
        let receiver = controller.subscribe();
        Self {
            controller,
            receiver,
        }
    }

    pub fn entries(&self) -> Vec<ViewEntry> {
        self.receiver.borrow().entries.clone()
    }

    pub fn is_composing(&self) -> bool {
        self.receiver.borrow().is_composing()
    }

    pub fn history(&self) -> HistoryStatus {
        self.receiver.borrow().history
    }

    pub fn notice(&self) -> Option<Notice> {
        self.receiver.borrow().notice.clone()
    }

    /// Latest snapshot, marking it as seen for [`Self::changed`].
    pub fn current(&mut self) -> ConversationSnapshot {
        self.receiver.borrow_and_update().clone()
    }

    /// Waits for the next snapshot the caller has not seen. Returns `false` once the
    /// controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    pub async fn send(&self, text: &str) -> Result<TurnOutcome, ControllerError> {
        self.controller.send(text).await
    }

    pub async fn reload(&self) -> Result<HistoryStatus, ControllerError> {
        self.controller.load_history().await
    }

    pub fn dismiss_notice(&self) {
        self.controller.dismiss_notice();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStore, ScriptedResponder, user_id};
    use murmur_storage::Sender;

    fn projection(responder: Arc<ScriptedResponder>) -> ViewProjection {
        let controller = Arc::new(ConversationController::new(
            user_id("u1"),
            FlakyStore::new(),
            responder,
        ));
        controller.view()
    }

    #[tokio::test]
    async fn projection_follows_the_controller() {
        let mut view = projection(ScriptedResponder::replying(&["hello there"]));
        assert!(view.entries().is_empty());
        assert_eq!(view.history(), HistoryStatus::NotLoaded);

        view.send("hi").await.expect("accepted");

        assert!(view.changed().await);
        let snapshot = view.current();
        assert_eq!(
            snapshot
                .entries
                .iter()
                .map(|entry| entry.sender())
                .collect::<Vec<_>>(),
            vec![Sender::User, Sender::Ai]
        );
        assert!(!view.is_composing());
        assert_eq!(view.notice(), None);
    }

    #[tokio::test]
    async fn notices_surface_and_can_be_dismissed() {
        let view = projection(ScriptedResponder::failing());

        view.send("hi").await.expect("accepted");
        assert_eq!(view.notice().map(|notice| notice.message()), Some("AI failed to respond."));
        assert_eq!(view.entries().len(), 1);

        view.dismiss_notice();
        assert_eq!(view.notice(), None);
    }

    #[tokio::test]
    async fn blank_send_through_the_view_changes_nothing() {
        let view = projection(ScriptedResponder::replying(&[]));
        assert!(matches!(
            view.send("   ").await,
            Err(ControllerError::BlankText { .. })
        ));
        assert!(view.entries().is_empty());
    }

    #[tokio::test]
    async fn reload_marks_history_loaded() {
        let view = projection(ScriptedResponder::replying(&[]));
        assert_eq!(view.reload().await.expect("accepted"), HistoryStatus::Loaded);
        assert_eq!(view.history(), HistoryStatus::Loaded);
    }
}
