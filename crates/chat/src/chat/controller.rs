use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use murmur_storage::{MessageRecord, MessageStore, NewMessage, UserId};
use snafu::{Snafu, ensure};
use tokio::sync::watch;

use super::message::{LocalId, ProvisionalMessage, TurnState, TurnTransition, ViewEntry};
use super::reconcile;
use super::view::ViewProjection;
use crate::responder::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryStatus {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    /// The last load failed; the history is unknown, not empty.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    UserMessageNotSaved,
    AssistantDidNotRespond,
    ReplyNotSaved,
    HistoryUnavailable,
}

/// User-facing report of a recovered failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub detail: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn message(&self) -> &'static str {
        match self.kind {
            NoticeKind::UserMessageNotSaved => "Failed to send your message.",
            NoticeKind::AssistantDidNotRespond => "AI failed to respond.",
            NoticeKind::ReplyNotSaved => "The AI reply could not be saved.",
            NoticeKind::HistoryUnavailable => "Could not load your chat history.",
        }
    }
}

/// Everything a view needs to render one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationSnapshot {
    pub entries: Vec<ViewEntry>,
    pub turn: TurnState,
    pub history: HistoryStatus,
    pub notice: Option<Notice>,
}

impl ConversationSnapshot {
    pub fn is_composing(&self) -> bool {
        self.turn.is_composing()
    }
}

/// How an accepted turn ended. Failures here were already rolled back and published as a
/// [`Notice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        user: MessageRecord,
        reply: MessageRecord,
    },
    UserMessageNotSaved,
    AssistantDidNotRespond {
        user: MessageRecord,
    },
    ReplyNotSaved {
        user: MessageRecord,
    },
}

/// Requests the controller refused without touching the view or the store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("message text is blank on `{stage}`"))]
    BlankText { stage: &'static str },
    #[snafu(display("a turn is already in flight on `{stage}`"))]
    TurnInFlight { stage: &'static str },
    #[snafu(display("history is still loading on `{stage}`"))]
    HistoryLoading { stage: &'static str },
}

/// Drives one user's conversation: persist the user message, ask the responder, persist the
/// reply, and keep the published snapshot consistent with the store along the way.
///
/// At most one turn runs at a time. The check and the `Idle -> PersistingUser` transition
/// happen inside a single `send_if_modified`, so concurrent callers cannot both win.
pub struct ConversationController {
    user_id: UserId,
    store: Arc<dyn MessageStore>,
    responder: Arc<dyn Responder>,
    state: watch::Sender<ConversationSnapshot>,
    next_local_id: AtomicU64,
}

impl ConversationController {
    pub fn new(
        user_id: UserId,
        store: Arc<dyn MessageStore>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        let (state, _) = watch::channel(ConversationSnapshot::default());
        Self {
            user_id,
            store,
            responder,
            state,
            next_local_id: AtomicU64::new(1),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.state.subscribe()
    }

    pub fn view(self: &Arc<Self>) -> ViewProjection {
        ViewProjection::new(Arc::clone(self))
    }

    /// Replaces the view with the stored history. Refused while a turn or another load runs.
    ///
    /// A failed load leaves the entries untouched and marks the history `Unavailable`.
    pub async fn load_history(&self) -> Result<HistoryStatus, ControllerError> {
        let mut rejection = None;
        self.state.send_if_modified(|snapshot| {
            if !snapshot.turn.is_idle() {
                rejection = Some(
                    TurnInFlightSnafu {
                        stage: "load-history-begin",
                    }
                    .build(),
                );
                return false;
            }
            if snapshot.history == HistoryStatus::Loading {
                rejection = Some(
                    HistoryLoadingSnafu {
                        stage: "load-history-begin",
                    }
                    .build(),
                );
                return false;
            }
            snapshot.history = HistoryStatus::Loading;
            true
        });
        if let Some(error) = rejection {
            tracing::debug!(user_id = %self.user_id, error = %error, "history load refused");
            return Err(error);
        }

        let guard = InFlightGuard::new(self, InFlight::History);
        let loaded = self.store.load(&self.user_id).await;
        guard.disarm();

        match loaded {
            Ok(records) => {
                tracing::info!(
                    user_id = %self.user_id,
                    count = records.len(),
                    "loaded chat history"
                );
                self.state.send_modify(|snapshot| {
                    snapshot.entries = records.into_iter().map(ViewEntry::Confirmed).collect();
                    snapshot.history = HistoryStatus::Loaded;
                    if snapshot
                        .notice
                        .as_ref()
                        .is_some_and(|notice| notice.kind == NoticeKind::HistoryUnavailable)
                    {
                        snapshot.notice = None;
                    }
                });
                Ok(HistoryStatus::Loaded)
            }
            Err(error) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    stage = error.stage(),
                    error = %error,
                    "chat history unavailable"
                );
                self.state.send_modify(|snapshot| {
                    snapshot.history = HistoryStatus::Unavailable;
                    snapshot.notice = Some(Notice::new(
                        NoticeKind::HistoryUnavailable,
                        error.to_string(),
                    ));
                });
                Ok(HistoryStatus::Unavailable)
            }
        }
    }

    /// Runs one full turn for `text`.
    ///
    /// Blank text and sends while another turn or a history load is running are refused with
    /// an error and change nothing. Every accepted turn ends back in `Idle`.
    pub async fn send(&self, text: &str) -> Result<TurnOutcome, ControllerError> {
        let text = text.trim();
        ensure!(
            !text.is_empty(),
            BlankTextSnafu {
                stage: "send-validate-text"
            }
        );

        let local_id = LocalId::new(self.next_local_id.fetch_add(1, Ordering::Relaxed));
        let provisional = ViewEntry::Provisional(ProvisionalMessage::user(
            local_id,
            text,
            local_unix_millis(),
        ));

        let mut rejection = None;
        self.state.send_if_modified(|snapshot| {
            if snapshot.history == HistoryStatus::Loading {
                rejection = Some(HistoryLoadingSnafu { stage: "send-begin" }.build());
                return false;
            }
            match snapshot.turn.apply(TurnTransition::Begin(local_id)) {
                Ok(next) => {
                    snapshot.turn = next;
                    snapshot.entries = reconcile::push_provisional(&snapshot.entries, provisional);
                    snapshot.notice = None;
                    true
                }
                Err(_) => {
                    rejection = Some(TurnInFlightSnafu { stage: "send-begin" }.build());
                    false
                }
            }
        });
        if let Some(error) = rejection {
            tracing::debug!(user_id = %self.user_id, error = %error, "send refused");
            return Err(error);
        }
        tracing::info!(user_id = %self.user_id, %local_id, "turn started");

        let guard = InFlightGuard::new(self, InFlight::Turn(local_id));
        let outcome = self.run_turn(text, local_id).await;
        guard.disarm();
        Ok(outcome)
    }

    /// Drives an accepted turn from `PersistingUser` back to `Idle`.
    async fn run_turn(&self, text: &str, local_id: LocalId) -> TurnOutcome {
        let user_message = match self.store.append(&self.user_id, NewMessage::user(text)).await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    %local_id,
                    stage = error.stage(),
                    error = %error,
                    "user message not saved, rolling back"
                );
                self.advance(
                    TurnTransition::Finish,
                    |entries| reconcile::rollback(entries, local_id),
                    Some(Notice::new(NoticeKind::UserMessageNotSaved, error.to_string())),
                );
                return TurnOutcome::UserMessageNotSaved;
            }
        };

        let user_record = user_message.clone();
        self.advance(
            TurnTransition::UserPersisted(user_message.id),
            |entries| reconcile::reconcile(entries, user_record, local_id),
            None,
        );

        let prior_history = {
            let snapshot = self.state.borrow();
            reconcile::confirmed_history(&snapshot.entries)
                .into_iter()
                .filter(|record| record.id != user_message.id)
                .collect::<Vec<_>>()
        };

        let reply_text = match self
            .responder
            .respond(&self.user_id, &user_message.text, &prior_history)
            .await
        {
            Ok(reply_text) => reply_text,
            Err(error) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    message_id = %user_message.id,
                    error = %error,
                    "assistant did not respond"
                );
                self.advance(
                    TurnTransition::Finish,
                    <[ViewEntry]>::to_vec,
                    Some(Notice::new(
                        NoticeKind::AssistantDidNotRespond,
                        error.to_string(),
                    )),
                );
                return TurnOutcome::AssistantDidNotRespond { user: user_message };
            }
        };

        self.advance(TurnTransition::ReplyReceived, <[ViewEntry]>::to_vec, None);

        match self.store.append(&self.user_id, NewMessage::ai(reply_text)).await {
            Ok(reply) => {
                let reply_record = reply.clone();
                self.advance(
                    TurnTransition::Finish,
                    |entries| reconcile::append_confirmed(entries, reply_record),
                    None,
                );
                tracing::info!(
                    user_id = %self.user_id,
                    user_message_id = %user_message.id,
                    reply_id = %reply.id,
                    "turn completed"
                );
                TurnOutcome::Completed {
                    user: user_message,
                    reply,
                }
            }
            Err(error) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    message_id = %user_message.id,
                    stage = error.stage(),
                    error = %error,
                    "assistant reply not saved"
                );
                self.advance(
                    TurnTransition::Finish,
                    <[ViewEntry]>::to_vec,
                    Some(Notice::new(NoticeKind::ReplyNotSaved, error.to_string())),
                );
                TurnOutcome::ReplyNotSaved { user: user_message }
            }
        }
    }

    pub fn dismiss_notice(&self) {
        self.state.send_if_modified(|snapshot| snapshot.notice.take().is_some());
    }

    /// Returns an interrupted turn or load to a state that accepts new requests.
    fn abandon(&self, interrupted: InFlight) {
        let changed = self.state.send_if_modified(|snapshot| match interrupted {
            InFlight::Turn(local_id) => match snapshot.turn.apply(TurnTransition::Finish) {
                Ok(next) => {
                    snapshot.turn = next;
                    snapshot.entries = reconcile::rollback(&snapshot.entries, local_id);
                    true
                }
                Err(_) => false,
            },
            InFlight::History => {
                if snapshot.history != HistoryStatus::Loading {
                    return false;
                }
                snapshot.history = HistoryStatus::NotLoaded;
                true
            }
        });
        if changed {
            tracing::warn!(
                user_id = %self.user_id,
                ?interrupted,
                "request dropped before finishing"
            );
        }
    }

    /// Publishes one turn step together with its view change.
    fn advance(
        &self,
        transition: TurnTransition,
        update_entries: impl FnOnce(&[ViewEntry]) -> Vec<ViewEntry>,
        notice: Option<Notice>,
    ) {
        self.state.send_modify(|snapshot| {
            match snapshot.turn.apply(transition) {
                Ok(next) => snapshot.turn = next,
                Err(rejection) => {
                    tracing::error!(
                        user_id = %self.user_id,
                        ?rejection,
                        "turn transition rejected"
                    );
                }
            }
            snapshot.entries = update_entries(&snapshot.entries);
            if notice.is_some() {
                snapshot.notice = notice;
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum InFlight {
    Turn(LocalId),
    History,
}

/// Abandons the in-flight request if its future is dropped before `disarm`.
struct InFlightGuard<'a> {
    controller: &'a ConversationController,
    pending: Option<InFlight>,
}

impl<'a> InFlightGuard<'a> {
    fn new(controller: &'a ConversationController, pending: InFlight) -> Self {
        Self {
            controller,
            pending: Some(pending),
        }
    }

    fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.controller.abandon(pending);
        }
    }
}

fn local_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
