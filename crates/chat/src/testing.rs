//! Store and responder doubles shared by the controller, view and session tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use murmur_storage::{
    MemoryStorage, MessageRecord, MessageStore, NewMessage, Sender, StorageError, StorageResult,
    UserId,
};
use tokio::sync::Notify;

use crate::responder::{Responder, ResponderError};

/// Memory store whose appends and loads can be switched to fail per sender.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStorage,
    pub fail_user_appends: AtomicBool,
    pub fail_ai_appends: AtomicBool,
    pub fail_loads: AtomicBool,
    pub append_calls: AtomicUsize,
    load_gate: Option<Arc<Notify>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Each `load` waits for one `notify_one` on the returned gate.
    pub fn with_gated_loads() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let store = Self {
            load_gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(store), gate)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn unavailable(stage: &'static str) -> StorageError {
        StorageError::InvariantViolation {
            stage,
            details: "store unavailable".to_string(),
        }
    }
}

impl MessageStore for FlakyStore {
    fn append<'a>(
        &'a self,
        user_id: &'a UserId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            self.append_calls.fetch_add(1, Ordering::SeqCst);
            let failing = match input.sender {
                Sender::User => &self.fail_user_appends,
                Sender::Ai => &self.fail_ai_appends,
            };
            if failing.load(Ordering::SeqCst) {
                return Err(Self::unavailable("flaky-append"));
            }
            self.inner.append(user_id, input).await
        })
    }

    fn load<'a>(&'a self, user_id: &'a UserId) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            if let Some(gate) = &self.load_gate {
                gate.notified().await;
            }
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(Self::unavailable("flaky-load"));
            }
            self.inner.load(user_id).await
        })
    }
}

/// Responder that replays scripted replies and records what it was asked.
pub(crate) struct ScriptedResponder {
    replies: Mutex<Vec<Option<String>>>,
    pub calls: Mutex<Vec<(String, usize)>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedResponder {
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self::new(
            replies.iter().map(|reply| Some(reply.to_string())).collect(),
            None,
        ))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::new(vec![None], None))
    }

    /// Each call waits for one `notify_one` on the returned gate before replying.
    pub fn gated(reply: &str) -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let responder = Self::new(vec![Some(reply.to_string())], Some(gate.clone()));
        (Arc::new(responder), gate)
    }

    fn new(mut replies: Vec<Option<String>>, gate: Option<Arc<Notify>>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl Responder for ScriptedResponder {
    fn respond<'a>(
        &'a self,
        _user_id: &'a UserId,
        latest_user_text: &'a str,
        prior_history: &'a [MessageRecord],
    ) -> BoxFuture<'a, Result<String, ResponderError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls lock")
                .push((latest_user_text.to_string(), prior_history.len()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.replies.lock().expect("replies lock").pop().flatten();
            next.ok_or(ResponderError::EmptyReply {
                stage: "scripted-responder",
            })
        })
    }
}

pub(crate) fn user_id(raw: &str) -> UserId {
    UserId::parse(raw).expect("valid user id")
}
