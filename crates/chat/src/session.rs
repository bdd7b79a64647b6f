use std::sync::Arc;

use murmur_storage::{MessageStore, StorageResult, UserId};
use uuid::Uuid;

use crate::chat::ConversationController;
use crate::responder::Responder;

const ANONYMOUS_PREFIX: &str = "anon-";

/// Who is signed in. Passed explicitly; there is no process-wide session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthContext {
    #[default]
    SignedOut,
    SignedIn {
        user_id: UserId,
        anonymous: bool,
    },
}

impl AuthContext {
    pub fn signed_in(user_id: UserId) -> Self {
        Self::SignedIn {
            user_id,
            anonymous: false,
        }
    }

    /// Signs in under a freshly generated identity.
    pub fn anonymous() -> StorageResult<Self> {
        let user_id = UserId::parse(format!("{ANONYMOUS_PREFIX}{}", Uuid::now_v7()))?;
        Ok(Self::SignedIn {
            user_id,
            anonymous: true,
        })
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::SignedOut => None,
            Self::SignedIn { user_id, .. } => Some(user_id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::SignedIn { anonymous: true, .. })
    }
}

pub struct ChatSession;

impl ChatSession {
    /// Opens the signed-in user's conversation, or `None` when nobody is signed in.
    pub fn open(
        auth: &AuthContext,
        store: Arc<dyn MessageStore>,
        responder: Arc<dyn Responder>,
    ) -> Option<Arc<ConversationController>> {
        let Some(user_id) = auth.user_id() else {
            tracing::info!("no user signed in, conversation unavailable");
            return None;
        };

        tracing::info!(user_id = %user_id, anonymous = auth.is_anonymous(), "opening conversation");
        Some(Arc::new(ConversationController::new(
            user_id.clone(),
            store,
            responder,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStore, ScriptedResponder, user_id};

    #[test]
    fn signed_out_has_no_conversation() {
        let opened = ChatSession::open(
            &AuthContext::SignedOut,
            FlakyStore::new(),
            ScriptedResponder::replying(&[]),
        );
        assert!(opened.is_none());
    }

    #[test]
    fn anonymous_identities_are_distinct() {
        let first = AuthContext::anonymous().expect("anonymous");
        let second = AuthContext::anonymous().expect("anonymous");
        assert!(first.is_anonymous());
        assert_ne!(first.user_id(), second.user_id());
        assert!(
            first
                .user_id()
                .is_some_and(|user_id| user_id.as_str().starts_with(ANONYMOUS_PREFIX))
        );
    }

    #[tokio::test]
    async fn sessions_only_see_their_own_history() {
        let store = FlakyStore::new();
        let responder = ScriptedResponder::replying(&["for a", "for b"]);

        let a = ChatSession::open(
            &AuthContext::signed_in(user_id("a")),
            store.clone(),
            responder.clone(),
        )
        .expect("signed in");
        let b = ChatSession::open(&AuthContext::signed_in(user_id("b")), store, responder)
            .expect("signed in");

        a.send("from a").await.expect("accepted");
        b.load_history().await.expect("load accepted");

        assert!(b.snapshot().entries.is_empty());
        assert_eq!(a.user_id(), &user_id("a"));
    }
}
