use std::collections::HashMap;

use futures::future::BoxFuture;
use snafu::ensure;
use tokio::sync::RwLock;

use super::error::{EmptyTextSnafu, StorageResult};
use super::ids::{MessageId, UserId};
use super::types::{MessageRecord, NewMessage};
use super::{MessageStore, unix_timestamp_millis};

/// Process-local message log. Same contract as [`super::SqliteStorage`] minus durability.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    partitions: RwLock<HashMap<UserId, Vec<MessageRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStorage {
    fn append<'a>(
        &'a self,
        user_id: &'a UserId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            ensure!(
                !input.text.trim().is_empty(),
                EmptyTextSnafu {
                    stage: "memory-append-validate-text",
                    user_id: user_id.to_string(),
                }
            );

            // Holding the write lock across seq allocation and push keeps seq gap-free.
            let mut partitions = self.partitions.write().await;
            let log = partitions.entry(user_id.clone()).or_default();
            let seq = log.last().map_or(1, |last| last.seq + 1);

            let record = MessageRecord {
                id: MessageId::new_v7(),
                user_id: user_id.clone(),
                seq,
                sender: input.sender,
                text: input.text,
                created_at_unix_millis: unix_timestamp_millis(),
            };
            log.push(record.clone());

            tracing::debug!(
                user_id = %user_id,
                message_id = %record.id,
                seq,
                sender = %record.sender,
                "appended message to memory log"
            );
            Ok(record)
        })
    }

    fn load<'a>(&'a self, user_id: &'a UserId) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let partitions = self.partitions.read().await;
            Ok(partitions.get(user_id).cloned().unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Sender, StorageError};

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).expect("valid user id")
    }

    #[tokio::test]
    async fn load_returns_messages_in_append_order() {
        let store = MemoryStorage::new();
        let u1 = user("u1");

        for text in ["one", "two", "three"] {
            store.append(&u1, NewMessage::user(text)).await.expect("append");
        }

        let texts = store
            .load(&u1)
            .await
            .expect("load")
            .into_iter()
            .map(|record| (record.seq, record.text))
            .collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![
                (1, "one".to_string()),
                (2, "two".to_string()),
                (3, "three".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn partitions_do_not_leak_between_users() {
        let store = MemoryStorage::new();
        store
            .append(&user("a"), NewMessage::ai("for a only"))
            .await
            .expect("append");

        assert!(store.load(&user("b")).await.expect("load").is_empty());
        let a_log = store.load(&user("a")).await.expect("load");
        assert_eq!(a_log.len(), 1);
        assert_eq!(a_log[0].sender, Sender::Ai);
    }

    #[tokio::test]
    async fn blank_text_is_refused() {
        let store = MemoryStorage::new();
        let error = store
            .append(&user("u1"), NewMessage::user(" \n\t"))
            .await
            .expect_err("blank text");
        assert!(matches!(error, StorageError::EmptyText { .. }));
        assert!(store.load(&user("u1")).await.expect("load").is_empty());
    }
}
