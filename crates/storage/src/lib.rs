pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, UserId};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{MessageRecord, NewMessage, Sender};

/// Append-only, per-user ordered message log.
///
/// Implementations must make an appended message visible to the next `load` for the same
/// user and must keep users' partitions fully isolated. The log has no update or delete
/// operation.
pub trait MessageStore: Send + Sync {
    fn append<'a>(
        &'a self,
        user_id: &'a UserId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;

    /// Returns the whole log of `user_id` ordered by `seq` ascending.
    ///
    /// An error means the history is unknown, callers must not treat it as empty.
    fn load<'a>(&'a self, user_id: &'a UserId) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;
}

pub(crate) fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
