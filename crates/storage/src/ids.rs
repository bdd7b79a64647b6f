use std::fmt;
use std::str::FromStr;

use snafu::{ResultExt, ensure};
use uuid::Uuid;

use super::error::{InvalidIdSnafu, InvalidUserIdSnafu, StorageError, StorageResult};

/// Store-assigned message identity. UUIDv7 keeps ids roughly time-sortable in raw dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
            stage: "parse-message-id",
            id_type: "message-id",
            raw: raw.to_string(),
        })?;
        Ok(Self(parsed))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl FromStr for MessageId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}

/// Partition key for the message log, issued by the identity provider.
///
/// The store never interprets the value beyond requiring it to be non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: impl Into<String>) -> StorageResult<Self> {
        let raw = raw.into().trim().to_string();
        ensure!(
            !raw.is_empty(),
            InvalidUserIdSnafu {
                stage: "parse-user-id",
            }
        );
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_display_parses_back() {
        let id = MessageId::new_v7();
        let parsed: MessageId = id.to_string().parse().expect("valid uuid");
        assert_eq!(parsed, id);
    }

    #[test]
    fn message_id_rejects_garbage() {
        let error = MessageId::parse("temp-user-1700000000").expect_err("not a uuid");
        assert!(matches!(error, StorageError::InvalidId { .. }));
    }

    #[test]
    fn user_id_is_trimmed_and_must_not_be_blank() {
        assert_eq!(UserId::parse("  u1 ").expect("valid").as_str(), "u1");
        assert!(matches!(
            UserId::parse("   "),
            Err(StorageError::InvalidUserId { .. })
        ));
    }
}
