//! Pure view transitions used by the conversation controller.
//!
//! Every function takes the current view by reference and returns the next one, so a
//! snapshot that readers already hold is never edited underneath them.

use murmur_storage::MessageRecord;

use super::message::{LocalId, ViewEntry};

/// Appends an optimistic entry at the tail of the view.
pub fn push_provisional(view: &[ViewEntry], entry: ViewEntry) -> Vec<ViewEntry> {
    let mut next = view.to_vec();
    next.push(entry);
    next
}

/// Replaces the provisional entry `local_id` with the confirmed record at the same position.
///
/// The confirmed id ends up in the view exactly once: when it is already present the
/// provisional entry is dropped instead, and when the provisional entry is gone the record is
/// appended.
pub fn reconcile(
    view: &[ViewEntry],
    confirmed: MessageRecord,
    local_id: LocalId,
) -> Vec<ViewEntry> {
    let already_confirmed = contains_message(view, &confirmed);
    let mut next = Vec::with_capacity(view.len() + 1);
    let mut replaced = already_confirmed;
    let mut pending = Some(confirmed);

    for entry in view {
        if entry.local_id() == Some(local_id) {
            if !already_confirmed && let Some(record) = pending.take() {
                next.push(ViewEntry::Confirmed(record));
                replaced = true;
            }
            continue;
        }
        next.push(entry.clone());
    }

    if !replaced && let Some(record) = pending {
        next.push(ViewEntry::Confirmed(record));
    }
    next
}

/// Removes the provisional entry `local_id`. Confirmed entries are never removed.
pub fn rollback(view: &[ViewEntry], local_id: LocalId) -> Vec<ViewEntry> {
    view.iter()
        .filter(|entry| entry.local_id() != Some(local_id))
        .cloned()
        .collect()
}

/// Appends a confirmed record unless the view already holds it.
pub fn append_confirmed(view: &[ViewEntry], confirmed: MessageRecord) -> Vec<ViewEntry> {
    if contains_message(view, &confirmed) {
        return view.to_vec();
    }
    let mut next = view.to_vec();
    next.push(ViewEntry::Confirmed(confirmed));
    next
}

/// Confirmed records of the view in display order.
pub fn confirmed_history(view: &[ViewEntry]) -> Vec<MessageRecord> {
    view.iter().filter_map(ViewEntry::confirmed).cloned().collect()
}

fn contains_message(view: &[ViewEntry], record: &MessageRecord) -> bool {
    view.iter()
        .any(|entry| entry.message_id() == Some(record.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::ProvisionalMessage;
    use murmur_storage::{MessageId, Sender, UserId};

    fn record(seq: u64, sender: Sender, text: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            user_id: UserId::parse("u1").expect("user id"),
            seq,
            sender,
            text: text.to_string(),
            created_at_unix_millis: 1_700_000_000_000 + seq,
        }
    }

    fn provisional(raw: u64, text: &str) -> ViewEntry {
        ViewEntry::Provisional(ProvisionalMessage::user(LocalId::new(raw), text, 0))
    }

    #[test]
    fn reconcile_swaps_identity_in_place() {
        let earlier = record(1, Sender::Ai, "welcome");
        let view = vec![
            ViewEntry::Confirmed(earlier.clone()),
            provisional(1, "hi"),
            provisional(2, "queued elsewhere"),
        ];
        let confirmed = record(2, Sender::User, "hi");

        let next = reconcile(&view, confirmed.clone(), LocalId::new(1));

        assert_eq!(
            next,
            vec![
                ViewEntry::Confirmed(earlier),
                ViewEntry::Confirmed(confirmed),
                provisional(2, "queued elsewhere"),
            ]
        );
        assert_eq!(view.len(), 3, "input view is untouched");
    }

    #[test]
    fn reconcile_never_duplicates_a_confirmed_id() {
        let confirmed = record(1, Sender::User, "hi");
        let view = vec![ViewEntry::Confirmed(confirmed.clone()), provisional(1, "hi")];

        let next = reconcile(&view, confirmed.clone(), LocalId::new(1));

        assert_eq!(next, vec![ViewEntry::Confirmed(confirmed)]);
    }

    #[test]
    fn reconcile_appends_when_provisional_entry_is_gone() {
        let confirmed = record(1, Sender::User, "hi");
        let next = reconcile(&[], confirmed.clone(), LocalId::new(9));
        assert_eq!(next, vec![ViewEntry::Confirmed(confirmed)]);
    }

    #[test]
    fn rollback_only_removes_the_matching_provisional_entry() {
        let kept = record(1, Sender::User, "kept");
        let view = vec![
            ViewEntry::Confirmed(kept.clone()),
            provisional(1, "lost"),
            provisional(2, "other"),
        ];

        let next = rollback(&view, LocalId::new(1));

        assert_eq!(next, vec![ViewEntry::Confirmed(kept), provisional(2, "other")]);
        assert_eq!(rollback(&next, LocalId::new(1)), next);
    }

    #[test]
    fn append_confirmed_is_idempotent() {
        let reply = record(2, Sender::Ai, "hello there");
        let once = append_confirmed(&[], reply.clone());
        let twice = append_confirmed(&once, reply);
        assert_eq!(once, twice);
        assert_eq!(confirmed_history(&twice).len(), 1);
    }

    #[test]
    fn confirmed_history_skips_provisional_entries() {
        let first = record(1, Sender::User, "one");
        let view = push_provisional(&[ViewEntry::Confirmed(first.clone())], provisional(1, "two"));
        assert_eq!(confirmed_history(&view), vec![first]);
    }
}
