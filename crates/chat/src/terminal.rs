use std::collections::HashSet;

use murmur_storage::{MessageId, MessageRecord, Sender};

use crate::chat::{ConversationSnapshot, HistoryStatus, Notice};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    History,
    Send(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Empty,
        "/quit" | "/exit" => Command::Quit,
        "/history" => Command::History,
        text => Command::Send(text.to_string()),
    }
}

pub fn format_record(record: &MessageRecord) -> String {
    let speaker = match record.sender {
        Sender::User => "you",
        Sender::Ai => "ai",
    };
    format!("{speaker}> {}", record.text)
}

/// Turns successive snapshots into the lines a terminal has not printed yet.
///
/// Provisional entries are skipped; a message is printed once, when the store confirms it.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    printed: HashSet<MessageId>,
    composing: bool,
    notice: Option<Notice>,
    history: HistoryStatus,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets what was printed so the next render shows the whole conversation again.
    pub fn reprint(&mut self) {
        self.printed.clear();
        self.history = HistoryStatus::NotLoaded;
    }

    pub fn render(&mut self, snapshot: &ConversationSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.history != self.history {
            if snapshot.history == HistoryStatus::Loaded && snapshot.entries.is_empty() {
                lines.push("(no messages yet)".to_string());
            }
            self.history = snapshot.history;
        }

        for record in snapshot.entries.iter().filter_map(|entry| entry.confirmed()) {
            if self.printed.insert(record.id) {
                lines.push(format_record(record));
            }
        }

        let composing = snapshot.is_composing();
        if composing && !self.composing {
            lines.push("ai is typing...".to_string());
        }
        self.composing = composing;

        if snapshot.notice != self.notice {
            if let Some(notice) = &snapshot.notice {
                lines.push(format!("! {} ({})", notice.message(), notice.detail));
            }
            self.notice = snapshot.notice.clone();
        }

        lines
    }
}
