#![deny(unsafe_code)]

/// Conversation state, turn orchestration and the read-only view.
pub mod chat;
/// Assistant reply generation on top of a completion provider.
pub mod responder;
pub mod session;
/// Layered settings and their persistence.
pub mod settings;
/// Line-oriented rendering for the terminal front end.
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;
