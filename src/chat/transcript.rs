use crate::chat::types::{Message, Turn};

/// Flatten the visible history into the message list sent for completion.
///
/// The system prompt always comes first and the current message last. A
/// history side that is absent or empty contributes nothing.
pub fn build_messages(
    system_message: &str,
    history: &[Turn],
    current_message: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(Message::system(system_message));

    for turn in history {
        if let Some(user) = turn.user().filter(|s| !s.is_empty()) {
            messages.push(Message::user(user));
        }
        if let Some(assistant) = turn.assistant().filter(|s| !s.is_empty()) {
            messages.push(Message::assistant(assistant));
        }
    }

    messages.push(Message::user(current_message));
    messages
}
