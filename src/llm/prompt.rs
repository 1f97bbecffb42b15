//! Request message builders

use super::{ChatHistory, ChatMessage};

/// Messages for a normal answer: system prompt, history, then the question
#[must_use]
pub fn answer_messages(system_prompt: &str, history: &ChatHistory, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    messages.extend(history.messages().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

/// Messages for a bidirectional translation between two languages
///
/// Stateless: translations never see or feed the chat history.
#[must_use]
pub fn translation_messages(first_language: &str, second_language: &str, text: &str) -> Vec<ChatMessage> {
    let instruction = format!(
        "You are a voice interpreter between {first_language} and {second_language}. \
         If the user speaks {first_language}, translate into {second_language}. \
         If the user speaks {second_language}, translate into {first_language}. \
         Reply with the translation only, as plain spoken text with no notes, \
         quotes or markdown."
    );

    vec![ChatMessage::system(instruction), ChatMessage::user(text)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_includes_history_in_order() {
        let mut history = ChatHistory::new(10);
        history.record_exchange("Hi", "Hello!");

        let messages = answer_messages("Be brief.", &history, "What time is it?");
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content.as_deref(), Some("What time is it?"));
    }

    #[test]
    fn test_blank_system_prompt_is_omitted() {
        let messages = answer_messages("  ", &ChatHistory::new(0), "Hello");
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_translation_names_both_directions() {
        let messages = translation_messages("English", "Spanish", "Good morning");
        let system = messages[0].content.as_deref().unwrap_or_default();
        assert!(system.contains("translate into Spanish"));
        assert!(system.contains("translate into English"));
        assert_eq!(messages[1].content.as_deref(), Some("Good morning"));
    }
}
