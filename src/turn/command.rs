//! Spoken mode-switch commands
//!
//! Only whole-utterance matches count. A phrase that merely contains a
//! command, or carries punctuation, is an ordinary question.

/// A recognized mode switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    EnterTranslate,
    ExitTranslate,
}

const ACTIVATION_PHRASES: &[&str] = &[
    "translate mode",
    "translation mode",
    "activate translate mode",
    "enable translate mode",
    "turn on translate mode",
];

const DEACTIVATION_PHRASES: &[&str] = &[
    "normal mode",
    "chat mode",
    "disable translate mode",
    "deactivate translate mode",
    "turn off translate mode",
];

/// Match a transcript against the command phrases (trimmed, case-insensitive)
#[must_use]
pub fn parse_command(text: &str) -> Option<VoiceCommand> {
    let normalized = text.trim().to_lowercase();
    if ACTIVATION_PHRASES.contains(&normalized.as_str()) {
        Some(VoiceCommand::EnterTranslate)
    } else if DEACTIVATION_PHRASES.contains(&normalized.as_str()) {
        Some(VoiceCommand::ExitTranslate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_phrase_matches() {
        for phrase in ACTIVATION_PHRASES {
            assert_eq!(parse_command(phrase), Some(VoiceCommand::EnterTranslate), "{phrase}");
        }
        for phrase in DEACTIVATION_PHRASES {
            assert_eq!(parse_command(phrase), Some(VoiceCommand::ExitTranslate), "{phrase}");
        }
    }

    #[test]
    fn test_case_and_surrounding_space_ignored() {
        assert_eq!(parse_command("  Translate MODE \n"), Some(VoiceCommand::EnterTranslate));
        assert_eq!(parse_command("Chat Mode"), Some(VoiceCommand::ExitTranslate));
    }

    #[test]
    fn test_inexact_phrases_rejected() {
        assert_eq!(parse_command("Translate Mode!"), None);
        assert_eq!(parse_command("please translate mode now please"), None);
        assert_eq!(parse_command("translate  mode"), None);
        assert_eq!(parse_command(""), None);
    }
}
