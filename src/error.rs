//! Error types for the Whisplay chatbot

use thiserror::Error;

/// Result type alias for Whisplay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Whisplay chatbot
///
/// Collaborators used by the turn controller never hand these to the state
/// machine; they log and return a sentinel value instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Phase name that does not exist
    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    /// Display connection error
    #[error("display error: {0}")]
    Display(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
