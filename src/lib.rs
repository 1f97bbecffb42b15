//! Whisplay Chatbot - push-to-talk voice assistant
//!
//! This library provides the pieces of a single-button voice assistant:
//! - Capture, speech recognition and synthesis, playback
//! - Streaming chat completions with an optional image tool
//! - Sentence segmentation and ordered playback of response audio
//! - The turn state machine tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Display renderer (button + screen)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ JSON lines
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Controller                      │
//! │   Listening │ Recognizing │ Answering │ Translating  │
//! └───────┬──────────────┬───────────────────┬──────────┘
//!         │              │                   │
//!    Capture + STT   Chat model stream   Response orchestrator
//!                                         (segment, TTS, playback)
//! ```

pub mod config;
pub mod display;
pub mod error;
pub mod input;
pub mod llm;
pub mod response;
pub mod services;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use response::ResponseOrchestrator;
pub use turn::{Event, Mode, Phase, TurnController, TurnSettings};
