//! Conversational turn state machine
//!
//! One [`TurnController`] task owns the [`Turn`] and reacts to [`Event`]s:
//! button transitions from the input source and tagged results reported by
//! the collaborator tasks it spawns.

mod command;
mod controller;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use command::{VoiceCommand, parse_command};
pub use controller::TurnController;

use crate::config::Config;
use crate::display::Display;
use crate::input::ButtonEvent;
use crate::llm::{ArtifactSlot, LanguageModel, StreamEvent};
use crate::voice::{AudioSink, Recognizer, Recorder, Synthesizer};
use crate::Error;

/// Where the current turn stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    Recognizing,
    Answering,
    Translating,
    ImageShowing,
}

impl Phase {
    /// Phases that run a response stream
    #[must_use]
    pub const fn is_responding(self) -> bool {
        matches!(self, Self::Answering | Self::Translating)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Recognizing => "recognizing",
            Self::Answering => "answering",
            Self::Translating => "translating",
            Self::ImageShowing => "image_showing",
        };
        f.write_str(name)
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "idle" => Ok(Self::Idle),
            "listening" => Ok(Self::Listening),
            "recognizing" => Ok(Self::Recognizing),
            "answering" => Ok(Self::Answering),
            "translating" => Ok(Self::Translating),
            "imageshowing" => Ok(Self::ImageShowing),
            _ => Err(Error::UnknownPhase(s.trim().to_string())),
        }
    }
}

/// Persistent conversation mode, changed only by voice command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Translate,
}

/// One voice interaction cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    pub phase: Phase,
    pub mode: Mode,
    /// Capture target, set on entering Listening
    pub recording_path: Option<PathBuf>,
    /// ASR output, consumed by Answering/Translating
    pub recognized_text: Option<String>,
    /// Image produced during the answer, shown in `ImageShowing`
    pub image_path: Option<PathBuf>,
}

impl Turn {
    /// Back to the Idle baseline; the mode survives
    pub fn reset(&mut self) {
        *self = Self {
            mode: self.mode,
            ..Self::default()
        };
    }
}

/// Externally visible controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSnapshot {
    pub phase: Phase,
    pub mode: Mode,
    /// Latest generation issued
    pub generation: u64,
}

/// Everything the controller reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Push-to-talk button
    Button(ButtonEvent),
    /// The recording file is complete (`ok = false` if capture failed)
    CaptureFinished { ticket: u64, ok: bool },
    /// ASR result for the recording made under `ticket`
    Recognized { ticket: u64, text: String },
    /// Output of the response stream issued under `generation` in `phase`
    Stream {
        generation: u64,
        phase: Phase,
        event: StreamEvent,
    },
    /// Joined response text once the stream for `generation` ended
    ResponseText { generation: u64, text: String },
    /// Playback for `generation` drained
    PlaybackEnded { generation: u64 },
    /// Mode-change confirmation has been shown long enough
    ConfirmationElapsed { ticket: u64 },
    /// Jump to a phase by name (developer console)
    ForcePhase(String),
    Shutdown,
}

/// Turn-level settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub recordings_dir: PathBuf,
    pub max_record: Duration,
    pub confirmation_delay: Duration,
    pub playback_retry: Duration,
    pub system_prompt: String,
    pub first_language: String,
    pub second_language: String,
    pub max_history_messages: usize,
}

impl TurnSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            recordings_dir: config.recordings_dir(),
            max_record: config.voice.max_record,
            confirmation_delay: config.timing.confirmation,
            playback_retry: config.timing.playback_retry,
            system_prompt: config.llm.system_prompt.clone(),
            first_language: config.translate.first_language.clone(),
            second_language: config.translate.second_language.clone(),
            max_history_messages: config.llm.max_history_messages,
        }
    }
}

/// The collaborators a controller drives
#[derive(Clone)]
pub struct Services {
    pub recorder: Arc<dyn Recorder>,
    pub recognizer: Arc<dyn Recognizer>,
    /// Answers questions, with tools
    pub model: Arc<dyn LanguageModel>,
    /// Translates in translate mode, without tools
    pub translator: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub sink: Arc<dyn AudioSink>,
    pub display: Arc<dyn Display>,
    /// Images generated by model tools, claimed per generation
    pub artifacts: ArtifactSlot,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names_round_trip() {
        for phase in [
            Phase::Idle,
            Phase::Listening,
            Phase::Recognizing,
            Phase::Answering,
            Phase::Translating,
            Phase::ImageShowing,
        ] {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("ImageShowing".parse::<Phase>().unwrap(), Phase::ImageShowing);
    }

    #[test]
    fn test_unknown_phase_name() {
        let err = "Dancing".parse::<Phase>().unwrap_err();
        assert!(matches!(err, Error::UnknownPhase(name) if name == "Dancing"));
    }

    #[test]
    fn test_reset_keeps_mode() {
        let mut turn = Turn {
            phase: Phase::Answering,
            mode: Mode::Translate,
            recording_path: Some(PathBuf::from("a.wav")),
            recognized_text: Some("hola".into()),
            image_path: None,
        };
        turn.reset();
        assert_eq!(turn.phase, Phase::Idle);
        assert_eq!(turn.mode, Mode::Translate);
        assert!(turn.recording_path.is_none());
    }
}
