//! Configuration management
//!
//! Every setting resolves as environment variable > TOML file > default.
//! The resolved [`Config`] is built once at startup and handed down; nothing
//! reads the environment after that.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::WhisplayConfigFile;

/// Default renderer address
pub const DEFAULT_DISPLAY_ADDR: &str = "127.0.0.1:12345";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant on a small handheld \
    device. Answer in a few short, conversational sentences; your reply is read aloud and shown \
    on a tiny screen, so avoid lists, tables and markdown.";

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub display: DisplayConfig,
    pub input: InputSource,
    pub voice: VoiceConfig,
    pub llm: LlmConfig,
    pub translate: TranslateConfig,
    pub timing: TimingConfig,
    pub api_keys: ApiKeys,
    /// Recordings and generated images live below this directory
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub addr: String,
    pub enabled: bool,
}

/// Where button events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// The panel renderer's button
    Display,
    /// Developer console on stdin
    Keyboard,
}

impl FromStr for InputSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "display" | "button" => Ok(Self::Display),
            "keyboard" | "console" => Ok(Self::Keyboard),
            other => Err(Error::Config(format!("unknown input source: {other}"))),
        }
    }
}

/// STT backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttBackend {
    Whisper,
    Deepgram,
    /// Local program printing the transcript
    Command,
}

impl FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            "command" | "local" => Ok(Self::Command),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// TTS backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsBackend {
    OpenAi,
    ElevenLabs,
    /// Local program writing a WAV file
    Command,
}

impl FromStr for TtsBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            "command" | "local" => Ok(Self::Command),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttBackend,
    pub stt_model: String,
    pub stt_command: Option<String>,
    pub tts_provider: TtsBackend,
    pub tts_command: Option<String>,
    /// Empty for a local command means the program's own default
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_language: Option<String>,
    /// Speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
    pub max_record: Duration,
}

/// Chat model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub max_tool_rounds: usize,
    pub max_history_messages: usize,
    pub image_model: String,
    pub enable_images: bool,
}

/// Language pair used in Translate mode
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub first_language: String,
    pub second_language: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub confirmation: Duration,
    pub playback_retry: Duration,
}

/// API keys
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    /// Chat endpoint key; falls back to the `OpenAI` key
    pub llm: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the TOML file.
    ///
    /// `path` overrides the default file location; an explicit path that
    /// does not exist is an error.
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid or an explicit file is missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) if !path.exists() => {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => file::load_config_file(path),
            None => file::config_file_path()
                .map(|p| file::load_config_file(&p))
                .unwrap_or_default(),
        };

        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve a config from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn from_sources(fc: WhisplayConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let secret = |value: Option<String>| value.map(SecretString::from);

        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai.clone())),
            llm: secret(
                env("LLM_API_KEY")
                    .or(fc.api_keys.llm)
                    .or_else(|| env("OPENAI_API_KEY"))
                    .or(fc.api_keys.openai),
            ),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
        };

        let display = DisplayConfig {
            addr: env("WHISPLAY_DISPLAY_ADDR")
                .or(fc.display.addr)
                .unwrap_or_else(|| DEFAULT_DISPLAY_ADDR.to_string()),
            enabled: fc.display.enabled.unwrap_or(true),
        };

        let input = fc
            .input
            .source
            .as_deref()
            .map_or(Ok(InputSource::Display), str::parse)?;

        let stt_provider = fc
            .voice
            .stt_provider
            .as_deref()
            .map_or(Ok(SttBackend::Whisper), str::parse)?;
        let tts_provider = fc
            .voice
            .tts_provider
            .as_deref()
            .map_or(Ok(TtsBackend::OpenAi), str::parse)?;

        let tts_speed = fc.voice.tts_speed.unwrap_or(1.0);
        if !(0.25..=4.0).contains(&tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0, got {tts_speed}"
            )));
        }

        if stt_provider == SttBackend::Command && fc.voice.stt_command.is_none() {
            return Err(Error::Config(
                "stt_provider = \"command\" needs stt_command".to_string(),
            ));
        }
        if tts_provider == TtsBackend::Command && fc.voice.tts_command.is_none() {
            return Err(Error::Config(
                "tts_provider = \"command\" needs tts_command".to_string(),
            ));
        }

        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("WHISPLAY_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| match stt_provider {
                    SttBackend::Deepgram => "nova-2".to_string(),
                    SttBackend::Whisper | SttBackend::Command => "whisper-1".to_string(),
                }),
            stt_command: fc.voice.stt_command,
            tts_provider,
            tts_command: fc.voice.tts_command,
            tts_model: env("WHISPLAY_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| match tts_provider {
                    TtsBackend::OpenAi => "tts-1".to_string(),
                    TtsBackend::ElevenLabs => "eleven_multilingual_v2".to_string(),
                    TtsBackend::Command => String::new(),
                }),
            tts_voice: fc.voice.tts_voice.unwrap_or_else(|| match tts_provider {
                TtsBackend::OpenAi => "alloy".to_string(),
                TtsBackend::ElevenLabs => "21m00Tcm4TlvDq8ikWAM".to_string(),
                TtsBackend::Command => String::new(),
            }),
            tts_language: fc.voice.tts_language,
            tts_speed,
            max_record: Duration::from_secs(fc.voice.max_record_secs.unwrap_or(60).max(1)),
        };

        let llm = LlmConfig {
            base_url: env("WHISPLAY_LLM_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env("WHISPLAY_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: fc
                .llm
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: fc.llm.max_tokens.unwrap_or(1024),
            max_tool_rounds: fc.llm.max_tool_rounds.unwrap_or(3).max(1),
            max_history_messages: fc.llm.max_history_messages.unwrap_or(20),
            image_model: fc
                .llm
                .image_model
                .unwrap_or_else(|| "gpt-image-1".to_string()),
            enable_images: fc.llm.enable_images.unwrap_or(false),
        };

        let translate = TranslateConfig {
            first_language: fc
                .translate
                .first_language
                .unwrap_or_else(|| "English".to_string()),
            second_language: fc
                .translate
                .second_language
                .unwrap_or_else(|| "Chinese".to_string()),
        };

        let timing = TimingConfig {
            confirmation: Duration::from_millis(fc.timing.confirmation_ms.unwrap_or(1500)),
            playback_retry: Duration::from_millis(fc.timing.playback_retry_ms.unwrap_or(200).max(1)),
        };

        // ~/.local/share/whisplay on Linux
        let data_dir = fc.data_dir.map_or_else(
            || {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from(".whisplay"), |d| d.data_dir().join("whisplay"))
            },
            PathBuf::from,
        );

        Ok(Self {
            display,
            input,
            voice,
            llm,
            translate,
            timing,
            api_keys,
            data_dir,
        })
    }

    /// Directory for microphone recordings
    #[must_use]
    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// Scratch directory for locally synthesized speech
    #[must_use]
    pub fn speech_dir(&self) -> PathBuf {
        self.data_dir.join("speech")
    }

    /// Directory for generated images
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn resolve(toml: &str, env: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(file::parse_config_file(toml)?, move |k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve("", &[]).unwrap();
        assert_eq!(config.display.addr, DEFAULT_DISPLAY_ADDR);
        assert_eq!(config.input, InputSource::Display);
        assert_eq!(config.voice.stt_provider, SttBackend::Whisper);
        assert_eq!(config.voice.tts_voice, "alloy");
        assert_eq!(config.llm.max_tool_rounds, 3);
        assert_eq!(config.timing.confirmation, Duration::from_millis(1500));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_env_beats_file() {
        let config = resolve(
            "[llm]\nmodel = \"from-file\"\n",
            &[("WHISPLAY_LLM_MODEL", "from-env")],
        )
        .unwrap();
        assert_eq!(config.llm.model, "from-env");
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let config = resolve("[llm]\nmodel = \"from-file\"\n", &[("WHISPLAY_LLM_MODEL", " ")]).unwrap();
        assert_eq!(config.llm.model, "from-file");
    }

    #[test]
    fn test_llm_key_falls_back_to_openai_key() {
        let config = resolve("", &[("OPENAI_API_KEY", "sk-test")]).unwrap();
        let llm = config.api_keys.llm.unwrap();
        assert_eq!(llm.expose_secret(), "sk-test");
    }

    #[test]
    fn test_provider_specific_defaults() {
        let config = resolve(
            "[voice]\nstt_provider = \"deepgram\"\ntts_provider = \"ElevenLabs\"\n",
            &[],
        )
        .unwrap();
        assert_eq!(config.voice.stt_model, "nova-2");
        assert_eq!(config.voice.tts_provider, TtsBackend::ElevenLabs);
        assert_eq!(config.voice.tts_model, "eleven_multilingual_v2");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(resolve("[voice]\ntts_speed = 9.0\n", &[]).is_err());
        assert!(resolve("[voice]\nstt_provider = \"carrier-pigeon\"\n", &[]).is_err());
        assert!(resolve("[voice]\nstt_provider = \"command\"\n", &[]).is_err());
        assert!(resolve("[voice]\ntts_provider = \"command\"\n", &[]).is_err());
        assert!(resolve("[input]\nsource = \"joystick\"\n", &[]).is_err());
    }

    #[test]
    fn test_local_tts_command() {
        let config = resolve(
            "[voice]\ntts_provider = \"local\"\ntts_command = \"python3 coqui_tts.py\"\ntts_language = \"fr\"\n",
            &[],
        )
        .unwrap();
        assert_eq!(config.voice.tts_provider, TtsBackend::Command);
        assert_eq!(config.voice.tts_command.as_deref(), Some("python3 coqui_tts.py"));
        assert_eq!(config.voice.tts_language.as_deref(), Some("fr"));
        assert!(config.voice.tts_model.is_empty());
        assert!(config.voice.tts_voice.is_empty());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/whisplay.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
