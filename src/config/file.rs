//! TOML configuration file loading
//!
//! Supports `~/.config/whisplay/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhisplayConfigFile {
    #[serde(default)]
    pub display: DisplayFileConfig,

    #[serde(default)]
    pub input: InputFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub translate: TranslateFileConfig,

    #[serde(default)]
    pub timing: TimingFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Where recordings and generated images are kept
    pub data_dir: Option<String>,
}

/// Panel renderer connection
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayFileConfig {
    /// `host:port` of the renderer
    pub addr: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputFileConfig {
    /// `display` or `keyboard`
    pub source: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceFileConfig {
    /// `whisper`, `deepgram` or `command`
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Local ASR command line, used with `stt_provider = "command"`
    pub stt_command: Option<String>,

    /// `openai`, `elevenlabs` or `command`
    pub tts_provider: Option<String>,

    /// Local TTS command line, used with `tts_provider = "command"`.
    /// It is called with `-t TEXT -o OUTPUT.wav`.
    pub tts_command: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy"); the speaker for a local model
    pub tts_voice: Option<String>,

    /// Language code passed to a multilingual local model
    pub tts_language: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Hard cap on a single recording
    pub max_record_secs: Option<u64>,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmFileConfig {
    /// `OpenAI`-compatible API base (e.g. "http://localhost:11434/v1")
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub max_tool_rounds: Option<usize>,
    pub max_history_messages: Option<usize>,
    pub image_model: Option<String>,
    pub enable_images: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslateFileConfig {
    pub first_language: Option<String>,
    pub second_language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingFileConfig {
    /// How long a mode-change confirmation stays up
    pub confirmation_ms: Option<u64>,
    /// Playback pump re-check interval
    pub playback_retry_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    /// Key for the chat endpoint when it is not `OpenAI`
    pub llm: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown fields
pub fn parse_config_file(content: &str) -> Result<WhisplayConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file at `path`
///
/// Returns `WhisplayConfigFile::default()` if the file doesn't exist or can't
/// be parsed.
pub fn load_config_file(path: &Path) -> WhisplayConfigFile {
    if !path.exists() {
        return WhisplayConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WhisplayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WhisplayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/whisplay/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("whisplay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let fc = parse_config_file(
            r#"
            [llm]
            model = "llama3.2"

            [translate]
            second_language = "Japanese"
            "#,
        )
        .unwrap();

        assert_eq!(fc.llm.model.as_deref(), Some("llama3.2"));
        assert_eq!(fc.translate.second_language.as_deref(), Some("Japanese"));
        assert!(fc.voice.tts_voice.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(parse_config_file("[llm]\nmodle = \"x\"\n").is_err());
    }

    #[test]
    fn test_unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let fc = load_config_file(&path);
        assert!(fc.llm.model.is_none());
        assert!(load_config_file(&dir.path().join("missing.toml")).llm.model.is_none());
    }
}
