//! Speech-to-text (STT) processing

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::Recognizer;
use crate::{Error, Result};

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech through a cloud API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Transcribe WAV bytes to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&smart_format=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Recognizer for SpeechToText {
    async fn recognize(&self, audio_path: &Path) -> String {
        let audio = match tokio::fs::read(audio_path).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, path = %audio_path.display(), "cannot read recording");
                return String::new();
            }
        };

        match self.transcribe(&audio).await {
            Ok(text) => {
                let text = text.trim().to_string();
                tracing::info!(transcript = %text, "transcription complete");
                text
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                String::new()
            }
        }
    }
}

/// Runs a local ASR program that prints the transcript on stdout
///
/// The recording path is appended as the last argument, so
/// `python3 asr.py --model tiny` runs `python3 asr.py --model tiny <file>`.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

impl CommandRecognizer {
    /// Parse a whitespace-separated command line
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("ASR command is empty".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self, audio_path: &Path) -> String {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(audio_path)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                tracing::info!(transcript = %text, "transcription complete");
                text
            }
            Ok(output) => {
                tracing::warn!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "ASR command failed"
                );
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, program = %self.program, "cannot run ASR command");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_requires_key() {
        let result = SpeechToText::new_whisper(SecretString::from(String::new()), "whisper-1".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_command_line_parsing() {
        let asr = CommandRecognizer::new("python3  asr.py --model tiny").unwrap();
        assert_eq!(asr.program, "python3");
        assert_eq!(asr.args, vec!["asr.py", "--model", "tiny"]);

        assert!(CommandRecognizer::new("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_is_trimmed_transcript() {
        let asr = CommandRecognizer::new("echo").unwrap();
        let text = asr.recognize(Path::new("hello.wav")).await;
        assert_eq!(text, "hello.wav");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_yields_empty_text() {
        let asr = CommandRecognizer::new("whisplay-no-such-asr-binary").unwrap();
        assert_eq!(asr.recognize(Path::new("x.wav")).await, "");
    }
}
