//! Builds the concrete collaborators selected by configuration

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::{Config, SttBackend, TtsBackend};
use crate::display::Display;
use crate::llm::{ArtifactSlot, ImageGenerator, LanguageModel, OpenAiCompatible, ToolBox};
use crate::turn::Services;
use crate::voice::{
    CommandRecognizer, CommandSynthesizer, CpalPlayback, CpalRecorder, Recognizer, SpeechToText,
    Synthesizer, TextToSpeech,
};
use crate::{Error, Result};

fn key_or_empty(key: Option<&SecretString>) -> SecretString {
    key.cloned().unwrap_or_else(|| SecretString::from(String::new()))
}

/// Speech recognizer for the configured backend
///
/// # Errors
///
/// Returns error if the backend's API key or command is missing
pub fn build_recognizer(config: &Config) -> Result<Arc<dyn Recognizer>> {
    let voice = &config.voice;
    Ok(match voice.stt_provider {
        SttBackend::Whisper => Arc::new(SpeechToText::new_whisper(
            key_or_empty(config.api_keys.openai.as_ref()),
            voice.stt_model.clone(),
        )?),
        SttBackend::Deepgram => Arc::new(SpeechToText::new_deepgram(
            key_or_empty(config.api_keys.deepgram.as_ref()),
            voice.stt_model.clone(),
        )?),
        SttBackend::Command => {
            let command = voice
                .stt_command
                .as_deref()
                .ok_or_else(|| Error::Config("stt_command is not set".to_string()))?;
            Arc::new(CommandRecognizer::new(command)?)
        }
    })
}

/// Speech synthesizer for the configured backend
///
/// # Errors
///
/// Returns error if the backend's API key or command is missing
pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn Synthesizer>> {
    let voice = &config.voice;
    Ok(match voice.tts_provider {
        TtsBackend::OpenAi => Arc::new(TextToSpeech::new_openai(
            key_or_empty(config.api_keys.openai.as_ref()),
            voice.tts_voice.clone(),
            voice.tts_speed,
            voice.tts_model.clone(),
        )?),
        TtsBackend::ElevenLabs => Arc::new(TextToSpeech::new_elevenlabs(
            key_or_empty(config.api_keys.elevenlabs.as_ref()),
            voice.tts_voice.clone(),
            voice.tts_model.clone(),
        )?),
        TtsBackend::Command => {
            let command = voice
                .tts_command
                .as_deref()
                .ok_or_else(|| Error::Config("tts_command is not set".to_string()))?;
            Arc::new(
                CommandSynthesizer::new(command, config.speech_dir())?
                    .with_model(&voice.tts_model)
                    .with_speaker(&voice.tts_voice)
                    .with_language(voice.tts_language.as_deref()),
            )
        }
    })
}

/// Streaming chat model, with the image tool when enabled
#[must_use]
pub fn build_model(config: &Config, artifacts: &ArtifactSlot) -> Arc<dyn LanguageModel> {
    let llm = &config.llm;
    let api_key = key_or_empty(config.api_keys.llm.as_ref());

    let tools = if llm.enable_images {
        let images = ImageGenerator::new(
            &llm.base_url,
            key_or_empty(config.api_keys.openai.as_ref().or(config.api_keys.llm.as_ref())),
            llm.image_model.clone(),
            config.images_dir(),
        );
        ToolBox::with_images(images, artifacts.clone())
    } else {
        ToolBox::empty(artifacts.clone())
    };

    Arc::new(OpenAiCompatible::new(
        &llm.base_url,
        api_key,
        llm.model.clone(),
        llm.max_tokens,
        llm.max_tool_rounds,
        tools,
    ))
}

/// Chat model for translations; never offered tools
#[must_use]
pub fn build_translator(config: &Config) -> Arc<dyn LanguageModel> {
    let llm = &config.llm;
    Arc::new(OpenAiCompatible::new(
        &llm.base_url,
        key_or_empty(config.api_keys.llm.as_ref()),
        llm.model.clone(),
        llm.max_tokens,
        1,
        ToolBox::empty(ArtifactSlot::new()),
    ))
}

/// Assemble every collaborator the turn controller needs
///
/// # Errors
///
/// Returns error if a selected backend is misconfigured
pub fn build_services(config: &Config, display: Arc<dyn Display>) -> Result<Services> {
    let artifacts = ArtifactSlot::new();

    Ok(Services {
        recorder: Arc::new(CpalRecorder::new()),
        recognizer: build_recognizer(config)?,
        model: build_model(config, &artifacts),
        translator: build_translator(config),
        synthesizer: build_synthesizer(config)?,
        sink: Arc::new(CpalPlayback::new()),
        display,
        artifacts,
    })
}
