//! Shared test utilities
//!
//! Scripted collaborators for driving the turn controller without audio
//! hardware or network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};
use whisplay_chatbot::display::{Display, DisplayUpdate};
use whisplay_chatbot::llm::{ArtifactSlot, ChatMessage, LanguageModel, StreamSink};
use whisplay_chatbot::turn::{Services, TurnSnapshot};
use whisplay_chatbot::voice::{
    AudioSink, Recognizer, Recorder, Recording, SpeechAudio, Synthesizer,
};
use whisplay_chatbot::{Error, Event, Phase, TurnController, TurnSettings};

/// Returns queued transcripts in order, then empty text
#[derive(Default)]
pub struct ScriptedRecognizer {
    transcripts: Mutex<VecDeque<String>>,
    /// Holds the first recognition until notified
    gate: Mutex<Option<Arc<Notify>>>,
    pub calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(transcripts: &[&str]) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }

    pub fn gated(transcripts: &[&str], gate: Arc<Notify>) -> Self {
        Self {
            gate: Mutex::new(Some(gate)),
            ..Self::new(transcripts)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _audio_path: &Path) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.transcripts.lock().unwrap().pop_front().unwrap_or_default();
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        text
    }
}

/// One scripted model reply
#[derive(Default, Clone)]
pub struct Reply {
    /// Emitted immediately
    pub parts: Vec<String>,
    /// When set, the reply pauses here until notified
    pub gate: Option<Arc<Notify>>,
    /// Emitted after the gate opens
    pub after_gate: Vec<String>,
    /// Image recorded for the generation, as a tool call would
    pub image: Option<PathBuf>,
    /// Fail once everything above has been emitted
    pub fail: bool,
}

impl Reply {
    pub fn text(parts: &[&str]) -> Self {
        Self {
            parts: parts.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn gated(parts: &[&str], gate: Arc<Notify>, after: &[&str]) -> Self {
        Self {
            parts: parts.iter().map(ToString::to_string).collect(),
            gate: Some(gate),
            after_gate: after.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Emit `parts`, then fail
    pub fn failing(parts: &[&str]) -> Self {
        Self {
            fail: true,
            ..Self::text(parts)
        }
    }

    pub fn with_image(mut self, path: PathBuf) -> Self {
        self.image = Some(path);
        self
    }
}

/// Plays back scripted replies and remembers every request
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    artifacts: ArtifactSlot,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>, artifacts: ArtifactSlot) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            artifacts,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, messages: &[ChatMessage], sink: &StreamSink) -> whisplay_chatbot::Result<()> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();

        for part in &reply.parts {
            sink.partial(part);
        }
        if let Some(gate) = &reply.gate {
            gate.notified().await;
        }
        for part in &reply.after_gate {
            sink.partial(part);
        }
        if let Some(path) = reply.image {
            self.artifacts.record(sink.generation(), path);
        }
        if reply.fail {
            return Err(Error::Llm("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Records the text of every synthesis request
#[derive(Default)]
pub struct RecordingSynthesizer {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingSynthesizer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> SpeechAudio {
        self.calls.lock().unwrap().push(text.to_string());
        SpeechAudio {
            bytes: text.as_bytes().to_vec(),
            duration_ms: 1,
        }
    }
}

/// Records played audio and stop requests
#[derive(Default)]
pub struct RecordingSink {
    pub played: Mutex<Vec<Vec<u8>>>,
    pub stops: AtomicUsize,
}

impl RecordingSink {
    pub fn played_text(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: &SpeechAudio) {
        self.played.lock().unwrap().push(audio.bytes.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Finishes a recording as soon as it is asked to stop
#[derive(Default)]
pub struct MockRecorder {
    pub started: AtomicUsize,
}

impl Recorder for MockRecorder {
    fn start(&self, path: &Path, _max_duration: Duration) -> whisplay_chatbot::Result<Recording> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        std::thread::spawn(move || {
            let _ = stop_rx.recv();
            let _ = done_tx.send(Ok(()));
        });

        Ok(Recording::new(path.to_path_buf(), stop_tx, done_rx))
    }
}

/// Keeps every panel update
#[derive(Default)]
pub struct RecordingDisplay {
    pub updates: Mutex<Vec<DisplayUpdate>>,
}

impl RecordingDisplay {
    pub fn updates(&self) -> Vec<DisplayUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Status lines shown so far, in order
    pub fn statuses(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|update| update.status)
            .collect()
    }
}

impl Display for RecordingDisplay {
    fn show(&self, update: DisplayUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// A controller wired to scripted collaborators
pub struct Harness {
    pub controller: TurnController,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub model: Arc<ScriptedModel>,
    pub translator: Arc<ScriptedModel>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub sink: Arc<RecordingSink>,
    pub recorder: Arc<MockRecorder>,
    pub display: Arc<RecordingDisplay>,
    pub artifacts: ArtifactSlot,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(transcripts: &[&str], replies: Vec<Reply>) -> Self {
        Self::build(ScriptedRecognizer::new(transcripts), replies, Vec::new())
    }

    /// Answers come from `replies`, translations from `translations`
    pub fn with_translations(transcripts: &[&str], replies: Vec<Reply>, translations: Vec<Reply>) -> Self {
        Self::build(ScriptedRecognizer::new(transcripts), replies, translations)
    }

    pub fn build(recognizer: ScriptedRecognizer, replies: Vec<Reply>, translations: Vec<Reply>) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let artifacts = ArtifactSlot::new();

        let recognizer = Arc::new(recognizer);
        let model = Arc::new(ScriptedModel::new(replies, artifacts.clone()));
        let translator = Arc::new(ScriptedModel::new(translations, artifacts.clone()));
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let sink = Arc::new(RecordingSink::default());
        let recorder = Arc::new(MockRecorder::default());
        let display = Arc::new(RecordingDisplay::default());

        let services = Services {
            recorder: recorder.clone(),
            recognizer: recognizer.clone(),
            model: model.clone(),
            translator: translator.clone(),
            synthesizer: synthesizer.clone(),
            sink: sink.clone(),
            display: display.clone(),
            artifacts: artifacts.clone(),
        };

        let settings = TurnSettings {
            recordings_dir: dir.path().join("recordings"),
            max_record: Duration::from_secs(60),
            confirmation_delay: Duration::from_millis(10),
            playback_retry: Duration::from_millis(5),
            system_prompt: "You are a helpful voice assistant.".to_string(),
            first_language: "English".to_string(),
            second_language: "Chinese".to_string(),
            max_history_messages: 20,
        };

        Self {
            controller: TurnController::new(settings, services),
            recognizer,
            model,
            translator,
            synthesizer,
            sink,
            recorder,
            display,
            artifacts,
            dir,
        }
    }

    /// Spawn the controller task, keeping handles to drive and observe it
    pub fn start(self) -> Running {
        let events = self.controller.sender();
        let snapshots = self.controller.subscribe();
        let task = tokio::spawn(self.controller.run());

        Running {
            events,
            snapshots,
            task,
            recognizer: self.recognizer,
            model: self.model,
            translator: self.translator,
            synthesizer: self.synthesizer,
            sink: self.sink,
            recorder: self.recorder,
            display: self.display,
            artifacts: self.artifacts,
            _dir: self.dir,
        }
    }
}

/// A controller running in its own task
pub struct Running {
    pub events: mpsc::UnboundedSender<Event>,
    pub snapshots: watch::Receiver<TurnSnapshot>,
    pub task: tokio::task::JoinHandle<()>,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub model: Arc<ScriptedModel>,
    pub translator: Arc<ScriptedModel>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub sink: Arc<RecordingSink>,
    pub recorder: Arc<MockRecorder>,
    pub display: Arc<RecordingDisplay>,
    pub artifacts: ArtifactSlot,
    _dir: tempfile::TempDir,
}

impl Running {
    pub fn send(&self, event: Event) {
        self.events.send(event).expect("controller stopped");
    }

    pub fn press(&self) {
        self.send(Event::Button(whisplay_chatbot::input::ButtonEvent::Pressed));
    }

    pub fn release(&self) {
        self.send(Event::Button(whisplay_chatbot::input::ButtonEvent::Released));
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_until(&mut self, predicate: impl FnMut(&TurnSnapshot) -> bool) -> TurnSnapshot {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), self.snapshots.wait_for(predicate))
            .await
            .expect("timed out waiting for controller state")
            .expect("controller stopped");
        *snapshot
    }

    /// Press, wait for Listening, then release
    pub async fn talk(&mut self) {
        self.press();
        self.wait_until(|s| s.phase == Phase::Listening).await;
        self.release();
    }

    pub async fn shutdown(self) {
        self.send(Event::Shutdown);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("controller did not stop")
            .expect("controller task panicked");
    }
}
