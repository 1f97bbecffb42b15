//! The turn controller task

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};

use super::{Event, Mode, Phase, Services, Turn, TurnSettings, TurnSnapshot, VoiceCommand, parse_command};
use crate::display::DisplayUpdate;
use crate::input::ButtonEvent;
use crate::llm::{
    ChatHistory, FALLBACK_UTTERANCE, StreamEvent, StreamSink, answer_messages, drive_stream,
    translation_messages,
};
use crate::response::{ResponseCallbacks, ResponseOrchestrator};
use crate::voice::Recording;

/// Drives one voice interaction at a time
///
/// All state changes happen inside [`TurnController::handle`], which never
/// awaits. Slow work runs in spawned tasks that report back through the
/// event channel, tagged with the ticket or generation they were issued
/// under so late results from an abandoned phase are ignored.
pub struct TurnController {
    turn: Turn,
    generation: u64,
    /// Generation whose stream is currently wanted; 0 when none
    live: Arc<AtomicU64>,
    /// Bumped on every phase entry
    ticket: u64,
    recording: Option<Recording>,
    thinking: String,
    /// The current generation's stream failed and was replaced
    failed: bool,
    history: ChatHistory,
    orchestrator: ResponseOrchestrator,
    services: Services,
    settings: TurnSettings,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshot: watch::Sender<TurnSnapshot>,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("turn", &self.turn)
            .field("generation", &self.generation)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl TurnController {
    /// Wire a controller to its collaborators
    #[must_use]
    pub fn new(settings: TurnSettings, services: Services) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::with_channel(settings, services, events_tx, events_rx)
    }

    /// Wire a controller to an event channel created by the caller, so
    /// sources such as the display client can hold a sender before the
    /// controller exists
    #[must_use]
    pub fn with_channel(
        settings: TurnSettings,
        services: Services,
        events_tx: mpsc::UnboundedSender<Event>,
        events_rx: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let display = Arc::clone(&services.display);
        let results = events_tx.clone();
        let callbacks = ResponseCallbacks {
            on_sentences: Box::new(move |_generation, sentences: &[String]| {
                display.show(DisplayUpdate::text(sentences.concat().trim_end()));
            }),
            on_full_text: Box::new(move |generation, text: &str| {
                let _ = results.send(Event::ResponseText {
                    generation,
                    text: text.to_string(),
                });
            }),
        };

        let orchestrator = ResponseOrchestrator::new(
            Arc::clone(&services.synthesizer),
            Arc::clone(&services.sink),
            settings.playback_retry,
            callbacks,
        );

        let (snapshot, _) = watch::channel(TurnSnapshot {
            phase: Phase::Idle,
            mode: Mode::Normal,
            generation: 0,
        });

        Self {
            turn: Turn::default(),
            generation: 0,
            live: Arc::new(AtomicU64::new(0)),
            ticket: 0,
            recording: None,
            thinking: String::new(),
            failed: false,
            history: ChatHistory::new(settings.max_history_messages),
            orchestrator,
            services,
            settings,
            events_tx,
            events_rx,
            snapshot,
        }
    }

    /// Sender for input sources
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.events_tx.clone()
    }

    /// Watch phase, mode and generation changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TurnSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current turn state
    #[must_use]
    pub const fn turn(&self) -> &Turn {
        &self.turn
    }

    /// Process events until [`Event::Shutdown`]
    pub async fn run(mut self) {
        self.enter(Phase::Idle);
        tracing::info!("turn controller running");

        while let Some(event) = self.events_rx.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }

        tracing::info!("turn controller stopped");
    }

    /// Apply one event
    pub fn handle(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Button(button) => self.on_button(button),
            Event::CaptureFinished { ticket, ok } => self.on_capture_finished(ticket, ok),
            Event::Recognized { ticket, text } => self.on_recognized(ticket, &text),
            Event::Stream {
                generation,
                phase,
                event,
            } => self.on_stream(generation, phase, event),
            Event::ResponseText { generation, text } => self.on_response_text(generation, &text),
            Event::PlaybackEnded { generation } => self.on_playback_ended(generation),
            Event::ConfirmationElapsed { ticket } => {
                if ticket == self.ticket && self.turn.phase == Phase::Recognizing {
                    self.enter(Phase::Idle);
                }
            }
            Event::ForcePhase(name) => self.force(&name),
            Event::Shutdown => {
                self.orchestrator.stop();
                if let Some(recording) = self.recording.as_mut() {
                    recording.stop();
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_button(&mut self, button: ButtonEvent) {
        match (self.turn.phase, button) {
            (Phase::Idle | Phase::Recognizing, ButtonEvent::Pressed) => self.enter(Phase::Listening),
            (Phase::Listening, ButtonEvent::Released) => {
                if let Some(recording) = self.recording.as_mut() {
                    recording.stop();
                }
            }
            (Phase::Answering | Phase::Translating, ButtonEvent::Pressed) => {
                tracing::info!(generation = self.generation, "response interrupted");
                self.orchestrator.stop();
                self.enter(Phase::Listening);
            }
            (Phase::ImageShowing, ButtonEvent::Pressed) => {
                self.services.display.show(DisplayUpdate::default().with_image(""));
                self.enter(Phase::Listening);
            }
            (phase, button) => {
                tracing::trace!(%phase, ?button, "button ignored");
            }
        }
    }

    fn on_capture_finished(&mut self, ticket: u64, ok: bool) {
        if ticket != self.ticket || self.turn.phase != Phase::Listening {
            return;
        }
        self.recording = None;

        if ok {
            self.enter(Phase::Recognizing);
        } else {
            self.enter(Phase::Idle);
        }
    }

    fn on_recognized(&mut self, ticket: u64, text: &str) {
        if ticket != self.ticket || self.turn.phase != Phase::Recognizing {
            tracing::debug!(ticket, current = self.ticket, "dropping stale recognition");
            return;
        }

        let text = text.trim();
        tracing::info!(text, "recognized");

        if let Some(command) = parse_command(text) {
            self.switch_mode(command);
            return;
        }

        if text.is_empty() {
            self.enter(Phase::Idle);
            return;
        }

        self.turn.recognized_text = Some(text.to_string());
        match self.turn.mode {
            Mode::Normal => self.enter(Phase::Answering),
            Mode::Translate => self.enter(Phase::Translating),
        }
    }

    fn switch_mode(&mut self, command: VoiceCommand) {
        let (mode, status, emoji) = match command {
            VoiceCommand::EnterTranslate => (Mode::Translate, "Translate mode on", "🌐"),
            VoiceCommand::ExitTranslate => (Mode::Normal, "Chat mode on", "💬"),
        };
        self.turn.mode = mode;
        self.publish();
        tracing::info!(?mode, "mode switched");

        self.services
            .display
            .show(DisplayUpdate::indicator(status, emoji, "#00FF88").with_text(""));

        let tx = self.events_tx.clone();
        let ticket = self.ticket;
        let delay = self.settings.confirmation_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::ConfirmationElapsed { ticket });
        });
    }

    fn on_stream(&mut self, generation: u64, phase: Phase, event: StreamEvent) {
        if generation != self.generation || phase != self.turn.phase {
            tracing::trace!(generation, %phase, "dropping stale stream event");
            return;
        }

        match event {
            StreamEvent::Partial(text) => self.orchestrator.partial(&text, generation),
            StreamEvent::Thinking(text) => {
                self.thinking.push_str(&text);
                self.services.display.show(DisplayUpdate {
                    status: Some("Thinking".to_string()),
                    text: Some(self.thinking.trim().to_string()),
                    ..DisplayUpdate::default()
                });
            }
            StreamEvent::Failed => {
                self.failed = true;
                self.orchestrator.replace(FALLBACK_UTTERANCE, generation);
            }
            StreamEvent::End => self.orchestrator.end_partial(generation),
        }
    }

    fn on_response_text(&mut self, generation: u64, text: &str) {
        if generation != self.generation || self.turn.phase != Phase::Answering {
            return;
        }
        if self.failed || text.is_empty() {
            return;
        }
        if let Some(question) = self.turn.recognized_text.as_deref() {
            self.history.record_exchange(question, text);
        }
    }

    fn on_playback_ended(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }

        match self.turn.phase {
            Phase::Answering => match self.services.artifacts.take(generation) {
                Some(path) => {
                    self.turn.image_path = Some(path);
                    self.enter(Phase::ImageShowing);
                }
                None => self.enter(Phase::Idle),
            },
            Phase::Translating => self.enter(Phase::Idle),
            _ => {}
        }
    }

    fn force(&mut self, name: &str) {
        let phase = match name.parse::<Phase>() {
            Ok(phase) => phase,
            Err(e) => {
                tracing::error!(error = %e, current = %self.turn.phase, "cannot force phase");
                return;
            }
        };

        tracing::info!(from = %self.turn.phase, to = %phase, "forcing phase");
        if self.turn.phase.is_responding() {
            self.orchestrator.stop();
        }
        self.enter(phase);
    }

    /// Switch phase and run its entry action
    fn enter(&mut self, phase: Phase) {
        let from = self.turn.phase;
        self.turn.phase = phase;
        self.ticket += 1;
        if !phase.is_responding() {
            self.live.store(0, Ordering::SeqCst);
        }
        tracing::debug!(%from, to = %phase, ticket = self.ticket, "phase entered");

        match phase {
            Phase::Idle => self.enter_idle(),
            Phase::Listening => self.enter_listening(),
            Phase::Recognizing => self.enter_recognizing(),
            Phase::Answering | Phase::Translating => self.enter_responding(phase),
            Phase::ImageShowing => self.enter_image_showing(),
        }

        self.publish();
    }

    fn enter_idle(&mut self) {
        self.recording = None;
        self.turn.reset();
        self.show_indicator(Phase::Idle);
    }

    fn enter_listening(&mut self) {
        self.turn.recognized_text = None;
        self.turn.image_path = None;
        self.show_indicator(Phase::Listening);

        let path = self.recording_path();
        if let Err(e) = std::fs::create_dir_all(&self.settings.recordings_dir) {
            tracing::warn!(error = %e, dir = %self.settings.recordings_dir.display(), "cannot create recordings dir");
        }

        let mut recording = match self.services.recorder.start(&path, self.settings.max_record) {
            Ok(recording) => recording,
            Err(e) => {
                tracing::warn!(error = %e, "cannot start recording");
                self.enter(Phase::Idle);
                return;
            }
        };

        if let Some(finished) = recording.take_finished() {
            let tx = self.events_tx.clone();
            let ticket = self.ticket;
            tokio::spawn(async move {
                let ok = matches!(finished.await, Ok(Ok(())));
                let _ = tx.send(Event::CaptureFinished { ticket, ok });
            });
        }

        self.turn.recording_path = Some(recording.path().to_path_buf());
        self.recording = Some(recording);
    }

    fn enter_recognizing(&mut self) {
        let Some(path) = self.turn.recording_path.clone() else {
            tracing::warn!("nothing recorded to recognize");
            self.enter(Phase::Idle);
            return;
        };
        self.show_indicator(Phase::Recognizing);

        let recognizer = Arc::clone(&self.services.recognizer);
        let tx = self.events_tx.clone();
        let ticket = self.ticket;
        tokio::spawn(async move {
            let text = recognizer.recognize(&path).await;
            let _ = tx.send(Event::Recognized { ticket, text });
        });
    }

    fn enter_responding(&mut self, phase: Phase) {
        let Some(text) = self.turn.recognized_text.clone() else {
            tracing::warn!(%phase, "no recognized text to respond to");
            self.enter(Phase::Idle);
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        self.live.store(generation, Ordering::SeqCst);
        self.thinking.clear();
        self.failed = false;
        self.services.artifacts.clear();
        self.services.display.show(indicator(phase, self.turn.mode).with_text(text.clone()));

        let ended = self.orchestrator.playback_ended_signal();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if ended.wait().await {
                let _ = tx.send(Event::PlaybackEnded { generation });
            }
        });

        let (model, messages) = if phase == Phase::Answering {
            (
                Arc::clone(&self.services.model),
                answer_messages(&self.settings.system_prompt, &self.history, &text),
            )
        } else {
            (
                Arc::clone(&self.services.translator),
                translation_messages(&self.settings.first_language, &self.settings.second_language, &text),
            )
        };

        let tx = self.events_tx.clone();
        let sink = StreamSink::new(generation, Arc::clone(&self.live), move |event| {
            let _ = tx.send(Event::Stream {
                generation,
                phase,
                event,
            });
        });

        tracing::info!(generation, %phase, "response started");
        tokio::spawn(drive_stream(model, messages, sink));
    }

    fn enter_image_showing(&mut self) {
        let Some(path) = self.turn.image_path.clone() else {
            self.enter(Phase::Idle);
            return;
        };
        self.services.display.show(
            indicator(Phase::ImageShowing, self.turn.mode).with_image(path.to_string_lossy()),
        );
    }

    fn show_indicator(&self, phase: Phase) {
        self.services.display.show(indicator(phase, self.turn.mode).with_text(""));
    }

    fn recording_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        self.settings.recordings_dir.join(format!("{stamp}.wav"))
    }

    fn publish(&self) {
        self.snapshot.send_replace(TurnSnapshot {
            phase: self.turn.phase,
            mode: self.turn.mode,
            generation: self.generation,
        });
    }
}

/// Status line, emoji and LED color for a phase
fn indicator(phase: Phase, mode: Mode) -> DisplayUpdate {
    match (phase, mode) {
        (Phase::Idle, Mode::Normal) => DisplayUpdate::indicator("Hold to talk", "😊", "#000055"),
        (Phase::Idle, Mode::Translate) => DisplayUpdate::indicator("Hold to translate", "🌐", "#330055"),
        (Phase::Listening, _) => DisplayUpdate::indicator("Listening", "🎤", "#00FF00"),
        (Phase::Recognizing, _) => DisplayUpdate::indicator("Recognizing", "🤔", "#0000FF"),
        (Phase::Answering, _) => DisplayUpdate::indicator("Answering", "💬", "#FFAA00"),
        (Phase::Translating, _) => DisplayUpdate::indicator("Translating", "🌐", "#FF5500"),
        (Phase::ImageShowing, _) => DisplayUpdate::indicator("Image", "🖼️", "#00FFFF"),
    }
}
