//! Streamed response handling
//!
//! The [`ResponseOrchestrator`] accumulates model output for one generation,
//! segments it into sentences for the display, synthesizes the whole response
//! once the stream ends and plays queued speech strictly in order.

pub mod sanitize;
pub mod segment;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use sanitize::sanitize_for_speech;
pub use segment::{MERGE_BUDGET, Segmented, merge_sentences, segment, segment_partial, split_sentences};

use crate::voice::{AudioSink, SpeechAudio, Synthesizer};

/// Called with the generation and every sentence completed so far
pub type SentencesCallback = Box<dyn Fn(u64, &[String]) + Send + Sync>;

/// Called once per generation with the joined response text
pub type FullTextCallback = Box<dyn Fn(u64, &str) + Send + Sync>;

/// Observers of response progress
pub struct ResponseCallbacks {
    /// Sentence list changed
    pub on_sentences: SentencesCallback,
    /// Stream ended; carries the complete response
    pub on_full_text: FullTextCallback,
}

impl Default for ResponseCallbacks {
    fn default() -> Self {
        Self {
            on_sentences: Box::new(|_, _| {}),
            on_full_text: Box::new(|_, _| {}),
        }
    }
}

impl std::fmt::Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCallbacks").finish_non_exhaustive()
    }
}

/// Resolves once the playback pump has drained
#[derive(Debug)]
pub struct PlaybackEnded {
    rx: oneshot::Receiver<()>,
}

impl PlaybackEnded {
    /// Wait for playback to end.
    ///
    /// Returns `false` if a newer signal replaced this one before it fired.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

#[derive(Default)]
struct StreamState {
    generation: u64,
    /// Generations below this were stopped and are ignored
    floor: u64,
    remainder: String,
    completed: Vec<String>,
    full_text: String,
    queue: VecDeque<JoinHandle<SpeechAudio>>,
    pump_running: bool,
    run: u64,
    ended: Option<oneshot::Sender<()>>,
}

impl StreamState {
    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation || generation < self.floor
    }

    /// Adopt `generation`, discarding text buffered for an older one
    fn enter(&mut self, generation: u64) {
        if generation > self.generation {
            self.generation = generation;
            self.clear_text();
        }
    }

    fn clear_text(&mut self) {
        self.remainder.clear();
        self.completed.clear();
        self.full_text.clear();
    }

    fn has_pending_text(&self) -> bool {
        !self.remainder.is_empty() || !self.full_text.is_empty()
    }
}

struct Inner {
    state: Mutex<StreamState>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    retry_delay: Duration,
    callbacks: ResponseCallbacks,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum PumpStep {
    Play(JoinHandle<SpeechAudio>),
    Wait,
    Finish(Option<oneshot::Sender<()>>),
}

/// Buffers streamed text per generation and sequences its playback
#[derive(Clone)]
pub struct ResponseOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("ResponseOrchestrator")
            .field("generation", &state.generation)
            .field("queued", &state.queue.len())
            .field("pump_running", &state.pump_running)
            .finish_non_exhaustive()
    }
}

impl ResponseOrchestrator {
    /// Create an orchestrator around a synthesizer and an audio sink.
    ///
    /// `retry_delay` is how long the pump waits before re-checking when its
    /// queue is empty but text is still buffered.
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        retry_delay: Duration,
        callbacks: ResponseCallbacks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState::default()),
                synthesizer,
                sink,
                retry_delay,
                callbacks,
            }),
        }
    }

    /// Latest generation seen
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.state().generation
    }

    /// Whether the playback pump is active
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner.state().pump_running
    }

    /// Feed a streamed text fragment produced under `generation`
    pub fn partial(&self, fragment: &str, generation: u64) {
        let sentences = {
            let mut state = self.inner.state();
            if state.is_stale(generation) {
                tracing::debug!(generation, current = state.generation, "dropping stale fragment");
                return;
            }
            state.enter(generation);

            let fragment = fragment.replace(['\r', '\n'], " ");
            state.full_text.push_str(&fragment);

            let buffered = std::mem::take(&mut state.remainder) + &fragment;
            let Segmented { sentences, remainder } = segment_partial(&buffered);
            state.remainder = remainder;

            if sentences.is_empty() {
                return;
            }
            state.completed.extend(sentences);
            state.completed.clone()
        };

        (self.inner.callbacks.on_sentences)(generation, &sentences);
    }

    /// Discard everything buffered for `generation` and feed `text` in its
    /// place
    ///
    /// Used when a stream fails part way, so the listener hears only the
    /// replacement.
    pub fn replace(&self, text: &str, generation: u64) {
        {
            let mut state = self.inner.state();
            if state.is_stale(generation) {
                tracing::debug!(generation, current = state.generation, "dropping stale replacement");
                return;
            }
            state.enter(generation);
            state.clear_text();
        }
        self.partial(text, generation);
    }

    /// Close the stream for `generation`: flush, synthesize and enqueue
    pub fn end_partial(&self, generation: u64) {
        let (flushed, full_text) = {
            let mut state = self.inner.state();
            if state.is_stale(generation) {
                tracing::debug!(generation, current = state.generation, "dropping stale stream end");
                return;
            }
            state.enter(generation);

            let rest = std::mem::take(&mut state.remainder);
            let Segmented { sentences, remainder } = segment(&rest);
            let mut changed = !sentences.is_empty();
            state.completed.extend(sentences);

            let tail = remainder.trim();
            if !tail.is_empty() {
                state.completed.push(format!("{tail} "));
                changed = true;
            }

            let speech = sanitize_for_speech(&state.full_text);
            let synthesizer = Arc::clone(&self.inner.synthesizer);
            tracing::debug!(generation, chars = speech.chars().count(), "queueing synthesis");
            state.queue.push_back(tokio::spawn(async move {
                if speech.is_empty() {
                    SpeechAudio::empty()
                } else {
                    synthesizer.synthesize(&speech).await
                }
            }));

            if !state.pump_running {
                state.pump_running = true;
                let run = state.run;
                tokio::spawn(pump(Arc::clone(&self.inner), run));
            }

            let flushed = changed.then(|| state.completed.clone());
            let full_text = state.completed.concat().trim().to_string();
            state.completed.clear();
            state.full_text.clear();
            (flushed, full_text)
        };

        if let Some(sentences) = flushed {
            (self.inner.callbacks.on_sentences)(generation, &sentences);
        }
        (self.inner.callbacks.on_full_text)(generation, &full_text);
    }

    /// Get a fresh handle that resolves when the pump next drains.
    ///
    /// Replaces any previously issued handle, which then resolves as
    /// superseded.
    #[must_use]
    pub fn playback_ended_signal(&self) -> PlaybackEnded {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.state().ended.replace(tx);
        drop(previous);
        PlaybackEnded { rx }
    }

    /// Halt playback and discard everything buffered or queued.
    ///
    /// Safe to call repeatedly. In-flight synthesis and model requests keep
    /// running; their results are ignored.
    pub fn stop(&self) {
        let ended = {
            let mut state = self.inner.state();
            state.queue.clear();
            state.clear_text();
            state.run += 1;
            state.pump_running = false;
            state.floor = state.generation + 1;
            state.ended.take()
        };

        if let Some(tx) = ended {
            let _ = tx.send(());
        }
        self.inner.sink.stop();
        tracing::debug!("response playback stopped");
    }
}

async fn pump(inner: Arc<Inner>, run: u64) {
    tracing::debug!(run, "playback pump started");

    loop {
        let step = {
            let mut state = inner.state();
            if state.run != run {
                return;
            }
            match state.queue.pop_front() {
                Some(entry) => PumpStep::Play(entry),
                None if state.has_pending_text() => PumpStep::Wait,
                None => {
                    state.pump_running = false;
                    PumpStep::Finish(state.ended.take())
                }
            }
        };

        match step {
            PumpStep::Play(entry) => {
                let audio = entry.await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "synthesis task failed");
                    SpeechAudio::empty()
                });
                if inner.state().run != run {
                    return;
                }
                if audio.is_empty() {
                    tracing::debug!("nothing to play");
                } else {
                    inner.sink.play(&audio).await;
                }
            }
            PumpStep::Wait => tokio::time::sleep(inner.retry_delay).await,
            PumpStep::Finish(ended) => {
                if let Some(tx) = ended {
                    let _ = tx.send(());
                }
                tracing::debug!(run, "playback pump drained");
                return;
            }
        }
    }
}
