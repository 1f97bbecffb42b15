use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use whisplay_chatbot::config::InputSource;
use whisplay_chatbot::display::{Display, DisplayClient, TracingDisplay};
use whisplay_chatbot::input::KeyboardConsole;
use whisplay_chatbot::services::{build_recognizer, build_services, build_synthesizer};
use whisplay_chatbot::voice::{AudioSink, CpalPlayback, CpalRecorder, Recorder};
use whisplay_chatbot::{Config, Event, TurnController, TurnSettings};

/// Whisplay - push-to-talk voice assistant
#[derive(Parser)]
#[command(name = "whisplay", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/whisplay/config.toml)
    #[arg(short, long, env = "WHISPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Drive the button from the terminal instead of the display
    #[arg(long)]
    keyboard: bool,

    /// Run without the display renderer (log updates instead)
    #[arg(long, env = "WHISPLAY_NO_DISPLAY")]
    no_display: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Record from the microphone and print the transcript
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,whisplay_chatbot=info",
        1 => "info,whisplay_chatbot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.keyboard {
        config.input = InputSource::Keyboard;
    }
    if cli.no_display {
        config.display.enabled = false;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    tracing::info!(
        display = %config.display.addr,
        display_enabled = config.display.enabled,
        input = ?config.input,
        model = %config.llm.model,
        "starting whisplay chatbot"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let display: Arc<dyn Display> = if config.display.enabled {
        let buttons = (config.input == InputSource::Display).then(|| events_tx.clone());
        Arc::new(DisplayClient::spawn(config.display.addr.clone(), buttons))
    } else {
        Arc::new(TracingDisplay)
    };

    let services = build_services(&config, display)?;
    let controller = TurnController::with_channel(
        TurnSettings::from_config(&config),
        services,
        events_tx.clone(),
        events_rx,
    );

    if config.input == InputSource::Keyboard || !config.display.enabled {
        KeyboardConsole::new().spawn(events_tx.clone());
    }

    let shutdown = events_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown.send(Event::Shutdown);
        }
    });

    tracing::info!("whisplay ready - press the button to talk");
    controller.run().await;

    Ok(())
}

/// Record for a fixed time, then transcribe with the configured backend
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Recording for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let dir = config.recordings_dir();
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("test-mic.wav");

    let mut recording = CpalRecorder::new().start(&path, Duration::from_secs(duration + 1))?;
    tokio::time::sleep(Duration::from_secs(duration)).await;
    recording.stop();

    if let Some(finished) = recording.take_finished() {
        finished
            .await
            .map_err(|_| anyhow::anyhow!("recorder exited without reporting"))??;
    }
    println!("Saved {}", path.display());

    let recognizer = build_recognizer(config)?;
    println!("Transcribing...");
    let text = recognizer.recognize(&path).await;

    println!("\n---");
    if text.is_empty() {
        println!("Nothing was recognized. Check:");
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: arecord -l (to list devices)");
        println!("  3. Is the speech-to-text backend reachable?");
    } else {
        println!("Heard: \"{text}\"");
    }

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = CpalPlayback::new();

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play_samples(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");
    println!("  2. Run: alsamixer (to check output levels)");

    Ok(())
}

/// Synthesize `text` with the configured backend and play it
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(config)?;

    println!("Synthesizing speech...");
    let audio = synthesizer.synthesize(text).await;
    if audio.is_empty() {
        anyhow::bail!("TTS synthesis returned no audio");
    }
    println!(
        "Got {} bytes of audio data ({} ms)",
        audio.bytes.len(),
        audio.duration_ms
    );

    println!("Playing audio...");
    CpalPlayback::new().play(&audio).await;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
