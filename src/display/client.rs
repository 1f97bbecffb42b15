//! TCP client for the panel renderer

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

use super::{Display, DisplayUpdate};
use crate::input::ButtonEvent;
use crate::turn::Event;
use crate::Result;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct PanelMessage {
    event: String,
}

/// Parse one line from the renderer into a button event
#[must_use]
pub fn parse_button_event(line: &str) -> Option<ButtonEvent> {
    let message: PanelMessage = serde_json::from_str(line.trim()).ok()?;
    match message.event.as_str() {
        "button_pressed" => Some(ButtonEvent::Pressed),
        "button_released" => Some(ButtonEvent::Released),
        other => {
            tracing::debug!(event = other, "ignoring panel event");
            None
        }
    }
}

/// Sends updates to the renderer and forwards its button events
///
/// Runs a background task that keeps reconnecting with backoff. Updates
/// issued while disconnected collapse to the most recent one.
#[derive(Debug, Clone)]
pub struct DisplayClient {
    tx: mpsc::UnboundedSender<DisplayUpdate>,
}

impl DisplayClient {
    /// Start the connection task for `addr`.
    ///
    /// Button events are delivered to `events` when given.
    #[must_use]
    pub fn spawn(addr: String, events: Option<mpsc::UnboundedSender<Event>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(addr, rx, events));
        Self { tx }
    }
}

impl Display for DisplayClient {
    fn show(&self, update: DisplayUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("display task has stopped");
        }
    }
}

async fn run(
    addr: String,
    mut rx: mpsc::UnboundedReceiver<DisplayUpdate>,
    events: Option<mpsc::UnboundedSender<Event>>,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut carried: Option<DisplayUpdate> = None;

    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                tracing::info!(addr = %addr, "connected to display");
                backoff = INITIAL_BACKOFF;
                let closed = serve(stream, &mut rx, events.as_ref(), carried.take()).await;
                if closed {
                    return;
                }
                tracing::warn!(addr = %addr, "display connection lost");
            }
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "cannot reach display");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);

        loop {
            match rx.try_recv() {
                Ok(update) => carried = Some(update),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }
    }
}

/// Pump one connection; returns `true` once every sender is gone
async fn serve(
    stream: TcpStream,
    rx: &mut mpsc::UnboundedReceiver<DisplayUpdate>,
    events: Option<&mpsc::UnboundedSender<Event>>,
    carried: Option<DisplayUpdate>,
) -> bool {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    if let Some(update) = carried {
        if let Err(e) = write_update(&mut write, &update).await {
            tracing::warn!(error = %e, "display write failed");
            return false;
        }
    }

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else {
                    return true;
                };
                if let Err(e) = write_update(&mut write, &update).await {
                    tracing::warn!(error = %e, "display write failed");
                    return false;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let (Some(button), Some(events)) = (parse_button_event(&line), events) {
                        tracing::debug!(?button, "panel button");
                        let _ = events.send(Event::Button(button));
                    }
                }
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!(error = %e, "display read failed");
                    return false;
                }
            },
        }
    }
}

async fn write_update(write: &mut OwnedWriteHalf, update: &DisplayUpdate) -> Result<()> {
    let mut line = serde_json::to_vec(update)?;
    line.push(b'\n');
    write.write_all(&line).await?;
    Ok(())
}
