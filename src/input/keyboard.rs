//! Developer console on stdin
//!
//! Stands in for the panel button when no hardware is attached. Enter
//! toggles the button; `quit` exits; any other word forces a phase by name.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ButtonEvent;
use crate::turn::Event;

/// Parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Toggle the virtual button
    Toggle,
    Quit,
    /// Jump to a phase by name
    Force(String),
}

impl ConsoleCommand {
    /// Interpret one line of input
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Toggle,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Force(other.to_string()),
        }
    }
}

/// Reads commands from stdin and turns them into controller events
#[derive(Debug, Default)]
pub struct KeyboardConsole {
    pressed: bool,
}

impl KeyboardConsole {
    #[must_use]
    pub const fn new() -> Self {
        Self { pressed: false }
    }

    /// Translate a command into the event it produces
    pub fn event_for(&mut self, command: ConsoleCommand) -> Event {
        match command {
            ConsoleCommand::Toggle => {
                self.pressed = !self.pressed;
                let button = if self.pressed {
                    ButtonEvent::Pressed
                } else {
                    ButtonEvent::Released
                };
                Event::Button(button)
            }
            ConsoleCommand::Quit => Event::Shutdown,
            ConsoleCommand::Force(phase) => Event::ForcePhase(phase),
        }
    }

    /// Read stdin until EOF or `quit`, forwarding events
    pub fn spawn(mut self, events: mpsc::UnboundedSender<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("keyboard console: Enter = press/release, <phase> = jump, quit = exit");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "console read failed");
                        break;
                    }
                };

                let event = self.event_for(ConsoleCommand::parse(&line));
                let quit = matches!(event, Event::Shutdown);
                if events.send(event).is_err() || quit {
                    return;
                }
            }

            let _ = events.send(Event::Shutdown);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Toggle);
        assert_eq!(ConsoleCommand::parse("  quit "), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleCommand::parse("Answering"),
            ConsoleCommand::Force("Answering".into())
        );
    }

    #[test]
    fn test_enter_alternates_press_and_release() {
        let mut console = KeyboardConsole::new();
        assert!(matches!(
            console.event_for(ConsoleCommand::Toggle),
            Event::Button(ButtonEvent::Pressed)
        ));
        assert!(matches!(
            console.event_for(ConsoleCommand::Toggle),
            Event::Button(ButtonEvent::Released)
        ));
        assert!(matches!(
            console.event_for(ConsoleCommand::Toggle),
            Event::Button(ButtonEvent::Pressed)
        ));
    }
}
