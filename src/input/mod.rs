//! User input sources

mod keyboard;

pub use keyboard::{ConsoleCommand, KeyboardConsole};

/// Physical push-to-talk button transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Released,
}
