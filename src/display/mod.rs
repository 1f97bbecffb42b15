//! Screen, LED and button panel
//!
//! The panel is driven by a separate renderer process reached over TCP with
//! newline-delimited JSON. Updates are fire-and-forget; the same socket
//! carries button events back.

mod client;

use serde::{Deserialize, Serialize};

pub use client::{DisplayClient, parse_button_event};

/// One partial update of the panel; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// LED color as `#RRGGBB`
    #[serde(rename = "RGB", default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_color: Option<String>,
    /// Image file to show; an empty string clears the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl DisplayUpdate {
    /// Status line, emoji and LED color in one update
    #[must_use]
    pub fn indicator(status: &str, emoji: &str, rgb: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            emoji: Some(emoji.to_string()),
            rgb: Some(rgb.to_string()),
            ..Self::default()
        }
    }

    /// Only the text area
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Anything that can show panel updates
pub trait Display: Send + Sync {
    /// Queue an update; never blocks and never fails
    fn show(&self, update: DisplayUpdate);
}

/// Logs updates instead of rendering them (headless runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisplay;

impl Display for TracingDisplay {
    fn show(&self, update: DisplayUpdate) {
        tracing::info!(
            status = update.status.as_deref().unwrap_or_default(),
            emoji = update.emoji.as_deref().unwrap_or_default(),
            text = update.text.as_deref().unwrap_or_default(),
            image = update.image.as_deref().unwrap_or_default(),
            "display"
        );
    }
}
