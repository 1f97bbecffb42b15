//! Tools the model can call during an answer

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::ToolCall;
use crate::{Error, Result};

const GENERATE_IMAGE: &str = "generate_image";

/// Latest generated image, tagged with the generation that produced it
///
/// Only the answer that created the image may claim it, so an image from an
/// interrupted answer never shows up after a later one.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSlot {
    inner: Arc<Mutex<Option<(u64, PathBuf)>>>,
}

impl ArtifactSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image produced under `generation`, replacing any older one
    pub fn record(&self, generation: u64, path: PathBuf) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some((generation, path));
    }

    /// Claim the image for `generation`; images from other generations are
    /// discarded
    #[must_use]
    pub fn take(&self, generation: u64) -> Option<PathBuf> {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
        match slot {
            Some((owner, path)) if owner == generation => Some(path),
            Some((owner, path)) => {
                tracing::debug!(owner, generation, path = %path.display(), "discarding stale image");
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
}

/// Text-to-image through an `OpenAI`-compatible images endpoint
pub struct ImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    output_dir: PathBuf,
}

impl std::fmt::Debug for ImageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl ImageGenerator {
    /// Create a generator writing PNG files into `output_dir`
    #[must_use]
    pub fn new(base_url: &str, api_key: SecretString, model: String, output_dir: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            output_dir,
        }
    }

    /// Generate an image for `prompt` and return the saved file path
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the payload cannot be saved
    pub async fn generate(&self, prompt: &str) -> Result<PathBuf> {
        tracing::info!(model = %self.model, prompt, "generating image");

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "n": 1,
                "size": "1024x1024",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("image API error {status}: {body}")));
        }

        let parsed: ImagesResponse = response.json().await?;
        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::Tool("image API returned no data".to_string()))?;

        let bytes = match (image.b64_json, image.url) {
            (Some(b64), _) => BASE64.decode(b64.trim())?,
            (None, Some(url)) => self.client.get(url).send().await?.error_for_status()?.bytes().await?.to_vec(),
            (None, None) => return Err(Error::Tool("image API returned no payload".to_string())),
        };

        save_image(&self.output_dir, &bytes).await
    }
}

async fn save_image(dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let name = format!(
        "{}-{}.png",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "image saved");
    Ok(path)
}

#[derive(Deserialize)]
struct GenerateImageArgs {
    prompt: String,
}

/// The tools offered to the model during answers
#[derive(Debug, Clone, Default)]
pub struct ToolBox {
    images: Option<Arc<ImageGenerator>>,
    artifacts: ArtifactSlot,
}

impl ToolBox {
    /// A tool box with nothing in it
    #[must_use]
    pub fn empty(artifacts: ArtifactSlot) -> Self {
        Self {
            images: None,
            artifacts,
        }
    }

    /// Offer `generate_image`, saving results into `artifacts`
    #[must_use]
    pub fn with_images(images: ImageGenerator, artifacts: ArtifactSlot) -> Self {
        Self {
            images: Some(Arc::new(images)),
            artifacts,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.images.is_none()
    }

    /// Function definitions in chat-completions format
    #[must_use]
    pub fn definitions(&self) -> Vec<serde_json::Value> {
        let mut tools = Vec::new();
        if self.images.is_some() {
            tools.push(serde_json::json!({
                "type": "function",
                "function": {
                    "name": GENERATE_IMAGE,
                    "description": "Draw a picture and show it on the device screen. \
                                    Use when the user asks to draw, paint or show an image.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "prompt": {
                                "type": "string",
                                "description": "Detailed description of the image"
                            }
                        },
                        "required": ["prompt"]
                    }
                }
            }));
        }
        tools
    }

    /// Run `call` on behalf of `generation` and return the tool message body.
    ///
    /// Failures are reported to the model as text rather than aborting the
    /// answer.
    pub async fn execute(&self, call: &ToolCall, generation: u64) -> String {
        match self.run(call, generation).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, tool = %call.function.name, "tool call failed");
                format!("Error: {e}")
            }
        }
    }

    async fn run(&self, call: &ToolCall, generation: u64) -> Result<String> {
        match call.function.name.as_str() {
            GENERATE_IMAGE => {
                let images = self
                    .images
                    .as_ref()
                    .ok_or_else(|| Error::Tool("image generation is disabled".to_string()))?;
                let args: GenerateImageArgs = serde_json::from_str(&call.function.arguments)?;
                let path = images.generate(&args.prompt).await?;
                self.artifacts.record(generation, path);
                Ok("The image has been generated and will be shown on the screen \
                    after you finish speaking."
                    .to_string())
            }
            other => Err(Error::Tool(format!("unknown tool: {other}"))),
        }
    }
}
