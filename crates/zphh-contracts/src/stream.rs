//! Frame handling for the assistant stream used by the draw command.
//!
//! The provider pushes `event:` / `data:` lines. Each `data:` frame repeats
//! the full text generated so far, so the accumulator keeps the latest
//! snapshot rather than concatenating.

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrawFrame {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parts: Vec<FramePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FramePart {
    #[serde(default)]
    pub content: Option<Vec<FrameContent>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameContent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<Vec<FrameImage>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameImage {
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawOutcome {
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl DrawOutcome {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image_url.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DrawAccumulator {
    text: String,
    last_text: String,
    image_url: Option<String>,
    text_updates: usize,
    frames: usize,
    malformed_frames: usize,
}

impl DrawAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw stream line. Returns the conversation id carried by the
    /// frame, if any, so the caller can store it right away.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with("event:") {
            return None;
        }
        let payload = line.strip_prefix("data:")?;
        let frame: DrawFrame = match serde_json::from_str(payload.trim()) {
            Ok(frame) => frame,
            Err(err) => {
                self.malformed_frames += 1;
                warn!(error = %err, "skipping malformed draw frame");
                return None;
            }
        };
        self.frames += 1;
        debug!(frame = self.frames, "draw frame received");
        self.apply(frame)
    }

    pub fn apply(&mut self, frame: DrawFrame) -> Option<String> {
        for part in &frame.parts {
            let Some(contents) = part.content.as_ref() else {
                continue;
            };
            for content in contents {
                match content.kind.as_str() {
                    "text" => {
                        let current = content.text.as_deref().unwrap_or_default();
                        if current != self.last_text {
                            self.text = current.to_string();
                            self.last_text = current.to_string();
                            self.text_updates += 1;
                        }
                    }
                    "image" => {
                        if let Some(url) = content
                            .image
                            .iter()
                            .flatten()
                            .filter_map(|image| image.image_url.as_deref())
                            .map(str::trim)
                            .find(|url| !url.is_empty())
                        {
                            self.image_url = Some(url.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        frame.conversation_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_updates(&self) -> usize {
        self.text_updates
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed_frames
    }

    pub fn finish(self) -> DrawOutcome {
        DrawOutcome {
            text: Some(self.text).filter(|text| !text.trim().is_empty()),
            image_url: self.image_url,
        }
    }
}
