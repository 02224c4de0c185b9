use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zphh_contracts::config::PluginConfig;
use zphh_contracts::envelope::JobStatus;
use zphh_contracts::video::VideoParameters;

use crate::acquire::AcquireError;
use crate::client::ChatGlmClient;
use crate::gateway::ApiError;
use crate::replies;
use crate::upload::UploadError;

/// Consecutive poll failures and pending attempts are only reported on every
/// n-th occurrence.
pub const POLL_LOG_EVERY: u32 = 12;
const IMAGE_GENERATION_PATTERN: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoMode {
    TextToVideo(VideoParameters),
    ImageToVideo { prompt: String, source_id: String },
}

impl VideoMode {
    pub fn prompt(&self) -> &str {
        match self {
            Self::TextToVideo(params) => &params.prompt,
            Self::ImageToVideo { prompt, .. } => prompt,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TextToVideo(_) => "text_to_video",
            Self::ImageToVideo { .. } => "image_to_video",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::TextToVideo(params) => json!({
                "prompt": params.prompt,
                "conversation_id": "",
                "source_list": [],
                "base_parameter_extra": {
                    "generation_pattern": 0,
                    "resolution": 0,
                    "fps": 0,
                    "duration": 1,
                    "generation_ai_audio": 0,
                    "label_watermark": 1,
                },
                "advanced_parameter_extra": {
                    "video_style": params.style.label(),
                    "emotional_atmosphere": params.mood.label(),
                    "mirror_mode": params.camera.label(),
                    "aspect_ratio": params.ratio.to_string(),
                },
            }),
            Self::ImageToVideo { prompt, source_id } => json!({
                "prompt": prompt,
                "conversation_id": "",
                "source_list": [source_id],
                "base_parameter_extra": {
                    "generation_pattern": IMAGE_GENERATION_PATTERN,
                    "resolution": 0,
                    "fps": 0,
                    "duration": 1,
                    "generation_ai_audio": 0,
                    "label_watermark": 1,
                },
                "advanced_parameter_extra": {},
            }),
        }
    }
}

/// Why a video request produced no video. Each stage maps to its own
/// user-facing reply.
#[derive(Debug, thiserror::Error)]
pub enum VideoJobError {
    #[error("image acquisition failed: {0}")]
    Acquire(#[from] AcquireError),
    #[error("image upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("video submission failed: {0}")]
    Submit(#[source] ApiError),
    #[error("video job {task_id} failed: {}", .message.as_deref().unwrap_or("no reason given"))]
    Failed {
        task_id: String,
        message: Option<String>,
    },
    #[error("video job {task_id} still unfinished after {attempts} polls")]
    TimedOut { task_id: String, attempts: u32 },
}

impl VideoJobError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Acquire(_) => replies::IMAGE_ACQUIRE_FAILED,
            Self::Upload(_) => replies::IMAGE_UPLOAD_FAILED,
            Self::Submit(_) => replies::VIDEO_SUBMIT_FAILED,
            Self::Failed { .. } | Self::TimedOut { .. } => replies::VIDEO_RESULT_FAILED,
        }
    }
}

pub fn submit_video(client: &ChatGlmClient, mode: &VideoMode) -> Result<String, VideoJobError> {
    let task_id = client
        .submit_video(mode.payload())
        .map_err(VideoJobError::Submit)?;
    info!(task_id = %task_id, mode = mode.label(), "video job submitted");
    Ok(task_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.poll_max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Finished { url: String, attempts: u32 },
    Failed { message: Option<String>, attempts: u32 },
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Finished { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::TimedOut { attempts } => *attempts,
        }
    }

    pub fn into_result(self, task_id: &str) -> Result<String, VideoJobError> {
        match self {
            Self::Finished { url, .. } => Ok(url),
            Self::Failed { message, .. } => Err(VideoJobError::Failed {
                task_id: task_id.to_string(),
                message,
            }),
            Self::TimedOut { attempts } => Err(VideoJobError::TimedOut {
                task_id: task_id.to_string(),
                attempts,
            }),
        }
    }
}

/// Polls a submitted job until it reaches a terminal state or the attempt
/// budget runs out. Request failures count as "not yet" and never abort the
/// loop.
pub struct VideoJobPoller<'a> {
    client: &'a ChatGlmClient,
    settings: PollSettings,
    cleanup_dir: Option<PathBuf>,
}

impl<'a> VideoJobPoller<'a> {
    pub fn new(client: &'a ChatGlmClient, settings: PollSettings) -> Self {
        Self {
            client,
            settings,
            cleanup_dir: None,
        }
    }

    pub fn with_cleanup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cleanup_dir = Some(dir.into());
        self
    }

    pub fn poll(&self, task_id: &str) -> PollOutcome {
        let mut consecutive_failures = 0u32;
        for attempt in 1..=self.settings.max_attempts {
            match self.client.video_status(task_id) {
                Ok(JobStatus::Finished { url: Some(url) }) => {
                    info!(task_id, attempt, url = %url, "video job finished");
                    if let Some(dir) = self.cleanup_dir.as_deref() {
                        cleanup_temp_files(dir, &url);
                    }
                    return PollOutcome::Finished {
                        url,
                        attempts: attempt,
                    };
                }
                Ok(JobStatus::Failed { message }) => {
                    warn!(
                        task_id,
                        attempt,
                        reason = message.as_deref().unwrap_or_default(),
                        "video job failed"
                    );
                    return PollOutcome::Failed {
                        message,
                        attempts: attempt,
                    };
                }
                Ok(status) => {
                    consecutive_failures = 0;
                    if attempt % POLL_LOG_EVERY == 0 {
                        info!(task_id, attempt, status = ?status, "video job still in progress");
                    } else {
                        debug!(task_id, attempt, status = ?status, "video job pending");
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures % POLL_LOG_EVERY == 0 {
                        warn!(
                            task_id,
                            attempt,
                            consecutive_failures,
                            "video status checks keep failing: {err}"
                        );
                    }
                }
            }
            if attempt < self.settings.max_attempts && !self.settings.interval.is_zero() {
                thread::sleep(self.settings.interval);
            }
        }
        warn!(
            task_id,
            attempts = self.settings.max_attempts,
            "gave up waiting for video job"
        );
        PollOutcome::TimedOut {
            attempts: self.settings.max_attempts,
        }
    }
}

/// Removes local temp files named after the finished video. Returns how many
/// were deleted.
pub fn cleanup_temp_files(dir: &Path, url: &str) -> usize {
    let Some(basename) = url_basename(url) else {
        return 0;
    };
    let candidate = dir.join(basename);
    if !candidate.is_file() {
        return 0;
    }
    match fs::remove_file(&candidate) {
        Ok(()) => {
            debug!(path = %candidate.display(), "removed video temp file");
            1
        }
        Err(err) => {
            warn!(path = %candidate.display(), "failed removing video temp file: {err}");
            0
        }
    }
}

fn url_basename(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}
