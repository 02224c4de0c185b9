//! Typed provider response envelopes.
//!
//! Every JSON endpoint wraps its payload as `{"status": int, "message"?: str,
//! "result"?: {...}}` where status 0 means success. Result fields are all
//! optional on the wire; the `into_*` accessors turn a missing field into
//! [`EnvelopeError::MissingField`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("provider returned status {status}: {message}")]
    Status { status: i64, message: String },
    #[error("provider envelope missing field `{0}`")]
    MissingField(&'static str),
    #[error("provider envelope is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: i64,
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn into_result(self) -> Result<T, EnvelopeError> {
        if !self.is_success() {
            return Err(EnvelopeError::Status {
                status: self.status,
                message: self.message.unwrap_or_default(),
            });
        }
        self.result.ok_or(EnvelopeError::MissingField("result"))
    }
}

/// Parses a body and unwraps its result in one step.
pub fn parse_result<T: DeserializeOwned>(body: &[u8]) -> Result<T, EnvelopeError> {
    Envelope::<T>::parse(body)?.into_result()
}

fn required(value: Option<String>, field: &'static str) -> Result<String, EnvelopeError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(EnvelopeError::MissingField(field))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshResult {
    #[serde(default)]
    pub access_token: Option<String>,
}

impl RefreshResult {
    pub fn into_access_token(self) -> Result<String, EnvelopeError> {
        required(self.access_token, "access_token")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResult {
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedSource {
    pub source_id: String,
    pub source_url: Option<String>,
}

impl UploadResult {
    pub fn into_source(self) -> Result<UploadedSource, EnvelopeError> {
        Ok(UploadedSource {
            source_id: required(self.source_id, "source_id")?,
            source_url: self.source_url.filter(|url| !url.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResult {
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl SubmitResult {
    pub fn into_task_id(self) -> Result<String, EnvelopeError> {
        required(self.chat_id, "chat_id")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatusResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// `url` may be absent; the poller keeps waiting in that case.
    Finished { url: Option<String> },
    Failed { message: Option<String> },
    InProgress(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Finished { url } => url.is_some(),
            Self::Failed { .. } => true,
            Self::InProgress(_) => false,
        }
    }
}

impl JobStatusResult {
    pub fn into_job_status(self) -> JobStatus {
        let status = self
            .status
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match status.as_str() {
            "finished" => JobStatus::Finished {
                url: self.video_url.filter(|url| !url.trim().is_empty()),
            },
            "failed" => JobStatus::Failed {
                message: self.msg.filter(|msg| !msg.trim().is_empty()),
            },
            _ => JobStatus::InProgress(status),
        }
    }
}

/// Raw envelope kept for logging when a call fails.
pub fn envelope_summary(body: &[u8], max_chars: usize) -> String {
    let text = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(body).to_string(),
    };
    if text.chars().count() <= max_chars {
        return text;
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}
