use std::time::Duration;

use serde_json::Value;
use zphh_contracts::config::PluginConfig;
use zphh_contracts::envelope::{
    JobStatus, JobStatusResult, SubmitResult, UploadResult, UploadedSource,
};

use crate::gateway::{ApiCall, ApiError, Gateway, GatewayError};
use crate::transport::{MultipartField, TransportResponse};

pub const DRAW_STREAM_PATH: &str = "backend-api/assistant/stream";
pub const UPLOAD_PATH: &str = "video-api/v1/static/upload";
pub const VIDEO_SUBMIT_PATH: &str = "video-api/v1/chat";
pub const VIDEO_STATUS_PATH: &str = "video-api/v1/chat/status";

/// Endpoint-level view of the provider. Payload shapes live with the
/// features that build them; this type only knows where they go and how
/// the answers are unwrapped.
pub struct ChatGlmClient {
    gateway: Gateway,
    draw_url: String,
    draw_timeout: Duration,
    upload_url: String,
    submit_url: String,
    status_url: String,
}

impl ChatGlmClient {
    pub fn new(gateway: Gateway, config: &PluginConfig) -> Self {
        Self {
            gateway,
            draw_url: config.endpoint(DRAW_STREAM_PATH),
            draw_timeout: config.draw_stream_timeout(),
            upload_url: config.endpoint(UPLOAD_PATH),
            submit_url: config.endpoint(VIDEO_SUBMIT_PATH),
            status_url: config.endpoint(VIDEO_STATUS_PATH),
        }
    }

    /// The transport deadline covers the body too, so the stream gets its
    /// own budget instead of the per-request timeout.
    pub fn open_draw_stream(&self, payload: Value) -> Result<TransportResponse, GatewayError> {
        let call = ApiCall::post_json(&self.draw_url, payload)
            .header("Accept", "text/event-stream")
            .timeout(self.draw_timeout);
        self.gateway.request(&call)
    }

    pub fn upload_image(&self, fields: Vec<MultipartField>) -> Result<UploadedSource, ApiError> {
        let call = ApiCall::post_multipart(&self.upload_url, fields);
        let result: UploadResult = self.gateway.call_envelope(&call)?;
        Ok(result.into_source()?)
    }

    pub fn submit_video(&self, payload: Value) -> Result<String, ApiError> {
        let call = ApiCall::post_json(&self.submit_url, payload);
        let result: SubmitResult = self.gateway.call_envelope(&call)?;
        Ok(result.into_task_id()?)
    }

    pub fn video_status(&self, task_id: &str) -> Result<JobStatus, ApiError> {
        let call = ApiCall::get(format!("{}/{}", self.status_url, task_id));
        let result: JobStatusResult = self.gateway.call_envelope(&call)?;
        Ok(result.into_job_status())
    }
}
