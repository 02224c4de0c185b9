pub mod acquire;
pub mod client;
pub mod credentials;
pub mod draw;
pub mod gateway;
pub mod pending;
pub mod plugin;
pub mod replies;
pub mod session;
pub mod transport;
pub mod upload;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use acquire::{AcquireError, AcquiredImage, ImageAcquirer};
pub use client::ChatGlmClient;
pub use credentials::{CredentialManager, TokenRefresher};
pub use gateway::{ApiCall, ApiError, Gateway, GatewayError};
pub use pending::{PendingImageRequest, PendingImageSlot};
pub use plugin::{ZphhPlugin, PLUGIN_NAME};
pub use session::Session;
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
pub use video::{PollOutcome, PollSettings, VideoJobError, VideoMode};

use tracing::warn;
use zphh_contracts::events::{EventPayload, EventWriter, JournalEvent};

pub(crate) fn record_event(journal: &EventWriter, event: JournalEvent, payload: EventPayload) {
    if let Err(err) = journal.emit(event, payload) {
        warn!(event = event.as_str(), "failed writing journal event: {err:#}");
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Flattens an error and its sources into one line for logs and journal
/// payloads.
pub(crate) fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}
