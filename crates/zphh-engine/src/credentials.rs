use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use zphh_contracts::config::PluginConfig;
use zphh_contracts::envelope::{envelope_summary, parse_result, EnvelopeError, RefreshResult};
use zphh_contracts::events::{EventPayload, EventWriter, JournalEvent};

use crate::gateway::provider_headers;
use crate::transport::{HttpTransport, Method, OutboundRequest, RequestBody, TransportError};
use crate::{error_chain_text, record_event, truncate_text};

pub const REFRESH_PATH: &str = "user-api/user/refresh";

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error("no refresh token configured")]
    MissingRefreshToken,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("refresh endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed reading refresh response: {0}")]
    Body(#[from] std::io::Error),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Holds the provider access token and knows how to renew it.
///
/// Readers take a snapshot per request; a refresh swaps the whole string
/// under the write lock. A failed refresh leaves the stale token in place.
pub struct CredentialManager {
    transport: Arc<dyn HttpTransport>,
    refresh_url: String,
    refresh_token: Option<String>,
    access_token: RwLock<String>,
    timeout: Duration,
    journal: EventWriter,
    refresh_count: AtomicU64,
}

impl CredentialManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: &PluginConfig,
        journal: EventWriter,
    ) -> Self {
        Self {
            transport,
            refresh_url: config.endpoint(REFRESH_PATH),
            refresh_token: config.refresh_token().map(str::to_string),
            access_token: RwLock::new(
                config
                    .access_token
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
            ),
            timeout: config.request_timeout(),
            journal,
            refresh_count: AtomicU64::new(0),
        }
    }

    pub fn access_token(&self) -> String {
        match self.access_token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Number of successful refreshes since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Exchanges the refresh token for a new access token. Never fails
    /// loudly: errors are logged and reported as `false`.
    pub fn refresh(&self) -> bool {
        match self.try_refresh() {
            Ok(token) => {
                match self.access_token.write() {
                    Ok(mut slot) => *slot = token,
                    Err(poisoned) => *poisoned.into_inner() = token,
                }
                let count = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
                info!(refreshes = count, "access token refreshed");
                record_event(&self.journal, JournalEvent::TokenRefreshed, EventPayload::new());
                true
            }
            Err(err) => {
                let reason = error_chain_text(&err, 320);
                error!("access token refresh failed: {reason}");
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(reason));
                record_event(&self.journal, JournalEvent::TokenRefreshFailed, payload);
                false
            }
        }
    }

    fn try_refresh(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .ok_or(RefreshError::MissingRefreshToken)?;
        let body = RequestBody::Json(json!({}));
        let request = OutboundRequest {
            method: Method::Post,
            url: self.refresh_url.clone(),
            headers: provider_headers(refresh_token, body.default_content_type()),
            body,
            timeout: self.timeout,
        };
        let response = self.transport.execute(request)?;
        let status = response.status;
        let success = response.is_success();
        let bytes = response.into_bytes()?;
        if !success {
            return Err(RefreshError::Status {
                status,
                body: truncate_text(&String::from_utf8_lossy(&bytes), 256),
            });
        }
        parse_result::<RefreshResult>(&bytes)
            .and_then(RefreshResult::into_access_token)
            .map_err(|err| {
                debug!(envelope = %envelope_summary(&bytes, 256), "refresh envelope rejected");
                RefreshError::Envelope(err)
            })
    }
}

enum RefresherCommand {
    RefreshNow,
    Stop,
}

/// Background worker that refreshes credentials on a fixed interval until
/// stopped. Dropping it stops and joins the thread.
pub struct TokenRefresher {
    sender: Option<mpsc::Sender<RefresherCommand>>,
    handle: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl TokenRefresher {
    pub fn spawn(credentials: Arc<CredentialManager>, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop_flag);
        let handle = thread::Builder::new()
            .name("zphh-token-refresh".to_string())
            .spawn(move || run_refresher(credentials, interval, rx, worker_stop))?;
        info!(interval_secs = interval.as_secs(), "token refresher started");
        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
            stop_flag,
        })
    }

    pub fn refresh_now(&self) {
        if let Some(tx) = self.sender.as_ref() {
            let _ = tx.send(RefresherCommand::RefreshNow);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(RefresherCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("token refresher thread panicked");
            }
            info!("token refresher stopped");
        }
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_refresher(
    credentials: Arc<CredentialManager>,
    interval: Duration,
    rx: mpsc::Receiver<RefresherCommand>,
    stop_flag: Arc<AtomicBool>,
) {
    while !stop_flag.load(Ordering::SeqCst) {
        match rx.recv_timeout(interval) {
            Ok(RefresherCommand::RefreshNow) | Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("scheduled token refresh");
                credentials.refresh();
            }
            Ok(RefresherCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
