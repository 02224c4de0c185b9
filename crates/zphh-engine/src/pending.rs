//! Single-slot wait state for image-to-video requests.
//!
//! The slot is EMPTY or WAITING. A request older than the TTL is treated as
//! gone; a second request overwrites the first.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use zphh_contracts::message::ReplyTarget;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImageRequest {
    pub prompt: String,
    pub reply_target: ReplyTarget,
    pub created_at: Instant,
}

impl PendingImageRequest {
    pub fn new(prompt: impl Into<String>, reply_target: ReplyTarget, created_at: Instant) -> Self {
        Self {
            prompt: prompt.into(),
            reply_target,
            created_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}

#[derive(Debug, Default)]
pub struct PendingImageSlot {
    request: Option<PendingImageRequest>,
}

impl PendingImageSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `request`, returning the one it replaced.
    pub fn put(&mut self, request: PendingImageRequest) -> Option<PendingImageRequest> {
        let replaced = self.request.replace(request);
        if let Some(previous) = replaced.as_ref() {
            debug!(prompt = %previous.prompt, "pending image request overwritten");
        }
        replaced
    }

    /// Drops a stale request. Returns whether a fresh one is still waiting.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> bool {
        if let Some(request) = self.request.as_ref() {
            if request.is_expired(now, ttl) {
                info!(
                    age_secs = request.age(now).as_secs(),
                    "pending image request expired"
                );
                self.request = None;
            }
        }
        self.request.is_some()
    }

    /// Empties the slot and hands back its request if it is still fresh.
    pub fn take_fresh(&mut self, now: Instant, ttl: Duration) -> Option<PendingImageRequest> {
        self.request
            .take()
            .filter(|request| !request.is_expired(now, ttl))
    }

    pub fn peek(&self) -> Option<&PendingImageRequest> {
        self.request.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.request.is_some()
    }
}
