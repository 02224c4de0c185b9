//! Boundary types shared with the chat-bot host.
//!
//! The host owns message delivery. The plugin only sees a [`MessageContext`]
//! per inbound message and talks back through a [`ReplyChannel`].

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Info,
    Error,
    Text,
    ImageUrl,
    VideoUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub content: String,
}

impl Reply {
    pub fn new(kind: ReplyKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Info, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Error, content)
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::Text, content)
    }

    pub fn image_url(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::ImageUrl, content)
    }

    pub fn video_url(content: impl Into<String>) -> Self {
        Self::new(ReplyKind::VideoUrl, content)
    }
}

/// Whether the host should keep offering the message to other plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Continue,
    BreakPass,
}

/// Opaque handle pointing back at the conversation a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyTarget(String);

impl ReplyTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ReplyChannel: Send + Sync {
    fn send(&self, reply: Reply, target: &ReplyTarget);
}

/// Host-side hook that materializes an attachment on disk before it is read.
pub trait Attachment: Send + Sync {
    fn prepare(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct MessageContext {
    pub kind: MessageKind,
    /// Message text, or the local path / URL of an image.
    pub content: String,
    pub target: ReplyTarget,
    pub attachment: Option<Arc<dyn Attachment>>,
    pub prepared: bool,
}

impl MessageContext {
    pub fn text(content: impl Into<String>, target: ReplyTarget) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            target,
            attachment: None,
            prepared: false,
        }
    }

    pub fn image(location: impl Into<String>, target: ReplyTarget) -> Self {
        Self {
            kind: MessageKind::Image,
            content: location.into(),
            target,
            attachment: None,
            prepared: false,
        }
    }

    pub fn with_attachment(mut self, attachment: Arc<dyn Attachment>) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("kind", &self.kind)
            .field("content", &self.content)
            .field("target", &self.target)
            .field("attachment", &self.attachment.is_some())
            .field("prepared", &self.prepared)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub reply: Option<Reply>,
    pub action: EventAction,
}

impl HandleOutcome {
    pub fn pass() -> Self {
        Self {
            reply: None,
            action: EventAction::Continue,
        }
    }

    pub fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            action: EventAction::BreakPass,
        }
    }

    /// Handled, with everything already delivered through the channel.
    pub fn consumed() -> Self {
        Self {
            reply: None,
            action: EventAction::BreakPass,
        }
    }
}
