use super::command_registry::{CommandKind, CommandTable};
use crate::message::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Reset,
    Help,
    /// An image arrived while an image-to-video request is waiting for one.
    ConsumePendingImage,
    TextToVideo { prompt: String },
    ImageToVideo { prompt: String },
    Draw { prompt: String },
    /// Not addressed to this plugin.
    PassThrough,
}

impl Intent {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Help => "help",
            Self::ConsumePendingImage => "consume_pending_image",
            Self::TextToVideo { .. } => "text_to_video",
            Self::ImageToVideo { .. } => "image_to_video",
            Self::Draw { .. } => "draw",
            Self::PassThrough => "pass_through",
        }
    }
}

/// Classifies one inbound message.
///
/// `pending_fresh` must already reflect expiry: a stale pending request has
/// to be dropped by the caller before classification.
pub fn parse_intent(
    table: &CommandTable,
    kind: MessageKind,
    content: &str,
    pending_fresh: bool,
) -> Intent {
    if kind == MessageKind::Image {
        if pending_fresh {
            return Intent::ConsumePendingImage;
        }
        return Intent::PassThrough;
    }

    if let Some(command) = table.exact_match(content) {
        match command {
            CommandKind::Reset => return Intent::Reset,
            CommandKind::Help => return Intent::Help,
            _ => {}
        }
    }

    let Some((command, rest)) = table.prefix_match(content) else {
        return Intent::PassThrough;
    };
    let prompt = rest.trim().to_string();
    match command {
        CommandKind::Video => Intent::TextToVideo { prompt },
        CommandKind::VideoRef => Intent::ImageToVideo { prompt },
        CommandKind::Draw => Intent::Draw { prompt },
        CommandKind::Reset | CommandKind::Help => Intent::PassThrough,
    }
}
