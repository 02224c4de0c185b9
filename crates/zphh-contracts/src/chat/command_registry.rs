use indexmap::IndexMap;

use crate::config::CommandTriggers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Reset,
    Help,
    Video,
    VideoRef,
    Draw,
}

impl CommandKind {
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Help => "help",
            Self::Video => "video",
            Self::VideoRef => "video_ref",
            Self::Draw => "draw",
        }
    }
}

/// Commands that only fire when the whole message equals the trigger.
pub(crate) const EXACT_COMMANDS: &[CommandKind] = &[CommandKind::Reset, CommandKind::Help];

/// Commands that fire on a trigger prefix. When triggers overlap, the first
/// entry in this list wins.
pub(crate) const PREFIX_COMMANDS: &[CommandKind] =
    &[CommandKind::Video, CommandKind::VideoRef, CommandKind::Draw];

/// Resolved trigger strings, keyed by command in matching order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    triggers: IndexMap<CommandKind, String>,
}

impl CommandTable {
    pub fn new(triggers: &CommandTriggers) -> Self {
        let mut map = IndexMap::new();
        for kind in EXACT_COMMANDS.iter().chain(PREFIX_COMMANDS) {
            let trigger = match kind {
                CommandKind::Reset => &triggers.reset,
                CommandKind::Help => &triggers.help,
                CommandKind::Video => &triggers.video,
                CommandKind::VideoRef => &triggers.video_ref,
                CommandKind::Draw => &triggers.draw,
            };
            map.insert(*kind, trigger.clone());
        }
        Self { triggers: map }
    }

    pub fn trigger(&self, kind: CommandKind) -> &str {
        self.triggers.get(&kind).map(String::as_str).unwrap_or("")
    }

    pub fn exact_match(&self, content: &str) -> Option<CommandKind> {
        EXACT_COMMANDS
            .iter()
            .copied()
            .find(|kind| self.trigger(*kind) == content)
    }

    /// Returns the first prefix command whose trigger starts `content`,
    /// together with the remainder after the trigger.
    pub fn prefix_match<'a>(&self, content: &'a str) -> Option<(CommandKind, &'a str)> {
        PREFIX_COMMANDS.iter().copied().find_map(|kind| {
            let trigger = self.trigger(kind);
            if trigger.is_empty() {
                return None;
            }
            content.strip_prefix(trigger).map(|rest| (kind, rest))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommandKind, &str)> {
        self.triggers
            .iter()
            .map(|(kind, trigger)| (*kind, trigger.as_str()))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new(&CommandTriggers::default())
    }
}
