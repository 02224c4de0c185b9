mod command_registry;
mod intent_parser;

pub use command_registry::{CommandKind, CommandTable};
pub use intent_parser::{parse_intent, Intent};
