/// Conversation state shared by consecutive draw commands.
///
/// An empty id asks the provider to open a new conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    conversation_id: String,
}

impl Session {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn set_conversation_id(&mut self, id: impl Into<String>) {
        self.conversation_id = id.into();
    }

    pub fn reset(&mut self) {
        self.conversation_id.clear();
    }
}
