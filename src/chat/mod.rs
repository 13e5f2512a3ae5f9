pub mod models;
mod prompt;
mod service;
mod store;

pub use models::{
    Avatar, AvatarRequest, ChatMessage, Conversation, CreateChatRequest, MessageRole,
    SendMessageRequest,
};
pub use prompt::{build_system_prompt, prepare_messages};
pub use service::{ChatError, ChatService, StreamingReply};
pub use store::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
