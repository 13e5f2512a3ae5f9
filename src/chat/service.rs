use super::models::{
    Avatar, AvatarRequest, ChatMessage, Conversation, CreateChatRequest,
};
use super::prompt::{chat_title, prepare_messages};
use super::store::ConversationStore;
use crate::relay::{self, ForwardStream};
use crate::server::metrics;
use crate::upstream::{ChatCompletionClient, UpstreamError};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat not found")]
    NotFound,

    #[error("You don't have access to this chat")]
    Forbidden,

    #[error("At least one avatar ID is required")]
    NoAvatars,

    #[error("Invalid avatar ID")]
    InvalidAvatar(String),

    #[error("You don't have access to this avatar")]
    AvatarForbidden(String),

    #[error("Avatar not found")]
    AvatarNotFound,

    #[error("You don't have permission to modify this avatar")]
    AvatarNotOwned,

    #[error("No avatars associated with this chat")]
    ChatWithoutAvatars,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// A streamed reply in flight.
pub struct StreamingReply {
    /// Body to hand to the client.
    pub body: ForwardStream,
    /// Resolves to whether an assistant message was saved.
    pub persisted: JoinHandle<bool>,
}

pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn ChatCompletionClient>,
    default_model: String,
    relay_capacity: usize,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn ChatCompletionClient>,
        default_model: impl Into<String>,
        relay_capacity: usize,
    ) -> Self {
        Self {
            store,
            client,
            default_model: default_model.into(),
            relay_capacity,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Starts a conversation with one or more avatars. The model opens with
    /// a welcome message; an initial user message, if present, is answered
    /// too.
    pub async fn create_chat(&self, user: &str, req: CreateChatRequest) -> Result<Conversation, ChatError> {
        let avatar_ids = req.requested_avatars();
        if avatar_ids.is_empty() {
            return Err(ChatError::NoAvatars);
        }
        let avatars = self.load_avatars(&avatar_ids, user)?;

        let now = chrono::Utc::now().timestamp();
        let mut conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            owner: user.to_string(),
            title: chat_title(&avatars),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            model_id: req
                .model_id
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.default_model.clone()),
            avatar_ids,
        };

        info!(
            "Requesting welcome message for new chat {} with model {}",
            conversation.id, conversation.model_id
        );
        let welcome = self
            .client
            .complete(&conversation.model_id, &prepare_messages(&conversation, &avatars, None))
            .await
            .inspect_err(|_| metrics::record_upstream_error("chat"))?;
        conversation.push(ChatMessage::assistant(welcome));

        if !req.message.is_empty() {
            conversation.push(ChatMessage::user(&req.message));
            let messages = prepare_messages(&conversation, &avatars, None);
            match self.client.complete(&conversation.model_id, &messages).await {
                Ok(reply) => conversation.push(ChatMessage::assistant(reply)),
                // The chat is still usable with just the welcome message.
                Err(e) => {
                    metrics::record_upstream_error("chat");
                    warn!("Initial reply for chat {} failed: {}", conversation.id, e);
                }
            }
        }

        self.store.save_conversation(&conversation)?;
        info!("Created chat {} for user {}", conversation.id, user);
        Ok(conversation)
    }

    pub fn get_chat(&self, user: &str, chat_id: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .get_conversation(chat_id)?
            .ok_or(ChatError::NotFound)?;
        if conversation.owner != user {
            return Err(ChatError::Forbidden);
        }
        Ok(conversation)
    }

    pub fn list_chats(&self, user: &str) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.store.list_conversations(user)?)
    }

    pub fn delete_chat(&self, user: &str, chat_id: &str) -> Result<(), ChatError> {
        self.get_chat(user, chat_id)?;
        if !self.store.delete_conversation(chat_id)? {
            return Err(ChatError::NotFound);
        }
        info!("Deleted chat {} for user {}", chat_id, user);
        Ok(())
    }

    /// Appends `message` and waits for the complete reply.
    pub async fn send_message(&self, user: &str, chat_id: &str, message: &str) -> Result<Conversation, ChatError> {
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let mut conversation = self.get_chat(user, chat_id)?;
        let avatars = self.conversation_avatars(&conversation, user)?;

        conversation.push(ChatMessage::user(message));
        let reply = self
            .client
            .complete(&conversation.model_id, &prepare_messages(&conversation, &avatars, None))
            .await
            .inspect_err(|_| metrics::record_upstream_error("chat"))?;
        conversation.push(ChatMessage::assistant(reply));

        self.store.save_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Appends `message`, opens a streamed completion and relays it.
    ///
    /// The user message is saved before the upstream is contacted. If the
    /// upstream rejects the request nothing is streamed. Once the relay is
    /// over, the accumulated reply is saved unless the client disconnected.
    pub async fn stream_reply(&self, user: &str, chat_id: &str, message: &str) -> Result<StreamingReply, ChatError> {
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let mut conversation = self.get_chat(user, chat_id)?;
        let avatars = self.conversation_avatars(&conversation, user)?;

        let user_message = ChatMessage::user(message);
        debug!("Saving user message for chat {}", chat_id);
        if !self.store.append_message(chat_id, &user_message)? {
            return Err(ChatError::NotFound);
        }
        conversation.push(user_message);

        let messages = prepare_messages(&conversation, &avatars, None);
        let upstream = match self.client.open_stream(&conversation.model_id, &messages).await {
            Ok(upstream) => upstream,
            Err(e) => {
                metrics::record_upstream_error("chat");
                metrics::record_relay_session("rejected");
                warn!("Upstream refused stream for chat {}: {}", chat_id, e);
                return Err(e.into());
            }
        };

        info!("Starting to stream response for chat {}", chat_id);
        let (body, reply) = relay::start(upstream, self.relay_capacity);

        let store = self.store.clone();
        let chat_id = chat_id.to_string();
        let persisted = tokio::spawn(async move {
            let outcome = reply.wait().await;
            let Some(text) = outcome.persistable_text() else {
                return false;
            };
            match store.append_message(&chat_id, &ChatMessage::assistant(text)) {
                Ok(true) => {
                    metrics::record_reply_persisted();
                    info!("Saved streamed reply for chat {}", chat_id);
                    true
                }
                Ok(false) => {
                    warn!("Chat {} was deleted before its reply could be saved", chat_id);
                    false
                }
                Err(e) => {
                    error!("Failed to save streamed reply for chat {}: {}", chat_id, e);
                    false
                }
            }
        });

        Ok(StreamingReply { body, persisted })
    }

    pub fn create_avatar(&self, user: &str, req: AvatarRequest) -> Result<Avatar, ChatError> {
        let now = chrono::Utc::now().timestamp();
        let avatar = Avatar {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name,
            description: req.description,
            story: req.story,
            persona: req.persona,
            profile_image_url: req.profile_image_url,
            is_public: req.is_public,
            owner: user.to_string(),
            creator_nickname: req.creator_nickname,
            created_at: now,
            updated_at: now,
        };
        self.store.save_avatar(&avatar)?;
        info!("Created avatar {} ({}) for user {}", avatar.id, avatar.name, user);
        Ok(avatar)
    }

    pub fn get_avatar(&self, user: &str, avatar_id: &str) -> Result<Avatar, ChatError> {
        let avatar = self
            .store
            .get_avatar(avatar_id)?
            .ok_or_else(|| ChatError::InvalidAvatar(avatar_id.to_string()))?;
        if !avatar.is_visible_to(user) {
            return Err(ChatError::AvatarForbidden(avatar_id.to_string()));
        }
        Ok(avatar)
    }

    /// Replaces the editable fields of an avatar owned by `user`. An empty
    /// creator nickname keeps the current one.
    pub fn update_avatar(&self, user: &str, avatar_id: &str, req: AvatarRequest) -> Result<Avatar, ChatError> {
        let mut avatar = self.owned_avatar(user, avatar_id)?;
        avatar.name = req.name;
        avatar.description = req.description;
        avatar.story = req.story;
        avatar.persona = req.persona;
        avatar.profile_image_url = req.profile_image_url;
        avatar.is_public = req.is_public;
        if !req.creator_nickname.is_empty() {
            avatar.creator_nickname = req.creator_nickname;
        }
        avatar.updated_at = chrono::Utc::now().timestamp().max(avatar.created_at);

        self.store.save_avatar(&avatar)?;
        info!("Updated avatar {} for user {}", avatar.id, user);
        Ok(avatar)
    }

    /// Deletes an avatar owned by `user`. Chats that used it stay readable
    /// but can no longer be continued.
    pub fn delete_avatar(&self, user: &str, avatar_id: &str) -> Result<(), ChatError> {
        self.owned_avatar(user, avatar_id)?;
        if !self.store.delete_avatar(avatar_id)? {
            return Err(ChatError::AvatarNotFound);
        }
        info!("Deleted avatar {} for user {}", avatar_id, user);
        Ok(())
    }

    fn owned_avatar(&self, user: &str, avatar_id: &str) -> Result<Avatar, ChatError> {
        let avatar = self
            .store
            .get_avatar(avatar_id)?
            .ok_or(ChatError::AvatarNotFound)?;
        if avatar.owner != user {
            return Err(ChatError::AvatarNotOwned);
        }
        Ok(avatar)
    }

    pub fn list_avatars(&self, user: &str) -> Result<Vec<Avatar>, ChatError> {
        Ok(self.store.list_avatars_visible_to(user)?)
    }

    fn load_avatars(&self, ids: &[String], user: &str) -> Result<Vec<Avatar>, ChatError> {
        ids.iter().map(|id| self.get_avatar(user, id)).collect()
    }

    fn conversation_avatars(&self, conversation: &Conversation, user: &str) -> Result<Vec<Avatar>, ChatError> {
        if conversation.avatar_ids.is_empty() {
            return Err(ChatError::ChatWithoutAvatars);
        }
        self.load_avatars(&conversation.avatar_ids, user)
    }
}
