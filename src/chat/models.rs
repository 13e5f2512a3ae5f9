use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// A persisted chat between one user and one or more avatars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "userId")]
    pub owner: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub model_id: String,
    #[serde(default)]
    pub avatar_ids: Vec<String>,
}

impl Conversation {
    pub fn push(&mut self, message: ChatMessage) {
        self.updated_at = self.updated_at.max(message.timestamp);
        self.messages.push(message);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub id: String,
    pub name: String,
    pub description: String,
    pub story: String,
    pub persona: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(rename = "ownerId")]
    pub owner: String,
    #[serde(default)]
    pub creator_nickname: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Avatar {
    pub fn is_visible_to(&self, user: &str) -> bool {
        self.is_public || self.owner == user
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarRequest {
    pub name: String,
    pub description: String,
    pub story: String,
    pub persona: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub creator_nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    #[serde(default)]
    pub message: String,
    pub model_id: Option<String>,
    #[serde(default)]
    pub avatar_id: String,
    #[serde(default)]
    pub avatar_ids: Vec<String>,
}

impl CreateChatRequest {
    /// Avatars requested, accepting the single-avatar form as well.
    pub fn requested_avatars(&self) -> Vec<String> {
        if !self.avatar_ids.is_empty() {
            self.avatar_ids.clone()
        } else if !self.avatar_id.is_empty() {
            vec![self.avatar_id.clone()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_accepts_single_avatar_field() {
        let req: CreateChatRequest =
            serde_json::from_str(r#"{"modelId":"m","avatarId":"a1"}"#).unwrap();
        assert_eq!(req.requested_avatars(), vec!["a1".to_string()]);

        let req: CreateChatRequest =
            serde_json::from_str(r#"{"avatarId":"a1","avatarIds":["a2","a3"]}"#).unwrap();
        assert_eq!(req.requested_avatars(), vec!["a2".to_string(), "a3".to_string()]);
    }

    #[test]
    fn conversation_wire_format() {
        let conversation = Conversation {
            id: "c1".into(),
            owner: "u1".into(),
            title: "Chat with Ada".into(),
            created_at: 10,
            updated_at: 10,
            messages: vec![ChatMessage {
                role: MessageRole::Assistant,
                content: "hi".into(),
                timestamp: 11,
            }],
            model_id: "m".into(),
            avatar_ids: vec!["a1".into()],
        };
        let value = serde_json::to_value(&conversation).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["modelId"], "m");
        assert_eq!(value["messages"][0]["role"], "assistant");
    }

    #[test]
    fn push_refreshes_updated_at() {
        let mut conversation = Conversation {
            id: "c1".into(),
            owner: "u1".into(),
            title: String::new(),
            created_at: 10,
            updated_at: 10,
            messages: vec![],
            model_id: "m".into(),
            avatar_ids: vec![],
        };
        conversation.push(ChatMessage {
            role: MessageRole::User,
            content: "x".into(),
            timestamp: 42,
        });
        assert_eq!(conversation.updated_at, 42);
        assert_eq!(conversation.messages.len(), 1);
    }
}
