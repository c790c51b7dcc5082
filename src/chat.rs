// =============================================================================
// Chat — single global room, append-only log with pagination (spec.md §4.6)
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, BroadcastMessage};
use crate::error::ChatError;
use crate::user_store::UserStore;

const MIN_TEXT_LEN: usize = 1;
const MAX_TEXT_LEN: usize = 2000;
const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub text: String,
    pub sim_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    pub total: usize,
}

pub struct Chat {
    log: Mutex<Vec<ChatMessage>>,
    users: Arc<UserStore>,
    broadcaster: Arc<Broadcaster>,
}

impl Chat {
    pub fn new(users: Arc<UserStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            users,
            broadcaster,
        }
    }

    /// Validate, resolve author, append, and fan out (spec.md §4.6).
    pub async fn post(&self, user_id: Uuid, text: &str) -> Result<ChatMessage, ChatError> {
        let trimmed = text.trim();
        if trimmed.len() < MIN_TEXT_LEN || trimmed.chars().count() > MAX_TEXT_LEN {
            return Err(ChatError::InvalidText);
        }
        let user = self.users.get(user_id).ok_or(ChatError::UnknownAuthor)?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            user_id,
            display_name: user.display_name,
            text: trimmed.to_string(),
            sim_timestamp: Utc::now(),
        };
        self.log.lock().push(message.clone());

        self.broadcaster
            .publish(BroadcastMessage::Chat {
                id: message.id,
                user_id: message.user_id,
                display_name: message.display_name.clone(),
                text: message.text.clone(),
                sim_timestamp: message.sim_timestamp.to_rfc3339(),
            })
            .await;

        Ok(message)
    }

    /// Newest-first window of length <= min(limit, 100), plus total count
    /// (spec.md §4.6, §8 boundary "limit > 100 is clamped").
    pub fn get_messages(&self, limit: usize, offset: usize) -> ChatPage {
        let clamped = limit.clamp(1, MAX_PAGE_LIMIT);
        let log = self.log.lock();
        let total = log.len();
        let messages = log
            .iter()
            .rev()
            .skip(offset)
            .take(clamped)
            .cloned()
            .collect();
        ChatPage { messages, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_store::{NewUser, Role};

    fn setup() -> (Chat, Uuid) {
        let users = Arc::new(UserStore::new());
        let id = users
            .register(NewUser {
                email: None,
                username: Some("alice".into()),
                display_name: "Alice".into(),
                password_hash: "h".into(),
                role: Role::User,
            })
            .unwrap();
        let broadcaster = Broadcaster::new();
        (Chat::new(users, broadcaster), id)
    }

    #[tokio::test]
    async fn post_then_read_round_trips() {
        let (chat, user_id) = setup();
        chat.post(user_id, "hello").await.unwrap();
        let page = chat.get_messages(10, 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].text, "hello");
        assert_eq!(page.messages[0].display_name, "Alice");
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let (chat, user_id) = setup();
        let err = chat.post(user_id, "   ").await.unwrap_err();
        assert_eq!(err, ChatError::InvalidText);
    }

    #[tokio::test]
    async fn too_long_text_is_rejected() {
        let (chat, user_id) = setup();
        let text: String = std::iter::repeat('a').take(2001).collect();
        let err = chat.post(user_id, &text).await.unwrap_err();
        assert_eq!(err, ChatError::InvalidText);
    }

    #[tokio::test]
    async fn unknown_author_is_rejected() {
        let (chat, _) = setup();
        let err = chat.post(Uuid::new_v4(), "hi").await.unwrap_err();
        assert_eq!(err, ChatError::UnknownAuthor);
    }

    #[tokio::test]
    async fn limit_is_clamped_and_newest_first() {
        let (chat, user_id) = setup();
        for i in 0..5 {
            chat.post(user_id, &format!("msg{i}")).await.unwrap();
        }
        let page = chat.get_messages(1000, 0);
        assert_eq!(page.messages.len(), 5);
        assert_eq!(page.messages[0].text, "msg4");
        assert_eq!(page.total, 5);
    }
}
