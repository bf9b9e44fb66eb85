//! The chat-platform client boundary. The engine calls these
//! methods; it never talks to the platform's wire protocol directly.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMember {
    pub user_id: i64,
    pub is_admin: bool,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, chat: i64, text: &str) -> Result<(), AdapterError>;
    async fn reply(&self, message_id: i64, text: &str) -> Result<(), AdapterError>;
    async fn delete(&self, message_id: i64) -> Result<(), AdapterError>;
    async fn restrict(&self, chat: i64, user: i64, until: Option<i64>) -> Result<(), AdapterError>;
    async fn unrestrict(&self, chat: i64, user: i64) -> Result<(), AdapterError>;
    async fn ban(&self, chat: i64, user: i64, reason: Option<&str>) -> Result<(), AdapterError>;
    async fn kick(&self, chat: i64, user: i64) -> Result<(), AdapterError>;
    async fn get_chat_member(&self, chat: i64, user: i64) -> Result<ChatMember, AdapterError>;
    async fn start_verification(&self, chat: i64, user: i64) -> Result<(), AdapterError>;
}

/// A call recorded by [`RecordingPlatformClient`], in invocation order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    SendMessage(i64, String),
    Reply(i64, String),
    Delete(i64),
    Restrict(i64, i64, Option<i64>),
    Unrestrict(i64, i64),
    Ban(i64, i64, Option<String>),
    Kick(i64, i64),
    GetChatMember(i64, i64),
    StartVerification(i64, i64),
}

/// Test fake: records every call it receives and answers admin queries from
/// a pre-seeded set, so assertions can inspect exactly which adapter calls
/// fired and in what order.
#[derive(Default)]
pub struct RecordingPlatformClient {
    pub calls: Mutex<Vec<RecordedCall>>,
    pub admins: Mutex<std::collections::HashSet<(i64, i64)>>,
}

impl RecordingPlatformClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_admin(&self, chat: i64, user: i64) {
        self.admins.lock().insert((chat, user));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatformClient {
    async fn send_message(&self, chat: i64, text: &str) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::SendMessage(chat, text.to_string()));
        Ok(())
    }

    async fn reply(&self, message_id: i64, text: &str) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::Reply(message_id, text.to_string()));
        Ok(())
    }

    async fn delete(&self, message_id: i64) -> Result<(), AdapterError> {
        self.calls.lock().push(RecordedCall::Delete(message_id));
        Ok(())
    }

    async fn restrict(&self, chat: i64, user: i64, until: Option<i64>) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::Restrict(chat, user, until));
        Ok(())
    }

    async fn unrestrict(&self, chat: i64, user: i64) -> Result<(), AdapterError> {
        self.calls.lock().push(RecordedCall::Unrestrict(chat, user));
        Ok(())
    }

    async fn ban(&self, chat: i64, user: i64, reason: Option<&str>) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::Ban(chat, user, reason.map(str::to_string)));
        Ok(())
    }

    async fn kick(&self, chat: i64, user: i64) -> Result<(), AdapterError> {
        self.calls.lock().push(RecordedCall::Kick(chat, user));
        Ok(())
    }

    async fn get_chat_member(&self, chat: i64, user: i64) -> Result<ChatMember, AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::GetChatMember(chat, user));
        Ok(ChatMember {
            user_id: user,
            is_admin: self.admins.lock().contains(&(chat, user)),
        })
    }

    async fn start_verification(&self, chat: i64, user: i64) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(RecordedCall::StartVerification(chat, user));
        Ok(())
    }
}


