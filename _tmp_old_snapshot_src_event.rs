//! Platform event payloads. These are the typed, "raw" shapes the dispatcher
//! receives; the variable resolver projects them into [`Value`]s on demand.

use crate::ast::Trigger;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub from_user: User,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media_group_id: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
}

/// The canonical, dispatcher-recognized event kind. `MediaGroup` and
/// `Schedule` are synthesized; the rest arrive directly from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    Message,
    Command,
    UserJoin,
    UserLeave,
    Photo,
    Video,
    Document,
    EditedMessage,
    MediaGroup,
    Schedule,
}

impl EventTag {
    /// Whether a rule declaring `trigger` is a candidate for this event tag.
    /// `media_group` triggers only match synthesized `MediaGroup` events.
    pub fn matches(self, trigger: &Trigger) -> bool {
        matches!(
            (self, trigger),
            (EventTag::Message, Trigger::Message)
                | (EventTag::Command, Trigger::Command)
                | (EventTag::UserJoin, Trigger::UserJoin)
                | (EventTag::UserLeave, Trigger::UserLeave)
                | (EventTag::Photo, Trigger::Photo)
                | (EventTag::Video, Trigger::Video)
                | (EventTag::Document, Trigger::Document)
                | (EventTag::EditedMessage, Trigger::EditedMessage)
                | (EventTag::MediaGroup, Trigger::MediaGroup)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Message(Message),
    Command(Message),
    UserJoin { chat_id: i64, user: User },
    UserLeave { chat_id: i64, user: User },
    Photo(Message),
    Video(Message),
    Document(Message),
    EditedMessage(Message),
    MediaGroup {
        chat_id: i64,
        media_group_id: String,
        messages: Vec<Message>,
    },
    Schedule {
        chat_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub group_id: i64,
    pub tag: EventTag,
    pub payload: EventPayload,
}

impl Event {
    /// The user field, when this event kind carries one. `Schedule` events
    /// have no user.
    pub fn user(&self) -> Option<&User> {
        match &self.payload {
            EventPayload::Message(m)
            | EventPayload::Command(m)
            | EventPayload::Photo(m)
            | EventPayload::Video(m)
            | EventPayload::Document(m)
            | EventPayload::EditedMessage(m) => Some(&m.from_user),
            EventPayload::UserJoin { user, .. } | EventPayload::UserLeave { user, .. } => {
                Some(user)
            }
            EventPayload::MediaGroup { messages, .. } => messages.first().map(|m| &m.from_user),
            EventPayload::Schedule { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            EventPayload::Message(m)
            | EventPayload::Command(m)
            | EventPayload::Photo(m)
            | EventPayload::Video(m)
            | EventPayload::Document(m)
            | EventPayload::EditedMessage(m) => Some(m),
            _ => None,
        }
    }
}


