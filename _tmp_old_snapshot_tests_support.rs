//! Shared fixtures for the integration tests: minimal `User`/`Message`
//! builders and the fakes wired together the way a real dispatch would be.

use std::sync::Arc;

use grouprules::{Event, EventPayload, EventTag, Message, User};

pub fn user(id: i64) -> User {
    User {
        id,
        username: None,
        first_name: format!("user{id}"),
        is_bot: false,
    }
}

pub fn message(id: i64, chat_id: i64, from: i64, text: Option<&str>) -> Message {
    Message {
        id,
        chat_id,
        from_user: user(from),
        text: text.map(str::to_string),
        caption: None,
        media_group_id: None,
        reply_to_message: None,
    }
}

pub fn message_event(tag: EventTag, chat_id: i64, msg: Message) -> Event {
    let payload = match tag {
        EventTag::Message => EventPayload::Message(msg),
        EventTag::Command => EventPayload::Command(msg),
        EventTag::Photo => EventPayload::Photo(msg),
        EventTag::Video => EventPayload::Video(msg),
        EventTag::Document => EventPayload::Document(msg),
        EventTag::EditedMessage => EventPayload::EditedMessage(msg),
        other => panic!("message_event does not support {other:?}"),
    };
    Event {
        group_id: chat_id,
        tag,
        payload,
    }
}

pub fn reply_chain(mut outer: Message, reply_to: Message) -> Message {
    outer.reply_to_message = Some(Box::new(reply_to));
    outer
}

pub struct Fakes {
    pub platform: Arc<grouprules::platform::RecordingPlatformClient>,
    pub store: Arc<grouprules::InMemoryStore>,
    pub stats: Arc<grouprules::InMemoryStore>,
}

pub fn fakes() -> Fakes {
    Fakes {
        platform: Arc::new(grouprules::platform::RecordingPlatformClient::new()),
        store: Arc::new(grouprules::InMemoryStore::new()),
        stats: Arc::new(grouprules::InMemoryStore::new()),
    }
}

