//! Media-group aggregation: a Telegram-style album arrives as
//! several `Photo`/`Video`/`Document` events sharing one `media_group_id`.
//! This buffers them and, once no new message has arrived for `delay`,
//! synthesizes exactly one `media_group` event carrying the whole batch.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{Event, EventPayload, EventTag, Message};

type GroupKey = (i64, String);

pub struct MediaGroupAggregator {
    pending: Mutex<AHashMap<GroupKey, Vec<Message>>>,
    delay: Duration,
    emit: mpsc::UnboundedSender<Event>,
}

impl MediaGroupAggregator {
    pub fn new(delay: Duration, emit: mpsc::UnboundedSender<Event>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(AHashMap::default()),
            delay,
            emit,
        })
    }

    /// Buffers one message of an album. The first message for a given
    /// `(chat_id, media_group_id)` starts the aggregation timer; later
    /// messages just extend the buffer the timer will eventually flush.
    pub fn ingest(self: &Arc<Self>, chat_id: i64, media_group_id: String, message: Message) {
        let key = (chat_id, media_group_id.clone());
        let is_new = {
            let mut pending = self.pending.lock();
            let was_present = pending.contains_key(&key);
            pending.entry(key.clone()).or_default().push(message);
            !was_present
        };

        if is_new {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(this.delay).await;
                this.fire(key);
            });
        }
    }

    fn fire(&self, key: GroupKey) {
        let messages = self.pending.lock().remove(&key);
        let Some(messages) = messages else {
            return;
        };
        if messages.is_empty() {
            return;
        }
        let (chat_id, media_group_id) = key;
        debug!(chat_id, media_group_id = %media_group_id, count = messages.len(), "flushing media group");
        let event = Event {
            group_id: chat_id,
            tag: EventTag::MediaGroup,
            payload: EventPayload::MediaGroup {
                chat_id,
                media_group_id,
                messages,
            },
        };
        let _ = self.emit.send(event);
    }

    /// Flushes every still-pending group immediately, so a clean shutdown
    /// doesn't silently drop an album that never reached its debounce delay.
    pub fn flush_all(&self) {
        let keys: Vec<GroupKey> = self.pending.lock().keys().cloned().collect();
        for key in keys {
            self.fire(key);
        }
    }

    /// Drops every still-pending group without emitting it: its debounce
    /// timer is already spawned and will still wake up, but `fire` will find
    /// nothing left to remove. Used on shutdown, as opposed to
    /// [`flush_all`]'s eager emission.
    pub fn cancel_all(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::User;

    fn message(id: i64, media_group_id: &str) -> Message {
        Message {
            id,
            chat_id: 1,
            from_user: User {
                id: 7,
                username: None,
                first_name: "A".into(),
                is_bot: false,
            },
            text: None,
            caption: None,
            media_group_id: Some(media_group_id.to_string()),
            reply_to_message: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay_with_all_buffered_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agg = MediaGroupAggregator::new(Duration::from_millis(50), tx);

        agg.ingest(1, "g1".into(), message(1, "g1"));
        agg.ingest(1, "g1".into(), message(2, "g1"));

        tokio::time::advance(Duration::from_millis(60)).await;
        let event = rx.recv().await.unwrap();
        match event.payload {
            EventPayload::MediaGroup { messages, .. } => assert_eq!(messages.len(), 2),
            other => panic!("expected MediaGroup, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_all_emits_pending_groups_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agg = MediaGroupAggregator::new(Duration::from_secs(30), tx);
        agg.ingest(1, "g1".into(), message(1, "g1"));

        agg.flush_all();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.group_id, 1);
    }
}
