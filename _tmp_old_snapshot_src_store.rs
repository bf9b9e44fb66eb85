//! Persistent-variable and statistics-store boundaries. Both are
//! external collaborators; this module only defines the narrow trait
//! contract plus an in-memory fake used by tests.

use std::collections::VecDeque;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::FatalError;
use crate::value::Value;

/// `scope` is always `"group"` or `"user"`; the target user id (when scope
/// is `"user"`) has already been resolved by the caller.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn read_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        target_user_id: Option<i64>,
    ) -> Result<Option<Value>, FatalError>;

    async fn write_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        value: Value,
        target_user_id: Option<i64>,
    ) -> Result<(), FatalError>;

    async fn delete_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        target_user_id: Option<i64>,
    ) -> Result<(), FatalError>;

    /// 500-entry FIFO per group.
    async fn record_log(&self, group_id: i64, text: &str, tag: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    UserMessages,
    GroupMessages,
    GroupJoins,
    GroupLeaves,
}

#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Count of `kind` events in `[now - window_seconds, now]`, optionally
    /// scoped to one user.
    async fn count(
        &self,
        group_id: i64,
        kind: StatKind,
        window_seconds: u64,
        target_user_id: Option<i64>,
    ) -> Result<i64, FatalError>;
}

const LOG_CAPACITY: usize = 500;

/// In-memory `PersistentStore` + `StatisticsStore` used by tests and by
/// embedding applications before a real database is wired in.
#[derive(Default)]
pub struct InMemoryStore {
    vars: Mutex<AHashMap<(i64, String, String, Option<i64>), Value>>,
    logs: Mutex<AHashMap<i64, VecDeque<(String, Option<String>)>>>,
    events: Mutex<Vec<StatEvent>>,
}

struct StatEvent {
    group_id: i64,
    kind: StatKind,
    user_id: Option<i64>,
    at_unix: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: records a stat event at a given unix timestamp.
    pub fn seed_stat_event(&self, group_id: i64, kind: StatKind, user_id: Option<i64>, at_unix: i64) {
        self.events.lock().push(StatEvent {
            group_id,
            kind,
            user_id,
            at_unix,
        });
    }

    fn key(group_id: i64, scope: &str, name: &str, target: Option<i64>) -> (i64, String, String, Option<i64>) {
        (group_id, scope.to_string(), name.to_string(), target)
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn read_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        target_user_id: Option<i64>,
    ) -> Result<Option<Value>, FatalError> {
        let key = Self::key(group_id, scope, name, target_user_id);
        Ok(self.vars.lock().get(&key).cloned())
    }

    async fn write_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        value: Value,
        target_user_id: Option<i64>,
    ) -> Result<(), FatalError> {
        let key = Self::key(group_id, scope, name, target_user_id);
        self.vars.lock().insert(key, value);
        Ok(())
    }

    async fn delete_var(
        &self,
        group_id: i64,
        scope: &str,
        name: &str,
        target_user_id: Option<i64>,
    ) -> Result<(), FatalError> {
        let key = Self::key(group_id, scope, name, target_user_id);
        self.vars.lock().remove(&key);
        Ok(())
    }

    async fn record_log(&self, group_id: i64, text: &str, tag: Option<&str>) {
        let mut logs = self.logs.lock();
        let entry = logs.entry(group_id).or_default();
        entry.push_back((text.to_string(), tag.map(str::to_string)));
        while entry.len() > LOG_CAPACITY {
            entry.pop_front();
        }
    }
}

#[async_trait]
impl StatisticsStore for InMemoryStore {
    async fn count(
        &self,
        group_id: i64,
        kind: StatKind,
        window_seconds: u64,
        target_user_id: Option<i64>,
    ) -> Result<i64, FatalError> {
        let now = crate::time::now_unix();
        let floor = now - window_seconds as i64;
        let events = self.events.lock();
        Ok(events
            .iter()
            .filter(|e| {
                e.group_id == group_id
                    && e.kind == kind
                    && e.at_unix >= floor
                    && e.at_unix <= now
                    && target_user_id.map_or(true, |uid| e.user_id == Some(uid))
            })
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = InMemoryStore::new();
        store
            .write_var(1, "user", "warnings", Value::Number(2.0), Some(77))
            .await
            .unwrap();
        let got = store.read_var(1, "user", "warnings", Some(77)).await.unwrap();
        assert_eq!(got, Some(Value::Number(2.0)));
    }

    #[tokio::test]
    async fn delete_removes_the_value() {
        let store = InMemoryStore::new();
        store
            .write_var(1, "user", "warnings", Value::Number(2.0), Some(77))
            .await
            .unwrap();
        store.delete_var(1, "user", "warnings", Some(77)).await.unwrap();
        let got = store.read_var(1, "user", "warnings", Some(77)).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn log_is_a_bounded_fifo() {
        let store = InMemoryStore::new();
        for i in 0..(LOG_CAPACITY + 10) {
            store.record_log(1, &format!("entry {i}"), None).await;
        }
        assert_eq!(store.logs.lock().get(&1).unwrap().len(), LOG_CAPACITY);
    }

    #[tokio::test]
    async fn stat_count_respects_window() {
        let store = InMemoryStore::new();
        let now = crate::time::now_unix();
        store.seed_stat_event(1, StatKind::UserMessages, Some(7), now - 10);
        store.seed_stat_event(1, StatKind::UserMessages, Some(7), now - 1000);
        let count = store
            .count(1, StatKind::UserMessages, 60, Some(7))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}


