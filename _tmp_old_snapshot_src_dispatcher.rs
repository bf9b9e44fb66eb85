//! Wires events to rules: keeps one priority-ordered rule cache
//! per group, routes album messages through [`MediaGroupAggregator`],
//! installs `schedule(...)` rules as standing cron tasks, and answers the
//! built-in administrative commands before any user rule sees an event.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use cron::Schedule;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::ast::{SharedRule, Trigger};
use crate::error::FatalError;
use crate::event::{Event, EventPayload, EventTag};
use crate::executor::{self, Outcome};
use crate::media_group::MediaGroupAggregator;
use crate::platform::PlatformClient;
use crate::resolver::{EventContext, VariableResolver};
use crate::store::{PersistentStore, StatisticsStore};

#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub id: i64,
    pub source: String,
    pub priority: i64,
    pub active: bool,
}

/// The backing store for rule definitions themselves (distinct from
/// [`PersistentStore`], which holds rule-authored `vars.*` data).
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_rules(&self, group_id: i64) -> Result<Vec<RuleRecord>, FatalError>;
    async fn set_active(&self, group_id: i64, rule_id: i64, active: bool) -> Result<(), FatalError>;
}

struct CachedGroup {
    /// Sorted by descending priority; ties keep the repository's declaration order.
    rules: Vec<(i64, SharedRule)>,
}

pub struct DispatcherConfig {
    pub media_group_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            media_group_delay: Duration::from_secs(2),
        }
    }
}

pub struct EventDispatcher {
    config: DispatcherConfig,
    cache: RwLock<AHashMap<i64, CachedGroup>>,
    repo: Arc<dyn RuleRepository>,
    resolver: Arc<dyn VariableResolver>,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn PersistentStore>,
    stats: Arc<dyn StatisticsStore>,
    media_groups: Arc<MediaGroupAggregator>,
    media_group_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    accepting: AtomicBool,
    inflight: AtomicU64,
    drained: Notify,
}

impl EventDispatcher {
    pub fn new(
        config: DispatcherConfig,
        repo: Arc<dyn RuleRepository>,
        resolver: Arc<dyn VariableResolver>,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn PersistentStore>,
        stats: Arc<dyn StatisticsStore>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let media_groups = MediaGroupAggregator::new(config.media_group_delay, tx);
        Arc::new(Self {
            config,
            cache: RwLock::new(AHashMap::default()),
            repo,
            resolver,
            platform,
            store,
            stats,
            media_groups,
            media_group_rx: tokio::sync::Mutex::new(Some(rx)),
            accepting: AtomicBool::new(true),
            inflight: AtomicU64::new(0),
            drained: Notify::new(),
        })
    }

    /// Runs the loop that re-dispatches synthesized `media_group` events as
    /// they're flushed by the aggregator. Spawn this once at startup.
    pub fn spawn_media_group_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = this
                .media_group_rx
                .lock()
                .await
                .take()
                .expect("media group loop already spawned");
            while let Some(event) = rx.recv().await {
                this.clone().spawn_event(event);
            }
        });
    }

    /// Loads (or reuses) the rule cache for `group_id`, then runs matching
    /// rules against `event` in priority order on a fresh task. Dropped
    /// without running if the dispatcher is mid-shutdown and no longer
    /// accepting new events.
    pub fn spawn_event(self: Arc<Self>, event: Event) {
        if !self.accepting.load(Ordering::Acquire) {
            warn!(group_id = event.group_id, "dispatcher is shutting down; dropping event");
            return;
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            self.handle_event(event).await;
            if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.drained.notify_waiters();
            }
        });
    }

    /// Stops accepting new events, drops whatever media-group albums
    /// haven't yet debounced, and waits up to `grace` for in-flight event
    /// tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        self.media_groups.cancel_all();

        let wait_for_drain = async {
            loop {
                // Register interest before checking the count so a
                // `notify_waiters` landing between the check and the await
                // below still wakes this loop (see `tokio::sync::Notify`'s
                // documented "check, then wait" pattern).
                let notified = self.drained.notified();
                if self.inflight.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, wait_for_drain).await.is_err() {
            warn!(
                inflight = self.inflight.load(Ordering::Acquire),
                "shutdown grace period elapsed with tasks still running"
            );
        }
    }

    async fn handle_event(self: Arc<Self>, event: Event) {
        if let EventPayload::Photo(m) | EventPayload::Video(m) | EventPayload::Document(m) = &event.payload {
            if let Some(media_group_id) = &m.media_group_id {
                self.media_groups
                    .ingest(event.group_id, media_group_id.clone(), m.clone());
                return;
            }
        }

        if event.tag == EventTag::Command {
            if let Some(reply) = self.try_admin_command(&event).await {
                let _ = self.platform.send_message(event.group_id, &reply).await;
                return;
            }
        }

        let rules = match self.rules_for(event.group_id, &event.tag).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(group_id = event.group_id, error = %e, "failed to load rule cache; skipping event");
                return;
            }
        };

        let mut ctx = EventContext::new(
            event,
            Arc::clone(&self.platform),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
        );

        for rule in rules {
            match executor::execute(&rule, self.resolver.as_ref(), &mut ctx).await {
                Outcome::Stopped => break,
                Outcome::Completed => {}
                Outcome::Errored(message) => {
                    warn!(rule_source_hash = rule.source_hash, error = %message, "rule errored");
                }
            }
        }
    }

    pub async fn rules_for(&self, group_id: i64, tag: &EventTag) -> Result<Vec<SharedRule>, FatalError> {
        if !self.cache.read().contains_key(&group_id) {
            self.load_group(group_id).await?;
        }
        let cache = self.cache.read();
        let group = cache.get(&group_id).expect("just loaded");
        Ok(group
            .rules
            .iter()
            .filter(|(_, rule)| rule.active && rule.triggers.iter().any(|t| tag.matches(t)))
            .map(|(_, rule)| Arc::clone(rule))
            .collect())
    }

    async fn load_group(&self, group_id: i64) -> Result<(), FatalError> {
        let records = self.repo.list_rules(group_id).await?;
        let mut compiled: Vec<(i64, SharedRule)> = Vec::with_capacity(records.len());
        for record in records {
            match crate::parse::parse_rule(&record.source) {
                Ok(mut rule) => {
                    rule.priority = record.priority;
                    rule.active = record.active;
                    compiled.push((record.id, Arc::new(rule)));
                }
                Err(e) => {
                    warn!(group_id, rule_id = record.id, error = %e, "rule failed to parse; excluding from cache");
                }
            }
        }
        compiled.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        self.cache.write().insert(group_id, CachedGroup { rules: compiled });
        Ok(())
    }

    pub fn invalidate(&self, group_id: i64) {
        self.cache.write().remove(&group_id);
    }

    /// Installs one background task per `schedule(...)` rule declared by a
    /// group, firing a synthesized `Schedule` event at each cron occurrence.
    pub async fn install_schedules(self: &Arc<Self>, group_id: i64) -> Result<(), FatalError> {
        self.load_group(group_id).await?;
        let cache = self.cache.read();
        let Some(group) = cache.get(&group_id) else {
            return Ok(());
        };
        let schedules: Vec<String> = group
            .rules
            .iter()
            .filter(|(_, rule)| rule.active)
            .flat_map(|(_, rule)| rule.triggers.iter())
            .filter_map(|t| match t {
                Trigger::Schedule(expr) => Some(expr.clone()),
                _ => None,
            })
            .collect();
        drop(cache);

        for expr in schedules {
            let schedule = match Schedule::from_str(&expr) {
                Ok(s) => s,
                Err(e) => {
                    warn!(group_id, cron = %expr, error = %e, "invalid cron expression; schedule not installed");
                    continue;
                }
            };
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_schedule(group_id, schedule).await;
            });
        }
        Ok(())
    }

    async fn run_schedule(self: Arc<Self>, group_id: i64, schedule: Schedule) {
        loop {
            let now = chrono::Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            info!(group_id, "firing scheduled event");
            let event = Event {
                group_id,
                tag: EventTag::Schedule,
                payload: EventPayload::Schedule { chat_id: group_id },
            };
            Arc::clone(&self).spawn_event(event);
        }
    }

    /// Handles `/rules`, `/togglerule <id>` and `/reload_rules`. Returns the
    /// reply text when `event` was one of these, `None` otherwise so the
    /// caller falls through to ordinary rule dispatch.
    async fn try_admin_command(&self, event: &Event) -> Option<String> {
        let message = event.message()?;
        let text = message.text.as_deref()?;
        let mut parts = text.split_whitespace();
        let command = parts.next()?.trim_start_matches('/');

        match command {
            "rules" => {
                let cache = self.cache.read();
                let listing = cache
                    .get(&event.group_id)
                    .map(|g| {
                        g.rules
                            .iter()
                            .map(|(id, rule)| format!("#{id} (priority {}, active={})", rule.priority, rule.active))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_else(|| "no rules loaded".to_string());
                Some(listing)
            }
            "togglerule" => {
                let id: i64 = parts.next()?.parse().ok()?;
                let cache = self.cache.read();
                let current_active = cache
                    .get(&event.group_id)?
                    .rules
                    .iter()
                    .find(|(rule_id, _)| *rule_id == id)
                    .map(|(_, rule)| rule.active)?;
                drop(cache);
                match self.repo.set_active(event.group_id, id, !current_active).await {
                    Ok(()) => {
                        self.invalidate(event.group_id);
                        Some(format!("rule #{id} is now {}", if current_active { "disabled" } else { "enabled" }))
                    }
                    Err(e) => Some(format!("failed to toggle rule #{id}: {e}")),
                }
            }
            "reload_rules" => {
                self.invalidate(event.group_id);
                match self.load_group(event.group_id).await {
                    Ok(()) => Some("rules reloaded".to_string()),
                    Err(e) => Some(format!("failed to reload rules: {e}")),
                }
            }
            _ => None,
        }
    }
}

/// In-memory [`RuleRepository`] used by tests and by embedding applications
/// before a real database is wired in.
pub struct InMemoryRuleRepository {
    groups: RwLock<AHashMap<i64, Vec<RuleRecord>>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(AHashMap::default()),
        }
    }

    pub fn seed(&self, group_id: i64, record: RuleRecord) {
        self.groups.write().entry(group_id).or_default().push(record);
    }
}

impl Default for InMemoryRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_rules(&self, group_id: i64) -> Result<Vec<RuleRecord>, FatalError> {
        Ok(self.groups.read().get(&group_id).cloned().unwrap_or_default())
    }

    async fn set_active(&self, group_id: i64, rule_id: i64, active: bool) -> Result<(), FatalError> {
        if let Some(records) = self.groups.write().get_mut(&group_id) {
            if let Some(record) = records.iter_mut().find(|r| r.id == rule_id) {
                record.active = active;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::RecordingPlatformClient;
    use crate::resolver::DefaultResolver;
    use crate::store::InMemoryStore;

    fn dispatcher_with_rule(source: &str) -> (Arc<EventDispatcher>, Arc<RecordingPlatformClient>) {
        let repo = Arc::new(InMemoryRuleRepository::new());
        repo.seed(
            1,
            RuleRecord {
                id: 1,
                source: source.to_string(),
                priority: 0,
                active: true,
            },
        );
        let platform = Arc::new(RecordingPlatformClient::new());
        let dispatcher = EventDispatcher::new(
            DispatcherConfig::default(),
            repo,
            Arc::new(DefaultResolver),
            platform.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
        );
        (dispatcher, platform)
    }

    #[tokio::test]
    async fn loads_and_caches_rules_per_group() {
        let (dispatcher, _) = dispatcher_with_rule(r#"WHEN message THEN { reply("hi"); } END"#);
        let rules = dispatcher.rules_for(1, &EventTag::Message).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(dispatcher.cache.read().contains_key(&1));
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let (dispatcher, _) = dispatcher_with_rule(r#"WHEN message THEN { reply("hi"); } END"#);
        dispatcher.rules_for(1, &EventTag::Message).await.unwrap();
        dispatcher.invalidate(1);
        assert!(!dispatcher.cache.read().contains_key(&1));
    }
}


