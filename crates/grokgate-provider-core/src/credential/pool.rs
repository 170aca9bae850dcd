use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::catalog::ModelCatalog;
use crate::clock::{Clock, SystemClock, duration_ms};
use crate::model::ModelClass;
use crate::persistence::StatusSink;
use crate::quota::QuotaTable;

use super::cooldown::CooldownRecord;
use super::status::{StatusMap, TokenStatus};
use super::{Credential, Tier};

#[derive(Debug, Clone)]
struct Entry {
    credential: Credential,
    tier: Tier,
    request_count: u32,
    created_at: i64,
    first_used_at: Option<i64>,
}

impl Entry {
    fn new(credential: Credential, tier: Tier, now_ms: i64) -> Self {
        Self {
            credential,
            tier,
            request_count: 0,
            created_at: now_ms,
            first_used_at: None,
        }
    }
}

#[derive(Default)]
struct PoolState {
    queues: BTreeMap<ModelClass, VecDeque<Entry>>,
    cooldown: Vec<CooldownRecord>,
    status: StatusMap,
    sweep: Option<JoinHandle<()>>,
}

impl PoolState {
    fn status_mut(&mut self, credential: &Credential, class: ModelClass) -> &mut TokenStatus {
        self.status
            .entry(credential.session_key().to_string())
            .or_default()
            .entry(class.as_str().to_string())
            .or_default()
    }

    fn in_cooldown(&self, credential: &Credential, class: ModelClass) -> bool {
        self.cooldown
            .iter()
            .any(|record| record.class == class && record.credential == *credential)
    }
}

pub struct PoolOptions {
    pub quotas: QuotaTable,
    pub catalog: Arc<ModelCatalog>,
    pub clock: Arc<dyn Clock>,
    pub sweep_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            quotas: QuotaTable::default(),
            catalog: Arc::new(ModelCatalog::default()),
            clock: Arc::new(SystemClock),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    quotas: QuotaTable,
    catalog: Arc<ModelCatalog>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn StatusSink>,
    sweep_interval: Duration,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().sweep.take() {
            handle.abort();
        }
    }
}

/// Rate-limited pool of upstream credentials, one FIFO queue per model class.
///
/// Every operation runs under a single pool-wide lock and never performs IO
/// while holding it; status snapshots are handed to the sink afterwards.
#[derive(Clone)]
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    pub fn new(options: PoolOptions, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                quotas: options.quotas,
                catalog: options.catalog,
                clock: options.clock,
                sink,
                sweep_interval: options.sweep_interval,
            }),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.inner.catalog
    }

    /// Seeds the status map from persistence. Entries already present win.
    pub async fn restore_status(&self, loaded: StatusMap) {
        let mut state = self.inner.state.lock().await;
        for (key, classes) in loaded {
            let target = state.status.entry(key).or_default();
            for (class, status) in classes {
                target.entry(class).or_insert(status);
            }
        }
    }

    /// Adds `credential` to every class of the tier's quota table it does not
    /// already hold. Returns whether any class gained an entry.
    pub async fn add(&self, credential: Credential, tier: Tier) -> bool {
        let mut state = self.inner.state.lock().await;
        let added = self.add_locked(&mut state, credential, tier);
        if added {
            self.persist(state).await;
        }
        added
    }

    /// Bulk ingestion at startup; does not persist.
    pub async fn add_bulk(&self, credentials: impl IntoIterator<Item = (Credential, Tier)>) -> usize {
        let mut state = self.inner.state.lock().await;
        credentials
            .into_iter()
            .filter(|(credential, tier)| self.add_locked(&mut state, credential.clone(), *tier))
            .count()
    }

    fn add_locked(&self, state: &mut PoolState, credential: Credential, tier: Tier) -> bool {
        let now = self.inner.clock.now_ms();
        let mut added = false;
        for class in self.inner.quotas.classes(tier) {
            if state.in_cooldown(&credential, class) {
                continue;
            }
            let queue = state.queues.entry(class).or_default();
            if queue.iter().any(|entry| entry.credential == credential) {
                continue;
            }
            queue.push_back(Entry::new(credential.clone(), tier, now));
            state.status_mut(&credential, class);
            added = true;
        }
        if added {
            debug!(event = "credential_added", key = %credential.key_prefix(), ?tier);
        }
        added
    }

    /// Returns the head credential for the model's class.
    ///
    /// With `peek` the pool is left untouched. Otherwise the head is counted
    /// against its quota; a head pushed past its ceiling is retired and the
    /// next head is returned instead.
    pub async fn next(&self, model_id: &str, peek: bool) -> Option<Credential> {
        let class = self.inner.catalog.normalize(model_id)?;
        let mut state = self.inner.state.lock().await;
        if peek {
            return state
                .queues
                .get(&class)
                .and_then(|queue| queue.front())
                .map(|entry| entry.credential.clone());
        }
        self.ensure_sweep(&mut state);
        let now = self.inner.clock.now_ms();
        let picked = self.next_locked(&mut state, class, now, true);
        self.persist(state).await;
        picked
    }

    fn next_locked(
        &self,
        state: &mut PoolState,
        class: ModelClass,
        now: i64,
        may_advance: bool,
    ) -> Option<Credential> {
        let entry = state.queues.get_mut(&class)?.front_mut()?;
        if entry.first_used_at.is_none() {
            entry.first_used_at = Some(now);
        }
        entry.request_count = entry.request_count.saturating_add(1);
        let credential = entry.credential.clone();
        let tier = entry.tier;
        let count = entry.request_count;
        let Some(quota) = self.inner.quotas.get(tier, class) else {
            return Some(credential);
        };

        if count > quota.ceiling {
            self.retire_locked(state, class, &credential, now);
            info!(
                event = "credential_quota_reached",
                class = %class,
                key = %credential.key_prefix(),
                ceiling = quota.ceiling
            );
            if may_advance {
                return self.next_locked(state, class, now, false);
            }
            return None;
        }

        let status = state.status_mut(&credential, class);
        if count >= quota.ceiling {
            status.invalidate(now);
        }
        status.total_request_count = status.total_request_count.saturating_add(1);
        Some(credential)
    }

    /// Moves `credential` from the class's active queue into cooldown.
    pub async fn retire(&self, model_id: &str, credential: &Credential) -> bool {
        let Some(class) = self.inner.catalog.normalize(model_id) else {
            return false;
        };
        let mut state = self.inner.state.lock().await;
        let now = self.inner.clock.now_ms();
        let retired = self.retire_locked(&mut state, class, credential, now);
        if retired {
            self.persist(state).await;
        }
        retired
    }

    fn retire_locked(
        &self,
        state: &mut PoolState,
        class: ModelClass,
        credential: &Credential,
        now: i64,
    ) -> bool {
        let Some(queue) = state.queues.get_mut(&class) else {
            return false;
        };
        let Some(idx) = queue
            .iter()
            .position(|entry| entry.credential == *credential)
        else {
            return false;
        };
        let Some(entry) = queue.remove(idx) else {
            return false;
        };
        state.cooldown.push(CooldownRecord {
            credential: entry.credential.clone(),
            class,
            retired_at: now,
            tier: entry.tier,
        });
        debug!(
            event = "credential_retired",
            class = %class,
            key = %credential.key_prefix(),
            age_ms = now.saturating_sub(entry.created_at)
        );
        state.status_mut(credential, class).invalidate(now);
        true
    }

    /// Gives back `count` requests charged to `credential` for the model's class.
    pub async fn refund(&self, model_id: &str, credential: &Credential, count: u32) -> bool {
        let Some(class) = self.inner.catalog.normalize(model_id) else {
            return false;
        };
        let mut state = self.inner.state.lock().await;
        let Some(entry) = state
            .queues
            .get_mut(&class)
            .and_then(|queue| queue.iter_mut().find(|entry| entry.credential == *credential))
        else {
            return false;
        };
        entry.request_count = entry.request_count.saturating_sub(count);
        let status = state.status_mut(credential, class);
        status.total_request_count = status.total_request_count.saturating_sub(u64::from(count));
        self.persist(state).await;
        true
    }

    /// Removes `credential` from every class, from cooldown and from the status map.
    pub async fn delete(&self, credential: &Credential) -> bool {
        let mut state = self.inner.state.lock().await;
        let mut removed = false;
        for queue in state.queues.values_mut() {
            let before = queue.len();
            queue.retain(|entry| entry.credential != *credential);
            removed |= queue.len() != before;
        }
        let before = state.cooldown.len();
        state
            .cooldown
            .retain(|record| record.credential != *credential);
        removed |= state.cooldown.len() != before;
        removed |= state.status.remove(credential.session_key()).is_some();
        if removed {
            info!(event = "credential_deleted", key = %credential.key_prefix());
            self.persist(state).await;
        }
        removed
    }

    /// Requests still available per class before any active entry hits its ceiling.
    pub async fn remaining_capacity(&self) -> BTreeMap<ModelClass, u64> {
        let state = self.inner.state.lock().await;
        let mut out = BTreeMap::new();
        for (class, queue) in &state.queues {
            let mut total: u64 = 0;
            let mut used: u64 = 0;
            for entry in queue {
                if let Some(quota) = self.inner.quotas.get(entry.tier, *class) {
                    total += u64::from(quota.ceiling);
                }
                used += u64::from(entry.request_count);
            }
            out.insert(*class, total.saturating_sub(used));
        }
        out
    }

    pub async fn status_snapshot(&self) -> StatusMap {
        self.inner.state.lock().await.status.clone()
    }

    pub async fn count_for_model(&self, model_id: &str) -> usize {
        let Some(class) = self.inner.catalog.normalize(model_id) else {
            return 0;
        };
        let state = self.inner.state.lock().await;
        state.queues.get(&class).map(VecDeque::len).unwrap_or(0)
    }

    /// Every credential known to the pool, active or cooling down, in first-seen order.
    pub async fn all_credentials(&self) -> Vec<Credential> {
        let state = self.inner.state.lock().await;
        let mut out: Vec<Credential> = Vec::new();
        let candidates = state
            .queues
            .values()
            .flat_map(|queue| queue.iter().map(|entry| &entry.credential))
            .chain(state.cooldown.iter().map(|record| &record.credential));
        for credential in candidates {
            if !out.contains(credential) {
                out.push(credential.clone());
            }
        }
        out
    }

    /// One sweep pass: reinstates cooled-down credentials whose window has
    /// elapsed and resets active entries whose window since first use has elapsed.
    pub async fn sweep(&self) {
        let mut state = self.inner.state.lock().await;
        let now = self.inner.clock.now_ms();
        let mut changed = 0usize;

        let records = std::mem::take(&mut state.cooldown);
        let mut remaining = Vec::with_capacity(records.len());
        for record in records {
            let Some(quota) = self.inner.quotas.get(record.tier, record.class) else {
                continue;
            };
            if !record.is_due(now, duration_ms(quota.window)) {
                remaining.push(record);
                continue;
            }
            let queue = state.queues.entry(record.class).or_default();
            if !queue.iter().any(|entry| entry.credential == record.credential) {
                queue.push_back(Entry::new(record.credential.clone(), record.tier, now));
            }
            state.status_mut(&record.credential, record.class).reset();
            changed += 1;
        }
        state.cooldown = remaining;

        let mut expired = Vec::new();
        for (class, queue) in state.queues.iter_mut() {
            for entry in queue.iter_mut() {
                let Some(first_used) = entry.first_used_at else {
                    continue;
                };
                let Some(quota) = self.inner.quotas.get(entry.tier, *class) else {
                    continue;
                };
                if now.saturating_sub(first_used) >= duration_ms(quota.window) {
                    entry.request_count = 0;
                    entry.first_used_at = None;
                    expired.push((entry.credential.clone(), *class));
                }
            }
        }
        for (credential, class) in &expired {
            state.status_mut(credential, *class).reset();
        }
        changed += expired.len();

        if changed > 0 {
            info!(event = "credential_sweep", restored = changed);
            self.persist(state).await;
        }
    }

    fn ensure_sweep(&self, state: &mut MutexGuard<'_, PoolState>) {
        if state.sweep.is_some() {
            return;
        }
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.sweep_interval;
        state.sweep = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip immediate tick; the first sweep runs one interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CredentialPool { inner }.sweep().await;
            }
        }));
    }

    /// Whether the background sweep has been started.
    pub async fn sweep_running(&self) -> bool {
        self.inner.state.lock().await.sweep.is_some()
    }

    /// Stops the background sweep task, if running.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.state.lock().await.sweep.take() {
            handle.abort();
        }
    }

    /// Hands the sink a snapshot before releasing the lock, so snapshots
    /// arrive in the order the mutations happened.
    async fn persist(&self, state: MutexGuard<'_, PoolState>) {
        self.inner.sink.submit(state.status.clone()).await;
        drop(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::NullStatusSink;

    fn pool_with(clock: Arc<ManualClock>) -> CredentialPool {
        CredentialPool::new(
            PoolOptions {
                clock,
                ..PoolOptions::default()
            },
            Arc::new(NullStatusSink),
        )
    }

    #[tokio::test]
    async fn add_is_idempotent_per_class() {
        let pool = pool_with(Arc::new(ManualClock::new(0)));
        let cred = Credential::from_sso("a");
        assert!(pool.add(cred.clone(), Tier::Normal).await);
        assert!(!pool.add(cred.clone(), Tier::Normal).await);
        assert_eq!(pool.count_for_model("grok-3").await, 1);
        assert_eq!(pool.count_for_model("grok-4-heavy").await, 0);
        let status = pool.status_snapshot().await;
        assert_eq!(status["a"].len(), 5);
    }

    #[tokio::test]
    async fn heavy_tier_gets_heavy_class() {
        let pool = pool_with(Arc::new(ManualClock::new(0)));
        pool.add(Credential::from_sso("h"), Tier::Heavy).await;
        assert_eq!(pool.count_for_model("grok-4-heavy").await, 1);
        assert_eq!(
            pool.remaining_capacity().await[&ModelClass::Grok4],
            40
        );
    }

    #[tokio::test]
    async fn peek_does_not_count() {
        let pool = pool_with(Arc::new(ManualClock::new(0)));
        pool.add(Credential::from_sso("a"), Tier::Normal).await;
        for _ in 0..3 {
            assert!(pool.next("grok-4", true).await.is_some());
        }
        assert!(!pool.sweep_running().await);
        assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok4], 20);
        pool.next("grok-4", false).await;
        assert!(pool.sweep_running().await);
        assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok4], 19);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn ceiling_marks_status_invalid_before_retiring() {
        let pool = pool_with(Arc::new(ManualClock::new(5)));
        let cred = Credential::from_sso("a");
        pool.add(cred.clone(), Tier::Normal).await;
        for _ in 0..20 {
            assert_eq!(pool.next("grok-4", false).await, Some(cred.clone()));
        }
        let status = pool.status_snapshot().await["a"]["grok-4"].clone();
        assert!(!status.is_valid);
        assert_eq!(status.invalidated_time, Some(5));
        assert_eq!(status.total_request_count, 20);
        assert_eq!(pool.next("grok-4", false).await, None);
        assert_eq!(pool.count_for_model("grok-4").await, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn refund_never_goes_negative() {
        let pool = pool_with(Arc::new(ManualClock::new(0)));
        let cred = Credential::from_sso("a");
        pool.add(cred.clone(), Tier::Normal).await;
        pool.next("grok-3", false).await;
        assert!(pool.refund("grok-3-search", &cred, 5).await);
        let status = pool.status_snapshot().await;
        assert_eq!(status["a"]["grok-3"].total_request_count, 0);
        assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok3], 100);
        assert!(!pool.refund("grok-3", &Credential::from_sso("zz"), 1).await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_model_yields_nothing() {
        let pool = pool_with(Arc::new(ManualClock::new(0)));
        pool.add(Credential::from_sso("a"), Tier::Normal).await;
        assert!(pool.next("claude-3", false).await.is_none());
        assert!(!pool.retire("claude-3", &Credential::from_sso("a")).await);
        assert_eq!(pool.count_for_model("claude-3").await, 0);
    }
}
