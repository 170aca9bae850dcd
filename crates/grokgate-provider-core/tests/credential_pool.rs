use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use grokgate_provider_core::{
    Credential, CredentialPool, ManualClock, ModelClass, ModelQuota, PoolOptions, QuotaTable,
    StatusMap, StatusSink, Tier,
};

const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct RecordingSink {
    snapshots: StdMutex<Vec<StatusMap>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    fn last(&self) -> Option<StatusMap> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn submit(&self, snapshot: StatusMap) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

fn build(clock: Arc<ManualClock>, sink: Arc<RecordingSink>) -> CredentialPool {
    CredentialPool::new(
        PoolOptions {
            clock,
            ..PoolOptions::default()
        },
        sink,
    )
}

fn small_quota() -> QuotaTable {
    QuotaTable::from_rows([
        (Tier::Normal, "grok-3", ModelQuota::new(2, 60)),
        (Tier::Normal, "grok-4", ModelQuota::new(3, 120)),
    ])
    .unwrap()
}

#[tokio::test]
async fn retires_after_ceiling_and_advances_to_next_head() {
    let clock = Arc::new(ManualClock::new(0));
    let pool = CredentialPool::new(
        PoolOptions {
            quotas: small_quota(),
            clock: clock.clone(),
            ..PoolOptions::default()
        },
        Arc::new(RecordingSink::default()),
    );
    let a = Credential::from_sso("aaaa");
    let b = Credential::from_sso("bbbb");
    pool.add_bulk([(a.clone(), Tier::Normal), (b.clone(), Tier::Normal)])
        .await;

    assert_eq!(pool.next("grok-3", false).await, Some(a.clone()));
    assert_eq!(pool.next("grok-3-search", false).await, Some(a.clone()));
    // Third call pushes `a` past its ceiling and hands out `b` instead.
    assert_eq!(pool.next("grok-3", false).await, Some(b.clone()));
    assert_eq!(pool.count_for_model("grok-3").await, 1);
    assert_eq!(pool.next("grok-3", false).await, Some(b.clone()));
    assert_eq!(pool.next("grok-3", false).await, None);
    assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok3], 0);
    // Other classes keep both credentials.
    assert_eq!(pool.count_for_model("grok-4").await, 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn cooldown_rejoins_only_after_full_window() {
    let clock = Arc::new(ManualClock::new(1_000));
    let pool = build(clock.clone(), Arc::new(RecordingSink::default()));
    let cred = Credential::from_sso("cool");
    pool.add(cred.clone(), Tier::Normal).await;

    assert!(pool.retire("grok-4", &cred).await);
    assert!(!pool.retire("grok-4", &cred).await);
    assert_eq!(pool.count_for_model("grok-4").await, 0);

    clock.advance(2 * HOUR - Duration::from_millis(1));
    pool.sweep().await;
    assert_eq!(pool.count_for_model("grok-4").await, 0);

    clock.advance(Duration::from_millis(1));
    pool.sweep().await;
    assert_eq!(pool.count_for_model("grok-4").await, 1);
    let status = pool.status_snapshot().await;
    let entry = &status["cool"]["grok-4"];
    assert!(entry.is_valid);
    assert_eq!(entry.invalidated_time, None);
    assert_eq!(entry.total_request_count, 0);
}

#[tokio::test]
async fn cooling_credential_is_not_re_added() {
    let clock = Arc::new(ManualClock::new(0));
    let pool = build(clock, Arc::new(RecordingSink::default()));
    let cred = Credential::from_sso("dup");
    pool.add(cred.clone(), Tier::Normal).await;
    pool.retire("grok-3", &cred).await;
    pool.add(cred.clone(), Tier::Normal).await;
    assert_eq!(pool.count_for_model("grok-3").await, 0);
    assert_eq!(pool.all_credentials().await, vec![cred]);
}

#[tokio::test]
async fn active_entry_resets_after_window_since_first_use() {
    let clock = Arc::new(ManualClock::new(0));
    let pool = build(clock.clone(), Arc::new(RecordingSink::default()));
    let cred = Credential::from_sso("roll");
    pool.add(cred.clone(), Tier::Normal).await;
    for _ in 0..5 {
        pool.next("grok-4", false).await;
    }
    assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok4], 15);

    clock.advance(HOUR);
    pool.sweep().await;
    assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok4], 15);

    clock.advance(HOUR);
    pool.sweep().await;
    assert_eq!(pool.remaining_capacity().await[&ModelClass::Grok4], 20);
    assert_eq!(
        pool.status_snapshot().await["roll"]["grok-4"].total_request_count,
        0
    );
    pool.shutdown().await;
}

#[tokio::test]
async fn delete_removes_everywhere_and_persists() {
    let clock = Arc::new(ManualClock::new(0));
    let sink = Arc::new(RecordingSink::default());
    let pool = build(clock, sink.clone());
    let keep = Credential::from_sso("keep");
    let gone = Credential::from_sso("gone");
    pool.add(keep.clone(), Tier::Normal).await;
    pool.add(gone.clone(), Tier::Heavy).await;
    pool.retire("grok-4", &gone).await;
    let before = sink.count();

    assert!(pool.delete(&gone).await);
    assert_eq!(sink.count(), before + 1);
    let last = sink.last().unwrap();
    assert!(last.contains_key("keep"));
    assert!(!last.contains_key("gone"));
    assert_eq!(pool.all_credentials().await, vec![keep]);
    assert!(!pool.delete(&gone).await);
}

#[tokio::test]
async fn bulk_add_skips_persistence_but_add_persists() {
    let sink = Arc::new(RecordingSink::default());
    let pool = build(Arc::new(ManualClock::new(0)), sink.clone());
    let added = pool
        .add_bulk([
            (Credential::from_sso("x"), Tier::Normal),
            (Credential::from_sso("x"), Tier::Normal),
        ])
        .await;
    assert_eq!(added, 1);
    assert_eq!(sink.count(), 0);
    pool.add(Credential::from_sso("y"), Tier::Normal).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn restore_keeps_loaded_counters() {
    let pool = build(Arc::new(ManualClock::new(0)), Arc::new(RecordingSink::default()));
    let loaded: StatusMap = serde_json::from_str(
        r#"{"old":{"grok-3":{"isValid":false,"invalidatedTime":42,"totalRequestCount":7}}}"#,
    )
    .unwrap();
    pool.restore_status(loaded).await;
    pool.add(Credential::from_sso("old"), Tier::Normal).await;
    let status = pool.status_snapshot().await;
    assert_eq!(status["old"]["grok-3"].total_request_count, 7);
    assert!(status["old"]["grok-4"].is_valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_next_never_overshoots_ceiling() {
    let pool = CredentialPool::new(
        PoolOptions {
            quotas: small_quota(),
            clock: Arc::new(ManualClock::new(0)),
            ..PoolOptions::default()
        },
        Arc::new(RecordingSink::default()),
    );
    for idx in 0..4 {
        pool.add(Credential::from_sso(&format!("c{idx}")), Tier::Normal)
            .await;
    }
    let mut handles = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.next("grok-4", false).await }));
    }
    let mut served = std::collections::HashMap::new();
    for handle in handles {
        if let Some(cred) = handle.await.unwrap() {
            *served.entry(cred.session_key().to_string()).or_insert(0u32) += 1;
        }
    }
    assert_eq!(served.values().sum::<u32>(), 12);
    assert!(served.values().all(|count| *count == 3));
    pool.shutdown().await;
}

/// Sink whose first delivery stalls, so an unordered hand-off would let the
/// second snapshot overtake it.
#[derive(Default)]
struct StallingSink {
    calls: std::sync::atomic::AtomicUsize,
    inner: RecordingSink,
}

#[async_trait]
impl StatusSink for StallingSink {
    async fn submit(&self, snapshot: StatusMap) {
        if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.submit(snapshot).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshots_reach_the_sink_in_mutation_order() {
    let sink = Arc::new(StallingSink::default());
    let pool = CredentialPool::new(
        PoolOptions {
            clock: Arc::new(ManualClock::new(0)),
            ..PoolOptions::default()
        },
        sink.clone(),
    );
    pool.add_bulk([(Credential::from_sso("solo"), Tier::Normal)]).await;

    let first = tokio::spawn({
        let pool = pool.clone();
        async move { pool.next("grok-3", false).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let pool = pool.clone();
        async move { pool.next("grok-3", false).await }
    });
    assert!(first.await.unwrap().is_some());
    assert!(second.await.unwrap().is_some());

    let live = pool.status_snapshot().await;
    assert_eq!(live["solo"]["grok-3"].total_request_count, 2);
    let counts: Vec<u64> = sink
        .inner
        .snapshots
        .lock()
        .unwrap()
        .iter()
        .map(|map| map["solo"]["grok-3"].total_request_count)
        .collect();
    assert_eq!(counts, vec![1, 2]);
    pool.shutdown().await;
}
