use crate::config::AppConfig;
use crate::cost::{empty_summary, CostWindow};
use crate::error::{FetchError, RefreshError};
use crate::models::{Dataset, Inventory, RefreshStats, Resource, ResourceClass, Snapshot};
use crate::providers::ProviderGateway;
use crate::store::SnapshotStore;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// A failed cost fetch aborts the cycle instead of degrading to empty.
    pub cost_required: bool,
    pub cost_window_days: u32,
    pub deadline: Duration,
}

impl From<&AppConfig> for RefreshPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            cost_required: cfg.cost_required,
            cost_window_days: cfg.cost_window_days,
            deadline: cfg.refresh_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    completed: u64,
    last: Option<Result<RefreshStats, RefreshError>>,
}

pub struct RefreshController {
    gateway: Arc<ProviderGateway>,
    store: Arc<SnapshotStore>,
    policy: RefreshPolicy,
    /// Held for the whole cycle; at most one refresh runs at a time.
    ledger: Mutex<Ledger>,
    /// Mirror of `Ledger::completed` readable without the lock.
    completed: AtomicU64,
    installed: AtomicU64,
}

impl RefreshController {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        store: Arc<SnapshotStore>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            policy,
            ledger: Mutex::new(Ledger::default()),
            completed: AtomicU64::new(0),
            installed: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Runs a full cycle and waits for it. If another cycle is already in
    /// flight, waits for that one instead and returns its outcome.
    pub async fn refresh_now(&self) -> Result<RefreshStats, RefreshError> {
        let seen = self.completed.load(Ordering::SeqCst);
        let mut ledger = self.ledger.lock().await;
        if ledger.completed > seen {
            if let Some(outcome) = ledger.last.clone() {
                debug!("sharing outcome of the refresh that was in flight");
                return outcome.map(|stats| RefreshStats {
                    shared: true,
                    ..stats
                });
            }
        }
        self.execute(&mut ledger).await
    }

    /// Timer entry point: `None` when a cycle is already running.
    pub async fn refresh_if_idle(&self) -> Option<Result<RefreshStats, RefreshError>> {
        let Ok(mut ledger) = self.ledger.try_lock() else {
            debug!("refresh already in flight; tick coalesced");
            return None;
        };
        Some(self.execute(&mut ledger).await)
    }

    async fn execute(&self, ledger: &mut Ledger) -> Result<RefreshStats, RefreshError> {
        let outcome = match tokio::time::timeout(self.policy.deadline, self.run_cycle()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RefreshError::DeadlineExceeded(self.policy.deadline)),
        };
        if let Err(err) = &outcome {
            error!(error = %err, "refresh failed; keeping previous snapshot");
        }
        ledger.completed += 1;
        ledger.last = Some(outcome.clone());
        self.completed.store(ledger.completed, Ordering::SeqCst);
        outcome
    }

    async fn run_cycle(&self) -> Result<RefreshStats, RefreshError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let window = CostWindow::trailing_from_now(self.policy.cost_window_days);
        info!(
            provider = self.gateway.provider_name(),
            cost_start = %window.start,
            cost_end = %window.end,
            "refresh started"
        );

        let (compute, databases, volumes, log_groups, cost) = tokio::join!(
            self.gateway.fetch_compute(),
            self.gateway.fetch_databases(),
            self.gateway.fetch_volumes(),
            self.gateway.fetch_log_groups(),
            self.gateway.fetch_costs(&window),
        );

        let mut degraded = Vec::new();
        let cost = match cost {
            Ok(summary) => summary,
            Err(err) if self.policy.cost_required => return Err(RefreshError::CostAborted(err)),
            Err(err) => {
                warn!(error = %err, "cost fetch failed; publishing an empty cost summary");
                degraded.push(Dataset::CostAndUsage);
                empty_summary(window)
            }
        };

        let mut inventory = Inventory::default();
        for (class, fetched) in [
            (ResourceClass::ComputeInstance, compute),
            (ResourceClass::ManagedDatabase, databases),
            (ResourceClass::BlockVolume, volumes),
            (ResourceClass::LogGroup, log_groups),
        ] {
            inventory.set_class(class, settle(class, fetched, &mut degraded));
        }
        degraded.sort();

        let cycle = self.installed.fetch_add(1, Ordering::SeqCst) + 1;
        let resources = inventory.counts();
        let cost_entries = cost.entries.len();
        let finished_at = Utc::now();
        self.store.replace(Snapshot {
            cycle,
            inventory,
            cost,
            last_refreshed: finished_at,
            degraded: degraded.clone(),
        });

        let stats = RefreshStats {
            cycle,
            started_at,
            finished_at,
            duration_ms: clock.elapsed().as_millis(),
            resources,
            cost_entries,
            degraded,
            shared: false,
        };
        info!(
            cycle,
            compute = resources.compute,
            databases = resources.databases,
            volumes = resources.volumes,
            log_groups = resources.log_groups,
            cost_entries,
            degraded = stats.degraded.len(),
            duration_ms = stats.duration_ms as u64,
            "refresh completed"
        );
        Ok(stats)
    }
}

/// A failed class publishes an empty list for this cycle.
fn settle(
    class: ResourceClass,
    fetched: Result<Vec<Resource>, FetchError>,
    degraded: &mut Vec<Dataset>,
) -> Vec<Resource> {
    match fetched {
        Ok(resources) => resources,
        Err(err) => {
            warn!(class = class.as_label(), error = %err, "resource fetch failed; class left empty");
            degraded.push(Dataset::Resources(class));
            Vec::new()
        }
    }
}

/// Background timer driving [`RefreshController::refresh_if_idle`]. The first
/// tick fires immediately; ticks missed while a refresh runs are dropped.
pub struct RefreshScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    pub fn spawn(controller: Arc<RefreshController>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = stop.changed() => {
                        info!("scheduler stopped during refresh; nothing installed");
                        break;
                    }
                    outcome = controller.refresh_if_idle() => {
                        if outcome.is_none() {
                            debug!("scheduled refresh skipped");
                        }
                    }
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "refresh scheduler started");
        Self { shutdown, handle }
    }

    /// Cancels any timer-driven refresh in flight and waits for the task.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "refresh scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{self, ScriptedAdapter};

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            cost_required: true,
            cost_window_days: 30,
            deadline: Duration::from_secs(5),
        }
    }

    fn controller(adapter: Arc<ScriptedAdapter>, policy: RefreshPolicy) -> (Arc<RefreshController>, Arc<SnapshotStore>) {
        let store = Arc::new(SnapshotStore::new());
        let gateway = Arc::new(ProviderGateway::new(adapter));
        let controller = Arc::new(RefreshController::new(gateway, store.clone(), policy));
        (controller, store)
    }

    #[tokio::test]
    async fn refresh_installs_snapshot_newer_than_invocation() {
        let (controller, store) = controller(Arc::new(testing::populated()), policy());
        let invoked = Utc::now();

        let stats = controller.refresh_now().await.expect("refresh succeeds");
        assert_eq!(stats.cycle, 1);
        assert!(!stats.shared);
        assert_eq!(stats.cost_entries, 1);

        let snap = store.current().expect("snapshot installed");
        assert!(snap.last_refreshed >= invoked);
        assert_eq!(snap.inventory.compute.len(), 1);
        assert_eq!(snap.cost.entries[0].amount, "12.3400");
        assert!(snap.degraded.is_empty());
    }

    #[tokio::test]
    async fn required_cost_failure_aborts_and_keeps_prior_snapshot() {
        let adapter = Arc::new(testing::populated());
        let (controller, store) = controller(adapter.clone(), policy());
        controller.refresh_now().await.expect("first refresh");
        let before = store.current().expect("first snapshot");

        adapter.set_failure(Dataset::CostAndUsage, "access denied");
        let err = controller.refresh_now().await.expect_err("cost failure aborts");
        match err {
            RefreshError::CostAborted(fetch) => {
                assert_eq!(fetch.target, "cost-and-usage");
                assert!(fetch.message.contains("access denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let after = store.current().expect("snapshot still present");
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn optional_cost_failure_degrades_to_empty_summary() {
        let adapter = Arc::new(testing::populated().failing(Dataset::CostAndUsage, "denied"));
        let (controller, store) = controller(
            adapter,
            RefreshPolicy {
                cost_required: false,
                ..policy()
            },
        );
        let stats = controller.refresh_now().await.expect("refresh succeeds");
        assert_eq!(stats.degraded, vec![Dataset::CostAndUsage]);
        let snap = store.current().expect("snapshot");
        assert!(snap.cost.entries.is_empty());
        assert_eq!(snap.inventory.counts().compute, 1);
    }

    #[tokio::test]
    async fn failed_class_is_empty_and_others_populated() {
        let adapter = Arc::new(
            testing::populated()
                .failing(Dataset::Resources(ResourceClass::ManagedDatabase), "throttled"),
        );
        let (controller, store) = controller(adapter, policy());

        let stats = controller.refresh_now().await.expect("refresh succeeds");
        assert_eq!(
            stats.degraded,
            vec![Dataset::Resources(ResourceClass::ManagedDatabase)]
        );

        let snap = store.current().expect("snapshot");
        assert!(snap.inventory.databases.is_empty());
        assert_eq!(snap.inventory.compute.len(), 1);
        assert_eq!(snap.inventory.volumes.len(), 1);
        assert_eq!(snap.inventory.log_groups.len(), 1);
    }

    #[tokio::test]
    async fn degraded_class_recovers_on_next_cycle() {
        let adapter = Arc::new(
            testing::populated().failing(Dataset::Resources(ResourceClass::BlockVolume), "throttled"),
        );
        let (controller, store) = controller(adapter.clone(), policy());

        let first = controller.refresh_now().await.expect("first refresh");
        assert_eq!(first.degraded, vec![Dataset::Resources(ResourceClass::BlockVolume)]);
        assert!(store.current().expect("snapshot").inventory.volumes.is_empty());

        adapter.clear_failures();
        let second = controller.refresh_now().await.expect("second refresh");
        assert!(second.degraded.is_empty());
        let snap = store.current().expect("snapshot");
        assert_eq!(snap.cycle, 2);
        assert_eq!(snap.inventory.volumes.len(), 1);
    }

    #[tokio::test]
    async fn ticks_during_a_running_refresh_are_coalesced() {
        let adapter = Arc::new(testing::populated().with_latency(Duration::from_millis(100)));
        let (controller, _store) = controller(adapter.clone(), policy());

        let (first, second) = tokio::join!(controller.refresh_if_idle(), controller.refresh_if_idle());
        let ran = [first, second].into_iter().flatten().count();

        assert_eq!(ran, 1);
        assert_eq!(adapter.calls(ResourceClass::ComputeInstance), 1);
        assert_eq!(adapter.cost_calls(), 1);
    }

    #[tokio::test]
    async fn explicit_refresh_during_cycle_shares_its_result() {
        let adapter = Arc::new(testing::populated().with_latency(Duration::from_millis(100)));
        let (controller, store) = controller(adapter.clone(), policy());

        let timer = controller.refresh_if_idle();
        let explicit = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.refresh_now().await
        };
        let (timer, explicit) = tokio::join!(timer, explicit);

        let timer = timer.expect("timer ran").expect("timer refresh ok");
        let explicit = explicit.expect("explicit refresh ok");
        assert!(explicit.shared);
        assert_eq!(explicit.cycle, timer.cycle);
        assert_eq!(adapter.calls(ResourceClass::ComputeInstance), 1);
        assert_eq!(store.current().expect("snapshot").cycle, 1);
    }

    #[tokio::test]
    async fn sequential_refreshes_each_run_a_cycle() {
        let adapter = Arc::new(testing::populated());
        let (controller, store) = controller(adapter.clone(), policy());
        controller.refresh_now().await.expect("first");
        let second = controller.refresh_now().await.expect("second");
        assert_eq!(second.cycle, 2);
        assert!(!second.shared);
        assert_eq!(adapter.calls(ResourceClass::BlockVolume), 2);
        assert_eq!(store.current().expect("snapshot").cycle, 2);
    }

    #[tokio::test]
    async fn deadline_overrun_installs_nothing() {
        let adapter = Arc::new(testing::populated().with_latency(Duration::from_millis(200)));
        let (controller, store) = controller(
            adapter,
            RefreshPolicy {
                deadline: Duration::from_millis(50),
                ..policy()
            },
        );
        let err = controller.refresh_now().await.expect_err("deadline exceeded");
        assert!(matches!(err, RefreshError::DeadlineExceeded(_)));
        assert!(store.read().is_none());
    }

    #[tokio::test]
    async fn scheduler_runs_once_per_busy_period_and_stop_cancels() {
        let adapter = Arc::new(testing::populated().with_latency(Duration::from_millis(300)));
        let (controller, store) = controller(adapter.clone(), policy());

        let scheduler = RefreshScheduler::spawn(controller, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(adapter.calls(ResourceClass::ComputeInstance), 1);
        assert!(store.read().is_none());
    }

    #[tokio::test]
    async fn scheduler_first_tick_warms_the_cache() {
        let adapter = Arc::new(testing::populated());
        let (controller, store) = controller(adapter, policy());

        let scheduler = RefreshScheduler::spawn(controller, Duration::from_secs(3600));
        for _ in 0..50 {
            if store.read().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await;
        assert_eq!(store.current().expect("warm snapshot").cycle, 1);
    }
}
