//! Task registry - reconciles the status snapshot and the event stream
//! into one consistent view of in-flight analysis jobs
//!
//! Two producers feed the registry: a one-shot snapshot fetched at
//! activation and the live event stream. The two overlap and race; the
//! merge rules here keep the result free of duplicates, resurrected jobs,
//! and missed removals.

use crate::job::{JobPhase, JobRecord};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Registry of in-flight analysis jobs, keyed by customer id.
#[derive(Debug, Default)]
struct TaskRegistry {
    jobs: HashMap<String, JobRecord>,
    /// Customers that received a terminal signal while the current
    /// snapshot load was still outstanding. A snapshot row for one of
    /// these keys is stale by definition and must not be inserted.
    tombstones: HashSet<String>,
    /// True between `begin_cycle` and the snapshot result landing.
    snapshot_outstanding: bool,
    /// Current activation cycle; snapshot results tagged with an older
    /// cycle are discarded.
    generation: u64,
}

impl TaskRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite from a stream `started` event.
    ///
    /// Idempotent: a duplicate leaves one record with the latest task id
    /// and name. A start is strictly newer than any earlier terminal
    /// signal for the key, so its tombstone is dropped.
    fn upsert_started(&mut self, customer_id: &str, customer_name: &str, task_id: &str) {
        self.tombstones.remove(customer_id);
        let record = JobRecord::new(customer_id, customer_name, task_id, JobPhase::Running);
        if self.jobs.insert(customer_id.to_string(), record).is_none() {
            info!(%customer_id, "analysis started");
            debug!("{} job(s) in flight", self.jobs.len());
        } else {
            trace!(%customer_id, "analysis start re-announced");
        }
    }

    /// Merge one row of the point-in-time snapshot.
    ///
    /// A tombstoned key already finished after the snapshot was taken, so
    /// the row is skipped. An existing record only has its display name
    /// and timestamp refreshed: stream data is strictly newer, and a
    /// snapshot row never changes an observed phase.
    fn merge_snapshot_row(&mut self, row: JobRecord) {
        if self.tombstones.contains(&row.customer_id) {
            debug!(customer_id = %row.customer_id, "snapshot row superseded by terminal event");
            return;
        }
        match self.jobs.get_mut(&row.customer_id) {
            Some(existing) => {
                if !row.customer_name.is_empty() {
                    existing.customer_name = row.customer_name;
                }
                existing.observed_at = row.observed_at;
            }
            None => {
                info!(customer_id = %row.customer_id, phase = row.phase.as_str(), "analysis in flight");
                self.jobs.insert(row.customer_id.clone(), row);
            }
        }
    }

    /// Atomically test membership and remove.
    ///
    /// The returned record is the membership answer: callers decide on
    /// notifications from it, never from a registry read taken after the
    /// removal. While a snapshot load is outstanding, the key is recorded
    /// as tombstoned whether or not it was present.
    fn remove_if_present(&mut self, customer_id: &str) -> Option<JobRecord> {
        if self.snapshot_outstanding {
            self.tombstones.insert(customer_id.to_string());
        }
        let removed = self.jobs.remove(customer_id);
        if removed.is_some() {
            info!(%customer_id, "analysis finished");
            debug!("{} job(s) in flight", self.jobs.len());
        } else {
            trace!(%customer_id, "terminal event for untracked customer");
        }
        removed
    }

    /// Start a new activation cycle and return its generation tag.
    ///
    /// Existing records are kept: a reconnect must not wipe state that is
    /// still valid. Only the snapshot bookkeeping resets.
    fn begin_cycle(&mut self) -> u64 {
        self.generation += 1;
        self.snapshot_outstanding = true;
        self.tombstones.clear();
        self.generation
    }

    /// Apply a snapshot result tagged with the cycle it was fetched for.
    ///
    /// Returns false when the cycle has moved on and the rows were
    /// discarded.
    fn apply_snapshot(&mut self, generation: u64, rows: Vec<JobRecord>) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding stale snapshot result"
            );
            return false;
        }
        for row in rows {
            self.merge_snapshot_row(row);
        }
        self.snapshot_outstanding = false;
        self.tombstones.clear();
        true
    }

    /// Tear down: clear all records and invalidate any in-flight snapshot.
    fn invalidate(&mut self) {
        self.generation += 1;
        self.snapshot_outstanding = false;
        self.tombstones.clear();
        if !self.jobs.is_empty() {
            debug!("cleared {} tracked job(s)", self.jobs.len());
        }
        self.jobs.clear();
    }

    /// Current contents, sorted by customer id for stable presentation.
    fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
        jobs
    }

    fn contains(&self, customer_id: &str) -> bool {
        self.jobs.contains_key(customer_id)
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

/// Shared, observable registry handle.
///
/// Every mutation runs under one mutex and publishes the full contents
/// through a watch channel, so consumers replace-and-render. Dropping the
/// receiver unsubscribes.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<TaskRegistry>>,
    contents: Arc<watch::Sender<Vec<JobRecord>>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        let (contents, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Mutex::new(TaskRegistry::new())),
            contents: Arc::new(contents),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskRegistry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run a mutation and publish the resulting contents while still
    /// holding the lock, so published states follow application order.
    fn mutate<T>(&self, f: impl FnOnce(&mut TaskRegistry) -> T) -> T {
        let mut registry = self.lock();
        let result = f(&mut registry);
        self.contents.send_replace(registry.jobs());
        result
    }

    /// Idempotent upsert from a stream `started` event.
    pub fn upsert_started(&self, customer_id: &str, customer_name: &str, task_id: &str) {
        self.mutate(|r| r.upsert_started(customer_id, customer_name, task_id));
    }

    /// Atomic test-and-remove for a terminal event.
    pub fn remove_if_present(&self, customer_id: &str) -> Option<JobRecord> {
        self.mutate(|r| r.remove_if_present(customer_id))
    }

    /// Start a new activation cycle; returns the generation tag the
    /// snapshot result must carry.
    pub fn begin_cycle(&self) -> u64 {
        self.lock().begin_cycle()
    }

    /// Merge a snapshot result; stale generations are discarded.
    pub fn apply_snapshot(&self, generation: u64, rows: Vec<JobRecord>) -> bool {
        self.mutate(|r| r.apply_snapshot(generation, rows))
    }

    /// Clear everything and invalidate in-flight snapshot results.
    pub fn invalidate(&self) {
        self.mutate(|r| r.invalidate());
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.lock().jobs()
    }

    pub fn contains(&self, customer_id: &str) -> bool {
        self.lock().contains(customer_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to the full contents; the receiver sees every published
    /// state from now on.
    pub fn subscribe(&self) -> watch::Receiver<Vec<JobRecord>> {
        self.contents.subscribe()
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(customer_id: &str, name: &str, task_id: &str, phase: JobPhase) -> JobRecord {
        JobRecord::new(customer_id, name, task_id, phase)
    }

    #[test]
    fn started_inserts_running_record() {
        let registry = SharedRegistry::new();
        registry.upsert_started("c1", "Acme", "t1");

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].customer_id, "c1");
        assert_eq!(jobs[0].phase, JobPhase::Running);
    }

    #[test]
    fn duplicate_start_keeps_one_record_with_latest_task_id() {
        let registry = SharedRegistry::new();
        registry.upsert_started("c1", "Acme", "t1");
        registry.upsert_started("c1", "Acme Corp", "t2");

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id, "t2");
        assert_eq!(jobs[0].customer_name, "Acme Corp");
    }

    #[test]
    fn remove_returns_the_tracked_record() {
        let registry = SharedRegistry::new();
        registry.upsert_started("c1", "Acme", "t1");

        let removed = registry.remove_if_present("c1");
        assert_eq!(removed.map(|r| r.customer_name), Some("Acme".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_of_untracked_customer_is_a_noop() {
        let registry = SharedRegistry::new();
        registry.upsert_started("c1", "Acme", "t1");

        assert!(registry.remove_if_present("c2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_remove_returns_none() {
        let registry = SharedRegistry::new();
        registry.upsert_started("c1", "Acme", "t1");

        assert!(registry.remove_if_present("c1").is_some());
        assert!(registry.remove_if_present("c1").is_none());
    }

    #[test]
    fn snapshot_populates_empty_registry() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();

        let applied = registry.apply_snapshot(
            generation,
            vec![
                row("c1", "Acme", "t1", JobPhase::Running),
                row("c2", "Globex", "t2", JobPhase::Queued),
            ],
        );
        assert!(applied);

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].customer_id, "c1");
        assert_eq!(jobs[0].phase, JobPhase::Running);
        assert_eq!(jobs[1].customer_id, "c2");
        assert_eq!(jobs[1].phase, JobPhase::Queued);
    }

    #[test]
    fn terminal_event_beats_slower_snapshot_row() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();

        // The job finished while the snapshot request was in flight; the
        // snapshot still enumerates it as running.
        assert!(registry.remove_if_present("c1").is_none());
        registry.apply_snapshot(generation, vec![row("c1", "Acme", "t1", JobPhase::Running)]);

        assert!(registry.is_empty());
    }

    #[test]
    fn started_event_clears_an_earlier_tombstone() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();

        registry.remove_if_present("c1");
        registry.upsert_started("c1", "Acme", "t2");
        registry.apply_snapshot(generation, vec![row("c1", "Acme", "t2", JobPhase::Running)]);

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn tombstones_do_not_outlive_the_snapshot() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();
        registry.remove_if_present("c1");
        registry.apply_snapshot(generation, Vec::new());

        // Steady state after the snapshot landed: the next cycle starts
        // clean and the key is insertable again.
        let generation = registry.begin_cycle();
        registry.apply_snapshot(generation, vec![row("c1", "Acme", "t9", JobPhase::Queued)]);
        assert!(registry.contains("c1"));
    }

    #[test]
    fn snapshot_row_does_not_change_phase_of_tracked_job() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();
        registry.upsert_started("c1", "Acme", "t1");

        registry.apply_snapshot(
            generation,
            vec![row("c1", "Acme Corp", "t1", JobPhase::Queued)],
        );

        let jobs = registry.jobs();
        assert_eq!(jobs[0].phase, JobPhase::Running);
        assert_eq!(jobs[0].customer_name, "Acme Corp");
    }

    #[test]
    fn snapshot_row_with_empty_name_keeps_existing_name() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();
        registry.upsert_started("c1", "Acme", "t1");

        registry.apply_snapshot(generation, vec![row("c1", "", "t1", JobPhase::Running)]);

        assert_eq!(registry.jobs()[0].customer_name, "Acme");
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let registry = SharedRegistry::new();
        let stale = registry.begin_cycle();
        let _current = registry.begin_cycle();

        let applied =
            registry.apply_snapshot(stale, vec![row("c1", "Acme", "t1", JobPhase::Running)]);
        assert!(!applied);
        assert!(registry.is_empty());
    }

    #[test]
    fn invalidate_clears_and_discards_in_flight_snapshot() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();
        registry.upsert_started("c1", "Acme", "t1");

        registry.invalidate();
        assert!(registry.is_empty());

        let applied =
            registry.apply_snapshot(generation, vec![row("c2", "Globex", "t2", JobPhase::Queued)]);
        assert!(!applied);
        assert!(registry.is_empty());
    }

    #[test]
    fn reconnect_cycle_keeps_existing_records() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();
        registry.apply_snapshot(generation, vec![row("c1", "Acme", "t1", JobPhase::Running)]);

        // New connection, new cycle: the still-valid record survives and
        // the fresh snapshot is a no-op merge, not a duplicate.
        let generation = registry.begin_cycle();
        registry.apply_snapshot(generation, vec![row("c1", "Acme", "t1", JobPhase::Running)]);

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn keys_stay_unique_under_mixed_operations() {
        let registry = SharedRegistry::new();
        let generation = registry.begin_cycle();

        registry.upsert_started("c1", "Acme", "t1");
        registry.apply_snapshot(
            generation,
            vec![
                row("c1", "Acme", "t1", JobPhase::Queued),
                row("c2", "Globex", "t2", JobPhase::Running),
            ],
        );
        registry.upsert_started("c2", "Globex", "t3");
        registry.remove_if_present("c1");
        registry.upsert_started("c1", "Acme", "t4");

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 2);
        let ids: Vec<&str> = jobs.iter().map(|j| j.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn subscribers_see_every_mutation() {
        let registry = SharedRegistry::new();
        let rx = registry.subscribe();
        assert!(rx.borrow().is_empty());

        registry.upsert_started("c1", "Acme", "t1");
        assert_eq!(rx.borrow().len(), 1);

        registry.remove_if_present("c1");
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn contents_are_sorted_by_customer_id() {
        let registry = SharedRegistry::new();
        registry.upsert_started("beta", "B", "t2");
        registry.upsert_started("alpha", "A", "t1");

        let jobs = registry.jobs();
        let ids: Vec<&str> = jobs.iter().map(|j| j.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
