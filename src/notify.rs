//! Completion notices - transient, deduplicated, auto-expiring
//!
//! A notice fires only when the registry actually held a record for the
//! customer at the moment of removal; the atomic test-and-remove result
//! is the sole membership evidence. Live notices replace rather than
//! stack per customer, and expire on a configurable timer.

use crate::job::JobRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Convert an Instant to a Unix timestamp (seconds since epoch)
fn instant_to_unix_timestamp(instant: Instant) -> u64 {
    let elapsed = Instant::now().saturating_duration_since(instant);
    let system_time = std::time::SystemTime::now() - elapsed;
    system_time
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Kind of notice, which determines its display duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// An analysis finished successfully
    Success,
    /// Informational: an analysis ended without a result
    Info,
}

/// A transient user-facing notice about one customer's analysis.
#[derive(Debug, Clone)]
pub struct Notice {
    pub customer_id: String,
    pub customer_name: String,
    pub kind: NoticeKind,
    pub fired_at: Instant,
    pub expires_at: Instant,
}

impl Notice {
    /// Unix timestamp of the firing instant, for display.
    pub fn fired_at_unix(&self) -> u64 {
        instant_to_unix_timestamp(self.fired_at)
    }
}

/// Display durations per notice kind.
#[derive(Debug, Clone, Copy)]
pub struct NoticeDurations {
    pub success: Duration,
    pub info: Duration,
}

impl Default for NoticeDurations {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(5),
            info: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
struct NotifierState {
    active: HashMap<String, Notice>,
    durations: NoticeDurations,
}

/// Decides which removals surface as notices and keeps the live set.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Mutex<NotifierState>>,
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(durations: NoticeDurations) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Mutex::new(NotifierState {
                active: HashMap::new(),
                durations,
            })),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A `completed` event removed (or failed to remove) a record.
    ///
    /// Fires a success notice only for a removal that actually happened.
    /// The event's customer name, when present, is fresher than the
    /// stored one and wins.
    pub fn completion(&self, removed: Option<JobRecord>, fresh_name: &str) -> Option<Notice> {
        self.fire(removed, fresh_name, NoticeKind::Success)
    }

    /// A `failed` event removed (or failed to remove) a record.
    ///
    /// A tracked job that fails surfaces as an informational notice,
    /// never a success one.
    pub fn failure(&self, removed: Option<JobRecord>) -> Option<Notice> {
        self.fire(removed, "", NoticeKind::Info)
    }

    fn fire(
        &self,
        removed: Option<JobRecord>,
        fresh_name: &str,
        kind: NoticeKind,
    ) -> Option<Notice> {
        let record = match removed {
            Some(record) => record,
            None => {
                debug!("terminal signal for untracked customer, no notice");
                return None;
            }
        };

        let customer_name = if fresh_name.is_empty() {
            record.customer_name
        } else {
            fresh_name.to_string()
        };

        let mut state = self.lock();
        let now = Instant::now();
        let ttl = match kind {
            NoticeKind::Success => state.durations.success,
            NoticeKind::Info => state.durations.info,
        };
        let notice = Notice {
            customer_id: record.customer_id.clone(),
            customer_name,
            kind,
            fired_at: now,
            expires_at: now + ttl,
        };

        info!(customer_id = %notice.customer_id, kind = ?kind, "notice fired");
        // Replace any live notice for the same customer
        state.active.insert(record.customer_id, notice.clone());
        drop(state);

        let _ = self.tx.send(notice.clone());
        Some(notice)
    }

    /// Live (non-expired) notices, most recent first.
    pub fn active(&self) -> Vec<Notice> {
        let now = Instant::now();
        let state = self.lock();
        let mut notices: Vec<Notice> = state
            .active
            .values()
            .filter(|n| n.expires_at > now)
            .cloned()
            .collect();
        notices.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        notices
    }

    /// Drop expired notices from the live set.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock().active.retain(|_, n| n.expires_at > now);
    }

    /// Earliest instant at which a live notice expires, or `None` when
    /// the live set is empty.
    pub fn next_expiry_at(&self) -> Option<Instant> {
        self.lock().active.values().map(|n| n.expires_at).min()
    }

    /// Subscribe to notices as they fire.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Drop all live notices (teardown).
    pub fn clear(&self) {
        self.lock().active.clear();
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(NoticeDurations::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPhase;

    fn record(customer_id: &str, name: &str) -> JobRecord {
        JobRecord::new(customer_id, name, "t1", JobPhase::Running)
    }

    #[test]
    fn completion_of_tracked_job_fires_once() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        let notice = notifier.completion(Some(record("c1", "Acme")), "");
        assert!(notice.is_some());
        assert_eq!(notifier.active().len(), 1);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.customer_id, "c1");
        assert_eq!(received.kind, NoticeKind::Success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn completion_of_untracked_job_fires_nothing() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        assert!(notifier.completion(None, "Acme").is_none());
        assert!(notifier.active().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fresh_name_from_the_event_wins() {
        let notifier = Notifier::default();
        let notice = notifier
            .completion(Some(record("c1", "Acme")), "Acme Corp")
            .unwrap();
        assert_eq!(notice.customer_name, "Acme Corp");
    }

    #[test]
    fn stored_name_used_when_event_has_none() {
        let notifier = Notifier::default();
        let notice = notifier.completion(Some(record("c1", "Acme")), "").unwrap();
        assert_eq!(notice.customer_name, "Acme");
    }

    #[test]
    fn failure_fires_an_info_notice() {
        let notifier = Notifier::default();
        let notice = notifier.failure(Some(record("c1", "Acme"))).unwrap();
        assert_eq!(notice.kind, NoticeKind::Info);
    }

    #[test]
    fn failure_of_untracked_job_fires_nothing() {
        let notifier = Notifier::default();
        assert!(notifier.failure(None).is_none());
    }

    #[test]
    fn new_notice_replaces_the_previous_one() {
        let notifier = Notifier::default();
        notifier.completion(Some(record("c1", "Acme")), "");
        notifier.completion(Some(record("c1", "Acme")), "Acme Corp");

        let active = notifier.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].customer_name, "Acme Corp");
    }

    #[test]
    fn notices_for_different_customers_coexist() {
        let notifier = Notifier::default();
        notifier.completion(Some(record("c1", "Acme")), "");
        notifier.completion(Some(record("c2", "Globex")), "");
        assert_eq!(notifier.active().len(), 2);
    }

    #[test]
    fn expired_notices_are_not_listed() {
        let notifier = Notifier::default();
        notifier.completion(Some(record("c1", "Acme")), "");

        // Expire it manually
        {
            let mut state = notifier.lock();
            let notice = state.active.get_mut("c1").unwrap();
            notice.expires_at = Instant::now() - Duration::from_secs(1);
        }

        assert!(notifier.active().is_empty());
    }

    #[test]
    fn purge_drops_expired_notices() {
        let notifier = Notifier::default();
        notifier.completion(Some(record("c1", "Acme")), "");
        notifier.completion(Some(record("c2", "Globex")), "");

        {
            let mut state = notifier.lock();
            let notice = state.active.get_mut("c1").unwrap();
            notice.expires_at = Instant::now() - Duration::from_secs(1);
        }

        notifier.purge_expired();
        let state = notifier.lock();
        assert_eq!(state.active.len(), 1);
        assert!(state.active.contains_key("c2"));
    }

    #[test]
    fn next_expiry_returns_earliest() {
        let notifier = Notifier::new(NoticeDurations::default());
        assert!(notifier.next_expiry_at().is_none());

        notifier.failure(Some(record("c1", "Acme")));
        notifier.completion(Some(record("c2", "Globex")), "");

        // Info (3 s) expires before Success (5 s)
        let earliest = notifier.next_expiry_at().unwrap();
        let info_expiry = notifier.lock().active.get("c1").unwrap().expires_at;
        assert_eq!(earliest, info_expiry);
    }

    #[test]
    fn durations_follow_the_kind() {
        let durations = NoticeDurations {
            success: Duration::from_secs(10),
            info: Duration::from_secs(2),
        };
        let notifier = Notifier::new(durations);

        let success = notifier.completion(Some(record("c1", "Acme")), "").unwrap();
        assert_eq!(success.expires_at - success.fired_at, Duration::from_secs(10));

        let info = notifier.failure(Some(record("c2", "Globex"))).unwrap();
        assert_eq!(info.expires_at - info.fired_at, Duration::from_secs(2));
    }

    #[test]
    fn clear_drops_all_live_notices() {
        let notifier = Notifier::default();
        notifier.completion(Some(record("c1", "Acme")), "");
        notifier.clear();
        assert!(notifier.active().is_empty());
    }

    #[test]
    fn fired_at_unix_is_plausible() {
        let notifier = Notifier::default();
        let notice = notifier.completion(Some(record("c1", "Acme")), "").unwrap();
        assert!(notice.fired_at_unix() > 0);
    }
}
