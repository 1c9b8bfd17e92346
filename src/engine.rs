//! Engine - owns the registry and drives the activation lifecycle
//!
//! One activation cycle: identity gate, then snapshot load and event
//! ingress for a live connection. The engine is an explicitly
//! constructed service; its registry exists only as long as the engine
//! does and is cleared on shutdown.

use crate::api::{ApiClient, SessionCheck};
use crate::event::StreamEnvelope;
use crate::ingress::{self, IngressHandle};
use crate::job::JobRecord;
use crate::notify::{Notice, NoticeDurations, Notifier};
use crate::registry::SharedRegistry;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

/// Outcome of an activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The gate passed; snapshot load and ingress are running.
    Started,
    /// The session is not authorized; nothing was started.
    Denied,
    /// The identity endpoint was unreachable; try again later.
    Unavailable,
}

pub struct Engine {
    api: ApiClient,
    registry: SharedRegistry,
    notifier: Notifier,
    ingress: Mutex<Option<IngressHandle>>,
}

impl Engine {
    pub fn new(api: ApiClient, durations: NoticeDurations) -> Self {
        Self {
            api,
            registry: SharedRegistry::new(),
            notifier: Notifier::new(durations),
            ingress: Mutex::new(None),
        }
    }

    /// Run one activation cycle against a live connection's envelopes.
    ///
    /// The identity gate runs first and fails closed: anything but an
    /// authorized session leaves the engine untouched. On success the
    /// ingress is installed before the snapshot resolves; the registry's
    /// merge rules reconcile the overlap between the two sources.
    pub async fn activate(&self, events: mpsc::Receiver<StreamEnvelope>) -> Activation {
        match self.api.probe_session().await {
            SessionCheck::Active => {}
            SessionCheck::Expired => {
                debug!("session not authorized, monitor stays inactive");
                return Activation::Denied;
            }
            SessionCheck::Unreachable => {
                return Activation::Unavailable;
            }
        }

        let generation = self.registry.begin_cycle();
        info!(generation, "activation started");

        let handle = ingress::install(events, self.registry.clone(), self.notifier.clone());
        self.replace_ingress(Some(handle));

        let api = self.api.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let rows = api.fetch_status().await;
            registry.apply_snapshot(generation, rows);
        });

        Activation::Started
    }

    /// Uninstall the ingress but keep the registry: the stream dropped
    /// and a reconnect is expected to resume from current state.
    pub fn suspend(&self) {
        if let Some(handle) = self.replace_ingress(None) {
            handle.uninstall();
            debug!("ingress uninstalled");
        }
    }

    /// Tear down: uninstall the ingress, clear the registry, and
    /// invalidate any snapshot still in flight.
    pub fn shutdown(&self) {
        self.suspend();
        self.registry.invalidate();
        self.notifier.clear();
        info!("monitor shut down");
    }

    /// Jobs currently believed to be in flight.
    pub fn current_jobs(&self) -> Vec<JobRecord> {
        self.registry.jobs()
    }

    /// Observe the registry contents; each mutation publishes the full
    /// list (replace-and-render).
    pub fn subscribe(&self) -> watch::Receiver<Vec<JobRecord>> {
        self.registry.subscribe()
    }

    /// Observe notices as they fire.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn replace_ingress(&self, handle: Option<IngressHandle>) -> Option<IngressHandle> {
        let mut guard = match self.ingress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, handle)
    }
}
