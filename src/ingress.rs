//! Event ingress - applies stream envelopes to the registry
//!
//! One ingress task runs per live stream connection. Uninstalling aborts
//! the task; reinstalling against a non-empty registry is safe because
//! every application is idempotent.

use crate::event::{StreamEnvelope, TaskEvent};
use crate::notify::Notifier;
use crate::registry::SharedRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Handle to an installed ingress task.
///
/// Dropping the handle (or calling [`uninstall`](Self::uninstall)) stops
/// consumption; the sender side then observes a closed channel.
pub struct IngressHandle {
    task: JoinHandle<()>,
}

impl IngressHandle {
    pub fn uninstall(self) {
        self.task.abort();
    }
}

impl Drop for IngressHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Install the ingress: consume envelopes until the channel closes or the
/// handle is dropped.
pub fn install(
    mut events: mpsc::Receiver<StreamEnvelope>,
    registry: SharedRegistry,
    notifier: Notifier,
) -> IngressHandle {
    let task = tokio::spawn(async move {
        while let Some(envelope) = events.recv().await {
            apply_envelope(&registry, &notifier, &envelope);
        }
        debug!("event stream closed, ingress stopping");
    });
    IngressHandle { task }
}

/// Apply one raw envelope: parse, then route. Malformed payloads are
/// dropped without touching any state.
pub fn apply_envelope(registry: &SharedRegistry, notifier: &Notifier, envelope: &StreamEnvelope) {
    match TaskEvent::from_envelope(envelope) {
        Ok(Some(event)) => apply_event(registry, notifier, event),
        Ok(None) => trace!(topic = %envelope.topic, "ignoring unknown topic"),
        Err(e) => warn!(topic = %envelope.topic, "dropping event: {e}"),
    }
}

/// Apply one parsed event to the registry and notification policy.
pub fn apply_event(registry: &SharedRegistry, notifier: &Notifier, event: TaskEvent) {
    trace!(customer_id = %event.customer_id(), "stream event");
    match event {
        TaskEvent::Started {
            customer_id,
            customer_name,
            task_id,
        } => {
            registry.upsert_started(&customer_id, &customer_name, &task_id);
        }
        TaskEvent::Completed {
            customer_id,
            customer_name,
        } => {
            let removed = registry.remove_if_present(&customer_id);
            notifier.completion(removed, &customer_name);
        }
        TaskEvent::Failed { customer_id } => {
            let removed = registry.remove_if_present(&customer_id);
            notifier.failure(removed);
        }
    }
}
