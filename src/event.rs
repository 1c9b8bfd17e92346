//! Stream event wire model
//!
//! The transport delivers topic-addressed JSON frames; this module maps
//! them onto the typed [`TaskEvent`]s consumed by the registry. Unknown
//! topics are skipped, malformed payloads are rejected without touching
//! any state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic announcing a newly started analysis job.
pub const TOPIC_STARTED: &str = "analysis.started";
/// Topic announcing a successfully finished analysis job.
pub const TOPIC_COMPLETED: &str = "analysis.completed";
/// Topic announcing a failed analysis job.
pub const TOPIC_FAILED: &str = "analysis.failed";

/// All topics the monitor subscribes to.
pub const TOPICS: &[&str] = &[TOPIC_STARTED, TOPIC_COMPLETED, TOPIC_FAILED];

/// A raw frame from the event stream: a topic plus its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

impl StreamEnvelope {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

/// Lifecycle event for a customer's analysis job.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A job moved into execution (or was re-announced; duplicates are fine)
    Started {
        customer_id: String,
        customer_name: String,
        task_id: String,
    },
    /// A job finished successfully
    Completed {
        customer_id: String,
        customer_name: String,
    },
    /// A job failed
    Failed { customer_id: String },
}

impl TaskEvent {
    /// Get the customer id from any event
    pub fn customer_id(&self) -> &str {
        match self {
            Self::Started { customer_id, .. }
            | Self::Completed { customer_id, .. }
            | Self::Failed { customer_id } => customer_id,
        }
    }

    /// Map a stream envelope onto a task event.
    ///
    /// Returns `Ok(None)` for topics the monitor does not understand.
    pub fn from_envelope(envelope: &StreamEnvelope) -> Result<Option<Self>, EventError> {
        match envelope.topic.as_str() {
            TOPIC_STARTED => {
                let payload: StartedPayload = parse(&envelope.topic, &envelope.data)?;
                require_customer_id(&envelope.topic, &payload.customer_id)?;
                Ok(Some(Self::Started {
                    customer_id: payload.customer_id,
                    customer_name: payload.customer_name,
                    task_id: payload.task_id,
                }))
            }
            TOPIC_COMPLETED => {
                let payload: CompletedPayload = parse(&envelope.topic, &envelope.data)?;
                require_customer_id(&envelope.topic, &payload.customer_id)?;
                Ok(Some(Self::Completed {
                    customer_id: payload.customer_id,
                    customer_name: payload.customer_name,
                }))
            }
            TOPIC_FAILED => {
                let payload: FailedPayload = parse(&envelope.topic, &envelope.data)?;
                require_customer_id(&envelope.topic, &payload.customer_id)?;
                Ok(Some(Self::Failed {
                    customer_id: payload.customer_id,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Error raised for a frame on a known topic that cannot be applied.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed {topic} payload: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{topic} payload has no customer_id")]
    MissingCustomerId { topic: String },
}

#[derive(Deserialize)]
struct StartedPayload {
    customer_id: String,
    #[serde(default)]
    customer_name: String,
    #[serde(default)]
    task_id: String,
}

#[derive(Deserialize)]
struct CompletedPayload {
    customer_id: String,
    #[serde(default)]
    customer_name: String,
}

#[derive(Deserialize)]
struct FailedPayload {
    customer_id: String,
}

fn parse<'de, T: Deserialize<'de>>(topic: &str, data: &'de Value) -> Result<T, EventError> {
    T::deserialize(data).map_err(|source| EventError::Malformed {
        topic: topic.to_string(),
        source,
    })
}

fn require_customer_id(topic: &str, customer_id: &str) -> Result<(), EventError> {
    if customer_id.is_empty() {
        return Err(EventError::MissingCustomerId {
            topic: topic.to_string(),
        });
    }
    Ok(())
}
