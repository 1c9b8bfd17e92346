//! Backend HTTP client - identity probe and status snapshot
//!
//! Both calls absorb their failures: the monitor degrades to an empty
//! view rather than surfacing transport errors to the user. An
//! unauthorized response is not an error at all - the user may simply be
//! signed out.

use crate::job::{JobPhase, JobRecord};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of the session identity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// The session is valid; the monitor may start.
    Active,
    /// The identity endpoint answered with anything but success; the
    /// monitor stays inactive (fail closed, no retry).
    Expired,
    /// The endpoint could not be reached; skip this cycle and let the
    /// transport retry later.
    Unreachable,
}

/// Row in the status snapshot response.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRow {
    pub customer_id: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub task_id: String,
}

/// Response of the status snapshot endpoint. Either array may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub running: Vec<StatusRow>,
    #[serde(default)]
    pub queued: Vec<StatusRow>,
}

impl StatusResponse {
    /// Normalize into job records, one per customer.
    ///
    /// `running` is applied after `queued`, so a customer the server
    /// lists in both arrays ends up Running.
    pub fn into_records(self) -> Vec<JobRecord> {
        let mut records: HashMap<String, JobRecord> = HashMap::new();
        for (rows, phase) in [(self.queued, JobPhase::Queued), (self.running, JobPhase::Running)] {
            for row in rows {
                records.insert(
                    row.customer_id.clone(),
                    JobRecord::new(row.customer_id, row.company_name, row.task_id, phase),
                );
            }
        }
        records.into_values().collect()
    }
}

/// Client for the backend's session and analysis-status endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client targeting a backend base URL, e.g.
    /// `http://127.0.0.1:8700`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Backend base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the identity endpoint once.
    ///
    /// Only a success status authorizes the monitor; every other HTTP
    /// answer fails closed. A transport error is indeterminate and maps
    /// to [`SessionCheck::Unreachable`].
    pub async fn probe_session(&self) -> SessionCheck {
        let url = format!("{}/api/session", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => SessionCheck::Active,
            Ok(response) => {
                debug!(status = %response.status(), "session probe rejected");
                SessionCheck::Expired
            }
            Err(e) => {
                warn!("session probe failed: {e}");
                SessionCheck::Unreachable
            }
        }
    }

    /// Fetch the current queued and running analysis jobs.
    ///
    /// Any failure yields an empty set: 401/403 silently (the user is
    /// signed out), everything else with a warning. Retrying belongs to
    /// the caller's reconnect schedule, not this method.
    pub async fn fetch_status(&self) -> Vec<JobRecord> {
        let url = format!("{}/status", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("status fetch failed: {e}");
                return Vec::new();
            }
        };

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            debug!("status fetch unauthorized, treating as empty");
            return Vec::new();
        }
        if !status.is_success() {
            warn!(%status, "status fetch rejected");
            return Vec::new();
        }

        match response.json::<StatusResponse>().await {
            Ok(body) => body.into_records(),
            Err(e) => {
                warn!("malformed status response: {e}");
                Vec::new()
            }
        }
    }
}
