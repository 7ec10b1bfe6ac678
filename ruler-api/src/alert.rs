use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle state of a single alert instance (one label-set of an
/// [`crate::Rule::Alerting`] rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertState {
    Inactive,
    Pending,
    Firing,
}

/// Evaluator-internal alert state, exposed read-only via the inspection RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub value: f64,
    pub state: AlertState,
    pub active_at: Option<DateTime<Utc>>,
    pub fired_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Alert {
    /// True for alerts the notifier pool is permitted to enqueue: `Pending`
    /// alerts are filtered out before they ever reach a notifier queue.
    pub fn is_firing(&self) -> bool {
        matches!(self.state, AlertState::Firing)
    }
}
