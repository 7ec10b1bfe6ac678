use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;

/// Wire-level snapshot of one running rule group, as returned by the rule
/// inspection RPC (local or aggregated across the ring).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroupDesc {
    pub name: String,
    pub namespace: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub last_evaluation: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub evaluation_duration: Duration,
    pub rules: Vec<RuleDesc>,
}

/// Wire-level snapshot of one rule's static definition plus live evaluator
/// state (health, last error, and — for alerting rules — active alerts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleDesc {
    Recording {
        record: String,
        expr: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        labels: HashMap<String, String>,
        health: RuleHealth,
        last_error: Option<String>,
    },
    Alerting {
        alert: String,
        expr: String,
        #[serde(with = "humantime_serde")]
        for_: Duration,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        labels: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        annotations: HashMap<String, String>,
        health: RuleHealth,
        last_error: Option<String>,
        alerts: Vec<Alert>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleHealth {
    Unknown,
    Ok,
    Error,
}
