use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// A named, versioned bundle of rules evaluated together at a shared interval.
///
/// Identity is the triple `(tenant, namespace, name)`; a poll result
/// containing two groups with the same identity is undefined input and
/// adapters are free to reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub tenant: TenantId,
    pub namespace: String,
    pub name: String,
    /// When absent, the service-level default evaluation interval applies.
    #[serde(default, with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    pub rules: Vec<Rule>,
}

impl RuleGroup {
    pub fn identity(&self) -> (&TenantId, &str, &str) {
        (&self.tenant, &self.namespace, &self.name)
    }
}

/// An ordered sequence of [`RuleGroup`]s belonging to one tenant.
pub type RuleGroupList = Vec<RuleGroup>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Recording {
        record: String,
        expr: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        labels: HashMap<String, String>,
    },
    Alerting {
        alert: String,
        expr: String,
        #[serde(rename = "for", with = "humantime_serde")]
        for_: Duration,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        labels: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        annotations: HashMap<String, String>,
    },
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Recording { record, .. } => record,
            Rule::Alerting { alert, .. } => alert,
        }
    }

    pub fn expr(&self) -> &str {
        match self {
            Rule::Recording { expr, .. } => expr,
            Rule::Alerting { expr, .. } => expr,
        }
    }

    pub fn is_alerting(&self) -> bool {
        matches!(self, Rule::Alerting { .. })
    }
}
