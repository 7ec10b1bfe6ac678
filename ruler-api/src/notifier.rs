use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration applied exactly once, at `TenantNotifier` construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Static receiver list; used when `discovery` is false.
    pub alertmanager_url: Vec<String>,
    pub discovery: bool,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    pub use_v2: bool,
    pub queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub notification_timeout: Duration,
    pub external_url: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            alertmanager_url: Vec::new(),
            discovery: false,
            refresh_interval: Duration::from_secs(60),
            use_v2: false,
            queue_capacity: 10_000,
            notification_timeout: Duration::from_secs(10),
            external_url: String::new(),
        }
    }
}

impl NotifierConfig {
    /// Construction-time validation: a config naming no receivers at all
    /// (neither static targets nor discovery) is a programmer error, not a
    /// transient one, and must prevent evaluator creation per the error
    /// handling design.
    pub fn validate(&self) -> Result<(), String> {
        if !self.discovery && self.alertmanager_url.is_empty() {
            return Err(
                "notifier config names no alertmanager targets and discovery is disabled"
                    .to_string(),
            );
        }
        if self.queue_capacity == 0 {
            return Err("notifier queue capacity must be non-zero".to_string());
        }
        Ok(())
    }
}
