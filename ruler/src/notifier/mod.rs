//! Notifier Pool: one background notifier per tenant, created lazily
//! and torn down only at service shutdown.

mod queue;

pub use queue::TenantNotifier;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ruler_api::{Alert, NotifierConfig, TenantId};

use crate::error::NotifierError;

/// Owns every tenant's notifier and the single `reqwest::Client` they share.
/// A tenant's notifier outlives its evaluator: dropping a tenant from the
/// registry does not touch its entry here.
pub struct NotifierPool {
    config: NotifierConfig,
    client: reqwest::Client,
    notifiers: Mutex<HashMap<TenantId, Arc<TenantNotifier>>>,
}

impl NotifierPool {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(config.notification_timeout)
            .build()
            .map_err(|source| NotifierError::Delivery {
                receiver: "<client construction>".to_string(),
                source,
            })?;
        Ok(Self {
            config,
            client,
            notifiers: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the tenant's notifier, starting it on first use. Must only
    /// ever be called while holding the registry lock (lock ordering:
    /// registry → notifier-pool, never the reverse).
    pub fn notifier_for(&self, tenant: &TenantId) -> Result<Arc<TenantNotifier>, NotifierError> {
        let mut guard = self.notifiers.lock().unwrap();
        if let Some(existing) = guard.get(tenant) {
            return Ok(existing.clone());
        }
        let notifier = TenantNotifier::start(tenant.clone(), self.config.clone(), self.client.clone())?;
        guard.insert(tenant.clone(), notifier.clone());
        Ok(notifier)
    }

    /// Enqueue this evaluation cycle's alerts for `tenant`, a no-op if the
    /// tenant has no notifier yet (it will have one by the time it can
    /// produce alerts: evaluator construction always calls
    /// [`NotifierPool::notifier_for`] first).
    pub fn enqueue(&self, tenant: &TenantId, alerts: Vec<Alert>) {
        let notifier = self.notifiers.lock().unwrap().get(tenant).cloned();
        if let Some(notifier) = notifier {
            notifier.enqueue(alerts);
        }
    }

    /// Stop every notifier in parallel and wait for its last flush, the way
    /// shutdown's notifier-stop step requires.
    pub async fn shutdown(&self) {
        let notifiers: Vec<_> = self.notifiers.lock().unwrap().values().cloned().collect();
        futures::future::join_all(notifiers.iter().map(|n| n.shutdown())).await;
    }
}
