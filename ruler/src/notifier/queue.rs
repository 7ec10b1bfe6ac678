//! A single tenant's notifier: a bounded, oldest-drop queue plus a
//! background task that drains it and delivers batches to the configured
//! receivers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ruler_api::{Alert, NotifierConfig, TenantId};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::NotifierError;
use crate::metrics::TenantMetrics;
use crate::tenant_context;

/// The alert shape POSTed to a receiver, after filtering and timestamp
/// mapping. Field names follow the Alertmanager wire convention.
#[derive(Debug, Clone, Serialize)]
struct OutboundAlert {
    labels: std::collections::HashMap<String, String>,
    annotations: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "startsAt")]
    starts_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "endsAt")]
    ends_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "generatorURL")]
    generator_url: String,
}

/// Compose an alert's `GeneratorURL`: the service's external URL plus a
/// link anchored on the alert's expression, the way a user would navigate
/// from a firing alert back to the rule that raised it.
fn table_link(external_url: &str, expr: &str) -> String {
    format!(
        "{}/graph?g0.expr={}",
        external_url.trim_end_matches('/'),
        urlencode(expr)
    )
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn to_outbound(mut alert: Alert, external_url: &str) -> OutboundAlert {
    let expr = alert.labels.remove("__expr__").unwrap_or_default();
    OutboundAlert {
        labels: alert.labels,
        annotations: alert.annotations,
        starts_at: alert.fired_at,
        ends_at: alert.resolved_at,
        generator_url: table_link(external_url, &expr),
    }
}

/// A bounded FIFO that drops from the front on overflow: under sustained
/// backpressure the newest alerts are kept and the oldest, presumably
/// stalest, are sacrificed.
struct BoundedQueue {
    items: Mutex<VecDeque<OutboundAlert>>,
    capacity: usize,
    notify: Notify,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Returns `true` if an older item was dropped to make room.
    fn push(&self, item: OutboundAlert) -> bool {
        let mut items = self.items.lock().unwrap();
        items.push_back(item);
        let dropped = items.len() > self.capacity;
        if dropped {
            items.pop_front();
        }
        drop(items);
        self.notify.notify_one();
        dropped
    }

    fn drain(&self) -> Vec<OutboundAlert> {
        self.items.lock().unwrap().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

pub struct TenantNotifier {
    tenant: TenantId,
    config: NotifierConfig,
    queue: Arc<BoundedQueue>,
    cancel: CancellationToken,
    metrics: TenantMetrics,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TenantNotifier {
    /// Starts the background delivery task. `config` is applied exactly
    /// once, here, and never mutated for the lifetime of the notifier.
    pub(super) fn start(
        tenant: TenantId,
        config: NotifierConfig,
        client: reqwest::Client,
    ) -> Result<Arc<Self>, NotifierError> {
        config
            .validate()
            .map_err(NotifierError::InvalidConfig)?;

        let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let metrics = TenantMetrics::new(tenant.clone());
        let notifier = Arc::new(Self {
            tenant,
            config,
            queue,
            cancel: CancellationToken::new(),
            metrics,
            handle: Mutex::new(None),
        });

        let task = notifier.clone();
        let handle = tokio::spawn(async move { task.run(client).await });
        *notifier.handle.lock().unwrap() = Some(handle);
        Ok(notifier)
    }

    /// Filters and enqueues alerts produced by one evaluation cycle. Alerts
    /// not in `Firing` state are dropped here, before they ever reach the
    /// queue.
    pub fn enqueue(&self, alerts: impl IntoIterator<Item = Alert>) {
        let mut dropped = 0usize;
        for alert in alerts {
            if !alert.is_firing() {
                continue;
            }
            if self.queue.push(to_outbound(alert, &self.config.external_url)) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.metrics.record_notifier_dropped(dropped);
        }
        self.metrics.set_notifier_queue_length(self.queue.len());
    }

    fn receivers(&self) -> Vec<String> {
        // DNS-SRV discovery of Alertmanager replicas is a resolution
        // substrate external to this crate, same as the ring's own
        // gossip/KV layer; both discovery and static modes deliver to the
        // configured target list here.
        self.config.alertmanager_url.clone()
    }

    async fn run(self: Arc<Self>, client: reqwest::Client) {
        loop {
            let notified = self.queue.notify.notified();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.flush(&client).await;
                    return;
                }
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
            self.flush(&client).await;
        }
    }

    async fn flush(&self, client: &reqwest::Client) {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return;
        }
        self.metrics.set_notifier_queue_length(0);

        for receiver in self.receivers() {
            let span = tracing::info_span!(
                "notifier_delivery",
                tenant = %self.tenant.as_str(),
                receiver = %receiver,
                alerts = batch.len(),
            );
            let outcome = self
                .deliver(client, &receiver, &batch)
                .instrument(span)
                .await;
            if let Err(source) = outcome {
                tracing::warn!(
                    tenant = %self.tenant.as_str(),
                    receiver = %receiver,
                    error = %source,
                    "alert delivery failed"
                );
            }
        }
    }

    async fn deliver(
        &self,
        client: &reqwest::Client,
        receiver: &str,
        batch: &[OutboundAlert],
    ) -> Result<(), NotifierError> {
        let version = if self.config.use_v2 { "v2" } else { "v1" };
        let url = format!("{}/api/{}/alerts", receiver.trim_end_matches('/'), version);

        let request = tenant_context::inject_header(client.post(&url).json(batch), &self.tenant);
        request
            .send()
            .await
            .map_err(|source| NotifierError::Delivery {
                receiver: receiver.to_string(),
                source,
            })?
            .error_for_status()
            .map_err(|source| NotifierError::Delivery {
                receiver: receiver.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Cancel the delivery loop and wait for its last flush to complete.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruler_api::AlertState;

    fn firing_alert() -> Alert {
        Alert {
            labels: [("alertname".to_string(), "HighLatency".to_string())].into(),
            annotations: std::collections::HashMap::new(),
            value: 1.0,
            state: AlertState::Firing,
            active_at: None,
            fired_at: Some(chrono::Utc::now()),
            resolved_at: None,
            last_sent_at: None,
            valid_until: None,
        }
    }

    fn pending_alert() -> Alert {
        Alert {
            state: AlertState::Pending,
            ..firing_alert()
        }
    }

    #[test]
    fn bounded_queue_drops_oldest_on_overflow() {
        let queue = BoundedQueue::new(2);
        let item = |n: u8| OutboundAlert {
            labels: [("n".to_string(), n.to_string())].into(),
            annotations: std::collections::HashMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: String::new(),
        };
        assert!(!queue.push(item(1)));
        assert!(!queue.push(item(2)));
        assert!(queue.push(item(3)));
        let remaining = queue.drain();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].labels["n"], "2");
        assert_eq!(remaining[1].labels["n"], "3");
    }

    #[tokio::test]
    async fn pending_alerts_are_never_enqueued() {
        let client = reqwest::Client::new();
        let config = NotifierConfig {
            alertmanager_url: vec!["http://alertmanager:9093".to_string()],
            ..Default::default()
        };
        let notifier = TenantNotifier::start(TenantId::new("acme"), config, client).unwrap();
        notifier.enqueue(vec![pending_alert()]);
        assert_eq!(notifier.queue.len(), 0);
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn firing_alerts_are_queued_with_mapped_timestamps() {
        let client = reqwest::Client::new();
        let config = NotifierConfig {
            alertmanager_url: vec!["http://alertmanager:9093".to_string()],
            external_url: "http://ruler".to_string(),
            ..Default::default()
        };
        let notifier = TenantNotifier::start(TenantId::new("acme"), config, client).unwrap();
        notifier.enqueue(vec![firing_alert()]);
        assert_eq!(notifier.queue.len(), 1);
        let batch = notifier.queue.drain();
        assert!(batch[0].starts_at.is_some());
        assert!(batch[0].generator_url.starts_with("http://ruler/graph"));
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let client = reqwest::Client::new();
        let config = NotifierConfig {
            alertmanager_url: vec![],
            discovery: false,
            ..Default::default()
        };
        let err = TenantNotifier::start(TenantId::new("acme"), config, client).unwrap_err();
        assert!(matches!(err, NotifierError::InvalidConfig(_)));
    }
}
