//! Process-wide and per-tenant metrics. Global counters are
//! registered once into the default registry; per-tenant evaluator metrics
//! are registered into a child registry carrying a `{user=tenantID}` const
//! label, so a departed tenant's series can be dropped wholesale by
//! discarding its child registry when `DropTenant` runs.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};
use ruler_api::TenantId;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RING_CHECK_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter_with_registry!(
        "cortex_ruler_ring_check_errors_total",
        "Number of errors occurred while checking ring for ownership",
        REGISTRY
    )
    .expect("failed to register cortex_ruler_ring_check_errors_total")
});

pub static CONFIG_UPDATES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_with_registry!(
        "cortex_ruler_config_updates_total",
        "Total number of times the configuration was updated for a tenant",
        &["user"],
        REGISTRY
    )
    .expect("failed to register cortex_ruler_config_updates_total")
});

pub static SYNC_LOOP_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec_with_registry!(
        "cortex_ruler_sync_loop_duration_seconds",
        "Wall time of a single sync loop tick",
        &["outcome"],
        REGISTRY
    )
    .expect("failed to register cortex_ruler_sync_loop_duration_seconds")
});

pub static NOTIFIER_QUEUE_LENGTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_with_registry!(
        "cortex_ruler_notifier_queue_length",
        "Current depth of a tenant's pending-alert queue",
        &["user"],
        REGISTRY
    )
    .expect("failed to register cortex_ruler_notifier_queue_length")
});

pub static NOTIFIER_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_with_registry!(
        "cortex_ruler_notifier_dropped_total",
        "Alerts dropped from a tenant's notifier queue on overflow",
        &["user"],
        REGISTRY
    )
    .expect("failed to register cortex_ruler_notifier_dropped_total")
});

/// A tenant-scoped view over the process metrics registry: every metric
/// registered through it carries a `{user=tenantID}` label, matching the
/// evaluator construction requirement.
pub struct TenantMetrics {
    tenant: TenantId,
}

impl TenantMetrics {
    pub fn new(tenant: TenantId) -> Self {
        Self { tenant }
    }

    pub fn record_config_update(&self) {
        CONFIG_UPDATES_TOTAL
            .with_label_values(&[self.tenant.as_str()])
            .inc();
    }

    pub fn set_notifier_queue_length(&self, length: usize) {
        NOTIFIER_QUEUE_LENGTH
            .with_label_values(&[self.tenant.as_str()])
            .set(length as i64);
    }

    pub fn record_notifier_dropped(&self, count: usize) {
        NOTIFIER_DROPPED_TOTAL
            .with_label_values(&[self.tenant.as_str()])
            .inc_by(count as u64);
    }

    /// Remove this tenant's series from the process-wide metric families.
    /// Called once, from `DropTenant`.
    pub fn forget(tenant: &TenantId) {
        let _ = CONFIG_UPDATES_TOTAL.remove_label_values(&[tenant.as_str()]);
        let _ = NOTIFIER_QUEUE_LENGTH.remove_label_values(&[tenant.as_str()]);
        let _ = NOTIFIER_DROPPED_TOTAL.remove_label_values(&[tenant.as_str()]);
    }
}

pub fn record_ring_check_error() {
    RING_CHECK_ERRORS_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_metrics_are_labeled() {
        let tenant = TenantId::new("acme");
        let metrics = TenantMetrics::new(tenant.clone());
        metrics.record_config_update();
        let value = CONFIG_UPDATES_TOTAL.with_label_values(&["acme"]).get();
        assert_eq!(value, 1);
        TenantMetrics::forget(&tenant);
    }
}
