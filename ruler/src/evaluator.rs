//! Per-tenant evaluator. Each [`TenantEvaluator`] owns one tenant's loaded
//! rule groups and periodically evaluates them against the shared
//! expression engine, writing recording-rule output through a
//! tenant-tagged [`Pusher`] and routing alerting-rule transitions to the
//! tenant's notifier.
//!
//! `Engine`, `Queryable` and `Pusher` are external collaborators; this
//! module defines only the narrow contracts the evaluator needs from them,
//! plus in-memory doubles for tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use camino::Utf8PathBuf;
use chrono::Utc;
use ruler_api::{Alert, AlertState, Rule, RuleDesc, RuleGroup, RuleGroupDesc, RuleHealth, Sample, TenantId};
use tokio_util::sync::CancellationToken;

use crate::notifier::TenantNotifier;

#[derive(Debug, Clone, thiserror::Error)]
#[error("query {expr:?} failed: {reason}")]
pub struct EngineError {
    pub expr: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
#[error("push failed: {0}")]
pub struct PushError(pub String);

/// A single resulting series from an instant query: its label set and the
/// scalar value at the query timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryResult {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

/// Backing store the expression engine reads from. Opaque to this crate;
/// the evaluator only ever reaches it through [`Engine`].
pub trait Queryable: Send + Sync {}

/// The shared expression engine: evaluates a query string at a timestamp
/// against a [`Queryable`]. Shared read-only across every tenant's
/// evaluator.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn instant_query(
        &self,
        queryable: &dyn Queryable,
        expr: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<Vec<QueryResult>, EngineError>;
}

/// Sample ingestion endpoint. `Push` carries tenant identity through the
/// context it is called with; this crate's adapter tags every call
/// with the owning tenant explicitly rather than relying on ambient state.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, tenant: &TenantId, samples: Vec<Sample>) -> Result<(), PushError>;
}

/// One loaded rule group plus the live evaluation state the inspection RPC
/// reads.
struct LoadedGroup {
    namespace: String,
    name: String,
    interval: Duration,
    rules: Vec<RuleState>,
    last_evaluation: Option<chrono::DateTime<Utc>>,
    evaluation_duration: Duration,
}

struct RuleState {
    rule: Rule,
    health: RuleHealth,
    last_error: Option<String>,
    /// Active alert instances, keyed by their label set serialised
    /// deterministically (label sets distinguish instances of one
    /// alerting rule).
    alerts: HashMap<Vec<(String, String)>, Alert>,
}

impl RuleState {
    fn new(rule: Rule) -> Self {
        Self {
            rule,
            health: RuleHealth::Unknown,
            last_error: None,
            alerts: HashMap::new(),
        }
    }
}

fn alert_key(labels: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<_> = labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    pairs.sort();
    pairs
}

/// Parses the on-disk namespace files the mapper writes back into
/// groups. Mirrors `render_namespaces` in `mapper.rs`: same JSON shape.
async fn load_groups(paths: &[Utf8PathBuf]) -> Result<Vec<RuleGroup>, std::io::Error> {
    let mut groups = Vec::new();
    for path in paths {
        let content = tokio::fs::read(path).await?;
        let parsed: Vec<RuleGroup> = serde_json::from_slice(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        groups.extend(parsed);
    }
    Ok(groups)
}

pub struct TenantEvaluator {
    tenant: TenantId,
    engine: Arc<dyn Engine>,
    queryable: Arc<dyn Queryable>,
    pusher: Arc<dyn Pusher>,
    notifier: Arc<TenantNotifier>,
    groups: RwLock<Vec<LoadedGroup>>,
    cancel: CancellationToken,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TenantEvaluator {
    pub fn new(
        tenant: TenantId,
        engine: Arc<dyn Engine>,
        queryable: Arc<dyn Queryable>,
        pusher: Arc<dyn Pusher>,
        notifier: Arc<TenantNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tenant,
            engine,
            queryable,
            pusher,
            notifier,
            groups: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
            handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Reload this evaluator's working set from the given rule files at the
    /// given default interval (used for any group that did not specify its
    /// own). Called by the registry whenever the mapper reports `changed`.
    pub async fn reload(
        self: &Arc<Self>,
        paths: &[Utf8PathBuf],
        default_interval: Duration,
    ) -> Result<(), std::io::Error> {
        let parsed = load_groups(paths).await?;
        let mut loaded = Vec::with_capacity(parsed.len());
        for group in parsed {
            loaded.push(LoadedGroup {
                namespace: group.namespace,
                name: group.name,
                interval: group.interval.unwrap_or(default_interval),
                rules: group.rules.into_iter().map(RuleState::new).collect(),
                last_evaluation: None,
                evaluation_duration: Duration::ZERO,
            });
        }
        *self.groups.write().unwrap() = loaded;
        Ok(())
    }

    /// Starts the background evaluation loop, ticking at `interval`. A
    /// no-op if already started; `reload` may be called any number of
    /// times before or after `start`.
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let evaluator = self.clone();
        *handle = Some(tokio::spawn(async move { evaluator.run(interval).await }));
    }

    async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.evaluate_once().await;
        }
    }

    async fn evaluate_once(self: &Arc<Self>) {
        let now = Utc::now();
        let group_count = self.groups.read().unwrap().len();
        for idx in 0..group_count {
            let (namespace, name, rules) = {
                let groups = self.groups.read().unwrap();
                let group = &groups[idx];
                (
                    group.namespace.clone(),
                    group.name.clone(),
                    group
                        .rules
                        .iter()
                        .map(|r| r.rule.clone())
                        .collect::<Vec<_>>(),
                )
            };

            let started = Instant::now();
            let mut fired = Vec::new();
            let mut outcomes = Vec::with_capacity(rules.len());

            for rule in &rules {
                let outcome = self
                    .engine
                    .instant_query(self.queryable.as_ref(), rule.expr(), now)
                    .await;
                outcomes.push(outcome.clone());
                match (rule, outcome) {
                    (Rule::Recording { record, labels, .. }, Ok(results)) => {
                        let mut samples = Vec::with_capacity(results.len());
                        for result in results {
                            let mut tagged = labels.clone();
                            tagged.extend(result.labels);
                            tagged.insert("__name__".to_string(), record.clone());
                            samples.push(Sample {
                                labels: tagged,
                                value: result.value,
                                timestamp: now,
                            });
                        }
                        if let Err(e) = self.pusher.push(&self.tenant, samples).await {
                            tracing::warn!(
                                tenant = %self.tenant.as_str(),
                                namespace = %namespace,
                                group = %name,
                                rule = %record,
                                error = %e,
                                "recording rule push failed"
                            );
                        }
                    }
                    (Rule::Alerting { .. }, Ok(_)) => {}
                    (_, Err(e)) => {
                        tracing::warn!(
                            tenant = %self.tenant.as_str(),
                            namespace = %namespace,
                            group = %name,
                            rule = %rule.name(),
                            error = %e,
                            "rule evaluation failed"
                        );
                    }
                }
            }

            {
                let mut groups = self.groups.write().unwrap();
                let group = &mut groups[idx];
                group.last_evaluation = Some(now);
                group.evaluation_duration = started.elapsed();

                for (rule_state, outcome) in group.rules.iter_mut().zip(outcomes) {
                    match outcome {
                        Ok(results) => {
                            rule_state.health = RuleHealth::Ok;
                            rule_state.last_error = None;
                            if let Rule::Alerting { alert, expr, for_, labels, annotations } =
                                &rule_state.rule
                            {
                                let transitions = advance_alerts(
                                    &mut rule_state.alerts,
                                    alert,
                                    expr,
                                    *for_,
                                    labels,
                                    annotations,
                                    &results,
                                    now,
                                );
                                fired.extend(transitions);
                            }
                        }
                        Err(e) => {
                            rule_state.health = RuleHealth::Error;
                            rule_state.last_error = Some(e.reason);
                        }
                    }
                }
            }

            if !fired.is_empty() {
                self.notifier.enqueue(fired);
            }
        }
    }

    /// Snapshot of this evaluator's running rules, for the inspection RPC's
    /// local path. Namespace is carried per group, not derived from
    /// a file path here: the registry already knows it from the loaded
    /// `RuleGroup`.
    pub fn local_rules(&self) -> Vec<RuleGroupDesc> {
        self.groups
            .read()
            .unwrap()
            .iter()
            .map(|group| RuleGroupDesc {
                name: group.name.clone(),
                namespace: group.namespace.clone(),
                interval: group.interval,
                last_evaluation: group.last_evaluation,
                evaluation_duration: group.evaluation_duration,
                rules: group.rules.iter().map(describe_rule).collect(),
            })
            .collect()
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn describe_rule(state: &RuleState) -> RuleDesc {
    match &state.rule {
        Rule::Recording { record, expr, labels } => RuleDesc::Recording {
            record: record.clone(),
            expr: expr.clone(),
            labels: labels.clone(),
            health: state.health,
            last_error: state.last_error.clone(),
        },
        Rule::Alerting { alert, expr, for_, labels, annotations } => RuleDesc::Alerting {
            alert: alert.clone(),
            expr: expr.clone(),
            for_: *for_,
            labels: labels.clone(),
            annotations: annotations.clone(),
            health: state.health,
            last_error: state.last_error.clone(),
            alerts: state.alerts.values().cloned().collect(),
        },
    }
}

/// Advances an alerting rule's active instances given this cycle's query
/// results, and returns the alerts that should be handed to the notifier
/// this cycle (every still-active instance, `Pending` ones included, so the
/// notifier pool can apply its own filtering).
#[allow(clippy::too_many_arguments)]
fn advance_alerts(
    active: &mut HashMap<Vec<(String, String)>, Alert>,
    alert_name: &str,
    expr: &str,
    for_: Duration,
    rule_labels: &HashMap<String, String>,
    annotations: &HashMap<String, String>,
    results: &[QueryResult],
    now: chrono::DateTime<Utc>,
) -> Vec<Alert> {
    let mut seen = std::collections::HashSet::new();

    for result in results {
        let mut labels = rule_labels.clone();
        labels.extend(result.labels.clone());
        labels.insert("alertname".to_string(), alert_name.to_string());
        labels.insert("__expr__".to_string(), expr.to_string());
        let key = alert_key(&labels);
        seen.insert(key.clone());

        let entry = active.entry(key).or_insert_with(|| Alert {
            labels: labels.clone(),
            annotations: annotations.clone(),
            value: result.value,
            state: AlertState::Pending,
            active_at: Some(now),
            fired_at: None,
            resolved_at: None,
            last_sent_at: None,
            valid_until: None,
        });

        entry.value = result.value;
        entry.labels = labels;
        let active_at = entry.active_at.unwrap_or(now);
        entry.active_at = Some(active_at);

        let pending_long_enough = chrono::Duration::from_std(for_)
            .map(|threshold| now - active_at >= threshold)
            .unwrap_or(true);

        if entry.state != AlertState::Firing && pending_long_enough {
            entry.state = AlertState::Firing;
            entry.fired_at = Some(now);
            entry.resolved_at = None;
        }
    }

    // Anything no longer returned by the query resolves immediately.
    let mut resolved = Vec::new();
    active.retain(|key, alert| {
        if seen.contains(key) {
            return true;
        }
        if alert.state == AlertState::Firing {
            alert.state = AlertState::Inactive;
            alert.resolved_at = Some(now);
            resolved.push(alert.clone());
            false
        } else {
            false
        }
    });

    let mut out: Vec<Alert> = active.values().cloned().collect();
    out.extend(resolved);
    out
}

#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory queryable/engine pair: returns a fixed series of values
    /// per expression string, so tests can script exactly what an
    /// evaluation cycle observes.
    pub struct ScriptedEngine {
        series: Mutex<HashMap<String, Vec<QueryResult>>>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self {
                series: Mutex::new(HashMap::new()),
            }
        }

        pub fn set(&self, expr: impl Into<String>, value: f64) {
            self.series.lock().unwrap().insert(
                expr.into(),
                vec![QueryResult {
                    labels: HashMap::new(),
                    value,
                }],
            );
        }

        pub fn clear(&self, expr: &str) {
            self.series.lock().unwrap().remove(expr);
        }
    }

    impl Default for ScriptedEngine {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct NullQueryable;
    impl Queryable for NullQueryable {}

    #[async_trait]
    impl Engine for ScriptedEngine {
        async fn instant_query(
            &self,
            _queryable: &dyn Queryable,
            expr: &str,
            _at: chrono::DateTime<Utc>,
        ) -> Result<Vec<QueryResult>, EngineError> {
            Ok(self.series.lock().unwrap().get(expr).cloned().unwrap_or_default())
        }
    }

    /// Captures every sample pushed, per tenant, for assertions.
    pub struct RecordingPusher {
        pushed: Mutex<HashMap<TenantId, Vec<Sample>>>,
    }

    impl RecordingPusher {
        pub fn new() -> Self {
            Self {
                pushed: Mutex::new(HashMap::new()),
            }
        }

        pub fn pushed_for(&self, tenant: &TenantId) -> Vec<Sample> {
            self.pushed
                .lock()
                .unwrap()
                .get(tenant)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl Default for RecordingPusher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Pusher for RecordingPusher {
        async fn push(&self, tenant: &TenantId, samples: Vec<Sample>) -> Result<(), PushError> {
            self.pushed
                .lock()
                .unwrap()
                .entry(tenant.clone())
                .or_default()
                .extend(samples);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_double::*;
    use super::*;
    use ruler_api::NotifierConfig;

    fn group(namespace: &str, name: &str, rule: Rule) -> RuleGroup {
        RuleGroup {
            tenant: TenantId::new("acme"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            interval: None,
            rules: vec![rule],
        }
    }

    async fn write_group_file(dir: &camino::Utf8Path, groups: &[RuleGroup]) -> Utf8PathBuf {
        let path = dir.join("ns1");
        tokio::fs::write(&path, serde_json::to_vec(groups).unwrap())
            .await
            .unwrap();
        path
    }

    fn notifier_config() -> NotifierConfig {
        NotifierConfig {
            alertmanager_url: vec!["http://alertmanager:9093".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recording_rule_pushes_tagged_sample() {
        let dir = camino_tempfile::tempdir().unwrap();
        let groups = vec![group(
            "ns1",
            "g1",
            Rule::Recording {
                record: "job:up".to_string(),
                expr: "up".to_string(),
                labels: HashMap::new(),
            },
        )];
        let path = write_group_file(dir.path(), &groups).await;

        let engine = Arc::new(ScriptedEngine::new());
        engine.set("up", 1.0);
        let pusher = Arc::new(RecordingPusher::new());
        let notifier =
            crate::notifier::TenantNotifier::start(TenantId::new("acme"), notifier_config(), reqwest::Client::new())
                .unwrap();

        let evaluator = TenantEvaluator::new(
            TenantId::new("acme"),
            engine.clone(),
            Arc::new(NullQueryable),
            pusher.clone(),
            notifier.clone(),
        );
        evaluator.reload(&[path], Duration::from_secs(60)).await.unwrap();
        evaluator.evaluate_once().await;

        let pushed = pusher.pushed_for(&TenantId::new("acme"));
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].labels.get("__name__").unwrap(), "job:up");
        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn alerting_rule_fires_after_for_duration_elapses() {
        let dir = camino_tempfile::tempdir().unwrap();
        let groups = vec![group(
            "ns1",
            "g1",
            Rule::Alerting {
                alert: "HighLatency".to_string(),
                expr: "latency > 1".to_string(),
                for_: Duration::ZERO,
                labels: HashMap::new(),
                annotations: HashMap::new(),
            },
        )];
        let path = write_group_file(dir.path(), &groups).await;

        let engine = Arc::new(ScriptedEngine::new());
        engine.set("latency > 1", 2.0);
        let pusher = Arc::new(RecordingPusher::new());
        let notifier =
            crate::notifier::TenantNotifier::start(TenantId::new("acme"), notifier_config(), reqwest::Client::new())
                .unwrap();

        let evaluator = TenantEvaluator::new(
            TenantId::new("acme"),
            engine.clone(),
            Arc::new(NullQueryable),
            pusher.clone(),
            notifier.clone(),
        );
        evaluator.reload(&[path], Duration::from_secs(60)).await.unwrap();
        evaluator.evaluate_once().await;

        let rules = evaluator.local_rules();
        let RuleDesc::Alerting { alerts, .. } = &rules[0].rules[0] else {
            panic!("expected alerting rule");
        };
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].state, AlertState::Firing);
        notifier.shutdown().await;
    }
}
