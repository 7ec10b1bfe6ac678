//! Concrete, HTTP-based implementations of the external collaborators
//! the `ruler` binary needs at runtime. These are deliberately thin: the
//! contracts they satisfy are owned by the expression-engine, storage, and
//! ring subsystems elsewhere in the monitoring system, not by this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ruler_api::{RuleGroupList, Sample, TenantId};

use crate::evaluator::{Engine, EngineError, PushError, Pusher, QueryResult, Queryable};
use crate::ring::{Lifecycler, Ring, ReplicaAddr};
use crate::rule_store::{RuleStore, RuleStoreError};
use crate::tenant_context;

/// Fetches every tenant's rule groups from a configurable HTTP endpoint
/// returning `{tenant: [RuleGroup, ...]}` JSON.
pub struct HttpRuleStore {
    client: reqwest::Client,
    url: String,
}

impl HttpRuleStore {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl RuleStore for HttpRuleStore {
    async fn list_all_rule_groups(&self) -> Result<HashMap<TenantId, RuleGroupList>, RuleStoreError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RuleStoreError(e.to_string()))?
            .error_for_status()
            .map_err(|e| RuleStoreError(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| RuleStoreError(e.to_string()))
    }
}

/// POSTs recording-rule output to a remote-write endpoint, tagging every
/// request with the owning tenant.
pub struct HttpPusher {
    client: reqwest::Client,
    url: String,
}

impl HttpPusher {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Pusher for HttpPusher {
    async fn push(&self, tenant: &TenantId, samples: Vec<Sample>) -> Result<(), PushError> {
        if samples.is_empty() {
            return Ok(());
        }
        let request = tenant_context::inject_header(self.client.post(&self.url).json(&samples), tenant);
        request
            .send()
            .await
            .map_err(|e| PushError(e.to_string()))?
            .error_for_status()
            .map_err(|e| PushError(e.to_string()))?;
        Ok(())
    }
}

/// Evaluates an expression against a remote query endpoint. A thin stand-in
/// for the shared expression engine: it POSTs `{expr, time}` and
/// expects back a list of `{labels, value}` results.
pub struct HttpEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpEngine {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[derive(serde::Serialize)]
struct InstantQueryRequest<'a> {
    expr: &'a str,
    time: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl Engine for HttpEngine {
    async fn instant_query(
        &self,
        _queryable: &dyn Queryable,
        expr: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<QueryResult>, EngineError> {
        let body = InstantQueryRequest { expr, time: at };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| EngineError {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        response
            .json::<Vec<QueryResult>>()
            .await
            .map_err(|e| EngineError {
                expr: expr.to_string(),
                reason: e.to_string(),
            })
    }
}

/// The queryable backing an [`HttpEngine`] is whatever the remote query
/// endpoint reads from; there is nothing for this process to hold.
pub struct RemoteQueryable;
impl Queryable for RemoteQueryable {}

/// A ring stand-in for sharding-disabled deployments: owns every key, has
/// exactly one member (itself), and leaves instantly. Using this with
/// `--enable-sharding` would silently defeat multi-replica ownership, so
/// the binary refuses that combination at startup instead (see `main`).
pub struct NoopRing {
    self_addr: String,
}

impl NoopRing {
    pub fn new(self_addr: impl Into<String>) -> Self {
        Self {
            self_addr: self_addr.into(),
        }
    }
}

#[async_trait]
impl Ring for NoopRing {
    async fn owner_of(&self, _key: ruler_api::ShardKey) -> Result<ReplicaAddr, crate::error::RingError> {
        Ok(self.self_addr.clone())
    }

    async fn all_replicas(&self) -> Result<Vec<ReplicaAddr>, crate::error::RingError> {
        Ok(vec![self.self_addr.clone()])
    }

    fn self_addr(&self) -> &str {
        &self.self_addr
    }
}

#[async_trait]
impl Lifecycler for NoopRing {
    async fn leave(&self, _pending_search_for: Duration) -> Result<(), crate::error::RingError> {
        Ok(())
    }
}

pub fn noop_ring(self_addr: impl Into<String>) -> Arc<NoopRing> {
    Arc::new(NoopRing::new(self_addr))
}
