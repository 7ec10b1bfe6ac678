//! Rule Inspection RPC: a snapshot of running rules for one tenant,
//! aggregated across the ring when sharding is enabled.

use std::sync::Arc;
use std::time::Duration;

use ruler_api::{RuleGroupDesc, TenantId};

use crate::error::InspectionError;
use crate::registry::EvaluatorRegistry;
use crate::ring::Ring;
use crate::tenant_context;

/// This replica's running rules for one tenant. Empty if the tenant has no
/// evaluator here (never seen this poll cycle, or not owned by this
/// replica).
pub async fn local_rules(registry: &EvaluatorRegistry, tenant: &TenantId) -> Vec<RuleGroupDesc> {
    registry.local_rules(tenant).await.unwrap_or_default()
}

/// Union of every replica's local snapshot for `tenant`, concatenated in
/// ring-enumeration order. Fails closed: any peer RPC
/// failure fails the whole aggregation, since a partial view cannot be
/// distinguished from "not my shard".
pub async fn sharded_rules(
    ring: &dyn Ring,
    client: &reqwest::Client,
    registry: &EvaluatorRegistry,
    tenant: &TenantId,
) -> Result<Vec<RuleGroupDesc>, InspectionError> {
    let replicas = ring.all_replicas().await?;
    let self_addr = ring.self_addr();

    let mut out = Vec::new();
    for replica in replicas {
        if replica == self_addr {
            out.extend(local_rules(registry, tenant).await);
            continue;
        }
        out.extend(fetch_peer(client, &replica, tenant).await?);
    }
    Ok(out)
}

/// Peers are asked for their *local* snapshot only — the route the
/// aggregating replica itself exposes publicly decides local-vs-sharded,
/// but a peer-to-peer call must never re-trigger another fan-out.
const INSPECTION_PATH: &str = "/ruler/rule_groups/local";

async fn fetch_peer(
    client: &reqwest::Client,
    replica: &str,
    tenant: &TenantId,
) -> Result<Vec<RuleGroupDesc>, InspectionError> {
    let url = format!("http://{}{INSPECTION_PATH}", replica.trim_end_matches('/'));
    let request = tenant_context::inject_header(client.get(&url), tenant);

    let response = request
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| InspectionError::PeerFailed {
            peer: replica.to_string(),
            reason: e.to_string(),
        })?
        .error_for_status()
        .map_err(|e| InspectionError::PeerFailed {
            peer: replica.to_string(),
            reason: e.to_string(),
        })?;

    response
        .json::<Vec<RuleGroupDesc>>()
        .await
        .map_err(|e| InspectionError::PeerFailed {
            peer: replica.to_string(),
            reason: e.to_string(),
        })
}

/// Dispatches to the local or sharded path depending on whether a ring is
/// configured, the way the sync loop's own shard filter does.
pub async fn rules_for(
    ring: Option<&Arc<dyn Ring>>,
    client: &reqwest::Client,
    registry: &EvaluatorRegistry,
    tenant: &TenantId,
) -> Result<Vec<RuleGroupDesc>, InspectionError> {
    match ring {
        Some(ring) => sharded_rules(ring.as_ref(), client, registry, tenant).await,
        None => Ok(local_rules(registry, tenant).await),
    }
}
