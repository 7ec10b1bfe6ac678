//! Three replicas, each running one evaluator for the same tenant,
//! aggregate into a union via the inspection RPC, with the tenant header
//! propagated on every outbound peer call.

#![cfg(feature = "testing")]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino_tempfile::Utf8TempDir;
use ruler::evaluator::test_double::{NullQueryable, RecordingPusher, ScriptedEngine};
use ruler::http::{self, AppState};
use ruler::mapper::FileMapper;
use ruler::notifier::NotifierPool;
use ruler::registry::EvaluatorRegistry;
use ruler::ring::test_double::InMemoryRing;
use ruler_api::{NotifierConfig, Rule, RuleGroup, TenantId};
use tokio_util::sync::CancellationToken;

struct Replica {
    addr: String,
    registry: Arc<EvaluatorRegistry>,
    _dir: Utf8TempDir,
    _cancel: CancellationToken,
}

async fn spawn_replica(namespace: &str) -> Replica {
    let dir = camino_tempfile::tempdir().unwrap();
    let mapper = Arc::new(FileMapper::new(dir.path().to_path_buf()));
    let notifiers = Arc::new(
        NotifierPool::new(NotifierConfig {
            alertmanager_url: vec!["http://alertmanager:9093".to_string()],
            ..Default::default()
        })
        .unwrap(),
    );
    let registry = Arc::new(EvaluatorRegistry::new(
        mapper,
        notifiers,
        Arc::new(ScriptedEngine::new()),
        Arc::new(NullQueryable),
        Arc::new(RecordingPusher::new()),
        Duration::from_secs(60),
    ));

    let tenant = TenantId::new("acme");
    let groups = vec![RuleGroup {
        tenant: tenant.clone(),
        namespace: namespace.to_string(),
        name: "g1".to_string(),
        interval: None,
        rules: vec![Rule::Recording {
            record: "job:up".to_string(),
            expr: "up".to_string(),
            labels: HashMap::new(),
        }],
    }];
    registry.ensure_updated(&tenant, &groups).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let state = Arc::new(AppState {
        registry: registry.clone(),
        ring: None,
        client: reqwest::Client::new(),
        enable_sharding: false,
    });
    let cancel = CancellationToken::new();
    let app = http::router(state);
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await
            .unwrap();
    });

    // Give the listener a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(20)).await;

    Replica {
        addr,
        registry,
        _dir: dir,
        _cancel: cancel,
    }
}

#[tokio::test]
async fn sharded_inspection_aggregates_across_replicas() {
    let r1 = spawn_replica("ns1").await;
    let r2 = spawn_replica("ns2").await;
    let r3 = spawn_replica("ns3").await;

    let ring = InMemoryRing::new(
        r1.addr.clone(),
        vec![r1.addr.clone(), r2.addr.clone(), r3.addr.clone()],
    );
    let client = reqwest::Client::new();
    let tenant = TenantId::new("acme");

    let groups = ruler::inspection::sharded_rules(&ring, &client, &r1.registry, &tenant)
        .await
        .expect("aggregation across healthy replicas succeeds");

    let mut namespaces: Vec<&str> = groups.iter().map(|g| g.namespace.as_str()).collect();
    namespaces.sort();
    assert_eq!(namespaces, vec!["ns1", "ns2", "ns3"]);
}

#[tokio::test]
async fn sharded_inspection_fails_closed_on_peer_error() {
    let r1 = spawn_replica("ns1").await;

    // A peer address with nothing listening behind it.
    let dead_peer = "127.0.0.1:1";
    let ring = InMemoryRing::new(r1.addr.clone(), vec![r1.addr.clone(), dead_peer.to_string()]);
    let client = reqwest::Client::new();
    let tenant = TenantId::new("acme");

    let result = ruler::inspection::sharded_rules(&ring, &client, &r1.registry, &tenant).await;
    assert!(result.is_err());
}
