//! Ring membership. The consistent-hash ring itself, its gossip/KV
//! substrate, and the lifecycler that joins/leaves it are external
//! collaborators; this module defines the narrow contract the rest
//! of the service depends on, plus an in-memory double used by tests.

use std::time::Duration;

use async_trait::async_trait;
use ruler_api::ShardKey;

use crate::error::RingError;

pub type ReplicaAddr = String;

/// Consistent-hash ring membership, as consumed by the sync loop and the
/// sharded inspection RPC.
#[async_trait]
pub trait Ring: Send + Sync {
    /// The single replica currently designated owner for `key` under the
    /// ring's read quorum.
    async fn owner_of(&self, key: ShardKey) -> Result<ReplicaAddr, RingError>;

    /// Every healthy ring member, in a stable enumeration order.
    async fn all_replicas(&self) -> Result<Vec<ReplicaAddr>, RingError>;

    /// This replica's own address.
    fn self_addr(&self) -> &str;
}

/// `Owned(key) := OwnerOf(key).Addr == self.Addr`. Callers that
/// have sharding disabled must not call this at all: with sharding off,
/// `Owned` is defined to always be `true`, and there is deliberately no
/// `Ring` implementation to ask.
pub async fn owned(ring: &dyn Ring, key: ShardKey) -> Result<bool, RingError> {
    let owner = ring.owner_of(key).await?;
    Ok(owner == ring.self_addr())
}

/// Graceful hand-off on shutdown: a ring member leaving waits up to
/// `pending_search_for` for a successor before giving up.
#[async_trait]
pub trait Lifecycler: Send + Sync {
    async fn leave(&self, pending_search_for: Duration) -> Result<(), RingError>;
}

/// In-memory ring used by tests: ownership is a static map from shard key to
/// replica address, so tests can pin exactly which groups this replica owns.
#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    pub struct InMemoryRing {
        self_addr: ReplicaAddr,
        replicas: Vec<ReplicaAddr>,
        owners: Mutex<HashMap<ShardKey, ReplicaAddr>>,
        fail_after: Mutex<Option<usize>>,
    }

    impl InMemoryRing {
        pub fn single(self_addr: impl Into<String>) -> Self {
            let self_addr = self_addr.into();
            Self {
                replicas: vec![self_addr.clone()],
                self_addr,
                owners: Mutex::new(HashMap::new()),
                fail_after: Mutex::new(None),
            }
        }

        pub fn new(self_addr: impl Into<String>, replicas: Vec<ReplicaAddr>) -> Self {
            Self {
                self_addr: self_addr.into(),
                replicas,
                owners: Mutex::new(HashMap::new()),
                fail_after: Mutex::new(None),
            }
        }

        /// Pin a specific shard key to a specific (possibly non-self) owner.
        /// Keys with no explicit assignment default to `self_addr`.
        pub fn assign(&self, key: ShardKey, owner: impl Into<String>) {
            self.owners.lock().unwrap().insert(key, owner.into());
        }

        /// Make the Nth call to `owner_of` (0-indexed) return an error.
        pub fn fail_on_call(&self, n: usize) {
            *self.fail_after.lock().unwrap() = Some(n);
        }
    }

    #[async_trait]
    impl Ring for InMemoryRing {
        async fn owner_of(&self, key: ShardKey) -> Result<ReplicaAddr, RingError> {
            {
                let mut fail_after = self.fail_after.lock().unwrap();
                if let Some(n) = *fail_after {
                    if n == 0 {
                        return Err(RingError::OwnerLookup {
                            key: key.as_u32(),
                            reason: "simulated ring failure".to_string(),
                        });
                    }
                    *fail_after = Some(n - 1);
                }
            }
            Ok(self
                .owners
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| self.self_addr.clone()))
        }

        async fn all_replicas(&self) -> Result<Vec<ReplicaAddr>, RingError> {
            Ok(self.replicas.clone())
        }

        fn self_addr(&self) -> &str {
            &self.self_addr
        }
    }

    #[async_trait]
    impl Lifecycler for InMemoryRing {
        async fn leave(&self, _pending_search_for: Duration) -> Result<(), RingError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_double::InMemoryRing;
    use super::*;

    #[tokio::test]
    async fn single_replica_owns_everything() {
        let ring = InMemoryRing::single("self:9090");
        let key = ShardKey::compute(&ruler_api::TenantId::new("a"), "ns", "g1");
        assert!(owned(&ring, key).await.unwrap());
    }

    #[tokio::test]
    async fn other_replica_ownership_is_respected() {
        let ring = InMemoryRing::new("self:9090", vec!["self:9090".into(), "peer:9090".into()]);
        let key = ShardKey::compute(&ruler_api::TenantId::new("a"), "ns", "g1");
        ring.assign(key, "peer:9090");
        assert!(!owned(&ring, key).await.unwrap());
    }

    #[tokio::test]
    async fn owner_lookup_failure_propagates() {
        let ring = InMemoryRing::single("self:9090");
        ring.fail_on_call(0);
        let key = ShardKey::compute(&ruler_api::TenantId::new("a"), "ns", "g1");
        assert!(owned(&ring, key).await.is_err());
    }
}
