//! Rule store adapter. The storage backend itself is an external
//! collaborator; this module defines the narrow contract the sync loop
//! depends on, plus an in-memory double for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use ruler_api::{RuleGroupList, TenantId};

#[derive(Debug, thiserror::Error)]
#[error("rule store fetch failed: {0}")]
pub struct RuleStoreError(pub String);

/// `ListAllRuleGroups`: returned data is treated as authoritative truth for
/// the moment of fetch. May fail; on failure the sync loop logs and skips
/// the tick, leaving the registry unchanged.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_all_rule_groups(
        &self,
    ) -> Result<HashMap<TenantId, RuleGroupList>, RuleStoreError>;
}

#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use std::sync::Mutex;

    use super::*;

    /// An in-memory rule store whose contents a test can swap out between
    /// sync-loop ticks, including forcing the next fetch to fail.
    pub struct InMemoryRuleStore {
        state: Mutex<State>,
    }

    struct State {
        groups: HashMap<TenantId, RuleGroupList>,
        fail_next: bool,
    }

    impl InMemoryRuleStore {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    groups: HashMap::new(),
                    fail_next: false,
                }),
            }
        }

        pub fn set(&self, groups: HashMap<TenantId, RuleGroupList>) {
            self.state.lock().unwrap().groups = groups;
        }

        pub fn fail_next_fetch(&self) {
            self.state.lock().unwrap().fail_next = true;
        }
    }

    impl Default for InMemoryRuleStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RuleStore for InMemoryRuleStore {
        async fn list_all_rule_groups(
            &self,
        ) -> Result<HashMap<TenantId, RuleGroupList>, RuleStoreError> {
            let mut state = self.state.lock().unwrap();
            if std::mem::take(&mut state.fail_next) {
                return Err(RuleStoreError("simulated store failure".to_string()));
            }
            Ok(state.groups.clone())
        }
    }
}
