//! File mapper: materialises a tenant's rule groups as on-disk files
//! under `<rule-path>/<tenantID>/<namespace>`, and reports whether anything
//! changed since the last call for that tenant.
//!
//! Determinism here is load-bearing: non-deterministic serialisation would
//! cause spurious reloads downstream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use ruler_api::{RuleGroup, RuleGroupList, TenantId};

use crate::error::MapperError;

pub struct FileMapper {
    root: Utf8PathBuf,
    state: Mutex<HashMap<TenantId, TenantState>>,
}

#[derive(Default)]
struct TenantState {
    /// Last-written content per namespace, keyed by namespace name. Kept in
    /// memory rather than re-read from disk: it is the single source of
    /// truth for the `changed` signal.
    namespaces: HashMap<String, Vec<u8>>,
}

impl FileMapper {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn tenant_root(&self, tenant: &TenantId) -> Utf8PathBuf {
        self.root.join(tenant.as_str())
    }

    fn namespace_path(&self, tenant: &TenantId, namespace: &str) -> Utf8PathBuf {
        self.tenant_root(tenant).join(namespace)
    }

    /// `MapRules`: returns `(changed, filenames)`. Filenames are stable
    /// across unchanged calls: byte-identical content implies the same path
    /// and no rewrite.
    pub async fn map_rules(
        &self,
        tenant: &TenantId,
        groups: &RuleGroupList,
    ) -> Result<(bool, Vec<Utf8PathBuf>), MapperError> {
        let rendered = render_namespaces(groups)?;

        let mut changed = false;
        let mut filenames = Vec::with_capacity(rendered.len());

        let mut guard = self.state.lock().unwrap();
        let tenant_state = guard.entry(tenant.clone()).or_default();

        let mut seen = std::collections::HashSet::new();
        for (namespace, content) in &rendered {
            seen.insert(namespace.clone());
            let path = self.namespace_path(tenant, namespace);

            let unchanged = tenant_state
                .namespaces
                .get(namespace)
                .is_some_and(|prior| prior == content);

            if !unchanged {
                write_atomic(&path, content).await?;
                tenant_state
                    .namespaces
                    .insert(namespace.clone(), content.clone());
                changed = true;
            }
            filenames.push(path);
        }

        let stale: Vec<String> = tenant_state
            .namespaces
            .keys()
            .filter(|ns| !seen.contains(*ns))
            .cloned()
            .collect();
        for namespace in stale {
            let path = self.namespace_path(tenant, &namespace);
            remove_if_exists(&path).await?;
            tenant_state.namespaces.remove(&namespace);
            changed = true;
        }

        Ok((changed, filenames))
    }
}

/// Group by namespace and render each namespace's groups, in deterministic
/// (sorted) order, to the JSON form the expression engine's rule manager
/// loads files in.
fn render_namespaces(groups: &RuleGroupList) -> Result<Vec<(String, Vec<u8>)>, MapperError> {
    let mut by_namespace: BTreeMap<&str, Vec<&RuleGroup>> = BTreeMap::new();
    for group in groups {
        by_namespace.entry(&group.namespace).or_default().push(group);
    }

    let mut out = Vec::with_capacity(by_namespace.len());
    for (namespace, mut groups) in by_namespace {
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        let content =
            serde_json::to_vec_pretty(&groups).map_err(|source| MapperError::Serialize {
                namespace: namespace.to_string(),
                name: groups
                    .first()
                    .map(|g| g.name.clone())
                    .unwrap_or_default(),
                source,
            })?;
        out.push((namespace.to_string(), content));
    }
    Ok(out)
}

async fn write_atomic(path: &Utf8PathBuf, content: &[u8]) -> Result<(), MapperError> {
    let dir = path.parent().expect("namespace path always has a parent");
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| MapperError::Write {
            path: path.clone(),
            source,
        })?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|source| MapperError::Write {
            path: tmp_path.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| MapperError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(())
}

async fn remove_if_exists(path: &Utf8PathBuf) -> Result<(), MapperError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(MapperError::Remove {
            path: path.clone(),
            source,
        }),
    }
}
