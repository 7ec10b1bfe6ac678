use ruler_api::TenantId;

/// Errors raised while materialising a tenant's rule groups to disk.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("failed to write rule file {path}: {source}")]
    Write {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove stale rule file {path}: {source}")]
    Remove {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise rule group {namespace}/{name}: {source}")]
    Serialize {
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the ring membership adapter.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring query for key {key} failed: {reason}")]
    OwnerLookup { key: u32, reason: String },
    #[error("failed to enumerate ring replicas: {reason}")]
    Enumerate { reason: String },
}

/// Errors raised constructing or reconciling a tenant's evaluator.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tenant {tenant}: rule mapping failed: {source}")]
    Mapping {
        tenant: TenantId,
        #[source]
        source: MapperError,
    },
    #[error("tenant {tenant}: notifier construction rejected its configuration: {reason}")]
    InvalidNotifierConfig { tenant: TenantId, reason: String },
    #[error("tenant {tenant}: failed to reload evaluator from mapped rule files: {source}")]
    Reload {
        tenant: TenantId,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the notifier pool.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("invalid notifier configuration: {0}")]
    InvalidConfig(String),
    #[error("delivery request to {receiver} failed: {source}")]
    Delivery {
        receiver: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors raised aggregating the rule inspection RPC across the ring.
#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("peer {peer} failed to answer rule inspection: {reason}")]
    PeerFailed { peer: String, reason: String },
    #[error(transparent)]
    Ring(#[from] RingError),
}

/// Fatal, startup-time configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml_edit::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
