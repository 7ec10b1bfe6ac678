//! Typed configuration surface: CLI flags layered over their documented
//! defaults, with a `validate()` pass run once at startup.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use ruler_api::NotifierConfig;
use serde::Deserialize;

use crate::error::ConfigError;

/// Rule-evaluation service.
#[derive(Parser, Debug, Clone)]
#[command(name = "ruler", about = "Multi-tenant rule-evaluation service")]
pub struct ServiceArgs {
    /// Optional TOML file overlaying defaults before CLI flags are applied.
    #[clap(long)]
    pub config_file: Option<Utf8PathBuf>,

    /// Base URL embedded in alert GeneratorURL.
    #[clap(long = "external.url", default_value = "")]
    pub external_url: String,

    /// Default rule evaluation period.
    #[clap(long = "evaluation-interval", default_value = "1m", value_parser = humantime::parse_duration)]
    pub evaluation_interval: Duration,

    /// Sync loop period.
    #[clap(long = "poll-interval", default_value = "1m", value_parser = humantime::parse_duration)]
    pub poll_interval: Duration,

    /// Static notifier targets, comma separated (non-empty disables discovery-is-mandatory checks).
    #[clap(long = "alertmanager-url", value_delimiter = ',')]
    pub alertmanager_url: Vec<String>,

    /// Use DNS-SRV to discover notifiers.
    #[clap(long = "alertmanager-discovery", default_value_t = false)]
    pub alertmanager_discovery: bool,

    /// DNS refresh period.
    #[clap(long = "alertmanager-refresh-interval", default_value = "1m", value_parser = humantime::parse_duration)]
    pub alertmanager_refresh_interval: Duration,

    /// Select the Alertmanager v2 wire format.
    #[clap(long = "alertmanager-use-v2", default_value_t = false)]
    pub alertmanager_use_v2: bool,

    /// Per-tenant notifier queue capacity.
    #[clap(long = "notification-queue-capacity", default_value_t = 10_000)]
    pub notification_queue_capacity: usize,

    /// Outbound notification HTTP timeout.
    #[clap(long = "notification-timeout", default_value = "10s", value_parser = humantime::parse_duration)]
    pub notification_timeout: Duration,

    /// Max wait for ring hand-off during shutdown.
    #[clap(long = "search-pending-for", default_value = "5m", value_parser = humantime::parse_duration)]
    pub search_pending_for: Duration,

    /// Ring-based shard filtering on/off.
    #[clap(long = "enable-sharding", default_value_t = false)]
    pub enable_sharding: bool,

    /// Periodic flush check.
    #[clap(long = "flush-period", default_value = "1m", value_parser = humantime::parse_duration)]
    pub flush_period: Duration,

    /// On-disk root for materialised rule files.
    #[clap(long = "rule-path", default_value = "/rules")]
    pub rule_path: Utf8PathBuf,

    /// Expose the administrative rule CRUD API.
    #[clap(long = "enable-api", default_value_t = false)]
    pub enable_api: bool,

    /// Admin/inspection HTTP bind address.
    #[clap(long = "http.listen-address", default_value = "0.0.0.0:9090")]
    pub http_listen_address: String,

    /// Log output format: `json` or `compact`.
    #[clap(long = "log.format", default_value = "json")]
    pub log_format: LogFormat,

    /// This replica's own address, as advertised in the ring and dialed by
    /// peers for inspection RPC fan-out.
    #[clap(long = "self-addr", env = "RULER_SELF_ADDR", default_value = "127.0.0.1:9090")]
    pub self_addr: String,

    /// HTTP endpoint backing the rule store adapter. Wiring detail left to
    /// the embedding deployment, not part of the core contract.
    #[clap(long = "rule-store-url", env = "RULER_RULE_STORE_URL")]
    pub rule_store_url: Option<String>,

    /// Remote-write endpoint the sample-writing adapter pushes recording
    /// rule output to.
    #[clap(long = "remote-write-url", env = "RULER_REMOTE_WRITE_URL")]
    pub remote_write_url: Option<String>,

    /// Query endpoint backing the shared expression engine.
    #[clap(long = "query-url", env = "RULER_QUERY_URL")]
    pub query_url: Option<String>,

    /// Deprecated, kept for CLI compatibility; has no effect.
    #[clap(long = "client-timeout", hide = true)]
    pub client_timeout: Option<String>,
    /// Deprecated, kept for CLI compatibility; has no effect.
    #[clap(long = "group-timeout", hide = true)]
    pub group_timeout: Option<String>,
    /// Deprecated, kept for CLI compatibility; has no effect.
    #[clap(long = "num-workers", hide = true)]
    pub num_workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

impl ServiceArgs {
    /// Parse CLI flags, then fill in any flag the user did not pass
    /// explicitly from `--config-file`, if given. CLI flags always win.
    pub fn load() -> Result<Self, ConfigError> {
        use clap::{CommandFactory, FromArgMatches};

        let matches = Self::command().get_matches();
        let mut args =
            Self::from_arg_matches(&matches).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Some(path) = args.config_file.clone() {
            FileOverlay::load(path.as_std_path())?.apply(&mut args, &matches);
        }
        Ok(args)
    }
}

/// Subset of [`ServiceArgs`] that may be set via `--config-file`. Every field
/// is optional so the file may specify only what it wants to override.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileOverlay {
    external_url: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    evaluation_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    poll_interval: Option<Duration>,
    alertmanager_url: Option<Vec<String>>,
    rule_path: Option<Utf8PathBuf>,
    enable_sharding: Option<bool>,
    http_listen_address: Option<String>,
}

impl FileOverlay {
    fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml_edit::de::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply every field not already set on the command line.
    fn apply(self, args: &mut ServiceArgs, matches: &clap::ArgMatches) {
        use clap::parser::ValueSource;
        let from_cli =
            |id: &str| matches!(matches.value_source(id), Some(ValueSource::CommandLine));

        if let Some(v) = self.external_url {
            if !from_cli("external_url") {
                args.external_url = v;
            }
        }
        if let Some(v) = self.evaluation_interval {
            if !from_cli("evaluation_interval") {
                args.evaluation_interval = v;
            }
        }
        if let Some(v) = self.poll_interval {
            if !from_cli("poll_interval") {
                args.poll_interval = v;
            }
        }
        if let Some(v) = self.alertmanager_url {
            if !from_cli("alertmanager_url") {
                args.alertmanager_url = v;
            }
        }
        if let Some(v) = self.rule_path {
            if !from_cli("rule_path") {
                args.rule_path = v;
            }
        }
        if let Some(v) = self.enable_sharding {
            if !from_cli("enable_sharding") {
                args.enable_sharding = v;
            }
        }
        if let Some(v) = self.http_listen_address {
            if !from_cli("http_listen_address") {
                args.http_listen_address = v;
            }
        }
    }
}

/// The fully resolved, validated configuration threaded into every component.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub external_url: String,
    pub evaluation_interval: Duration,
    pub poll_interval: Duration,
    pub search_pending_for: Duration,
    pub enable_sharding: bool,
    pub flush_period: Duration,
    pub rule_path: Utf8PathBuf,
    pub enable_api: bool,
    pub http_listen_address: String,
    pub log_format: LogFormat,
    pub notifier: NotifierConfig,
    pub self_addr: String,
    pub rule_store_url: Option<String>,
    pub remote_write_url: Option<String>,
    pub query_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_args(args: ServiceArgs) -> Result<Self, ConfigError> {
        let notifier = NotifierConfig {
            alertmanager_url: args.alertmanager_url,
            discovery: args.alertmanager_discovery,
            refresh_interval: args.alertmanager_refresh_interval,
            use_v2: args.alertmanager_use_v2,
            queue_capacity: args.notification_queue_capacity,
            notification_timeout: args.notification_timeout,
            external_url: args.external_url.clone(),
        };

        let config = Self {
            external_url: args.external_url,
            evaluation_interval: args.evaluation_interval,
            poll_interval: args.poll_interval,
            search_pending_for: args.search_pending_for,
            enable_sharding: args.enable_sharding,
            flush_period: args.flush_period,
            rule_path: args.rule_path,
            enable_api: args.enable_api,
            http_listen_address: args.http_listen_address,
            log_format: args.log_format,
            notifier,
            self_addr: args.self_addr,
            rule_store_url: args.rule_store_url,
            remote_write_url: args.remote_write_url,
            query_url: args.query_url,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.notifier.discovery && self.notifier.alertmanager_url.is_empty() {
            return Err(ConfigError::Invalid(
                "alertmanager-url must be set unless alertmanager-discovery is enabled"
                    .to_string(),
            ));
        }
        if self.evaluation_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "evaluation-interval must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll-interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> ServiceArgs {
        ServiceArgs::parse_from(["ruler", "--alertmanager-url", "http://alertmanager:9093"])
    }

    #[test]
    fn defaults_match_spec_table() {
        let args = base_args();
        let config = ServiceConfig::from_args(args).expect("valid config");
        assert_eq!(config.evaluation_interval, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.notifier.queue_capacity, 10_000);
        assert_eq!(config.notifier.notification_timeout, Duration::from_secs(10));
        assert_eq!(config.rule_path.as_str(), "/rules");
        assert!(!config.enable_sharding);
    }

    #[test]
    fn rejects_no_notifier_targets_without_discovery() {
        let args = ServiceArgs::parse_from(["ruler"]);
        let err = ServiceConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn discovery_mode_does_not_require_static_targets() {
        let mut args = ServiceArgs::parse_from(["ruler"]);
        args.alertmanager_discovery = true;
        let config = ServiceConfig::from_args(args).expect("discovery mode is self-sufficient");
        assert!(config.notifier.discovery);
    }
}
