//! Multi-tenant, horizontally shardable rule-evaluation service core.
//!
//! See `SPEC_FULL.md` at the workspace root for the full design. The short
//! version: a [`sync_loop::SyncLoop`] periodically fetches rule groups from
//! a [`rule_store::RuleStore`], shard-filters them through a
//! [`ring::Ring`], and reconciles a [`registry::EvaluatorRegistry`] that
//! owns one [`evaluator::TenantEvaluator`] per active tenant. Each
//! evaluator routes firing alerts to a [`notifier::NotifierPool`]-managed,
//! per-tenant delivery pipeline.

pub mod adapters;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod http;
pub mod inspection;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod notifier;
pub mod registry;
pub mod ring;
pub mod rule_store;
pub mod service;
pub mod sync_loop;
pub mod tenant_context;

pub use service::{Dependencies, RulerService};
