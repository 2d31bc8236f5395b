//! # recall-runtime
//!
//! Concurrent evaluation of key→value recall against a remote model.
//!
//! This crate runs one request/validate job per rule through a bounded
//! worker pool, tolerates slow or hung calls by cancel-and-resubmit, and
//! stops a run once too many rules have failed.
//!
//! ## Layers
//!
//! - [`providers`]: the [`Model`] call boundary and its HTTP backends
//! - [`dispatch`]: the [`Dispatcher`] and its job window
//! - [`orchestrator`]: rounds that fold failed rules back into the prompt
//! - [`config`]: YAML-loadable run settings
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::{load_rules, Query, Validator};
//! use recall_runtime::{DispatchConfig, Dispatcher, ScriptedModel};
//! use std::sync::Arc;
//!
//! let rules = load_rules("rules21.txt")?;
//! let model = Arc::new(ScriptedModel::new().answering(&rules));
//! let dispatcher = Dispatcher::new(model, Validator::new(), DispatchConfig::concurrent(4));
//!
//! let report = dispatcher.run(&rules, |rule| Query::user(rule.key())).await?;
//! println!("total: {} fail: {}", report.completed, report.failed);
//! ```

pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod providers;
pub mod resilience;

pub use config::{ConfigError, RuntimeConfig, DEFAULT_JOB_TIMEOUT};
pub use dispatch::{DispatchConfig, DispatchError, Dispatcher, RunReport};
pub use orchestrator::{CampaignReport, Orchestrator, OrchestratorBuilder};
pub use providers::{
    CompletionConfig, CompletionResponse, LlmProvider, Model, ProviderError, ProviderModel,
    ProviderRegistry, ScriptedModel, ScriptedStep, TokenUsage,
};
pub use resilience::{FailureBudget, LlmUsage};
