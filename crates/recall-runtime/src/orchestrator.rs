//! Retry-until-clean evaluation across rounds.
//!
//! Each round asks the model for every selected rule. Rules it gets wrong
//! are appended to the dictionary as extra rules for the next round, so the
//! prompt grows with the model's mistakes until a round comes back clean or
//! the round limit is reached.

use recall_core::{PromptTemplate, Rule, Validator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ConfigError, RuntimeConfig};
use crate::dispatch::{DispatchError, Dispatcher, RunReport};
use crate::providers::Model;
use crate::resilience::LlmUsage;

/// Result of a multi-round evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    /// One report per round, in order
    pub rounds: Vec<RunReport>,

    /// Extra rules in the prompt after the last round
    pub extra_rules: Vec<Rule>,

    /// Whether the last round had no failures
    pub clean: bool,
}

impl CampaignReport {
    /// The final round, if any ran.
    pub fn last_round(&self) -> Option<&RunReport> {
        self.rounds.last()
    }

    /// Token usage summed over all rounds.
    pub fn usage(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for round in &self.rounds {
            total.merge(&round.usage);
        }
        total
    }
}

/// Runs dispatcher rounds until the model recalls every rule.
pub struct Orchestrator {
    dispatcher: Dispatcher,
    config: RuntimeConfig,
}

impl Orchestrator {
    /// Orchestrator over `model` with validated `config`.
    pub fn new(model: Arc<dyn Model>, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let validator = config.validator()?;
        Ok(Self::with_validator(model, validator, config))
    }

    fn with_validator(model: Arc<dyn Model>, validator: Validator, config: RuntimeConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(model, validator, config.dispatch()),
            config,
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run a single round with `extra` rules appended to the dictionary.
    pub async fn run_round(
        &self,
        selected: &[Rule],
        extra: &[Rule],
    ) -> Result<RunReport, DispatchError> {
        let template = PromptTemplate::new(selected, extra, self.config.rule_copies);
        self.dispatcher
            .run(selected, |rule| template.build(rule))
            .await
    }

    /// Repeat rounds over `selected` until one is clean or `max_rounds` is
    /// reached. `extra` seeds the extra rules of the first round.
    pub async fn run_until_clean(
        &self,
        selected: &[Rule],
        extra: Vec<Rule>,
    ) -> Result<CampaignReport, DispatchError> {
        let mut extra_rules = extra;
        let mut rounds = Vec::new();

        loop {
            let round = rounds.len() + 1;
            tracing::info!(
                round,
                selected = selected.len(),
                extra = extra_rules.len(),
                "Starting round"
            );

            let report = self.run_round(selected, &extra_rules).await?;
            tracing::info!(
                round,
                total = report.completed,
                fail = report.failed,
                "Round finished"
            );

            let clean = report.is_clean();
            extra_rules.extend(report.failed_rules.iter().cloned());
            rounds.push(report);

            if clean {
                return Ok(CampaignReport {
                    rounds,
                    extra_rules,
                    clean: true,
                });
            }

            if self.config.max_rounds.is_some_and(|max| rounds.len() >= max) {
                tracing::warn!(rounds = rounds.len(), "Round limit reached");
                return Ok(CampaignReport {
                    rounds,
                    extra_rules,
                    clean: false,
                });
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatcher", &self.dispatcher)
            .field("max_rounds", &self.config.max_rounds)
            .finish()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    model: Option<Arc<dyn Model>>,
    config: RuntimeConfig,
    validator: Option<Validator>,
}

impl OrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            model: None,
            config: RuntimeConfig::default(),
            validator: None,
        }
    }

    /// Set the model.
    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `validator` instead of one built from the config's pattern.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        let model = self
            .model
            .ok_or_else(|| ConfigError::Invalid("No model set".to_string()))?;

        match self.validator {
            Some(validator) => {
                self.config.validate()?;
                Ok(Orchestrator::with_validator(model, validator, self.config))
            }
            None => Orchestrator::new(model, self.config),
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
