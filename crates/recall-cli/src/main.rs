use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use recall_core::{concat_rules, load_rules, shuffle_rules};
use recall_runtime::{
    CampaignReport, CompletionConfig, OrchestratorBuilder, ProviderModel, ProviderRegistry,
    RuntimeConfig,
};

/// Seed the rule list is shuffled with unless `--seed` says otherwise.
const DEFAULT_SEED: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "recall", version, about = "Key-value recall evaluation for language models")]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the model for every rule until it recalls them all
    Run(RunArgs),
    /// Parse a rule file and report what it contains
    Check {
        #[arg(long)]
        rules: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, help = "Rule file, one key:value per line")]
    rules: PathBuf,
    #[arg(long, help = "YAML run configuration")]
    config: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long, help = "Model name or alias, e.g. pro-001")]
    model: Option<String>,
    #[arg(long, help = "Parallel calls; 0 runs sequentially")]
    num_workers: Option<usize>,
    #[arg(long, help = "Seconds to sleep between sequential jobs")]
    sleep: Option<u64>,
    #[arg(long, help = "Seconds before a call is aborted and resubmitted")]
    timeout: Option<u64>,
    #[arg(long)]
    max_failures: Option<usize>,
    #[arg(long, help = "Times the rules are repeated in the prompt")]
    rule_copies: Option<usize>,
    #[arg(long, help = "Rule file appended to the prompt dictionary")]
    extra_rules: Option<PathBuf>,
    #[arg(long, help = "Fallback regex for extracting the answer")]
    pattern: Option<String>,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    #[arg(long, help = "Skip shuffling the rule list")]
    no_shuffle: bool,
    #[arg(long)]
    max_rounds: Option<usize>,
}

impl RunArgs {
    /// File config (or defaults) with flags applied on top.
    fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RuntimeConfig::default(),
        };

        if let Some(model) = &self.model {
            config.completion.model = model.clone();
        }
        if let Some(workers) = self.num_workers {
            config.concurrency = workers;
        }
        if let Some(secs) = self.sleep {
            config.inter_job_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = self.max_failures {
            config.max_failures = max;
        }
        if let Some(copies) = self.rule_copies {
            config.rule_copies = copies;
        }
        if let Some(pattern) = &self.pattern {
            config.result_pattern = Some(pattern.clone());
        }
        if self.max_rounds.is_some() {
            config.max_rounds = self.max_rounds;
        }

        config.validate().context("invalid run configuration")?;
        Ok(config)
    }
}

/// Swap in the provider's default model when neither the flags nor the
/// config file named one.
fn apply_provider_default(config: &mut RuntimeConfig, registry: &ProviderRegistry, provider: &str) {
    if config.completion.model != CompletionConfig::default().model {
        return;
    }
    if let Some(model) = registry
        .default_config(provider)
        .and_then(|defaults| defaults["model"].as_str().map(str::to_string))
    {
        config.completion.model = model;
    }
}

#[derive(Serialize)]
struct CheckReport {
    path: PathBuf,
    rules: usize,
    distinct_keys: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match &cli.command {
        Commands::Run(args) => run(args, cli.json).await,
        Commands::Check { rules } => check(rules, cli.json),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: &RunArgs, json: bool) -> Result<()> {
    let registry = ProviderRegistry::with_defaults();
    let mut config = args.runtime_config()?;
    if args.model.is_none() {
        apply_provider_default(&mut config, &registry, &args.provider);
    }

    let mut selected = load_rules(&args.rules)
        .with_context(|| format!("failed to load rules from {}", args.rules.display()))?;
    if selected.is_empty() {
        bail!("{} contains no rules", args.rules.display());
    }
    if !args.no_shuffle {
        shuffle_rules(&mut selected, args.seed);
    }

    let extra = match &args.extra_rules {
        Some(path) => load_rules(path)
            .with_context(|| format!("failed to load extra rules from {}", path.display()))?,
        None => Vec::new(),
    };

    let provider = registry
        .create(&args.provider, &serde_json::json!({}))
        .with_context(|| format!("failed to create provider '{}'", args.provider))?;
    if !provider.health_check().await {
        bail!("provider '{}' is not usable", provider.name());
    }
    tracing::info!(
        provider = provider.name(),
        model = %config.completion.model,
        rules = selected.len(),
        extra = extra.len(),
        workers = config.concurrency,
        "Starting evaluation"
    );

    let model = Arc::new(ProviderModel::new(provider, config.completion.clone()));
    let orchestrator = OrchestratorBuilder::new()
        .model(model)
        .config(config)
        .build()?;

    let campaign = orchestrator.run_until_clean(&selected, extra).await?;
    print_campaign(&campaign, json)
}

fn print_campaign(campaign: &CampaignReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(campaign)?);
        return Ok(());
    }

    for (i, round) in campaign.rounds.iter().enumerate() {
        println!(
            "round {}: total {} fail {} timeouts {}{}",
            i + 1,
            round.completed,
            round.failed,
            round.timeouts,
            if round.stopped_early { " (stopped early)" } else { "" }
        );
    }

    let usage = campaign.usage();
    println!(
        "{} after {} round(s), {} extra rule(s), {} tokens, ~${:.4}",
        if campaign.clean { "clean" } else { "not clean" },
        campaign.rounds.len(),
        campaign.extra_rules.len(),
        usage.total_tokens,
        usage.estimated_cost
    );
    if !campaign.clean {
        println!("extra rules: {}", concat_rules(&campaign.extra_rules));
    }
    Ok(())
}

fn check(path: &Path, json: bool) -> Result<()> {
    let rules = load_rules(path).with_context(|| format!("failed to load {}", path.display()))?;
    let mut keys: Vec<&str> = rules.iter().map(|r| r.key()).collect();
    keys.sort_unstable();
    keys.dedup();

    let report = CheckReport {
        path: path.to_path_buf(),
        rules: rules.len(),
        distinct_keys: keys.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} rules, {} distinct keys",
            report.path.display(),
            report.rules,
            report.distinct_keys
        );
    }
    Ok(())
}
