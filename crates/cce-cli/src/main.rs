#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cce_core::PipelineResult;
use cce_runtime::providers::OllamaClient;
use cce_runtime::{AiClientFactory, AssessmentPipeline, ProviderKind, ResponseCache, Settings};

#[derive(Parser)]
#[command(
    name = "cce-inspector",
    version,
    about = "LLM-assisted compliance assessment of network device configurations"
)]
struct Cli {
    /// YAML settings file (environment variables override it)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess one device configuration and save the result as JSON
    Assess {
        config_file: PathBuf,
        /// anthropic, openai or local
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        /// Directory holding templates/prompts and config/
        #[arg(long, value_name = "DIR")]
        reference_dir: Option<PathBuf>,
        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Check connectivity to the configured backend and show model details
    Check {
        #[arg(long)]
        provider: Option<ProviderKind>,
    },
    /// List models installed on the local Ollama server
    Models,
    /// Inspect or prune the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    Stats,
    /// Remove every entry
    Clear,
    /// Remove entries older than the TTL
    ClearExpired,
}

#[derive(Debug, Default)]
struct Overrides {
    provider: Option<ProviderKind>,
    output_dir: Option<PathBuf>,
    reference_dir: Option<PathBuf>,
    no_cache: bool,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(provider) = self.provider {
            settings.provider = provider;
        }
        if let Some(dir) = self.output_dir {
            settings.output.dir = dir;
        }
        if let Some(dir) = self.reference_dir {
            settings.pipeline.reference_dir = dir;
        }
        if self.no_cache {
            settings.cache.enabled = false;
        }
    }
}

/// `--verbose` wins over `RUST_LOG`, which wins over the configured level.
fn log_filter(level: &str, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = log_filter(level, verbose);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    Settings::load(path).with_context(|| match path {
        Some(path) => format!("failed to load settings from {}", path.display()),
        None => "failed to load settings from the environment".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_deref())?;
    init_tracing(&settings.logging.level, cli.verbose);

    match cli.command {
        Commands::Assess {
            config_file,
            provider,
            output_dir,
            reference_dir,
            no_cache,
        } => {
            Overrides {
                provider,
                output_dir,
                reference_dir,
                no_cache,
            }
            .apply(&mut settings);
            settings.validate()?;
            tracing::debug!(
                provider = %settings.provider,
                reference_dir = %settings.pipeline.reference_dir.display(),
                cache = settings.cache.enabled,
                "settings resolved"
            );

            let pipeline = AssessmentPipeline::from_settings(&settings)?;
            let result = pipeline
                .run_from_file(&config_file)
                .await
                .with_context(|| format!("assessment of {} failed", config_file.display()))?;

            let saved = result.save_json(&settings.output.dir).with_context(|| {
                format!("failed to write results to {}", settings.output.dir.display())
            })?;
            print_summary(&result);
            println!("\nResults saved to {}", saved.display());
        }
        Commands::Check { provider } => {
            Overrides {
                provider,
                ..Overrides::default()
            }
            .apply(&mut settings);

            let client = AiClientFactory::create_for(settings.provider, &settings)?;
            let connected = client.validate_connection().await;
            let info = client.model_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
            if !connected {
                bail!("{} backend is not reachable with model {}", client.provider(), client.model());
            }
            println!("{} backend OK", client.provider());
        }
        Commands::Models => {
            let client = OllamaClient::new(
                &settings.local.url,
                settings.client_settings(ProviderKind::LocalLlm),
            )?;
            let models = client
                .list_models()
                .await
                .with_context(|| format!("failed to list models on {}", client.server_url()))?;
            if models.is_empty() {
                println!("no models installed on {}", client.server_url());
            }
            for model in models {
                let size = model
                    .size
                    .map(|bytes| format!("{:.1} GB", bytes as f64 / 1e9))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<40} {:>10}  {}",
                    model.name,
                    size,
                    model.modified_at.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Cache { command } => {
            let cache = ResponseCache::new(&settings.cache.dir, settings.cache.ttl);
            match command {
                CacheCommands::Stats => {
                    let stats = cache.get_stats()?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                CacheCommands::Clear => {
                    let removed = cache.clear()?;
                    println!("removed {removed} cache entries");
                }
                CacheCommands::ClearExpired => {
                    let removed = cache.clear_expired()?;
                    println!("removed {removed} expired cache entries");
                }
            }
        }
    }

    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let asset = &result.asset_info;
    let summary = &result.summary;

    println!("Device:   {} ({} {} {})", asset.hostname, asset.vendor, asset.os_type, asset.os_version);
    println!("Role:     {} {}", asset.device_role, asset.device_type);
    println!(
        "Checks:   {} applicable, {} excluded",
        result.criteria_mapping.applicable.len(),
        result.criteria_mapping.excluded.len()
    );
    println!(
        "Results:  {} passed, {} failed, {} manual review, {} not configured",
        summary.passed, summary.failed, summary.manual_review, summary.not_configured
    );
    println!(
        "Score:    {:.2}% pass, average {:.2}",
        summary.pass_percentage, summary.average_score
    );
    println!("Elapsed:  {:.1}s", result.execution_time_seconds);

    let critical = result.vulnerability_assessment.critical_findings();
    if !critical.is_empty() {
        println!("\nFailed checks:");
        for finding in critical {
            println!("  {:<16} score {:>5.1}  {}", finding.check_id, finding.score, finding.findings);
        }
    }
}
