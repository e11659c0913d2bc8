//! Occam - Bayesian mode-switching experiments CLI
//!
//! The `occam` command runs experiment protocols against an
//! OpenAI-compatible chat endpoint and writes results under `output.dir`.
//!
//! ## Commands
//!
//! - `curve`: mean φ as evidence count k grows
//! - `brittleness`: evidence-order sensitivity vs. paraphrase robustness
//! - `inoculation`: identity framing as a gate on evidence-driven modes
//! - `hysteresis`: k swept up then down over nested evidence
//! - `cache`: inspect or clear the response cache

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use occam_core::cache::CacheMode;
use occam_core::data::{load_evidence_pool, load_prompts, truncate_prompts};
use occam_core::metrics::METRICS;
use occam_core::orchestrator::{
    BrittlenessReport, EvidenceCurveReport, HysteresisReport, InoculationReport,
};
use occam_core::reporting::{
    render_brittleness_md, render_curve_md, render_hysteresis_md, render_inoculation_md,
    write_markdown, write_records_jsonl, write_report_json, ArtifactPaths,
};
use occam_core::{
    build_scorer, BatchSummary, ChatProvider, DryRunProvider, EngineError, FsResponseStore,
    NullResponseStore, OccamConfig, OpenAiCompatClient, Orchestrator, PromptPair, Protocol,
    ResponseCache, ResponseStore, TrialRecord,
};

const DEFAULT_CONFIG: &str = "occam.toml";

#[derive(Parser)]
#[command(name = "occam")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evidence-driven mode switching experiments for language models", long_about = None)]
struct Cli {
    /// Configuration file (default: ./occam.toml when present)
    #[arg(short, long, global = true, env = "OCCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep k and report mean φ per evidence count
    Curve(RunArgs),

    /// Correlate evidence-order sensitivity with paraphrase robustness
    Brittleness(RunArgs),

    /// Compare φ across system-prompt framings at fixed evidence
    Inoculation(RunArgs),

    /// Sweep k up then down and look for a hysteresis gap
    Hysteresis(RunArgs),

    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count
    Stats,
    /// Delete every cached response
    Clear,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Always query the provider; responses are still recorded
    #[arg(long)]
    no_cache: bool,

    /// Answer locally without calling the provider
    #[arg(long)]
    dry_run: bool,

    /// Use only the first N test prompts
    #[arg(long)]
    max_prompts: Option<usize>,

    /// Override output.dir
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the number of concurrent trials
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    occam_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Curve(args) => cmd_curve(config, &args).await,
        Commands::Brittleness(args) => cmd_brittleness(config, &args).await,
        Commands::Inoculation(args) => cmd_inoculation(config, &args).await,
        Commands::Hysteresis(args) => cmd_hysteresis(config, &args).await,
        Commands::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats(&config),
            CacheAction::Clear => cmd_cache_clear(&config),
        },
    };
    METRICS.flush();
    result
}

fn load_config(path: Option<&Path>) -> Result<OccamConfig> {
    match path {
        Some(path) => OccamConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            OccamConfig::load(DEFAULT_CONFIG).context("Failed to load occam.toml")
        }
        None => Ok(OccamConfig::default()),
    }
}

fn apply_overrides(config: &mut OccamConfig, args: &RunArgs) {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    if args.no_cache {
        config.cache.mode = CacheMode::WriteOnly;
    }
}

/// The on-disk store, or a pass-through store when the directory is unusable.
fn open_store(config: &OccamConfig) -> Arc<dyn ResponseStore> {
    match FsResponseStore::new(&config.cache.dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                dir = %config.cache.dir.display(),
                error = %e,
                "cache directory unavailable, running without a cache"
            );
            Arc::new(NullResponseStore)
        }
    }
}

fn build_orchestrator(mut config: OccamConfig, args: &RunArgs) -> Result<(Orchestrator, OccamConfig)> {
    apply_overrides(&mut config, args);
    config.validate()?;

    let scorer = build_scorer(&config.scoring).context("Failed to build scorer")?;
    let mut engine = config.engine_config();

    let provider: Arc<dyn ChatProvider>;
    let cache: Arc<ResponseCache>;
    if args.dry_run {
        // Separate identity and a throwaway cache so canned replies never
        // land under a real provider's fingerprints.
        engine.provider_name = "dry-run".to_string();
        provider = Arc::new(DryRunProvider::new());
        cache = Arc::new(ResponseCache::in_memory());
    } else {
        let client = OpenAiCompatClient::from_config(&config.provider)
            .context("Failed to configure provider client")?;
        provider = Arc::new(client);
        cache = Arc::new(ResponseCache::new(open_store(&config), config.cache.mode));
    }

    info!(
        provider = %engine.provider_name,
        model = %engine.model,
        seed = engine.seed,
        concurrency = engine.concurrency,
        cache_mode = ?cache.mode(),
        "engine configured"
    );

    let orchestrator = Orchestrator::new(engine, provider, cache, scorer)?;

    let handle = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight trials");
            handle.cancel();
        }
    });

    Ok((orchestrator, config))
}

fn load_base_prompts(config: &OccamConfig, args: &RunArgs) -> Result<Vec<occam_core::TestPrompt>> {
    let prompts = load_prompts(&config.data.prompts_path).with_context(|| {
        format!(
            "Failed to load prompts from {}",
            config.data.prompts_path.display()
        )
    })?;
    Ok(truncate_prompts(prompts, args.max_prompts))
}

fn load_pool(config: &OccamConfig) -> Result<occam_core::EvidencePool> {
    load_evidence_pool(&config.data.evidence_path).with_context(|| {
        format!(
            "Failed to load evidence from {}",
            config.data.evidence_path.display()
        )
    })
}

/// Write records, report and markdown; print the markdown.
fn publish<T: Serialize>(
    config: &OccamConfig,
    protocol: Protocol,
    report: &T,
    records: &[TrialRecord],
    markdown: &str,
) -> Result<()> {
    let paths = ArtifactPaths::new(&config.output.dir, protocol, Utc::now());
    write_records_jsonl(&paths.records, records, config.output.save_raw)?;
    write_report_json(&paths.report, report)?;
    write_markdown(&paths.markdown, markdown)?;

    println!("{markdown}");
    println!("Records:  {}", paths.records.display());
    println!("Report:   {}", paths.report.display());
    println!("Summary:  {}", paths.markdown.display());
    Ok(())
}

/// One-line account of a batch: attempted, scored, failures by kind, skipped.
fn summary_line(summary: &BatchSummary) -> String {
    let failed = if summary.failed.is_empty() {
        "0".to_string()
    } else {
        summary
            .failed
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "attempted {} of {}, scored {}, failed {}, skipped {}",
        summary.attempted, summary.planned, summary.scored, failed, summary.skipped
    )
}

/// Print the summary of a stopped batch and write the records it finished.
fn salvage(config: &OccamConfig, protocol: Protocol, err: EngineError) -> anyhow::Error {
    if let Some((summary, records)) = err.partial_batch() {
        println!("Batch stopped: {}", summary_line(summary));
        let paths = ArtifactPaths::new(&config.output.dir, protocol, Utc::now());
        match write_records_jsonl(&paths.records, records, config.output.save_raw) {
            Ok(()) => println!("Partial records: {}", paths.records.display()),
            Err(e) => warn!(
                path = %paths.records.display(),
                error = %e,
                "failed to write partial records"
            ),
        }
    }
    err.into()
}

async fn cmd_curve(config: OccamConfig, args: &RunArgs) -> Result<()> {
    let (orchestrator, config) = build_orchestrator(config, args)?;
    let pool = load_pool(&config)?;
    let prompts = load_base_prompts(&config, args)?;
    let params = config.experiment.curve_params();

    println!(
        "Evidence curve: {} evidence items, {} prompts, k = {:?}",
        pool.len(),
        prompts.len(),
        params.k_values
    );
    let report: EvidenceCurveReport =
        occam_core::run_evidence_curve(&orchestrator, &pool, &prompts, &params)
            .await
            .map_err(|e| salvage(&config, Protocol::EvidenceCurve, e))?;
    let markdown = render_curve_md(&report);
    publish(&config, Protocol::EvidenceCurve, &report, &report.records, &markdown)
}

async fn cmd_brittleness(config: OccamConfig, args: &RunArgs) -> Result<()> {
    let (orchestrator, config) = build_orchestrator(config, args)?;
    let pool = load_pool(&config)?;
    let base = load_base_prompts(&config, args)?;
    let paraphrases = load_prompts(&config.data.paraphrases_path).with_context(|| {
        format!(
            "Failed to load paraphrases from {}",
            config.data.paraphrases_path.display()
        )
    })?;
    let pairs = PromptPair::pair_by_group(&base, &paraphrases);
    let params = config.experiment.brittleness_params();

    println!(
        "Brittleness: {} prompt groups, k = {:?}",
        pairs.len(),
        params.k_values
    );
    let report: BrittlenessReport =
        occam_core::run_brittleness(&orchestrator, &pool, &pairs, &params)
            .await
            .map_err(|e| salvage(&config, Protocol::Brittleness, e))?;
    let markdown = render_brittleness_md(&report);
    publish(&config, Protocol::Brittleness, &report, &report.records, &markdown)
}

async fn cmd_inoculation(config: OccamConfig, args: &RunArgs) -> Result<()> {
    let (orchestrator, config) = build_orchestrator(config, args)?;
    let pool = load_pool(&config)?;
    let prompts = load_base_prompts(&config, args)?;
    let params = config.inoculation.clone();

    println!(
        "Inoculation: {} conditions, {} prompts, k = {:?}",
        params.conditions.len(),
        prompts.len(),
        params.k_values
    );
    let report: InoculationReport =
        occam_core::run_inoculation(&orchestrator, &pool, &prompts, &params)
            .await
            .map_err(|e| salvage(&config, Protocol::Inoculation, e))?;
    let markdown = render_inoculation_md(&report);
    publish(&config, Protocol::Inoculation, &report, &report.records, &markdown)
}

async fn cmd_hysteresis(config: OccamConfig, args: &RunArgs) -> Result<()> {
    let (orchestrator, config) = build_orchestrator(config, args)?;
    let pool = load_pool(&config)?;
    let prompts = load_base_prompts(&config, args)?;
    let params = config.hysteresis.clone();

    println!(
        "Hysteresis: {} prompts, k = {:?} then reversed",
        prompts.len(),
        params.k_values
    );
    let report: HysteresisReport =
        occam_core::run_hysteresis(&orchestrator, &pool, &prompts, &params)
            .await
            .map_err(|e| salvage(&config, Protocol::Hysteresis, e))?;
    let markdown = render_hysteresis_md(&report);
    publish(&config, Protocol::Hysteresis, &report, &report.records, &markdown)
}

fn cmd_cache_stats(config: &OccamConfig) -> Result<()> {
    let store = FsResponseStore::new(&config.cache.dir)
        .with_context(|| format!("Failed to open cache {}", config.cache.dir.display()))?;
    let cache = ResponseCache::new(Arc::new(store), config.cache.mode);
    let stats = cache.stats()?;
    println!("Cache dir: {}", config.cache.dir.display());
    println!("Entries:   {}", stats.entries);
    println!("Mode:      {}", serde_json::to_string(&stats.mode)?.trim_matches('"'));
    Ok(())
}

fn cmd_cache_clear(config: &OccamConfig) -> Result<()> {
    let store = FsResponseStore::new(&config.cache.dir)
        .with_context(|| format!("Failed to open cache {}", config.cache.dir.display()))?;
    let removed = store.clear()?;
    println!(
        "Removed {} cached response(s) from {}",
        removed,
        config.cache.dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use occam_core::FailureKind;

    fn args() -> RunArgs {
        RunArgs {
            no_cache: false,
            dry_run: false,
            max_prompts: None,
            output_dir: None,
            seed: None,
            concurrency: None,
        }
    }

    #[test]
    fn cli_parses_protocol_flags() {
        let cli = Cli::try_parse_from([
            "occam",
            "--json",
            "curve",
            "--no-cache",
            "--dry-run",
            "--max-prompts",
            "3",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Curve(args) => {
                assert!(args.no_cache && args.dry_run);
                assert_eq!(args.max_prompts, Some(3));
            }
            _ => panic!("expected curve"),
        }
    }

    #[test]
    fn cli_parses_cache_commands() {
        let cli = Cli::try_parse_from(["occam", "cache", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Clear
            }
        ));
    }

    #[test]
    fn no_cache_still_records() {
        let mut config = OccamConfig::default();
        apply_overrides(
            &mut config,
            &RunArgs {
                no_cache: true,
                seed: Some(9),
                ..args()
            },
        );
        assert_eq!(config.cache.mode, CacheMode::WriteOnly);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn summary_line_lists_failures_by_kind() {
        let mut summary = BatchSummary {
            planned: 8,
            attempted: 3,
            scored: 1,
            skipped: 5,
            ..BatchSummary::default()
        };
        assert_eq!(
            summary_line(&summary),
            "attempted 3 of 8, scored 1, failed 0, skipped 5"
        );
        summary.failed.insert(FailureKind::ProviderTransient, 1);
        summary.failed.insert(FailureKind::ProviderFatal, 1);
        assert_eq!(
            summary_line(&summary),
            "attempted 3 of 8, scored 1, failed provider_transient=1, provider_fatal=1, skipped 5"
        );
    }

    #[test]
    fn stopped_batch_writes_partial_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OccamConfig::default();
        config.output.dir = dir.path().to_path_buf();

        let err = salvage(
            &config,
            Protocol::EvidenceCurve,
            EngineError::Cancelled {
                summary: BatchSummary {
                    planned: 2,
                    skipped: 2,
                    ..BatchSummary::default()
                },
                records: Vec::new(),
            },
        );
        assert_eq!(err.to_string(), "batch cancelled after 0 of 2 trials");

        let written: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("_records.jsonl"));
    }

    #[test]
    fn other_errors_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OccamConfig::default();
        config.output.dir = dir.path().join("out");

        let err = salvage(&config, Protocol::Hysteresis, EngineError::Config("bad".into()));
        assert_eq!(err.to_string(), "invalid configuration: bad");
        assert!(!config.output.dir.exists());
    }

    #[tokio::test]
    async fn dry_run_needs_no_credentials() {
        let mut config = OccamConfig::default();
        config.provider.api_key_env = "OCCAM_TEST_SURELY_UNSET_KEY".into();
        let (orchestrator, _) = build_orchestrator(
            config,
            &RunArgs {
                dry_run: true,
                ..args()
            },
        )
        .unwrap();
        assert_eq!(orchestrator.config().provider_name, "dry-run");
    }
}
