use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use triage_dedup::{cluster_report, PrevalenceRanker, SimilarityClusterer};
use triage_matcher::{BuildInput, Diagnostic, RuleSet, TriageEngine, TriageSummary};
use triage_protocol::{serialize_json_pretty, BuildReport, ClusterReport, Ranking};

mod builds;
mod config;

pub use builds::{build_key, discover, Discovery, LoadFailure, LocalBuild, BUILD_MANIFEST};
pub use config::TriageConfig;

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Match failed CI builds against known defect signatures", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Triage every build under a directory, cluster and rank the results
    Run(RunArgs),

    /// Triage a single build directory
    Match(MatchArgs),

    /// Load a rule database and report what it covers
    #[command(name = "check-rules")]
    CheckRules(CheckRulesArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Rule database (JSON or TOML)
    #[arg(long)]
    rules: PathBuf,

    /// Build tree laid out as <pipeline_id>/<job>/
    #[arg(long)]
    builds: PathBuf,

    /// Triage config (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the JSON document here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(long)]
    rules: PathBuf,

    /// Directory holding the build's artifacts
    #[arg(long)]
    build: PathBuf,

    /// Job type the build ran as
    #[arg(long)]
    job: String,

    #[arg(long, default_value = "local")]
    pipeline: String,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct CheckRulesArgs {
    #[arg(long)]
    rules: PathBuf,
}

#[derive(Serialize)]
struct RunSummary {
    #[serde(flatten)]
    triage: TriageSummary,
    clusters: usize,
    /// Build directories that could not be loaded and were left out.
    unloaded: usize,
}

#[derive(Serialize)]
struct RunOutput {
    summary: RunSummary,
    builds: Vec<BuildReport>,
    clusters: ClusterReport,
    ranking: Ranking,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    diagnostics: BTreeMap<String, Vec<Diagnostic>>,
}

#[derive(Serialize)]
struct MatchOutput {
    report: BuildReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct CheckRulesOutput {
    rules: usize,
    usable: usize,
    inert: usize,
    coverage: BTreeMap<String, usize>,
    diagnostics: Vec<Diagnostic>,
}

pub fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Match(args) => match_one(args),
        Commands::CheckRules(args) => check_rules(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<TriageConfig> {
    match path {
        Some(path) => TriageConfig::load(path),
        None => Ok(TriageConfig::default()),
    }
}

fn load_rules(path: &Path) -> Result<RuleSet> {
    RuleSet::from_file(path).with_context(|| format!("Failed to load rules {}", path.display()))
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let engine = TriageEngine::new(load_rules(&args.rules)?, config.matcher.clone())?;
    let clusterer = SimilarityClusterer::new(&config.dedup)?;

    let discovery = discover(&args.builds)?;
    let pipelines = discovery.pipeline_ids();

    let mut diagnostics: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
    let mut unloaded = 0;
    for failure in &discovery.failures {
        unloaded += 1;
        diagnostics
            .entry(failure.key())
            .or_default()
            .push(Diagnostic::UnloadableBuild {
                reason: failure.reason.clone(),
            });
    }

    let mut loaded = Vec::with_capacity(discovery.builds.len());
    for local in discovery.builds {
        match local.artifacts() {
            Ok(view) => loaded.push((local, view)),
            Err(err) => {
                log::warn!("Skipping build {}: {err:#}", local.key());
                unloaded += 1;
                diagnostics
                    .entry(local.key())
                    .or_default()
                    .push(Diagnostic::UnloadableBuild {
                        reason: format!("{err:#}"),
                    });
            }
        }
    }

    let inputs = loaded.iter().map(|(local, view)| {
        BuildInput::new(local.build.clone(), local.status, view).with_metadata(local.metadata.clone())
    });
    let (triaged, summary) = engine.triage_all(inputs);

    let mut reports = Vec::with_capacity(triaged.len());
    let mut matches = Vec::new();
    let mut unfiled = Vec::new();
    for triage in triaged {
        if triage.skipped {
            continue;
        }
        reports.push(triage.report());
        if !triage.diagnostics.is_empty() {
            diagnostics
                .entry(build_key(&triage.build.pipeline_id, &triage.build.job))
                .or_default()
                .extend(triage.diagnostics);
        }
        matches.extend(triage.matches);
        unfiled.extend(triage.unfiled);
    }

    let clusters = clusterer.cluster(unfiled, &pipelines);
    let ranking = PrevalenceRanker::new(config.matcher.catch_all_defect.clone()).rank(&clusters, &matches);

    let output = RunOutput {
        summary: RunSummary {
            triage: summary,
            clusters: clusters.len(),
            unloaded,
        },
        builds: reports,
        clusters: cluster_report(&clusters),
        ranking,
        diagnostics,
    };
    write_output(&serialize_json_pretty(&output)?, args.output.as_deref())
}

fn match_one(args: MatchArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let engine = TriageEngine::new(load_rules(&args.rules)?, config.matcher)?;

    let local = LocalBuild::load(&args.build, &args.pipeline, &args.job)?;
    let view = local.artifacts()?;
    let input = BuildInput::new(local.build.clone(), local.status, &view)
        .with_metadata(local.metadata.clone());
    let triage = engine.triage_build(&input);

    let output = MatchOutput {
        report: triage.report(),
        diagnostics: triage.diagnostics,
    };
    write_output(&serialize_json_pretty(&output)?, None)
}

fn check_rules(args: CheckRulesArgs) -> Result<()> {
    let rules = load_rules(&args.rules)?;
    if rules.usable_len() == 0 {
        bail!(
            "No usable defect rules loaded from {} ({} defined)",
            args.rules.display(),
            rules.len()
        );
    }
    let output = CheckRulesOutput {
        rules: rules.len(),
        usable: rules.usable_len(),
        inert: rules.rules().iter().filter(|r| r.is_inert()).count(),
        coverage: rules.job_coverage(),
        diagnostics: rules.diagnostics().to_vec(),
    };
    write_output(&serialize_json_pretty(&output)?, None)
}

fn write_output(json: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
