use anyhow::{anyhow, Context as AnyhowContext, Result};
use canon_extract::NoText;
use canon_ir::{json_schema, DiagramIr, SourceFormat};
use canon_pipeline::{eval_json, ConversionStats, Converter, NoRepair, PatchDirRepairer, Repairer};
use clap::{Args, Parser, Subcommand};
use config::{CanonConfig, Overrides};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod rules;

#[derive(Parser)]
#[command(name = "canon")]
#[command(about = "Diagram canonicalization and rule index maintenance", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./canon.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Conversion cache and artifact directory (overrides config and CANON_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Cache backend: file|memory
    #[arg(long, global = true)]
    cache_backend: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert diagram sources into canonical IR and Mermaid
    Convert(ConvertArgs),

    /// Check an IR file against the schema and structural rules
    Eval(EvalArgs),

    /// Render an IR file as Mermaid
    Render(RenderArgs),

    /// Print the JSON schema of the canonical IR
    Schema,

    /// Rule extraction, consolidation and staleness
    #[command(subcommand)]
    Rules(rules::RulesCommand),
}

#[derive(Args)]
struct ConvertArgs {
    /// Diagram files (Draw.io, SVG, DSL, Mermaid, PNG/JPEG)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Source format; sniffed from the content when omitted
    #[arg(long)]
    format: Option<String>,

    /// Directory holding `<source_hash>.patch.json` repair patches
    #[arg(long)]
    patch_dir: Option<PathBuf>,

    /// Print conversion records as JSON instead of Mermaid
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct EvalArgs {
    /// Canonical IR JSON file
    ir: PathBuf,

    /// Partial IR the candidate was repaired from (enables drift checks)
    #[arg(long)]
    partial: Option<PathBuf>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// Canonical IR JSON file
    ir: PathBuf,
}

#[derive(Serialize)]
struct ConvertedSource {
    source: String,
    cached: bool,
    record: canon_pipeline::ConversionRecord,
    rejected_ops: Vec<canon_pipeline::RejectedOp>,
}

#[derive(Serialize)]
struct ConvertOutput {
    results: Vec<ConvertedSource>,
    stats: ConversionStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers
    let json_output = match &cli.command {
        Commands::Convert(args) => args.json,
        Commands::Eval(args) => args.json,
        Commands::Rules(cmd) => cmd.json(),
        _ => false,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let overrides = Overrides {
        cache_dir: cli.cache_dir.clone(),
        cache_backend: cli.cache_backend.clone(),
    };
    let cfg = CanonConfig::resolve(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Convert(args) => run_convert(args, cfg).await?,
        Commands::Eval(args) => run_eval(args, cfg)?,
        Commands::Render(args) => run_render(args)?,
        Commands::Schema => println!("{}", serde_json::to_string_pretty(&json_schema())?),
        Commands::Rules(cmd) => rules::run(cmd, cfg).await?,
    }

    Ok(())
}

async fn run_convert(args: ConvertArgs, cfg: CanonConfig) -> Result<()> {
    let format = args
        .format
        .as_deref()
        .map(|raw| {
            SourceFormat::parse(raw).ok_or_else(|| {
                anyhow!("Unknown format '{raw}' (expected drawio|svg|dsl|mermaid|raster)")
            })
        })
        .transpose()?;

    let repairer: Arc<dyn Repairer> = match &args.patch_dir {
        Some(dir) => Arc::new(PatchDirRepairer::new(dir.clone())),
        None => Arc::new(NoRepair),
    };
    let converter = Converter::new(cfg.pipeline, cfg.cache, repairer, Arc::new(NoText));

    // An unreadable file is a failed item; the rest of the batch still runs
    let mut sources = Vec::with_capacity(args.files.len());
    let mut read_errors = Vec::new();
    for path in &args.files {
        match tokio::fs::read(path).await {
            Ok(bytes) => sources.push((path.display().to_string(), bytes)),
            Err(err) => {
                log::warn!("Failed to read {}: {err}", path.display());
                read_errors.push(format!("Failed to read {}: {err}", path.display()));
            }
        }
    }
    let single = args.files.len() == 1;

    let (outputs, mut stats) = converter.convert_all(sources, format).await;
    for error in read_errors {
        stats.add_error(error);
    }
    let errors = stats.errors.clone();
    for (name, output) in &outputs {
        if !output.record.valid {
            log::warn!(
                "{name}: best effort after {} attempt(s): {}",
                output.record.attempts,
                output.record.violations.join("; ")
            );
        }
    }

    if args.json {
        let results = outputs
            .into_iter()
            .map(|(source, output)| ConvertedSource {
                source,
                cached: output.cached,
                record: output.record,
                rejected_ops: output.rejected_ops,
            })
            .collect();
        let body = ConvertOutput { results, stats };
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if single {
        if let Some((_, output)) = outputs.first() {
            print!("{}", output.rendered);
        }
    } else {
        for (name, output) in &outputs {
            println!(
                "{name}: {} {} -> {}",
                output.record.method.as_str(),
                if output.record.valid { "valid" } else { "best-effort" },
                output.record.rendered_ref
            );
        }
        println!(
            "{} converted ({} cached, {} best effort), {} failed",
            stats.converted,
            stats.cache_hits,
            stats.best_effort,
            stats.errors.len()
        );
    }

    if !errors.is_empty() {
        for error in &errors {
            eprintln!("Error: {error}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn read_ir(path: &Path) -> Result<DiagramIr> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    DiagramIr::from_json(&raw).with_context(|| format!("Invalid IR in {}", path.display()))
}

fn run_eval(args: EvalArgs, cfg: CanonConfig) -> Result<()> {
    let raw = std::fs::read_to_string(&args.ir)
        .with_context(|| format!("Failed to read {}", args.ir.display()))?;
    let partial = match &args.partial {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    // An unparseable document is a schema violation in the report, not a CLI error
    let report = eval_json(&raw, partial.as_deref(), cfg.pipeline.drift_threshold);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", if report.ok { "ok" } else { "not ok" });
        for issue in &report.violations {
            println!("violation: {}", issue.message);
        }
        for issue in &report.warnings {
            println!("warning: {}", issue.message);
        }
        println!(
            "{} nodes, {} edges, {} groups",
            report.summary.nodes, report.summary.edges, report.summary.groups
        );
    }

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let ir = read_ir(&args.ir)?;
    print!("{}", canon_render::render(&ir));
    Ok(())
}
