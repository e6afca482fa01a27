use crate::config::CanonConfig;
use anyhow::{anyhow, Context as AnyhowContext, Result};
use canon_rules::layout::{category_name, index_path};
use canon_rules::{check_staleness, extract_document, merge_into_file, refresh, validate, Document};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum RulesCommand {
    /// Extract rules from one document directory and merge them into the category index
    Extract(ExtractArgs),

    /// Report which rule tables and the index are out of date
    Check(CheckArgs),

    /// Re-extract stale and missing documents and merge them
    Refresh(RefreshArgs),

    /// Evaluate a document against the consolidated index
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Document directory (page.md plus *.ir.json diagrams)
    doc_dir: PathBuf,

    /// Governance category; defaults to the parent directory name
    #[arg(long)]
    category: Option<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Category directory holding one directory per document
    category_dir: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct RefreshArgs {
    category_dir: PathBuf,

    #[arg(long)]
    category: Option<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Category directory holding `_all.rules.md`
    category_dir: PathBuf,

    /// Document directory to check
    #[arg(long)]
    doc: PathBuf,

    /// Findings Markdown file to write
    #[arg(long)]
    out: PathBuf,

    /// Rules per batch when the index does not fit the read budget
    #[arg(long)]
    batch_size: Option<usize>,
}

impl RulesCommand {
    pub fn json(&self) -> bool {
        match self {
            Self::Check(args) => args.json,
            Self::Refresh(args) => args.json,
            _ => false,
        }
    }
}

pub async fn run(cmd: RulesCommand, cfg: CanonConfig) -> Result<()> {
    match cmd {
        RulesCommand::Extract(args) => run_extract(args, cfg).await,
        RulesCommand::Check(args) => run_check(args).await,
        RulesCommand::Refresh(args) => run_refresh(args, cfg).await,
        RulesCommand::Validate(args) => run_validate(args, cfg).await,
    }
}

fn resolve_category(flag: Option<String>, cfg: &CanonConfig, category_dir: &Path) -> String {
    flag.or_else(|| cfg.rules.category.clone())
        .unwrap_or_else(|| category_name(category_dir))
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no directory name", path.display()))
}

async fn run_extract(args: ExtractArgs, cfg: CanonConfig) -> Result<()> {
    let doc_dir = args
        .doc_dir
        .canonicalize()
        .with_context(|| format!("Invalid document directory {}", args.doc_dir.display()))?;
    let category_dir = doc_dir
        .parent()
        .ok_or_else(|| anyhow!("{} has no category directory", doc_dir.display()))?
        .to_path_buf();
    let source = dir_name(&doc_dir)?;
    let category = resolve_category(args.category, &cfg, &category_dir);

    let table = extract_document(&doc_dir, &source, &category).await?;
    let index = merge_into_file(&category_dir, &table, &cfg.dedup).await?;
    println!(
        "{source}: {} rules extracted (fingerprint {}); {} holds {} rules from {} sources",
        table.rules.len(),
        table.fingerprint,
        index_path(&category_dir).display(),
        index.rules.len(),
        index.source_count()
    );
    Ok(())
}

async fn run_check(args: CheckArgs) -> Result<()> {
    let report = check_staleness(&args.category_dir).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

async fn run_refresh(args: RefreshArgs, cfg: CanonConfig) -> Result<()> {
    let category = resolve_category(args.category, &cfg, &args.category_dir);
    let summary = refresh(&args.category_dir, &category, &cfg.dedup).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_validate(args: ValidateArgs, cfg: CanonConfig) -> Result<()> {
    let index_file = index_path(&args.category_dir);
    if !index_file.is_file() {
        return Err(anyhow!(
            "No consolidated index at {}; run `canon rules refresh` first",
            index_file.display()
        ));
    }
    let doc = Document::load(&args.doc).await?;

    let mut rules_cfg = cfg.rules;
    if let Some(batch_size) = args.batch_size {
        rules_cfg.batch_size = batch_size;
        rules_cfg
            .validate()
            .map_err(|err| anyhow!("--batch-size: {err}"))?;
    }

    let out = args.out.clone();
    let summary =
        tokio::task::spawn_blocking(move || validate(&index_file, &doc, &out, &rules_cfg))
            .await
            .context("Validation task failed")??;
    println!("{}: {summary}", args.out.display());
    Ok(())
}
