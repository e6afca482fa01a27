//! Fingerprint-based staleness of rule tables, and incremental refresh.

use crate::consolidate::{merge_into_file, DedupPolicy};
use crate::error::{Result, RulesError};
use crate::extract::extract_rules;
use crate::fingerprint::{fingerprint, fingerprint_file};
use crate::layout::{index_path, source_dirs, IR_SUFFIX, PAGE_FILE, RULES_FILE};
use crate::model::RuleTable;
use crate::table::{read_index, read_rule_table, stored_fingerprint, write_rule_table};
use canon_ir::DiagramIr;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Current,
    Stale,
    Missing,
    Orphan,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Stale => "stale",
            Self::Missing => "missing",
            Self::Orphan => "orphan",
        }
    }

    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::Stale | Self::Missing)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessEntry {
    pub source: String,
    pub rules_file: String,
    pub status: Status,
    pub reason: String,
    pub live_fingerprint: Option<String>,
    pub stored_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessSummary {
    pub total: usize,
    pub current: usize,
    pub stale: usize,
    pub missing: usize,
    pub orphan: usize,
}

impl StalenessSummary {
    fn add(&mut self, status: Status) {
        self.total += 1;
        match status {
            Status::Current => self.current += 1,
            Status::Stale => self.stale += 1,
            Status::Missing => self.missing += 1,
            Status::Orphan => self.orphan += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub status: Status,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessReport {
    pub folder: String,
    pub files: Vec<StalenessEntry>,
    pub index: IndexStatus,
    pub summary: StalenessSummary,
}

impl StalenessReport {
    pub fn pending(&self) -> impl Iterator<Item = &StalenessEntry> {
        self.files.iter().filter(|e| e.status.needs_refresh())
    }

    pub fn is_current(&self) -> bool {
        self.pending().next().is_none() && self.index.status == Status::Current
    }

    pub fn status_of(&self, source: &str) -> Option<Status> {
        self.files
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.status)
    }
}

impl fmt::Display for StalenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rule tables in {}", self.folder)?;
        for entry in &self.files {
            writeln!(
                f,
                "  [{:<7}] {} - {}",
                entry.status.as_str(),
                entry.source,
                entry.reason
            )?;
        }
        writeln!(f, "  [{:<7}] _all - {}", self.index.status.as_str(), self.index.reason)?;
        write!(
            f,
            "{} sources: {} current, {} stale, {} missing, {} orphan",
            self.summary.total,
            self.summary.current,
            self.summary.stale,
            self.summary.missing,
            self.summary.orphan
        )
    }
}

async fn modified(path: &Path) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn assess_source(source: String, doc_dir: &Path) -> Result<Option<StalenessEntry>> {
    let page = doc_dir.join(PAGE_FILE);
    let rules = doc_dir.join(RULES_FILE);
    let rules_file = format!("{source}/{RULES_FILE}");
    let entry = |status, reason: String, live, stored| StalenessEntry {
        source: source.clone(),
        rules_file: rules_file.clone(),
        status,
        reason,
        live_fingerprint: live,
        stored_fingerprint: stored,
    };

    let rules_exists = tokio::fs::try_exists(&rules).await?;
    if !tokio::fs::try_exists(&page).await? {
        if rules_exists {
            let stored = stored_fingerprint(&tokio::fs::read_to_string(&rules).await?);
            return Ok(Some(entry(
                Status::Orphan,
                "Source document removed; rule table kept".to_string(),
                None,
                stored,
            )));
        }
        return Ok(None);
    }

    let live = fingerprint_file(&page).await?;
    if !rules_exists {
        return Ok(Some(entry(
            Status::Missing,
            "No rule table extracted yet".to_string(),
            Some(live),
            None,
        )));
    }

    let stored = stored_fingerprint(&tokio::fs::read_to_string(&rules).await?);
    let assessed = match &stored {
        Some(fp) if *fp == live => entry(
            Status::Current,
            "Fingerprint matches".to_string(),
            Some(live),
            stored.clone(),
        ),
        Some(fp) => entry(
            Status::Stale,
            format!("Content changed (fingerprint {fp} -> {live})"),
            Some(live),
            stored.clone(),
        ),
        None => {
            let newer = match (modified(&page).await, modified(&rules).await) {
                (Some(p), Some(r)) => p > r,
                _ => true,
            };
            if newer {
                entry(
                    Status::Stale,
                    "Source modified after extraction (no stored fingerprint)".to_string(),
                    Some(live),
                    None,
                )
            } else {
                entry(
                    Status::Current,
                    "Rule table newer than source (no stored fingerprint)".to_string(),
                    Some(live),
                    None,
                )
            }
        }
    };
    Ok(Some(assessed))
}

/// Compares every document's live fingerprint with its rule table. An index
/// file that exists but cannot be parsed is an error, not a status.
pub async fn check_staleness(category_dir: &Path) -> Result<StalenessReport> {
    if !tokio::fs::try_exists(category_dir).await? {
        return Err(RulesError::InvalidCorpus(format!(
            "{} does not exist",
            category_dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut summary = StalenessSummary::default();
    for (source, dir) in source_dirs(category_dir).await? {
        if let Some(entry) = assess_source(source, &dir).await? {
            summary.add(entry.status);
            files.push(entry);
        }
    }

    let index = match read_index(&index_path(category_dir)).await? {
        None if files.is_empty() => IndexStatus {
            status: Status::Current,
            reason: "No documents".to_string(),
        },
        None => IndexStatus {
            status: Status::Missing,
            reason: "Consolidated index not built".to_string(),
        },
        Some(index) => {
            let pending = files.iter().filter(|e| e.status.needs_refresh()).count();
            let unmerged: Vec<&str> = files
                .iter()
                .filter(|e| e.status == Status::Current)
                .filter(|e| index.sources.get(&e.source) != e.stored_fingerprint.as_ref())
                .map(|e| e.source.as_str())
                .collect();
            if pending > 0 {
                IndexStatus {
                    status: Status::Stale,
                    reason: format!("{pending} source tables need refresh"),
                }
            } else if !unmerged.is_empty() {
                IndexStatus {
                    status: Status::Stale,
                    reason: format!("Not merged: {}", unmerged.join(", ")),
                }
            } else {
                IndexStatus {
                    status: Status::Current,
                    reason: format!("{} rules from {} sources", index.rules.len(), index.source_count()),
                }
            }
        }
    };

    Ok(StalenessReport {
        folder: category_dir.display().to_string(),
        files,
        index,
        summary,
    })
}

fn ir_files(doc_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(doc_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(IR_SUFFIX))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// The IRs attached to a document, at any depth. Unreadable IRs are skipped.
pub async fn load_irs(doc_dir: &Path) -> Result<Vec<DiagramIr>> {
    let dir = doc_dir.to_path_buf();
    let paths = tokio::task::spawn_blocking(move || ir_files(&dir))
        .await
        .map_err(|err| RulesError::Other(format!("join IR scan: {err}")))?;
    let mut irs = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path).await?;
        match DiagramIr::from_json_slice(&bytes) {
            Ok(ir) => irs.push(ir),
            Err(err) => warn!("Skipping unreadable IR {}: {err}", path.display()),
        }
    }
    Ok(irs)
}

/// Extracts `<doc_dir>/page.md` and writes `<doc_dir>/rules.md`.
pub async fn extract_document(doc_dir: &Path, source: &str, category: &str) -> Result<RuleTable> {
    let bytes = tokio::fs::read(doc_dir.join(PAGE_FILE)).await?;
    let text = String::from_utf8_lossy(&bytes);
    let irs = load_irs(doc_dir).await?;
    let mut table = extract_rules(&text, &irs, source, category);
    table.fingerprint = fingerprint(&bytes);
    write_rule_table(&doc_dir.join(RULES_FILE), &table).await?;
    info!(
        "Extracted {} rules from {source} ({} diagrams)",
        table.rules.len(),
        irs.len()
    );
    Ok(table)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub skipped_current: usize,
    pub orphans: Vec<String>,
    pub failures: Vec<(String, String)>,
    pub index_rules: usize,
}

impl RefreshSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refreshed {}, unchanged {}, orphaned {}, failed {}; index holds {} rules",
            self.refreshed.len(),
            self.skipped_current,
            self.orphans.len(),
            self.failures.len(),
            self.index_rules
        )?;
        for (source, reason) in &self.failures {
            write!(f, "\n  {source}: {reason}")?;
        }
        Ok(())
    }
}

/// Re-extracts stale and missing documents only, merging each one as soon as
/// its table is written. A corrupt index stops the run; other failures are
/// recorded per document.
pub async fn refresh(
    category_dir: &Path,
    category: &str,
    policy: &DedupPolicy,
) -> Result<RefreshSummary> {
    let report = check_staleness(category_dir).await?;
    let mut summary = RefreshSummary::default();
    let mut index_rules = None;

    for entry in &report.files {
        match entry.status {
            Status::Current => {
                summary.skipped_current += 1;
                continue;
            }
            Status::Orphan => {
                summary.orphans.push(entry.source.clone());
                continue;
            }
            Status::Stale | Status::Missing => {}
        }

        let doc_dir = category_dir.join(&entry.source);
        let table = match extract_document(&doc_dir, &entry.source, category).await {
            Ok(table) => table,
            Err(err) => {
                warn!("Extraction failed for {}: {err}", entry.source);
                summary.failures.push((entry.source.clone(), err.to_string()));
                continue;
            }
        };
        match merge_into_file(category_dir, &table, policy).await {
            Ok(index) => {
                index_rules = Some(index.rules.len());
                summary.refreshed.push(entry.source.clone());
            }
            Err(err @ RulesError::CorruptIndex { .. }) => return Err(err),
            Err(err) => {
                warn!("Merge failed for {}: {err}", entry.source);
                summary.failures.push((entry.source.clone(), err.to_string()));
            }
        }
    }

    // current tables whose fingerprint never reached the index
    let merged_sources = read_index(&index_path(category_dir))
        .await?
        .map(|index| index.sources)
        .unwrap_or_default();
    for entry in report.files.iter().filter(|e| e.status == Status::Current) {
        if merged_sources.get(&entry.source) == entry.stored_fingerprint.as_ref() {
            continue;
        }
        let rules_path = category_dir.join(&entry.rules_file);
        match read_rule_table(&rules_path).await {
            Ok(Some(table)) => match merge_into_file(category_dir, &table, policy).await {
                Ok(merged) => index_rules = Some(merged.rules.len()),
                Err(err @ RulesError::CorruptIndex { .. }) => return Err(err),
                Err(err) => {
                    warn!("Merge failed for {}: {err}", entry.source);
                    summary.failures.push((entry.source.clone(), err.to_string()));
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!("Unreadable rule table for {}: {err}", entry.source);
                summary.failures.push((entry.source.clone(), err.to_string()));
            }
        }
    }

    summary.index_rules = match index_rules {
        Some(count) => count,
        None => read_index(&index_path(category_dir))
            .await?
            .map_or(0, |index| index.rules.len()),
    };
    info!("Refresh of {}: {summary}", category_dir.display());
    Ok(summary)
}
