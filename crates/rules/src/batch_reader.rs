//! Findings for one document against a consolidated index, with peak memory
//! bounded by one batch of rules when the pair exceeds the size budget.

use crate::condition::{Condition, Verdict};
use crate::config::RulesConfig;
use crate::error::{Result, RulesError};
use crate::layout::PAGE_FILE;
use crate::model::{Rule, Severity};
use crate::staleness::load_irs;
use crate::table::{parse_index, parse_rule_row, split_row, RULE_COLUMNS};
use canon_ir::{enrich, escape_cell, DiagramIr};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Pass,
    Fail,
    NotApplicable,
    NeedsReview,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::NotApplicable => "not_applicable",
            Self::NeedsReview => "needs_review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub status: FindingStatus,
    pub evidence: String,
}

impl Finding {
    pub fn row(&self) -> String {
        format!(
            "| {} | {} | {} | {} |",
            escape_cell(&self.rule_id),
            self.severity.as_str(),
            self.status.as_str(),
            escape_cell(&self.evidence)
        )
    }
}

/// The document under check, held in memory for the whole run.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub text: String,
    lowered: String,
    pub irs: Vec<DiagramIr>,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>, irs: Vec<DiagramIr>) -> Self {
        let text = text.into();
        let irs = irs
            .into_iter()
            .map(|mut ir| {
                enrich(&mut ir);
                ir
            })
            .collect();
        Self {
            name: name.into(),
            lowered: text.to_lowercase(),
            text,
            irs,
        }
    }

    /// `<doc_dir>/page.md` plus its IRs.
    pub async fn load(doc_dir: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(doc_dir.join(PAGE_FILE)).await?;
        let name = doc_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let irs = load_irs(doc_dir).await?;
        Ok(Self::new(name, String::from_utf8_lossy(&bytes), irs))
    }

    pub fn size_bytes(&self) -> usize {
        self.text.len()
            + self
                .irs
                .iter()
                .map(|ir| ir.to_canonical_json().map_or(0, |json| json.len()))
                .sum::<usize>()
    }
}

pub fn evaluate_rule(rule: &Rule, doc: &Document) -> Finding {
    let finding = |status, evidence: String| Finding {
        rule_id: rule.id.clone(),
        severity: rule.severity,
        status,
        evidence,
    };
    if let Some(ast) = &rule.ast_condition {
        return match Condition::parse(ast) {
            Ok(condition) => {
                let outcome = condition.evaluate(&doc.irs);
                let status = match outcome.verdict {
                    Verdict::Pass => FindingStatus::Pass,
                    Verdict::Fail => FindingStatus::Fail,
                    Verdict::NotApplicable => FindingStatus::NotApplicable,
                };
                finding(status, outcome.evidence)
            }
            Err(err) => finding(FindingStatus::NeedsReview, err.to_string()),
        };
    }

    let hits: Vec<&str> = rule
        .keywords
        .iter()
        .filter(|k| doc.lowered.contains(k.as_str()))
        .map(String::as_str)
        .collect();
    let evidence = if hits.is_empty() {
        "no keyword hits in document".to_string()
    } else {
        format!("keyword hits: {}", hits.join(", "))
    };
    finding(FindingStatus::NeedsReview, evidence)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub rules: usize,
    pub pass: usize,
    pub fail: usize,
    pub not_applicable: usize,
    pub needs_review: usize,
    pub batches: usize,
}

impl ValidationSummary {
    fn add(&mut self, finding: &Finding) {
        self.rules += 1;
        match finding.status {
            FindingStatus::Pass => self.pass += 1,
            FindingStatus::Fail => self.fail += 1,
            FindingStatus::NotApplicable => self.not_applicable += 1,
            FindingStatus::NeedsReview => self.needs_review += 1,
        }
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules in {} batches: {} pass, {} fail, {} not applicable, {} need review",
            self.rules, self.batches, self.pass, self.fail, self.not_applicable, self.needs_review
        )
    }
}

/// Streams rule rows of the first rules table in a Markdown file.
pub struct RuleBatches<R: BufRead> {
    lines: std::io::Lines<R>,
    path: PathBuf,
    batch_size: usize,
    in_table: bool,
    done: bool,
}

impl<R: BufRead> RuleBatches<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            lines: reader.lines(),
            path: path.into(),
            batch_size: batch_size.max(1),
            in_table: false,
            done: false,
        }
    }

    fn corrupt(&self, reason: String) -> RulesError {
        RulesError::CorruptIndex {
            path: self.path.clone(),
            reason,
        }
    }

    fn next_rule(&mut self) -> Option<Result<Rule>> {
        while let Some(line) = self.lines.next() {
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            let trimmed = line.trim();
            if !self.in_table {
                self.in_table = split_row(trimmed) == RULE_COLUMNS;
                continue;
            }
            if trimmed.starts_with("|-") || trimmed.starts_with("| -") {
                continue;
            }
            if !trimmed.starts_with('|') {
                return None;
            }
            return Some(parse_rule_row(trimmed).map_err(|reason| self.corrupt(reason)));
        }
        None
    }
}

impl<R: BufRead> Iterator for RuleBatches<R> {
    type Item = Result<Vec<Rule>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_rule() {
                Some(Ok(rule)) => batch.push(rule),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        (!batch.is_empty()).then_some(Ok(batch))
    }
}

fn findings_header(doc: &Document) -> String {
    format!(
        "# Findings - {}\n\n| Rule ID | Severity | Status | Evidence |\n|---------|----------|--------|----------|\n",
        doc.name
    )
}

/// Rows are appended and flushed per batch; each batch is dropped before the
/// next is read.
pub fn validate_batched(
    index_file: &Path,
    doc: &Document,
    out: &Path,
    batch_size: usize,
) -> Result<ValidationSummary> {
    let reader = BufReader::new(File::open(index_file)?);
    let mut writer = BufWriter::new(File::create(out)?);
    writer.write_all(findings_header(doc).as_bytes())?;

    let mut summary = ValidationSummary::default();
    for batch in RuleBatches::new(reader, index_file, batch_size) {
        let batch = batch?;
        for rule in &batch {
            let finding = evaluate_rule(rule, doc);
            writeln!(writer, "{}", finding.row())?;
            summary.add(&finding);
        }
        writer.flush()?;
        summary.batches += 1;
        debug!("Batch {} flushed ({} rules)", summary.batches, batch.len());
    }
    Ok(summary)
}

/// Loads the whole index at once.
pub fn validate_single_pass(index_file: &Path, doc: &Document, out: &Path) -> Result<ValidationSummary> {
    let text = std::fs::read_to_string(index_file)?;
    let index = parse_index(&text).map_err(|reason| RulesError::CorruptIndex {
        path: index_file.to_path_buf(),
        reason,
    })?;

    let mut body = findings_header(doc);
    let mut summary = ValidationSummary::default();
    for rule in &index.rules {
        let finding = evaluate_rule(rule, doc);
        body.push_str(&finding.row());
        body.push('\n');
        summary.add(&finding);
    }
    summary.batches = usize::from(!index.rules.is_empty());
    std::fs::write(out, body)?;
    Ok(summary)
}

/// Picks the batched reader when index plus document exceed the budget.
pub fn validate(
    index_file: &Path,
    doc: &Document,
    out: &Path,
    cfg: &RulesConfig,
) -> Result<ValidationSummary> {
    let index_bytes = std::fs::metadata(index_file)?.len() as usize;
    let total = index_bytes + doc.size_bytes();
    let summary = if total > cfg.budget_bytes {
        info!(
            "Index and document take {total} bytes (budget {}); reading {} rules at a time",
            cfg.budget_bytes, cfg.batch_size
        );
        validate_batched(index_file, doc, out, cfg.batch_size)?
    } else {
        validate_single_pass(index_file, doc, out)?
    };
    info!("Findings for {} written to {}: {summary}", doc.name, out.display());
    Ok(summary)
}
