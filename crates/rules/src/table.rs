//! Markdown persistence for rule tables and the consolidated index.

use crate::error::{Result, RulesError};
use crate::model::{ConsolidatedIndex, Rule, RuleTable, Severity};
use canon_ir::{escape_cell, write_atomic};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

pub const RULE_COLUMNS: [&str; 8] = [
    "ID",
    "Rule",
    "Severity",
    "Required",
    "Keywords",
    "Condition",
    "AST Condition",
    "Source",
];

const NO_RULES: &str = "_No rules extracted._";
const NO_INDEXED_RULES: &str = "_No rules consolidated yet._";
const ALL_RULES_HEADING: &str = "## All Rules";

static FINGERPRINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fingerprint:\s*([a-f0-9]{12})\b").expect("valid regex"));

static INDEX_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^# Consolidated Rules - (.+)$").expect("valid regex"));

static INDEX_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^> - (.+) \(fingerprint: ([0-9a-f]*), (\d+) rules?\)$").expect("valid regex")
});

static SOURCE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+) documents?$").expect("valid regex"));

static TOTAL_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|\s*\*\*Total\*\*\s*\|\s*\*\*(\d+)\*\*\s*\|$").expect("valid regex"));

/// Fingerprint recorded in the first lines of a rule table, if any.
pub fn stored_fingerprint(text: &str) -> Option<String> {
    text.lines()
        .take(10)
        .find_map(|line| FINGERPRINT.captures(line))
        .map(|caps| caps[1].to_ascii_lowercase())
}

fn table_header() -> String {
    let header = format!("| {} |", RULE_COLUMNS.join(" | "));
    let rule: Vec<String> = RULE_COLUMNS.iter().map(|c| "-".repeat(c.len())).collect();
    format!("{header}\n|{}|", rule.join("|"))
}

pub fn rule_row(rule: &Rule) -> String {
    let keywords: Vec<&str> = rule.keywords.iter().map(String::as_str).collect();
    format!(
        "| {} | {} | {} | {} | {} | {} | {} | {} |",
        escape_cell(&rule.id),
        escape_cell(&rule.name),
        rule.severity.as_str(),
        if rule.required { "Y" } else { "N" },
        escape_cell(&keywords.join(", ")),
        escape_cell(&rule.condition),
        escape_cell(rule.ast_condition.as_deref().unwrap_or("-")),
        escape_cell(&rule.sources.join(", ")),
    )
}

/// Cells of a table row, honouring `\|` escapes.
pub fn split_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = match inner.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => inner,
    };
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('|') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn is_rule_header(line: &str) -> bool {
    split_row(line) == RULE_COLUMNS
}

fn list_cell(cell: &str) -> Vec<String> {
    cell.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_rule_row(line: &str) -> std::result::Result<Rule, String> {
    let cells = split_row(line);
    if cells.len() != RULE_COLUMNS.len() {
        return Err(format!(
            "expected {} cells, found {}: {line}",
            RULE_COLUMNS.len(),
            cells.len()
        ));
    }
    let severity =
        Severity::parse(&cells[2]).ok_or_else(|| format!("unknown severity `{}`", cells[2]))?;
    let required = match cells[3].to_ascii_uppercase().as_str() {
        "Y" | "YES" | "TRUE" => true,
        "N" | "NO" | "FALSE" => false,
        other => return Err(format!("invalid required flag `{other}`")),
    };
    let ast = cells[6].trim();
    Ok(Rule {
        id: cells[0].clone(),
        name: cells[1].clone(),
        severity,
        required,
        keywords: list_cell(&cells[4])
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect(),
        condition: cells[5].clone(),
        ast_condition: (!ast.is_empty() && ast != "-").then(|| ast.to_string()),
        sources: list_cell(&cells[7]),
    })
}

/// Rule rows following the first rules header in `lines`.
fn parse_rule_rows<'a>(lines: impl Iterator<Item = &'a str>) -> std::result::Result<Vec<Rule>, String> {
    let mut rules = Vec::new();
    let mut in_table = false;
    for line in lines {
        let trimmed = line.trim();
        if !in_table {
            in_table = is_rule_header(trimmed);
            continue;
        }
        if is_separator(trimmed) {
            continue;
        }
        if !trimmed.starts_with('|') {
            break;
        }
        rules.push(parse_rule_row(trimmed)?);
    }
    Ok(rules)
}

fn metadata_fields(line: &str) -> BTreeMap<String, String> {
    line.trim_start_matches('>')
        .split(" | ")
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn field<'a>(
    fields: &'a BTreeMap<String, String>,
    key: &str,
) -> std::result::Result<&'a String, String> {
    fields
        .get(key)
        .ok_or_else(|| format!("metadata line lacks `{key}`"))
}

fn parse_time(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| format!("bad timestamp `{raw}`: {err}"))
}

pub fn render_rule_table(table: &RuleTable) -> String {
    let mut out = format!(
        "# Rules - {}\n\n> source: {} | extracted_at: {} | category: {} | fingerprint: {}\n\n",
        table.source,
        table.source,
        table.extracted_at.to_rfc3339(),
        table.category,
        table.fingerprint
    );
    if table.rules.is_empty() {
        out.push_str(NO_RULES);
        out.push('\n');
        return out;
    }
    out.push_str(&table_header());
    out.push('\n');
    for rule in &table.rules {
        out.push_str(&rule_row(rule));
        out.push('\n');
    }
    out
}

pub fn parse_rule_table(text: &str) -> std::result::Result<RuleTable, String> {
    let meta = text
        .lines()
        .take(10)
        .find(|l| l.trim_start().starts_with("> source:"))
        .ok_or_else(|| "missing `> source:` metadata line".to_string())?;
    let fields = metadata_fields(meta);
    Ok(RuleTable {
        source: field(&fields, "source")?.clone(),
        category: field(&fields, "category")?.clone(),
        fingerprint: field(&fields, "fingerprint")?.clone(),
        extracted_at: parse_time(field(&fields, "extracted_at")?)?,
        rules: parse_rule_rows(text.lines())?,
    })
}

pub fn render_index(index: &ConsolidatedIndex) -> String {
    let mut out = format!(
        "# Consolidated Rules - {}\n\n> sources: {} documents | updated_at: {} | category: {}\n",
        index.category,
        index.source_count(),
        index.updated_at.to_rfc3339(),
        index.category
    );
    if !index.sources.is_empty() {
        out.push_str(">\n");
        for (source, fp) in &index.sources {
            out.push_str(&format!(
                "> - {source} (fingerprint: {fp}, {} rules)\n",
                index.rules_from(source)
            ));
        }
    }

    out.push_str("\n## Summary\n\n| Severity | Count |\n|----------|-------|\n");
    for (severity, count) in index.severity_summary() {
        out.push_str(&format!("| {} | {count} |\n", severity.title()));
    }
    out.push_str(&format!("| **Total** | **{}** |\n", index.rules.len()));

    out.push_str(&format!("\n{ALL_RULES_HEADING}\n\n"));
    if index.rules.is_empty() {
        out.push_str(NO_INDEXED_RULES);
        out.push('\n');
        return out;
    }
    out.push_str(&table_header());
    out.push('\n');
    for rule in &index.rules {
        out.push_str(&rule_row(rule));
        out.push('\n');
    }
    out
}

/// Strict: any inconsistency means the file cannot be trusted as a merge base.
pub fn parse_index(text: &str) -> std::result::Result<ConsolidatedIndex, String> {
    let mut lines = text.lines();
    let category = lines
        .by_ref()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| INDEX_TITLE.captures(l))
        .map(|caps| caps[1].trim().to_string())
        .ok_or_else(|| "missing `# Consolidated Rules - <category>` title".to_string())?;

    let meta = text
        .lines()
        .find(|l| l.starts_with("> sources:"))
        .ok_or_else(|| "missing `> sources:` metadata line".to_string())?;
    let fields = metadata_fields(meta);
    let declared = SOURCE_COUNT
        .captures(field(&fields, "sources")?)
        .and_then(|caps| caps[1].parse::<usize>().ok())
        .ok_or_else(|| "unreadable source count".to_string())?;
    let updated_at = parse_time(field(&fields, "updated_at")?)?;

    let mut sources = BTreeMap::new();
    for line in text.lines() {
        if let Some(caps) = INDEX_SOURCE.captures(line.trim_end()) {
            sources.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    if sources.len() != declared {
        return Err(format!(
            "declares {declared} sources but lists {}",
            sources.len()
        ));
    }

    let heading = text
        .find(ALL_RULES_HEADING)
        .ok_or_else(|| format!("missing `{ALL_RULES_HEADING}` section"))?;
    let body = &text[heading + ALL_RULES_HEADING.len()..];
    let rules = parse_rule_rows(body.lines())?;
    if rules.is_empty() && !body.contains(NO_INDEXED_RULES) {
        return Err("rules section has neither a table nor the empty marker".to_string());
    }
    if let Some(total) = text
        .lines()
        .find_map(|l| TOTAL_ROW.captures(l.trim()))
        .and_then(|caps| caps[1].parse::<usize>().ok())
    {
        if total != rules.len() {
            return Err(format!("summary total {total} but {} rule rows", rules.len()));
        }
    }

    Ok(ConsolidatedIndex {
        category,
        updated_at,
        sources,
        rules,
    })
}

pub async fn write_rule_table(path: &Path, table: &RuleTable) -> Result<()> {
    write_atomic(path, render_rule_table(table).as_bytes()).await?;
    Ok(())
}

pub async fn read_rule_table(path: &Path) -> Result<Option<RuleTable>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse_rule_table(&text)
        .map(Some)
        .map_err(|reason| RulesError::MalformedTable {
            path: path.to_path_buf(),
            reason,
        })
}

/// `Ok(None)` when absent; an unparseable file is `CorruptIndex`.
pub async fn read_index(path: &Path) -> Result<Option<ConsolidatedIndex>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse_index(&text)
        .map(Some)
        .map_err(|reason| RulesError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        })
}
