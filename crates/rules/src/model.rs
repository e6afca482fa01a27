use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Accepts full names and the single-letter forms (`C`, `H`, `M`, `L`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "c" => Some(Self::Critical),
            "high" | "h" => Some(Self::High),
            "medium" | "m" => Some(Self::Medium),
            "low" | "l" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub required: bool,
    pub keywords: BTreeSet<String>,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast_condition: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, severity: Severity, condition: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            severity,
            required: matches!(severity, Severity::Critical | Severity::High),
            keywords: BTreeSet::new(),
            condition: condition.into(),
            ast_condition: None,
            sources: Vec::new(),
        }
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords.extend(
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty()),
        );
        self
    }

    pub fn with_ast(mut self, ast: impl Into<String>) -> Self {
        self.ast_condition = Some(ast.into());
        self
    }

    pub fn shared_keywords(&self, other: &Rule) -> usize {
        self.keywords.intersection(&other.keywords).count()
    }
}

/// `R-001`, `R-002`, ...
pub fn rule_id(index: usize) -> String {
    format!("R-{:03}", index + 1)
}

pub fn renumber(rules: &mut [Rule]) {
    for (idx, rule) in rules.iter_mut().enumerate() {
        rule.id = rule_id(idx);
    }
}

/// Rules extracted from one version of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub source: String,
    pub category: String,
    pub fingerprint: String,
    pub extracted_at: DateTime<Utc>,
    pub rules: Vec<Rule>,
}

/// The deduplicated, severity-sorted rule table of one governance category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedIndex {
    pub category: String,
    pub updated_at: DateTime<Utc>,
    /// source -> fingerprint of the table that was merged
    pub sources: BTreeMap<String, String>,
    pub rules: Vec<Rule>,
}

impl ConsolidatedIndex {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            updated_at: Utc::now(),
            sources: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Every severity band, including empty ones.
    pub fn severity_summary(&self) -> BTreeMap<Severity, usize> {
        let mut summary: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for rule in &self.rules {
            *summary.entry(rule.severity).or_insert(0) += 1;
        }
        summary
    }

    pub fn rules_from(&self, source: &str) -> usize {
        self.rules
            .iter()
            .filter(|r| r.sources.iter().any(|s| s == source))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn severity_orders_critical_first() {
        let mut sevs = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
        sevs.sort();
        assert_eq!(sevs, Severity::ALL.to_vec());
        assert_eq!(Severity::parse("H"), Some(Severity::High));
        assert_eq!(Severity::parse("urgent"), None);
    }

    #[test]
    fn summary_lists_empty_bands() {
        let mut index = ConsolidatedIndex::new("security");
        index.rules.push(Rule::new("a", Severity::High, "x"));
        index.rules.push(Rule::new("b", Severity::High, "y"));
        let summary = index.severity_summary();
        assert_eq!(summary[&Severity::High], 2);
        assert_eq!(summary[&Severity::Low], 0);
        assert_eq!(summary.len(), 4);
    }

    #[test]
    fn ids_are_zero_padded() {
        let mut rules = vec![
            Rule::new("a", Severity::Low, "x"),
            Rule::new("b", Severity::Low, "y"),
        ];
        renumber(&mut rules);
        assert_eq!(rules[1].id, "R-002");
        assert_eq!(rule_id(119), "R-120");
    }
}
