//! Incremental merge of rule tables into a category's consolidated index.

use crate::condition::Condition;
use crate::error::Result;
use crate::layout::index_path;
use crate::lock::acquire_index_lock;
use crate::model::{renumber, ConsolidatedIndex, Rule, RuleTable};
use crate::table::{read_index, render_index};
use canon_ir::write_atomic;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// When two rules count as the same requirement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    pub min_shared_keywords: usize,
    /// Condition similarity in `[0, 1]` required on top of the keyword overlap
    pub similarity_threshold: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            min_shared_keywords: 3,
            similarity_threshold: 0.6,
        }
    }
}

impl DedupPolicy {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_shared_keywords == 0 {
            return Err("min_shared_keywords must be > 0".to_string());
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err("similarity_threshold must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

pub trait ConditionSimilarity: Send + Sync {
    /// 1.0 for equivalent conditions, 0.0 for unrelated ones.
    fn similarity(&self, a: &Rule, b: &Rule) -> f64;
}

/// Structural conditions compare canonically; free text by word-set Jaccard.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenJaccard;

fn canonical_ast(raw: &str) -> String {
    Condition::parse(raw).map_or_else(|_| raw.trim().to_string(), |c| c.to_string())
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl ConditionSimilarity for TokenJaccard {
    fn similarity(&self, a: &Rule, b: &Rule) -> f64 {
        if let (Some(x), Some(y)) = (&a.ast_condition, &b.ast_condition) {
            return if canonical_ast(x) == canonical_ast(y) { 1.0 } else { 0.0 };
        }
        let (wa, wb) = (words(&a.condition), words(&b.condition));
        let union = wa.union(&wb).count();
        if union == 0 {
            return 0.0;
        }
        wa.intersection(&wb).count() as f64 / union as f64
    }
}

fn more_specific(candidate: &Rule, current: &Rule) -> bool {
    match (&candidate.ast_condition, &current.ast_condition) {
        (Some(_), None) => true,
        (None, Some(_)) => false,
        _ => candidate.condition.chars().count() > current.condition.chars().count(),
    }
}

fn absorb(existing: &mut Rule, incoming: &Rule) {
    if more_specific(incoming, existing) {
        existing.name = incoming.name.clone();
        existing.condition = incoming.condition.clone();
        existing.ast_condition = incoming.ast_condition.clone();
    }
    existing.severity = existing.severity.min(incoming.severity);
    existing.required |= incoming.required;
    existing.keywords.extend(incoming.keywords.iter().cloned());
    existing.sources.extend(incoming.sources.iter().cloned());
    existing.sources.sort();
    existing.sources.dedup();
}

pub fn merge(index: ConsolidatedIndex, table: &RuleTable, policy: &DedupPolicy) -> ConsolidatedIndex {
    merge_with(index, table, policy, &TokenJaccard)
}

/// Replaces `table.source`'s previous contributions with `table`'s rules,
/// deduplicating, then re-sorts by severity (stable) and renumbers.
pub fn merge_with(
    mut index: ConsolidatedIndex,
    table: &RuleTable,
    policy: &DedupPolicy,
    similarity: &dyn ConditionSimilarity,
) -> ConsolidatedIndex {
    for rule in &mut index.rules {
        rule.sources.retain(|s| *s != table.source);
    }
    let before = index.rules.len();
    index.rules.retain(|r| !r.sources.is_empty());
    let replaced = before - index.rules.len();

    let mut deduped = 0usize;
    for rule in &table.rules {
        let mut incoming = rule.clone();
        incoming.sources = vec![table.source.clone()];
        let twin = index.rules.iter_mut().find(|existing| {
            existing.shared_keywords(&incoming) >= policy.min_shared_keywords
                && similarity.similarity(existing, &incoming) >= policy.similarity_threshold
        });
        match twin {
            Some(existing) => {
                debug!("Rule `{}` folds into `{}`", incoming.name, existing.name);
                absorb(existing, &incoming);
                deduped += 1;
            }
            None => index.rules.push(incoming),
        }
    }

    index.rules.sort_by_key(|r| r.severity);
    renumber(&mut index.rules);
    index
        .sources
        .insert(table.source.clone(), table.fingerprint.clone());
    index.updated_at = Utc::now();
    debug!(
        "Merged {} rules from {} ({replaced} replaced, {deduped} deduplicated)",
        table.rules.len(),
        table.source
    );
    index
}

/// Read-modify-write of `<category>/_all.rules.md` under the category lock.
/// An existing index that cannot be parsed is reported and left untouched.
pub async fn merge_into_file(
    category_dir: &Path,
    table: &RuleTable,
    policy: &DedupPolicy,
) -> Result<ConsolidatedIndex> {
    let _lock = acquire_index_lock(category_dir).await?;
    let path = index_path(category_dir);
    let index = match read_index(&path).await? {
        Some(index) => {
            if index.category != table.category {
                warn!(
                    "Table for {} has category {}, index is {}",
                    table.source, table.category, index.category
                );
            }
            index
        }
        None => ConsolidatedIndex::new(table.category.clone()),
    };
    let merged = merge(index, table, policy);
    write_atomic(&path, render_index(&merged).as_bytes()).await?;
    info!(
        "Index {} now holds {} rules from {} sources",
        path.display(),
        merged.rules.len(),
        merged.source_count()
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RulesError;
    use crate::model::Severity;
    use pretty_assertions::assert_eq;

    fn table(source: &str, rules: Vec<Rule>) -> RuleTable {
        let mut rules = rules;
        renumber(&mut rules);
        for rule in &mut rules {
            rule.sources = vec![source.to_string()];
        }
        RuleTable {
            source: source.to_string(),
            category: "security".to_string(),
            fingerprint: "0123456789ab".to_string(),
            extracted_at: Utc::now(),
            rules,
        }
    }

    fn tls(keywords: &[&str], severity: Severity, condition: &str) -> Rule {
        Rule::new("Encrypt traffic", severity, condition).with_keywords(keywords.iter().copied())
    }

    #[test]
    fn three_shared_keywords_merge_two_do_not() {
        let policy = DedupPolicy::default();
        let a = table(
            "payments",
            vec![tls(
                &["tls", "encryption", "transport", "payments"],
                Severity::High,
                "All traffic must use TLS encryption",
            )],
        );
        let b = table(
            "orders",
            vec![tls(
                &["tls", "encryption", "transport", "orders"],
                Severity::Critical,
                "All traffic must use TLS encryption in transit",
            )],
        );
        let c = table(
            "billing",
            vec![tls(
                &["tls", "encryption", "billing"],
                Severity::Low,
                "All traffic must use TLS encryption",
            )],
        );

        let index = merge(ConsolidatedIndex::new("security"), &a, &policy);
        let index = merge(index, &b, &policy);
        assert_eq!(index.rules.len(), 1);
        let merged = &index.rules[0];
        assert_eq!(merged.sources, vec!["orders".to_string(), "payments".to_string()]);
        assert_eq!(merged.severity, Severity::Critical);
        assert_eq!(merged.condition, "All traffic must use TLS encryption in transit");
        assert!(merged.keywords.contains("orders") && merged.keywords.contains("payments"));

        let index = merge(index, &c, &policy);
        assert_eq!(index.rules.len(), 2);
        assert_eq!(index.rules[1].sources, vec!["billing".to_string()]);
        assert_eq!(index.source_count(), 3);
    }

    #[test]
    fn dissimilar_conditions_stay_apart() {
        let policy = DedupPolicy::default();
        let a = table(
            "a",
            vec![tls(&["tls", "encryption", "transport"], Severity::High, "Use TLS everywhere")],
        );
        let b = table(
            "b",
            vec![tls(
                &["tls", "encryption", "transport"],
                Severity::High,
                "Rotate certificates every ninety days",
            )],
        );
        let index = merge(merge(ConsolidatedIndex::new("security"), &a, &policy), &b, &policy);
        assert_eq!(index.rules.len(), 2);
    }

    #[test]
    fn identical_ast_conditions_are_equivalent() {
        let x = Rule::new("A", Severity::High, "one wording").with_ast("node.role==gateway");
        let y = Rule::new("B", Severity::High, "different").with_ast("node.role == gateway");
        let z = Rule::new("C", Severity::High, "one wording").with_ast("node.role == cache");
        assert_eq!(TokenJaccard.similarity(&x, &y), 1.0);
        assert_eq!(TokenJaccard.similarity(&x, &z), 0.0);
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let policy = DedupPolicy::default();
        let a = table(
            "payments",
            vec![
                Rule::new("Audit", Severity::Medium, "Emit audit events")
                    .with_keywords(["audit", "events"]),
                tls(&["tls", "encryption", "transport"], Severity::High, "Use TLS encryption"),
            ],
        );
        let b = table(
            "orders",
            vec![
                tls(&["tls", "encryption", "transport"], Severity::Critical, "Use TLS encryption"),
                Rule::new("Retention", Severity::Low, "Keep logs 30 days")
                    .with_keywords(["logs", "retention"]),
            ],
        );
        let once = merge(merge(ConsolidatedIndex::new("security"), &a, &policy), &b, &policy);
        let twice = merge(once.clone(), &b, &policy);
        assert_eq!(twice.rules, once.rules);
        let ids: Vec<&str> = once.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R-001", "R-002", "R-003"]);
        let severities: Vec<Severity> = once.rules.iter().map(|r| r.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Medium, Severity::Low]);
    }

    #[test]
    fn a_new_version_replaces_the_old_contribution() {
        let policy = DedupPolicy::default();
        let v1 = table(
            "payments",
            vec![Rule::new("Old", Severity::High, "Old requirement").with_keywords(["old"])],
        );
        let v2 = table(
            "payments",
            vec![Rule::new("New", Severity::High, "New requirement").with_keywords(["new"])],
        );
        let index = merge(merge(ConsolidatedIndex::new("security"), &v1, &policy), &v2, &policy);
        let names: Vec<&str> = index.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["New"]);
    }

    #[tokio::test]
    async fn corrupt_index_is_never_overwritten() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = index_path(dir.path());
        std::fs::write(&path, "# Consolidated Rules - security\n\ngarbage").unwrap();
        let t = table(
            "payments",
            vec![Rule::new("Audit", Severity::Medium, "Emit audit events")],
        );
        let err = merge_into_file(dir.path(), &t, &DedupPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RulesError::CorruptIndex { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# Consolidated Rules - security\n\ngarbage"
        );
    }

    #[tokio::test]
    async fn merge_into_file_creates_and_updates_the_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let t = table(
            "payments",
            vec![Rule::new("Audit", Severity::Medium, "Emit audit events")],
        );
        merge_into_file(dir.path(), &t, &DedupPolicy::default())
            .await
            .unwrap();
        let stored = read_index(&index_path(dir.path())).await.unwrap().unwrap();
        assert_eq!(stored.rules.len(), 1);
        assert_eq!(stored.sources["payments"], "0123456789ab");
    }
}
