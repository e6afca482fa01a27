//! Structural gate between extraction/repair and rendering.
//!
//! Violations block acceptance and drive repair retries; warnings are reported
//! but never block rendering.

use canon_ir::{check_schema, is_generic_label, DiagramIr};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Minimum partial confidence for an element to count toward drift
const HIGH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalCheck {
    Schema,
    GenericLabels,
    EdgeValidity,
    DuplicateEdges,
    EmptyGraph,
    OrphanNodes,
    SelfLoops,
    Drift,
    Repair,
}

impl EvalCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::GenericLabels => "generic_labels",
            Self::EdgeValidity => "edge_validity",
            Self::DuplicateEdges => "duplicate_edges",
            Self::EmptyGraph => "empty_graph",
            Self::OrphanNodes => "orphan_nodes",
            Self::SelfLoops => "self_loops",
            Self::Drift => "drift",
            Self::Repair => "repair",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalIssue {
    pub check: EvalCheck,
    pub element: String,
    pub message: String,
}

impl EvalIssue {
    pub fn new(check: EvalCheck, element: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check,
            element: element.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check.as_str(), self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub nodes: usize,
    pub edges: usize,
    pub groups: usize,
    pub generic_labels_remaining: usize,
    pub orphan_nodes: usize,
    /// Fraction of high-confidence partial elements changed by repair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub ok: bool,
    pub violations: Vec<EvalIssue>,
    pub warnings: Vec<EvalIssue>,
    pub summary: EvalSummary,
}

impl EvalReport {
    fn from_issues(violations: Vec<EvalIssue>, warnings: Vec<EvalIssue>, summary: EvalSummary) -> Self {
        Self {
            ok: violations.is_empty(),
            violations,
            warnings,
            summary,
        }
    }

    pub fn violation_messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }

    /// Ranking key for choosing between repair attempts
    pub fn rank(&self) -> (usize, usize) {
        (self.violations.len(), self.warnings.len())
    }
}

fn label_violations(ir: &DiagramIr) -> Vec<EvalIssue> {
    let mut issues = Vec::new();
    for node in &ir.nodes {
        if is_generic_label(&node.label) {
            issues.push(EvalIssue::new(
                EvalCheck::GenericLabels,
                &node.id,
                format!("node {} still has placeholder label {}", node.id, node.label),
            ));
        } else if node.label.trim().is_empty() {
            issues.push(EvalIssue::new(
                EvalCheck::GenericLabels,
                &node.id,
                format!("node {} has an empty label", node.id),
            ));
        }
    }
    issues
}

fn edge_violations(ir: &DiagramIr) -> Vec<EvalIssue> {
    let ids: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut issues = Vec::new();
    let mut seen: HashMap<(&str, &str, &str), &str> = HashMap::new();
    for edge in &ir.edges {
        for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
            if !ids.contains(id.as_str()) {
                issues.push(EvalIssue::new(
                    EvalCheck::EdgeValidity,
                    &edge.id,
                    format!("edge {}: {end} {id} does not match any node", edge.id),
                ));
            }
        }
        if let Some(first) = seen.insert(edge.triple(), edge.id.as_str()) {
            issues.push(EvalIssue::new(
                EvalCheck::DuplicateEdges,
                &edge.id,
                format!(
                    "edge {} duplicates {first} ({} -> {})",
                    edge.id, edge.source, edge.target
                ),
            ));
        }
    }
    issues
}

fn orphan_warnings(ir: &DiagramIr) -> Vec<EvalIssue> {
    let connected: HashSet<&str> = ir
        .edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    ir.nodes
        .iter()
        .filter(|n| !connected.contains(n.id.as_str()))
        .map(|n| {
            let message = if n.parent_group.is_some() {
                format!("node {} ({}) is grouped but has no edges", n.id, n.label)
            } else {
                format!("node {} ({}) has no edges", n.id, n.label)
            };
            EvalIssue::new(EvalCheck::OrphanNodes, &n.id, message)
        })
        .collect()
}

/// Changed fraction of high-confidence partial nodes and edges. Additions are
/// free; removal, relabelling, reshaping and recoloring count.
fn drift(ir: &DiagramIr, partial: &DiagramIr) -> (f64, Vec<EvalIssue>) {
    let mut issues = Vec::new();
    let mut considered = 0usize;
    let mut changed = 0usize;

    for before in partial.nodes.iter().filter(|n| n.confidence >= HIGH_CONFIDENCE) {
        considered += 1;
        let Some(after) = ir.node(&before.id) else {
            changed += 1;
            issues.push(EvalIssue::new(
                EvalCheck::Drift,
                &before.id,
                format!("detected node {} ({}) was removed", before.id, before.label),
            ));
            continue;
        };
        let mut what = Vec::new();
        if after.label != before.label {
            what.push("relabelled");
        }
        if after.shape != before.shape {
            what.push("reshaped");
        }
        if after.fill_color != before.fill_color || after.border_color != before.border_color {
            what.push("recolored");
        }
        if !what.is_empty() {
            changed += 1;
            debug!("Drift on {}: {}", before.id, what.join(", "));
        }
    }

    let edges: BTreeMap<(&str, &str), &str> = ir
        .edges
        .iter()
        .map(|e| ((e.source.as_str(), e.target.as_str()), e.label.as_str()))
        .collect();
    for before in partial.edges.iter().filter(|e| e.confidence >= HIGH_CONFIDENCE) {
        considered += 1;
        let forward = edges.get(&(before.source.as_str(), before.target.as_str()));
        let flipped = edges.get(&(before.target.as_str(), before.source.as_str()));
        match forward.or(flipped) {
            None => {
                changed += 1;
                issues.push(EvalIssue::new(
                    EvalCheck::Drift,
                    &before.id,
                    format!(
                        "detected edge {} -> {} was removed",
                        before.source, before.target
                    ),
                ));
            }
            Some(label) if !before.label.is_empty() && *label != before.label => changed += 1,
            Some(_) => {}
        }
    }

    let fraction = if considered == 0 {
        0.0
    } else {
        changed as f64 / considered as f64
    };
    (fraction, issues)
}

/// Evaluates an IR; `partial` enables the drift check against the raster
/// extraction it was repaired from.
pub fn eval(ir: &DiagramIr, partial: Option<&DiagramIr>, drift_threshold: f64) -> EvalReport {
    let mut violations: Vec<EvalIssue> = check_schema(ir)
        .into_iter()
        .map(|issue| EvalIssue::new(EvalCheck::Schema, issue.element.clone(), issue.to_string()))
        .collect();
    violations.extend(label_violations(ir));
    violations.extend(edge_violations(ir));
    if ir.nodes.is_empty() {
        let message = if ir.edges.is_empty() {
            "diagram has no nodes and no edges"
        } else {
            "diagram has edges but no nodes"
        };
        violations.push(EvalIssue::new(EvalCheck::EmptyGraph, "diagram", message));
    }

    let mut warnings = orphan_warnings(ir);
    let orphan_nodes = warnings.len();
    warnings.extend(
        ir.edges
            .iter()
            .filter(|e| e.source == e.target)
            .map(|e| {
                EvalIssue::new(
                    EvalCheck::SelfLoops,
                    &e.id,
                    format!("edge {} loops on {}", e.id, e.source),
                )
            }),
    );

    let mut drift_fraction = None;
    if let Some(partial) = partial {
        let (fraction, removed) = drift(ir, partial);
        warnings.extend(removed);
        if fraction > drift_threshold {
            warnings.push(EvalIssue::new(
                EvalCheck::Drift,
                "diagram",
                format!(
                    "repair changed {:.0}% of high-confidence elements (threshold {:.0}%)",
                    fraction * 100.0,
                    drift_threshold * 100.0
                ),
            ));
        }
        drift_fraction = Some(fraction);
    }

    let summary = EvalSummary {
        nodes: ir.nodes.len(),
        edges: ir.edges.len(),
        groups: ir.groups.len(),
        generic_labels_remaining: ir
            .nodes
            .iter()
            .filter(|n| is_generic_label(&n.label))
            .count(),
        orphan_nodes,
        drift: drift_fraction,
    };
    EvalReport::from_issues(violations, warnings, summary)
}

/// Evaluates raw IR JSON; anything that does not deserialize is a schema
/// violation rather than an error.
pub fn eval_json(raw: &str, partial: Option<&str>, drift_threshold: f64) -> EvalReport {
    let ir = match DiagramIr::from_json(raw) {
        Ok(ir) => ir,
        Err(err) => {
            return EvalReport::from_issues(
                vec![EvalIssue::new(
                    EvalCheck::Schema,
                    "document",
                    format!("not a valid IR document: {err}"),
                )],
                Vec::new(),
                EvalSummary::default(),
            )
        }
    };
    let partial = partial.and_then(|raw| match DiagramIr::from_json(raw) {
        Ok(ir) => Some(ir),
        Err(err) => {
            log::warn!("Partial IR is not valid JSON, skipping drift check: {err}");
            None
        }
    });
    eval(&ir, partial.as_ref(), drift_threshold)
}
