use crate::types::{DiagramIr, IR_SCHEMA_VERSION};
use once_cell::sync::Lazy;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

static GENERIC_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[Nn]ode_\d+$").expect("valid regex"));
static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$").expect("valid regex"));

/// True for CV placeholders such as `Node_3`
pub fn is_generic_label(label: &str) -> bool {
    GENERIC_LABEL.is_match(label.trim())
}

pub fn is_valid_color(raw: &str) -> bool {
    HEX_COLOR.is_match(raw)
}

/// Normalizes `#abc` / `#AABBCC` / `rgb(r,g,b)` into upper-case `#RRGGBB`.
pub fn normalize_color(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("rgb(").and_then(|r| r.strip_suffix(')')) {
        let parts: Vec<u8> = rest
            .split(',')
            .filter_map(|p| p.trim().parse::<u8>().ok())
            .collect();
        if parts.len() == 3 {
            return Some(format!("#{:02X}{:02X}{:02X}", parts[0], parts[1], parts[2]));
        }
        return None;
    }
    if !is_valid_color(raw) {
        return None;
    }
    let hex = &raw[1..];
    if hex.len() == 3 {
        let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
        return Some(format!("#{}", expanded.to_ascii_uppercase()));
    }
    Some(format!("#{}", hex.to_ascii_uppercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchemaIssueKind {
    UnsupportedVersion,
    EmptyId,
    DuplicateId,
    ConfidenceOutOfRange,
    InvalidColor,
    UnknownGroupChild,
    UnknownParentGroup,
    GroupCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaIssue {
    pub kind: SchemaIssueKind,
    pub element: String,
    pub message: String,
}

impl SchemaIssue {
    fn new(kind: SchemaIssueKind, element: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            element: element.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}

/// Structural conformance checks beyond what the typed model already enforces.
///
/// Node and group ids share one namespace (group children may name either);
/// edge ids have their own.
pub fn check_schema(ir: &DiagramIr) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    let major = ir.schema_version.split('.').next().unwrap_or_default();
    let expected_major = IR_SCHEMA_VERSION.split('.').next().unwrap_or_default();
    if major != expected_major {
        issues.push(SchemaIssue::new(
            SchemaIssueKind::UnsupportedVersion,
            "schema_version",
            format!("unsupported schema version {}", ir.schema_version),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let element_ids = ir
        .nodes
        .iter()
        .map(|n| ("node", n.id.as_str()))
        .chain(ir.groups.iter().map(|g| ("group", g.id.as_str())));
    for (kind, id) in element_ids {
        if id.trim().is_empty() {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::EmptyId,
                kind,
                format!("{kind} with empty id"),
            ));
        } else if !seen.insert(id) {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::DuplicateId,
                id,
                format!("duplicate {kind} id"),
            ));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in &ir.edges {
        if edge.id.trim().is_empty() {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::EmptyId,
                "edge",
                format!("edge {} -> {} with empty id", edge.source, edge.target),
            ));
        } else if !edge_ids.insert(edge.id.as_str()) {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::DuplicateId,
                edge.id.clone(),
                "duplicate edge id",
            ));
        }
        if !(0.0..=1.0).contains(&edge.confidence) {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::ConfidenceOutOfRange,
                edge.id.clone(),
                format!("confidence {} outside [0, 1]", edge.confidence),
            ));
        }
    }

    for node in &ir.nodes {
        if !(0.0..=1.0).contains(&node.confidence) {
            issues.push(SchemaIssue::new(
                SchemaIssueKind::ConfidenceOutOfRange,
                node.id.clone(),
                format!("confidence {} outside [0, 1]", node.confidence),
            ));
        }
        for color in [&node.fill_color, &node.border_color, &node.text_color]
            .into_iter()
            .flatten()
        {
            if !is_valid_color(color) {
                issues.push(SchemaIssue::new(
                    SchemaIssueKind::InvalidColor,
                    node.id.clone(),
                    format!("invalid color {color}"),
                ));
            }
        }
        if let Some(parent) = &node.parent_group {
            if ir.group(parent).is_none() {
                issues.push(SchemaIssue::new(
                    SchemaIssueKind::UnknownParentGroup,
                    node.id.clone(),
                    format!("parent group {parent} does not exist"),
                ));
            }
        }
    }

    for group in &ir.groups {
        for child in &group.children {
            if !ir.has_node(child) && ir.group(child).is_none() {
                issues.push(SchemaIssue::new(
                    SchemaIssueKind::UnknownGroupChild,
                    group.id.clone(),
                    format!("child {child} is neither a node nor a group"),
                ));
            }
        }
    }

    issues.extend(group_cycles(ir));
    issues
}

fn group_cycles(ir: &DiagramIr) -> Vec<SchemaIssue> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for group in &ir.groups {
        graph.add_node(group.id.as_str());
        for child in &group.children {
            if ir.group(child).is_some() {
                graph.add_edge(group.id.as_str(), child.as_str(), ());
            }
        }
    }

    let mut issues = Vec::new();
    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|id| graph.contains_edge(id, id));
        if !cyclic {
            continue;
        }
        let mut members: Vec<&str> = component;
        members.sort_unstable();
        issues.push(SchemaIssue::new(
            SchemaIssueKind::GroupCycle,
            members[0],
            format!("group containment cycle: {}", members.join(" -> ")),
        ));
    }
    issues
}

/// JSON Schema of the canonical IR document
pub fn json_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(DiagramIr);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Group, Node};
    use pretty_assertions::assert_eq;

    #[test]
    fn generic_labels_are_detected() {
        assert!(is_generic_label("Node_1"));
        assert!(is_generic_label("node_42"));
        assert!(!is_generic_label("Node_api"));
        assert!(!is_generic_label("Payment Node_1"));
    }

    #[test]
    fn colors_normalize_to_upper_hex() {
        assert_eq!(normalize_color("#4472c4").as_deref(), Some("#4472C4"));
        assert_eq!(normalize_color("#fc0").as_deref(), Some("#FFCC00"));
        assert_eq!(normalize_color("rgb(255, 0, 16)").as_deref(), Some("#FF0010"));
        assert_eq!(normalize_color("none"), None);
    }

    #[test]
    fn duplicate_ids_and_bad_confidence_are_reported() {
        let mut ir = DiagramIr::default();
        ir.nodes.push(Node::new("a", "A"));
        ir.nodes.push(Node::new("a", "Again").with_confidence(1.5));
        let kinds: Vec<SchemaIssueKind> = check_schema(&ir).into_iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SchemaIssueKind::DuplicateId,
                SchemaIssueKind::ConfidenceOutOfRange
            ]
        );
    }

    #[test]
    fn group_cycles_are_reported_once() {
        let mut ir = DiagramIr::default();
        let mut outer = Group::new("g1", "Outer");
        outer.children.push("g2".into());
        let mut inner = Group::new("g2", "Inner");
        inner.children.push("g1".into());
        ir.groups.push(outer);
        ir.groups.push(inner);

        let issues = check_schema(&ir);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, SchemaIssueKind::GroupCycle);
        assert_eq!(issues[0].element, "g1");
    }

    #[test]
    fn schema_document_names_the_ir_fields() {
        let schema = json_schema().to_string();
        assert!(schema.contains("diagram_type"));
        assert!(schema.contains("line_style"));
    }
}
