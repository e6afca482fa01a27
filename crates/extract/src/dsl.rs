//! PlantUML-style text DSL reader.
//!
//! Four diagram kinds are recognised from the body: component (the default),
//! sequence, class and state. Unrecognised lines (notes, skinparams, layout
//! hints) are skipped.

use crate::layout::unique_id;
use crate::style::resolve_color;
use crate::{ParseError, Result};
use canon_ir::{
    Arrow, DiagramIr, DiagramType, Direction, Edge, Group, LineStyle, Node, NodeRole, Shape,
    SourceFormat,
};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static ARROW_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(#[^\]]+)\]").expect("valid regex"));

static PARTICIPANT_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(participant|boundary|control|entity|collections)\s").expect("valid regex")
});
static MESSAGE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\w+\s*-+>+\s*\w+\s*:").expect("valid regex"));
static COMPONENT_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(package|component|database|node|folder|cloud|rectangle|frame|queue)\s|\[[^\]*]+\]",
    )
    .expect("valid regex")
});
static CLASS_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(abstract\s+class|abstract|class|interface|enum)\s+\w+\s*(<<|\{|$)")
        .expect("valid regex")
});
static STATE_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*state\s").expect("valid regex"));

// component
static GROUP_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^(package|node|folder|cloud|rectangle|frame|together|database)\s*(?:"([^"]*)"|([^\s{#"]+))?\s*(?:as\s+(\w+))?\s*(#\w+)?\s*\{$"#,
    )
    .expect("valid regex")
});
static BRACKET_NODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[([^\]]+)\](?:\s+as\s+(\w+))?\s*(#\w+)?\s*$").expect("valid regex")
});
static KEYWORD_NODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^(component|database|actor|interface|queue|cloud|node|entity|collections|boundary|control|rectangle|storage|agent)\s+(?:"([^"]+)"|\[([^\]]+)\]|(\w+))(?:\s+as\s+(\w+))?\s*(#\w+)?\s*$"#,
    )
    .expect("valid regex")
});
static CONNECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\[[^\]]+\]|"[^"]+"|\w+)\s*(<?[-.=]+(?:(?:up|down|left|right|u|d|l|r)[-.=]*)?(?:\[#[^\]]+\])?[-.=]*>?)\s*(\[[^\]]+\]|"[^"]+"|\w+)(?:\s*:\s*(.*))?$"#,
    )
    .expect("valid regex")
});

// sequence
static PARTICIPANT_ALIASED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^(participant|actor|entity|boundary|control|database|collections|queue)\s+"([^"]+)"\s+as\s+(\w+)\s*(#\w+)?"#,
    )
    .expect("valid regex")
});
static PARTICIPANT_PLAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r##"(?i)^(participant|actor|entity|boundary|control|database|collections|queue)\s+"?([^"#]+?)"?\s*(#\w+)?\s*$"##,
    )
    .expect("valid regex")
});
static MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\w+|"[^"]+")\s*(<?[-.=]+(?:\[#[^\]]+\])?[-.=]*>{0,2}[xo]?(?:\+\+|--)?)\s*(\w+|"[^"]+")(?:\s*:\s*(.*))?$"#,
    )
    .expect("valid regex")
});

// class
static CLASS_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^(abstract\s+class|abstract|class|interface|enum)\s+"?(\w+)"?\s*(?:<<\s*(\w+)\s*>>)?\s*(#\w+)?\s*(\{)?\s*$"#,
    )
    .expect("valid regex")
});
static RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\w+)\s*(?:"[^"]*"\s*)?([<>|.*o#x+\-]{2,})\s*(?:"[^"]*"\s*)?(\w+)(?:\s*:\s*(.*))?$"#,
    )
    .expect("valid regex")
});

// state
static STATE_ALIASED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^state\s+"([^"]+)"\s+as\s+(\w+)\s*(#\w+)?\s*(\{)?\s*$"#).expect("valid regex")
});
static STATE_PLAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^state\s+(\w+)\s*(?:<<\s*\w+\s*>>)?\s*(#\w+)?\s*(\{)?\s*$")
        .expect("valid regex")
});
static TRANSITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\[\*\]|\w+)\s*(-+[a-z]*-*>)\s*(\[\*\]|\w+)(?:\s*:\s*(.*))?$")
        .expect("valid regex")
});

const START_STATE: &str = "__start__";
const END_STATE: &str = "__end__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DslKind {
    Component,
    Sequence,
    Class,
    State,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedArrow {
    pub style: LineStyle,
    pub start: bool,
    pub end: bool,
    pub color: Option<String>,
}

/// Arrow punctuation: `->` solid, `-->`/`..>` dashed, `==>` thick, a leading
/// `<` or trailing `>` marks the heads, `[#color]` colors the link.
pub(crate) fn parse_arrow(raw: &str) -> ParsedArrow {
    let color = ARROW_COLOR
        .captures(raw)
        .and_then(|caps| resolve_color(&caps[1]));
    let stripped = ARROW_COLOR.replace_all(raw, "");
    let mut arrow = stripped.trim();

    // activation suffixes on sequence messages
    for suffix in ["++", "--"] {
        if let Some(rest) = arrow.strip_suffix(suffix) {
            if rest.ends_with('>') || rest.ends_with('x') {
                arrow = rest;
            }
        }
    }
    let mut lost = false;
    if arrow.len() > 1 {
        if let Some(rest) = arrow.strip_suffix('x') {
            lost = true;
            arrow = rest;
        } else if let Some(rest) = arrow.strip_suffix('o') {
            arrow = rest;
        }
    }

    // direction hints stay in the core: `-up->` is a solid link, not `-->`
    let core = arrow.trim_matches(|c| c == '<' || c == '>');
    let style = if core.matches('=').count() >= 2 {
        LineStyle::Thick
    } else if core.contains('.') || (core.len() >= 2 && core.chars().all(|c| c == '-')) {
        LineStyle::Dashed
    } else {
        LineStyle::Solid
    };

    ParsedArrow {
        style,
        start: arrow.starts_with('<'),
        end: !lost && arrow.ends_with('>'),
        color,
    }
}

/// Body between `@startuml` and `@enduml` (or a fenced `plantuml` block);
/// the whole text when neither marker is present.
pub(crate) fn diagram_body(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    let (start, end_marker) = if let Some(pos) = lower.find("@startuml") {
        (pos, "@enduml")
    } else if let Some(pos) = lower.find("```plantuml").or_else(|| lower.find("```puml")) {
        (pos, "```")
    } else {
        return text;
    };
    let body_start = lower[start..]
        .find('\n')
        .map(|offset| start + offset + 1)
        .unwrap_or(text.len());
    let body_end = lower[body_start..]
        .find(end_marker)
        .map(|offset| body_start + offset)
        .unwrap_or(text.len());
    &text[body_start..body_end]
}

pub(crate) fn detect_kind(body: &str) -> DslKind {
    let component_like = COMPONENT_KEYWORD.is_match(body);
    if PARTICIPANT_KEYWORD.is_match(body) && !CLASS_KEYWORD.is_match(body) {
        return DslKind::Sequence;
    }
    if CLASS_KEYWORD.is_match(body) {
        return DslKind::Class;
    }
    if body.contains("[*]") || STATE_KEYWORD.is_match(body) {
        return DslKind::State;
    }
    if MESSAGE_LIKE.is_match(body) && !component_like {
        return DslKind::Sequence;
    }
    DslKind::Component
}

/// Comment-free, trimmed, non-empty lines
fn content_lines(body: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut in_block_comment = false;
    for raw in body.lines() {
        let line = raw.trim();
        if in_block_comment {
            if line.ends_with("'/") {
                in_block_comment = false;
            }
            continue;
        }
        if line.starts_with("/'") {
            in_block_comment = !line.ends_with("'/");
            continue;
        }
        if line.is_empty() || line.starts_with('\'') || line.starts_with('@') {
            continue;
        }
        lines.push(line);
    }
    lines
}

fn unquote(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches(['[', '"'])
        .trim_end_matches([']', '"'])
        .trim()
}

/// Incremental graph construction shared by all diagram kinds
struct Builder {
    ir: DiagramIr,
    used: HashSet<String>,
    /// alias or label -> node id
    names: HashMap<String, String>,
    group_stack: Vec<String>,
}

impl Builder {
    fn new(diagram_type: DiagramType) -> Self {
        Self {
            ir: DiagramIr::new(diagram_type),
            used: HashSet::new(),
            names: HashMap::new(),
            group_stack: Vec::new(),
        }
    }

    fn claim_id(&mut self, alias: Option<&str>, label: &str) -> String {
        match alias {
            Some(alias) if !self.used.contains(alias) => {
                self.used.insert(alias.to_string());
                alias.to_string()
            }
            Some(alias) => unique_id(alias, &mut self.used),
            None => unique_id(label, &mut self.used),
        }
    }

    /// Declares a node, or updates the one already known under `alias`/`label`
    fn declare(
        &mut self,
        alias: Option<&str>,
        label: &str,
        shape: Shape,
        role: Option<NodeRole>,
        color: Option<String>,
    ) -> String {
        let key = alias.unwrap_or(label);
        if let Some(id) = self.names.get(key).cloned() {
            if let Some(node) = self.ir.node_mut(&id) {
                node.label = label.to_string();
                node.shape = shape;
                node.role = role.or(node.role);
                node.fill_color = color.or(node.fill_color.take());
            }
            self.names.insert(label.to_string(), id.clone());
            return id;
        }

        let id = self.claim_id(alias, label);
        let mut node = Node::new(id.clone(), label).with_shape(shape);
        node.role = role;
        node.fill_color = color;
        if let Some(group_id) = self.group_stack.last().cloned() {
            node.parent_group = Some(group_id.clone());
            if let Some(group) = self.ir.groups.iter_mut().find(|g| g.id == group_id) {
                group.children.push(id.clone());
            }
        }
        self.ir.nodes.push(node);
        self.names.insert(key.to_string(), id.clone());
        self.names.insert(label.to_string(), id.clone());
        id
    }

    /// Resolves a connection endpoint, creating an ungrouped node on first sight
    fn endpoint(&mut self, raw: &str) -> String {
        let name = unquote(raw);
        if let Some(id) = self.names.get(name) {
            return id.clone();
        }
        let id = unique_id(name, &mut self.used);
        self.ir.nodes.push(Node::new(id.clone(), name));
        self.names.insert(name.to_string(), id.clone());
        id
    }

    fn open_group(&mut self, alias: Option<&str>, label: &str, color: Option<String>) -> String {
        let id = self.claim_id(alias, label);
        let mut group = Group::new(id.clone(), label);
        group.fill_color = color;
        if let Some(parent_id) = self.group_stack.last() {
            if let Some(parent) = self.ir.groups.iter_mut().find(|g| &g.id == parent_id) {
                parent.children.push(id.clone());
            }
        }
        self.ir.groups.push(group);
        self.group_stack.push(id.clone());
        id
    }

    fn close_group(&mut self) {
        if self.group_stack.pop().is_none() {
            debug!("Unbalanced closing brace in DSL body");
        }
    }

    fn connect(&mut self, source: String, target: String, label: &str, arrow: &ParsedArrow) {
        let mut edge = Edge::new(self.ir.next_edge_id(), source, target)
            .with_label(label.trim())
            .with_style(arrow.style);
        edge.arrow_start = Arrow::from_present(arrow.start);
        edge.arrow_end = Arrow::from_present(arrow.end);
        edge.color = arrow.color.clone();
        self.ir.edges.push(edge);
    }

    fn finish(mut self) -> Result<DiagramIr> {
        if self.ir.nodes.is_empty() {
            return Err(ParseError::Malformed(
                "DSL body declares no diagram elements".into(),
            ));
        }
        self.ir.sync_group_membership();
        self.ir.metadata.source_format = Some(SourceFormat::Dsl);
        Ok(self.ir)
    }
}

fn color_of(raw: Option<regex::Match<'_>>) -> Option<String> {
    raw.and_then(|m| resolve_color(m.as_str()))
}

fn keyword_shape(keyword: &str) -> (Shape, Option<NodeRole>) {
    match keyword.to_ascii_lowercase().as_str() {
        "database" | "storage" => (Shape::Cylinder, Some(NodeRole::Datastore)),
        "actor" => (Shape::Circle, Some(NodeRole::Actor)),
        "interface" => (Shape::Circle, Some(NodeRole::Interface)),
        "queue" | "collections" => (Shape::Rectangle, Some(NodeRole::Queue)),
        "cloud" => (Shape::Rectangle, Some(NodeRole::External)),
        _ => (Shape::Rectangle, None),
    }
}

fn parse_component(lines: &[&str]) -> Result<DiagramIr> {
    let mut builder = Builder::new(DiagramType::Flowchart);
    for line in lines {
        if line.eq_ignore_ascii_case("left to right direction") {
            builder.ir.direction = Direction::Lr;
            continue;
        }
        if let Some(caps) = GROUP_OPEN.captures(line) {
            let alias = caps.get(4).map(|m| m.as_str());
            let label = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim())
                .filter(|l| !l.is_empty())
                .or(alias)
                .unwrap_or("Group")
                .to_string();
            builder.open_group(alias, &label, color_of(caps.get(5)));
            continue;
        }
        if *line == "}" {
            builder.close_group();
            continue;
        }
        if let Some(caps) = BRACKET_NODE.captures(line) {
            let label = caps[1].trim().to_string();
            let alias = caps.get(2).map(|m| m.as_str());
            builder.declare(alias, &label, Shape::Rectangle, None, color_of(caps.get(3)));
            continue;
        }
        if let Some(caps) = KEYWORD_NODE.captures(line) {
            let (shape, role) = keyword_shape(&caps[1]);
            let label = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let alias = caps.get(5).map(|m| m.as_str());
            builder.declare(alias, &label, shape, role, color_of(caps.get(6)));
            continue;
        }
        if let Some(caps) = CONNECTION.captures(line) {
            let arrow = parse_arrow(&caps[2]);
            let source = builder.endpoint(&caps[1]);
            let target = builder.endpoint(&caps[3]);
            let label = caps.get(4).map(|m| m.as_str()).unwrap_or("");
            builder.connect(source, target, label, &arrow);
            continue;
        }
        debug!("Skipping DSL line: {line}");
    }
    builder.finish()
}

fn parse_sequence(lines: &[&str]) -> Result<DiagramIr> {
    let mut builder = Builder::new(DiagramType::Sequence);
    builder.ir.direction = Direction::Lr;
    for line in lines {
        if let Some(caps) = PARTICIPANT_ALIASED.captures(line) {
            let (shape, role) = keyword_shape(&caps[1]);
            builder.declare(Some(&caps[3]), &caps[2], shape, role, color_of(caps.get(4)));
            continue;
        }
        if let Some(caps) = PARTICIPANT_PLAIN.captures(line) {
            let (shape, role) = keyword_shape(&caps[1]);
            let name = caps[2].trim().to_string();
            let alias: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            let alias = (!alias.is_empty()).then_some(alias);
            builder.declare(alias.as_deref(), &name, shape, role, color_of(caps.get(3)));
            continue;
        }
        if let Some(caps) = MESSAGE.captures(line) {
            let arrow = parse_arrow(&caps[2]);
            let source = builder.endpoint(&caps[1]);
            let target = builder.endpoint(&caps[3]);
            let label = caps.get(4).map(|m| m.as_str()).unwrap_or("");
            builder.connect(source, target, label, &arrow);
            continue;
        }
        debug!("Skipping sequence line: {line}");
    }
    builder.finish()
}

/// Relation kind named by the decoration of a class arrow
fn relation_kind(arrow: &str) -> &'static str {
    if arrow.contains("|>") || arrow.contains("<|") {
        if arrow.contains("..") {
            "implements"
        } else {
            "extends"
        }
    } else if arrow.contains('*') {
        "composition"
    } else if arrow.contains('o') {
        "aggregation"
    } else if arrow.contains("..") {
        "dependency"
    } else {
        "association"
    }
}

fn parse_class(lines: &[&str]) -> Result<DiagramIr> {
    let mut builder = Builder::new(DiagramType::Class);
    let mut in_body = false;
    for line in lines {
        if in_body {
            if line.starts_with('}') {
                in_body = false;
            }
            continue;
        }
        if let Some(caps) = CLASS_DECL.captures(line) {
            let name = caps[2].to_string();
            let id = builder.declare(Some(name.as_str()), &name, Shape::Rectangle, None, color_of(caps.get(4)));
            let keyword = caps[1].to_ascii_lowercase();
            let stereotype = caps
                .get(3)
                .map(|m| m.as_str().to_ascii_lowercase())
                .or_else(|| match keyword.split_whitespace().next() {
                    Some("abstract") => Some("abstract".to_string()),
                    Some("interface") => Some("interface".to_string()),
                    Some("enum") => Some("enum".to_string()),
                    _ => None,
                });
            if let Some(stereotype) = stereotype {
                builder
                    .ir
                    .metadata
                    .extra
                    .insert(format!("stereotype.{id}"), stereotype);
            }
            in_body = caps.get(5).is_some();
            continue;
        }
        if let Some(caps) = RELATION.captures(line) {
            let raw_arrow = &caps[2];
            let kind = relation_kind(raw_arrow);
            let source = builder.endpoint(&caps[1]);
            let target = builder.endpoint(&caps[3]);
            let arrow = ParsedArrow {
                style: if raw_arrow.contains("..") {
                    LineStyle::Dashed
                } else {
                    LineStyle::Solid
                },
                start: raw_arrow.starts_with(['<', '*', 'o']),
                end: raw_arrow.ends_with(['>', '*', 'o']),
                color: None,
            };
            let explicit = caps.get(4).map(|m| m.as_str().trim()).unwrap_or("");
            let label = match (explicit.is_empty(), kind) {
                (false, _) => explicit,
                (true, "association") => "",
                (true, kind) => kind,
            };
            builder.connect(source, target, label, &arrow);
            continue;
        }
        debug!("Skipping class line: {line}");
    }
    builder.finish()
}

fn parse_state(lines: &[&str]) -> Result<DiagramIr> {
    let mut builder = Builder::new(DiagramType::State);
    for line in lines {
        let declared = STATE_ALIASED
            .captures(line)
            .map(|caps| {
                (
                    caps[2].to_string(),
                    caps[1].to_string(),
                    color_of(caps.get(3)),
                    caps.get(4).is_some(),
                )
            })
            .or_else(|| {
                STATE_PLAIN.captures(line).map(|caps| {
                    (
                        caps[1].to_string(),
                        caps[1].to_string(),
                        color_of(caps.get(2)),
                        caps.get(3).is_some(),
                    )
                })
            });
        if let Some((alias, label, color, composite)) = declared {
            if composite {
                // composite states hold their substates in a region of their own
                let region = format!("{alias}_region");
                builder.open_group(Some(region.as_str()), &label, color);
            } else {
                builder.declare(Some(alias.as_str()), &label, Shape::Rectangle, None, color);
            }
            continue;
        }
        if *line == "}" {
            builder.close_group();
            continue;
        }
        if let Some(caps) = TRANSITION.captures(line) {
            let source = match &caps[1] {
                "[*]" => builder.declare(Some(START_STATE), "start", Shape::Circle, None, None),
                name => builder.endpoint(name),
            };
            let target = match &caps[3] {
                "[*]" => builder.declare(Some(END_STATE), "end", Shape::Circle, None, None),
                name => builder.endpoint(name),
            };
            let label = caps.get(4).map(|m| m.as_str()).unwrap_or("");
            let arrow = ParsedArrow {
                style: LineStyle::Solid,
                start: false,
                end: true,
                color: None,
            };
            builder.connect(source, target, label, &arrow);
            continue;
        }
        debug!("Skipping state line: {line}");
    }
    builder.finish()
}

pub fn extract_dsl(text: &str) -> Result<DiagramIr> {
    let body = diagram_body(text);
    let lines = content_lines(body);
    if lines.is_empty() {
        return Err(ParseError::Malformed("empty DSL body".into()));
    }
    let kind = detect_kind(body);
    debug!("DSL body detected as {kind:?}");
    let mut ir = match kind {
        DslKind::Component => parse_component(&lines)?,
        DslKind::Sequence => parse_sequence(&lines)?,
        DslKind::Class => parse_class(&lines)?,
        DslKind::State => parse_state(&lines)?,
    };
    ir.metadata
        .extra
        .insert("dsl_kind".into(), format!("{kind:?}").to_ascii_lowercase());
    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arrow_punctuation_maps_to_styles() {
        let solid = parse_arrow("->");
        assert_eq!((solid.style, solid.start, solid.end), (LineStyle::Solid, false, true));
        assert_eq!(parse_arrow("-->").style, LineStyle::Dashed);
        assert_eq!(parse_arrow("..>").style, LineStyle::Dashed);
        assert_eq!(parse_arrow("==>").style, LineStyle::Thick);

        let both = parse_arrow("<-->");
        assert_eq!((both.start, both.end), (true, true));
        let plain = parse_arrow("--");
        assert_eq!((plain.start, plain.end), (false, false));

        let colored = parse_arrow("-[#red]>");
        assert_eq!(colored.color.as_deref(), Some("#FF0000"));
        assert_eq!(colored.style, LineStyle::Solid);

        let lost = parse_arrow("->x");
        assert!(!lost.end);
    }

    #[test]
    fn direction_hints_keep_arrows_solid() {
        for raw in ["-up->", "-down->", "-left->", "-right->", "-u->", "-l->"] {
            let arrow = parse_arrow(raw);
            assert_eq!(
                (arrow.style, arrow.start, arrow.end),
                (LineStyle::Solid, false, true),
                "{raw}"
            );
        }
        assert_eq!(parse_arrow("-[#blue]up->").style, LineStyle::Solid);
        assert_eq!(parse_arrow("=up=>").style, LineStyle::Thick);
    }

    #[test]
    fn direction_hinted_connections_become_solid_edges() {
        let text = "component web\ncomponent api\nweb -up-> api : calls\napi -left-> web\nweb -down-> db\ndb -right-> api\n";
        let ir = extract_dsl(text).unwrap();
        assert_eq!(ir.edges.len(), 4);
        assert!(
            ir.edges.iter().all(|e| e.line_style == LineStyle::Solid),
            "{:?}",
            ir.edges
        );
        assert_eq!((ir.edges[0].source.as_str(), ir.edges[0].target.as_str()), ("web", "api"));
        assert_eq!(ir.edges[0].label, "calls");
    }

    #[test]
    fn component_diagram_with_nested_groups() {
        let text = r#"
@startuml
left to right direction
package "Internal Zone" as internal #LightBlue {
  [Orders API] as orders #4472C4
  database "Orders DB" as db
  node "Workers" {
    queue "Events" as events
  }
}
actor User
User -> orders : HTTPS
orders --> db : SQL
orders ==> events
@enduml
"#;
        let ir = extract_dsl(text).unwrap();
        assert_eq!(ir.diagram_type, DiagramType::Flowchart);
        assert_eq!(ir.direction, Direction::Lr);

        let ids: Vec<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["orders", "db", "events", "user"]);
        let orders = ir.node("orders").unwrap();
        assert_eq!(orders.fill_color.as_deref(), Some("#4472C4"));
        assert_eq!(orders.parent_group.as_deref(), Some("internal"));
        assert_eq!(ir.node("db").unwrap().shape, Shape::Cylinder);
        assert_eq!(ir.node("user").unwrap().role, Some(NodeRole::Actor));

        let internal = ir.group("internal").unwrap();
        assert_eq!(internal.fill_color.as_deref(), Some("#ADD8E6"));
        assert_eq!(internal.children, vec!["orders", "db", "workers"]);
        assert_eq!(ir.group("workers").unwrap().children, vec!["events"]);

        let styles: Vec<(&str, &str, LineStyle)> = ir
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.label.as_str(), e.line_style))
            .collect();
        assert_eq!(
            styles,
            vec![
                ("user", "HTTPS", LineStyle::Solid),
                ("orders", "SQL", LineStyle::Dashed),
                ("orders", "", LineStyle::Thick),
            ]
        );
        assert_eq!(ir.metadata.source_format, Some(SourceFormat::Dsl));
    }

    #[test]
    fn bracket_endpoints_resolve_by_label() {
        let ir = extract_dsl("[Web App] -> [Payment Service] : REST\n").unwrap();
        assert_eq!(ir.nodes.len(), 2);
        assert_eq!(ir.edges[0].source, "web_app");
        assert_eq!(ir.edges[0].target, "payment_service");
        assert_eq!(ir.edges[0].label, "REST");
    }

    #[test]
    fn sequence_messages_keep_order_and_return_style() {
        let text = "participant \"Client App\" as client\nparticipant Server\nclient -> Server : request\nServer --> client : response\n";
        let ir = extract_dsl(text).unwrap();
        assert_eq!(ir.diagram_type, DiagramType::Sequence);
        assert_eq!(ir.nodes.len(), 2);
        assert_eq!(ir.edges[0].line_style, LineStyle::Solid);
        assert_eq!(ir.edges[1].line_style, LineStyle::Dashed);
        assert_eq!(ir.edges[1].target, "client");
        assert_eq!(ir.edges[1].label, "response");
    }

    #[test]
    fn class_relations_are_named_by_decoration() {
        let text = "class Animal {\n  +name: String\n  +speak()\n}\ninterface Pet\nAnimal <|-- Dog\nDog ..|> Pet\nOwner o-- Dog : owns\n";
        let ir = extract_dsl(text).unwrap();
        assert_eq!(ir.diagram_type, DiagramType::Class);
        let labels: Vec<&str> = ir.edges.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["extends", "implements", "owns"]);
        assert_eq!(ir.edges[1].line_style, LineStyle::Dashed);
        assert_eq!(
            ir.metadata.extra.get("stereotype.Pet").map(String::as_str),
            Some("interface")
        );
    }

    #[test]
    fn state_pseudo_states_become_circles() {
        let text = "[*] --> Idle\nIdle --> Running : start\nRunning --> [*]\n";
        let ir = extract_dsl(text).unwrap();
        assert_eq!(ir.diagram_type, DiagramType::State);
        let start = ir.node(START_STATE).unwrap();
        assert_eq!(start.shape, Shape::Circle);
        assert!(ir.has_node(END_STATE));
        assert_eq!(ir.edges.len(), 3);
        assert_eq!(ir.edges[1].label, "start");
    }

    #[test]
    fn empty_bodies_are_malformed() {
        assert!(matches!(
            extract_dsl("@startuml\n' only a comment\n@enduml\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            extract_dsl("skinparam monochrome true\n"),
            Err(ParseError::Malformed(_))
        ));
    }
}
