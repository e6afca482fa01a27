//! Strict reader for the flowchart subset [`crate::render`] emits, plus the
//! graph comparison used for round-trip checks.

use crate::error::{RenderError, Result};
use crate::mermaid::unescape_label;
use canon_ir::{
    normalize_color, Arrow, DiagramIr, DiagramType, Direction, Edge, Group, LineStyle, Node,
    Shape, SourceFormat,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:flowchart|graph)(?:\s+(TB|TD|BT|LR|RL))?$").expect("valid regex"));
static LEGEND_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%%\s*(\S+)\s+=\s+(.+)$").expect("valid regex"));
static SUBGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^subgraph\s+([A-Za-z0-9_]+)(?:\s*\["(.*)"\])?$"#).expect("valid regex")
});
static EDGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\S.*?)\s*(<-\.->|<-->|<==>|-\.->|<-\.-|-\.-|==>|<==|===|-->|<--|---)(?:\|"?(.*?)"?\|)?\s*(\S.*)$"#,
    )
    .expect("valid regex")
});
static CLASS_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^classDef\s+([A-Za-z0-9_]+)\s+(\S+)$").expect("valid regex"));
static CLASS_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class\s+([A-Za-z0-9_,]+)\s+([A-Za-z0-9_]+)$").expect("valid regex"));
static STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^style\s+([A-Za-z0-9_]+)\s+(\S+)$").expect("valid regex"));
static LINK_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^linkStyle\s+(\d+)\s+(\S+)$").expect("valid regex"));

const SHAPE_FORMS: &[(&str, &str, Shape)] = &[
    ("[(", ")]", Shape::Cylinder),
    ("((", "))", Shape::Circle),
    ("{{", "}}", Shape::Hexagon),
    ("[", "]", Shape::Rectangle),
    ("{", "}", Shape::Diamond),
    ("(", ")", Shape::Rectangle),
];

fn arrow_parts(token: &str) -> (LineStyle, Arrow, Arrow) {
    let style = if token.contains('.') {
        LineStyle::Dashed
    } else if token.contains('=') {
        LineStyle::Thick
    } else {
        LineStyle::Solid
    };
    (
        style,
        Arrow::from_present(token.starts_with('<')),
        Arrow::from_present(token.ends_with('>')),
    )
}

/// `id`, `id["label"]` or any other bracketed shape form
fn node_token(token: &str) -> Option<(String, Option<(String, Shape)>)> {
    let token = token.trim();
    let id_len = token
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(token.len());
    if id_len == 0 {
        return None;
    }
    let (id, rest) = token.split_at(id_len);
    if rest.is_empty() {
        return Some((id.to_string(), None));
    }
    for (open, close, shape) in SHAPE_FORMS {
        if let Some(inner) = rest.strip_prefix(open).and_then(|r| r.strip_suffix(close)) {
            let inner = inner
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(inner);
            return Some((id.to_string(), Some((unescape_label(inner), *shape))));
        }
    }
    None
}

fn style_pairs(spec: &str) -> BTreeMap<String, String> {
    spec.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn color_of(pairs: &BTreeMap<String, String>, key: &str) -> Option<String> {
    pairs.get(key).and_then(|raw| normalize_color(raw))
}

struct Reader {
    ir: DiagramIr,
    stack: Vec<String>,
    classes: BTreeMap<String, BTreeMap<String, String>>,
}

impl Reader {
    fn adopt(&mut self, child: &str) {
        let Some(parent) = self.stack.last().cloned() else {
            return;
        };
        if let Some(group) = self.ir.groups.iter_mut().find(|g| g.id == parent) {
            if !group.children.iter().any(|c| c == child) {
                group.children.push(child.to_string());
            }
        }
    }

    /// Declares or updates a node; returns its id
    fn node(&mut self, id: String, form: Option<(String, Shape)>) -> String {
        match self.ir.node_mut(&id) {
            Some(existing) => {
                if let Some((label, shape)) = form {
                    existing.label = label;
                    existing.shape = shape;
                }
            }
            None => {
                let node = match form {
                    Some((label, shape)) => Node::new(id.clone(), label).with_shape(shape),
                    None => Node::new(id.clone(), id.clone()),
                };
                self.ir.nodes.push(node);
                self.adopt(&id);
            }
        }
        id
    }

    fn line(&mut self, number: usize, line: &str) -> Result<()> {
        let fail = |message: &str| RenderError::Parse {
            line: number,
            message: format!("{message}: {line}"),
        };

        if line.starts_with("%%") {
            if let Some(caps) = LEGEND_ENTRY.captures(line) {
                let (key, meaning) = (caps[1].to_string(), caps[2].trim().to_string());
                let legend = &mut self.ir.metadata.legend;
                if key.starts_with('#') {
                    legend.colors.insert(key, meaning);
                } else {
                    legend.line_styles.insert(key, meaning);
                }
            }
            return Ok(());
        }
        if line == "end" {
            return self
                .stack
                .pop()
                .map(|_| ())
                .ok_or_else(|| fail("`end` without an open subgraph"));
        }
        if line.starts_with("direction ") {
            return Ok(());
        }
        if let Some(caps) = SUBGRAPH.captures(line) {
            let id = caps[1].to_string();
            let label = caps
                .get(2)
                .map(|m| unescape_label(m.as_str()))
                .unwrap_or_else(|| id.clone());
            if self.ir.group(&id).is_some() {
                return Err(fail("duplicate subgraph id"));
            }
            self.ir.groups.push(Group::new(id.clone(), label));
            self.adopt(&id);
            self.stack.push(id);
            return Ok(());
        }
        if let Some(caps) = CLASS_DEF.captures(line) {
            self.classes
                .insert(caps[1].to_string(), style_pairs(&caps[2]));
            return Ok(());
        }
        if let Some(caps) = CLASS_USE.captures(line) {
            let pairs = self
                .classes
                .get(&caps[2])
                .cloned()
                .ok_or_else(|| fail("unknown class"))?;
            for id in caps[1].split(',') {
                let node = self.ir.node_mut(id).ok_or_else(|| fail("class on unknown node"))?;
                node.fill_color = color_of(&pairs, "fill");
                node.border_color = color_of(&pairs, "stroke");
                node.text_color = color_of(&pairs, "color");
            }
            return Ok(());
        }
        if let Some(caps) = STYLE.captures(line) {
            let pairs = style_pairs(&caps[2]);
            let id = &caps[1];
            if let Some(group) = self.ir.groups.iter_mut().find(|g| g.id == id) {
                group.fill_color = color_of(&pairs, "fill");
            } else if let Some(node) = self.ir.node_mut(id) {
                node.fill_color = color_of(&pairs, "fill");
                node.border_color = color_of(&pairs, "stroke");
                node.text_color = color_of(&pairs, "color");
            } else {
                return Err(fail("style on unknown id"));
            }
            return Ok(());
        }
        if let Some(caps) = LINK_STYLE.captures(line) {
            let index: usize = caps[1].parse().map_err(|_| fail("bad linkStyle index"))?;
            let pairs = style_pairs(&caps[2]);
            let edge = self
                .ir
                .edges
                .get_mut(index)
                .ok_or_else(|| fail("linkStyle index out of range"))?;
            edge.color = color_of(&pairs, "stroke");
            return Ok(());
        }
        if let Some(caps) = EDGE.captures(line) {
            let (source, source_form) =
                node_token(&caps[1]).ok_or_else(|| fail("bad edge source"))?;
            let (target, target_form) =
                node_token(&caps[4]).ok_or_else(|| fail("bad edge target"))?;
            let source = self.node(source, source_form);
            let target = self.node(target, target_form);
            let (style, start, end) = arrow_parts(&caps[2]);
            let id = self.ir.next_edge_id();
            let mut edge = Edge::new(id, source, target).with_style(style);
            edge.arrow_start = start;
            edge.arrow_end = end;
            if let Some(label) = caps.get(3) {
                edge.label = unescape_label(label.as_str());
            }
            self.ir.edges.push(edge);
            return Ok(());
        }
        if let Some((id, form)) = node_token(line) {
            self.node(id, form);
            return Ok(());
        }
        Err(fail("unrecognized statement"))
    }
}

/// Parses rendered flowchart text back into an IR
pub fn parse_rendered(text: &str) -> Result<DiagramIr> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (_, header) = lines.next().ok_or(RenderError::MissingHeader)?;
    let first_word = header.split_whitespace().next().unwrap_or_default();
    let caps = match HEADER.captures(header) {
        Some(caps) => caps,
        None if matches!(
            first_word,
            "sequenceDiagram" | "classDiagram" | "stateDiagram" | "stateDiagram-v2" | "erDiagram"
        ) =>
        {
            return Err(RenderError::Unsupported(first_word.to_string()))
        }
        None => return Err(RenderError::MissingHeader),
    };

    let mut ir = DiagramIr::new(DiagramType::Flowchart);
    ir.direction = caps
        .get(1)
        .and_then(|m| Direction::parse(m.as_str()))
        .unwrap_or(Direction::Tb);
    ir.metadata.source_format = Some(SourceFormat::Mermaid);

    let mut reader = Reader {
        ir,
        stack: Vec::new(),
        classes: BTreeMap::new(),
    };
    for (number, line) in lines {
        reader.line(number, line)?;
    }
    if let Some(open) = reader.stack.last() {
        return Err(RenderError::Parse {
            line: text.lines().count(),
            message: format!("subgraph {open} is never closed"),
        });
    }
    let mut ir = reader.ir;
    ir.sync_group_membership();
    Ok(ir)
}

type NodeKey = (String, Shape, Option<String>);
type EdgeKey = (String, String, String, LineStyle, bool, bool);

fn node_keys(ir: &DiagramIr) -> BTreeSet<NodeKey> {
    ir.nodes
        .iter()
        .map(|n| (n.label.clone(), n.shape, n.fill_color.clone()))
        .collect()
}

fn edge_keys(ir: &DiagramIr) -> BTreeSet<EdgeKey> {
    let label = |id: &str| ir.node(id).map(|n| n.label.clone()).unwrap_or_default();
    ir.edges
        .iter()
        .map(|e| {
            (
                label(&e.source),
                label(&e.target),
                e.label.clone(),
                e.line_style,
                e.arrow_start.is_present(),
                e.arrow_end.is_present(),
            )
        })
        .collect()
}

fn group_keys(ir: &DiagramIr) -> BTreeSet<(String, BTreeSet<String>)> {
    ir.groups
        .iter()
        .map(|g| {
            let members = g
                .children
                .iter()
                .filter_map(|c| {
                    ir.node(c)
                        .map(|n| n.label.clone())
                        .or_else(|| ir.group(c).map(|g| g.label.clone()))
                })
                .collect();
            (g.label.clone(), members)
        })
        .collect()
}

/// Differences between two IRs compared by labels, shapes, colors and line
/// styles rather than ids. Empty means the graphs match.
pub fn graph_differences(expected: &DiagramIr, actual: &DiagramIr) -> Vec<String> {
    let mut diffs = Vec::new();
    let (want, got) = (node_keys(expected), node_keys(actual));
    for missing in want.difference(&got) {
        diffs.push(format!("node missing: {missing:?}"));
    }
    for extra in got.difference(&want) {
        diffs.push(format!("unexpected node: {extra:?}"));
    }
    let (want, got) = (edge_keys(expected), edge_keys(actual));
    for missing in want.difference(&got) {
        diffs.push(format!("edge missing: {missing:?}"));
    }
    for extra in got.difference(&want) {
        diffs.push(format!("unexpected edge: {extra:?}"));
    }
    let (want, got) = (group_keys(expected), group_keys(actual));
    for missing in want.difference(&got) {
        diffs.push(format!("group mismatch: {missing:?}"));
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render;
    use pretty_assertions::assert_eq;

    const RENDERED: &str = r#"flowchart LR
%% Legend
%% #4472C4 = service
%% dashed = asynchronous or optional flow
    subgraph internal["Internal Zone"]
        orders["Orders #quot;API#quot;"]
        db[("Orders DB")]
    end
    billing["Billing"]
    orders -.->|"events"| billing
    orders --> db
    classDef c1 fill:#4472C4
    class orders,billing c1
    style internal fill:#EEEEEE
    linkStyle 1 stroke:#FF0000
"#;

    #[test]
    fn reads_back_every_statement_kind() {
        let ir = parse_rendered(RENDERED).unwrap();
        assert_eq!(ir.direction, Direction::Lr);
        assert_eq!(ir.nodes.len(), 3);
        assert_eq!(ir.node("orders").unwrap().label, "Orders \"API\"");
        assert_eq!(ir.node("db").unwrap().shape, Shape::Cylinder);
        assert_eq!(
            ir.node("billing").unwrap().fill_color.as_deref(),
            Some("#4472C4")
        );
        assert_eq!(ir.groups[0].children, vec!["orders", "db"]);
        assert_eq!(ir.groups[0].fill_color.as_deref(), Some("#EEEEEE"));
        assert_eq!(ir.edges[0].line_style, LineStyle::Dashed);
        assert_eq!(ir.edges[0].label, "events");
        assert_eq!(ir.edges[1].color.as_deref(), Some("#FF0000"));
        assert_eq!(
            ir.metadata.legend.colors.get("#4472C4").map(String::as_str),
            Some("service")
        );
    }

    #[test]
    fn render_then_parse_is_stable() {
        let ir = parse_rendered(RENDERED).unwrap();
        let again = parse_rendered(&render(&ir)).unwrap();
        assert!(graph_differences(&ir, &again).is_empty());
        assert_eq!(render(&ir), render(&again));
    }

    #[test]
    fn rejects_unknown_statements_with_line_numbers() {
        let err = parse_rendered("flowchart TB\n    a --> b\n    click a call x()\n").unwrap_err();
        match err {
            RenderError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            parse_rendered("a --> b"),
            Err(RenderError::MissingHeader)
        ));
        assert!(matches!(
            parse_rendered("sequenceDiagram\n a->>b: hi"),
            Err(RenderError::Unsupported(_))
        ));
        assert!(matches!(
            parse_rendered("flowchart TB\n subgraph g\n a\n"),
            Err(RenderError::Parse { .. })
        ));
    }

    #[test]
    fn implicit_nodes_take_their_id_as_label() {
        let ir = parse_rendered("graph TD\n  A[Start] ==> B\n  B <-.- C{Choice}\n").unwrap();
        assert_eq!(ir.nodes.len(), 3);
        assert_eq!(ir.node("A").unwrap().label, "Start");
        assert_eq!(ir.node("B").unwrap().label, "B");
        assert_eq!(ir.node("C").unwrap().shape, Shape::Diamond);
        assert_eq!(ir.edges[0].line_style, LineStyle::Thick);
        assert_eq!(ir.edges[1].arrow_start, Arrow::Arrow);
        assert_eq!(ir.edges[1].arrow_end, Arrow::None);
    }

    #[test]
    fn differences_name_what_changed() {
        let a = parse_rendered("flowchart TB\n a[\"A\"] --> b[\"B\"]\n").unwrap();
        let b = parse_rendered("flowchart TB\n x[\"A\"] -.-> y[\"B\"]\n").unwrap();
        let diffs = graph_differences(&a, &b);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].starts_with("edge missing"));
    }
}
