//! IR to Mermaid text. Output depends only on the IR, so equal IRs render
//! byte-identically.

use crate::ids::IdTable;
use canon_ir::{
    Arrow, DiagramIr, DiagramType, Edge, Group, LineStyle, Node, NodeRole, Shape,
};
use log::warn;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

const INDENT: &str = "    ";

/// Relation labels that only restate the class arrow decoration
const CLASS_RELATION_KINDS: &[&str] = &[
    "extends",
    "implements",
    "composition",
    "aggregation",
    "dependency",
];

pub(crate) fn escape_label(label: &str) -> String {
    label.replace('"', "#quot;").replace(['\n', '\r'], " ")
}

pub(crate) fn unescape_label(label: &str) -> String {
    label.replace("#quot;", "\"")
}

/// Bracketed node form for a shape
pub fn node_shape(id: &str, label: &str, shape: Shape) -> String {
    let label = escape_label(label);
    match shape {
        Shape::Rectangle => format!("{id}[\"{label}\"]"),
        Shape::Cylinder => format!("{id}[(\"{label}\")]"),
        Shape::Diamond => format!("{id}{{\"{label}\"}}"),
        Shape::Circle => format!("{id}((\"{label}\"))"),
        Shape::Hexagon => format!("{id}{{{{\"{label}\"}}}}"),
    }
}

/// Line style x arrow heads lookup
pub fn arrow_token(style: LineStyle, start: Arrow, end: Arrow) -> &'static str {
    match (style, start.is_present(), end.is_present()) {
        (LineStyle::Solid, false, true) => "-->",
        (LineStyle::Solid, false, false) => "---",
        (LineStyle::Solid, true, true) => "<-->",
        (LineStyle::Solid, true, false) => "<--",
        (LineStyle::Dashed, false, true) => "-.->",
        (LineStyle::Dashed, false, false) => "-.-",
        (LineStyle::Dashed, true, true) => "<-.->",
        (LineStyle::Dashed, true, false) => "<-.-",
        (LineStyle::Thick, false, true) => "==>",
        (LineStyle::Thick, false, false) => "===",
        (LineStyle::Thick, true, true) => "<==>",
        (LineStyle::Thick, true, false) => "<==",
    }
}

pub fn render(ir: &DiagramIr) -> String {
    match ir.diagram_type {
        DiagramType::Flowchart => render_flowchart(ir),
        DiagramType::Sequence => render_sequence(ir),
        DiagramType::Class => render_class(ir),
        DiagramType::State => render_state(ir),
        DiagramType::Er => render_er(ir),
    }
}

fn legend_comments(ir: &DiagramIr, out: &mut String) {
    let legend = &ir.metadata.legend;
    if legend.is_empty() {
        return;
    }
    out.push_str("%% Legend\n");
    for (color, meaning) in &legend.colors {
        let _ = writeln!(out, "%% {color} = {meaning}");
    }
    for (style, meaning) in &legend.line_styles {
        let _ = writeln!(out, "%% {style} = {meaning}");
    }
}

/// `fill:..,stroke:..,color:..` for whatever colors are set
fn color_spec(fill: Option<&str>, stroke: Option<&str>, text: Option<&str>) -> Option<String> {
    let parts: Vec<String> = [("fill", fill), ("stroke", stroke), ("color", text)]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{key}:{v}")))
        .collect();
    (!parts.is_empty()).then(|| parts.join(","))
}

struct Flowchart<'a> {
    ir: &'a DiagramIr,
    ids: IdTable,
    emitted: HashSet<&'a str>,
    out: String,
}

impl<'a> Flowchart<'a> {
    fn members(&self, group: &'a Group) -> Vec<&'a str> {
        let mut members: Vec<&str> = group.children.iter().map(String::as_str).collect();
        for node in &self.ir.nodes {
            if node.parent_group.as_deref() == Some(group.id.as_str())
                && !members.contains(&node.id.as_str())
            {
                members.push(node.id.as_str());
            }
        }
        members
    }

    fn node_line(&mut self, node: &'a Node, depth: usize) {
        if !self.emitted.insert(node.id.as_str()) {
            return;
        }
        let id = self.ids.assign(&node.id);
        let _ = writeln!(
            self.out,
            "{}{}",
            INDENT.repeat(depth),
            node_shape(&id, &node.label, node.shape)
        );
    }

    fn group_block(&mut self, group: &'a Group, depth: usize) {
        if !self.emitted.insert(group.id.as_str()) {
            warn!("Group {} is nested more than once; rendering it once", group.id);
            return;
        }
        let id = self.ids.assign(&group.id);
        let pad = INDENT.repeat(depth);
        let _ = writeln!(self.out, "{pad}subgraph {id}[\"{}\"]", escape_label(&group.label));
        let ir = self.ir;
        for member in self.members(group) {
            if let Some(child) = ir.group(member) {
                self.group_block(child, depth + 1);
            } else if let Some(node) = ir.node(member) {
                self.node_line(node, depth + 1);
            }
        }
        let _ = writeln!(self.out, "{pad}end");
    }

    fn endpoint(&self, ir_id: &str) -> Option<String> {
        self.ids.get(ir_id).map(str::to_string)
    }

    fn edge_line(&mut self, edge: &Edge) -> bool {
        let (Some(source), Some(target)) = (self.endpoint(&edge.source), self.endpoint(&edge.target))
        else {
            warn!(
                "Skipping edge {} with unknown endpoint ({} -> {})",
                edge.id, edge.source, edge.target
            );
            return false;
        };
        let arrow = arrow_token(edge.line_style, edge.arrow_start, edge.arrow_end);
        if edge.label.is_empty() {
            let _ = writeln!(self.out, "{INDENT}{source} {arrow} {target}");
        } else {
            let _ = writeln!(
                self.out,
                "{INDENT}{source} {arrow}|\"{}\"| {target}",
                escape_label(&edge.label)
            );
        }
        true
    }
}

fn render_flowchart(ir: &DiagramIr) -> String {
    let mut chart = Flowchart {
        ir,
        ids: IdTable::new(),
        emitted: HashSet::new(),
        out: String::new(),
    };
    let _ = writeln!(chart.out, "flowchart {}", ir.direction.as_str());
    legend_comments(ir, &mut chart.out);
    if ir.nodes.is_empty() && ir.groups.is_empty() {
        chart.out.push_str("%% empty diagram\n");
        return chart.out;
    }

    for group in ir.root_groups() {
        chart.group_block(group, 1);
    }
    // groups caught in a containment cycle have no root; render them flat
    for group in &ir.groups {
        if !chart.emitted.contains(group.id.as_str()) {
            chart.group_block(group, 1);
        }
    }
    for node in &ir.nodes {
        chart.node_line(node, 1);
    }

    let mut link_styles = Vec::new();
    let mut index = 0usize;
    for edge in &ir.edges {
        if chart.edge_line(edge) {
            if let Some(color) = &edge.color {
                link_styles.push(format!("{INDENT}linkStyle {index} stroke:{color}"));
            }
            index += 1;
        }
    }

    // one classDef per distinct color combination, in first-seen order
    let mut classes: Vec<(String, Vec<String>)> = Vec::new();
    for node in &ir.nodes {
        let Some(spec) = color_spec(
            node.fill_color.as_deref(),
            node.border_color.as_deref(),
            node.text_color.as_deref(),
        ) else {
            continue;
        };
        let id = chart.ids.assign(&node.id);
        match classes.iter_mut().find(|(s, _)| *s == spec) {
            Some((_, members)) => members.push(id),
            None => classes.push((spec, vec![id])),
        }
    }
    for (n, (spec, members)) in classes.iter().enumerate() {
        let _ = writeln!(chart.out, "{INDENT}classDef c{} {spec}", n + 1);
        let _ = writeln!(chart.out, "{INDENT}class {} c{}", members.join(","), n + 1);
    }
    for group in &ir.groups {
        if let Some(fill) = &group.fill_color {
            let id = chart.ids.assign(&group.id);
            let _ = writeln!(chart.out, "{INDENT}style {id} fill:{fill}");
        }
    }
    for line in link_styles {
        chart.out.push_str(&line);
        chart.out.push('\n');
    }
    chart.out
}

fn render_sequence(ir: &DiagramIr) -> String {
    let mut ids = IdTable::new();
    let mut out = String::from("sequenceDiagram\n");
    legend_comments(ir, &mut out);
    for node in &ir.nodes {
        let id = ids.assign(&node.id);
        let keyword = if node.role == Some(NodeRole::Actor) {
            "actor"
        } else {
            "participant"
        };
        let _ = writeln!(out, "{INDENT}{keyword} {id} as {}", node.label);
    }
    for edge in &ir.edges {
        let (Some(source), Some(target)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            warn!("Skipping message {} with unknown participant", edge.id);
            continue;
        };
        let line = if edge.line_style == LineStyle::Dashed { "--" } else { "-" };
        let head = if edge.arrow_end.is_present() { ">>" } else { ">" };
        let _ = writeln!(out, "{INDENT}{source}{line}{head}{target}: {}", edge.label);
    }
    out
}

fn class_arrow(edge: &Edge) -> String {
    let kind = edge.label.as_str();
    let head = |present: bool, left: bool| -> &'static str {
        if !present {
            return "";
        }
        match (kind, left) {
            ("extends" | "implements", true) => "<|",
            ("extends" | "implements", false) => "|>",
            ("composition", _) => "*",
            ("aggregation", _) => "o",
            (_, true) => "<",
            (_, false) => ">",
        }
    };
    let line = if edge.line_style == LineStyle::Dashed { ".." } else { "--" };
    format!(
        "{}{line}{}",
        head(edge.arrow_start.is_present(), true),
        head(edge.arrow_end.is_present(), false)
    )
}

fn render_class(ir: &DiagramIr) -> String {
    let mut ids = IdTable::new();
    let mut out = String::from("classDiagram\n");
    legend_comments(ir, &mut out);
    for node in &ir.nodes {
        let id = ids.assign(&node.id);
        let title = if node.label == id {
            id.clone()
        } else {
            format!("{id}[\"{}\"]", escape_label(&node.label))
        };
        match ir.metadata.extra.get(&format!("stereotype.{}", node.id)) {
            Some(stereotype) => {
                let _ = writeln!(out, "{INDENT}class {title} {{");
                let _ = writeln!(out, "{INDENT}{INDENT}<<{stereotype}>>");
                let _ = writeln!(out, "{INDENT}}}");
            }
            None => {
                let _ = writeln!(out, "{INDENT}class {title}");
            }
        }
    }
    for edge in &ir.edges {
        let (Some(source), Some(target)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            warn!("Skipping relation {} with unknown class", edge.id);
            continue;
        };
        let arrow = class_arrow(edge);
        if edge.label.is_empty() || CLASS_RELATION_KINDS.contains(&edge.label.as_str()) {
            let _ = writeln!(out, "{INDENT}{source} {arrow} {target}");
        } else {
            let _ = writeln!(out, "{INDENT}{source} {arrow} {target} : {}", edge.label);
        }
    }
    out
}

fn render_state(ir: &DiagramIr) -> String {
    let mut ids = IdTable::new();
    let mut out = String::from("stateDiagram-v2\n");
    legend_comments(ir, &mut out);
    let pseudo: BTreeSet<&str> = ["__start__", "__end__"].into_iter().collect();
    let state_id = |ids: &mut IdTable, ir_id: &str| {
        if pseudo.contains(ir_id) {
            "[*]".to_string()
        } else {
            ids.assign(ir_id)
        }
    };

    for node in &ir.nodes {
        if pseudo.contains(node.id.as_str()) {
            continue;
        }
        let id = state_id(&mut ids, &node.id);
        if node.label != id {
            let _ = writeln!(out, "{INDENT}{id} : {}", node.label);
        }
    }
    for group in &ir.groups {
        let id = ids.assign(&group.id);
        let _ = writeln!(out, "{INDENT}state \"{}\" as {id} {{", escape_label(&group.label));
        for child in group.children.iter().filter(|c| !pseudo.contains(c.as_str())) {
            let child = state_id(&mut ids, child);
            let _ = writeln!(out, "{INDENT}{INDENT}{child}");
        }
        let _ = writeln!(out, "{INDENT}}}");
    }
    for edge in &ir.edges {
        let source = state_id(&mut ids, &edge.source);
        let target = state_id(&mut ids, &edge.target);
        if edge.label.is_empty() {
            let _ = writeln!(out, "{INDENT}{source} --> {target}");
        } else {
            let _ = writeln!(out, "{INDENT}{source} --> {target} : {}", edge.label);
        }
    }
    if ir.nodes.is_empty() && ir.groups.is_empty() {
        out.push_str("%% empty diagram\n");
    }
    out
}

fn render_er(ir: &DiagramIr) -> String {
    let mut ids = IdTable::new();
    let mut out = String::from("erDiagram\n");
    legend_comments(ir, &mut out);
    for node in &ir.nodes {
        ids.assign(&node.id);
    }
    for edge in &ir.edges {
        let (Some(source), Some(target)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            warn!("Skipping relationship {} with unknown entity", edge.id);
            continue;
        };
        let cardinality = if edge.line_style == LineStyle::Dashed {
            "||..o{"
        } else {
            "||--o{"
        };
        let _ = writeln!(
            out,
            "{INDENT}{source} {cardinality} {target} : \"{}\"",
            escape_label(&edge.label)
        );
    }
    out
}

/// Wraps rendered text in a fenced `mermaid` block for markdown documents
pub fn fenced(rendered: &str) -> String {
    format!("```mermaid\n{}\n```\n", rendered.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_ir::{DiagramIr, Direction, Edge, Group, Node};
    use pretty_assertions::assert_eq;

    fn sample() -> DiagramIr {
        let mut ir = DiagramIr::default();
        ir.direction = Direction::Lr;
        ir.nodes = vec![
            Node::new("orders", "Orders \"API\"").with_fill("#4472C4"),
            Node::new("billing", "Billing").with_fill("#4472C4"),
            Node::new("db", "Orders DB").with_shape(Shape::Cylinder),
            Node::new("end", "Done").with_shape(Shape::Circle),
        ];
        let mut zone = Group::new("internal", "Internal Zone");
        zone.children = vec!["orders".into(), "db".into()];
        zone.fill_color = Some("#EEEEEE".into());
        ir.groups = vec![zone];
        ir.sync_group_membership();
        let mut colored = Edge::new("e3", "billing", "end");
        colored.color = Some("#FF0000".into());
        ir.edges = vec![
            Edge::new("e1", "orders", "billing")
                .with_label("events")
                .with_style(LineStyle::Dashed),
            Edge::new("e2", "orders", "db"),
            colored,
        ];
        ir.metadata
            .legend
            .colors
            .insert("#4472C4".into(), "service".into());
        ir.metadata
            .legend
            .line_styles
            .insert("dashed".into(), "asynchronous or optional flow".into());
        ir
    }

    #[test]
    fn flowchart_layout() {
        let expected = "\
flowchart LR
%% Legend
%% #4472C4 = service
%% dashed = asynchronous or optional flow
    subgraph internal[\"Internal Zone\"]
        orders[\"Orders #quot;API#quot;\"]
        db[(\"Orders DB\")]
    end
    billing[\"Billing\"]
    end_((\"Done\"))
    orders -.->|\"events\"| billing
    orders --> db
    billing --> end_
    classDef c1 fill:#4472C4
    class orders,billing c1
    style internal fill:#EEEEEE
    linkStyle 2 stroke:#FF0000
";
        assert_eq!(render(&sample()), expected);
    }

    #[test]
    fn arrow_table_covers_every_combination() {
        let tokens: Vec<&str> = [LineStyle::Solid, LineStyle::Dashed, LineStyle::Thick]
            .into_iter()
            .flat_map(|style| {
                [
                    (Arrow::None, Arrow::Arrow),
                    (Arrow::None, Arrow::None),
                    (Arrow::Arrow, Arrow::Arrow),
                    (Arrow::Arrow, Arrow::None),
                ]
                .into_iter()
                .map(move |(start, end)| arrow_token(style, start, end))
            })
            .collect();
        assert_eq!(
            tokens,
            vec![
                "-->", "---", "<-->", "<--", "-.->", "-.-", "<-.->", "<-.-", "==>", "===", "<==>",
                "<=="
            ]
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render(&sample()), render(&sample()));
    }

    #[test]
    fn sequence_messages_use_async_arrows_for_dashed() {
        let mut ir = DiagramIr::new(DiagramType::Sequence);
        let mut user = Node::new("user", "User");
        user.role = Some(NodeRole::Actor);
        ir.nodes = vec![user, Node::new("api", "API")];
        ir.edges = vec![
            Edge::new("e1", "user", "api").with_label("request"),
            Edge::new("e2", "api", "user")
                .with_label("response")
                .with_style(LineStyle::Dashed),
        ];
        assert_eq!(
            render(&ir),
            "sequenceDiagram\n    actor user as User\n    participant api as API\n    user->>api: request\n    api-->>user: response\n"
        );
    }

    #[test]
    fn state_pseudo_states_render_as_stars() {
        let mut ir = DiagramIr::new(DiagramType::State);
        ir.nodes = vec![
            Node::new("__start__", "start").with_shape(Shape::Circle),
            Node::new("idle", "Idle"),
        ];
        ir.edges = vec![Edge::new("e1", "__start__", "idle")];
        assert_eq!(
            render(&ir),
            "stateDiagram-v2\n    idle : Idle\n    [*] --> idle\n"
        );
    }

    #[test]
    fn class_relations_keep_their_decoration() {
        let mut ir = DiagramIr::new(DiagramType::Class);
        ir.nodes = vec![Node::new("Animal", "Animal"), Node::new("Dog", "Dog")];
        let mut edge = Edge::new("e1", "Animal", "Dog").with_label("extends");
        edge.arrow_start = Arrow::Arrow;
        edge.arrow_end = Arrow::None;
        ir.edges = vec![edge];
        assert_eq!(
            render(&ir),
            "classDiagram\n    class Animal\n    class Dog\n    Animal <|-- Dog\n"
        );
    }

    #[test]
    fn empty_flowchart_still_has_a_header() {
        assert_eq!(
            render(&DiagramIr::default()),
            "flowchart TB\n%% empty diagram\n"
        );
    }
}
