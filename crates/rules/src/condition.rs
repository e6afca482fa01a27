//! Structural conditions over diagram IRs.
//!
//! ```text
//! condition := attr                      some element matches
//!            | ALL attr                  every element carrying the field matches
//!            | NOT attr                  no element matches
//!            | edge(sel, sel) EXISTS
//!            | NOT edge(sel, sel)
//!            | edge(sel, sel) -> attr    the second endpoint of every such edge matches
//! attr      := (node|edge|group).field (== value | IN (value, ...))
//! sel       := * | <role> | in(<group>) | out(<group>) | node(<id>)
//! ```
//!
//! Edge patterns match either orientation. Group membership is transitive.

use canon_ir::{DiagramIr, Edge, Group, Node, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid condition `{input}`: {message}")]
pub struct ConditionError {
    pub input: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Node,
    Edge,
    Group,
}

impl Subject {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Group => "group",
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Edge => "edges",
            Self::Group => "groups",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Label,
    Role,
    Shape,
    FillColor,
    Protocol,
    LineStyle,
    ZoneType,
}

impl Field {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Label => "label",
            Self::Role => "role",
            Self::Shape => "shape",
            Self::FillColor => "fill_color",
            Self::Protocol => "protocol",
            Self::LineStyle => "line_style",
            Self::ZoneType => "zone_type",
        }
    }

    fn parse(subject: Subject, raw: &str) -> Option<Self> {
        let field = match raw {
            "id" => Self::Id,
            "label" => Self::Label,
            "role" => Self::Role,
            "shape" => Self::Shape,
            "fill_color" | "fill" => Self::FillColor,
            "protocol" => Self::Protocol,
            "line_style" | "style" => Self::LineStyle,
            "zone_type" | "zone" => Self::ZoneType,
            _ => return None,
        };
        let valid = match subject {
            Subject::Node => matches!(
                field,
                Self::Id | Self::Label | Self::Role | Self::Shape | Self::FillColor
            ),
            Subject::Edge => matches!(
                field,
                Self::Id | Self::Label | Self::Protocol | Self::LineStyle
            ),
            Subject::Group => matches!(
                field,
                Self::Id | Self::Label | Self::ZoneType | Self::FillColor
            ),
        };
        valid.then_some(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub subject: Subject,
    pub field: Field,
    pub values: Vec<String>,
    /// Written as `IN (...)` rather than `==`
    pub list: bool,
}

impl Predicate {
    fn accepts(&self, value: &str) -> bool {
        let value = loose(value);
        self.values.iter().any(|v| loose(v) == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Any,
    Role(NodeRole),
    Inside(String),
    Outside(String),
    Node(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Any(Predicate),
    All(Predicate),
    None(Predicate),
    EdgeExists(Selector, Selector),
    NoEdge(Selector, Selector),
    Route {
        from: Selector,
        to: Selector,
        check: Predicate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    pub evidence: String,
}

impl Outcome {
    fn new(verdict: Verdict, evidence: impl Into<String>) -> Self {
        Self {
            verdict,
            evidence: evidence.into(),
        }
    }
}

fn loose(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || "_.*-/+:#".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "'"))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subject.as_str(), self.field.as_str())?;
        if self.list {
            let values: Vec<String> = self.values.iter().map(|v| quote(v)).collect();
            write!(f, " IN ({})", values.join(", "))
        } else {
            let value = self.values.first().map(String::as_str).unwrap_or_default();
            write!(f, " == {}", quote(value))
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Role(role) => f.write_str(role.as_str()),
            Self::Inside(group) => write!(f, "in({})", quote(group)),
            Self::Outside(group) => write!(f, "out({})", quote(group)),
            Self::Node(id) => write!(f, "node({})", quote(id)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any(p) => write!(f, "{p}"),
            Self::All(p) => write!(f, "ALL {p}"),
            Self::None(p) => write!(f, "NOT {p}"),
            Self::EdgeExists(a, b) => write!(f, "edge({a}, {b}) EXISTS"),
            Self::NoEdge(a, b) => write!(f, "NOT edge({a}, {b})"),
            Self::Route { from, to, check } => write!(f, "edge({from}, {to}) -> {check}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    Eq,
    Arrow,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| "unterminated string".to_string())?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            _ if c.is_alphanumeric() || "_.*-/+:#".contains(c) => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '-' && chars.get(i + 1) == Some(&'>') {
                        break;
                    }
                    if !(ch.is_alphanumeric() || "_.*-/+:#".contains(ch)) {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(format!("unexpected character `{c}`")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(word))
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if *token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn at_edge_pattern(&self) -> bool {
        self.keyword("edge") && self.peek_at(1) == Some(&Token::LParen)
    }

    fn condition(&mut self) -> Result<Condition, String> {
        let condition = if self.keyword("NOT") {
            self.pos += 1;
            if self.at_edge_pattern() {
                let (a, b) = self.edge_pattern()?;
                if self.keyword("EXISTS") {
                    self.pos += 1;
                }
                Condition::NoEdge(a, b)
            } else {
                Condition::None(self.predicate()?)
            }
        } else if self.keyword("ALL") {
            self.pos += 1;
            Condition::All(self.predicate()?)
        } else if self.at_edge_pattern() {
            let (from, to) = self.edge_pattern()?;
            match self.next() {
                Some(Token::Ident(w)) if w.eq_ignore_ascii_case("EXISTS") => {
                    Condition::EdgeExists(from, to)
                }
                Some(Token::Arrow) => {
                    let check = self.predicate()?;
                    if check.subject != Subject::Node {
                        return Err("route checks must test a node field".to_string());
                    }
                    Condition::Route { from, to, check }
                }
                other => return Err(format!("expected EXISTS or ->, found {other:?}")),
            }
        } else {
            Condition::Any(self.predicate()?)
        };
        match self.peek() {
            None => Ok(condition),
            Some(token) => Err(format!("trailing input at {token:?}")),
        }
    }

    fn edge_pattern(&mut self) -> Result<(Selector, Selector), String> {
        self.pos += 1;
        self.expect(Token::LParen)?;
        let from = self.selector()?;
        self.expect(Token::Comma)?;
        let to = self.selector()?;
        self.expect(Token::RParen)?;
        Ok((from, to))
    }

    fn selector(&mut self) -> Result<Selector, String> {
        let Some(Token::Ident(word)) = self.next() else {
            return Err("expected a node selector".to_string());
        };
        if word == "*" {
            return Ok(Selector::Any);
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let arg = self.value()?;
            self.expect(Token::RParen)?;
            return match word.to_ascii_lowercase().as_str() {
                "in" => Ok(Selector::Inside(arg)),
                "out" => Ok(Selector::Outside(arg)),
                "node" => Ok(Selector::Node(arg)),
                _ => Err(format!("unknown selector `{word}`")),
            };
        }
        NodeRole::parse(&word)
            .map(Selector::Role)
            .ok_or_else(|| format!("unknown node role `{word}`"))
    }

    fn value(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Ident(v)) | Some(Token::Str(v)) => Ok(v),
            other => Err(format!("expected a value, found {other:?}")),
        }
    }

    fn predicate(&mut self) -> Result<Predicate, String> {
        let Some(Token::Ident(path)) = self.next() else {
            return Err("expected `node.`, `edge.` or `group.` field".to_string());
        };
        let (subject, field) = path
            .split_once('.')
            .ok_or_else(|| format!("expected subject.field, found `{path}`"))?;
        let subject = match subject.to_ascii_lowercase().as_str() {
            "node" => Subject::Node,
            "edge" => Subject::Edge,
            "group" => Subject::Group,
            other => return Err(format!("unknown subject `{other}`")),
        };
        let field = Field::parse(subject, &field.to_ascii_lowercase())
            .ok_or_else(|| format!("`{path}` is not a known field"))?;

        if self.keyword("IN") {
            self.pos += 1;
            self.expect(Token::LParen)?;
            let mut values = vec![self.value()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                values.push(self.value()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Predicate {
                subject,
                field,
                values,
                list: true,
            });
        }
        self.expect(Token::Eq)?;
        Ok(Predicate {
            subject,
            field,
            values: vec![self.value()?],
            list: false,
        })
    }
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let fail = |message: String| ConditionError {
            input: input.to_string(),
            message,
        };
        let tokens = tokenize(input).map_err(fail)?;
        if tokens.is_empty() {
            return Err(fail("empty condition".to_string()));
        }
        Parser { tokens, pos: 0 }.condition().map_err(fail)
    }

    /// Evaluates against the union of the given IRs (expected to be enriched).
    pub fn evaluate(&self, irs: &[DiagramIr]) -> Outcome {
        match self {
            Self::Any(p) => eval_any(p, irs),
            Self::All(p) => eval_all(p, irs),
            Self::None(p) => eval_none(p, irs),
            Self::EdgeExists(a, b) => eval_edge(a, b, irs, true),
            Self::NoEdge(a, b) => eval_edge(a, b, irs, false),
            Self::Route { from, to, check } => eval_route(from, to, check, irs),
        }
    }
}

struct Carrier {
    describe: String,
    value: String,
}

fn node_value(node: &Node, field: Field) -> Option<String> {
    match field {
        Field::Id => Some(node.id.clone()),
        Field::Label => Some(node.label.clone()).filter(|l| !l.trim().is_empty()),
        Field::Role => node.role.map(|r| r.as_str().to_string()),
        Field::Shape => Some(node.shape.as_str().to_string()),
        Field::FillColor => node.fill_color.clone(),
        _ => None,
    }
}

fn edge_value(edge: &Edge, field: Field) -> Option<String> {
    match field {
        Field::Id => Some(edge.id.clone()),
        Field::Label => Some(edge.label.clone()).filter(|l| !l.trim().is_empty()),
        Field::Protocol => edge.protocol.clone(),
        Field::LineStyle => Some(edge.line_style.as_str().to_string()),
        _ => None,
    }
}

fn group_value(group: &Group, field: Field) -> Option<String> {
    match field {
        Field::Id => Some(group.id.clone()),
        Field::Label => Some(group.label.clone()).filter(|l| !l.trim().is_empty()),
        Field::ZoneType => group.zone_type.map(|z| z.as_str().to_string()),
        Field::FillColor => group.fill_color.clone(),
        _ => None,
    }
}

fn describe_node(node: &Node) -> String {
    format!("node {} ({})", node.id, node.label)
}

fn describe_edge(ir: &DiagramIr, edge: &Edge) -> String {
    let label = |id: &str| ir.node(id).map_or(id.to_string(), |n| n.label.clone());
    format!("edge {} {} -> {}", edge.id, label(&edge.source), label(&edge.target))
}

fn carriers(subject: Subject, field: Field, irs: &[DiagramIr]) -> Vec<Carrier> {
    let mut out = Vec::new();
    for ir in irs {
        match subject {
            Subject::Node => out.extend(ir.nodes.iter().filter_map(|n| {
                node_value(n, field).map(|value| Carrier {
                    describe: describe_node(n),
                    value,
                })
            })),
            Subject::Edge => out.extend(ir.edges.iter().filter_map(|e| {
                edge_value(e, field).map(|value| Carrier {
                    describe: describe_edge(ir, e),
                    value,
                })
            })),
            Subject::Group => out.extend(ir.groups.iter().filter_map(|g| {
                group_value(g, field).map(|value| Carrier {
                    describe: format!("group {} ({})", g.id, g.label),
                    value,
                })
            })),
        }
    }
    out
}

fn no_carriers(p: &Predicate) -> Outcome {
    Outcome::new(
        Verdict::NotApplicable,
        format!("no {} carry {}", p.subject.plural(), p.field.as_str()),
    )
}

fn seen_values(carriers: &[Carrier]) -> String {
    let seen: BTreeSet<&str> = carriers.iter().map(|c| c.value.as_str()).collect();
    seen.into_iter().take(5).collect::<Vec<_>>().join(", ")
}

fn eval_any(p: &Predicate, irs: &[DiagramIr]) -> Outcome {
    let carriers = carriers(p.subject, p.field, irs);
    if carriers.is_empty() {
        return no_carriers(p);
    }
    match carriers.iter().find(|c| p.accepts(&c.value)) {
        Some(hit) => Outcome::new(
            Verdict::Pass,
            format!("{} has {} {}", hit.describe, p.field.as_str(), hit.value),
        ),
        None => Outcome::new(
            Verdict::Fail,
            format!(
                "no {} match `{p}` (seen: {})",
                p.subject.plural(),
                seen_values(&carriers)
            ),
        ),
    }
}

fn eval_all(p: &Predicate, irs: &[DiagramIr]) -> Outcome {
    let carriers = carriers(p.subject, p.field, irs);
    if carriers.is_empty() {
        return no_carriers(p);
    }
    match carriers.iter().find(|c| !p.accepts(&c.value)) {
        Some(miss) => Outcome::new(
            Verdict::Fail,
            format!("{} has {} {}", miss.describe, p.field.as_str(), miss.value),
        ),
        None => Outcome::new(
            Verdict::Pass,
            format!("all {} {} match", carriers.len(), p.subject.plural()),
        ),
    }
}

fn eval_none(p: &Predicate, irs: &[DiagramIr]) -> Outcome {
    let carriers = carriers(p.subject, p.field, irs);
    if carriers.is_empty() {
        return no_carriers(p);
    }
    match carriers.iter().find(|c| p.accepts(&c.value)) {
        Some(hit) => Outcome::new(
            Verdict::Fail,
            format!("{} has {} {}", hit.describe, p.field.as_str(), hit.value),
        ),
        None => Outcome::new(
            Verdict::Pass,
            format!("none of {} {} match", carriers.len(), p.subject.plural()),
        ),
    }
}

/// Groups that contain the node, directly or through nesting.
fn enclosing_groups<'a>(ir: &'a DiagramIr, node: &'a Node) -> BTreeSet<&'a str> {
    let mut found = BTreeSet::new();
    let mut frontier: Vec<&str> = ir
        .groups
        .iter()
        .filter(|g| g.children.iter().any(|c| *c == node.id))
        .map(|g| g.id.as_str())
        .collect();
    frontier.extend(node.parent_group.as_deref());
    while let Some(gid) = frontier.pop() {
        if !found.insert(gid) {
            continue;
        }
        frontier.extend(
            ir.groups
                .iter()
                .filter(|g| g.children.iter().any(|c| c == gid))
                .map(|g| g.id.as_str()),
        );
    }
    found
}

fn selects(selector: &Selector, ir: &DiagramIr, node: &Node) -> bool {
    match selector {
        Selector::Any => true,
        Selector::Role(role) => node.role == Some(*role),
        Selector::Inside(gid) => enclosing_groups(ir, node).contains(gid.as_str()),
        Selector::Outside(gid) => !enclosing_groups(ir, node).contains(gid.as_str()),
        Selector::Node(id) => node.id == *id,
    }
}

/// A selector that names something no IR contains makes the condition moot.
fn selector_applies(selector: &Selector, irs: &[DiagramIr]) -> bool {
    match selector {
        Selector::Inside(gid) | Selector::Outside(gid) => {
            irs.iter().any(|ir| ir.group(gid).is_some())
        }
        _ => irs
            .iter()
            .any(|ir| ir.nodes.iter().any(|n| selects(selector, ir, n))),
    }
}

/// Yields `(ir, edge, endpoint matched by the second selector)`.
fn matching_edges<'a>(
    from: &'a Selector,
    to: &'a Selector,
    irs: &'a [DiagramIr],
) -> impl Iterator<Item = (&'a DiagramIr, &'a Edge, &'a Node)> + 'a {
    irs.iter().flat_map(move |ir| {
        ir.edges.iter().filter_map(move |edge| {
            let src = ir.node(&edge.source)?;
            let tgt = ir.node(&edge.target)?;
            if selects(from, ir, src) && selects(to, ir, tgt) {
                Some((ir, edge, tgt))
            } else if selects(from, ir, tgt) && selects(to, ir, src) {
                Some((ir, edge, src))
            } else {
                None
            }
        })
    })
}

/// Edges matching `edge(from, to)`, each with the endpoint picked by `to`.
pub fn edge_matches<'a>(
    from: &'a Selector,
    to: &'a Selector,
    irs: &'a [DiagramIr],
) -> Vec<(&'a Edge, &'a Node)> {
    matching_edges(from, to, irs)
        .map(|(_, edge, node)| (edge, node))
        .collect()
}

fn eval_edge(from: &Selector, to: &Selector, irs: &[DiagramIr], want: bool) -> Outcome {
    if !selector_applies(from, irs) || !selector_applies(to, irs) {
        return Outcome::new(
            Verdict::NotApplicable,
            format!("no nodes match edge({from}, {to})"),
        );
    }
    let found = matching_edges(from, to, irs).next();
    match (found, want) {
        (Some((ir, edge, _)), true) => Outcome::new(Verdict::Pass, describe_edge(ir, edge)),
        (Some((ir, edge, _)), false) => Outcome::new(Verdict::Fail, describe_edge(ir, edge)),
        (None, true) => Outcome::new(Verdict::Fail, format!("no edge({from}, {to})")),
        (None, false) => Outcome::new(Verdict::Pass, format!("no edge({from}, {to})")),
    }
}

fn eval_route(from: &Selector, to: &Selector, check: &Predicate, irs: &[DiagramIr]) -> Outcome {
    let mut matched = 0usize;
    for (ir, edge, endpoint) in matching_edges(from, to, irs) {
        matched += 1;
        let ok = node_value(endpoint, check.field).is_some_and(|v| check.accepts(&v));
        if !ok {
            return Outcome::new(
                Verdict::Fail,
                format!(
                    "{} reaches {} without `{check}`",
                    describe_edge(ir, edge),
                    describe_node(endpoint)
                ),
            );
        }
    }
    if matched == 0 {
        return Outcome::new(
            Verdict::NotApplicable,
            format!("no edge({from}, {to}) in diagrams"),
        );
    }
    Outcome::new(Verdict::Pass, format!("{matched} matching edges satisfy `{check}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_ir::{Edge, Group, Node, NodeRole, ZoneType};
    use pretty_assertions::assert_eq;

    fn role(mut node: Node, role: NodeRole) -> Node {
        node.role = Some(role);
        node
    }

    fn sample() -> DiagramIr {
        let mut ir = DiagramIr::default();
        ir.nodes.push(role(Node::new("u", "Partner"), NodeRole::External));
        ir.nodes.push(role(Node::new("gw", "API Gateway"), NodeRole::Gateway));
        ir.nodes.push(role(Node::new("svc", "Orders"), NodeRole::Service));
        ir.nodes.push(role(Node::new("db", "Orders DB"), NodeRole::Datastore));
        let mut e1 = Edge::new("e1", "u", "gw").with_label("HTTPS");
        e1.protocol = Some("HTTPS".to_string());
        let mut e2 = Edge::new("e2", "gw", "svc").with_label("gRPC");
        e2.protocol = Some("gRPC".to_string());
        ir.edges.push(e1);
        ir.edges.push(e2);
        ir.edges.push(Edge::new("e3", "svc", "db"));
        let mut zone = Group::new("g1", "Trust Boundary");
        zone.zone_type = Some(ZoneType::TrustBoundary);
        zone.children = vec!["gw".into(), "svc".into(), "db".into()];
        ir.groups.push(zone);
        ir
    }

    fn verdict(text: &str, ir: &DiagramIr) -> Verdict {
        Condition::parse(text)
            .unwrap()
            .evaluate(std::slice::from_ref(ir))
            .verdict
    }

    #[test]
    fn parses_and_prints_canonically() {
        for text in [
            "edge.protocol IN (HTTPS, mTLS)",
            "ALL edge.protocol IN (HTTPS, gRPC)",
            "NOT edge.protocol IN (HTTP)",
            "node.role == gateway",
            "node.label == \"API Gateway\"",
            "edge(external, datastore) EXISTS",
            "NOT edge(external, datastore)",
            "edge(external, *) -> node.role == gateway",
            "edge(out(g1), in(g1)) -> node.id == gw",
        ] {
            assert_eq!(Condition::parse(text).unwrap().to_string(), text);
        }
        assert_eq!(
            Condition::parse("not  edge( external ,datastore ) exists")
                .unwrap()
                .to_string(),
            "NOT edge(external, datastore)"
        );
    }

    #[test]
    fn rejects_malformed_conditions() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("node.protocol == HTTP").is_err());
        assert!(Condition::parse("edge(external, wizard) EXISTS").is_err());
        assert!(Condition::parse("edge(*, *) -> edge.protocol == HTTP").is_err());
        assert!(Condition::parse("node.role == gateway extra").is_err());
    }

    #[test]
    fn attribute_quantifiers() {
        let ir = sample();
        assert_eq!(verdict("node.role == gateway", &ir), Verdict::Pass);
        assert_eq!(verdict("node.role == queue", &ir), Verdict::Fail);
        assert_eq!(verdict("ALL edge.protocol IN (https, GRPC)", &ir), Verdict::Pass);
        assert_eq!(verdict("ALL edge.protocol IN (HTTPS)", &ir), Verdict::Fail);
        assert_eq!(verdict("NOT edge.protocol IN (HTTP)", &ir), Verdict::Pass);
        assert_eq!(verdict("group.zone_type == dmz", &ir), Verdict::Fail);
        assert_eq!(verdict("node.role == load_balancer", &ir), Verdict::Fail);

        let empty = DiagramIr::default();
        assert_eq!(verdict("edge.protocol == HTTP", &empty), Verdict::NotApplicable);
    }

    #[test]
    fn edge_patterns_and_routes() {
        let mut ir = sample();
        assert_eq!(verdict("NOT edge(external, datastore)", &ir), Verdict::Pass);
        assert_eq!(verdict("edge(gateway, service) EXISTS", &ir), Verdict::Pass);
        assert_eq!(
            verdict("edge(external, *) -> node.role == gateway", &ir),
            Verdict::Pass
        );
        assert_eq!(
            verdict("edge(out(g1), in(g1)) -> node.id == gw", &ir),
            Verdict::Pass
        );
        assert_eq!(verdict("edge(queue, *) EXISTS", &ir), Verdict::NotApplicable);

        ir.edges.push(Edge::new("e4", "db", "u"));
        assert_eq!(verdict("NOT edge(external, datastore)", &ir), Verdict::Fail);
        let outcome = Condition::parse("edge(out(g1), in(g1)) -> node.id == gw")
            .unwrap()
            .evaluate(std::slice::from_ref(&ir));
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.evidence.contains("Orders DB"));
    }
}
