//! Rule extraction from one document and the IRs of its diagrams.

use crate::condition::{edge_matches, Condition, Field, Predicate, Selector, Subject, Verdict};
use crate::fingerprint::fingerprint;
use crate::model::{renumber, Rule, RuleTable, Severity};
use canon_ir::{enrich, DiagramIr, Node, NodeRole, ZoneType};
use chrono::Utc;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

const NAME_WIDTH: usize = 60;
const MAX_KEYWORDS: usize = 8;
const SECURE_PROTOCOLS: [&str; 4] = ["HTTPS", "MTLS", "TLS", "GRPC"];

static MODALS: Lazy<Vec<(Regex, Severity)>> = Lazy::new(|| {
    [
        (
            r"(?i)\b(must\s+not|shall\s+not|must\s+never|never)\b",
            Severity::Critical,
        ),
        (r"(?i)\b(must|shall|required)\b", Severity::High),
        (r"(?i)\b(should|recommended)\b", Severity::Medium),
        (r"\bMAY\b|(?i:\boptional(ly)?\b)", Severity::Low),
    ]
    .into_iter()
    .map(|(pattern, severity)| (Regex::new(pattern).expect("valid regex"), severity))
    .collect()
});

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+").expect("valid regex"));

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9-]{2,}").expect("valid regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "all", "any", "not", "but", "with", "its", "has", "was", "can",
    "use", "used", "from", "that", "this", "these", "those", "into", "onto", "than", "then",
    "there", "their", "they", "them", "been", "being", "have", "will", "would", "could", "each",
    "every", "other", "only", "also", "when", "where", "which", "while", "must", "shall",
    "should", "never", "may", "required", "recommended", "optional", "optionally", "via", "per",
    "our", "your", "you", "who", "what", "how", "such", "more", "most", "less", "least", "same",
    "one", "two", "out", "over", "under", "between", "within", "without", "using", "always",
];

/// Extracts the rule table of one document version.
pub fn extract_rules(doc: &str, irs: &[DiagramIr], source: &str, category: &str) -> RuleTable {
    let enriched: Vec<DiagramIr> = irs
        .iter()
        .cloned()
        .map(|mut ir| {
            enrich(&mut ir);
            ir
        })
        .collect();

    let mut rules = text_rules(doc);
    rules.extend(protocol_rules(&enriched));
    rules.extend(zone_rules(&enriched));
    rules.extend(role_rules(&enriched));
    rules.extend(connectivity_rules(&enriched));
    rules.extend(ingress_rules(&enriched));
    rules.extend(legend_rules(irs));

    let mut seen = HashSet::new();
    rules.retain(|rule| {
        let key = (
            rule.name.clone(),
            rule.ast_condition.clone().unwrap_or_else(|| rule.condition.clone()),
        );
        seen.insert(key)
    });
    for rule in &mut rules {
        rule.sources = vec![source.to_string()];
    }
    renumber(&mut rules);
    debug!("Extracted {} rules from {source}", rules.len());

    RuleTable {
        source: source.to_string(),
        category: category.to_string(),
        fingerprint: fingerprint(doc.as_bytes()),
        extracted_at: Utc::now(),
        rules,
    }
}

/// Paragraphs and list items of prose, outside code fences, headings and tables.
fn prose_blocks(doc: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;
    let flush = |current: &mut String, blocks: &mut Vec<String>| {
        if !current.trim().is_empty() {
            blocks.push(std::mem::take(current));
        }
        current.clear();
    };

    for line in doc.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            flush(&mut current, &mut blocks);
            continue;
        }
        if in_fence
            || trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with('|')
            || trimmed.starts_with("<!--")
        {
            flush(&mut current, &mut blocks);
            continue;
        }
        let text = trimmed.trim_start_matches('>').trim();
        let text = if LIST_MARKER.is_match(text) {
            flush(&mut current, &mut blocks);
            LIST_MARKER.replace(text, "").into_owned()
        } else {
            text.to_string()
        };
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&text.replace("**", "").replace("__", "").replace('`', ""));
    }
    flush(&mut current, &mut blocks);
    blocks
}

fn sentences(block: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = block.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if boundary {
            out.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn classify(sentence: &str) -> Option<Severity> {
    MODALS
        .iter()
        .find(|(re, _)| re.is_match(sentence))
        .map(|(_, severity)| *severity)
}

fn rule_name(sentence: &str) -> String {
    let text = sentence.trim_end_matches(['.', '!', '?', ':', ';']).trim();
    if text.chars().count() <= NAME_WIDTH {
        return text.to_string();
    }
    let mut name = String::new();
    for word in text.split_whitespace() {
        if name.chars().count() + word.chars().count() + 1 > NAME_WIDTH {
            break;
        }
        if !name.is_empty() {
            name.push(' ');
        }
        name.push_str(word);
    }
    format!("{name}...")
}

/// Content words in order of first appearance, at most eight.
pub fn keywords_of(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in WORD.find_iter(text) {
        let word = m.as_str().trim_end_matches('-').to_lowercase();
        if word.len() < 3 || STOPWORDS.contains(&word.as_str()) || out.contains(&word) {
            continue;
        }
        out.push(word);
        if out.len() == MAX_KEYWORDS {
            break;
        }
    }
    out
}

fn text_rules(doc: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for block in prose_blocks(doc) {
        for sentence in sentences(&block) {
            let Some(severity) = classify(&sentence) else {
                continue;
            };
            let required = matches!(severity, Severity::Critical | Severity::High);
            rules.push(
                Rule::new(rule_name(&sentence), severity, sentence.clone())
                    .with_required(required)
                    .with_keywords(keywords_of(&sentence)),
            );
        }
    }
    rules
}

fn labels(nodes: &[&Node]) -> String {
    nodes
        .iter()
        .take(3)
        .map(|n| n.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn nodes_with_role(irs: &[DiagramIr], role: NodeRole) -> Vec<&Node> {
    irs.iter()
        .flat_map(|ir| ir.nodes.iter())
        .filter(|n| n.role == Some(role))
        .collect()
}

fn protocol_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    // upper-cased protocol -> spelling as found
    let mut used: BTreeMap<String, String> = BTreeMap::new();
    let mut plain_http = Vec::new();
    for ir in irs {
        for edge in &ir.edges {
            let Some(protocol) = &edge.protocol else {
                continue;
            };
            let upper = protocol.to_ascii_uppercase();
            if upper == "HTTP" {
                let name = |id: &str| ir.node(id).map_or(id.to_string(), |n| n.label.clone());
                plain_http.push(format!("{} -> {}", name(&edge.source), name(&edge.target)));
            }
            used.entry(upper).or_insert_with(|| protocol.clone());
        }
    }

    let mut rules = Vec::new();
    let secure: Vec<&String> = used
        .iter()
        .filter(|(upper, _)| SECURE_PROTOCOLS.contains(&upper.as_str()))
        .map(|(_, spelled)| spelled)
        .collect();
    if !secure.is_empty() && plain_http.is_empty() {
        let list: Vec<&str> = secure.iter().map(|s| s.as_str()).collect();
        rules.push(
            Rule::new(
                "Secure transport",
                Severity::Critical,
                format!("Protocol-labelled connections use {}", list.join(", ")),
            )
            .with_keywords(list.iter().map(|p| p.to_lowercase()).chain(["transport".to_string()]))
            .with_ast(format!("ALL edge.protocol IN ({})", list.join(", "))),
        );
    }
    if !plain_http.is_empty() {
        rules.push(
            Rule::new(
                "Insecure transport present",
                Severity::High,
                format!(
                    "Plain HTTP connections ({}) must move to an encrypted protocol",
                    plain_http.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
                ),
            )
            .with_keywords(["http", "insecure", "transport"])
            .with_ast("NOT edge.protocol IN (HTTP)"),
        );
    }
    for (upper, spelled) in &used {
        if upper == "HTTP" || SECURE_PROTOCOLS.contains(&upper.as_str()) {
            continue;
        }
        rules.push(
            Rule::new(
                format!("{spelled} protocol used"),
                Severity::Medium,
                format!("Connections use {spelled}"),
            )
            .with_required(false)
            .with_keywords([spelled.to_lowercase(), "protocol".to_string()])
            .with_ast(format!("edge.protocol == {spelled}")),
        );
    }
    rules
}

fn zone_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    let zoned: Vec<(&str, ZoneType)> = irs
        .iter()
        .flat_map(|ir| ir.groups.iter())
        .filter_map(|g| g.zone_type.map(|z| (g.label.as_str(), z)))
        .collect();
    if zoned.is_empty() {
        return Vec::new();
    }
    let zones: BTreeSet<ZoneType> = zoned.iter().map(|(_, z)| *z).collect();
    let names: Vec<&str> = zones.iter().map(|z| z.as_str()).collect();
    let group_labels: Vec<&str> = zoned.iter().map(|(l, _)| *l).take(4).collect();

    let mut rules = vec![Rule::new(
        "Zone boundaries defined",
        Severity::High,
        format!("Diagram separates zones: {}", group_labels.join(", ")),
    )
    .with_keywords(names.iter().copied().chain(["zone", "boundary"]))
    .with_ast(format!("group.zone_type IN ({})", names.join(", ")))];

    if zones.contains(&ZoneType::Dmz) {
        rules.push(
            Rule::new(
                "DMZ zone present",
                Severity::Critical,
                "Public-facing components sit in a DMZ perimeter zone",
            )
            .with_keywords(["dmz", "perimeter", "network"])
            .with_ast("group.zone_type == dmz"),
        );
    }
    if zones.contains(&ZoneType::External) && zones.contains(&ZoneType::Internal) {
        rules.push(
            Rule::new(
                "External/internal separation",
                Severity::Critical,
                "External and internal zones are kept separate",
            )
            .with_keywords(["external", "internal", "isolation"])
            .with_ast("group.zone_type IN (external, internal)"),
        );
    }
    rules
}

fn role_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    let table: [(NodeRole, &str, Severity, bool, &[&str], &str); 6] = [
        (
            NodeRole::Gateway,
            "API gateway present",
            Severity::High,
            true,
            &["gateway", "api", "routing"],
            "Traffic routes through gateway",
        ),
        (
            NodeRole::LoadBalancer,
            "Load balancer present",
            Severity::Medium,
            false,
            &["load", "balancer", "availability"],
            "Traffic is balanced by",
        ),
        (
            NodeRole::Datastore,
            "Data stores identified",
            Severity::High,
            true,
            &["database", "datastore", "persistence"],
            "Persistent data lives in",
        ),
        (
            NodeRole::Cache,
            "Caching layer present",
            Severity::Low,
            false,
            &["cache", "caching", "performance"],
            "Reads are cached by",
        ),
        (
            NodeRole::Queue,
            "Async messaging present",
            Severity::Medium,
            false,
            &["queue", "async", "messaging", "decoupling"],
            "Components are decoupled through",
        ),
        (
            NodeRole::External,
            "External dependencies documented",
            Severity::High,
            true,
            &["external", "dependency", "third-party"],
            "External dependencies",
        ),
    ];

    let mut rules = Vec::new();
    for (role, name, severity, required, keywords, lead) in table {
        let nodes = nodes_with_role(irs, role);
        if nodes.is_empty() {
            continue;
        }
        rules.push(
            Rule::new(name, severity, format!("{lead} ({})", labels(&nodes)))
                .with_required(required)
                .with_keywords(keywords.iter().copied())
                .with_ast(format!("node.role == {}", role.as_str())),
        );
    }
    rules
}

fn connectivity_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    let mut rules = Vec::new();
    if nodes_with_role(irs, NodeRole::External).is_empty() {
        return rules;
    }

    let route = Condition::Route {
        from: Selector::Role(NodeRole::External),
        to: Selector::Any,
        check: Predicate {
            subject: Subject::Node,
            field: Field::Role,
            values: vec![NodeRole::Gateway.as_str().to_string()],
            list: false,
        },
    };
    let has_gateway = !nodes_with_role(irs, NodeRole::Gateway).is_empty();
    if has_gateway && route.evaluate(irs).verdict == Verdict::Pass {
        rules.push(
            Rule::new(
                "External traffic via gateway",
                Severity::Critical,
                "Every connection from an external party terminates at a gateway",
            )
            .with_keywords(["external", "gateway", "ingress"])
            .with_ast(route.to_string()),
        );
    }

    if nodes_with_role(irs, NodeRole::Datastore).is_empty() {
        return rules;
    }
    let mut direct = Vec::new();
    for ir in irs {
        for edge in &ir.edges {
            let (Some(src), Some(tgt)) = (ir.node(&edge.source), ir.node(&edge.target)) else {
                continue;
            };
            let pair = (src.role, tgt.role);
            if pair == (Some(NodeRole::External), Some(NodeRole::Datastore))
                || pair == (Some(NodeRole::Datastore), Some(NodeRole::External))
            {
                direct.push(format!("{} -> {}", src.label, tgt.label));
            }
        }
    }
    let ast = "NOT edge(external, datastore)";
    if direct.is_empty() {
        rules.push(
            Rule::new(
                "No direct external DB access",
                Severity::Critical,
                "External parties never connect to a datastore directly",
            )
            .with_keywords(["database", "isolation", "access", "control"])
            .with_ast(ast),
        );
    } else {
        rules.push(
            Rule::new(
                "Direct external DB access",
                Severity::Critical,
                format!(
                    "External parties reach datastores directly ({}); route access through a service",
                    direct.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
                ),
            )
            .with_keywords(["database", "external", "access", "isolation"])
            .with_ast(ast),
        );
    }
    rules
}

/// For each guarded zone crossed by edges, the gateway-like node inside it that
/// receives the most crossing edges becomes the designated entry point.
fn ingress_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for ir in irs {
        for group in &ir.groups {
            if !matches!(
                group.zone_type,
                Some(ZoneType::TrustBoundary | ZoneType::Dmz | ZoneType::Internal)
            ) {
                continue;
            }
            let inside = Selector::Inside(group.id.clone());
            let outside = Selector::Outside(group.id.clone());
            let entry_points = crossing_entry_points(ir, &outside, &inside);
            let designated = entry_points
                .iter()
                .filter(|(id, _)| {
                    ir.node(id).is_some_and(|n| {
                        matches!(n.role, Some(NodeRole::Gateway | NodeRole::LoadBalancer))
                    })
                })
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
            let Some((gw_id, _)) = designated else {
                continue;
            };
            let Some(gw) = ir.node(gw_id) else {
                continue;
            };
            let route = Condition::Route {
                from: outside,
                to: inside,
                check: Predicate {
                    subject: Subject::Node,
                    field: Field::Id,
                    values: vec![gw.id.clone()],
                    list: false,
                },
            };
            rules.push(
                Rule::new(
                    format!("Ingress to {} via {}", group.label, gw.label),
                    Severity::Critical,
                    format!(
                        "All edges crossing into {} enter through {}",
                        group.label, gw.label
                    ),
                )
                .with_keywords(["trust", "boundary", "ingress", "gateway"])
                .with_ast(route.to_string()),
            );
        }
    }
    rules
}

/// Declared conventions only; inferred legend entries are not rules.
fn legend_rules(irs: &[DiagramIr]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for ir in irs {
        for (color, meaning) in &ir.metadata.legend.colors {
            let filled = |fill: &Option<String>| {
                fill.as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(color))
            };
            let on_groups = !ir.nodes.iter().any(|n| filled(&n.fill_color))
                && ir.groups.iter().any(|g| filled(&g.fill_color));
            let subject = if on_groups { "group" } else { "node" };
            rules.push(
                Rule::new(
                    format!("Color {color} means {meaning}"),
                    Severity::Low,
                    format!("Elements filled {color} denote {meaning}"),
                )
                .with_required(false)
                .with_keywords(["legend", "color"].into_iter().map(String::from).chain(keywords_of(meaning)))
                .with_ast(format!("{subject}.fill_color == {color}")),
            );
        }
        for (style, meaning) in &ir.metadata.legend.line_styles {
            let mut title: Vec<char> = style.chars().collect();
            if let Some(first) = title.first_mut() {
                *first = first.to_ascii_uppercase();
            }
            let title: String = title.into_iter().collect();
            rules.push(
                Rule::new(
                    format!("{title} lines mean {meaning}"),
                    Severity::Low,
                    format!("{title} connectors denote {meaning}"),
                )
                .with_required(false)
                .with_keywords(
                    ["legend", "line", style.as_str()]
                        .into_iter()
                        .map(String::from)
                        .chain(keywords_of(meaning)),
                )
                .with_ast(format!("edge.line_style == {style}")),
            );
        }
    }
    rules
}

/// Inside endpoints of edges crossing the boundary, with their crossing counts.
fn crossing_entry_points(
    ir: &DiagramIr,
    outside: &Selector,
    inside: &Selector,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for (_, endpoint) in edge_matches(outside, inside, std::slice::from_ref(ir)) {
        *counts.entry(endpoint.id.clone()).or_insert(0) += 1;
    }
    counts
}
