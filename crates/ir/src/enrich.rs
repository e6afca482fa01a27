//! Deterministic semantic enrichment: node roles, edge protocols, group zones
//! and a color legend inferred from labels and shapes.

use crate::types::{DiagramIr, LineStyle, NodeRole, Shape, ZoneType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

fn compile(table: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    table
        .iter()
        .map(|(pattern, tag)| (Regex::new(pattern).expect("valid regex"), *tag))
        .collect()
}

static ROLE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (
            r"(?i)\b(postgres|mysql|mongo|dynamo|cassandra|redis\s*db|database|data\s*store|aurora|rds)\b",
            "datastore",
        ),
        (
            r"(?i)\b(api\s*gate\s*way|gateway|apigw|api\s*gw|kong|zuul|envoy\s*proxy)\b",
            "gateway",
        ),
        (
            r"(?i)\b(queue|mq|kafka|rabbit\s*mq|sqs|kinesis|pub\s*sub|event\s*bus|topic|nats)\b",
            "queue",
        ),
        (r"(?i)\b(cache|redis|memcached?|cdn|edge\s*cache|varnish)\b", "cache"),
        (
            r"(?i)\b(load\s*balanc\w*|lb|nginx|haproxy|alb|nlb|elb|traefik)\b",
            "load_balancer",
        ),
        (r"(?i)\b(user|actor|client|browser|mobile|end.?user|customer)\b", "actor"),
        (r"(?i)\b(external|third.?party|vendor|partner|saas|3rd)\b", "external"),
        (r"(?i)\b(interface|api|endpoint|rest\s*api|graphql)\b", "interface"),
    ])
});

static PROTOCOL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (r"(?i)\bmtls\b", "mTLS"),
        (r"(?i)\bhttps\b", "HTTPS"),
        (r"(?i)\bhttp\b", "HTTP"),
        (r"(?i)\bgrpc\b", "gRPC"),
        (r"(?i)\bamqp\b", "AMQP"),
        (r"(?i)\bmqtt\b", "MQTT"),
        (r"(?i)\brest\b", "REST"),
        (r"(?i)\bgraphql\b", "GraphQL"),
        (r"(?i)\bwebsockets?\b", "WebSocket"),
        (r"(?i)\btls\b", "TLS"),
        (r"(?i)\btcp\b", "TCP"),
        (r"(?i)\bjdbc\b", "JDBC"),
        (r"(?i)\bsoap\b", "SOAP"),
        (r"(?i)\budp\b", "UDP"),
        (r"(?i)\bkafka\b", "Kafka"),
    ])
});

static ZONE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    compile(&[
        (r"(?i)\b(internal|private|intranet)\b", "internal"),
        (r"(?i)\b(external|public|internet)\b", "external"),
        (r"(?i)\b(dmz|demilitarized)\b", "dmz"),
        (r"(?i)\b(aws|azure|gcp|cloud)\b", "cloud"),
        (r"(?i)\b(trust.?boundar\w*|security.?zone|perimeter)\b", "trust_boundary"),
    ])
});

static ACTOR_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(actor|user)\b").expect("valid regex"));

fn first_match(table: &[(Regex, &'static str)], text: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, tag)| *tag)
}

pub fn infer_node_role(label: &str, shape: Shape) -> NodeRole {
    match shape {
        Shape::Cylinder => return NodeRole::Datastore,
        Shape::Diamond => return NodeRole::Decision,
        Shape::Circle if ACTOR_LABEL.is_match(label) => return NodeRole::Actor,
        _ => {}
    }
    first_match(&ROLE_PATTERNS, label)
        .and_then(NodeRole::parse)
        .unwrap_or(NodeRole::Service)
}

pub fn infer_edge_protocol(label: &str) -> Option<String> {
    if label.trim().is_empty() {
        return None;
    }
    first_match(&PROTOCOL_PATTERNS, label).map(str::to_string)
}

pub fn infer_zone_type(label: &str) -> Option<ZoneType> {
    first_match(&ZONE_PATTERNS, label).and_then(ZoneType::parse)
}

/// Maps each fill color to the dominant role of the nodes carrying it; group
/// fills map to their zone. Ties resolve to the alphabetically first role.
pub fn infer_color_legend(ir: &DiagramIr) -> BTreeMap<String, String> {
    let mut color_roles: BTreeMap<String, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for node in &ir.nodes {
        if let (Some(color), Some(role)) = (&node.fill_color, node.role) {
            *color_roles
                .entry(color.to_ascii_uppercase())
                .or_default()
                .entry(role.as_str())
                .or_insert(0) += 1;
        }
    }

    let mut legend = BTreeMap::new();
    for (color, roles) in color_roles {
        let dominant = roles
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(role, _)| *role);
        if let Some(role) = dominant {
            legend.insert(color, role.to_string());
        }
    }
    for group in &ir.groups {
        if let (Some(color), Some(zone)) = (&group.fill_color, group.zone_type) {
            legend.insert(color.to_ascii_uppercase(), zone.as_str().to_string());
        }
    }
    legend
}

fn default_line_style_meaning(style: LineStyle) -> Option<&'static str> {
    match style {
        LineStyle::Solid => None,
        LineStyle::Dashed => Some("asynchronous or optional flow"),
        LineStyle::Thick => Some("primary or high-volume flow"),
    }
}

/// Fills semantic fields that are still empty. Existing values and declared
/// legend entries are never overwritten.
pub fn enrich(ir: &mut DiagramIr) {
    for node in &mut ir.nodes {
        if node.role.is_none() {
            node.role = Some(infer_node_role(&node.label, node.shape));
        }
    }
    for edge in &mut ir.edges {
        if edge.protocol.is_none() {
            edge.protocol = infer_edge_protocol(&edge.label);
        }
    }
    for group in &mut ir.groups {
        if group.zone_type.is_none() {
            group.zone_type = infer_zone_type(&group.label);
        }
    }

    for (color, meaning) in infer_color_legend(ir) {
        ir.metadata.legend.colors.entry(color).or_insert(meaning);
    }
    for edge in &ir.edges {
        if let Some(meaning) = default_line_style_meaning(edge.line_style) {
            ir.metadata
                .legend
                .line_styles
                .entry(edge.line_style.as_str().to_string())
                .or_insert_with(|| meaning.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, Group, Node};
    use pretty_assertions::assert_eq;

    #[test]
    fn roles_follow_shape_then_label() {
        assert_eq!(infer_node_role("Orders", Shape::Cylinder), NodeRole::Datastore);
        assert_eq!(infer_node_role("Approved?", Shape::Diamond), NodeRole::Decision);
        assert_eq!(infer_node_role("API Gateway", Shape::Rectangle), NodeRole::Gateway);
        assert_eq!(infer_node_role("Kafka", Shape::Rectangle), NodeRole::Queue);
        assert_eq!(infer_node_role("Billing", Shape::Rectangle), NodeRole::Service);
    }

    #[test]
    fn protocols_prefer_the_most_specific_match() {
        assert_eq!(infer_edge_protocol("mTLS over TCP").as_deref(), Some("mTLS"));
        assert_eq!(infer_edge_protocol("HTTPS/JSON").as_deref(), Some("HTTPS"));
        assert_eq!(infer_edge_protocol("calls"), None);
        assert_eq!(infer_edge_protocol(""), None);
    }

    #[test]
    fn enrich_builds_legend_without_overwriting_declarations() {
        let mut ir = DiagramIr::default();
        ir.nodes.push(Node::new("db", "Orders Postgres").with_fill("#4472C4"));
        ir.nodes.push(Node::new("db2", "Ledger database").with_fill("#4472C4"));
        ir.nodes.push(Node::new("svc", "Billing").with_fill("#70AD47"));
        ir.edges
            .push(Edge::new("e1", "svc", "db").with_label("JDBC").with_style(LineStyle::Dashed));
        let mut dmz = Group::new("g1", "DMZ");
        dmz.fill_color = Some("#FFE699".into());
        ir.groups.push(dmz);
        ir.metadata
            .legend
            .colors
            .insert("#70AD47".into(), "payment services".into());

        enrich(&mut ir);

        assert_eq!(ir.nodes[0].role, Some(NodeRole::Datastore));
        assert_eq!(ir.edges[0].protocol.as_deref(), Some("JDBC"));
        assert_eq!(ir.groups[0].zone_type, Some(ZoneType::Dmz));
        assert_eq!(ir.metadata.legend.colors["#4472C4"], "datastore");
        assert_eq!(ir.metadata.legend.colors["#70AD47"], "payment services");
        assert_eq!(ir.metadata.legend.colors["#FFE699"], "dmz");
        assert!(ir.metadata.legend.line_styles.contains_key("dashed"));
    }
}
