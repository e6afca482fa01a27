use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const IR_SCHEMA_VERSION: &str = "2.0.0";

/// Per-element trust weight keyed by node/edge id
pub type ConfidenceMap = BTreeMap<String, f64>;

fn default_schema_version() -> String {
    IR_SCHEMA_VERSION.to_string()
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DiagramType {
    #[default]
    Flowchart,
    Sequence,
    Class,
    State,
    Er,
}

impl DiagramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequence",
            Self::Class => "class",
            Self::State => "state",
            Self::Er => "er",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Tb,
    Bt,
    Lr,
    Rl,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tb => "TB",
            Self::Bt => "BT",
            Self::Lr => "LR",
            Self::Rl => "RL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TB" | "TD" => Some(Self::Tb),
            "BT" => Some(Self::Bt),
            "LR" => Some(Self::Lr),
            "RL" => Some(Self::Rl),
            _ => None,
        }
    }
}

/// Canonical node shapes. Every source vocabulary collapses into these five.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Rectangle,
    Cylinder,
    Diamond,
    Circle,
    Hexagon,
}

impl Shape {
    /// Lenient mapping from a source shape code. Unknown codes become rectangles.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "cylinder" | "cylinder3" | "database" | "db" | "datastore" | "storage" => {
                Self::Cylinder
            }
            "diamond" | "rhombus" | "decision" | "choice" => Self::Diamond,
            "circle" | "ellipse" | "oval" | "doubleellipse" | "actor" | "umlactor" => Self::Circle,
            "hexagon" => Self::Hexagon,
            _ => Self::Rectangle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Cylinder => "cylinder",
            Self::Diamond => "diamond",
            Self::Circle => "circle",
            Self::Hexagon => "hexagon",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Thick,
}

impl LineStyle {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "dashed" | "dotted" | "dash" | "dot" => Self::Dashed,
            "thick" | "bold" | "heavy" => Self::Thick,
            _ => Self::Solid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solid => "solid",
            Self::Dashed => "dashed",
            Self::Thick => "thick",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Arrow {
    #[default]
    None,
    Arrow,
}

impl Arrow {
    pub fn from_present(present: bool) -> Self {
        if present {
            Self::Arrow
        } else {
            Self::None
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Arrow)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Service,
    Datastore,
    Gateway,
    Queue,
    Cache,
    LoadBalancer,
    Actor,
    External,
    Interface,
    Decision,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Datastore => "datastore",
            Self::Gateway => "gateway",
            Self::Queue => "queue",
            Self::Cache => "cache",
            Self::LoadBalancer => "load_balancer",
            Self::Actor => "actor",
            Self::External => "external",
            Self::Interface => "interface",
            Self::Decision => "decision",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let role = match raw.trim().to_ascii_lowercase().as_str() {
            "service" => Self::Service,
            "datastore" => Self::Datastore,
            "gateway" => Self::Gateway,
            "queue" => Self::Queue,
            "cache" => Self::Cache,
            "load_balancer" => Self::LoadBalancer,
            "actor" => Self::Actor,
            "external" => Self::External,
            "interface" => Self::Interface,
            "decision" => Self::Decision,
            _ => return None,
        };
        Some(role)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Internal,
    External,
    Dmz,
    Cloud,
    TrustBoundary,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Dmz => "dmz",
            Self::Cloud => "cloud",
            Self::TrustBoundary => "trust_boundary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let zone = match raw.trim().to_ascii_lowercase().as_str() {
            "internal" => Self::Internal,
            "external" => Self::External,
            "dmz" => Self::Dmz,
            "cloud" => Self::Cloud,
            "trust_boundary" => Self::TrustBoundary,
            _ => return None,
        };
        Some(zone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Drawio,
    Svg,
    Dsl,
    Raster,
    Mermaid,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drawio => "drawio",
            Self::Svg => "svg",
            Self::Dsl => "dsl",
            Self::Raster => "raster",
            Self::Mermaid => "mermaid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let format = match raw.trim().to_ascii_lowercase().as_str() {
            "drawio" | "xml" | "mxgraph" => Self::Drawio,
            "svg" => Self::Svg,
            "dsl" | "puml" | "plantuml" => Self::Dsl,
            "raster" | "png" | "jpg" | "jpeg" | "image" => Self::Raster,
            "mermaid" | "mmd" => Self::Mermaid,
            _ => return None,
        };
        Some(format)
    }

    /// Deterministic formats are parsed by grammar; the rest go through CV + repair.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Self::Raster)
    }
}

/// Axis-aligned region in source coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn contains_point(&self, px: f64, py: f64, pad: f64) -> bool {
        px >= self.x - pad
            && px <= self.x + self.width + pad
            && py >= self.y - pad
            && py <= self.y + self.height + pad
    }

    pub fn contains(&self, other: &Bounds) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    /// Distance from a point to the nearest border (0 when inside)
    pub fn distance_to(&self, px: f64, py: f64) -> f64 {
        let dx = (self.x - px).max(0.0).max(px - (self.x + self.width));
        let dy = (self.y - py).max(0.0).max(py - (self.y + self.height));
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_group: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            shape: Shape::Rectangle,
            fill_color: None,
            border_color: None,
            text_color: None,
            confidence: 1.0,
            role: None,
            bounds: None,
            parent_group: None,
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_fill(mut self, color: impl Into<String>) -> Self {
        self.fill_color = Some(color.into());
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub line_style: LineStyle,
    #[serde(default)]
    pub arrow_start: Arrow,
    #[serde(default)]
    pub arrow_end: Arrow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

impl Edge {
    /// A solid, forward-pointing edge
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: String::new(),
            line_style: LineStyle::Solid,
            arrow_start: Arrow::None,
            arrow_end: Arrow::Arrow,
            color: None,
            protocol: None,
            confidence: 1.0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_style(mut self, style: LineStyle) -> Self {
        self.line_style = style;
        self
    }

    /// Identity used for duplicate detection
    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.source, &self.target, self.label.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_type: Option<ZoneType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

impl Group {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            children: Vec::new(),
            fill_color: None,
            zone_type: None,
            bounds: None,
        }
    }
}

/// Declared visual conventions: color and line-style meaning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Legend {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub colors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub line_styles: BTreeMap<String, String>,
}

impl Legend {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.line_styles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Metadata {
    #[serde(default)]
    pub legend: Legend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<SourceFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    /// Format-specific facts (page index, image size, capability flags)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiagramIr {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub diagram_type: DiagramType,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Default for DiagramIr {
    fn default() -> Self {
        Self::new(DiagramType::Flowchart)
    }
}

impl DiagramIr {
    pub fn new(diagram_type: DiagramType) -> Self {
        Self {
            schema_version: default_schema_version(),
            diagram_type,
            direction: Direction::Tb,
            nodes: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn has_edge_between(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }

    /// Node and edge confidences, the trust weights carried through repair and eval
    pub fn confidence_map(&self) -> ConfidenceMap {
        let mut map = ConfidenceMap::new();
        for node in &self.nodes {
            map.insert(node.id.clone(), node.confidence);
        }
        for edge in &self.edges {
            map.insert(edge.id.clone(), edge.confidence);
        }
        map
    }

    /// Next free edge id of the form `e<n>`
    pub fn next_edge_id(&self) -> String {
        let taken: HashSet<&str> = self.edges.iter().map(|e| e.id.as_str()).collect();
        let mut n = self.edges.len() + 1;
        loop {
            let candidate = format!("e{n}");
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Copies group membership into `Node::parent_group`
    pub fn sync_group_membership(&mut self) {
        let mut parents: BTreeMap<String, String> = BTreeMap::new();
        for group in &self.groups {
            for child in &group.children {
                parents
                    .entry(child.clone())
                    .or_insert_with(|| group.id.clone());
            }
        }
        for node in &mut self.nodes {
            if let Some(parent) = parents.get(&node.id) {
                node.parent_group = Some(parent.clone());
            }
        }
    }

    /// Ids of groups that are direct children of no other group
    pub fn root_groups(&self) -> Vec<&Group> {
        let nested: HashSet<&str> = self
            .groups
            .iter()
            .flat_map(|g| g.children.iter().map(String::as_str))
            .collect();
        self.groups
            .iter()
            .filter(|g| !nested.contains(g.id.as_str()))
            .collect()
    }

    /// Sets direction from node geometry: LR when the horizontal spread exceeds
    /// 1.5x the vertical spread. Leaves the direction untouched without bounds.
    pub fn infer_direction(&mut self) {
        let centers: Vec<(f64, f64)> = self
            .nodes
            .iter()
            .filter_map(|n| n.bounds.map(|b| b.center()))
            .collect();
        if centers.len() < 2 {
            return;
        }
        let (min_x, max_x, min_y, max_y) = centers.iter().fold(
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
            |(ax, bx, ay, by), (x, y)| (ax.min(*x), bx.max(*x), ay.min(*y), by.max(*y)),
        );
        let x_spread = max_x - min_x;
        let y_spread = max_y - min_y;
        self.direction = if x_spread > y_spread * 1.5 {
            Direction::Lr
        } else {
            Direction::Tb
        };
    }

    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shape_codes_collapse_to_canonical_set() {
        assert_eq!(Shape::from_code("database"), Shape::Cylinder);
        assert_eq!(Shape::from_code("rhombus"), Shape::Diamond);
        assert_eq!(Shape::from_code("ellipse"), Shape::Circle);
        assert_eq!(Shape::from_code("hexagon"), Shape::Hexagon);
        assert_eq!(Shape::from_code("cloud"), Shape::Rectangle);
        assert_eq!(LineStyle::from_code("dotted"), LineStyle::Dashed);
        assert_eq!(LineStyle::from_code("zigzag"), LineStyle::Solid);
    }

    #[test]
    fn json_uses_snake_case_and_defaults_missing_fields() {
        let raw = r#"{
            "diagram_type": "flowchart",
            "direction": "LR",
            "nodes": [{"id": "a", "label": "API", "shape": "cylinder"}],
            "edges": [{"id": "e1", "source": "a", "target": "a", "line_style": "dashed"}]
        }"#;
        let ir = DiagramIr::from_json(raw).expect("parse ir");
        assert_eq!(ir.schema_version, IR_SCHEMA_VERSION);
        assert_eq!(ir.direction, Direction::Lr);
        assert_eq!(ir.nodes[0].confidence, 1.0);
        assert_eq!(ir.edges[0].arrow_end, Arrow::None);
        assert_eq!(ir.edges[0].line_style, LineStyle::Dashed);

        let json = ir.to_canonical_json().expect("serialize");
        assert!(json.contains("\"line_style\": \"dashed\""));
        assert!(json.contains("\"direction\": \"LR\""));
    }

    #[test]
    fn direction_follows_geometry() {
        let mut ir = DiagramIr::default();
        ir.nodes
            .push(Node::new("a", "A").with_bounds(Bounds::new(0.0, 0.0, 50.0, 20.0)));
        ir.nodes
            .push(Node::new("b", "B").with_bounds(Bounds::new(400.0, 10.0, 50.0, 20.0)));
        ir.infer_direction();
        assert_eq!(ir.direction, Direction::Lr);
    }

    #[test]
    fn next_edge_id_skips_taken_ids() {
        let mut ir = DiagramIr::default();
        ir.edges.push(Edge::new("e2", "a", "b"));
        assert_eq!(ir.next_edge_id(), "e3");
    }
}
