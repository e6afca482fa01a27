//! # Canon IR
//!
//! Canonical graph representation that every diagram source converts into.
//!
//! ## Architecture
//!
//! ```text
//! Draw.io / SVG / DSL / raster
//!     │
//!     └──> DiagramIr (types)
//!            ├─ Nodes: id, label, shape, colors, confidence, role
//!            ├─ Edges: endpoints, label, line style, arrows, protocol
//!            ├─ Groups: nested containers, zone type
//!            └─ Metadata: legend, source format, source hash
//!                 │
//!                 ├──> Schema checks (ids, confidence, group cycles)
//!                 ├──> Enrichment (roles, protocols, zones, color legend)
//!                 └──> ArtifactStore (<hash>.ir.json, atomic writes)
//! ```

mod enrich;
mod error;
mod markdown;
mod schema;
mod store;
mod types;

pub use enrich::{enrich, infer_color_legend, infer_edge_protocol, infer_node_role, infer_zone_type};
pub use error::{IrError, Result};
pub use markdown::{escape_cell, to_markdown_tables};
pub use schema::{
    check_schema, is_generic_label, is_valid_color, json_schema, normalize_color, SchemaIssue,
    SchemaIssueKind,
};
pub use store::{source_hash, write_atomic, ArtifactStore};
pub use types::{
    Arrow, Bounds, ConfidenceMap, DiagramIr, DiagramType, Direction, Edge, Group, Legend,
    LineStyle, Metadata, Node, NodeRole, Shape, SourceFormat, ZoneType, IR_SCHEMA_VERSION,
};
