//! # Canon Render
//!
//! Deterministic IR to Mermaid code generation.
//!
//! ## Architecture
//!
//! ```text
//! DiagramIr
//!     │
//!     ├─ IdTable: sanitized, collision-free Mermaid ids
//!     │
//!     └─ render ──> flowchart | sequenceDiagram | classDiagram | stateDiagram-v2 | erDiagram
//!                     ├─ %% legend comments (color and line-style meaning)
//!                     ├─ subgraph blocks per group, nested
//!                     ├─ fixed line-style x arrow table for connectors
//!                     └─ one classDef per distinct color combination
//!
//! rendered flowchart ──> parse_rendered ──> DiagramIr ──> graph_differences
//! ```
//!
//! Rendering never fails: edges whose endpoints are unknown are skipped with a
//! warning. Parsing is strict and rejects anything outside the emitted subset.

mod error;
mod ids;
mod mermaid;
mod parse;

pub use error::{RenderError, Result};
pub use ids::{sanitize, IdTable, RESERVED_WORDS};
pub use mermaid::{arrow_token, fenced, node_shape, render};
pub use parse::{graph_differences, parse_rendered};
