//! # Canon Pipeline
//!
//! Content-addressed diagram conversion: extract, repair, evaluate, render.
//!
//! ## Architecture
//!
//! ```text
//! bytes ──> sha256 ──> cache lookup (<hash>-<method>) ──hit──> ConversionRecord
//!                          │ miss
//!                          ▼
//!            ┌─ Draw.io / SVG / DSL ─> extract_deterministic ─┐
//!  route ────┼─ Mermaid ─────────────> parse_rendered ────────┼─> eval ─> render
//!            └─ PNG / JPEG / bitmap SVG                       │           │
//!                  └─> extract_raster ─> partial IR           │           ▼
//!                        └─> Repairer (timeout) ─> apply_patch┘   ArtifactStore + cache
//!                              ▲        retries ≤ 2  │
//!                              └──── violations ─────┘
//! ```
//!
//! Only records that pass eval are cached; best-effort output is written with
//! `valid: false` and recomputed on the next request.

pub mod cache;
mod config;
mod convert;
mod error;
mod eval;
mod repair;
mod stats;

pub use cache::{cache_key, CacheBackend, CacheConfig};
pub use config::PipelineConfig;
pub use convert::{ConversionOutput, ConversionRecord, Converter, Method};
pub use error::{PipelineError, Result};
pub use eval::{eval, eval_json, EvalCheck, EvalIssue, EvalReport, EvalSummary};
pub use repair::{
    apply_patch, request_patch, Evidence, NoRepair, Patch, PatchDirRepairer, PatchOp,
    RejectedOp, RepairOutcome, RepairRequest, Repairer, REPAIRED_CONFIDENCE,
};
pub use stats::ConversionStats;
