//! # Canon Rules
//!
//! Governance rule knowledge base: per-document rule tables, one consolidated
//! index per category, fingerprint staleness and batched validation.
//!
//! ## Architecture
//!
//! ```text
//! <category>/<doc>/page.md ─┐
//! <category>/<doc>/*.ir.json┴─> extract_rules ──> <doc>/rules.md (fingerprint)
//!                                                      │
//!                                    merge (lock, dedup, severity sort, renumber)
//!                                                      ▼
//!                                          <category>/_all.rules.md
//!                                                      │
//!        check_staleness: live fingerprint vs stored ──┤
//!        refresh: stale + missing only ────────────────┤
//!                                                      ▼
//!                 batch reader: 50 rules at a time ──> findings.md
//! ```

mod batch_reader;
pub mod condition;
mod config;
mod consolidate;
mod error;
mod extract;
mod fingerprint;
pub mod layout;
mod lock;
mod model;
mod staleness;
pub mod table;

pub use batch_reader::{
    evaluate_rule, validate, validate_batched, validate_single_pass, Document, Finding,
    FindingStatus, RuleBatches, ValidationSummary,
};
pub use condition::{Condition, ConditionError, Outcome, Verdict};
pub use config::{RulesConfig, BYTES_PER_TOKEN, TOKEN_BUDGET};
pub use consolidate::{
    merge, merge_into_file, merge_with, ConditionSimilarity, DedupPolicy, TokenJaccard,
};
pub use error::{Result, RulesError};
pub use extract::{extract_rules, keywords_of};
pub use fingerprint::{fingerprint, fingerprint_file, FINGERPRINT_LEN, FINGERPRINT_WINDOW};
pub use lock::{acquire_index_lock, IndexLock};
pub use model::{renumber, rule_id, ConsolidatedIndex, Rule, RuleTable, Severity};
pub use staleness::{
    check_staleness, extract_document, load_irs, refresh, IndexStatus, RefreshSummary,
    StalenessEntry, StalenessReport, StalenessSummary, Status,
};
