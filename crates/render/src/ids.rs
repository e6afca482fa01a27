use std::collections::{BTreeMap, HashSet};

/// Words Mermaid treats as syntax when they appear as a bare id
pub const RESERVED_WORDS: &[&str] = &[
    "end",
    "graph",
    "subgraph",
    "style",
    "class",
    "classdef",
    "click",
    "default",
    "flowchart",
    "linkstyle",
    "direction",
    "call",
    "href",
];

/// Stable IR-id to Mermaid-id mapping shared by nodes and groups
#[derive(Debug, Default)]
pub struct IdTable {
    used: HashSet<String>,
    map: BTreeMap<String, String>,
}

pub fn sanitize(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('n');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "n_");
    }
    if RESERVED_WORDS.contains(&out.to_ascii_lowercase().as_str()) {
        out.push('_');
    }
    out
}

impl IdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mermaid id for `ir_id`, assigned on first request
    pub fn assign(&mut self, ir_id: &str) -> String {
        if let Some(existing) = self.map.get(ir_id) {
            return existing.clone();
        }
        let base = sanitize(ir_id);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        self.map.insert(ir_id.to_string(), candidate.clone());
        candidate
    }

    pub fn get(&self, ir_id: &str) -> Option<&str> {
        self.map.get(ir_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reserved_and_colliding_ids_are_suffixed() {
        let mut ids = IdTable::new();
        assert_eq!(ids.assign("end"), "end_");
        assert_eq!(ids.assign("order-api"), "order_api");
        assert_eq!(ids.assign("order api"), "order_api_2");
        assert_eq!(ids.assign("2fa"), "n_2fa");
        assert_eq!(ids.assign("order-api"), "order_api");
        assert_eq!(ids.get("order api"), Some("order_api_2"));
        assert_eq!(sanitize("Style"), "Style_");
    }
}
