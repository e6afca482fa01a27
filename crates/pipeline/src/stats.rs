use crate::convert::{ConversionOutput, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters for a batch of conversions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Sources converted (cache hits included)
    pub converted: usize,

    /// Served from the conversion cache
    pub cache_hits: usize,

    /// Converted but failed eval after every repair attempt
    pub best_effort: usize,

    /// Conversions per extraction method
    pub methods: BTreeMap<String, usize>,

    /// Sources that could not be converted at all
    pub errors: Vec<String>,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&mut self, output: &ConversionOutput) {
        self.converted += 1;
        if output.cached {
            self.cache_hits += 1;
        }
        if !output.record.valid {
            self.best_effort += 1;
        }
        self.add_method(output.record.method);
    }

    pub fn add_method(&mut self, method: Method) {
        *self.methods.entry(method.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }
}
