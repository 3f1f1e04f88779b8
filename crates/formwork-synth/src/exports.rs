//! Cross-unit export tracking
//!
//! When a resource in one unit references a resource in another, the producing
//! unit has to publish the value as an exported output and the consuming unit
//! imports it by export name. The tracker is the single record of those
//! exports during a synthesis run: every reference to the same
//! `(unit, resource, attribute)` triple shares one export, however many
//! consumers there are.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;

use formwork_core::naming;

use crate::document::{get_att_value, ref_value};

/// A single exported value
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// Key of the output in the producing document
    pub output_key: String,
    /// Globally unique export name consumers import by
    pub export_name: String,
    /// Logical id of the exported resource
    pub logical_id: String,
    /// Attribute exported, or `None` for the primary identifier
    pub attribute: Option<String>,
    /// Units importing this value
    pub consumers: BTreeSet<String>,
}

impl ExportInfo {
    /// The in-document pointer the producing output evaluates to
    pub fn pointer(&self) -> Value {
        match &self.attribute {
            Some(attr) => get_att_value(&self.logical_id, attr),
            None => ref_value(&self.logical_id),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExportTracker {
    /// producing unit -> output key -> export
    exports: IndexMap<String, IndexMap<String, ExportInfo>>,
}

impl ExportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `consumer` reads `logical_id` (or one of its attributes)
    /// from `producer`, returning the export name to import
    pub fn record(
        &mut self,
        producer: &str,
        consumer: &str,
        logical_id: &str,
        attribute: Option<&str>,
    ) -> String {
        let output_key = naming::export_output_key(logical_id, attribute);
        let info = self
            .exports
            .entry(producer.to_string())
            .or_default()
            .entry(output_key.clone())
            .or_insert_with(|| ExportInfo {
                export_name: naming::export_name(producer, &output_key),
                output_key,
                logical_id: logical_id.to_string(),
                attribute: attribute.map(str::to_string),
                consumers: BTreeSet::new(),
            });
        info.consumers.insert(consumer.to_string());
        info.export_name.clone()
    }

    /// Exports a unit has to publish, in first-use order
    pub fn exports_of(&self, producer: &str) -> impl Iterator<Item = &ExportInfo> {
        self.exports
            .get(producer)
            .into_iter()
            .flat_map(|exports| exports.values())
    }

    /// All exports grouped by producing unit
    pub fn all_exports(&self) -> impl Iterator<Item = (&str, &ExportInfo)> {
        self.exports.iter().flat_map(|(unit, exports)| {
            exports.values().map(move |info| (unit.as_str(), info))
        })
    }

    pub fn has_exports(&self) -> bool {
        !self.exports.is_empty()
    }

    pub fn stats(&self) -> ExportStats {
        let mut stats = ExportStats {
            producing_units: self.exports.len(),
            ..ExportStats::default()
        };
        for (_, info) in self.all_exports() {
            stats.exported_values += 1;
            stats.consumer_links += info.consumers.len();
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub producing_units: usize,
    pub exported_values: usize,
    pub consumer_links: usize,
}
