//! Output document model
//!
//! One [`TemplateDocument`] is produced per unit. Every value inside it is
//! plain JSON: deferred references are replaced by one of three pointer
//! encodings before the document is built.
//!
//! | reference                     | encoding                                                  |
//! |-------------------------------|-----------------------------------------------------------|
//! | same unit, primary identifier | `{"ref": "<logical id>"}`                                 |
//! | same unit, attribute          | `{"get-att": ["<logical id>", "<attribute>"]}`            |
//! | other unit                    | `{"import-from-unit": "<unit>", "export": "<export name>"}` |

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Pointer to the primary identifier of a resource in the same document
pub fn ref_value(logical_id: &str) -> Value {
    json!({ "ref": logical_id })
}

/// Pointer to an attribute of a resource in the same document
pub fn get_att_value(logical_id: &str, attribute: &str) -> Value {
    json!({ "get-att": [logical_id, attribute] })
}

/// Pointer to a value exported by another unit
pub fn import_value(unit: &str, export_name: &str) -> Value {
    json!({ "import-from-unit": unit, "export": export_name })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub resources: IndexMap<String, ResourceEntry>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputEntry>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub imports: IndexMap<String, ImportEntry>,
}

impl TemplateDocument {
    pub fn new(description: Option<String>) -> Self {
        Self {
            description,
            ..Self::default()
        }
    }

    pub fn resource(&self, logical_id: &str) -> Option<&ResourceEntry> {
        self.resources.get(logical_id)
    }

    pub fn output(&self, key: &str) -> Option<&OutputEntry> {
        self.outputs.get(key)
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub properties: Value,

    #[serde(
        default,
        rename = "depends-on",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Construct path of the node that produced the resource
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub name: String,
}

/// A value this document consumes from another unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    #[serde(rename = "from-unit")]
    pub from_unit: String,
    pub export: String,
}
