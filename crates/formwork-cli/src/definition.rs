//! Application definition files
//!
//! An application can be declared in YAML, JSON or TOML (chosen by file
//! extension). Units are listed in declaration order; constructs nest through
//! `children`, and a construct with a `type` is a resource:
//!
//! ```yaml
//! units:
//!   - name: Roles
//!     constructs:
//!       - name: TestRole
//!         type: AWS::IAM::Role
//!   - name: Lambda
//!     depends_on:
//!       - unit: Roles
//!         reason: the function assumes the role
//!     constructs:
//!       - name: Function
//!         type: AWS::Lambda::Function
//!         properties:
//!           Role:
//!             $get-att: [Roles/TestRole, Arn]
//! ```
//!
//! Inside `properties` and output values, `{"$ref": "<path>"}` and
//! `{"$get-att": ["<path>", "<attribute>"]}` become deferred references. The
//! file is loaded in two passes so a reference may name a node declared
//! further down.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use formwork_core::{
    App, CfnResource, CoreError, NodeId, OutputSpec, PropertyValue, Reference,
};

const REF_KEY: &str = "$ref";
const GET_ATT_KEY: &str = "$get-att";

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error(
        "Unsupported definition format: {} (expected .yaml, .yml, .json or .toml)",
        .0.display()
    )]
    UnsupportedFormat(PathBuf),

    #[error("'{path}' referenced from '{referenced_from}' does not exist")]
    UnknownPath {
        path: String,
        referenced_from: String,
    },

    #[error("Invalid reference at '{at}': {message}")]
    InvalidReference { at: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppDefinition {
    #[serde(default)]
    pub units: Vec<UnitDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<UnitDependency>,
    #[serde(default)]
    pub constructs: Vec<ConstructDefinition>,
    #[serde(default)]
    pub outputs: Vec<OutputDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDependency {
    pub unit: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstructDefinition {
    pub name: String,
    /// Resource type; constructs without one only group their children
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
    /// Paths of resources this one is created after
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub children: Vec<ConstructDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDefinition {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub export_name: Option<String>,
}

impl AppDefinition {
    /// Read a definition, picking the format from the file extension
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let content = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse_error = |message: String| DefinitionError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let definition: AppDefinition = match extension.as_deref() {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            _ => return Err(DefinitionError::UnsupportedFormat(path.to_path_buf())),
        };
        debug!("Loaded definition from {}", path.display());
        Ok(definition)
    }

    /// Build the application
    ///
    /// The first pass declares every unit and construct so paths can be
    /// resolved; the second attaches payloads, outputs and dependencies.
    pub fn build(&self) -> Result<App, DefinitionError> {
        let mut app = App::new();
        let mut paths: HashMap<String, NodeId> = HashMap::new();
        let mut pending: Vec<(NodeId, String, &ConstructDefinition)> = Vec::new();

        for unit in &self.units {
            let id = app.add_unit_with_description(&unit.name, unit.description.clone())?;
            paths.insert(unit.name.clone(), id);
            for construct in &unit.constructs {
                declare(&mut app, id, &unit.name, construct, &mut paths, &mut pending)?;
            }
        }
        debug!("Declared {} node(s)", paths.len());

        for (id, path, construct) in pending {
            if let Some(resource_type) = &construct.resource_type {
                let mut resource = CfnResource::new(resource_type.as_str());
                for (key, value) in &construct.properties {
                    let at = format!("{}.{}", path, key);
                    resource.set_property(key.as_str(), convert(value, &paths, &at)?);
                }
                app.replace_resource(id, resource)?;
            }
            for target in &construct.depends_on {
                let target_id = lookup(&paths, target, &path)?;
                app.add_node_dependency(id, target_id)?;
            }
        }

        for unit in &self.units {
            let unit_id = paths[&unit.name];
            for output in &unit.outputs {
                let at = format!("{}/{}", unit.name, output.name);
                let mut spec = OutputSpec::new(convert(&output.value, &paths, &at)?);
                spec.description = output.description.clone();
                spec.export_name = output.export_name.clone();
                app.add_output(unit_id, &output.name, spec)?;
            }
            for dependency in &unit.depends_on {
                let target = lookup(&paths, &dependency.unit, &unit.name)?;
                app.add_dependency(unit_id, target, dependency.reason.as_deref())?;
            }
        }

        Ok(app)
    }
}

/// Load and build in one step
pub fn load_app(path: &Path) -> Result<App, DefinitionError> {
    AppDefinition::load(path)?.build()
}

fn declare<'d>(
    app: &mut App,
    parent: NodeId,
    parent_path: &str,
    construct: &'d ConstructDefinition,
    paths: &mut HashMap<String, NodeId>,
    pending: &mut Vec<(NodeId, String, &'d ConstructDefinition)>,
) -> Result<(), DefinitionError> {
    let path = format!("{}/{}", parent_path, construct.name);
    let id = match &construct.resource_type {
        // Placeholder payload; properties are attached in the second pass
        Some(resource_type) => {
            app.add_resource(parent, &construct.name, CfnResource::new(resource_type.as_str()))?
        }
        None => app.add_construct(parent, &construct.name)?,
    };
    paths.insert(path.clone(), id);
    pending.push((id, path.clone(), construct));

    for child in &construct.children {
        declare(app, id, &path, child, paths, pending)?;
    }
    Ok(())
}

fn lookup(
    paths: &HashMap<String, NodeId>,
    path: &str,
    referenced_from: &str,
) -> Result<NodeId, DefinitionError> {
    paths
        .get(path)
        .copied()
        .ok_or_else(|| DefinitionError::UnknownPath {
            path: path.to_string(),
            referenced_from: referenced_from.to_string(),
        })
}

fn convert(
    value: &Value,
    paths: &HashMap<String, NodeId>,
    at: &str,
) -> Result<PropertyValue, DefinitionError> {
    let invalid = |message: &str| DefinitionError::InvalidReference {
        at: at.to_string(),
        message: message.to_string(),
    };

    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key(REF_KEY) => {
            let path = map[REF_KEY]
                .as_str()
                .ok_or_else(|| invalid("$ref expects a path string"))?;
            Ok(Reference::to(lookup(paths, path, at)?).into())
        }
        Value::Object(map) if map.len() == 1 && map.contains_key(GET_ATT_KEY) => {
            let (path, attribute) = match map[GET_ATT_KEY].as_array().map(Vec::as_slice) {
                Some([Value::String(path), Value::String(attribute)]) => (path, attribute),
                _ => return Err(invalid("$get-att expects [path, attribute]")),
            };
            Ok(Reference::attribute(lookup(paths, path, at)?, attribute.as_str()).into())
        }
        Value::Object(map) => {
            let mut entries = IndexMap::new();
            for (key, item) in map {
                let converted = convert(item, paths, &format!("{}.{}", at, key))?;
                entries.insert(key.clone(), converted);
            }
            Ok(PropertyValue::Map(entries))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| convert(item, paths, &format!("{}.{}", at, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(PropertyValue::List),
        literal => Ok(PropertyValue::Literal(literal.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_core::Resource;
    use serde_json::json;

    fn paths() -> HashMap<String, NodeId> {
        let mut paths = HashMap::new();
        paths.insert("Roles/TestRole".to_string(), NodeId::from_index(2));
        paths
    }

    #[test]
    fn test_convert_markers() {
        let value = json!({
            "Role": {"$get-att": ["Roles/TestRole", "Arn"]},
            "Names": [{"$ref": "Roles/TestRole"}, "literal"],
            "Plain": {"$ref": "Roles/TestRole", "extra": 1}
        });
        let converted = convert(&value, &paths(), "Lambda/Function").unwrap();
        let target = NodeId::from_index(2);

        // A marker key next to other keys is an ordinary map entry
        let references = converted.references();
        assert_eq!(references.len(), 2);
        assert!(references.contains(&Reference::to(target)));
        assert!(references.contains(&Reference::attribute(target, "Arn")));
    }

    #[test]
    fn test_convert_rejects_malformed_markers() {
        let err = convert(&json!({"$get-att": ["Roles/TestRole"]}), &paths(), "x").unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidReference { .. }));

        let err = convert(&json!({"$ref": "Roles/Missing"}), &paths(), "x").unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UnknownPath { ref path, .. } if path == "Roles/Missing"
        ));
    }

    #[test]
    fn test_build_resolves_forward_references() {
        let definition: AppDefinition = serde_yaml::from_str(
            r#"
units:
  - name: Queues
    constructs:
      - name: Worker
        type: AWS::SQS::Queue
        properties:
          RedrivePolicy:
            deadLetterTargetArn:
              $get-att: [Queues/DeadLetters, Arn]
        depends_on: [Queues/DeadLetters]
      - name: DeadLetters
        type: AWS::SQS::Queue
"#,
        )
        .unwrap();
        let app = definition.build().unwrap();

        let worker = app.tree().find("Queues/Worker").unwrap();
        let dlq = app.tree().find("Queues/DeadLetters").unwrap();
        let node = app.tree().get(worker).unwrap();
        assert_eq!(
            node.resource().unwrap().declared_references(),
            Ok(vec![Reference::attribute(dlq, "Arn")])
        );
        assert_eq!(node.depends_on(), &[dlq]);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<AppDefinition, _> =
            serde_yaml::from_str("units:\n  - name: A\n    stacks: []\n");
        assert!(result.is_err());
    }
}
