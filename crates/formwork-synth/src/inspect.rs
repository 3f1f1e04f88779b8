//! Assertions over synthesized documents
//!
//! A [`Template`] wraps one unit's document as plain JSON and answers
//! key-path queries against it. Paths are `.`-separated keys; numeric
//! segments index into lists:
//!
//! ```
//! use formwork_synth::inspect::{Matcher, Template};
//! use serde_json::json;
//!
//! let template = Template::from_value(json!({
//!     "resources": {
//!         "Queue4A7E3555": {
//!             "type": "AWS::SQS::Queue",
//!             "properties": { "Tags": [{ "Key": "team", "Value": "infra" }] }
//!         }
//!     }
//! }));
//!
//! template
//!     .assert_at_path(
//!         "resources.Queue4A7E3555.properties.Tags.0",
//!         &Matcher::object_like(json!({ "Key": "team" })),
//!     )
//!     .unwrap();
//! template.resource_count_is("AWS::SQS::Queue", 1).unwrap();
//! ```

use regex::Regex;
use serde_json::Value;

use crate::assembly::CloudAssembly;
use crate::document::TemplateDocument;
use crate::error::SynthError;

/// Expected value at a path
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Deep equality
    Exact(Value),
    /// A string value matching the regex
    Pattern(Regex),
    /// Every key in the expected object is present and matches recursively;
    /// extra keys in the actual value are ignored
    ObjectLike(Value),
    /// Nothing exists at the path
    Absent,
}

impl Matcher {
    pub fn exact(value: Value) -> Self {
        Matcher::Exact(value)
    }

    pub fn pattern(pattern: &str) -> Result<Self, SynthError> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    pub fn object_like(value: Value) -> Self {
        Matcher::ObjectLike(value)
    }

    /// `None` on success, otherwise a description of the first mismatch
    fn mismatch(&self, actual: Option<&Value>) -> Option<String> {
        match (self, actual) {
            (Matcher::Absent, None) => None,
            (Matcher::Absent, Some(actual)) => Some(format!("expected nothing, found {}", actual)),
            (_, None) => Some("no value at path".to_string()),
            (Matcher::Exact(expected), Some(actual)) => (expected != actual)
                .then(|| format!("expected {}, found {}", expected, actual)),
            (Matcher::Pattern(re), Some(Value::String(s))) => (!re.is_match(s))
                .then(|| format!("'{}' does not match /{}/", s, re.as_str())),
            (Matcher::Pattern(re), Some(actual)) => {
                Some(format!("expected a string matching /{}/, found {}", re.as_str(), actual))
            }
            (Matcher::ObjectLike(expected), Some(actual)) => object_like(expected, actual, ""),
        }
    }
}

fn object_like(expected: &Value, actual: &Value, at: &str) -> Option<String> {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            expected.iter().find_map(|(key, value)| {
                let path = join(at, key);
                match actual.get(key) {
                    Some(found) => object_like(value, found, &path),
                    None => Some(format!("missing key '{}'", path)),
                }
            })
        }
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() != actual.len() {
                return Some(format!(
                    "'{}' has {} element(s), expected {}",
                    at,
                    actual.len(),
                    expected.len()
                ));
            }
            expected
                .iter()
                .zip(actual)
                .enumerate()
                .find_map(|(i, (e, a))| object_like(e, a, &join(at, &i.to_string())))
        }
        _ if expected == actual => None,
        _ => Some(format!("at '{}': expected {}, found {}", at, expected, actual)),
    }
}

fn join(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", at, key)
    }
}

/// Read-only view of one synthesized document
#[derive(Debug, Clone)]
pub struct Template {
    root: Value,
}

impl Template {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_document(document: &TemplateDocument) -> Result<Self, SynthError> {
        Ok(Self::from_value(document.to_json()?))
    }

    pub fn from_assembly(assembly: &CloudAssembly, unit: &str) -> Result<Self, SynthError> {
        let document = assembly
            .document(unit)
            .ok_or_else(|| SynthError::Assertion(format!("no document for unit '{}'", unit)))?;
        Self::from_document(document)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Value at a `.`-separated key path
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split('.').try_fold(&self.root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    pub fn assert_at_path(&self, path: &str, matcher: &Matcher) -> Result<(), SynthError> {
        match matcher.mismatch(self.value_at(path)) {
            None => Ok(()),
            Some(reason) => Err(SynthError::Assertion(format!("at '{}': {}", path, reason))),
        }
    }

    /// Resources of the given type as `(logical id, resource)` pairs
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<(&str, &Value)> {
        self.root
            .get("resources")
            .and_then(Value::as_object)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(_, r)| r.get("type").and_then(Value::as_str) == Some(resource_type))
                    .map(|(id, r)| (id.as_str(), r))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// At least one resource of the type has properties object-like `expected`
    pub fn has_resource_properties(
        &self,
        resource_type: &str,
        expected: &Value,
    ) -> Result<(), SynthError> {
        let candidates = self.resources_of_type(resource_type);
        if candidates.is_empty() {
            return Err(SynthError::Assertion(format!(
                "no resources of type '{}'",
                resource_type
            )));
        }

        let empty = Value::Object(serde_json::Map::new());
        let mut reasons = Vec::new();
        for (id, resource) in &candidates {
            let properties = resource.get("properties").unwrap_or(&empty);
            match object_like(expected, properties, "") {
                None => return Ok(()),
                Some(reason) => reasons.push(format!("{}: {}", id, reason)),
            }
        }
        Err(SynthError::Assertion(format!(
            "no '{}' resource matches: {}",
            resource_type,
            reasons.join("; ")
        )))
    }

    pub fn resource_count_is(&self, resource_type: &str, count: usize) -> Result<(), SynthError> {
        let found = self.resources_of_type(resource_type).len();
        if found == count {
            Ok(())
        } else {
            Err(SynthError::Assertion(format!(
                "expected {} resource(s) of type '{}', found {}",
                count, resource_type, found
            )))
        }
    }
}
