//! Deferred values for resource properties
//!
//! A property value is either fully known at declaration time or contains
//! [`Reference`]s to other nodes whose concrete representation is only known
//! once the synthesizer has assigned logical identifiers to every resource.

use indexmap::IndexMap;
use serde_json::Value;

use crate::tree::NodeId;

/// A placeholder for a value owned by another node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Node the reference points at
    pub target: NodeId,
    /// Attribute of the target; `None` refers to its primary identifier
    pub attribute: Option<String>,
}

impl Reference {
    /// Reference to the primary identifier of `target`
    pub fn to(target: NodeId) -> Self {
        Self {
            target,
            attribute: None,
        }
    }

    /// Reference to a named attribute of `target` (e.g. `Arn`)
    pub fn attribute(target: NodeId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: Some(attribute.into()),
        }
    }
}

/// Property value tree with deferred references at any depth
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Literal(Value),
    Deferred(Reference),
    List(Vec<PropertyValue>),
    Map(IndexMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Empty map value
    pub fn empty_map() -> Self {
        PropertyValue::Map(IndexMap::new())
    }

    /// Build a map value from key/value pairs, keeping their order
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        PropertyValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<PropertyValue>,
        I: IntoIterator<Item = V>,
    {
        PropertyValue::List(items.into_iter().map(Into::into).collect())
    }

    /// All deferred references contained in this value, in declaration order
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            PropertyValue::Literal(_) => {}
            PropertyValue::Deferred(reference) => refs.push(reference.clone()),
            PropertyValue::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            PropertyValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// True when no deferred reference appears anywhere in the tree
    pub fn is_resolved(&self) -> bool {
        match self {
            PropertyValue::Literal(_) => true,
            PropertyValue::Deferred(_) => false,
            PropertyValue::List(items) => items.iter().all(PropertyValue::is_resolved),
            PropertyValue::Map(entries) => entries.values().all(PropertyValue::is_resolved),
        }
    }

    /// Replace every deferred reference using `resolve`, producing plain JSON
    pub fn resolve_with<E, F>(&self, resolve: &mut F) -> Result<Value, E>
    where
        F: FnMut(&Reference) -> Result<Value, E>,
    {
        match self {
            PropertyValue::Literal(value) => Ok(value.clone()),
            PropertyValue::Deferred(reference) => resolve(reference),
            PropertyValue::List(items) => items
                .iter()
                .map(|item| item.resolve_with(resolve))
                .collect::<Result<Vec<_>, E>>()
                .map(Value::Array),
            PropertyValue::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    object.insert(key.clone(), value.resolve_with(resolve)?);
                }
                Ok(Value::Object(object))
            }
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Literal(value)
    }
}

impl From<Reference> for PropertyValue {
    fn from(reference: Reference) -> Self {
        PropertyValue::Deferred(reference)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Literal(Value::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Literal(Value::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Literal(Value::from(value))
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        PropertyValue::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_references_in_declaration_order() {
        let a = NodeId::from_index(3);
        let b = NodeId::from_index(7);
        let value = PropertyValue::map([
            ("UserPoolArn", PropertyValue::from(Reference::attribute(a, "Arn"))),
            (
                "Clients",
                PropertyValue::list([PropertyValue::from(Reference::to(b)), "literal".into()]),
            ),
        ]);

        let refs = value.references();
        assert_eq!(refs, vec![Reference::attribute(a, "Arn"), Reference::to(b)]);
        assert!(!value.is_resolved());
    }

    #[test]
    fn test_resolve_with_replaces_references() {
        let a = NodeId::from_index(1);
        let value = PropertyValue::map([
            ("Name", PropertyValue::from("web")),
            ("Target", PropertyValue::from(Reference::to(a))),
        ]);

        let resolved: Result<Value, ()> = value.resolve_with(&mut |r: &Reference| {
            Ok(json!({ "ref": format!("N{}", r.target.index()) }))
        });

        assert_eq!(
            resolved.unwrap(),
            json!({ "Name": "web", "Target": { "ref": "N1" } })
        );
    }

    #[test]
    fn test_literal_is_resolved() {
        let value = PropertyValue::from(json!({ "Port": 80 }));
        assert!(value.is_resolved());
        assert!(value.references().is_empty());
    }
}
