//! Capability interface between the construct tree and concrete resource libraries
//!
//! The core never inspects resource internals. A payload only has to name its
//! type and produce a [`PropertyValue`] tree; references are discovered from
//! that tree unless the payload reports them itself.

use std::fmt::Debug;

use indexmap::IndexMap;

use crate::value::{PropertyValue, Reference};

/// Failure raised by a payload that cannot be rendered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PayloadError {
    pub message: String,
}

impl PayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A deployable resource payload attached to a tree node
pub trait Resource: Debug + Send + Sync {
    /// Type tag written to the template (e.g. `AWS::IAM::Role`)
    fn resource_type(&self) -> &str;

    /// Render the resource properties
    fn serialize(&self) -> Result<PropertyValue, PayloadError>;

    /// Deferred references the payload contributes, for inspection before
    /// synthesis
    ///
    /// The synthesizer resolves whatever [`Resource::serialize`] returns, so
    /// an override must agree with it. The default derives the list from
    /// `serialize` and fails the same way.
    fn declared_references(&self) -> Result<Vec<Reference>, PayloadError> {
        Ok(self.serialize()?.references())
    }
}

/// Generic resource described by a type tag and an ordered property map
#[derive(Debug, Clone, PartialEq)]
pub struct CfnResource {
    resource_type: String,
    properties: IndexMap<String, PropertyValue>,
}

impl CfnResource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: IndexMap::new(),
        }
    }

    /// Set a property, replacing any previous value under the same key
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn properties(&self) -> &IndexMap<String, PropertyValue> {
        &self.properties
    }

    /// Type tags look like `Service::Module::Type`: at least two non-empty,
    /// alphanumeric `::`-separated segments
    fn validate_type(&self) -> Result<(), PayloadError> {
        if self.resource_type.is_empty() {
            return Err(PayloadError::new("resource type is empty"));
        }

        let segments: Vec<&str> = self.resource_type.split("::").collect();
        if segments.len() < 2 {
            return Err(PayloadError::new(format!(
                "resource type '{}' must have the form Service::Type",
                self.resource_type
            )));
        }

        for segment in &segments {
            if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(PayloadError::new(format!(
                    "resource type '{}' has an invalid segment '{}'",
                    self.resource_type, segment
                )));
            }
        }

        Ok(())
    }
}

impl Resource for CfnResource {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn serialize(&self) -> Result<PropertyValue, PayloadError> {
        self.validate_type()?;
        Ok(PropertyValue::Map(self.properties.clone()))
    }

    fn declared_references(&self) -> Result<Vec<Reference>, PayloadError> {
        self.validate_type()?;
        Ok(self
            .properties
            .values()
            .flat_map(PropertyValue::references)
            .collect())
    }
}

/// A named value a unit publishes in its template outputs
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub value: PropertyValue,
    pub description: Option<String>,
    /// Explicit export name, making the value importable by other tooling
    pub export_name: Option<String>,
}

impl OutputSpec {
    pub fn new(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            description: None,
            export_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_export_name(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_cfn_resource_serializes_properties_in_order() {
        let resource = CfnResource::new("AWS::ECS::Cluster")
            .with_property("ClusterName", "web")
            .with_property("Settings", json!([{ "Name": "containerInsights" }]));

        let value = resource.serialize().unwrap();
        match value {
            PropertyValue::Map(map) => {
                let keys: Vec<&String> = map.keys().collect();
                assert_eq!(keys, vec!["ClusterName", "Settings"]);
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_resource_types_are_rejected() {
        for bad in ["", "Bucket", "AWS::", "AWS::S3::Bu cket", "::S3"] {
            let resource = CfnResource::new(bad);
            assert!(resource.serialize().is_err(), "type '{}' should fail", bad);
        }
        assert!(CfnResource::new("Custom::Thing").serialize().is_ok());
    }

    #[test]
    fn test_declared_references_come_from_properties() {
        let pool = NodeId::from_index(4);
        let resource = CfnResource::new("AWS::Cognito::UserPoolClient")
            .with_property("UserPoolId", Reference::to(pool));

        assert_eq!(resource.declared_references(), Ok(vec![Reference::to(pool)]));
    }

    #[derive(Debug)]
    struct Unrenderable;

    impl Resource for Unrenderable {
        fn resource_type(&self) -> &str {
            "Custom::Unrenderable"
        }

        fn serialize(&self) -> Result<PropertyValue, PayloadError> {
            Err(PayloadError::new("template body missing"))
        }
    }

    #[test]
    fn test_declared_references_report_serialize_failures() {
        assert_eq!(
            Unrenderable.declared_references(),
            Err(PayloadError::new("template body missing"))
        );
        assert!(CfnResource::new("Bucket")
            .with_property("Ref", Reference::to(NodeId::from_index(1)))
            .declared_references()
            .is_err());
    }
}
