//! Synthesis of an [`App`] into per-unit template documents
//!
//! Synthesis runs in two passes. The first walks every unit and assigns a
//! logical id to each resource and output, so a reference can point at a node
//! that is declared later in the tree (or in a unit rendered later). The second
//! renders units in dependency order, serializing payloads and replacing each
//! deferred reference with a pointer:
//!
//! - a target in the same unit becomes a `ref` / `get-att` pointer
//! - a target in a unit the referencing unit (transitively) depends on becomes
//!   an import, and the producing unit gains a matching exported output
//! - anything else is an [`SynthError::UnresolvedReference`]

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use formwork_core::naming;
use formwork_core::{
    App, CoreError, Node, NodeId, NodeKind, PropertyValue, Reference, Resource,
};

use crate::assembly::CloudAssembly;
use crate::document::{
    get_att_value, import_value, ref_value, ExportEntry, ImportEntry, OutputEntry,
    ResourceEntry, ResourceMetadata, TemplateDocument,
};
use crate::error::{ErrorLocation, SynthError};
use crate::exports::ExportTracker;

#[derive(Debug, Clone, Default)]
pub struct SynthConfig {
    /// Record each resource's construct path under `metadata.path`
    pub path_metadata: bool,
    /// Prepended to every unit description
    pub description_prefix: Option<String>,
}

impl SynthConfig {
    pub fn with_path_metadata(mut self, enabled: bool) -> Self {
        self.path_metadata = enabled;
        self
    }

    pub fn with_description_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.description_prefix = Some(prefix.into());
        self
    }
}

/// Where pass one placed a resource or output node
#[derive(Debug, Clone)]
struct Placement {
    unit: String,
    logical_id: String,
    is_resource: bool,
}

#[derive(Debug, Default)]
pub struct Synthesizer {
    config: SynthConfig,
}

impl Synthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Produce one document per unit plus the manifest
    ///
    /// Nothing is written to disk; see [`CloudAssembly::write_to`].
    #[instrument(skip(self, app), level = "info")]
    pub fn synthesize(&self, app: &App) -> Result<CloudAssembly, SynthError> {
        app.graph().check_acyclic()?;
        let order = app.graph().topological_order()?;
        info!("Synthesizing {} unit(s): {}", order.len(), order.join(", "));

        let placements = self.assign_logical_ids(app)?;
        debug!("Assigned {} logical id(s)", placements.len());

        let mut exports = ExportTracker::new();
        let mut documents = IndexMap::new();
        for unit in &order {
            let unit_id = app
                .unit(unit)
                .ok_or_else(|| CoreError::UnknownUnit(unit.clone()))?;
            let document = self.render_unit(app, unit_id, unit, &placements, &mut exports)?;
            documents.insert(unit.clone(), document);
        }

        publish_exports(&mut documents, &exports)?;
        let stats = exports.stats();
        debug!(
            "Published {} export(s) from {} unit(s) to {} consumer(s)",
            stats.exported_values, stats.producing_units, stats.consumer_links
        );

        CloudAssembly::build(app.graph(), order, documents)
    }

    fn assign_logical_ids(&self, app: &App) -> Result<HashMap<NodeId, Placement>, SynthError> {
        let tree = app.tree();
        let mut placements = HashMap::new();

        for unit_id in tree.units() {
            let unit = tree.get(unit_id)?.name().to_string();
            let mut taken: HashMap<String, NodeId> = HashMap::new();

            for (id, node) in tree.walk_from(unit_id).skip(1) {
                let is_resource = match node.kind() {
                    NodeKind::Resource(_) => true,
                    NodeKind::Output(_) => false,
                    _ => continue,
                };
                // First component is the unit itself
                let components = tree.components(id);
                let logical_id = naming::logical_id(&components[1..])?;

                if let Some(previous) = taken.insert(logical_id.clone(), id) {
                    warn!(
                        "'{}' and '{}' both map to logical id '{}'",
                        tree.path(previous),
                        tree.path(id),
                        logical_id
                    );
                    return Err(CoreError::DuplicateName {
                        parent: unit,
                        name: logical_id,
                    }
                    .into());
                }

                placements.insert(
                    id,
                    Placement {
                        unit: unit.clone(),
                        logical_id,
                        is_resource,
                    },
                );
            }
        }

        Ok(placements)
    }

    fn render_unit(
        &self,
        app: &App,
        unit_id: NodeId,
        unit: &str,
        placements: &HashMap<NodeId, Placement>,
        exports: &mut ExportTracker,
    ) -> Result<TemplateDocument, SynthError> {
        let tree = app.tree();
        tree.check_node_dependencies(unit_id)?;
        let description = match tree.get(unit_id)?.kind() {
            NodeKind::Unit { description } => description.as_deref(),
            _ => None,
        };
        let mut document = TemplateDocument::new(self.describe(description));
        let mut ctx = UnitContext {
            app,
            unit,
            placements,
            exports,
            imports: IndexMap::new(),
        };

        for (id, node) in tree.walk_from(unit_id).skip(1) {
            match node.kind() {
                NodeKind::Resource(resource) => {
                    let entry = self.render_resource(&mut ctx, id, node, resource.as_ref())?;
                    document
                        .resources
                        .insert(ctx.logical_id(id)?.to_string(), entry);
                }
                NodeKind::Output(spec) => {
                    let entry = OutputEntry {
                        value: ctx.resolve_value(id, &spec.value)?,
                        description: spec.description.clone(),
                        export: spec
                            .export_name
                            .as_ref()
                            .map(|name| ExportEntry { name: name.clone() }),
                    };
                    document
                        .outputs
                        .insert(ctx.logical_id(id)?.to_string(), entry);
                }
                _ => {}
            }
        }

        if document.resources.is_empty() {
            warn!("Unit '{}' declares no resources", unit);
        }
        document.imports = ctx.imports;
        debug!(
            "Rendered unit '{}': {} resource(s), {} output(s), {} import(s)",
            unit,
            document.resources.len(),
            document.outputs.len(),
            document.imports.len()
        );
        Ok(document)
    }

    fn render_resource(
        &self,
        ctx: &mut UnitContext<'_>,
        id: NodeId,
        node: &Node,
        resource: &dyn Resource,
    ) -> Result<ResourceEntry, SynthError> {
        let tree = ctx.app.tree();
        let location = || ErrorLocation::new().in_unit(ctx.unit).at_node(tree.path(id));

        let payload = resource
            .serialize()
            .map_err(|e| SynthError::InvalidPayload {
                location: location(),
                message: e.to_string(),
            })?;
        if !matches!(
            payload,
            PropertyValue::Map(_) | PropertyValue::Literal(Value::Object(_))
        ) {
            return Err(SynthError::InvalidPayload {
                location: location(),
                message: "resource properties must be a map".to_string(),
            });
        }
        let properties = ctx.resolve_value(id, &payload)?;

        let mut depends_on = Vec::new();
        for &dependency in node.depends_on() {
            if let Some(logical_id) = ctx.resolve_node_dependency(id, dependency)? {
                depends_on.push(logical_id);
            }
        }

        let metadata = self.config.path_metadata.then(|| ResourceMetadata {
            path: tree.path(id),
        });

        Ok(ResourceEntry {
            resource_type: resource.resource_type().to_string(),
            properties,
            depends_on,
            metadata,
        })
    }

    fn describe(&self, description: Option<&str>) -> Option<String> {
        match (self.config.description_prefix.as_deref(), description) {
            (Some(prefix), Some(description)) => Some(format!("{} {}", prefix, description)),
            (Some(prefix), None) => Some(prefix.to_string()),
            (None, Some(description)) => Some(description.to_string()),
            (None, None) => None,
        }
    }
}

/// Reference resolution state for the unit being rendered
struct UnitContext<'a> {
    app: &'a App,
    unit: &'a str,
    placements: &'a HashMap<NodeId, Placement>,
    exports: &'a mut ExportTracker,
    imports: IndexMap<String, ImportEntry>,
}

impl<'a> UnitContext<'a> {
    fn logical_id(&self, id: NodeId) -> Result<&'a str, SynthError> {
        self.placements
            .get(&id)
            .map(|placement| placement.logical_id.as_str())
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()).into())
    }

    fn resolve_value(&mut self, from: NodeId, value: &PropertyValue) -> Result<Value, SynthError> {
        value.resolve_with(&mut |reference: &Reference| self.resolve(from, reference))
    }

    fn resolve(&mut self, from: NodeId, reference: &Reference) -> Result<Value, SynthError> {
        let placement = self.resource_placement(from, reference.target)?;
        let attribute = reference.attribute.as_deref();

        if placement.unit == self.unit {
            return Ok(match attribute {
                Some(attr) => get_att_value(&placement.logical_id, attr),
                None => ref_value(&placement.logical_id),
            });
        }

        self.require_dependency(from, reference.target, &placement.unit)?;
        let export_name =
            self.exports
                .record(&placement.unit, self.unit, &placement.logical_id, attribute);
        debug!(
            "'{}' imports '{}' from unit '{}'",
            self.app.tree().path(from),
            export_name,
            placement.unit
        );
        self.imports
            .entry(export_name.clone())
            .or_insert_with(|| ImportEntry {
                from_unit: placement.unit.clone(),
                export: export_name.clone(),
            });
        Ok(import_value(&placement.unit, &export_name))
    }

    /// Logical id to list under `depends-on`, or `None` when the dependency
    /// crosses units and is already satisfied by unit ordering
    fn resolve_node_dependency(
        &mut self,
        from: NodeId,
        target: NodeId,
    ) -> Result<Option<String>, SynthError> {
        let placement = self.resource_placement(from, target)?;
        if placement.unit == self.unit {
            return Ok(Some(placement.logical_id.clone()));
        }
        self.require_dependency(from, target, &placement.unit)?;
        debug!(
            "Dependency of '{}' on '{}' is covered by unit ordering",
            self.app.tree().path(from),
            self.app.tree().path(target)
        );
        Ok(None)
    }

    fn resource_placement(
        &self,
        from: NodeId,
        target: NodeId,
    ) -> Result<&'a Placement, SynthError> {
        let tree = self.app.tree();
        if tree.node(target).is_none() {
            return Err(self.unresolved(from, target, None, "node does not exist"));
        }
        match self.placements.get(&target) {
            Some(placement) if placement.is_resource => Ok(placement),
            Some(placement) => Err(self.unresolved(
                from,
                target,
                Some(placement.unit.clone()),
                "outputs cannot be referenced",
            )),
            None => {
                let to_unit = tree
                    .unit_of(target)
                    .and_then(|unit| tree.node(unit))
                    .map(|unit| unit.name().to_string());
                Err(self.unresolved(from, target, to_unit, "only resources can be referenced"))
            }
        }
    }

    fn require_dependency(
        &self,
        from: NodeId,
        target: NodeId,
        target_unit: &str,
    ) -> Result<(), SynthError> {
        if self.app.graph().depends_on(self.unit, target_unit)? {
            return Ok(());
        }
        Err(self.unresolved(
            from,
            target,
            Some(target_unit.to_string()),
            &format!(
                "unit '{}' does not depend on unit '{}'; add a dependency so it is deployed first",
                self.unit, target_unit
            ),
        ))
    }

    fn unresolved(
        &self,
        from: NodeId,
        target: NodeId,
        to_unit: Option<String>,
        reason: &str,
    ) -> SynthError {
        let tree = self.app.tree();
        let target = if tree.node(target).is_some() {
            tree.path(target)
        } else {
            target.to_string()
        };
        SynthError::UnresolvedReference {
            node: tree.path(from),
            target,
            from_unit: self.unit.to_string(),
            to_unit,
            reason: reason.to_string(),
        }
    }
}

/// Add an exported output to every producing document
fn publish_exports(
    documents: &mut IndexMap<String, TemplateDocument>,
    exports: &ExportTracker,
) -> Result<(), SynthError> {
    let mut export_names: HashSet<String> = documents
        .values()
        .flat_map(|doc| doc.outputs.values())
        .filter_map(|output| output.export.as_ref().map(|e| e.name.clone()))
        .collect();

    for (producer, info) in exports.all_exports() {
        let document = documents
            .get_mut(producer)
            .ok_or_else(|| CoreError::UnknownUnit(producer.to_string()))?;
        if document.outputs.contains_key(&info.output_key)
            || !export_names.insert(info.export_name.clone())
        {
            return Err(CoreError::DuplicateName {
                parent: producer.to_string(),
                name: info.output_key.clone(),
            }
            .into());
        }
        document.outputs.insert(
            info.output_key.clone(),
            OutputEntry {
                value: info.pointer(),
                description: None,
                export: Some(ExportEntry {
                    name: info.export_name.clone(),
                }),
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_core::{CfnResource, OutputSpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn synth(app: &App) -> Result<CloudAssembly, SynthError> {
        Synthesizer::default().synthesize(app)
    }

    #[test]
    fn test_same_unit_references_use_ref_and_get_att() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let topic = app
            .add_resource(unit, "Topic", CfnResource::new("AWS::SNS::Topic"))
            .unwrap();
        app.add_resource(
            unit,
            "Subscription",
            CfnResource::new("AWS::SNS::Subscription")
                .with_property("TopicArn", Reference::to(topic))
                .with_property("Endpoint", Reference::attribute(topic, "Arn")),
        )
        .unwrap();

        let assembly = synth(&app).unwrap();
        let doc = assembly.document("stack").unwrap();
        let topic_id = naming::logical_id(&["Topic"]).unwrap();
        let subscription = doc
            .resource(&naming::logical_id(&["Subscription"]).unwrap())
            .unwrap();

        assert_eq!(
            subscription.properties,
            json!({
                "TopicArn": {"ref": topic_id},
                "Endpoint": {"get-att": [topic_id, "Arn"]},
            })
        );
        assert!(doc.imports.is_empty());
    }

    #[test]
    fn test_forward_reference_resolves() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        // Reference a node that does not exist yet: ids are assigned in
        // declaration order, so the next child gets the next index.
        let upcoming = NodeId::from_index(app.tree().len() + 1);
        app.add_resource(
            unit,
            "Consumer",
            CfnResource::new("AWS::SQS::Queue")
                .with_property("RedrivePolicy", Reference::to(upcoming)),
        )
        .unwrap();
        let dlq = app
            .add_resource(unit, "DeadLetters", CfnResource::new("AWS::SQS::Queue"))
            .unwrap();
        assert_eq!(dlq, upcoming);

        let assembly = synth(&app).unwrap();
        let consumer = assembly
            .document("stack")
            .unwrap()
            .resource(&naming::logical_id(&["Consumer"]).unwrap())
            .unwrap()
            .clone();
        assert_eq!(
            consumer.properties["RedrivePolicy"],
            json!({"ref": naming::logical_id(&["DeadLetters"]).unwrap()})
        );
    }

    #[test]
    fn test_reference_to_construct_is_unresolved() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let group = app.add_construct(unit, "Group").unwrap();
        app.add_resource(
            unit,
            "Queue",
            CfnResource::new("AWS::SQS::Queue").with_property("Name", Reference::to(group)),
        )
        .unwrap();

        match synth(&app) {
            Err(SynthError::UnresolvedReference { node, target, .. }) => {
                assert_eq!(node, "stack/Queue");
                assert_eq!(target, "stack/Group");
            }
            other => panic!("expected UnresolvedReference, got {:?}", other),
        }
    }

    #[test]
    fn test_colliding_logical_ids_fail() {
        // "stack/Bucket/Default" and "stack/Default/Bucket" derive the same id
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let a = app.add_construct(unit, "Bucket").unwrap();
        app.add_resource(a, "Default", CfnResource::new("AWS::S3::Bucket"))
            .unwrap();
        let b = app.add_construct(unit, "Default").unwrap();
        app.add_resource(b, "Bucket", CfnResource::new("AWS::S3::Bucket"))
            .unwrap();

        assert!(matches!(
            synth(&app),
            Err(SynthError::Core(CoreError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn test_invalid_payload_carries_location() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        app.add_resource(unit, "Broken", CfnResource::new("NotAType"))
            .unwrap();

        match synth(&app) {
            Err(SynthError::InvalidPayload { location, .. }) => {
                assert_eq!(location.node.as_deref(), Some("stack/Broken"));
                assert_eq!(location.unit.as_deref(), Some("stack"));
            }
            other => panic!("expected InvalidPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_outputs_and_path_metadata() {
        let mut app = App::new();
        let unit = app
            .add_unit_with_description("stack", Some("state machines".to_string()))
            .unwrap();
        let machine = app
            .add_resource(
                unit,
                "StateMachine",
                CfnResource::new("AWS::StepFunctions::StateMachine"),
            )
            .unwrap();
        app.add_output(
            unit,
            "stateMachineArn",
            OutputSpec::new(Reference::to(machine)).with_description("ARN"),
        )
        .unwrap();

        let synthesizer = Synthesizer::new(
            SynthConfig::default()
                .with_path_metadata(true)
                .with_description_prefix("(formwork)"),
        );
        let assembly = synthesizer.synthesize(&app).unwrap();
        let doc = assembly.document("stack").unwrap();
        let machine_id = naming::logical_id(&["StateMachine"]).unwrap();

        assert_eq!(doc.description.as_deref(), Some("(formwork) state machines"));
        assert_eq!(
            doc.resource(&machine_id).unwrap().metadata,
            Some(ResourceMetadata {
                path: "stack/StateMachine".to_string()
            })
        );
        let output = doc
            .output(&naming::logical_id(&["stateMachineArn"]).unwrap())
            .unwrap();
        assert_eq!(output.value, json!({"ref": machine_id}));
        assert_eq!(output.description.as_deref(), Some("ARN"));
    }

    #[test]
    fn test_same_unit_node_dependencies_are_listed() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let table = app
            .add_resource(unit, "Table", CfnResource::new("AWS::DynamoDB::Table"))
            .unwrap();
        let function = app
            .add_resource(unit, "Function", CfnResource::new("AWS::Lambda::Function"))
            .unwrap();
        app.add_node_dependency(function, table).unwrap();

        let assembly = synth(&app).unwrap();
        let entry = assembly
            .document("stack")
            .unwrap()
            .resource(&naming::logical_id(&["Function"]).unwrap())
            .unwrap()
            .clone();
        assert_eq!(
            entry.depends_on,
            vec![naming::logical_id(&["Table"]).unwrap()]
        );
    }

    #[test]
    fn test_resource_dependency_cycle_fails_synthesis() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let a = app
            .add_resource(unit, "A", CfnResource::new("AWS::SQS::Queue"))
            .unwrap();
        let b = app
            .add_resource(unit, "B", CfnResource::new("AWS::SQS::Queue"))
            .unwrap();

        assert!(matches!(
            app.add_node_dependency(a, a),
            Err(CoreError::CyclicDependency { .. })
        ));
        app.add_node_dependency(a, b).unwrap();
        app.add_node_dependency(b, a).unwrap();

        match synth(&app) {
            Err(SynthError::Core(CoreError::CyclicDependency { cycle })) => {
                assert_eq!(cycle, vec!["stack/A", "stack/B", "stack/A"]);
            }
            other => panic!("expected CyclicDependency, got {:?}", other),
        }
    }
}
