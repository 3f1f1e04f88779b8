//! The application aggregate: one construct tree plus its unit graph

use tracing::debug;

use crate::error::CoreError;
use crate::graph::UnitGraph;
use crate::resource::{OutputSpec, Resource};
use crate::tree::{ConstructTree, NodeId, NodeKind};
use crate::value::Reference;

/// Everything declared before synthesis
///
/// ```
/// use formwork_core::{App, CfnResource};
///
/// let mut app = App::new();
/// let roles = app.add_unit("roles").unwrap();
/// let consumer = app.add_unit("consumer").unwrap();
/// app.add_resource(roles, "TestRole", CfnResource::new("AWS::IAM::Role")).unwrap();
/// app.add_dependency(consumer, roles, Some("needs the role")).unwrap();
///
/// assert_eq!(app.graph().topological_order().unwrap(), vec!["roles", "consumer"]);
/// ```
#[derive(Debug, Default)]
pub struct App {
    tree: ConstructTree,
    graph: UnitGraph,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &ConstructTree {
        &self.tree
    }

    pub fn graph(&self) -> &UnitGraph {
        &self.graph
    }

    /// Declare a new deployable unit
    pub fn add_unit(&mut self, name: impl Into<String>) -> Result<NodeId, CoreError> {
        self.add_unit_with_description(name, None)
    }

    pub fn add_unit_with_description(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<NodeId, CoreError> {
        let name = name.into();
        if self.graph.contains(&name) {
            return Err(CoreError::DuplicateUnit(name));
        }
        let id = self
            .tree
            .add_child(self.tree.root(), name.clone(), NodeKind::Unit { description })?;
        self.graph.add_unit(name)?;
        Ok(id)
    }

    /// Declare a payload-less grouping construct
    pub fn add_construct(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
    ) -> Result<NodeId, CoreError> {
        self.tree.add_child(parent, name, NodeKind::Construct)
    }

    pub fn add_resource(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        resource: impl Resource + 'static,
    ) -> Result<NodeId, CoreError> {
        self.tree.add_child(parent, name, NodeKind::resource(resource))
    }

    /// Like [`App::add_resource`] for payloads that are already boxed
    pub fn add_boxed_resource(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        resource: Box<dyn Resource>,
    ) -> Result<NodeId, CoreError> {
        self.tree.add_child(parent, name, NodeKind::Resource(resource))
    }

    /// Replace the payload of an existing resource node
    pub fn replace_resource(
        &mut self,
        node: NodeId,
        resource: impl Resource + 'static,
    ) -> Result<(), CoreError> {
        self.tree.replace_resource(node, Box::new(resource))?;
        Ok(())
    }

    pub fn add_output(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        output: OutputSpec,
    ) -> Result<NodeId, CoreError> {
        self.tree.add_child(parent, name, NodeKind::Output(output))
    }

    /// Declare that `unit` must be deployed after `depends_on`
    pub fn add_dependency(
        &mut self,
        unit: NodeId,
        depends_on: NodeId,
        reason: Option<&str>,
    ) -> Result<(), CoreError> {
        let from = self.unit_name(unit)?.to_string();
        let to = self.unit_name(depends_on)?.to_string();
        self.graph.add_edge(&from, &to, reason.map(str::to_string))
    }

    pub fn remove_dependency(
        &mut self,
        unit: NodeId,
        depends_on: NodeId,
    ) -> Result<bool, CoreError> {
        let from = self.unit_name(unit)?.to_string();
        let to = self.unit_name(depends_on)?.to_string();
        debug!("Removing dependency '{}' -> '{}'", from, to);
        self.graph.remove_edge(&from, &to)
    }

    /// Order two resources: `from` is created after `to`
    pub fn add_node_dependency(&mut self, from: NodeId, to: NodeId) -> Result<(), CoreError> {
        self.tree.add_node_dependency(from, to)
    }

    /// Deferred reference to the primary identifier of `node`
    pub fn reference(&self, node: NodeId) -> Reference {
        Reference::to(node)
    }

    /// Deferred reference to attribute `name` of `node`
    pub fn attribute(&self, node: NodeId, name: &str) -> Reference {
        Reference::attribute(node, name)
    }

    /// Name of a unit node
    pub fn unit_name(&self, unit: NodeId) -> Result<&str, CoreError> {
        let node = self.tree.get(unit)?;
        if !node.kind().is_unit() {
            return Err(CoreError::NotAUnit(self.tree.path(unit)));
        }
        Ok(node.name())
    }

    /// Unit node by name
    pub fn unit(&self, name: &str) -> Option<NodeId> {
        self.tree
            .units()
            .find(|&id| self.tree.node(id).map(|n| n.name()) == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CfnResource;

    #[test]
    fn test_dependencies_require_units() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let other = app.add_unit("other").unwrap();
        let role = app
            .add_resource(unit, "Role", CfnResource::new("AWS::IAM::Role"))
            .unwrap();

        assert!(matches!(
            app.add_dependency(other, role, None),
            Err(CoreError::NotAUnit(_))
        ));
        assert!(app.add_dependency(other, unit, None).is_ok());
    }

    #[test]
    fn test_duplicate_units_fail() {
        let mut app = App::new();
        app.add_unit("stack").unwrap();
        assert_eq!(
            app.add_unit("stack").unwrap_err(),
            CoreError::DuplicateUnit("stack".to_string())
        );
    }

    #[test]
    fn test_replace_resource_payload() {
        let mut app = App::new();
        let unit = app.add_unit("stack").unwrap();
        let queue = app
            .add_resource(unit, "Queue", CfnResource::new("AWS::SQS::Queue"))
            .unwrap();
        let dlq = app
            .add_resource(unit, "DeadLetters", CfnResource::new("AWS::SQS::Queue"))
            .unwrap();

        app.replace_resource(
            queue,
            CfnResource::new("AWS::SQS::Queue")
                .with_property("RedrivePolicy", Reference::to(dlq)),
        )
        .unwrap();
        let payload = app.tree().get(queue).unwrap().resource().unwrap();
        assert_eq!(payload.declared_references(), Ok(vec![Reference::to(dlq)]));

        assert!(matches!(
            app.replace_resource(unit, CfnResource::new("AWS::SQS::Queue")),
            Err(CoreError::NotAResource(_))
        ));
    }

    #[test]
    fn test_unit_lookup() {
        let mut app = App::new();
        let a = app.add_unit("a").unwrap();
        let b = app.add_unit("b").unwrap();
        assert_eq!(app.unit("b"), Some(b));
        assert_eq!(app.unit("a"), Some(a));
        assert_eq!(app.unit("c"), None);
        assert_eq!(app.unit_name(a).unwrap(), "a");
    }
}
