//! Construct tree: the registry of every declared node
//!
//! Nodes live in an arena owned by [`ConstructTree`] and are addressed by
//! [`NodeId`]. Each node owns the ordered list of its children; the parent link
//! is a plain index used only to derive paths and find the enclosing unit.
//!
//! ```text
//! <root>
//! ├── role-stack            (unit)
//! │   └── TestRole
//! │       └── Resource      (resource)
//! └── assertions            (unit)
//!     └── Check             (resource)
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::error::CoreError;
use crate::resource::{OutputSpec, Resource};

/// Separator used when joining node names into a path
pub const PATH_SEPARATOR: char = '/';

/// Index of a node inside its [`ConstructTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        NodeId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node represents
#[derive(Debug)]
pub enum NodeKind {
    /// The application root; exactly one per tree
    Root,
    /// A deployable unit (stack)
    Unit { description: Option<String> },
    /// Grouping element without a payload
    Construct,
    /// A resource rendered into the unit's template
    Resource(Box<dyn Resource>),
    /// A value published in the unit's template outputs
    Output(OutputSpec),
}

impl NodeKind {
    pub fn unit() -> Self {
        NodeKind::Unit { description: None }
    }

    pub fn resource(resource: impl Resource + 'static) -> Self {
        NodeKind::Resource(Box::new(resource))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, NodeKind::Unit { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Unit { .. } => "unit",
            NodeKind::Construct => "construct",
            NodeKind::Resource(_) => "resource",
            NodeKind::Output(_) => "output",
        }
    }
}

/// A single declared node
#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
    /// Resource-level ordering hints (this node is created after these)
    depends_on: Vec<NodeId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn depends_on(&self) -> &[NodeId] {
        &self.depends_on
    }

    pub fn resource(&self) -> Option<&dyn Resource> {
        match &self.kind {
            NodeKind::Resource(resource) => Some(resource.as_ref()),
            _ => None,
        }
    }
}

/// Arena-backed tree of constructs rooted at the application
#[derive(Debug)]
pub struct ConstructTree {
    nodes: Vec<Node>,
}

impl Default for ConstructTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Root,
                depends_on: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Like [`ConstructTree::node`] but reports unknown ids as an error
    pub fn get(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.node(id)
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()))
    }

    /// Add a named child under `parent`
    ///
    /// Units may only be placed directly under the root, and every other node
    /// must live inside a unit.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> Result<NodeId, CoreError> {
        let name = name.into();
        validate_name(&name)?;
        if kind.is_unit() {
            validate_unit_name(&name)?;
        }

        let parent_node = self.get(parent)?;
        let parent_is_root = matches!(parent_node.kind, NodeKind::Root);
        if kind.is_unit() != parent_is_root {
            let reason = if kind.is_unit() {
                "units must be declared directly under the application"
            } else {
                "constructs must be declared inside a unit"
            };
            return Err(CoreError::InvalidPlacement {
                path: self.child_path(parent, &name),
                reason: reason.to_string(),
            });
        }

        // Resources may carry children (nested policies and the like), outputs may not
        if matches!(parent_node.kind, NodeKind::Output(_)) {
            return Err(CoreError::InvalidPlacement {
                path: self.child_path(parent, &name),
                reason: "outputs cannot have children".to_string(),
            });
        }

        if self.child(parent, &name).is_some() {
            return Err(CoreError::DuplicateName {
                parent: self.display_path(parent),
                name,
            });
        }

        let id = NodeId(self.nodes.len());
        debug!(
            "Registering {} '{}' under {}",
            kind.label(),
            name,
            self.display_path(parent)
        );
        self.nodes.push(Node {
            name,
            parent: Some(parent),
            children: Vec::new(),
            kind,
            depends_on: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Record that resource `from` must be created after `to`
    ///
    /// A node depending on itself is rejected here; longer cycles are caught
    /// by [`ConstructTree::check_node_dependencies`].
    pub fn add_node_dependency(&mut self, from: NodeId, to: NodeId) -> Result<(), CoreError> {
        self.get(to)?;
        if from == to {
            let path = self.path(from);
            return Err(CoreError::CyclicDependency {
                cycle: vec![path.clone(), path],
            });
        }
        let node = self
            .nodes
            .get_mut(from.0)
            .ok_or_else(|| CoreError::UnknownNode(from.to_string()))?;
        if !node.depends_on.contains(&to) {
            node.depends_on.push(to);
        }
        Ok(())
    }

    /// Verify the node dependencies inside the subtree of `start` are acyclic
    ///
    /// Only edges between nodes of the subtree are followed. The reported
    /// cycle lists node paths and starts and ends at the same node.
    pub fn check_node_dependencies(&self, start: NodeId) -> Result<(), CoreError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Gray,
            Black,
        }

        fn visit(
            tree: &ConstructTree,
            members: &HashSet<NodeId>,
            id: NodeId,
            colors: &mut HashMap<NodeId, Color>,
            stack: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            colors.insert(id, Color::Gray);
            stack.push(id);
            for &next in &tree.nodes[id.0].depends_on {
                if !members.contains(&next) {
                    continue;
                }
                match colors.get(&next).copied() {
                    None => {
                        if let Some(cycle) = visit(tree, members, next, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                }
            }
            stack.pop();
            colors.insert(id, Color::Black);
            None
        }

        let members: HashSet<NodeId> = self.walk_from(start).map(|(id, _)| id).collect();
        let mut colors = HashMap::new();
        for (id, _) in self.walk_from(start) {
            if colors.contains_key(&id) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, &members, id, &mut colors, &mut stack) {
                return Err(CoreError::CyclicDependency {
                    cycle: cycle.into_iter().map(|n| self.path(n)).collect(),
                });
            }
        }
        Ok(())
    }

    /// Swap the payload of a resource node, returning the previous one
    ///
    /// Lets a loader declare every node first and attach payloads that
    /// reference later nodes afterwards.
    pub fn replace_resource(
        &mut self,
        id: NodeId,
        resource: Box<dyn Resource>,
    ) -> Result<Box<dyn Resource>, CoreError> {
        let path = self.path(id);
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()))?;
        match &mut node.kind {
            NodeKind::Resource(current) => Ok(std::mem::replace(current, resource)),
            _ => Err(CoreError::NotAResource(path)),
        }
    }

    /// Direct child of `parent` named `name`
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)?
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].name == name)
    }

    /// Names from the first level below the root down to `id`
    pub fn components(&self, id: NodeId) -> Vec<&str> {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.node(node_id) else {
                break;
            };
            if node.parent.is_none() {
                break;
            }
            components.push(node.name.as_str());
            current = node.parent;
        }
        components.reverse();
        components
    }

    /// `/`-joined path of a node; the root has the empty path
    pub fn path(&self, id: NodeId) -> String {
        self.components(id).join("/")
    }

    fn display_path(&self, id: NodeId) -> String {
        let path = self.path(id);
        if path.is_empty() {
            "<root>".to_string()
        } else {
            path
        }
    }

    fn child_path(&self, parent: NodeId, name: &str) -> String {
        let parent_path = self.path(parent);
        if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", parent_path, PATH_SEPARATOR, name)
        }
    }

    /// Look a node up by its full path
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        if path.is_empty() {
            return Some(current);
        }
        for segment in path.split(PATH_SEPARATOR) {
            current = self.child(current, segment)?;
        }
        Some(current)
    }

    /// Nearest unit at or above `id`
    pub fn unit_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id)?;
            if node.kind.is_unit() {
                return Some(node_id);
            }
            current = node.parent;
        }
        None
    }

    /// Units in declaration order
    pub fn units(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .filter(|&id| self.nodes[id.0].kind.is_unit())
    }

    /// Pre-order traversal of the whole tree, starting at the root
    pub fn walk(&self) -> Walk<'_> {
        self.walk_from(self.root())
    }

    /// Pre-order traversal of the subtree rooted at `start`
    ///
    /// Parents are yielded before their children and siblings in insertion
    /// order.
    pub fn walk_from(&self, start: NodeId) -> Walk<'_> {
        let stack = if self.node(start).is_some() {
            vec![start]
        } else {
            Vec::new()
        };
        Walk { tree: self, stack }
    }
}

/// Lazy pre-order iterator over a [`ConstructTree`]
pub struct Walk<'a> {
    tree: &'a ConstructTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = &self.tree.nodes[id.0];
        self.stack.extend(node.children.iter().rev().copied());
        Some((id, node))
    }
}

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
            reason: "names must not be empty".to_string(),
        });
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
            reason: format!("names must not contain '{}'", PATH_SEPARATOR),
        });
    }
    Ok(())
}

/// Unit names become file names, so they are limited to a portable set
fn validate_unit_name(name: &str) -> Result<(), CoreError> {
    let portable = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if let Some(bad) = name.chars().find(|&c| !portable(c)) {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
            reason: format!(
                "unit names may only contain letters, digits, '-', '_' and '.', found {:?}",
                bad
            ),
        });
    }
    if name.chars().all(|c| c == '.') {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
            reason: "unit names must not consist of dots only".to_string(),
        });
    }
    Ok(())
}
