//! Construct tree, unit dependency graph and deferred values for formwork

pub mod app;
pub mod digest;
pub mod error;
pub mod graph;
pub mod naming;
pub mod resource;
pub mod tree;
pub mod value;

pub use app::App;
pub use digest::ContentDigest;
pub use error::CoreError;
pub use graph::{DependencyEdge, UnitGraph};
pub use resource::{CfnResource, OutputSpec, PayloadError, Resource};
pub use tree::{ConstructTree, Node, NodeId, NodeKind};
pub use value::{PropertyValue, Reference};
