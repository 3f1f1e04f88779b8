//! Synthesis of formwork applications into deployable template documents
//!
//! ```
//! use formwork_core::{App, CfnResource, Reference};
//! use formwork_synth::synthesize;
//!
//! let mut app = App::new();
//! let roles = app.add_unit("Roles").unwrap();
//! let lambda = app.add_unit("Lambda").unwrap();
//! let role = app.add_resource(roles, "TestRole", CfnResource::new("AWS::IAM::Role")).unwrap();
//! app.add_resource(
//!     lambda,
//!     "Function",
//!     CfnResource::new("AWS::Lambda::Function").with_property("Role", Reference::attribute(role, "Arn")),
//! )
//! .unwrap();
//! app.add_dependency(lambda, roles, Some("needs the role")).unwrap();
//!
//! let assembly = synthesize(&app).unwrap();
//! assert_eq!(assembly.order(), ["Roles", "Lambda"]);
//! assert_eq!(assembly.document("Lambda").unwrap().imports.len(), 1);
//! ```

pub mod assembly;
pub mod document;
pub mod error;
pub mod exports;
pub mod inspect;
pub mod synthesizer;

pub use assembly::{CloudAssembly, Manifest, ManifestDependency, UnitArtifact};
pub use document::TemplateDocument;
pub use error::{ErrorLocation, SynthError};
pub use synthesizer::{SynthConfig, Synthesizer};

use formwork_core::App;

/// Synthesize with the default configuration
pub fn synthesize(app: &App) -> Result<CloudAssembly, SynthError> {
    Synthesizer::default().synthesize(app)
}
