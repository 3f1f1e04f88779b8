//! The synthesized assembly: rendered documents plus their manifest
//!
//! The manifest is the orchestrator's entry point. It lists every unit in
//! deployment order with the file holding its template, a content digest and
//! the units it depends on (with the declared reason, when one was given).
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "order": ["Roles", "Lambda"],
//!   "units": {
//!     "Roles": { "template": "Roles.template.json", "digest": "…" },
//!     "Lambda": {
//!       "template": "Lambda.template.json",
//!       "digest": "…",
//!       "dependencies": [{ "unit": "Roles", "reason": "needs the role" }]
//!     }
//!   }
//! }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use formwork_core::{ContentDigest, CoreError, UnitGraph};

use crate::document::TemplateDocument;
use crate::error::SynthError;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

/// File name of a unit's template inside the output directory
pub fn template_file_name(unit: &str) -> String {
    format!("{}.template.json", unit)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// Units in deployment order
    pub order: Vec<String>,
    pub units: IndexMap<String, UnitArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitArtifact {
    pub template: String,
    pub digest: ContentDigest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ManifestDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDependency {
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Manifest {
    /// Read a manifest previously written by [`CloudAssembly::write_to`]
    pub fn load(path: &Path) -> Result<Self, SynthError> {
        let content = fs::read_to_string(path).map_err(|e| SynthError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn unit(&self, name: &str) -> Option<&UnitArtifact> {
        self.units.get(name)
    }
}

/// Everything produced by one synthesis run
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    documents: IndexMap<String, TemplateDocument>,
    /// Serialized documents; these exact bytes are digested and written
    rendered: IndexMap<String, String>,
    manifest: Manifest,
}

impl CloudAssembly {
    pub(crate) fn build(
        graph: &UnitGraph,
        order: Vec<String>,
        documents: IndexMap<String, TemplateDocument>,
    ) -> Result<Self, SynthError> {
        let mut rendered = IndexMap::new();
        let mut units = IndexMap::new();

        for unit in &order {
            let document = documents
                .get(unit)
                .ok_or_else(|| CoreError::UnknownUnit(unit.clone()))?;
            let text = document.to_json_pretty()?;
            let digest = ContentDigest::of_str(&text);
            debug!("Unit '{}' digest {}", unit, digest.short());

            let dependencies = graph
                .dependencies_of(unit)?
                .into_iter()
                .map(|edge| ManifestDependency {
                    unit: edge.to,
                    reason: edge.reason,
                })
                .collect();

            units.insert(
                unit.clone(),
                UnitArtifact {
                    template: template_file_name(unit),
                    digest,
                    dependencies,
                },
            );
            rendered.insert(unit.clone(), text);
        }

        Ok(Self {
            documents,
            rendered,
            manifest: Manifest {
                version: MANIFEST_VERSION.to_string(),
                order,
                units,
            },
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Units in deployment order
    pub fn order(&self) -> &[String] {
        &self.manifest.order
    }

    pub fn document(&self, unit: &str) -> Option<&TemplateDocument> {
        self.documents.get(unit)
    }

    pub fn documents(&self) -> impl Iterator<Item = (&str, &TemplateDocument)> {
        self.documents.iter().map(|(unit, doc)| (unit.as_str(), doc))
    }

    /// The exact text written for a unit's template
    pub fn rendered(&self, unit: &str) -> Option<&str> {
        self.rendered.get(unit).map(String::as_str)
    }

    /// Write every template and then the manifest into `dir`
    ///
    /// Each file is written to a temporary file in `dir` and renamed into
    /// place. A manifest left over from an earlier run is removed first and
    /// the new one is written last, so a directory with a manifest always
    /// holds a complete assembly.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, SynthError> {
        fs::create_dir_all(dir).map_err(|e| SynthError::io(dir, e))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            debug!("Removing stale manifest {}", manifest_path.display());
            fs::remove_file(&manifest_path).map_err(|e| SynthError::io(&manifest_path, e))?;
        }

        let mut written = Vec::with_capacity(self.rendered.len() + 1);
        for (unit, text) in &self.rendered {
            let path = dir.join(template_file_name(unit));
            write_atomic(dir, &path, text.as_bytes())?;
            written.push(path);
        }

        let manifest = serde_json::to_string_pretty(&self.manifest)?;
        write_atomic(dir, &manifest_path, manifest.as_bytes())?;
        written.push(manifest_path);

        info!(
            "Wrote {} template(s) and manifest to {}",
            self.rendered.len(),
            dir.display()
        );
        Ok(written)
    }
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), SynthError> {
    let mut file = tempfile::Builder::new()
        .prefix(".formwork-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| SynthError::io(dir, e))?;
    file.write_all(content)
        .and_then(|_| file.flush())
        .map_err(|e| SynthError::io(path, e))?;
    file.persist(path)
        .map_err(|e| SynthError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ResourceEntry;
    use serde_json::json;

    fn assembly() -> CloudAssembly {
        let mut graph = UnitGraph::new();
        graph.add_unit("Roles").unwrap();
        graph.add_unit("Lambda").unwrap();
        graph
            .add_edge("Lambda", "Roles", Some("needs the role".to_string()))
            .unwrap();

        let mut roles = TemplateDocument::default();
        roles.resources.insert(
            "TestRole6C9272DF".to_string(),
            ResourceEntry {
                resource_type: "AWS::IAM::Role".to_string(),
                properties: json!({}),
                depends_on: Vec::new(),
                metadata: None,
            },
        );
        let mut documents = IndexMap::new();
        documents.insert("Roles".to_string(), roles);
        documents.insert("Lambda".to_string(), TemplateDocument::default());

        CloudAssembly::build(
            &graph,
            vec!["Roles".to_string(), "Lambda".to_string()],
            documents,
        )
        .unwrap()
    }

    #[test]
    fn test_manifest_lists_dependencies_with_reasons() {
        let assembly = assembly();
        let manifest = assembly.manifest();

        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.order, vec!["Roles", "Lambda"]);
        assert!(manifest.unit("Roles").unwrap().dependencies.is_empty());
        assert_eq!(
            manifest.unit("Lambda").unwrap().dependencies,
            vec![ManifestDependency {
                unit: "Roles".to_string(),
                reason: Some("needs the role".to_string()),
            }]
        );
        assert_eq!(manifest.unit("Lambda").unwrap().template, "Lambda.template.json");
    }

    #[test]
    fn test_digest_matches_rendered_text() {
        let assembly = assembly();
        let rendered = assembly.rendered("Roles").unwrap();
        assert_eq!(
            assembly.manifest().unit("Roles").unwrap().digest,
            ContentDigest::of_str(rendered)
        );
    }

    #[test]
    fn test_write_replaces_stale_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "stale").unwrap();

        let written = assembly().write_to(dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written.last().unwrap(), &dir.path().join(MANIFEST_FILE));

        let manifest = Manifest::load(&dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.order, vec!["Roles", "Lambda"]);

        // No temporary files are left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
