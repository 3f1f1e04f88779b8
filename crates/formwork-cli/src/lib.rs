//! Library interface for formwork CLI components

pub mod definition;
pub mod settings;

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use formwork_core::{App, NodeKind, Resource};
use formwork_synth::{CloudAssembly, SynthConfig, Synthesizer};

pub use definition::{load_app, AppDefinition, DefinitionError};
pub use settings::Settings;

/// Load an application definition, with the file name in any error
pub fn load(app_file: &Path) -> Result<App> {
    load_app(app_file)
        .with_context(|| format!("Failed to load application from {}", app_file.display()))
}

/// Synthesize `app_file` and write the assembly into `output_dir`
pub fn handle_synth(
    app_file: &Path,
    output_dir: &Path,
    config: SynthConfig,
) -> Result<CloudAssembly> {
    let app = load(app_file)?;
    let assembly = Synthesizer::new(config)
        .synthesize(&app)
        .context("Synthesis failed")?;
    assembly
        .write_to(output_dir)
        .with_context(|| format!("Failed to write assembly to {}", output_dir.display()))?;

    for unit in assembly.order() {
        if let Some(artifact) = assembly.manifest().unit(unit) {
            info!("  {} -> {} ({})", unit, artifact.template, artifact.digest.short());
        }
    }
    Ok(assembly)
}

/// Synthesize in memory only, returning the number of units
pub fn handle_validate(app_file: &Path, config: SynthConfig) -> Result<usize> {
    let app = load(app_file)?;
    let assembly = Synthesizer::new(config)
        .synthesize(&app)
        .context("Synthesis failed")?;
    Ok(assembly.order().len())
}

/// Deployment order with each unit's dependencies and their reasons
pub fn render_order(app: &App) -> Result<String> {
    let graph = app.graph();
    let mut out = String::new();
    for (position, unit) in graph.topological_order()?.iter().enumerate() {
        writeln!(out, "{}. {}", position + 1, unit)?;
        for edge in graph.dependencies_of(unit)? {
            match edge.reason {
                Some(reason) => writeln!(out, "   after {} ({})", edge.to, reason)?,
                None => writeln!(out, "   after {}", edge.to)?,
            }
        }
    }
    Ok(out)
}

/// Every unit with the paths of the nodes it contains
pub fn render_listing(app: &App) -> String {
    let tree = app.tree();
    let mut out = String::new();
    for unit in tree.units() {
        for (id, node) in tree.walk_from(unit) {
            let depth = tree.components(id).len() - 1;
            let label = match node.kind() {
                NodeKind::Resource(resource) => format!(" [{}]", resource.resource_type()),
                NodeKind::Output(_) => " [output]".to_string(),
                _ => String::new(),
            };
            // Writing to a String cannot fail
            let _ = writeln!(out, "{}{}{}", "  ".repeat(depth), tree.path(id), label);
        }
    }
    out
}
