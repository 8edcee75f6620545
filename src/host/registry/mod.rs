//! Plugin discovery and the resolution registry.
//!
//! Discovery scans an ordered list of search layers (project, user,
//! bundled), extracts a metadata record per candidate, and freezes the
//! result into a [`Registry`]. The registry is built once per process and
//! read-only afterwards; the resolver and executor borrow it.
//!
//! [`Registry`]: ./struct.Registry.html

pub mod cache;
pub mod discovery;

pub use discovery::{build_registry, default_search_layers, SearchLayer};

use crate::{
    common::error::{meta_err, Result},
    host::metadata::{PluginMetadata, PluginMode, PluginRole},
    warn,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything the orchestrator knows about one discovered plugin.
///
/// Immutable after discovery; shared read-only between the resolver and the
/// executor for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Absolute path to the binary or script.
    pub executable_path: PathBuf,

    /// For script plugins, the interpreter that executes them. `None` for
    /// natively executable plugins.
    pub interpreter: Option<PathBuf>,

    /// The plugin's self-description.
    pub metadata: PluginMetadata,

    /// Index of the search layer this plugin came from; smaller is higher
    /// precedence.
    pub priority_layer: usize,

    /// Compiled `metadata.matches`, rebuilt after deserialization.
    #[serde(skip)]
    matchers: Vec<Regex>,
}

impl PluginDescriptor {
    /// Builds a descriptor, compiling the metadata's match patterns.
    pub fn new(
        executable_path: impl Into<PathBuf>,
        interpreter: Option<PathBuf>,
        metadata: PluginMetadata,
        priority_layer: usize,
    ) -> Result<PluginDescriptor> {
        let matchers = metadata.compiled_matchers()?;
        Ok(PluginDescriptor {
            executable_path: executable_path.into(),
            interpreter,
            metadata,
            priority_layer,
            matchers,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn role(&self) -> PluginRole {
        self.metadata.role
    }

    /// Distinguishes natively executable plugins from interpreter-script
    /// plugins; affects spawn argv construction.
    pub fn is_binary(&self) -> bool {
        self.interpreter.is_none()
    }

    pub fn supports_mode(&self, mode: PluginMode) -> bool {
        self.metadata.modes.contains(&mode)
    }

    /// Matches an address text against the declared patterns, returning the
    /// length of the longest matching pattern source. Pattern length is the
    /// resolution tiebreaker: a more specific (longer) pattern outranks a
    /// shorter one.
    pub fn match_strength(&self, text: &str) -> Option<usize> {
        self.matchers
            .iter()
            .zip(self.metadata.matches.iter())
            .filter(|(regex, _)| regex.is_match(text))
            .map(|(_, source)| source.len())
            .max()
    }

    /// Recompiles the matchers after deserialization from a cache snapshot.
    fn recompile(&mut self) -> Result<()> {
        self.matchers = self.metadata.compiled_matchers()?;
        Ok(())
    }

    /// The argv prefix used to invoke this plugin: the interpreter plus
    /// script for scripts, just the executable otherwise.
    pub fn invocation(&self) -> Vec<String> {
        match &self.interpreter {
            Some(interpreter) => vec![
                interpreter.to_string_lossy().into_owned(),
                self.executable_path.to_string_lossy().into_owned(),
            ],
            None => vec![self.executable_path.to_string_lossy().into_owned()],
        }
    }
}

impl PartialEq for PluginDescriptor {
    fn eq(&self, other: &PluginDescriptor) -> bool {
        // Compiled matchers are derived state and excluded.
        self.executable_path == other.executable_path
            && self.interpreter == other.interpreter
            && self.metadata == other.metadata
            && self.priority_layer == other.priority_layer
    }
}

/// The frozen index of discovered plugins.
///
/// Holds the descriptors in deterministic resolution order (layer by layer,
/// paths sorted within a layer) plus a name index. Within one layer names
/// are unique; across layers the higher-priority layer wins and suppresses
/// the rest.
#[derive(Debug, PartialEq)]
pub struct Registry {
    descriptors: Vec<PluginDescriptor>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Freezes a list of descriptors (already in layer-then-path order)
    /// into a registry, applying cross-layer name suppression.
    pub fn from_descriptors(candidates: Vec<PluginDescriptor>) -> Registry {
        let mut descriptors: Vec<PluginDescriptor> = Vec::with_capacity(candidates.len());
        let mut by_name = HashMap::new();
        for descriptor in candidates {
            if let Some(&existing) = by_name.get(descriptor.name()) {
                let existing: &PluginDescriptor = &descriptors[existing];
                warn!(
                    "plugin '{}' from {} is shadowed by {}",
                    descriptor.name(),
                    descriptor.executable_path.display(),
                    existing.executable_path.display(),
                );
                continue;
            }
            by_name.insert(descriptor.name().to_string(), descriptors.len());
            descriptors.push(descriptor);
        }
        Registry {
            descriptors,
            by_name,
        }
    }

    /// Looks a plugin up by name.
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    /// Iterates descriptors in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Lists the plugins claiming a profile namespace, ordered by priority
    /// layer. Namespace ownership is declared through plugin metadata,
    /// never hard-coded.
    pub fn namespace_claimants(&self, namespace: &str) -> Vec<&PluginDescriptor> {
        let mut claimants: Vec<&PluginDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| d.metadata.namespace.as_ref().map(|n| n.as_str()) == Some(namespace))
            .collect();
        claimants.sort_by_key(|d| d.priority_layer);
        claimants
    }

    /// Finds the single protocol plugin owning a profile namespace. Two
    /// claimants in the same layer are an error; across layers the
    /// higher-priority one wins.
    pub fn namespace_owner(&self, namespace: &str) -> Result<Option<&PluginDescriptor>> {
        let claimants = self.namespace_claimants(namespace);
        match claimants.len() {
            0 => Ok(None),
            1 => Ok(Some(claimants[0])),
            _ => {
                if claimants[0].priority_layer == claimants[1].priority_layer {
                    meta_err(format!(
                        "namespace '{}' is claimed by both '{}' and '{}'",
                        namespace,
                        claimants[0].name(),
                        claimants[1].name(),
                    ))
                } else {
                    Ok(Some(claimants[0]))
                }
            }
        }
    }

    /// Restores a registry from deserialized descriptors, recompiling the
    /// match patterns.
    pub(crate) fn from_snapshot(mut descriptors: Vec<PluginDescriptor>) -> Result<Registry> {
        for descriptor in &mut descriptors {
            descriptor.recompile()?;
        }
        Ok(Registry::from_descriptors(descriptors))
    }

    /// Serializable view of the descriptor list.
    pub(crate) fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }
}

/// Convenience constructor used by tests and embedders that assemble a
/// registry without touching the filesystem.
pub fn registry_from_metadata(
    entries: Vec<(PathBuf, Option<PathBuf>, PluginMetadata, usize)>,
) -> Result<Registry> {
    let mut descriptors = Vec::with_capacity(entries.len());
    for (path, interpreter, metadata, layer) in entries {
        descriptors.push(PluginDescriptor::new(path, interpreter, metadata, layer)?);
    }
    descriptors.sort_by(|a, b| {
        (a.priority_layer, &a.executable_path).cmp(&(b.priority_layer, &b.executable_path))
    });
    Ok(Registry::from_descriptors(descriptors))
}

/// Returns true when the directory entry name is reserved and must never be
/// probed: compiled caches, editor leftovers, hidden files. Uses the final
/// path component only.
pub fn is_reserved_name(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return true,
    };
    if name.starts_with('.') || name.ends_with('~') || name == "__pycache__" {
        return true;
    }
    matches!(
        Path::new(name).extension().and_then(|e| e.to_str()),
        Some("pyc") | Some("pyo") | Some("tmp") | Some("bak") | Some("swp")
    )
}
