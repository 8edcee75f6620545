//! The advisory registry snapshot cache.
//!
//! Metadata probes cost a subprocess each; the snapshot lets repeated CLI
//! invocations skip them. The snapshot is keyed by the path, modification
//! time, and size of every scannable file in every layer: any mismatch
//! forces a full rescan, never a partial or stale result, and any IO or
//! decode problem is treated as a miss.

use crate::{
    common::error::Result,
    debug, warn,
    host::registry::{
        discovery::{build_registry, candidate_paths},
        PluginDescriptor, Registry, SearchLayer,
    },
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Identity of one scanned file at snapshot time.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheInput {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct RegistrySnapshot {
    inputs: Vec<CacheInput>,
    descriptors: Vec<PluginDescriptor>,
}

/// Stats every scannable file across the layers, in scan order.
pub fn current_inputs(layers: &[SearchLayer]) -> Vec<CacheInput> {
    let mut inputs = Vec::new();
    for layer in layers {
        for path in candidate_paths(&layer.path) {
            if let Ok(metadata) = fs::metadata(&path) {
                if let Ok(modified) = metadata.modified() {
                    inputs.push(CacheInput {
                        path,
                        modified,
                        size: metadata.len(),
                    });
                }
            }
        }
    }
    inputs
}

/// Attempts to restore a registry from a snapshot. Returns None on any
/// mismatch or problem.
pub fn load(cache_path: &Path, layers: &[SearchLayer]) -> Option<Registry> {
    let bytes = fs::read(cache_path).ok()?;
    let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes).ok()?;
    if snapshot.inputs != current_inputs(layers) {
        debug!("registry cache at {} is stale", cache_path.display());
        return None;
    }
    Registry::from_snapshot(snapshot.descriptors).ok()
}

/// Writes a snapshot of a freshly built registry.
pub fn store(cache_path: &Path, layers: &[SearchLayer], registry: &Registry) -> Result<()> {
    let snapshot = RegistrySnapshot {
        inputs: current_inputs(layers),
        descriptors: registry.descriptors().to_vec(),
    };
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(cache_path, serde_json::to_vec(&snapshot)?)?;
    Ok(())
}

/// Builds a registry, going through the snapshot cache when a location is
/// provided. Cache problems are advisories; the scan is the authority.
pub fn build_registry_cached(
    layers: &[SearchLayer],
    cache_path: Option<&Path>,
) -> Result<Registry> {
    if let Some(cache_path) = cache_path {
        if let Some(registry) = load(cache_path, layers) {
            debug!("registry restored from cache at {}", cache_path.display());
            return Ok(registry);
        }
    }
    let registry = build_registry(layers)?;
    if let Some(cache_path) = cache_path {
        if let Err(e) = store(cache_path, layers, &registry) {
            warn!("could not write registry cache {}: {}", cache_path.display(), e);
        }
    }
    Ok(registry)
}
