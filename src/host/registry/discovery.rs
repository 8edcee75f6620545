//! Plugin discovery: scanning search layers and extracting metadata.

use crate::{
    common::{
        error::{meta_err, Result},
        util::read_prefix,
    },
    debug, trace, warn,
    host::{
        metadata::{self, PluginMetadata},
        registry::{is_reserved_name, PluginDescriptor, Registry},
    },
};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

/// The metadata flag native plugins respond to.
pub const META_FLAG: &str = "--jn-meta";

/// File-name prefix marking a native executable as a metadata-exposing
/// plugin. Executables without the prefix are never probed.
pub const NATIVE_PLUGIN_PREFIX: &str = "jn-";

/// Bound on a `--jn-meta` response, in bytes.
pub const META_OUTPUT_LIMIT: usize = 1024 * 1024;

/// Wall-clock bound on a metadata probe.
pub const META_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the script prefix searched for a metadata header block.
pub const SCRIPT_HEADER_LIMIT: usize = 64 * 1024;

/// One directory in the plugin search path.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLayer {
    /// Human-readable layer name: `project`, `user`, `bundled`, or a
    /// caller-supplied label for extra `--plugin-dir` layers.
    pub name: String,

    /// The directory scanned (non-recursively).
    pub path: PathBuf,
}

impl SearchLayer {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> SearchLayer {
        SearchLayer {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Walks up from the working directory looking for a `.jn` project
/// directory.
pub fn find_project_dir() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    for dir in cwd.ancestors() {
        let candidate = dir.join(".jn");
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    None
}

/// The root of the distribution installation: `$JN_HOME` when set, the
/// directory containing the running executable otherwise.
pub fn jn_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("JN_HOME") {
        return Some(PathBuf::from(home));
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
}

/// Builds the default search path: project, then user, then bundled.
///
/// Layers whose directory does not exist are kept; the scan reports them as
/// advisories and moves on, so a fresh installation with no plugin
/// directories still produces an (empty) registry.
pub fn default_search_layers() -> Vec<SearchLayer> {
    let mut layers = Vec::new();
    if let Some(project) = find_project_dir() {
        layers.push(SearchLayer::new("project", project.join("plugins")));
    }
    if let Some(home) = std::env::var_os("HOME") {
        layers.push(SearchLayer::new(
            "user",
            Path::new(&home).join(".jn").join("plugins"),
        ));
    }
    if let Some(jn_home) = jn_home() {
        layers.push(SearchLayer::new("bundled", jn_home.join("plugins")));
    }
    layers
}

/// Scans the search layers and freezes the result.
///
/// Never fails outright: unreadable directories and broken candidates are
/// demoted to advisories and skipped. An empty registry is not an error;
/// resolution against it will be.
pub fn build_registry(layers: &[SearchLayer]) -> Result<Registry> {
    let mut descriptors = Vec::new();
    for (index, layer) in layers.iter().enumerate() {
        descriptors.extend(scan_layer(index, layer));
    }
    let registry = Registry::from_descriptors(descriptors);
    debug!(
        "registry frozen with {} plugin(s) from {} layer(s)",
        registry.len(),
        layers.len()
    );
    Ok(registry)
}

/// Lists the scannable entries of a directory, sorted for determinism.
/// Reserved names are filtered here so the cache key and the scan agree on
/// the input set.
pub(crate) fn candidate_paths(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("skipping plugin directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| !is_reserved_name(path))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    paths
}

/// Scans one layer into descriptors, applying the in-layer duplicate-name
/// tiebreak.
fn scan_layer(index: usize, layer: &SearchLayer) -> Vec<PluginDescriptor> {
    let mut found: Vec<PluginDescriptor> = Vec::new();
    for path in candidate_paths(&layer.path) {
        let descriptor = match classify_candidate(&path) {
            Some(Candidate::Native) => match probe_native(&path, META_PROBE_TIMEOUT) {
                Ok(metadata) => PluginDescriptor::new(&path, None, metadata, index),
                Err(e) => {
                    warn!("skipping native plugin {}: {}", path.display(), e);
                    continue;
                }
            },
            Some(Candidate::Script(interpreter)) => match parse_script(&path) {
                Ok(Some(metadata)) => {
                    PluginDescriptor::new(&path, Some(PathBuf::from(interpreter)), metadata, index)
                }
                Ok(None) => {
                    trace!("{} has no metadata header", path.display());
                    continue;
                }
                Err(e) => {
                    warn!("skipping script plugin {}: {}", path.display(), e);
                    continue;
                }
            },
            None => continue,
        };
        match descriptor {
            Ok(descriptor) => {
                trace!(
                    "layer {} ({}): discovered plugin '{}' at {}",
                    index,
                    layer.name,
                    descriptor.name(),
                    path.display()
                );
                found.push(descriptor);
            }
            Err(e) => {
                warn!("skipping plugin {}: {}", path.display(), e);
            }
        };
    }
    dedup_layer(found)
}

enum Candidate {
    Native,
    Script(&'static str),
}

/// Decides how a directory entry should be treated: a native plugin to
/// probe, a script to header-parse, or nothing.
fn classify_candidate(path: &Path) -> Option<Candidate> {
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        if let Some(interpreter) = metadata::interpreter_for(extension) {
            return Some(Candidate::Script(interpreter));
        }
    }
    let name = path.file_name()?.to_str()?;
    if name.starts_with(NATIVE_PLUGIN_PREFIX) && is_executable(path) {
        return Some(Candidate::Native);
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

/// In-layer duplicate-name resolution: the candidate with the larger
/// pattern set wins; on a tie the lexicographically smaller path (which
/// comes first in the sorted scan) is kept.
fn dedup_layer(found: Vec<PluginDescriptor>) -> Vec<PluginDescriptor> {
    let mut winners: Vec<PluginDescriptor> = Vec::with_capacity(found.len());
    for challenger in found {
        match winners
            .iter_mut()
            .find(|d| d.name() == challenger.name())
        {
            None => winners.push(challenger),
            Some(winner) => {
                if challenger.metadata.matches.len() > winner.metadata.matches.len() {
                    warn!(
                        "duplicate plugin name '{}': {} replaces {}",
                        challenger.name(),
                        challenger.executable_path.display(),
                        winner.executable_path.display(),
                    );
                    *winner = challenger;
                } else {
                    warn!(
                        "duplicate plugin name '{}': keeping {}, ignoring {}",
                        winner.name(),
                        winner.executable_path.display(),
                        challenger.executable_path.display(),
                    );
                }
            }
        }
    }
    winners
}

/// Invokes a native plugin with the metadata flag and parses its response.
///
/// Standard output is read to a bounded size on a separate thread while the
/// probe loop enforces the wall-clock timeout; a plugin that hangs or
/// floods is killed and skipped.
pub fn probe_native(path: &Path, timeout: Duration) -> Result<PluginMetadata> {
    let mut child = Command::new(path)
        .arg(META_FLAG)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            crate::common::error::ErrorKind::PluginMetadataError(format!(
                "failed to invoke {}: {}",
                META_FLAG, e
            ))
        })?;

    let stdout = child.stdout.take().expect("stdout requested");
    let reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stdout
            .take(META_OUTPUT_LIMIT as u64)
            .read_to_end(&mut buffer);
        buffer
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return meta_err(format!(
                        "metadata probe did not finish within {:?}",
                        timeout
                    ));
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    };

    let buffer = reader
        .join()
        .map_err(|_| crate::common::error::ErrorKind::PluginMetadataError(
            "metadata reader thread panicked".to_string(),
        ))?;
    if !status.success() {
        return meta_err(format!("metadata probe exited with {}", status));
    }
    PluginMetadata::from_json(&buffer)
}

/// Extracts declarative metadata from a script's header block.
fn parse_script(path: &Path) -> Result<Option<PluginMetadata>> {
    let prefix = read_prefix(path, SCRIPT_HEADER_LIMIT)?;
    let text = String::from_utf8_lossy(&prefix);
    metadata::parse_script_header(&text)
}
