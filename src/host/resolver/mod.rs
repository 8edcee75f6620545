//! Address resolution.
//!
//! The resolver turns a raw address string plus a frozen [`Registry`] into
//! an [`ExecutionPlan`]: which plugins run, in what order, in which modes,
//! with which configuration, and how their standard I/O is wired.
//!
//! Selection rules are evaluated in a fixed order (format override, profile
//! namespace, URL scheme, file extension, stdio fallback) and are
//! *mode-aware*: a plugin that matches an address but does not support the
//! required mode is skipped in favor of the next candidate down the
//! priority order, with a fallback notice.
//!
//! [`Registry`]: ../registry/struct.Registry.html
//! [`ExecutionPlan`]: ./plan/struct.ExecutionPlan.html

pub mod plan;
pub mod template;

pub use plan::{ExecutionPlan, Stage, StdinSource, StdoutSink};
pub use template::TemplateContext;

use crate::{
    common::error::{meta_err, ErrorKind, Result},
    host::{
        address::{Address, AddressKind, Compression},
        configuration::EnvMod,
        metadata::{PluginMode, PluginRole},
        registry::{discovery, PluginDescriptor, Registry},
    },
    note,
};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Whether the pipeline reads records out of the address or writes records
/// into it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// The mode the endpoint plugin must support.
    fn required_mode(self) -> PluginMode {
        match self {
            Direction::Read => PluginMode::Read,
            Direction::Write => PluginMode::Write,
        }
    }
}

/// Resolves profile namespaces to the plugins claiming them.
///
/// The default implementation is backed by registry metadata; tests swap in
/// synthetic sources.
pub trait ProfileSource<'r> {
    /// Plugins claiming the namespace, ordered by priority layer.
    fn claimants(&self, namespace: &str) -> Vec<&'r PluginDescriptor>;
}

/// The metadata-driven [`ProfileSource`]: a namespace belongs to whichever
/// plugins declare it.
///
/// [`ProfileSource`]: ./trait.ProfileSource.html
pub struct RegistryProfiles<'r> {
    registry: &'r Registry,
}

impl<'r> RegistryProfiles<'r> {
    pub fn new(registry: &'r Registry) -> RegistryProfiles<'r> {
        RegistryProfiles { registry }
    }
}

impl<'r> ProfileSource<'r> for RegistryProfiles<'r> {
    fn claimants(&self, namespace: &str) -> Vec<&'r PluginDescriptor> {
        self.registry.namespace_claimants(namespace)
    }
}

/// The name of the NDJSON identity plugin, the stdio fallback when no
/// format override is given.
pub const IDENTITY_PLUGIN: &str = "ndjson";

/// The address resolver.
///
/// Configured once per invocation with the registry, the template bindings,
/// and the ambient directories, then used to resolve any number of
/// addresses.
pub struct Resolver<'r> {
    registry: &'r Registry,
    template: TemplateContext,
    max_stages: usize,
    cwd: PathBuf,
    home: Option<PathBuf>,
    project_dir: Option<PathBuf>,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry) -> Resolver<'r> {
        Resolver {
            registry,
            template: TemplateContext::new(),
            max_stages: 16,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home: discovery::jn_home(),
            project_dir: discovery::find_project_dir(),
        }
    }

    pub fn with_template(mut self, template: TemplateContext) -> Resolver<'r> {
        self.template = template;
        self
    }

    pub fn with_max_stages(mut self, max_stages: usize) -> Resolver<'r> {
        self.max_stages = max_stages;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Resolver<'r> {
        self.cwd = cwd.into();
        self
    }

    /// Resolves an address into an execution plan.
    pub fn resolve(
        &self,
        raw: &str,
        direction: Direction,
        profiles: &dyn ProfileSource<'r>,
    ) -> Result<ExecutionPlan<'r>> {
        let stages = self.resolve_stages(raw, direction, profiles)?;
        self.finalize(stages)
    }

    /// Resolves a read address and appends a count-bounded identity
    /// consumer (`head`/`tail` pipelines). The key is the identity plugin's
    /// config option, `limit` or `tail`.
    pub fn resolve_bounded(
        &self,
        raw: &str,
        profiles: &dyn ProfileSource<'r>,
        key: &str,
        count: u64,
    ) -> Result<ExecutionPlan<'r>> {
        let mut stages = self.resolve_stages(raw, Direction::Read, profiles)?;
        let identity = self.identity_plugin(PluginMode::Filter)?;
        let mut config = BTreeMap::new();
        config.insert(key.to_string(), count.to_string());
        stages.push(self.stage(
            identity,
            PluginMode::Filter,
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?);
        self.finalize(stages)
    }

    /// Builds a single-stage filter plan: stdin records through the filter
    /// plugin to stdout.
    pub fn resolve_filter(&self, expression: &str) -> Result<ExecutionPlan<'r>> {
        let plugin = self.filter_plugin(expression)?;
        let mut config = BTreeMap::new();
        config.insert("expr".to_string(), expression.to_string());
        let stages = vec![self.stage(
            plugin,
            PluginMode::Filter,
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?];
        self.finalize(stages)
    }

    fn finalize(&self, mut stages: Vec<Stage<'r>>) -> Result<ExecutionPlan<'r>> {
        rewire(&mut stages);
        name_stages(&mut stages);
        ExecutionPlan::new(stages, self.max_stages)
    }

    fn resolve_stages(
        &self,
        raw: &str,
        direction: Direction,
        profiles: &dyn ProfileSource<'r>,
    ) -> Result<Vec<Stage<'r>>> {
        let address = Address::parse(raw);
        crate::debug!("parsed '{}' as a {:?} address", address, address.kind());
        let params = address.parameters().validated()?.to_vec();
        check_numeric_values(&params)?;

        match address.kind() {
            AddressKind::Stdio => self.resolve_stdio(&address, &params, direction),
            AddressKind::File => self.resolve_file(&address, &params, direction),
            AddressKind::Url => self.resolve_url(&address, &params, direction),
            AddressKind::Profile => self.resolve_profile(&address, &params, direction, profiles),
            AddressKind::Plugin => self.resolve_plugin_ref(&address, &params, direction),
        }
    }

    fn resolve_stdio(
        &self,
        address: &Address,
        params: &[(String, String)],
        direction: Direction,
    ) -> Result<Vec<Stage<'r>>> {
        let plugin = match address.format_override() {
            Some(token) => self.format_by_token(token, direction.required_mode())?,
            None => self.identity_plugin(direction.required_mode())?,
        };
        let (config, filter_params) = classify_parameters(plugin, params);
        let endpoint = self.stage(
            plugin,
            direction.required_mode(),
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?;
        self.attach_filter(endpoint, filter_params, direction)
    }

    fn resolve_file(
        &self,
        address: &Address,
        params: &[(String, String)],
        direction: Direction,
    ) -> Result<Vec<Stage<'r>>> {
        let format = match address.format_override() {
            Some(token) => self.format_by_token(token, direction.required_mode())?,
            None => {
                let candidates = self.ranked_matches(address.base());
                self.pick_with_mode(
                    &candidates,
                    direction.required_mode(),
                    ErrorKind::UnknownFormat(address.base().to_string()),
                )?
            }
        };
        let (config, filter_params) = classify_parameters(format, params);

        let mut stages = Vec::new();
        match direction {
            Direction::Read => {
                if let Some(compression) = address.compression() {
                    let decompressor = self.compression_plugin(compression, PluginMode::Raw)?;
                    stages.push(self.stage(
                        decompressor,
                        PluginMode::Raw,
                        BTreeMap::new(),
                        None,
                        StdinSource::OpenFile(PathBuf::from(address.base_with_compression())),
                        StdoutSink::InheritedStdout,
                    )?);
                }
                let reader = self.stage(
                    format,
                    PluginMode::Read,
                    config,
                    Some(address.base().to_string()),
                    StdinSource::OpenFile(PathBuf::from(address.base())),
                    StdoutSink::InheritedStdout,
                )?;
                stages.extend(self.attach_filter(reader, filter_params, direction)?);
            }
            Direction::Write => {
                let writer = self.stage(
                    format,
                    PluginMode::Write,
                    config,
                    Some(address.base().to_string()),
                    StdinSource::InheritedStdin,
                    StdoutSink::OpenFile(PathBuf::from(address.base())),
                )?;
                stages.extend(self.attach_filter(writer, filter_params, direction)?);
                if let Some(compression) = address.compression() {
                    let compressor = self.compression_plugin(compression, PluginMode::Write)?;
                    stages.push(self.stage(
                        compressor,
                        PluginMode::Write,
                        BTreeMap::new(),
                        None,
                        StdinSource::InheritedStdin,
                        StdoutSink::OpenFile(PathBuf::from(address.base_with_compression())),
                    )?);
                }
            }
        }
        Ok(stages)
    }

    fn resolve_url(
        &self,
        address: &Address,
        params: &[(String, String)],
        direction: Direction,
    ) -> Result<Vec<Stage<'r>>> {
        let url = address.base_with_compression();
        let candidates: Vec<&PluginDescriptor> = self
            .ranked_matches(&url)
            .into_iter()
            .filter(|d| d.role() == PluginRole::Protocol)
            .collect();

        if direction == Direction::Write {
            // Writes to a URL are the protocol plugin's business end to
            // end; chaining applies to reads only.
            let protocol = self.pick_with_mode(
                &candidates,
                PluginMode::Write,
                ErrorKind::UnknownFormat(url.clone()),
            )?;
            let (config, filter_params) = classify_parameters(protocol, params);
            let writer = self.stage(
                protocol,
                PluginMode::Write,
                config,
                Some(url),
                StdinSource::InheritedStdin,
                StdoutSink::InheritedStdout,
            )?;
            return self.attach_filter(writer, filter_params, direction);
        }

        let chained = address.compression().is_some() || address.format_override().is_some();
        let fetch_mode = if chained {
            PluginMode::Raw
        } else {
            PluginMode::Read
        };
        let protocol = self.pick_with_mode(
            &candidates,
            fetch_mode,
            ErrorKind::UnknownFormat(url.clone()),
        )?;
        let (config, filter_params) = classify_parameters(protocol, params);

        let mut stages = vec![self.stage(
            protocol,
            fetch_mode,
            config,
            Some(url),
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?];

        if !chained {
            return self.attach_filter(stages.remove(0), filter_params, direction);
        }

        if let Some(compression) = address.compression() {
            let decompressor = self.compression_plugin(compression, PluginMode::Raw)?;
            stages.push(self.stage(
                decompressor,
                PluginMode::Raw,
                BTreeMap::new(),
                None,
                StdinSource::InheritedStdin,
                StdoutSink::InheritedStdout,
            )?);
        }

        let format = match address.format_override() {
            Some(token) => self.format_by_token(token, PluginMode::Read)?,
            None => {
                // The protocol plugin's own scheme pattern also matches the
                // base; only format-role plugins may parse the fetched
                // bytes.
                let format_candidates: Vec<&PluginDescriptor> = self
                    .ranked_matches(address.base())
                    .into_iter()
                    .filter(|d| d.role() == PluginRole::Format)
                    .collect();
                self.pick_with_mode(
                    &format_candidates,
                    PluginMode::Read,
                    ErrorKind::UnknownFormat(address.base().to_string()),
                )?
            }
        };
        let reader = self.stage(
            format,
            PluginMode::Read,
            BTreeMap::new(),
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?;
        stages.extend(self.attach_filter(reader, filter_params, direction)?);
        Ok(stages)
    }

    fn resolve_profile(
        &self,
        address: &Address,
        params: &[(String, String)],
        direction: Direction,
        profiles: &dyn ProfileSource<'r>,
    ) -> Result<Vec<Stage<'r>>> {
        let namespace = address.namespace().expect("profile address");
        let claimants = profiles.claimants(namespace);
        if claimants.is_empty() {
            return Err(ErrorKind::UnknownProfile(namespace.to_string()).into());
        }
        if claimants.len() > 1 && claimants[0].priority_layer == claimants[1].priority_layer {
            return meta_err(format!(
                "namespace '{}' is claimed by both '{}' and '{}'",
                namespace,
                claimants[0].name(),
                claimants[1].name(),
            ));
        }
        let plugin = self.pick_with_mode(
            &claimants,
            direction.required_mode(),
            ErrorKind::UnknownProfile(namespace.to_string()),
        )?;

        let (mut config, filter_params) = classify_parameters(plugin, params);
        config.insert("url".to_string(), address.base().to_string());
        let endpoint = self.stage(
            plugin,
            direction.required_mode(),
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?;
        self.attach_filter(endpoint, filter_params, direction)
    }

    fn resolve_plugin_ref(
        &self,
        address: &Address,
        params: &[(String, String)],
        direction: Direction,
    ) -> Result<Vec<Stage<'r>>> {
        let reference = address.reference().expect("plugin address");
        let plugin = self
            .registry
            .get(reference)
            .ok_or_else(|| ErrorKind::UnknownPlugin(reference.to_string()))?;
        let plugin = self.pick_with_mode(
            &[plugin],
            direction.required_mode(),
            ErrorKind::UnknownPlugin(reference.to_string()),
        )?;
        let (config, filter_params) = classify_parameters(plugin, params);
        let endpoint = self.stage(
            plugin,
            direction.required_mode(),
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?;
        self.attach_filter(endpoint, filter_params, direction)
    }

    /// Surfaces leftover parameters as a synthesized filter stage:
    /// downstream of the endpoint for reads, upstream for writes (filters
    /// speak NDJSON; the writer is the last NDJSON consumer).
    fn attach_filter(
        &self,
        endpoint: Stage<'r>,
        filter_params: Vec<(String, String)>,
        direction: Direction,
    ) -> Result<Vec<Stage<'r>>> {
        if filter_params.is_empty() {
            return Ok(vec![endpoint]);
        }
        let first = filter_params[0].0.clone();
        let plugin = self.filter_plugin(&first)?;
        let mut config = BTreeMap::new();
        for (key, value) in filter_params {
            config.insert(key, value);
        }
        let filter = self.stage(
            plugin,
            PluginMode::Filter,
            config,
            None,
            StdinSource::InheritedStdin,
            StdoutSink::InheritedStdout,
        )?;
        Ok(match direction {
            Direction::Read => vec![endpoint, filter],
            Direction::Write => vec![filter, endpoint],
        })
    }

    /// All descriptors whose patterns match the text, ranked by layer,
    /// then longest matching pattern, then role order, then name.
    fn ranked_matches(&self, text: &str) -> Vec<&'r PluginDescriptor> {
        let mut matches: Vec<(usize, Reverse<usize>, u8, &'r str, &'r PluginDescriptor)> = self
            .registry
            .iter()
            .filter_map(|d| {
                d.match_strength(text).map(|strength| {
                    (
                        d.priority_layer,
                        Reverse(strength),
                        d.role().rank(),
                        d.name(),
                        d,
                    )
                })
            })
            .collect();
        matches.sort_by(|a, b| (a.0, a.1, a.2, a.3).cmp(&(b.0, b.1, b.2, b.3)));
        matches.into_iter().map(|entry| entry.4).collect()
    }

    /// Mode-aware selection: walks the ranked candidates and returns the
    /// first one supporting the required mode. Matching but lacking the
    /// mode is not a success; the fallback direction is strictly down the
    /// priority order.
    fn pick_with_mode(
        &self,
        candidates: &[&'r PluginDescriptor],
        mode: PluginMode,
        none_matched: ErrorKind,
    ) -> Result<&'r PluginDescriptor> {
        if candidates.is_empty() {
            return Err(none_matched.into());
        }
        for &descriptor in candidates {
            if descriptor.supports_mode(mode) {
                if !std::ptr::eq(descriptor, candidates[0]) {
                    note!(
                        "plugin '{}' outranks '{}' here but does not support mode '{}'; \
                         falling back",
                        candidates[0].name(),
                        descriptor.name(),
                        mode,
                    );
                }
                return Ok(descriptor);
            }
        }
        Err(ErrorKind::ModeUnsupported(candidates[0].name().to_string(), mode.to_string()).into())
    }

    /// Rule 1: explicit `~fmt` override. Tries an exact plugin name first,
    /// then pattern-matches `.fmt`.
    fn format_by_token(&self, token: &str, mode: PluginMode) -> Result<&'r PluginDescriptor> {
        if let Some(by_name) = self.registry.get(token) {
            return self.pick_with_mode(
                &[by_name],
                mode,
                ErrorKind::UnknownFormat(token.to_string()),
            );
        }
        let candidates = self.ranked_matches(&format!(".{}", token));
        self.pick_with_mode(&candidates, mode, ErrorKind::UnknownFormat(token.to_string()))
    }

    /// Selects the compression plugin for a recognized suffix.
    fn compression_plugin(
        &self,
        compression: Compression,
        mode: PluginMode,
    ) -> Result<&'r PluginDescriptor> {
        let text = format!(".{}", compression.extension());
        let candidates: Vec<&PluginDescriptor> = self
            .ranked_matches(&text)
            .into_iter()
            .filter(|d| d.role() == PluginRole::Compression)
            .collect();
        self.pick_with_mode(&candidates, mode, ErrorKind::UnknownFormat(text))
    }

    /// The highest-priority filter-role plugin; `subject` names the
    /// parameter or expression that needed one, for the error message.
    fn filter_plugin(&self, subject: &str) -> Result<&'r PluginDescriptor> {
        let mut candidates: Vec<&PluginDescriptor> = self
            .registry
            .iter()
            .filter(|d| d.role() == PluginRole::Filter)
            .collect();
        candidates.sort_by_key(|d| (d.priority_layer, d.name().to_string()));
        self.pick_with_mode(
            &candidates,
            PluginMode::Filter,
            ErrorKind::UnknownPlugin(format!(
                "no filter plugin available to handle '{}'",
                subject
            )),
        )
    }

    fn identity_plugin(&self, mode: PluginMode) -> Result<&'r PluginDescriptor> {
        let plugin = self
            .registry
            .get(IDENTITY_PLUGIN)
            .ok_or_else(|| ErrorKind::UnknownPlugin(IDENTITY_PLUGIN.to_string()))?;
        self.pick_with_mode(
            &[plugin],
            mode,
            ErrorKind::UnknownPlugin(IDENTITY_PLUGIN.to_string()),
        )
    }

    /// Builds one stage, applying template substitution to configuration
    /// values, the positional address, and the working directory.
    fn stage(
        &self,
        plugin: &'r PluginDescriptor,
        mode: PluginMode,
        config: BTreeMap<String, String>,
        address_arg: Option<String>,
        stdin_source: StdinSource,
        stdout_sink: StdoutSink,
    ) -> Result<Stage<'r>> {
        let mut expanded = BTreeMap::new();
        for (key, value) in config {
            expanded.insert(key, self.template.expand(&value)?);
        }
        let address_arg = match address_arg {
            Some(address) => Some(self.template.expand(&address)?),
            None => None,
        };
        let cwd = PathBuf::from(self.template.expand(&self.cwd.to_string_lossy())?);
        Ok(Stage {
            plugin,
            name: plugin.name().to_string(),
            mode,
            config: expanded,
            address_arg,
            env: self.stage_env(plugin)?,
            cwd,
            stdin_source,
            stdout_sink,
        })
    }

    /// The context variables every stage receives.
    fn stage_env(&self, plugin: &PluginDescriptor) -> Result<Vec<EnvMod>> {
        let mut env = Vec::new();
        if let Some(home) = &self.home {
            env.push(EnvMod::set("JN_HOME", home.to_string_lossy()));
        }
        env.push(EnvMod::set(
            "JN_WORKING_DIR",
            self.template.expand(&self.cwd.to_string_lossy())?,
        ));
        if let Some(project) = &self.project_dir {
            env.push(EnvMod::set("JN_PROJECT_DIR", project.to_string_lossy()));
        }
        if let Some(profile_dir) = profile_dir_for(plugin) {
            env.push(EnvMod::set("JN_PROFILE_DIR", profile_dir.to_string_lossy()));
        }
        Ok(env)
    }
}

/// The per-plugin profile directory: `profiles/<name>` next to the layer's
/// `plugins` directory. Exposed for callers that invoke plugin maintenance
/// modes outside a resolved plan, such as profile inspection.
pub fn profile_dir_for(plugin: &PluginDescriptor) -> Option<PathBuf> {
    let layer_root = plugin.executable_path.parent()?.parent()?;
    Some(layer_root.join("profiles").join(plugin.name()))
}

/// Connects interior stage boundaries with pipes. Builders set endpoint
/// wiring; everything between adjacent stages is a pipe by construction.
fn rewire(stages: &mut [Stage]) {
    let count = stages.len();
    for (index, stage) in stages.iter_mut().enumerate() {
        if index > 0 {
            stage.stdin_source = StdinSource::PreviousStage;
        }
        if index + 1 < count {
            stage.stdout_sink = StdoutSink::NextStage;
        }
    }
}

/// Disambiguates instance names when one plugin appears twice in a plan.
fn name_stages(stages: &mut [Stage]) {
    let names: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
    for (index, stage) in stages.iter_mut().enumerate() {
        let collisions = names.iter().filter(|n| **n == stage.name).count();
        if collisions > 1 {
            let ordinal = names[..index].iter().filter(|n| **n == stage.name).count();
            stage.name = format!("{}#{}", stage.name, ordinal);
        }
    }
}

/// Splits address parameters into plugin configuration and leftover filter
/// parameters. A plugin that manages its own parameters receives everything
/// unchanged.
fn classify_parameters(
    plugin: &PluginDescriptor,
    params: &[(String, String)],
) -> (BTreeMap<String, String>, Vec<(String, String)>) {
    let mut config = BTreeMap::new();
    let mut filters = Vec::new();
    for (key, value) in params {
        if plugin.metadata.manages_parameters
            || plugin.metadata.config_params.iter().any(|p| p == key)
        {
            config.insert(key.clone(), value.clone());
        } else {
            filters.push((key.clone(), value.clone()));
        }
    }
    (config, filters)
}

/// Enforces the numeric coercion rule: a value that looks numeric must be a
/// valid integer or float. This is a configuration error, distinct from the
/// address syntax errors.
fn check_numeric_values(params: &[(String, String)]) -> Result<()> {
    for (key, value) in params {
        if looks_numeric(value)
            && value.parse::<i64>().is_err()
            && value.parse::<f64>().is_err()
        {
            return Err(ErrorKind::InvalidConfigValue(format!(
                "parameter '{}' has numeric-looking value '{}' which is neither a valid \
                 integer nor a valid float",
                key, value
            ))
            .into());
        }
    }
    Ok(())
}

lazy_static::lazy_static! {
    /// The shape of a numeric literal: sign, digits, optional fraction and
    /// exponent, with `_` separators tolerated in the shape but not by the
    /// numeric parsers.
    static ref NUMERIC_SHAPE_RE: regex::Regex =
        regex::Regex::new(r"^[+-]?[0-9][0-9_]*(\.[0-9_]*)?([eE][+-]?[0-9_]*)?$").unwrap();
}

fn looks_numeric(value: &str) -> bool {
    NUMERIC_SHAPE_RE.is_match(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::{
        metadata::PluginMetadata,
        registry::{registry_from_metadata, Registry},
    };

    fn plugin(
        name: &str,
        role: &str,
        modes: &[&str],
        patterns: &[&str],
        layer: usize,
    ) -> (PathBuf, Option<PathBuf>, PluginMetadata, usize) {
        let value = serde_json::json!({
            "name": name,
            "role": role,
            "modes": modes,
            "matches": patterns,
        });
        (
            PathBuf::from(format!("/layer{}/plugins/jn-{}", layer, name)),
            None,
            serde_json::from_value(value).unwrap(),
            layer,
        )
    }

    fn test_registry() -> Registry {
        let mut seq = plugin("seq", "protocol", &["read", "inspect-profiles"], &[], 2);
        seq.2.namespace = Some("seq".to_string());
        seq.2.manages_parameters = true;
        let mut web = plugin(
            "web",
            "protocol",
            &["read", "raw", "write"],
            &["^https?://"],
            2,
        );
        web.2.namespace = Some("web".to_string());
        registry_from_metadata(vec![
            web,
            plugin(
                "csv",
                "format",
                &["read", "write"],
                &[r".*\.csv$"],
                2,
            ),
            plugin("gz", "compression", &["raw", "write"], &[r"\.gz$"], 2),
            plugin(
                "ndjson",
                "format",
                &["read", "write", "filter"],
                &[r".*\.ndjson$", r".*\.jsonl$"],
                2,
            ),
            plugin("jq", "filter", &["filter"], &[], 2),
            seq,
        ])
        .unwrap()
    }

    fn resolve<'r>(
        registry: &'r Registry,
        raw: &str,
        direction: Direction,
    ) -> Result<ExecutionPlan<'r>> {
        let resolver = Resolver::new(registry).with_cwd("/work");
        let profiles = RegistryProfiles::new(registry);
        resolver.resolve(raw, direction, &profiles)
    }

    #[test]
    fn simple_file_read() {
        let registry = test_registry();
        let plan = resolve(&registry, "data.csv", Direction::Read).unwrap();
        assert_eq!(plan.len(), 1);
        let stage = &plan.stages()[0];
        assert_eq!(stage.plugin.name(), "csv");
        assert_eq!(stage.mode, PluginMode::Read);
        assert_eq!(
            stage.stdin_source,
            StdinSource::OpenFile(PathBuf::from("data.csv"))
        );
        assert_eq!(stage.stdout_sink, StdoutSink::InheritedStdout);
    }

    #[test]
    fn compressed_file_read_chains() {
        let registry = test_registry();
        let plan = resolve(&registry, "data.csv.gz", Direction::Read).unwrap();
        assert_eq!(plan.len(), 2);
        let gz = &plan.stages()[0];
        assert_eq!(gz.plugin.name(), "gz");
        assert_eq!(gz.mode, PluginMode::Raw);
        assert_eq!(
            gz.stdin_source,
            StdinSource::OpenFile(PathBuf::from("data.csv.gz"))
        );
        assert_eq!(gz.stdout_sink, StdoutSink::NextStage);
        let csv = &plan.stages()[1];
        assert_eq!(csv.plugin.name(), "csv");
        assert_eq!(csv.mode, PluginMode::Read);
        assert_eq!(csv.stdin_source, StdinSource::PreviousStage);
    }

    #[test]
    fn compressed_file_write_reverses() {
        let registry = test_registry();
        let plan = resolve(&registry, "out.csv.gz", Direction::Write).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.stages()[0].plugin.name(), "csv");
        assert_eq!(plan.stages()[0].mode, PluginMode::Write);
        assert_eq!(plan.stages()[1].plugin.name(), "gz");
        assert_eq!(plan.stages()[1].mode, PluginMode::Write);
        assert_eq!(
            plan.stages()[1].stdout_sink,
            StdoutSink::OpenFile(PathBuf::from("out.csv.gz"))
        );
    }

    #[test]
    fn config_and_filter_parameters_split() {
        let mut registry_entries = vec![
            plugin(
                "csv",
                "format",
                &["read", "write"],
                &[r".*\.csv$"],
                0,
            ),
            plugin("jq", "filter", &["filter"], &[], 0),
        ];
        registry_entries[0].2.config_params = vec!["delimiter".to_string()];
        let registry = registry_from_metadata(registry_entries).unwrap();

        let plan = resolve(
            &registry,
            "data.csv?delimiter=,&city=paris",
            Direction::Read,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.stages()[0].config.get("delimiter").unwrap(), ",");
        assert!(plan.stages()[0].config.get("city").is_none());
        let filter = &plan.stages()[1];
        assert_eq!(filter.plugin.name(), "jq");
        assert_eq!(filter.mode, PluginMode::Filter);
        assert_eq!(filter.config.get("city").unwrap(), "paris");
    }

    #[test]
    fn managed_parameters_pass_through() {
        let registry = test_registry();
        let plan = resolve(&registry, "@seq/integers?count=5", Direction::Read).unwrap();
        assert_eq!(plan.len(), 1);
        let stage = &plan.stages()[0];
        assert_eq!(stage.plugin.name(), "seq");
        assert_eq!(stage.config.get("url").unwrap(), "@seq/integers");
        assert_eq!(stage.config.get("count").unwrap(), "5");
    }

    #[test]
    fn url_scheme_selects_a_protocol_plugin() {
        let registry = test_registry();
        let plan = resolve(&registry, "http://example.com/data", Direction::Read).unwrap();
        assert_eq!(plan.len(), 1);
        let stage = &plan.stages()[0];
        assert_eq!(stage.plugin.name(), "web");
        assert_eq!(stage.mode, PluginMode::Read);
        assert_eq!(
            stage.address_arg.as_ref().unwrap(),
            "http://example.com/data"
        );
    }

    #[test]
    fn compressed_url_chains_fetch_decompress_parse() {
        let registry = test_registry();
        let plan = resolve(
            &registry,
            "http://example.com/data.csv.gz",
            Direction::Read,
        )
        .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.stages()[0].plugin.name(), "web");
        assert_eq!(plan.stages()[0].mode, PluginMode::Raw);
        assert_eq!(plan.stages()[1].plugin.name(), "gz");
        assert_eq!(plan.stages()[1].mode, PluginMode::Raw);
        assert_eq!(plan.stages()[2].plugin.name(), "csv");
        assert_eq!(plan.stages()[2].mode, PluginMode::Read);
    }

    #[test]
    fn url_format_override_fetches_raw() {
        let registry = test_registry();
        let plan = resolve(&registry, "http://example.com/report~csv", Direction::Read).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.stages()[0].plugin.name(), "web");
        assert_eq!(plan.stages()[0].mode, PluginMode::Raw);
        assert_eq!(plan.stages()[1].plugin.name(), "csv");

        // Writes stay a single protocol stage.
        let plan = resolve(&registry, "http://example.com/sink", Direction::Write).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.stages()[0].mode, PluginMode::Write);
    }

    #[test]
    fn bare_plugin_reference() {
        let registry = test_registry();
        let plan = resolve(&registry, "@seq?count=3", Direction::Read).unwrap();
        assert_eq!(plan.len(), 1);
        let stage = &plan.stages()[0];
        assert_eq!(stage.plugin.name(), "seq");
        assert_eq!(stage.mode, PluginMode::Read);
        assert_eq!(stage.config.get("count").unwrap(), "3");
        assert!(stage.config.get("url").is_none());

        let err = resolve(&registry, "@nonexistent", Direction::Read).unwrap_err();
        match err.kind() {
            ErrorKind::UnknownPlugin(name) => assert_eq!(name, "nonexistent"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_namespace() {
        let registry = test_registry();
        let err = resolve(&registry, "@nope/x", Direction::Read).unwrap_err();
        match err.kind() {
            ErrorKind::UnknownProfile(ns) => assert_eq!(ns, "nope"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_format() {
        let registry = test_registry();
        let err = resolve(&registry, "data.xyz", Direction::Read).unwrap_err();
        match err.kind() {
            ErrorKind::UnknownFormat(what) => assert_eq!(what, "data.xyz"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn mode_aware_fallback() {
        // A read-only native plugin outranks a read-write script plugin;
        // write resolution must fall through to the script one.
        let registry = registry_from_metadata(vec![
            plugin("csvfast", "format", &["read"], &[r".*\.csv$"], 0),
            (
                PathBuf::from("/layer1/plugins/csv.py"),
                Some(PathBuf::from("python3")),
                serde_json::from_value(serde_json::json!({
                    "name": "csv",
                    "role": "format",
                    "modes": ["read", "write"],
                    "matches": [r".*\.csv$"],
                }))
                .unwrap(),
                1,
            ),
        ])
        .unwrap();

        let plan = resolve(&registry, "out.csv", Direction::Write).unwrap();
        assert_eq!(plan.stages()[0].plugin.name(), "csv");
        let plan = resolve(&registry, "out.csv", Direction::Read).unwrap();
        assert_eq!(plan.stages()[0].plugin.name(), "csvfast");
    }

    #[test]
    fn fallback_is_monotonic() {
        // Adding an even higher-priority plugin without the mode does not
        // change the outcome.
        let registry = registry_from_metadata(vec![
            plugin("csvnew", "format", &["read"], &[r".*\.csv$"], 0),
            plugin("csvfast", "format", &["read"], &[r".*\.csv$"], 1),
            (
                PathBuf::from("/layer2/plugins/csv.py"),
                Some(PathBuf::from("python3")),
                serde_json::from_value(serde_json::json!({
                    "name": "csv",
                    "role": "format",
                    "modes": ["read", "write"],
                    "matches": [r".*\.csv$"],
                }))
                .unwrap(),
                2,
            ),
        ])
        .unwrap();
        let plan = resolve(&registry, "out.csv", Direction::Write).unwrap();
        assert_eq!(plan.stages()[0].plugin.name(), "csv");
    }

    #[test]
    fn mode_unsupported_when_no_fallback() {
        let registry = registry_from_metadata(vec![plugin(
            "csvfast",
            "format",
            &["read"],
            &[r".*\.csv$"],
            0,
        )])
        .unwrap();
        let err = resolve(&registry, "out.csv", Direction::Write).unwrap_err();
        match err.kind() {
            ErrorKind::ModeUnsupported(name, mode) => {
                assert_eq!(name, "csvfast");
                assert_eq!(mode, "write");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn stdio_defaults_to_identity() {
        let registry = test_registry();
        let plan = resolve(&registry, "-", Direction::Read).unwrap();
        assert_eq!(plan.stages()[0].plugin.name(), "ndjson");
        assert_eq!(plan.stages()[0].stdin_source, StdinSource::InheritedStdin);

        let plan = resolve(&registry, "-~csv", Direction::Read).unwrap();
        assert_eq!(plan.stages()[0].plugin.name(), "csv");
    }

    #[test]
    fn numeric_values_are_validated() {
        let registry = test_registry();
        let err = resolve(&registry, "data.csv?limit=12_000", Direction::Read).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidConfigValue(_) => {}
            other => panic!("unexpected error {:?}", other),
        }
        // Plain numbers and non-numeric text are fine.
        assert!(resolve(&registry, "@seq/integers?count=5", Direction::Read).is_ok());
        assert!(resolve(&registry, "@seq/integers?city=paris2x", Direction::Read).is_ok());
        // Dates are not numeric-looking.
        assert!(resolve(&registry, "@seq/integers?date=2020-01-01", Direction::Read).is_ok());
    }

    #[test]
    fn malformed_query_is_invalid_address() {
        let registry = test_registry();
        let err = resolve(&registry, "data.csv?oops", Direction::Read).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidAddress(_) => {}
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn template_substitution_applies() {
        let registry = test_registry();
        let mut template = TemplateContext::new();
        template.set_param("city", "paris");
        let resolver = Resolver::new(&registry)
            .with_cwd("/work")
            .with_template(template);
        let profiles = RegistryProfiles::new(&registry);
        let plan = resolver
            .resolve(
                "@seq/integers?q=${params.city}",
                Direction::Read,
                &profiles,
            )
            .unwrap();
        assert_eq!(plan.stages()[0].config.get("q").unwrap(), "paris");

        let err = resolver
            .resolve("@seq/integers?q=${params.nope}", Direction::Read, &profiles)
            .unwrap_err();
        match err.kind() {
            ErrorKind::InvalidConfigValue(_) => {}
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn bounded_consumer_appended() {
        let registry = test_registry();
        let resolver = Resolver::new(&registry).with_cwd("/work");
        let profiles = RegistryProfiles::new(&registry);
        let plan = resolver
            .resolve_bounded("data.csv", &profiles, "limit", 3)
            .unwrap();
        assert_eq!(plan.len(), 2);
        let tail = &plan.stages()[1];
        assert_eq!(tail.plugin.name(), "ndjson");
        assert_eq!(tail.config.get("limit").unwrap(), "3");
        assert_eq!(tail.stdout_sink, StdoutSink::InheritedStdout);
    }

    #[test]
    fn stage_env_carries_context() {
        let registry = test_registry();
        let plan = resolve(&registry, "data.csv", Direction::Read).unwrap();
        let env = &plan.stages()[0].env;
        assert!(env
            .iter()
            .any(|e| e.key() == "JN_WORKING_DIR" && e.to_string().ends_with("/work")));
        assert!(env.iter().any(|e| e.key() == "JN_PROFILE_DIR"
            && e.to_string().contains("profiles/csv")));
    }
}
