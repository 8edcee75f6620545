//! The `jn` command line binary.

use jn::{
    common::{
        error::{ErrorKind, Result},
        log::{thread::LogThread, LoglevelFilter},
    },
    fatal, info,
    host::{
        configuration::ExecutorConfiguration,
        executor,
        metadata::PluginMode,
        registry::{cache, default_search_layers, Registry, SearchLayer},
        resolver::{
            profile_dir_for, Direction, ExecutionPlan, RegistryProfiles, Resolver, Stage,
            StdinSource, StdoutSink, TemplateContext,
        },
    },
};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

mod arg_parse;
use crate::arg_parse::*;

/// Runs the CLI and returns the process exit code. Split from `main` so
/// the test suite can drive it in-process.
fn internal_main<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use structopt::StructOpt;
    let opts = match Opts::from_iter_safe(args) {
        Ok(opts) => opts,
        Err(e) => {
            use structopt::clap::ErrorKind::{HelpDisplayed, VersionDisplayed};
            match e.kind {
                HelpDisplayed | VersionDisplayed => {
                    println!("{}", e.message);
                    return 0;
                }
                _ => {
                    eprintln!("{}", e.message);
                    return 2;
                }
            }
        }
    };

    let logger = match LogThread::spawn("jn", LoglevelFilter::Trace, opts.loglevel, opts.tee.clone())
    {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to start log thread: {}", e);
            return 1;
        }
    };

    match run(&opts, &logger) {
        Ok(code) => code,
        Err(e) => {
            fatal!("{}", e);
            e.kind().exit_code()
        }
    }
}

fn run(opts: &Opts, logger: &LogThread) -> Result<i32> {
    let layers = search_layers(opts);
    let cache_path = registry_cache_path(opts);
    let registry = cache::build_registry_cached(&layers, cache_path.as_deref())?;

    let mut template = TemplateContext::new();
    for binding in &opts.env {
        template.set_env(&binding.key, &binding.value);
    }
    for binding in &opts.param {
        template.set_param(&binding.key, &binding.value);
    }

    let resolver = Resolver::new(&registry).with_template(template);
    let profiles = RegistryProfiles::new(&registry);
    let configuration = executor_configuration(opts);

    match &opts.command {
        CommandOpt::Cat { address } => {
            let plan = resolver.resolve(address, Direction::Read, &profiles)?;
            run_plan(&plan, &configuration, logger)
        }
        CommandOpt::Put { address } => {
            let plan = resolver.resolve(address, Direction::Write, &profiles)?;
            run_plan(&plan, &configuration, logger)
        }
        CommandOpt::Filter { expression } => {
            let plan = resolver.resolve_filter(expression)?;
            run_plan(&plan, &configuration, logger)
        }
        CommandOpt::Head { count, address } => {
            let plan = resolver.resolve_bounded(address, &profiles, "limit", *count)?;
            run_plan(&plan, &configuration, logger)
        }
        CommandOpt::Tail { count, address } => {
            let plan = resolver.resolve_bounded(address, &profiles, "tail", *count)?;
            run_plan(&plan, &configuration, logger)
        }
        CommandOpt::Merge { addresses } => {
            for address in addresses {
                let plan = resolver.resolve(address, Direction::Read, &profiles)?;
                let code = run_plan(&plan, &configuration, logger)?;
                if code != 0 {
                    return Ok(code);
                }
            }
            Ok(0)
        }
        CommandOpt::Plugins { json } => {
            list_plugins(&registry, *json);
            Ok(0)
        }
        CommandOpt::Profiles { namespace } => {
            inspect_profiles(&registry, namespace, &configuration, logger)
        }
    }
}

/// Executes a plan and reports its outcome; stage failures surface as the
/// failing stage's exit code, not as a resolution error.
fn run_plan(
    plan: &ExecutionPlan,
    configuration: &ExecutorConfiguration,
    logger: &LogThread,
) -> Result<i32> {
    let outcome = executor::execute(plan, configuration, logger)?;
    match outcome.result() {
        Ok(()) => {
            info!("pipeline completed");
            Ok(0)
        }
        Err(e) => {
            fatal!("{}", e);
            Ok(e.kind().exit_code())
        }
    }
}

/// `--plugin-dir` layers first (highest priority), then the default
/// project/user/bundled path.
fn search_layers(opts: &Opts) -> Vec<SearchLayer> {
    let mut layers: Vec<SearchLayer> = opts
        .plugin_dir
        .iter()
        .map(|dir| SearchLayer::new("cli", dir.clone()))
        .collect();
    layers.extend(default_search_layers());
    layers
}

fn registry_cache_path(opts: &Opts) -> Option<PathBuf> {
    if opts.no_registry_cache {
        return None;
    }
    if let Some(path) = std::env::var_os("JN_REGISTRY_CACHE") {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".cache").join("jn").join("registry.json"))
}

fn executor_configuration(opts: &Opts) -> ExecutorConfiguration {
    let mut configuration = ExecutorConfiguration::default();
    if let Some(timeout) = &opts.timeout {
        configuration.deadline = timeout.clone();
    }
    if let Some(grace) = &opts.grace {
        configuration.grace = grace.clone();
    }
    if let Some(stderr_mode) = &opts.stderr_mode {
        configuration.stderr_mode = stderr_mode.clone();
    }
    configuration
}

/// Prints the registry to stdout: a table, or NDJSON with `--json`.
fn list_plugins(registry: &Registry, json: bool) {
    if json {
        for descriptor in registry.iter() {
            // The descriptor serializes to the same shape --jn-meta uses,
            // plus discovery fields.
            if let Ok(line) = serde_json::to_string(descriptor) {
                println!("{}", line);
            }
        }
        return;
    }
    for descriptor in registry.iter() {
        println!(
            "{:<16} {:<12} layer {}  {}",
            descriptor.name(),
            descriptor.role().to_string(),
            descriptor.priority_layer,
            descriptor.executable_path.display(),
        );
    }
}

/// Runs the namespace owner with `--mode=inspect-profiles`, streaming its
/// profile records to stdout.
fn inspect_profiles(
    registry: &Registry,
    namespace: &str,
    configuration: &ExecutorConfiguration,
    logger: &LogThread,
) -> Result<i32> {
    let plugin = registry
        .namespace_owner(namespace)?
        .ok_or_else(|| ErrorKind::UnknownProfile(namespace.to_string()))?;
    if !plugin.supports_mode(PluginMode::InspectProfiles) {
        return Err(ErrorKind::ModeUnsupported(
            plugin.name().to_string(),
            PluginMode::InspectProfiles.to_string(),
        )
        .into());
    }
    let mut env = Vec::new();
    if let Some(profile_dir) = profile_dir_for(plugin) {
        env.push(jn::host::configuration::EnvMod::set(
            "JN_PROFILE_DIR",
            profile_dir.to_string_lossy(),
        ));
    }
    let stage = Stage {
        plugin,
        name: plugin.name().to_string(),
        mode: PluginMode::InspectProfiles,
        config: BTreeMap::new(),
        address_arg: None,
        env,
        cwd: std::env::current_dir()?,
        stdin_source: StdinSource::InheritedStdin,
        stdout_sink: StdoutSink::InheritedStdout,
    };
    let plan = ExecutionPlan::new(vec![stage], 1)?;
    run_plan(&plan, configuration, logger)
}

fn main() {
    std::process::exit(internal_main(std::env::args()));
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! cli {
        ( $( $v:expr ),* ) => {{
            let args: &[&str] = &["jn", $($v,)*];
            internal_main(args)
        }}
    }

    #[test]
    fn no_arguments_is_usage_error() {
        assert_eq!(cli!(), 2);
    }

    #[test]
    fn help() {
        assert_eq!(cli!("--help"), 0);
        assert_eq!(cli!("help"), 0);
    }

    #[test]
    fn version() {
        assert_eq!(cli!("--version"), 0);
    }

    #[test]
    fn unknown_flag() {
        assert_eq!(cli!("--frobnicate", "cat", "x"), 2);
    }

    #[test]
    fn bad_loglevel() {
        assert_eq!(cli!("-l", "loud", "plugins"), 2);
    }

    #[test]
    fn bad_timeout() {
        assert_eq!(cli!("--timeout", "nope", "plugins"), 2);
    }

    #[test]
    fn bad_binding() {
        assert_eq!(cli!("--env", "novalue", "plugins"), 2);
    }

    #[test]
    fn merge_requires_addresses() {
        assert_eq!(cli!("merge"), 2);
    }
}
