//! Support for writing JN plugins in Rust.
//!
//! A plugin is any executable honoring the subprocess contract: respond to
//! `--jn-meta` with a metadata JSON object, and to `--mode=<mode>` by
//! moving bytes between stdin and stdout. [`PluginShell`] implements the
//! argv plumbing so a Rust plugin only supplies its metadata and one
//! handler per declared mode. The bundled null plugins are built on it.
//!
//! [`PluginShell`]: ./struct.PluginShell.html

use crate::{
    common::error::{inv_cfg, Result},
    host::metadata::{parse_mode, PluginMetadata, PluginMode},
};
use std::collections::{BTreeMap, HashMap};

/// The parsed command line of one plugin invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// The requested mode.
    pub mode: PluginMode,

    /// `--key=value` options, in key order.
    pub config: BTreeMap<String, String>,

    /// The positional address argument, when given.
    pub address: Option<String>,
}

impl Invocation {
    /// Parses an option as an integer, with a default when absent.
    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.config.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse::<u64>()
                .or_else(|_| inv_cfg(format!("option --{} expects an integer, not '{}'", key, value))),
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.config.get(key).map(|s| s.as_str()), Some("true") | Some("1"))
    }
}

type Handler = Box<dyn Fn(&Invocation) -> Result<()>>;

/// Couples a plugin's metadata with its mode handlers and implements the
/// subprocess contract around them.
pub struct PluginShell {
    metadata: PluginMetadata,
    handlers: HashMap<PluginMode, Handler>,
}

impl PluginShell {
    pub fn new(metadata: PluginMetadata) -> PluginShell {
        PluginShell {
            metadata,
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for one mode. The mode must be declared in the
    /// metadata; the orchestrator will never request an undeclared one, and
    /// the shell refuses it too.
    pub fn with_mode(
        mut self,
        mode: PluginMode,
        handler: impl Fn(&Invocation) -> Result<()> + 'static,
    ) -> PluginShell {
        self.handlers.insert(mode, Box::new(handler));
        self
    }

    /// Runs the plugin: parses the argv, dispatches, and returns the
    /// process exit code.
    pub fn run<I>(&self, args: I) -> i32
    where
        I: IntoIterator<Item = String>,
    {
        match self.dispatch(args) {
            Ok(()) => 0,
            Err(Usage(message)) => {
                eprintln!("{}", message);
                2
            }
            Err(Failed(error)) => {
                eprintln!("{}", error);
                1
            }
        }
    }

    fn dispatch<I>(&self, args: I) -> std::result::Result<(), ShellError>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().skip(1).collect();

        if args.iter().any(|a| a == "--jn-meta") {
            let json = serde_json::to_string(&self.metadata)
                .map_err(|e| Failed(crate::common::error::Error::from(e)))?;
            println!("{}", json);
            return Ok(());
        }

        let invocation = parse_invocation(&args).map_err(Usage)?;
        if !self.metadata.modes.contains(&invocation.mode) {
            return Err(Usage(format!(
                "mode '{}' is not supported by this plugin",
                invocation.mode
            )));
        }
        let handler = self
            .handlers
            .get(&invocation.mode)
            .ok_or_else(|| Usage(format!("mode '{}' has no handler", invocation.mode)))?;
        handler(&invocation).map_err(Failed)
    }
}

enum ShellError {
    Usage(String),
    Failed(crate::common::error::Error),
}
use ShellError::{Failed, Usage};

fn parse_invocation(args: &[String]) -> std::result::Result<Invocation, String> {
    let mut mode = None;
    let mut config = BTreeMap::new();
    let mut address = None;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--mode=") {
            mode = Some(parse_mode(value).map_err(|e| e.to_string())?);
        } else if let Some(rest) = arg.strip_prefix("--") {
            let mut splitter = rest.splitn(2, '=');
            let key = splitter.next().unwrap();
            match splitter.next() {
                Some(value) => {
                    config.insert(key.to_string(), value.to_string());
                }
                None => return Err(format!("option '--{}' is missing a value", key)),
            }
        } else if address.is_none() {
            address = Some(arg.clone());
        } else {
            return Err(format!("unexpected argument '{}'", arg));
        }
    }
    let mode = mode.ok_or_else(|| "--mode=<mode> is required".to_string())?;
    Ok(Invocation {
        mode,
        config,
        address,
    })
}
