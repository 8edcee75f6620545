//! Command line definitions for the `jn` binary.

use jn::common::error::{inv_cfg, Error};
use jn::common::log::{tee_file::TeeFileConfiguration, LoglevelFilter};
use jn::host::configuration::{StreamCaptureMode, Timeout};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

/// A `key=value` binding for template substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub key: String,
    pub value: String,
}

impl FromStr for Binding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut splitter = s.splitn(2, '=');
        let key = splitter.next().unwrap().to_string();
        match splitter.next() {
            Some(value) if !key.is_empty() => Ok(Binding {
                key,
                value: value.to_string(),
            }),
            _ => inv_cfg(format!("expected a key=value binding, not '{}'", s)),
        }
    }
}

/// Wrapper to parse loglevel filters through strum with a friendly error.
fn parse_loglevel(s: &str) -> Result<LoglevelFilter, String> {
    LoglevelFilter::from_str(s).map_err(|_| {
        format!(
            "{} is not a valid loglevel filter, valid values are off, fatal, error, \
             warn, note, info, debug, or trace",
            s
        )
    })
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "jn",
    about = "Streaming NDJSON pipeline orchestrator",
    raw(setting = "structopt::clap::AppSettings::SubcommandRequiredElseHelp")
)]
pub struct Opts {
    /// Sets the loglevel for diagnostics on standard error.
    #[structopt(
        short = "l",
        long = "loglevel",
        default_value = "info",
        parse(try_from_str = "parse_loglevel")
    )]
    pub loglevel: LoglevelFilter,

    /// Also logs records to a file; formatted as <level>:<path>.
    #[structopt(long = "tee")]
    pub tee: Vec<TeeFileConfiguration>,

    /// Additional plugin directory, scanned at the highest priority.
    #[structopt(long = "plugin-dir", parse(from_os_str))]
    pub plugin_dir: Vec<PathBuf>,

    /// Disables the registry snapshot cache for this invocation.
    #[structopt(long = "no-registry-cache")]
    pub no_registry_cache: bool,

    /// Defines a template environment binding, as in --env OUT=/tmp;
    /// referenced as ${env.OUT} in addresses and parameters.
    #[structopt(long = "env")]
    pub env: Vec<Binding>,

    /// Defines a template parameter binding, referenced as ${params.X}.
    #[structopt(long = "param")]
    pub param: Vec<Binding>,

    /// Aborts the pipeline after this wall-clock time (e.g. 30s, 5m).
    #[structopt(long = "timeout")]
    pub timeout: Option<Timeout>,

    /// Grace period between SIGTERM and SIGKILL on cancellation.
    #[structopt(long = "grace")]
    pub grace: Option<Timeout>,

    /// How stage stderr is handled: pass, null, or a loglevel to capture
    /// at.
    #[structopt(long = "stderr-mode")]
    pub stderr_mode: Option<StreamCaptureMode>,

    #[structopt(subcommand)]
    pub command: CommandOpt,
}

#[derive(Debug, StructOpt)]
pub enum CommandOpt {
    /// Reads records from an address and writes NDJSON to stdout.
    #[structopt(name = "cat")]
    Cat {
        /// The source address, e.g. data.csv.gz or @weather/current.
        address: String,
    },

    /// Reads NDJSON from stdin and writes records to an address.
    #[structopt(name = "put")]
    Put {
        /// The sink address, e.g. out.csv or out.csv.gz.
        address: String,
    },

    /// Filters NDJSON from stdin to stdout through the filter plugin.
    #[structopt(name = "filter")]
    Filter {
        /// The filter expression, passed to the plugin as --expr=....
        expression: String,
    },

    /// Reads the first N records of an address.
    #[structopt(name = "head")]
    Head {
        /// Number of records to keep.
        #[structopt(short = "n", long = "records", default_value = "10")]
        count: u64,
        address: String,
    },

    /// Reads the last N records of an address.
    #[structopt(name = "tail")]
    Tail {
        /// Number of records to keep.
        #[structopt(short = "n", long = "records", default_value = "10")]
        count: u64,
        address: String,
    },

    /// Reads several addresses in turn into one output stream.
    #[structopt(name = "merge")]
    Merge {
        /// The source addresses, read in the order given.
        #[structopt(raw(required = "true"))]
        addresses: Vec<String>,
    },

    /// Lists the discovered plugins.
    #[structopt(name = "plugins")]
    Plugins {
        /// Emits one metadata JSON object per line instead of a table.
        #[structopt(long = "json")]
        json: bool,
    },

    /// Lists the profiles served by a namespace's protocol plugin.
    #[structopt(name = "profiles")]
    Profiles {
        /// The profile namespace, without the leading @.
        namespace: String,
    },
}
