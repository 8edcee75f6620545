//! The NDJSON identity plugin.
//!
//! Passes NDJSON records from stdin to stdout unchanged. This is the
//! resolver's fallback for stdio addresses, the consumer stage behind
//! `head`/`tail`, and the simplest possible exercise of the plugin
//! subprocess contract.

use jn::{
    common::error::Result,
    host::metadata::{PluginMetadata, PluginMode},
    plugin::{Invocation, PluginShell},
};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

fn metadata() -> PluginMetadata {
    serde_json::from_value(serde_json::json!({
        "name": "ndjson",
        "version": env!("CARGO_PKG_VERSION"),
        "role": "format",
        "modes": ["read", "write", "filter"],
        "matches": [r".*\.ndjson$", r".*\.jsonl$"],
        "config_params": ["limit", "skip", "tail", "strict"],
    }))
    .expect("static metadata")
}

/// Copies records from stdin to stdout, honoring skip/limit/tail bounds.
/// Records are flushed one by one: the plugin sits in streaming pipelines
/// and must not hold data back.
fn pump(invocation: &Invocation) -> Result<()> {
    let skip = invocation.get_u64("skip", 0)?;
    let limit = invocation.get_u64("limit", u64::max_value())?;
    let tail = match invocation.config.get("tail") {
        Some(_) => Some(invocation.get_u64("tail", 0)? as usize),
        None => None,
    };
    let strict = invocation.get_bool("strict");

    let stdin = io::stdin();
    let reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    let mut kept: VecDeque<String> = VecDeque::new();
    let mut seen = 0u64;
    let mut emitted = 0u64;

    for line in reader.lines() {
        let line = line?;
        if strict {
            serde_json::from_str::<serde_json::Value>(&line).map_err(|e| {
                jn::common::error::ErrorKind::InvalidConfigValue(format!(
                    "input line {} is not valid JSON: {}",
                    seen + 1,
                    e
                ))
            })?;
        }
        seen += 1;
        if seen <= skip {
            continue;
        }
        match tail {
            Some(window) => {
                if kept.len() == window {
                    kept.pop_front();
                }
                kept.push_back(line);
            }
            None => {
                if emitted >= limit {
                    break;
                }
                if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        return Ok(());
                    }
                    return Err(e.into());
                }
                emitted += 1;
            }
        }
    }

    for line in kept {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() {
    let shell = PluginShell::new(metadata())
        .with_mode(PluginMode::Read, pump)
        .with_mode(PluginMode::Write, pump)
        .with_mode(PluginMode::Filter, pump);
    std::process::exit(shell.run(std::env::args()));
}
