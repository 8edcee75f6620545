//! The integer-sequence protocol plugin.
//!
//! Serves the `seq` profile namespace with a single profile, `integers`,
//! which emits `{"i":N}` records: bounded when `count` is given, endless
//! otherwise. An endless producer that dies cleanly of a closed pipe is
//! exactly what backpressure and SIGPIPE tests need.

use jn::{
    common::error::Result,
    host::metadata::{PluginMetadata, PluginMode},
    plugin::{Invocation, PluginShell},
};
use std::io::{self, Write};

fn metadata() -> PluginMetadata {
    serde_json::from_value(serde_json::json!({
        "name": "seq",
        "version": env!("CARGO_PKG_VERSION"),
        "role": "protocol",
        "namespace": "seq",
        "modes": ["read", "inspect-profiles"],
        "matches": ["^seq://"],
        "config_params": ["url", "count", "start"],
        "manages_parameters": true,
    }))
    .expect("static metadata")
}

fn generate(invocation: &Invocation) -> Result<()> {
    let start = invocation.get_u64("start", 0)?;
    let count = match invocation.config.get("count") {
        Some(_) => Some(invocation.get_u64("count", 0)?),
        None => None,
    };

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut index = start;
    loop {
        if let Some(count) = count {
            if index >= start + count {
                break;
            }
        }
        if let Err(e) = writeln!(writer, "{{\"i\":{}}}", index).and_then(|_| writer.flush()) {
            // A consumer that has seen enough closes the pipe; that is a
            // normal way for an endless stream to end.
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e.into());
        }
        index += 1;
    }
    Ok(())
}

fn inspect_profiles(_: &Invocation) -> Result<()> {
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "{}",
        serde_json::json!({
            "namespace": "seq",
            "name": "integers",
            "description": "endless or bounded integer records",
        })
    )?;
    Ok(())
}

fn main() {
    let shell = PluginShell::new(metadata())
        .with_mode(PluginMode::Read, generate)
        .with_mode(PluginMode::InspectProfiles, inspect_profiles);
    std::process::exit(shell.run(std::env::args()));
}
