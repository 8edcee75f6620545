//! Per-stage environment modifications.
//!
//! Stages inherit the orchestrator's environment; on top of that the
//! resolver attaches the context variables of the subprocess contract
//! (`JN_HOME`, `JN_PROFILE_DIR`, `JN_WORKING_DIR`, `JN_PROJECT_DIR`) as
//! modifications, which the executor replays onto the child command just
//! before spawn. There is no string syntax for these: the CLI's `--env`
//! flag feeds template bindings, not child environments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;

/// One modification to a stage's child environment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum EnvMod {
    /// Sets the environment variable `key` to `value`, overriding any
    /// inherited value.
    Set { key: String, value: String },
    /// Removes the environment variable `key` from the child environment,
    /// inherited or not.
    Remove { key: String },
}

impl EnvMod {
    /// Convenience method for building EnvMod::Set.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> EnvMod {
        EnvMod::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convenience method for building EnvMod::Remove.
    pub fn remove(key: impl Into<String>) -> EnvMod {
        EnvMod::Remove { key: key.into() }
    }

    /// Returns the key this modification touches.
    pub fn key(&self) -> &str {
        match self {
            EnvMod::Set { key, .. } => key,
            EnvMod::Remove { key } => key,
        }
    }

    /// Replays this modification onto a command under construction.
    pub fn apply(&self, command: &mut Command) {
        match self {
            EnvMod::Set { key, value } => {
                command.env(key, value);
            }
            EnvMod::Remove { key } => {
                command.env_remove(key);
            }
        }
    }
}

impl fmt::Display for EnvMod {
    /// Diagnostic rendering for plan dumps and failure reports; this is
    /// not a parseable syntax.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnvMod::Set { key, value } => write!(f, "{}={}", key, value),
            EnvMod::Remove { key } => write!(f, "unset {}", key),
        }
    }
}

#[cfg(test)]
mod test {
    use super::EnvMod;
    use std::ffi::OsStr;
    use std::process::Command;

    #[test]
    fn apply_sets_and_removes() {
        let mut command = Command::new("true");
        EnvMod::set("JN_HOME", "/opt/jn").apply(&mut command);
        EnvMod::remove("PATH").apply(&mut command);

        let envs: Vec<(&OsStr, Option<&OsStr>)> = command.get_envs().collect();
        assert!(envs.contains(&(OsStr::new("JN_HOME"), Some(OsStr::new("/opt/jn")))));
        // A removal shows up as an explicit None override.
        assert!(envs.contains(&(OsStr::new("PATH"), None)));
    }

    #[test]
    fn keys() {
        assert_eq!(EnvMod::set("a", "b").key(), "a");
        assert_eq!(EnvMod::remove("c").key(), "c");
    }

    #[test]
    fn display() {
        assert_eq!(EnvMod::set("JN_WORKING_DIR", "/work").to_string(), "JN_WORKING_DIR=/work");
        assert_eq!(EnvMod::remove("TMPDIR").to_string(), "unset TMPDIR");
    }
}
