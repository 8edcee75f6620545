//! `${env.X}` / `${params.Y}` template substitution.
//!
//! Substitution runs over stage argv, working directory, and environment
//! values before spawn. A placeholder with no binding is a hard error, not
//! an empty substitution: silently injecting empty strings where paths are
//! expected hides real mistakes.

use crate::common::error::{inv_cfg, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\$\{(env|params)\.([A-Za-z0-9_]+)\}").unwrap();
}

/// The substitution bindings collected from the command line (`--env K=V`,
/// `--param k=v`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    env: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> TemplateContext {
        TemplateContext::default()
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Expands every placeholder in the input. Returns the input unchanged
    /// when it contains none.
    pub fn expand(&self, input: &str) -> Result<String> {
        // Scan first so a missing key can fail the call; Regex::replace_all
        // has no fallible variant.
        for captures in PLACEHOLDER_RE.captures_iter(input) {
            if self.lookup(&captures).is_none() {
                return inv_cfg(format!(
                    "no value for template placeholder '{}'",
                    captures.get(0).unwrap().as_str()
                ));
            }
        }
        Ok(PLACEHOLDER_RE
            .replace_all(input, |captures: &Captures| {
                self.lookup(captures).unwrap().to_string()
            })
            .into_owned())
    }

    fn lookup(&self, captures: &Captures) -> Option<&str> {
        let table = match captures.get(1).unwrap().as_str() {
            "env" => &self.env,
            _ => &self.params,
        };
        table
            .get(captures.get(2).unwrap().as_str())
            .map(|s| s.as_str())
    }
}
