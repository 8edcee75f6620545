//! Plugin metadata.
//!
//! Every plugin describes itself with a single JSON object: natively
//! executable plugins emit it on stdout when invoked with `--jn-meta`,
//! script plugins embed the same data declaratively in a framed comment
//! block near the top of the file. Unknown fields are tolerated and
//! preserved.

use crate::common::error::{meta_err, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// The role a plugin plays in a pipeline.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, EnumString,
    Display, EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    #[strum(to_string = "protocol")]
    Protocol,
    #[strum(to_string = "format")]
    Format,
    #[strum(to_string = "filter")]
    Filter,
    #[strum(to_string = "compression")]
    Compression,
}

impl PluginRole {
    /// Rank used to break pattern-length ties during resolution; lower is
    /// stronger. The ordering is protocol > format > filter > compression.
    pub fn rank(&self) -> u8 {
        match self {
            PluginRole::Protocol => 0,
            PluginRole::Format => 1,
            PluginRole::Filter => 2,
            PluginRole::Compression => 3,
        }
    }
}

/// An operational mode a plugin can be asked to run in, passed on the child
/// command line as `--mode=<mode>`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, EnumString,
    Display, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
pub enum PluginMode {
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "write")]
    Write,
    #[strum(to_string = "raw")]
    Raw,
    #[strum(to_string = "filter")]
    Filter,
    #[strum(to_string = "inspect-profiles", serialize = "inspect_profiles")]
    InspectProfiles,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The metadata record one plugin publishes about itself.
///
/// This mirrors the `--jn-meta` JSON object field for field; anything the
/// orchestrator does not recognize lands in `extra` and survives a cache
/// round trip.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginMetadata {
    /// Unique identifier within a discovery layer.
    pub name: String,

    /// Optional version string, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// The plugin's role.
    pub role: PluginRole,

    /// The modes the plugin supports. The orchestrator never passes a mode
    /// that is not declared here.
    pub modes: BTreeSet<PluginMode>,

    /// Regular expressions matched against addresses during resolution.
    pub matches: Vec<String>,

    /// For protocol plugins: the profile namespace served by this plugin
    /// (`@<namespace>/...` addresses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Names of the `--key=value` options the plugin recognizes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_params: Vec<String>,

    /// When set, the resolver passes every address parameter to the plugin
    /// unchanged and synthesizes no filter stage.
    #[serde(default, skip_serializing_if = "is_false")]
    pub manages_parameters: bool,

    /// Whether the plugin can open container formats (archives, workbooks).
    #[serde(default, skip_serializing_if = "is_false")]
    pub supports_container: bool,

    /// Whether stdout carries NDJSON; defaults by role when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emits_ndjson: Option<bool>,

    /// Whether stdin expects NDJSON; defaults by role when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepts_ndjson: Option<bool>,

    /// Unrecognized fields, preserved but unused.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PluginMetadata {
    /// Parses and validates a `--jn-meta` JSON response.
    pub fn from_json(bytes: &[u8]) -> Result<PluginMetadata> {
        let metadata: PluginMetadata = serde_json::from_slice(bytes)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Checks the internal consistency rules that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return meta_err("plugin name may not be empty");
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return meta_err(format!("invalid plugin name '{}'", self.name));
        }
        if self.modes.is_empty() {
            return meta_err(format!("plugin '{}' declares no modes", self.name));
        }
        if self.role == PluginRole::Protocol && self.namespace.is_none() {
            return meta_err(format!(
                "protocol plugin '{}' does not declare a namespace",
                self.name
            ));
        }
        for pattern in &self.matches {
            Regex::new(pattern).map_err(|e| {
                crate::common::error::ErrorKind::PluginMetadataError(format!(
                    "plugin '{}' has an invalid match pattern '{}': {}",
                    self.name, pattern, e
                ))
            })?;
        }
        Ok(())
    }

    /// Compiles the declared match patterns.
    ///
    /// `validate` has already established they compile; this exists so the
    /// registry can hold compiled matchers separately from the serialized
    /// descriptor.
    pub fn compiled_matchers(&self) -> Result<Vec<Regex>> {
        self.matches
            .iter()
            .map(|p| Regex::new(p).map_err(|e| e.into()))
            .collect()
    }

    /// Whether the plugin's stdout carries NDJSON, falling back to the
    /// conventional answer for its role.
    pub fn ndjson_output(&self) -> bool {
        self.emits_ndjson.unwrap_or(match self.role {
            PluginRole::Compression => false,
            _ => true,
        })
    }

    /// Whether the plugin's stdin expects NDJSON, falling back to the
    /// conventional answer for its role.
    pub fn ndjson_input(&self) -> bool {
        self.accepts_ndjson.unwrap_or(match self.role {
            PluginRole::Filter => true,
            _ => false,
        })
    }
}

/// Sentinel opening a script metadata block.
pub const SCRIPT_HEADER_BEGIN: &str = "# jn-plugin:";
/// Sentinel closing a script metadata block.
pub const SCRIPT_HEADER_END: &str = "# end-jn-plugin";

/// List-valued metadata keys, which accept either a JSON array or a
/// comma-separated value in script headers.
const LIST_KEYS: &[&str] = &["modes", "matches", "config_params"];
/// Boolean-valued metadata keys.
const BOOL_KEYS: &[&str] = &[
    "manages_parameters",
    "supports_container",
    "emits_ndjson",
    "accepts_ndjson",
];

/// Extracts plugin metadata from a script source prefix.
///
/// The header is a framed region of comment lines:
///
/// ```text
/// # jn-plugin:
/// #   name: csv
/// #   role: format
/// #   modes: read, write
/// #   matches: ["\\.csv$"]
/// # end-jn-plugin
/// ```
///
/// Returns `Ok(None)` when no opening sentinel is present (the file is not
/// a plugin); a present but malformed block is an error.
pub fn parse_script_header(source: &str) -> Result<Option<PluginMetadata>> {
    let mut lines = source.lines();
    if !lines.any(|l| l.trim() == SCRIPT_HEADER_BEGIN) {
        return Ok(None);
    }

    let mut map = serde_json::Map::new();
    let mut closed = false;
    for line in &mut lines {
        let line = line.trim();
        if line == SCRIPT_HEADER_END {
            closed = true;
            break;
        }
        let line = match line.strip_prefix('#') {
            Some(rest) => rest.trim(),
            None => return meta_err("metadata block interrupted by a non-comment line"),
        };
        if line.is_empty() {
            continue;
        }
        let mut splitter = line.splitn(2, ':');
        let key = splitter.next().unwrap().trim();
        let value = match splitter.next() {
            Some(v) => v.trim(),
            None => return meta_err(format!("metadata line '{}' has no value", line)),
        };
        map.insert(key.to_string(), parse_header_value(key, value)?);
    }
    if !closed {
        return meta_err("metadata block is not terminated");
    }

    let metadata: PluginMetadata = serde_json::from_value(serde_json::Value::Object(map))?;
    metadata.validate()?;
    Ok(Some(metadata))
}

/// Interprets one header value according to the key's declared type.
fn parse_header_value(key: &str, value: &str) -> Result<serde_json::Value> {
    if LIST_KEYS.contains(&key) {
        if value.starts_with('[') {
            return Ok(serde_json::from_str(value)?);
        }
        return Ok(serde_json::Value::Array(
            value
                .split(',')
                .map(|v| serde_json::Value::String(v.trim().to_string()))
                .collect(),
        ));
    }
    if BOOL_KEYS.contains(&key) {
        return match value {
            "true" => Ok(serde_json::Value::Bool(true)),
            "false" => Ok(serde_json::Value::Bool(false)),
            _ => meta_err(format!("expected true or false for '{}', not '{}'", key, value)),
        };
    }
    Ok(serde_json::Value::String(value.to_string()))
}

/// Script extensions the discovery scan recognizes, with the interpreter
/// used to execute them.
pub fn interpreter_for(extension: &str) -> Option<&'static str> {
    match extension {
        "py" => Some("python3"),
        "sh" => Some("sh"),
        "js" => Some("node"),
        "rb" => Some("ruby"),
        _ => None,
    }
}

/// Parses a `--mode=` string, accepting the same spellings as the metadata
/// JSON.
pub fn parse_mode(s: &str) -> Result<PluginMode> {
    PluginMode::from_str(s).map_err(|_| {
        crate::common::error::ErrorKind::InvalidConfigValue(format!("unknown mode '{}'", s)).into()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "name": "csv",
            "role": "format",
            "modes": ["read", "write"],
            "matches": [".*\\.csv$"]
        }"#
    }

    #[test]
    fn parse_minimal() {
        let m = PluginMetadata::from_json(minimal_json().as_bytes()).unwrap();
        assert_eq!(m.name, "csv");
        assert_eq!(m.role, PluginRole::Format);
        assert!(m.modes.contains(&PluginMode::Read));
        assert!(m.modes.contains(&PluginMode::Write));
        assert!(!m.manages_parameters);
        assert!(m.ndjson_output());
        assert!(!m.ndjson_input());
    }

    #[test]
    fn unknown_fields_preserved() {
        let m = PluginMetadata::from_json(
            br#"{
                "name": "csv",
                "role": "format",
                "modes": ["read"],
                "matches": [],
                "author": "someone"
            }"#,
        )
        .unwrap();
        assert_eq!(
            m.extra.get("author"),
            Some(&serde_json::Value::String("someone".to_string()))
        );
        // And they survive re-serialization.
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("author"));
    }

    #[test]
    fn protocol_requires_namespace() {
        let err = PluginMetadata::from_json(
            br#"{"name": "api", "role": "protocol", "modes": ["read"], "matches": []}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("namespace"));

        let m = PluginMetadata::from_json(
            br#"{
                "name": "api",
                "role": "protocol",
                "modes": ["read", "inspect-profiles"],
                "matches": [],
                "namespace": "api"
            }"#,
        )
        .unwrap();
        assert!(m.modes.contains(&PluginMode::InspectProfiles));
    }

    #[test]
    fn bad_pattern_rejected() {
        let err = PluginMetadata::from_json(
            br#"{"name": "x", "role": "format", "modes": ["read"], "matches": ["("]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid match pattern"));
    }

    #[test]
    fn compression_role_defaults_to_bytes() {
        let m = PluginMetadata::from_json(
            br#"{"name": "gz", "role": "compression", "modes": ["raw", "write"], "matches": ["\\.gz$"]}"#,
        )
        .unwrap();
        assert!(!m.ndjson_output());
    }

    #[test]
    fn script_header() {
        let source = "\
#!/bin/sh
# jn-plugin:
#   name: csv
#   role: format
#   modes: read, write
#   matches: [\"\\\\.csv$\"]
#   config_params: delimiter, header
#   manages_parameters: false
#   vendor: acme
# end-jn-plugin
exec cat
";
        let m = parse_script_header(source).unwrap().unwrap();
        assert_eq!(m.name, "csv");
        assert_eq!(m.config_params, vec!["delimiter", "header"]);
        assert_eq!(m.matches, vec!["\\.csv$"]);
        assert_eq!(
            m.extra.get("vendor"),
            Some(&serde_json::Value::String("acme".to_string()))
        );
    }

    #[test]
    fn script_header_absent() {
        assert!(parse_script_header("#!/bin/sh\nexec cat\n")
            .unwrap()
            .is_none());
    }

    #[test]
    fn script_header_unterminated() {
        let source = "# jn-plugin:\n#   name: x\n";
        assert!(parse_script_header(source).is_err());
    }

    #[test]
    fn mode_strings() {
        assert_eq!(PluginMode::InspectProfiles.to_string(), "inspect-profiles");
        assert_eq!(parse_mode("read").unwrap(), PluginMode::Read);
        assert_eq!(
            parse_mode("inspect-profiles").unwrap(),
            PluginMode::InspectProfiles
        );
        assert!(parse_mode("evaluate").is_err());
    }

    #[test]
    fn role_ranks() {
        assert!(PluginRole::Protocol.rank() < PluginRole::Format.rank());
        assert!(PluginRole::Format.rank() < PluginRole::Filter.rank());
        assert!(PluginRole::Filter.rank() < PluginRole::Compression.rank());
    }
}
