//! Address parsing.
//!
//! An address is the opaque string a user hands to the orchestrator to name
//! a data source or sink: a file path (`data.csv.gz?delimiter=,`), a URL
//! (`http://host/path~json`), a profile reference (`@weather/current`), a
//! bare plugin reference (`@jq`), or standard I/O (`-`).
//!
//! Parsing is a *lossless, total* decomposition: every input string yields
//! an [`Address`]. Semantic validation (does a plugin match? are the
//! parameters well formed?) is the resolver's job; to keep that split, a
//! malformed query string is recorded on the address and only reported when
//! the resolver asks for validated parameters.
//!
//! The lexer scans right-to-left for `?` and then right-to-left for `~`, so
//! path characters never collide with the separators.
//!
//! [`Address`]: ./struct.Address.html

use crate::common::error::{inv_addr, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

lazy_static! {
    /// Matches `scheme://...` per RFC 3986 scheme syntax.
    static ref URL_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").unwrap();
}

/// Classification of an address, determined purely from its shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum AddressKind {
    /// `-`, `stdin` or `stdout`.
    Stdio,
    /// A plain file path (the fallback classification).
    File,
    /// `scheme://...`
    Url,
    /// `@namespace/name`
    Profile,
    /// `@plugin-name`
    Plugin,
}

/// Recognized compression suffixes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Maps a file extension to a compression variant.
    pub fn from_extension(extension: &str) -> Option<Compression> {
        match extension {
            "gz" => Some(Compression::Gzip),
            "bz2" => Some(Compression::Bzip2),
            "xz" => Some(Compression::Xz),
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    /// The canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Bzip2 => "bz2",
            Compression::Xz => "xz",
            Compression::Zstd => "zst",
        }
    }
}

/// The ordered parameter list parsed from an address query string.
///
/// Order is preserved so an address can be re-serialized exactly; lookups
/// apply the last-value-wins rule. A query string that failed to parse is
/// retained verbatim together with the offending substring, and surfaces as
/// an error only when [`validated`] is called.
///
/// [`validated`]: #method.validated
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Parameters {
    pairs: Vec<(String, String)>,
    raw: Option<String>,
    malformed: Option<String>,
}

impl Parameters {
    /// Parses a query string of `key=value` pairs separated by `&`.
    ///
    /// Values are percent-decoded; keys are taken literally. This never
    /// fails: malformed input is recorded for later reporting.
    pub fn parse(query: &str) -> Parameters {
        let mut pairs = Vec::new();
        for segment in query.split('&') {
            let mut splitter = segment.splitn(2, '=');
            let key = splitter.next().unwrap();
            let value = match splitter.next() {
                Some(value) => value,
                None => {
                    return Parameters {
                        pairs: Vec::new(),
                        raw: Some(query.to_string()),
                        malformed: Some(segment.to_string()),
                    };
                }
            };
            if key.is_empty() {
                return Parameters {
                    pairs: Vec::new(),
                    raw: Some(query.to_string()),
                    malformed: Some(segment.to_string()),
                };
            }
            match percent_decode(value) {
                Ok(value) => pairs.push((key.to_string(), value)),
                Err(offending) => {
                    return Parameters {
                        pairs: Vec::new(),
                        raw: Some(query.to_string()),
                        malformed: Some(offending),
                    };
                }
            }
        }
        Parameters {
            pairs,
            raw: Some(query.to_string()),
            malformed: None,
        }
    }

    /// Returns an empty parameter list (no query string present).
    pub fn empty() -> Parameters {
        Parameters::default()
    }

    /// Returns the parsed pairs, or the deferred syntax error for a
    /// malformed query string.
    pub fn validated(&self) -> Result<&[(String, String)]> {
        match &self.malformed {
            Some(offending) => inv_addr(format!("malformed query parameter '{}'", offending)),
            None => Ok(&self.pairs),
        }
    }

    /// Looks up a parameter; on duplicate keys the last value wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.raw.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.pairs.iter()
    }

    /// Re-serializes the query string. The verbatim original is used when
    /// present so even malformed input round-trips.
    fn to_query_string(&self) -> Option<&str> {
        self.raw.as_ref().map(|s| s.as_str())
    }
}

/// A parsed address: the original text plus its decomposition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Address {
    /// The original input text.
    raw: String,

    /// Shape classification.
    kind: AddressKind,

    /// The body without format-override or query-string suffixes, and with
    /// any compression extension stripped.
    base: String,

    /// Format token supplied after a `~` separator, e.g. `~csv`.
    format_override: Option<String>,

    /// Compression suffix detected on the base.
    compression: Option<Compression>,

    /// Parameters parsed from the query-string suffix.
    parameters: Parameters,
}

/// Returns true if the given token can be a format override: short,
/// alphanumeric (plus `-`, `_`, `+`), and free of path separators and dots.
fn is_format_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 16
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+')
}

/// Percent-decodes `%HH` escapes. `+` is left alone. Returns the offending
/// substring on an invalid escape.
fn percent_decode(s: &str) -> std::result::Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3).ok_or_else(|| s[i..].to_string())?;
            let value =
                u8::from_str_radix(hex, 16).map_err(|_| s[i..(i + 3).min(s.len())].to_string())?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| s.to_string())
}

impl Address {
    /// Parses an address string.
    ///
    /// This is total: every input produces an address. The decomposition is
    /// purely syntactic; whether the result resolves to anything is decided
    /// later, against a registry.
    pub fn parse(raw: impl Into<String>) -> Address {
        let raw = raw.into();

        // Split off the query string at the rightmost '?'.
        let (prefix, parameters) = match raw.rfind('?') {
            Some(idx) => (&raw[..idx], Parameters::parse(&raw[idx + 1..])),
            None => (raw.as_str(), Parameters::empty()),
        };

        // Split off the format override at the rightmost eligible '~'. A
        // leading '~' (home-relative path) never qualifies.
        let (body, format_override) = match prefix.rfind('~') {
            Some(idx) if idx > 0 && is_format_token(&prefix[idx + 1..]) => {
                (&prefix[..idx], Some(prefix[idx + 1..].to_string()))
            }
            _ => (prefix, None),
        };

        // Classify.
        let kind = if body == "-" || body == "stdin" || body == "stdout" {
            AddressKind::Stdio
        } else if let Some(rest) = body.strip_prefix('@') {
            if rest.contains('/') {
                AddressKind::Profile
            } else {
                AddressKind::Plugin
            }
        } else if URL_RE.is_match(body) {
            AddressKind::Url
        } else {
            AddressKind::File
        };

        // Detect a compression suffix on file and URL bodies.
        let (base, compression) = match kind {
            AddressKind::File | AddressKind::Url => {
                let compression = Path::new(body)
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(Compression::from_extension);
                match compression {
                    // The extension is detected through the path-component
                    // API, then stripped as the literal suffix it is, which
                    // also keeps URL authority segments intact.
                    Some(compression) => (
                        body[..body.len() - compression.extension().len() - 1].to_string(),
                        Some(compression),
                    ),
                    None => (body.to_string(), None),
                }
            }
            _ => (body.to_string(), None),
        };

        Address {
            raw,
            kind,
            base,
            format_override,
            compression,
            parameters,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// The body without query, override, or compression suffixes.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn format_override(&self) -> Option<&str> {
        self.format_override.as_ref().map(|s| s.as_str())
    }

    pub fn compression(&self) -> Option<Compression> {
        self.compression
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The base with the compression suffix restored; what a pattern match
    /// against the *stored* form of the data should see.
    pub fn base_with_compression(&self) -> String {
        match self.compression {
            Some(compression) => format!("{}.{}", self.base, compression.extension()),
            None => self.base.clone(),
        }
    }

    /// For profile and plugin addresses, the text after the `@`.
    pub fn reference(&self) -> Option<&str> {
        match self.kind {
            AddressKind::Profile | AddressKind::Plugin => Some(&self.base[1..]),
            _ => None,
        }
    }

    /// For profile addresses, the namespace component of `@ns/name`.
    pub fn namespace(&self) -> Option<&str> {
        match self.kind {
            AddressKind::Profile => self.reference().and_then(|r| r.split('/').next()),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    /// Re-serializes the address from its components, reproducing the
    /// original input for inputs without ambiguous escapes.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.base_with_compression())?;
        if let Some(fmt_override) = &self.format_override {
            write!(f, "~{}", fmt_override)?;
        }
        if let Some(query) = self.parameters.to_query_string() {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}
