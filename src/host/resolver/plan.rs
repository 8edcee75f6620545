//! Execution plans: the ordered stage list produced by resolution and
//! consumed by the executor.

use crate::{
    common::error::{internal, Result},
    host::{
        configuration::EnvMod,
        metadata::{PluginMode, PluginRole},
        registry::PluginDescriptor,
    },
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Where a stage's standard input comes from. The set is closed; adjacent
/// stages are wired with `PreviousStage`, the plan's first stage uses one of
/// the others.
#[derive(Debug, Clone, PartialEq)]
pub enum StdinSource {
    /// Inherit the orchestrator's stdin.
    InheritedStdin,
    /// The read end of the pipe fed by the previous stage.
    PreviousStage,
    /// The orchestrator opens this file and hands over the descriptor.
    OpenFile(PathBuf),
    /// The orchestrator connects a URL fetch. Rare: URL fetching is
    /// normally a protocol plugin's job.
    OpenUrl(String),
}

/// Where a stage's standard output goes.
#[derive(Debug, Clone, PartialEq)]
pub enum StdoutSink {
    /// Inherit the orchestrator's stdout.
    InheritedStdout,
    /// The write end of the pipe feeding the next stage.
    NextStage,
    /// The orchestrator creates this file and hands over the descriptor.
    OpenFile(PathBuf),
}

/// A single subprocess specification inside an [`ExecutionPlan`].
///
/// Stages borrow their descriptor from the registry; they are built by the
/// resolver and consumed read-only by the executor.
///
/// [`ExecutionPlan`]: ./struct.ExecutionPlan.html
#[derive(Debug, Clone)]
pub struct Stage<'r> {
    /// The plugin implementing this stage.
    pub plugin: &'r PluginDescriptor,

    /// Instance name used in diagnostics (`csv`, `gz`, ...).
    pub name: String,

    /// The `--mode=` value the plugin receives.
    pub mode: PluginMode,

    /// `--key=value` options, serialized on the command line in key order.
    pub config: BTreeMap<String, String>,

    /// Optional positional address argument, passed last.
    pub address_arg: Option<String>,

    /// Environment modifications applied on top of the inherited parent
    /// environment.
    pub env: Vec<EnvMod>,

    /// Working directory for the child.
    pub cwd: PathBuf,

    pub stdin_source: StdinSource,
    pub stdout_sink: StdoutSink,
}

impl<'r> Stage<'r> {
    /// The fully resolved command vector, including the executable (and
    /// interpreter, for script plugins).
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.plugin.invocation();
        argv.push(format!("--mode={}", self.mode));
        for (key, value) in &self.config {
            argv.push(format!("--{}={}", key, value));
        }
        if let Some(address) = &self.address_arg {
            argv.push(address.clone());
        }
        argv
    }

    /// Whether the bytes this stage writes to stdout are NDJSON records, as
    /// opposed to raw bytes. Derived from the plugin role and stage mode.
    pub fn emits_ndjson(&self) -> bool {
        match (self.plugin.role(), self.mode) {
            (PluginRole::Compression, _) => false,
            (_, PluginMode::Raw) => false,
            (_, PluginMode::Write) => false,
            _ => self.plugin.metadata.ndjson_output(),
        }
    }

    /// Whether this stage expects NDJSON on stdin.
    pub fn accepts_ndjson(&self) -> bool {
        match (self.plugin.role(), self.mode) {
            (PluginRole::Compression, _) => false,
            (_, PluginMode::Raw) => false,
            (_, PluginMode::Read) => false,
            _ => true,
        }
    }
}

impl<'r> fmt::Display for Stage<'r> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name, self.mode)
    }
}

/// The ordered sequence of stages resolution produced for one address.
#[derive(Debug, Clone)]
pub struct ExecutionPlan<'r> {
    stages: Vec<Stage<'r>>,
}

impl<'r> ExecutionPlan<'r> {
    /// Freezes a stage list into a plan, enforcing the structural
    /// invariants. Violations are internal errors: the resolver should
    /// never produce an invalid plan.
    pub fn new(stages: Vec<Stage<'r>>, max_stages: usize) -> Result<ExecutionPlan<'r>> {
        if stages.is_empty() {
            return internal("execution plan has no stages");
        }
        if stages.len() > max_stages {
            return internal(format!(
                "execution plan has {} stages, the limit is {}",
                stages.len(),
                max_stages
            ));
        }
        for (index, stage) in stages.iter().enumerate() {
            let first = index == 0;
            let last = index == stages.len() - 1;
            if first == (stage.stdin_source == StdinSource::PreviousStage) {
                return internal(format!(
                    "stage {} has a mis-wired stdin source ({:?})",
                    index, stage.stdin_source
                ));
            }
            if last == (stage.stdout_sink == StdoutSink::NextStage) {
                return internal(format!(
                    "stage {} has a mis-wired stdout sink ({:?})",
                    index, stage.stdout_sink
                ));
            }
        }
        // Adjacent stages must agree on what flows between them: NDJSON, or
        // raw bytes across a compression boundary.
        for pair in stages.windows(2) {
            if pair[0].emits_ndjson() != pair[1].accepts_ndjson() {
                return internal(format!(
                    "stages {} and {} disagree on the intermediate byte format",
                    pair[0], pair[1]
                ));
            }
        }
        Ok(ExecutionPlan { stages })
    }

    pub fn stages(&self) -> &[Stage<'r>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// True when any stage moves raw (non-NDJSON) bytes; file sinks are
    /// then opened in binary-safe fashion.
    pub fn has_raw_stage(&self) -> bool {
        self.stages.iter().any(|s| !s.emits_ndjson())
    }
}

impl<'r> fmt::Display for ExecutionPlan<'r> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", rendered.join(" | "))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::{metadata::PluginMetadata, registry::PluginDescriptor};
    use lazy_static::lazy_static;

    fn descriptor(name: &str, role: &str, modes: &[&str]) -> PluginDescriptor {
        let value = serde_json::json!({
            "name": name,
            "role": role,
            "modes": modes,
            "matches": [],
        });
        PluginDescriptor::new(
            format!("/plugins/jn-{}", name),
            None,
            serde_json::from_value::<PluginMetadata>(value).unwrap(),
            0,
        )
        .unwrap()
    }

    lazy_static! {
        static ref CSV: PluginDescriptor = descriptor("csv", "format", &["read", "write"]);
        static ref GZ: PluginDescriptor = descriptor("gz", "compression", &["raw", "write"]);
    }

    fn stage<'r>(
        plugin: &'r PluginDescriptor,
        mode: PluginMode,
        stdin: StdinSource,
        stdout: StdoutSink,
    ) -> Stage<'r> {
        Stage {
            plugin,
            name: plugin.name().to_string(),
            mode,
            config: BTreeMap::new(),
            address_arg: None,
            env: vec![],
            cwd: PathBuf::from("."),
            stdin_source: stdin,
            stdout_sink: stdout,
        }
    }

    #[test]
    fn argv_is_deterministic() {
        let mut s = stage(
            &CSV,
            PluginMode::Read,
            StdinSource::OpenFile(PathBuf::from("data.csv")),
            StdoutSink::InheritedStdout,
        );
        s.config.insert("header".to_string(), "true".to_string());
        s.config.insert("delimiter".to_string(), ",".to_string());
        s.address_arg = Some("data.csv".to_string());
        assert_eq!(
            s.argv(),
            vec![
                "/plugins/jn-csv",
                "--mode=read",
                "--delimiter=,",
                "--header=true",
                "data.csv",
            ]
        );
    }

    #[test]
    fn single_stage_plan() {
        let plan = ExecutionPlan::new(
            vec![stage(
                &CSV,
                PluginMode::Read,
                StdinSource::OpenFile(PathBuf::from("data.csv")),
                StdoutSink::InheritedStdout,
            )],
            16,
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
        assert!(!plan.has_raw_stage());
    }

    #[test]
    fn decompress_chain_is_valid() {
        let plan = ExecutionPlan::new(
            vec![
                stage(
                    &GZ,
                    PluginMode::Raw,
                    StdinSource::OpenFile(PathBuf::from("data.csv.gz")),
                    StdoutSink::NextStage,
                ),
                stage(
                    &CSV,
                    PluginMode::Read,
                    StdinSource::PreviousStage,
                    StdoutSink::InheritedStdout,
                ),
            ],
            16,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.has_raw_stage());
        assert_eq!(plan.to_string(), "gz(raw) | csv(read)");
    }

    #[test]
    fn miswired_plans_are_rejected() {
        // Two stages not connected by a pipe.
        assert!(ExecutionPlan::new(
            vec![
                stage(
                    &GZ,
                    PluginMode::Raw,
                    StdinSource::InheritedStdin,
                    StdoutSink::InheritedStdout,
                ),
                stage(
                    &CSV,
                    PluginMode::Read,
                    StdinSource::PreviousStage,
                    StdoutSink::InheritedStdout,
                ),
            ],
            16,
        )
        .is_err());

        // Empty plan.
        assert!(ExecutionPlan::new(vec![], 16).is_err());
    }

    #[test]
    fn ndjson_agreement_is_enforced() {
        // csv(read) emits NDJSON but gz(raw) wants raw bytes.
        assert!(ExecutionPlan::new(
            vec![
                stage(
                    &CSV,
                    PluginMode::Read,
                    StdinSource::OpenFile(PathBuf::from("data.csv")),
                    StdoutSink::NextStage,
                ),
                stage(
                    &GZ,
                    PluginMode::Raw,
                    StdinSource::PreviousStage,
                    StdoutSink::InheritedStdout,
                ),
            ],
            16,
        )
        .is_err());
    }

    #[test]
    fn stage_cap_is_enforced() {
        let stages: Vec<Stage> = (0..3)
            .map(|i| {
                let stdin = if i == 0 {
                    StdinSource::InheritedStdin
                } else {
                    StdinSource::PreviousStage
                };
                let stdout = if i == 2 {
                    StdoutSink::InheritedStdout
                } else {
                    StdoutSink::NextStage
                };
                stage(&CSV, PluginMode::Filter, stdin, stdout)
            })
            .collect();
        assert!(ExecutionPlan::new(stages, 2).is_err());
    }
}
