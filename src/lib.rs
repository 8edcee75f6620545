//! JN: streaming NDJSON pipeline orchestrator
//!
//! The `jn` crate composes heterogeneous data sources, format converters,
//! filters, and sinks into linear chains of subprocesses connected by
//! anonymous OS pipes. Every stage is an isolated executable (a "plugin")
//! that reads bytes from standard input and writes newline-delimited JSON to
//! standard output; the orchestrator resolves an address string such as
//! `data.csv.gz?delimiter=,` or `@weather/current` into a concrete plan of
//! stages, spawns them, wires their standard I/O together, and supervises
//! the resulting process group.
//!
//! # Overview
//!
//! The crate splits into three cooperating parts:
//!
//!  - [`host::registry`] scans plugin directories in priority order and
//!    builds the read-only [`Registry`] used for address resolution;
//!  - [`host::resolver`] turns a raw address plus a [`Registry`] into an
//!    [`ExecutionPlan`] of [`Stage`]s;
//!  - [`host::executor`] spawns the plan, enforces the pipe close
//!    discipline that makes SIGPIPE-based cancellation work, and aggregates
//!    the per-stage exit statuses.
//!
//! The `jn` command line binary (behind the `cli` feature) is a thin
//! wrapper over these pieces. Plugins themselves can be written in any
//! language; the [`plugin`] module provides the argv plumbing for plugins
//! written in Rust.
//!
//! [`Registry`]: ./host/registry/struct.Registry.html
//! [`ExecutionPlan`]: ./host/resolver/plan/struct.ExecutionPlan.html
//! [`Stage`]: ./host/resolver/plan/struct.Stage.html
//! [`host::registry`]: ./host/registry/index.html
//! [`host::resolver`]: ./host/resolver/index.html
//! [`host::executor`]: ./host/executor/index.html
//! [`plugin`]: ./plugin/index.html

/// Functionality common to the orchestrator and plugin sides: error
/// handling and the log system.
pub mod common;

/// The orchestrator: addresses, plugin discovery, resolution, execution.
pub mod host;

/// Support for writing JN plugins in Rust.
pub mod plugin;
