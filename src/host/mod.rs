/// Address parsing: the lossless decomposition of user-supplied address
/// strings.
pub mod address;

/// Configuration value types shared by the resolver, executor and CLI.
pub mod configuration;

/// The pipeline executor: spawning, pipe wiring, supervision.
pub mod executor;

/// Plugin metadata: the `--jn-meta` JSON object and script header blocks.
pub mod metadata;

/// Plugin discovery and the resolution registry.
pub mod registry;

/// Address resolution: from parsed address to execution plan.
pub mod resolver;
