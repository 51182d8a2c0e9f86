//! # CLI Module
//!
//! Command-line front end for the `neurite-loadgen` binary.
//!
//! The binary builds a sample route table (static, parameterized, wildcard
//! and grouped routes behind the built-in middleware), drives it in-process
//! with concurrent callers and then shuts the engine down gracefully,
//! printing both the load report and the shutdown report.
//!
//! ## Commands
//!
//! ### `run`
//!
//! ```bash
//! neurite-loadgen run --concurrency 16 --requests 200000
//! neurite-loadgen --config engine.yaml run --execution pooled --duration-ms 5000 --json
//! ```
//!
//! Options:
//! - `-n, --concurrency <N>` - Concurrent callers (default: 8)
//! - `-r, --requests <N>` - Total requests
//! - `-d, --duration-ms <MS>` - Wall-clock budget; the first limit reached wins
//! - `--execution <inline|pooled>` - Override the configured execution mode
//! - `--workers <N>` - Override the configured worker count
//! - `--json` - Machine-readable output
//!
//! ### `routes`
//!
//! Print the sample route table.
//!
//! ## Global options
//!
//! - `-c, --config <FILE>` - YAML [`EngineConfig`](crate::EngineConfig); also `NEURITE_CONFIG`
//! - `--log-format <json|pretty>` - Overrides `NEURITE_LOG_FORMAT`

mod commands;
#[cfg(test)]
mod tests;

pub use commands::{
    run, run_cli, sample_engine, sample_request, Cli, Commands, ExecutionArg, LogFormatArg,
};
