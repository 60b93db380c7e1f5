//! CLI command implementations for herakles-proc-usage.
//!
//! - `check`: System validation
//! - `config`: Configuration file generation
//! - `sample`: Self-usage sampling

pub mod check;
pub mod config;
pub mod sample;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use sample::command_sample;
