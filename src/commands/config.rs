//! `config` subcommand.

use std::fs;
use std::path::PathBuf;

use crate::cli::OutputFormat;
use crate::config::{default_config_path, render_config, Config};

/// Generates configuration files
pub fn command_config(
    output: Option<PathBuf>,
    format: OutputFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| default_config_path(format));
    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}
