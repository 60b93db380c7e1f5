//! Configuration for the self-monitoring exporter.
//!
//! Configuration is merged with the precedence CLI > config file > defaults.
//! Files may be YAML (default), JSON or TOML, selected by extension.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::{Args, OutputFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;

const DEFAULT_LOCATIONS: [&str; 6] = [
    "/etc/herakles/proc-usage.yaml",
    "/etc/herakles/proc-usage.yml",
    "/etc/herakles/proc-usage.json",
    "./herakles-proc-usage.yaml",
    "./herakles-proc-usage.yml",
    "./herakles-proc-usage.json",
];

/// Exporter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Sampling
    #[serde(alias = "refresh-interval-secs")]
    pub refresh_interval_secs: Option<u64>,

    // Feature flags
    pub enable_health: Option<bool>,

    // Metrics enable flags
    #[serde(alias = "enable-cpu")]
    pub enable_cpu: Option<bool>,
    #[serde(alias = "enable-rss")]
    pub enable_rss: Option<bool>,
    #[serde(alias = "enable-vss")]
    pub enable_vss: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            refresh_interval_secs: Some(DEFAULT_REFRESH_INTERVAL_SECS),
            enable_health: Some(true),
            enable_cpu: Some(true),
            enable_rss: Some(true),
            enable_vss: Some(true),
            log_level: Some("info".to_string()),
        }
    }
}

impl Config {
    pub fn refresh_interval_secs(&self) -> u64 {
        self.refresh_interval_secs
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    let enable_cpu = cfg.enable_cpu.unwrap_or(true);
    let enable_rss = cfg.enable_rss.unwrap_or(true);
    let enable_vss = cfg.enable_vss.unwrap_or(true);

    if !(enable_cpu || enable_rss || enable_vss) {
        bail!("At least one of enable_cpu/enable_rss/enable_vss must be true");
    }

    // Samples are throttled/smoothed at 1-2s granularity anyway
    if cfg.refresh_interval_secs() == 0 {
        bail!("refresh_interval_secs must be at least 1");
    }

    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address '{}'", bind))?;
    }

    if let Some(level) = cfg.log_level.as_deref() {
        match level {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => bail!(
                "Invalid log_level '{}', expected off/error/warn/info/debug/trace",
                other
            ),
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(secs) = args.refresh_interval {
        config.refresh_interval_secs = Some(secs);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }

    Ok(config)
}

/// Loads a config file, falling back to default locations and then defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("Config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_LOCATIONS.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&path, &content)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config content according to the file extension
pub fn parse_config(path: &Path, content: &str) -> Result<Config> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("toml") => {
            toml::from_str(content).with_context(|| format!("Invalid TOML in {}", path.display()))?
        }
        // Default to YAML
        _ => serde_yaml::from_str(content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    Ok(config)
}

/// Renders a config in the requested format
pub fn render_config(config: &Config, format: OutputFormat, commented: bool) -> Result<String> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(config)?,
        OutputFormat::Toml => toml::to_string_pretty(config)?,
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(yaml)
            } else {
                yaml
            }
        }
    };
    Ok(content)
}

/// Default output path for generated configuration
pub fn default_config_path(format: OutputFormat) -> PathBuf {
    let ext = match format {
        OutputFormat::Yaml => "yaml",
        OutputFormat::Json => "json",
        OutputFormat::Toml => "toml",
    };
    PathBuf::from(format!("herakles-proc-usage.{ext}"))
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Process Usage Exporter Configuration
# ==============================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                   # HTTP port
#
# Sampling
# --------
# refresh_interval_secs: 5     # Refresh the exported snapshot every N seconds
#                              # (CPU is smoothed over 1s on Linux, 2s on Windows)
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
#
# Metrics Enable Flags
# --------------------
# enable_cpu: true             # Export CPU percent
# enable_rss: true             # Export resident set size
# enable_vss: true             # Export virtual set size
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_effective_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_all_metrics_disabled() {
        let cfg = Config {
            enable_cpu: Some(false),
            enable_rss: Some(false),
            enable_vss: Some(false),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_bad_bind() {
        let cfg = Config {
            refresh_interval_secs: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        let cfg = Config {
            bind: Some("not-an-ip".into()),
            ..Config::default()
        };
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("not-an-ip"));
    }

    #[test]
    fn test_parse_config_formats() {
        let yaml = "port: 9300\nenable-vss: false\n";
        let cfg = parse_config(Path::new("c.yaml"), yaml).unwrap();
        assert_eq!(cfg.port, Some(9300));
        assert_eq!(cfg.enable_vss, Some(false));
        assert_eq!(cfg.bind, None);

        let json = r#"{"refresh_interval_secs": 10}"#;
        let cfg = parse_config(Path::new("c.json"), json).unwrap();
        assert_eq!(cfg.refresh_interval_secs(), 10);

        let toml = "bind = \"127.0.0.1\"\n";
        let cfg = parse_config(Path::new("c.toml"), toml).unwrap();
        assert_eq!(cfg.bind.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_rendered_config_round_trips() {
        let config = Config::default();
        for (format, name) in [
            (OutputFormat::Yaml, "c.yaml"),
            (OutputFormat::Json, "c.json"),
            (OutputFormat::Toml, "c.toml"),
        ] {
            let rendered = render_config(&config, format, true).unwrap();
            assert_eq!(parse_config(Path::new(name), &rendered).unwrap(), config);
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usage.yaml");
        fs::write(&path, "port: 9300\nrefresh_interval_secs: 30\n").unwrap();

        let args = Args::parse_from([
            "herakles-proc-usage",
            "-c",
            path.to_str().unwrap(),
            "--port",
            "9400",
            "--disable-health",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(9400));
        assert_eq!(cfg.refresh_interval_secs(), 30);
        assert_eq!(cfg.enable_health, Some(false));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/usage.yaml"))).is_err());
    }
}
