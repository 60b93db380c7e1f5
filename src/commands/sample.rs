//! `sample` subcommand: prints a series of self-usage samples.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use herakles_proc_usage::{start_platform_sampler, UsageSnapshot};

use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
struct SampleRecord {
    iteration: usize,
    cpu_percent: f64,
    rss_bytes: i64,
    vss_bytes: i64,
}

impl SampleRecord {
    fn new(iteration: usize, usage: UsageSnapshot) -> Self {
        Self {
            iteration,
            cpu_percent: usage.cpu_percent,
            rss_bytes: usage.rss_bytes,
            vss_bytes: usage.vss_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
struct SampleReport {
    samples: Vec<SampleRecord>,
}

/// Takes `iterations` samples `interval_ms` apart and prints them.
pub async fn command_sample(
    iterations: usize,
    interval_ms: u64,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let sampler = start_platform_sampler()?;
    let pause = Duration::from_millis(interval_ms);
    let mut report = SampleReport {
        samples: Vec::with_capacity(iterations),
    };

    for iteration in 1..=iterations {
        if iteration > 1 {
            tokio::time::sleep(pause).await;
        }
        match sampler.usage() {
            Ok(usage) => {
                debug!("Sample {}: {:?}", iteration, usage);
                report.samples.push(SampleRecord::new(iteration, usage));
            }
            Err(e) if e.is_transient() => {
                eprintln!("⚠️  Sample {} failed: {}", iteration, e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    print!("{}", render_report(&report, format)?);
    Ok(())
}

fn render_report(
    report: &SampleReport,
    format: OutputFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Json => serde_json::to_string_pretty(report)? + "\n",
        OutputFormat::Toml => toml::to_string_pretty(report)?,
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SampleReport {
        SampleReport {
            samples: vec![SampleRecord::new(
                1,
                UsageSnapshot {
                    cpu_percent: 3.5,
                    rss_bytes: 4096,
                    vss_bytes: 8192,
                },
            )],
        }
    }

    #[test]
    fn test_render_report_json() {
        let out = render_report(&report(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["samples"][0]["iteration"], 1);
        assert_eq!(value["samples"][0]["rss_bytes"], 4096);
        assert_eq!(value["samples"][0]["cpu_percent"], 3.5);
    }

    #[test]
    fn test_render_report_yaml_and_toml() {
        let yaml = render_report(&report(), OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("vss_bytes: 8192"));

        let toml = render_report(&report(), OutputFormat::Toml).unwrap();
        assert!(toml.contains("[[samples]]"));
        assert!(toml.contains("vss_bytes = 8192"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_command_sample_runs() {
        command_sample(2, 10, OutputFormat::Json).await.unwrap();
    }
}
