//! spot-migrate command line.
//!
//! Loads a JSON configuration (or the defaults), applies command line
//! overrides, runs the migration and prints the report as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use spot_migrate::config::{MigrationConfig, ObjectStoreConfig};
use spot_migrate::driver::Migration;
use spot_migrate::logging::setup::{init_logging, LoggingConfig};
use spot_migrate::logging::LogConfig;
use spot_migrate::record::parse_time;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long, short = 'c', env = "SPOT_MIGRATE_CONFIG")]
    config: Option<PathBuf>,

    /// First window, e.g. "2022-09-28 16:20:00+00:00"
    #[arg(long, value_parser = parse_timestamp)]
    start: Option<DateTime<Utc>>,

    /// Last window, inclusive
    #[arg(long, value_parser = parse_timestamp)]
    end: Option<DateTime<Utc>>,

    /// Minutes between windows
    #[arg(long)]
    interval_minutes: Option<u32>,

    /// Directory of exported query result pages
    #[arg(long)]
    pages_dir: Option<PathBuf>,

    /// JSON-lines file receiving changed records
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Local baseline archive path
    #[arg(long)]
    local_archive: Option<PathBuf>,

    /// Upload archives under this directory instead of the configured store
    #[arg(long, conflicts_with = "memory_archive")]
    archive_root: Option<PathBuf>,

    /// Keep uploaded archives in memory only
    #[arg(long)]
    memory_archive: bool,

    /// Also write removed workloads, flagged as ceased
    #[arg(long)]
    emit_ceased: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Debug-level logging for this crate, with long logged fields
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings; no per-write or timing logs
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dry_run: bool,
}

fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_time(text).map_err(|e| e.to_string())
}

impl Args {
    fn resolve(&self) -> Result<MigrationConfig> {
        let mut config = match &self.config {
            Some(path) => MigrationConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => MigrationConfig::default(),
        };

        if self.start.is_some() || self.end.is_some() {
            let start = self.start.unwrap_or(config.start);
            let end = self.end.unwrap_or(config.end);
            config = config.with_range(start, end);
        }
        if let Some(minutes) = self.interval_minutes {
            config = config.with_interval_minutes(minutes);
        }
        if let Some(dir) = &self.pages_dir {
            config = config.with_pages_dir(dir);
        }
        if let Some(output) = &self.output {
            config = config.with_output(output);
        }
        if let Some(path) = &self.local_archive {
            config = config.with_local_archive(path);
        }
        if let Some(root) = &self.archive_root {
            config = config.with_object_store(ObjectStoreConfig::Local { root: root.clone() });
        }
        if self.memory_archive {
            config = config.with_object_store(ObjectStoreConfig::Memory);
        }
        if self.emit_ceased {
            config = config.with_emit_ceased(true);
        }
        if self.verbose {
            config = config.with_logging(LogConfig::verbose());
        } else if self.quiet {
            config = config.with_logging(LogConfig::quiet());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn logging(&self) -> LoggingConfig {
        let logging = if self.json_logs {
            LoggingConfig::production()
        } else {
            LoggingConfig::default()
        };
        if self.verbose {
            logging.with_crate_level(Level::DEBUG)
        } else if self.quiet {
            logging.with_crate_level(Level::WARN)
        } else {
            logging
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.logging()).context("Failed to initialize logging")?;

    let config = args.resolve()?;
    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let migration = Migration::from_config(config)
        .await
        .context("Failed to set up migration")?;
    let report = migration.run().await.context("Migration aborted")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(["spot-migrate"].iter().chain(extra)).unwrap()
    }

    #[test]
    fn test_verbose_selects_verbose_log_config() {
        let config = args(&["--verbose"]).resolve().unwrap();
        assert_eq!(config.logging.max_field_length, 1024);
        assert!(config.logging.log_timings);
    }

    #[test]
    fn test_quiet_selects_quiet_log_config() {
        let parsed = args(&["--quiet"]);
        let config = parsed.resolve().unwrap();
        assert_eq!(config.logging.max_field_length, 128);
        assert!(!config.logging.log_data_operations);
        assert!(!config.logging.log_timings);
        assert_eq!(parsed.logging().crate_level, Level::WARN);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["spot-migrate", "-v", "-q"]).is_err());
    }
}
