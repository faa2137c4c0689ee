use std::path::PathBuf;
use clap::{Parser, ValueEnum};

use crate::config::RepoWatchConfig;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "repowatch")]
#[command(version)]
#[command(about = "Watch a git working directory and report branch, HEAD, index and config changes")]
#[command(long_about = "repowatch listens to filesystem notifications inside a git working directory and turns them into repository events: local and remote branches created, changed or deleted, HEAD moves, index and config updates, and working tree changes.")]
pub struct Cli {
    /// Repository to watch
    #[arg(value_name = "PATH", help = "Repository root (defaults to current directory)")]
    pub path: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "text", help = "Output format")]
    pub output: OutputFormat,

    /// Polling interval override
    #[arg(long, help = "Polling interval in ms (overrides config)")]
    pub poll_interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Timestamped human readable lines
    Text,
    /// One JSON object per event
    Json,
    /// Bare event descriptions
    Compact,
}

impl Cli {
    pub fn get_watch_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Resolve the effective configuration: file, environment, then command-line overrides.
    pub fn load_config(&self) -> Result<RepoWatchConfig> {
        let mut config = RepoWatchConfig::load(self.config.as_deref())?;
        if let Some(ms) = self.poll_interval {
            config.watcher.poll_interval_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .init();
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let path = self.get_watch_path();

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        if self.poll_interval == Some(0) {
            return Err("Poll interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from(["repowatch", "/tmp", "--output", "json", "--poll-interval", "250"]);

        assert_eq!(cli.path, Some(PathBuf::from("/tmp")));
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.poll_interval, Some(250));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_files() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        let cli = Cli::parse_from(["repowatch", file.to_str().unwrap()]);
        assert!(cli.validate().is_err());

        let dir = temp_dir.path().to_str().unwrap().to_string();
        let cli = Cli::parse_from(["repowatch", dir.as_str(), "--poll-interval", "0"]);
        assert!(cli.validate().is_err());
    }
}
