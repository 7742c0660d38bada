//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Anything not given on the command line
//! falls back to `.te-analyzer.toml` and then to built-in defaults.

use clap::Parser;
use std::path::PathBuf;

/// TE Analyzer - transposable-element analysis API
///
/// Serves a JSON API that runs RepeatMasker, Salmon, DESeq2, ViennaRNA
/// and GO enrichment on uploaded genomes and transcriptomes.
///
/// Examples:
///   te-analyzer
///   te-analyzer --port 8080 --upload-dir /data/uploads
///   te-analyzer --check-tools
///   te-analyzer --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .te-analyzer.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "ADDR", env = "TE_ANALYZER_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT", env = "PORT")]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored
    #[arg(long, value_name = "DIR", env = "TE_ANALYZER_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Directory where tool outputs are written
    #[arg(long, value_name = "DIR", env = "TE_ANALYZER_RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    /// Per-tool timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per pipeline stage (1 disables retries)
    #[arg(long, value_name = "COUNT")]
    pub max_attempts: Option<u32>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Check that every configured tool is on PATH and exit
    #[arg(long)]
    pub check_tools: bool,

    /// Generate a default .te-analyzer.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(attempts) = self.max_attempts {
            if attempts == 0 {
                return Err("Max attempts must be at least 1".to_string());
            }
        }

        if let Some(port) = self.port {
            if port == 0 {
                return Err("Port must be non-zero".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            config: None,
            host: None,
            port: None,
            upload_dir: None,
            results_dir: None,
            timeout: None,
            max_attempts: None,
            verbose: false,
            quiet: false,
            check_tools: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.max_attempts = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_merge_with_config() {
        let mut args = make_args();
        args.port = Some(9000);
        args.results_dir = Some(PathBuf::from("/tmp/results"));

        let mut config = crate::config::Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.results_dir, PathBuf::from("/tmp/results"));
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
    }
}
