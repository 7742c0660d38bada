//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.te-analyzer.toml` files. The configuration is loaded once at startup
//! and shared read-only afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".te-analyzer.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upload and result directories.
    #[serde(default)]
    pub storage: StorageConfig,

    /// External tool executables.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Orchestrator settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Analysis thresholds.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum request body size in bytes (uploads).
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_body() -> usize {
    1024 * 1024 * 1024 // genomes are large
}

/// Storage directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for uploaded artifacts.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Directory for per-stage working directories.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            results_dir: default_results_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// RepeatMasker executable.
    #[serde(default = "default_repeatmasker")]
    pub repeatmasker: String,

    /// Salmon executable.
    #[serde(default = "default_salmon")]
    pub salmon: String,

    /// Rscript executable used to run DESeq2.
    #[serde(default = "default_rscript")]
    pub rscript: String,

    /// R script wrapping DESeq2. Called as `<script> <samples.tsv> <out.csv>`.
    #[serde(default = "default_deseq2_script")]
    pub deseq2_script: PathBuf,

    /// ViennaRNA RNAfold executable.
    #[serde(default = "default_rnafold")]
    pub rnafold: String,

    /// GO enrichment executable (goatools CLI by default).
    #[serde(default = "default_go_enrichment")]
    pub go_enrichment: String,

    /// Background gene population for GO enrichment.
    #[serde(default = "default_go_population")]
    pub go_population: PathBuf,

    /// Gene-to-GO association file.
    #[serde(default = "default_go_associations")]
    pub go_associations: PathBuf,

    /// GO ontology (`go-basic.obo`) read by the enrichment tool.
    #[serde(default = "default_go_obo")]
    pub go_obo: PathBuf,

    /// Threads passed to tools that accept them.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Per-invocation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            repeatmasker: default_repeatmasker(),
            salmon: default_salmon(),
            rscript: default_rscript(),
            deseq2_script: default_deseq2_script(),
            rnafold: default_rnafold(),
            go_enrichment: default_go_enrichment(),
            go_population: default_go_population(),
            go_associations: default_go_associations(),
            go_obo: default_go_obo(),
            threads: default_threads(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_repeatmasker() -> String {
    "RepeatMasker".to_string()
}

fn default_salmon() -> String {
    "salmon".to_string()
}

fn default_rscript() -> String {
    "Rscript".to_string()
}

fn default_deseq2_script() -> PathBuf {
    PathBuf::from("scripts/deseq2.R")
}

fn default_rnafold() -> String {
    "RNAfold".to_string()
}

fn default_go_enrichment() -> String {
    "find_enrichment.py".to_string()
}

fn default_go_population() -> PathBuf {
    PathBuf::from("data/go/population.txt")
}

fn default_go_associations() -> PathBuf {
    PathBuf::from("data/go/associations.txt")
}

fn default_go_obo() -> PathBuf {
    PathBuf::from("data/go/go-basic.obo")
}

fn default_threads() -> usize {
    4
}

fn default_timeout() -> u64 {
    7200 // RepeatMasker on a full genome takes hours
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per stage, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Double the delay after every failed attempt.
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,

    /// Independent stages run in parallel up to this limit.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            exponential_backoff: true,
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

/// Thresholds used when interpreting tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum TE-to-gene distance in bp.
    #[serde(default = "default_max_distance")]
    pub max_gene_distance: u64,

    /// Adjusted p-value cutoff for differential expression.
    #[serde(default = "default_padj_alpha")]
    pub padj_alpha: f64,

    /// Default RepeatMasker species.
    #[serde(default = "default_species")]
    pub default_species: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_gene_distance: default_max_distance(),
            padj_alpha: default_padj_alpha(),
            default_species: default_species(),
        }
    }
}

fn default_max_distance() -> u64 {
    5000
}

fn default_padj_alpha() -> f64 {
    0.05
}

fn default_species() -> String {
    "human".to_string()
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// All executables the service shells out to, with their config key.
    pub fn executables(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("repeatmasker", self.repeatmasker.as_str()),
            ("salmon", self.salmon.as_str()),
            ("rscript", self.rscript.as_str()),
            ("rnafold", self.rnafold.as_str()),
            ("go_enrichment", self.go_enrichment.as_str()),
        ]
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref dir) = args.upload_dir {
            self.storage.upload_dir = dir.clone();
        }
        if let Some(ref dir) = args.results_dir {
            self.storage.results_dir = dir.clone();
        }
        if let Some(timeout) = args.timeout {
            self.tools.timeout_seconds = timeout;
        }
        if let Some(attempts) = args.max_attempts {
            self.pipeline.max_attempts = attempts;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
