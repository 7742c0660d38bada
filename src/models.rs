//! Data models for the analysis service.
//!
//! This module contains the core data structures shared by the store,
//! the runner, the parsers and the orchestrator.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Logical role of an uploaded file. Names match the upload form fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactRole {
    HostGenome,
    ParasiteGenome,
    HostTranscriptome,
    ParasiteTranscriptome,
    HostAnnotation,
    ParasiteAnnotation,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 6] = [
        ArtifactRole::HostGenome,
        ArtifactRole::ParasiteGenome,
        ArtifactRole::HostTranscriptome,
        ArtifactRole::ParasiteTranscriptome,
        ArtifactRole::HostAnnotation,
        ArtifactRole::ParasiteAnnotation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::HostGenome => "hostGenome",
            ArtifactRole::ParasiteGenome => "parasiteGenome",
            ArtifactRole::HostTranscriptome => "hostTranscriptome",
            ArtifactRole::ParasiteTranscriptome => "parasiteTranscriptome",
            ArtifactRole::HostAnnotation => "hostAnnotation",
            ArtifactRole::ParasiteAnnotation => "parasiteAnnotation",
        }
    }

    /// Genome and transcriptome roles carry FASTA sequence.
    pub fn is_sequence(&self) -> bool {
        !matches!(
            self,
            ArtifactRole::HostAnnotation | ArtifactRole::ParasiteAnnotation
        )
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactRole {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| PipelineError::InvalidRole(s.to_string()))
    }
}

/// Processing state of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Uploaded,
    Processing,
    Done,
    Failed,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactStatus::Uploaded => write!(f, "uploaded"),
            ArtifactStatus::Processing => write!(f, "processing"),
            ArtifactStatus::Done => write!(f, "done"),
            ArtifactStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A file registered with the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub role: ArtifactRole,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub status: ArtifactStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// One completed call to an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique per process.
    pub id: u64,
    pub tool_name: String,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ToolInvocation {
    /// Name used for stages computed in-process rather than by a child process.
    pub fn builtin_name(name: &str) -> String {
        format!("builtin:{}", name)
    }

    pub fn is_builtin(&self) -> bool {
        self.tool_name.starts_with("builtin:")
    }
}

/// Summary of a RepeatMasker run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeSummary {
    pub total_tes: usize,
    pub te_families: BTreeSet<String>,
    /// Percentage of the genome masked, 0-100.
    pub coverage: f64,
}

/// Quantification / differential-expression outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub quantified: bool,
    pub differential_gene_count: usize,
    /// Transcripts present in the quantification table.
    #[serde(default)]
    pub transcripts: usize,
}

/// Nearest gene found for one TE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGene {
    pub te_id: String,
    pub gene_id: String,
    pub te_distance: u64,
}

/// RNA secondary structure in dot-bracket notation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructurePrediction {
    pub structure: String,
    /// Minimum free energy in kcal/mol.
    pub energy: f64,
}

/// One enriched GO term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoTerm {
    pub term: String,
    pub pvalue: f64,
}

/// Parsed output of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AnalysisResult {
    TeSummary(TeSummary),
    Expression(ExpressionResult),
    TargetGenes(Vec<TargetGene>),
    Structure(StructurePrediction),
    GoEnrichment(Vec<GoTerm>),
}

impl AnalysisResult {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisResult::TeSummary(_) => "te_summary",
            AnalysisResult::Expression(_) => "expression",
            AnalysisResult::TargetGenes(_) => "target_genes",
            AnalysisResult::Structure(_) => "structure",
            AnalysisResult::GoEnrichment(_) => "go_enrichment",
        }
    }
}

/// A parsed result together with the invocation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub result: AnalysisResult,
    pub invocation: ToolInvocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!(
            "hostGenome".parse::<ArtifactRole>().unwrap(),
            ArtifactRole::HostGenome
        );
        assert_eq!(
            "parasiteTranscriptome".parse::<ArtifactRole>().unwrap(),
            ArtifactRole::ParasiteTranscriptome
        );
        assert!(matches!(
            "HostGenome".parse::<ArtifactRole>(),
            Err(PipelineError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_role_serde_matches_field_names() {
        for role in ArtifactRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ArtifactStatus::Uploaded.to_string(), "uploaded");
        assert_eq!(
            serde_json::to_string(&ArtifactStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn test_analysis_result_tagging() {
        let result = AnalysisResult::Structure(StructurePrediction {
            structure: "(((...)))".to_string(),
            energy: -15.2,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "structure");
        assert_eq!(value["data"]["structure"], "(((...)))");
        assert_eq!(result.kind(), "structure");
    }
}
