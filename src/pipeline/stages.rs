//! Stage construction for each supported tool, plus the expression
//! workflow where DESeq2 waits on every Salmon run.
//!
//! Builders validate user input, write any input files the tool needs
//! into the stage's working directory, and return a ready [`Stage`].
//! Paths given to tools are made absolute because tools run with the
//! stage directory as their cwd.

use super::{Orchestrator, Stage};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, StageRecord};
use crate::parsers::expression::DESEQ2_FILE;
use crate::parsers::go::GO_FILE;
use crate::parsers::mapping::{nearest_genes, AnnotationSource, FeatureKind};
use crate::parsers::{
    Deseq2Parser, GoEnrichmentParser, RepeatMaskerParser, SalmonParser, ViennaParser,
};
use crate::runner::ToolRequest;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stage name of the differential-expression step.
pub const DESEQ2_STAGE: &str = "deseq2";

const RNA_ALPHABET: &[char] = &['A', 'C', 'G', 'U', 'T', 'N'];

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn require_exists(path: &Path, what: &str) -> PipelineResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!(
            "{} not found: {}",
            what,
            path.display()
        )))
    }
}

fn write_input(dir: &Path, name: &str, content: &str) -> PipelineResult<()> {
    let path = dir.join(name);
    std::fs::write(&path, content)
        .map_err(|e| PipelineError::Storage(format!("Failed to write {}: {}", path.display(), e)))
}

/// Species names go straight into argv; refuse anything option-like.
fn validate_species(species: &str) -> PipelineResult<()> {
    let valid = !species.trim().is_empty()
        && !species.starts_with('-')
        && species
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!("invalid species '{}'", species)))
    }
}

/// RepeatMasker over one genome, writing into `dir`.
pub fn repeatmasker(
    config: &Config,
    genome: &Path,
    species: &str,
    dir: PathBuf,
) -> PipelineResult<Stage> {
    validate_species(species)?;
    require_exists(genome, "genome file")?;

    let genome_name = genome
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PipelineError::InvalidInput(format!("bad genome path {}", genome.display()))
        })?
        .to_string();

    let request = ToolRequest::new(&config.tools.repeatmasker, dir)
        .args(["-species", species, "-dir", "."])
        .args(["-pa".to_string(), config.tools.threads.to_string()])
        .arg(absolute(genome).to_string_lossy())
        .timeout(config.tools.timeout());

    Ok(Stage::tool("repeatmasker", request, Box::new(RepeatMaskerParser::new(genome_name)))
        .with_inputs(vec![genome.to_path_buf()]))
}

/// `salmon quant` for one single-end read file.
pub fn salmon(
    config: &Config,
    name: &str,
    index: &Path,
    fastq: &Path,
    dir: PathBuf,
) -> PipelineResult<Stage> {
    require_exists(index, "reference index")?;
    require_exists(fastq, "read file")?;

    let request = ToolRequest::new(&config.tools.salmon, dir)
        .args(["quant", "-i"])
        .arg(absolute(index).to_string_lossy())
        .args(["-l", "A", "-r"])
        .arg(absolute(fastq).to_string_lossy())
        .args(["-p".to_string(), config.tools.threads.to_string()])
        .args(["--validateMappings", "-o", "."])
        .timeout(config.tools.timeout());

    Ok(Stage::tool(name, request, Box::new(SalmonParser)).with_inputs(vec![fastq.to_path_buf()]))
}

/// One row of the DESeq2 sample sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub condition: String,
    /// Salmon output directory holding `quant.sf`.
    pub quant_dir: PathBuf,
}

/// Tab-separated sample sheet read by the DESeq2 wrapper.
pub fn sample_sheet(samples: &[Sample]) -> String {
    let mut sheet = String::from("sample\tcondition\tquant\n");
    for sample in samples {
        sheet.push_str(&format!(
            "{}\t{}\t{}\n",
            sample.name,
            sample.condition,
            absolute(&sample.quant_dir).display()
        ));
    }
    sheet
}

/// DESeq2 over finished Salmon runs.
pub fn deseq2(config: &Config, samples: &[Sample], dir: PathBuf) -> PipelineResult<Stage> {
    let conditions: HashSet<&str> = samples.iter().map(|s| s.condition.as_str()).collect();
    if conditions.len() < 2 {
        return Err(PipelineError::InvalidInput(
            "differential expression needs at least two conditions".to_string(),
        ));
    }

    write_input(&dir, "samples.tsv", &sample_sheet(samples))?;

    let request = ToolRequest::new(&config.tools.rscript, dir)
        .arg(absolute(&config.tools.deseq2_script).to_string_lossy())
        .args(["samples.tsv", DESEQ2_FILE])
        .timeout(config.tools.timeout());

    Ok(Stage::tool(DESEQ2_STAGE, request, Box::new(Deseq2Parser::new(config.analysis.padj_alpha))))
}

/// Validate and normalize an RNA/DNA sequence for folding.
pub fn fold_sequence(sequence: &str) -> PipelineResult<String> {
    let normalized = crate::parsers::vienna::normalize_sequence(sequence);
    if normalized.is_empty() {
        return Err(PipelineError::InvalidInput("sequence is empty".to_string()));
    }
    if let Some(bad) = normalized.chars().find(|c| !RNA_ALPHABET.contains(c)) {
        return Err(PipelineError::InvalidInput(format!(
            "unexpected character '{}' in sequence",
            bad
        )));
    }
    Ok(normalized)
}

/// RNAfold on a single sequence.
pub fn structure(config: &Config, sequence: &str, dir: PathBuf) -> PipelineResult<Stage> {
    let sequence = fold_sequence(sequence)?;
    write_input(&dir, "input.fa", &format!(">te_query\n{}\n", sequence))?;

    let request = ToolRequest::new(&config.tools.rnafold, dir)
        .args(["--noPS", "input.fa"])
        .timeout(config.tools.timeout());

    Ok(Stage::tool("structure", request, Box::new(ViennaParser::new(&sequence))))
}

/// GO enrichment of a gene list against the configured background.
pub fn go_enrichment(config: &Config, genes: &[String], dir: PathBuf) -> PipelineResult<Stage> {
    let genes: Vec<&str> = genes.iter().map(|g| g.trim()).filter(|g| !g.is_empty()).collect();
    if genes.is_empty() {
        return Err(PipelineError::InvalidInput("gene list is empty".to_string()));
    }
    if let Some(bad) = genes.iter().find(|g| g.contains(char::is_whitespace)) {
        return Err(PipelineError::InvalidInput(format!("invalid gene id '{}'", bad)));
    }

    write_input(&dir, "study.txt", &(genes.join("\n") + "\n"))?;

    let request = ToolRequest::new(&config.tools.go_enrichment, dir)
        .arg("study.txt")
        .arg(absolute(&config.tools.go_population).to_string_lossy())
        .arg(absolute(&config.tools.go_associations).to_string_lossy())
        .arg("--obo")
        .arg(absolute(&config.tools.go_obo).to_string_lossy())
        .arg(format!("--outfile={}", GO_FILE))
        .timeout(config.tools.timeout());

    Ok(Stage::tool("go_enrichment", request, Box::new(GoEnrichmentParser)))
}

/// Nearest-gene mapping, computed in-process.
pub fn map_tes(tes: AnnotationSource, genes: AnnotationSource, max_distance: u64) -> Stage {
    let inputs: Vec<PathBuf> = [&tes, &genes]
        .into_iter()
        .filter_map(|source| match source {
            AnnotationSource::Path(path) => Some(path.clone()),
            AnnotationSource::Inline(_) => None,
        })
        .collect();

    let args = vec![format!("max_distance={}", max_distance)];

    Stage::builtin("map_tes", "nearest_gene", args, move || {
        let tes = tes.load(FeatureKind::Any)?;
        let genes = genes.load(FeatureKind::Genes)?;
        debug!("Mapping {} TEs against {} genes", tes.len(), genes.len());
        Ok(AnalysisResult::TargetGenes(nearest_genes(&tes, &genes, max_distance)))
    })
    .with_inputs(inputs)
}

/// A stage that fails at once with `error`. Used for sections of a
/// combined run that could not be built, so they still reach the report.
pub fn rejected(name: impl Into<String>, error: PipelineError) -> Stage {
    Stage::builtin(name, "validate", Vec::new(), move || Err(error))
}

/// Inputs of the expression workflow.
#[derive(Debug, Clone)]
pub struct ExpressionInputs {
    pub fastq_files: Vec<PathBuf>,
    pub reference_index: PathBuf,
    /// One condition label per read file, in the same order.
    pub conditions: Option<Vec<String>>,
}

/// Unique sample names derived from the read file stems.
fn sample_names(files: &[PathBuf]) -> Vec<String> {
    let mut seen = HashSet::new();
    files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let stem = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.split('.').next().unwrap_or(n))
                .filter(|n| !n.is_empty())
                .unwrap_or("sample");
            let mut name = stem.to_string();
            let mut suffix = i + 1;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", stem, suffix);
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Salmon on every read file in parallel, then DESeq2 over all of them.
///
/// Returns one outcome per Salmon run (named `salmon:<sample>`) followed by
/// the DESeq2 outcome. DESeq2 fails with `DependencyFailed` if any Salmon
/// run failed and is never started in that case.
pub async fn run_expression(
    orchestrator: &Orchestrator,
    config: &Config,
    inputs: ExpressionInputs,
) -> PipelineResult<Vec<(String, PipelineResult<StageRecord>)>> {
    if inputs.fastq_files.is_empty() {
        return Err(PipelineError::InvalidInput("no read files given".to_string()));
    }
    if let Some(conditions) = &inputs.conditions {
        if conditions.len() != inputs.fastq_files.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} conditions for {} read files",
                conditions.len(),
                inputs.fastq_files.len()
            )));
        }
    }

    let names = sample_names(&inputs.fastq_files);
    let mut stages = Vec::with_capacity(names.len());
    for (name, fastq) in names.iter().zip(&inputs.fastq_files) {
        let stage_name = format!("salmon:{}", name);
        let dir = orchestrator.stage_dir(&stage_name)?;
        stages.push(salmon(config, &stage_name, &inputs.reference_index, fastq, dir)?);
    }

    let mut outcomes = orchestrator.run_concurrent(stages).await;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(name, _)| name.as_str())
        .collect();

    let deseq2_outcome = if !failed.is_empty() {
        Err(PipelineError::DependencyFailed(failed.join(", ")))
    } else if let Some(conditions) = inputs.conditions {
        let samples: Vec<Sample> = names
            .into_iter()
            .zip(conditions)
            .zip(outcomes.iter())
            .filter_map(|((name, condition), (_, outcome))| {
                outcome.as_ref().ok().map(|record| Sample {
                    name,
                    condition,
                    quant_dir: record.invocation.working_directory.clone(),
                })
            })
            .collect();

        match orchestrator
            .stage_dir(DESEQ2_STAGE)
            .and_then(|dir| deseq2(config, &samples, dir))
        {
            Ok(stage) => orchestrator.run(stage).await,
            Err(e) => Err(e),
        }
    } else {
        Err(PipelineError::InvalidInput(
            "conditions are required for differential expression".to_string(),
        ))
    };

    outcomes.push((DESEQ2_STAGE.to_string(), deseq2_outcome));
    Ok(outcomes)
}
