//! Request handlers.

use super::AppState;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, ArtifactRole, StageRecord};
use crate::parsers::mapping::AnnotationSource;
use crate::pipeline::stages::{self, ExpressionInputs};
use crate::pipeline::Stage;
use crate::report::{aggregate, generate_markdown_report, generate_summary_text, ReportStatus};
use crate::storage::{quality_control, QcEntry};
use axum::{
    extract::{rejection::JsonRejection, Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

type JsonResult = PipelineResult<Json<Value>>;

/// Unwrap a JSON body, turning extractor rejections into `InvalidInput`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> PipelineResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| PipelineError::InvalidInput(rejection.body_text()))
}

fn unexpected(tool: &str, result: &AnalysisResult) -> PipelineError {
    PipelineError::malformed(tool, format!("unexpected {} result", result.kind()))
}

pub async fn index() -> &'static str {
    "Transposable Element Detector & Analyzer API is running!"
}

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> JsonResult {
    // Roles are checked before anything is written.
    let mut fields = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::InvalidInput(format!("Failed to parse multipart: {}", e)))?
    {
        let Some(role) = field.name().map(str::to_string) else {
            continue;
        };
        let filename = field.file_name().unwrap_or("").to_string();
        if filename.is_empty() {
            debug!("Skipping field {} without a file", role);
            continue;
        }
        role.parse::<ArtifactRole>()?;

        let data = field
            .bytes()
            .await
            .map_err(|e| PipelineError::InvalidInput(format!("Failed to read {}: {}", role, e)))?;
        fields.push((role, filename, data));
    }

    let mut uploaded_files: IndexMap<String, PathBuf> = IndexMap::new();
    let mut qc_report: IndexMap<String, QcEntry> = IndexMap::new();

    for (role, filename, data) in fields {
        let artifact = state.store.register(&role, &filename, &data).await?;
        qc_report.insert(role.clone(), quality_control(&artifact, &data));
        uploaded_files.insert(role, artifact.path);
    }

    info!("Upload complete: {} file(s)", uploaded_files.len());

    Ok(Json(json!({
        "status": "success",
        "uploaded_files": uploaded_files,
        "qc_report": qc_report,
    })))
}

pub async fn list_artifacts(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "artifacts": state.store.list(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RepeatMaskerRequest {
    pub genome_file: Option<PathBuf>,
    pub species: Option<String>,
}

fn repeatmasker_stage(state: &AppState, request: RepeatMaskerRequest) -> PipelineResult<Stage> {
    let genome = match request.genome_file {
        Some(path) => path,
        None => state
            .store
            .latest(ArtifactRole::HostGenome)
            .map(|artifact| artifact.path)
            .ok_or_else(|| {
                PipelineError::InvalidInput(
                    "no genome_file given and no host genome uploaded".to_string(),
                )
            })?,
    };
    let species = request
        .species
        .unwrap_or_else(|| state.config.analysis.default_species.clone());

    let dir = state.orchestrator.stage_dir("repeatmasker")?;
    stages::repeatmasker(&state.config, &genome, &species, dir)
}

pub async fn run_repeatmasker(
    State(state): State<AppState>,
    payload: Result<Json<RepeatMaskerRequest>, JsonRejection>,
) -> JsonResult {
    let stage = repeatmasker_stage(&state, body(payload)?)?;
    let StageRecord { result, invocation } = state.orchestrator.run(stage).await?;

    match result {
        AnalysisResult::TeSummary(summary) => Ok(Json(json!({
            "status": "success",
            "te_summary": summary,
            "output_dir": invocation.working_directory,
        }))),
        other => Err(unexpected("RepeatMasker", &other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExpressionRequest {
    pub fastq_files: Vec<PathBuf>,
    pub reference_index: PathBuf,
    #[serde(default)]
    pub conditions: Option<Vec<String>>,
}

pub async fn analyze_expression(
    State(state): State<AppState>,
    payload: Result<Json<ExpressionRequest>, JsonRejection>,
) -> JsonResult {
    let request = body(payload)?;
    let inputs = ExpressionInputs {
        fastq_files: request.fastq_files,
        reference_index: request.reference_index,
        conditions: request.conditions,
    };

    let outcomes = stages::run_expression(&state.orchestrator, &state.config, inputs).await?;

    if let Some(first) = outcomes.iter().find_map(|(_, outcome)| outcome.as_ref().err()) {
        if outcomes.iter().all(|(_, outcome)| outcome.is_err()) {
            return Err(first.clone());
        }
    }

    let report = aggregate(outcomes);

    let mut salmon_complete = true;
    let mut transcripts = 0;
    let mut differential_genes = None;

    for (name, entry) in &report.stages {
        match &entry.result {
            Some(AnalysisResult::Expression(expression)) if name == stages::DESEQ2_STAGE => {
                differential_genes = Some(expression.differential_gene_count);
            }
            Some(AnalysisResult::Expression(expression)) => transcripts += expression.transcripts,
            _ if name != stages::DESEQ2_STAGE => salmon_complete = false,
            _ => {}
        }
    }

    let mut response = json!({
        "status": report.status,
        "salmon_results": {
            "quantification_complete": salmon_complete,
            "transcripts": transcripts,
        },
    });

    if let Some(count) = differential_genes {
        response["deseq2_results"] = json!({ "differential_genes": count });
    }
    if report.status != ReportStatus::Success {
        response["errors"] = json!(report.errors());
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct MapTesRequest {
    pub te_annotations: AnnotationSource,
    pub genome_annotations: AnnotationSource,
    pub max_distance: Option<u64>,
}

fn map_tes_stage(state: &AppState, request: MapTesRequest) -> Stage {
    let window = request
        .max_distance
        .unwrap_or(state.config.analysis.max_gene_distance);
    stages::map_tes(request.te_annotations, request.genome_annotations, window)
}

pub async fn map_tes(
    State(state): State<AppState>,
    payload: Result<Json<MapTesRequest>, JsonRejection>,
) -> JsonResult {
    let stage = map_tes_stage(&state, body(payload)?);

    match state.orchestrator.run(stage).await?.result {
        AnalysisResult::TargetGenes(genes) => Ok(Json(json!({
            "status": "success",
            "target_genes": genes,
        }))),
        other => Err(unexpected("TE mapping", &other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct StructureRequest {
    pub sequence: String,
}

fn structure_stage(state: &AppState, request: StructureRequest) -> PipelineResult<Stage> {
    let dir = state.orchestrator.stage_dir("structure")?;
    stages::structure(&state.config, &request.sequence, dir)
}

pub async fn predict_structure(
    State(state): State<AppState>,
    payload: Result<Json<StructureRequest>, JsonRejection>,
) -> JsonResult {
    let stage = structure_stage(&state, body(payload)?)?;

    match state.orchestrator.run(stage).await?.result {
        AnalysisResult::Structure(prediction) => Ok(Json(json!({
            "status": "success",
            "structure": prediction,
        }))),
        other => Err(unexpected("RNAfold", &other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct GoRequest {
    pub gene_list: Vec<String>,
}

fn go_stage(state: &AppState, request: GoRequest) -> PipelineResult<Stage> {
    let dir = state.orchestrator.stage_dir("go_enrichment")?;
    stages::go_enrichment(&state.config, &request.gene_list, dir)
}

pub async fn go_enrichment(
    State(state): State<AppState>,
    payload: Result<Json<GoRequest>, JsonRejection>,
) -> JsonResult {
    let stage = go_stage(&state, body(payload)?)?;

    match state.orchestrator.run(stage).await?.result {
        AnalysisResult::GoEnrichment(terms) => Ok(Json(json!({
            "status": "success",
            "go_results": terms,
        }))),
        other => Err(unexpected("GO enrichment", &other)),
    }
}

/// Independent analyses to run together. Absent sections are skipped.
#[derive(Debug, Default, Deserialize)]
pub struct PipelineRequest {
    pub repeatmasker: Option<RepeatMaskerRequest>,
    pub structure: Option<StructureRequest>,
    pub map_tes: Option<MapTesRequest>,
    pub go_enrichment: Option<GoRequest>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Markdown,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub format: ReportFormat,
}

fn or_rejected(name: &str, prepared: PipelineResult<Stage>) -> Stage {
    prepared.unwrap_or_else(|e| stages::rejected(name, e))
}

pub async fn run_pipeline(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> PipelineResult<Response> {
    let request = body(payload)?;
    let mut pipeline = Vec::new();

    if let Some(section) = request.repeatmasker {
        pipeline.push(or_rejected("repeatmasker", repeatmasker_stage(&state, section)));
    }
    if let Some(section) = request.structure {
        pipeline.push(or_rejected("structure", structure_stage(&state, section)));
    }
    if let Some(section) = request.map_tes {
        pipeline.push(map_tes_stage(&state, section));
    }
    if let Some(section) = request.go_enrichment {
        pipeline.push(or_rejected("go_enrichment", go_stage(&state, section)));
    }

    if pipeline.is_empty() {
        return Err(PipelineError::InvalidInput(
            "no pipeline sections given".to_string(),
        ));
    }

    info!("Running pipeline with {} stage(s)", pipeline.len());
    let report = aggregate(state.orchestrator.run_concurrent(pipeline).await);
    info!("Pipeline finished: {}", generate_summary_text(&report));

    Ok(match query.format {
        ReportFormat::Json => Json(report).into_response(),
        ReportFormat::Markdown => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            generate_markdown_report(&report),
        )
            .into_response(),
    })
}
