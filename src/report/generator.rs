//! Markdown report generation.

use super::aggregator::{failures_by_kind, Report, StageEntry};
use crate::models::AnalysisResult;

/// GO terms and target genes listed per stage before truncating.
const MAX_ROWS: usize = 20;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# TE Analysis Report\n\n");
    output.push_str(&generate_summary_section(report));

    for (name, entry) in &report.stages {
        output.push_str(&generate_stage_section(name, entry));
    }

    output.push_str(&generate_footer());

    output
}

fn generate_summary_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!("- **Status:** {}\n", report.status));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Stages:** {} succeeded, {} failed\n\n",
        report.summary.succeeded, report.summary.failed
    ));

    section.push_str("| Stage | Status | Tool | Duration |\n");
    section.push_str("|:---|:---:|:---|---:|\n");
    for (name, entry) in &report.stages {
        let status = if entry.is_success() { "✅" } else { "❌" };
        let duration = entry
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            name,
            status,
            entry.tool.as_deref().unwrap_or("-"),
            duration
        ));
    }
    section.push('\n');

    let kinds = failures_by_kind(report);
    if !kinds.is_empty() {
        section.push_str("### Failures by Kind\n\n");
        for (kind, count) in kinds {
            section.push_str(&format!("- `{}`: {}\n", kind, count));
        }
        section.push('\n');
    }

    section
}

fn generate_stage_section(name: &str, entry: &StageEntry) -> String {
    let mut section = format!("## {}\n\n", name);

    if let Some(error) = &entry.error {
        section.push_str(&format!(
            "> ❌ **{}**\n\n```\n{}\n```\n\n",
            entry.error_kind.as_deref().unwrap_or("error"),
            error
        ));
        return section;
    }

    if let Some(dir) = &entry.output_dir {
        section.push_str(&format!("*Output: `{}`*\n\n", dir.display()));
    }

    if let Some(result) = &entry.result {
        section.push_str(&generate_result_block(result));
    }

    section
}

fn generate_result_block(result: &AnalysisResult) -> String {
    let mut block = String::new();

    match result {
        AnalysisResult::TeSummary(summary) => {
            block.push_str(&format!("- **TEs found:** {}\n", summary.total_tes));
            block.push_str(&format!("- **Genome coverage:** {:.2}%\n", summary.coverage));
            let families: Vec<&str> = summary.te_families.iter().map(String::as_str).collect();
            block.push_str(&format!("- **Families:** {}\n\n", families.join(", ")));
        }
        AnalysisResult::Expression(expression) => {
            block.push_str(&format!("- **Transcripts quantified:** {}\n", expression.transcripts));
            block.push_str(&format!(
                "- **Differentially expressed genes:** {}\n\n",
                expression.differential_gene_count
            ));
        }
        AnalysisResult::TargetGenes(genes) => {
            if genes.is_empty() {
                block.push_str("No genes within range.\n\n");
                return block;
            }
            block.push_str("| TE | Gene | Distance (bp) |\n");
            block.push_str("|:---|:---|---:|\n");
            for gene in genes.iter().take(MAX_ROWS) {
                block.push_str(&format!(
                    "| {} | {} | {} |\n",
                    gene.te_id, gene.gene_id, gene.te_distance
                ));
            }
            if genes.len() > MAX_ROWS {
                block.push_str(&format!("\n*... and {} more*\n", genes.len() - MAX_ROWS));
            }
            block.push('\n');
        }
        AnalysisResult::Structure(prediction) => {
            block.push_str(&format!(
                "```\n{}\n```\n\n**MFE:** {:.2} kcal/mol\n\n",
                prediction.structure, prediction.energy
            ));
        }
        AnalysisResult::GoEnrichment(terms) => {
            if terms.is_empty() {
                block.push_str("No enriched terms.\n\n");
                return block;
            }
            block.push_str("| GO term | p-value |\n");
            block.push_str("|:---|---:|\n");
            for term in terms.iter().take(MAX_ROWS) {
                block.push_str(&format!("| {} | {:.3e} |\n", term.term, term.pvalue));
            }
            if terms.len() > MAX_ROWS {
                block.push_str(&format!("\n*... and {} more*\n", terms.len() - MAX_ROWS));
            }
            block.push('\n');
        }
    }

    block
}

fn generate_footer() -> String {
    "---\n\n*Report generated by te-analyzer*\n".to_string()
}
