//! Nearest-gene mapping for TE annotations.
//!
//! Coordinates are 0-based half-open, as in BED. GFF/GTF and RepeatMasker
//! `.out` inputs (1-based, inclusive) are converted on load. The distance
//! between two intervals is the number of bases strictly between them, so
//! overlapping or book-ended intervals are at distance 0.

use crate::error::{PipelineError, PipelineResult};
use crate::models::TargetGene;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A named genomic interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    #[serde(alias = "gene_id", alias = "te_id", alias = "name")]
    pub id: String,
    #[serde(alias = "seqid", alias = "chr")]
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(id: &str, chrom: &str, start: u64, end: u64) -> Self {
        Self {
            id: id.to_string(),
            chrom: chrom.to_string(),
            start,
            end,
        }
    }

    /// Bases between `self` and `other`; 0 when they overlap or touch.
    pub fn distance_to(&self, other: &Interval) -> u64 {
        if self.end <= other.start {
            other.start - self.end
        } else if other.end <= self.start {
            self.start - other.end
        } else {
            0
        }
    }
}

/// Where a set of intervals comes from: a file on disk or inline JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnnotationSource {
    Path(PathBuf),
    Inline(Vec<Interval>),
}

/// Which features of a GFF file to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Genes,
    Any,
}

impl AnnotationSource {
    /// Resolve to intervals, reading and parsing the file if needed.
    pub fn load(&self, kind: FeatureKind) -> PipelineResult<Vec<Interval>> {
        let intervals = match self {
            AnnotationSource::Inline(intervals) => intervals.clone(),
            AnnotationSource::Path(path) => read_annotation_file(path, kind)?,
        };

        if let Some(bad) = intervals.iter().find(|i| i.start > i.end) {
            return Err(PipelineError::InvalidInput(format!(
                "interval {} has start {} after end {}",
                bad.id, bad.start, bad.end
            )));
        }

        Ok(intervals)
    }
}

fn read_annotation_file(path: &Path, kind: FeatureKind) -> PipelineResult<Vec<Interval>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "gff" | "gff3" | "gtf" => parse_gff(&text, kind),
        "out" => parse_repeatmasker_out(&text),
        _ => parse_bed(&text),
    }
}

fn bad_line(format: &str, line_no: usize, message: &str) -> PipelineError {
    PipelineError::InvalidInput(format!("{} line {}: {}", format, line_no + 1, message))
}

fn parse_coord(value: &str, format: &str, line_no: usize) -> PipelineResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| bad_line(format, line_no, &format!("bad coordinate '{}'", value)))
}

/// BED: `chrom start end [name ...]`, already 0-based half-open.
pub fn parse_bed(text: &str) -> PipelineResult<Vec<Interval>> {
    let mut intervals = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(bad_line("BED", line_no, "fewer than 3 columns"));
        }

        let chrom = fields[0].trim();
        let start = parse_coord(fields[1], "BED", line_no)?;
        let end = parse_coord(fields[2], "BED", line_no)?;
        let id = fields
            .get(3)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}:{}-{}", chrom, start, end));

        intervals.push(Interval::new(&id, chrom, start, end));
    }

    Ok(intervals)
}

/// GFF3 / GTF. `Genes` keeps only `gene` features.
pub fn parse_gff(text: &str, kind: FeatureKind) -> PipelineResult<Vec<Interval>> {
    let mut intervals = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            return Err(bad_line("GFF", line_no, "fewer than 9 columns"));
        }

        if kind == FeatureKind::Genes && fields[2] != "gene" {
            continue;
        }

        let start = parse_coord(fields[3], "GFF", line_no)?;
        let end = parse_coord(fields[4], "GFF", line_no)?;
        if start == 0 {
            return Err(bad_line("GFF", line_no, "coordinates are 1-based"));
        }

        let id = gff_id(fields[8])
            .unwrap_or_else(|| format!("{}:{}-{}", fields[0], start, end));

        intervals.push(Interval::new(&id, fields[0], start - 1, end));
    }

    Ok(intervals)
}

/// Pull an identifier out of a GFF3 (`ID=x;Name=y`) or GTF (`gene_id "x";`)
/// attribute column. `gene:` prefixes (Ensembl) are dropped.
fn gff_id(attributes: &str) -> Option<String> {
    let mut pairs: HashMap<&str, &str> = HashMap::new();

    for part in attributes.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            pairs.insert(key.trim(), value.trim());
        } else if let Some((key, value)) = part.split_once(' ') {
            pairs.insert(key.trim(), value.trim().trim_matches('"'));
        }
    }

    ["ID", "gene_id", "Name"]
        .iter()
        .find_map(|key| pairs.get(key))
        .map(|id| id.strip_prefix("gene:").unwrap_or(id).to_string())
}

/// RepeatMasker `.out`: query sequence, begin, end and repeat name.
pub fn parse_repeatmasker_out(text: &str) -> PipelineResult<Vec<Interval>> {
    let mut intervals = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = fields.first() else {
            continue;
        };
        if first.parse::<f64>().is_err() {
            continue; // header
        }
        if fields.len() < 15 {
            return Err(bad_line("RepeatMasker", line_no, "fewer than 15 columns"));
        }

        let begin = parse_coord(fields[5], "RepeatMasker", line_no)?;
        let end = parse_coord(fields[6], "RepeatMasker", line_no)?;
        let id = fields
            .get(14)
            .map(|hit| format!("{}#{}", fields[9], hit))
            .unwrap_or_else(|| fields[9].to_string());

        intervals.push(Interval::new(&id, fields[4], begin.saturating_sub(1), end));
    }

    Ok(intervals)
}

/// Genes of one chromosome, sorted by start, with a running max of ends.
struct ChromGenes<'a> {
    genes: Vec<&'a Interval>,
    max_end: Vec<u64>,
}

/// Per-chromosome lookup structure over gene intervals.
pub struct GeneIndex<'a> {
    by_chrom: HashMap<&'a str, ChromGenes<'a>>,
}

impl<'a> GeneIndex<'a> {
    pub fn new(genes: &'a [Interval]) -> Self {
        let mut grouped: HashMap<&'a str, Vec<&'a Interval>> = HashMap::new();
        for gene in genes {
            grouped.entry(gene.chrom.as_str()).or_default().push(gene);
        }

        let by_chrom = grouped
            .into_iter()
            .map(|(chrom, mut genes)| {
                genes.sort_by_key(|g| (g.start, g.end));
                let max_end = genes
                    .iter()
                    .scan(0u64, |max, g| {
                        *max = (*max).max(g.end);
                        Some(*max)
                    })
                    .collect();
                (chrom, ChromGenes { genes, max_end })
            })
            .collect();

        Self { by_chrom }
    }

    /// Closest gene within `window` bases. Ties go to the smaller gene id.
    pub fn nearest(&self, te: &Interval, window: u64) -> Option<(&'a Interval, u64)> {
        let chrom = self.by_chrom.get(te.chrom.as_str())?;

        // Genes starting past this point are further than the window.
        let reach = te.end.saturating_add(window);
        let hi = chrom.genes.partition_point(|g| g.start <= reach);
        // Every gene before `lo` ends more than `window` before the TE.
        let lo = chrom.max_end[..hi].partition_point(|&end| end.saturating_add(window) < te.start);

        chrom.genes[lo..hi]
            .iter()
            .map(|gene| (*gene, te.distance_to(gene)))
            .filter(|(_, distance)| *distance <= window)
            .min_by(|(a, da), (b, db)| da.cmp(db).then_with(|| a.id.cmp(&b.id)))
    }
}

/// Map each TE to its nearest gene, in TE coordinate order.
///
/// TEs with no gene inside `window` are left out.
pub fn nearest_genes(tes: &[Interval], genes: &[Interval], window: u64) -> Vec<TargetGene> {
    let index = GeneIndex::new(genes);

    let mut ordered: Vec<&Interval> = tes.iter().collect();
    ordered.sort_by(|a, b| {
        (a.chrom.as_str(), a.start, a.end, a.id.as_str())
            .cmp(&(b.chrom.as_str(), b.start, b.end, b.id.as_str()))
    });

    ordered
        .into_iter()
        .filter_map(|te| {
            index.nearest(te, window).map(|(gene, distance)| TargetGene {
                te_id: te.id.clone(),
                gene_id: gene.id.clone(),
                te_distance: distance,
            })
        })
        .collect()
}
