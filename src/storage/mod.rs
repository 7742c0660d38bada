//! Artifact store for uploaded and generated files.
//!
//! Files are written under a single upload directory. Names are sanitized
//! and never overwrite each other: a colliding name gets a numeric suffix,
//! and the file itself is created with create-new semantics so two
//! concurrent uploads cannot claim the same path.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Artifact, ArtifactRole, ArtifactStatus};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Give up after this many suffixed candidates.
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Per-file quality-control summary returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcEntry {
    pub file_size: u64,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_count: Option<usize>,
    /// GC percentage over A/C/G/T bases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_content: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Tracks artifacts by path.
pub struct ArtifactStore {
    root: PathBuf,
    artifacts: RwLock<IndexMap<PathBuf, Artifact>>,
}

impl ArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            PipelineError::Storage(format!(
                "Failed to create upload directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            artifacts: RwLock::new(IndexMap::new()),
        })
    }

    /// Validate the role, persist the bytes and record the artifact.
    pub async fn register(
        &self,
        role: &str,
        filename: &str,
        bytes: &[u8],
    ) -> PipelineResult<Artifact> {
        let role: ArtifactRole = role.parse()?;
        let name = sanitize_filename(filename);
        let path = self.write_new(&name, bytes).await?;

        let artifact = Artifact {
            role,
            path: path.clone(),
            size_bytes: bytes.len() as u64,
            status: ArtifactStatus::Uploaded,
            uploaded_at: Utc::now(),
        };

        info!(
            "Registered {} artifact {} ({} bytes)",
            role,
            path.display(),
            artifact.size_bytes
        );

        self.artifacts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, artifact.clone());

        Ok(artifact)
    }

    async fn write_new(&self, name: &str, bytes: &[u8]) -> PipelineResult<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.root.join(suffixed_name(name, attempt));

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Name taken, trying next: {}", candidate.display());
                    continue;
                }
                Err(e) => {
                    return Err(PipelineError::Storage(format!(
                        "Failed to create {}: {}",
                        candidate.display(),
                        e
                    )))
                }
            };

            let written = async {
                file.write_all(bytes).await?;
                file.flush().await
            }
            .await;

            if let Err(e) = written {
                let _ = tokio::fs::remove_file(&candidate).await;
                return Err(PipelineError::Storage(format!(
                    "Failed to write {}: {}",
                    candidate.display(),
                    e
                )));
            }

            return Ok(candidate);
        }

        Err(PipelineError::Storage(format!(
            "No free file name for {}",
            name
        )))
    }

    /// Update an artifact's status. Returns false for unknown paths.
    pub fn set_status(&self, path: &Path, status: ArtifactStatus) -> bool {
        let mut artifacts = self
            .artifacts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match artifacts.get_mut(path) {
            Some(artifact) => {
                debug!("{} -> {}", path.display(), status);
                artifact.status = status;
                true
            }
            None => {
                warn!("Status update for unknown artifact: {}", path.display());
                false
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<Artifact> {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Most recently registered artifact with the given role.
    pub fn latest(&self, role: ArtifactRole) -> Option<Artifact> {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .rev()
            .find(|a| a.role == role)
            .cloned()
    }

    /// All artifacts in registration order.
    pub fn list(&self) -> Vec<Artifact> {
        self.artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Build the QC entry for a freshly registered artifact.
pub fn quality_control(artifact: &Artifact, bytes: &[u8]) -> QcEntry {
    let mut entry = QcEntry {
        file_size: artifact.size_bytes,
        status: artifact.status,
        sequence_count: None,
        gc_content: None,
        warning: None,
    };

    if !artifact.role.is_sequence() {
        return entry;
    }

    match fasta_stats(bytes) {
        Some((count, gc)) => {
            entry.sequence_count = Some(count);
            entry.gc_content = gc;
        }
        None => {
            entry.warning = Some("File does not look like FASTA".to_string());
        }
    }

    entry
}

/// Count records and GC content of FASTA bytes. `None` if not FASTA.
fn fasta_stats(bytes: &[u8]) -> Option<(usize, Option<f64>)> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
    if *first != b'>' {
        return None;
    }

    let mut records = 0usize;
    let mut gc = 0u64;
    let mut acgt = 0u64;

    for line in bytes.split(|b| *b == b'\n') {
        if line.first() == Some(&b'>') {
            records += 1;
            continue;
        }
        for base in line {
            match base.to_ascii_uppercase() {
                b'G' | b'C' => {
                    gc += 1;
                    acgt += 1;
                }
                b'A' | b'T' | b'U' => acgt += 1,
                _ => {}
            }
        }
    }

    let gc_content = if acgt > 0 {
        Some(((gc as f64 / acgt as f64) * 10_000.0).round() / 100.0)
    } else {
        None
    };

    Some((records, gc_content))
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches(['.', '_']);

    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

fn suffixed_name(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }

    match name.split_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, attempt, ext),
        None => format!("{}_{}", name, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("genome.fa"), "genome.fa");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("my genome (v2).fasta"), "my_genome__v2_.fasta");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".bashrc"), "bashrc");
    }

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name("reads.fastq.gz", 0), "reads.fastq.gz");
        assert_eq!(suffixed_name("reads.fastq.gz", 2), "reads_2.fastq.gz");
        assert_eq!(suffixed_name("README", 1), "README_1");
    }

    #[tokio::test]
    async fn test_register_sizes_match_for_all_roles() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();

        for (i, role) in ArtifactRole::ALL.iter().enumerate() {
            let bytes = vec![b'A'; 100 * (i + 1)];
            let artifact = store
                .register(role.as_str(), "input.fa", &bytes)
                .await
                .unwrap();
            assert_eq!(artifact.size_bytes, bytes.len() as u64);
            assert_eq!(artifact.role, *role);
            assert_eq!(artifact.status, ArtifactStatus::Uploaded);
            assert_eq!(std::fs::read(&artifact.path).unwrap().len(), bytes.len());
        }

        assert_eq!(store.list().len(), ArtifactRole::ALL.len());
    }

    #[tokio::test]
    async fn test_register_invalid_role() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();

        let err = store
            .register("bacterialGenome", "x.fa", b">x\nACGT\n")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRole(_)));
        assert!(store.list().is_empty());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_register_write_failure_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("uploads");
        let store = ArtifactStore::new(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        let err = store
            .register("hostGenome", "g.fa", b">g\nACGT\n")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)), "{:?}", err);
        assert_eq!(err.status_code(), 500);
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_register_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();

        let first = store.register("hostGenome", "g.fa", b"first").await.unwrap();
        let second = store.register("hostGenome", "g.fa", b"second!").await.unwrap();

        assert_ne!(first.path, second.path);
        assert_eq!(std::fs::read(&first.path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second!");
        assert!(second.path.starts_with(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_register_traversal_stays_in_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path().join("uploads")).unwrap();

        let artifact = store
            .register("parasiteGenome", "../../escape.fa", b">a\nAC\n")
            .await
            .unwrap();
        assert_eq!(artifact.path, temp_dir.path().join("uploads").join("escape.fa"));
    }

    #[tokio::test]
    async fn test_status_and_latest() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();

        store.register("hostGenome", "a.fa", b"a").await.unwrap();
        let b = store.register("hostGenome", "b.fa", b"b").await.unwrap();
        store.register("parasiteGenome", "c.fa", b"c").await.unwrap();

        let latest = store.latest(ArtifactRole::HostGenome).unwrap();
        assert_eq!(latest.path, b.path);
        assert!(store.latest(ArtifactRole::HostAnnotation).is_none());

        assert!(store.set_status(&b.path, ArtifactStatus::Done));
        assert_eq!(store.get(&b.path).unwrap().status, ArtifactStatus::Done);
        assert!(!store.set_status(Path::new("nope"), ArtifactStatus::Done));
    }

    #[tokio::test]
    async fn test_quality_control() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();

        let fasta = b">chr1\nGGCCAATT\n>chr2\nGCAT\n";
        let artifact = store.register("hostGenome", "g.fa", fasta).await.unwrap();
        let qc = quality_control(&artifact, fasta);
        assert_eq!(qc.file_size, fasta.len() as u64);
        assert_eq!(qc.sequence_count, Some(2));
        assert_eq!(qc.gc_content, Some(50.0));
        assert!(qc.warning.is_none());

        let junk = b"not a fasta";
        let artifact = store.register("hostTranscriptome", "t.fa", junk).await.unwrap();
        let qc = quality_control(&artifact, junk);
        assert!(qc.warning.is_some());
        assert_eq!(qc.status, ArtifactStatus::Uploaded);

        let gff = b"##gff-version 3\n";
        let artifact = store.register("hostAnnotation", "h.gff3", gff).await.unwrap();
        let qc = quality_control(&artifact, gff);
        assert!(qc.sequence_count.is_none());
        assert!(qc.warning.is_none());
    }
}
