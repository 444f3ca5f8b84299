//! Workspace blob store for evidence uploads and generated letters.
//!
//! References handed back to callers are workspace-relative paths; the
//! caller resolves them against the selected workspace when opening a file.

use anyhow::{anyhow, Context};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const MAX_EVIDENCE_BYTES: u64 = 5 * 1024 * 1024;

const EVIDENCE_DIR: &str = "files/evidence";
const LETTERS_DIR: &str = "files/letters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Jpeg,
    Png,
    Gif,
    Pdf,
}

impl EvidenceKind {
    pub fn extension(self) -> &'static str {
        match self {
            EvidenceKind::Jpeg => "jpg",
            EvidenceKind::Png => "png",
            EvidenceKind::Gif => "gif",
            EvidenceKind::Pdf => "pdf",
        }
    }
}

/// Identify the upload by content, not by filename. Allowed set per the
/// entry form: JPEG, PNG, GIF or PDF.
pub fn sniff_evidence_kind(head: &[u8]) -> Option<EvidenceKind> {
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(EvidenceKind::Jpeg)
    } else if head.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(EvidenceKind::Png)
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Some(EvidenceKind::Gif)
    } else if head.starts_with(b"%PDF-") {
        Some(EvidenceKind::Pdf)
    } else {
        None
    }
}

#[derive(Debug)]
pub enum EvidenceError {
    TooLarge { size: u64 },
    UnsupportedType,
    Io(anyhow::Error),
}

impl std::fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceError::TooLarge { size } => {
                write!(f, "file is {} bytes; the limit is 5 MB", size)
            }
            EvidenceError::UnsupportedType => {
                write!(f, "file must be JPEG, PNG, GIF or PDF")
            }
            EvidenceError::Io(e) => write!(f, "{}", e),
        }
    }
}

/// Validate an evidence file without writing anything. Returns the sniffed
/// kind so the stored copy gets a matching extension.
pub fn validate_evidence(path: &Path) -> Result<EvidenceKind, EvidenceError> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.to_string_lossy()))
        .map_err(EvidenceError::Io)?;
    if !meta.is_file() {
        return Err(EvidenceError::Io(anyhow!(
            "not a file: {}",
            path.to_string_lossy()
        )));
    }
    if meta.len() > MAX_EVIDENCE_BYTES {
        return Err(EvidenceError::TooLarge { size: meta.len() });
    }

    let mut head = [0u8; 8];
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))
        .map_err(EvidenceError::Io)?;
    let read = f
        .read(&mut head)
        .context("failed to read file signature")
        .map_err(EvidenceError::Io)?;
    sniff_evidence_kind(&head[..read]).ok_or(EvidenceError::UnsupportedType)
}

/// Copy a validated evidence file into the store. Keyed by timestamp and
/// student id, matching the upload paths the entry form used.
pub fn store_evidence(
    workspace: &Path,
    source: &Path,
    kind: EvidenceKind,
    student_id: &str,
    timestamp_ms: i64,
) -> anyhow::Result<String> {
    let rel = format!(
        "{}/{}_{}.{}",
        EVIDENCE_DIR,
        timestamp_ms,
        student_id,
        kind.extension()
    );
    let dst = workspace.join(&rel);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.to_string_lossy()))?;
    }
    std::fs::copy(source, &dst).with_context(|| {
        format!(
            "failed to copy evidence from {} to {}",
            source.to_string_lossy(),
            dst.to_string_lossy()
        )
    })?;
    Ok(rel)
}

/// Write a generated letter artifact. Path is keyed by tier code, external
/// student id and a timestamp.
pub fn store_letter(
    workspace: &Path,
    tier_code: &str,
    external_id: &str,
    timestamp_ms: i64,
    bytes: &[u8],
) -> anyhow::Result<String> {
    let rel = format!(
        "{}/{}_{}_{}.pdf",
        LETTERS_DIR, tier_code, external_id, timestamp_ms
    );
    let dst = workspace.join(&rel);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.to_string_lossy()))?;
    }
    std::fs::write(&dst, bytes)
        .with_context(|| format!("failed to write letter {}", dst.to_string_lossy()))?;
    Ok(rel)
}

pub fn resolve_ref(workspace: &Path, reference: &str) -> PathBuf {
    workspace.join(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sniffs_all_allowed_types() {
        assert_eq!(
            sniff_evidence_kind(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(EvidenceKind::Jpeg)
        );
        assert_eq!(
            sniff_evidence_kind(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(EvidenceKind::Png)
        );
        assert_eq!(sniff_evidence_kind(b"GIF89a.."), Some(EvidenceKind::Gif));
        assert_eq!(sniff_evidence_kind(b"%PDF-1.4"), Some(EvidenceKind::Pdf));
        assert_eq!(sniff_evidence_kind(b"PK\x03\x04"), None);
        assert_eq!(sniff_evidence_kind(b""), None);
    }

    #[test]
    fn oversized_file_is_rejected_before_any_store_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let big = dir.path().join("big.pdf");
        let mut f = File::create(&big).expect("create");
        f.write_all(b"%PDF-1.4\n").expect("header");
        f.set_len(MAX_EVIDENCE_BYTES + 1).expect("grow");
        drop(f);

        match validate_evidence(&big) {
            Err(EvidenceError::TooLarge { size }) => {
                assert_eq!(size, MAX_EVIDENCE_BYTES + 1)
            }
            other => panic!("expected TooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn valid_pdf_is_stored_under_evidence_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("upload.pdf");
        std::fs::write(&src, b"%PDF-1.4\nsome content").expect("write");

        let kind = validate_evidence(&src).expect("validate");
        assert_eq!(kind, EvidenceKind::Pdf);

        let workspace = dir.path().join("ws");
        let reference =
            store_evidence(&workspace, &src, kind, "stu-1", 1_700_000_000_000).expect("store");
        assert!(reference.starts_with("files/evidence/"));
        assert!(reference.ends_with(".pdf"));
        assert!(resolve_ref(&workspace, &reference).is_file());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("upload.zip");
        std::fs::write(&src, b"PK\x03\x04rest").expect("write");
        match validate_evidence(&src) {
            Err(EvidenceError::UnsupportedType) => {}
            other => panic!("expected UnsupportedType, got {:?}", other.map(|_| ())),
        }
    }
}
