use crate::types::DiagramIr;
use crate::{IrError, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

const IR_DIR: &str = "ir";
const RENDERED_DIR: &str = "rendered";

/// Full sha256 hex digest used as the content address of a diagram source
pub fn source_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() < 8 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IrError::InvalidHash(hash.to_string()));
    }
    Ok(())
}

/// Content-addressed artifact layout:
///
/// ```text
/// <root>/ir/<source_hash>.ir.json
/// <root>/rendered/<source_hash>.mmd
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ir_path(&self, hash: &str) -> PathBuf {
        self.root.join(IR_DIR).join(format!("{hash}.ir.json"))
    }

    pub fn rendered_path(&self, hash: &str) -> PathBuf {
        self.root.join(RENDERED_DIR).join(format!("{hash}.mmd"))
    }

    pub async fn write_ir(&self, hash: &str, ir: &DiagramIr) -> Result<PathBuf> {
        validate_hash(hash)?;
        let path = self.ir_path(hash);
        let json = ir.to_canonical_json()?;
        write_atomic(&path, json.as_bytes()).await?;
        Ok(path)
    }

    pub async fn read_ir(&self, hash: &str) -> Result<Option<DiagramIr>> {
        validate_hash(hash)?;
        let path = self.ir_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(DiagramIr::from_json_slice(&bytes)?))
    }

    pub async fn write_rendered(&self, hash: &str, text: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        let path = self.rendered_path(hash);
        write_atomic(&path, text.as_bytes()).await?;
        Ok(path)
    }

    pub async fn read_rendered(&self, hash: &str) -> Result<Option<String>> {
        validate_hash(hash)?;
        let path = self.rendered_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(&path).await?))
    }
}

/// Write-to-temp then rename, so readers never observe a half-written file.
/// Each writer gets its own temp file; concurrent writers of one path resolve
/// as last rename wins.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;
    let target = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&target).map_err(|err| IrError::IoError(err.error))?;
        Ok(())
    })
    .await
    .map_err(|err| IrError::Other(format!("write task failed: {err}")))?
}
