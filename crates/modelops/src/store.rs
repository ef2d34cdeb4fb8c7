use std::path::Path;

use thiserror::Error;

use crate::{manifest_hash, scan_checkpoint, CheckpointRecord, CheckpointStatus, MANIFEST_FILE};

#[derive(Debug, Error)]
pub enum ModelOpsError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Ser(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("checkpoint directory has no files: {0}")]
    EmptyCheckpoint(String),
}

pub type Result<T> = std::result::Result<T, ModelOpsError>;

/// Inventories `dir` and builds a fresh record for it.
pub fn record_checkpoint(model_id: &str, dir: &Path) -> Result<CheckpointRecord> {
    let files = scan_checkpoint(dir)?;
    Ok(CheckpointRecord {
        model_id: model_id.to_string(),
        checkpoint_dir: dir.display().to_string(),
        manifest_hash: manifest_hash(files.clone()),
        files,
        recorded_at: now(),
        status: CheckpointStatus::Downloaded,
        converted_path: None,
    })
}

/// Writes the record as `checkpoint.manifest.json` inside its directory.
pub fn put_manifest(rec: &CheckpointRecord) -> Result<()> {
    let path = Path::new(&rec.checkpoint_dir).join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(rec).map_err(|e| ModelOpsError::Ser(e.to_string()))?;
    std::fs::write(&path, bytes).map_err(|e| ModelOpsError::Io(format!("{}: {e}", path.display())))?;
    Ok(())
}

pub fn get_manifest(dir: &Path) -> Result<Option<CheckpointRecord>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).map_err(|e| ModelOpsError::Io(format!("{}: {e}", path.display())))?;
    let rec = serde_json::from_slice(&bytes).map_err(|e| ModelOpsError::Ser(e.to_string()))?;
    Ok(Some(rec))
}

pub fn mark_converted(dir: &Path, converted_path: &Path) -> Result<CheckpointRecord> {
    let mut rec = get_manifest(dir)?
        .ok_or_else(|| ModelOpsError::Io(format!("no manifest in {}", dir.display())))?;
    rec.status = CheckpointStatus::Converted;
    rec.converted_path = Some(converted_path.display().to_string());
    rec.recorded_at = now();
    put_manifest(&rec)?;
    Ok(rec)
}

fn now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
