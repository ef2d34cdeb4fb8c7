use std::path::Path;

use walkdir::WalkDir;

use crate::{CheckpointFile, Hash32, ModelOpsError, Result, MANIFEST_FILE};

/// Deterministic manifest hash:
/// - sort by rel_path (bytewise)
/// - hash bytes: "<rel_path>\n<size>\n" for each file
pub fn manifest_hash(mut files: Vec<CheckpointFile>) -> Hash32 {
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let mut hasher = blake3::Hasher::new();
    for f in files {
        hasher.update(f.rel_path.as_bytes());
        hasher.update(b"\n");
        hasher.update(f.size.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().into()
}

/// Lists regular files under `dir` with `/`-separated relative paths.
/// Hidden entries (downloader caches) and the manifest itself are skipped.
pub fn scan_checkpoint(dir: &Path) -> Result<Vec<CheckpointFile>> {
    if !dir.is_dir() {
        return Err(ModelOpsError::NotADirectory(dir.display().to_string()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| ModelOpsError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| ModelOpsError::Io(e.to_string()))?;
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel_path == MANIFEST_FILE {
            continue;
        }
        let size = entry.metadata().map_err(|e| ModelOpsError::Io(e.to_string()))?.len();
        files.push(CheckpointFile { rel_path, size });
    }

    if files.is_empty() {
        return Err(ModelOpsError::EmptyCheckpoint(dir.display().to_string()));
    }
    Ok(files)
}
