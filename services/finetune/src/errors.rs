use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal stage failures. Nothing is retried; fix the input or config and rerun.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{tool} exited with {status} (log: {path}){tail}", path = .log.display())]
    External {
        tool: String,
        status: String,
        log: PathBuf,
        tail: String,
    },

    #[error("data integrity: {0}")]
    DataIntegrity(String),
}

pub fn require_file(path: &Path, what: &str) -> Result<(), StageError> {
    if !path.is_file() {
        return Err(StageError::Precondition(format!("{what} not found at {}", path.display())));
    }
    Ok(())
}

pub fn require_dir(path: &Path, what: &str) -> Result<(), StageError> {
    if !path.is_dir() {
        return Err(StageError::Precondition(format!(
            "{what} directory not found at {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.jsonl");
        std::fs::write(&f, "").unwrap();

        assert!(require_file(&f, "train file").is_ok());
        assert!(require_dir(dir.path(), "checkpoint").is_ok());

        let err = require_file(&dir.path().join("missing"), "val file").unwrap_err();
        assert!(err.to_string().contains("val file not found"));
        assert!(require_dir(&f, "checkpoint").is_err());
    }

    #[test]
    fn test_external_message_names_log() {
        let e = StageError::External {
            tool: "converter".into(),
            status: "exit status: 2".into(),
            log: PathBuf::from("/w/logs/convert.log"),
            tail: String::new(),
        };
        assert_eq!(e.to_string(), "converter exited with exit status: 2 (log: /w/logs/convert.log)");
    }
}
