use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub blake3_hex: String,
    pub records: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum StageEvent {
    Artifact(ArtifactRecord),
    Detail { key: String, value: serde_json::Value },
    Done,
    Error { message: String },
}

/// Persisted as `reports/<stage>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub run_id: Uuid,
    pub stage: String,
    pub phase: StagePhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<ArtifactRecord>,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
}

impl StageReport {
    pub fn start(stage: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage: stage.to_string(),
            phase: StagePhase::Running,
            started_at: Utc::now(),
            finished_at: None,
            artifacts: Vec::new(),
            details: serde_json::Map::new(),
            error: None,
        }
    }

    pub fn apply_event(&mut self, ev: StageEvent) {
        // terminal phases are final
        if self.phase != StagePhase::Running {
            return;
        }
        match ev {
            StageEvent::Artifact(a) => self.artifacts.push(a),
            StageEvent::Detail { key, value } => {
                self.details.insert(key, value);
            }
            StageEvent::Done => {
                self.phase = StagePhase::Done;
                self.finished_at = Some(Utc::now());
            }
            StageEvent::Error { message } => {
                self.phase = StagePhase::Failed;
                self.error = Some(message);
                self.finished_at = Some(Utc::now());
            }
        }
    }

    pub fn artifact(&mut self, path: &Path, records: Option<u64>) -> Result<()> {
        let blake3_hex = hash_file(path)?;
        self.apply_event(StageEvent::Artifact(ArtifactRecord {
            path: path.display().to_string(),
            blake3_hex,
            records,
        }));
        Ok(())
    }

    pub fn detail(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.apply_event(StageEvent::Detail { key: key.to_string(), value });
        Ok(())
    }

    /// Log file name for an external tool run within this stage.
    pub fn log_name(&self, tool: &str) -> String {
        format!("{}-{tool}-{}.log", self.stage, self.run_id)
    }

    pub fn save(&self, reports_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(reports_dir)?;
        let path = reports_dir.join(format!("{}.json", self.stage));
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut f = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions_are_terminal() {
        let mut r = StageReport::start("curate");
        assert_eq!(r.phase, StagePhase::Running);

        r.apply_event(StageEvent::Error { message: "boom".into() });
        assert_eq!(r.phase, StagePhase::Failed);
        assert!(r.finished_at.is_some());

        r.apply_event(StageEvent::Done);
        assert_eq!(r.phase, StagePhase::Failed);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_artifact_hash_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("train.jsonl");
        std::fs::write(&f, "abc").unwrap();

        let mut r = StageReport::start("curate");
        r.artifact(&f, Some(1)).unwrap();
        r.detail("workers", 4).unwrap();
        r.apply_event(StageEvent::Done);
        assert_eq!(r.artifacts[0].blake3_hex, hex::encode(blake3::hash(b"abc").as_bytes()));

        r.save(&dir.path().join("reports")).unwrap();
        let back: StageReport =
            serde_json::from_slice(&std::fs::read(dir.path().join("reports/curate.json")).unwrap()).unwrap();
        assert_eq!(back.phase, StagePhase::Done);
        assert_eq!(back.details["workers"], 4);
        assert!(back.log_name("trainer").starts_with("curate-trainer-"));
    }
}
