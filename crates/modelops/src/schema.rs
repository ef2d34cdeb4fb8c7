use serde::{Deserialize, Serialize};

pub type Hash32 = [u8; 32];

pub const MANIFEST_FILE: &str = "checkpoint.manifest.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub rel_path: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Downloaded,
    Converted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub model_id: String,
    pub checkpoint_dir: String,           // local download directory
    pub files: Vec<CheckpointFile>,
    #[serde(with = "hex", rename = "manifest_hash_hex")]
    pub manifest_hash: Hash32,            // blake3 over sorted metadata
    pub recorded_at: u64,
    pub status: CheckpointStatus,
    pub converted_path: Option<String>,
}

/// Local directory name for a hub id: `google/gemma-2b` -> `google__gemma-2b`.
pub fn checkpoint_dir_name(model_id: &str) -> String {
    model_id.replace('/', "__")
}
