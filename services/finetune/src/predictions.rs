use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::StageError;

/// One generator output line.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub input: String,
    pub pred: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PredictionSummary {
    pub count: usize,
    pub labeled: usize,
    pub exact_match: Option<f64>,
    pub mean_jaccard: Option<f64>,
}

/// The generator appends its own suffix to the prefix; pick the newest match.
pub fn find_predictions_file(prefix: &Path) -> Result<PathBuf, StageError> {
    let dir = prefix.parent().unwrap_or_else(|| Path::new("."));
    let stem = prefix.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

    let entries = std::fs::read_dir(dir).map_err(|e| {
        StageError::Precondition(format!("predictions directory {} unreadable: {e}", dir.display()))
    })?;

    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with(&stem) && name.ends_with(".jsonl")
        })
        .filter_map(|e| Some((e.metadata().ok()?.modified().ok()?, e.path())))
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
        .ok_or_else(|| {
            StageError::Precondition(format!("no predictions file with prefix {}", prefix.display()))
        })
}

fn tag_set(s: &str) -> BTreeSet<String> {
    s.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Predictions whose `input` is not one of the submitted prompts.
pub fn unmatched_inputs<'a>(preds: &[Prediction], inputs: impl IntoIterator<Item = &'a str>) -> usize {
    let known: HashSet<&str> = inputs.into_iter().map(str::trim).collect();
    preds.iter().filter(|p| !known.contains(p.input.trim())).count()
}

pub fn summarize(preds: &[Prediction]) -> PredictionSummary {
    let mut labeled = 0usize;
    let mut exact = 0usize;
    let mut jac_sum = 0.0f64;

    for p in preds {
        let Some(label) = p.label.as_deref().filter(|l| !l.trim().is_empty()) else { continue };
        labeled += 1;
        let (pt, lt) = (tag_set(&p.pred), tag_set(label));
        if pt == lt {
            exact += 1;
        }
        jac_sum += jaccard(&pt, &lt);
    }

    let rate = |n: f64| (labeled > 0).then(|| n / labeled as f64);
    PredictionSummary {
        count: preds.len(),
        labeled,
        exact_match: rate(exact as f64),
        mean_jaccard: rate(jac_sum),
    }
}
