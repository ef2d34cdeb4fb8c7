use std::{fs::File, io::{BufRead, BufReader}};

use curation::FormattedRecord;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct QualityReport {
    pub score: u8,                 // 0..100
    pub warnings: Vec<String>,     // soft issues
    pub duplicate_rate: f32,       // 0.0..1.0
    pub avg_input_len: u32,
    pub avg_output_len: u32,
    pub empty_output_count: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ValidationStats {
    pub examples: u64,
    #[serde(serialize_with = "hex::serde::serialize", rename = "dataset_hash_hex")]
    pub dataset_hash: [u8; 32],
    pub quality: QualityReport,
}

/// `labeled` files (train/val) must carry a non-empty `output` on every line.
pub fn validate_jsonl_and_hash(path: &std::path::Path, labeled: bool) -> Result<ValidationStats, Vec<String>> {
    let f = File::open(path).map_err(|e| vec![format!("IO: {}: {e}", path.display())])?;
    let reader = BufReader::new(f);

    let mut errors: Vec<String> = vec![];
    let mut hasher = blake3::Hasher::new();

    let mut count: u64 = 0;
    let mut input_sum: u64 = 0;
    let mut output_sum: u64 = 0;
    let mut empty_outputs: u64 = 0;

    let mut seen = std::collections::HashSet::<[u8; 32]>::new();
    let mut dupes: u64 = 0;

    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("Line {line_no}: IO read error: {e}"));
                continue;
            }
        };

        // Hash exact content + newline => stable hash across reads
        hasher.update(line.as_bytes());
        hasher.update(b"\n");

        if line.trim().is_empty() {
            errors.push(format!("Line {line_no}: empty line"));
            continue;
        }

        let ex: FormattedRecord = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("Line {line_no}: invalid JSON: {e}"));
                continue;
            }
        };

        if ex.input.trim().is_empty() {
            errors.push(format!("Line {line_no}: empty input"));
            continue;
        }
        if ex.output.trim().is_empty() {
            if labeled {
                errors.push(format!("Line {line_no}: empty output"));
                continue;
            }
            empty_outputs += 1;
        }

        let fp = blake3::hash(format!("{}\n{}", ex.input, ex.output).as_bytes()).into();
        if !seen.insert(fp) {
            dupes += 1;
        }

        count += 1;
        input_sum += ex.input.len() as u64;
        output_sum += ex.output.len() as u64;
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    if count == 0 {
        return Err(vec!["No valid examples found".to_string()]);
    }

    let dataset_hash: [u8; 32] = hasher.finalize().into();
    let duplicate_rate = (dupes as f32) / (count as f32);

    let mut score: i32 = 100;
    let mut warnings: Vec<String> = vec![];

    if labeled && count < 200 {
        score -= 25;
        warnings.push(format!("Low example count ({count}). Recommended: 200+"));
    }
    if duplicate_rate > 0.15 {
        score -= 25;
        warnings.push(format!("High duplicate_rate ({duplicate_rate:.2}). Consider deduping"));
    }

    Ok(ValidationStats {
        examples: count,
        dataset_hash,
        quality: QualityReport {
            score: score.clamp(0, 100) as u8,
            warnings,
            duplicate_rate,
            avg_input_len: (input_sum / count) as u32,
            avg_output_len: (output_sum / count) as u32,
            empty_output_count: empty_outputs,
        },
    })
}
