use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use curation::{
    ensure_non_empty, law_qa_pipeline, merge_stats, read_records, retag, split_dataset,
    write_jsonl, CurationError, FormattedRecord, Indexed, Pipeline, Record, Stage, StageStats,
    TextField, TextNormalizer, CURATED_FILE, SUBMISSION_FILE, TRAIN_FILE, VAL_FILE,
};
use tracing::{info, warn};

use crate::config::{AppConfig, Device};
use crate::download::fetch_source;
use crate::errors::{require_file, StageError};
use crate::report::StageReport;

pub async fn run(cfg: &AppConfig, force: bool) -> Result<StageReport> {
    let mut report = StageReport::start("curate");
    let res = curate(cfg, force, &mut report).await;
    super::finish(cfg, report, res)
}

async fn curate(cfg: &AppConfig, force: bool, report: &mut StageReport) -> Result<()> {
    require_file(&cfg.submission_path, "submission source")?;

    let raw = cfg.raw_dataset_path();
    fetch_source(&cfg.dataset_url, &raw, force).await?;
    require_file(&raw, "source dataset")?;

    let records = load::<Record>(raw.clone()).await?;
    ensure_non_empty(&records, "loading").map_err(integrity)?;
    info!(records = records.len(), path = %raw.display(), "source dataset loaded");

    if cfg.device == Device::Gpu {
        info!(workers = cfg.workers, "curation runs on CPU workers; device selection applies to training and generation");
    }

    let pipeline = Arc::new(law_qa_pipeline(&cfg.curation)?);
    let (mut kept, stats) = run_parallel(pipeline, records, cfg.workers).await?;
    report.detail("pipeline", &stats)?;

    // train/val rows need a label
    let before = kept.len();
    kept.retain(Record::has_tags);
    let untagged = before - kept.len();
    if untagged > 0 {
        warn!(dropped = untagged, "records without tags left out of the labeled set");
    }
    report.detail("untagged_dropped", untagged)?;
    ensure_non_empty(&kept, "curation").map_err(integrity)?;

    let data = cfg.data_dir();
    let curated = cfg.prompt.format_all(&kept, CURATED_FILE);
    persist(report, data.join(CURATED_FILE), curated.clone()).await?;

    let (mut train, mut val) = split_dataset(curated, cfg.val_fraction, cfg.split_seed)?;
    retag(&mut train, TRAIN_FILE);
    retag(&mut val, VAL_FILE);
    info!(train = train.len(), val = val.len(), fraction = cfg.val_fraction, seed = cfg.split_seed, "split");
    persist(report, data.join(TRAIN_FILE), train).await?;
    persist(report, data.join(VAL_FILE), val).await?;

    let submission = load::<Record>(cfg.submission_path.clone()).await?;
    let normalizer = Arc::new(
        Pipeline::new()
            .stage(Stage::modify(TextField::Title, TextNormalizer::new()))
            .stage(Stage::modify(TextField::Question, TextNormalizer::new())),
    );
    let (submission, _) = run_parallel(normalizer, submission, cfg.workers).await?;
    let formatted = cfg.prompt.format_all(&submission, SUBMISSION_FILE);
    persist(report, data.join(SUBMISSION_FILE), formatted).await?;

    Ok(())
}

fn integrity(e: CurationError) -> StageError {
    StageError::DataIntegrity(e.to_string())
}

async fn load<T>(path: PathBuf) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let records = tokio::task::spawn_blocking(move || read_records::<T>(&path)).await??;
    Ok(records)
}

async fn persist(report: &mut StageReport, path: PathBuf, rows: Vec<FormattedRecord>) -> Result<()> {
    let p = path.clone();
    let n = tokio::task::spawn_blocking(move || write_jsonl(&p, &rows))
        .await?
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), records = n, "wrote dataset");
    report.artifact(&path, Some(n as u64))
}

/// Cuts the dataset into `workers` contiguous chunks and runs the whole
/// pipeline on each chunk on the blocking pool. Output keeps source order.
pub async fn run_parallel(
    pipeline: Arc<Pipeline>,
    records: Vec<Record>,
    workers: usize,
) -> Result<(Vec<Record>, Vec<StageStats>), CurationError> {
    let total = records.len();
    let chunk_size = total.div_ceil(workers.max(1)).max(1);

    let mut indexed: Indexed = records.into_iter().enumerate().collect();
    let mut chunks: Vec<Indexed> = Vec::new();
    while !indexed.is_empty() {
        let rest = indexed.split_off(chunk_size.min(indexed.len()));
        chunks.push(std::mem::replace(&mut indexed, rest));
    }

    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let pipeline = pipeline.clone();
            tokio::task::spawn_blocking(move || pipeline.run_indexed(chunk))
        })
        .collect();

    let mut out = Vec::with_capacity(total);
    let mut per_chunk = Vec::with_capacity(handles.len());
    for h in handles {
        let (kept, stats) = h.await.map_err(|e| CurationError::Worker(e.to_string()))??;
        out.extend(kept.into_iter().map(|(_, r)| r));
        per_chunk.push(stats);
    }

    let stats = merge_stats(&per_chunk);
    for s in &stats {
        info!(stage = %s.name, records_in = s.records_in, records_out = s.records_out, "curation stage");
    }
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StagePhase;
    use curation::CurationSettings;
    use std::collections::HashMap;

    fn words(n: usize) -> String {
        vec!["law"; n].join(" ")
    }

    fn rec(n: usize, score: i64) -> Record {
        Record { title: format!("t{n}"), question: words(n), question_score: Some(score), ..Default::default() }
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let records: Vec<Record> = (0..37).map(|i| rec(30 + i * 4, i as i64 % 4 - 1)).collect();
        let pipeline = Arc::new(law_qa_pipeline(&CurationSettings::default()).unwrap());

        let (seq, seq_stats) = pipeline.run(records.clone()).unwrap();
        for workers in [1, 3, 8, 64] {
            let (par, par_stats) = run_parallel(pipeline.clone(), records.clone(), workers).await.unwrap();
            assert_eq!(par, seq, "workers={workers}");
            assert_eq!(par_stats, seq_stats);
        }
    }

    #[tokio::test]
    async fn test_parallel_on_empty_input() {
        let pipeline = Arc::new(law_qa_pipeline(&CurationSettings::default()).unwrap());
        let (out, stats) = run_parallel(pipeline, vec![], 4).await.unwrap();
        assert!(out.is_empty());
        assert!(stats.is_empty());
    }

    fn cfg_for(work: &std::path::Path) -> AppConfig {
        let map: HashMap<String, String> = [
            ("FT_WORK_DIR", work.display().to_string()),
            ("FT_DEVICE", "cpu".to_string()),
            ("FT_WORKERS", "2".to_string()),
            ("FT_VAL_FRACTION", "0.2".to_string()),
            // never contacted: the raw file is seeded below
            ("FT_DATASET_URL", "http://127.0.0.1:9/law.json".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_curate_stage_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path());
        std::fs::create_dir_all(cfg.raw_dir()).unwrap();

        let raw: Vec<serde_json::Value> = (0..20)
            .map(|i| {
                serde_json::json!({
                    "question_title": format!("Title {i}"),
                    "question_body": words(if i % 5 == 0 { 10 } else { 80 }),
                    "tags": ["contract-law"],
                    "question_score": if i % 4 == 0 { -1 } else { 2 },
                })
            })
            .collect();
        std::fs::write(cfg.raw_dataset_path(), serde_json::to_string(&raw).unwrap()).unwrap();
        std::fs::write(
            &cfg.submission_path,
            "{\"title\":\"Sub\",\"question\":\"Is this legal?\"}\n",
        )
        .unwrap();

        let report = run(&cfg, false).await.unwrap();
        assert_eq!(report.phase, StagePhase::Done);

        // i%5==0 dropped by word count (4), then i%4==0 by score (4, i=0 already gone)
        let curated: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(CURATED_FILE)).unwrap();
        assert_eq!(curated.len(), 12);
        let train: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(TRAIN_FILE)).unwrap();
        let val: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(VAL_FILE)).unwrap();
        assert_eq!(val.len(), 2);
        assert_eq!(train.len(), 10);

        let sub: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(SUBMISSION_FILE)).unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].output, "");
        assert_eq!(sub[0].filename, SUBMISSION_FILE);
        assert!(sub[0].input.ends_with("TITLE:\nSub\n\nQUESTION:\nIs this legal?"));

        assert_eq!(report.artifacts.len(), 4);
        assert!(cfg.reports_dir().join("curate.json").is_file());
    }

    #[tokio::test]
    async fn test_missing_submission_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path());
        let err = run(&cfg, false).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StageError>(), Some(StageError::Precondition(_))));

        let saved: StageReport =
            serde_json::from_slice(&std::fs::read(cfg.reports_dir().join("curate.json")).unwrap()).unwrap();
        assert_eq!(saved.phase, StagePhase::Failed);
    }

    #[tokio::test]
    async fn test_everything_filtered_is_a_data_integrity_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path());
        std::fs::create_dir_all(cfg.raw_dir()).unwrap();
        std::fs::write(cfg.raw_dataset_path(), r#"[{"title":"t","question":"too short","question_score":1}]"#).unwrap();
        std::fs::write(&cfg.submission_path, "{\"title\":\"t\",\"question\":\"q\"}\n").unwrap();

        let err = run(&cfg, false).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StageError>(), Some(StageError::DataIntegrity(_))));
    }

    #[tokio::test]
    async fn test_untagged_records_stay_out_of_labeled_splits() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path());
        std::fs::create_dir_all(cfg.raw_dir()).unwrap();

        // upstream dump layout: question score under `score`, answers nested
        let raw: Vec<serde_json::Value> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "question_id": i,
                    "question_title": format!("Title {i}"),
                    "question_body": words(60),
                    "tags": if i < 3 { serde_json::json!([]) } else { serde_json::json!(["tort"]) },
                    "score": 1,
                    "answers": [{"body": "answer", "score": 4}],
                })
            })
            .collect();
        std::fs::write(cfg.raw_dataset_path(), serde_json::to_string(&raw).unwrap()).unwrap();
        std::fs::write(&cfg.submission_path, "{\"title\":\"t\",\"question\":\"q\"}\n").unwrap();

        let report = run(&cfg, false).await.unwrap();
        assert_eq!(report.details["untagged_dropped"], 3);

        let curated: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(CURATED_FILE)).unwrap();
        assert_eq!(curated.len(), 7);
        for file in [TRAIN_FILE, VAL_FILE] {
            let rows: Vec<FormattedRecord> = read_records(&cfg.data_dir().join(file)).unwrap();
            assert!(rows.iter().all(|r| r.output == "tort"), "{file}");
        }
    }
}
