use std::path::{Path, PathBuf};

use anyhow::Result;
use curation::{read_records, FormattedRecord, SUBMISSION_FILE, TRAIN_FILE, VAL_FILE};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dataset_validator::{validate_jsonl_and_hash, ValidationStats};
use crate::errors::{require_file, StageError};
use crate::predictions::{find_predictions_file, summarize, unmatched_inputs, Prediction};
use crate::report::StageReport;
use crate::runner::CommandRunner;
use crate::tools;

pub async fn run_train(cfg: &AppConfig, runner: &dyn CommandRunner) -> Result<StageReport> {
    let mut report = StageReport::start("train");
    let res = train(cfg, runner, &mut report).await;
    super::finish(cfg, report, res)
}

pub async fn run_generate(cfg: &AppConfig, runner: &dyn CommandRunner) -> Result<StageReport> {
    let mut report = StageReport::start("generate");
    let res = generate(cfg, runner, &mut report).await;
    super::finish(cfg, report, res)
}

async fn validate(path: PathBuf, labeled: bool) -> Result<ValidationStats> {
    let p = path.clone();
    let res = tokio::task::spawn_blocking(move || validate_jsonl_and_hash(&p, labeled)).await?;
    let stats = res.map_err(|errs| {
        let shown: Vec<_> = errs.iter().take(5).cloned().collect();
        StageError::DataIntegrity(format!(
            "{} failed validation ({} problems): {}",
            path.display(),
            errs.len(),
            shown.join("; ")
        ))
    })?;
    for w in &stats.quality.warnings {
        warn!(path = %path.display(), "{w}");
    }
    info!(
        path = %path.display(),
        examples = stats.examples,
        score = stats.quality.score,
        dataset_hash = %hex::encode(stats.dataset_hash),
        "dataset validated"
    );
    Ok(stats)
}

fn require_output(path: &Path, tool: &str) -> Result<()> {
    if !path.is_file() {
        return Err(StageError::Precondition(format!(
            "{tool} finished but {} was not produced",
            path.display()
        ))
        .into());
    }
    Ok(())
}

async fn train(cfg: &AppConfig, runner: &dyn CommandRunner, report: &mut StageReport) -> Result<()> {
    let base = cfg.converted_path();
    let data = cfg.data_dir();
    let (train_file, val_file) = (data.join(TRAIN_FILE), data.join(VAL_FILE));
    require_file(&base, "converted base model")?;
    require_file(&train_file, "training split")?;
    require_file(&val_file, "validation split")?;

    let train_stats = validate(train_file.clone(), true).await?;
    let val_stats = validate(val_file.clone(), true).await?;
    report.detail("train_dataset", &train_stats)?;
    report.detail("val_dataset", &val_stats)?;

    let cmd = tools::train(cfg, &base, &train_file, &val_file);
    runner.run(&cmd, &cfg.logs_dir().join(report.log_name("trainer"))).await?;

    let adapter = cfg.adapter_path();
    require_output(&adapter, "trainer")?;
    report.artifact(&adapter, None)?;
    Ok(())
}

async fn generate(cfg: &AppConfig, runner: &dyn CommandRunner, report: &mut StageReport) -> Result<()> {
    let base = cfg.converted_path();
    let adapter = cfg.adapter_path();
    let test_file = cfg.data_dir().join(SUBMISSION_FILE);
    require_file(&base, "converted base model")?;
    require_file(&adapter, "trained adapter")?;
    require_file(&test_file, "formatted submission set")?;

    let stats = validate(test_file.clone(), false).await?;
    report.detail("submission_dataset", &stats)?;

    let cmd = tools::generate(cfg, &base, &adapter, &test_file);
    runner.run(&cmd, &cfg.logs_dir().join(report.log_name("generator"))).await?;

    let out = find_predictions_file(&cfg.predictions_prefix())?;
    let p = out.clone();
    let preds = tokio::task::spawn_blocking(move || read_records::<Prediction>(&p)).await??;
    if preds.len() as u64 != stats.examples {
        warn!(expected = stats.examples, got = preds.len(), "prediction count differs from submission set");
    }

    let tf = test_file.clone();
    let rows = tokio::task::spawn_blocking(move || read_records::<FormattedRecord>(&tf)).await??;
    let unmatched = unmatched_inputs(&preds, rows.iter().map(|r| r.input.as_str()));
    if unmatched > 0 {
        warn!(unmatched, "predictions whose input matches no submission row");
    }
    report.detail("unmatched_predictions", unmatched)?;

    let summary = summarize(&preds);
    info!(count = summary.count, labeled = summary.labeled, path = %out.display(), "predictions written");
    report.detail("predictions", &summary)?;
    report.artifact(&out, Some(preds.len() as u64))?;
    Ok(())
}
