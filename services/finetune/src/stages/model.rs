use anyhow::Result;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::{require_dir, require_file, StageError};
use crate::report::StageReport;
use crate::runner::CommandRunner;
use crate::tools;

pub async fn run(cfg: &AppConfig, runner: &dyn CommandRunner, force: bool) -> Result<StageReport> {
    let mut report = StageReport::start("fetch-model");
    let res = fetch_and_convert(cfg, runner, force, &mut report).await;
    super::finish(cfg, report, res)
}

async fn fetch_and_convert(
    cfg: &AppConfig,
    runner: &dyn CommandRunner,
    force: bool,
    report: &mut StageReport,
) -> Result<()> {
    let dir = cfg.checkpoint_dir();

    let existing = if force { None } else { modelops::get_manifest(&dir)? };
    let manifest = match existing {
        Some(m) => {
            info!(model_id = %cfg.model_id, dir = %dir.display(), "checkpoint already downloaded");
            m
        }
        None => {
            let cmd = tools::checkpoint_download(cfg, &dir)?;
            tokio::fs::create_dir_all(&dir).await?;
            runner.run(&cmd, &cfg.logs_dir().join(report.log_name("download"))).await?;
            require_dir(&dir, "downloaded checkpoint")?;

            let (model_id, d) = (cfg.model_id.clone(), dir.clone());
            let rec = tokio::task::spawn_blocking(move || {
                let rec = modelops::record_checkpoint(&model_id, &d)?;
                modelops::put_manifest(&rec)?;
                Ok::<_, modelops::ModelOpsError>(rec)
            })
            .await??;
            info!(files = rec.files.len(), manifest = %hex::encode(rec.manifest_hash), "checkpoint recorded");
            rec
        }
    };
    report.detail("manifest_hash_hex", hex::encode(manifest.manifest_hash))?;
    report.detail("checkpoint_files", manifest.files.len())?;

    let tokenizer = dir.join("tokenizer.model");
    require_file(&tokenizer, "tokenizer file")?;

    let out = cfg.converted_path();
    if force || !out.is_file() {
        let cmd = tools::convert(cfg, &dir, &tokenizer, &out);
        runner.run(&cmd, &cfg.logs_dir().join(report.log_name("convert"))).await?;
        if !out.is_file() {
            return Err(StageError::Precondition(format!(
                "converter finished but {} was not produced",
                out.display()
            ))
            .into());
        }
        modelops::mark_converted(&dir, &out)?;
    } else {
        info!(path = %out.display(), "converted checkpoint present, skipping conversion");
    }

    report.artifact(&out, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use modelops::CheckpointStatus;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn cfg_for(work: &std::path::Path, token: bool) -> AppConfig {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("FT_WORK_DIR".into(), work.display().to_string());
        map.insert("FT_MODEL_ID".into(), "org/tiny".into());
        if token {
            map.insert("HF_TOKEN".into(), "hf_test".into());
        }
        AppConfig::from_lookup(|k| map.get(k).cloned()).unwrap()
    }

    fn arg_after(args: &[String], flag: &str) -> PathBuf {
        let i = args.iter().position(|a| a == flag).unwrap();
        PathBuf::from(&args[i + 1])
    }

    /// Simulates the downloader and converter by creating their outputs.
    fn simulating_runner() -> FakeRunner {
        FakeRunner::new(|cmd| {
            match cmd.tool.as_str() {
                "checkpoint-downloader" => {
                    let dir = arg_after(&cmd.args, "--local-dir");
                    std::fs::write(dir.join("config.json"), "{}")?;
                    std::fs::write(dir.join("tokenizer.model"), "tok")?;
                    std::fs::write(dir.join("model.safetensors"), vec![1u8; 8])?;
                }
                "checkpoint-converter" => {
                    std::fs::write(arg_after(&cmd.args, "--output_path"), "nemo")?;
                }
                other => anyhow::bail!("unexpected tool {other}"),
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_download_manifest_convert() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path(), true);
        let runner = simulating_runner();

        let report = run(&cfg, &runner, false).await.unwrap();
        assert_eq!(runner.tools(), vec!["checkpoint-downloader", "checkpoint-converter"]);
        assert!(cfg.converted_path().is_file());
        assert_eq!(report.artifacts.len(), 1);

        let manifest = modelops::get_manifest(&cfg.checkpoint_dir()).unwrap().unwrap();
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.status, CheckpointStatus::Converted);

        // second run is a no-op
        let again = simulating_runner();
        run(&cfg, &again, false).await.unwrap();
        assert!(again.tools().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path(), false);
        let runner = simulating_runner();

        let err = run(&cfg, &runner, false).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StageError>(), Some(StageError::Precondition(_))));
        assert!(runner.tools().is_empty());
    }

    #[tokio::test]
    async fn test_converter_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(dir.path(), true);
        let runner = FakeRunner::new(|cmd| {
            if cmd.tool == "checkpoint-downloader" {
                let d = arg_after(&cmd.args, "--local-dir");
                std::fs::write(d.join("tokenizer.model"), "tok")?;
            }
            Ok(())
        });

        let err = run(&cfg, &runner, false).await.unwrap_err();
        assert!(err.to_string().contains("was not produced"));
    }
}
