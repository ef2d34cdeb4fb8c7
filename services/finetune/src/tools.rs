//! Command lines for the external collaborators.

use std::path::Path;

use anyhow::Result;

use crate::config::{AppConfig, Device};
use crate::errors::StageError;
use crate::runner::ExternalCommand;

fn p(path: &Path) -> String {
    path.display().to_string()
}

pub fn checkpoint_download(cfg: &AppConfig, out_dir: &Path) -> Result<ExternalCommand> {
    let token = cfg.hf_token.as_deref().ok_or_else(|| {
        StageError::Precondition(format!("HF_TOKEN is required to download {}", cfg.model_id))
    })?;
    Ok(ExternalCommand::new("checkpoint-downloader", &cfg.tools.hf_cli)
        .args(["download", cfg.model_id.as_str(), "--local-dir"])
        .arg(p(out_dir))
        .env("HF_TOKEN", token))
}

pub fn convert(cfg: &AppConfig, checkpoint_dir: &Path, tokenizer: &Path, out: &Path) -> ExternalCommand {
    ExternalCommand::new("checkpoint-converter", &cfg.tools.python)
        .arg(p(&cfg.tools.converter_script))
        .args(["--input_name_or_path".to_string(), p(checkpoint_dir)])
        .args(["--output_path".to_string(), p(out)])
        .args(["--tokenizer_path".to_string(), p(tokenizer)])
        .args(["--precision".to_string(), cfg.training.precision.clone()])
}

/// `torchrun` with one process per device on GPU, plain python on CPU.
fn launcher(cfg: &AppConfig, tool: &str, script: &Path) -> ExternalCommand {
    match cfg.device {
        Device::Gpu => ExternalCommand::new(tool, &cfg.tools.torchrun)
            .arg(format!("--nproc_per_node={}", cfg.training.devices))
            .arg(p(script))
            .kv("trainer.accelerator", "gpu")
            .kv("trainer.devices", cfg.training.devices),
        Device::Cpu => ExternalCommand::new(tool, &cfg.tools.python)
            .arg(p(script))
            .kv("trainer.accelerator", "cpu")
            .kv("trainer.devices", 1),
    }
}

pub fn train(cfg: &AppConfig, base: &Path, train_file: &Path, val_file: &Path) -> ExternalCommand {
    let t = &cfg.training;
    launcher(cfg, "trainer", &cfg.tools.train_script)
        .kv("trainer.num_nodes", 1)
        .kv("trainer.precision", &t.precision)
        .kv("trainer.max_steps", t.max_steps)
        .kv("trainer.val_check_interval", 0.1)
        .kv("model.restore_from_path", p(base))
        .kv("model.peft.peft_scheme", &t.peft_scheme)
        .kv("model.micro_batch_size", t.micro_batch_size)
        .kv("model.global_batch_size", t.global_batch_size)
        .kv("model.tensor_model_parallel_size", t.tensor_parallel)
        .kv("model.pipeline_model_parallel_size", t.pipeline_parallel)
        .kv("model.data.train_ds.file_names", format!("[{}]", p(train_file)))
        .kv("model.data.train_ds.concat_sampling_probabilities", "[1.0]")
        .kv("model.data.validation_ds.file_names", format!("[{}]", p(val_file)))
        .kv("exp_manager.exp_dir", p(&cfg.results_dir()))
        .kv("exp_manager.name", &t.exp_name)
        .kv("exp_manager.checkpoint_callback_params.save_nemo_on_train_end", true)
}

pub fn generate(cfg: &AppConfig, base: &Path, adapter: &Path, test_file: &Path) -> ExternalCommand {
    let t = &cfg.training;
    launcher(cfg, "generator", &cfg.tools.generate_script)
        .kv("trainer.precision", &t.precision)
        .kv("model.restore_from_path", p(base))
        .kv("model.peft.restore_from_path", p(adapter))
        .kv("model.tensor_model_parallel_size", t.tensor_parallel)
        .kv("model.pipeline_model_parallel_size", t.pipeline_parallel)
        .kv("model.data.test_ds.file_names", format!("[{}]", p(test_file)))
        .kv("model.data.test_ds.names", "[submission]")
        .kv("model.data.test_ds.global_batch_size", t.micro_batch_size * t.devices)
        .kv("model.data.test_ds.micro_batch_size", t.micro_batch_size)
        .kv("model.data.test_ds.tokens_to_generate", t.tokens_to_generate)
        .kv("model.data.test_ds.write_predictions_to_file", true)
        .kv("model.data.test_ds.output_file_path_prefix", p(&cfg.predictions_prefix()))
        .kv("inference.greedy", true)
}
