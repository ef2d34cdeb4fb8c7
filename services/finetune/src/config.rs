use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use curation::{CurationSettings, PromptTemplate, DEFAULT_PREAMBLE, DEFAULT_SPLIT_SEED, SUBMISSION_SOURCE_FILE};

const DEFAULT_DATASET_URL: &str =
    "https://huggingface.co/datasets/ymoslem/Law-StackExchange/resolve/main/law-stackexchange-questions-answers.json";
const NEMO_SCRIPTS: &str = "/opt/NeMo";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl std::str::FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            other => bail!("FT_DEVICE must be cpu or gpu, got {other:?}"),
        }
    }
}

/// Executables and scripts of the external collaborators.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    pub python: String,
    pub torchrun: String,
    pub hf_cli: String,
    pub converter_script: PathBuf,
    pub train_script: PathBuf,
    pub generate_script: PathBuf,
}

/// Fixed hyperparameter set handed to the trainer and generator.
#[derive(Clone, Debug)]
pub struct TrainingParams {
    pub precision: String,
    pub devices: u32,
    pub micro_batch_size: u32,
    pub global_batch_size: u32,
    pub tensor_parallel: u32,
    pub pipeline_parallel: u32,
    pub max_steps: u32,
    pub peft_scheme: String,
    pub exp_name: String,
    pub tokens_to_generate: u32,
}

#[derive(Clone)]
pub struct AppConfig {
    pub work_dir: PathBuf,
    pub dataset_url: String,
    pub submission_path: PathBuf,

    pub hf_token: Option<String>,
    pub model_id: String,

    pub device: Device,
    pub workers: usize,

    pub val_fraction: f64,
    pub split_seed: u64,
    pub curation: CurationSettings,
    pub prompt: PromptTemplate,

    pub tools: ToolPaths,
    pub training: TrainingParams,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("work_dir", &self.work_dir)
            .field("dataset_url", &self.dataset_url)
            .field("submission_path", &self.submission_path)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .field("model_id", &self.model_id)
            .field("device", &self.device)
            .field("workers", &self.workers)
            .field("val_fraction", &self.val_fraction)
            .field("split_seed", &self.split_seed)
            .field("curation", &self.curation)
            .field("tools", &self.tools)
            .field("training", &self.training)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let work_dir = PathBuf::from(or("FT_WORK_DIR", "./workspace"));
        let dataset_url = or("FT_DATASET_URL", DEFAULT_DATASET_URL);
        let submission_path = get("FT_SUBMISSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("data/raw").join(SUBMISSION_SOURCE_FILE));

        let hf_token = get("HF_TOKEN").filter(|t| !t.trim().is_empty());
        let model_id = or("FT_MODEL_ID", "google/gemma-2b");

        let device: Device = or("FT_DEVICE", "gpu").parse()?;
        let default_workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let workers: usize = parse(&get, "FT_WORKERS", default_workers)?;

        let val_fraction: f64 = parse(&get, "FT_VAL_FRACTION", 0.1)?;
        let split_seed: u64 = parse(&get, "FT_SPLIT_SEED", DEFAULT_SPLIT_SEED)?;
        let curation = CurationSettings {
            min_words: parse(&get, "FT_MIN_WORDS", 50)?,
            max_words: parse(&get, "FT_MAX_WORDS", 500)?,
            score_threshold: parse(&get, "FT_SCORE_THRESHOLD", 0)?,
        };
        let prompt = PromptTemplate::new(or("FT_PROMPT_PREAMBLE", DEFAULT_PREAMBLE));

        let tools = ToolPaths {
            python: or("FT_PYTHON", "python3"),
            torchrun: or("FT_TORCHRUN", "torchrun"),
            hf_cli: or("FT_HF_CLI", "huggingface-cli"),
            converter_script: PathBuf::from(or(
                "FT_CONVERTER_SCRIPT",
                &format!("{NEMO_SCRIPTS}/scripts/checkpoint_converters/convert_gemma_hf_to_nemo.py"),
            )),
            train_script: PathBuf::from(or(
                "FT_TRAIN_SCRIPT",
                &format!("{NEMO_SCRIPTS}/examples/nlp/language_modeling/tuning/megatron_gpt_finetuning.py"),
            )),
            generate_script: PathBuf::from(or(
                "FT_GENERATE_SCRIPT",
                &format!("{NEMO_SCRIPTS}/examples/nlp/language_modeling/tuning/megatron_gpt_generate.py"),
            )),
        };

        let training = TrainingParams {
            precision: or("FT_PRECISION", "bf16"),
            devices: parse(&get, "FT_DEVICES", 1)?,
            micro_batch_size: parse(&get, "FT_MICRO_BATCH", 1)?,
            global_batch_size: parse(&get, "FT_GLOBAL_BATCH", 128)?,
            tensor_parallel: parse(&get, "FT_TP_SIZE", 1)?,
            pipeline_parallel: parse(&get, "FT_PP_SIZE", 1)?,
            max_steps: parse(&get, "FT_MAX_STEPS", 50)?,
            peft_scheme: "lora".to_string(),
            exp_name: or("FT_EXP_NAME", "law_lora"),
            tokens_to_generate: parse(&get, "FT_TOKENS_TO_GENERATE", 32)?,
        };

        // Tiny sanity checks (fail fast, fail loud)
        if !dataset_url.starts_with("http://") && !dataset_url.starts_with("https://") {
            bail!("FT_DATASET_URL must start with http:// or https://");
        }
        if workers == 0 {
            bail!("FT_WORKERS must be at least 1");
        }
        if !val_fraction.is_finite() || !(0.0..=1.0).contains(&val_fraction) {
            bail!("FT_VAL_FRACTION must be within [0, 1], got {val_fraction}");
        }
        if curation.min_words > curation.max_words {
            bail!(
                "FT_MIN_WORDS ({}) must not exceed FT_MAX_WORDS ({})",
                curation.min_words,
                curation.max_words
            );
        }
        if training.devices == 0 || training.micro_batch_size == 0 || training.max_steps == 0 {
            bail!("FT_DEVICES, FT_MICRO_BATCH and FT_MAX_STEPS must be positive");
        }
        let Some(per_step) = training.micro_batch_size.checked_mul(training.devices) else {
            bail!("FT_MICRO_BATCH x FT_DEVICES overflows");
        };
        if training.global_batch_size % per_step != 0 {
            bail!(
                "FT_GLOBAL_BATCH ({}) must be a multiple of FT_MICRO_BATCH x FT_DEVICES ({per_step})",
                training.global_batch_size
            );
        }
        if model_id.trim().is_empty() {
            bail!("FT_MODEL_ID must not be empty");
        }

        Ok(Self {
            work_dir,
            dataset_url,
            submission_path,
            hf_token,
            model_id,
            device,
            workers,
            val_fraction,
            split_seed,
            curation,
            prompt,
            tools,
            training,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.work_dir.join("data")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir().join("raw")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.work_dir.join("models")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.models_dir().join(modelops::checkpoint_dir_name(&self.model_id))
    }

    pub fn converted_path(&self) -> PathBuf {
        self.models_dir()
            .join(format!("{}.nemo", modelops::checkpoint_dir_name(&self.model_id)))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.work_dir.join("results")
    }

    pub fn adapter_path(&self) -> PathBuf {
        let name = &self.training.exp_name;
        self.results_dir().join(name).join("checkpoints").join(format!("{name}.nemo"))
    }

    pub fn predictions_prefix(&self) -> PathBuf {
        self.results_dir().join("predictions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.work_dir.join("reports")
    }

    pub fn raw_dataset_path(&self) -> PathBuf {
        let name = self
            .dataset_url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("source.json");
        self.raw_dir().join(name)
    }
}

fn parse<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.trim().parse().with_context(|| format!("Invalid value for {key}: {v:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.curation.min_words, 50);
        assert_eq!(c.curation.max_words, 500);
        assert_eq!(c.curation.score_threshold, 0);
        assert_eq!(c.val_fraction, 0.1);
        assert_eq!(c.device, Device::Gpu);
        assert!(c.hf_token.is_none());
        assert_eq!(
            c.raw_dataset_path(),
            PathBuf::from("./workspace/data/raw/law-stackexchange-questions-answers.json")
        );
        assert!(c.submission_path.ends_with(SUBMISSION_SOURCE_FILE));
    }

    #[test]
    fn test_overrides_and_paths() {
        let c = cfg(&[
            ("FT_WORK_DIR", "/w"),
            ("FT_DEVICE", "CPU"),
            ("FT_MIN_WORDS", "10"),
            ("FT_EXP_NAME", "exp"),
            ("FT_MODEL_ID", "org/model"),
        ])
        .unwrap();
        assert_eq!(c.device, Device::Cpu);
        assert_eq!(c.curation.min_words, 10);
        assert_eq!(c.checkpoint_dir(), PathBuf::from("/w/models/org__model"));
        assert_eq!(c.converted_path(), PathBuf::from("/w/models/org__model.nemo"));
        assert_eq!(c.adapter_path(), PathBuf::from("/w/results/exp/checkpoints/exp.nemo"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(cfg(&[("FT_VAL_FRACTION", "1.2")]).is_err());
        assert!(cfg(&[("FT_MIN_WORDS", "600")]).is_err());
        assert!(cfg(&[("FT_DEVICE", "tpu")]).is_err());
        assert!(cfg(&[("FT_WORKERS", "0")]).is_err());
        assert!(cfg(&[("FT_WORKERS", "many")]).is_err());
        assert!(cfg(&[("FT_DATASET_URL", "ftp://x")]).is_err());
        assert!(cfg(&[("FT_GLOBAL_BATCH", "3"), ("FT_MICRO_BATCH", "2")]).is_err());
    }

    #[test]
    fn test_batch_product_overflow_is_a_config_error() {
        let err = cfg(&[("FT_MICRO_BATCH", "4294967295"), ("FT_DEVICES", "2")]).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let c = cfg(&[("HF_TOKEN", "hf_secret")]).unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hf_secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
