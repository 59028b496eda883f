//! Application configuration.
//!
//! Every field is optional in the YAML file; missing fields fall back to
//! the defaults below. Paths are relative to `project_root` unless absolute.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Rank used when `lora_config.json` is missing or unreadable.
pub const DEFAULT_LORA_RANK: u32 = 32;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub project_root: PathBuf,
    pub voices_dir: PathBuf,
    pub lora_dir: PathBuf,
    /// Where `output_audio_*.wav` files are written.
    pub output_dir: PathBuf,
    pub model_id: String,
    /// Hub cache. `None` uses `~/.cache/huggingface/hub`.
    pub cache_dir: Option<PathBuf>,
    pub local_files_only: bool,
    pub host: String,
    pub port: u16,
    /// How many generated files survive the cleanup before each synthesis.
    pub keep_outputs: usize,
    pub python: String,
    pub daemon_script: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            voices_dir: PathBuf::from("voices"),
            lora_dir: PathBuf::from("lora"),
            output_dir: PathBuf::from("outputs"),
            model_id: "openbmb/VoxCPM1.5".to_string(),
            cache_dir: None,
            local_files_only: false,
            host: "127.0.0.1".to_string(),
            port: 7860,
            keep_outputs: 10,
            python: "python3".to_string(),
            daemon_script: PathBuf::from("scripts/voxcpm_daemon.py"),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn voices_path(&self) -> PathBuf {
        self.resolve(&self.voices_dir)
    }

    pub fn lora_path(&self) -> PathBuf {
        self.resolve(&self.lora_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    pub fn daemon_script_path(&self) -> PathBuf {
        self.resolve(&self.daemon_script)
    }

    /// LoRA rank from `<lora_dir>/lora_config.json`.
    pub fn lora_rank(&self) -> u32 {
        lora_rank(&self.lora_path())
    }

    /// Model loading parameters with LoRA from `lora_dir` when it exists.
    #[cfg(feature = "voxcpm")]
    pub fn model_params(&self, with_lora: bool) -> crate::engines::voxcpm::VoxCpmModelParams {
        use crate::engines::voxcpm::{DaemonConfig, LoraConfig, VoxCpmModelParams};

        let lora_dir = self.lora_path();
        let with_lora = with_lora && lora_dir.is_dir();
        VoxCpmModelParams {
            model_id: self.model_id.clone(),
            cache_dir: self.cache_dir.clone(),
            local_files_only: self.local_files_only,
            denoiser: None,
            optimize: false,
            lora_config: with_lora.then(|| LoraConfig {
                r: lora_rank(&lora_dir),
                ..LoraConfig::default()
            }),
            lora_weights_path: with_lora.then_some(lora_dir),
            daemon: DaemonConfig {
                python: self.python.clone(),
                script: self.daemon_script_path(),
            },
        }
    }
}

#[derive(Deserialize)]
struct TrainingConfig {
    #[serde(default)]
    lora_config: Option<RankOnly>,
}

#[derive(Deserialize)]
struct RankOnly {
    r: Option<u32>,
}

/// Read `lora_config.r` from `<lora_dir>/lora_config.json`.
pub fn lora_rank(lora_dir: &Path) -> u32 {
    let path = lora_dir.join("lora_config.json");
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return DEFAULT_LORA_RANK;
    };
    match serde_json::from_str::<TrainingConfig>(&contents) {
        Ok(cfg) => {
            let rank = cfg
                .lora_config
                .and_then(|c| c.r)
                .unwrap_or(DEFAULT_LORA_RANK);
            log::info!("LoRA rank: {rank}");
            rank
        }
        Err(e) => {
            log::warn!("Failed to read {}: {e}", path.display());
            DEFAULT_LORA_RANK
        }
    }
}
