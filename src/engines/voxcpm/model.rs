use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Output sample rate of VoxCPM 1.5.
pub const SAMPLE_RATE: u32 = 44100;

/// Hub repository of the base model.
pub const DEFAULT_MODEL_ID: &str = "openbmb/VoxCPM1.5";

/// ModelScope id of the ZipEnhancer denoiser.
pub const DEFAULT_DENOISER_ID: &str = "iic/speech_zipenhancer_ans_multiloss_16k_base";

/// Text used to warm the model up after loading.
pub const WARM_UP_TEXT: &str = "Hello, this is the first test sentence.";

#[derive(thiserror::Error, Debug)]
pub enum VoxCpmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Audio error: {0}")]
    Audio(#[from] crate::audio::AudioError),
    #[error("Inference daemon error: {0}")]
    Daemon(String),
    #[error("Malformed daemon message: {0}")]
    Protocol(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Prompt audio not found: {}", .0.display())]
    PromptNotFound(PathBuf),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("LoRA is not configured; load the model with a LoRA config first")]
    LoraNotConfigured,
    #[error("Model hub error: {0}")]
    Hub(String),
}

/// LoRA adapter layout, mirrored from the adapter's `lora_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub enable_lm: bool,
    pub enable_dit: bool,
    pub enable_proj: bool,
    pub r: u32,
    pub alpha: u32,
    pub dropout: f32,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            enable_lm: true,
            enable_dit: true,
            enable_proj: false,
            r: 32,
            alpha: 16,
            dropout: 0.0,
        }
    }
}

/// Conditioning features held by the daemon.
///
/// Built either from a reference recording or from the features of the
/// sentence that was generated last.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptCache {
    pub prompt_text: String,
    pub handle: String,
}

/// Input for [`SpeechModel::build_prompt_cache`].
#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub wav_path: &'a Path,
    pub text: &'a str,
    /// `false` builds an audio-only cache.
    pub use_prompt_text: bool,
    /// Prompt transcript and target text are in different scripts.
    pub cross_language: bool,
}

/// One sentence worth of generation.
#[derive(Debug, Clone)]
pub struct UtteranceRequest<'a> {
    pub text: &'a str,
    pub prompt: Option<&'a PromptCache>,
    pub min_len: usize,
    pub max_len: usize,
    pub inference_timesteps: usize,
    pub cfg_value: f32,
    pub retry_badcase: bool,
    pub retry_badcase_max_times: usize,
    pub retry_badcase_ratio_threshold: f32,
    pub streaming: bool,
}

impl<'a> UtteranceRequest<'a> {
    /// Request with the engine's defaults and retries disabled.
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            prompt: None,
            min_len: 2,
            max_len: 4096,
            inference_timesteps: 10,
            cfg_value: 2.0,
            retry_badcase: false,
            retry_badcase_max_times: 1,
            retry_badcase_ratio_threshold: 6.0,
            streaming: false,
        }
    }
}

/// A block of generated audio.
#[derive(Debug, Clone, Default)]
pub struct GeneratedChunk {
    pub samples: Vec<f32>,
    /// Handle to this sentence's features; usable as the next prompt.
    pub feat: Option<String>,
}

/// Outcome of loading LoRA weights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoraLoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Receiver for generated chunks. Returning an error aborts generation.
pub type ChunkSink<'s> = dyn FnMut(GeneratedChunk) -> Result<(), VoxCpmError> + 's;

/// The neural side of the pipeline.
///
/// Everything behind this trait (network, LoRA merging, codec, denoiser) is
/// opaque to the crate.
pub trait SpeechModel: Send {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// LoRA layout the model was built with, `None` without LoRA.
    fn lora_config(&self) -> Option<&LoraConfig>;

    fn build_prompt_cache(&mut self, request: &PromptRequest<'_>)
        -> Result<PromptCache, VoxCpmError>;

    fn generate(
        &mut self,
        request: &UtteranceRequest<'_>,
        sink: &mut ChunkSink<'_>,
    ) -> Result<(), VoxCpmError>;

    fn load_lora_weights(&mut self, path: &Path) -> Result<LoraLoadReport, VoxCpmError>;

    fn reset_lora_weights(&mut self) -> Result<(), VoxCpmError>;

    fn set_lora_enabled(&mut self, enabled: bool) -> Result<(), VoxCpmError>;

    /// Whether [`SpeechModel::denoise`] is available.
    fn has_denoiser(&self) -> bool {
        false
    }

    /// Denoise `input` into `output` (16 kHz mono WAV).
    fn denoise(&mut self, input: &Path, output: &Path) -> Result<(), VoxCpmError>;

    /// Free a cache that will not be used again.
    fn release_prompt_cache(&mut self, _cache: &PromptCache) -> Result<(), VoxCpmError> {
        Ok(())
    }

    /// Run a tiny generation to trigger lazy initialization.
    fn warm_up(&mut self) -> Result<(), VoxCpmError> {
        let request = UtteranceRequest {
            max_len: 10,
            ..UtteranceRequest::new(WARM_UP_TEXT)
        };
        self.generate(&request, &mut |_| Ok(()))
    }
}
