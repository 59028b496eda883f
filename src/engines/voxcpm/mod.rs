//! VoxCPM 1.5 text-to-speech engine.
//!
//! The engine owns the text pipeline (validation, normalization, sentence
//! segmentation, prompt caching and per-sentence budgeting). The network
//! itself, its LoRA layers, the audio codec and the ZipEnhancer denoiser run
//! in a Python daemon that the engine drives over stdin/stdout.
//!
//! # System Requirements
//!
//! - Python 3.10+ with the `voxcpm` package installed
//! - `scripts/voxcpm_daemon.py` from this repository
//!
//! # Model Directory Layout
//!
//! ```text
//! ~/.cache/huggingface/hub/models--openbmb--VoxCPM1.5/snapshots/<rev>/
//! ├── config.json
//! ├── pytorch_model.bin
//! └── audiovae.pth
//! lora/
//! ├── lora_config.json     # {"lora_config": {"r": 32, ...}}
//! └── lora_weights.ckpt
//! ```
//!
//! # Examples
//!
//! ## Voice Cloning
//!
//! ```rust,no_run
//! use voxcpm_kk::engines::voxcpm::{VoxCpmEngine, VoxCpmInferenceParamsBuilder, VoxCpmModelParams};
//! use std::path::PathBuf;
//!
//! let mut engine = VoxCpmEngine::from_pretrained(VoxCpmModelParams {
//!     lora_weights_path: Some(PathBuf::from("lora")),
//!     ..Default::default()
//! })?;
//!
//! let params = VoxCpmInferenceParamsBuilder::default()
//!     .prompt_wav_path("voices/kazakh_man_1/ref.wav")
//!     .prompt_text("Сәлеметсіз бе, бүгін ауа райы жақсы.")
//!     .build()?;
//! let samples = engine.generate("Қазақ тіліндегі сөйлеу синтезі.", &params)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod engine;
pub mod hub;
pub mod model;

pub use bridge::{DaemonConfig, DaemonModel};
pub use engine::{
    VoxCpmEngine, VoxCpmInferenceParams, VoxCpmInferenceParamsBuilder, VoxCpmModelParams,
};
pub use model::{LoraConfig, SpeechModel, VoxCpmError, SAMPLE_RATE};
