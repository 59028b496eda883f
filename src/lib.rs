//! # voxcpm-kk
//!
//! Text-to-speech front-end for VoxCPM 1.5 with a Kazakh LoRA adapter.
//!
//! ## Features
//!
//! - **VoxCPM engine**: sentence segmentation, prompt caching and voice cloning
//!   on top of an external inference daemon
//! - **Voice library**: reference-voice presets with alignment scoring
//! - **Post-processing**: silence shortening, speed and pitch control
//! - **Front-ends**: a web UI (`voxcpm-kk-web`) and a CLI (`voxcpm-kk`)
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! voxcpm-kk = { version = "2026.10", features = ["voxcpm"] }
//! ```
//!
//! ```ignore
//! use std::path::PathBuf;
//! use voxcpm_kk::{engines::voxcpm::VoxCpmEngine, SynthesisEngine};
//!
//! let mut engine = VoxCpmEngine::new();
//! engine.load_model(&PathBuf::from("models/VoxCPM1.5"))?;
//!
//! let result = engine.synthesize("Сәлем, әлем!", None)?;
//! result.write_wav(&PathBuf::from("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod engines;
pub mod i18n;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "voxcpm")]
pub mod synthesis;
pub mod text;
pub mod voices;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::Path;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (44100 for VoxCPM 1.5)
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 16-bit PCM WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        audio::write_wav_i16(path, &self.samples, self.sample_rate)?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for text-to-speech synthesis engines.
///
/// This trait defines the standard operations that all synthesis engines must support.
/// Each engine may have different parameter types for model loading and inference configuration.
pub trait SynthesisEngine {
    /// Parameters for configuring inference behavior (prompt, guidance, etc.)
    type SynthesisParams;
    /// Parameters for configuring model loading (LoRA, denoiser, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Synthesize speech from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>>;

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `SynthesisResult::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: Option<Self::SynthesisParams>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.synthesize(text, params)?.write_wav(wav_path)
    }
}
