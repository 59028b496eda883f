//! Scripted [`SpeechModel`] for unit tests.

use std::path::{Path, PathBuf};

#[cfg(feature = "voxcpm")]
pub use fake::*;

#[cfg(feature = "voxcpm")]
mod fake {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use crate::engines::voxcpm::model::{
        ChunkSink, GeneratedChunk, LoraConfig, LoraLoadReport, PromptCache, PromptRequest,
        SpeechModel, UtteranceRequest, VoxCpmError,
    };

    #[derive(Debug, Clone, PartialEq)]
    pub struct PromptCall {
        pub wav_path: PathBuf,
        pub text: String,
        pub use_prompt_text: bool,
        pub cross_language: bool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct GenerateCall {
        pub text: String,
        pub prompt_text: Option<String>,
        pub prompt_handle: Option<String>,
        pub max_len: usize,
        pub retry_badcase: bool,
        pub streaming: bool,
    }

    /// Everything the fake was asked to do.
    #[derive(Debug, Default)]
    pub struct FakeLog {
        pub prompts: Vec<PromptCall>,
        pub generations: Vec<GenerateCall>,
        pub denoised: Vec<PathBuf>,
        pub lora_loads: Vec<PathBuf>,
        pub lora_resets: usize,
        pub lora_enabled: Option<bool>,
        pub released: Vec<String>,
    }

    pub struct FakeModel {
        pub log: Arc<Mutex<FakeLog>>,
        pub lora: Option<LoraConfig>,
        pub denoiser: bool,
        pub chunks_per_sentence: usize,
        pub samples_per_chunk: usize,
        pub amplitude: f32,
        /// Index of the generation call that fails after its first chunk.
        pub fail_on_call: Option<usize>,
    }

    impl FakeModel {
        pub fn new() -> (Self, Arc<Mutex<FakeLog>>) {
            let log = Arc::new(Mutex::new(FakeLog::default()));
            let model = Self {
                log: log.clone(),
                lora: Some(LoraConfig::default()),
                denoiser: true,
                chunks_per_sentence: 2,
                samples_per_chunk: 100,
                amplitude: 0.5,
                fail_on_call: None,
            };
            (model, log)
        }
    }

    impl SpeechModel for FakeModel {
        fn lora_config(&self) -> Option<&LoraConfig> {
            self.lora.as_ref()
        }

        fn build_prompt_cache(
            &mut self,
            request: &PromptRequest<'_>,
        ) -> Result<PromptCache, VoxCpmError> {
            let mut log = self.log.lock().unwrap();
            log.prompts.push(PromptCall {
                wav_path: request.wav_path.to_path_buf(),
                text: request.text.to_string(),
                use_prompt_text: request.use_prompt_text,
                cross_language: request.cross_language,
            });
            Ok(PromptCache {
                prompt_text: request.text.to_string(),
                handle: format!("prompt-{}", log.prompts.len()),
            })
        }

        fn generate(
            &mut self,
            request: &UtteranceRequest<'_>,
            sink: &mut ChunkSink<'_>,
        ) -> Result<(), VoxCpmError> {
            let call = {
                let mut log = self.log.lock().unwrap();
                log.generations.push(GenerateCall {
                    text: request.text.to_string(),
                    prompt_text: request.prompt.map(|p| p.prompt_text.clone()),
                    prompt_handle: request.prompt.map(|p| p.handle.clone()),
                    max_len: request.max_len,
                    retry_badcase: request.retry_badcase,
                    streaming: request.streaming,
                });
                log.generations.len() - 1
            };

            for i in 0..self.chunks_per_sentence {
                if self.fail_on_call == Some(call) && i == 1 {
                    return Err(VoxCpmError::Daemon("scripted failure".to_string()));
                }
                sink(GeneratedChunk {
                    samples: vec![self.amplitude; self.samples_per_chunk],
                    feat: Some(format!("feat-{call}-{i}")),
                })?;
            }
            Ok(())
        }

        fn load_lora_weights(&mut self, path: &Path) -> Result<LoraLoadReport, VoxCpmError> {
            self.log.lock().unwrap().lora_loads.push(path.to_path_buf());
            Ok(LoraLoadReport {
                loaded: 10,
                skipped: 0,
            })
        }

        fn reset_lora_weights(&mut self) -> Result<(), VoxCpmError> {
            self.log.lock().unwrap().lora_resets += 1;
            Ok(())
        }

        fn set_lora_enabled(&mut self, enabled: bool) -> Result<(), VoxCpmError> {
            self.log.lock().unwrap().lora_enabled = Some(enabled);
            Ok(())
        }

        fn has_denoiser(&self) -> bool {
            self.denoiser
        }

        fn denoise(&mut self, input: &Path, output: &Path) -> Result<(), VoxCpmError> {
            std::fs::copy(input, output)?;
            self.log.lock().unwrap().denoised.push(output.to_path_buf());
            Ok(())
        }

        fn release_prompt_cache(&mut self, cache: &PromptCache) -> Result<(), VoxCpmError> {
            self.log.lock().unwrap().released.push(cache.handle.clone());
            Ok(())
        }
    }
}

/// Write a short mono 44.1 kHz tone and return its path.
pub fn write_tone(dir: &Path, name: &str, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let len = (secs * 44100.0) as usize;
    let samples: Vec<f32> = (0..len)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 44100.0).sin())
        .collect();
    crate::audio::write_wav_i16(&path, &samples, 44100).unwrap();
    path
}
