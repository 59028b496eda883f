use std::path::{Path, PathBuf};

use derive_builder::Builder;

use crate::text::{classify_prompt, segment, utterance_max_len, TextNormalizer};
use crate::{SynthesisEngine, SynthesisResult};

use super::bridge::{DaemonConfig, DaemonModel, LoadOptions};
use super::hub;
use super::model::{
    GeneratedChunk, LoraConfig, LoraLoadReport, PromptCache, PromptRequest, SpeechModel,
    UtteranceRequest, VoxCpmError, DEFAULT_DENOISER_ID, DEFAULT_MODEL_ID,
};

/// Parameters for configuring VoxCPM model loading.
#[derive(Debug, Clone)]
pub struct VoxCpmModelParams {
    /// Hub repository id or local directory, used by [`VoxCpmEngine::from_pretrained`].
    pub model_id: String,
    /// Hub cache location. `None` uses `~/.cache/huggingface/hub`.
    pub cache_dir: Option<PathBuf>,
    /// Never touch the network; fail if the snapshot is not cached.
    pub local_files_only: bool,
    /// Denoiser id or path. `None` disables prompt denoising.
    pub denoiser: Option<String>,
    /// Warm the model up right after loading.
    pub optimize: bool,
    /// LoRA layout. Defaults to [`LoraConfig::default`] when only weights are given.
    pub lora_config: Option<LoraConfig>,
    /// LoRA checkpoint (file or directory with `lora_weights.ckpt`).
    pub lora_weights_path: Option<PathBuf>,
    pub daemon: DaemonConfig,
}

impl Default for VoxCpmModelParams {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            cache_dir: None,
            local_files_only: false,
            denoiser: Some(DEFAULT_DENOISER_ID.to_string()),
            optimize: true,
            lora_config: None,
            lora_weights_path: None,
            daemon: DaemonConfig::default(),
        }
    }
}

/// Parameters for a VoxCPM synthesis request.
///
/// ```rust,no_run
/// use voxcpm_kk::engines::voxcpm::VoxCpmInferenceParamsBuilder;
///
/// let params = VoxCpmInferenceParamsBuilder::default()
///     .prompt_wav_path("voices/kazakh_man_1/ref.wav")
///     .prompt_text("Сәлеметсіз бе")
///     .inference_timesteps(20usize)
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct VoxCpmInferenceParams {
    /// Reference recording for voice cloning.
    #[builder(setter(into, strip_option))]
    pub prompt_wav_path: Option<PathBuf>,
    /// Transcript of the reference recording. Empty means audio-only cloning.
    #[builder(setter(into, strip_option))]
    pub prompt_text: Option<String>,
    /// Classifier-free guidance scale.
    pub cfg_value: f32,
    /// Diffusion steps per patch.
    pub inference_timesteps: usize,
    pub min_len: usize,
    /// Hard cap on the per-sentence token budget.
    pub max_len: usize,
    /// Spell out numbers and canonicalize punctuation first.
    pub normalize: bool,
    /// Denoise the reference recording before building the prompt.
    pub denoise: bool,
    /// Badcase retries are accepted for compatibility but every sentence is
    /// generated once; only the ratio threshold reaches the model.
    pub retry_badcase: bool,
    pub retry_badcase_max_times: usize,
    pub retry_badcase_ratio_threshold: f32,
}

impl Default for VoxCpmInferenceParams {
    fn default() -> Self {
        Self {
            prompt_wav_path: None,
            prompt_text: None,
            cfg_value: 2.0,
            inference_timesteps: 10,
            min_len: 2,
            max_len: 4096,
            normalize: false,
            denoise: false,
            retry_badcase: true,
            retry_badcase_max_times: 3,
            retry_badcase_ratio_threshold: 6.0,
        }
    }
}

/// VoxCPM text-to-speech engine.
///
/// Splits text into sentences, conditions every sentence on a voice prompt
/// and stitches the generated audio together. The network itself runs in
/// an inference daemon (see [`super::bridge`]).
///
/// ```rust,no_run
/// use voxcpm_kk::engines::voxcpm::{VoxCpmEngine, VoxCpmModelParams};
///
/// let mut engine = VoxCpmEngine::from_pretrained(VoxCpmModelParams::default())?;
/// let samples = engine.generate("Сәлем, әлем!", &Default::default())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct VoxCpmEngine {
    model: Option<Box<dyn SpeechModel>>,
    model_path: Option<PathBuf>,
    normalizer: Option<TextNormalizer>,
}

impl Default for VoxCpmEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxCpmEngine {
    /// Create an engine with no model loaded.
    pub fn new() -> Self {
        Self {
            model: None,
            model_path: None,
            normalizer: None,
        }
    }

    /// Wrap an already loaded model.
    pub fn with_model(model: Box<dyn SpeechModel>) -> Self {
        Self {
            model: Some(model),
            model_path: None,
            normalizer: None,
        }
    }

    /// Resolve `params.model_id` (local directory or hub id) and load it.
    pub fn from_pretrained(params: VoxCpmModelParams) -> Result<Self, VoxCpmError> {
        let model_dir = hub::resolve_model_dir(
            &params.model_id,
            params.cache_dir.as_deref(),
            params.local_files_only,
        )?;
        let mut engine = Self::new();
        engine.load(&model_dir, params)?;
        Ok(engine)
    }

    fn load(&mut self, model_dir: &Path, params: VoxCpmModelParams) -> Result<(), VoxCpmError> {
        if params.lora_weights_path.is_some() && params.lora_config.is_none() {
            log::info!("No LoRA config given, using the default one for the LoRA weights");
        }
        let options = LoadOptions {
            model_dir: model_dir.to_path_buf(),
            lora_config: params.lora_config,
            lora_weights: params.lora_weights_path,
            denoiser: params.denoiser,
            optimize: params.optimize,
        };
        let mut model = DaemonModel::spawn(&params.daemon, &options)?;
        if params.optimize {
            log::info!("Warming up VoxCPM");
            model.warm_up()?;
        }
        self.model = Some(Box::new(model));
        self.model_path = Some(model_dir.to_path_buf());
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Directory the current model was loaded from.
    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.model.as_ref().map(|m| m.sample_rate())
    }

    fn model_mut(&mut self) -> Result<&mut (dyn SpeechModel + 'static), VoxCpmError> {
        self.model.as_deref_mut().ok_or(VoxCpmError::ModelNotLoaded)
    }

    /// Synthesize `text` and return the audio of every sentence, concatenated.
    pub fn generate(
        &mut self,
        text: &str,
        params: &VoxCpmInferenceParams,
    ) -> Result<Vec<f32>, VoxCpmError> {
        let mut samples = Vec::new();
        self.generate_each(text, params, |chunk| {
            samples.extend_from_slice(&chunk);
            Ok(())
        })?;
        Ok(samples)
    }

    /// Like [`generate`](Self::generate), but hands every chunk to `on_chunk`
    /// so callers keep what was produced before a failure.
    pub fn generate_each<F>(
        &mut self,
        text: &str,
        params: &VoxCpmInferenceParams,
        mut on_chunk: F,
    ) -> Result<(), VoxCpmError>
    where
        F: FnMut(Vec<f32>) -> Result<(), VoxCpmError>,
    {
        self.run(text, params, false, &mut on_chunk)
    }

    /// Synthesize `text`, handing each chunk to `on_chunk` as soon as it exists.
    ///
    /// Sentences are not chained in streaming mode.
    pub fn generate_streaming<F>(
        &mut self,
        text: &str,
        params: &VoxCpmInferenceParams,
        mut on_chunk: F,
    ) -> Result<(), VoxCpmError>
    where
        F: FnMut(Vec<f32>) -> Result<(), VoxCpmError>,
    {
        self.run(text, params, true, &mut on_chunk)
    }

    fn run(
        &mut self,
        text: &str,
        params: &VoxCpmInferenceParams,
        streaming: bool,
        on_chunk: &mut dyn FnMut(Vec<f32>) -> Result<(), VoxCpmError>,
    ) -> Result<(), VoxCpmError> {
        if text.trim().is_empty() {
            return Err(VoxCpmError::InvalidInput(
                "target text must be a non-empty string".to_string(),
            ));
        }
        if let Some(wav) = params.prompt_wav_path.as_deref() {
            if !wav.exists() {
                return Err(VoxCpmError::PromptNotFound(wav.to_path_buf()));
            }
        }

        let Self {
            model, normalizer, ..
        } = self;
        let model = model.as_deref_mut().ok_or(VoxCpmError::ModelNotLoaded)?;

        let fixed_prompt = match params.prompt_wav_path.as_deref() {
            Some(wav) => Some(build_fixed_prompt(
                model,
                wav,
                params.prompt_text.as_deref().unwrap_or(""),
                text,
                params.denoise,
            )?),
            None => None,
        };

        let text = if params.normalize {
            normalizer
                .get_or_insert_with(TextNormalizer::new)
                .normalize(text)
        } else {
            text.to_string()
        };
        let sentences = segment(&text);
        log::info!(
            "Generating {} sentence(s), voice prompt: {}",
            sentences.len(),
            if fixed_prompt.is_some() { "yes" } else { "no" }
        );

        let mut chained = None;
        let result = generate_sentences(
            model,
            &sentences,
            fixed_prompt.as_ref(),
            &mut chained,
            params,
            streaming,
            on_chunk,
        );
        for cache in chained.iter().chain(fixed_prompt.iter()) {
            release(model, cache);
        }
        result
    }

    /// Load LoRA weights into a model that was built with a LoRA config.
    pub fn load_lora(&mut self, path: &Path) -> Result<LoraLoadReport, VoxCpmError> {
        let model = self.model_mut()?;
        if model.lora_config().is_none() {
            return Err(VoxCpmError::LoraNotConfigured);
        }
        let report = model.load_lora_weights(path)?;
        log::info!(
            "Loaded {} LoRA parameters, skipped {}",
            report.loaded,
            report.skipped
        );
        Ok(report)
    }

    /// Reset LoRA weights to their initial state.
    pub fn unload_lora(&mut self) -> Result<(), VoxCpmError> {
        self.model_mut()?.reset_lora_weights()
    }

    /// Toggle LoRA layers without unloading their weights.
    pub fn set_lora_enabled(&mut self, enabled: bool) -> Result<(), VoxCpmError> {
        self.model_mut()?.set_lora_enabled(enabled)
    }

    /// Whether the model was built with LoRA.
    pub fn lora_enabled(&self) -> bool {
        self.model
            .as_ref()
            .is_some_and(|m| m.lora_config().is_some())
    }
}

fn build_fixed_prompt(
    model: &mut dyn SpeechModel,
    wav: &Path,
    prompt_text: &str,
    target_text: &str,
    denoise: bool,
) -> Result<PromptCache, VoxCpmError> {
    // the directory and the denoised file go away when `scratch` drops
    let scratch = if denoise && model.has_denoiser() {
        let dir = tempfile::tempdir()?;
        let denoised = dir.path().join("prompt.wav");
        model.denoise(wav, &denoised)?;
        Some((dir, denoised))
    } else {
        None
    };
    let wav = scratch.as_ref().map_or(wav, |(_, path)| path.as_path());

    let prompt_text = prompt_text.trim();
    if prompt_text.is_empty() {
        log::info!("Empty prompt text, cloning from audio features only");
        return model.build_prompt_cache(&PromptRequest {
            wav_path: wav,
            text: "",
            use_prompt_text: false,
            cross_language: false,
        });
    }

    let prompt_script = classify_prompt(prompt_text);
    let target_script = classify_prompt(target_text);
    let cross_language = prompt_script != target_script;
    if cross_language {
        log::info!(
            "Cross-language voice clone (prompt: {prompt_script}, target: {target_script})"
        );
    } else {
        log::info!("Same-language voice clone ({prompt_script})");
    }

    model.build_prompt_cache(&PromptRequest {
        wav_path: wav,
        text: prompt_text,
        use_prompt_text: true,
        cross_language,
    })
}

fn generate_sentences(
    model: &mut dyn SpeechModel,
    sentences: &[String],
    fixed_prompt: Option<&PromptCache>,
    chained: &mut Option<PromptCache>,
    params: &VoxCpmInferenceParams,
    streaming: bool,
    on_chunk: &mut dyn FnMut(Vec<f32>) -> Result<(), VoxCpmError>,
) -> Result<(), VoxCpmError> {
    for (i, sentence) in sentences.iter().enumerate() {
        let prompt = fixed_prompt.or(chained.as_ref());
        let max_len = utterance_max_len(sentence, prompt.is_some()).min(params.max_len);
        log::debug!(
            "[{}/{}] chars={}, max_len={}, prompt={}",
            i + 1,
            sentences.len(),
            sentence.chars().count(),
            max_len,
            prompt.map_or(0, |p| p.prompt_text.chars().count())
        );

        let request = UtteranceRequest {
            text: sentence,
            prompt,
            min_len: params.min_len,
            max_len,
            inference_timesteps: params.inference_timesteps,
            cfg_value: params.cfg_value,
            retry_badcase: false,
            retry_badcase_max_times: 1,
            retry_badcase_ratio_threshold: params.retry_badcase_ratio_threshold,
            streaming,
        };

        let mut last_feat = None;
        model.generate(&request, &mut |chunk: GeneratedChunk| {
            last_feat = chunk.feat;
            on_chunk(chunk.samples)
        })?;

        // an external prompt is never replaced
        if fixed_prompt.is_none() && !streaming {
            if let Some(handle) = last_feat {
                let next = PromptCache {
                    prompt_text: sentence.clone(),
                    handle,
                };
                if let Some(previous) = chained.replace(next) {
                    release(model, &previous);
                }
            }
        }
    }
    Ok(())
}

fn release(model: &mut dyn SpeechModel, cache: &PromptCache) {
    if let Err(e) = model.release_prompt_cache(cache) {
        log::warn!("Failed to release prompt cache {}: {e}", cache.handle);
    }
}

impl Drop for VoxCpmEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for VoxCpmEngine {
    type SynthesisParams = VoxCpmInferenceParams;
    type ModelParams = VoxCpmModelParams;

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let model_dir = hub::resolve_model_dir(
            &model_path.to_string_lossy(),
            params.cache_dir.as_deref(),
            params.local_files_only,
        )?;
        self.load(&model_dir, params)?;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model = None;
        self.model_path = None;
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        let sample_rate = self.sample_rate().ok_or(VoxCpmError::ModelNotLoaded)?;
        let samples = self.generate(text, &params.unwrap_or_default())?;
        Ok(SynthesisResult {
            samples,
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_tone, FakeModel};

    fn engine() -> (VoxCpmEngine, std::sync::Arc<std::sync::Mutex<crate::test_support::FakeLog>>) {
        let (model, log) = FakeModel::new();
        (VoxCpmEngine::with_model(Box::new(model)), log)
    }

    #[test]
    fn rejects_blank_text() {
        let (mut engine, _) = engine();
        let err = engine.generate("  \n ", &Default::default()).unwrap_err();
        assert!(matches!(err, VoxCpmError::InvalidInput(_)));
    }

    #[test]
    fn missing_prompt_file() {
        let (mut engine, _) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .prompt_wav_path("/nonexistent/ref.wav")
            .build()
            .unwrap();
        let err = engine.generate("Сәлем", &params).unwrap_err();
        assert!(matches!(err, VoxCpmError::PromptNotFound(_)));
    }

    #[test]
    fn needs_a_model() {
        let mut engine = VoxCpmEngine::new();
        let err = engine.generate("hello", &Default::default()).unwrap_err();
        assert!(matches!(err, VoxCpmError::ModelNotLoaded));
        assert!(!engine.lora_enabled());
    }

    #[test]
    fn chains_previous_sentence_without_prompt() {
        let (mut engine, log) = engine();
        let samples = engine
            .generate("Сәлем! Қалайсың? Жақсы.", &Default::default())
            .unwrap();
        assert_eq!(samples.len(), 600);

        let log = log.lock().unwrap();
        let calls = &log.generations;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].prompt_text, None);
        assert_eq!(calls[0].max_len, 6 * 3 + 25);
        assert_eq!(calls[1].prompt_text.as_deref(), Some("Сәлем!"));
        assert_eq!(calls[1].prompt_handle.as_deref(), Some("feat-0-1"));
        assert_eq!(calls[1].max_len, 9 * 4 + 25);
        assert_eq!(calls[2].prompt_text.as_deref(), Some("Қалайсың?"));
        assert!(calls.iter().all(|c| !c.retry_badcase && !c.streaming));
        assert_eq!(log.released, vec!["feat-0-1", "feat-1-1", "feat-2-1"]);
    }

    #[test]
    fn streaming_never_chains() {
        let (mut engine, log) = engine();
        let mut chunks = 0;
        engine
            .generate_streaming("Сәлем! Қалайсың?", &Default::default(), |chunk| {
                assert_eq!(chunk.len(), 100);
                chunks += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(chunks, 4);
        let log = log.lock().unwrap();
        assert!(log
            .generations
            .iter()
            .all(|c| c.prompt_text.is_none() && c.streaming));
    }

    #[test]
    fn external_prompt_is_kept_for_every_sentence() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_tone(dir.path(), "ref.wav", 0.5);
        let (mut engine, log) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .prompt_wav_path(wav.clone())
            .prompt_text("  Hello world  ")
            .build()
            .unwrap();
        engine.generate("Сәлем! Қалайсың?", &params).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.prompts.len(), 1);
        assert_eq!(log.prompts[0].text, "Hello world");
        assert!(log.prompts[0].use_prompt_text);
        assert!(log.prompts[0].cross_language);
        assert!(log.denoised.is_empty());
        assert!(log
            .generations
            .iter()
            .all(|c| c.prompt_handle.as_deref() == Some("prompt-1")));
        assert_eq!(log.released, vec!["prompt-1"]);
    }

    #[test]
    fn same_script_prompt_is_not_cross_language() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_tone(dir.path(), "ref.wav", 0.5);
        let (mut engine, log) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .prompt_wav_path(wav)
            .prompt_text("Сәлеметсіз бе")
            .build()
            .unwrap();
        engine.generate("Қайырлы таң.", &params).unwrap();
        assert!(!log.lock().unwrap().prompts[0].cross_language);
    }

    #[test]
    fn empty_prompt_text_is_audio_only() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_tone(dir.path(), "ref.wav", 0.5);
        let (mut engine, log) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .prompt_wav_path(wav)
            .build()
            .unwrap();
        engine.generate("Сәлем!", &params).unwrap();

        let log = log.lock().unwrap();
        assert!(!log.prompts[0].use_prompt_text);
        assert!(!log.prompts[0].cross_language);
        assert_eq!(log.prompts[0].text, "");
    }

    #[test]
    fn denoised_prompt_is_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_tone(dir.path(), "ref.wav", 0.5);
        let (mut engine, log) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .prompt_wav_path(wav)
            .prompt_text("Сәлем")
            .denoise(true)
            .build()
            .unwrap();
        engine.generate("Сәлем!", &params).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.denoised.len(), 1);
        assert_eq!(log.prompts[0].wav_path, log.denoised[0]);
        assert!(!log.denoised[0].exists());
    }

    #[test]
    fn normalizes_when_asked() {
        let (mut engine, log) = engine();
        let params = VoxCpmInferenceParamsBuilder::default()
            .normalize(true)
            .build()
            .unwrap();
        engine.generate("Мен 25 жастамын.", &params).unwrap();
        assert_eq!(
            log.lock().unwrap().generations[0].text,
            "Мен жиырма бес жастамын."
        );
    }

    #[test]
    fn partial_chunks_survive_a_failure() {
        let (mut model, _) = FakeModel::new();
        model.fail_on_call = Some(1);
        let mut engine = VoxCpmEngine::with_model(Box::new(model));
        let mut collected = 0;
        let err = engine
            .generate_each("Бір. Екі. Үш.", &Default::default(), |chunk| {
                collected += chunk.len();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, VoxCpmError::Daemon(_)));
        assert_eq!(collected, 300);
    }

    #[test]
    fn lora_controls() {
        let (mut engine, log) = engine();
        assert!(engine.lora_enabled());
        let report = engine.load_lora(Path::new("lora")).unwrap();
        assert_eq!(report.loaded, 10);
        engine.set_lora_enabled(false).unwrap();
        engine.unload_lora().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.lora_loads, vec![PathBuf::from("lora")]);
        assert_eq!(log.lora_enabled, Some(false));
        assert_eq!(log.lora_resets, 1);
    }

    #[test]
    fn lora_requires_config() {
        let (mut model, _) = FakeModel::new();
        model.lora = None;
        let mut engine = VoxCpmEngine::with_model(Box::new(model));
        assert!(!engine.lora_enabled());
        let err = engine.load_lora(Path::new("lora")).unwrap_err();
        assert!(matches!(err, VoxCpmError::LoraNotConfigured));
    }

    #[test]
    fn synthesize_reports_sample_rate() {
        let (mut engine, _) = engine();
        let result = engine.synthesize("Hello there.", None).unwrap();
        assert_eq!(result.sample_rate, 44100);
        assert_eq!(result.samples.len(), 200);
    }
}
