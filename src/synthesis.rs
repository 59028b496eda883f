//! The synthesis procedure behind the web form.
//!
//! [`Synthesizer::synthesize`] never fails: every problem ends up in the
//! returned [`SynthesisOutcome`] as a localized status line, together with
//! the step-by-step log shown next to the player.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::audio::{self, AmplitudeStats};
use crate::engines::voxcpm::{VoxCpmEngine, VoxCpmError, VoxCpmInferenceParams, SAMPLE_RATE};
use crate::i18n::{self, Lang};
use crate::voices::VoiceLibrary;

pub const OUTPUT_PREFIX: &str = "output_audio_";

/// Generated files kept by the cleanup that runs before each synthesis.
pub const DEFAULT_KEEP_OUTPUTS: usize = 10;

/// Silence detection threshold used when shortening pauses.
pub const SILENCE_TOP_DB: f32 = 30.0;

/// Removed silence shorter than this is not worth a log line.
const REPORTED_SILENCE_SECS: f64 = 0.5;

pub const TIMESTEPS_RANGE: RangeInclusive<usize> = 5..=100;
pub const CFG_RANGE: RangeInclusive<f32> = 1.0..=5.0;
pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const PITCH_RANGE: RangeInclusive<f32> = -12.0..=12.0;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("{name} must be within {min}..={max}, got {value}")]
pub struct RangeError {
    pub name: &'static str,
    pub value: String,
    pub min: String,
    pub max: String,
}

fn check_range<T>(name: &'static str, value: T, range: &RangeInclusive<T>) -> Result<(), RangeError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(RangeError {
            name,
            value: value.to_string(),
            min: range.start().to_string(),
            max: range.end().to_string(),
        })
    }
}

/// Everything the synthesis form submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisRequest {
    pub text: String,
    /// Preset from the voice library.
    pub voice: Option<String>,
    /// Uploaded reference recording; takes precedence over `voice`.
    pub ref_audio: Option<PathBuf>,
    pub ref_text: Option<String>,
    pub use_lora: bool,
    pub timesteps: usize,
    pub cfg: f32,
    pub speed: f32,
    /// Semitones.
    pub pitch: f32,
    pub remove_silence: bool,
    pub lang: Lang,
}

impl Default for SynthesisRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: None,
            ref_audio: None,
            ref_text: None,
            use_lora: true,
            timesteps: 10,
            cfg: 2.0,
            speed: 1.0,
            pitch: 0.0,
            remove_silence: true,
            lang: Lang::default(),
        }
    }
}

impl SynthesisRequest {
    pub fn validate(&self) -> Result<(), RangeError> {
        check_range("timesteps", self.timesteps, &TIMESTEPS_RANGE)?;
        check_range("cfg", self.cfg, &CFG_RANGE)?;
        check_range("speed", self.speed, &SPEED_RANGE)?;
        check_range("pitch", self.pitch, &PITCH_RANGE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisOutcome {
    /// The written WAV file, `None` on failure.
    pub path: Option<PathBuf>,
    pub status: String,
    pub log: Vec<String>,
    pub duration_secs: Option<f64>,
    pub sample_rate: Option<u32>,
}

impl SynthesisOutcome {
    fn failed(status: String, log: Vec<String>) -> Self {
        Self {
            status,
            log,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }

    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }
}

fn head(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Whether `name` is a bare `output_audio_*.wav` file name.
pub fn is_output_name(name: &str) -> bool {
    name.starts_with(OUTPUT_PREFIX)
        && name.ends_with(".wav")
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// Delete the oldest `output_audio_*.wav` files in `dir`, keeping `keep`.
///
/// Returns how many files were removed.
pub fn cleanup_outputs(dir: &Path, keep: usize) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to scan {} for old outputs: {e}", dir.display());
            return 0;
        }
    };
    let mut outputs: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|entry| is_output_name(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    if outputs.len() <= keep {
        return 0;
    }

    outputs.sort();
    let stale = outputs.len() - keep;
    let mut removed = 0;
    for (_, path) in outputs.into_iter().take(stale) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed old output {}", path.display());
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
        }
    }
    removed
}

/// Runs synthesis requests against one engine and one voice library.
pub struct Synthesizer {
    engine: VoxCpmEngine,
    voices: VoiceLibrary,
    output_dir: PathBuf,
    keep_outputs: usize,
}

impl Synthesizer {
    pub fn new(engine: VoxCpmEngine, voices: VoiceLibrary, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            voices,
            output_dir: output_dir.into(),
            keep_outputs: DEFAULT_KEEP_OUTPUTS,
        }
    }

    pub fn with_keep_outputs(mut self, keep: usize) -> Self {
        self.keep_outputs = keep;
        self
    }

    pub fn voices(&self) -> &VoiceLibrary {
        &self.voices
    }

    pub fn engine(&self) -> &VoxCpmEngine {
        &self.engine
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn synthesize(&mut self, request: &SynthesisRequest) -> SynthesisOutcome {
        let lang = request.lang;
        if request.text.trim().is_empty() {
            return SynthesisOutcome::failed(i18n::t(lang, "error_no_text").to_string(), Vec::new());
        }

        let voice = request.voice.as_deref().unwrap_or("-");
        let mut log = vec![
            i18n::tf(lang, "log_request", &[("text", &head(&request.text, 50))]),
            i18n::tf(
                lang,
                "log_config",
                &[
                    ("voice", &voice),
                    ("lora", &request.use_lora),
                    ("steps", &request.timesteps),
                ],
            ),
        ];
        log::info!(
            "Synthesis request: {:?}... voice: {voice}, LoRA: {}, steps: {}",
            head(&request.text, 30),
            request.use_lora,
            request.timesteps
        );

        if let Err(e) = request.validate() {
            log.push(i18n::tf(lang, "log_error", &[("error", &e)]));
            return SynthesisOutcome::failed(
                i18n::tf(lang, "error_synthesis_failed", &[("error", &e)]),
                log,
            );
        }

        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            log.push(i18n::tf(lang, "log_error", &[("error", &e)]));
            return SynthesisOutcome::failed(
                i18n::tf(lang, "error_synthesis_failed", &[("error", &e)]),
                log,
            );
        }
        cleanup_outputs(&self.output_dir, self.keep_outputs);

        match self.run(request, &mut log) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Synthesis failed: {e}");
                log.push(i18n::tf(lang, "log_error", &[("error", &e)]));
                SynthesisOutcome::failed(
                    i18n::tf(lang, "error_synthesis_failed", &[("error", &e)]),
                    log,
                )
            }
        }
    }

    fn select_prompt(
        &self,
        request: &SynthesisRequest,
        log: &mut Vec<String>,
    ) -> (Option<PathBuf>, Option<String>) {
        let lang = request.lang;
        let non_blank = |text: Option<&str>| {
            text.map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };

        if let Some(upload) = &request.ref_audio {
            let text = non_blank(request.ref_text.as_deref());
            match &text {
                Some(text) => {
                    log.push(i18n::t(lang, "log_source_upload").to_string());
                    log.push(i18n::tf(lang, "log_ref_text", &[("text", &head(text, 30))]));
                }
                None => log.push(i18n::t(lang, "log_upload_no_text").to_string()),
            }
            return (Some(upload.clone()), text);
        }

        let Some(voice) = request.voice.as_deref().filter(|v| !v.trim().is_empty()) else {
            log.push(i18n::t(lang, "log_default_voice").to_string());
            return (None, None);
        };
        match self.voices.resolve(voice) {
            Some(prompt) => {
                match &prompt.ref_text {
                    Some(text) => {
                        log.push(i18n::tf(lang, "log_source_preset", &[("voice", &voice)]));
                        log.push(i18n::tf(lang, "log_ref_text", &[("text", &head(text, 30))]));
                    }
                    None => {
                        log.push(i18n::tf(lang, "log_preset_no_text", &[("voice", &voice)]))
                    }
                }
                (Some(prompt.wav_path), prompt.ref_text)
            }
            None => {
                log.push(i18n::tf(lang, "log_preset_missing", &[("voice", &voice)]));
                (None, None)
            }
        }
    }

    fn run(
        &mut self,
        request: &SynthesisRequest,
        log: &mut Vec<String>,
    ) -> Result<SynthesisOutcome, VoxCpmError> {
        let lang = request.lang;

        if self.engine.lora_enabled() {
            self.engine.set_lora_enabled(request.use_lora)?;
        } else if request.use_lora {
            log::warn!("LoRA requested but the model was loaded without it");
        }
        let lora_active = request.use_lora && self.engine.lora_enabled();
        log.push(i18n::t(lang, if lora_active { "log_lora_on" } else { "log_lora_off" }).to_string());

        let (prompt_wav_path, prompt_text) = self.select_prompt(request, log);
        let params = VoxCpmInferenceParams {
            prompt_wav_path,
            prompt_text,
            inference_timesteps: request.timesteps,
            cfg_value: request.cfg,
            ..VoxCpmInferenceParams::default()
        };
        let sample_rate = self.engine.sample_rate().unwrap_or(SAMPLE_RATE);

        log.push(i18n::t(lang, "log_generating").to_string());
        let started = Instant::now();
        let mut chunks: Vec<Vec<f32>> = Vec::new();
        let generated = self.engine.generate_each(&request.text, &params, |chunk| {
            let index = chunks.len() + 1;
            let secs = chunk.len() as f64 / sample_rate as f64;
            log::debug!("Chunk {index}: {} samples ({secs:.2}s)", chunk.len());
            log.push(i18n::tf(
                lang,
                "log_chunk",
                &[
                    ("index", &index),
                    ("samples", &chunk.len()),
                    ("duration", &format!("{secs:.2}")),
                ],
            ));
            chunks.push(chunk);
            Ok(())
        });
        if let Err(e) = generated {
            // keep whatever arrived before the failure
            log::error!("Generation stopped after {} chunk(s): {e}", chunks.len());
            log.push(i18n::tf(lang, "log_error", &[("error", &e)]));
        }

        let elapsed = started.elapsed().as_secs_f64();
        log.push(i18n::tf(lang, "log_total_chunks", &[("count", &chunks.len())]));
        log.push(i18n::tf(lang, "log_elapsed", &[("secs", &format!("{elapsed:.1}"))]));
        log::info!("Generated {} chunk(s) in {elapsed:.1}s", chunks.len());

        if chunks.is_empty() {
            return Ok(SynthesisOutcome::failed(
                i18n::t(lang, "error_no_audio_generated").to_string(),
                std::mem::take(log),
            ));
        }
        let mut wav: Vec<f32> = chunks.concat();
        if wav.is_empty() {
            log.push(i18n::t(lang, "log_error_zero").to_string());
            return Ok(SynthesisOutcome::failed(
                i18n::t(lang, "error_zero_length").to_string(),
                std::mem::take(log),
            ));
        }
        if AmplitudeStats::of(&wav).is_silent() {
            log.push(i18n::t(lang, "log_error_silent").to_string());
            return Ok(SynthesisOutcome::failed(
                i18n::t(lang, "error_silent_audio").to_string(),
                std::mem::take(log),
            ));
        }

        if request.remove_silence {
            let before = wav.len();
            wav = audio::remove_long_silences(&wav, sample_rate, SILENCE_TOP_DB);
            let removed = before.saturating_sub(wav.len()) as f64 / sample_rate as f64;
            if removed > REPORTED_SILENCE_SECS {
                log::info!("Removed {removed:.2}s of silence");
                log.push(i18n::tf(
                    lang,
                    "log_silence_removed",
                    &[("secs", &format!("{removed:.2}"))],
                ));
            }
        } else {
            log.push(i18n::t(lang, "log_silence_disabled").to_string());
        }

        log.push(i18n::tf(
            lang,
            "log_speech_control",
            &[("speed", &request.speed), ("pitch", &request.pitch)],
        ));
        if request.speed != 1.0 || request.pitch != 0.0 {
            wav = audio::apply_speech_control(&wav, request.speed, request.pitch)?;
        }

        let stats = AmplitudeStats::of(&wav);
        log.push(i18n::tf(
            lang,
            "log_amplitude",
            &[
                ("peak", &format!("{:.6}", stats.peak)),
                ("mean", &format!("{:.6}", stats.mean_abs)),
            ],
        ));
        if let Some(factor) = audio::boost_quiet(&mut wav) {
            log::warn!("Quiet output (mean {:.6}), amplified x{factor}", stats.mean_abs);
            log.push(i18n::tf(lang, "log_boost", &[("factor", &factor)]));
        }

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let file_name = format!("{OUTPUT_PREFIX}{millis}.wav");
        let path = self.output_dir.join(&file_name);
        let written = audio::write_wav_i16(&path, &wav, sample_rate)
            .map_err(|e| e.to_string())
            .and_then(|()| match std::fs::metadata(&path) {
                Ok(meta) if meta.len() > 0 => Ok(()),
                Ok(_) => Err("empty file".to_string()),
                Err(e) => Err(e.to_string()),
            });
        if let Err(e) = written {
            log::error!("Failed to write {}: {e}", path.display());
            log.push(i18n::t(lang, "log_error_write").to_string());
            return Ok(SynthesisOutcome::failed(
                i18n::t(lang, "error_write_failed").to_string(),
                std::mem::take(log),
            ));
        }

        let duration = wav.len() as f64 / sample_rate as f64;
        let duration_text = format!("{duration:.2}");
        log.push(i18n::t(lang, "log_done").to_string());
        log.push(i18n::tf(lang, "log_file", &[("file", &file_name)]));
        log.push(i18n::tf(lang, "log_duration", &[("secs", &duration_text)]));
        log.push(i18n::tf(lang, "log_sample_rate", &[("sample_rate", &sample_rate)]));
        log::info!("Wrote {} ({} samples)", path.display(), wav.len());

        Ok(SynthesisOutcome {
            path: Some(path),
            status: i18n::tf(
                lang,
                "success_synthesis",
                &[("duration", &duration_text), ("sample_rate", &sample_rate)],
            ),
            log: std::mem::take(log),
            duration_secs: Some(duration),
            sample_rate: Some(sample_rate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_tone, FakeLog, FakeModel};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        synth: Synthesizer,
        log: Arc<Mutex<FakeLog>>,
    }

    fn fixture_with(configure: impl FnOnce(&mut FakeModel)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (mut model, log) = FakeModel::new();
        configure(&mut model);
        let voices = VoiceLibrary::open(dir.path().join("voices")).unwrap();
        let synth = Synthesizer::new(
            VoxCpmEngine::with_model(Box::new(model)),
            voices,
            dir.path().join("out"),
        );
        Fixture { dir, synth, log }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            ..SynthesisRequest::default()
        }
    }

    fn add_voice(fx: &Fixture, name: &str, ref_text: &str) {
        let dir = fx.synth.voices().root().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        write_tone(&dir, "ref.wav", 1.0);
        let meta = serde_json::json!({ "name": name, "ref_text": ref_text });
        std::fs::write(dir.join("meta.json"), meta.to_string()).unwrap();
    }

    #[test]
    fn only_bare_output_names_match() {
        assert!(is_output_name("output_audio_1700000000000.wav"));
        for name in [
            "ref.wav",
            "output_audio_1.mp3",
            "output_audio_../lora/x.wav",
            "output_audio_..\\x.wav",
            "lora_config.json",
        ] {
            assert!(!is_output_name(name), "{name}");
        }
    }

    #[test]
    fn empty_text_is_rejected() {
        let mut fx = fixture();
        let outcome = fx.synth.synthesize(&request("   "));
        assert!(!outcome.is_success());
        assert_eq!(outcome.status, i18n::t(Lang::Zh, "error_no_text"));
        assert!(fx.log.lock().unwrap().generations.is_empty());
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let mut fx = fixture();
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            timesteps: 200,
            ..request("Сәлем.")
        });
        assert!(!outcome.is_success());
        assert!(outcome.status.contains("timesteps"));
        assert!(fx.log.lock().unwrap().generations.is_empty());
    }

    #[test]
    fn writes_output_with_preset_voice() {
        let mut fx = fixture();
        add_voice(&fx, "demo", "Сәлеметсіз бе");
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            voice: Some("demo".to_string()),
            lang: Lang::Kk,
            ..request("Сәлем! Қалайсың?")
        });

        assert!(outcome.is_success(), "{}", outcome.status);
        let path = outcome.path.as_ref().unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with(OUTPUT_PREFIX));
        let wav = audio::read_wav(path).unwrap();
        assert_eq!(wav.sample_rate, 44100);
        assert_eq!(wav.samples.len(), 400);
        assert_eq!(outcome.sample_rate, Some(44100));

        let preset_line = i18n::tf(Lang::Kk, "log_source_preset", &[("voice", &"demo")]);
        assert!(outcome.log.contains(&preset_line));
        assert!(outcome.log.contains(&i18n::t(Lang::Kk, "log_done").to_string()));

        let log = fx.log.lock().unwrap();
        assert_eq!(log.prompts[0].text, "Сәлеметсіз бе");
        assert_eq!(log.lora_enabled, Some(true));
    }

    #[test]
    fn upload_without_text_clones_audio_only() {
        let mut fx = fixture();
        let upload = write_tone(fx.dir.path(), "upload.wav", 1.0);
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            ref_audio: Some(upload),
            ref_text: Some("  ".to_string()),
            voice: Some("ignored".to_string()),
            use_lora: false,
            ..request("Hello there.")
        });
        assert!(outcome.is_success());
        assert!(outcome
            .log
            .contains(&i18n::t(Lang::Zh, "log_upload_no_text").to_string()));
        assert!(outcome.log.contains(&i18n::t(Lang::Zh, "log_lora_off").to_string()));

        let log = fx.log.lock().unwrap();
        assert!(!log.prompts[0].use_prompt_text);
        assert_eq!(log.lora_enabled, Some(false));
    }

    #[test]
    fn missing_preset_falls_back_to_default_voice() {
        let mut fx = fixture();
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            voice: Some("ghost".to_string()),
            ..request("Сәлем.")
        });
        assert!(outcome.is_success());
        let missing = i18n::tf(Lang::Zh, "log_preset_missing", &[("voice", &"ghost")]);
        assert!(outcome.log.contains(&missing));
        assert!(fx.log.lock().unwrap().prompts.is_empty());
    }

    #[test]
    fn keeps_chunks_generated_before_a_failure() {
        let mut fx = fixture_with(|m| m.fail_on_call = Some(0));
        let outcome = fx.synth.synthesize(&request("Сәлем."));
        assert!(outcome.is_success());
        assert!(outcome.log.iter().any(|l| l.contains("scripted failure")));
        let wav = audio::read_wav(outcome.path.as_ref().unwrap()).unwrap();
        assert_eq!(wav.samples.len(), 100);
    }

    #[test]
    fn no_chunks_is_an_error() {
        let mut fx = fixture_with(|m| m.chunks_per_sentence = 0);
        let outcome = fx.synth.synthesize(&request("Сәлем."));
        assert_eq!(outcome.status, i18n::t(Lang::Zh, "error_no_audio_generated"));
    }

    #[test]
    fn silent_audio_is_an_error() {
        let mut fx = fixture_with(|m| m.amplitude = 0.0);
        let outcome = fx.synth.synthesize(&request("Сәлем."));
        assert_eq!(outcome.status, i18n::t(Lang::Zh, "error_silent_audio"));
        assert!(outcome
            .log
            .contains(&i18n::t(Lang::Zh, "log_error_silent").to_string()));
    }

    #[test]
    fn quiet_audio_is_boosted() {
        let mut fx = fixture_with(|m| m.amplitude = 0.0005);
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            remove_silence: false,
            ..request("Сәлем.")
        });
        assert!(outcome.is_success());
        let boost = i18n::tf(Lang::Zh, "log_boost", &[("factor", &50.0f32)]);
        assert!(outcome.log.contains(&boost));
        let wav = audio::read_wav(outcome.path.as_ref().unwrap()).unwrap();
        let peak = AmplitudeStats::of(&wav.samples).peak;
        assert!((peak - 0.025).abs() < 1e-3, "peak {peak}");
    }

    #[test]
    fn speed_control_changes_length() {
        let mut fx = fixture_with(|m| m.samples_per_chunk = 22050);
        let outcome = fx.synth.synthesize(&SynthesisRequest {
            speed: 2.0,
            remove_silence: false,
            ..request("Сәлем.")
        });
        assert!(outcome.is_success());
        let duration = outcome.duration_secs.unwrap();
        assert!((duration - 0.5).abs() < 0.01, "duration {duration}");
    }

    #[test]
    fn cleanup_keeps_the_newest_outputs() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12u64 {
            let path = dir.path().join(format!("{OUTPUT_PREFIX}{i}.wav"));
            std::fs::write(&path, b"x").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(UNIX_EPOCH + Duration::from_secs(1_000 + i))
                .unwrap();
        }
        std::fs::write(dir.path().join("keep_me.wav"), b"x").unwrap();

        assert_eq!(cleanup_outputs(dir.path(), 10), 2);
        assert!(!dir.path().join(format!("{OUTPUT_PREFIX}0.wav")).exists());
        assert!(!dir.path().join(format!("{OUTPUT_PREFIX}1.wav")).exists());
        assert!(dir.path().join(format!("{OUTPUT_PREFIX}2.wav")).exists());
        assert!(dir.path().join("keep_me.wav").exists());
        assert_eq!(cleanup_outputs(dir.path(), 10), 0);
    }
}
