//! Voice presets on disk.
//!
//! Each voice is a directory `voices/<name>/` holding the reference
//! recording `ref.wav` and `meta.json` with its transcript:
//!
//! ```json
//! {
//!   "name": "kazakh_man_1",
//!   "ref_text": "Сәлеметсіз бе, бүгін ауа райы жақсы."
//! }
//! ```
//!
//! Keys other than `name` and `ref_text` are bookkeeping written by the
//! editing operations and are preserved across updates.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::{self, AudioError};
use crate::i18n::{self, Lang};

pub const VOICE_WAV: &str = "ref.wav";
pub const VOICE_META: &str = "meta.json";
const BACKUP_WAV: &str = "ref.wav.backup";

/// Voice selected after a deletion when it still exists.
pub const DEFAULT_VOICE: &str = "kazakh_man_1";

/// Words a reference recording is expected to hold per second.
pub const WORDS_PER_SECOND: f64 = 2.5;

/// Target length of a repaired reference recording.
pub const REPAIR_TARGET_SECS: f32 = 5.0;

/// Sample rate of a repaired reference recording.
pub const REPAIR_SAMPLE_RATE: u32 = 44100;

#[derive(thiserror::Error, Debug)]
pub enum VoiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("No voice name given")]
    MissingName,
    #[error("No voice selected")]
    NoSelection,
    #[error("Invalid voice name '{0}': use letters, digits, '_' and '-'")]
    InvalidName(String),
    #[error("No reference audio given")]
    MissingAudio,
    #[error("No replacement audio given")]
    MissingNewAudio,
    #[error("No reference text given")]
    MissingText,
    #[error("Voice '{0}' already exists")]
    Exists(String),
    #[error("Voice '{0}' does not exist")]
    NotFound(String),
    #[error("Unreadable reference audio: {0}")]
    InvalidAudio(AudioError),
}

impl VoiceError {
    /// User-facing message. `failure_key` names the message used for
    /// unexpected I/O, metadata and audio failures.
    pub fn message(&self, lang: Lang, failure_key: &str) -> String {
        match self {
            VoiceError::MissingName => i18n::t(lang, "error_no_name").to_string(),
            VoiceError::NoSelection => i18n::t(lang, "error_select_voice").to_string(),
            VoiceError::InvalidName(_) => i18n::t(lang, "error_invalid_name").to_string(),
            VoiceError::MissingAudio => i18n::t(lang, "error_no_audio").to_string(),
            VoiceError::MissingNewAudio => i18n::t(lang, "error_no_new_audio").to_string(),
            VoiceError::MissingText => i18n::t(lang, "error_no_ref_text").to_string(),
            VoiceError::Exists(name) => i18n::voice_msg(lang, "error_voice_exists", name),
            VoiceError::NotFound(name) => i18n::voice_msg(lang, "error_voice_not_exist", name),
            VoiceError::InvalidAudio(e) => {
                i18n::tf(lang, "error_invalid_audio", &[("error", e)])
            }
            VoiceError::Io(_) | VoiceError::Json(_) | VoiceError::Audio(_) => {
                i18n::tf(lang, failure_key, &[("error", self)])
            }
        }
    }
}

/// Where new reference audio comes from.
#[derive(Debug, Clone, Copy)]
pub enum AudioSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

impl AudioSource<'_> {
    fn validate(&self) -> Result<(), VoiceError> {
        let decoded = match self {
            AudioSource::Path(path) => audio::read_wav(path),
            AudioSource::Bytes(bytes) => audio::read_wav_bytes(bytes),
        };
        decoded.map(|_| ()).map_err(VoiceError::InvalidAudio)
    }

    fn install(&self, dest: &Path) -> Result<(), VoiceError> {
        match self {
            AudioSource::Path(path) => {
                std::fs::copy(path, dest)?;
            }
            AudioSource::Bytes(bytes) => std::fs::write(dest, bytes)?,
        }
        Ok(())
    }
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ref_text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VoiceMeta {
    fn new(name: &str, ref_text: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_text: ref_text.to_string(),
            extra: Map::new(),
        }
    }
}

/// How well a transcript fits the length of its recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStatus {
    EmptyText,
    TooLong,
    TooShort,
    SlightlyLong,
    SlightlyShort,
    Aligned,
}

impl AlignmentStatus {
    /// Classify a words-per-capacity ratio.
    pub fn classify(ref_text: &str, ratio: f64) -> Self {
        if ref_text.is_empty() {
            AlignmentStatus::EmptyText
        } else if ratio > 1.3 {
            AlignmentStatus::TooLong
        } else if ratio < 0.4 {
            AlignmentStatus::TooShort
        } else if ratio > 1.1 {
            AlignmentStatus::SlightlyLong
        } else if ratio < 0.6 {
            AlignmentStatus::SlightlyShort
        } else {
            AlignmentStatus::Aligned
        }
    }

    pub fn score(self) -> u8 {
        match self {
            AlignmentStatus::EmptyText => 0,
            AlignmentStatus::TooLong => 30,
            AlignmentStatus::TooShort => 60,
            AlignmentStatus::SlightlyLong | AlignmentStatus::SlightlyShort => 80,
            AlignmentStatus::Aligned => 100,
        }
    }

    pub fn label(self, lang: Lang) -> &'static str {
        let key = match self {
            AlignmentStatus::EmptyText => "status_empty_text",
            AlignmentStatus::TooLong => "status_too_long",
            AlignmentStatus::TooShort => "status_too_short",
            AlignmentStatus::SlightlyLong => "status_slightly_long",
            AlignmentStatus::SlightlyShort => "status_slightly_short",
            AlignmentStatus::Aligned => "status_aligned",
        };
        i18n::t(lang, key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlignmentInfo {
    pub voice: String,
    pub duration: f64,
    pub channels: u16,
    pub sample_rate: u32,
    pub word_count: usize,
    /// Words the recording is long enough for.
    pub capacity: f64,
    pub ratio: f64,
    pub status: AlignmentStatus,
    pub score: u8,
    pub ref_text: String,
    pub wav_path: PathBuf,
}

/// Counts of voices per score bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub perfect: usize,
    pub good: usize,
    pub warning: usize,
    pub bad: usize,
}

impl StatusSummary {
    pub fn of(infos: &[AlignmentInfo]) -> Self {
        infos.iter().fold(Self::default(), |mut acc, info| {
            match info.score {
                100 => acc.perfect += 1,
                80..=99 => acc.good += 1,
                50..=79 => acc.warning += 1,
                _ => acc.bad += 1,
            }
            acc
        })
    }
}

/// Reference audio and transcript of a preset, ready for cloning.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePrompt {
    pub wav_path: PathBuf,
    /// `None` when the transcript is missing or blank.
    pub ref_text: Option<String>,
}

/// Changes made by [`VoiceLibrary::repair`].
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub downmixed: bool,
    pub resampled: bool,
    pub cropped: bool,
    pub old_ref_text: String,
    pub info: AlignmentInfo,
}

impl RepairReport {
    pub fn audio_modified(&self) -> bool {
        self.downmixed || self.resampled || self.cropped
    }
}

/// Markdown description of one voice.
#[derive(Debug, Clone)]
pub struct VoiceDetails {
    pub markdown: String,
    pub info: AlignmentInfo,
}

/// A voice name must be one plain path component inside the library.
/// Any script is allowed.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// The `voices/` directory.
#[derive(Debug, Clone)]
pub struct VoiceLibrary {
    root: PathBuf,
}

impl VoiceLibrary {
    /// Open the library at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VoiceError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn voice_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path of a voice's reference recording, if the voice exists.
    pub fn wav_path(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_name(name) {
            return None;
        }
        let path = self.voice_dir(name).join(VOICE_WAV);
        path.is_file().then_some(path)
    }

    /// Sorted names of every directory holding a `ref.wav`.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().join(VOICE_WAV).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_valid_name(name))
            .collect();
        names.sort();
        names
    }

    fn read_meta(&self, name: &str) -> Result<VoiceMeta, VoiceError> {
        let path = self.voice_dir(name).join(VOICE_META);
        if !path.exists() {
            return Ok(VoiceMeta::new(name, ""));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_meta(&self, name: &str, meta: &VoiceMeta) -> Result<(), VoiceError> {
        let json = serde_json::to_string_pretty(meta)?;
        std::fs::write(self.voice_dir(name).join(VOICE_META), json)?;
        Ok(())
    }

    /// Transcript from `meta.json`; unreadable metadata counts as empty.
    fn ref_text(&self, name: &str) -> String {
        match self.read_meta(name) {
            Ok(meta) => meta.ref_text,
            Err(e) => {
                log::warn!("Ignoring metadata of voice '{name}': {e}");
                String::new()
            }
        }
    }

    /// Reference audio and transcript for synthesis.
    pub fn resolve(&self, name: &str) -> Option<VoicePrompt> {
        let wav_path = self.wav_path(name)?;
        let ref_text = self.ref_text(name);
        let ref_text = (!ref_text.trim().is_empty()).then_some(ref_text);
        Some(VoicePrompt { wav_path, ref_text })
    }

    /// Score how well the transcript matches the recording's length.
    pub fn alignment(&self, name: &str) -> Result<AlignmentInfo, VoiceError> {
        let wav_path = self
            .wav_path(name)
            .ok_or_else(|| VoiceError::NotFound(name.to_string()))?;
        let wav = audio::probe_wav(&wav_path)?;
        let ref_text = self.ref_text(name);

        let duration = wav.duration_secs();
        let word_count = ref_text.split_whitespace().count();
        let capacity = duration * WORDS_PER_SECOND;
        let ratio = if capacity > 0.0 {
            word_count as f64 / capacity
        } else {
            0.0
        };
        let status = AlignmentStatus::classify(&ref_text, ratio);

        Ok(AlignmentInfo {
            voice: name.to_string(),
            duration,
            channels: wav.channels,
            sample_rate: wav.sample_rate,
            word_count,
            capacity,
            ratio,
            status,
            score: status.score(),
            ref_text,
            wav_path,
        })
    }

    /// Alignment of every voice, worst first.
    pub fn statuses(&self) -> Vec<AlignmentInfo> {
        let mut infos: Vec<AlignmentInfo> = self
            .list()
            .iter()
            .filter_map(|name| match self.alignment(name) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::warn!("Skipping voice '{name}': {e}");
                    None
                }
            })
            .collect();
        infos.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.voice.cmp(&b.voice)));
        infos
    }

    /// Markdown table of [`statuses`](Self::statuses) with a summary line.
    pub fn render_table(&self, lang: Lang) -> String {
        let infos = self.statuses();
        if infos.is_empty() {
            return i18n::t(lang, "error_no_voices").to_string();
        }
        let summary = StatusSummary::of(&infos);

        let mut table = format!("{}\n", i18n::t(lang, "table_header"));
        table.push_str("|------|------|------|------|------|------|------|\n");
        for info in &infos {
            let _ = writeln!(
                table,
                "| {} | {:.2}s | {} | {:.1} | {:.2} | {} | {} |",
                info.voice,
                info.duration,
                info.word_count,
                info.capacity,
                info.ratio,
                info.status.label(lang),
                info.score
            );
        }
        let _ = write!(
            table,
            "\n\n**{}**: ✅ {} | ⚠️ {} | ⚠️ {} | ❌ {}",
            i18n::t(lang, "stats_label"),
            summary.perfect,
            summary.good,
            summary.warning,
            summary.bad
        );
        table
    }

    /// Alignment plus the full metadata, as Markdown.
    pub fn details(&self, name: &str, lang: Lang) -> Result<VoiceDetails, VoiceError> {
        let info = self.alignment(name)?;
        let meta = match self.read_meta(name) {
            Ok(meta) => serde_json::to_string_pretty(&meta)?,
            Err(e) => format!("{e}"),
        };
        let t = |key: &'static str| i18n::t(lang, key);

        let markdown = format!(
            "### {title}: {name}\n\n\
             **{audio}**:\n\
             - {duration}: {:.2} {seconds}\n\
             - {rate}: {} Hz\n\
             - {channels}: {}\n\n\
             **{text}**:\n\
             - {words}: {}\n\
             - {capacity}: {:.1}\n\
             - {ratio}: {:.2}\n\n\
             **{status}**: {}\n\
             **{score}**: {}/100\n\n\
             **{metadata}**:\n\
             ```json\n{meta}\n```\n",
            info.duration,
            info.sample_rate,
            info.channels,
            info.word_count,
            info.capacity,
            info.ratio,
            info.status.label(lang),
            info.score,
            title = t("details_title"),
            audio = t("details_audio"),
            duration = t("details_duration"),
            seconds = t("details_seconds"),
            rate = t("details_sample_rate"),
            channels = t("details_channels"),
            text = t("details_ref_text"),
            words = t("details_word_count"),
            capacity = t("details_capacity"),
            ratio = t("details_ratio"),
            status = t("details_status"),
            score = t("score_label"),
            metadata = t("details_metadata"),
        );
        Ok(VoiceDetails { markdown, info })
    }

    fn check_new<'a>(
        name: &str,
        audio: Option<AudioSource<'a>>,
        ref_text: &str,
    ) -> Result<(String, AudioSource<'a>, String), VoiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VoiceError::MissingName);
        }
        if !is_valid_name(name) {
            return Err(VoiceError::InvalidName(name.to_string()));
        }
        let audio = audio.ok_or(VoiceError::MissingAudio)?;
        let ref_text = ref_text.trim();
        if ref_text.is_empty() {
            return Err(VoiceError::MissingText);
        }
        audio.validate()?;
        Ok((name.to_string(), audio, ref_text.to_string()))
    }

    /// Add a voice. Fails if it already exists; leaves nothing behind on error.
    pub fn create(
        &self,
        name: &str,
        audio: Option<AudioSource<'_>>,
        ref_text: &str,
    ) -> Result<AlignmentInfo, VoiceError> {
        let (name, audio, ref_text) = Self::check_new(name, audio, ref_text)?;
        let dir = self.voice_dir(&name);
        if dir.exists() {
            return Err(VoiceError::Exists(name));
        }

        let result = (|| {
            std::fs::create_dir_all(&dir)?;
            audio.install(&dir.join(VOICE_WAV))?;
            let mut meta = VoiceMeta::new(&name, &ref_text);
            meta.extra
                .insert("_created_via".to_string(), Value::from("web_interface"));
            self.write_meta(&name, &meta)?;
            self.alignment(&name)
        })();

        match result {
            Ok(info) => {
                log::info!("Created voice '{name}' (alignment score {})", info.score);
                Ok(info)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    log::warn!("Failed to clean up {}: {cleanup}", dir.display());
                }
                Err(e)
            }
        }
    }

    /// Save a preset from the synthesis form, replacing any voice of that name.
    pub fn save_preset(
        &self,
        name: &str,
        audio: Option<AudioSource<'_>>,
        ref_text: &str,
    ) -> Result<AlignmentInfo, VoiceError> {
        let (name, audio, ref_text) = Self::check_new(name, audio, ref_text)?;
        let dir = self.voice_dir(&name);
        std::fs::create_dir_all(&dir)?;
        audio.install(&dir.join(VOICE_WAV))?;
        self.write_meta(&name, &VoiceMeta::new(&name, &ref_text))?;
        log::info!("Saved voice '{name}' to {}", dir.display());
        self.alignment(&name)
    }

    fn existing_dir(&self, name: &str) -> Result<PathBuf, VoiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VoiceError::NoSelection);
        }
        let dir = self.voice_dir(name);
        if !is_valid_name(name) || !dir.is_dir() {
            return Err(VoiceError::NotFound(name.to_string()));
        }
        Ok(dir)
    }

    /// Replace the transcript, keeping the previous one as a backup.
    pub fn update_ref_text(
        &self,
        name: &str,
        ref_text: &str,
        lang: Lang,
    ) -> Result<AlignmentInfo, VoiceError> {
        let name = name.trim();
        self.existing_dir(name)?;
        let ref_text = ref_text.trim();
        if ref_text.is_empty() {
            return Err(VoiceError::MissingText);
        }

        let mut meta = self.read_meta(name)?;
        if !meta.ref_text.is_empty() {
            let old = std::mem::take(&mut meta.ref_text);
            meta.extra
                .insert("_backup_ref_text".to_string(), Value::from(old));
        }
        meta.ref_text = ref_text.to_string();
        meta.extra
            .insert("_manually_aligned".to_string(), Value::Bool(true));
        meta.extra.insert(
            "_note".to_string(),
            Value::from(i18n::t(lang, "note_manually_aligned")),
        );
        meta.extra.remove("_original_ref_text");
        self.write_meta(name, &meta)?;
        self.alignment(name)
    }

    /// Replace the recording. The previous one is kept as `ref.wav.backup`
    /// and restored if the replacement fails.
    pub fn update_audio(
        &self,
        name: &str,
        audio: Option<AudioSource<'_>>,
    ) -> Result<AlignmentInfo, VoiceError> {
        let name = name.trim();
        let dir = self.existing_dir(name)?;
        let audio = audio.ok_or(VoiceError::MissingNewAudio)?;
        audio.validate()?;

        let wav = dir.join(VOICE_WAV);
        let backup = dir.join(BACKUP_WAV);
        if wav.exists() {
            std::fs::copy(&wav, &backup)?;
        }

        match audio.install(&wav).and_then(|()| self.alignment(name)) {
            Ok(info) => Ok(info),
            Err(e) => {
                if backup.exists() {
                    if let Err(restore) = std::fs::copy(&backup, &wav) {
                        log::error!("Failed to restore {}: {restore}", wav.display());
                    }
                }
                Err(e)
            }
        }
    }

    /// Normalize the recording (mono, 44.1 kHz, centered window of
    /// `target_secs`) and set a transcript that matches it.
    pub fn repair(
        &self,
        name: &str,
        ref_text: &str,
        target_secs: f32,
        lang: Lang,
    ) -> Result<RepairReport, VoiceError> {
        let name = name.trim();
        let dir = self.existing_dir(name)?;
        let ref_text = ref_text.trim();
        if ref_text.is_empty() {
            return Err(VoiceError::MissingText);
        }

        let wav = dir.join(VOICE_WAV);
        let buffer = audio::read_wav(&wav)?;
        log::info!(
            "Repairing voice '{name}': {} channel(s), {} Hz, {:.2}s",
            buffer.channels,
            buffer.sample_rate,
            buffer.frames() as f64 / buffer.sample_rate.max(1) as f64
        );

        let downmixed = buffer.channels > 1;
        let mut samples = buffer.to_mono();
        let resampled = buffer.sample_rate != REPAIR_SAMPLE_RATE;
        if resampled {
            samples = audio::resample(&samples, buffer.sample_rate, REPAIR_SAMPLE_RATE)?;
        }
        let target = (target_secs * REPAIR_SAMPLE_RATE as f32) as usize;
        let cropped = samples.len() > target;
        if downmixed || resampled || cropped {
            let window = audio::center_crop(&samples, target);
            audio::write_wav_i16(&wav, window, REPAIR_SAMPLE_RATE)?;
        }

        let mut meta = self.read_meta(name)?;
        let old_ref_text = std::mem::take(&mut meta.ref_text);
        meta.ref_text = ref_text.to_string();
        meta.extra
            .insert("_old_ref_text".to_string(), Value::from(old_ref_text.clone()));
        meta.extra
            .insert("_manually_fixed".to_string(), Value::Bool(true));
        meta.extra.insert(
            "_note".to_string(),
            Value::from(i18n::t(lang, "note_manually_fixed")),
        );
        self.write_meta(name, &meta)?;

        Ok(RepairReport {
            downmixed,
            resampled,
            cropped,
            old_ref_text,
            info: self.alignment(name)?,
        })
    }

    /// Remove a voice and return the voice to select next.
    pub fn delete(&self, name: &str) -> Result<Option<String>, VoiceError> {
        let dir = self.existing_dir(name)?;
        std::fs::remove_dir_all(&dir)?;
        log::info!("Deleted voice '{}'", name.trim());
        Ok(self.default_voice())
    }

    /// [`DEFAULT_VOICE`] when present, else the first voice.
    pub fn default_voice(&self) -> Option<String> {
        let voices = self.list();
        if voices.iter().any(|v| v == DEFAULT_VOICE) {
            Some(DEFAULT_VOICE.to_string())
        } else {
            voices.into_iter().next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::test_support::write_tone;

    fn library() -> (tempfile::TempDir, VoiceLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let library = VoiceLibrary::open(dir.path().join("voices")).unwrap();
        (dir, library)
    }

    fn add_voice(library: &VoiceLibrary, name: &str, secs: f32, ref_text: &str) {
        let dir = library.root().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        write_tone(&dir, VOICE_WAV, secs);
        let meta = format!(r#"{{"name": "{name}", "ref_text": "{ref_text}"}}"#);
        std::fs::write(dir.join(VOICE_META), meta).unwrap();
    }

    fn read_meta(library: &VoiceLibrary, name: &str) -> Value {
        let raw = std::fs::read_to_string(library.root().join(name).join(VOICE_META)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn lists_only_directories_with_audio() {
        let (_dir, library) = library();
        add_voice(&library, "zeta", 1.0, "a");
        add_voice(&library, "alpha", 1.0, "a");
        std::fs::create_dir(library.root().join("empty")).unwrap();
        std::fs::write(library.root().join("notes.txt"), "x").unwrap();
        assert_eq!(library.list(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn alignment_thresholds() {
        let (_dir, library) = library();
        // 2 s of audio holds 5 words
        let cases = [
            ("empty", "", AlignmentStatus::EmptyText, 0),
            ("long", "a b c d e f g", AlignmentStatus::TooLong, 30),
            ("short", "a", AlignmentStatus::TooShort, 60),
            ("bit_long", "a b c d e f", AlignmentStatus::SlightlyLong, 80),
            ("bit_short", "a b", AlignmentStatus::SlightlyShort, 80),
            ("ok", "a b c d e", AlignmentStatus::Aligned, 100),
            ("edge", "a b c", AlignmentStatus::Aligned, 100),
        ];
        for (name, text, status, score) in cases {
            add_voice(&library, name, 2.0, text);
            let info = library.alignment(name).unwrap();
            assert_eq!(info.status, status, "{name}");
            assert_eq!(info.score, score, "{name}");
            assert!((info.capacity - 5.0).abs() < 1e-6);
        }
        assert_eq!(library.alignment("ok").unwrap().sample_rate, 44100);
        assert!(matches!(
            library.alignment("nobody"),
            Err(VoiceError::NotFound(_))
        ));
    }

    #[test]
    fn statuses_put_problems_first() {
        let (_dir, library) = library();
        add_voice(&library, "b_good", 2.0, "a b c d e");
        add_voice(&library, "a_good", 2.0, "a b c d e");
        add_voice(&library, "empty", 2.0, "");
        let names: Vec<_> = library.statuses().into_iter().map(|i| i.voice).collect();
        assert_eq!(names, vec!["empty", "a_good", "b_good"]);

        let summary = StatusSummary::of(&library.statuses());
        assert_eq!(
            summary,
            StatusSummary {
                perfect: 2,
                good: 0,
                warning: 0,
                bad: 1
            }
        );
    }

    #[test]
    fn renders_status_table() {
        let (_dir, library) = library();
        assert_eq!(library.render_table(Lang::Zh), "未找到音色文件");

        add_voice(&library, "demo", 2.0, "a b c d e");
        let table = library.render_table(Lang::Zh);
        assert!(table.starts_with("| 音色 | 时长 |"));
        assert!(table.contains("| demo | 2.00s | 5 | 5.0 | 1.00 | ✅ 对齐良好 | 100 |"));
        assert!(table.ends_with("**统计**: ✅ 1 | ⚠️ 0 | ⚠️ 0 | ❌ 0"));
    }

    #[test]
    fn non_latin_names_work_end_to_end() {
        let (dir, library) = library();
        add_voice(&library, "Айгүл", 2.0, "a b c d e");
        assert_eq!(library.list(), vec!["Айгүл"]);
        assert!(library.resolve("Айгүл").is_some());

        let source = write_tone(dir.path(), "upload.wav", 1.0);
        let info = library
            .create(" 男声 ", Some(AudioSource::Path(&source)), "你好")
            .unwrap();
        assert_eq!(info.voice, "男声");
        assert!(library.details("男声", Lang::Zh).is_ok());

        library.delete("Айгүл").unwrap();
        assert_eq!(library.list(), vec!["男声"]);
    }

    #[test]
    fn names_must_be_one_path_component() {
        for bad in ["", "  ", ".", "..", "a/b", "a\\b", "../evil"] {
            assert!(!is_valid_name(bad), "{bad:?}");
        }
        for good in ["demo", "kazakh_man-1", "Айгүл", "男声", "my voice"] {
            assert!(is_valid_name(good), "{good:?}");
        }
    }

    #[test]
    fn create_validates_and_records_origin() {
        let (dir, library) = library();
        let source = write_tone(dir.path(), "upload.wav", 1.0);
        let audio = Some(AudioSource::Path(&source));

        assert!(matches!(
            library.create("  ", audio, "text"),
            Err(VoiceError::MissingName)
        ));
        assert!(matches!(
            library.create("../evil", audio, "text"),
            Err(VoiceError::InvalidName(_))
        ));
        assert!(matches!(
            library.create("demo", None, "text"),
            Err(VoiceError::MissingAudio)
        ));
        assert!(matches!(
            library.create("demo", audio, " "),
            Err(VoiceError::MissingText)
        ));

        let info = library.create(" demo ", audio, " Сәлем әлем ").unwrap();
        assert_eq!(info.word_count, 2);
        let meta = read_meta(&library, "demo");
        assert_eq!(meta["ref_text"], "Сәлем әлем");
        assert_eq!(meta["_created_via"], "web_interface");

        assert!(matches!(
            library.create("demo", audio, "text"),
            Err(VoiceError::Exists(_))
        ));
    }

    #[test]
    fn create_rejects_unreadable_audio() {
        let (_dir, library) = library();
        let err = library
            .create("broken", Some(AudioSource::Bytes(b"not a wav")), "text")
            .unwrap_err();
        assert!(matches!(err, VoiceError::InvalidAudio(_)));
        assert!(!library.root().join("broken").exists());
    }

    #[test]
    fn save_preset_overwrites() {
        let (dir, library) = library();
        add_voice(&library, "demo", 1.0, "old");
        let bytes = std::fs::read(write_tone(dir.path(), "new.wav", 2.0)).unwrap();
        let info = library
            .save_preset("demo", Some(AudioSource::Bytes(&bytes)), "new text")
            .unwrap();
        assert!((info.duration - 2.0).abs() < 1e-3);
        assert_eq!(read_meta(&library, "demo")["ref_text"], "new text");
    }

    #[test]
    fn update_ref_text_keeps_backup() {
        let (_dir, library) = library();
        add_voice(&library, "demo", 2.0, "old words");
        let path = library.root().join("demo").join(VOICE_META);
        let mut meta: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        meta["_original_ref_text"] = Value::from("older");
        meta["speaker"] = Value::from("A");
        std::fs::write(&path, meta.to_string()).unwrap();

        let info = library
            .update_ref_text("demo", " a b c d e ", Lang::Kk)
            .unwrap();
        assert_eq!(info.status, AlignmentStatus::Aligned);

        let meta = read_meta(&library, "demo");
        assert_eq!(meta["ref_text"], "a b c d e");
        assert_eq!(meta["_backup_ref_text"], "old words");
        assert_eq!(meta["_manually_aligned"], true);
        assert_eq!(meta["_note"], "Анықтама мәтіні қолмен туралады");
        assert_eq!(meta["speaker"], "A");
        assert!(meta.get("_original_ref_text").is_none());

        assert!(matches!(
            library.update_ref_text("", "x", Lang::Zh),
            Err(VoiceError::NoSelection)
        ));
        assert!(matches!(
            library.update_ref_text("ghost", "x", Lang::Zh),
            Err(VoiceError::NotFound(_))
        ));
    }

    #[test]
    fn update_audio_backs_up_the_old_recording() {
        let (dir, library) = library();
        add_voice(&library, "demo", 1.0, "a b");
        let source = write_tone(dir.path(), "new.wav", 3.0);

        assert!(matches!(
            library.update_audio("demo", None),
            Err(VoiceError::MissingNewAudio)
        ));
        let info = library
            .update_audio("demo", Some(AudioSource::Path(&source)))
            .unwrap();
        assert!((info.duration - 3.0).abs() < 1e-3);

        let backup = library.root().join("demo").join(BACKUP_WAV);
        let old = audio::probe_wav(&backup).unwrap();
        assert!((old.duration_secs() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn repair_normalizes_the_recording() {
        let (_dir, library) = library();
        add_voice(&library, "demo", 1.0, "old text");
        let wav = library.root().join("demo").join(VOICE_WAV);
        let frames = 48000 * 8;
        let samples: Vec<f32> = (0..frames * 2).map(|i| ((i / 2) as f32 * 0.01).sin() * 0.2).collect();
        audio::write_buffer_i16(
            &wav,
            &AudioBuffer {
                samples,
                sample_rate: 48000,
                channels: 2,
            },
        )
        .unwrap();

        let report = library
            .repair("demo", "a b c d e f g h i j", REPAIR_TARGET_SECS, Lang::Zh)
            .unwrap();
        assert!(report.downmixed && report.resampled && report.cropped);
        assert_eq!(report.old_ref_text, "old text");
        assert_eq!(report.info.channels, 1);
        assert_eq!(report.info.sample_rate, 44100);
        assert!((report.info.duration - 5.0).abs() < 1e-3);
        assert_eq!(report.info.status, AlignmentStatus::Aligned);

        let meta = read_meta(&library, "demo");
        assert_eq!(meta["_old_ref_text"], "old text");
        assert_eq!(meta["_manually_fixed"], true);
    }

    #[test]
    fn repair_leaves_clean_audio_alone() {
        let (_dir, library) = library();
        add_voice(&library, "demo", 2.0, "x");
        let wav = library.root().join("demo").join(VOICE_WAV);
        let before = std::fs::metadata(&wav).unwrap().modified().unwrap();
        let report = library
            .repair("demo", "a b c d e", REPAIR_TARGET_SECS, Lang::Zh)
            .unwrap();
        assert!(!report.audio_modified());
        assert_eq!(std::fs::metadata(&wav).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn delete_picks_next_default() {
        let (_dir, library) = library();
        add_voice(&library, "alpha", 1.0, "a");
        add_voice(&library, "kazakh_man_1", 1.0, "a");
        add_voice(&library, "zeta", 1.0, "a");

        assert_eq!(library.delete("zeta").unwrap().as_deref(), Some("kazakh_man_1"));
        assert_eq!(library.delete("kazakh_man_1").unwrap().as_deref(), Some("alpha"));
        assert_eq!(library.delete("alpha").unwrap(), None);
        assert!(matches!(library.delete("alpha"), Err(VoiceError::NotFound(_))));
    }

    #[test]
    fn resolve_drops_blank_text() {
        let (_dir, library) = library();
        add_voice(&library, "silent", 1.0, "  ");
        add_voice(&library, "demo", 1.0, "Сәлем");
        assert_eq!(library.resolve("silent").unwrap().ref_text, None);
        assert_eq!(
            library.resolve("demo").unwrap().ref_text.as_deref(),
            Some("Сәлем")
        );
        assert!(library.resolve("ghost").is_none());
        assert!(library.resolve("../voices").is_none());
    }

    #[test]
    fn details_include_metadata() {
        let (_dir, library) = library();
        add_voice(&library, "demo", 2.0, "a b c d e");
        let details = library.details("demo", Lang::Zh).unwrap();
        assert!(details.markdown.starts_with("### 音色详情: demo"));
        assert!(details.markdown.contains("\"ref_text\": \"a b c d e\""));
        assert!(details.markdown.contains("100/100"));
    }

    #[test]
    fn error_messages_are_localized() {
        assert_eq!(
            VoiceError::Exists("demo".into()).message(Lang::Zh, "error_create_failed"),
            "[错误] 音色 'demo' 已存在，请使用其他名称"
        );
        let io = VoiceError::Io(std::io::Error::other("disk full"));
        assert!(io.message(Lang::Zh, "error_create_failed").starts_with("❌ 创建失败"));
    }
}
