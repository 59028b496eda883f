//! Audio IO and post-processing.
//!
//! Everything here works on mono `f32` samples in `[-1, 1]` unless noted.

use std::io::Cursor;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Gaps longer than this (seconds) are shortened by [`remove_long_silences`].
pub const MAX_SILENCE_SECS: f32 = 0.8;
/// Length (seconds) a shortened gap is replaced with.
pub const SHORTENED_SILENCE_SECS: f32 = 0.5;
/// Frame length used for silence detection.
pub const SILENCE_FRAME_LENGTH: usize = 2048;
/// Hop length used for silence detection.
pub const SILENCE_HOP_LENGTH: usize = 512;

/// Peak amplitude under which audio is considered silent.
pub const SILENT_PEAK: f32 = 1e-6;
/// Mean absolute amplitude under which audio is boosted.
pub const QUIET_MEAN: f32 = 0.001;
/// Gain applied to quiet audio.
pub const QUIET_BOOST: f32 = 50.0;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Header-level facts about a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u32,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Decoded audio with interleaved samples.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Average all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Read only the WAV header.
pub fn probe_wav(path: &Path) -> Result<WavInfo, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        frames: reader.duration(),
    })
}

/// Decode a WAV file of any PCM or float format.
pub fn read_wav(path: &Path) -> Result<AudioBuffer, AudioError> {
    let reader = hound::WavReader::open(path)?;
    decode(reader)
}

/// Decode WAV bytes held in memory.
pub fn read_wav_bytes(bytes: &[u8]) -> Result<AudioBuffer, AudioError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    decode(reader)
}

fn decode<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<AudioBuffer, AudioError> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
    };
    Ok(AudioBuffer {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Convert to 16-bit PCM: scale by 32767 and truncate toward zero, clamping overflow.
pub fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * 32767.0) as i16).collect()
}

/// Write mono samples as a 16-bit PCM WAV file.
pub fn write_wav_i16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), AudioError> {
    let mut writer = hound::WavWriter::create(path, pcm16_spec(sample_rate, 1))?;
    for sample in to_i16(samples) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write interleaved samples as a 16-bit PCM WAV file.
pub fn write_buffer_i16(path: &Path, buffer: &AudioBuffer) -> Result<(), AudioError> {
    let mut writer =
        hound::WavWriter::create(path, pcm16_spec(buffer.sample_rate, buffer.channels))?;
    for sample in to_i16(&buffer.samples) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode mono samples as in-memory 16-bit WAV bytes.
pub fn wav_bytes_i16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, pcm16_spec(sample_rate, 1))?;
        for sample in to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn pcm16_spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Resample mono audio between two rates.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    resample_ratio(samples, to as f64 / from as f64)
}

fn resample_ratio(samples: &[f32], ratio: f64) -> Result<Vec<f32>, AudioError> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let expected = (samples.len() as f64 * ratio).round() as usize;

    // zero tail long enough to flush the filter delay out of a single pass
    let tail = params.sinc_len + (params.sinc_len as f64 / ratio).ceil() as usize;
    let mut padded = Vec::with_capacity(samples.len() + tail);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + tail, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded.len(), 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let waves_in = vec![padded];
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    let out = waves_out.into_iter().next().unwrap_or_default();

    let start = delay.min(out.len());
    let end = (delay + expected).min(out.len());
    Ok(out[start..end].to_vec())
}

/// Keep the centered window of at most `max_samples` samples.
pub fn center_crop(samples: &[f32], max_samples: usize) -> &[f32] {
    if samples.len() <= max_samples {
        return samples;
    }
    let start = (samples.len() - max_samples) / 2;
    &samples[start..start + max_samples]
}

/// Peak and mean absolute amplitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeStats {
    pub peak: f32,
    pub mean_abs: f32,
}

impl AmplitudeStats {
    pub fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self {
                peak: 0.0,
                mean_abs: 0.0,
            };
        }
        let (peak, sum) = samples.iter().fold((0f32, 0f64), |(peak, sum), &s| {
            (peak.max(s.abs()), sum + s.abs() as f64)
        });
        Self {
            peak,
            mean_abs: (sum / samples.len() as f64) as f32,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.peak < SILENT_PEAK
    }
}

/// Amplify audio whose mean amplitude is suspiciously low.
///
/// Returns the gain that was applied, if any.
pub fn boost_quiet(samples: &mut [f32]) -> Option<f32> {
    let stats = AmplitudeStats::of(samples);
    if stats.mean_abs > 0.0 && stats.mean_abs < QUIET_MEAN {
        samples.iter_mut().for_each(|s| *s *= QUIET_BOOST);
        Some(QUIET_BOOST)
    } else {
        None
    }
}

/// Locate non-silent intervals, as `[start, end)` sample ranges.
///
/// Frames are centered with zero padding; a frame is non-silent when its
/// power is within `top_db` of the loudest frame.
pub fn split_nonsilent(
    samples: &[f32],
    top_db: f32,
    frame_length: usize,
    hop_length: usize,
) -> Vec<(usize, usize)> {
    if samples.is_empty() || hop_length == 0 || frame_length == 0 {
        return Vec::new();
    }

    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0f64);
    for &s in samples {
        let last = *prefix.last().unwrap_or(&0.0);
        prefix.push(last + (s as f64) * (s as f64));
    }

    let pad = frame_length / 2;
    let n_frames = 1 + samples.len() / hop_length;
    let power: Vec<f64> = (0..n_frames)
        .map(|t| {
            let center = t * hop_length;
            let start = center.saturating_sub(pad).min(samples.len());
            let end = (center + frame_length - pad).min(samples.len());
            (prefix[end] - prefix[start]) / frame_length as f64
        })
        .collect();

    const AMIN: f64 = 1e-10;
    let reference = power.iter().cloned().fold(0f64, f64::max).max(AMIN);
    let threshold = -(top_db as f64);
    let nonsilent: Vec<bool> = power
        .iter()
        .map(|&p| 10.0 * (p.max(AMIN) / reference).log10() > threshold)
        .collect();

    let mut intervals = Vec::new();
    let mut start_frame = None;
    for (t, &loud) in nonsilent.iter().enumerate() {
        match (loud, start_frame) {
            (true, None) => start_frame = Some(t),
            (false, Some(s)) => {
                intervals.push((s, t));
                start_frame = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start_frame {
        intervals.push((s, n_frames));
    }

    intervals
        .into_iter()
        .map(|(s, e)| {
            (
                (s * hop_length).min(samples.len()),
                (e * hop_length).min(samples.len()),
            )
        })
        .filter(|(s, e)| e > s)
        .collect()
}

/// Shorten pauses longer than [`MAX_SILENCE_SECS`] to [`SHORTENED_SILENCE_SECS`].
///
/// Normal pauses between speech intervals are kept untouched. Audio outside
/// the first and last speech interval is dropped.
pub fn remove_long_silences(samples: &[f32], sample_rate: u32, top_db: f32) -> Vec<f32> {
    let intervals = split_nonsilent(samples, top_db, SILENCE_FRAME_LENGTH, SILENCE_HOP_LENGTH);
    if intervals.is_empty() {
        return samples.to_vec();
    }

    let max_gap = (MAX_SILENCE_SECS * sample_rate as f32) as usize;
    let replacement = (SHORTENED_SILENCE_SECS * sample_rate as f32) as usize;

    let mut out = Vec::with_capacity(samples.len());
    for (i, &(start, end)) in intervals.iter().enumerate() {
        out.extend_from_slice(&samples[start..end]);
        if let Some(&(next_start, _)) = intervals.get(i + 1) {
            let gap = next_start - end;
            if gap > max_gap {
                log::debug!(
                    "Shortening silence: {:.2}s -> {:.2}s",
                    gap as f32 / sample_rate as f32,
                    SHORTENED_SILENCE_SECS
                );
                out.extend(std::iter::repeat(0.0).take(replacement));
            } else {
                out.extend_from_slice(&samples[end..next_start]);
            }
        }
    }

    let removed = samples.len().saturating_sub(out.len()) as f32 / sample_rate as f32;
    if removed > 0.1 {
        log::info!(
            "Silence removal: {:.2}s -> {:.2}s (removed {:.2}s)",
            samples.len() as f32 / sample_rate as f32,
            out.len() as f32 / sample_rate as f32,
            removed
        );
    } else {
        log::debug!("No long silences detected");
    }
    out
}

const STRETCH_FRAME: usize = 1024;
const STRETCH_HOP: usize = STRETCH_FRAME / 2;
const STRETCH_TOLERANCE: isize = 256;

/// Change tempo without changing pitch (WSOLA).
///
/// `rate > 1` speeds up, `rate < 1` slows down.
pub fn time_stretch(samples: &[f32], rate: f32) -> Vec<f32> {
    if samples.is_empty() || rate <= 0.0 || (rate - 1.0).abs() < f32::EPSILON {
        return samples.to_vec();
    }

    let window: Vec<f32> = (0..STRETCH_FRAME)
        .map(|n| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / STRETCH_FRAME as f32).cos()
        })
        .collect();

    let out_len = (samples.len() as f64 / rate as f64).round() as usize;
    let mut out = vec![0f32; out_len + STRETCH_FRAME];
    let mut norm = vec![0f32; out_len + STRETCH_FRAME];
    let at = |pos: isize| -> f32 {
        if pos < 0 {
            0.0
        } else {
            samples.get(pos as usize).copied().unwrap_or(0.0)
        }
    };

    let hop_in = STRETCH_HOP as f64 * rate as f64;
    let mut natural: Option<isize> = None;
    let mut k = 0usize;
    loop {
        let out_pos = k * STRETCH_HOP;
        if out_pos >= out_len {
            break;
        }
        let nominal = (k as f64 * hop_in).round() as isize;
        let pos = match natural {
            None => nominal,
            Some(target) => {
                let mut best = nominal;
                let mut best_score = f32::NEG_INFINITY;
                for delta in (-STRETCH_TOLERANCE..=STRETCH_TOLERANCE).step_by(4) {
                    let candidate = nominal + delta;
                    let score: f32 = (0..STRETCH_HOP as isize)
                        .step_by(4)
                        .map(|n| at(candidate + n) * at(target + n))
                        .sum();
                    if score > best_score {
                        best_score = score;
                        best = candidate;
                    }
                }
                best
            }
        };

        for (n, w) in window.iter().enumerate() {
            out[out_pos + n] += at(pos + n as isize) * w;
            norm[out_pos + n] += w;
        }
        natural = Some(pos + STRETCH_HOP as isize);
        k += 1;
    }

    out.truncate(out_len);
    for (sample, weight) in out.iter_mut().zip(norm.iter()) {
        if *weight > 1e-3 {
            *sample /= weight;
        }
    }
    out
}

/// Shift pitch by `semitones` while keeping the duration.
pub fn pitch_shift(samples: &[f32], semitones: f32) -> Result<Vec<f32>, AudioError> {
    if samples.is_empty() || semitones == 0.0 {
        return Ok(samples.to_vec());
    }
    let rate = 2f32.powf(-semitones / 12.0);
    let stretched = time_stretch(samples, rate);
    let mut shifted = resample_ratio(&stretched, rate as f64)?;
    shifted.resize(samples.len(), 0.0);
    Ok(shifted)
}

/// Apply pitch shift then speed change. Identity at speed 1 and pitch 0.
pub fn apply_speech_control(
    samples: &[f32],
    speed: f32,
    pitch_semitones: f32,
) -> Result<Vec<f32>, AudioError> {
    if speed == 1.0 && pitch_semitones == 0.0 {
        return Ok(samples.to_vec());
    }
    let mut out = samples.to_vec();
    if pitch_semitones != 0.0 {
        out = pitch_shift(&out, pitch_semitones)?;
    }
    if speed != 1.0 {
        out = time_stretch(&out, speed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn i16_conversion_truncates_and_clamps() {
        assert_eq!(to_i16(&[0.5, -0.5, 1.5, -2.0]), vec![16383, -16383, 32767, -32768]);
    }

    #[test]
    fn wav_roundtrip_through_bytes() {
        let samples = tone(1000, 16000, 0.5);
        let bytes = wav_bytes_i16(&samples, 16000).unwrap();
        let decoded = read_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 1000);
        assert!((decoded.samples[100] - samples[100]).abs() < 1e-3);
    }

    #[test]
    fn probe_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav_i16(&path, &vec![0.1; 22050], 44100).unwrap();
        let info = probe_wav(&path).unwrap();
        assert_eq!(info.channels, 1);
        assert!((info.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn stereo_downmix_averages() {
        let buffer = AudioBuffer {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            sample_rate: 8000,
            channels: 2,
        };
        assert_eq!(buffer.to_mono(), vec![0.5, 0.5]);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn center_crop_keeps_middle() {
        let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert_eq!(center_crop(&data, 4), &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(center_crop(&data, 20).len(), 10);
    }

    #[test]
    fn amplitude_stats_and_boost() {
        let mut quiet = vec![0.0005, -0.0005];
        assert_eq!(boost_quiet(&mut quiet), Some(QUIET_BOOST));
        assert!((quiet[0] - 0.025).abs() < 1e-6);

        let mut loud = vec![0.5, -0.5];
        assert_eq!(boost_quiet(&mut loud), None);

        let mut zeros = vec![0.0; 4];
        assert_eq!(boost_quiet(&mut zeros), None);
        assert!(AmplitudeStats::of(&zeros).is_silent());
    }

    #[test]
    fn finds_speech_islands() {
        let sr = 16000;
        let mut audio = tone(8000, sr, 0.5);
        audio.extend(vec![0.0; 16000]);
        audio.extend(tone(8000, sr, 0.5));
        let intervals = split_nonsilent(&audio, 30.0, SILENCE_FRAME_LENGTH, SILENCE_HOP_LENGTH);
        assert_eq!(intervals.len(), 2);
        assert!(intervals[0].0 == 0);
        assert!(intervals[1].1 == audio.len());
    }

    #[test]
    fn long_gap_is_shortened() {
        let sr = 16000;
        let mut audio = tone(8000, sr, 0.5);
        audio.extend(vec![0.0; 32000]);
        audio.extend(tone(8000, sr, 0.5));
        let out = remove_long_silences(&audio, sr, 30.0);
        assert!(out.len() < audio.len());
        // two speech islands (with frame slack) plus a 0.5s pause
        let expected = 16000 + 8000;
        assert!((out.len() as isize - expected as isize).abs() < 4096, "{}", out.len());
    }

    #[test]
    fn short_gap_is_kept() {
        let sr = 16000;
        let mut audio = tone(8000, sr, 0.5);
        audio.extend(vec![0.0; 4000]);
        audio.extend(tone(8000, sr, 0.5));
        let out = remove_long_silences(&audio, sr, 30.0);
        assert_eq!(out.len(), audio.len());
    }

    #[test]
    fn stretch_changes_length() {
        let audio = tone(44100, 44100, 0.5);
        assert_eq!(time_stretch(&audio, 2.0).len(), 22050);
        assert_eq!(time_stretch(&audio, 0.5).len(), 88200);
        assert_eq!(time_stretch(&audio, 1.0), audio);
    }

    #[test]
    fn speech_control_identity() {
        let audio = tone(1000, 16000, 0.5);
        assert_eq!(apply_speech_control(&audio, 1.0, 0.0).unwrap(), audio);
    }

    #[test]
    fn resample_keeps_timing() {
        // half a second of silence, then a tone
        let audio: Vec<f32> = (0..44100)
            .map(|i| {
                if i < 22050 {
                    0.0
                } else {
                    0.5 * (2.0 * std::f32::consts::PI * 440.0 * (i - 22050) as f32 / 44100.0).sin()
                }
            })
            .collect();
        let out = resample(&audio, 44100, 16000).unwrap();
        assert_eq!(out.len(), 16000);
        let onset = out.iter().position(|s| s.abs() > 0.05).unwrap();
        assert!((7990..=8010).contains(&onset), "onset at {onset}");
    }

    #[test]
    fn pitch_shift_keeps_length() {
        let audio = tone(16000, 16000, 0.5);
        assert_eq!(pitch_shift(&audio, 3.0).unwrap().len(), audio.len());
    }
}
