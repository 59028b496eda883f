//! [`SpeechModel`] backed by a persistent Python inference daemon.
//!
//! The daemon speaks framed JSON over its stdin/stdout: each frame is a
//! 4-byte big-endian length followed by that many bytes of UTF-8 JSON.
//! Requests carry a `cmd` tag, replies a `type` tag (`ok`, `chunk`, `done`
//! or `error`).

use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use super::model::{
    ChunkSink, GeneratedChunk, LoraConfig, LoraLoadReport, PromptCache, PromptRequest,
    SpeechModel, UtteranceRequest, VoxCpmError, SAMPLE_RATE,
};
use crate::audio;

/// Frames larger than this are treated as a corrupted stream.
const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

/// How to start the daemon process.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub python: String,
    pub script: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            script: PathBuf::from("scripts/voxcpm_daemon.py"),
        }
    }
}

/// What the daemon should load at startup.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub model_dir: PathBuf,
    pub lora_config: Option<LoraConfig>,
    pub lora_weights: Option<PathBuf>,
    /// ModelScope id or local path of the denoiser; `None` disables it.
    pub denoiser: Option<String>,
    pub optimize: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DaemonCommand<'a> {
    Load {
        model_dir: &'a Path,
        #[serde(skip_serializing_if = "Option::is_none")]
        lora_config: Option<&'a LoraConfig>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lora_weights: Option<&'a Path>,
        #[serde(skip_serializing_if = "Option::is_none")]
        denoiser: Option<&'a str>,
        optimize: bool,
    },
    BuildPromptCache {
        wav_path: &'a Path,
        text: &'a str,
        use_prompt_text: bool,
        cross_language: bool,
    },
    Generate {
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_handle: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_text: Option<&'a str>,
        min_len: usize,
        max_len: usize,
        inference_timesteps: usize,
        cfg_value: f32,
        retry_badcase: bool,
        retry_badcase_max_times: usize,
        retry_badcase_ratio_threshold: f32,
        streaming: bool,
    },
    LoadLora {
        path: &'a Path,
    },
    ResetLora,
    SetLoraEnabled {
        enabled: bool,
    },
    Denoise {
        input: &'a Path,
        output: &'a Path,
    },
    Release {
        handle: &'a str,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DaemonReply {
    Ok {
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        loaded: Option<usize>,
        #[serde(default)]
        skipped: Option<usize>,
    },
    Chunk {
        audio_base64: String,
        #[serde(default)]
        feat: Option<String>,
    },
    Done,
    Error {
        message: String,
    },
}

/// Write one length-prefixed JSON frame.
pub fn write_frame<W: Write + ?Sized, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), VoxCpmError> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| VoxCpmError::Protocol("frame too large".to_string()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub fn read_frame<R: Read + ?Sized, T: for<'de> Deserialize<'de>>(
    reader: &mut R,
) -> Result<T, VoxCpmError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            VoxCpmError::Daemon("daemon closed its output".to_string())
        } else {
            VoxCpmError::Io(e)
        }
    })?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(VoxCpmError::Protocol(format!("frame of {len} bytes")));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(|e| VoxCpmError::Protocol(e.to_string()))
}

/// VoxCPM served by `scripts/voxcpm_daemon.py`.
pub struct DaemonModel {
    child: Option<Child>,
    reader: BufReader<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    lora_config: Option<LoraConfig>,
    sample_rate: u32,
    has_denoiser: bool,
}

impl DaemonModel {
    /// Start the daemon and load the model into it.
    pub fn spawn(config: &DaemonConfig, options: &LoadOptions) -> Result<Self, VoxCpmError> {
        if !config.script.exists() {
            return Err(VoxCpmError::Daemon(format!(
                "daemon script not found at {}",
                config.script.display()
            )));
        }

        log::info!(
            "Starting inference daemon: {} {}",
            config.python,
            config.script.display()
        );
        let mut child = Command::new(&config.python)
            .arg(&config.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| VoxCpmError::Daemon(format!("failed to start {}: {e}", config.python)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoxCpmError::Daemon("daemon stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoxCpmError::Daemon("daemon stdout unavailable".to_string()))?;

        let mut model = Self::from_streams(Box::new(stdout), Box::new(stdin), None);
        model.child = Some(child);
        model.load(options)?;
        Ok(model)
    }

    /// Wrap already connected streams; the model still has to be loaded.
    pub fn from_streams(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        lora_config: Option<LoraConfig>,
    ) -> Self {
        Self {
            child: None,
            reader: BufReader::new(reader),
            writer,
            lora_config,
            sample_rate: SAMPLE_RATE,
            has_denoiser: false,
        }
    }

    fn load(&mut self, options: &LoadOptions) -> Result<(), VoxCpmError> {
        let lora_config = options
            .lora_config
            .clone()
            .or_else(|| options.lora_weights.as_ref().map(|_| LoraConfig::default()));

        let reply = self.call(&DaemonCommand::Load {
            model_dir: &options.model_dir,
            lora_config: lora_config.as_ref(),
            lora_weights: options.lora_weights.as_deref(),
            denoiser: options.denoiser.as_deref(),
            optimize: options.optimize,
        })?;
        if let DaemonReply::Ok {
            sample_rate: Some(rate),
            ..
        } = reply
        {
            self.sample_rate = rate;
        }
        self.lora_config = lora_config;
        self.has_denoiser = options.denoiser.is_some();
        log::info!(
            "Model loaded from {} ({} Hz, LoRA {})",
            options.model_dir.display(),
            self.sample_rate,
            if self.lora_config.is_some() { "on" } else { "off" }
        );
        Ok(())
    }

    fn send(&mut self, command: &DaemonCommand<'_>) -> Result<(), VoxCpmError> {
        write_frame(&mut self.writer, command)
    }

    fn receive(&mut self) -> Result<DaemonReply, VoxCpmError> {
        match read_frame(&mut self.reader)? {
            DaemonReply::Error { message } => Err(VoxCpmError::Daemon(message)),
            reply => Ok(reply),
        }
    }

    /// Send a command that answers with a single `ok` frame.
    fn call(&mut self, command: &DaemonCommand<'_>) -> Result<DaemonReply, VoxCpmError> {
        self.send(command)?;
        match self.receive()? {
            reply @ DaemonReply::Ok { .. } => Ok(reply),
            other => Err(VoxCpmError::Protocol(format!("expected ok, got {other:?}"))),
        }
    }

    fn shutdown(&mut self) {
        let _ = self.send(&DaemonCommand::Shutdown);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for DaemonModel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn decode_chunk(audio_base64: &str) -> Result<Vec<f32>, VoxCpmError> {
    let bytes = general_purpose::STANDARD
        .decode(audio_base64)
        .map_err(|e| VoxCpmError::Protocol(format!("bad audio payload: {e}")))?;
    Ok(audio::read_wav_bytes(&bytes)?.to_mono())
}

impl SpeechModel for DaemonModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn lora_config(&self) -> Option<&LoraConfig> {
        self.lora_config.as_ref()
    }

    fn build_prompt_cache(
        &mut self,
        request: &PromptRequest<'_>,
    ) -> Result<PromptCache, VoxCpmError> {
        let reply = self.call(&DaemonCommand::BuildPromptCache {
            wav_path: request.wav_path,
            text: request.text,
            use_prompt_text: request.use_prompt_text,
            cross_language: request.cross_language,
        })?;
        match reply {
            DaemonReply::Ok {
                handle: Some(handle),
                ..
            } => Ok(PromptCache {
                prompt_text: if request.use_prompt_text {
                    request.text.to_string()
                } else {
                    String::new()
                },
                handle,
            }),
            _ => Err(VoxCpmError::Protocol(
                "prompt cache reply without handle".to_string(),
            )),
        }
    }

    fn generate(
        &mut self,
        request: &UtteranceRequest<'_>,
        sink: &mut ChunkSink<'_>,
    ) -> Result<(), VoxCpmError> {
        self.send(&DaemonCommand::Generate {
            text: request.text,
            prompt_handle: request.prompt.map(|p| p.handle.as_str()),
            prompt_text: request.prompt.map(|p| p.prompt_text.as_str()),
            min_len: request.min_len,
            max_len: request.max_len,
            inference_timesteps: request.inference_timesteps,
            cfg_value: request.cfg_value,
            retry_badcase: request.retry_badcase,
            retry_badcase_max_times: request.retry_badcase_max_times,
            retry_badcase_ratio_threshold: request.retry_badcase_ratio_threshold,
            streaming: request.streaming,
        })?;

        loop {
            match self.receive()? {
                DaemonReply::Chunk { audio_base64, feat } => {
                    let samples = decode_chunk(&audio_base64)?;
                    if let Err(e) = sink(GeneratedChunk { samples, feat }) {
                        // drain the rest so the stream stays in sync
                        while !matches!(self.receive(), Ok(DaemonReply::Done) | Err(_)) {}
                        return Err(e);
                    }
                }
                DaemonReply::Done => return Ok(()),
                other => {
                    return Err(VoxCpmError::Protocol(format!(
                        "unexpected reply during generation: {other:?}"
                    )))
                }
            }
        }
    }

    fn load_lora_weights(&mut self, path: &Path) -> Result<LoraLoadReport, VoxCpmError> {
        match self.call(&DaemonCommand::LoadLora { path })? {
            DaemonReply::Ok {
                loaded, skipped, ..
            } => Ok(LoraLoadReport {
                loaded: loaded.unwrap_or(0),
                skipped: skipped.unwrap_or(0),
            }),
            other => Err(VoxCpmError::Protocol(format!("expected ok, got {other:?}"))),
        }
    }

    fn reset_lora_weights(&mut self) -> Result<(), VoxCpmError> {
        self.call(&DaemonCommand::ResetLora).map(|_| ())
    }

    fn set_lora_enabled(&mut self, enabled: bool) -> Result<(), VoxCpmError> {
        self.call(&DaemonCommand::SetLoraEnabled { enabled })
            .map(|_| ())
    }

    fn has_denoiser(&self) -> bool {
        self.has_denoiser
    }

    fn denoise(&mut self, input: &Path, output: &Path) -> Result<(), VoxCpmError> {
        self.call(&DaemonCommand::Denoise { input, output })
            .map(|_| ())
    }

    fn release_prompt_cache(&mut self, cache: &PromptCache) -> Result<(), VoxCpmError> {
        self.call(&DaemonCommand::Release {
            handle: &cache.handle,
        })
        .map(|_| ())
    }
}
