use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{error, info, warn};

use voxcpm_kk::config::AppConfig;
use voxcpm_kk::engines::voxcpm::model::DEFAULT_DENOISER_ID;
use voxcpm_kk::engines::voxcpm::{
    hub, DaemonConfig, LoraConfig, VoxCpmEngine, VoxCpmInferenceParams,
    VoxCpmInferenceParamsBuilder, VoxCpmModelParams,
};
use voxcpm_kk::i18n::Lang;
use voxcpm_kk::voices::{StatusSummary, VoiceLibrary, REPAIR_TARGET_SECS};
use voxcpm_kk::SynthesisEngine;

#[derive(Parser, Debug)]
#[command(name = "voxcpm-kk")]
#[command(
    version,
    about = "VoxCPM 1.5 text-to-speech with a Kazakh LoRA: voice cloning, direct TTS and batch processing",
    args_conflicts_with_subcommands = true,
    after_help = "Examples:\n  \
        voxcpm-kk --text \"Сәлем, әлем!\" --output out.wav\n  \
        voxcpm-kk --text \"Сәлем\" --prompt-audio ref.wav --prompt-text \"Сәлеметсіз бе\" --output out.wav --denoise\n  \
        voxcpm-kk --input texts.txt --output-dir ./outs"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    generate: GenerateArgs,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect and fix the voice library
    Voices {
        /// Application config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Voice library directory (overrides the config)
        #[arg(long)]
        voices_dir: Option<PathBuf>,

        /// Language of status labels and notes: zh or kk
        #[arg(long, default_value = "zh")]
        lang: Lang,

        #[command(subcommand)]
        action: VoicesCommand,
    },
    /// Check that everything needed to run is installed
    Doctor {
        /// Application config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum VoicesCommand {
    /// Report how well each transcript matches its recording
    Verify,
    /// Replace a voice's transcript
    SetText {
        name: String,
        text: String,
    },
    /// Convert a recording to mono 44.1 kHz, crop it and set its transcript
    Repair {
        name: String,
        text: String,
        /// Length of the centered window to keep, in seconds
        #[arg(long, default_value_t = REPAIR_TARGET_SECS)]
        target_secs: f32,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Input text file, one utterance per line (batch mode)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory (batch mode)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Text to synthesize (single or clone mode)
    #[arg(short, long)]
    text: Option<String>,

    /// Output WAV file (single or clone mode)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reference audio for voice cloning
    #[arg(long)]
    prompt_audio: Option<PathBuf>,

    /// Transcript of the reference audio
    #[arg(long)]
    prompt_text: Option<String>,

    /// Denoise the reference audio first
    #[arg(long)]
    denoise: bool,

    /// Classifier-free guidance scale (0.1-10.0)
    #[arg(long, default_value_t = 2.0)]
    cfg_value: f32,

    /// Diffusion steps (1-100)
    #[arg(long, default_value_t = 10)]
    inference_timesteps: usize,

    /// Spell out numbers and canonicalize punctuation
    #[arg(long)]
    normalize: bool,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Local VoxCPM model directory
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Hub repository id
    #[arg(long, default_value = "openbmb/VoxCPM1.5")]
    hf_model_id: String,

    /// Hub cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Never access the network
    #[arg(long)]
    local_files_only: bool,

    /// Do not load the denoiser
    #[arg(long)]
    no_denoiser: bool,

    /// ZipEnhancer model id or local path
    #[arg(long, env = "ZIPENHANCER_MODEL_PATH")]
    zipenhancer_path: Option<String>,

    /// LoRA weights (file or directory)
    #[arg(long)]
    lora_path: Option<PathBuf>,

    /// LoRA rank
    #[arg(long, default_value_t = 32)]
    lora_r: i64,

    /// LoRA alpha
    #[arg(long, default_value_t = 16)]
    lora_alpha: i64,

    /// LoRA dropout (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    lora_dropout: f32,

    /// Disable LoRA on the language model layers
    #[arg(long)]
    lora_disable_lm: bool,

    /// Disable LoRA on the diffusion layers
    #[arg(long)]
    lora_disable_dit: bool,

    /// Enable LoRA on the projection layers
    #[arg(long)]
    lora_enable_proj: bool,

    /// Python interpreter for the inference daemon
    #[arg(long, default_value = "python3")]
    python: String,

    /// Inference daemon script
    #[arg(long, default_value = "scripts/voxcpm_daemon.py")]
    daemon_script: PathBuf,
}

fn validate_ranges(generate: &GenerateArgs, model: &ModelArgs) -> Result<(), String> {
    if !(0.1..=10.0).contains(&generate.cfg_value) {
        return Err("--cfg-value must be between 0.1 and 10.0".to_string());
    }
    if !(1..=100).contains(&generate.inference_timesteps) {
        return Err("--inference-timesteps must be between 1 and 100".to_string());
    }
    if model.lora_r <= 0 {
        return Err("--lora-r must be a positive integer".to_string());
    }
    if model.lora_alpha <= 0 {
        return Err("--lora-alpha must be a positive integer".to_string());
    }
    if !(0.0..=1.0).contains(&model.lora_dropout) {
        return Err("--lora-dropout must be between 0.0 and 1.0".to_string());
    }
    Ok(())
}

#[derive(Debug)]
enum Mode {
    Batch { input: PathBuf, output_dir: PathBuf },
    Clone { text: String, output: PathBuf, prompt_audio: PathBuf, prompt_text: String },
    Single { text: String, output: PathBuf },
}

fn select_mode(args: &GenerateArgs) -> Result<Mode, String> {
    if args.input.is_some() && args.text.is_some() {
        return Err("Use either batch mode (--input) or single mode (--text), not both.".to_string());
    }
    if let Some(input) = &args.input {
        let output_dir = args
            .output_dir
            .clone()
            .ok_or("Batch mode requires --output-dir")?;
        return Ok(Mode::Batch {
            input: input.clone(),
            output_dir,
        });
    }
    let (Some(text), Some(output)) = (&args.text, &args.output) else {
        return Err("Single-sample mode requires --text and --output".to_string());
    };
    if args.prompt_audio.is_some() || args.prompt_text.is_some() {
        let (Some(prompt_audio), Some(prompt_text)) = (&args.prompt_audio, &args.prompt_text)
        else {
            return Err("Voice cloning requires both --prompt-audio and --prompt-text".to_string());
        };
        return Ok(Mode::Clone {
            text: text.clone(),
            output: output.clone(),
            prompt_audio: prompt_audio.clone(),
            prompt_text: prompt_text.clone(),
        });
    }
    Ok(Mode::Single {
        text: text.clone(),
        output: output.clone(),
    })
}

fn model_params(args: &ModelArgs) -> Result<VoxCpmModelParams, Box<dyn Error>> {
    let model_id = match &args.model_path {
        Some(path) if !path.is_dir() => {
            return Err(format!("model directory '{}' does not exist", path.display()).into())
        }
        Some(path) => path.to_string_lossy().into_owned(),
        None => args.hf_model_id.clone(),
    };

    let lora_config = args.lora_path.as_ref().map(|_| LoraConfig {
        enable_lm: !args.lora_disable_lm,
        enable_dit: !args.lora_disable_dit,
        enable_proj: args.lora_enable_proj,
        r: args.lora_r as u32,
        alpha: args.lora_alpha as u32,
        dropout: args.lora_dropout,
    });
    if let Some(cfg) = &lora_config {
        info!(
            "LoRA config: r={}, alpha={}, lm={}, dit={}, proj={}",
            cfg.r, cfg.alpha, cfg.enable_lm, cfg.enable_dit, cfg.enable_proj
        );
    }

    let denoiser = (!args.no_denoiser).then(|| {
        args.zipenhancer_path
            .clone()
            .unwrap_or_else(|| DEFAULT_DENOISER_ID.to_string())
    });

    Ok(VoxCpmModelParams {
        model_id,
        cache_dir: args.cache_dir.clone(),
        local_files_only: args.local_files_only,
        denoiser,
        optimize: true,
        lora_config,
        lora_weights_path: args.lora_path.clone(),
        daemon: DaemonConfig {
            python: args.python.clone(),
            script: args.daemon_script.clone(),
        },
    })
}

fn load_engine(args: &ModelArgs) -> Result<VoxCpmEngine, Box<dyn Error>> {
    info!("Loading VoxCPM model...");
    let start = Instant::now();
    let engine = VoxCpmEngine::from_pretrained(model_params(args)?)?;
    info!("Model loaded in {:.2?}", start.elapsed());
    Ok(engine)
}

fn require_file(path: &Path, what: &str) -> Result<(), Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("{what} '{}' does not exist", path.display()).into());
    }
    Ok(())
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn synthesize_one(
    engine: &mut VoxCpmEngine,
    text: &str,
    output: &Path,
    params: VoxCpmInferenceParams,
) -> Result<(), Box<dyn Error>> {
    let result = engine.synthesize(text, Some(params))?;
    result.write_wav(output)?;
    info!(
        "Saved audio to: {} ({:.2}s)",
        output.display(),
        result.duration_secs()
    );
    Ok(())
}

fn run_generate(args: GenerateArgs, model: ModelArgs) -> Result<(), Box<dyn Error>> {
    let base = VoxCpmInferenceParamsBuilder::default()
        .cfg_value(args.cfg_value)
        .inference_timesteps(args.inference_timesteps)
        .normalize(args.normalize)
        .build()?;

    match select_mode(&args).map_err(usage_error)? {
        Mode::Single { text, output } => {
            create_parent(&output)?;
            let mut engine = load_engine(&model)?;
            synthesize_one(&mut engine, &text, &output, base)
        }
        Mode::Clone {
            text,
            output,
            prompt_audio,
            prompt_text,
        } => {
            require_file(&prompt_audio, "reference audio file")?;
            create_parent(&output)?;
            let mut engine = load_engine(&model)?;
            let params = VoxCpmInferenceParams {
                prompt_wav_path: Some(prompt_audio),
                prompt_text: Some(prompt_text),
                denoise: args.denoise,
                ..base
            };
            synthesize_one(&mut engine, &text, &output, params)
        }
        Mode::Batch { input, output_dir } => {
            require_file(&input, "input file")?;
            let texts: Vec<String> = std::fs::read_to_string(&input)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if texts.is_empty() {
                return Err("Input file is empty".into());
            }
            std::fs::create_dir_all(&output_dir)?;
            if let Some(prompt_audio) = &args.prompt_audio {
                require_file(prompt_audio, "reference audio file")?;
            }

            let mut engine = load_engine(&model)?;
            let params = VoxCpmInferenceParams {
                denoise: args.denoise && args.prompt_audio.is_some(),
                prompt_wav_path: args.prompt_audio.clone(),
                prompt_text: args.prompt_text.clone(),
                ..base
            };

            let mut succeeded = 0;
            for (i, text) in texts.iter().enumerate() {
                let output = output_dir.join(format!("output_{:03}.wav", i + 1));
                match synthesize_one(&mut engine, text, &output, params.clone()) {
                    Ok(()) => succeeded += 1,
                    Err(e) => error!("Failed on line {}: {e}", i + 1),
                }
            }
            info!("Batch finished: {succeeded}/{} succeeded", texts.len());
            Ok(())
        }
    }
}

fn usage_error(msg: String) -> clap::Error {
    Cli::command().error(clap::error::ErrorKind::ArgumentConflict, msg)
}

fn open_library(config: Option<&Path>, voices_dir: Option<PathBuf>) -> Result<VoiceLibrary, Box<dyn Error>> {
    let config = AppConfig::load(config)?;
    let dir = voices_dir.unwrap_or_else(|| config.voices_path());
    Ok(VoiceLibrary::open(dir)?)
}

fn run_voices(library: &VoiceLibrary, lang: Lang, action: VoicesCommand) -> Result<(), Box<dyn Error>> {
    match action {
        VoicesCommand::Verify => {
            let statuses = library.statuses();
            if statuses.is_empty() {
                println!("No voices found in {}", library.root().display());
                return Ok(());
            }
            println!(
                "{:<20} {:<8} {:<6} {:<8} {:<8} {:<16} Score",
                "Voice", "Secs", "Words", "Capacity", "Ratio", "Status"
            );
            println!("{}", "-".repeat(80));
            for info in &statuses {
                println!(
                    "{:<20} {:<8.2} {:<6} {:<8.1} {:<8.2} {:<16} {}",
                    info.voice,
                    info.duration,
                    info.word_count,
                    info.capacity,
                    info.ratio,
                    info.status.label(lang),
                    info.score
                );
            }

            let summary = StatusSummary::of(&statuses);
            println!();
            println!("Aligned: {}", summary.perfect);
            println!("Needs attention: {}", summary.good);
            println!("Possible problems: {}", summary.warning);
            println!("Serious problems: {}", summary.bad);

            let problems: Vec<_> = statuses.iter().filter(|i| i.score < 80).collect();
            if !problems.is_empty() {
                println!("\nVoices to fix:");
            }
            for info in problems {
                println!("\n{} ({})", info.voice, info.status.label(lang));
                println!("  audio: {:.2}s", info.duration);
                let preview: String = info.ref_text.chars().take(60).collect();
                println!("  text: {preview}...");
                println!(
                    "  words: {} (suggested: {:.0})",
                    info.word_count, info.capacity
                );
                if info.score == 0 {
                    println!("  advice: set the transcript with `voxcpm-kk voices set-text`");
                } else if info.word_count as f64 > info.capacity * 1.3 {
                    println!("  advice: the transcript is too long; shorten it or record longer audio");
                } else if (info.word_count as f64) < info.capacity * 0.4 {
                    println!("  advice: the transcript is too short; part of the speech is probably missing");
                }
            }
            println!("\nIdeal ratio: 0.8-1.1 words per estimated capacity (2.5 words/s)");
            Ok(())
        }
        VoicesCommand::SetText { name, text } => {
            let info = library.update_ref_text(&name, &text, lang)?;
            println!(
                "{name}: {} words, ratio {:.2}, {} ({})",
                info.word_count,
                info.ratio,
                info.status.label(lang),
                info.score
            );
            Ok(())
        }
        VoicesCommand::Repair {
            name,
            text,
            target_secs,
        } => {
            let report = library.repair(&name, &text, target_secs, lang)?;
            if report.downmixed {
                println!("converted to mono");
            }
            if report.resampled {
                println!("resampled to 44100 Hz");
            }
            if report.cropped {
                println!("cropped to {target_secs}s");
            }
            let info = &report.info;
            println!(
                "{name}: {:.2}s, {} channel(s), {} Hz, {} words, ratio {:.2}, {} ({})",
                info.duration,
                info.channels,
                info.sample_rate,
                info.word_count,
                info.ratio,
                info.status.label(lang),
                info.score
            );
            Ok(())
        }
    }
}

/// Prints a report and returns whether every required check passed.
fn doctor(config: &AppConfig) -> bool {
    let mut ok = true;
    let mut check = |name: &str, passed: bool, required: bool, detail: String| {
        let tag = match (passed, required) {
            (true, _) => "[OK]     ",
            (false, true) => "[MISSING]",
            (false, false) => "[WARN]   ",
        };
        println!("{tag} {name}: {detail}");
        ok &= passed || !required;
    };

    let python = Command::new(&config.python).arg("--version").output();
    match python {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(if out.stdout.is_empty() { &out.stderr } else { &out.stdout });
            check("python", true, true, version.trim().to_string())
        }
        Ok(out) => check("python", false, true, format!("`{} --version` exited with {}", config.python, out.status)),
        Err(e) => check("python", false, true, format!("{}: {e}", config.python)),
    }

    let script = config.daemon_script_path();
    check("inference daemon", script.is_file(), true, script.display().to_string());

    let model_path = Path::new(&config.model_id);
    let cached = model_path.is_dir() || hub::is_cached(&config.model_id, config.cache_dir.as_deref());
    check(
        "model",
        cached,
        config.local_files_only,
        if cached {
            format!("{} is available locally", config.model_id)
        } else {
            format!("{} is not cached yet and will be downloaded on first start", config.model_id)
        },
    );

    let lora = config.lora_path();
    let lora_ok = lora.join("lora_config.json").is_file();
    check(
        "LoRA adapter",
        lora_ok,
        false,
        if lora_ok {
            format!("{} (rank {})", lora.display(), config.lora_rank())
        } else {
            format!("{} has no lora_config.json; the base model will be used", lora.display())
        },
    );

    let voices = config.voices_path();
    check("voice library", voices.is_dir(), false, voices.display().to_string());
    ok
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli {
        command,
        generate,
        model,
    } = Cli::parse();

    let result = match command {
        Some(Commands::Voices {
            config,
            voices_dir,
            lang,
            action,
        }) => open_library(config.as_deref(), voices_dir)
            .and_then(|library| run_voices(&library, lang, action)),
        Some(Commands::Doctor { config }) => match AppConfig::load(config.as_deref()) {
            Ok(config) if doctor(&config) => Ok(()),
            Ok(_) => Err("some prerequisites are missing".into()),
            Err(e) => Err(e.into()),
        },
        None => {
            if let Err(msg) = validate_ranges(&generate, &model) {
                Cli::command()
                    .error(clap::error::ErrorKind::ValueValidation, msg)
                    .exit();
            }
            run_generate(generate, model)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            warn!("Run `voxcpm-kk doctor` to check the installation");
            ExitCode::FAILURE
        }
    }
}
