use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::{error, info, warn};
use tower_http::cors::{Any, CorsLayer};

use voxcpm_kk::config::AppConfig;
use voxcpm_kk::engines::voxcpm::{VoxCpmEngine, VoxCpmError};
use voxcpm_kk::server::{router, AppState};
use voxcpm_kk::synthesis::Synthesizer;
use voxcpm_kk::voices::VoiceLibrary;

/// Web UI and JSON API for Kazakh VoxCPM voice cloning.
#[derive(Parser, Debug)]
#[command(name = "voxcpm-kk-web", version)]
struct Args {
    /// Application config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides the config)
    #[arg(long, env = "GRADIO_SERVER_NAME")]
    host: Option<String>,

    /// Port to bind (overrides the config)
    #[arg(long, env = "GRADIO_SERVER_PORT")]
    port: Option<u16>,

    /// Allow cross-origin requests from anywhere
    #[arg(long)]
    cors: bool,

    /// Start with the base model even if a LoRA adapter is present
    #[arg(long)]
    no_lora: bool,
}

fn load_engine(config: &AppConfig, with_lora: bool) -> Result<VoxCpmEngine, VoxCpmError> {
    let start = Instant::now();
    match VoxCpmEngine::from_pretrained(config.model_params(with_lora)) {
        Ok(engine) => {
            info!("Model loaded in {:.2?}", start.elapsed());
            Ok(engine)
        }
        Err(e) if with_lora => {
            error!("Loading with LoRA failed: {e}");
            warn!(
                "Check that {} holds lora_weights.ckpt and a matching lora_config.json; falling back to the base model",
                config.lora_path().display()
            );
            VoxCpmEngine::from_pretrained(config.model_params(false))
        }
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    if args.config.is_none() {
        warn!("No config file specified, using defaults");
    }

    info!("Loading VoxCPM model {}...", config.model_id);
    let engine = {
        let config = config.clone();
        let with_lora = !args.no_lora;
        tokio::task::spawn_blocking(move || load_engine(&config, with_lora)).await??
    };
    if !engine.lora_enabled() {
        info!("Running without LoRA");
    }

    let voices = VoiceLibrary::open(config.voices_path())?;
    info!("Voice library: {} ({} voices)", voices.root().display(), voices.list().len());

    let synthesizer = Synthesizer::new(engine, voices, config.output_path())
        .with_keep_outputs(config.keep_outputs);
    let (state, _worker) = AppState::start(synthesizer);

    let mut app = router(state);
    if args.cors {
        info!("CORS enabled for all origins");
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let host = args.host.unwrap_or(config.host);
    let port = args.port.unwrap_or(config.port);
    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{addr}");
    info!("Endpoints:");
    info!("  GET    /                        - Web UI");
    info!("  GET    /health                  - Health check");
    info!("  GET    /api/voices              - List voices");
    info!("  GET    /api/voices/status       - Transcript alignment report");
    info!("  POST   /api/voices              - Create a voice");
    info!("  PUT    /api/voices/:name/text   - Update a transcript");
    info!("  DELETE /api/voices/:name        - Delete a voice");
    info!("  POST   /api/synthesize          - Generate speech");
    info!("  GET    /outputs/:file           - Generated audio");

    axum::serve(listener, app).await?;
    Ok(())
}
