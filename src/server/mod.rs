//! HTTP front-end: a single-page UI plus the JSON API behind it.
//!
//! The engine talks to one inference daemon and is not `Sync`, so a single
//! worker thread owns the [`Synthesizer`] and handlers reach it over a
//! channel. Voice library requests are served directly.
//!
//! Endpoints:
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/` | web UI |
//! | GET | `/health` | health check |
//! | GET | `/api/i18n/:lang` | UI strings (`zh`, `kk`) |
//! | GET | `/api/voices` | voice names |
//! | GET | `/api/voices/status` | alignment of every voice |
//! | POST | `/api/voices` | create a voice |
//! | POST | `/api/voices/preset` | quick save from the synthesis form |
//! | GET | `/api/voices/:name` | details |
//! | GET | `/api/voices/:name/audio?lang=` | reference recording |
//! | PUT | `/api/voices/:name/text` | replace the transcript |
//! | PUT | `/api/voices/:name/audio` | replace the recording |
//! | DELETE | `/api/voices/:name?confirm=true` | delete |
//! | POST | `/api/synthesize` | synthesize |
//! | GET | `/outputs/:file` | generated audio (`output_audio_*.wav` only) |

pub mod error;
pub mod handlers;

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::sync::oneshot;

use crate::synthesis::{SynthesisOutcome, SynthesisRequest, Synthesizer};
use crate::voices::VoiceLibrary;

pub use error::ApiError;

pub enum WorkerRequest {
    Synthesize {
        request: SynthesisRequest,
        /// Uploaded reference audio; removed once the request is done.
        upload: Option<tempfile::NamedTempFile>,
        response_tx: oneshot::Sender<SynthesisOutcome>,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub worker_tx: std_mpsc::Sender<WorkerRequest>,
    pub voices: VoiceLibrary,
    pub output_dir: PathBuf,
}

impl AppState {
    /// Start the worker thread for `synthesizer` and build the shared state.
    pub fn start(synthesizer: Synthesizer) -> (Self, thread::JoinHandle<()>) {
        let voices = synthesizer.voices().clone();
        let output_dir = synthesizer.output_dir().to_path_buf();
        let (worker_tx, worker_rx) = std_mpsc::channel();
        let handle = spawn_worker_thread(synthesizer, worker_rx);
        let state = Self {
            worker_tx,
            voices,
            output_dir,
        };
        (state, handle)
    }
}

pub fn spawn_worker_thread(
    mut synthesizer: Synthesizer,
    worker_rx: std_mpsc::Receiver<WorkerRequest>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        log::info!("Synthesis worker ready");
        while let Ok(request) = worker_rx.recv() {
            match request {
                WorkerRequest::Synthesize {
                    request,
                    upload,
                    response_tx,
                } => {
                    let outcome = synthesizer.synthesize(&request);
                    drop(upload);
                    if response_tx.send(outcome).is_err() {
                        log::warn!("Client went away before synthesis finished");
                    }
                }
            }
        }
        log::info!("Synthesis worker shutting down");
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/i18n/:lang", get(handlers::translations))
        .route(
            "/api/voices",
            get(handlers::list_voices).post(handlers::create_voice),
        )
        .route("/api/voices/status", get(handlers::voices_status))
        .route("/api/voices/preset", post(handlers::save_preset))
        .route(
            "/api/voices/:name",
            get(handlers::voice_details).delete(handlers::delete_voice),
        )
        .route(
            "/api/voices/:name/audio",
            get(handlers::voice_audio).put(handlers::update_audio),
        )
        .route("/api/voices/:name/text", put(handlers::update_ref_text))
        .route("/api/synthesize", post(handlers::synthesize))
        .route("/outputs/:file", get(handlers::output_audio))
        .with_state(state)
}
