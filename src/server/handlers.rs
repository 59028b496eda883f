use std::io::Write as _;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::error::ApiError;
use super::{AppState, WorkerRequest};
use crate::i18n::{self, Lang};
use crate::synthesis::{self, SynthesisOutcome, SynthesisRequest};
use crate::voices::{AlignmentInfo, AudioSource, StatusSummary};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LangQuery {
    pub lang: Lang,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteQuery {
    pub lang: Lang,
    pub confirm: bool,
}

/// Body of voice creation and quick save.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewVoiceBody {
    pub name: String,
    pub audio_base64: Option<String>,
    pub ref_text: String,
    pub lang: Lang,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefTextBody {
    pub ref_text: String,
    pub lang: Lang,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AudioBody {
    pub audio_base64: Option<String>,
    pub lang: Lang,
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeBody {
    #[serde(flatten)]
    pub request: SynthesisRequest,
    /// Uploaded reference recording (WAV), base64 encoded.
    #[serde(default)]
    pub ref_audio_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SynthesizeResponse {
    #[serde(flatten)]
    pub outcome: SynthesisOutcome,
    /// Where the generated file is served, on success.
    pub audio_url: Option<String>,
}

/// Result of a voice library change, with refreshed listings for the UI.
#[derive(Debug, Serialize)]
pub struct VoiceChange {
    pub message: String,
    pub info: Option<AlignmentInfo>,
    pub voices: Vec<String>,
    pub selected: Option<String>,
    pub table: String,
}

fn decode_audio(audio_base64: Option<&str>, lang: Lang) -> Result<Option<Vec<u8>>, ApiError> {
    match audio_base64.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(encoded) => BASE64.decode(encoded).map(Some).map_err(|e| {
            ApiError::bad_request(i18n::tf(lang, "error_invalid_audio", &[("error", &e)]))
        }),
    }
}

fn alignment_line(info: &AlignmentInfo, lang: Lang) -> String {
    format!(
        "{} ({}: {})",
        info.status.label(lang),
        i18n::t(lang, "score_label"),
        info.score
    )
}

fn voice_change(
    state: &AppState,
    message: String,
    info: Option<AlignmentInfo>,
    selected: Option<String>,
    lang: Lang,
) -> Json<VoiceChange> {
    Json(VoiceChange {
        message,
        info,
        voices: state.voices.list(),
        selected,
        table: state.voices.render_table(lang),
    })
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn translations(Path(code): Path<String>) -> Result<Response, ApiError> {
    let lang: Lang = code.parse().map_err(ApiError::not_found)?;
    Ok(Json(i18n::table(lang)).into_response())
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "voices": state.voices.list(),
        "default": state.voices.default_voice(),
    }))
}

pub async fn voices_status(
    State(state): State<AppState>,
    Query(query): Query<LangQuery>,
) -> Json<Value> {
    let statuses = state.voices.statuses();
    let summary = StatusSummary::of(&statuses);
    Json(json!({
        "voices": statuses,
        "summary": summary,
        "table": state.voices.render_table(query.lang),
    }))
}

pub async fn voice_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LangQuery>,
) -> Result<Json<Value>, ApiError> {
    let details = state
        .voices
        .details(&name, query.lang)
        .map_err(|e| ApiError::voice(e, query.lang, "error_save_failed"))?;
    Ok(Json(json!({
        "markdown": details.markdown,
        "info": details.info,
    })))
}

fn wav_response(path: &std::path::Path) -> Result<Response, ApiError> {
    let bytes = std::fs::read(path).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response())
}

pub async fn voice_audio(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LangQuery>,
) -> Result<Response, ApiError> {
    let path = state.voices.wav_path(&name).ok_or_else(|| {
        ApiError::not_found(i18n::voice_msg(query.lang, "error_voice_not_exist", &name))
    })?;
    wav_response(&path)
}

/// A generated `output_audio_*.wav`; nothing else in the output directory is served.
pub async fn output_audio(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.output_dir.join(&file);
    if !synthesis::is_output_name(&file) || !path.is_file() {
        return Err(ApiError::not_found(format!("no output named '{file}'")));
    }
    wav_response(&path)
}

pub async fn create_voice(
    State(state): State<AppState>,
    Json(body): Json<NewVoiceBody>,
) -> Result<Json<VoiceChange>, ApiError> {
    let lang = body.lang;
    let audio = decode_audio(body.audio_base64.as_deref(), lang)?;
    let info = state
        .voices
        .create(&body.name, audio.as_deref().map(AudioSource::Bytes), &body.ref_text)
        .map_err(|e| ApiError::voice(e, lang, "error_create_failed"))?;
    let message = format!(
        "{}\n\n{}",
        i18n::voice_msg(lang, "success_voice_created", &info.voice),
        alignment_line(&info, lang)
    );
    let selected = Some(info.voice.clone());
    Ok(voice_change(&state, message, Some(info), selected, lang))
}

pub async fn save_preset(
    State(state): State<AppState>,
    Json(body): Json<NewVoiceBody>,
) -> Result<Json<VoiceChange>, ApiError> {
    let lang = body.lang;
    let audio = decode_audio(body.audio_base64.as_deref(), lang)?;
    let info = state
        .voices
        .save_preset(&body.name, audio.as_deref().map(AudioSource::Bytes), &body.ref_text)
        .map_err(|e| ApiError::voice(e, lang, "error_save_failed"))?;
    let message = i18n::voice_msg(lang, "success_voice_created", &info.voice);
    let selected = Some(info.voice.clone());
    Ok(voice_change(&state, message, Some(info), selected, lang))
}

pub async fn update_ref_text(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RefTextBody>,
) -> Result<Json<VoiceChange>, ApiError> {
    let lang = body.lang;
    let info = state
        .voices
        .update_ref_text(&name, &body.ref_text, lang)
        .map_err(|e| ApiError::voice(e, lang, "error_save_failed"))?;
    let message = format!(
        "{}\n\n{}",
        i18n::voice_msg(lang, "success_ref_text_saved", &name),
        alignment_line(&info, lang)
    );
    Ok(voice_change(&state, message, Some(info), Some(name), lang))
}

pub async fn update_audio(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<AudioBody>,
) -> Result<Json<VoiceChange>, ApiError> {
    let lang = body.lang;
    let audio = decode_audio(body.audio_base64.as_deref(), lang)?;
    let info = state
        .voices
        .update_audio(&name, audio.as_deref().map(AudioSource::Bytes))
        .map_err(|e| ApiError::voice(e, lang, "error_update_failed"))?;
    let message = format!(
        "{}\n\n{}\n\n{}",
        i18n::voice_msg(lang, "success_audio_updated", &name),
        alignment_line(&info, lang),
        i18n::t(lang, "warning_check_ref_text")
    );
    Ok(voice_change(&state, message, Some(info), Some(name), lang))
}

pub async fn delete_voice(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<VoiceChange>, ApiError> {
    let lang = query.lang;
    if !query.confirm {
        return Err(ApiError::bad_request(i18n::t(lang, "error_confirm_delete")));
    }
    let selected = state
        .voices
        .delete(&name)
        .map_err(|e| ApiError::voice(e, lang, "error_delete_failed"))?;
    let message = i18n::voice_msg(lang, "success_voice_deleted", &name);
    Ok(voice_change(&state, message, None, selected, lang))
}

pub async fn synthesize(
    State(state): State<AppState>,
    Json(body): Json<SynthesizeBody>,
) -> Result<Json<SynthesizeResponse>, ApiError> {
    let mut request = body.request;
    let lang = request.lang;

    // uploads live in a temporary file for the duration of the request
    let upload = match decode_audio(body.ref_audio_base64.as_deref(), lang)? {
        Some(bytes) => {
            let mut file = tempfile::Builder::new()
                .prefix("upload_")
                .suffix(".wav")
                .tempfile()
                .map_err(|e| ApiError::internal(e.to_string()))?;
            file.write_all(&bytes)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            request.ref_audio = Some(file.path().to_path_buf());
            Some(file)
        }
        None => {
            request.ref_audio = None;
            None
        }
    };

    let (response_tx, response_rx) = oneshot::channel();
    let job = WorkerRequest::Synthesize {
        request,
        upload,
        response_tx,
    };
    if state.worker_tx.send(job).is_err() {
        return Err(ApiError::unavailable("Worker unavailable"));
    }
    let outcome = response_rx
        .await
        .map_err(|_| ApiError::internal("Worker communication failed"))?;

    let audio_url = outcome
        .path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|name| format!("/outputs/{}", name.to_string_lossy()));
    Ok(Json(SynthesizeResponse { outcome, audio_url }))
}
