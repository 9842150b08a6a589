//! HTTP request handlers
//!
//! Thin adapters: each playback handler forwards one operation to the
//! session task and maps its error to a status code.

use crate::api::server::AppContext;
use crate::catalog::TrackId;
use crate::equalizer::{presets, EqualizerSettings};
use crate::error::Error;
use crate::playback::{SessionOp, SessionStatus};
use crate::visualizer::VisualFrame;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayTrackRequest {
    track_id: TrackId,
    #[serde(default)]
    playlist_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PlayFromQueueRequest {
    track_id: TrackId,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Seconds from the start of the track
    position: f64,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// 0.0-1.0; clamped by the session
    volume: f32,
}

#[derive(Debug, Deserialize)]
pub struct SpeedRequest {
    speed: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
pub struct BandRequest {
    index: usize,
    gain_db: f32,
}

#[derive(Debug, Serialize)]
pub struct BandResponse {
    index: usize,
    gain_db: f32,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct PresetInfo {
    name: &'static str,
    gains_db: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct VisualFrameResponse {
    enabled: bool,
    fps: u32,
    frame: VisualFrame,
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = std::result::Result<T, ApiError>;

fn api_error(e: Error) -> ApiError {
    let code = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Queue(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Request failed ({}): {}", code, e);
    (
        code,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

/// Forward one operation and answer with the resulting status
async fn apply(ctx: &AppContext, op: SessionOp) -> ApiResult<Json<SessionStatus>> {
    ctx.session.request(op).await.map_err(api_error)?;
    Ok(Json(ctx.session.status()))
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "tempo-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Playback
// ============================================================================

/// GET /playback/status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<SessionStatus> {
    Json(ctx.session.status())
}

/// POST /playback/play
pub async fn play_track(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayTrackRequest>,
) -> ApiResult<Json<SessionStatus>> {
    info!(track_id = %req.track_id, "Play track request");
    apply(
        &ctx,
        SessionOp::PlayTrack {
            track_id: req.track_id,
            playlist_id: req.playlist_id,
        },
    )
    .await
}

/// POST /playback/queue/play
pub async fn play_from_queue(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayFromQueueRequest>,
) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::PlayFromQueue { track_id: req.track_id }).await
}

/// POST /playback/toggle
pub async fn toggle_play_pause(State(ctx): State<AppContext>) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::TogglePlayPause).await
}

/// POST /playback/next
pub async fn next(State(ctx): State<AppContext>) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::Next).await
}

/// POST /playback/previous
pub async fn previous(State(ctx): State<AppContext>) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::Previous).await
}

/// POST /playback/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> ApiResult<Json<SessionStatus>> {
    if !req.position.is_finite() {
        return Err(api_error(Error::Config(format!(
            "seek position {} is not a number",
            req.position
        ))));
    }
    apply(&ctx, SessionOp::Seek { position_secs: req.position }).await
}

/// POST /playback/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::SetVolume { volume: req.volume }).await
}

/// POST /playback/speed
pub async fn set_speed(
    State(ctx): State<AppContext>,
    Json(req): Json<SpeedRequest>,
) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::SetSpeed { speed: req.speed }).await
}

/// POST /playback/shuffle
pub async fn toggle_shuffle(State(ctx): State<AppContext>) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::ToggleShuffle).await
}

/// POST /playback/repeat
pub async fn cycle_repeat(State(ctx): State<AppContext>) -> ApiResult<Json<SessionStatus>> {
    apply(&ctx, SessionOp::CycleRepeat).await
}

/// DELETE /playback/queue/:track_id
pub async fn remove_from_queue(
    State(ctx): State<AppContext>,
    Path(track_id): Path<TrackId>,
) -> ApiResult<Json<SessionStatus>> {
    info!(track_id = %track_id, "Remove from queue request");
    apply(&ctx, SessionOp::RemoveFromQueue { track_id }).await
}

/// POST /playback/queue/reorder
pub async fn reorder_queue(
    State(ctx): State<AppContext>,
    Json(req): Json<ReorderRequest>,
) -> ApiResult<Json<SessionStatus>> {
    apply(
        &ctx,
        SessionOp::ReorderQueue {
            from: req.from,
            to: req.to,
        },
    )
    .await
}

// ============================================================================
// Equalizer
// ============================================================================

/// GET /equalizer
pub async fn get_equalizer(State(ctx): State<AppContext>) -> Json<EqualizerSettings> {
    let eq = ctx.equalizer.lock().unwrap_or_else(|e| e.into_inner());
    Json(eq.settings().clone())
}

/// GET /equalizer/presets
pub async fn list_presets() -> Json<Vec<PresetInfo>> {
    Json(
        presets::all()
            .iter()
            .map(|p| PresetInfo {
                name: p.name,
                gains_db: p.gains.to_vec(),
            })
            .collect(),
    )
}

/// POST /equalizer/band
pub async fn set_band(
    State(ctx): State<AppContext>,
    Json(req): Json<BandRequest>,
) -> ApiResult<Json<BandResponse>> {
    let mut eq = ctx.equalizer.lock().unwrap_or_else(|e| e.into_inner());
    let gain_db = eq.set_band_gain(req.index, req.gain_db).map_err(api_error)?;
    Ok(Json(BandResponse {
        index: req.index,
        gain_db,
    }))
}

/// POST /equalizer/preset
pub async fn apply_preset(
    State(ctx): State<AppContext>,
    Json(req): Json<PresetRequest>,
) -> ApiResult<Json<EqualizerSettings>> {
    let mut eq = ctx.equalizer.lock().unwrap_or_else(|e| e.into_inner());
    eq.apply_preset(&req.name).map_err(api_error)?;
    Ok(Json(eq.settings().clone()))
}

/// POST /equalizer/enabled
pub async fn set_equalizer_enabled(
    State(ctx): State<AppContext>,
    Json(req): Json<EnabledRequest>,
) -> Json<EqualizerSettings> {
    let mut eq = ctx.equalizer.lock().unwrap_or_else(|e| e.into_inner());
    eq.set_enabled(req.enabled);
    Json(eq.settings().clone())
}

/// POST /equalizer/reset
pub async fn reset_equalizer(
    State(ctx): State<AppContext>,
) -> ApiResult<Json<EqualizerSettings>> {
    let mut eq = ctx.equalizer.lock().unwrap_or_else(|e| e.into_inner());
    eq.reset().map_err(api_error)?;
    Ok(Json(eq.settings().clone()))
}

// ============================================================================
// Visualizer
// ============================================================================

fn visual_frame(ctx: &AppContext) -> VisualFrameResponse {
    let sampler = ctx.visualizer.lock().unwrap_or_else(|e| e.into_inner());
    VisualFrameResponse {
        enabled: sampler.is_running(),
        fps: sampler.fps(),
        frame: sampler.latest(),
    }
}

/// GET /visualizer/frame
pub async fn get_visual_frame(State(ctx): State<AppContext>) -> Json<VisualFrameResponse> {
    Json(visual_frame(&ctx))
}

/// POST /visualizer/enabled
pub async fn set_visualizer_enabled(
    State(ctx): State<AppContext>,
    Json(req): Json<EnabledRequest>,
) -> Json<VisualFrameResponse> {
    {
        let mut sampler = ctx.visualizer.lock().unwrap_or_else(|e| e.into_inner());
        sampler.set_enabled(req.enabled);
    }
    info!(enabled = req.enabled, "Visualizer toggled");
    Json(visual_frame(&ctx))
}
