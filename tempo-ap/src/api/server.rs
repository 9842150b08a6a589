//! HTTP server setup and routing
//!
//! Sets up the axum router for the control endpoints and the SSE stream.

use crate::equalizer::SharedEqualizer;
use crate::error::{Error, Result};
use crate::playback::SessionHandle;
use crate::visualizer::VisualizerSampler;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempo_common::events::EventBus;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
///
/// Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct AppContext {
    pub session: SessionHandle,
    pub equalizer: SharedEqualizer,
    pub visualizer: Arc<Mutex<VisualizerSampler>>,
    pub bus: EventBus,
}

/// Build the router with every route attached
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Playback
        .route("/playback/status", get(super::handlers::get_status))
        .route("/playback/play", post(super::handlers::play_track))
        .route("/playback/queue/play", post(super::handlers::play_from_queue))
        .route("/playback/toggle", post(super::handlers::toggle_play_pause))
        .route("/playback/next", post(super::handlers::next))
        .route("/playback/previous", post(super::handlers::previous))
        .route("/playback/seek", post(super::handlers::seek))
        .route("/playback/volume", post(super::handlers::set_volume))
        .route("/playback/speed", post(super::handlers::set_speed))
        .route("/playback/shuffle", post(super::handlers::toggle_shuffle))
        .route("/playback/repeat", post(super::handlers::cycle_repeat))
        .route("/playback/queue/reorder", post(super::handlers::reorder_queue))
        .route("/playback/queue/:track_id", delete(super::handlers::remove_from_queue))
        // Equalizer
        .route("/equalizer", get(super::handlers::get_equalizer))
        .route("/equalizer/presets", get(super::handlers::list_presets))
        .route("/equalizer/band", post(super::handlers::set_band))
        .route("/equalizer/preset", post(super::handlers::apply_preset))
        .route("/equalizer/enabled", post(super::handlers::set_equalizer_enabled))
        .route("/equalizer/reset", post(super::handlers::reset_equalizer))
        // Visualizer
        .route("/visualizer/frame", get(super::handlers::get_visual_frame))
        .route("/visualizer/enabled", post(super::handlers::set_visualizer_enabled))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run<F>(ctx: AppContext, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(ctx);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
