//! Capture control endpoints.
//!
//! Thin translation layer between HTTP and the supervisor: state-machine
//! rejections become stable 400-class error objects, start failures become
//! 500s, diagnostic detail stays in the server log.

use crate::capture::CaptureError;
use crate::config::CaptureMode;
use crate::output;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(home))
        .route("/start", post(start_capture))
        .route("/stop", post(stop_capture))
        .route("/status", get(capture_status))
        .route("/image", get(latest_image))
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn capture_error(err: CaptureError) -> ApiError {
    let status = if err.is_invalid_state() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": err.to_string() })))
}

async fn start_capture(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.supervisor.start().map_err(capture_error)?;

    let message = match ctx.config.capture.mode {
        CaptureMode::Stream => "Stream started.",
        CaptureMode::Snapshot => "Snapshot capture started.",
    };
    Ok(Json(json!({ "message": message })))
}

async fn stop_capture(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.supervisor.stop().map_err(capture_error)?;
    Ok(Json(json!({ "message": "Capture stopped." })))
}

async fn capture_status(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({ "status": ctx.supervisor.status() }))
}

/// Minimal player page embedding hls.js pointed at the manifest.
async fn home(State(ctx): State<AppContext>) -> Result<Html<String>, ApiError> {
    let Some(host) = ctx.config.server.public_host.as_deref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "public host not configured" })),
        ));
    };

    let manifest_url = format!(
        "http://{}:{}/hls/{}",
        host,
        ctx.config.server.port,
        output::MANIFEST_NAME
    );
    Ok(Html(player_page(&manifest_url)))
}

async fn latest_image(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let path = ctx.supervisor.output().snapshot_path();

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(bytes))
            .unwrap()),
        Err(_) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no image available yet" })),
        )),
    }
}

fn player_page(manifest_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>camserve</title>
  </head>
  <body>
    <video id="video" controls autoplay></video>
    <script src="https://cdn.jsdelivr.net/npm/hls.js@latest"></script>
    <script>
      const video = document.getElementById("video");
      if (Hls.isSupported()) {{
        const hls = new Hls();
        hls.loadSource("{manifest_url}");
        hls.attachMedia(video);
        hls.on(Hls.Events.MANIFEST_PARSED, function() {{
          video.play();
        }});
      }} else if (video.canPlayType("application/vnd.apple.mpegurl")) {{
        video.src = "{manifest_url}";
      }}
    </script>
  </body>
</html>
"#
    )
}
