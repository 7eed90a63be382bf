use super::state::AppState;
use crate::capture::CaptureError;
use crate::session::{ControlError, ParseSlotError, SessionError, SlotKey};
use crate::upload::SubmitError;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Participant age in years
    pub age: u16,
}

#[derive(Debug, Serialize)]
pub struct SubmitAccepted {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClipActionResponse {
    pub digit: u8,
    pub variant: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Full session view: every slot, capture progress, and the upload phase
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

/// POST /session/reset
/// Throw the session away and start a fresh one
pub async fn reset_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.reset().await {
        Ok(()) => {
            let status = state.controller.status().await;
            (
                StatusCode::OK,
                Json(ResetResponse {
                    session_id: status.session_id,
                    status: "reset".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// POST /session/clips/:digit/:variant/record
/// Start a capture attempt for one slot
pub async fn start_clip(
    State(state): State<AppState>,
    Path((digit, variant)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match parse_slot(&digit, &variant) {
        Ok(key) => key,
        Err(e) => return unknown_slot(&e).into_response(),
    };

    info!("Record requested for slot {}", key);

    match state.controller.start_record(key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ClipActionResponse {
                digit: key.digit.value(),
                variant: key.variant.to_string(),
                status: "recording".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start recording slot {}: {}", key, e);
            error_response(&e).into_response()
        }
    }
}

/// POST /session/clips/:digit/:variant/stop
/// End the slot's attempt ahead of the ceiling.
///
/// The clip lands asynchronously; poll GET /session for the settled slot.
pub async fn stop_clip(
    State(state): State<AppState>,
    Path((digit, variant)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match parse_slot(&digit, &variant) {
        Ok(key) => key,
        Err(e) => return unknown_slot(&e).into_response(),
    };

    match state.controller.stop_record(key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ClipActionResponse {
                digit: key.digit.value(),
                variant: key.variant.to_string(),
                status: "stopping".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// GET /session/clips/:digit/:variant/preview
/// Captured clip audio for playback in the collection UI
pub async fn preview_clip(
    State(state): State<AppState>,
    Path((digit, variant)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match parse_slot(&digit, &variant) {
        Ok(key) => key,
        Err(e) => return unknown_slot(&e).into_response(),
    };

    match state.controller.clip_payload(key).await {
        Some((payload, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], payload).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no clip captured for slot {}", key),
            }),
        )
            .into_response(),
    }
}

/// POST /session/submit
/// Validate the session and start uploading it.
///
/// Returns 202 once uploads begin; GET /session reports progress and the
/// terminal outcome.
pub async fn submit_session(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    info!("Submission requested (age {})", req.age);

    match state.controller.submit(req.age).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SubmitAccepted {
                status: "uploading".to_string(),
                message: "Submission accepted; uploads running".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Submission rejected: {}", e);
            error_response(&e).into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_slot(digit: &str, variant: &str) -> Result<SlotKey, ParseSlotError> {
    Ok(SlotKey::new(digit.parse()?, variant.parse()?))
}

fn unknown_slot(e: &ParseSlotError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn error_response(e: &ControlError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        ControlError::Session(SessionError::AlreadyRecording { .. })
        | ControlError::Session(SessionError::NotRecording { .. })
        | ControlError::Session(SessionError::SubmissionInProgress) => StatusCode::CONFLICT,
        ControlError::Capture(CaptureError::DeviceUnavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ControlError::Submit(SubmitError::Incomplete { .. }) => StatusCode::CONFLICT,
        ControlError::Submit(SubmitError::InvalidMetadata { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}
