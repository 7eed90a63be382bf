//! HTTP API server for the collection UI
//!
//! This module provides a REST API for driving a collection session:
//! - GET /session - Session status: slots, progress, upload phase
//! - POST /session/reset - Start a fresh session
//! - POST /session/clips/:digit/:variant/record - Start a capture attempt
//! - POST /session/clips/:digit/:variant/stop - End the attempt early
//! - GET /session/clips/:digit/:variant/preview - Play back a captured clip
//! - POST /session/submit - Upload the completed session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
