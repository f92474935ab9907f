//! HTTP control surface for the call
//!
//! - GET /health - Health check
//! - GET /call - Current call snapshot
//! - GET /call/transcript - Transcript of the current call
//! - POST /call/open - Open the call (idempotent)
//! - POST /call/end - End the call (idempotent)
//! - POST /call/mute - Toggle mute
//! - POST /call/text - Send a typed message

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, MuteResponse, SendTextRequest, SendTextResponse};
pub use routes::create_router;
pub use state::AppState;
