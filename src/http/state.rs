use crate::call::CallHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The call this service controls
    pub call: CallHandle,
    /// Whether `POST /call/mute` has any effect
    pub mute_enabled: bool,
}

impl AppState {
    pub fn new(call: CallHandle, mute_enabled: bool) -> Self {
        Self { call, mute_enabled }
    }
}
