//! Capture encoder
//!
//! Microphone (or file) input is downmixed, resampled to the outbound rate,
//! cut into fixed windows and quantized to PCM16 chunks for the transport.

mod encoder;
mod window;

pub use encoder::{CaptureConfig, CaptureEncoder};
pub use window::PcmWindow;
