/// CPAL microphone backend and WAV encoding
pub mod capture;
/// Capture session lifecycle
pub mod session;

pub use capture::CpalBackend;
pub use session::{ActiveCapture, Artifact, AudioBackend, CaptureError, CaptureFormat, CaptureSession};
