use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Fixed PCM capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per linear PCM sample
    pub bits_per_sample: u16,
}

impl CaptureFormat {
    /// Single channel, 16-bit linear PCM, 44.1 kHz
    pub const PCM16_MONO_44K: Self = Self {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
    };

    /// Playback length of `frames` frames in this format
    #[must_use]
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let rate = u64::from(self.sample_rate);
        let whole = frames / rate;
        let rest = frames % rate;
        Duration::from_secs(whole) + Duration::from_nanos(rest * 1_000_000_000 / rate)
    }
}

/// Completed recording, handed to whoever decides its fate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location of the finalized recording
    pub path: PathBuf,
    /// Recorded length
    pub duration: Duration,
    /// Number of frames written
    pub frames: u64,
    /// Encoding of the artifact
    pub format: CaptureFormat,
}

/// Errors raised by capture start/stop
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Input device could not be opened or activated
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Destination artifact could not be created or written
    #[error("capture destination {}: {source}", path.display())]
    Io {
        /// Artifact path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// PCM encoding failed while finalizing
    #[error("failed to encode capture artifact: {0}")]
    Encode(#[from] hound::Error),

    /// Capture worker died or stopped responding
    #[error("capture worker failed: {0}")]
    Worker(String),
}

/// Audio backend able to open a fixed-format PCM stream to a destination
///
/// The returned capture holds the device until `finish` consumes it.
#[cfg_attr(test, mockall::automock)]
pub trait AudioBackend: Send + Sync {
    /// Open the input device and start writing to `destination`
    ///
    /// # Errors
    /// Returns `DeviceUnavailable` if the device cannot be opened and `Io` if
    /// the destination cannot be created. No device is held on error.
    fn open(
        &self,
        format: CaptureFormat,
        destination: &Path,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError>;
}

/// An open recording stream plus its destination
pub trait ActiveCapture: Send {
    /// Finalize the artifact and release the device
    ///
    /// # Errors
    /// Returns error if the artifact cannot be finalized. The device is
    /// released either way.
    fn finish(self: Box<Self>) -> Result<Artifact, CaptureError>;
}

/// Owns the capture handle for the Recording interval
///
/// Start and stop are serialized on one lock, which is held while the device
/// opens and while the artifact is finalized, so the device is never opened
/// twice and concurrent stops coalesce.
pub struct CaptureSession {
    backend: Box<dyn AudioBackend>,
    destination: PathBuf,
    active: Mutex<Option<Box<dyn ActiveCapture>>>,
}

impl CaptureSession {
    /// Create an idle session that records to `destination`
    ///
    /// Every capture overwrites the previous artifact at that path.
    pub fn new(backend: Box<dyn AudioBackend>, destination: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            destination: destination.into(),
            active: Mutex::new(None),
        }
    }

    /// Where artifacts are written
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Whether a capture is currently open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Start capturing; a no-op if already active
    ///
    /// # Errors
    /// Returns `DeviceUnavailable` or `Io` from the backend; the session stays idle
    pub fn start(&self) -> Result<(), CaptureError> {
        let _span = tracing::debug_span!("capture_start").entered();
        let mut active = self.lock();
        if active.is_some() {
            debug!("start while capturing (ignored)");
            return Ok(());
        }

        let started = std::time::Instant::now();
        let capture = self
            .backend
            .open(CaptureFormat::PCM16_MONO_44K, &self.destination)?;
        *active = Some(capture);

        info!(
            path = %self.destination.display(),
            latency_us = started.elapsed().as_micros(),
            "capture started"
        );
        Ok(())
    }

    /// Stop capturing and hand back the finalized artifact
    ///
    /// Returns `Ok(None)` if nothing was being captured. Safe to call from
    /// any thread; of several concurrent calls only one finalizes.
    ///
    /// # Errors
    /// Returns error if finalizing fails; the device is released regardless
    pub fn stop(&self) -> Result<Option<Artifact>, CaptureError> {
        let _span = tracing::debug_span!("capture_stop").entered();
        let mut active = self.lock();
        let Some(capture) = active.take() else {
            debug!("stop while idle (ignored)");
            return Ok(None);
        };

        let started = std::time::Instant::now();
        let artifact = capture.finish()?;

        info!(
            path = %artifact.path.display(),
            duration_ms = artifact.duration.as_millis(),
            frames = artifact.frames,
            finalize_ms = started.elapsed().as_millis(),
            "capture finalized"
        );
        Ok(Some(artifact))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn ActiveCapture>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(capture) = active {
            if let Err(e) = capture.finish() {
                tracing::warn!(error = %e, "failed to finalize capture on drop");
            }
        }
    }
}
