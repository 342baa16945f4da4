use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use hound::{WavSpec, WavWriter};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::{ActiveCapture, Artifact, AudioBackend, CaptureError, CaptureFormat};

/// How long `open` waits for the device before giving up
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Seconds of device audio the ring buffer can hold between drains
const RING_BUFFER_SECS: usize = 2;

/// Interval at which the capture thread drains the ring buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

type ArtifactWriter = WavWriter<BufWriter<File>>;

/// Open input stream as seen by the capture thread
trait DeviceInput {
    fn channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    /// Move everything the device delivered so far into `samples`
    fn drain(&mut self, samples: &mut Vec<f32>);
    /// Close the stream, release the device and collect the tail
    fn release(self: Box<Self>, samples: &mut Vec<f32>);
}

/// Opens the input device; runs on the capture thread
type DeviceOpener = dyn Fn() -> Result<Box<dyn DeviceInput>, CaptureError> + Send + Sync;

/// Microphone capture through CPAL, encoded as WAV with hound
///
/// CPAL streams are not `Send`, so each capture runs on its own thread that
/// owns the stream from open to release; the returned handle only carries a
/// stop signal and the thread's join handle.
///
/// Audio is written to a per-attempt partial file next to the destination
/// and renamed over it only when a capture finishes. A thread whose open
/// timed out never touches the destination, and the next `open` waits for it
/// to release the device.
pub struct CpalBackend {
    open_timeout: Duration,
    opener: Arc<DeviceOpener>,
    /// Closed when the capture thread of a timed-out open exits
    abandoned: Mutex<Option<mpsc::Receiver<()>>>,
}

impl CpalBackend {
    /// Backend using the default input device
    #[must_use]
    pub fn new() -> Self {
        Self::from_opener(Arc::new(|| open_cpal_input(None)))
    }

    /// Prefer the first input device whose name contains `name`
    /// (case-insensitive), falling back to the default device
    #[must_use]
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.opener = Arc::new(move || open_cpal_input(Some(&name)));
        self
    }

    /// Override how long `open` waits for the device
    #[must_use]
    pub const fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    fn from_opener(opener: Arc<DeviceOpener>) -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            opener,
            abandoned: Mutex::new(None),
        }
    }

    fn lock_abandoned(&self) -> MutexGuard<'_, Option<mpsc::Receiver<()>>> {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a capture thread left behind by a timed-out open
    fn wait_for_abandoned(&self) -> Result<(), CaptureError> {
        let mut abandoned = self.lock_abandoned();
        let Some(exited) = abandoned.take() else {
            return Ok(());
        };

        match exited.recv_timeout(self.open_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                *abandoned = Some(exited);
                Err(CaptureError::DeviceUnavailable(
                    "previous device open has not released the device".to_owned(),
                ))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("abandoned capture thread exited");
                Ok(())
            }
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        format: CaptureFormat,
        destination: &Path,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        self.wait_for_abandoned()?;

        let partial = partial_path(destination);
        let writer = create_destination(&partial, format)?;
        let pending = PendingArtifact {
            writer,
            partial: partial.clone(),
            target: destination.to_path_buf(),
        };

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let opener = Arc::clone(&self.opener);

        let worker = std::thread::Builder::new()
            .name("audio-capture".to_owned())
            .spawn(move || {
                // Dropped when the thread ends
                let _exit = exit_tx;
                run_capture(opener.as_ref(), format, pending, &ready_tx, &stop_rx)
            })
            .map_err(|e| {
                remove_partial(&partial);
                CaptureError::Worker(format!("failed to spawn capture thread: {e}"))
            })?;

        match ready_rx.recv_timeout(self.open_timeout) {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                stop: stop_tx,
                worker,
            })),
            Ok(Err(e)) => {
                // Thread has already dropped the stream and its partial file
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                // Disconnecting stop makes the thread discard its partial file
                // and release the device as soon as its open completes
                drop(stop_tx);
                *self.lock_abandoned() = Some(exit_rx);
                Err(CaptureError::DeviceUnavailable(format!(
                    "device did not open within {} ms",
                    self.open_timeout.as_millis()
                )))
            }
        }
    }
}

/// Running CPAL capture
struct CpalCapture {
    stop: mpsc::Sender<()>,
    worker: JoinHandle<Result<Artifact, CaptureError>>,
}

impl ActiveCapture for CpalCapture {
    fn finish(self: Box<Self>) -> Result<Artifact, CaptureError> {
        let Self { stop, worker } = *self;
        let _ = stop.send(());
        worker
            .join()
            .map_err(|_| CaptureError::Worker("capture thread panicked".to_owned()))?
    }
}

/// Writer for one capture attempt and where it lands on success
struct PendingArtifact {
    writer: ArtifactWriter,
    partial: PathBuf,
    target: PathBuf,
}

impl PendingArtifact {
    /// Finalize the partial file and move it over the destination
    fn commit(self, samples: &[f32], format: CaptureFormat) -> Result<Artifact, CaptureError> {
        let Self {
            writer,
            partial,
            target,
        } = self;

        let artifact = match write_artifact(writer, samples, target.clone(), format) {
            Ok(artifact) => artifact,
            Err(e) => {
                remove_partial(&partial);
                return Err(e);
            }
        };

        fs::rename(&partial, &target).map_err(|source| {
            remove_partial(&partial);
            CaptureError::Io {
                path: target,
                source,
            }
        })?;
        Ok(artifact)
    }

    /// Drop the attempt without touching the destination
    fn discard(self) {
        let Self { writer, partial, .. } = self;
        drop(writer);
        remove_partial(&partial);
    }
}

fn remove_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %partial.display(), error = %e, "failed to remove partial capture");
        }
    }
}

/// Hidden sibling of `destination`, unique per capture attempt
fn partial_path(destination: &Path) -> PathBuf {
    static ATTEMPTS: AtomicU64 = AtomicU64::new(0);
    let attempt = ATTEMPTS.fetch_add(1, Ordering::Relaxed);
    let name = destination
        .file_name()
        .map_or_else(|| "capture".to_owned(), |n| n.to_string_lossy().into_owned());
    destination.with_file_name(format!(".{name}.{}-{attempt}.part", std::process::id()))
}

fn run_capture(
    opener: &DeviceOpener,
    format: CaptureFormat,
    pending: PendingArtifact,
    ready: &mpsc::SyncSender<Result<(), CaptureError>>,
    stop: &mpsc::Receiver<()>,
) -> Result<Artifact, CaptureError> {
    let mut input = match opener() {
        Ok(input) => input,
        Err(e) => {
            pending.discard();
            let message = e.to_string();
            let _ = ready.send(Err(e));
            return Err(CaptureError::DeviceUnavailable(message));
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!("open abandoned by caller, releasing device");
    }

    // Only an explicit stop keeps the recording; a disconnect means the
    // caller gave up on this attempt
    let mut samples = Vec::new();
    let stopped = loop {
        match stop.recv_timeout(DRAIN_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => input.drain(&mut samples),
            Ok(()) => break true,
            Err(RecvTimeoutError::Disconnected) => break false,
        }
    };

    let channels = input.channels();
    let sample_rate = input.sample_rate();
    input.release(&mut samples);
    info!(samples = samples.len(), "input device released");

    if !stopped {
        pending.discard();
        return Err(CaptureError::DeviceUnavailable(
            "capture abandoned before it started".to_owned(),
        ));
    }

    let converted = convert_to_mono(&samples, channels, sample_rate, format.sample_rate);
    pending.commit(&converted, format)
}

/// CPAL stream plus the consumer side of its ring buffer
struct CpalInput {
    /// Kept alive until release; dropping it closes the device
    stream: cpal::Stream,
    consumer: HeapCons<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DeviceInput for CpalInput {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain(&mut self, samples: &mut Vec<f32>) {
        while let Some(sample) = self.consumer.try_pop() {
            samples.push(sample);
        }
    }

    fn release(self: Box<Self>, samples: &mut Vec<f32>) {
        let Self {
            stream,
            mut consumer,
            ..
        } = *self;
        if let Err(e) = stream.pause() {
            debug!(error = %e, "failed to pause stream before release");
        }
        drop(stream);
        while let Some(sample) = consumer.try_pop() {
            samples.push(sample);
        }
    }
}

/// Whether a device called `candidate` satisfies the configured `wanted` name
fn device_name_matches(candidate: &str, wanted: &str) -> bool {
    candidate.to_lowercase().contains(&wanted.to_lowercase())
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

fn select_input_device(
    host: &cpal::Host,
    wanted: Option<&str>,
) -> Result<cpal::Device, CaptureError> {
    if let Some(wanted) = wanted {
        match host.input_devices() {
            Ok(devices) => {
                for device in devices {
                    if let Some(name) = device_name(&device) {
                        if device_name_matches(&name, wanted) {
                            info!(device = %name, "using configured input device");
                            return Ok(device);
                        }
                    }
                }
                warn!(device = wanted, "configured input device not found, using default");
            }
            Err(e) => {
                warn!(error = %e, "failed to enumerate input devices, using default");
            }
        }
    }

    host.default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no input device available".to_owned()))
}

fn open_cpal_input(wanted: Option<&str>) -> Result<Box<dyn DeviceInput>, CaptureError> {
    let host = cpal::default_host();
    let device = select_input_device(&host, wanted)?;

    let supported_config = device.default_input_config().map_err(|e| {
        CaptureError::DeviceUnavailable(format!("failed to get default input config: {e}"))
    })?;
    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate;
    let channels = config.channels;

    info!(
        device_id = ?device.id(),
        sample_rate,
        channels,
        ?sample_format,
        "opening input device"
    );

    let capacity = (sample_rate as usize) * (channels as usize) * RING_BUFFER_SECS;
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, producer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, producer),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, producer),
        other => Err(CaptureError::DeviceUnavailable(format!(
            "unsupported sample format: {other:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to start stream: {e}")))?;

    Ok(Box::new(CpalInput {
        stream,
        consumer,
        sample_rate,
        channels,
    }))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<f32>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut dropped = 0_usize;
                for &sample in data {
                    if producer.try_push(f32::from_sample(sample)).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    warn!(dropped, "ring buffer full, dropping samples");
                }
            },
            move |err| {
                warn!(error = %err, "audio stream error");
            },
            None,
        )
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to build input stream: {e}")))
}

/// Create (or overwrite) the artifact file for `format`
///
/// # Errors
/// Returns `Io` if the parent directory or file cannot be created
pub fn create_destination(
    path: &Path,
    format: CaptureFormat,
) -> Result<ArtifactWriter, CaptureError> {
    let io_error = |source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    WavWriter::create(path, spec).map_err(|e| match e {
        hound::Error::IoError(source) => io_error(source),
        other => CaptureError::Encode(other),
    })
}

/// Encode mono samples as 16-bit PCM and finalize the artifact
///
/// # Errors
/// Returns error if a sample cannot be written or the header cannot be finalized
pub fn write_artifact(
    mut writer: ArtifactWriter,
    samples: &[f32],
    path: PathBuf,
    format: CaptureFormat,
) -> Result<Artifact, CaptureError> {
    let _span = tracing::debug_span!("write_artifact").entered();
    for &sample in samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    writer.finalize()?;

    let frames = samples.len() as u64;
    let artifact = Artifact {
        path,
        duration: format.duration_of(frames),
        frames,
        format,
    };
    debug!(
        path = %artifact.path.display(),
        frames,
        "artifact written"
    );
    Ok(artifact)
}

fn to_pcm16(sample: f32) -> i16 {
    // Clamped to [-1, 1] first, so the product fits in i16
    #[allow(clippy::cast_possible_truncation)]
    {
        (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
    }
}

/// Downmix interleaved device audio to mono and resample to `target_rate`
#[must_use]
pub fn convert_to_mono(
    samples: &[f32],
    channels: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let _span = tracing::debug_span!("convert_to_mono").entered();
    let start_total = std::time::Instant::now();

    let mono_samples = if channels <= 1 {
        samples.to_vec()
    } else {
        // Average channels (simple downmix)
        let channels_f64 = f64::from(channels);
        samples
            .chunks(channels as usize)
            .map(|frame| {
                let sum_f64: f64 = frame.iter().map(|&s| f64::from(s)).sum();
                #[allow(clippy::cast_possible_truncation)]
                {
                    (sum_f64 / channels_f64) as f32
                }
            })
            .collect()
    };

    if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
        return mono_samples;
    }

    // Linear interpolation; needs f64 <-> usize conversions for fractional indices
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let resampled = {
        let ratio = f64::from(source_rate) / f64::from(target_rate);

        let output_len_f64 = (mono_samples.len() as f64) / ratio;
        let output_len = if output_len_f64.is_finite() && output_len_f64 >= 0.0 {
            output_len_f64.ceil() as usize
        } else {
            mono_samples.len()
        };

        let mut resampled = Vec::with_capacity(output_len);
        for i in 0..output_len {
            let src_idx_f64 = (i as f64) * ratio;
            let src_idx_floor = src_idx_f64.floor() as usize;
            let src_idx_ceil = (src_idx_floor + 1).min(mono_samples.len().saturating_sub(1));
            let fract = src_idx_f64 - src_idx_f64.floor();

            let sample = if src_idx_floor < mono_samples.len() {
                let s1 = f64::from(mono_samples[src_idx_floor]);
                let s2 = f64::from(mono_samples[src_idx_ceil]);
                s1.mul_add(1.0 - fract, s2 * fract) as f32
            } else {
                0.0_f32
            };
            resampled.push(sample);
        }
        resampled
    };

    debug!(
        source_rate,
        target_rate,
        input_samples = mono_samples.len(),
        output_samples = resampled.len(),
        total_us = start_total.elapsed().as_micros(),
        "resampling completed"
    );

    resampled
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // Test assertions with known exact values
mod tests {
    use super::*;
    use crate::audio::CaptureSession;
    use std::sync::atomic::AtomicUsize;

    const TARGET: u32 = 44_100;

    /// One second of mono audio at the capture rate, delivered on release
    struct FakeInput {
        pending: Vec<f32>,
        live: Arc<AtomicUsize>,
    }

    impl DeviceInput for FakeInput {
        fn channels(&self) -> u16 {
            1
        }

        fn sample_rate(&self) -> u32 {
            TARGET
        }

        fn drain(&mut self, samples: &mut Vec<f32>) {
            samples.append(&mut self.pending);
        }

        fn release(mut self: Box<Self>, samples: &mut Vec<f32>) {
            samples.append(&mut self.pending);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Backend whose device takes `delay_ms` to open; `live` counts open devices
    fn slow_backend(
        delay_ms: &Arc<AtomicU64>,
        live: &Arc<AtomicUsize>,
        open_timeout: Duration,
    ) -> CpalBackend {
        let delay_ms = Arc::clone(delay_ms);
        let live = Arc::clone(live);
        CpalBackend::from_opener(Arc::new(move || -> Result<Box<dyn DeviceInput>, CaptureError> {
            std::thread::sleep(Duration::from_millis(delay_ms.load(Ordering::SeqCst)));
            live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeInput {
                pending: vec![0.25; 44_100],
                live: Arc::clone(&live),
            }))
        }))
        .with_open_timeout(open_timeout)
    }

    fn frames_in(path: &Path) -> u32 {
        hound::WavReader::open(path).unwrap().len()
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_open_and_finish_with_injected_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let live = Arc::new(AtomicUsize::new(0));
        let backend = slow_backend(&Arc::new(AtomicU64::new(0)), &live, DEFAULT_OPEN_TIMEOUT);

        let capture = backend.open(CaptureFormat::PCM16_MONO_44K, &path).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        // Nothing lands on the destination until the capture finishes
        assert!(!path.exists());

        let artifact = capture.finish().unwrap();
        assert_eq!(artifact.path, path);
        assert_eq!(artifact.frames, 44_100);
        assert_eq!(frames_in(&path), 44_100);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_timed_out_open_does_not_clobber_next_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let delay_ms = Arc::new(AtomicU64::new(800));
        let live = Arc::new(AtomicUsize::new(0));
        let backend = slow_backend(&delay_ms, &live, Duration::from_millis(500));

        let result = backend.open(CaptureFormat::PCM16_MONO_44K, &path);
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));

        // Next open waits for the late device to be released first
        delay_ms.store(0, Ordering::SeqCst);
        let capture = backend.open(CaptureFormat::PCM16_MONO_44K, &path).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let artifact = capture.finish().unwrap();
        assert_eq!(artifact.frames, 44_100);
        assert_eq!(frames_in(&path), 44_100);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_timed_out_open_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let delay_ms = Arc::new(AtomicU64::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let backend = slow_backend(&delay_ms, &live, Duration::from_millis(200));

        let capture = backend.open(CaptureFormat::PCM16_MONO_44K, &path).unwrap();
        capture.finish().unwrap();

        delay_ms.store(400, Ordering::SeqCst);
        assert!(backend.open(CaptureFormat::PCM16_MONO_44K, &path).is_err());

        // Let the abandoned thread open, release and clean up
        std::thread::sleep(Duration::from_millis(800));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(frames_in(&path), 44_100);
        assert_eq!(entries(dir.path()), 1);
    }

    #[test]
    fn test_open_refused_while_abandoned_device_still_opening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let delay_ms = Arc::new(AtomicU64::new(1_500));
        let live = Arc::new(AtomicUsize::new(0));
        let backend = slow_backend(&delay_ms, &live, Duration::from_millis(200));

        assert!(backend.open(CaptureFormat::PCM16_MONO_44K, &path).is_err());
        let second = backend.open(CaptureFormat::PCM16_MONO_44K, &path);
        assert!(matches!(second, Err(CaptureError::DeviceUnavailable(_))));
        assert_eq!(live.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(1_500));
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_device_open_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let backend =
            CpalBackend::from_opener(Arc::new(|| -> Result<Box<dyn DeviceInput>, CaptureError> {
                Err(CaptureError::DeviceUnavailable("device busy".to_owned()))
            }));

        let result = backend.open(CaptureFormat::PCM16_MONO_44K, &path);
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_partial_paths_are_unique_siblings() {
        let destination = Path::new("/var/tmp/ptt/latest.wav");
        let first = partial_path(destination);
        let second = partial_path(destination);
        assert_ne!(first, second);
        assert_eq!(first.parent(), destination.parent());
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".latest.wav."));
    }

    #[test]
    fn test_device_name_matches_case_insensitive_substring() {
        assert!(device_name_matches("BlackHole 2ch", "blackhole"));
        assert!(device_name_matches("MacBook Pro Microphone", "Microphone"));
        assert!(!device_name_matches("Soundflower (2ch)", "BlackHole"));
    }

    #[test]
    fn test_stereo_to_mono_conversion() {
        let stereo_samples = vec![0.1, 0.3, 0.5, 0.7, -0.2, -0.4];
        let result = convert_to_mono(&stereo_samples, 2, TARGET, TARGET);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 0.2).abs() < 1e-6);
        assert!((result[1] - 0.6).abs() < 1e-6);
        assert!((result[2] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_mono_passthrough_no_resampling() {
        let mono_samples = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let result = convert_to_mono(&mono_samples, 1, TARGET, TARGET);
        assert_eq!(result, mono_samples);
    }

    #[test]
    fn test_multichannel_conversion() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let result = convert_to_mono(&samples, 4, TARGET, TARGET);
        assert_eq!(result, vec![2.5, 6.5]);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_downsampling_48khz_to_44khz() {
        let samples = vec![0.0; 4800];
        let result = convert_to_mono(&samples, 1, 48_000, TARGET);
        // 4800 samples at 48 kHz -> 4410 at 44.1 kHz
        let len_f32 = result.len() as f32;
        assert!((len_f32 - 4410.0).abs() < 2.0);
    }

    #[test]
    fn test_upsampling_22khz_to_44khz() {
        let samples = vec![-1.0, -0.5, 0.0, 0.5, 1.0];
        let result = convert_to_mono(&samples, 1, 22_050, TARGET);
        assert_eq!(result.len(), 10);
        for &sample in &result {
            assert!((-1.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn test_empty_samples() {
        let result = convert_to_mono(&[], 2, 48_000, TARGET);
        assert!(result.is_empty());
    }

    #[test]
    fn test_to_pcm16_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(2.5), i16::MAX);
        assert_eq!(to_pcm16(-1.0), -i16::MAX);
        assert_eq!(to_pcm16(-7.0), -i16::MAX);
    }

    #[test]
    fn test_write_artifact_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let format = CaptureFormat::PCM16_MONO_44K;

        let writer = create_destination(&path, format).unwrap();
        let samples = vec![0.25_f32; 44_100];
        let artifact = write_artifact(writer, &samples, path.clone(), format).unwrap();

        assert_eq!(artifact.frames, 44_100);
        assert_eq!(artifact.duration, Duration::from_secs(1));

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(reader.len(), 44_100);
    }

    #[test]
    fn test_destination_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.wav");
        let format = CaptureFormat::PCM16_MONO_44K;

        let writer = create_destination(&path, format).unwrap();
        write_artifact(writer, &[0.1; 1000], path.clone(), format).unwrap();

        let writer = create_destination(&path, format).unwrap();
        write_artifact(writer, &[0.1; 10], path.clone(), format).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 10);
    }

    #[test]
    fn test_destination_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("latest.wav");
        let writer = create_destination(&path, CaptureFormat::PCM16_MONO_44K);
        assert!(writer.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_destination_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let path = blocker.join("latest.wav");
        let result = create_destination(&path, CaptureFormat::PCM16_MONO_44K);
        assert!(matches!(result, Err(CaptureError::Io { .. })));
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_cpal_capture_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(Box::new(CpalBackend::new()), dir.path().join("a.wav"));

        session.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        let artifact = session.stop().unwrap().unwrap();

        assert!(artifact.path.exists());
        assert_eq!(artifact.format, CaptureFormat::PCM16_MONO_44K);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_cpal_multiple_capture_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(Box::new(CpalBackend::new()), dir.path().join("b.wav"));

        for _ in 0..3 {
            session.start().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            assert!(session.stop().unwrap().is_some());
        }
    }
}
