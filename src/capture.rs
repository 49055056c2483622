use crate::ring_buffer::{Consumer, Producer, RingBuffer, RingBufferError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use log::{debug, error, info, warn};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Blocks of headroom kept between the capture thread and the driver.
const RING_BLOCKS: usize = 8;
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(1);
const READ_POLL: Duration = Duration::from_millis(1);
const DROP_REPORT_EVERY: Duration = Duration::from_secs(1);

/// Largest frames-per-block a session accepts.
pub const MAX_BLOCK_SIZE: u32 = 16_384;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid stream spec: {0}")]
    InvalidSpec(String),
    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),
    #[error("no capture device matching '{0}'")]
    DeviceNotFound(String),
    #[error("open capture device '{device}': {message}")]
    Open { device: String, message: String },
    #[error("capture stream on '{0}' reported an error")]
    Stream(String),
    #[error("capture session already started")]
    AlreadyStarted,
    #[error("capture thread exited before reporting device state")]
    ThreadLost,
    #[error("spawn capture thread: {0}")]
    Spawn(#[from] io::Error),
}

/// A loop-back capture endpoint mirroring some output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSource {
    pub id: String,
    pub label: String,
}

pub fn is_monitor_name(name: &str) -> bool {
    let n = name.to_lowercase();
    n.contains("monitor") || n.contains("loopback")
}

fn monitor_label(name: &str) -> String {
    match name.strip_suffix(".monitor") {
        Some(base) => format!("Monitor of {base}"),
        None => name.to_string(),
    }
}

pub fn list_monitor_sources() -> anyhow::Result<Vec<MonitorSource>> {
    use anyhow::Context;

    let host = cpal::default_host();
    let devices = host.input_devices().context("enumerate input devices")?;
    let mut out = Vec::new();
    for dev in devices {
        let Ok(name) = dev.name() else {
            continue;
        };
        if is_monitor_name(&name) {
            out.push(MonitorSource {
                label: monitor_label(&name),
                id: name,
            });
        }
    }
    debug!("found {} monitor source(s)", out.len());
    Ok(out)
}

pub fn list_input_devices() -> anyhow::Result<()> {
    use anyhow::Context;

    let monitors = list_monitor_sources()?;
    let mut out = io::stdout();
    if !monitors.is_empty() {
        writeln!(out, "Monitor sources:")?;
        for m in &monitors {
            writeln!(out, "  - {}  ({})", m.id, m.label)?;
        }
        return Ok(());
    }

    let host = cpal::default_host();
    let devices = host.input_devices().context("enumerate input devices")?;
    writeln!(out, "No monitor sources found; all input devices:")?;
    for dev in devices {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    Ok(())
}

/// Format of one capture session. Fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Monitor source id; empty selects the host's default input.
    pub device: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Frames per capture/consume cycle.
    pub block_size: u32,
    pub read_timeout: Duration,
}

impl StreamSpec {
    pub fn new(device: impl Into<String>, sample_rate: u32, channels: u8, block_size: u32) -> Self {
        Self {
            device: device.into(),
            sample_rate,
            channels,
            block_size,
            read_timeout: Duration::from_millis(100),
        }
    }

    pub fn samples_per_block(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }

    fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidSpec("sample rate must be > 0".into()));
        }
        if self.channels == 0 {
            return Err(CaptureError::InvalidSpec("channel count must be > 0".into()));
        }
        if self.block_size == 0 {
            return Err(CaptureError::InvalidSpec("block size must be > 0".into()));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(CaptureError::InvalidSpec(format!(
                "block size {} exceeds {MAX_BLOCK_SIZE} frames",
                self.block_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Filled,
    /// Nothing complete arrived within the read timeout. Not a failure.
    TimedOut,
}

/// Blocking source of interleaved 32-bit PCM.
///
/// Readers are opened on the capture thread and never leave it, so they do
/// not need to be `Send` (cpal streams are not).
pub trait PcmReader {
    fn read(&mut self, block: &mut [i32]) -> Result<ReadOutcome, CaptureError>;
}

/// cpal-backed monitor reader. Dropping it closes the device stream.
pub struct CpalMonitor {
    _stream: cpal::Stream,
    cons: ringbuf::HeapCons<i32>,
    pending: Vec<i32>,
    filled: usize,
    timeout: Duration,
    failed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    last_drop_report: Instant,
    device: String,
}

impl CpalMonitor {
    pub fn open(spec: &StreamSpec) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = select_device(&host, &spec.device)?;
        let open_err = |message: String| CaptureError::Open {
            device: spec.device.clone(),
            message,
        };
        let supported = device
            .default_input_config()
            .map_err(|e| open_err(e.to_string()))?;
        let config = cpal::StreamConfig {
            channels: spec.channels as u16,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let rb = HeapRb::<i32>::new(spec.samples_per_block() * RING_BLOCKS);
        let (prod, cons) = rb.split();
        let failed = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let stream = match supported.sample_format() {
            SampleFormat::I32 => build_stream::<i32>(&device, &config, prod, &failed, &dropped),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, prod, &failed, &dropped),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, prod, &failed, &dropped),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, prod, &failed, &dropped),
            fmt => return Err(open_err(format!("unsupported sample format: {fmt:?}"))),
        }
        .map_err(|e| open_err(e.to_string()))?;

        stream.play().map_err(|e| open_err(e.to_string()))?;
        info!(
            "opened capture device '{}' ({} Hz, {} ch, {} frames/block)",
            spec.device, spec.sample_rate, spec.channels, spec.block_size
        );

        Ok(Self {
            _stream: stream,
            cons,
            pending: vec![0; spec.samples_per_block()],
            filled: 0,
            timeout: spec.read_timeout,
            failed,
            dropped,
            reported_drops: 0,
            last_drop_report: Instant::now(),
            device: spec.device.clone(),
        })
    }

    /// Logs staging-queue overruns at most once per `DROP_REPORT_EVERY`.
    fn report_drops(&mut self) {
        let lost = self.dropped.load(Ordering::Relaxed);
        if lost > self.reported_drops && self.last_drop_report.elapsed() >= DROP_REPORT_EVERY {
            warn!(
                "capture device '{}' overran its staging queue: {} samples lost ({lost} total)",
                self.device,
                lost - self.reported_drops
            );
            self.reported_drops = lost;
            self.last_drop_report = Instant::now();
        }
    }
}

impl PcmReader for CpalMonitor {
    fn read(&mut self, block: &mut [i32]) -> Result<ReadOutcome, CaptureError> {
        self.report_drops();
        if self.pending.len() != block.len() {
            self.pending.resize(block.len(), 0);
            self.filled = 0;
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.failed.load(Ordering::Acquire) {
                return Err(CaptureError::Stream(self.device.clone()));
            }
            self.filled += self.cons.pop_slice(&mut self.pending[self.filled..]);
            if self.filled == self.pending.len() {
                block.copy_from_slice(&self.pending);
                self.filled = 0;
                return Ok(ReadOutcome::Filled);
            }
            if Instant::now() >= deadline {
                return Ok(ReadOutcome::TimedOut);
            }
            thread::sleep(READ_POLL);
        }
    }
}

impl Drop for CpalMonitor {
    fn drop(&mut self) {
        let lost = self.dropped.load(Ordering::Relaxed);
        if lost > 0 {
            warn!("capture device '{}' dropped {lost} samples in its staging queue", self.device);
        }
        debug!("closed capture device '{}'", self.device);
    }
}

fn select_device(host: &cpal::Host, id: &str) -> Result<cpal::Device, CaptureError> {
    if id.trim().is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("<default>".to_string()));
    }
    let devices = host.input_devices().map_err(|e| CaptureError::Open {
        device: id.to_string(),
        message: e.to_string(),
    })?;
    for dev in devices {
        if dev.name().map(|n| n == id).unwrap_or(false) {
            return Ok(dev);
        }
    }
    Err(CaptureError::DeviceNotFound(id.to_string()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut prod: ringbuf::HeapProd<i32>,
    failed: &Arc<AtomicBool>,
    dropped: &Arc<AtomicU64>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i32: FromSample<T>,
{
    let failed = Arc::clone(failed);
    let dropped = Arc::clone(dropped);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut lost = 0u64;
            for &s in data {
                if prod.try_push(i32::from_sample(s)).is_err() {
                    lost += 1;
                }
            }
            if lost > 0 {
                dropped.fetch_add(lost, Ordering::Relaxed);
            }
        },
        move |err| {
            error!("audio stream error: {err}");
            failed.store(true, Ordering::Release);
        },
        None,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Running,
    Stopped,
    Failed,
}

impl CaptureStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
            Self::Failed => 3,
        }
    }
}

struct SessionFlags {
    running: AtomicBool,
    status: AtomicU8,
}

impl SessionFlags {
    fn status(&self) -> CaptureStatus {
        CaptureStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, s: CaptureStatus) {
        self.status.store(s.as_u8(), Ordering::Release);
    }
}

/// One live capture: device reader on its own thread feeding a sample queue.
///
/// The session is single-use. Changing device, rate, channel count or block
/// size means dropping it and building a new one.
pub struct CaptureSession {
    spec: StreamSpec,
    flags: Arc<SessionFlags>,
    producer: Option<Producer<i32>>,
    consumer: Consumer<i32>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(spec: StreamSpec) -> Result<Self, CaptureError> {
        spec.validate()?;
        let capacity = (spec.samples_per_block() * RING_BLOCKS).next_power_of_two();
        let (producer, consumer) = RingBuffer::with_capacity::<i32>(capacity)?;
        Ok(Self {
            spec,
            flags: Arc::new(SessionFlags {
                running: AtomicBool::new(false),
                status: AtomicU8::new(CaptureStatus::Idle.as_u8()),
            }),
            producer: Some(producer),
            consumer,
            handle: None,
        })
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    pub fn status(&self) -> CaptureStatus {
        self.flags.status()
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::Acquire) && self.status() == CaptureStatus::Running
    }

    /// Starts capturing from the cpal monitor named by the spec.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.start_with(CpalMonitor::open)
    }

    /// Spawns the capture thread, opens the device on it through `open`, and
    /// waits until the device is either open or has failed to open.
    pub fn start_with<F, R>(&mut self, open: F) -> Result<(), CaptureError>
    where
        F: FnOnce(&StreamSpec) -> Result<R, CaptureError> + Send + 'static,
        R: PcmReader,
    {
        let Some(producer) = self.producer.take() else {
            return Err(CaptureError::AlreadyStarted);
        };
        let spec = self.spec.clone();
        let flags = Arc::clone(&self.flags);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);

        self.flags.running.store(true, Ordering::Release);
        self.flags.set_status(CaptureStatus::Running);

        let spawned = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let reader = match open(&spec) {
                    Ok(r) => r,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                capture_loop(reader, producer, &spec, &flags);
            });
        let handle = match spawned {
            Ok(h) => h,
            Err(err) => {
                self.flags.running.store(false, Ordering::Release);
                self.flags.set_status(CaptureStatus::Failed);
                return Err(err.into());
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                self.flags.running.store(false, Ordering::Release);
                self.flags.set_status(CaptureStatus::Failed);
                error!("capture device '{}' failed to open: {err}", self.spec.device);
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                self.flags.running.store(false, Ordering::Release);
                self.flags.set_status(CaptureStatus::Failed);
                Err(CaptureError::ThreadLost)
            }
        }
    }

    /// Stops and joins the capture thread. Safe to call repeatedly, or without `start`.
    pub fn stop(&mut self) {
        self.flags.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture thread for '{}' panicked", self.spec.device);
                self.flags.set_status(CaptureStatus::Failed);
            }
            info!("capture on '{}' stopped", self.spec.device);
        }
        if self.status() == CaptureStatus::Running {
            self.flags.set_status(CaptureStatus::Stopped);
        }
    }

    /// Pops one full interleaved block into `out` without blocking.
    ///
    /// Returns `false`, leaving `out` untouched, when `out` is not exactly one
    /// block long or when a full block has not been captured yet.
    pub fn latest_block(&mut self, out: &mut [i32]) -> bool {
        if out.len() != self.spec.samples_per_block() {
            return false;
        }
        self.consumer.pop_exact(out)
    }

    /// Queued samples; for diagnostics only.
    pub fn queued_samples(&self) -> usize {
        self.consumer.len()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<R: PcmReader>(
    mut reader: R,
    mut producer: Producer<i32>,
    spec: &StreamSpec,
    flags: &SessionFlags,
) {
    let mut block = vec![0i32; spec.samples_per_block()];
    debug!("capture loop on '{}' started", spec.device);

    'capture: while flags.running.load(Ordering::Acquire) {
        match reader.read(&mut block) {
            Ok(ReadOutcome::Filled) => {}
            Ok(ReadOutcome::TimedOut) => continue,
            Err(err) => {
                error!("capture read on '{}' failed: {err}", spec.device);
                flags.set_status(CaptureStatus::Failed);
                break;
            }
        }

        for &sample in &block {
            // Backpressure: wait for the driver instead of dropping samples.
            while producer.try_push(sample).is_err() {
                if !flags.running.load(Ordering::Acquire) {
                    break 'capture;
                }
                thread::sleep(BACKPRESSURE_SLEEP);
            }
        }
    }

    debug!("capture loop on '{}' exited", spec.device);
}
