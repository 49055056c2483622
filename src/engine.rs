use crate::bands::{AudioAnalysis, BandAnalyzer};
use crate::capture::{CaptureError, CaptureSession, CaptureStatus, CpalMonitor, PcmReader, StreamSpec};
use crate::group::{GROUP_COUNT, GroupSnapshot, ReactiveScene};
use crate::preset::ReactivePreset;
use crate::spectrum::{SpectralTransform, SpectrumError, WindowFunction, downmix_to_mono};
use log::{info, warn};
use thiserror::Error;

/// Upper bound on blocks drained per tick, so a producer that outpaces the
/// drain cannot stall a frame.
const MAX_DRAIN_BLOCKS: u32 = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub stream: StreamSpec,
    pub fft_size: usize,
    pub window: WindowFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Disabled,
    Running,
    /// Capture died mid-stream. Stays here until the caller re-enables.
    Failed,
}

/// What the renderer reads once per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameSnapshot {
    pub analysis: AudioAnalysis,
    pub groups: [GroupSnapshot; GROUP_COUNT],
    /// A new block was analysed this tick.
    pub fresh: bool,
}

struct Pipeline {
    session: CaptureSession,
    transform: SpectralTransform,
}

/// Driver-side owner of the capture session, transform, analyzer and scene.
///
/// At most one capture pipeline exists; enabling, disabling and
/// reconfiguring always tear the old one down completely before building
/// the next.
pub struct ReactiveEngine {
    config: EngineConfig,
    pipeline: Option<Pipeline>,
    analyzer: BandAnalyzer,
    scene: ReactiveScene,
    analysis: AudioAnalysis,
    block: Vec<i32>,
    mono: Vec<f32>,
    snapshot: FrameSnapshot,
    last_error: Option<String>,
    blocks_analyzed: u64,
    blocks_skipped: u64,
}

impl ReactiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            pipeline: None,
            analyzer: BandAnalyzer::new(),
            scene: ReactiveScene::new(),
            analysis: AudioAnalysis::default(),
            block: Vec::new(),
            mono: Vec::new(),
            snapshot: FrameSnapshot::default(),
            last_error: None,
            blocks_analyzed: 0,
            blocks_skipped: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        match self.pipeline.as_ref().map(|p| p.session.status()) {
            Some(CaptureStatus::Running) => EngineStatus::Running,
            Some(CaptureStatus::Failed) => EngineStatus::Failed,
            _ => EngineStatus::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn analysis(&self) -> &AudioAnalysis {
        &self.analysis
    }

    pub fn snapshot(&self) -> &FrameSnapshot {
        &self.snapshot
    }

    pub fn scene_mut(&mut self) -> &mut ReactiveScene {
        &mut self.scene
    }

    pub fn blocks_analyzed(&self) -> u64 {
        self.blocks_analyzed
    }

    /// Blocks popped but not analysed because a newer one was already queued.
    pub fn blocks_skipped(&self) -> u64 {
        self.blocks_skipped
    }

    /// Samples waiting in the capture queue; diagnostics only.
    pub fn queued_samples(&self) -> usize {
        self.pipeline
            .as_ref()
            .map(|p| p.session.queued_samples())
            .unwrap_or(0)
    }

    pub fn apply_preset(&mut self, preset: &ReactivePreset) {
        self.scene.apply_preset(preset);
        info!("reactive preset: {}", preset.name);
    }

    /// Opens the configured monitor through cpal and starts capturing.
    pub fn enable(&mut self) -> Result<(), EngineError> {
        self.enable_with(CpalMonitor::open)
    }

    pub fn enable_with<F, R>(&mut self, open: F) -> Result<(), EngineError>
    where
        F: FnOnce(&StreamSpec) -> Result<R, CaptureError> + Send + 'static,
        R: PcmReader,
    {
        self.teardown();

        let result = self.build_pipeline(open);
        match result {
            Ok(pipeline) => {
                self.block = vec![0; self.config.stream.samples_per_block()];
                self.pipeline = Some(pipeline);
                self.last_error = None;
                info!(
                    "audio-reactive enabled on '{}' (block {}, fft {})",
                    self.config.stream.device, self.config.stream.block_size, self.config.fft_size
                );
                Ok(())
            }
            Err(err) => {
                warn!("audio-reactive mode stays disabled: {err}");
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn build_pipeline<F, R>(&self, open: F) -> Result<Pipeline, EngineError>
    where
        F: FnOnce(&StreamSpec) -> Result<R, CaptureError> + Send + 'static,
        R: PcmReader,
    {
        let transform = SpectralTransform::with_window(self.config.fft_size, self.config.window)?;
        let mut session = CaptureSession::new(self.config.stream.clone())?;
        session.start_with(open)?;
        Ok(Pipeline { session, transform })
    }

    pub fn disable(&mut self) {
        if self.pipeline.is_some() {
            self.teardown();
            info!("audio-reactive disabled");
        }
    }

    /// Replaces device, stream format or FFT size: full teardown, then rebuild.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        self.reconfigure_with(config, CpalMonitor::open)
    }

    pub fn reconfigure_with<F, R>(&mut self, config: EngineConfig, open: F) -> Result<(), EngineError>
    where
        F: FnOnce(&StreamSpec) -> Result<R, CaptureError> + Send + 'static,
        R: PcmReader,
    {
        self.teardown();
        self.config = config;
        self.enable_with(open)
    }

    /// Swaps the configuration without opening anything.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.teardown();
        self.config = config;
    }

    fn teardown(&mut self) {
        if let Some(mut p) = self.pipeline.take() {
            p.session.stop();
        }
        self.analysis = AudioAnalysis::default();
        self.analyzer = BandAnalyzer::new();
    }

    /// One driver frame: drain every complete block queued since the last
    /// tick and analyse the newest, then advance every reactive control by
    /// `dt` seconds. Never blocks.
    ///
    /// When blocks arrive faster than frames, the older ones are skipped so
    /// the queue never backs up into the capture thread.
    pub fn tick(&mut self, dt: f32) -> &FrameSnapshot {
        let mut fresh = false;
        if let Some(p) = self.pipeline.as_mut() {
            let mut popped = 0u32;
            while popped < MAX_DRAIN_BLOCKS && p.session.latest_block(&mut self.block) {
                popped += 1;
            }
            if popped > 0 {
                let spec = p.session.spec();
                downmix_to_mono(&self.block, spec.channels as usize, &mut self.mono);
                let fft_size = p.transform.size();
                let spectrum = p.transform.process(&self.mono);
                self.analysis = self
                    .analyzer
                    .analyze(spectrum, spec.sample_rate, fft_size);
                self.blocks_analyzed += 1;
                self.blocks_skipped += u64::from(popped - 1);
                fresh = true;
            }
        }

        self.scene.update(&self.analysis, dt);
        self.snapshot = FrameSnapshot {
            analysis: self.analysis,
            groups: self.scene.snapshot(),
            fresh,
        };
        &self.snapshot
    }
}

impl Drop for ReactiveEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
