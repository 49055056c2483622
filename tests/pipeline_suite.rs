use std::collections::VecDeque;
use std::time::{Duration, Instant};

use reactive_visuals::bands::{AudioAnalysis, BandAnalyzer};
use reactive_visuals::capture::{
    CaptureError, CaptureSession, CaptureStatus, PcmReader, ReadOutcome, StreamSpec,
};
use reactive_visuals::engine::{EngineConfig, EngineStatus, ReactiveEngine};
use reactive_visuals::group::ParamRouting;
use reactive_visuals::preset::builtin_presets;
use reactive_visuals::spectrum::{SpectralTransform, WindowFunction, downmix_to_mono};

/// Hands out queued blocks, then either times out forever or fails.
struct ScriptedReader {
    blocks: VecDeque<Vec<i32>>,
    fail_when_drained: bool,
}

impl ScriptedReader {
    fn new(blocks: Vec<Vec<i32>>, fail_when_drained: bool) -> Self {
        Self {
            blocks: blocks.into(),
            fail_when_drained,
        }
    }
}

impl PcmReader for ScriptedReader {
    fn read(&mut self, block: &mut [i32]) -> Result<ReadOutcome, CaptureError> {
        if let Some(next) = self.blocks.pop_front() {
            block.copy_from_slice(&next);
            return Ok(ReadOutcome::Filled);
        }
        if self.fail_when_drained {
            return Err(CaptureError::Stream("scripted".to_string()));
        }
        std::thread::sleep(Duration::from_millis(1));
        Ok(ReadOutcome::TimedOut)
    }
}

fn spec(block_size: u32, channels: u8) -> StreamSpec {
    StreamSpec::new("test-monitor", 48_000, channels, block_size)
}

fn engine_config(block_size: u32, channels: u8) -> EngineConfig {
    EngineConfig {
        stream: spec(block_size, channels),
        fft_size: 1024,
        window: WindowFunction::Rectangular,
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn silent_block_flows_to_zero_analysis() {
    let spec = spec(1024, 2);
    let samples = spec.samples_per_block();
    assert_eq!(samples, 2048);

    let mut session = CaptureSession::new(spec).expect("session");
    session
        .start_with(move |_s: &StreamSpec| Ok(ScriptedReader::new(vec![vec![0; samples]], false)))
        .expect("start");

    let mut block = vec![1i32; samples];
    assert!(wait_until(|| session.latest_block(&mut block)), "block never arrived");
    assert!(block.iter().all(|&s| s == 0));

    let mut mono = Vec::new();
    downmix_to_mono(&block, 2, &mut mono);
    assert_eq!(mono.len(), 1024);
    assert!(mono.iter().all(|&s| s == 0.0));

    let mut transform = SpectralTransform::new(1024).expect("fft");
    let spectrum = transform.process(&mono).to_vec();
    assert!(spectrum.iter().all(|&m| m == 0.0));

    let analysis = BandAnalyzer::new().analyze(&spectrum, 48_000, 1024);
    assert_eq!(analysis, AudioAnalysis::default());

    session.stop();
    assert_eq!(session.status(), CaptureStatus::Stopped);
}

#[test]
fn latest_block_rejects_wrong_length_and_short_queue() {
    let spec = spec(256, 1);
    let mut session = CaptureSession::new(spec).expect("session");

    let mut wrong = vec![7i32; 255];
    assert!(!session.latest_block(&mut wrong));
    assert!(wrong.iter().all(|&s| s == 7));

    let mut right = vec![7i32; 256];
    assert!(!session.latest_block(&mut right), "nothing captured yet");
    assert!(right.iter().all(|&s| s == 7));
}

#[test]
fn blocks_come_out_in_capture_order() {
    let spec = spec(64, 2);
    let n = spec.samples_per_block();
    let blocks = (0..5).map(|b| vec![b as i32; n]).collect::<Vec<_>>();

    let mut session = CaptureSession::new(spec).expect("session");
    session
        .start_with(move |_s: &StreamSpec| Ok(ScriptedReader::new(blocks, false)))
        .expect("start");

    let mut out = vec![0i32; n];
    for expected in 0..5 {
        assert!(wait_until(|| session.latest_block(&mut out)));
        assert!(out.iter().all(|&s| s == expected));
    }
}

#[test]
fn open_failure_reports_error_and_failed_status() {
    let mut session = CaptureSession::new(spec(128, 2)).expect("session");
    let err = session
        .start_with(|s: &StreamSpec| -> Result<ScriptedReader, CaptureError> {
            Err(CaptureError::DeviceNotFound(s.device.clone()))
        })
        .expect_err("open must fail");
    assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    assert_eq!(session.status(), CaptureStatus::Failed);
    assert!(!session.is_running());
}

#[test]
fn stop_is_idempotent_and_safe_before_start() {
    let mut idle = CaptureSession::new(spec(128, 2)).expect("session");
    idle.stop();
    idle.stop();
    assert_eq!(idle.status(), CaptureStatus::Idle);

    let mut session = CaptureSession::new(spec(128, 2)).expect("session");
    session
        .start_with(|_s: &StreamSpec| Ok(ScriptedReader::new(Vec::new(), false)))
        .expect("start");
    assert!(session.is_running());
    session.stop();
    session.stop();
    assert_eq!(session.status(), CaptureStatus::Stopped);
    assert!(!session.is_running());
}

#[test]
fn second_start_is_rejected() {
    let mut session = CaptureSession::new(spec(128, 2)).expect("session");
    session
        .start_with(|_s: &StreamSpec| Ok(ScriptedReader::new(Vec::new(), false)))
        .expect("start");
    let err = session
        .start_with(|_s: &StreamSpec| Ok(ScriptedReader::new(Vec::new(), false)))
        .expect_err("already started");
    assert!(matches!(err, CaptureError::AlreadyStarted));
}

#[test]
fn invalid_stream_spec_is_rejected() {
    for bad in [
        StreamSpec::new("x", 0, 2, 1024),
        StreamSpec::new("x", 48_000, 0, 1024),
        StreamSpec::new("x", 48_000, 2, 0),
    ] {
        assert!(matches!(
            CaptureSession::new(bad),
            Err(CaptureError::InvalidSpec(_))
        ));
    }
}

#[test]
fn backpressure_holds_samples_instead_of_dropping() {
    // Ring holds 8 blocks; feed 20 without consuming.
    let spec = spec(32, 1);
    let n = spec.samples_per_block();
    let blocks = (0..20).map(|b| vec![b as i32; n]).collect::<Vec<_>>();

    let mut session = CaptureSession::new(spec).expect("session");
    session
        .start_with(move |_s: &StreamSpec| Ok(ScriptedReader::new(blocks, false)))
        .expect("start");

    assert!(wait_until(|| session.queued_samples() >= n * 7));
    let mut out = vec![0i32; n];
    for expected in 0..20 {
        assert!(wait_until(|| session.latest_block(&mut out)));
        assert!(out.iter().all(|&s| s == expected), "block {expected} lost or reordered");
    }
    session.stop();
}

#[test]
fn engine_open_failure_stays_disabled_with_zero_analysis() {
    let mut engine = ReactiveEngine::new(engine_config(1024, 2));
    let res = engine.enable_with(|s: &StreamSpec| -> Result<ScriptedReader, CaptureError> {
        Err(CaptureError::Open {
            device: s.device.clone(),
            message: "busy".to_string(),
        })
    });
    assert!(res.is_err());
    assert!(!engine.is_enabled());
    assert_eq!(engine.status(), EngineStatus::Disabled);
    assert!(engine.last_error().is_some_and(|e| e.contains("busy")));

    let snap = *engine.tick(0.016);
    assert_eq!(snap.analysis, AudioAnalysis::default());
    assert!(!snap.fresh);
}

#[test]
fn engine_analyses_silence_and_survives_timeouts() {
    let mut engine = ReactiveEngine::new(engine_config(1024, 2));
    engine.apply_preset(&builtin_presets()[0]);
    engine
        .enable_with(|s: &StreamSpec| {
            let n = s.samples_per_block();
            Ok(ScriptedReader::new(vec![vec![0; n]], false))
        })
        .expect("enable");

    assert!(wait_until(|| engine.tick(0.016).fresh));
    assert_eq!(engine.blocks_analyzed(), 1);
    assert_eq!(*engine.analysis(), AudioAnalysis::default());

    // Reader only times out from here on; that is not a failure.
    std::thread::sleep(Duration::from_millis(20));
    engine.tick(0.016);
    assert_eq!(engine.status(), EngineStatus::Running);

    engine.disable();
    assert!(!engine.is_enabled());
    assert_eq!(engine.status(), EngineStatus::Disabled);
}

#[test]
fn engine_reports_mid_stream_failure() {
    let mut engine = ReactiveEngine::new(engine_config(256, 2));
    engine
        .enable_with(|s: &StreamSpec| {
            let n = s.samples_per_block();
            Ok(ScriptedReader::new(vec![vec![1 << 28; n]], true))
        })
        .expect("enable");

    assert!(wait_until(|| engine.status() == EngineStatus::Failed));
    // Whatever was captured before the failure is still analysed.
    assert!(wait_until(|| engine.tick(0.016).fresh));
    assert!(engine.analysis().is_finite());

    engine.disable();
    assert_eq!(engine.status(), EngineStatus::Disabled);
}

#[test]
fn engine_reconfigure_replaces_the_session() {
    let mut engine = ReactiveEngine::new(engine_config(256, 2));
    engine
        .enable_with(|_s: &StreamSpec| Ok(ScriptedReader::new(Vec::new(), false)))
        .expect("enable");

    let next = engine_config(512, 1);
    engine
        .reconfigure_with(next.clone(), |s: &StreamSpec| {
            assert_eq!(s.block_size, 512);
            Ok(ScriptedReader::new(Vec::new(), false))
        })
        .expect("reconfigure");
    assert_eq!(engine.config(), &next);
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(engine.queued_samples(), 0);
}

#[test]
fn engine_rejects_odd_fft_size_without_opening() {
    let mut cfg = engine_config(256, 2);
    cfg.fft_size = 1023;
    let mut engine = ReactiveEngine::new(cfg);
    let res = engine.enable_with(|_s: &StreamSpec| -> Result<ScriptedReader, CaptureError> {
        panic!("device must not be opened for an invalid transform")
    });
    assert!(res.is_err());
    assert!(!engine.is_enabled());
}

#[test]
fn engine_drains_a_backlog_and_analyses_the_newest_block() {
    let mut engine = ReactiveEngine::new(engine_config(256, 1));
    engine
        .enable_with(|s: &StreamSpec| {
            let n = s.samples_per_block();
            let mut blocks = vec![vec![0; n]; 6];
            let tone = (0..n)
                .map(|i| {
                    let phase = 2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / 48_000.0;
                    (phase.sin() * (1 << 28) as f32) as i32
                })
                .collect::<Vec<_>>();
            blocks.push(tone);
            Ok(ScriptedReader::new(blocks, false))
        })
        .expect("enable");

    // Let the capture thread run ahead of the frame loop.
    assert!(wait_until(|| engine.queued_samples() >= 7 * 256));

    let snap = *engine.tick(0.016);
    assert!(snap.fresh);
    assert_eq!(engine.blocks_analyzed(), 1);
    assert_eq!(engine.blocks_skipped(), 6);
    assert_eq!(engine.queued_samples(), 0);
    assert!(snap.analysis.rms > 0.0, "stale silent block analysed instead of the newest");

    assert!(!engine.tick(0.016).fresh);
    assert_eq!(engine.blocks_analyzed(), 1);
}

#[test]
fn oversized_block_is_rejected_before_allocating() {
    let huge = StreamSpec::new("x", 48_000, 2, 100_000_000);
    assert!(matches!(
        CaptureSession::new(huge),
        Err(CaptureError::InvalidSpec(_))
    ));
}

#[test]
fn engine_scene_routing_can_be_retargeted() {
    let full = builtin_presets()
        .into_iter()
        .find(|p| p.name == "Full Spectrum")
        .expect("builtin");
    let mut engine = ReactiveEngine::new(engine_config(256, 1));
    engine.apply_preset(&full);
    engine.scene_mut().set_routing(1, ParamRouting::for_group(0));
    engine
        .enable_with(|s: &StreamSpec| {
            let n = s.samples_per_block();
            let noise = (0..n).map(|i| ((i * 7919) % 2001) as i32 * (1 << 16) - (1 << 26)).collect();
            Ok(ScriptedReader::new(vec![noise], false))
        })
        .expect("enable");

    assert!(wait_until(|| engine.tick(0.016).fresh));
    for _ in 0..10 {
        engine.tick(0.016);
    }
    let snap = *engine.tick(0.016);
    assert_eq!(snap.groups[1], snap.groups[0]);
    assert_ne!(snap.groups[2], snap.groups[0]);
}
