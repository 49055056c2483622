use std::time::{Duration, Instant};

use anyhow::Result;
use reactive_visuals::bands::BandAnalyzer;
use reactive_visuals::capture::{CaptureError, PcmReader, ReadOutcome, StreamSpec};
use reactive_visuals::engine::{EngineConfig, ReactiveEngine};
use reactive_visuals::group::ReactiveScene;
use reactive_visuals::preset::builtin_presets;
use reactive_visuals::spectrum::{SpectralTransform, WindowFunction, downmix_to_mono};

#[derive(Clone)]
struct Args {
    frames: usize,
    block_size: u32,
    fft_size: usize,
    sample_rate: u32,
    channels: u8,
    hann: bool,
    ci_smoke: bool,
    max_ms: f64,
}

fn parse_args() -> Args {
    let mut args = Args {
        frames: 600,
        block_size: 1024,
        fft_size: 1024,
        sample_rate: 48_000,
        channels: 2,
        hann: false,
        ci_smoke: false,
        max_ms: 2.0,
    };

    let argv = std::env::args().skip(1).collect::<Vec<_>>();
    let mut i = 0usize;
    while i < argv.len() {
        let k = argv[i].as_str();
        let v = argv.get(i + 1).map(|s| s.as_str());
        match (k, v) {
            ("--frames", Some(x)) => {
                if let Ok(n) = x.parse::<usize>() {
                    args.frames = n.max(1);
                }
                i += 2;
            }
            ("--block-size", Some(x)) => {
                if let Ok(n) = x.parse::<u32>() {
                    args.block_size = n.max(1);
                }
                i += 2;
            }
            ("--fft-size", Some(x)) => {
                if let Ok(n) = x.parse::<usize>() {
                    args.fft_size = n.max(2) & !1;
                }
                i += 2;
            }
            ("--sample-rate", Some(x)) => {
                if let Ok(n) = x.parse::<u32>() {
                    args.sample_rate = n.max(1);
                }
                i += 2;
            }
            ("--channels", Some(x)) => {
                if let Ok(n) = x.parse::<u8>() {
                    args.channels = n.max(1);
                }
                i += 2;
            }
            ("--window", Some("hann")) => {
                args.hann = true;
                i += 2;
            }
            ("--window", Some(_)) => {
                args.hann = false;
                i += 2;
            }
            ("--ci-smoke", Some(x)) if !x.starts_with("--") => {
                args.ci_smoke = parse_bool(x).unwrap_or(true);
                i += 2;
            }
            ("--ci-smoke", _) => {
                args.ci_smoke = true;
                i += 1;
            }
            ("--max-ms", Some(x)) => {
                if let Ok(v) = x.parse::<f64>() {
                    args.max_ms = v.max(0.01);
                }
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    args
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Interleaved block with a bass tone, a mid tone and a treble tone whose
/// levels drift with `step`.
fn synth_block(args: &Args, step: usize, out: &mut [i32]) {
    let ch = args.channels as usize;
    let sr = args.sample_rate as f32;
    let t0 = step as f32 * args.block_size as f32 / sr;
    let bass = ((t0 * 1.9).sin() * 0.5 + 0.5) * 0.5;
    let mid = ((t0 * 2.8 + 0.7).sin() * 0.5 + 0.5) * 0.3;
    let treb = ((t0 * 5.2 + 1.3).sin() * 0.5 + 0.5) * 0.15;

    for (frame, chunk) in out.chunks_exact_mut(ch).enumerate() {
        let t = t0 + frame as f32 / sr;
        let s = bass * (std::f32::consts::TAU * 80.0 * t).sin()
            + mid * (std::f32::consts::TAU * 1_000.0 * t).sin()
            + treb * (std::f32::consts::TAU * 8_000.0 * t).sin();
        let v = (s.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
        chunk.fill(v);
    }
}

struct SynthReader {
    args: Args,
    step: usize,
    period: Duration,
}

impl PcmReader for SynthReader {
    fn read(&mut self, block: &mut [i32]) -> Result<ReadOutcome, CaptureError> {
        synth_block(&self.args, self.step, block);
        self.step += 1;
        std::thread::sleep(self.period);
        Ok(ReadOutcome::Filled)
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn bench_dsp(args: &Args) -> Result<(f64, f64)> {
    let window = if args.hann {
        WindowFunction::Hann
    } else {
        WindowFunction::Rectangular
    };
    let mut transform = SpectralTransform::with_window(args.fft_size, window)?;
    let mut analyzer = BandAnalyzer::new();
    let mut scene = ReactiveScene::new();
    if let Some(p) = builtin_presets().iter().find(|p| p.name == "Full Spectrum") {
        scene.apply_preset(p);
    }

    let mut block = vec![0i32; args.block_size as usize * args.channels as usize];
    let mut mono = Vec::new();
    let mut times = Vec::with_capacity(args.frames);
    let mut peak_bass = 0.0f32;

    println!(
        "DSP benchmark: frames={} block={} fft={} rate={} ch={} window={:?}",
        args.frames, args.block_size, args.fft_size, args.sample_rate, args.channels, window
    );

    for f in 0..args.frames {
        synth_block(args, f, &mut block);
        let start = Instant::now();
        downmix_to_mono(&block, args.channels as usize, &mut mono);
        let fft_size = transform.size();
        let spectrum = transform.process(&mono);
        let analysis = analyzer.analyze(spectrum, args.sample_rate, fft_size);
        scene.update(&analysis, 1.0 / 60.0);
        times.push(start.elapsed().as_secs_f64() * 1000.0);
        peak_bass = peak_bass.max(analysis.bass);
    }

    times.sort_by(|a, b| a.total_cmp(b));
    let avg = times.iter().sum::<f64>() / times.len().max(1) as f64;
    let p95 = percentile(&times, 0.95);
    println!(
        "DSP summary: {:>8.4} ms/block avg  p95 {:>8.4} ms  peak bass {:.3}",
        avg, p95, peak_bass
    );
    Ok((avg, p95))
}

fn bench_engine(args: &Args) -> Result<()> {
    let stream = StreamSpec::new("synthetic", args.sample_rate, args.channels, args.block_size);
    let window = if args.hann {
        WindowFunction::Hann
    } else {
        WindowFunction::Rectangular
    };
    let mut engine = ReactiveEngine::new(EngineConfig {
        stream,
        fft_size: args.fft_size,
        window,
    });

    let period = Duration::from_secs_f64(args.block_size as f64 / args.sample_rate as f64);
    let reader_args = args.clone();
    engine.enable_with(move |_spec: &StreamSpec| {
        Ok(SynthReader {
            args: reader_args,
            step: 0,
            period,
        })
    })?;

    let frames = args.frames.min(240);
    let start = Instant::now();
    let mut max_queued = 0usize;
    for _ in 0..frames {
        engine.tick(1.0 / 60.0);
        max_queued = max_queued.max(engine.queued_samples());
        std::thread::sleep(Duration::from_millis(16));
    }
    let elapsed = start.elapsed();
    engine.disable();

    println!(
        "Engine summary: {} frames in {:.2}s  blocks analysed {}  max queued {} samples",
        frames,
        elapsed.as_secs_f64(),
        engine.blocks_analyzed(),
        max_queued
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();
    let (avg, p95) = bench_dsp(&args)?;
    bench_engine(&args)?;

    if args.ci_smoke {
        if p95 > args.max_ms {
            eprintln!("CI smoke: FAIL");
            eprintln!("  p95 {:.4} ms/block (avg {:.4}) > {:.3}", p95, avg, args.max_ms);
            anyhow::bail!("ci smoke failed");
        }
        println!("CI smoke: PASS (max_ms={:.3})", args.max_ms);
    }
    Ok(())
}
