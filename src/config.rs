use crate::capture::{MAX_BLOCK_SIZE, StreamSpec};
use crate::engine::EngineConfig;
use crate::spectrum::WindowFunction;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "reactive-visuals", version, about = "Audio-reactive parameter engine driven by a system monitor source")]
pub struct Config {
    /// Monitor source id (see --list-devices). Empty uses the default input.
    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    #[arg(long, default_value_t = 48_000)]
    pub sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    pub channels: u8,

    /// Frames per block; falls back to the remembered size, then 1024.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_BLOCK_SIZE as i64))]
    pub block_size: Option<u32>,

    #[arg(long, default_value_t = 1024)]
    pub fft_size: usize,

    #[arg(long, value_enum, default_value_t = WindowMode::Rect)]
    pub window: WindowMode,

    #[arg(long, default_value_t = 100)]
    pub read_timeout_ms: u64,

    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    #[arg(long)]
    pub preset: Option<String>,

    #[arg(long)]
    pub preset_file: Option<PathBuf>,

    /// Start with audio-reactive mode off.
    #[arg(long, default_value_t = false)]
    pub start_disabled: bool,

    /// Log snapshots instead of drawing the terminal meter.
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Stop after this many frames (0 = run until quit).
    #[arg(long, default_value_t = 0)]
    pub frames: u64,

    #[arg(long, default_value_t = 30)]
    pub report_every: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WindowMode {
    #[value(alias = "rectangular", alias = "none")]
    Rect,
    Hann,
}

impl From<WindowMode> for WindowFunction {
    fn from(m: WindowMode) -> Self {
        match m {
            WindowMode::Rect => WindowFunction::Rectangular,
            WindowMode::Hann => WindowFunction::Hann,
        }
    }
}

/// Block sizes cycled through at runtime.
pub const BLOCK_SIZES: [u32; 4] = [512, 1024, 2048, 4096];
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

impl Config {
    pub fn block_size(&self) -> u32 {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    pub fn stream_spec(&self, device: &str) -> StreamSpec {
        let mut spec = StreamSpec::new(device, self.sample_rate, self.channels, self.block_size());
        spec.read_timeout = Duration::from_millis(self.read_timeout_ms.max(1));
        spec
    }

    pub fn engine_config(&self, device: &str) -> EngineConfig {
        EngineConfig {
            stream: self.stream_spec(device),
            fft_size: self.fft_size,
            window: self.window.into(),
        }
    }
}

pub fn next_block_size(current: u32) -> u32 {
    let idx = BLOCK_SIZES.iter().position(|&b| b == current);
    match idx {
        Some(i) => BLOCK_SIZES[(i + 1) % BLOCK_SIZES.len()],
        None => BLOCK_SIZES[0],
    }
}
