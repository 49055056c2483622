use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use thiserror::Error;

/// Full scale of a signed 32-bit sample.
const I32_SCALE: f32 = 2_147_483_648.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpectrumError {
    #[error("FFT size must be an even number >= 2, got {0}")]
    InvalidSize(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    /// Plain zero-padded DFT.
    #[default]
    Rectangular,
    Hann,
}

impl WindowFunction {
    fn coefficients(self, n: usize) -> Vec<f32> {
        match self {
            Self::Rectangular => vec![1.0; n],
            Self::Hann => (0..n)
                .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (n as f32)).cos())
                .collect(),
        }
    }
}

/// Magnitude spectrum of a fixed-size real signal.
///
/// Holds the planned FFT and its work buffers for one size `N`; a different
/// size means a new instance.
pub struct SpectralTransform {
    n: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    mags: Vec<f32>,
}

impl SpectralTransform {
    pub fn new(n: usize) -> Result<Self, SpectrumError> {
        Self::with_window(n, WindowFunction::Rectangular)
    }

    pub fn with_window(n: usize, window: WindowFunction) -> Result<Self, SpectrumError> {
        if n < 2 || n % 2 != 0 {
            return Err(SpectrumError::InvalidSize(n));
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let scratch = vec![Complex { re: 0.0, im: 0.0 }; fft.get_inplace_scratch_len()];
        Ok(Self {
            n,
            fft,
            window: window.coefficients(n),
            buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            scratch,
            mags: vec![0.0; n / 2],
        })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn bins(&self) -> usize {
        self.n / 2
    }

    /// Transforms `input` (zero-padded or truncated to `N`) and returns the
    /// `N/2` magnitudes. The slice is valid until the next call.
    pub fn process(&mut self, input: &[f32]) -> &[f32] {
        for (i, c) in self.buf.iter_mut().enumerate() {
            let s = input.get(i).copied().unwrap_or(0.0);
            c.re = s * self.window[i];
            c.im = 0.0;
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
        for (m, c) in self.mags.iter_mut().zip(self.buf.iter()) {
            *m = (c.re * c.re + c.im * c.im).sqrt();
        }
        &self.mags
    }
}

/// Averages interleaved frames into mono floats in `[-1, 1]`.
pub fn downmix_to_mono(interleaved: &[i32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    let channels = channels.max(1);
    out.extend(interleaved.chunks_exact(channels).map(|frame| {
        let acc = frame.iter().map(|&s| s as f32).sum::<f32>();
        acc / channels as f32 / I32_SCALE
    }));
}
