//! Perceptual band energies from a magnitude spectrum.
//!
//! Band ranges are half-open and lower-inclusive: bin `i` with frequency `f`
//! belongs to the band whose `[low, high)` contains `f`. A band that would
//! resolve to no bins at the current resolution is widened to one bin so
//! ranges stay contiguous and every mean has a non-zero denominator.

use std::ops::Range;

pub const BAND_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Bass,
    LowMid,
    Mid,
    HighMid,
    Treble,
}

impl Band {
    pub const ALL: [Band; BAND_COUNT] = [
        Band::Bass,
        Band::LowMid,
        Band::Mid,
        Band::HighMid,
        Band::Treble,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Bass => 0,
            Self::LowMid => 1,
            Self::Mid => 2,
            Self::HighMid => 3,
            Self::Treble => 4,
        }
    }

    /// `[low, high)` in Hz.
    pub fn hz_range(self) -> (f32, f32) {
        match self {
            Self::Bass => (20.0, 150.0),
            Self::LowMid => (150.0, 400.0),
            Self::Mid => (400.0, 2000.0),
            Self::HighMid => (2000.0, 6000.0),
            Self::Treble => (6000.0, 20000.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bass => "bass",
            Self::LowMid => "low_mid",
            Self::Mid => "mid",
            Self::HighMid => "high_mid",
            Self::Treble => "treble",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioAnalysis {
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub treble: f32,
    pub overall: f32,
    pub peak: f32,
    pub rms: f32,
}

impl AudioAnalysis {
    pub fn band(&self, band: Band) -> f32 {
        match band {
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::Treble => self.treble,
        }
    }

    pub fn bands(&self) -> [f32; BAND_COUNT] {
        [self.bass, self.low_mid, self.mid, self.high_mid, self.treble]
    }

    pub fn is_finite(&self) -> bool {
        self.bands().iter().all(|v| v.is_finite())
            && self.overall.is_finite()
            && self.peak.is_finite()
            && self.rms.is_finite()
    }
}

pub(crate) fn finite_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() { v } else { fallback }
}

/// Bin ranges of the five bands for one `(sample_rate, fft_size)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandLayout {
    sample_rate: u32,
    fft_size: usize,
    bins: usize,
    ranges: [Range<usize>; BAND_COUNT],
}

impl BandLayout {
    /// Lays bands out over `bins` magnitudes of an `fft_size`-point transform.
    /// `bins` must be non-zero.
    pub fn new(sample_rate: u32, fft_size: usize, bins: usize) -> Self {
        let edge = |hz: f32| -> usize {
            if sample_rate == 0 {
                return 0;
            }
            // First bin whose centre frequency is >= hz.
            let b = (hz * fft_size as f32 / sample_rate as f32).ceil();
            (b.max(0.0) as usize).min(bins)
        };

        let last = bins.saturating_sub(1);
        let mut ranges: [Range<usize>; BAND_COUNT] = Default::default();
        let mut start = edge(Band::Bass.hz_range().0).min(last);
        for band in Band::ALL {
            let (_, high) = band.hz_range();
            let end = edge(high).max(start + 1).min(bins.max(1));
            ranges[band.index()] = start..end;
            // Once the spectrum runs out, the remaining bands share its last bin.
            start = end.min(last);
        }

        Self {
            sample_rate,
            fft_size,
            bins,
            ranges,
        }
    }

    pub fn range(&self, band: Band) -> Range<usize> {
        self.ranges[band.index()].clone()
    }

    pub fn ranges(&self) -> &[Range<usize>; BAND_COUNT] {
        &self.ranges
    }

    fn matches(&self, sample_rate: u32, fft_size: usize, bins: usize) -> bool {
        self.sample_rate == sample_rate && self.fft_size == fft_size && self.bins == bins
    }
}

/// Reduces spectra to [`AudioAnalysis`], caching the band layout between frames.
#[derive(Debug, Default)]
pub struct BandAnalyzer {
    layout: Option<BandLayout>,
}

impl BandAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self) -> Option<&BandLayout> {
        self.layout.as_ref()
    }

    pub fn analyze(&mut self, spectrum: &[f32], sample_rate: u32, fft_size: usize) -> AudioAnalysis {
        if spectrum.is_empty() {
            return AudioAnalysis::default();
        }

        let bins = spectrum.len();
        let stale = self
            .layout
            .as_ref()
            .is_none_or(|l| !l.matches(sample_rate, fft_size, bins));
        if stale {
            self.layout = Some(BandLayout::new(sample_rate, fft_size, bins));
        }
        let Some(layout) = self.layout.as_ref() else {
            return AudioAnalysis::default();
        };

        let mut total = 0.0f32;
        let mut peak = 0.0f32;
        for &m in spectrum {
            let m = finite_or(m, 0.0);
            total += m;
            peak = peak.max(m);
        }
        let overall = finite_or(total / bins as f32, 0.0);

        let mut bands = [0.0f32; BAND_COUNT];
        for band in Band::ALL {
            let range = layout.range(band);
            let count = range.len().max(1);
            let sum = spectrum[range].iter().map(|&m| finite_or(m, 0.0)).sum::<f32>();
            bands[band.index()] = finite_or(sum / count as f32, 0.0);
        }

        let rms = if overall > 0.0 { finite_or(overall.sqrt(), 0.0) } else { 0.0 };

        AudioAnalysis {
            bass: bands[0],
            low_mid: bands[1],
            mid: bands[2],
            high_mid: bands[3],
            treble: bands[4],
            overall,
            peak: finite_or(peak, 0.0),
            rms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_at_48k_1024() {
        let layout = BandLayout::new(48_000, 1024, 512);
        // 46.875 Hz per bin.
        assert_eq!(layout.range(Band::Bass), 1..4);
        assert_eq!(layout.range(Band::LowMid), 4..9);
        assert_eq!(layout.range(Band::Mid), 9..43);
        assert_eq!(layout.range(Band::HighMid), 43..128);
        assert_eq!(layout.range(Band::Treble), 128..427);
    }

    #[test]
    fn coarse_resolution_still_gives_every_band_a_bin() {
        let layout = BandLayout::new(48_000, 64, 32);
        let mut prev_end = None;
        for band in Band::ALL {
            let r = layout.range(band);
            assert!(!r.is_empty(), "{} empty", band.as_str());
            if let Some(end) = prev_end {
                assert_eq!(r.start, end, "{} not contiguous", band.as_str());
            }
            prev_end = Some(r.end);
        }
    }

    #[test]
    fn empty_spectrum_is_silence() {
        let mut analyzer = BandAnalyzer::new();
        assert_eq!(analyzer.analyze(&[], 48_000, 1024), AudioAnalysis::default());
        assert!(analyzer.layout().is_none());
    }

    #[test]
    fn layout_follows_the_transform_size() {
        let spectrum = vec![0.5f32; 512];
        let mut analyzer = BandAnalyzer::new();
        analyzer.analyze(&spectrum, 48_000, 1024);
        assert_eq!(analyzer.layout().map(|l| l.range(Band::Bass)), Some(1..4));

        analyzer.analyze(&spectrum[..256], 48_000, 512);
        assert_eq!(analyzer.layout().map(|l| l.range(Band::Bass)), Some(1..3));
    }

    #[test]
    fn nan_bins_are_ignored() {
        let mut spectrum = vec![1.0f32; 512];
        spectrum[2] = f32::NAN;
        spectrum[200] = f32::INFINITY;
        let a = BandAnalyzer::new().analyze(&spectrum, 48_000, 1024);
        assert!(a.is_finite());
        assert!(a.peak <= 1.0);
        assert!((a.bass - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn rms_is_sqrt_of_overall() {
        let spectrum = vec![4.0f32; 256];
        let a = BandAnalyzer::new().analyze(&spectrum, 44_100, 512);
        assert!((a.overall - 4.0).abs() < 1e-6);
        assert!((a.rms - 2.0).abs() < 1e-6);
        assert_eq!(a.peak, 4.0);
    }
}
