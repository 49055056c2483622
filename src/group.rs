//! Per-frame state of the audio-reactive visual groups.
//!
//! Each group carries one control per band plus one per animated parameter.
//! Which analysis value feeds which parameter is a [`ParamRouting`] chosen by
//! the caller; this module only applies it.

use crate::bands::{AudioAnalysis, BAND_COUNT, Band};
use crate::preset::ReactivePreset;
use crate::reactive::ReactiveControl;
use log::debug;

pub const PARAM_COUNT: usize = 10;
/// Band controls first, then parameter controls. This is the preset order.
pub const CONTROL_COUNT: usize = BAND_COUNT + PARAM_COUNT;
pub const MIX_COUNT: usize = 4;
pub const GROUP_COUNT: usize = 3;
/// Multiplier applied to a source value whose frequency-mix flag is set.
pub const MIX_BOOST: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Size,
    Rotation,
    Angle,
    TranslateX,
    TranslateY,
    ScaleX,
    ScaleY,
    ColorIntensity,
    GroupAngle,
    NumObjects,
}

impl Param {
    pub const ALL: [Param; PARAM_COUNT] = [
        Param::Size,
        Param::Rotation,
        Param::Angle,
        Param::TranslateX,
        Param::TranslateY,
        Param::ScaleX,
        Param::ScaleY,
        Param::ColorIntensity,
        Param::GroupAngle,
        Param::NumObjects,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Size => 0,
            Self::Rotation => 1,
            Self::Angle => 2,
            Self::TranslateX => 3,
            Self::TranslateY => 4,
            Self::ScaleX => 5,
            Self::ScaleY => 6,
            Self::ColorIntensity => 7,
            Self::GroupAngle => 8,
            Self::NumObjects => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Rotation => "rotation",
            Self::Angle => "angle",
            Self::TranslateX => "translate_x",
            Self::TranslateY => "translate_y",
            Self::ScaleX => "scale_x",
            Self::ScaleY => "scale_y",
            Self::ColorIntensity => "color_intensity",
            Self::GroupAngle => "group_angle",
            Self::NumObjects => "num_objects",
        }
    }

    /// Default `(min, max)` the parameter is driven across.
    pub fn default_range(self) -> (f32, f32) {
        match self {
            Self::Size => (0.2, 1.5),
            Self::Rotation => (0.0, 360.0),
            Self::Angle => (0.0, 360.0),
            Self::TranslateX => (-1.0, 1.0),
            Self::TranslateY => (-1.0, 1.0),
            Self::ScaleX => (0.5, 2.0),
            Self::ScaleY => (0.5, 2.0),
            Self::ColorIntensity => (0.0, 1.0),
            Self::GroupAngle => (0.0, 360.0),
            Self::NumObjects => (1.0, 12.0),
        }
    }
}

/// Name of preset slot `slot` (bands first, then parameters).
pub fn control_name(slot: usize) -> Option<&'static str> {
    if slot < BAND_COUNT {
        Some(Band::ALL[slot].as_str())
    } else {
        Param::ALL.get(slot - BAND_COUNT).map(|p| p.as_str())
    }
}

/// Analysis value a parameter follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Band(Band),
    Overall,
    Peak,
    Rms,
}

impl ParamSource {
    pub fn value(self, analysis: &AudioAnalysis) -> f32 {
        match self {
            Self::Band(b) => analysis.band(b),
            Self::Overall => analysis.overall,
            Self::Peak => analysis.peak,
            Self::Rms => analysis.rms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRouting {
    sources: [ParamSource; PARAM_COUNT],
}

impl Default for ParamRouting {
    fn default() -> Self {
        Self {
            sources: [
                ParamSource::Band(Band::Bass),
                ParamSource::Band(Band::Mid),
                ParamSource::Band(Band::HighMid),
                ParamSource::Band(Band::Bass),
                ParamSource::Band(Band::LowMid),
                ParamSource::Band(Band::Mid),
                ParamSource::Band(Band::Bass),
                ParamSource::Band(Band::Treble),
                ParamSource::Overall,
                ParamSource::Peak,
            ],
        }
    }
}

impl ParamRouting {
    pub fn new(sources: [ParamSource; PARAM_COUNT]) -> Self {
        Self { sources }
    }

    /// Starting routing of group `idx`: group 0 follows the low end, group 1
    /// the mids, group 2 the top end. Out-of-range indices get the default.
    pub fn for_group(idx: usize) -> Self {
        use ParamSource::{Band as B, Overall, Peak, Rms};
        match idx {
            1 => Self::new([
                B(Band::LowMid),
                B(Band::Mid),
                B(Band::HighMid),
                B(Band::Mid),
                B(Band::LowMid),
                B(Band::HighMid),
                B(Band::Mid),
                B(Band::HighMid),
                Rms,
                B(Band::Mid),
            ]),
            2 => Self::new([
                B(Band::HighMid),
                B(Band::Treble),
                B(Band::Treble),
                B(Band::HighMid),
                B(Band::Treble),
                B(Band::Treble),
                B(Band::HighMid),
                B(Band::Treble),
                Peak,
                Overall,
            ]),
            _ => Self::default(),
        }
    }

    pub fn source(&self, param: Param) -> ParamSource {
        self.sources[param.index()]
    }

    pub fn set(&mut self, param: Param, source: ParamSource) {
        self.sources[param.index()] = source;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrequencyMix {
    pub bass: bool,
    pub mid: bool,
    pub treble: bool,
    pub overall: bool,
}

impl FrequencyMix {
    /// Order: bass, mid, treble, overall.
    pub fn from_flags(flags: [bool; MIX_COUNT]) -> Self {
        Self {
            bass: flags[0],
            mid: flags[1],
            treble: flags[2],
            overall: flags[3],
        }
    }

    pub fn flags(&self) -> [bool; MIX_COUNT] {
        [self.bass, self.mid, self.treble, self.overall]
    }

    fn boosts(&self, source: ParamSource) -> bool {
        match source {
            ParamSource::Band(Band::Bass | Band::LowMid) => self.bass,
            ParamSource::Band(Band::Mid | Band::HighMid) => self.mid,
            ParamSource::Band(Band::Treble) => self.treble,
            ParamSource::Overall | ParamSource::Peak | ParamSource::Rms => self.overall,
        }
    }

    pub fn sample(&self, source: ParamSource, analysis: &AudioAnalysis) -> f32 {
        let v = source.value(analysis);
        if self.boosts(source) { v * MIX_BOOST } else { v }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactiveGroup {
    bands: [ReactiveControl; BAND_COUNT],
    params: [ReactiveControl; PARAM_COUNT],
    pub mix: FrequencyMix,
}

impl Default for ReactiveGroup {
    fn default() -> Self {
        Self {
            bands: std::array::from_fn(|_| ReactiveControl::new(0.0, 1.0)),
            params: std::array::from_fn(|i| {
                let (min, max) = Param::ALL[i].default_range();
                ReactiveControl::new(min, max)
            }),
            mix: FrequencyMix::default(),
        }
    }
}

impl ReactiveGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn band(&self, band: Band) -> &ReactiveControl {
        &self.bands[band.index()]
    }

    pub fn band_mut(&mut self, band: Band) -> &mut ReactiveControl {
        &mut self.bands[band.index()]
    }

    pub fn param(&self, param: Param) -> &ReactiveControl {
        &self.params[param.index()]
    }

    pub fn param_mut(&mut self, param: Param) -> &mut ReactiveControl {
        &mut self.params[param.index()]
    }

    /// Control at preset slot `slot`.
    pub fn control(&self, slot: usize) -> Option<&ReactiveControl> {
        if slot < BAND_COUNT {
            self.bands.get(slot)
        } else {
            self.params.get(slot - BAND_COUNT)
        }
    }

    fn control_mut(&mut self, slot: usize) -> Option<&mut ReactiveControl> {
        if slot < BAND_COUNT {
            self.bands.get_mut(slot)
        } else {
            self.params.get_mut(slot - BAND_COUNT)
        }
    }

    pub fn controls(&self) -> impl Iterator<Item = &ReactiveControl> {
        self.bands.iter().chain(self.params.iter())
    }

    /// Overwrites `enabled`/`sensitivity` of every control and the mix flags.
    /// Ranges and current values are left alone.
    pub fn apply_preset(&mut self, preset: &ReactivePreset) {
        for slot in 0..CONTROL_COUNT {
            if let Some(c) = self.control_mut(slot) {
                c.enabled = preset.enabled[slot];
                c.sensitivity = preset.sensitivities[slot];
            }
        }
        self.mix = FrequencyMix::from_flags(preset.frequency_mix);
    }

    pub fn update(&mut self, analysis: &AudioAnalysis, routing: &ParamRouting, dt: f32) {
        for band in Band::ALL {
            let raw = self.mix.sample(ParamSource::Band(band), analysis);
            self.bands[band.index()].apply(raw, dt);
        }
        for param in Param::ALL {
            let raw = self.mix.sample(routing.source(param), analysis);
            self.params[param.index()].apply(raw, dt);
        }
    }

    pub fn reset(&mut self) {
        for c in self.bands.iter_mut().chain(self.params.iter_mut()) {
            c.reset();
        }
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        let visible = |c: &ReactiveControl| c.enabled.then_some(c.current_value());
        GroupSnapshot {
            bands: std::array::from_fn(|i| visible(&self.bands[i])),
            params: std::array::from_fn(|i| visible(&self.params[i])),
        }
    }
}

/// Current values of a group's enabled controls; `None` where disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupSnapshot {
    pub bands: [Option<f32>; BAND_COUNT],
    pub params: [Option<f32>; PARAM_COUNT],
}

impl GroupSnapshot {
    pub fn band(&self, band: Band) -> Option<f32> {
        self.bands[band.index()]
    }

    pub fn param(&self, param: Param) -> Option<f32> {
        self.params[param.index()]
    }
}

/// The three visual groups driven together once per frame. Each group
/// reads the analysis through its own routing.
#[derive(Debug, Clone)]
pub struct ReactiveScene {
    groups: [ReactiveGroup; GROUP_COUNT],
    routing: [ParamRouting; GROUP_COUNT],
}

impl Default for ReactiveScene {
    fn default() -> Self {
        Self {
            groups: Default::default(),
            routing: std::array::from_fn(ParamRouting::for_group),
        }
    }
}

impl ReactiveScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routing(&self, idx: usize) -> Option<&ParamRouting> {
        self.routing.get(idx)
    }

    pub fn group(&self, idx: usize) -> Option<&ReactiveGroup> {
        self.groups.get(idx)
    }

    pub fn group_mut(&mut self, idx: usize) -> Option<&mut ReactiveGroup> {
        self.groups.get_mut(idx)
    }

    pub fn set_routing(&mut self, idx: usize, routing: ParamRouting) {
        if let Some(r) = self.routing.get_mut(idx) {
            *r = routing;
        }
    }

    pub fn apply_preset(&mut self, preset: &ReactivePreset) {
        for g in &mut self.groups {
            g.apply_preset(preset);
        }
        debug!("applied reactive preset '{}' to all groups", preset.name);
    }

    pub fn update(&mut self, analysis: &AudioAnalysis, dt: f32) {
        for (g, r) in self.groups.iter_mut().zip(self.routing.iter()) {
            g.update(analysis, r, dt);
        }
    }

    pub fn reset(&mut self) {
        for g in &mut self.groups {
            g.reset();
        }
    }

    pub fn snapshot(&self) -> [GroupSnapshot; GROUP_COUNT] {
        std::array::from_fn(|i| self.groups[i].snapshot())
    }
}
