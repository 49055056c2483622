use crate::group::{CONTROL_COUNT, MIX_COUNT, control_name};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Named `enabled`/`sensitivity` bundle for every control of a group.
///
/// Arrays follow the fixed slot order of [`control_name`]: the five bands
/// (bass, low_mid, mid, high_mid, treble) then the ten parameters (size,
/// rotation, angle, translate_x, translate_y, scale_x, scale_y,
/// color_intensity, group_angle, num_objects). Mix flags are ordered bass,
/// mid, treble, overall.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactivePreset {
    pub name: String,
    pub enabled: [bool; CONTROL_COUNT],
    pub sensitivities: [f32; CONTROL_COUNT],
    pub frequency_mix: [bool; MIX_COUNT],
}

impl ReactivePreset {
    /// Everything disabled at unit sensitivity.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: [false; CONTROL_COUNT],
            sensitivities: [1.0; CONTROL_COUNT],
            frequency_mix: [false; MIX_COUNT],
        }
    }

    fn with(mut self, slots: &[usize], sensitivity: f32) -> Self {
        for &s in slots {
            self.enabled[s] = true;
            self.sensitivities[s] = sensitivity;
        }
        self
    }

    fn mix(mut self, flags: [bool; MIX_COUNT]) -> Self {
        self.frequency_mix = flags;
        self
    }
}

// Slot indices, see `ReactivePreset`.
const BASS: usize = 0;
const LOW_MID: usize = 1;
const MID: usize = 2;
const HIGH_MID: usize = 3;
const TREBLE: usize = 4;
const SIZE: usize = 5;
const ROTATION: usize = 6;
const ANGLE: usize = 7;
const TRANSLATE_X: usize = 8;
const TRANSLATE_Y: usize = 9;
const SCALE_X: usize = 10;
const SCALE_Y: usize = 11;
const COLOR_INTENSITY: usize = 12;
const GROUP_ANGLE: usize = 13;
const NUM_OBJECTS: usize = 14;

pub fn builtin_presets() -> Vec<ReactivePreset> {
    let all = (0..CONTROL_COUNT).collect::<Vec<_>>();
    vec![
        ReactivePreset::empty("Balanced")
            .with(&[BASS, MID, TREBLE, SIZE, ROTATION, COLOR_INTENSITY], 1.0),
        ReactivePreset::empty("Bass Dominant")
            .with(&[BASS, SIZE, TRANSLATE_X, SCALE_Y], 2.0)
            .mix([true, false, false, false]),
        ReactivePreset::empty("Mid Focus")
            .with(&[LOW_MID, MID, HIGH_MID], 1.5)
            .with(&[ROTATION, ANGLE, SCALE_X, TRANSLATE_Y], 1.2)
            .mix([false, true, false, false]),
        ReactivePreset::empty("Treble Sparkle")
            .with(&[HIGH_MID, TREBLE, COLOR_INTENSITY], 2.5)
            .with(&[ANGLE], 1.0)
            .mix([false, false, true, false]),
        ReactivePreset::empty("Full Spectrum")
            .with(&all, 1.0)
            .mix([true, true, true, true]),
        ReactivePreset::empty("Calm")
            .with(&[BASS, SIZE, GROUP_ANGLE, NUM_OBJECTS], 0.4),
    ]
}

pub fn find_preset<'a>(presets: &'a [ReactivePreset], query: &str) -> Option<&'a ReactivePreset> {
    let q = query.trim();
    if q.is_empty() {
        return None;
    }
    if let Ok(i) = q.parse::<usize>() {
        return presets.get(i);
    }
    let q = q.to_lowercase();
    presets
        .iter()
        .find(|p| p.name.to_lowercase() == q)
        .or_else(|| presets.iter().find(|p| p.name.to_lowercase().contains(&q)))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PresetError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("preset bank must contain at least one preset")]
    Empty,
    #[error("duplicate preset: {0}")]
    DuplicatePreset(String),
    #[error("preset name {0:?} cannot be written back as text")]
    InvalidName(String),
    #[error("preset '{preset}' is missing '{field}'")]
    MissingField { preset: String, field: &'static str },
    #[error("invalid sensitivity for '{control}' in preset '{preset}': {value}")]
    InvalidSensitivity {
        preset: String,
        control: &'static str,
        value: f32,
    },
}

/// Collection of presets loaded from the line-oriented text format:
///
/// ```text
/// preset <name...>
/// enabled <15 x 0|1>
/// sensitivity <15 x number>
/// mix <4 x 0|1>          # optional, defaults to all off
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PresetBank {
    presets: Vec<ReactivePreset>,
}

struct Draft {
    preset: ReactivePreset,
    has_enabled: bool,
    has_sensitivity: bool,
}

impl Draft {
    fn finish(self) -> Result<ReactivePreset, PresetError> {
        if !self.has_enabled {
            return Err(PresetError::MissingField {
                preset: self.preset.name,
                field: "enabled",
            });
        }
        if !self.has_sensitivity {
            return Err(PresetError::MissingField {
                preset: self.preset.name,
                field: "sensitivity",
            });
        }
        Ok(self.preset)
    }
}

impl PresetBank {
    pub fn builtin() -> Self {
        Self {
            presets: builtin_presets(),
        }
    }

    /// Builds a bank from presets assembled in code, checked like a parsed one.
    pub fn from_presets(presets: Vec<ReactivePreset>) -> Result<Self, PresetError> {
        let bank = Self { presets };
        bank.validate()?;
        Ok(bank)
    }

    pub fn parse(text: &str) -> Result<Self, PresetError> {
        let mut presets = Vec::new();
        let mut draft: Option<Draft> = None;

        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();

            if key == "preset" {
                if rest.is_empty() {
                    return Err(parse_err(line_no, "preset expects a name"));
                }
                if let Some(d) = draft.take() {
                    presets.push(d.finish()?);
                }
                draft = Some(Draft {
                    preset: ReactivePreset::empty(rest),
                    has_enabled: false,
                    has_sensitivity: false,
                });
                continue;
            }

            let Some(d) = draft.as_mut() else {
                return Err(parse_err(line_no, "expected 'preset <name>' first"));
            };
            let tokens = rest.split_whitespace().collect::<Vec<_>>();
            match key {
                "enabled" => {
                    d.preset.enabled = parse_flags::<CONTROL_COUNT>(&tokens, line_no, "enabled")?;
                    d.has_enabled = true;
                }
                "sensitivity" => {
                    d.preset.sensitivities = parse_values(&tokens, line_no)?;
                    d.has_sensitivity = true;
                }
                "mix" => {
                    d.preset.frequency_mix = parse_flags::<MIX_COUNT>(&tokens, line_no, "mix")?;
                }
                other => {
                    return Err(parse_err(line_no, &format!("unknown key '{other}'")));
                }
            }
        }
        if let Some(d) = draft.take() {
            presets.push(d.finish()?);
        }

        let bank = Self { presets };
        bank.validate()?;
        Ok(bank)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| PresetError::Io(e.to_string()))?;
        Self::parse(&text)
    }

    pub fn validate(&self) -> Result<(), PresetError> {
        if self.presets.is_empty() {
            return Err(PresetError::Empty);
        }
        let mut seen = HashSet::new();
        for p in &self.presets {
            let name_fits_a_line = !p.name.is_empty()
                && p.name.trim() == p.name
                && !p.name.contains(['#', '\n', '\r']);
            if !name_fits_a_line {
                return Err(PresetError::InvalidName(p.name.clone()));
            }
            if !seen.insert(p.name.to_lowercase()) {
                return Err(PresetError::DuplicatePreset(p.name.clone()));
            }
            for (slot, &value) in p.sensitivities.iter().enumerate() {
                if !value.is_finite() || value < 0.0 {
                    return Err(PresetError::InvalidSensitivity {
                        preset: p.name.clone(),
                        control: control_name(slot).unwrap_or("?"),
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let flags = |f: &[bool]| {
            f.iter()
                .map(|&b| if b { "1" } else { "0" })
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.presets
            .iter()
            .map(|p| {
                let sens = p
                    .sensitivities
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "preset {}\nenabled {}\nsensitivity {}\nmix {}\n",
                    p.name,
                    flags(&p.enabled),
                    sens,
                    flags(&p.frequency_mix)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn presets(&self) -> &[ReactivePreset] {
        &self.presets
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn find(&self, query: &str) -> Option<&ReactivePreset> {
        find_preset(&self.presets, query)
    }

    /// Adds the built-ins whose names are not already taken.
    pub fn merge_builtins(&mut self) {
        for b in builtin_presets() {
            let taken = self
                .presets
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&b.name));
            if !taken {
                self.presets.push(b);
            }
        }
    }
}

fn parse_err(line: usize, message: &str) -> PresetError {
    PresetError::Parse {
        line,
        message: message.to_string(),
    }
}

fn parse_flags<const N: usize>(
    tokens: &[&str],
    line: usize,
    key: &str,
) -> Result<[bool; N], PresetError> {
    if tokens.len() != N {
        return Err(parse_err(
            line,
            &format!("{key} expects {N} flags, got {}", tokens.len()),
        ));
    }
    let mut out = [false; N];
    for (dst, tok) in out.iter_mut().zip(tokens) {
        *dst = parse_bool(tok)
            .ok_or_else(|| parse_err(line, &format!("invalid flag '{tok}' in {key}")))?;
    }
    Ok(out)
}

fn parse_values(tokens: &[&str], line: usize) -> Result<[f32; CONTROL_COUNT], PresetError> {
    if tokens.len() != CONTROL_COUNT {
        return Err(parse_err(
            line,
            &format!(
                "sensitivity expects {CONTROL_COUNT} values, got {}",
                tokens.len()
            ),
        ));
    }
    let mut out = [0.0f32; CONTROL_COUNT];
    for (dst, tok) in out.iter_mut().zip(tokens) {
        *dst = tok
            .parse::<f32>()
            .map_err(|_| parse_err(line, &format!("invalid sensitivity '{tok}'")))?;
    }
    Ok(out)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
