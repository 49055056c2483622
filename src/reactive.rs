use crate::bands::finite_or;

/// Raw band values are clamped to `[0, RAW_CEILING]` before mapping.
pub const RAW_CEILING: f32 = 10.0;
/// Frame time assumed when the caller reports a non-positive or tiny delta (60 Hz).
pub const FALLBACK_DT: f32 = 0.016;
pub const DEFAULT_SMOOTHING: f32 = 0.004;

const MIN_DT: f32 = 0.001;
const MIN_FACTOR: f32 = 0.001;

/// One audio-driven parameter: maps a raw band value into `[min, max]`-scaled
/// space and eases toward it with a first-order low-pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactiveControl {
    pub enabled: bool,
    pub sensitivity: f32,
    pub min_value: f32,
    pub max_value: f32,
    /// Seconds-scaled rate: the per-update factor is `smoothing / dt`, clamped.
    pub smoothing: f32,
    current_value: f32,
    target_value: f32,
}

impl Default for ReactiveControl {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl ReactiveControl {
    pub fn new(min_value: f32, max_value: f32) -> Self {
        Self {
            enabled: false,
            sensitivity: 1.0,
            min_value,
            max_value,
            smoothing: DEFAULT_SMOOTHING,
            current_value: min_value,
            target_value: min_value,
        }
    }

    pub fn current_value(&self) -> f32 {
        self.current_value
    }

    pub fn target_value(&self) -> f32 {
        self.target_value
    }

    /// Value the control would ease toward for `raw`, without moving it.
    pub fn target_for(&self, raw: f32) -> f32 {
        let raw = finite_or(raw, 0.0).clamp(0.0, RAW_CEILING);
        let span = self.max_value - self.min_value;
        finite_or(self.min_value + span * (raw * self.sensitivity), self.min_value)
    }

    /// Advances one frame toward the target for `raw`. No-op while disabled.
    pub fn apply(&mut self, raw: f32, dt: f32) {
        if !self.enabled {
            return;
        }
        let target = self.target_for(raw);
        self.target_value = target;

        let dt = if !dt.is_finite() || dt <= MIN_DT { FALLBACK_DT } else { dt };
        let f = finite_or(self.smoothing / dt, MIN_FACTOR).clamp(MIN_FACTOR, 1.0);
        let next = self.current_value + (target - self.current_value) * f;
        self.current_value = finite_or(next, self.min_value);
    }

    pub fn reset(&mut self) {
        self.current_value = self.min_value;
        self.target_value = self.min_value;
    }
}

/// Free-function form of [`ReactiveControl::apply`].
pub fn apply_control(control: &mut ReactiveControl, raw: f32, dt: f32) {
    control.apply(raw, dt);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(min: f32, max: f32, smoothing: f32) -> ReactiveControl {
        let mut c = ReactiveControl::new(min, max);
        c.enabled = true;
        c.smoothing = smoothing;
        c
    }

    #[test]
    fn disabled_control_never_moves() {
        let mut c = ReactiveControl::new(0.5, 2.0);
        for _ in 0..100 {
            apply_control(&mut c, 3.0, 0.016);
        }
        assert_eq!(c.current_value(), 0.5);
        assert_eq!(c.target_value(), 0.5);
    }

    #[test]
    fn target_uses_clamped_raw_and_sensitivity() {
        let mut c = ReactiveControl::new(1.0, 3.0);
        c.sensitivity = 0.5;
        assert!((c.target_for(1.0) - 2.0).abs() < 1e-6);
        // Raw is clamped to 10 before scaling.
        assert!((c.target_for(50.0) - 11.0).abs() < 1e-5);
        assert_eq!(c.target_for(-4.0), 1.0);
        assert_eq!(c.target_for(f32::NAN), 1.0);
    }

    #[test]
    fn tiny_delta_uses_fallback() {
        let mut a = enabled(0.0, 1.0, 0.004);
        let mut b = enabled(0.0, 1.0, 0.004);
        a.apply(1.0, 0.0);
        b.apply(1.0, FALLBACK_DT);
        assert_eq!(a.current_value(), b.current_value());
        assert!((a.current_value() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn factor_is_clamped_to_one() {
        let mut c = enabled(0.0, 1.0, 10.0);
        c.apply(0.8, 0.016);
        assert!((c.current_value() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn non_finite_smoothing_falls_back_to_slowest_factor() {
        let mut c = enabled(0.0, 1.0, f32::NAN);
        c.apply(1.0, 0.016);
        assert!(c.current_value().is_finite());
        assert!((c.current_value() - MIN_FACTOR).abs() < 1e-6);
    }

    #[test]
    fn reset_returns_to_min() {
        let mut c = enabled(0.2, 1.0, 1.0);
        c.apply(1.0, 0.016);
        assert!(c.current_value() > 0.2);
        c.reset();
        assert_eq!(c.current_value(), 0.2);
        assert_eq!(c.target_value(), 0.2);
    }
}
