//! Adaptive exponential smoothing for quantized, noisy analog readings.
//!
//! Small differences between the raw reading and the current estimate are
//! smoothed heavily, large differences are followed almost immediately.

/// Number of distinct values the analog input can take.
pub const RESOLUTION: f64 = 1024.0;

/// Scales the raw difference so typical jitter lands on the flat part of the snap curve.
pub const SNAP_MULTIPLIER: f64 = 0.007;

#[derive(Clone, Copy, Debug)]
pub struct FilterConfig {
    pub resolution: f64,
    pub snap_multiplier: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            resolution: RESOLUTION,
            snap_multiplier: SNAP_MULTIPLIER,
        }
    }
}

/// Maps a scaled difference onto a tracking weight in `[0, 1]`.
///
/// `snap_curve(0) == 0` (output frozen), saturating at 1 (output jumps to the input).
pub fn snap_curve(x: f64) -> f64 {
    let y = 1.0 / (x + 1.0);
    let y = (1.0 - y) * 2.0;
    y.min(1.0)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FilterState {
    pub smoothed: f64,
}

#[derive(Clone, Debug)]
pub struct NoiseFilter {
    cfg: FilterConfig,
    state: Option<FilterState>,
}

impl NoiseFilter {
    pub fn new(cfg: FilterConfig) -> Self {
        Self { cfg, state: None }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.cfg
    }

    /// Current estimate, or `None` before the first reading.
    pub fn value(&self) -> Option<f64> {
        self.state.map(|s| s.smoothed)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Feed one raw reading and return the updated estimate.
    ///
    /// The first reading seeds the estimate directly. Non-finite readings are
    /// ignored and the previous estimate is returned.
    pub fn read(&mut self, raw: f64) -> f64 {
        let upper = self.cfg.resolution - 1.0;

        if !raw.is_finite() {
            return self.value().unwrap_or(0.0);
        }

        let state = match self.state.as_mut() {
            Some(s) => s,
            None => {
                let smoothed = raw.clamp(0.0, upper);
                self.state = Some(FilterState { smoothed });
                return smoothed;
            }
        };

        let diff = (raw - state.smoothed).abs();
        let snap = snap_curve(diff * self.cfg.snap_multiplier);
        state.smoothed += (raw - state.smoothed) * snap;
        state.smoothed = state.smoothed.clamp(0.0, upper);
        state.smoothed
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_curve_starts_at_zero_and_saturates() {
        assert_eq!(snap_curve(0.0), 0.0);
        assert_eq!(snap_curve(1.0), 1.0);
        assert_eq!(snap_curve(1e6), 1.0);

        let mut prev = snap_curve(0.0);
        for i in 1..2000 {
            let y = snap_curve(i as f64 * 0.005);
            assert!(y >= prev, "snap curve decreased at step {i}");
            assert!(y <= 1.0);
            prev = y;
        }
    }

    #[test]
    fn first_reading_seeds_estimate() {
        let mut f = NoiseFilter::default();
        assert_eq!(f.value(), None);
        assert_eq!(f.read(480.0), 480.0);
        assert_eq!(f.value(), Some(480.0));
    }

    #[test]
    fn jitter_is_suppressed() {
        let mut f = NoiseFilter::default();
        f.read(400.0);
        let mut last = 0.0;
        for _ in 0..10 {
            for raw in [400.0, 402.0, 401.0, 403.0] {
                last = f.read(raw);
            }
        }
        assert!((last - 400.0).abs() < 2.0, "estimate drifted to {last}");

        let before = f.read(402.0);
        let after = f.read(401.0);
        assert!((after - before).abs() < 0.1);
    }

    #[test]
    fn large_jump_is_tracked_quickly() {
        let mut f = NoiseFilter::default();
        f.read(400.0);
        let mut est = 400.0;
        for _ in 0..3 {
            est = f.read(900.0);
        }
        assert!((est - 900.0).abs() <= 0.05 * 900.0, "estimate {est}");
    }

    #[test]
    fn output_stays_within_resolution() {
        let mut f = NoiseFilter::default();
        for raw in [-500.0, 5000.0, 1023.0, 0.0, 1e9, -1e9, 512.0] {
            let v = f.read(raw);
            assert!((0.0..=RESOLUTION - 1.0).contains(&v), "{raw} -> {v}");
        }
    }

    #[test]
    fn non_finite_reading_is_ignored() {
        let mut f = NoiseFilter::default();
        f.read(300.0);
        assert_eq!(f.read(f64::NAN), 300.0);
        assert_eq!(f.read(f64::INFINITY), 300.0);
        assert_eq!(f.value(), Some(300.0));
    }

    #[test]
    fn reset_forgets_estimate() {
        let mut f = NoiseFilter::default();
        f.read(100.0);
        f.reset();
        assert_eq!(f.read(700.0), 700.0);
    }
}
