//! Two-pole Butterworth low-pass filter for one coordinate stream
//!
//! Coefficients come from the bilinear-transform warp of the analog
//! Butterworth prototype. The recurrence combines the last three inputs and
//! the last two outputs:
//!
//! ```text
//! y0 = a0·x0 + a1·x1 + a2·x2 − b1·y1 − b2·y2
//! ```
//!
//! All state lives in fixed-size arrays, so `process` never allocates.

use std::f64::consts::{PI, SQRT_2};

use crate::error::ConfigError;

/// Sensor polling rate the filter is tuned for (Hz)
pub const DEFAULT_SAMPLE_RATE: f64 = 350.0;

/// Cutoff frequency for hand smoothing (Hz)
pub const DEFAULT_CUTOFF: f64 = 15.0;

/// Filter coefficients for one operating point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    /// Feedforward coefficients (a0, a1, a2)
    pub feedforward: [f64; 3],
    /// Feedback coefficients (b1, b2)
    pub feedback: [f64; 2],
}

impl Coefficients {
    /// Compute low-pass coefficients, rejecting operating points that would
    /// produce NaN or an unstable filter.
    ///
    /// The warp uses `2π·fc/fs`, so the tangent turns negative past a quarter
    /// of the sample rate and the poles leave the unit circle. Usable cutoffs
    /// are therefore `(0, fs/4)`.
    pub fn low_pass(sample_rate: f64, cutoff: f64) -> Result<Self, ConfigError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        let invalid = ConfigError::InvalidCutoff {
            cutoff,
            sample_rate,
        };
        if !cutoff.is_finite() || cutoff <= 0.0 || cutoff >= sample_rate / 4.0 {
            return Err(invalid);
        }

        let warp = (2.0 * PI * cutoff / sample_rate).tan();
        if !warp.is_finite() || warp <= 0.0 {
            return Err(invalid);
        }
        let warp_sq = warp * warp;

        let gain = 1.0 / (1.0 + SQRT_2 / warp + 2.0 / warp_sq);

        let coefficients = Self {
            feedforward: [gain, 2.0 * gain, gain],
            feedback: [
                (2.0 - 4.0 / warp_sq) * gain,
                (1.0 - SQRT_2 / warp + 2.0 / warp_sq) * gain,
            ],
        };
        if !coefficients.is_stable() {
            return Err(invalid);
        }
        Ok(coefficients)
    }

    /// Both poles strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        let [b1, b2] = self.feedback;
        b1.is_finite() && b2.is_finite() && b2.abs() < 1.0 && b1.abs() < 1.0 + b2
    }
}

/// Stateful smoother for a single scalar axis
#[derive(Debug, Clone)]
pub struct AxisFilter {
    coefficients: Coefficients,
    /// x0, x1, x2 (newest first)
    inputs: [f64; 3],
    /// y1, y2 (newest first)
    outputs: [f64; 2],
}

impl AxisFilter {
    /// Create a filter for the given operating point with zeroed history
    pub fn new(sample_rate: f64, cutoff: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            coefficients: Coefficients::low_pass(sample_rate, cutoff)?,
            inputs: [0.0; 3],
            outputs: [0.0; 2],
        })
    }

    /// Create a filter from already validated coefficients
    pub fn from_coefficients(coefficients: Coefficients) -> Self {
        Self {
            coefficients,
            inputs: [0.0; 3],
            outputs: [0.0; 2],
        }
    }

    /// Recompute coefficients; history is kept so the stream stays continuous
    pub fn configure(&mut self, sample_rate: f64, cutoff: f64) -> Result<(), ConfigError> {
        self.coefficients = Coefficients::low_pass(sample_rate, cutoff)?;
        Ok(())
    }

    /// Seed the history with a steady state at `initial`
    ///
    /// With both input and output history at the same value, the next
    /// `process(initial)` returns exactly `initial`.
    pub fn reset(&mut self, initial: f64) {
        self.inputs = [initial; 3];
        self.outputs = [initial; 2];
    }

    /// Filter one sample and return the smoothed value
    pub fn process(&mut self, sample: f64) -> f64 {
        let [a0, a1, a2] = self.coefficients.feedforward;
        let [b1, b2] = self.coefficients.feedback;

        self.inputs = [sample, self.inputs[0], self.inputs[1]];

        let output = a0 * self.inputs[0] + a1 * self.inputs[1] + a2 * self.inputs[2]
            - b1 * self.outputs[0]
            - b2 * self.outputs[1];

        self.outputs = [output, self.outputs[0]];
        output
    }

    /// Most recent output
    pub fn last(&self) -> f64 {
        self.outputs[0]
    }

    pub fn coefficients(&self) -> Coefficients {
        self.coefficients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_filter() -> AxisFilter {
        AxisFilter::new(DEFAULT_SAMPLE_RATE, DEFAULT_CUTOFF).unwrap()
    }

    #[test]
    fn test_rejects_bad_operating_points() {
        assert_eq!(
            AxisFilter::new(0.0, 15.0).unwrap_err(),
            ConfigError::InvalidSampleRate(0.0)
        );
        assert!(AxisFilter::new(-1.0, 15.0).is_err());
        assert!(AxisFilter::new(f64::NAN, 15.0).is_err());
        assert!(AxisFilter::new(350.0, 0.0).is_err());
        assert!(AxisFilter::new(350.0, -3.0).is_err());
        assert!(AxisFilter::new(350.0, 175.0).is_err());
        assert!(AxisFilter::new(350.0, 400.0).is_err());
    }

    #[test]
    fn test_rejects_cutoff_above_quarter_rate() {
        // tan(2π·100/350) < 0 would put a pole outside the unit circle
        assert_eq!(
            Coefficients::low_pass(350.0, 100.0).unwrap_err(),
            ConfigError::InvalidCutoff {
                cutoff: 100.0,
                sample_rate: 350.0
            }
        );
        assert!(AxisFilter::new(350.0, 87.5).is_err());
        assert!(AxisFilter::new(350.0, 170.0).is_err());
    }

    #[test]
    fn test_highest_accepted_cutoff_stays_bounded() {
        let mut filter = AxisFilter::new(350.0, 87.0).unwrap();
        assert!(filter.coefficients().is_stable());
        filter.reset(0.0);

        let mut y = 0.0;
        for i in 0..2000 {
            let x = if i % 2 == 0 { 100.0 } else { -100.0 };
            y = filter.process(x);
            assert!(y.abs() < 1_000.0, "diverged at sample {}: {}", i, y);
        }
        assert!(y.is_finite());

        for _ in 0..2000 {
            y = filter.process(50.0);
        }
        assert!((y - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_configure_failure_keeps_previous_coefficients() {
        let mut filter = default_filter();
        let before = filter.coefficients();

        assert!(filter.configure(350.0, 200.0).is_err());
        assert_eq!(filter.coefficients(), before);
    }

    #[test]
    fn test_unity_dc_gain() {
        let c = default_filter().coefficients();
        let forward: f64 = c.feedforward.iter().sum();
        let back = 1.0 + c.feedback[0] + c.feedback[1];
        assert!((forward / back - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_has_no_transient() {
        let mut filter = default_filter();
        filter.reset(320.0);

        for _ in 0..50 {
            let y = filter.process(320.0);
            assert!((y - 320.0).abs() < 1e-9, "unexpected transient: {}", y);
        }
    }

    #[test]
    fn test_converges_to_step() {
        let mut filter = default_filter();
        filter.reset(0.0);

        let mut y = 0.0;
        for _ in 0..500 {
            y = filter.process(100.0);
        }
        assert!((y - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_smooths_alternating_noise() {
        let mut filter = default_filter();
        filter.reset(100.0);

        let mut max_dev: f64 = 0.0;
        for i in 0..200 {
            let noisy = if i % 2 == 0 { 110.0 } else { 90.0 };
            let y = filter.process(noisy);
            if i > 20 {
                max_dev = max_dev.max((y - 100.0).abs());
            }
        }
        // Nyquist-rate noise is almost entirely removed
        assert!(max_dev < 1.0, "max deviation {}", max_dev);
    }

    proptest! {
        #[test]
        fn prop_output_is_deterministic(
            seed in -1000.0f64..1000.0,
            samples in proptest::collection::vec(-2000.0f64..2000.0, 1..200),
        ) {
            let mut a = default_filter();
            let mut b = default_filter();
            a.reset(seed);
            b.reset(seed);

            for s in &samples {
                let ya = a.process(*s);
                let yb = b.process(*s);
                prop_assert_eq!(ya.to_bits(), yb.to_bits());
                prop_assert!(ya.is_finite());
            }
        }
    }
}
