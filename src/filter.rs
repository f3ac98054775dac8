//! Adaptive low-pass ("one-euro") smoothing for scalars, vectors and unit quaternions.
//!
//! Every filter measures its own sampling rate from the timestamps it is fed,
//! so the consumer cadence does not need to be fixed.

use crate::types::Pose;
use crate::{PoseStreamError, Result};

/// Sampling rate assumed until two increasing timestamps have been seen.
pub const DEFAULT_FREQUENCY: f64 = 60.0;

/// Lower clamp applied by [`SmoothingParams::nudge`].
pub const MIN_TUNED_CUTOFF: f64 = 0.01;

/// Coefficients of one filtered channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    /// Cutoff frequency (Hz) used when the signal is static.
    pub min_cutoff: f64,
    /// Speed coefficient: how much the cutoff opens per unit of signal velocity.
    pub beta: f64,
    /// Cutoff frequency (Hz) of the internal derivative filter.
    pub d_cutoff: f64,
}

impl SmoothingParams {
    /// Tuned defaults for marker position.
    pub const POSITION: SmoothingParams = SmoothingParams {
        min_cutoff: 0.70,
        beta: 0.67,
        d_cutoff: 1.0,
    };

    /// Tuned defaults for marker orientation.
    pub const ROTATION: SmoothingParams = SmoothingParams {
        min_cutoff: 0.16,
        beta: 0.25,
        d_cutoff: 1.0,
    };

    /// Validated constructor. Cutoffs must be positive and finite, beta non-negative.
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Result<Self> {
        let params = Self {
            min_cutoff,
            beta,
            d_cutoff,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_cutoff.is_finite() && self.min_cutoff > 0.0) {
            return Err(PoseStreamError::InvalidParams(format!(
                "min_cutoff must be > 0, got {}",
                self.min_cutoff
            )));
        }
        if !(self.d_cutoff.is_finite() && self.d_cutoff > 0.0) {
            return Err(PoseStreamError::InvalidParams(format!(
                "d_cutoff must be > 0, got {}",
                self.d_cutoff
            )));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(PoseStreamError::InvalidParams(format!(
                "beta must be >= 0, got {}",
                self.beta
            )));
        }
        Ok(())
    }

    /// Apply a relative adjustment from a live tuning input, clamped to a usable range.
    pub fn nudge(&self, d_min_cutoff: f64, d_beta: f64) -> Self {
        Self {
            min_cutoff: (self.min_cutoff + d_min_cutoff).max(MIN_TUNED_CUTOFF),
            beta: (self.beta + d_beta).max(0.0),
            d_cutoff: self.d_cutoff,
        }
    }
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.0,
            d_cutoff: 1.0,
        }
    }
}

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc), Te = 1/frequency
fn smoothing_factor(frequency: f64, cutoff: f64) -> f64 {
    let te = 1.0 / frequency;
    let tau = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
    1.0 / (1.0 + tau / te)
}

/// Exponential low-pass stage.
#[derive(Debug, Clone, Default)]
struct LowPassFilter {
    initialized: bool,
    last_filtered: f64,
}

impl LowPassFilter {
    fn filter(&mut self, value: f64, alpha: f64) -> f64 {
        let filtered = if self.initialized {
            alpha * value + (1.0 - alpha) * self.last_filtered
        } else {
            self.initialized = true;
            value
        };
        self.last_filtered = filtered;
        filtered
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}

/// One-euro filter for a single scalar channel.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    params: SmoothingParams,
    frequency: f64,
    last_time: Option<f64>,
    x: LowPassFilter,
    dx: LowPassFilter,
}

impl OneEuroFilter {
    pub fn new(params: SmoothingParams) -> Self {
        Self {
            params,
            frequency: DEFAULT_FREQUENCY,
            last_time: None,
            x: LowPassFilter::default(),
            dx: LowPassFilter::default(),
        }
    }

    /// Filter `value` observed at `timestamp` (seconds, any monotonic origin).
    ///
    /// Non-finite samples are ignored: the state is left untouched and the
    /// previous output (or `value` itself, before the first sample) is returned.
    pub fn filter(&mut self, value: f64, timestamp: f64) -> f64 {
        if !(value.is_finite() && timestamp.is_finite()) {
            return if self.x.initialized {
                self.x.last_filtered
            } else {
                value
            };
        }
        if let Some(last) = self.last_time {
            if timestamp > last {
                self.frequency = 1.0 / (timestamp - last);
            }
        }
        self.last_time = Some(timestamp);

        let dx = if self.x.initialized {
            (value - self.x.last_filtered) * self.frequency
        } else {
            0.0
        };
        let edx = self
            .dx
            .filter(dx, smoothing_factor(self.frequency, self.params.d_cutoff));
        let cutoff = self.params.min_cutoff + self.params.beta * edx.abs();
        self.x
            .filter(value, smoothing_factor(self.frequency, cutoff))
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.dx.reset();
        self.last_time = None;
        self.frequency = DEFAULT_FREQUENCY;
    }

    /// Takes effect on the next call to [`filter`](Self::filter).
    /// Invalid parameters are rejected and the current ones kept.
    pub fn set_params(&mut self, params: SmoothingParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> SmoothingParams {
        self.params
    }

    /// Sampling rate currently measured from timestamps.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn is_initialized(&self) -> bool {
        self.x.initialized
    }
}

/// Independent one-euro filter per axis.
#[derive(Debug, Clone)]
pub struct OneEuroVector3 {
    axes: [OneEuroFilter; 3],
}

impl OneEuroVector3 {
    pub fn new(params: SmoothingParams) -> Self {
        Self {
            axes: std::array::from_fn(|_| OneEuroFilter::new(params)),
        }
    }

    pub fn filter(&mut self, value: [f64; 3], timestamp: f64) -> [f64; 3] {
        std::array::from_fn(|i| self.axes[i].filter(value[i], timestamp))
    }

    pub fn set_params(&mut self, params: SmoothingParams) -> Result<()> {
        params.validate()?;
        for f in &mut self.axes {
            f.set_params(params)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        for f in &mut self.axes {
            f.reset();
        }
    }
}

/// Component-wise one-euro filter for unit quaternions `[qx, qy, qz, qw]`.
///
/// Each raw sample is first moved onto the same hemisphere as the previous
/// raw sample, and the filtered result is re-normalized.
#[derive(Debug, Clone)]
pub struct OneEuroQuaternion {
    components: [OneEuroFilter; 4],
    last_raw: Option<[f64; 4]>,
}

impl OneEuroQuaternion {
    pub fn new(params: SmoothingParams) -> Self {
        Self {
            components: std::array::from_fn(|_| OneEuroFilter::new(params)),
            last_raw: None,
        }
    }

    pub fn filter(&mut self, value: [f64; 4], timestamp: f64) -> [f64; 4] {
        let mut q = value;
        if !q.iter().all(|c| c.is_finite()) {
            let held: [f64; 4] =
                std::array::from_fn(|i| self.components[i].filter(f64::NAN, timestamp));
            return normalize4(held);
        }
        if let Some(prev) = self.last_raw {
            if dot4(&prev, &q) < 0.0 {
                q = [-q[0], -q[1], -q[2], -q[3]];
            }
        }
        self.last_raw = Some(q);

        let filtered: [f64; 4] =
            std::array::from_fn(|i| self.components[i].filter(q[i], timestamp));
        normalize4(filtered)
    }

    pub fn set_params(&mut self, params: SmoothingParams) -> Result<()> {
        params.validate()?;
        for f in &mut self.components {
            f.set_params(params)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        for f in &mut self.components {
            f.reset();
        }
        self.last_raw = None;
    }
}

fn dot4(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

fn normalize4(q: [f64; 4]) -> [f64; 4] {
    let len = dot4(&q, &q).sqrt();
    if len > f64::EPSILON && len.is_finite() {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    } else {
        [0.0, 0.0, 0.0, 1.0]
    }
}

/// Smooths a full [`Pose`]: vector filter on position, quaternion filter on rotation.
#[derive(Debug, Clone)]
pub struct PoseFilter {
    position: OneEuroVector3,
    rotation: OneEuroQuaternion,
}

impl PoseFilter {
    pub fn new(position: SmoothingParams, rotation: SmoothingParams) -> Self {
        Self {
            position: OneEuroVector3::new(position),
            rotation: OneEuroQuaternion::new(rotation),
        }
    }

    pub fn apply(&mut self, pose: Pose, timestamp: f64) -> Pose {
        Pose::new(
            self.position.filter(pose.position, timestamp),
            self.rotation.filter(pose.rotation, timestamp),
        )
    }

    /// New coefficients apply from the next [`apply`](Self::apply).
    /// Both sets are validated before either is applied.
    pub fn set_params(&mut self, position: SmoothingParams, rotation: SmoothingParams) -> Result<()> {
        position.validate()?;
        rotation.validate()?;
        self.position.set_params(position)?;
        self.rotation.set_params(rotation)
    }

    pub fn reset(&mut self) {
        self.position.reset();
        self.rotation.reset();
    }
}

impl Default for PoseFilter {
    fn default() -> Self {
        Self::new(SmoothingParams::POSITION, SmoothingParams::ROTATION)
    }
}
