//! Per-pixel linearity of the sensor response against a known stimulus.
//!
//! Frames (or stack means) taken at different known stimuli, such as exposure times, are folded
//! into a [`LinearityAccumulator`] one at a time. Each pixel is scored with the Pearson
//! correlation coefficient
//!
//! ```text
//! r = Σ(x - x̄)(y - ȳ) / sqrt(Σ(x - x̄)² Σ(y - ȳ)²)
//! ```
//!
//! between stimulus `x` and response `y`, plus a flag recording whether the pixel saturated
//! anywhere in the series. A flagged pixel still gets a coefficient but should not be trusted.

use crate::{
    array::{MaskedArray, Shape, ValidityMask, mask_if_any},
    error::{Error, Result},
    frame::{FrameSource, Sample},
};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

/// Saturation threshold used for linearity series of 16-bit stack means.
pub const DEFAULT_LINEARITY_SATURATION: f64 = 0.95 * u16::MAX as f64;

/// A Pearson correlation coefficient or the reason it does not exist.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Correlation {
    Coefficient(f64),

    /// One of the series has zero variance, so r is 0/0.
    Degenerate,

    /// Fewer than two points contributed.
    TooFewSamples,
}

impl Correlation {
    /// Returns the coefficient if it exists.
    pub fn coefficient(&self) -> Option<f64> {
        match self {
            Correlation::Coefficient(r) => Some(*r),
            _ => None,
        }
    }
}

/// What to do with a response sample above the saturation threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SaturationPolicy {
    /// Keep the sample in the fit and flag the pixel.
    #[default]
    Flag,

    /// Leave the sample out of that pixel's fit and flag the pixel.
    Exclude,
}

/// Computes the Pearson correlation coefficient between `x` and `y`.
pub fn pearson_r(x: &[f64], y: &[f64]) -> Result<Correlation> {
    if x.len() != y.len() {
        return Err(Error::BufferLength {
            expected: x.len(),
            found: y.len(),
        });
    }

    if x.len() < 2 {
        return Err(Error::InsufficientSamples {
            required: 2,
            found: x.len(),
            context: "a Pearson correlation",
        });
    }

    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        let (dx, dy) = (xi - x_mean, yi - y_mean);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    Ok(correlation(sxy, sxx, syy))
}

fn correlation(sxy: f64, sxx: f64, syy: f64) -> Correlation {
    if !(sxx > 0.0 && syy > 0.0) {
        return Correlation::Degenerate;
    }

    // Rounding can push |r| a hair past 1.
    Correlation::Coefficient((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Least-squares line through a pixel's (stimulus, response) points.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Response predicted at `stimulus`.
    pub fn predict(&self, stimulus: f64) -> f64 {
        self.slope * stimulus + self.intercept
    }
}

/// Streaming co-moments of one pixel's (stimulus, response) series.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Comoments {
    n: u32,
    x_mean: f64,
    y_mean: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    saturated: bool,
}

impl Comoments {
    fn update(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.x_mean;
        let dy = y - self.y_mean;
        self.x_mean += dx / n;
        self.y_mean += dy / n;
        self.sxx += dx * (x - self.x_mean);
        self.syy += dy * (y - self.y_mean);
        self.sxy += dx * (y - self.y_mean);
    }

    fn fold(&mut self, x: f64, y: f64, saturated: bool, policy: SaturationPolicy) {
        self.saturated |= saturated;
        if saturated && policy == SaturationPolicy::Exclude {
            return;
        }

        self.update(x, y);
    }

    fn correlation(&self) -> Correlation {
        if self.n < 2 {
            return Correlation::TooFewSamples;
        }

        correlation(self.sxy, self.sxx, self.syy)
    }

    fn fit(&self) -> Option<LinearFit> {
        if self.n < 2 || !(self.sxx > 0.0) {
            return None;
        }

        let slope = self.sxy / self.sxx;
        Some(LinearFit {
            slope,
            intercept: self.y_mean - slope * self.x_mean,
        })
    }
}

/// Folds a series of responses at known stimuli into per-pixel co-moments.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearityAccumulator {
    shape: Shape,
    threshold: f64,
    policy: SaturationPolicy,
    stimuli: Vec<f64>,
    pixels: Vec<Comoments>,
}

impl LinearityAccumulator {
    /// Creates an empty accumulator.
    ///
    /// A response strictly greater than `threshold` marks its pixel as saturated.
    pub fn new(shape: Shape, threshold: f64, policy: SaturationPolicy) -> Self {
        Self {
            shape,
            threshold,
            policy,
            stimuli: Vec::new(),
            pixels: vec![Comoments::default(); shape.len()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Stimuli pushed so far, in order.
    pub fn stimuli(&self) -> &[f64] {
        &self.stimuli
    }

    /// Adds a response image taken at `stimulus`, typically the mean of a frame stack.
    ///
    /// Masked responses count as saturated.
    pub fn push(&mut self, stimulus: f64, response: &MaskedArray<f64>) -> Result<()> {
        self.check(stimulus, response.shape(), response.data().len())?;

        let (threshold, policy) = (self.threshold, self.policy);
        let data = response.data();
        self.pixels
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, pixel)| {
                let y = data[index];
                let saturated = y > threshold || response.is_masked_at(index);
                pixel.fold(stimulus, y, saturated, policy);
            });

        self.stimuli.push(stimulus);
        trace!(stimulus, points = self.stimuli.len(), "accumulated response");
        Ok(())
    }

    /// Adds a single raw frame taken at `stimulus`.
    pub fn push_frame<F: FrameSource>(&mut self, stimulus: f64, frame: &F) -> Result<()> {
        let samples = frame.samples();
        self.check(stimulus, frame.shape(), samples.len())?;

        let (threshold, policy) = (self.threshold, self.policy);
        self.pixels
            .par_iter_mut()
            .zip(samples.par_iter())
            .for_each(|(pixel, sample)| {
                let y = sample.to_f64();
                pixel.fold(stimulus, y, y > threshold, policy);
            });

        self.stimuli.push(stimulus);
        trace!(stimulus, points = self.stimuli.len(), "accumulated frame");
        Ok(())
    }

    /// Consumes the accumulator and scores every pixel.
    ///
    /// Fails if fewer than two points were pushed or every stimulus is the same.
    #[instrument(skip(self), fields(shape = %self.shape, points = self.stimuli.len()))]
    pub fn finish(self) -> Result<LinearityMap> {
        if self.stimuli.len() < 2 {
            return Err(Error::InsufficientSamples {
                required: 2,
                found: self.stimuli.len(),
                context: "a linearity series",
            });
        }

        let first = self.stimuli[0];
        if self.stimuli.iter().all(|stimulus| *stimulus == first) {
            return Err(Error::DegenerateInput(format!(
                "every stimulus in the series is {first}"
            )));
        }

        let scores: Vec<LinearityScore> = self
            .pixels
            .par_iter()
            .map(|pixel| LinearityScore {
                r: pixel.correlation(),
                saturated: pixel.saturated,
            })
            .collect();

        debug!(
            saturated = scores.par_iter().filter(|s| s.saturated).count(),
            undefined = scores.par_iter().filter(|s| s.r.coefficient().is_none()).count(),
            "scored linearity"
        );

        Ok(LinearityMap {
            shape: self.shape,
            stimuli: self.stimuli,
            pixels: self.pixels,
            scores,
        })
    }

    fn check(&self, stimulus: f64, shape: Shape, len: usize) -> Result<()> {
        if !stimulus.is_finite() {
            return Err(Error::DegenerateInput(format!(
                "stimulus {stimulus} is not finite"
            )));
        }

        if shape != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                found: shape,
            });
        }

        if len != self.shape.len() {
            return Err(Error::BufferLength {
                expected: self.shape.len(),
                found: len,
            });
        }

        Ok(())
    }
}

/// Linearity of one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearityScore {
    pub r: Correlation,

    /// The pixel exceeded the saturation threshold somewhere in the series.
    pub saturated: bool,
}

impl LinearityScore {
    /// Returns `true` if the coefficient exists and the pixel never saturated.
    pub fn is_trusted(&self) -> bool {
        !self.saturated && self.r.coefficient().is_some()
    }
}

/// Per-pixel linearity scores of a sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearityMap {
    shape: Shape,
    stimuli: Vec<f64>,
    pixels: Vec<Comoments>,
    scores: Vec<LinearityScore>,
}

impl LinearityMap {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn stimuli(&self) -> &[f64] {
        &self.stimuli
    }

    pub fn scores(&self) -> &[LinearityScore] {
        &self.scores
    }

    pub fn score(&self, row: usize, col: usize) -> Option<LinearityScore> {
        self.scores.get(self.shape.index(row, col)?).copied()
    }

    /// Least-squares response line of the pixel at `(row, col)`.
    pub fn fit(&self, row: usize, col: usize) -> Option<LinearFit> {
        self.pixels.get(self.shape.index(row, col)?)?.fit()
    }

    /// Pixels that saturated anywhere in the series.
    pub fn saturated_mask(&self) -> Result<ValidityMask> {
        ValidityMask::new(
            self.shape,
            self.scores.par_iter().map(|s| s.saturated).collect(),
        )
    }

    /// The coefficients as an array, masking every pixel that is not trusted.
    ///
    /// Masked entries hold 0.0.
    pub fn r_map(&self) -> Result<MaskedArray<f64>> {
        let (r, invalid): (Vec<f64>, Vec<bool>) = self
            .scores
            .par_iter()
            .map(|s| (s.r.coefficient().unwrap_or(0.0), !s.is_trusted()))
            .unzip();

        MaskedArray::new(self.shape, r)?.with_mask(mask_if_any(self.shape, invalid)?)
    }
}
