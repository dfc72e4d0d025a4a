//! Streaming per-pixel statistics over stacks of raw frames.
//!
//! Frames are folded into a [`RunningMoments`] accumulator one at a time so a stack never has to
//! be held in memory. Each pixel keeps a count, a mean and the sum of squared deviations from the
//! mean (M2), updated with Welford's algorithm:
//!
//! ```text
//! count += 1
//! delta  = x - mean
//! mean  += delta / count
//! M2    += delta * (x - mean)
//! ```
//!
//! Every pixel is updated independently, so the result only depends on the order of the frames
//! and never on how the work is spread over threads.

use crate::{
    array::{MaskedArray, Shape, ValidityMask, mask_if_any},
    error::{Error, Result},
    frame::{FrameSource, Sample},
};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

/// Which standard deviation a stack is finalised into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MomentsMode {
    /// sqrt(M2 / count)
    #[default]
    Population,

    /// sqrt(M2 / (count - 1)), which needs at least two samples.
    Sample,
}

impl MomentsMode {
    /// Number of samples needed for a defined standard deviation.
    pub fn min_count(&self) -> usize {
        match self {
            MomentsMode::Population => 1,
            MomentsMode::Sample => 2,
        }
    }

    fn context(&self) -> &'static str {
        match self {
            MomentsMode::Population => "a population standard deviation",
            MomentsMode::Sample => "a sample standard deviation",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Moments {
    count: u32,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Folds in moments gathered over a disjoint set of samples (Chan et al.).
    fn combine(&mut self, other: &Moments) {
        if other.count == 0 {
            return;
        }

        if self.count == 0 {
            *self = *other;
            return;
        }

        let (na, nb) = (self.count as f64, other.count as f64);
        let n = na + nb;
        let delta = other.mean - self.mean;
        self.mean += delta * nb / n;
        self.m2 += other.m2 + delta * delta * na * nb / n;
        self.count += other.count;
    }

    fn std(&self, mode: MomentsMode) -> Option<f64> {
        if (self.count as usize) < mode.min_count() {
            return None;
        }

        let divisor = match mode {
            MomentsMode::Population => self.count as f64,
            MomentsMode::Sample => (self.count - 1) as f64,
        };

        Some((self.m2 / divisor).sqrt())
    }
}

/// Per-pixel running count, mean and M2 over a stack of frames.
#[derive(Clone, Debug, PartialEq)]
pub struct RunningMoments {
    shape: Shape,
    frames: usize,
    pixels: Vec<Moments>,
}

impl RunningMoments {
    /// Creates an empty accumulator for frames of `shape`.
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            frames: 0,
            pixels: vec![Moments::default(); shape.len()],
        }
    }

    /// Creates an accumulator from every frame yielded by `frames`, in order.
    ///
    /// Only one frame is borrowed at a time, so lazily loading iterators keep memory bounded.
    pub fn from_frames<I>(frames: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: FrameSource,
    {
        let mut frames = frames.into_iter();
        let first = frames.next().ok_or(Error::InsufficientSamples {
            required: 1,
            found: 0,
            context: "a frame stack",
        })?;

        let mut moments = Self::new(first.shape());
        moments.push(&first)?;
        for frame in frames {
            moments.push(&frame)?;
        }

        Ok(moments)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of frames pushed so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of samples accumulated at `(row, col)`.
    pub fn count_at(&self, row: usize, col: usize) -> Option<u32> {
        Some(self.pixels.get(self.shape.index(row, col)?)?.count)
    }

    /// Folds every sample of `frame` into the accumulator.
    pub fn push<F: FrameSource>(&mut self, frame: &F) -> Result<()> {
        let samples = self.check(frame)?;
        self.pixels
            .par_iter_mut()
            .zip(samples.par_iter())
            .for_each(|(moments, sample)| moments.update(sample.to_f64()));

        self.frames += 1;
        trace!(frames = self.frames, "accumulated frame");
        Ok(())
    }

    /// Folds the samples of `frame` into the accumulator, skipping those flagged by `mask`.
    ///
    /// Skipped samples leave their pixel's count unchanged.
    pub fn push_masked<F: FrameSource>(&mut self, frame: &F, mask: &ValidityMask) -> Result<()> {
        let samples = self.check(frame)?;
        if mask.shape() != self.shape {
            return Err(Error::MaskShapeMismatch {
                data: self.shape,
                mask: mask.shape(),
            });
        }

        self.pixels
            .par_iter_mut()
            .zip(samples.par_iter())
            .zip(mask.as_slice().par_iter())
            .filter(|(_, invalid)| !**invalid)
            .for_each(|((moments, sample), _)| moments.update(sample.to_f64()));

        self.frames += 1;
        trace!(frames = self.frames, "accumulated masked frame");
        Ok(())
    }

    /// Combines the moments of `other`, gathered over different frames of the same stack.
    ///
    /// Uses the parallel variance combination, so merging partial stacks agrees with pushing
    /// every frame into one accumulator up to floating point rounding.
    pub fn merge(&mut self, other: &RunningMoments) -> Result<()> {
        if other.shape != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                found: other.shape,
            });
        }

        self.pixels
            .par_iter_mut()
            .zip(other.pixels.par_iter())
            .for_each(|(moments, other)| moments.combine(other));

        self.frames += other.frames;
        Ok(())
    }

    /// Consumes the accumulator and computes the per-pixel mean and standard deviation.
    ///
    /// Fails if fewer frames were pushed than `mode` needs. Pixels that individually lack samples
    /// because of masking are masked in the result.
    #[instrument(skip(self), fields(shape = %self.shape, frames = self.frames))]
    pub fn finalise(self, mode: MomentsMode) -> Result<StackStatistics> {
        if self.frames < mode.min_count() {
            return Err(Error::InsufficientSamples {
                required: mode.min_count(),
                found: self.frames,
                context: mode.context(),
            });
        }

        let (mean, mean_invalid): (Vec<f64>, Vec<bool>) = self
            .pixels
            .par_iter()
            .map(|moments| match moments.count {
                0 => (0.0, true),
                _ => (moments.mean, false),
            })
            .unzip();

        let (std, std_invalid): (Vec<f64>, Vec<bool>) = self
            .pixels
            .par_iter()
            .map(|moments| match moments.std(mode) {
                Some(std) => (std, false),
                None => (0.0, true),
            })
            .unzip();

        let counts = self.pixels.par_iter().map(|moments| moments.count).collect();

        let mean =
            MaskedArray::new(self.shape, mean)?.with_mask(mask_if_any(self.shape, mean_invalid)?)?;
        let std =
            MaskedArray::new(self.shape, std)?.with_mask(mask_if_any(self.shape, std_invalid)?)?;
        if let Some(mask) = std.mask() {
            warn!(
                pixels = mask.invalid_count(),
                "pixels have too few unmasked samples for a standard deviation"
            );
        }

        Ok(StackStatistics {
            frames: self.frames,
            mode,
            counts,
            mean,
            std,
        })
    }
}

/// Per-pixel mean and standard deviation of a stack.
#[derive(Clone, Debug, PartialEq)]
pub struct StackStatistics {
    frames: usize,
    mode: MomentsMode,
    counts: Vec<u32>,
    mean: MaskedArray<f64>,
    std: MaskedArray<f64>,
}

impl StackStatistics {
    /// Number of frames in the stack.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn mode(&self) -> MomentsMode {
        self.mode
    }

    /// Number of unmasked samples per pixel.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn mean(&self) -> &MaskedArray<f64> {
        &self.mean
    }

    pub fn std(&self) -> &MaskedArray<f64> {
        &self.std
    }

    pub fn into_mean_std(self) -> (MaskedArray<f64>, MaskedArray<f64>) {
        (self.mean, self.std)
    }
}

impl RunningMoments {
    fn check<'a, F: FrameSource>(&self, frame: &'a F) -> Result<&'a [F::Sample]> {
        if frame.shape() != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                found: frame.shape(),
            });
        }

        let samples = frame.samples();
        if samples.len() != self.shape.len() {
            return Err(Error::BufferLength {
                expected: self.shape.len(),
                found: samples.len(),
            });
        }

        Ok(samples)
    }
}
