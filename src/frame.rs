//! Raw sensor frames.

use crate::{
    array::{Shape, ValidityMask},
    error::{Error, Result},
};
use rayon::prelude::*;

/// Sensor dimensions of the Blackfly polarisation cameras.
pub const BLACKFLY_SHAPE: Shape = Shape::new(2048, 2448);

/// Raw value above which a 16-bit sample is considered saturated.
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 65000.0;

/// An unsigned integer sensor sample.
pub trait Sample: Copy + Send + Sync + PartialOrd + 'static {
    /// Width of the sample in a raw byte dump.
    const BYTES: usize;

    /// Decodes one sample from exactly `Self::BYTES` little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

impl Sample for u8 {
    const BYTES: usize = 1;

    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn to_f64(self) -> f64 {
        self.into()
    }
}

impl Sample for u16 {
    const BYTES: usize = 2;

    fn from_le_slice(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn to_f64(self) -> f64 {
        self.into()
    }
}

impl Sample for u32 {
    const BYTES: usize = 4;

    fn from_le_slice(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn to_f64(self) -> f64 {
        self.into()
    }
}

/// Anything that presents a fixed-shape raw frame as a flat row-major buffer.
pub trait FrameSource: Sync {
    type Sample: Sample;

    fn shape(&self) -> Shape;

    fn samples(&self) -> &[Self::Sample];

    /// Flags every sample strictly greater than `threshold`.
    fn saturation_mask(&self, threshold: f64) -> Result<ValidityMask> {
        let invalid = self
            .samples()
            .par_iter()
            .map(|sample| sample.to_f64() > threshold)
            .collect();

        ValidityMask::new(self.shape(), invalid)
    }
}

/// A raw frame straight off the sensor, one sample per physical pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame<S = u16> {
    shape: Shape,
    samples: Vec<S>,
}

impl<S: Sample> RawFrame<S> {
    /// Creates a frame from a row-major buffer of samples.
    pub fn from_samples(shape: Shape, samples: Vec<S>) -> Result<Self> {
        if samples.len() != shape.len() {
            return Err(Error::BufferLength {
                expected: shape.len(),
                found: samples.len(),
            });
        }

        Ok(Self { shape, samples })
    }

    /// Creates a frame from the raw byte dump written by the camera.
    ///
    /// The dump holds one little-endian sample per pixel organised by row.
    ///
    /// ```text
    /// +--------+--------+--------+-----+--------+--------+
    /// |      0 |      1 |      2 | ... |    w-2 |    w-1 |
    /// +--------+--------+--------+-----+--------+--------+
    /// |      w |    w+1 |    w+2 | ... |   2w-2 |   2w-1 |
    /// +--------+--------+--------+-----+--------+--------+
    /// |    ... |    ... |
    /// +--------+
    /// | w(h-1) |
    /// ```
    pub fn from_le_bytes(shape: Shape, bytes: &[u8]) -> Result<Self> {
        let expected = shape.len() * S::BYTES;
        if bytes.len() != expected {
            return Err(Error::BufferLength {
                expected,
                found: bytes.len(),
            });
        }

        let samples = bytes
            .par_chunks_exact(S::BYTES)
            .map(S::from_le_slice)
            .collect();

        Ok(Self { shape, samples })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<S> {
        self.samples.get(self.shape.index(row, col)?).copied()
    }

    pub fn into_samples(self) -> Vec<S> {
        self.samples
    }
}

impl<S: Sample> FrameSource for RawFrame<S> {
    type Sample = S;

    fn shape(&self) -> Shape {
        self.shape
    }

    fn samples(&self) -> &[S] {
        &self.samples
    }
}

impl<F: FrameSource> FrameSource for &F {
    type Sample = F::Sample;

    fn shape(&self) -> Shape {
        F::shape(*self)
    }

    fn samples(&self) -> &[Self::Sample] {
        F::samples(*self)
    }
}
