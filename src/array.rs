use crate::error::{Error, Result};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// The dimensions of a row-major 2-D array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of elements in an array of this shape.
    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat row-major index of `(row, col)` or `None` if it lies outside the shape.
    pub fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then_some(row * self.cols + col)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// A boolean grid flagging untrustworthy samples.
///
/// A `true` entry means the co-located sample is invalid (saturated or
/// otherwise excluded).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ValidityMask {
    shape: Shape,
    invalid: Vec<bool>,
}

impl ValidityMask {
    /// Creates a mask from a row-major buffer of invalid flags.
    pub fn new(shape: Shape, invalid: Vec<bool>) -> Result<Self> {
        if invalid.len() != shape.len() {
            return Err(Error::BufferLength {
                expected: shape.len(),
                found: invalid.len(),
            });
        }

        Ok(Self { shape, invalid })
    }

    /// Creates a mask where every sample is valid.
    pub fn all_valid(shape: Shape) -> Self {
        Self {
            shape,
            invalid: vec![false; shape.len()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.invalid
    }

    pub fn is_invalid(&self, index: usize) -> bool {
        self.invalid.get(index).copied().unwrap_or(false)
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.par_iter().filter(|&&bit| bit).count()
    }

    pub fn any_invalid(&self) -> bool {
        self.invalid.par_iter().any(|&bit| bit)
    }

    /// Returns the pointwise OR of `self` and `other`.
    pub fn union(&self, other: &ValidityMask) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::MaskShapeMismatch {
                data: self.shape,
                mask: other.shape,
            });
        }

        let invalid = self
            .invalid
            .par_iter()
            .zip(other.invalid.par_iter())
            .map(|(a, b)| *a || *b)
            .collect();

        Ok(Self {
            shape: self.shape,
            invalid,
        })
    }
}

/// A mask over `invalid`, or `None` when nothing is flagged.
pub(crate) fn mask_if_any(shape: Shape, invalid: Vec<bool>) -> Result<Option<ValidityMask>> {
    if !invalid.par_iter().any(|&bit| bit) {
        return Ok(None);
    }

    ValidityMask::new(shape, invalid).map(Some)
}

/// A 2-D array paired with an optional [`ValidityMask`] of the same shape.
///
/// An absent mask means every element is valid.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaskedArray<T> {
    shape: Shape,
    data: Vec<T>,
    mask: Option<ValidityMask>,
}

impl<T> MaskedArray<T> {
    /// Creates an unmasked array from a row-major buffer.
    pub fn new(shape: Shape, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(Error::BufferLength {
                expected: shape.len(),
                found: data.len(),
            });
        }

        Ok(Self {
            shape,
            data,
            mask: None,
        })
    }

    /// Attaches `mask`, replacing any existing mask.
    ///
    /// Returns an error if the mask shape differs from the data shape.
    pub fn with_mask(mut self, mask: Option<ValidityMask>) -> Result<Self> {
        if let Some(mask) = &mask {
            if mask.shape() != self.shape {
                return Err(Error::MaskShapeMismatch {
                    data: self.shape,
                    mask: mask.shape(),
                });
            }
        }

        self.mask = mask;
        Ok(self)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn mask(&self) -> Option<&ValidityMask> {
        self.mask.as_ref()
    }

    pub fn into_parts(self) -> (Shape, Vec<T>, Option<ValidityMask>) {
        (self.shape, self.data, self.mask)
    }

    /// Returns the element at `(row, col)` or `None` if it lies outside the array.
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        self.data.get(self.shape.index(row, col)?)
    }

    /// Returns `true` if `(row, col)` lies inside the array and is not masked.
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        match self.shape.index(row, col) {
            Some(index) => !self.is_masked_at(index),
            None => false,
        }
    }

    pub(crate) fn is_masked_at(&self, index: usize) -> bool {
        self.mask
            .as_ref()
            .is_some_and(|mask| mask.is_invalid(index))
    }

    /// Iterates over the elements that are not masked.
    pub fn valid_values(&self) -> impl Iterator<Item = &T> {
        self.data
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.is_masked_at(*index))
            .map(|(_, value)| value)
    }
}

impl<T: Send + Sync> MaskedArray<T> {
    /// Applies `f` to every element in parallel, keeping the mask untouched.
    pub fn map<U, F>(&self, f: F) -> MaskedArray<U>
    where
        U: Send,
        F: Fn(&T) -> U + Send + Sync,
    {
        MaskedArray {
            shape: self.shape,
            data: self.data.par_iter().map(f).collect(),
            mask: self.mask.clone(),
        }
    }
}

impl<T: Copy + Send + Sync> MaskedArray<T> {
    /// Returns the data with every masked element replaced by `fill`.
    pub fn filled(&self, fill: T) -> Vec<T> {
        match &self.mask {
            None => self.data.clone(),
            Some(mask) => self
                .data
                .par_iter()
                .zip(mask.as_slice().par_iter())
                .map(|(value, invalid)| if *invalid { fill } else { *value })
                .collect(),
        }
    }
}
