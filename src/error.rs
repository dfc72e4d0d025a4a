use crate::array::Shape;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("expected shape {expected} but got {found}")]
    ShapeMismatch { expected: Shape, found: Shape },

    #[error("expected a buffer of {expected} elements but got {found}")]
    BufferLength { expected: usize, found: usize },

    #[error("frame of {shape} pixels is not divisible by mosaic period {period}")]
    MosaicShape { shape: Shape, period: Shape },

    #[error("mask of {mask} pixels does not match data of {data} pixels")]
    MaskShapeMismatch { data: Shape, mask: Shape },

    #[error("{context} requires at least {required} samples but got {found}")]
    InsufficientSamples {
        required: usize,
        found: usize,
        context: &'static str,
    },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("invalid mosaic layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
