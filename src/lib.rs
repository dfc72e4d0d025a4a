// #![warn(missing_docs)]

//! Polarimetry and Sensor Characterisation for Division-of-Focal-Plane Cameras
//!
//! A division-of-focal-plane (DoFP) camera places a micro-polariser over every pixel. This crate
//! splits raw mosaic frames into polariser planes, fits a Stokes vector per super-pixel and
//! derives intensity, degree of linear polarisation (DoLP) and angle of linear polarisation
//! (AoLP), carrying a validity mask through every step. It also streams per-pixel statistics over
//! stacks of frames and scores the linearity of every pixel's response.

#[allow(missing_docs)]
pub mod error;

pub mod array;
pub mod config;
pub mod frame;
pub mod image;
pub mod light;
pub mod linearity;
pub mod mosaic;
pub mod pipeline;
pub mod stack;

pub use error::{Error, Result};

/// Glob import of the types most callers need.
pub mod prelude {
    pub use crate::{
        array::{MaskedArray, Shape, ValidityMask},
        config::PipelineConfig,
        error::{Error, Result},
        frame::{BLACKFLY_SHAPE, FrameSource, RawFrame, Sample},
        image::{PolarimetricChannel, PolarimetricImage, StokesImage},
        light::{
            aop::{AngleConvention, Aop},
            dop::Dop,
            stokes::{StokesSolver, StokesVec},
        },
        linearity::{Correlation, LinearityAccumulator, LinearityMap, SaturationPolicy, pearson_r},
        mosaic::{Channel, ChannelLayout, MosaicLayout, PolariserSite, SplitFrame},
        pipeline::Pipeline,
        stack::{MomentsMode, RunningMoments, StackStatistics},
    };
}
