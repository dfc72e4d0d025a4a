use crate::{
    array::Shape,
    error::{Error, Result},
    frame::{BLACKFLY_SHAPE, DEFAULT_SATURATION_THRESHOLD},
    light::aop::AngleConvention,
    linearity::{DEFAULT_LINEARITY_SATURATION, SaturationPolicy},
    mosaic::MosaicLayout,
    stack::MomentsMode,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything a [`Pipeline`](crate::pipeline::Pipeline) needs to know about the camera and how
/// its frames should be reduced.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Sensor dimensions in pixels.
    pub frame_shape: Shape,

    /// Mosaic period and channel to polariser table.
    pub layout: MosaicLayout,

    /// Samples strictly above this value are saturated.
    pub saturation_threshold: f64,

    /// Mask saturated samples before polarimetry.
    pub mask_saturated: bool,

    pub angle_convention: AngleConvention,
    pub moments_mode: MomentsMode,

    /// Responses strictly above this value saturate a pixel's linearity series.
    pub linearity_threshold: f64,
    pub saturation_policy: SaturationPolicy,
}

impl PipelineConfig {
    /// Checks the layout table and that frames of `frame_shape` tile with it.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;

        let period = self.layout.period();
        if self.frame_shape.is_empty()
            || self.frame_shape.rows % period.rows != 0
            || self.frame_shape.cols % period.cols != 0
        {
            return Err(Error::MosaicShape {
                shape: self.frame_shape,
                period,
            });
        }

        if self.saturation_threshold.is_nan() || self.linearity_threshold.is_nan() {
            return Err(Error::DegenerateInput(
                "saturation threshold is NaN".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    /// A Blackfly RGB polarisation camera read out at 16 bits.
    fn default() -> Self {
        Self {
            frame_shape: BLACKFLY_SHAPE,
            layout: MosaicLayout::rgbg(),
            saturation_threshold: DEFAULT_SATURATION_THRESHOLD,
            mask_saturated: true,
            angle_convention: AngleConvention::default(),
            moments_mode: MomentsMode::default(),
            linearity_threshold: DEFAULT_LINEARITY_SATURATION,
            saturation_policy: SaturationPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.layout.period(), Shape::new(4, 4));
        assert_eq!(config.moments_mode, MomentsMode::Population);
        assert_eq!(config.linearity_threshold, 0.95 * 65535.0);
    }

    #[test]
    fn frame_must_tile() {
        let config = PipelineConfig {
            frame_shape: Shape::new(6, 8),
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(Error::MosaicShape {
                shape: Shape::new(6, 8),
                period: Shape::new(4, 4)
            })
        );
    }
}
