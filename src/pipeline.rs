use crate::{
    config::PipelineConfig,
    error::{Error, Result},
    frame::FrameSource,
    image::{PolarimetricImage, StokesImage},
    linearity::{LinearityAccumulator, LinearityMap},
    stack::{RunningMoments, StackStatistics},
};
use tracing::{debug, info, instrument};

/// A validated [`PipelineConfig`] ready to reduce frames from one camera.
#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl TryFrom<PipelineConfig> for Pipeline {
    type Error = Error;

    fn try_from(config: PipelineConfig) -> Result<Self> {
        Self::new(config)
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Masks saturated samples if configured, splits the mosaic and fits Stokes vectors.
    #[instrument(skip_all, fields(shape = %frame.shape()))]
    pub fn stokes<F: FrameSource>(&self, frame: &F) -> Result<StokesImage> {
        self.check(frame)?;

        let mask = match self.config.mask_saturated {
            true => Some(frame.saturation_mask(self.config.saturation_threshold)?)
                .filter(|mask| mask.any_invalid()),
            false => None,
        };

        if let Some(mask) = &mask {
            debug!(saturated = mask.invalid_count(), "masked saturated samples");
        }

        self.config
            .layout
            .split(frame, mask.as_ref())?
            .into_stokes_image()
    }

    /// Reduces a single capture to per-channel intensity, DoLP and AoLP.
    pub fn polarimetry<F: FrameSource>(&self, frame: &F) -> Result<PolarimetricImage> {
        Ok(self
            .stokes(frame)?
            .into_polarimetric_image(self.config.angle_convention))
    }

    /// An empty stack accumulator for this camera.
    pub fn moments(&self) -> RunningMoments {
        RunningMoments::new(self.config.frame_shape)
    }

    /// Streams `frames` through a stack accumulator and finalises it with the configured mode.
    #[instrument(skip_all)]
    pub fn stack_statistics<I>(&self, frames: I) -> Result<StackStatistics>
    where
        I: IntoIterator,
        I::Item: FrameSource,
    {
        let mut moments = self.moments();
        for frame in frames {
            moments.push(&frame)?;
        }

        info!(frames = moments.frames(), "accumulated stack");
        moments.finalise(self.config.moments_mode)
    }

    /// An empty linearity accumulator using the configured linearity threshold and policy.
    pub fn linearity_accumulator(&self) -> LinearityAccumulator {
        LinearityAccumulator::new(
            self.config.frame_shape,
            self.config.linearity_threshold,
            self.config.saturation_policy,
        )
    }

    /// Scores every pixel's linearity over a series of `(stimulus, frame)` pairs.
    #[instrument(skip_all)]
    pub fn linearity<I, F>(&self, series: I) -> Result<LinearityMap>
    where
        I: IntoIterator<Item = (f64, F)>,
        F: FrameSource,
    {
        let mut accumulator = self.linearity_accumulator();
        for (stimulus, frame) in series {
            accumulator.push_frame(stimulus, &frame)?;
        }

        info!(points = accumulator.stimuli().len(), "accumulated linearity series");
        accumulator.finish()
    }

    fn check<F: FrameSource>(&self, frame: &F) -> Result<()> {
        if frame.shape() != self.config.frame_shape {
            return Err(Error::ShapeMismatch {
                expected: self.config.frame_shape,
                found: frame.shape(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        array::Shape,
        frame::RawFrame,
        mosaic::{Channel, MosaicLayout},
    };

    fn mono_pipeline(shape: Shape) -> Pipeline {
        Pipeline::new(PipelineConfig {
            frame_shape: shape,
            layout: MosaicLayout::mono(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn saturated_metapixel_is_masked() {
        let pipeline = mono_pipeline(Shape::new(2, 4));
        let frame =
            RawFrame::from_samples(Shape::new(2, 4), vec![10u16, 10, 10, 65535, 10, 10, 10, 10])
                .unwrap();

        let image = pipeline.polarimetry(&frame).unwrap();
        let mono = image.channel(Channel::Mono).unwrap();
        assert!(mono.dolp.is_valid(0, 0));
        assert!(!mono.dolp.is_valid(0, 1));
    }

    #[test]
    fn unmasked_when_disabled() {
        let pipeline = Pipeline::new(PipelineConfig {
            frame_shape: Shape::new(2, 2),
            layout: MosaicLayout::mono(),
            mask_saturated: false,
            ..Default::default()
        })
        .unwrap();
        let frame = RawFrame::from_samples(Shape::new(2, 2), vec![65535u16; 4]).unwrap();

        let stokes = pipeline.stokes(&frame).unwrap();
        assert!(stokes.channel(Channel::Mono).unwrap().mask().is_none());
    }

    #[test]
    fn frame_shape_is_enforced() {
        let pipeline = mono_pipeline(Shape::new(2, 2));
        let frame = RawFrame::from_samples(Shape::new(2, 4), vec![0u16; 8]).unwrap();

        assert_eq!(
            pipeline.polarimetry(&frame),
            Err(Error::ShapeMismatch {
                expected: Shape::new(2, 2),
                found: Shape::new(2, 4)
            })
        );
    }

    #[test]
    fn linearity_uses_its_own_threshold() {
        let pipeline = mono_pipeline(Shape::new(2, 2));
        // 63000 is below the raw threshold of 65000 but above 0.95 of full scale.
        let series = [(1.0, 1000u16), (2.0, 2000), (3.0, 63000)].map(|(t, v)| {
            (t, RawFrame::from_samples(Shape::new(2, 2), vec![v, v, 10, 10]).unwrap())
        });

        let bright = series[2].1.clone();

        let map = pipeline.linearity(series).unwrap();
        assert!(map.score(0, 0).unwrap().saturated);
        assert!(!map.score(1, 0).unwrap().saturated);

        let stokes = pipeline.stokes(&bright).unwrap();
        assert!(stokes.channel(Channel::Mono).unwrap().mask().is_none());
    }

    #[test]
    fn empty_stack_fails() {
        let pipeline = mono_pipeline(Shape::new(2, 2));
        let frames: Vec<RawFrame<u16>> = Vec::new();

        assert!(matches!(
            pipeline.stack_statistics(frames),
            Err(Error::InsufficientSamples { found: 0, .. })
        ));
    }
}
