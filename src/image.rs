use crate::{
    array::{MaskedArray, Shape, ValidityMask},
    error::Result,
    light::{aop::AngleConvention, stokes::StokesSolver, stokes::StokesVec},
    mosaic::{Channel, SplitFrame},
};
use rayon::prelude::*;
use tracing::{debug, instrument};

impl SplitFrame {
    /// Convert the polariser planes to a [`StokesImage`] by fitting a Stokes vector per pixel.
    ///
    /// A Stokes vector is masked if any of the measurements it was fitted from is masked.
    #[instrument(skip_all, fields(shape = %self.shape()))]
    pub fn into_stokes_image(self) -> Result<StokesImage> {
        let shape = self.shape();
        let channels = self
            .channels()
            .map(|(layout, planes)| {
                let solver = StokesSolver::new(&layout.angles())?;
                let pixels: Vec<StokesVec> = (0..shape.len())
                    .into_par_iter()
                    .map(|index| solver.solve(|p| planes[p].data()[index]))
                    .collect();

                let mask = union_of(planes.iter().filter_map(MaskedArray::mask))?;
                let stokes = MaskedArray::new(shape, pixels)?.with_mask(mask)?;
                Ok((layout.channel, stokes))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(channels = channels.len(), "fitted stokes vectors");
        Ok(StokesImage { shape, channels })
    }
}

/// OR of every mask in `masks`, or `None` when there are none.
fn union_of<'a>(masks: impl Iterator<Item = &'a ValidityMask>) -> Result<Option<ValidityMask>> {
    let mut union: Option<ValidityMask> = None;
    for mask in masks {
        union = Some(match union {
            Some(acc) => acc.union(mask)?,
            None => mask.clone(),
        });
    }

    Ok(union)
}

/// Per-channel Stokes vectors of a split frame.
#[derive(Clone, Debug, PartialEq)]
pub struct StokesImage {
    shape: Shape,
    channels: Vec<(Channel, MaskedArray<StokesVec>)>,
}

impl StokesImage {
    pub fn dimensions(&self) -> Shape {
        self.shape
    }

    pub fn channel(&self, channel: Channel) -> Option<&MaskedArray<StokesVec>> {
        self.channels
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, stokes)| stokes)
    }

    pub fn channels(&self) -> impl Iterator<Item = &(Channel, MaskedArray<StokesVec>)> {
        self.channels.iter()
    }

    /// Convert an owned Stokes image to intensity, DoLP and AoLP images.
    ///
    /// Every derived image shares the mask of its Stokes vectors. AoLP values are reported in
    /// degrees following `convention`.
    #[instrument(skip(self), fields(shape = %self.shape))]
    pub fn into_polarimetric_image(self, convention: AngleConvention) -> PolarimetricImage {
        let channels = self
            .channels
            .into_iter()
            .map(|(channel, stokes)| PolarimetricChannel {
                channel,
                intensity: stokes.map(StokesVec::i),
                dolp: stokes.map(|sv| sv.dop().into_inner()),
                aolp: stokes.map(|sv| sv.aop_degrees(convention)),
            })
            .collect();

        PolarimetricImage {
            shape: self.shape,
            convention,
            channels,
        }
    }
}

/// Intensity, DoLP and AoLP of a single colour channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PolarimetricChannel {
    pub channel: Channel,
    pub intensity: MaskedArray<f64>,
    pub dolp: MaskedArray<f64>,
    /// AoLP in degrees.
    pub aolp: MaskedArray<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolarimetricImage {
    shape: Shape,
    convention: AngleConvention,
    channels: Vec<PolarimetricChannel>,
}

impl PolarimetricImage {
    pub fn dimensions(&self) -> Shape {
        self.shape
    }

    pub fn convention(&self) -> AngleConvention {
        self.convention
    }

    pub fn channel(&self, channel: Channel) -> Option<&PolarimetricChannel> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    pub fn channels(&self) -> &[PolarimetricChannel] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<PolarimetricChannel> {
        self.channels
    }
}
