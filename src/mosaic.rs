//! Splitting raw division-of-focal-plane mosaics into per-channel, per-polariser planes.

use crate::{
    array::{MaskedArray, Shape, ValidityMask, mask_if_any},
    error::{Error, Result},
    frame::{FrameSource, Sample},
};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, instrument};
use uom::si::{angle::degree, f64::Angle};

/// A colour channel of the sensor's filter array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    /// The only channel of a sensor without colour filters.
    Mono,
    Red,
    /// The green filter sharing a row with red.
    Green,
    /// The green filter sharing a row with blue.
    Green2,
    Blue,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Mono => "mono",
            Channel::Red => "R",
            Channel::Green => "G",
            Channel::Green2 => "G2",
            Channel::Blue => "B",
        };
        write!(f, "{name}")
    }
}

/// The location of one linear polariser inside the repeating mosaic block.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolariserSite {
    /// Transmission axis of the polariser with respect to the sensor rows.
    pub angle: Angle,
    pub row: usize,
    pub col: usize,
}

impl PolariserSite {
    pub fn new(angle: Angle, row: usize, col: usize) -> Self {
        Self { angle, row, col }
    }
}

/// The polarisers sampled by a single colour channel.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelLayout {
    pub channel: Channel,
    pub sites: Vec<PolariserSite>,
}

impl ChannelLayout {
    pub fn new(channel: Channel, sites: Vec<PolariserSite>) -> Self {
        Self { channel, sites }
    }

    /// Transmission axes of the polarisers in site order.
    pub fn angles(&self) -> Vec<Angle> {
        self.sites.iter().map(|site| site.angle).collect()
    }
}

/// Maps every (channel, polariser) pair to its offset inside the repeating mosaic block.
///
/// A division of focal plane (DoFP) camera has a micro-polarizer array in between the lens
/// and the sensor. On the Sony polarisation sensors the 2x2 polariser block is laid out as
///
/// ```text
/// +-----+-----+-----+-----+
/// | 090 | 045 | 090 | ... |
/// +-----+-----+-----+-----+
/// | 135 | 000 | 135 | ... |
/// +-----+-----+-----+-----+
/// | 090 | ... |
/// ```
///
/// and colour variants repeat that block under an RGGB Bayer filter, giving a 4x4 period.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MosaicLayout {
    period: Shape,
    channels: Vec<ChannelLayout>,
}

impl MosaicLayout {
    /// Creates a layout after checking it with [`MosaicLayout::validate`].
    pub fn new(period: Shape, channels: Vec<ChannelLayout>) -> Result<Self> {
        let layout = Self { period, channels };
        layout.validate()?;
        Ok(layout)
    }

    /// The 2x2 monochrome polarisation mosaic.
    pub fn mono() -> Self {
        Self {
            period: Shape::new(2, 2),
            channels: vec![ChannelLayout::new(Channel::Mono, polariser_block(0, 0))],
        }
    }

    /// The 4x4 colour polarisation mosaic split into its R, G, G2 and B blocks.
    pub fn rgbg() -> Self {
        Self {
            period: Shape::new(4, 4),
            channels: vec![
                ChannelLayout::new(Channel::Red, polariser_block(0, 0)),
                ChannelLayout::new(Channel::Green, polariser_block(0, 2)),
                ChannelLayout::new(Channel::Green2, polariser_block(2, 0)),
                ChannelLayout::new(Channel::Blue, polariser_block(2, 2)),
            ],
        }
    }

    pub fn period(&self) -> Shape {
        self.period
    }

    pub fn channels(&self) -> &[ChannelLayout] {
        &self.channels
    }

    /// Checks that every site lies inside the period and no two sites overlap.
    pub fn validate(&self) -> Result<()> {
        if self.period.is_empty() {
            return Err(Error::InvalidLayout(format!(
                "mosaic period {} is empty",
                self.period
            )));
        }

        if self.channels.is_empty() {
            return Err(Error::InvalidLayout("no channels".into()));
        }

        let mut channels = HashSet::new();
        let mut offsets = HashSet::new();
        for layout in &self.channels {
            if !channels.insert(layout.channel) {
                return Err(Error::InvalidLayout(format!(
                    "channel {} appears twice",
                    layout.channel
                )));
            }

            if layout.sites.is_empty() {
                return Err(Error::InvalidLayout(format!(
                    "channel {} has no polarisers",
                    layout.channel
                )));
            }

            for site in &layout.sites {
                if self.period.index(site.row, site.col).is_none() {
                    return Err(Error::InvalidLayout(format!(
                        "offset ({}, {}) is outside the {} period",
                        site.row, site.col, self.period
                    )));
                }

                if !offsets.insert((site.row, site.col)) {
                    return Err(Error::InvalidLayout(format!(
                        "offset ({}, {}) is used twice",
                        site.row, site.col
                    )));
                }
            }
        }

        Ok(())
    }

    /// Deinterleaves `frame` into one plane per (channel, polariser) pair.
    ///
    /// Each plane has the frame's shape divided by the mosaic period. When a `mask` is given
    /// every plane carries the same strided subsample of it, dropped when it flags nothing.
    #[instrument(skip_all, fields(shape = %frame.shape(), period = %self.period))]
    pub fn split<F: FrameSource>(
        &self,
        frame: &F,
        mask: Option<&ValidityMask>,
    ) -> Result<SplitFrame> {
        self.validate()?;

        let shape = frame.shape();
        if shape.rows % self.period.rows != 0 || shape.cols % self.period.cols != 0 {
            return Err(Error::MosaicShape {
                shape,
                period: self.period,
            });
        }

        if let Some(mask) = mask {
            if mask.shape() != shape {
                return Err(Error::MaskShapeMismatch {
                    data: shape,
                    mask: mask.shape(),
                });
            }
        }

        let samples = frame.samples();
        if samples.len() != shape.len() {
            return Err(Error::BufferLength {
                expected: shape.len(),
                found: samples.len(),
            });
        }

        let plane_shape = Shape::new(shape.rows / self.period.rows, shape.cols / self.period.cols);
        let planes = self
            .channels
            .iter()
            .map(|layout| {
                layout
                    .sites
                    .iter()
                    .map(|site| {
                        let data: Vec<f64> = self
                            .strided(shape, plane_shape, site)
                            .map(|index| samples[index].to_f64())
                            .collect();
                        let plane_mask = match mask {
                            Some(mask) => mask_if_any(
                                plane_shape,
                                self.strided(shape, plane_shape, site)
                                    .map(|index| mask.as_slice()[index])
                                    .collect(),
                            )?,
                            None => None,
                        };

                        MaskedArray::new(plane_shape, data)?.with_mask(plane_mask)
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            planes = planes.iter().map(Vec::len).sum::<usize>(),
            plane_shape = %plane_shape,
            "split mosaic"
        );

        Ok(SplitFrame {
            layout: self.clone(),
            shape: plane_shape,
            planes,
        })
    }

    /// Flat frame indices of `site` for every pixel of a plane, in plane order.
    fn strided(
        &self,
        shape: Shape,
        plane_shape: Shape,
        site: &PolariserSite,
    ) -> impl IndexedParallelIterator<Item = usize> {
        let period = self.period;
        let (row, col) = (site.row, site.col);
        (0..plane_shape.len()).into_par_iter().map(move |i| {
            let (y, x) = (i / plane_shape.cols, i % plane_shape.cols);
            (y * period.rows + row) * shape.cols + x * period.cols + col
        })
    }
}

impl Default for MosaicLayout {
    fn default() -> Self {
        Self::rgbg()
    }
}

/// A 2x2 block of polarisers with its top-left corner at `(row, col)`.
fn polariser_block(row: usize, col: usize) -> Vec<PolariserSite> {
    let a = |deg: f64| Angle::new::<degree>(deg);
    vec![
        PolariserSite::new(a(0.0), row + 1, col + 1),
        PolariserSite::new(a(45.0), row, col + 1),
        PolariserSite::new(a(90.0), row, col),
        PolariserSite::new(a(135.0), row + 1, col),
    ]
}

/// The polariser planes of a single raw frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitFrame {
    layout: MosaicLayout,
    shape: Shape,
    /// Planes indexed by channel then by polariser site.
    planes: Vec<Vec<MaskedArray<f64>>>,
}

impl SplitFrame {
    pub fn layout(&self) -> &MosaicLayout {
        &self.layout
    }

    /// Shape of each plane.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Returns the plane of `channel` behind the polariser at `site` in the layout.
    pub fn plane(&self, channel: Channel, site: usize) -> Option<&MaskedArray<f64>> {
        let index = self
            .layout
            .channels
            .iter()
            .position(|layout| layout.channel == channel)?;
        self.planes.get(index)?.get(site)
    }

    /// Iterates over every channel with its planes in site order.
    pub fn channels(&self) -> impl Iterator<Item = (&ChannelLayout, &[MaskedArray<f64>])> {
        self.layout
            .channels
            .iter()
            .zip(self.planes.iter().map(Vec::as_slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use rstest::rstest;

    /// A frame whose samples equal their flat index.
    fn index_frame(shape: Shape) -> RawFrame<u16> {
        RawFrame::from_samples(shape, (0..shape.len() as u16).collect()).unwrap()
    }

    #[test]
    fn mono_split_is_strided() {
        let frame = index_frame(Shape::new(4, 4));
        let split = MosaicLayout::mono().split(&frame, None).unwrap();

        assert_eq!(split.shape(), Shape::new(2, 2));
        // 0 degree polariser sits at (1, 1) of each block.
        assert_eq!(
            split.plane(Channel::Mono, 0).unwrap().data(),
            &[5.0, 7.0, 13.0, 15.0]
        );
        // 90 degree polariser sits at (0, 0).
        assert_eq!(
            split.plane(Channel::Mono, 2).unwrap().data(),
            &[0.0, 2.0, 8.0, 10.0]
        );
        assert!(split.plane(Channel::Mono, 0).unwrap().mask().is_none());
    }

    #[test]
    fn rgbg_split_places_blocks() {
        let frame = index_frame(Shape::new(4, 8));
        let split = MosaicLayout::rgbg().split(&frame, None).unwrap();

        assert_eq!(split.shape(), Shape::new(1, 2));
        // Blue block starts at (2, 2), its 90 degree polariser is the block corner.
        assert_eq!(
            split.plane(Channel::Blue, 2).unwrap().data(),
            &[18.0, 22.0]
        );
        // Green block starts at (0, 2), its 45 degree polariser is at (0, 3).
        assert_eq!(split.plane(Channel::Green, 1).unwrap().data(), &[3.0, 7.0]);
        assert_eq!(split.channels().count(), 4);
    }

    #[rstest]
    #[case(Shape::new(3, 4))]
    #[case(Shape::new(4, 5))]
    #[case(Shape::new(1, 1))]
    fn indivisible_frame_is_rejected(#[case] shape: Shape) {
        let frame = index_frame(shape);
        assert_eq!(
            MosaicLayout::mono().split(&frame, None),
            Err(Error::MosaicShape {
                shape,
                period: Shape::new(2, 2)
            })
        );
    }

    #[test]
    fn mask_is_subsampled() {
        let shape = Shape::new(4, 4);
        let frame = index_frame(shape);
        let mut invalid = vec![false; shape.len()];
        // Flag the 0 degree sample of the bottom-right block.
        invalid[15] = true;
        let mask = ValidityMask::new(shape, invalid).unwrap();

        let split = MosaicLayout::mono().split(&frame, Some(&mask)).unwrap();
        let zero = split.plane(Channel::Mono, 0).unwrap();
        assert_eq!(zero.mask().unwrap().as_slice(), &[false, false, false, true]);

        let ninety = split.plane(Channel::Mono, 2).unwrap();
        assert!(ninety.mask().is_none());
    }

    #[test]
    fn mask_shape_must_match_frame() {
        let frame = index_frame(Shape::new(4, 4));
        let mask = ValidityMask::all_valid(Shape::new(2, 8));

        assert_eq!(
            MosaicLayout::mono().split(&frame, Some(&mask)),
            Err(Error::MaskShapeMismatch {
                data: Shape::new(4, 4),
                mask: Shape::new(2, 8)
            })
        );
    }

    #[test]
    fn overlapping_sites_are_rejected() {
        let a = |deg: f64| Angle::new::<degree>(deg);
        let layout = MosaicLayout::new(
            Shape::new(2, 2),
            vec![ChannelLayout::new(
                Channel::Mono,
                vec![
                    PolariserSite::new(a(0.0), 0, 0),
                    PolariserSite::new(a(90.0), 0, 0),
                ],
            )],
        );

        assert!(matches!(layout, Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn site_outside_period_is_rejected() {
        let layout = MosaicLayout::new(
            Shape::new(2, 2),
            vec![ChannelLayout::new(
                Channel::Mono,
                vec![PolariserSite::new(Angle::new::<degree>(0.0), 2, 0)],
            )],
        );

        assert!(matches!(layout, Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn presets_are_valid() {
        assert!(MosaicLayout::mono().validate().is_ok());
        assert!(MosaicLayout::rgbg().validate().is_ok());
    }
}
