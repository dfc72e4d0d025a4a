use dofp::prelude::*;
use image::{ImageBuffer, Luma};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // A quarter of the Blackfly sensor keeps the demo quick.
    let shape = Shape::new(512, 612);
    let pipeline = Pipeline::new(PipelineConfig {
        frame_shape: shape,
        ..Default::default()
    })?;

    // Skylight-like scene: polarisation rotates across the frame, brightness rises down it.
    let scene = |x: u32, y: u32, gain: f64| {
        let psi = std::f64::consts::PI * x as f64 / shape.cols as f64;
        let i = gain * (1000.0 + 30.0 * y as f64);
        let p = 0.4;
        StokesVec::new(i, i * p * (2.0 * psi).cos(), i * p * (2.0 * psi).sin())
    };

    let render = |gain: f64| {
        let layout = &pipeline.config().layout;
        let period = layout.period();
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(shape.cols as u32, shape.rows as u32, |x, y| {
                let (row, col) = (y as usize % period.rows, x as usize % period.cols);
                let value = layout
                    .channels()
                    .iter()
                    .flat_map(|c| &c.sites)
                    .find(|s| s.row == row && s.col == col)
                    .map(|s| scene(x, y, gain).transmitted(s.angle))
                    .unwrap_or(0.0);
                Luma([value.round().min(u16::MAX as f64) as u16])
            });
        RawFrame::from_samples(shape, image.into_raw())
    };

    let image = pipeline.polarimetry(&render(1.0)?)?;
    for channel in image.channels() {
        let valid: Vec<f64> = channel.dolp.valid_values().copied().collect();
        let mean_dolp = valid.iter().sum::<f64>() / valid.len().max(1) as f64;
        info!(
            channel = %channel.channel,
            mean_dolp,
            masked = channel.dolp.mask().map_or(0, |m| m.invalid_count()),
            "derived polarimetric image"
        );
    }

    // Exposure series: the brightest rows clip at the longest exposures.
    let exposures = [1.0, 2.0, 4.0, 8.0];
    let map = pipeline.linearity(
        exposures
            .iter()
            .map(|gain| render(*gain).map(|frame| (*gain, frame)))
            .collect::<Result<Vec<_>>>()?,
    )?;

    let saturated = map.saturated_mask()?.invalid_count();
    info!(
        pixels = shape.len(),
        saturated,
        "scored linearity over {} exposures",
        exposures.len()
    );

    Ok(())
}
