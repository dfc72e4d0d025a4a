#![cfg(feature = "serde")]

use dofp::prelude::*;

#[test]
fn config_round_trips_through_json() {
    let config = PipelineConfig {
        frame_shape: Shape::new(1024, 1224),
        layout: MosaicLayout::mono(),
        saturation_threshold: 4000.0,
        angle_convention: AngleConvention::FullTurn,
        moments_mode: MomentsMode::Sample,
        saturation_policy: SaturationPolicy::Exclude,
        ..Default::default()
    };

    let json = serde_json::to_string_pretty(&config).unwrap();
    let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, config);
    assert!(Pipeline::new(parsed).is_ok());
}

#[test]
fn missing_fields_take_defaults() {
    let parsed: PipelineConfig =
        serde_json::from_str(r#"{ "saturation_threshold": 60000.0, "moments_mode": "Sample" }"#)
            .unwrap();

    assert_eq!(
        parsed,
        PipelineConfig {
            saturation_threshold: 60000.0,
            moments_mode: MomentsMode::Sample,
            ..Default::default()
        }
    );
}
