#[allow(dead_code)]
mod common;

use skystack_core::pipeline::{run_pipeline, PipelineConfig, ProcessingPhase};
use skystack_core::refpt::QualityCriterion;
use skystack_core::stack::StackedImage;

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.align.block_radius = 8;
    config.align.search_radius = 4;
    config.quality.area_size = 32;
    config.ref_points.criterion = QualityCriterion::PercentageBest(100);
    config.ref_points.ref_block_size = 16;
    config.ref_points.search_radius = 4;
    config.ref_points.spacing = 16;
    config
}

#[test]
fn full_pipeline_on_jittered_sequence() {
    let shifts = [(0, 0), (1, 0), (0, 1), (-1, 0), (1, 1), (0, -1)];
    let source = common::textured_source(64, 64, &shifts);

    let result = run_pipeline(source, &test_config(), None, |_, _| {}).unwrap();
    let StackedImage::Mono(data) = result else {
        panic!("expected mono output");
    };

    // Jitter of +-1 leaves a 62x62 intersection.
    assert_eq!(data.dim(), (62, 62));
    for &v in data.iter() {
        assert!((0.0..=1.0).contains(&v), "pixel out of range: {v}");
    }
}

#[test]
fn phases_progress_in_order() {
    let source = common::textured_source(64, 64, &[(0, 0), (1, 0), (0, 1)]);

    let mut seen = Vec::new();
    run_pipeline(source, &test_config(), None, |phase, fraction| {
        assert!((0.0..=1.0).contains(&fraction));
        seen.push((phase, fraction));
    })
    .unwrap();

    let order = [
        ProcessingPhase::GlobalAlignment,
        ProcessingPhase::QualityEstimation,
        ProcessingPhase::RefPointAlignment,
        ProcessingPhase::Stacking,
    ];
    let mut stage = 0;
    for &(phase, _) in &seen {
        while order[stage] != phase {
            stage += 1;
        }
    }
    assert_eq!(stage, order.len() - 1, "not all phases were reported");
    // Each phase finishes with a full progress report.
    for phase in order {
        let last = seen.iter().rev().find(|(p, _)| *p == phase).unwrap();
        assert_eq!(last.1, 1.0);
    }
}

#[test]
fn identical_runs_are_bitwise_identical() {
    let shifts = [(0, 0), (1, 1), (2, 0), (0, 2)];
    let first = run_pipeline(
        common::textured_source(64, 64, &shifts),
        &test_config(),
        None,
        |_, _| {},
    )
    .unwrap();
    let second = run_pipeline(
        common::textured_source(64, 64, &shifts),
        &test_config(),
        None,
        |_, _| {},
    )
    .unwrap();

    let (StackedImage::Mono(a), StackedImage::Mono(b)) = (first, second) else {
        panic!("expected mono outputs");
    };
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
}

#[test]
fn single_frame_pipeline_reproduces_the_frame() {
    let source = common::textured_source(48, 48, &[(0, 0)]);
    let result = run_pipeline(source, &test_config(), None, |_, _| {}).unwrap();

    let StackedImage::Mono(data) = result else {
        panic!("expected mono output");
    };
    assert_eq!(data.dim(), (48, 48));
    for row in 0..48usize {
        for col in 0..48usize {
            let expected = common::tex(col as i64, row as i64) as f32 / 255.0;
            let got = data[[row, col]];
            assert!(
                (got - expected).abs() < 1e-4,
                "({col}, {row}): got {got}, expected {expected}"
            );
        }
    }
}

#[test]
fn config_round_trips_through_serde() {
    let config = test_config();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(
        serde_json::to_string(&parsed).unwrap(),
        json,
        "round trip must preserve the configuration"
    );
}
