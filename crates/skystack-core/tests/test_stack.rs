#[allow(dead_code)]
mod common;

use skystack_core::align::{AlignConfig, GlobalAlignment};
use skystack_core::frame::Frame;
use skystack_core::geometry::Point;
use skystack_core::quality::{QualityConfig, QualityEstimator};
use skystack_core::refpt::{QualityCriterion, RefPointAlignment, RefPointConfig};
use skystack_core::source::{FrameSource, MemorySource};
use skystack_core::stack::{StackedImage, Stacker};
use skystack_core::StepStatus;

fn align_config() -> AlignConfig {
    AlignConfig {
        block_radius: 8,
        search_radius: 4,
        ..Default::default()
    }
}

fn quality_config() -> QualityConfig {
    QualityConfig {
        area_size: 32,
        detail_scale: 2,
    }
}

fn points_config(positions: Vec<Point>) -> RefPointConfig {
    RefPointConfig {
        positions: Some(positions),
        criterion: QualityCriterion::PercentageBest(100),
        ref_block_size: 16,
        search_radius: 4,
        ..Default::default()
    }
}

fn run<S: FrameSource>(
    source: S,
    align_cfg: AlignConfig,
    quality_cfg: QualityConfig,
    point_cfg: RefPointConfig,
    flat: Option<&Frame>,
) -> (StackedImage, Vec<f32>, usize) {
    let mut align = GlobalAlignment::new(source, align_cfg).unwrap();
    while align.step().unwrap() == StepStatus::More {}
    let mut quality = QualityEstimator::new(&align, quality_cfg).unwrap();
    while quality.step().unwrap() == StepStatus::More {}
    let mut refpts = RefPointAlignment::new(&quality, point_cfg).unwrap();
    while refpts.step().unwrap() == StepStatus::More {}
    let mut stacker = Stacker::new(&refpts, flat).unwrap();
    while stacker.step().unwrap() == StepStatus::More {}

    let weights = stacker.weights().iter().copied().collect();
    let triangles = stacker.triangulation().triangles().len();
    (stacker.final_image().unwrap(), weights, triangles)
}

#[test]
fn constant_frames_stack_to_the_input() {
    let source = common::constant_source(16, 16, 3, 100);
    let positions = vec![
        Point::new(4, 4),
        Point::new(12, 4),
        Point::new(4, 12),
        Point::new(12, 12),
    ];
    let cfg = RefPointConfig {
        ref_block_size: 8,
        search_radius: 2,
        ..points_config(positions)
    };
    let (image, weights, _) = run(
        source,
        AlignConfig::default(),
        QualityConfig {
            area_size: 8,
            detail_scale: 2,
        },
        cfg,
        None,
    );

    let StackedImage::Mono(data) = image else {
        panic!("expected mono output");
    };
    assert_eq!(data.dim(), (16, 16));
    let expected = 100.0 / 255.0;
    for &v in data.iter() {
        assert!((v - expected).abs() < 1e-5, "pixel {v} != {expected}");
    }
    // Every frame contributed exactly once to every pixel.
    assert!(weights.iter().all(|&w| w == 3.0));
}

#[test]
fn shifted_frames_stack_to_frame_zero() {
    let source = common::textured_source(64, 64, &[(0, 0), (1, 0), (2, 0)]);
    let mut positions = Vec::new();
    for y in [8, 24, 40, 56] {
        for x in [8, 24, 40] {
            positions.push(Point::new(x, y));
        }
    }
    let (image, weights, _) = run(
        source,
        align_config(),
        quality_config(),
        points_config(positions),
        None,
    );

    let StackedImage::Mono(data) = image else {
        panic!("expected mono output");
    };
    // Intersection of shifts 0..2 is 62x64.
    assert_eq!(data.dim(), (64, 62));

    for row in 0..64usize {
        for col in 0..62usize {
            let expected = common::tex(col as i64, row as i64) as f32 / 255.0;
            let got = data[[row, col]];
            assert!(
                (got - expected).abs() < 1e-4,
                "({col}, {row}): got {got}, expected {expected}"
            );
        }
    }
    assert!(weights.iter().all(|&w| w == 3.0));
}

#[test]
fn single_pass_weights_are_all_one() {
    // Triangles sharing edges must not double-count pixels.
    let source = common::textured_source(48, 48, &[(0, 0)]);
    let positions = vec![
        Point::new(12, 12),
        Point::new(36, 12),
        Point::new(24, 36),
        Point::new(12, 36),
    ];
    let (_, weights, triangles) = run(
        source,
        align_config(),
        quality_config(),
        points_config(positions),
        None,
    );

    assert!(triangles > 1, "shared edges require several triangles");
    assert!(weights.iter().all(|&w| w == 1.0), "no pixel counted twice");
}

#[test]
fn uniform_flat_field_cancels_out() {
    let positions = vec![Point::new(16, 16), Point::new(48, 16), Point::new(32, 48)];

    let plain = run(
        common::textured_source(64, 64, &[(0, 0), (0, 0)]),
        align_config(),
        quality_config(),
        points_config(positions.clone()),
        None,
    );

    let flat = Frame::mono8(0, ndarray::Array2::from_elem((64, 64), 180u8));
    let flattened = run(
        common::textured_source(64, 64, &[(0, 0), (0, 0)]),
        align_config(),
        quality_config(),
        points_config(positions),
        Some(&flat),
    );

    let (StackedImage::Mono(a), StackedImage::Mono(b)) = (plain.0, flattened.0) else {
        panic!("expected mono outputs");
    };
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-5, "uniform flat changed the stack");
    }
}

#[test]
fn processed_triangles_are_reported_per_step() {
    let source = common::textured_source(48, 48, &[(0, 0), (1, 1)]);
    let mut align = GlobalAlignment::new(source, align_config()).unwrap();
    while align.step().unwrap() == StepStatus::More {}
    let mut quality = QualityEstimator::new(&align, quality_config()).unwrap();
    while quality.step().unwrap() == StepStatus::More {}
    let positions = vec![Point::new(12, 12), Point::new(32, 12), Point::new(22, 32)];
    let mut refpts = RefPointAlignment::new(&quality, points_config(positions)).unwrap();
    while refpts.step().unwrap() == StepStatus::More {}

    let mut stacker = Stacker::new(&refpts, None).unwrap();
    let total = stacker.triangulation().triangles().len();
    loop {
        let status = stacker.step().unwrap();
        let processed = stacker.processed_triangles();
        assert!(!processed.is_empty());
        assert!(processed.iter().all(|&t| t < total));
        if status == StepStatus::Done {
            break;
        }
    }
}

#[test]
fn rgb_sources_stack_per_channel() {
    let source = common::rgb_source(64, 64, 2);
    let positions = vec![Point::new(16, 16), Point::new(48, 16), Point::new(32, 48)];
    let (image, _, _) = run(
        source,
        align_config(),
        quality_config(),
        points_config(positions),
        None,
    );

    let StackedImage::Rgb(data) = image else {
        panic!("expected RGB output");
    };
    assert_eq!(data.dim(), (64, 64, 3));
    for row in (0..64).step_by(7) {
        for col in (0..64).step_by(5) {
            for c in 0..3 {
                let expected =
                    common::tex(col as i64 + c as i64 * 1000, row as i64) as f32 / 255.0;
                let got = data[[row, col, c]];
                assert!(
                    (got - expected).abs() < 1e-4,
                    "({col}, {row}, {c}): got {got}, expected {expected}"
                );
            }
        }
    }
}

#[test]
fn every_intersection_pixel_has_one_owner() {
    let source = common::textured_source(40, 40, &[(0, 0)]);
    let mut align = GlobalAlignment::new(source, align_config()).unwrap();
    while align.step().unwrap() == StepStatus::More {}
    let mut quality = QualityEstimator::new(&align, quality_config()).unwrap();
    while quality.step().unwrap() == StepStatus::More {}
    let positions = vec![
        Point::new(10, 10),
        Point::new(30, 10),
        Point::new(10, 30),
        Point::new(30, 30),
    ];
    let mut refpts = RefPointAlignment::new(&quality, points_config(positions)).unwrap();
    while refpts.step().unwrap() == StepStatus::More {}
    let stacker = Stacker::new(&refpts, None).unwrap();

    for y in 0..40 {
        for x in 0..40 {
            assert!(
                stacker.triangle_at(x, y).is_some(),
                "({x}, {y}) has no owning triangle"
            );
        }
    }
}

#[test]
fn stage_order_is_enforced() {
    let source = MemorySource::new(vec![common::textured_frame(32, 32, 0, 0, 0)]).unwrap();
    let align = GlobalAlignment::new(source, align_config()).unwrap();
    let mut quality = QualityEstimator::new(&align, quality_config()).unwrap();
    // Quality estimation has not run yet.
    let result = RefPointAlignment::new(&quality, points_config(vec![Point::new(16, 16)]));
    assert!(result.is_err());
    while quality.step().unwrap() == StepStatus::More {}
    assert!(RefPointAlignment::new(&quality, points_config(vec![Point::new(16, 16)])).is_ok());
}
