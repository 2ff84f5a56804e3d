pub mod config;

pub use config::PipelineConfig;

use std::fmt;

use tracing::info;

use crate::align::GlobalAlignment;
use crate::error::Result;
use crate::frame::Frame;
use crate::quality::QualityEstimator;
use crate::refpt::RefPointAlignment;
use crate::source::FrameSource;
use crate::stack::{StackedImage, Stacker};
use crate::StepStatus;

/// Which stage a progress report refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingPhase {
    GlobalAlignment,
    QualityEstimation,
    RefPointAlignment,
    Stacking,
}

impl fmt::Display for ProcessingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingPhase::GlobalAlignment => write!(f, "Global alignment"),
            ProcessingPhase::QualityEstimation => write!(f, "Quality estimation"),
            ProcessingPhase::RefPointAlignment => write!(f, "Reference point alignment"),
            ProcessingPhase::Stacking => write!(f, "Stacking"),
        }
    }
}

/// Drive all four stages to completion in order and return the composite.
///
/// `on_progress` receives the current phase and its completed fraction after
/// every step.
pub fn run_pipeline<S, F>(
    source: S,
    config: &PipelineConfig,
    flat_field: Option<&Frame>,
    mut on_progress: F,
) -> Result<StackedImage>
where
    S: FrameSource,
    F: FnMut(ProcessingPhase, f32),
{
    let total = source.active_count().max(1) as f32;

    info!("pipeline: global alignment");
    let mut align = GlobalAlignment::new(source, config.align.clone())?;
    let mut done = 1usize;
    on_progress(ProcessingPhase::GlobalAlignment, done as f32 / total);
    while align.step()? == StepStatus::More {
        done += 1;
        on_progress(ProcessingPhase::GlobalAlignment, done as f32 / total);
    }
    on_progress(ProcessingPhase::GlobalAlignment, 1.0);

    info!("pipeline: quality estimation");
    let mut quality = QualityEstimator::new(&align, config.quality)?;
    let mut done = 0usize;
    while quality.step()? == StepStatus::More {
        done += 1;
        on_progress(ProcessingPhase::QualityEstimation, done as f32 / total);
    }
    on_progress(ProcessingPhase::QualityEstimation, 1.0);

    info!("pipeline: reference point alignment");
    let mut refpts = RefPointAlignment::new(&quality, config.ref_points.clone())?;
    let mut done = 0usize;
    while refpts.step()? == StepStatus::More {
        done += 1;
        on_progress(ProcessingPhase::RefPointAlignment, done as f32 / total);
    }
    on_progress(ProcessingPhase::RefPointAlignment, 1.0);

    info!("pipeline: stacking");
    let mut stacker = Stacker::new(&refpts, flat_field)?;
    let mut done = 0usize;
    while stacker.step()? == StepStatus::More {
        done += 1;
        on_progress(ProcessingPhase::Stacking, done as f32 / total);
    }
    on_progress(ProcessingPhase::Stacking, 1.0);

    stacker.final_image()
}
