use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::align::AlignConfig;
use crate::quality::QualityConfig;
use crate::refpt::{QualityCriterion, RefPointConfig};

/// Complete configuration for one pipeline run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub align: AlignConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub ref_points: RefPointConfig,
    /// Flat-field image path, divided out during stacking.
    #[serde(default)]
    pub flat_field: Option<PathBuf>,
    /// Decoded-frame cache capacity in mebibytes. `None` disables caching.
    #[serde(default)]
    pub cache_capacity_mb: Option<usize>,
}

impl fmt::Display for QualityCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityCriterion::PercentageBest(k) => write!(f, "best {k}% of frames"),
            QualityCriterion::MinRelQuality(k) => write!(f, "quality above {k}% of range"),
            QualityCriterion::NumberBest(k) => write!(f, "best {k} frames"),
        }
    }
}
