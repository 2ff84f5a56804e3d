use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use skystack_core::io::image_io::{load_frame, save_stacked};
use skystack_core::pipeline::{run_pipeline, PipelineConfig, ProcessingPhase};
use skystack_core::refpt::QualityCriterion;
use skystack_core::source::{CachedSource, FrameSource, SerSource};

#[derive(Args)]
pub struct StackArgs {
    /// Input SER file
    pub file: PathBuf,

    /// TOML pipeline configuration; command-line flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Percentage of best frames contributing to each reference point (1-100)
    #[arg(long, default_value = "30")]
    pub select: u32,

    /// Quality estimation area size in pixels
    #[arg(long, default_value = "40")]
    pub area_size: u32,

    /// Reference point lattice spacing in pixels
    #[arg(long, default_value = "40")]
    pub spacing: u32,

    /// Reference block size in pixels
    #[arg(long, default_value = "32")]
    pub ref_block_size: u32,

    /// Search radius around each reference point in pixels
    #[arg(long, default_value = "20")]
    pub search_radius: u32,

    /// Flat-field image divided out during stacking
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Decoded-frame cache capacity in MiB
    #[arg(long, default_value = "512")]
    pub cache_mb: usize,

    /// Output file path
    #[arg(short, long, default_value = "stacked.tiff")]
    pub output: PathBuf,
}

pub fn run(args: &StackArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<PipelineConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    config.ref_points.criterion = QualityCriterion::PercentageBest(args.select.clamp(1, 100));
    config.ref_points.spacing = args.spacing;
    config.ref_points.ref_block_size = args.ref_block_size;
    config.ref_points.search_radius = args.search_radius;
    config.quality.area_size = args.area_size;

    let flat = match args.flat.as_ref().or(config.flat_field.as_ref()) {
        Some(path) => {
            Some(load_frame(path).with_context(|| format!("loading flat {}", path.display()))?)
        }
        None => None,
    };

    let source = SerSource::open(&args.file)?;
    let total = source.frame_count();
    println!("Stacking {} frames from {}", total, args.file.display());

    let cache_mb = config.cache_capacity_mb.unwrap_or(args.cache_mb);
    let source = CachedSource::new(source, cache_mb * 1024 * 1024);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:26} [{bar:40}] {pos}%")?
            .progress_chars("=> "),
    );

    let mut phase = ProcessingPhase::GlobalAlignment;
    bar.set_message(phase.to_string());
    let result = run_pipeline(source, &config, flat.as_ref(), |p, fraction| {
        if p != phase {
            phase = p;
            bar.set_message(phase.to_string());
        }
        bar.set_position((fraction * 100.0) as u64);
    })?;
    bar.finish();

    save_stacked(&result, &args.output)?;
    println!(
        "Saved {}x{} composite to {}",
        result.width(),
        result.height(),
        args.output.display()
    );
    Ok(())
}
