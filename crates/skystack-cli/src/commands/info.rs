use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use skystack_core::source::SerSource;

#[derive(Args)]
pub struct InfoArgs {
    /// Input SER file
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let source = SerSource::open(&args.file)?;
    let header = source.header();

    println!("{}", style(args.file.display()).bold());
    println!("  Frames:      {}", header.frame_count);
    println!("  Dimensions:  {}x{}", header.width, header.height);
    println!("  Pixel depth: {} bit", header.pixel_depth);
    println!("  Format:      {:?}", header.pixel_format()?);
    if !header.observer.is_empty() {
        println!("  Observer:    {}", header.observer);
    }
    if !header.instrument.is_empty() {
        println!("  Instrument:  {}", header.instrument);
    }
    if !header.telescope.is_empty() {
        println!("  Telescope:   {}", header.telescope);
    }
    Ok(())
}
