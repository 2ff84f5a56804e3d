use std::path::Path;

use crate::error::{Result, SkystackError};
use crate::frame::{Frame, SourceMetadata};
use crate::io::ser::SerReader;
use crate::source::FrameSource;

/// Frame source backed by a memory-mapped SER video file.
pub struct SerSource {
    reader: SerReader,
    active: Vec<bool>,
    pos: usize,
    current: Option<usize>,
}

impl SerSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = SerReader::open(path)?;
        if reader.frame_count() == 0 {
            return Err(SkystackError::EmptySequence);
        }
        let active = vec![true; reader.frame_count()];
        Ok(Self {
            reader,
            active,
            pos: 0,
            current: None,
        })
    }

    pub fn header(&self) -> &crate::io::ser::SerHeader {
        &self.reader.header
    }

    pub fn set_active_flags(&mut self, active: Vec<bool>) -> Result<()> {
        if active.len() != self.reader.frame_count() {
            return Err(SkystackError::InvalidParameters(format!(
                "active flag count {} does not match frame count {}",
                active.len(),
                self.reader.frame_count()
            )));
        }
        if !active.iter().any(|&a| a) {
            return Err(SkystackError::EmptySequence);
        }
        self.active = active;
        self.seek_start();
        Ok(())
    }
}

impl FrameSource for SerSource {
    fn frame_count(&self) -> usize {
        self.reader.frame_count()
    }

    fn active_flags(&self) -> &[bool] {
        &self.active
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            width: self.reader.header.width,
            height: self.reader.header.height,
            pixel_format: self
                .reader
                .header
                .pixel_format()
                .expect("format validated at open"),
        }
    }

    fn seek_start(&mut self) {
        self.pos = 0;
        self.current = None;
    }

    fn seek_next(&mut self) -> Result<usize> {
        while self.pos < self.reader.frame_count() {
            let idx = self.pos;
            self.pos += 1;
            if self.active[idx] {
                self.current = Some(idx);
                return Ok(idx);
            }
        }
        Err(SkystackError::NoMoreImages)
    }

    fn current_frame(&self) -> Result<Frame> {
        let idx = self.current.ok_or(SkystackError::NoMoreImages)?;
        self.reader.read_frame(idx)
    }

    fn frame_at(&self, index: usize) -> Result<Frame> {
        self.reader.read_frame(index)
    }
}
