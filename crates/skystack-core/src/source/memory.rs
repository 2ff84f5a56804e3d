use crate::error::{Result, SkystackError};
use crate::frame::{Frame, SourceMetadata};
use crate::source::FrameSource;

/// Frame source backed by an owned, fully decoded sequence.
pub struct MemorySource {
    frames: Vec<Frame>,
    active: Vec<bool>,
    metadata: SourceMetadata,
    /// Next absolute index to consider when seeking.
    pos: usize,
    current: Option<usize>,
}

impl MemorySource {
    /// All frames must share dimensions and pixel format.
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        let first = frames.first().ok_or(SkystackError::EmptySequence)?;
        let metadata = SourceMetadata {
            width: first.width() as u32,
            height: first.height() as u32,
            pixel_format: first.pixel_format(),
        };
        for f in &frames {
            if f.width() as u32 != metadata.width
                || f.height() as u32 != metadata.height
                || f.pixel_format() != metadata.pixel_format
            {
                return Err(SkystackError::InvalidParameters(
                    "all frames must share dimensions and pixel format".into(),
                ));
            }
        }
        let active = vec![true; frames.len()];
        Ok(Self {
            frames,
            active,
            metadata,
            pos: 0,
            current: None,
        })
    }

    pub fn with_active_flags(frames: Vec<Frame>, active: Vec<bool>) -> Result<Self> {
        let mut source = Self::new(frames)?;
        source.set_active_flags(active)?;
        Ok(source)
    }

    pub fn set_active_flags(&mut self, active: Vec<bool>) -> Result<()> {
        if active.len() != self.frames.len() {
            return Err(SkystackError::InvalidParameters(format!(
                "active flag count {} does not match frame count {}",
                active.len(),
                self.frames.len()
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

impl FrameSource for MemorySource {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn active_flags(&self) -> &[bool] {
        &self.active
    }

    fn metadata(&self) -> SourceMetadata {
        self.metadata
    }

    fn seek_start(&mut self) {
        self.pos = 0;
        self.current = None;
    }

    fn seek_next(&mut self) -> Result<usize> {
        while self.pos < self.frames.len() {
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
        self.frame_at(idx)
    }

    fn frame_at(&self, index: usize) -> Result<Frame> {
        self.frames
            .get(index)
            .cloned()
            .ok_or(SkystackError::FrameIndexOutOfRange {
                index,
                total: self.frames.len(),
            })
    }
}
