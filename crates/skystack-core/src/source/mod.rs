pub mod cache;
pub mod memory;
pub mod ser;

pub use cache::{CachedSource, FramePool};
pub use memory::MemorySource;
pub use ser::SerSource;

use crate::error::Result;
use crate::frame::{Frame, SourceMetadata};

/// Producer of successive frames with metadata.
///
/// A source is owned by the global alignment stage for the lifetime of the
/// pipeline. Sequential access (`seek_start`/`seek_next`/`current_frame`) is
/// used by the alignment stage; downstream stages use `frame_at` random
/// access through their read-only borrow of the stage chain.
pub trait FrameSource {
    /// Total number of frames, active or not.
    fn frame_count(&self) -> usize;

    /// Per-frame activity flags; inactive frames are skipped by seeking.
    fn active_flags(&self) -> &[bool];

    fn active_count(&self) -> usize {
        self.active_flags().iter().filter(|&&a| a).count()
    }

    /// Absolute indices of the active frames, in sequence order.
    fn active_indices(&self) -> Vec<usize> {
        self.active_flags()
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| a.then_some(i))
            .collect()
    }

    fn metadata(&self) -> SourceMetadata;

    /// Rewind before the first active frame.
    fn seek_start(&mut self);

    /// Advance to the next active frame and return its absolute index.
    /// Fails with `NoMoreImages` when the sequence is exhausted.
    fn seek_next(&mut self) -> Result<usize>;

    /// Decode the frame at the current seek position.
    fn current_frame(&self) -> Result<Frame>;

    /// Decode the frame at an absolute index, regardless of activity.
    fn frame_at(&self, index: usize) -> Result<Frame>;

    /// Release decoder handles until the next access.
    fn deactivate(&mut self) {}
}
