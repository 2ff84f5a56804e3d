use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::frame::{Frame, PixelFormat, SourceMetadata};
use crate::source::FrameSource;

type PoolKey = (usize, PixelFormat);

struct PoolInner {
    entries: HashMap<PoolKey, (Frame, u64)>,
    bytes: usize,
    capacity: usize,
    stamp: u64,
}

/// Bounded cache of decoded frames keyed by `(frame_index, pixel_format)`.
///
/// Eviction is least-recently-used up to the byte capacity; access is
/// serialised under the cache lock.
pub struct FramePool {
    inner: Mutex<PoolInner>,
}

impl FramePool {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                bytes: 0,
                capacity: capacity_bytes,
                stamp: 0,
            }),
        }
    }

    pub fn get(&self, index: usize, format: PixelFormat) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap();
        inner.stamp += 1;
        let stamp = inner.stamp;
        inner.entries.get_mut(&(index, format)).map(|entry| {
            entry.1 = stamp;
            entry.0.clone()
        })
    }

    pub fn put(&self, index: usize, format: PixelFormat, frame: Frame) {
        let size = frame.byte_size();
        let mut inner = self.inner.lock().unwrap();
        if size > inner.capacity {
            return;
        }
        inner.stamp += 1;
        let stamp = inner.stamp;
        if let Some(old) = inner.entries.insert((index, format), (frame, stamp)) {
            inner.bytes -= old.0.byte_size();
        }
        inner.bytes += size;
        while inner.bytes > inner.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(k, _)| *k)
                .expect("non-empty pool over capacity");
            let (evicted, _) = inner.entries.remove(&oldest).unwrap();
            inner.bytes -= evicted.byte_size();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.bytes = 0;
    }
}

/// Wraps a frame source with a [`FramePool`] so repeated random access does
/// not re-decode.
pub struct CachedSource<S: FrameSource> {
    inner: S,
    pool: FramePool,
}

impl<S: FrameSource> CachedSource<S> {
    pub fn new(inner: S, capacity_bytes: usize) -> Self {
        Self {
            inner,
            pool: FramePool::new(capacity_bytes),
        }
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for CachedSource<S> {
    fn frame_count(&self) -> usize {
        self.inner.frame_count()
    }

    fn active_flags(&self) -> &[bool] {
        self.inner.active_flags()
    }

    fn metadata(&self) -> SourceMetadata {
        self.inner.metadata()
    }

    fn seek_start(&mut self) {
        self.inner.seek_start();
    }

    fn seek_next(&mut self) -> Result<usize> {
        self.inner.seek_next()
    }

    fn current_frame(&self) -> Result<Frame> {
        self.inner.current_frame()
    }

    fn frame_at(&self, index: usize) -> Result<Frame> {
        let format = self.inner.metadata().pixel_format;
        if let Some(frame) = self.pool.get(index, format) {
            return Ok(frame);
        }
        let frame = self.inner.frame_at(index)?;
        self.pool.put(index, format, frame.clone());
        Ok(frame)
    }

    fn deactivate(&mut self) {
        self.pool.clear();
        self.inner.deactivate();
    }
}
