//! Frame and stack-array recycling
//!
//! Two tiny fixed-capacity caches. This is bounded reuse for the common
//! call/return churn, not a general allocator: when a cache is full the
//! object is simply dropped.
//!
//! A pool belongs to a single runtime and is not safe to share across
//! threads; the `Rc`-based values it holds keep it `!Send`.

use tracing::trace;

use crate::vm::frames::Frame;
use crate::vm::value::{Value, Varargs};

/// Default number of cached frames
pub const DEFAULT_FRAME_CACHE_SIZE: usize = 4;

/// Default number of cached stack arrays
pub const DEFAULT_ARRAY_CACHE_SIZE: usize = 4;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames handed out from the cache
    pub frames_reused: usize,
    /// Frames allocated because the cache was empty
    pub frames_allocated: usize,
    /// Arrays handed out from the cache
    pub arrays_reused: usize,
    /// Arrays allocated because nothing cached was large enough
    pub arrays_allocated: usize,
}

/// Bounded cache of frames and value arrays
#[derive(Debug)]
pub struct FramePool {
    frames: Vec<Option<Frame>>,
    arrays: Vec<Option<Vec<Value>>>,
    stats: PoolStats,
}

impl FramePool {
    /// Create a pool with the default capacities
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRAME_CACHE_SIZE, DEFAULT_ARRAY_CACHE_SIZE)
    }

    /// Create a pool with custom capacities
    pub fn with_capacity(
        frame_cache_size: usize,
        array_cache_size: usize,
    ) -> Self {
        Self {
            frames: (0..frame_cache_size).map(|_| None).collect(),
            arrays: vec![None; array_cache_size],
            stats: PoolStats::default(),
        }
    }

    /// A cleared frame, cached if possible
    pub fn take_frame(&mut self) -> Frame {
        for slot in self.frames.iter_mut() {
            if let Some(frame) = slot.take() {
                self.stats.frames_reused += 1;
                return frame;
            }
        }
        self.stats.frames_allocated += 1;
        Frame::default()
    }

    /// Return a frame; it is closed and stripped of every reference first
    pub fn give_frame(
        &mut self,
        mut frame: Frame,
    ) {
        frame.close(self);
        clear_frame(&mut frame);

        if let Some(slot) = self.frames.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(frame);
        }
        // Cache full: drop it
    }

    /// The smallest cached array with at least `size` slots, else a new
    /// nil-filled one
    pub fn take_array(
        &mut self,
        size: usize,
    ) -> Vec<Value> {
        let mut best: Option<(usize, usize)> = None;
        for (index, cached) in self.arrays.iter().enumerate() {
            if let Some(array) = cached {
                let len = array.len();
                if len >= size && best.is_none_or(|(_, best_len)| len < best_len) {
                    best = Some((index, len));
                }
            }
        }

        if let Some(array) = best.and_then(|(index, _)| self.arrays[index].take()) {
            trace!(size, len = array.len(), "reusing stack array");
            self.stats.arrays_reused += 1;
            return array;
        }

        trace!(size, "allocating stack array");
        self.stats.arrays_allocated += 1;
        vec![Value::Nil; size]
    }

    /// Offer an array back to the cache
    ///
    /// An empty slot wins; otherwise the smallest cached array that is
    /// smaller than `array` is evicted. If neither exists the array is
    /// dropped, so the cache drifts toward keeping large arrays.
    pub fn give_array(
        &mut self,
        mut array: Vec<Value>,
    ) {
        let mut worst: Option<usize> = None;
        let mut worst_len = usize::MAX;
        for (index, cached) in self.arrays.iter().enumerate() {
            match cached {
                None => {
                    // Nothing is better than an empty slot
                    worst = Some(index);
                    break;
                }
                Some(c) if c.len() < array.len() && c.len() < worst_len => {
                    worst = Some(index);
                    worst_len = c.len();
                }
                Some(_) => {}
            }
        }

        if let Some(index) = worst {
            array.fill(Value::Nil);
            self.arrays[index] = Some(array);
        }
    }

    /// Lengths of the cached arrays, empty slots as `None`
    pub fn cached_array_lens(&self) -> Vec<Option<usize>> {
        self.arrays.iter().map(|a| a.as_ref().map(Vec::len)).collect()
    }

    /// Number of cached frames
    pub fn cached_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }

    pub fn frame_capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn array_capacity(&self) -> usize {
        self.arrays.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

fn clear_frame(frame: &mut Frame) {
    frame.closure = None;
    frame.args = Varargs::none();
    frame.varargs = Varargs::none();
    frame.v = Varargs::none();
    frame.parent = None;
    frame.parent_count = 0;
    frame.return_base = 0;
    frame.return_count = 0;
    frame.top = 0;
    frame.pc = 0;
}
