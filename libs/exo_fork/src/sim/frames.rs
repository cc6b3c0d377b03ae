//! Physical frames of the simulated host, reference counted.
//!
//! Every mapping of a frame holds one reference. A COW frame shared by a
//! parent and its child has a count of 2 until one of them copies it; the
//! frame goes back to the free list when its last mapping goes away.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::layout::PGSIZE;

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed out since creation
    pub allocated: usize,
    /// Frames returned to the free list
    pub freed: usize,
    /// Frames currently mapped somewhere
    pub in_use: usize,
    /// Highest `in_use` seen
    pub peak: usize,
}

struct Frame {
    data: Box<[u8]>,
    refs: usize,
}

/// Frame table. Frame numbers start at 1.
pub struct FrameTable {
    frames: Vec<Option<Frame>>,
    free: Vec<u32>,
    max_frames: usize,
    stats: FrameStats,
}

impl FrameTable {
    pub fn new(max_frames: usize) -> Self {
        FrameTable {
            frames: vec![None],
            free: Vec::new(),
            max_frames,
            stats: FrameStats::default(),
        }
    }

    /// A zero-filled frame with one reference, or `None` when memory is exhausted
    pub fn alloc(&mut self) -> Option<u32> {
        if self.stats.in_use >= self.max_frames {
            return None;
        }

        let frame = Frame {
            data: vec![0u8; PGSIZE].into_boxed_slice(),
            refs: 1,
        };
        let number = match self.free.pop() {
            Some(number) => {
                self.frames[number as usize] = Some(frame);
                number
            }
            None => {
                self.frames.push(Some(frame));
                (self.frames.len() - 1) as u32
            }
        };

        self.stats.allocated += 1;
        self.stats.in_use += 1;
        self.stats.peak = self.stats.peak.max(self.stats.in_use);
        Some(number)
    }

    /// One more mapping of `number`
    pub fn ref_frame(&mut self, number: u32) {
        if let Some(frame) = self.slot_mut(number) {
            frame.refs += 1;
        }
    }

    /// One mapping fewer. Returns true if the frame was freed.
    pub fn unref_frame(&mut self, number: u32) -> bool {
        let freed = match self.slot_mut(number) {
            Some(frame) => {
                frame.refs -= 1;
                frame.refs == 0
            }
            None => return false,
        };

        if freed {
            self.frames[number as usize] = None;
            self.free.push(number);
            self.stats.freed += 1;
            self.stats.in_use -= 1;
        }
        freed
    }

    pub fn ref_count(&self, number: u32) -> usize {
        self.slot(number).map_or(0, |frame| frame.refs)
    }

    pub fn data(&self, number: u32) -> Option<&[u8]> {
        self.slot(number).map(|frame| &frame.data[..])
    }

    pub fn data_mut(&mut self, number: u32) -> Option<&mut [u8]> {
        self.slot_mut(number).map(|frame| &mut frame.data[..])
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    fn slot(&self, number: u32) -> Option<&Frame> {
        self.frames.get(number as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, number: u32) -> Option<&mut Frame> {
        self.frames.get_mut(number as usize).and_then(Option::as_mut)
    }
}
