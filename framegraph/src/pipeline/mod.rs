//! Ring of frame slots for multiple frames in flight.
//!
//! Each slot collects what one frame leaves behind: the fences of its
//! submissions, pending readbacks, cross-queue semaphores and resources
//! released while the frame could still use them. A slot is recycled only
//! after all of its fences have signaled.
//!
//! ```text
//! ring size = 2
//!
//! Slot 0: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! Slot 1: [Frame 2] ──► [Frame 4] ──► [Frame 6] ──►
//! ```
//!
//! | Level | Primitive | Purpose |
//! |-------|-----------|---------|
//! | Task → Task | Barriers | Resource state transitions within a command buffer |
//! | Batch → Batch | Semaphores | Cross-queue ordering within a frame |
//! | Frame → Frame | Fences | Slot reuse across frames |

use std::time::Duration;

use crate::compiler::PendingReadback;
use crate::device::GpuDevice;
use crate::error::{GraphError, GraphResult};
use crate::resources::NativeResource;
use crate::scheduler::{Fence, Semaphore};

/// Work retained by one frame until the device is done with it.
#[derive(Debug, Default)]
pub(crate) struct FrameSlot {
    pub fences: Vec<Fence>,
    pub readbacks: Vec<PendingReadback>,
    pub semaphores: Vec<Semaphore>,
    pub released: Vec<NativeResource>,
    /// Frame that last used this slot.
    pub frame_index: Option<u64>,
}

impl FrameSlot {
    fn is_ready(&self) -> bool {
        self.fences.iter().all(Fence::is_signaled)
    }
}

/// Contents of a recycled slot.
///
/// Readback callbacks must run after every frame graph lock is released.
#[derive(Debug, Default)]
pub(crate) struct Recycled {
    pub readbacks: Vec<PendingReadback>,
    pub semaphores: Vec<Semaphore>,
    pub released: Vec<NativeResource>,
}

impl Recycled {
    fn absorb(&mut self, slot: &mut FrameSlot) {
        slot.fences.clear();
        self.readbacks.append(&mut slot.readbacks);
        self.semaphores.append(&mut slot.semaphores);
        self.released.append(&mut slot.released);
    }

    pub(crate) fn destroy_released(&mut self, device: &dyn GpuDevice) {
        for resource in self.released.drain(..) {
            resource.destroy(device);
        }
    }

    /// Runs the readback callbacks.
    pub(crate) fn complete_readbacks(self, device: &dyn GpuDevice) {
        for readback in self.readbacks {
            readback.complete(device);
        }
    }
}

#[derive(Debug)]
pub(crate) struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    frame_count: u64,
}

impl FrameRing {
    pub(crate) fn new(size: usize) -> GraphResult<Self> {
        if size == 0 {
            return Err(GraphError::InvalidDescriptor(
                "ring buffer size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            slots: (0..size).map(|_| FrameSlot::default()).collect(),
            current: 0,
            frame_count: 0,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn current_index(&self) -> usize {
        self.current
    }

    /// Frames started so far.
    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Slot of the most recently ended frame.
    pub(crate) fn previous_mut(&mut self) -> &mut FrameSlot {
        let previous = (self.current + self.slots.len() - 1) % self.slots.len();
        &mut self.slots[previous]
    }

    /// Waits for the current slot's fences. On failure the slot is untouched.
    pub(crate) fn wait_current(&self, device: &dyn GpuDevice, timeout: Duration) -> GraphResult<()> {
        let slot = &self.slots[self.current];
        if slot.is_ready() {
            return Ok(());
        }
        log::trace!(
            "Waiting for slot {} (frame {:?})",
            self.current,
            slot.frame_index
        );
        device.wait_fences(&slot.fences, timeout)
    }

    /// Empties the current slot and starts a new frame in it.
    ///
    /// Call only after [`wait_current`](Self::wait_current) succeeded.
    pub(crate) fn begin(&mut self) -> (u64, Recycled) {
        let mut recycled = Recycled::default();
        let slot = &mut self.slots[self.current];
        debug_assert!(slot.is_ready(), "frame slot reused while in flight");
        recycled.absorb(slot);

        self.frame_count += 1;
        slot.frame_index = Some(self.frame_count);
        log::trace!("Begin frame {} (slot {})", self.frame_count, self.current);
        (self.frame_count, recycled)
    }

    /// Finishes the current frame and moves to the next slot.
    pub(crate) fn end(&mut self) {
        log::trace!("End frame {} (slot {})", self.frame_count, self.current);
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Every fence still held by a slot.
    pub(crate) fn fences(&self) -> Vec<Fence> {
        self.slots
            .iter()
            .flat_map(|s| s.fences.iter().cloned())
            .collect()
    }

    /// Empties every slot whose fences have signaled.
    pub(crate) fn recycle_ready(&mut self) -> Recycled {
        let mut recycled = Recycled::default();
        for slot in self.slots.iter_mut().filter(|s| s.is_ready()) {
            recycled.absorb(slot);
        }
        recycled
    }
}
