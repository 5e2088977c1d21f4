//! Per-frame submission table.
//!
//! The application declares the frame's batches up front with a
//! [`SubmissionGraphDesc`]. `begin_frame` turns it into a pre-sized
//! [`SubmissionTable`]: one [`BatchSlot`] per batch and one sub-batch slot per
//! recording thread. Worker threads fill their slots with atomics only, so
//! submitting or skipping a sub-batch never takes a lock.

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::compiler::{CompileStats, PendingReadback};
use crate::debug::DumpSubBatch;
use crate::device::CommandList;
use crate::error::{GraphError, GraphResult};
use crate::types::{PipelineStages, QueueType};

use super::sync::{Fence, Semaphore};

/// Application-chosen id of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u32);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {}", self.0)
    }
}

/// One queue submission of a frame, recorded by `thread_count` threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDesc {
    pub id: BatchId,
    pub name: String,
    pub queue: QueueType,
    /// Number of sub-batches; each recording thread fills one.
    pub thread_count: u32,
    /// Batches that must run before this one. Must be declared earlier.
    pub depends_on: Vec<BatchId>,
}

impl BatchDesc {
    pub fn new(id: u32, name: impl Into<String>, queue: QueueType) -> Self {
        Self {
            id: BatchId(id),
            name: name.into(),
            queue,
            thread_count: 1,
            depends_on: Vec::new(),
        }
    }

    pub fn with_thread_count(mut self, thread_count: u32) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_dependency(mut self, batch: u32) -> Self {
        self.depends_on.push(BatchId(batch));
        self
    }
}

/// The batches of one frame, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionGraphDesc {
    pub batches: Vec<BatchDesc>,
}

impl SubmissionGraphDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch: BatchDesc) -> Self {
        self.batches.push(batch);
        self
    }

    /// Checks ids are unique, dependencies point backwards and every batch
    /// has at least one sub-batch.
    pub fn validate(&self) -> GraphResult<()> {
        let mut seen = HashMap::new();
        for (position, batch) in self.batches.iter().enumerate() {
            if batch.thread_count == 0 {
                return Err(GraphError::InvalidDescriptor(format!(
                    "{} '{}' has no sub-batches",
                    batch.id, batch.name
                )));
            }
            for dep in &batch.depends_on {
                if !seen.contains_key(dep) {
                    return Err(GraphError::InvalidDescriptor(format!(
                        "{} depends on {dep}, which is not declared before it",
                        batch.id
                    )));
                }
            }
            if seen.insert(batch.id, position).is_some() {
                return Err(GraphError::InvalidDescriptor(format!(
                    "{} declared twice",
                    batch.id
                )));
            }
        }
        Ok(())
    }
}

/// Native work supplied directly by the application.
#[derive(Debug, Default)]
pub struct ExternalCmdBatch {
    pub command_lists: Vec<CommandList>,
    pub wait_semaphores: Vec<(Semaphore, PipelineStages)>,
    pub signal_semaphores: Vec<Semaphore>,
}

impl ExternalCmdBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command_list(mut self, list: CommandList) -> Self {
        self.command_lists.push(list);
        self
    }

    pub fn with_wait(mut self, semaphore: Semaphore, stages: PipelineStages) -> Self {
        self.wait_semaphores.push((semaphore, stages));
        self
    }

    pub fn with_signal(mut self, semaphore: Semaphore) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }
}

/// Handle to a sub-batch handed to the frame graph.
///
/// The fence becomes available once the owning batch has been submitted to
/// the device.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    batch: BatchId,
    index: u32,
    queue: QueueType,
    frame_index: u64,
    fence: Arc<OnceLock<Fence>>,
}

impl BatchHandle {
    pub fn batch(&self) -> BatchId {
        self.batch
    }

    pub fn index_in_batch(&self) -> u32 {
        self.index
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn fence(&self) -> Option<&Fence> {
        self.fence.get()
    }

    /// True once the batch has been submitted to the device.
    pub fn is_submitted(&self) -> bool {
        self.fence.get().is_some()
    }

    /// True once the device has finished the batch.
    pub fn is_complete(&self) -> bool {
        self.fence.get().is_some_and(Fence::is_signaled)
    }
}

/// What one sub-batch contributes to its batch's submission.
#[derive(Debug, Default)]
pub(crate) struct SubBatchPayload {
    pub command_lists: Vec<CommandList>,
    pub wait_semaphores: Vec<(Semaphore, PipelineStages)>,
    pub signal_semaphores: Vec<Semaphore>,
    pub readbacks: Vec<PendingReadback>,
    pub dump: Option<DumpSubBatch>,
    pub stats: CompileStats,
}

impl From<ExternalCmdBatch> for SubBatchPayload {
    fn from(batch: ExternalCmdBatch) -> Self {
        Self {
            command_lists: batch.command_lists,
            wait_semaphores: batch.wait_semaphores,
            signal_semaphores: batch.signal_semaphores,
            ..Self::default()
        }
    }
}

/// Lifecycle of a sub-batch slot within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SubBatchState {
    Free = 0,
    /// A thread is storing its payload.
    Claimed = 1,
    Ready = 2,
    Skipped = 3,
    /// The scheduler moved the payload into a submission.
    Taken = 4,
}

impl SubBatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Free,
            1 => Self::Claimed,
            2 => Self::Ready,
            3 => Self::Skipped,
            _ => Self::Taken,
        }
    }
}

/// Single-value slot filled and emptied with one atomic swap each.
struct AtomicSlot<T> {
    ptr: AtomicPtr<T>,
}

// SAFETY: The slot owns at most one boxed `T`; ownership moves in and out
// through atomic swaps, so only one thread ever holds the value.
unsafe impl<T: Send> Send for AtomicSlot<T> {}
unsafe impl<T: Send> Sync for AtomicSlot<T> {}

impl<T> AtomicSlot<T> {
    fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Stores `value`. Returns it back if the slot was occupied.
    fn put(&self, value: T) -> Result<(), T> {
        let raw = Box::into_raw(Box::new(value));
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            // SAFETY: `raw` came from `Box::into_raw` above and was never shared.
            Err(_) => Err(*unsafe { Box::from_raw(raw) }),
        }
    }

    fn take(&self) -> Option<T> {
        let raw = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: a non-null pointer was stored by `put` and the swap made
        // this thread its only owner.
        (!raw.is_null()).then(|| *unsafe { Box::from_raw(raw) })
    }
}

impl<T> Drop for AtomicSlot<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if !raw.is_null() {
            // SAFETY: `&mut self` guarantees exclusive ownership of the pointer.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

pub(crate) struct SubBatchSlot {
    state: AtomicU8,
    payload: AtomicSlot<SubBatchPayload>,
}

impl SubBatchSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SubBatchState::Free as u8),
            payload: AtomicSlot::new(),
        }
    }

    pub(crate) fn state(&self) -> SubBatchState {
        SubBatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SubBatchState, to: SubBatchState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Takes the payload of a ready sub-batch. Skipped slots yield nothing.
    pub(crate) fn take(&self) -> Option<SubBatchPayload> {
        if self.transition(SubBatchState::Ready, SubBatchState::Taken) {
            self.payload.take()
        } else {
            None
        }
    }
}

impl fmt::Debug for SubBatchSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubBatchSlot")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Scheduler-side view of one declared batch.
#[derive(Debug)]
pub(crate) struct BatchSlot {
    pub desc: BatchDesc,
    /// Index into the scheduler's queue list.
    pub queue_index: usize,
    /// Table indices of the direct dependencies.
    pub deps: Vec<usize>,
    /// Cross-queue semaphores allocated at `begin_frame`.
    pub waits: Vec<(Semaphore, PipelineStages)>,
    pub signals: Vec<Semaphore>,
    /// Position of this batch in its queue's submission sequence.
    pub expected_order: u64,
    settled: AtomicU32,
    submitted: AtomicBool,
    fence: Arc<OnceLock<Fence>>,
    pub sub_batches: Vec<SubBatchSlot>,
}

impl BatchSlot {
    /// True when every sub-batch was submitted or skipped.
    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire) as usize == self.sub_batches.len()
    }

    /// Marks the batch as handed to the device. Returns false if it already was.
    pub(crate) fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    /// True once the device accepted the batch.
    pub(crate) fn has_fence(&self) -> bool {
        self.fence.get().is_some()
    }

    pub(crate) fn set_fence(&self, fence: Fence) {
        if self.fence.set(fence).is_err() {
            log::error!("{} already has a fence", self.desc.id);
        }
    }

    pub(crate) fn skipped_count(&self) -> usize {
        self.sub_batches
            .iter()
            .filter(|s| s.state() == SubBatchState::Skipped)
            .count()
    }
}

/// Pre-sized table of a frame's batches and sub-batches.
#[derive(Debug, Default)]
pub(crate) struct SubmissionTable {
    frame_index: u64,
    batches: Vec<BatchSlot>,
    lookup: HashMap<BatchId, usize>,
}

impl SubmissionTable {
    /// Builds the table for an already validated description.
    ///
    /// `queue_of` maps each batch to the scheduler queue it runs on and
    /// `orders[i]` is that batch's expected position in its queue.
    pub(crate) fn new(
        frame_index: u64,
        desc: &SubmissionGraphDesc,
        queue_of: &[usize],
        orders: &[u64],
    ) -> Self {
        let lookup: HashMap<BatchId, usize> = desc
            .batches
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
        let batches = desc
            .batches
            .iter()
            .enumerate()
            .map(|(i, b)| BatchSlot {
                desc: b.clone(),
                queue_index: queue_of[i],
                deps: b.depends_on.iter().filter_map(|d| lookup.get(d).copied()).collect(),
                waits: Vec::new(),
                signals: Vec::new(),
                expected_order: orders[i],
                settled: AtomicU32::new(0),
                submitted: AtomicBool::new(false),
                fence: Arc::new(OnceLock::new()),
                sub_batches: (0..b.thread_count).map(|_| SubBatchSlot::new()).collect(),
            })
            .collect();
        Self {
            frame_index,
            batches,
            lookup,
        }
    }

    pub(crate) fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub(crate) fn batches(&self) -> &[BatchSlot] {
        &self.batches
    }

    pub(crate) fn batch(&self, index: usize) -> &BatchSlot {
        &self.batches[index]
    }

    pub(crate) fn batch_mut(&mut self, index: usize) -> &mut BatchSlot {
        &mut self.batches[index]
    }

    pub(crate) fn index_of(&self, id: BatchId) -> GraphResult<usize> {
        self.lookup
            .get(&id)
            .copied()
            .ok_or_else(|| GraphError::InvalidDescriptor(format!("{id} is not part of this frame")))
    }

    fn slot(&self, id: BatchId, index: u32) -> GraphResult<(usize, &SubBatchSlot)> {
        let batch = self.index_of(id)?;
        let slot = self.batches[batch]
            .sub_batches
            .get(index as usize)
            .ok_or_else(|| {
                GraphError::InvalidDescriptor(format!("{id} has no sub-batch {index}"))
            })?;
        Ok((batch, slot))
    }

    pub(crate) fn handle(&self, batch: usize, index: u32) -> BatchHandle {
        let slot = &self.batches[batch];
        BatchHandle {
            batch: slot.desc.id,
            index,
            queue: slot.desc.queue,
            frame_index: self.frame_index,
            fence: slot.fence.clone(),
        }
    }

    /// Fails if the sub-batch does not exist or was already submitted or skipped.
    pub(crate) fn ensure_free(&self, id: BatchId, index: u32) -> GraphResult<usize> {
        let (batch, slot) = self.slot(id, index)?;
        if slot.state() != SubBatchState::Free {
            return Err(GraphError::AlreadySubmitted {
                batch: id.0,
                index,
            });
        }
        Ok(batch)
    }

    /// Stores a sub-batch payload. Each sub-batch accepts exactly one submit or skip.
    pub(crate) fn submit(
        &self,
        id: BatchId,
        index: u32,
        payload: SubBatchPayload,
    ) -> GraphResult<BatchHandle> {
        let (batch, slot) = self.slot(id, index)?;
        if !slot.transition(SubBatchState::Free, SubBatchState::Claimed) {
            log::error!("Sub-batch {index} of {id} submitted twice");
            return Err(GraphError::AlreadySubmitted {
                batch: id.0,
                index,
            });
        }
        if slot.payload.put(payload).is_err() {
            // Unreachable while the state machine holds.
            log::error!("Sub-batch {index} of {id} already holds a payload");
        }
        slot.state.store(SubBatchState::Ready as u8, Ordering::Release);
        self.batches[batch].settled.fetch_add(1, Ordering::AcqRel);
        Ok(self.handle(batch, index))
    }

    /// Marks a sub-batch as skipped; it contributes no work.
    pub(crate) fn skip(&self, id: BatchId, index: u32) -> GraphResult<()> {
        let (batch, slot) = self.slot(id, index)?;
        if !slot.transition(SubBatchState::Free, SubBatchState::Skipped) {
            log::error!("Sub-batch {index} of {id} skipped after submission");
            return Err(GraphError::AlreadySubmitted {
                batch: id.0,
                index,
            });
        }
        self.batches[batch].settled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Sub-batches neither submitted nor skipped yet.
    pub(crate) fn pending_sub_batches(&self) -> usize {
        self.batches
            .iter()
            .map(|b| b.sub_batches.len() - b.settled.load(Ordering::Acquire) as usize)
            .sum()
    }

    pub(crate) fn is_all_batches_submitted(&self) -> bool {
        self.pending_sub_batches() == 0
    }

    pub(crate) fn skipped_sub_batches(&self) -> usize {
        self.batches.iter().map(BatchSlot::skipped_count).sum()
    }

    /// True if `consumer` is guaranteed to run after `producer`: same batch,
    /// an earlier batch on the same queue, or a declared (transitive) dependency.
    pub(crate) fn is_ordered_after(&self, consumer: usize, producer: usize) -> bool {
        if consumer == producer {
            return true;
        }
        let (c, p) = (&self.batches[consumer], &self.batches[producer]);
        if c.queue_index == p.queue_index && p.expected_order < c.expected_order {
            return true;
        }
        let mut stack = c.deps.clone();
        let mut visited = vec![false; self.batches.len()];
        while let Some(batch) = stack.pop() {
            if batch == producer {
                return true;
            }
            if !std::mem::replace(&mut visited[batch], true) {
                stack.extend_from_slice(&self.batches[batch].deps);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(desc: &SubmissionGraphDesc) -> SubmissionTable {
        let queues: Vec<usize> = desc.batches.iter().map(|b| b.queue as usize).collect();
        let orders: Vec<u64> = (1..=desc.batches.len() as u64).collect();
        SubmissionTable::new(1, desc, &queues, &orders)
    }

    #[test]
    fn test_validate_rejects_forward_dependency() {
        let desc = SubmissionGraphDesc::new()
            .with_batch(BatchDesc::new(0, "a", QueueType::Graphics).with_dependency(1))
            .with_batch(BatchDesc::new(1, "b", QueueType::Graphics));
        assert!(matches!(
            desc.validate(),
            Err(GraphError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_batches() {
        let dup = SubmissionGraphDesc::new()
            .with_batch(BatchDesc::new(0, "a", QueueType::Graphics))
            .with_batch(BatchDesc::new(0, "b", QueueType::Graphics));
        assert!(dup.validate().is_err());

        let empty = SubmissionGraphDesc::new()
            .with_batch(BatchDesc::new(0, "a", QueueType::Graphics).with_thread_count(0));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_submit_then_skip_is_rejected() {
        let desc = SubmissionGraphDesc::new()
            .with_batch(BatchDesc::new(7, "a", QueueType::Graphics).with_thread_count(2));
        let table = table(&desc);

        let handle = table
            .submit(BatchId(7), 0, SubBatchPayload::default())
            .unwrap();
        assert_eq!(handle.batch(), BatchId(7));
        assert!(!handle.is_submitted());
        assert_eq!(
            table.skip(BatchId(7), 0),
            Err(GraphError::AlreadySubmitted { batch: 7, index: 0 })
        );
        assert!(!table.is_all_batches_submitted());

        table.skip(BatchId(7), 1).unwrap();
        assert!(table.is_all_batches_submitted());
        assert!(table.batch(0).is_settled());
        assert_eq!(table.skipped_sub_batches(), 1);
    }

    #[test]
    fn test_payload_taken_once() {
        let desc =
            SubmissionGraphDesc::new().with_batch(BatchDesc::new(0, "a", QueueType::Graphics));
        let table = table(&desc);
        let payload = SubBatchPayload {
            command_lists: vec![CommandList::default()],
            ..SubBatchPayload::default()
        };
        table.submit(BatchId(0), 0, payload).unwrap();

        let slot = &table.batch(0).sub_batches[0];
        assert_eq!(slot.take().unwrap().command_lists.len(), 1);
        assert!(slot.take().is_none());
        assert_eq!(slot.state(), SubBatchState::Taken);
    }

    #[test]
    fn test_unknown_batch_and_index() {
        let desc =
            SubmissionGraphDesc::new().with_batch(BatchDesc::new(0, "a", QueueType::Graphics));
        let table = table(&desc);
        assert!(table.skip(BatchId(1), 0).is_err());
        assert!(table.skip(BatchId(0), 1).is_err());
    }

    #[test]
    fn test_transitive_ordering() {
        let desc = SubmissionGraphDesc::new()
            .with_batch(BatchDesc::new(0, "upload", QueueType::AsyncTransfer))
            .with_batch(BatchDesc::new(1, "sim", QueueType::AsyncCompute).with_dependency(0))
            .with_batch(BatchDesc::new(2, "draw", QueueType::Graphics).with_dependency(1))
            .with_batch(BatchDesc::new(3, "ui", QueueType::AsyncCompute));
        let table = table(&desc);
        assert!(table.is_ordered_after(2, 0));
        assert!(table.is_ordered_after(3, 1));
        assert!(!table.is_ordered_after(2, 3));
        assert!(!table.is_ordered_after(0, 2));
    }

    #[test]
    fn test_atomic_slot_drops_unclaimed_value() {
        let value = Arc::new(());
        let slot = AtomicSlot::new();
        assert!(slot.put(value.clone()).is_ok());
        assert!(slot.put(value.clone()).is_err());
        assert_eq!(Arc::strong_count(&value), 2);
        drop(slot);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
