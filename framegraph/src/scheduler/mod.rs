//! Multi-queue submission.
//!
//! The [`QueueScheduler`] owns one [`QueueData`] per hardware queue the frame
//! graph uses. At `begin_frame` it turns the frame's
//! [`SubmissionGraphDesc`] into a [`SubmissionTable`], assigning every batch
//! its position in its queue and allocating one semaphore per cross-queue
//! dependency. Worker threads then fill the table, and [`flush`] hands
//! settled batches to the device in queue order.
//!
//! # Synchronization
//!
//! | Relation | Primitive |
//! |----------|-----------|
//! | Batches on the same queue | Submission order, nothing extra |
//! | Batches on different queues | Binary semaphore, latest producer per queue only |
//! | Host and device | One fence per batch |
//!
//! A batch is never submitted before the batches it depends on, so every
//! semaphore wait has its signal already queued on the device.
//!
//! [`flush`]: QueueScheduler::flush

mod submission;
mod sync;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub use submission::{BatchDesc, BatchHandle, BatchId, ExternalCmdBatch, SubmissionGraphDesc};
pub(crate) use submission::{SubBatchPayload, SubmissionTable};
pub use sync::{Fence, FenceStatus, Semaphore};

use redlilium_core::pool::RecyclePool;
use redlilium_core::spin::SpinLock;

use crate::compiler::CompileStats;
use crate::debug::{DumpBatch, FrameDump};
use crate::device::{CommandList, GpuDevice, Submission};
use crate::error::{GraphError, GraphResult};
use crate::pipeline::FrameSlot;
use crate::stats::FrameStatistics;
use crate::types::{PipelineStages, QueueFamily, QueueInfo, QueueType, QueueUsage};

/// Pool of recycled native command lists for one queue.
pub(crate) type CommandPool = Arc<SpinLock<RecyclePool<CommandList>>>;

/// A submission the device has not reported complete yet.
#[derive(Debug)]
struct InFlight {
    order: u64,
    fence: Fence,
    command_lists: Vec<CommandList>,
}

/// Bookkeeping of one hardware queue.
///
/// Orders count submissions on this queue over the instance's lifetime:
/// `last_completed <= last_submitted <= next_order`. A batch the device
/// rejected, or one dropped at the end of its frame, still uses up its order.
#[derive(Debug)]
pub(crate) struct QueueData {
    pub info: QueueInfo,
    /// Index of the queue in [`GpuDevice::queues`].
    pub device_index: usize,
    next_order: u64,
    pub last_submitted: u64,
    pub last_completed: u64,
    /// Table indices of this frame's batches not yet submitted, in order.
    pending: VecDeque<usize>,
    submitted: VecDeque<InFlight>,
    cmd_pool: CommandPool,
}

impl QueueData {
    fn new(info: QueueInfo, device_index: usize) -> Self {
        Self {
            info,
            device_index,
            next_order: 0,
            last_submitted: 0,
            last_completed: 0,
            pending: VecDeque::new(),
            submitted: VecDeque::new(),
            cmd_pool: Arc::new(SpinLock::new(RecyclePool::new())),
        }
    }

    /// Retires finished submissions and returns their command lists to the pool.
    fn poll(&mut self) {
        while self.submitted.front().is_some_and(|f| f.fence.is_signaled()) {
            let Some(done) = self.submitted.pop_front() else {
                break;
            };
            self.last_completed = done.order;
            let mut pool = self.cmd_pool.lock();
            for list in done.command_lists {
                pool.recycle(list);
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueueScheduler {
    device: Arc<dyn GpuDevice>,
    queues: Vec<QueueData>,
    /// Scheduler queue used for each [`QueueType`].
    resolve: [usize; 3],
    free_semaphores: Vec<Semaphore>,
    stats: FrameStatistics,
    dump: FrameDump,
}

impl QueueScheduler {
    /// Picks one device queue per requested type.
    ///
    /// The device must expose a graphics queue. Requested types the device
    /// lacks, or that `usage` leaves out, run on the graphics queue.
    pub(crate) fn new(device: Arc<dyn GpuDevice>, usage: QueueUsage) -> GraphResult<Self> {
        let available = device.queues();
        let find = |queue_type| available.iter().position(|q| q.queue_type == queue_type);
        let Some(graphics) = find(QueueType::Graphics) else {
            return Err(GraphError::InvalidDescriptor(format!(
                "device '{}' has no graphics queue",
                device.name()
            )));
        };

        let mut queues = vec![QueueData::new(available[graphics], graphics)];
        let mut resolve = [0; 3];
        for queue_type in QueueType::ALL {
            if queue_type == QueueType::Graphics || !usage.contains(queue_type.usage()) {
                continue;
            }
            match find(queue_type) {
                Some(index) => {
                    resolve[queue_type as usize] = queues.len();
                    queues.push(QueueData::new(available[index], index));
                }
                None => log::warn!("{queue_type} queue not available, using the graphics queue"),
            }
        }

        log::info!(
            "Frame graph scheduler on '{}': {} queue(s)",
            device.name(),
            queues.len()
        );
        let stats = FrameStatistics::new(0, queues.iter().map(|q| q.info.queue_type));
        Ok(Self {
            device,
            queues,
            resolve,
            free_semaphores: Vec::new(),
            stats,
            dump: FrameDump::default(),
        })
    }

    pub(crate) fn queue_index(&self, queue_type: QueueType) -> usize {
        self.resolve[queue_type as usize]
    }

    pub(crate) fn queue(&self, queue_type: QueueType) -> &QueueData {
        &self.queues[self.queue_index(queue_type)]
    }

    /// Queue type that actually executes work requested for `queue_type`.
    pub(crate) fn resolved_type(&self, queue_type: QueueType) -> QueueType {
        self.queue(queue_type).info.queue_type
    }

    pub(crate) fn queue_family(&self, queue_type: QueueType) -> QueueFamily {
        self.queue(queue_type).info.family
    }

    pub(crate) fn command_pool(&self, queue_type: QueueType) -> CommandPool {
        self.queue(queue_type).cmd_pool.clone()
    }

    /// Builds the submission table of a new frame.
    ///
    /// Fails without side effects if `desc` is invalid or a semaphore
    /// cannot be created.
    pub(crate) fn prepare_frame(
        &mut self,
        desc: &SubmissionGraphDesc,
        frame_index: u64,
    ) -> GraphResult<SubmissionTable> {
        desc.validate()?;
        debug_assert!(self.queues.iter().all(|q| q.pending.is_empty()));

        let queue_of: Vec<usize> = desc
            .batches
            .iter()
            .map(|b| self.queue_index(b.queue))
            .collect();
        let mut next: Vec<u64> = self.queues.iter().map(|q| q.next_order).collect();
        let orders: Vec<u64> = queue_of
            .iter()
            .map(|&q| {
                next[q] += 1;
                next[q]
            })
            .collect();
        let mut table = SubmissionTable::new(frame_index, desc, &queue_of, &orders);

        // Waiting on the latest producer of a queue covers the earlier ones.
        let mut links = Vec::new();
        for (consumer, batch) in table.batches().iter().enumerate() {
            let mut latest: Vec<Option<usize>> = vec![None; self.queues.len()];
            for &producer in &batch.deps {
                let queue = table.batch(producer).queue_index;
                if queue == batch.queue_index {
                    continue;
                }
                let newer = latest[queue]
                    .map_or(true, |p| table.batch(p).expected_order < table.batch(producer).expected_order);
                if newer {
                    latest[queue] = Some(producer);
                }
            }
            links.extend(latest.into_iter().flatten().map(|producer| (producer, consumer)));
        }

        let mut semaphores = Vec::with_capacity(links.len());
        for _ in &links {
            match self.acquire_semaphore() {
                Ok(semaphore) => semaphores.push(semaphore),
                Err(e) => {
                    self.free_semaphores.append(&mut semaphores);
                    return Err(e);
                }
            }
        }
        for ((producer, consumer), semaphore) in links.into_iter().zip(semaphores) {
            table.batch_mut(producer).signals.push(semaphore);
            table
                .batch_mut(consumer)
                .waits
                .push((semaphore, PipelineStages::ALL_COMMANDS));
        }

        for (batch, &queue) in queue_of.iter().enumerate() {
            self.queues[queue].pending.push_back(batch);
        }
        for (queue, order) in self.queues.iter_mut().zip(next) {
            queue.next_order = order;
        }
        self.stats = FrameStatistics::new(frame_index, self.queues.iter().map(|q| q.info.queue_type));
        self.dump = FrameDump::new(frame_index);
        Ok(table)
    }

    fn acquire_semaphore(&mut self) -> GraphResult<Semaphore> {
        match self.free_semaphores.pop() {
            Some(semaphore) => Ok(semaphore),
            None => self.device.create_semaphore(),
        }
    }

    pub(crate) fn release_semaphores(&mut self, semaphores: impl IntoIterator<Item = Semaphore>) {
        self.free_semaphores.extend(semaphores);
    }

    /// Batches of the current frame not yet handed to the device.
    pub(crate) fn pending_batches(&self) -> usize {
        self.queues.iter().map(|q| q.pending.len()).sum()
    }

    /// Submits settled batches whose dependencies are on the device.
    ///
    /// Each queue is drained in order and stops at the first batch that is
    /// not ready, so a deferred batch also holds back the batches queued
    /// behind it. Returns the number of batches submitted.
    pub(crate) fn flush(
        &mut self,
        table: &SubmissionTable,
        slot: &mut FrameSlot,
        max_iterations: usize,
    ) -> GraphResult<usize> {
        let mut submitted = 0;
        for _ in 0..max_iterations.max(1) {
            let mut progress = false;
            for queue in 0..self.queues.len() {
                while let Some(&batch) = self.queues[queue].pending.front() {
                    let slot_state = table.batch(batch);
                    if !slot_state.is_settled() {
                        break;
                    }
                    if !self.deps_submitted(table, batch) {
                        log::trace!(
                            "Deferring {}: a dependency is not submitted yet",
                            slot_state.desc.id
                        );
                        break;
                    }
                    // A batch the device rejects is not retried.
                    self.queues[queue].pending.pop_front();
                    self.submit_batch(table, batch, slot)?;
                    submitted += 1;
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        Ok(submitted)
    }

    fn deps_submitted(&self, table: &SubmissionTable, batch: usize) -> bool {
        table.batch(batch).deps.iter().all(|&dep| {
            let producer = table.batch(dep);
            // A rejected producer never signals its semaphores.
            producer.has_fence()
                && self.queues[producer.queue_index].last_submitted >= producer.expected_order
        })
    }

    fn submit_batch(
        &mut self,
        table: &SubmissionTable,
        index: usize,
        slot: &mut FrameSlot,
    ) -> GraphResult<()> {
        let batch = table.batch(index);
        assert!(
            batch.mark_submitted(),
            "{} handed to the device twice",
            batch.desc.id
        );

        let mut submission = Submission {
            command_lists: Vec::new(),
            wait_semaphores: batch.waits.clone(),
            signal_semaphores: batch.signals.clone(),
            fence: Fence::new_unsignaled(),
        };
        let mut readbacks = Vec::new();
        let mut work = CompileStats::default();
        let mut dump = DumpBatch {
            id: batch.desc.id,
            name: batch.desc.name.clone(),
            queue: self.queues[batch.queue_index].info.queue_type,
            sub_batches: Vec::new(),
            skipped: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
        };
        for (sub, slot_state) in batch.sub_batches.iter().enumerate() {
            let Some(payload) = slot_state.take() else {
                dump.skipped.push(sub as u32);
                continue;
            };
            submission.command_lists.extend(payload.command_lists);
            submission.wait_semaphores.extend(payload.wait_semaphores);
            submission.signal_semaphores.extend(payload.signal_semaphores);
            readbacks.extend(payload.readbacks);
            work.accumulate(&payload.stats);
            dump.sub_batches.extend(payload.dump);
        }

        let queue = &mut self.queues[batch.queue_index];
        debug_assert_eq!(queue.last_submitted + 1, batch.expected_order);
        queue.last_submitted = batch.expected_order;
        if let Err(e) = self.device.submit(queue.device_index, &submission) {
            log::error!("Submitting {} failed: {e}", batch.desc.id);
            let mut pool = queue.cmd_pool.lock();
            for list in submission.command_lists {
                pool.recycle(list);
            }
            drop(pool);
            for readback in readbacks {
                readback.cancel(self.device.as_ref());
            }
            // Nothing will signal them; dependents stay deferred.
            self.free_semaphores.extend(batch.signals.iter().copied());
            return Err(e);
        }

        log::trace!(
            "Submitted {} '{}' to the {} queue: {} command list(s), {} skipped",
            batch.desc.id,
            batch.desc.name,
            queue.info.queue_type,
            submission.command_lists.len(),
            dump.skipped.len()
        );

        batch.set_fence(submission.fence.clone());
        slot.fences.push(submission.fence.clone());
        slot.readbacks.append(&mut readbacks);
        slot.semaphores.extend(batch.signals.iter().copied());

        self.stats
            .record_batch(batch.queue_index, submission.command_lists.len(), &work);
        dump.waits = submission.wait_semaphores.iter().map(|(s, _)| *s).collect();
        dump.signals = submission.signal_semaphores.clone();
        self.dump.batches.push(dump);

        queue.submitted.push_back(InFlight {
            order: batch.expected_order,
            fence: submission.fence,
            command_lists: submission.command_lists,
        });
        Ok(())
    }

    /// Retires every submission whose fence has signaled.
    pub(crate) fn poll_completed(&mut self) {
        for queue in &mut self.queues {
            queue.poll();
        }
    }

    /// Blocks until the oldest unfinished submission on the queue completes.
    ///
    /// On timeout nothing is retired.
    pub(crate) fn wait_queue(&mut self, queue_type: QueueType, timeout: Duration) -> GraphResult<()> {
        let index = self.queue_index(queue_type);
        let oldest = self.queues[index]
            .submitted
            .iter()
            .find(|f| !f.fence.is_signaled())
            .map(|f| f.fence.clone());
        if let Some(fence) = oldest {
            self.device.wait_fences(&[fence], timeout)?;
        }
        self.queues[index].poll();
        Ok(())
    }

    /// Blocks until every submission on every queue has completed.
    pub(crate) fn wait_idle(&mut self, timeout: Duration) -> GraphResult<()> {
        let fences: Vec<Fence> = self
            .queues
            .iter()
            .flat_map(|q| q.submitted.iter().map(|f| f.fence.clone()))
            .collect();
        if !fences.is_empty() {
            self.device.wait_fences(&fences, timeout)?;
        }
        self.poll_completed();
        Ok(())
    }

    /// Statistics and dump of the frame whose table is `table`.
    ///
    /// Batches still pending are dropped.
    pub(crate) fn take_frame_results(
        &mut self,
        table: &SubmissionTable,
    ) -> (FrameStatistics, FrameDump) {
        for queue in &mut self.queues {
            for batch in queue.pending.drain(..) {
                let dropped = table.batch(batch);
                log::warn!("Dropping {} '{}': never submitted", dropped.desc.id, dropped.desc.name);
                queue.last_submitted = queue.last_submitted.max(dropped.expected_order);
                self.free_semaphores.extend(dropped.signals.iter().copied());
            }
        }
        self.stats.finish(table.skipped_sub_batches());
        (
            std::mem::take(&mut self.stats),
            std::mem::take(&mut self.dump),
        )
    }
}
