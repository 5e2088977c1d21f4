//! The frame graph instance.
//!
//! [`FrameGraph`] ties the pieces together: it owns the device, the
//! resources, the queue scheduler and the ring of frames in flight, and
//! drives them through a small lifecycle state machine.
//!
//! ```text
//! Initial ──initialize──► Idle ──begin_frame──► RunThreads ──end_frame──► Idle
//!                           │
//!                           └──deinitialize──► Destroyed
//! ```
//!
//! `Initialization`, `Begin`, `End` and `Destroying` are transient states
//! held while the corresponding call runs. A call made in the wrong state
//! fails with [`GraphError::InvalidState`] and changes nothing.
//!
//! # Locking
//!
//! | Lock | Taken by |
//! |------|----------|
//! | `frame` (read) | Recording, `submit_batch`, `skip_batch`, queries |
//! | `frame` (write) | `begin_frame`, `end_frame` |
//! | `structural` | Scheduler and frame ring access |
//! | `resources` | Resource creation and recording |
//!
//! Locks are always taken in that order. Readback callbacks run after every
//! lock is released.

mod command_buffer;
mod thread;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, RwLock};
use slotmap::SlotMap;

pub use command_buffer::{CommandBuffer, CommandBufferDesc};
pub use thread::{FrameGraphThread, ThreadDesc, ThreadKey};

use crate::config::FrameGraphConfig;
use crate::debug::{write_graphviz, write_text, FrameDump};
use crate::device::GpuDevice;
use crate::error::{GraphError, GraphResult};
use crate::pipeline::{FrameRing, Recycled};
use crate::resources::{BufferId, ImageId, NativeResource, ResourceManager};
use crate::scheduler::{
    BatchHandle, BatchId, CommandPool, ExternalCmdBatch, Fence, QueueScheduler, SubmissionGraphDesc,
    SubmissionTable,
};
use crate::stats::FrameStatistics;
use crate::types::{BufferDesc, ImageDesc, QueueFamily, QueueType};

use thread::ThreadRecord;

/// Lifecycle state of a [`FrameGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameGraphState {
    Initial = 0,
    Initialization = 1,
    Idle = 2,
    Begin = 3,
    RunThreads = 4,
    End = 5,
    Destroying = 6,
    Destroyed = 7,
}

impl FrameGraphState {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Initialization,
            2 => Self::Idle,
            3 => Self::Begin,
            4 => Self::RunThreads,
            5 => Self::End,
            6 => Self::Destroying,
            _ => Self::Destroyed,
        }
    }
}

/// Where work for one [`QueueType`] is recorded and submitted.
#[derive(Debug, Clone)]
pub(crate) struct QueueRoute {
    /// The queue that actually runs the work.
    pub queue_type: QueueType,
    pub family: QueueFamily,
    pub pool: CommandPool,
}

/// State swapped at frame boundaries.
#[derive(Debug, Default)]
pub(crate) struct FrameData {
    pub table: SubmissionTable,
    /// Results of the most recently completed frame.
    pub stats: FrameStatistics,
    pub dump: FrameDump,
}

#[derive(Debug)]
struct Structural {
    scheduler: QueueScheduler,
    /// Set by `initialize`.
    ring: Option<FrameRing>,
    threads: SlotMap<ThreadKey, Arc<ThreadRecord>>,
}

/// The frame ring, which exists from `initialize` on.
fn ring_of(ring: &mut Option<FrameRing>) -> GraphResult<&mut FrameRing> {
    ring.as_mut().ok_or(GraphError::InvalidState {
        expected: FrameGraphState::Idle,
        actual: FrameGraphState::Initial,
    })
}

impl Structural {
    fn prune_threads(&mut self) -> usize {
        self.threads.retain(|_, t| {
            if !t.is_alive() {
                log::trace!("Worker '{}' released", t.name());
            }
            t.is_alive()
        });
        self.threads.len()
    }
}

/// Multi-queue frame graph.
///
/// # Thread Safety
///
/// `FrameGraph` is `Send + Sync`. Worker threads record through
/// [`FrameGraphThread`] handles that share one `Arc<FrameGraph>`.
///
/// # Example
///
/// ```ignore
/// let graph = FrameGraph::new(device, FrameGraphConfig::default())?;
/// graph.initialize(2)?;
/// let worker = graph.create_thread(ThreadDesc::new("main"))?;
///
/// graph.begin_frame(&SubmissionGraphDesc::new()
///     .with_batch(BatchDesc::new(0, "main", QueueType::Graphics)))?;
/// let mut cmd = worker.begin(CommandBufferDesc::new("frame", 0, 0), &[])?;
/// cmd.add_task(TaskDesc::update_buffer(buffer, 0, data), &[])?;
/// let handle = cmd.execute()?;
/// graph.end_frame()?;
/// graph.wait(&[handle], Duration::from_secs(1))?;
/// ```
pub struct FrameGraph {
    device: Arc<dyn GpuDevice>,
    config: FrameGraphConfig,
    state: AtomicU32,
    routes: [QueueRoute; 3],
    frame: RwLock<FrameData>,
    structural: ReentrantMutex<RefCell<Structural>>,
    resources: RwLock<ResourceManager>,
}

impl FrameGraph {
    /// Create a frame graph on `device`.
    ///
    /// # Errors
    ///
    /// Fails if the device has no graphics queue.
    pub fn new(device: Arc<dyn GpuDevice>, config: FrameGraphConfig) -> GraphResult<Arc<Self>> {
        log::info!("Creating FrameGraph on '{}'", device.name());
        let scheduler = QueueScheduler::new(device.clone(), config.queue_usage)?;
        let route = |queue_type| QueueRoute {
            queue_type: scheduler.resolved_type(queue_type),
            family: scheduler.queue_family(queue_type),
            pool: scheduler.command_pool(queue_type),
        };
        let routes = QueueType::ALL.map(route);

        Ok(Arc::new(Self {
            device,
            config,
            state: AtomicU32::new(FrameGraphState::Initial as u32),
            routes,
            frame: RwLock::new(FrameData::default()),
            structural: ReentrantMutex::new(RefCell::new(Structural {
                scheduler,
                ring: None,
                threads: SlotMap::with_key(),
            })),
            resources: RwLock::new(ResourceManager::new()),
        }))
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn state(&self) -> FrameGraphState {
        FrameGraphState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Queue type that runs work requested for `queue_type`.
    pub fn resolved_queue(&self, queue_type: QueueType) -> QueueType {
        self.route(queue_type).queue_type
    }

    pub(crate) fn route(&self, queue_type: QueueType) -> &QueueRoute {
        &self.routes[queue_type as usize]
    }

    fn set_state(&self, state: FrameGraphState) {
        self.state.store(state as u32, Ordering::Release);
    }

    fn transition(&self, from: FrameGraphState, to: FrameGraphState) -> GraphResult<()> {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                let actual = FrameGraphState::from_u32(actual);
                log::error!("FrameGraph: cannot go from {from:?} to {to:?} while {actual:?}");
                GraphError::InvalidState {
                    expected: from,
                    actual,
                }
            })
    }

    pub(crate) fn expect_state(&self, expected: FrameGraphState) -> GraphResult<()> {
        let actual = self.state();
        if actual != expected {
            log::error!("FrameGraph: expected {expected:?}, found {actual:?}");
            return Err(GraphError::InvalidState { expected, actual });
        }
        Ok(())
    }

    /// Succeeds between `initialize` and `deinitialize`.
    fn expect_initialized(&self) -> GraphResult<()> {
        match self.state() {
            FrameGraphState::Idle
            | FrameGraphState::Begin
            | FrameGraphState::RunThreads
            | FrameGraphState::End => Ok(()),
            actual => {
                log::error!("FrameGraph: not initialized ({actual:?})");
                Err(GraphError::InvalidState {
                    expected: FrameGraphState::Idle,
                    actual,
                })
            }
        }
    }

    fn with_structural<R>(&self, f: impl FnOnce(&mut Structural) -> R) -> R {
        let guard = self.structural.lock();
        let mut structural = guard.borrow_mut();
        f(&mut structural)
    }

    /// Allocate the ring of `ring_buffer_size` frame slots.
    pub fn initialize(&self, ring_buffer_size: usize) -> GraphResult<()> {
        self.transition(FrameGraphState::Initial, FrameGraphState::Initialization)?;
        match FrameRing::new(ring_buffer_size) {
            Ok(ring) => {
                self.with_structural(|s| s.ring = Some(ring));
                self.set_state(FrameGraphState::Idle);
                log::info!("FrameGraph initialized with {ring_buffer_size} frame(s) in flight");
                Ok(())
            }
            Err(e) => {
                self.set_state(FrameGraphState::Initial);
                Err(e)
            }
        }
    }

    /// Wait for every frame in flight, release all resources and destroy the
    /// frame graph.
    ///
    /// Fails with [`GraphError::ThreadsAlive`] while any [`FrameGraphThread`]
    /// exists.
    pub fn deinitialize(&self) -> GraphResult<()> {
        self.transition(FrameGraphState::Idle, FrameGraphState::Destroying)?;

        let alive = self.with_structural(Structural::prune_threads);
        if alive > 0 {
            log::error!("FrameGraph: cannot deinitialize, {alive} worker thread(s) alive");
            self.set_state(FrameGraphState::Idle);
            return Err(GraphError::ThreadsAlive(alive));
        }

        let recycled = match self.drain_frames() {
            Ok(recycled) => recycled,
            Err(e) => {
                self.set_state(FrameGraphState::Idle);
                return Err(e);
            }
        };
        recycled.complete_readbacks(self.device.as_ref());

        for resource in self.resources.write().drain() {
            resource.destroy(self.device.as_ref());
        }
        self.set_state(FrameGraphState::Destroyed);
        log::info!("FrameGraph destroyed");
        Ok(())
    }

    /// Waits for the device and empties every frame slot.
    fn drain_frames(&self) -> GraphResult<Recycled> {
        self.with_structural(|s| {
            s.scheduler.wait_idle(self.config.fence_timeout)?;
            let ring = ring_of(&mut s.ring)?;
            let fences = ring.fences();
            if !fences.is_empty() {
                self.device.wait_fences(&fences, self.config.fence_timeout)?;
            }
            let mut recycled = ring.recycle_ready();
            s.scheduler.release_semaphores(recycled.semaphores.drain(..));
            recycled.destroy_released(self.device.as_ref());
            Ok(recycled)
        })
    }

    /// Register a worker thread.
    pub fn create_thread(self: &Arc<Self>, desc: ThreadDesc) -> GraphResult<FrameGraphThread> {
        let state = self.state();
        if !matches!(state, FrameGraphState::Idle | FrameGraphState::RunThreads) {
            log::error!("FrameGraph: cannot create a thread while {state:?}");
            return Err(GraphError::InvalidState {
                expected: FrameGraphState::Idle,
                actual: state,
            });
        }
        let frame_index = self.frame.read().table.frame_index();
        let record = Arc::new(ThreadRecord::new(desc.name, frame_index));
        let key = self.with_structural(|s| s.threads.insert(record.clone()));
        log::trace!("Worker '{}' registered", record.name());
        Ok(FrameGraphThread::new(self.clone(), key, record))
    }

    /// Number of live worker handles.
    pub fn thread_count(&self) -> usize {
        self.with_structural(Structural::prune_threads)
    }

    /// Start a frame, waiting up to the configured fence timeout for its slot.
    pub fn begin_frame(&self, desc: &SubmissionGraphDesc) -> GraphResult<()> {
        self.begin_frame_timeout(desc, self.config.fence_timeout)
    }

    /// Start a frame with the batches in `desc`.
    ///
    /// Waits for the slot's previous frame, recycles it and runs its readback
    /// callbacks. On failure the frame graph stays `Idle` and the slot is
    /// left untouched.
    pub fn begin_frame_timeout(
        &self,
        desc: &SubmissionGraphDesc,
        timeout: Duration,
    ) -> GraphResult<()> {
        self.transition(FrameGraphState::Idle, FrameGraphState::Begin)?;
        match self.begin_frame_locked(desc, timeout) {
            Ok(recycled) => {
                self.set_state(FrameGraphState::RunThreads);
                recycled.complete_readbacks(self.device.as_ref());
                Ok(())
            }
            Err(e) => {
                self.set_state(FrameGraphState::Idle);
                Err(e)
            }
        }
    }

    fn begin_frame_locked(
        &self,
        desc: &SubmissionGraphDesc,
        timeout: Duration,
    ) -> GraphResult<Recycled> {
        let mut frame = self.frame.write();
        self.with_structural(|s| {
            let ring = ring_of(&mut s.ring)?;
            ring.wait_current(self.device.as_ref(), timeout)?;
            let frame_index = ring.frame_count() + 1;
            let table = s.scheduler.prepare_frame(desc, frame_index)?;

            let ring = ring_of(&mut s.ring)?;
            let slot = (ring.current_index(), ring.size());
            let (started, mut recycled) = ring.begin();
            debug_assert_eq!(started, frame_index);
            s.scheduler.poll_completed();
            s.scheduler.release_semaphores(recycled.semaphores.drain(..));
            recycled.destroy_released(self.device.as_ref());

            s.prune_threads();
            for thread in s.threads.values() {
                thread.sync(frame_index);
            }
            log::trace!(
                "Frame {frame_index} in slot {}/{}: {} batch(es), {} sub-batch(es)",
                slot.0,
                slot.1,
                desc.batches.len(),
                table.pending_sub_batches()
            );
            frame.table = table;
            Ok(recycled)
        })
    }

    /// Finish the frame: submit everything still pending and gather
    /// statistics.
    ///
    /// Fails with [`GraphError::IncompleteFrame`] if a declared sub-batch was
    /// neither executed nor skipped; the frame then keeps running.
    pub fn end_frame(&self) -> GraphResult<()> {
        self.transition(FrameGraphState::RunThreads, FrameGraphState::End)?;
        let mut frame = self.frame.write();
        let pending = frame.table.pending_sub_batches();
        if pending > 0 {
            log::warn!("FrameGraph: end_frame with {pending} sub-batch(es) outstanding");
            self.set_state(FrameGraphState::RunThreads);
            return Err(GraphError::IncompleteFrame { pending });
        }

        let FrameData { table, stats, dump } = &mut *frame;
        let result = self.with_structural(|s| {
            let ring = ring_of(&mut s.ring)?;
            let flushed = loop {
                match s.scheduler.flush(table, ring.current_mut(), self.config.flush_max_iterations) {
                    Ok(0) => break Ok(()),
                    Ok(_) => continue,
                    Err(e) => break Err(e),
                }
            };
            if flushed.is_ok() && s.scheduler.pending_batches() > 0 {
                log::error!(
                    "FrameGraph: {} batch(es) could not be submitted",
                    s.scheduler.pending_batches()
                );
            }
            (*stats, *dump) = s.scheduler.take_frame_results(table);
            ring.end();
            flushed
        });
        drop(frame);
        self.set_state(FrameGraphState::Idle);
        result
    }

    /// Submit every settled batch whose dependencies are on the device.
    pub fn flush(&self) -> GraphResult<()> {
        self.expect_state(FrameGraphState::RunThreads)?;
        let frame = self.frame.read();
        self.with_structural(|s| {
            let max = self.config.flush_max_iterations;
            let ring = ring_of(&mut s.ring)?;
            s.scheduler.flush(&frame.table, ring.current_mut(), max)?;
            Ok(())
        })
    }

    /// Flushes unless another thread holds the scheduler.
    pub(crate) fn try_flush(&self, table: &SubmissionTable) {
        let Some(guard) = self.structural.try_lock() else {
            return;
        };
        let Ok(mut s) = guard.try_borrow_mut() else {
            return;
        };
        let max = self.config.flush_max_iterations;
        let s = &mut *s;
        if let Some(ring) = s.ring.as_mut() {
            if let Err(e) = s.scheduler.flush(table, ring.current_mut(), max) {
                log::error!("FrameGraph: flush failed: {e}");
            }
        }
    }

    /// Hand application-recorded work to sub-batch `index` of `batch`.
    pub fn submit_batch(
        &self,
        batch: BatchId,
        index: u32,
        work: ExternalCmdBatch,
    ) -> GraphResult<BatchHandle> {
        self.expect_state(FrameGraphState::RunThreads)?;
        let frame = self.frame.read();
        let handle = frame.table.submit(batch, index, work.into())?;
        self.try_flush(&frame.table);
        Ok(handle)
    }

    /// Mark sub-batch `index` of `batch` as having no work this frame.
    pub fn skip_batch(&self, batch: BatchId, index: u32) -> GraphResult<()> {
        self.expect_state(FrameGraphState::RunThreads)?;
        let frame = self.frame.read();
        frame.table.skip(batch, index)?;
        self.try_flush(&frame.table);
        Ok(())
    }

    /// True once every sub-batch of the current frame was submitted or skipped.
    pub fn is_all_batches_submitted(&self) -> bool {
        self.frame.read().table.is_all_batches_submitted()
    }

    /// Block until the batches behind `handles` have completed.
    ///
    /// Fails with [`GraphError::NotSubmitted`] if a batch is not on the
    /// device yet.
    pub fn wait(&self, handles: &[BatchHandle], timeout: Duration) -> GraphResult<()> {
        let fences = handles
            .iter()
            .map(|h| h.fence().cloned().ok_or(GraphError::NotSubmitted(h.batch().0)))
            .collect::<GraphResult<Vec<Fence>>>()?;
        self.device.wait_fences(&fences, timeout)
    }

    /// Block until the oldest unfinished submission on `queue` completes.
    pub fn wait_queue(&self, queue: QueueType, timeout: Duration) -> GraphResult<()> {
        self.expect_initialized()?;
        self.with_structural(|s| s.scheduler.wait_queue(queue, timeout))
    }

    /// Block until the device is idle, then recycle every frame slot.
    ///
    /// Runs the pending readback callbacks.
    pub fn wait_idle(&self) -> GraphResult<()> {
        self.expect_state(FrameGraphState::Idle)?;
        let recycled = self.drain_frames()?;
        recycled.complete_readbacks(self.device.as_ref());
        Ok(())
    }

    /// Statistics of the most recently completed frame.
    pub fn statistics(&self) -> FrameStatistics {
        self.frame.read().stats.clone()
    }

    /// Text listing of the most recently completed frame.
    pub fn dump_to_string(&self) -> String {
        write_text(&self.frame.read().dump, self.config.debug_flags)
    }

    /// GraphViz (DOT) description of the most recently completed frame.
    pub fn dump_to_graphviz(&self) -> String {
        write_graphviz(&self.frame.read().dump, self.config.debug_flags)
    }

    /// Create a buffer. Exclusively owned buffers may only be used on queues
    /// of their owner's family.
    pub fn create_buffer(&self, desc: BufferDesc) -> GraphResult<BufferId> {
        self.expect_initialized()?;
        let owner = desc.owner.map(|q| self.route(q).family);
        self.resources
            .write()
            .create_buffer(self.device.as_ref(), desc, owner)
    }

    pub fn create_image(&self, desc: ImageDesc) -> GraphResult<ImageId> {
        self.expect_initialized()?;
        let owner = desc.owner.map(|q| self.route(q).family);
        self.resources
            .write()
            .create_image(self.device.as_ref(), desc, owner)
    }

    /// Release a buffer once every frame that could use it has finished.
    pub fn release_buffer(&self, id: BufferId) -> GraphResult<()> {
        self.expect_initialized()?;
        let entry = self
            .resources
            .write()
            .remove_buffer(id)
            .ok_or_else(|| GraphError::InvalidDescriptor(format!("unknown buffer {id:?}")))?;
        self.retire(NativeResource::Buffer(entry.native))
    }

    pub fn release_image(&self, id: ImageId) -> GraphResult<()> {
        self.expect_initialized()?;
        let entry = self
            .resources
            .write()
            .remove_image(id)
            .ok_or_else(|| GraphError::InvalidDescriptor(format!("unknown image {id:?}")))?;
        self.retire(NativeResource::Image(entry.native))
    }

    /// Parks a native resource in the slot of the newest frame that may use it.
    fn retire(&self, resource: NativeResource) -> GraphResult<()> {
        let in_frame = self.state() != FrameGraphState::Idle;
        self.with_structural(|s| {
            let ring = ring_of(&mut s.ring)?;
            if ring.frame_count() == 0 {
                resource.destroy(self.device.as_ref());
            } else if in_frame {
                ring.current_mut().released.push(resource);
            } else {
                ring.previous_mut().released.push(resource);
            }
            Ok(())
        })
    }

    pub fn buffer_desc(&self, id: BufferId) -> Option<BufferDesc> {
        self.resources.read().buffer(id).map(|e| e.desc.clone())
    }

    pub fn image_desc(&self, id: ImageId) -> Option<ImageDesc> {
        self.resources.read().image(id).map(|e| e.desc.clone())
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("device", &self.device.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        if self.state() == FrameGraphState::Idle {
            if let Err(e) = self.deinitialize() {
                log::error!("FrameGraph: deinitialize on drop failed: {e}");
            }
        }
    }
}

static_assertions::assert_impl_all!(FrameGraph: Send, Sync);
