//! Worker thread handles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::scheduler::BatchHandle;

use super::command_buffer::{CommandBuffer, CommandBufferDesc};
use super::{FrameGraph, FrameGraphState};

slotmap::new_key_type! {
    /// Key of a worker in the frame graph's registry.
    pub struct ThreadKey;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadDesc {
    pub name: String,
}

impl ThreadDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Registry entry shared between the frame graph and one worker handle.
#[derive(Debug)]
pub(crate) struct ThreadRecord {
    name: String,
    alive: AtomicBool,
    /// Frame the worker was last synchronized onto.
    frame_index: AtomicU64,
}

impl ThreadRecord {
    pub(crate) fn new(name: String, frame_index: u64) -> Self {
        Self {
            name,
            alive: AtomicBool::new(true),
            frame_index: AtomicU64::new(frame_index),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn sync(&self, frame_index: u64) {
        self.frame_index.store(frame_index, Ordering::Release);
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// A worker recording command buffers for the frame graph.
///
/// Any number of workers may record concurrently. Each one is synchronized
/// onto the new frame at `begin_frame`; the frame graph cannot be
/// deinitialized while a handle is alive.
#[derive(Debug)]
pub struct FrameGraphThread {
    graph: Arc<FrameGraph>,
    key: ThreadKey,
    record: Arc<ThreadRecord>,
}

impl FrameGraphThread {
    pub(crate) fn new(graph: Arc<FrameGraph>, key: ThreadKey, record: Arc<ThreadRecord>) -> Self {
        Self { graph, key, record }
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn key(&self) -> ThreadKey {
        self.key
    }

    /// Frame this worker records for.
    pub fn frame_index(&self) -> u64 {
        self.record.frame_index.load(Ordering::Acquire)
    }

    pub fn graph(&self) -> &Arc<FrameGraph> {
        &self.graph
    }

    /// Starts recording sub-batch `desc.index` of batch `desc.batch`.
    ///
    /// Every handle in `depends_on` must belong to this frame and to a batch
    /// that runs before the new command buffer's batch.
    pub fn begin(
        &self,
        desc: CommandBufferDesc,
        depends_on: &[BatchHandle],
    ) -> GraphResult<CommandBuffer> {
        self.graph.expect_state(FrameGraphState::RunThreads)?;
        let frame = self.graph.frame.read();
        let table = &frame.table;
        let batch = table.ensure_free(desc.batch, desc.index)?;

        for handle in depends_on {
            if handle.frame_index() != table.frame_index() {
                return Err(GraphError::InvalidDescriptor(format!(
                    "{} belongs to frame {}, not {}",
                    handle.batch(),
                    handle.frame_index(),
                    table.frame_index()
                )));
            }
            let producer = table.index_of(handle.batch())?;
            if !table.is_ordered_after(batch, producer) {
                return Err(GraphError::InvalidDescriptor(format!(
                    "{} is not ordered after {}",
                    desc.batch,
                    handle.batch()
                )));
            }
        }

        let queue = table.batch(batch).desc.queue;
        log::trace!(
            "Thread '{}' begins '{}' ({} / {})",
            self.name(),
            desc.name,
            desc.batch,
            desc.index
        );
        Ok(CommandBuffer::new(
            self.graph.clone(),
            desc,
            self.graph.route(queue).clone(),
            table.frame_index(),
        ))
    }
}

impl Drop for FrameGraphThread {
    fn drop(&mut self) {
        self.record.alive.store(false, Ordering::Release);
    }
}
