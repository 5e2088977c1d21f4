//! Command buffer recording.

use std::sync::Arc;

use crate::compiler::{record, CompileStats, RecordContext, Recording};
use crate::debug::{DebugContext, DebugFlags, DumpSubBatch};
use crate::device::CommandList;
use crate::error::{GraphError, GraphResult};
use crate::graph::{
    DrawTask, LogicalRenderPass, RenderPassDesc, RenderPassHandle, TaskDesc, TaskGraph, TaskHandle,
    TaskKind,
};
use crate::resources::{BufferId, ResourceManager};
use crate::scheduler::{BatchHandle, BatchId, SubBatchPayload};
use crate::tracker::Barrier;
use crate::types::{QueueType, Rect};

use super::{FrameGraph, FrameGraphState, QueueRoute};

/// Descriptor for [`FrameGraphThread::begin`](super::FrameGraphThread::begin).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBufferDesc {
    pub name: String,
    /// Batch this command buffer belongs to.
    pub batch: BatchId,
    /// Sub-batch of `batch` it fills.
    pub index: u32,
    /// Overrides the frame graph's debug flags for this command buffer.
    pub debug_flags: Option<DebugFlags>,
}

impl CommandBufferDesc {
    pub fn new(name: impl Into<String>, batch: u32, index: u32) -> Self {
        Self {
            name: name.into(),
            batch: BatchId(batch),
            index,
            debug_flags: None,
        }
    }

    pub fn with_debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug_flags = Some(flags);
        self
    }
}

#[derive(Debug)]
struct Compiled {
    list: CommandList,
    recording: Recording,
}

/// One sub-batch of work, recorded by one worker thread.
///
/// Tasks are added with their dependencies, then [`compile`](Self::compile)
/// orders them and records native commands with barriers. [`execute`]
/// hands the result to the frame's submission table. A command buffer that
/// is dropped without being executed or skipped leaves its sub-batch open,
/// and `end_frame` will report the frame as incomplete.
///
/// [`execute`]: Self::execute
pub struct CommandBuffer {
    graph: Arc<FrameGraph>,
    desc: CommandBufferDesc,
    route: QueueRoute,
    frame_index: u64,
    debug: DebugContext,
    tasks: TaskGraph,
    passes: Vec<LogicalRenderPass>,
    compiled: Option<Compiled>,
    finished: bool,
}

impl CommandBuffer {
    pub(crate) fn new(
        graph: Arc<FrameGraph>,
        desc: CommandBufferDesc,
        route: QueueRoute,
        frame_index: u64,
    ) -> Self {
        let debug = DebugContext::new(desc.debug_flags.unwrap_or(graph.config().debug_flags));
        Self {
            graph,
            desc,
            route,
            frame_index,
            debug,
            tasks: TaskGraph::new(),
            passes: Vec::new(),
            compiled: None,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn batch(&self) -> BatchId {
        self.desc.batch
    }

    /// Queue the recorded work will run on.
    pub fn queue(&self) -> QueueType {
        self.route.queue_type
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn ensure_open(&self) -> GraphResult<()> {
        if self.finished {
            log::error!("Command buffer '{}' used after execute", self.desc.name);
            return Err(GraphError::AlreadySubmitted {
                batch: self.desc.batch.0,
                index: self.desc.index,
            });
        }
        Ok(())
    }

    /// Throws away the recorded commands; the next compile records again.
    fn invalidate(&mut self) {
        let Some(compiled) = self.compiled.take() else {
            return;
        };
        for readback in compiled.recording.readbacks {
            let (task, callback) = readback.cancel(self.graph.device().as_ref());
            self.tasks.restore_readback(task, callback);
        }
        self.route.pool.lock().recycle(compiled.list);
    }

    /// Add a task that runs after every task in `dependencies`.
    pub fn add_task(
        &mut self,
        desc: TaskDesc,
        dependencies: &[TaskHandle],
    ) -> GraphResult<TaskHandle> {
        self.ensure_open()?;
        validate_task(&desc, &self.passes, &self.graph.resources.read())?;
        let handle = self.tasks.add_task(desc, dependencies)?;
        self.invalidate();
        Ok(handle)
    }

    /// Make `dependent` run after `dependency`.
    pub fn add_dependency(
        &mut self,
        dependent: TaskHandle,
        dependency: TaskHandle,
    ) -> GraphResult<()> {
        self.ensure_open()?;
        self.tasks.add_dependency(dependent, dependency)?;
        self.invalidate();
        Ok(())
    }

    /// Register a render pass. It runs when a
    /// [`TaskDesc::submit_render_pass`] task for it is added.
    pub fn create_render_pass(&mut self, desc: RenderPassDesc) -> GraphResult<RenderPassHandle> {
        self.ensure_open()?;
        let area = {
            let resources = self.graph.resources.read();
            let mut extent = None;
            for image in desc.attachments() {
                let entry = resources.expect_image(image)?;
                let (width, height) = (entry.desc.width, entry.desc.height);
                match extent {
                    None => extent = Some((width, height)),
                    Some(first) if first != (width, height) => {
                        return Err(GraphError::InvalidDescriptor(format!(
                            "render pass '{}' mixes attachment sizes",
                            desc.name
                        )));
                    }
                    Some(_) => {}
                }
            }
            let Some((width, height)) = extent else {
                return Err(GraphError::InvalidDescriptor(format!(
                    "render pass '{}' has no attachments",
                    desc.name
                )));
            };
            let area = desc.area.unwrap_or(Rect::new(0, 0, width, height));
            if !area.fits(width, height) {
                return Err(GraphError::InvalidDescriptor(format!(
                    "render area of '{}' exceeds its attachments",
                    desc.name
                )));
            }
            area
        };
        self.passes.push(LogicalRenderPass::new(desc, area));
        Ok(RenderPassHandle(self.passes.len() as u32 - 1))
    }

    /// Attach a draw to a render pass created on this command buffer.
    pub fn add_draw_task(&mut self, pass: RenderPassHandle, draw: DrawTask) -> GraphResult<()> {
        self.ensure_open()?;
        {
            let resources = self.graph.resources.read();
            for buffer in draw.buffers() {
                resources.expect_buffer(buffer)?;
            }
            for &(image, _) in &draw.sampled_images {
                resources.expect_image(image)?;
            }
        }
        let Some(logical) = self.passes.get_mut(pass.index()) else {
            return Err(GraphError::InvalidDescriptor(format!(
                "unknown render pass {pass:?}"
            )));
        };
        logical.push_draw(draw);
        self.invalidate();
        Ok(())
    }

    /// Order the tasks and record native commands.
    ///
    /// Compiling again without changes returns the previous result.
    pub fn compile(&mut self) -> GraphResult<CompileStats> {
        self.ensure_open()?;
        self.tasks.compile()?;
        if let Some(compiled) = &self.compiled {
            return Ok(compiled.recording.stats);
        }

        let mut list = self.route.pool.lock().acquire();
        let result = {
            let resources = self.graph.resources.read();
            record(
                RecordContext {
                    graph: &mut self.tasks,
                    passes: &self.passes,
                    resources: &resources,
                    device: self.graph.device().as_ref(),
                    debug: &self.debug,
                    family: self.route.family,
                },
                &mut list,
            )
        };
        match result {
            Ok(recording) => {
                log::trace!(
                    "Compiled '{}': {} task(s), {} barrier(s)",
                    self.desc.name,
                    recording.stats.tasks,
                    recording.stats.barriers
                );
                let stats = recording.stats;
                self.compiled = Some(Compiled { list, recording });
                Ok(stats)
            }
            Err(e) => {
                self.route.pool.lock().recycle(list);
                Err(e)
            }
        }
    }

    /// Tasks in execution order.
    pub fn execution_order(&self) -> GraphResult<&[TaskHandle]> {
        self.tasks.execution_order()
    }

    /// Barriers of the last compile.
    pub fn barriers(&self) -> GraphResult<&[Barrier]> {
        self.compiled
            .as_ref()
            .map(|c| c.recording.barriers.as_slice())
            .ok_or(GraphError::NotCompiled)
    }

    /// Recorded native commands of the last compile.
    pub fn commands(&self) -> GraphResult<&CommandList> {
        self.compiled
            .as_ref()
            .map(|c| &c.list)
            .ok_or(GraphError::NotCompiled)
    }

    /// Compile if needed and hand the work to the frame.
    ///
    /// The batch is submitted to the device as soon as all of its
    /// sub-batches are in and its dependencies have been submitted.
    pub fn execute(&mut self) -> GraphResult<BatchHandle> {
        self.ensure_open()?;
        self.compile()?;
        self.graph.expect_state(FrameGraphState::RunThreads)?;

        let frame = self.graph.frame.read();
        self.check_frame(frame.table.frame_index())?;
        frame.table.ensure_free(self.desc.batch, self.desc.index)?;

        let Some(compiled) = self.compiled.take() else {
            return Err(GraphError::NotCompiled);
        };
        let dump = DumpSubBatch::capture(
            self.desc.index,
            &self.desc.name,
            &self.tasks,
            &self.passes,
            &compiled.recording.barriers,
            &self.graph.resources.read(),
            &self.debug,
        );
        let payload = SubBatchPayload {
            command_lists: vec![compiled.list],
            readbacks: compiled.recording.readbacks,
            dump: Some(dump),
            stats: compiled.recording.stats,
            ..SubBatchPayload::default()
        };
        let handle = frame.table.submit(self.desc.batch, self.desc.index, payload)?;
        self.finished = true;
        self.graph.try_flush(&frame.table);
        Ok(handle)
    }

    /// Give up the sub-batch; it is submitted without work.
    pub fn skip(&mut self) -> GraphResult<()> {
        self.ensure_open()?;
        self.graph.expect_state(FrameGraphState::RunThreads)?;
        let frame = self.graph.frame.read();
        self.check_frame(frame.table.frame_index())?;
        frame.table.skip(self.desc.batch, self.desc.index)?;
        self.finished = true;
        self.graph.try_flush(&frame.table);
        drop(frame);
        self.invalidate();
        Ok(())
    }

    fn check_frame(&self, current: u64) -> GraphResult<()> {
        if current != self.frame_index {
            log::error!(
                "Command buffer '{}' was recorded for frame {}, current frame is {current}",
                self.desc.name,
                self.frame_index
            );
            return Err(GraphError::InvalidDescriptor(format!(
                "command buffer '{}' belongs to frame {}",
                self.desc.name, self.frame_index
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("name", &self.desc.name)
            .field("batch", &self.desc.batch)
            .field("index", &self.desc.index)
            .field("queue", &self.route.queue_type)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "Command buffer '{}' dropped without execute or skip",
                self.desc.name
            );
        }
        self.invalidate();
    }
}

fn invalid(message: String) -> GraphError {
    GraphError::InvalidDescriptor(message)
}

fn buffer_size(resources: &ResourceManager, id: BufferId) -> GraphResult<u64> {
    Ok(resources.expect_buffer(id)?.desc.size)
}

/// Checks a task against the resources it names.
fn validate_task(
    desc: &TaskDesc,
    passes: &[LogicalRenderPass],
    resources: &ResourceManager,
) -> GraphResult<()> {
    let name = &desc.name;
    match &desc.kind {
        TaskKind::Marker => {}
        TaskKind::UpdateBuffer {
            buffer,
            offset,
            data,
        } => {
            let size = buffer_size(resources, *buffer)?;
            if data.is_empty() {
                return Err(invalid(format!("'{name}' updates no bytes")));
            }
            if offset.checked_add(data.len() as u64).map_or(true, |end| end > size) {
                return Err(invalid(format!("'{name}' writes past the end of the buffer")));
            }
        }
        TaskKind::FillBuffer { buffer, range, .. } => {
            let size = buffer_size(resources, *buffer)?;
            match range.resolve(size) {
                Some((offset, len)) if offset % 4 == 0 && len % 4 == 0 => {}
                Some(_) => return Err(invalid(format!("'{name}' fill range is not 4-byte aligned"))),
                None => return Err(invalid(format!("'{name}' fill range is out of bounds"))),
            }
        }
        TaskKind::CopyBuffer { src, dst, regions } => {
            let (src_size, dst_size) = (buffer_size(resources, *src)?, buffer_size(resources, *dst)?);
            if regions.is_empty() {
                return Err(invalid(format!("'{name}' has no copy regions")));
            }
            let inside = |offset: u64, len: u64, size: u64| {
                len > 0 && offset.checked_add(len).is_some_and(|end| end <= size)
            };
            if !regions
                .iter()
                .all(|r| inside(r.src_offset, r.size, src_size) && inside(r.dst_offset, r.size, dst_size))
            {
                return Err(invalid(format!("'{name}' copy region is out of bounds")));
            }
        }
        TaskKind::ReadBuffer {
            buffer,
            range,
            callback,
        } => {
            let size = buffer_size(resources, *buffer)?;
            if range.size == Some(0) {
                return Err(invalid(format!("'{name}' reads zero bytes")));
            }
            if range.resolve(size).is_none() {
                return Err(invalid(format!("'{name}' read range is out of bounds")));
            }
            if callback.is_none() {
                return Err(invalid(format!("'{name}' has no readback callback")));
            }
        }
        TaskKind::CopyImage { src, dst, regions } => {
            let src = &resources.expect_image(*src)?.desc;
            let dst = &resources.expect_image(*dst)?.desc;
            if regions.is_empty() {
                return Err(invalid(format!("'{name}' has no copy regions")));
            }
            let fits = |r: &crate::graph::ImageCopy| {
                r.src.fits(src.width, src.height)
                    && Rect::new(r.dst_x, r.dst_y, r.src.width, r.src.height)
                        .fits(dst.width, dst.height)
            };
            if !regions.iter().all(fits) {
                return Err(invalid(format!("'{name}' copy region is out of bounds")));
            }
        }
        TaskKind::CopyBufferToImage {
            src: buffer,
            dst: image,
            regions,
        }
        | TaskKind::CopyImageToBuffer {
            src: image,
            dst: buffer,
            regions,
        } => {
            let size = buffer_size(resources, *buffer)?;
            let image = &resources.expect_image(*image)?.desc;
            if regions.is_empty() {
                return Err(invalid(format!("'{name}' has no copy regions")));
            }
            let bpp = image.format.bytes_per_pixel() as u64;
            let fits = |r: &crate::graph::BufferImageCopy| {
                let bytes = r.image_rect.width as u64 * r.image_rect.height as u64 * bpp;
                r.image_rect.fits(image.width, image.height)
                    && r.buffer_offset.checked_add(bytes).is_some_and(|end| end <= size)
            };
            if !regions.iter().all(fits) {
                return Err(invalid(format!("'{name}' copy region is out of bounds")));
            }
        }
        TaskKind::ClearColorImage { image, .. } => {
            resources.expect_image(*image)?;
        }
        TaskKind::SubmitRenderPass { pass } => {
            if pass.index() >= passes.len() {
                return Err(invalid(format!("'{name}' submits unknown render pass {pass:?}")));
            }
        }
    }
    Ok(())
}
