//! Native command recording.

use crate::debug::DebugContext;
use crate::device::{
    AttachmentBegin, CommandList, GpuDevice, NativeBuffer, NativeBufferBarrier, NativeCommand,
    PipelineBarrier, RenderPassBegin, SubpassDependency,
};
use crate::error::{GraphError, GraphResult};
use crate::graph::{
    BufferCopy, DrawCall, ExeOrderIndex, LogicalRenderPass, ReadbackCallback, RenderPassHandle,
    TaskGraph, TaskHandle, TaskKind,
};
use crate::resources::ResourceManager;
use crate::tracker::{Barrier, BarrierBatch, ResourceTracker};
use crate::types::{AccessMask, BufferDesc, BufferUsage, PipelineStages, QueueFamily};

/// Counters gathered while recording one command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileStats {
    pub tasks: usize,
    /// Barriers synthesized by the tracker, including final transitions.
    pub barriers: usize,
    /// Native render passes after merging.
    pub render_passes: usize,
    pub subpasses: usize,
    pub draw_calls: usize,
}

impl CompileStats {
    pub(crate) fn accumulate(&mut self, other: &CompileStats) {
        self.tasks += other.tasks;
        self.barriers += other.barriers;
        self.render_passes += other.render_passes;
        self.subpasses += other.subpasses;
        self.draw_calls += other.draw_calls;
    }
}

/// A host readback waiting for its frame to finish.
pub(crate) struct PendingReadback {
    pub task: TaskHandle,
    pub name: String,
    pub staging: NativeBuffer,
    pub size: u64,
    pub callback: ReadbackCallback,
}

impl PendingReadback {
    /// Reads the staging buffer, invokes the callback and frees the staging buffer.
    pub(crate) fn complete(self, device: &dyn GpuDevice) {
        match device.read_buffer(self.staging, 0, self.size) {
            Ok(bytes) => (self.callback)(&bytes),
            Err(e) => log::error!("Readback '{}' failed: {e}", self.name),
        }
        device.destroy_buffer(self.staging);
    }

    /// Frees the staging buffer and hands the callback back.
    pub(crate) fn cancel(self, device: &dyn GpuDevice) -> (TaskHandle, ReadbackCallback) {
        device.destroy_buffer(self.staging);
        (self.task, self.callback)
    }
}

impl std::fmt::Debug for PendingReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReadback")
            .field("name", &self.name)
            .field("staging", &self.staging)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Everything recording needs to borrow.
pub(crate) struct RecordContext<'a> {
    pub graph: &'a mut TaskGraph,
    pub passes: &'a [LogicalRenderPass],
    pub resources: &'a ResourceManager,
    pub device: &'a dyn GpuDevice,
    pub debug: &'a DebugContext,
    pub family: QueueFamily,
}

#[derive(Debug, Default)]
pub(crate) struct Recording {
    pub barriers: Vec<Barrier>,
    pub readbacks: Vec<PendingReadback>,
    pub stats: CompileStats,
}

/// Records the compiled graph into `list`.
///
/// On failure every staging buffer allocated so far is freed and the
/// readback callbacks are returned to the graph.
pub(crate) fn record(mut ctx: RecordContext<'_>, list: &mut CommandList) -> GraphResult<Recording> {
    let order = ctx.graph.execution_order()?.to_vec();
    let mut recorder = Recorder {
        tracker: ResourceTracker::new(ctx.family),
        batch: BarrierBatch::new(),
        recording: Recording::default(),
    };

    match recorder.record_all(&mut ctx, &order, list) {
        Ok(()) => {
            let mut recording = recorder.recording;
            recording.barriers = recorder.tracker.into_barriers();
            recording.stats.tasks = order.len();
            recording.stats.barriers = recording.barriers.len();
            Ok(recording)
        }
        Err(e) => {
            for readback in recorder.recording.readbacks.drain(..) {
                let (task, callback) = readback.cancel(ctx.device);
                ctx.graph.restore_readback(task, callback);
            }
            list.commands.clear();
            Err(e)
        }
    }
}

struct Recorder {
    tracker: ResourceTracker,
    batch: BarrierBatch,
    recording: Recording,
}

impl Recorder {
    fn record_all(
        &mut self,
        ctx: &mut RecordContext<'_>,
        order: &[TaskHandle],
        list: &mut CommandList,
    ) -> GraphResult<()> {
        let mut position = 0;
        while position < order.len() {
            let Some(first) = render_pass_of(ctx.graph, order[position]) else {
                self.record_task(ctx, order[position], position, list)?;
                position += 1;
                continue;
            };

            let mut group = vec![pass(ctx.passes, first)?];
            let mut end = position + 1;
            while let Some(next) = order.get(end).and_then(|&h| render_pass_of(ctx.graph, h)) {
                let next = pass(ctx.passes, next)?;
                let prev = group[group.len() - 1];
                if !can_merge(prev, next) {
                    break;
                }
                group.push(next);
                end += 1;
            }
            self.record_render_pass(ctx, &order[position..end], &group, position, list)?;
            position = end;
        }

        let finals = self.tracker.finalize();
        self.flush_barriers(finals, ctx.resources, list);
        Ok(())
    }

    fn flush_barriers(
        &mut self,
        range: std::ops::Range<usize>,
        resources: &ResourceManager,
        list: &mut CommandList,
    ) {
        for barrier in &self.tracker.barriers()[range] {
            self.batch.add(barrier, resources);
        }
        if let Some(barrier) = self.batch.flush() {
            list.push(NativeCommand::Barrier(barrier));
        }
    }

    fn record_task(
        &mut self,
        ctx: &mut RecordContext<'_>,
        handle: TaskHandle,
        position: usize,
        list: &mut CommandList,
    ) -> GraphResult<()> {
        let index = ExeOrderIndex::from_position(position);
        let node = ctx
            .graph
            .task(handle)
            .ok_or(GraphError::UnknownDependency(handle.id()))?;
        let desc = node.desc();

        let usages = desc.kind.usages(ctx.passes);
        let range = self.tracker.track(index, &usages, ctx.resources)?;
        self.flush_barriers(range, ctx.resources, list);

        list.push(NativeCommand::BeginLabel {
            name: desc.name.clone(),
            color: ctx.debug.color_for(desc),
        });
        let resources = ctx.resources;
        let mut staged = None;
        match &desc.kind {
            TaskKind::Marker => {}
            TaskKind::UpdateBuffer {
                buffer,
                offset,
                data,
            } => list.push(NativeCommand::UpdateBuffer {
                buffer: resources.expect_buffer(*buffer)?.native,
                offset: *offset,
                data: data.clone(),
            }),
            TaskKind::FillBuffer {
                buffer,
                range,
                value,
            } => {
                let entry = resources.expect_buffer(*buffer)?;
                let (offset, size) = range.resolve(entry.desc.size).ok_or_else(|| {
                    GraphError::InvalidDescriptor(format!("fill range {range:?} out of bounds"))
                })?;
                list.push(NativeCommand::FillBuffer {
                    buffer: entry.native,
                    offset,
                    size,
                    value: *value,
                });
            }
            TaskKind::CopyBuffer { src, dst, regions } => list.push(NativeCommand::CopyBuffer {
                src: resources.expect_buffer(*src)?.native,
                dst: resources.expect_buffer(*dst)?.native,
                regions: regions.clone(),
            }),
            TaskKind::ReadBuffer { buffer, range, .. } => {
                let entry = resources.expect_buffer(*buffer)?;
                let (offset, size) = range.resolve(entry.desc.size).ok_or_else(|| {
                    GraphError::InvalidDescriptor(format!("readback range {range:?} out of bounds"))
                })?;
                let staging = ctx.device.create_buffer(
                    &BufferDesc::new(size, BufferUsage::MAP_READ | BufferUsage::TRANSFER_DST)
                        .with_label(format!("{} staging", desc.name)),
                )?;
                list.push(NativeCommand::CopyBuffer {
                    src: entry.native,
                    dst: staging,
                    regions: vec![BufferCopy::new(offset, 0, size)],
                });
                list.push(NativeCommand::Barrier(host_read_barrier(staging)));
                staged = Some((desc.name.clone(), staging, size));
            }
            TaskKind::CopyImage { src, dst, regions } => list.push(NativeCommand::CopyImage {
                src: resources.expect_image(*src)?.native,
                dst: resources.expect_image(*dst)?.native,
                regions: regions.clone(),
            }),
            TaskKind::CopyBufferToImage { src, dst, regions } => {
                list.push(NativeCommand::CopyBufferToImage {
                    src: resources.expect_buffer(*src)?.native,
                    dst: resources.expect_image(*dst)?.native,
                    regions: regions.clone(),
                })
            }
            TaskKind::CopyImageToBuffer { src, dst, regions } => {
                list.push(NativeCommand::CopyImageToBuffer {
                    src: resources.expect_image(*src)?.native,
                    dst: resources.expect_buffer(*dst)?.native,
                    regions: regions.clone(),
                })
            }
            TaskKind::ClearColorImage { image, color } => {
                list.push(NativeCommand::ClearColorImage {
                    image: resources.expect_image(*image)?.native,
                    color: *color,
                })
            }
            TaskKind::SubmitRenderPass { .. } => {
                unreachable!("render pass tasks are recorded as groups")
            }
        }
        list.push(NativeCommand::EndLabel);

        if let Some((name, staging, size)) = staged {
            let Some(callback) = ctx.graph.take_readback(handle) else {
                ctx.device.destroy_buffer(staging);
                return Err(GraphError::InvalidDescriptor(format!(
                    "readback '{name}' has no callback"
                )));
            };
            self.recording.readbacks.push(PendingReadback {
                task: handle,
                name,
                staging,
                size,
                callback,
            });
        }
        Ok(())
    }

    /// Records consecutive merged passes as one native pass.
    ///
    /// Barriers between subpasses become subpass dependencies; the others are
    /// issued before the pass begins.
    fn record_render_pass(
        &mut self,
        ctx: &mut RecordContext<'_>,
        tasks: &[TaskHandle],
        group: &[&LogicalRenderPass],
        first_position: usize,
        list: &mut CommandList,
    ) -> GraphResult<()> {
        let first_index = ExeOrderIndex::from_position(first_position);
        let mut dependencies = Vec::new();
        for (subpass, pass) in group.iter().enumerate() {
            let index = ExeOrderIndex::from_position(first_position + subpass);
            let range = self.tracker.track(index, &pass.usages(), ctx.resources)?;
            for barrier in &self.tracker.barriers()[range] {
                if barrier.src_index >= first_index {
                    dependencies.push(SubpassDependency {
                        src_subpass: barrier.src_index.0 - first_index.0,
                        dst_subpass: subpass as u32,
                        src_stages: barrier.src_stages,
                        dst_stages: barrier.dst_stages,
                        src_access: barrier.src_access,
                        dst_access: barrier.dst_access,
                    });
                } else {
                    self.batch.add(barrier, ctx.resources);
                }
            }
        }
        if let Some(barrier) = self.batch.flush() {
            list.push(NativeCommand::Barrier(barrier));
        }

        let first = group[0];
        let name = group
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(" + ");
        let color = ctx
            .graph
            .task(tasks[0])
            .map(|t| ctx.debug.color_for(t.desc()))
            .unwrap_or(ctx.debug.palette.render_pass);
        list.push(NativeCommand::BeginLabel { name, color });

        let resources = ctx.resources;
        let color = first
            .desc()
            .color_targets
            .iter()
            .map(|t| {
                Ok(AttachmentBegin {
                    image: resources.expect_image(t.image)?.native,
                    load: t.load,
                    store: t.store,
                    clear: t.clear,
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;
        let depth = match first.desc().depth_target {
            Some(t) => Some(AttachmentBegin {
                image: resources.expect_image(t.image)?.native,
                load: t.load,
                store: t.store,
                clear: [t.clear_depth, 0.0, 0.0, 0.0],
            }),
            None => None,
        };
        list.push(NativeCommand::BeginRenderPass(RenderPassBegin {
            area: first.area(),
            color,
            depth,
            subpass_count: group.len() as u32,
            dependencies,
        }));

        for (subpass, pass) in group.iter().enumerate() {
            if subpass > 0 {
                list.push(NativeCommand::NextSubpass);
            }
            for draw in pass.draws() {
                let command = match draw.call {
                    DrawCall::Draw {
                        vertex_count,
                        instance_count,
                    } => NativeCommand::Draw {
                        vertex_count,
                        instance_count,
                    },
                    DrawCall::DrawIndexed {
                        index_count,
                        instance_count,
                    } => NativeCommand::DrawIndexed {
                        index_count,
                        instance_count,
                    },
                    DrawCall::Indirect { offset } => {
                        let buffer = draw.indirect_buffer.ok_or_else(|| {
                            GraphError::InvalidDescriptor(format!(
                                "indirect draw '{}' has no buffer",
                                draw.name
                            ))
                        })?;
                        NativeCommand::DrawIndirect {
                            buffer: resources.expect_buffer(buffer)?.native,
                            offset,
                        }
                    }
                };
                list.push(command);
            }
            self.recording.stats.draw_calls += pass.draws().len();
        }
        list.push(NativeCommand::EndRenderPass);
        list.push(NativeCommand::EndLabel);

        self.recording.stats.render_passes += 1;
        self.recording.stats.subpasses += group.len();
        Ok(())
    }
}

/// Makes a staging copy visible to the host once the frame's fence signals.
fn host_read_barrier(staging: NativeBuffer) -> PipelineBarrier {
    PipelineBarrier {
        src_stages: PipelineStages::TRANSFER,
        dst_stages: PipelineStages::HOST,
        buffers: vec![NativeBufferBarrier {
            buffer: staging,
            src_access: AccessMask::TRANSFER_WRITE,
            dst_access: AccessMask::HOST_READ,
            src_queue_family: None,
            dst_queue_family: None,
        }],
        images: Vec::new(),
    }
}

fn render_pass_of(graph: &TaskGraph, handle: TaskHandle) -> Option<RenderPassHandle> {
    match graph.task(handle)?.desc().kind {
        TaskKind::SubmitRenderPass { pass } => Some(pass),
        _ => None,
    }
}

fn pass(passes: &[LogicalRenderPass], handle: RenderPassHandle) -> GraphResult<&LogicalRenderPass> {
    passes
        .get(handle.index())
        .ok_or_else(|| GraphError::InvalidDescriptor(format!("unknown render pass {handle:?}")))
}

/// Passes merge when their attachments line up and `next` does not sample
/// an attachment of `prev`, which would need a layout change mid-pass.
fn can_merge(prev: &LogicalRenderPass, next: &LogicalRenderPass) -> bool {
    prev.can_merge_with(next)
        && !next.draws().iter().any(|draw| {
            draw.sampled_images
                .iter()
                .any(|(image, _)| prev.desc().attachments().any(|a| a == *image))
        })
}
