//! Logical render passes and their draw tasks.
//!
//! A [`LogicalRenderPass`] is created on a command buffer, collects draw tasks
//! and is placed in the task graph with a `SubmitRenderPass` task. Consecutive
//! mergeable passes over the same attachments are recorded as subpasses of a
//! single native render pass.

use crate::resources::{BufferId, ImageId};
use crate::types::{BufferRange, ImageRange, Rect, ResourceState, ShaderStages};

use super::usage::{BufferAccess, ImageAccess, ResourceUsage};

/// Handle to a render pass created on a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub(crate) u32);

impl RenderPassHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Attachment load operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

/// Attachment store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub image: ImageId,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: [f32; 4],
}

impl ColorTarget {
    pub fn new(image: ImageId) -> Self {
        Self {
            image,
            load: LoadOp::Load,
            store: StoreOp::Store,
            clear: [0.0; 4],
        }
    }

    pub fn with_clear(mut self, color: [f32; 4]) -> Self {
        self.load = LoadOp::Clear;
        self.clear = color;
        self
    }

    pub fn with_store(mut self, store: StoreOp) -> Self {
        self.store = store;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthTarget {
    pub image: ImageId,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

impl DepthTarget {
    pub fn new(image: ImageId) -> Self {
        Self {
            image,
            load: LoadOp::Load,
            store: StoreOp::Store,
            clear_depth: 1.0,
        }
    }

    pub fn with_clear(mut self, depth: f32) -> Self {
        self.load = LoadOp::Clear;
        self.clear_depth = depth;
        self
    }
}

/// Descriptor for [`CommandBuffer::create_render_pass`](crate::instance::CommandBuffer::create_render_pass).
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub name: String,
    pub color_targets: Vec<ColorTarget>,
    pub depth_target: Option<DepthTarget>,
    /// Render area; defaults to the full size of the first attachment.
    pub area: Option<Rect>,
    /// Allows merging with neighbouring passes over the same attachments.
    pub can_be_merged: bool,
}

impl RenderPassDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color_targets: Vec::new(),
            depth_target: None,
            area: None,
            can_be_merged: true,
        }
    }

    pub fn with_color(mut self, target: ColorTarget) -> Self {
        self.color_targets.push(target);
        self
    }

    pub fn with_depth(mut self, target: DepthTarget) -> Self {
        self.depth_target = Some(target);
        self
    }

    pub fn with_area(mut self, area: Rect) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_merging(mut self, can_be_merged: bool) -> Self {
        self.can_be_merged = can_be_merged;
        self
    }

    /// Every attachment image, color targets first.
    pub fn attachments(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.color_targets
            .iter()
            .map(|t| t.image)
            .chain(self.depth_target.iter().map(|t| t.image))
    }
}

/// Draw command parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    /// Parameters are read from the draw task's indirect buffer.
    Indirect { offset: u64 },
}

/// One draw inside a logical render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTask {
    pub name: String,
    pub call: DrawCall,
    pub vertex_buffers: Vec<BufferId>,
    pub index_buffer: Option<BufferId>,
    pub indirect_buffer: Option<BufferId>,
    pub uniform_buffers: Vec<(BufferId, ShaderStages)>,
    pub storage_buffers: Vec<(BufferId, ShaderStages)>,
    pub sampled_images: Vec<(ImageId, ShaderStages)>,
}

impl DrawTask {
    pub fn draw(vertex_count: u32, instance_count: u32) -> Self {
        Self::with_call(DrawCall::Draw {
            vertex_count,
            instance_count,
        })
    }

    pub fn draw_indexed(index_buffer: BufferId, index_count: u32, instance_count: u32) -> Self {
        let mut task = Self::with_call(DrawCall::DrawIndexed {
            index_count,
            instance_count,
        });
        task.index_buffer = Some(index_buffer);
        task
    }

    pub fn draw_indirect(buffer: BufferId, offset: u64) -> Self {
        let mut task = Self::with_call(DrawCall::Indirect { offset });
        task.indirect_buffer = Some(buffer);
        task
    }

    fn with_call(call: DrawCall) -> Self {
        Self {
            name: "Draw".to_string(),
            call,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            indirect_buffer: None,
            uniform_buffers: Vec::new(),
            storage_buffers: Vec::new(),
            sampled_images: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_vertex_buffer(mut self, buffer: BufferId) -> Self {
        self.vertex_buffers.push(buffer);
        self
    }

    pub fn with_uniform_buffer(mut self, buffer: BufferId, stages: ShaderStages) -> Self {
        self.uniform_buffers.push((buffer, stages));
        self
    }

    pub fn with_storage_buffer(mut self, buffer: BufferId, stages: ShaderStages) -> Self {
        self.storage_buffers.push((buffer, stages));
        self
    }

    pub fn with_sampled_image(mut self, image: ImageId, stages: ShaderStages) -> Self {
        self.sampled_images.push((image, stages));
        self
    }

    /// Buffers referenced by this draw.
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.vertex_buffers
            .iter()
            .copied()
            .chain(self.index_buffer)
            .chain(self.indirect_buffer)
            .chain(self.uniform_buffers.iter().map(|(b, _)| *b))
            .chain(self.storage_buffers.iter().map(|(b, _)| *b))
    }

    fn usages(&self, out: &mut Vec<ResourceUsage>) {
        let mut buffer = |id, state| {
            out.push(ResourceUsage::Buffer(BufferAccess {
                id,
                state,
                range: BufferRange::WHOLE,
            }))
        };
        for &id in &self.vertex_buffers {
            buffer(id, ResourceState::VertexBuffer);
        }
        if let Some(id) = self.index_buffer {
            buffer(id, ResourceState::IndexBuffer);
        }
        if let Some(id) = self.indirect_buffer {
            buffer(id, ResourceState::IndirectBuffer);
        }
        for &(id, stages) in &self.uniform_buffers {
            buffer(id, ResourceState::UniformRead(stages));
        }
        for &(id, stages) in &self.storage_buffers {
            buffer(id, ResourceState::ShaderRead(stages));
        }
        for &(id, stages) in &self.sampled_images {
            out.push(ResourceUsage::Image(ImageAccess {
                id,
                state: ResourceState::ShaderSample(stages),
                range: ImageRange::WHOLE,
            }));
        }
    }
}

/// A render pass recorded on a command buffer, with its draws.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRenderPass {
    desc: RenderPassDesc,
    area: Rect,
    draws: Vec<DrawTask>,
}

impl LogicalRenderPass {
    pub(crate) fn new(desc: RenderPassDesc, area: Rect) -> Self {
        Self {
            desc,
            area,
            draws: Vec::new(),
        }
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    pub fn draws(&self) -> &[DrawTask] {
        &self.draws
    }

    pub(crate) fn push_draw(&mut self, draw: DrawTask) {
        self.draws.push(draw);
    }

    /// Returns true if `next` can continue this pass as another subpass.
    ///
    /// Both passes must allow merging, render to the same area and use the
    /// same attachments, and `next` must not clear them.
    pub fn can_merge_with(&self, next: &LogicalRenderPass) -> bool {
        self.desc.can_be_merged
            && next.desc.can_be_merged
            && self.area == next.area
            && self.desc.attachments().eq(next.desc.attachments())
            && next.desc.color_targets.iter().all(|t| t.load != LoadOp::Clear)
            && !matches!(next.desc.depth_target, Some(t) if t.load == LoadOp::Clear)
    }

    /// Usages of the attachments and of every draw's resources.
    pub fn usages(&self) -> Vec<ResourceUsage> {
        let mut out = Vec::new();
        for target in &self.desc.color_targets {
            let state = if target.load == LoadOp::Load {
                ResourceState::ColorAttachmentReadWrite
            } else {
                ResourceState::ColorAttachmentWrite
            };
            out.push(ResourceUsage::Image(ImageAccess {
                id: target.image,
                state,
                range: ImageRange::mip(0),
            }));
        }
        if let Some(target) = &self.desc.depth_target {
            let state = if target.load == LoadOp::Load {
                ResourceState::DepthStencilReadWrite
            } else {
                ResourceState::DepthStencilWrite
            };
            out.push(ResourceUsage::Image(ImageAccess {
                id: target.image,
                state,
                range: ImageRange::mip(0),
            }));
        }
        for draw in &self.draws {
            draw.usages(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn image_id(n: u64) -> ImageId {
        ImageId::from(KeyData::from_ffi(n | (1 << 32)))
    }

    fn pass(desc: RenderPassDesc) -> LogicalRenderPass {
        LogicalRenderPass::new(desc, Rect::new(0, 0, 64, 64))
    }

    #[test]
    fn test_attachment_states() {
        let color = image_id(1);
        let depth = image_id(2);
        let pass = pass(
            RenderPassDesc::new("main")
                .with_color(ColorTarget::new(color).with_clear([0.0; 4]))
                .with_depth(DepthTarget::new(depth)),
        );
        let usages = pass.usages();
        assert_eq!(usages[0].state(), ResourceState::ColorAttachmentWrite);
        assert_eq!(usages[1].state(), ResourceState::DepthStencilReadWrite);
    }

    #[test]
    fn test_merge_rules() {
        let color = image_id(1);
        let first = pass(RenderPassDesc::new("a").with_color(ColorTarget::new(color).with_clear([0.0; 4])));
        let second = pass(RenderPassDesc::new("b").with_color(ColorTarget::new(color)));
        assert!(first.can_merge_with(&second));

        // Clearing again needs its own pass.
        assert!(!second.can_merge_with(&first));

        let other = pass(RenderPassDesc::new("c").with_color(ColorTarget::new(image_id(3))));
        assert!(!first.can_merge_with(&other));

        let unmergeable =
            pass(RenderPassDesc::new("d").with_color(ColorTarget::new(color)).with_merging(false));
        assert!(!first.can_merge_with(&unmergeable));
    }

    #[test]
    fn test_draw_usages() {
        let mut pass = pass(RenderPassDesc::new("main").with_color(ColorTarget::new(image_id(1))));
        let vb = BufferId::from(KeyData::from_ffi(5 | (1 << 32)));
        pass.push_draw(
            DrawTask::draw(3, 1)
                .with_vertex_buffer(vb)
                .with_sampled_image(image_id(2), ShaderStages::FRAGMENT),
        );
        let states: Vec<_> = pass.usages().iter().map(|u| u.state()).collect();
        assert_eq!(
            states,
            vec![
                ResourceState::ColorAttachmentReadWrite,
                ResourceState::VertexBuffer,
                ResourceState::ShaderSample(ShaderStages::FRAGMENT),
            ]
        );
    }
}
