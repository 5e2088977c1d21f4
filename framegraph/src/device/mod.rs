//! Device abstraction.
//!
//! The frame graph never talks to a graphics API directly. It records
//! [`NativeCommand`]s into [`CommandList`]s and hands [`Submission`]s to a
//! [`GpuDevice`], which it holds by composition (`Arc<dyn GpuDevice>`).
//!
//! [`DummyDevice`] executes recorded commands against host memory. It is used
//! by the test suite and for running the scheduler without a GPU.

mod dummy;

use std::fmt;
use std::time::Duration;

pub use dummy::{CompletionMode, DummyDevice, SubmissionRecord};

use redlilium_core::pool::Poolable;

use crate::error::GraphResult;
use crate::graph::{BufferCopy, BufferImageCopy, ImageCopy, LoadOp, StoreOp};
use crate::scheduler::{Fence, Semaphore};
use crate::types::{
    AccessMask, BufferDesc, ImageDesc, ImageLayout, PipelineStages, QueueFamily, QueueInfo, Rect,
};

/// Device-side buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeBuffer(pub u64);

/// Device-side image handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeImage(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBufferBarrier {
    pub buffer: NativeBuffer,
    pub src_access: AccessMask,
    pub dst_access: AccessMask,
    pub src_queue_family: Option<QueueFamily>,
    pub dst_queue_family: Option<QueueFamily>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeImageBarrier {
    pub image: NativeImage,
    pub src_access: AccessMask,
    pub dst_access: AccessMask,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_queue_family: Option<QueueFamily>,
    pub dst_queue_family: Option<QueueFamily>,
}

/// A batched pipeline barrier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineBarrier {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub buffers: Vec<NativeBufferBarrier>,
    pub images: Vec<NativeImageBarrier>,
}

impl PipelineBarrier {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentBegin {
    pub image: NativeImage,
    pub load: LoadOp,
    pub store: StoreOp,
    /// Clear color, or the clear depth in the first component.
    pub clear: [f32; 4],
}

/// Ordering between two subpasses of one native render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessMask,
    pub dst_access: AccessMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    pub area: Rect,
    pub color: Vec<AttachmentBegin>,
    pub depth: Option<AttachmentBegin>,
    pub subpass_count: u32,
    pub dependencies: Vec<SubpassDependency>,
}

/// A command understood by every [`GpuDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCommand {
    Barrier(PipelineBarrier),
    UpdateBuffer {
        buffer: NativeBuffer,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        buffer: NativeBuffer,
        offset: u64,
        size: u64,
        value: u32,
    },
    CopyBuffer {
        src: NativeBuffer,
        dst: NativeBuffer,
        regions: Vec<BufferCopy>,
    },
    CopyImage {
        src: NativeImage,
        dst: NativeImage,
        regions: Vec<ImageCopy>,
    },
    CopyBufferToImage {
        src: NativeBuffer,
        dst: NativeImage,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: NativeImage,
        dst: NativeBuffer,
        regions: Vec<BufferImageCopy>,
    },
    ClearColorImage {
        image: NativeImage,
        color: [f32; 4],
    },
    BeginRenderPass(RenderPassBegin),
    NextSubpass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndirect {
        buffer: NativeBuffer,
        offset: u64,
    },
    EndRenderPass,
    BeginLabel {
        name: String,
        color: [f32; 4],
    },
    EndLabel,
}

/// A recorded native command buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandList {
    pub commands: Vec<NativeCommand>,
}

impl CommandList {
    pub fn push(&mut self, command: NativeCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of barrier commands recorded.
    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, NativeCommand::Barrier(_)))
            .count()
    }
}

impl Poolable for CommandList {
    fn new_empty() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.commands.clear();
    }
}

/// One queue submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub command_lists: Vec<CommandList>,
    /// Semaphores to wait on, with the stages that must wait.
    pub wait_semaphores: Vec<(Semaphore, PipelineStages)>,
    pub signal_semaphores: Vec<Semaphore>,
    /// Signaled once every command list has executed.
    pub fence: Fence,
}

/// Capabilities the frame graph needs from a device.
///
/// Implementations must be thread-safe; the frame graph calls into the device
/// from worker threads while recording.
pub trait GpuDevice: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Queues exposed by the device. Must contain at least one graphics queue.
    fn queues(&self) -> Vec<QueueInfo>;

    fn create_buffer(&self, desc: &BufferDesc) -> GraphResult<NativeBuffer>;

    fn create_image(&self, desc: &ImageDesc) -> GraphResult<NativeImage>;

    fn destroy_buffer(&self, buffer: NativeBuffer);

    fn destroy_image(&self, image: NativeImage);

    /// Reads back host-visible buffer memory.
    fn read_buffer(&self, buffer: NativeBuffer, offset: u64, size: u64) -> GraphResult<Vec<u8>>;

    fn create_semaphore(&self) -> GraphResult<Semaphore>;

    /// Submits work to the queue at `queue` (an index into [`queues`](Self::queues)).
    fn submit(&self, queue: usize, submission: &Submission) -> GraphResult<()>;

    /// Blocks until every fence is signaled.
    ///
    /// Fails with [`GraphError::Timeout`](crate::GraphError::Timeout) or
    /// [`GraphError::DeviceLost`](crate::GraphError::DeviceLost).
    fn wait_fences(&self, fences: &[Fence], timeout: Duration) -> GraphResult<()>;
}
