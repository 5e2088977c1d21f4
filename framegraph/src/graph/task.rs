//! Task descriptors.

use std::fmt;

use crate::resources::{BufferId, ImageId};
use crate::types::{BufferRange, ImageRange, Rect, ResourceState};

use super::render_pass::{LogicalRenderPass, RenderPassHandle};
use super::usage::{BufferAccess, ImageAccess, ResourceUsage};

/// Host callback receiving the bytes of a `ReadBuffer` task.
///
/// Invoked exactly once, after the frame that recorded the task has finished
/// on the device.
pub type ReadbackCallback = Box<dyn FnOnce(&[u8]) + Send + 'static>;

/// Region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl BufferCopy {
    pub fn new(src_offset: u64, dst_offset: u64, size: u64) -> Self {
        Self {
            src_offset,
            dst_offset,
            size,
        }
    }
}

/// Region of an image-to-image copy (mip 0, layer 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageCopy {
    pub src: Rect,
    pub dst_x: u32,
    pub dst_y: u32,
}

/// Region of a buffer/image copy. Buffer rows are tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub image_rect: Rect,
}

/// What a task does.
pub enum TaskKind {
    /// Records a debug label and nothing else.
    Marker,
    UpdateBuffer {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        buffer: BufferId,
        range: BufferRange,
        value: u32,
    },
    CopyBuffer {
        src: BufferId,
        dst: BufferId,
        regions: Vec<BufferCopy>,
    },
    /// Copies a buffer range back to the host.
    ReadBuffer {
        buffer: BufferId,
        range: BufferRange,
        callback: Option<ReadbackCallback>,
    },
    CopyImage {
        src: ImageId,
        dst: ImageId,
        regions: Vec<ImageCopy>,
    },
    CopyBufferToImage {
        src: BufferId,
        dst: ImageId,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: ImageId,
        dst: BufferId,
        regions: Vec<BufferImageCopy>,
    },
    ClearColorImage {
        image: ImageId,
        color: [f32; 4],
    },
    SubmitRenderPass {
        pass: RenderPassHandle,
    },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Marker => "Marker",
            Self::UpdateBuffer { .. } => "UpdateBuffer",
            Self::FillBuffer { .. } => "FillBuffer",
            Self::CopyBuffer { .. } => "CopyBuffer",
            Self::ReadBuffer { .. } => "ReadBuffer",
            Self::CopyImage { .. } => "CopyImage",
            Self::CopyBufferToImage { .. } => "CopyBufferToImage",
            Self::CopyImageToBuffer { .. } => "CopyImageToBuffer",
            Self::ClearColorImage { .. } => "ClearColorImage",
            Self::SubmitRenderPass { .. } => "SubmitRenderPass",
        }
    }

    /// Resource usages declared by this task.
    ///
    /// Render pass tasks report the attachments and every buffer or image
    /// touched by their draw tasks.
    pub fn usages(&self, passes: &[LogicalRenderPass]) -> Vec<ResourceUsage> {
        let buffer = |id, state, range| ResourceUsage::Buffer(BufferAccess { id, state, range });
        let image = |id, state| {
            ResourceUsage::Image(ImageAccess {
                id,
                state,
                range: ImageRange::WHOLE,
            })
        };

        match self {
            Self::Marker => Vec::new(),
            Self::UpdateBuffer {
                buffer: id,
                offset,
                data,
            } => vec![buffer(
                *id,
                ResourceState::TransferDst,
                BufferRange::new(*offset, data.len() as u64),
            )],
            Self::FillBuffer { buffer: id, range, .. } => {
                vec![buffer(*id, ResourceState::TransferDst, *range)]
            }
            Self::CopyBuffer { src, dst, .. } => vec![
                buffer(*src, ResourceState::TransferSrc, BufferRange::WHOLE),
                buffer(*dst, ResourceState::TransferDst, BufferRange::WHOLE),
            ],
            Self::ReadBuffer { buffer: id, range, .. } => {
                vec![buffer(*id, ResourceState::TransferSrc, *range)]
            }
            Self::CopyImage { src, dst, .. } => vec![
                image(*src, ResourceState::TransferSrc),
                image(*dst, ResourceState::TransferDst),
            ],
            Self::CopyBufferToImage { src, dst, .. } => vec![
                buffer(*src, ResourceState::TransferSrc, BufferRange::WHOLE),
                image(*dst, ResourceState::TransferDst),
            ],
            Self::CopyImageToBuffer { src, dst, .. } => vec![
                image(*src, ResourceState::TransferSrc),
                buffer(*dst, ResourceState::TransferDst, BufferRange::WHOLE),
            ],
            Self::ClearColorImage { image: id, .. } => {
                vec![image(*id, ResourceState::TransferDst)]
            }
            Self::SubmitRenderPass { pass } => passes
                .get(pass.index())
                .map(LogicalRenderPass::usages)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadBuffer { buffer, range, callback } => f
                .debug_struct("ReadBuffer")
                .field("buffer", buffer)
                .field("range", range)
                .field("callback", &callback.as_ref().map(|_| "<callback>"))
                .finish(),
            Self::UpdateBuffer {
                buffer,
                offset,
                data,
            } => f
                .debug_struct("UpdateBuffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .field("len", &data.len())
                .finish(),
            Self::SubmitRenderPass { pass } => {
                f.debug_struct("SubmitRenderPass").field("pass", pass).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}

/// A task: its kind plus debug name and color.
#[derive(Debug)]
pub struct TaskDesc {
    pub name: String,
    /// Debug color; the debug context picks one per kind when unset.
    pub color: Option<[f32; 4]>,
    pub kind: TaskKind,
}

impl TaskDesc {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            name: kind.name().to_string(),
            color: None,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn marker(name: impl Into<String>) -> Self {
        Self::new(TaskKind::Marker).with_name(name)
    }

    pub fn update_buffer(buffer: BufferId, offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self::new(TaskKind::UpdateBuffer {
            buffer,
            offset,
            data: data.into(),
        })
    }

    pub fn fill_buffer(buffer: BufferId, range: BufferRange, value: u32) -> Self {
        Self::new(TaskKind::FillBuffer {
            buffer,
            range,
            value,
        })
    }

    pub fn copy_buffer(src: BufferId, dst: BufferId, regions: Vec<BufferCopy>) -> Self {
        Self::new(TaskKind::CopyBuffer { src, dst, regions })
    }

    pub fn read_buffer(
        buffer: BufferId,
        range: BufferRange,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> Self {
        Self::new(TaskKind::ReadBuffer {
            buffer,
            range,
            callback: Some(Box::new(callback)),
        })
    }

    pub fn copy_image(src: ImageId, dst: ImageId, regions: Vec<ImageCopy>) -> Self {
        Self::new(TaskKind::CopyImage { src, dst, regions })
    }

    pub fn copy_buffer_to_image(
        src: BufferId,
        dst: ImageId,
        regions: Vec<BufferImageCopy>,
    ) -> Self {
        Self::new(TaskKind::CopyBufferToImage { src, dst, regions })
    }

    pub fn copy_image_to_buffer(
        src: ImageId,
        dst: BufferId,
        regions: Vec<BufferImageCopy>,
    ) -> Self {
        Self::new(TaskKind::CopyImageToBuffer { src, dst, regions })
    }

    pub fn clear_color_image(image: ImageId, color: [f32; 4]) -> Self {
        Self::new(TaskKind::ClearColorImage { image, color })
    }

    pub fn submit_render_pass(pass: RenderPassHandle) -> Self {
        Self::new(TaskKind::SubmitRenderPass { pass })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn buffer_id(n: u64) -> BufferId {
        BufferId::from(KeyData::from_ffi(n | (1 << 32)))
    }

    #[test]
    fn test_default_name_is_kind() {
        let desc = TaskDesc::fill_buffer(buffer_id(1), BufferRange::WHOLE, 0);
        assert_eq!(desc.name, "FillBuffer");
        let desc = desc.with_name("zero");
        assert_eq!(desc.name, "zero");
    }

    #[test]
    fn test_copy_buffer_usages() {
        let (src, dst) = (buffer_id(1), buffer_id(2));
        let desc = TaskDesc::copy_buffer(src, dst, vec![BufferCopy::new(0, 0, 4)]);
        let usages = desc.kind.usages(&[]);
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].state(), ResourceState::TransferSrc);
        assert_eq!(usages[1].state(), ResourceState::TransferDst);
    }

    #[test]
    fn test_debug_hides_callback_and_payload() {
        let desc = TaskDesc::read_buffer(buffer_id(1), BufferRange::WHOLE, |_| {});
        let text = format!("{:?}", desc.kind);
        assert!(text.contains("<callback>"));

        let desc = TaskDesc::update_buffer(buffer_id(1), 0, vec![0u8; 64]);
        assert!(format!("{:?}", desc.kind).contains("len: 64"));
    }
}
