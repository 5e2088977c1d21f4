//! Synchronization vocabulary: stages, access masks, layouts and logical states.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages a resource access happens in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const HOST = 1 << 11;
        const ALL_COMMANDS = 1 << 12;
    }
}

impl Default for PipelineStages {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Memory access types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_READ = 1 << 8;
        const DEPTH_STENCIL_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
        const MEMORY_READ = 1 << 14;
        const MEMORY_WRITE = 1 << 15;
    }
}

impl AccessMask {
    /// Every access bit that modifies memory.
    pub const WRITES: Self = Self::SHADER_WRITE
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_WRITE)
        .union(Self::TRANSFER_WRITE)
        .union(Self::HOST_WRITE)
        .union(Self::MEMORY_WRITE);

    /// Returns true if any bit writes memory.
    pub fn has_write(self) -> bool {
        self.intersects(Self::WRITES)
    }

    /// Only the read bits of this mask.
    pub fn reads(self) -> Self {
        self.difference(Self::WRITES)
    }
}

impl Default for AccessMask {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Shader stages that consume a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl ShaderStages {
    fn pipeline_stages(self) -> PipelineStages {
        let mut stages = PipelineStages::empty();
        if self.contains(Self::VERTEX) {
            stages |= PipelineStages::VERTEX_SHADER;
        }
        if self.contains(Self::FRAGMENT) {
            stages |= PipelineStages::FRAGMENT_SHADER;
        }
        if self.contains(Self::COMPUTE) {
            stages |= PipelineStages::COMPUTE_SHADER;
        }
        stages
    }
}

/// Image memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined; only valid as a transition source.
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

impl ImageLayout {
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::General => "GENERAL",
            Self::ColorAttachment => "COLOR_ATTACHMENT",
            Self::DepthStencilAttachment => "DEPTH_STENCIL_ATTACHMENT",
            Self::DepthStencilReadOnly => "DEPTH_STENCIL_READ_ONLY",
            Self::ShaderReadOnly => "SHADER_READ_ONLY",
            Self::TransferSrc => "TRANSFER_SRC",
            Self::TransferDst => "TRANSFER_DST",
            Self::PresentSrc => "PRESENT_SRC",
        }
    }
}

/// Logical state a task requires a resource to be in.
///
/// The tracker derives stage masks, access masks and image layouts from
/// these states when it synthesizes barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// No prior use is known.
    #[default]
    Undefined,
    TransferSrc,
    TransferDst,
    HostRead,
    VertexBuffer,
    IndexBuffer,
    IndirectBuffer,
    UniformRead(ShaderStages),
    ShaderRead(ShaderStages),
    ShaderWrite(ShaderStages),
    ShaderReadWrite(ShaderStages),
    ShaderSample(ShaderStages),
    ColorAttachmentRead,
    ColorAttachmentWrite,
    ColorAttachmentReadWrite,
    DepthStencilRead,
    DepthStencilWrite,
    DepthStencilReadWrite,
    PresentSrc,
    General,
}

impl ResourceState {
    /// Pipeline stages that touch the resource in this state.
    pub fn stages(self) -> PipelineStages {
        match self {
            Self::Undefined => PipelineStages::TOP_OF_PIPE,
            Self::TransferSrc | Self::TransferDst => PipelineStages::TRANSFER,
            Self::HostRead => PipelineStages::HOST,
            Self::VertexBuffer | Self::IndexBuffer => PipelineStages::VERTEX_INPUT,
            Self::IndirectBuffer => PipelineStages::DRAW_INDIRECT,
            Self::UniformRead(s)
            | Self::ShaderRead(s)
            | Self::ShaderWrite(s)
            | Self::ShaderReadWrite(s)
            | Self::ShaderSample(s) => s.pipeline_stages(),
            Self::ColorAttachmentRead
            | Self::ColorAttachmentWrite
            | Self::ColorAttachmentReadWrite => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilRead | Self::DepthStencilWrite | Self::DepthStencilReadWrite => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::PresentSrc => PipelineStages::BOTTOM_OF_PIPE,
            Self::General => PipelineStages::ALL_COMMANDS,
        }
    }

    /// Memory accesses performed in this state.
    pub fn access(self) -> AccessMask {
        match self {
            Self::Undefined | Self::PresentSrc => AccessMask::empty(),
            Self::TransferSrc => AccessMask::TRANSFER_READ,
            Self::TransferDst => AccessMask::TRANSFER_WRITE,
            Self::HostRead => AccessMask::HOST_READ,
            Self::VertexBuffer => AccessMask::VERTEX_ATTRIBUTE_READ,
            Self::IndexBuffer => AccessMask::INDEX_READ,
            Self::IndirectBuffer => AccessMask::INDIRECT_COMMAND_READ,
            Self::UniformRead(_) => AccessMask::UNIFORM_READ,
            Self::ShaderRead(_) | Self::ShaderSample(_) => AccessMask::SHADER_READ,
            Self::ShaderWrite(_) => AccessMask::SHADER_WRITE,
            Self::ShaderReadWrite(_) => AccessMask::SHADER_READ | AccessMask::SHADER_WRITE,
            Self::ColorAttachmentRead => AccessMask::COLOR_ATTACHMENT_READ,
            Self::ColorAttachmentWrite => AccessMask::COLOR_ATTACHMENT_WRITE,
            Self::ColorAttachmentReadWrite => {
                AccessMask::COLOR_ATTACHMENT_READ | AccessMask::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilRead => AccessMask::DEPTH_STENCIL_READ,
            Self::DepthStencilWrite => AccessMask::DEPTH_STENCIL_WRITE,
            Self::DepthStencilReadWrite => {
                AccessMask::DEPTH_STENCIL_READ | AccessMask::DEPTH_STENCIL_WRITE
            }
            Self::General => AccessMask::MEMORY_READ | AccessMask::MEMORY_WRITE,
        }
    }

    /// Image layout required by this state.
    pub fn layout(self) -> ImageLayout {
        match self {
            Self::Undefined => ImageLayout::Undefined,
            Self::TransferSrc => ImageLayout::TransferSrc,
            Self::TransferDst => ImageLayout::TransferDst,
            Self::UniformRead(_) | Self::ShaderRead(_) | Self::ShaderSample(_) => {
                ImageLayout::ShaderReadOnly
            }
            Self::ColorAttachmentRead
            | Self::ColorAttachmentWrite
            | Self::ColorAttachmentReadWrite => ImageLayout::ColorAttachment,
            Self::DepthStencilRead => ImageLayout::DepthStencilReadOnly,
            Self::DepthStencilWrite | Self::DepthStencilReadWrite => {
                ImageLayout::DepthStencilAttachment
            }
            Self::PresentSrc => ImageLayout::PresentSrc,
            Self::HostRead
            | Self::VertexBuffer
            | Self::IndexBuffer
            | Self::IndirectBuffer
            | Self::ShaderWrite(_)
            | Self::ShaderReadWrite(_)
            | Self::General => ImageLayout::General,
        }
    }

    pub fn is_write(self) -> bool {
        self.access().has_write()
    }
}

/// Resolved stage/access/layout triple the tracker works with.
///
/// Several usages of one resource inside a single task collapse into one
/// `AccessInfo` through [`merge`](Self::merge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessInfo {
    pub stages: PipelineStages,
    pub access: AccessMask,
    pub layout: ImageLayout,
}

impl AccessInfo {
    pub fn is_write(&self) -> bool {
        self.access.has_write()
    }

    /// Unions two accesses of the same resource; conflicting layouts fall back to `General`.
    pub fn merge(self, other: AccessInfo) -> AccessInfo {
        let layout = if self.layout == other.layout {
            self.layout
        } else {
            ImageLayout::General
        };
        AccessInfo {
            stages: self.stages | other.stages,
            access: self.access | other.access,
            layout,
        }
    }
}

impl From<ResourceState> for AccessInfo {
    fn from(state: ResourceState) -> Self {
        Self {
            stages: state.stages(),
            access: state.access(),
            layout: state.layout(),
        }
    }
}
