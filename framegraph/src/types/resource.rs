//! Buffer and image descriptors.

use bitflags::bitflags;

use super::{QueueType, ResourceState};

bitflags! {
    /// Buffer usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const INDIRECT = 1 << 6;
        /// Host can read the buffer contents back.
        const MAP_READ = 1 << 7;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Image usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Texel formats understood by the frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
    R32Float,
    Rgba32Float,
    Depth32Float,
}

impl ImageFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Encodes a clear color as one texel of this format.
    pub fn encode_color(self, color: [f32; 4]) -> Vec<u8> {
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        match self {
            Self::Rgba8Unorm => color.iter().map(|&c| unorm(c)).collect(),
            Self::Bgra8Unorm => [color[2], color[1], color[0], color[3]]
                .iter()
                .map(|&c| unorm(c))
                .collect(),
            Self::R32Float | Self::Depth32Float => color[0].to_le_bytes().to_vec(),
            Self::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        }
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    /// State the buffer is assumed to be in between command buffers.
    pub default_state: ResourceState,
    /// Queue whose family exclusively owns the buffer; `None` means shared.
    pub owner: Option<QueueType>,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            default_state: ResourceState::Undefined,
            owner: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_default_state(mut self, state: ResourceState) -> Self {
        self.default_state = state;
        self
    }

    pub fn with_owner(mut self, queue: QueueType) -> Self {
        self.owner = Some(queue);
        self
    }
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self::new(0, BufferUsage::empty())
    }
}

/// Descriptor for creating a 2D image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDesc {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// State (and layout) the image returns to at the end of every command buffer.
    pub default_state: ResourceState,
    pub owner: Option<QueueType>,
}

impl ImageDesc {
    pub fn new(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
            default_state: ResourceState::General,
            owner: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub fn with_default_state(mut self, state: ResourceState) -> Self {
        self.default_state = state;
        self
    }

    pub fn with_owner(mut self, queue: QueueType) -> Self {
        self.owner = Some(queue);
        self
    }

    /// Size in bytes of mip 0 of a single layer.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }

    pub fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Byte range inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub offset: u64,
    /// `None` extends to the end of the buffer.
    pub size: Option<u64>,
}

impl BufferRange {
    pub const WHOLE: Self = Self {
        offset: 0,
        size: None,
    };

    pub fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size: Some(size),
        }
    }

    /// Resolves the range against a buffer of `buffer_size` bytes.
    ///
    /// Returns `None` when the range is empty or out of bounds.
    pub fn resolve(&self, buffer_size: u64) -> Option<(u64, u64)> {
        let size = match self.size {
            Some(size) => size,
            None => buffer_size.checked_sub(self.offset)?,
        };
        let end = self.offset.checked_add(size)?;
        (size > 0 && end <= buffer_size).then_some((self.offset, size))
    }
}

impl Default for BufferRange {
    fn default() -> Self {
        Self::WHOLE
    }
}

/// Mip/layer range inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageRange {
    pub const WHOLE: Self = Self {
        base_mip: 0,
        mip_count: u32::MAX,
        base_layer: 0,
        layer_count: u32::MAX,
    };

    pub fn mip(level: u32) -> Self {
        Self {
            base_mip: level,
            mip_count: 1,
            ..Self::WHOLE
        }
    }
}

impl Default for ImageRange {
    fn default() -> Self {
        Self::WHOLE
    }
}

/// Integer rectangle in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if `self` lies entirely within an image of the given size.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}
