//! Resource usage declarations.

use crate::resources::{BufferId, ImageId};
use crate::types::{BufferRange, ImageRange, ResourceState};

/// Identifies a buffer or an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    Buffer(BufferId),
    Image(ImageId),
}

impl ResourceRef {
    pub fn is_image(self) -> bool {
        matches!(self, Self::Image(_))
    }
}

/// A task's access to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferAccess {
    pub id: BufferId,
    pub state: ResourceState,
    pub range: BufferRange,
}

/// A task's access to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageAccess {
    pub id: ImageId,
    pub state: ResourceState,
    pub range: ImageRange,
}

/// One resource a task touches, and the state it needs it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    Buffer(BufferAccess),
    Image(ImageAccess),
}

impl ResourceUsage {
    pub fn resource(&self) -> ResourceRef {
        match self {
            Self::Buffer(access) => ResourceRef::Buffer(access.id),
            Self::Image(access) => ResourceRef::Image(access.id),
        }
    }

    pub fn state(&self) -> ResourceState {
        match self {
            Self::Buffer(access) => access.state,
            Self::Image(access) => access.state,
        }
    }
}
