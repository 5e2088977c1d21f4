//! Resource manager.
//!
//! Owns every buffer and image known to the frame graph. Tasks refer to
//! resources through generation-checked [`BufferId`]/[`ImageId`] keys, so a
//! released resource can never be confused with a newer one reusing its slot.

use slotmap::SlotMap;

use crate::device::{GpuDevice, NativeBuffer, NativeImage};
use crate::error::{GraphError, GraphResult};
use crate::graph::ResourceRef;
use crate::types::{AccessInfo, BufferDesc, ImageDesc, QueueFamily};

slotmap::new_key_type! {
    /// Key of a buffer owned by the [`ResourceManager`].
    pub struct BufferId;
    /// Key of an image owned by the [`ResourceManager`].
    pub struct ImageId;
}

#[derive(Debug)]
pub struct BufferEntry {
    pub desc: BufferDesc,
    pub native: NativeBuffer,
    pub owner: Option<QueueFamily>,
}

#[derive(Debug)]
pub struct ImageEntry {
    pub desc: ImageDesc,
    pub native: NativeImage,
    pub owner: Option<QueueFamily>,
}

/// What the tracker needs to know about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedResource {
    /// State the resource is in when a command buffer starts.
    pub default: AccessInfo,
    pub owner: Option<QueueFamily>,
}

/// A native resource waiting for its frame to retire before destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeResource {
    Buffer(NativeBuffer),
    Image(NativeImage),
}

impl NativeResource {
    pub(crate) fn destroy(self, device: &dyn GpuDevice) {
        match self {
            Self::Buffer(buffer) => device.destroy_buffer(buffer),
            Self::Image(image) => device.destroy_image(image),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceManager {
    buffers: SlotMap<BufferId, BufferEntry>,
    images: SlotMap<ImageId, ImageEntry>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer(
        &mut self,
        device: &dyn GpuDevice,
        desc: BufferDesc,
        owner: Option<QueueFamily>,
    ) -> GraphResult<BufferId> {
        if desc.size == 0 {
            return Err(GraphError::InvalidDescriptor(format!(
                "buffer {:?} has zero size",
                desc.label
            )));
        }
        let native = device.create_buffer(&desc)?;
        log::trace!("Created buffer {:?} ({} bytes)", desc.label, desc.size);
        Ok(self.buffers.insert(BufferEntry {
            desc,
            native,
            owner,
        }))
    }

    pub fn create_image(
        &mut self,
        device: &dyn GpuDevice,
        desc: ImageDesc,
        owner: Option<QueueFamily>,
    ) -> GraphResult<ImageId> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.array_layers == 0 {
            return Err(GraphError::InvalidDescriptor(format!(
                "image {:?} has an empty extent",
                desc.label
            )));
        }
        let native = device.create_image(&desc)?;
        log::trace!(
            "Created image {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(self.images.insert(ImageEntry {
            desc,
            native,
            owner,
        }))
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferEntry> {
        self.buffers.get(id)
    }

    pub fn image(&self, id: ImageId) -> Option<&ImageEntry> {
        self.images.get(id)
    }

    /// Looks up a buffer or fails with a descriptor error naming it.
    pub fn expect_buffer(&self, id: BufferId) -> GraphResult<&BufferEntry> {
        self.buffer(id)
            .ok_or_else(|| GraphError::InvalidDescriptor(format!("unknown buffer {id:?}")))
    }

    pub fn expect_image(&self, id: ImageId) -> GraphResult<&ImageEntry> {
        self.image(id)
            .ok_or_else(|| GraphError::InvalidDescriptor(format!("unknown image {id:?}")))
    }

    pub fn tracked(&self, resource: ResourceRef) -> Option<TrackedResource> {
        match resource {
            ResourceRef::Buffer(id) => self.buffer(id).map(|e| TrackedResource {
                default: e.desc.default_state.into(),
                owner: e.owner,
            }),
            ResourceRef::Image(id) => self.image(id).map(|e| TrackedResource {
                default: e.desc.default_state.into(),
                owner: e.owner,
            }),
        }
    }

    /// Debug label of a resource, if it has one.
    pub fn label(&self, resource: ResourceRef) -> Option<&str> {
        match resource {
            ResourceRef::Buffer(id) => self.buffer(id)?.desc.label.as_deref(),
            ResourceRef::Image(id) => self.image(id)?.desc.label.as_deref(),
        }
    }

    /// Removes a buffer; its native handle must be destroyed by the caller.
    pub fn remove_buffer(&mut self, id: BufferId) -> Option<BufferEntry> {
        self.buffers.remove(id)
    }

    pub fn remove_image(&mut self, id: ImageId) -> Option<ImageEntry> {
        self.images.remove(id)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Removes every resource and returns their native handles.
    pub fn drain(&mut self) -> Vec<NativeResource> {
        let buffers = self.buffers.drain().map(|(_, e)| NativeResource::Buffer(e.native));
        let images = self.images.drain().map(|(_, e)| NativeResource::Image(e.native));
        buffers.chain(images).collect()
    }
}
