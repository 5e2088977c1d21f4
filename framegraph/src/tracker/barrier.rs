//! Barrier records and batching.

use std::collections::HashMap;

use crate::device::{NativeBufferBarrier, NativeImageBarrier, PipelineBarrier};
use crate::graph::{ExeOrderIndex, ResourceRef};
use crate::resources::ResourceManager;
use crate::types::{AccessMask, ImageLayout, PipelineStages, QueueFamily};

/// Dedup key of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierKey {
    pub resource: ResourceRef,
    pub src_index: ExeOrderIndex,
    pub dst_index: ExeOrderIndex,
}

/// Hazard a barrier resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hazard {
    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,
    /// Layout change between two reads.
    LayoutTransition,
}

impl Hazard {
    fn new(src_writes: bool, dst_writes: bool) -> Self {
        match (src_writes, dst_writes) {
            (true, true) => Self::WriteAfterWrite,
            (false, true) => Self::WriteAfterRead,
            (true, false) => Self::ReadAfterWrite,
            (false, false) => Self::LayoutTransition,
        }
    }

    /// Short label used by the dumps.
    pub fn label(self) -> &'static str {
        match self {
            Self::ReadAfterWrite => "W--R",
            Self::WriteAfterRead => "R--W",
            Self::WriteAfterWrite => "W--W",
            Self::LayoutTransition => "LAY",
        }
    }
}

/// A synthesized memory/execution barrier between two uses of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceRef,
    pub src_index: ExeOrderIndex,
    pub dst_index: ExeOrderIndex,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessMask,
    pub dst_access: AccessMask,
    /// `(old, new)` when an image changes layout.
    pub layout: Option<(ImageLayout, ImageLayout)>,
    pub src_queue_family: Option<QueueFamily>,
    pub dst_queue_family: Option<QueueFamily>,
    pub hazard: Hazard,
}

impl Barrier {
    pub(crate) fn new(
        key: BarrierKey,
        src: (PipelineStages, AccessMask, bool),
        dst: (PipelineStages, AccessMask),
        layout: Option<(ImageLayout, ImageLayout)>,
        queue_family: Option<QueueFamily>,
    ) -> Self {
        let (src_stages, src_access, src_writes) = src;
        let (dst_stages, dst_access) = dst;
        debug_assert!(key.src_index < key.dst_index);
        Self {
            resource: key.resource,
            src_index: key.src_index,
            dst_index: key.dst_index,
            src_stages: if src_stages.is_empty() {
                PipelineStages::TOP_OF_PIPE
            } else {
                src_stages
            },
            dst_stages,
            src_access,
            dst_access,
            layout,
            src_queue_family: queue_family,
            dst_queue_family: queue_family,
            hazard: Hazard::new(src_writes, dst_access.has_write()),
        }
    }

    pub fn key(&self) -> BarrierKey {
        BarrierKey {
            resource: self.resource,
            src_index: self.src_index,
            dst_index: self.dst_index,
        }
    }

    /// Unions another barrier with the same key into this one.
    pub(crate) fn merge(&mut self, other: &Barrier) {
        debug_assert_eq!(self.key(), other.key());
        self.src_stages |= other.src_stages;
        self.dst_stages |= other.dst_stages;
        self.src_access |= other.src_access;
        self.dst_access |= other.dst_access;
    }
}

/// Barriers collected for one recording point, emitted as a single
/// pipeline barrier command.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    buffers: HashMap<ResourceRef, NativeBufferBarrier>,
    images: HashMap<ResourceRef, NativeImageBarrier>,
    order: Vec<ResourceRef>,
    src_stages: PipelineStages,
    dst_stages: PipelineStages,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a barrier. Barriers on the same resource are merged.
    pub fn add(&mut self, barrier: &Barrier, resources: &ResourceManager) {
        // The tracker refuses to build transfer barriers; anything else is a bug.
        assert_eq!(
            barrier.src_queue_family, barrier.dst_queue_family,
            "queue family ownership transfer barriers are not supported"
        );
        self.src_stages |= barrier.src_stages;
        self.dst_stages |= barrier.dst_stages;

        match barrier.resource {
            ResourceRef::Buffer(id) => {
                let Some(entry) = resources.buffer(id) else {
                    log::warn!("Dropping barrier for released buffer {id:?}");
                    return;
                };
                let native = self.buffers.entry(barrier.resource).or_insert_with(|| {
                    NativeBufferBarrier {
                        buffer: entry.native,
                        src_access: AccessMask::empty(),
                        dst_access: AccessMask::empty(),
                        src_queue_family: barrier.src_queue_family,
                        dst_queue_family: barrier.dst_queue_family,
                    }
                });
                native.src_access |= barrier.src_access;
                native.dst_access |= barrier.dst_access;
            }
            ResourceRef::Image(id) => {
                let Some(entry) = resources.image(id) else {
                    log::warn!("Dropping barrier for released image {id:?}");
                    return;
                };
                let (old_layout, new_layout) = barrier
                    .layout
                    .unwrap_or((ImageLayout::General, ImageLayout::General));
                let native = self.images.entry(barrier.resource).or_insert_with(|| {
                    NativeImageBarrier {
                        image: entry.native,
                        src_access: AccessMask::empty(),
                        dst_access: AccessMask::empty(),
                        old_layout,
                        new_layout,
                        src_queue_family: barrier.src_queue_family,
                        dst_queue_family: barrier.dst_queue_family,
                    }
                });
                native.src_access |= barrier.src_access;
                native.dst_access |= barrier.dst_access;
                if barrier.layout.is_some() {
                    native.new_layout = new_layout;
                }
            }
        }
        if !self.order.contains(&barrier.resource) {
            self.order.push(barrier.resource);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Builds the native command and clears the batch.
    pub fn flush(&mut self) -> Option<PipelineBarrier> {
        if self.is_empty() {
            return None;
        }
        let mut command = PipelineBarrier {
            src_stages: self.src_stages,
            dst_stages: self.dst_stages,
            ..PipelineBarrier::default()
        };
        for resource in self.order.drain(..) {
            if let Some(buffer) = self.buffers.remove(&resource) {
                command.buffers.push(buffer);
            }
            if let Some(image) = self.images.remove(&resource) {
                command.images.push(image);
            }
        }
        self.src_stages = PipelineStages::empty();
        self.dst_stages = PipelineStages::empty();
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hazard_labels() {
        assert_eq!(Hazard::new(true, true).label(), "W--W");
        assert_eq!(Hazard::new(false, true).label(), "R--W");
        assert_eq!(Hazard::new(true, false).label(), "W--R");
        assert_eq!(Hazard::new(false, false).label(), "LAY");
    }
}
