//! Resource state tracking and barrier synthesis.
//!
//! The tracker follows every resource along the execution-order timeline of
//! one command buffer. Each use is compared with the previous ones and a
//! [`Barrier`] is synthesized only when the two accesses conflict:
//!
//! | Previous | Next | Barrier |
//! |----------|------|---------|
//! | read | read, same layout | none |
//! | write | read | once per producer for each new reader stage |
//! | read(s) | write | from the last reader, stages of all readers |
//! | write | write | always |
//! | any | layout change | always, with a layout transition |
//!
//! Every resource starts in its default state at [`ExeOrderIndex::INITIAL`]
//! and [`finalize`](ResourceTracker::finalize) returns it there at
//! [`ExeOrderIndex::FINAL`]. Command buffers on one queue share no semaphore,
//! so the final barrier is what orders them. A buffer whose default state is
//! `Undefined` is released to every later command on the queue.

mod barrier;

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

pub use barrier::{Barrier, BarrierBatch, BarrierKey, Hazard};

use crate::error::{GraphError, GraphResult};
use crate::graph::{ExeOrderIndex, ResourceRef, ResourceUsage};
use crate::resources::{ResourceManager, TrackedResource};
use crate::types::{
    AccessInfo, AccessMask, ImageLayout, PipelineStages, QueueFamily, ResourceState,
};

#[derive(Debug, Clone, Copy)]
struct Use {
    index: ExeOrderIndex,
    stages: PipelineStages,
    access: AccessMask,
}

#[derive(Debug)]
struct Timeline {
    info: TrackedResource,
    is_image: bool,
    layout: ImageLayout,
    last_write: Option<Use>,
    /// Union of reads since `last_write`; `index` is the latest reader.
    readers: Option<Use>,
    /// Reader stages and accesses already synchronized with `last_write`.
    synced_stages: PipelineStages,
    synced_access: AccessMask,
}

impl Timeline {
    fn new(info: TrackedResource, is_image: bool) -> Self {
        let default = info.default;
        let initial = Use {
            index: ExeOrderIndex::INITIAL,
            stages: default.stages,
            access: default.access,
        };
        let (last_write, readers) = if default.is_write() {
            (Some(initial), None)
        } else if !default.access.is_empty() {
            (None, Some(initial))
        } else {
            (None, None)
        };
        Self {
            info,
            is_image,
            layout: if is_image {
                default.layout
            } else {
                ImageLayout::Undefined
            },
            last_write,
            readers,
            synced_stages: PipelineStages::empty(),
            synced_access: AccessMask::empty(),
        }
    }

    /// Returns true if the command buffer left the resource outside `target`.
    fn needs_release(&self, target: AccessInfo) -> bool {
        let wrote = self
            .last_write
            .is_some_and(|w| w.index != ExeOrderIndex::INITIAL);
        if wrote || target.is_write() {
            return true;
        }
        self.readers.is_some_and(|r| {
            !target.stages.contains(r.stages) || !target.access.contains(r.access)
        })
    }

    /// Source half of a barrier that orders a new access after everything so far.
    fn src_for_write(&self) -> Option<(ExeOrderIndex, (PipelineStages, AccessMask, bool))> {
        if let Some(readers) = self.readers {
            // Execution dependency only; reads have nothing to make available.
            Some((readers.index, (readers.stages, AccessMask::empty(), false)))
        } else {
            self.last_write
                .map(|w| (w.index, (w.stages, w.access, w.access.has_write())))
        }
    }
}

/// Tracks resource states for one command buffer recorded on one queue family.
#[derive(Debug)]
pub struct ResourceTracker {
    family: QueueFamily,
    timelines: BTreeMap<ResourceRef, Timeline>,
    barriers: Vec<Barrier>,
    lookup: HashMap<BarrierKey, usize>,
}

impl ResourceTracker {
    pub fn new(family: QueueFamily) -> Self {
        Self {
            family,
            timelines: BTreeMap::new(),
            barriers: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Records the usages of the task at `index`.
    ///
    /// Returns the range of [`barriers`](Self::barriers) that must execute
    /// before the task.
    ///
    /// # Panics
    ///
    /// Panics if a resource exclusively owned by another queue family is
    /// used; ownership transfer barriers are not supported.
    pub fn track(
        &mut self,
        index: ExeOrderIndex,
        usages: &[ResourceUsage],
        resources: &ResourceManager,
    ) -> GraphResult<Range<usize>> {
        let start = self.barriers.len();
        for (resource, access) in merge_usages(usages) {
            let info = resources.tracked(resource).ok_or_else(|| {
                GraphError::InvalidDescriptor(format!("task uses released resource {resource:?}"))
            })?;
            if let Some(owner) = info.owner {
                assert_eq!(
                    owner, self.family,
                    "{resource:?} is owned by {owner} but used on {}; \
                     queue family ownership transfer is not supported",
                    self.family
                );
            }
            self.track_one(resource, info, index, access);
        }
        Ok(start..self.barriers.len())
    }

    fn track_one(
        &mut self,
        resource: ResourceRef,
        info: TrackedResource,
        index: ExeOrderIndex,
        access: AccessInfo,
    ) {
        let timeline = self
            .timelines
            .entry(resource)
            .or_insert_with(|| Timeline::new(info, resource.is_image()));
        let layout_change = timeline.is_image && access.layout != timeline.layout;
        let layout = layout_change.then_some((timeline.layout, access.layout));
        let dst = (access.stages, access.access);
        let mut emitted = None;

        if access.is_write() || layout_change {
            emitted = timeline.src_for_write().or_else(|| {
                // First use of an image with undefined contents.
                layout_change.then_some((
                    ExeOrderIndex::INITIAL,
                    (PipelineStages::TOP_OF_PIPE, AccessMask::empty(), false),
                ))
            });
            if timeline.is_image {
                timeline.layout = access.layout;
            }
            if access.is_write() {
                timeline.last_write = Some(Use {
                    index,
                    stages: access.stages,
                    access: access.access,
                });
                timeline.readers = None;
                timeline.synced_stages = PipelineStages::empty();
                timeline.synced_access = AccessMask::empty();
            } else {
                // A layout transition behaves like a write for later readers.
                timeline.last_write = Some(Use {
                    index,
                    stages: access.stages,
                    access: AccessMask::empty(),
                });
                timeline.readers = Some(Use {
                    index,
                    stages: access.stages,
                    access: access.access,
                });
                timeline.synced_stages = access.stages;
                timeline.synced_access = access.access;
            }
        } else {
            if let Some(write) = timeline.last_write {
                let missing_stages = access.stages.difference(timeline.synced_stages);
                let missing_access = access.access.difference(timeline.synced_access);
                if !missing_stages.is_empty() || !missing_access.is_empty() {
                    emitted = Some((
                        write.index,
                        (write.stages, write.access, write.access.has_write()),
                    ));
                    timeline.synced_stages |= access.stages;
                    timeline.synced_access |= access.access;
                }
            }
            timeline.readers = Some(match timeline.readers {
                Some(readers) => Use {
                    index,
                    stages: readers.stages | access.stages,
                    access: readers.access | access.access,
                },
                None => Use {
                    index,
                    stages: access.stages,
                    access: access.access,
                },
            });
        }

        if let Some((src_index, src)) = emitted {
            let key = BarrierKey {
                resource,
                src_index,
                dst_index: index,
            };
            self.push(Barrier::new(key, src, dst, layout, info.owner));
        }
    }

    fn push(&mut self, barrier: Barrier) {
        match self.lookup.get(&barrier.key()) {
            Some(&existing) => self.barriers[existing].merge(&barrier),
            None => {
                self.lookup.insert(barrier.key(), self.barriers.len());
                self.barriers.push(barrier);
            }
        }
    }

    /// Returns every resource to its default state.
    ///
    /// Images change back to their default layout, unless that layout is
    /// `Undefined`. Buffers get a barrier whenever their last use is not
    /// already covered by the default state.
    ///
    /// Returns the range of barriers to record at the end of the command buffer.
    pub fn finalize(&mut self) -> Range<usize> {
        let start = self.barriers.len();
        let mut pending = Vec::new();
        for (&resource, timeline) in &self.timelines {
            let (target, layout) = if timeline.is_image {
                let default = timeline.info.default;
                if default.layout == ImageLayout::Undefined || timeline.layout == default.layout
                {
                    continue;
                }
                (default, Some((timeline.layout, default.layout)))
            } else {
                let target = buffer_release_state(timeline.info.default);
                if !timeline.needs_release(target) {
                    continue;
                }
                (target, None)
            };
            let Some((src_index, src)) = timeline.src_for_write() else {
                continue;
            };
            if src_index == ExeOrderIndex::INITIAL {
                continue;
            }
            let key = BarrierKey {
                resource,
                src_index,
                dst_index: ExeOrderIndex::FINAL,
            };
            pending.push(Barrier::new(
                key,
                src,
                (target.stages, target.access),
                layout,
                timeline.info.owner,
            ));
        }
        for barrier in pending {
            self.push(barrier);
        }
        start..self.barriers.len()
    }

    /// Every barrier synthesized so far, in emission order.
    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    /// Barriers of one resource, ordered by execution index.
    pub fn barriers_of(&self, resource: ResourceRef) -> Vec<&Barrier> {
        let mut out: Vec<_> = self
            .barriers
            .iter()
            .filter(|b| b.resource == resource)
            .collect();
        out.sort_by_key(|b| (b.src_index, b.dst_index));
        out
    }

    pub fn find(&self, key: &BarrierKey) -> Option<&Barrier> {
        self.lookup.get(key).map(|&i| &self.barriers[i])
    }

    pub fn into_barriers(self) -> Vec<Barrier> {
        self.barriers
    }
}

/// State a buffer is left in at the end of a command buffer.
fn buffer_release_state(default: AccessInfo) -> AccessInfo {
    if default.access.is_empty() {
        AccessInfo::from(ResourceState::General)
    } else {
        default
    }
}

/// Collapses several usages of one resource inside a task, keeping first-use order.
fn merge_usages(usages: &[ResourceUsage]) -> Vec<(ResourceRef, AccessInfo)> {
    let mut merged: Vec<(ResourceRef, AccessInfo)> = Vec::with_capacity(usages.len());
    for usage in usages {
        let resource = usage.resource();
        let access = AccessInfo::from(usage.state());
        match merged.iter_mut().find(|(r, _)| *r == resource) {
            Some((_, existing)) => *existing = existing.merge(access),
            None => merged.push((resource, access)),
        }
    }
    merged
}
