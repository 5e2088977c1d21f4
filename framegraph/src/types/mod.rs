//! Core type definitions shared across the frame graph.
//!
//! This module contains queue descriptions, resource descriptors and the
//! synchronization vocabulary (pipeline stages, access masks, image layouts
//! and logical resource states) used by the tracker and the device layer.

mod queue;
mod resource;
mod state;

pub use queue::{QueueFamily, QueueInfo, QueueType, QueueUsage};
pub use resource::{
    BufferDesc, BufferRange, BufferUsage, ImageDesc, ImageFormat, ImageRange, ImageUsage, Rect,
};
pub use state::{AccessInfo, AccessMask, ImageLayout, PipelineStages, ResourceState, ShaderStages};

/// Formats the set flag names of a bitflags value as `A | B`.
///
/// Used by the text and GraphViz dumps.
pub(crate) fn flag_names<B: bitflags::Flags>(flags: B) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "NONE".to_string()
    } else {
        names.join(" | ")
    }
}
