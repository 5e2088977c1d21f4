//! # RedLilium Frame Graph
//!
//! Multi-queue GPU frame graph execution engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - Lifecycle, frames in flight and cross-queue submission
//! - [`FrameGraphThread`] - Per-worker handle that starts command buffers
//! - [`CommandBuffer`] - Task graph of one sub-batch, compiled with barriers
//! - [`GpuDevice`] - Trait the graphics backend implements
//! - [`DummyDevice`] - Host-memory device used for testing
//!
//! Work for a frame is declared up front as a [`SubmissionGraphDesc`]: a set
//! of batches, each bound to a queue and split into sub-batches that worker
//! threads record concurrently. A batch is handed to its queue once all of
//! its sub-batches are in and the batches it depends on have been submitted;
//! dependencies across queues are satisfied with semaphores.
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_framegraph::*;
//!
//! let graph = FrameGraph::new(Arc::new(DummyDevice::new()), FrameGraphConfig::default())?;
//! graph.initialize(2)?;
//! let thread = graph.create_thread(ThreadDesc::new("main"))?;
//!
//! let desc = SubmissionGraphDesc::new()
//!     .with_batch(BatchDesc::new(0, "upload", QueueType::AsyncTransfer))
//!     .with_batch(BatchDesc::new(1, "draw", QueueType::Graphics).with_dependency(0));
//! graph.begin_frame(&desc)?;
//! let mut upload = thread.begin(CommandBufferDesc::new("upload", 0, 0), &[])?;
//! upload.add_task(TaskDesc::update_buffer(buffer, 0, data), &[])?;
//! let uploaded = upload.execute()?;
//! // ...
//! graph.end_frame()?;
//! ```

pub mod compiler;
pub mod config;
pub mod debug;
pub mod device;
pub mod error;
pub mod graph;
pub mod instance;
mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod stats;
pub mod tracker;
pub mod types;

// Re-export main types for convenience
pub use compiler::CompileStats;
pub use config::{DebugFlags, FrameGraphConfig};
pub use device::{CommandList, CompletionMode, DummyDevice, GpuDevice, NativeCommand, Submission};
pub use error::{GraphError, GraphResult};
pub use graph::{
    BufferCopy, BufferImageCopy, ColorTarget, DepthTarget, DrawTask, ExeOrderIndex, ImageCopy,
    LoadOp, RenderPassDesc, RenderPassHandle, StoreOp, TaskDesc, TaskGraph, TaskHandle,
};
pub use instance::{
    CommandBuffer, CommandBufferDesc, FrameGraph, FrameGraphState, FrameGraphThread, ThreadDesc,
};
pub use resources::{BufferId, ImageId};
pub use scheduler::{BatchDesc, BatchHandle, BatchId, ExternalCmdBatch, Fence, Semaphore, SubmissionGraphDesc};
pub use stats::{FrameStatistics, QueueStatistics};
pub use tracker::{Barrier, Hazard};
pub use types::{
    BufferDesc, BufferRange, BufferUsage, ImageDesc, ImageFormat, ImageLayout, ImageUsage,
    PipelineStages, QueueType, QueueUsage, Rect, ResourceState, ShaderStages,
};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
