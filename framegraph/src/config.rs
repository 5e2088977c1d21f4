//! Frame graph configuration.

use std::time::Duration;

pub use crate::debug::DebugFlags;
use crate::types::QueueUsage;

/// Configuration for a [`FrameGraph`](crate::FrameGraph).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameGraphConfig {
    /// Queue types the frame graph may use. Types the device lacks run on
    /// the graphics queue.
    pub queue_usage: QueueUsage,
    /// What the frame dumps show.
    pub debug_flags: DebugFlags,
    /// Upper bound on submission passes per flush.
    pub flush_max_iterations: usize,
    /// How long blocking calls wait for the device.
    pub fence_timeout: Duration,
}

impl FrameGraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue types to use.
    pub fn with_queue_usage(mut self, queue_usage: QueueUsage) -> Self {
        self.queue_usage = queue_usage;
        self
    }

    /// Set the debug dump flags.
    pub fn with_debug_flags(mut self, debug_flags: DebugFlags) -> Self {
        self.debug_flags = debug_flags;
        self
    }

    pub fn with_flush_max_iterations(mut self, iterations: usize) -> Self {
        self.flush_max_iterations = iterations;
        self
    }

    /// Set the timeout of `begin_frame`, `wait_idle` and `deinitialize`.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            queue_usage: QueueUsage::all(),
            debug_flags: DebugFlags::default(),
            flush_max_iterations: 16,
            fence_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameGraphConfig::default();
        assert_eq!(config.flush_max_iterations, 16);
        assert_eq!(config.fence_timeout, Duration::from_secs(5));
        assert!(config.queue_usage.contains(QueueUsage::ASYNC_TRANSFER));
        assert_eq!(config.debug_flags, DebugFlags::VIS_BARRIERS);
    }

    #[test]
    fn test_builder() {
        let config = FrameGraphConfig::new()
            .with_queue_usage(QueueUsage::GRAPHICS)
            .with_debug_flags(DebugFlags::all())
            .with_flush_max_iterations(4)
            .with_fence_timeout(Duration::from_millis(20));
        assert_eq!(config.queue_usage, QueueUsage::GRAPHICS);
        assert_eq!(config.flush_max_iterations, 4);
        assert_eq!(config.fence_timeout, Duration::from_millis(20));
    }
}
