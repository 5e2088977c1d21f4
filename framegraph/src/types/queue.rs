use std::fmt;

use bitflags::bitflags;

/// Kind of hardware queue a batch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    /// Graphics queue; also supports compute and transfer.
    #[default]
    Graphics,
    /// Dedicated compute queue running alongside graphics.
    AsyncCompute,
    /// Dedicated transfer (DMA) queue.
    AsyncTransfer,
}

impl QueueType {
    /// All queue types in priority order.
    pub const ALL: [QueueType; 3] = [
        QueueType::Graphics,
        QueueType::AsyncCompute,
        QueueType::AsyncTransfer,
    ];

    /// The [`QueueUsage`] bit enabling this queue type.
    pub fn usage(self) -> QueueUsage {
        match self {
            Self::Graphics => QueueUsage::GRAPHICS,
            Self::AsyncCompute => QueueUsage::ASYNC_COMPUTE,
            Self::AsyncTransfer => QueueUsage::ASYNC_TRANSFER,
        }
    }

    /// Short name used in logs and dumps.
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "Graphics",
            Self::AsyncCompute => "AsyncCompute",
            Self::AsyncTransfer => "AsyncTransfer",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of queue types the frame graph is allowed to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueUsage: u32 {
        const GRAPHICS = 1 << 0;
        const ASYNC_COMPUTE = 1 << 1;
        const ASYNC_TRANSFER = 1 << 2;
    }
}

impl Default for QueueUsage {
    fn default() -> Self {
        Self::all()
    }
}

/// Hardware queue family index.
///
/// Exclusively owned resources may only be used by queues of their owning family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueFamily(pub u32);

impl fmt::Display for QueueFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "family {}", self.0)
    }
}

/// A queue exposed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue_type: QueueType,
    pub family: QueueFamily,
}

impl QueueInfo {
    pub fn new(queue_type: QueueType, family: u32) -> Self {
        Self {
            queue_type,
            family: QueueFamily(family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_usage_default_is_all() {
        let usage = QueueUsage::default();
        for queue in QueueType::ALL {
            assert!(usage.contains(queue.usage()));
        }
    }

    #[test]
    fn test_queue_type_display() {
        assert_eq!(QueueType::AsyncCompute.to_string(), "AsyncCompute");
        assert_eq!(QueueFamily(2).to_string(), "family 2");
    }
}
