//! Error types for the frame graph.

use crate::instance::FrameGraphState;

/// Errors reported by the frame graph.
///
/// Validation failures leave the graph untouched and can be fixed by the
/// caller. [`Timeout`](Self::Timeout) is transient, while
/// [`DeviceLost`](Self::DeviceLost) is terminal for the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Adding the dependency would close a cycle in the task graph.
    #[error("task graph contains a cyclic dependency")]
    CyclicDependency,

    /// A referenced task handle does not exist in this graph.
    #[error("unknown dependency handle {0}")]
    UnknownDependency(u32),

    /// The execution order was requested before a successful compile.
    #[error("task graph has not been compiled")]
    NotCompiled,

    /// `end_frame` was called before every declared sub-batch was submitted or skipped.
    #[error("frame is incomplete: {pending} sub-batch(es) not submitted")]
    IncompleteFrame { pending: usize },

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid frame graph state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: FrameGraphState,
        actual: FrameGraphState,
    },

    /// A fence wait did not complete in time.
    #[error("timed out waiting for the device")]
    Timeout,

    /// The device reported an unrecoverable loss.
    #[error("device lost")]
    DeviceLost,

    /// The sub-batch was already submitted or skipped this frame.
    #[error("sub-batch {index} of batch {batch} was already submitted")]
    AlreadySubmitted { batch: u32, index: u32 },

    /// The batch has not been handed to the device yet.
    #[error("batch {0} has not been submitted to the device")]
    NotSubmitted(u32),

    /// Worker thread handles are still alive.
    #[error("{0} worker thread(s) are still alive")]
    ThreadsAlive(usize),

    /// A descriptor failed validation.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

impl GraphError {
    /// Returns true if the same call may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::IncompleteFrame { .. })
    }
}

/// Result alias used throughout the crate.
pub type GraphResult<T> = Result<T, GraphError>;
