//! Command buffer compilation.
//!
//! Compilation happens in two steps:
//!
//! 1. **Ordering** - [`sort_into`] turns the task graph into a stable
//!    topological order. Independent tasks keep their insertion order, so the
//!    same graph always compiles to the same order.
//! 2. **Recording** - [`record`] walks that order, asks the
//!    [`ResourceTracker`](crate::tracker::ResourceTracker) for barriers and
//!    writes native commands into a [`CommandList`](crate::device::CommandList).
//!    Consecutive mergeable render passes become one native pass with several
//!    subpasses.

mod record;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub use record::CompileStats;
pub(crate) use record::{record, PendingReadback, RecordContext, Recording};

use crate::error::{GraphError, GraphResult};
use crate::graph::TaskHandle;

/// Sorts tasks topologically into `order`, reusing its allocation.
///
/// `outputs[i]` lists the tasks that depend on task `i`; `edges` holds the
/// same edges as `(dependent, dependency)` pairs. Ready tasks are taken
/// lowest handle first.
pub(crate) fn sort_into(
    outputs: &[&[TaskHandle]],
    edges: &[(TaskHandle, TaskHandle)],
    order: &mut Vec<TaskHandle>,
) -> GraphResult<()> {
    let n = outputs.len();
    order.clear();
    if n == 0 {
        return Ok(());
    }

    // Kahn's algorithm with a min-heap instead of a FIFO queue.
    let mut in_degree = vec![0u32; n];
    for &(dependent, _dependency) in edges {
        in_degree[dependent.index()] += 1;
    }

    let mut ready: BinaryHeap<Reverse<TaskHandle>> = (0..n as u32)
        .map(TaskHandle::new)
        .filter(|h| in_degree[h.index()] == 0)
        .map(Reverse)
        .collect();

    while let Some(Reverse(handle)) = ready.pop() {
        order.push(handle);
        for &dependent in outputs[handle.index()] {
            in_degree[dependent.index()] -= 1;
            if in_degree[dependent.index()] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != n {
        order.clear();
        return Err(GraphError::CyclicDependency);
    }
    Ok(())
}
