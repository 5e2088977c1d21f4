//! Task graph construction.
//!
//! A [`TaskGraph`] accumulates the tasks recorded into one command buffer
//! together with their explicit dependency edges. Compiling the graph assigns
//! every task a unique [`ExeOrderIndex`]; that index is the timeline the
//! resource tracker uses to place barriers.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Instance | [`FrameGraph`](crate::instance::FrameGraph) | Lifecycle, frames in flight |
//! | Recording | [`CommandBuffer`](crate::instance::CommandBuffer) | One sub-batch of work |
//! | **Graph** | [`TaskGraph`] | Task dependencies (this module) |
//! | Task | [`TaskDesc`] | Single GPU operation |
//!
//! # Example
//!
//! ```ignore
//! let mut graph = TaskGraph::new();
//! let upload = graph.add_task(TaskDesc::update_buffer(src, 0, data), &[])?;
//! let copy = graph.add_task(TaskDesc::copy_buffer(src, dst, regions), &[upload])?;
//! graph.compile()?;
//! assert_eq!(graph.execution_order()?, &[upload, copy]);
//! ```

mod render_pass;
mod task;
mod usage;

use std::fmt;

pub use render_pass::{
    ColorTarget, DepthTarget, DrawCall, DrawTask, LoadOp, LogicalRenderPass, RenderPassDesc,
    RenderPassHandle, StoreOp,
};
pub use task::{BufferCopy, BufferImageCopy, ImageCopy, ReadbackCallback, TaskDesc, TaskKind};
pub use usage::{BufferAccess, ImageAccess, ResourceRef, ResourceUsage};

use crate::compiler;
use crate::error::{GraphError, GraphResult};

/// Handle to a task in a [`TaskGraph`].
///
/// Only valid within the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u32);

impl TaskHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Insertion index of the task.
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Position of a task on the command buffer timeline.
///
/// [`INITIAL`](Self::INITIAL) stands for the state resources are in when the
/// command buffer starts and [`FINAL`](Self::FINAL) for the transitions back
/// to their default state when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExeOrderIndex(pub u32);

impl ExeOrderIndex {
    pub const INITIAL: Self = Self(0);
    pub const FIRST: Self = Self(1);
    pub const FINAL: Self = Self(u32::MAX);

    pub(crate) fn from_position(position: usize) -> Self {
        Self(Self::FIRST.0 + position as u32)
    }

    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }

    pub fn is_final(self) -> bool {
        self == Self::FINAL
    }
}

impl fmt::Display for ExeOrderIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INITIAL => f.write_str("INITIAL"),
            Self::FINAL => f.write_str("FINAL"),
            Self(index) => write!(f, "{index}"),
        }
    }
}

/// A task and its graph bookkeeping.
#[derive(Debug)]
pub struct TaskNode {
    desc: TaskDesc,
    /// Tasks that depend on this one.
    outputs: Vec<TaskHandle>,
    exe_order: ExeOrderIndex,
}

impl TaskNode {
    pub fn desc(&self) -> &TaskDesc {
        &self.desc
    }

    pub fn outputs(&self) -> &[TaskHandle] {
        &self.outputs
    }

    /// Execution order index; `INITIAL` until the graph is compiled.
    pub fn exe_order(&self) -> ExeOrderIndex {
        self.exe_order
    }
}

/// Dependency graph of the tasks in one command buffer.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<TaskNode>,
    /// Edges stored as `(dependent, dependency)`.
    edges: Vec<(TaskHandle, TaskHandle)>,
    order: Vec<TaskHandle>,
    compiled: bool,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task that runs after every task in `dependencies`.
    ///
    /// Fails with [`GraphError::UnknownDependency`] if a dependency handle is
    /// not part of this graph; the graph is left unchanged.
    pub fn add_task(
        &mut self,
        desc: TaskDesc,
        dependencies: &[TaskHandle],
    ) -> GraphResult<TaskHandle> {
        if let Some(unknown) = dependencies.iter().find(|d| d.index() >= self.tasks.len()) {
            return Err(GraphError::UnknownDependency(unknown.id()));
        }

        let handle = TaskHandle::new(self.tasks.len() as u32);
        self.tasks.push(TaskNode {
            desc,
            outputs: Vec::new(),
            exe_order: ExeOrderIndex::INITIAL,
        });
        for &dependency in dependencies {
            self.insert_edge(handle, dependency);
        }
        self.compiled = false;
        Ok(handle)
    }

    /// Adds an explicit edge: `dependent` runs after `dependency`.
    ///
    /// Duplicate edges are ignored. Fails with
    /// [`GraphError::CyclicDependency`] if the edge would close a cycle.
    pub fn add_dependency(
        &mut self,
        dependent: TaskHandle,
        dependency: TaskHandle,
    ) -> GraphResult<()> {
        for handle in [dependent, dependency] {
            if handle.index() >= self.tasks.len() {
                return Err(GraphError::UnknownDependency(handle.id()));
            }
        }
        if dependent == dependency || self.reaches(dependent, dependency) {
            return Err(GraphError::CyclicDependency);
        }
        if self.insert_edge(dependent, dependency) {
            self.compiled = false;
        }
        Ok(())
    }

    /// Records the edge unless it already exists. Returns true if it was new.
    fn insert_edge(&mut self, dependent: TaskHandle, dependency: TaskHandle) -> bool {
        if self.edges.contains(&(dependent, dependency)) {
            return false;
        }
        self.edges.push((dependent, dependency));
        self.tasks[dependency.index()].outputs.push(dependent);
        true
    }

    /// Returns true if `to` can be reached from `from` by following outputs.
    fn reaches(&self, from: TaskHandle, to: TaskHandle) -> bool {
        let mut visited = vec![false; self.tasks.len()];
        let mut stack = vec![from];
        while let Some(handle) = stack.pop() {
            if handle == to {
                return true;
            }
            if std::mem::replace(&mut visited[handle.index()], true) {
                continue;
            }
            stack.extend_from_slice(&self.tasks[handle.index()].outputs);
        }
        false
    }

    /// Assigns execution order indices.
    ///
    /// Calling this again without adding tasks or edges is a no-op, so the
    /// resulting order is identical.
    pub fn compile(&mut self) -> GraphResult<()> {
        if self.compiled {
            return Ok(());
        }
        let outputs: Vec<&[TaskHandle]> = self.tasks.iter().map(|t| t.outputs()).collect();
        compiler::sort_into(&outputs, &self.edges, &mut self.order)?;

        for (position, handle) in self.order.iter().enumerate() {
            self.tasks[handle.index()].exe_order = ExeOrderIndex::from_position(position);
        }
        self.compiled = true;
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Tasks in execution order.
    pub fn execution_order(&self) -> GraphResult<&[TaskHandle]> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }
        Ok(&self.order)
    }

    /// Execution order index of one task.
    pub fn exe_order(&self, handle: TaskHandle) -> GraphResult<ExeOrderIndex> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }
        self.tasks
            .get(handle.index())
            .map(|t| t.exe_order)
            .ok_or(GraphError::UnknownDependency(handle.id()))
    }

    pub fn task(&self, handle: TaskHandle) -> Option<&TaskNode> {
        self.tasks.get(handle.index())
    }

    pub(crate) fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut TaskNode> {
        self.tasks.get_mut(handle.index())
    }

    pub fn tasks(&self) -> &[TaskNode] {
        &self.tasks
    }

    /// Dependency edges as `(dependent, dependency)` pairs.
    pub fn edges(&self) -> &[(TaskHandle, TaskHandle)] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Takes the readback callback of a `ReadBuffer` task.
    pub(crate) fn take_readback(&mut self, handle: TaskHandle) -> Option<ReadbackCallback> {
        match &mut self.task_mut(handle)?.desc.kind {
            TaskKind::ReadBuffer { callback, .. } => callback.take(),
            _ => None,
        }
    }

    /// Puts back a callback taken by a recording that was thrown away.
    pub(crate) fn restore_readback(&mut self, handle: TaskHandle, readback: ReadbackCallback) {
        if let Some(TaskKind::ReadBuffer { callback, .. }) =
            self.task_mut(handle).map(|t| &mut t.desc.kind)
        {
            *callback = Some(readback);
        }
    }
}
