//! Debug naming, colors and frame dumps.
//!
//! Everything debug related flows through an explicit [`DebugContext`]
//! value: labels recorded into command lists take their colors from it and
//! the dump functions read its [`DebugFlags`].

mod dump;

use bitflags::bitflags;

pub(crate) use dump::{FrameDump, write_graphviz, write_text};
pub use dump::{DumpBarrier, DumpBatch, DumpSubBatch, DumpTask};

use crate::graph::{TaskDesc, TaskKind};

bitflags! {
    /// What the frame dumps visualize.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u32 {
        /// List the resources each task touches.
        const VIS_RESOURCES = 1 << 0;
        /// Draw barrier nodes between tasks.
        const VIS_BARRIERS = 1 << 1;
        /// Label barrier edges with their hazard and layouts.
        const VIS_BARRIER_LABELS = 1 << 2;
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        Self::VIS_BARRIERS
    }
}

/// Colors per task kind, RGBA in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugPalette {
    pub marker: [f32; 4],
    pub transfer: [f32; 4],
    pub readback: [f32; 4],
    pub clear: [f32; 4],
    pub render_pass: [f32; 4],
}

impl Default for DebugPalette {
    fn default() -> Self {
        Self {
            marker: [0.6, 0.6, 0.6, 1.0],
            transfer: [0.3, 0.5, 0.9, 1.0],
            readback: [0.6, 0.3, 0.8, 1.0],
            clear: [0.95, 0.6, 0.2, 1.0],
            render_pass: [0.3, 0.8, 0.4, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DebugContext {
    pub flags: DebugFlags,
    pub palette: DebugPalette,
}

impl DebugContext {
    pub fn new(flags: DebugFlags) -> Self {
        Self {
            flags,
            palette: DebugPalette::default(),
        }
    }

    /// The task's own color, or the palette color of its kind.
    pub fn color_for(&self, desc: &TaskDesc) -> [f32; 4] {
        desc.color.unwrap_or(match desc.kind {
            TaskKind::Marker => self.palette.marker,
            TaskKind::ReadBuffer { .. } => self.palette.readback,
            TaskKind::FillBuffer { .. } | TaskKind::ClearColorImage { .. } => self.palette.clear,
            TaskKind::SubmitRenderPass { .. } => self.palette.render_pass,
            TaskKind::UpdateBuffer { .. }
            | TaskKind::CopyBuffer { .. }
            | TaskKind::CopyImage { .. }
            | TaskKind::CopyBufferToImage { .. }
            | TaskKind::CopyImageToBuffer { .. } => self.palette.transfer,
        })
    }
}

/// Formats a color as a GraphViz `#rrggbb` string.
pub(crate) fn hex_color(color: [f32; 4]) -> String {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(color[0]),
        channel(color[1]),
        channel(color[2])
    )
}
