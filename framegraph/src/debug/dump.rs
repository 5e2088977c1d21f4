//! Text and GraphViz dumps of a submitted frame.
//!
//! Every executed command buffer captures a [`DumpSubBatch`] while its
//! recording is still at hand. The scheduler groups them into
//! [`DumpBatch`]es as batches go to the device, so a dump always shows what
//! was actually submitted, including skipped sub-batches and the
//! cross-queue semaphores.

use std::fmt::Write;

use crate::graph::{ExeOrderIndex, LogicalRenderPass, ResourceRef, TaskGraph};
use crate::resources::ResourceManager;
use crate::scheduler::{BatchId, Semaphore};
use crate::tracker::{Barrier, Hazard};
use crate::types::{ImageLayout, QueueType};

use super::{hex_color, DebugContext, DebugFlags};

/// One recorded task.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpTask {
    pub order: ExeOrderIndex,
    pub name: String,
    pub kind: &'static str,
    pub color: [f32; 4],
    /// Resources the task touches, as `name: state`.
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DumpBarrier {
    pub resource: String,
    pub is_image: bool,
    pub src_index: ExeOrderIndex,
    pub dst_index: ExeOrderIndex,
    pub hazard: Hazard,
    pub layout: Option<(ImageLayout, ImageLayout)>,
}

impl DumpBarrier {
    fn node_name(&self, batch: usize, sub_batch: usize) -> String {
        let prefix = if self.is_image { "imgBar" } else { "bufBar" };
        format!(
            "{prefix}{batch}_{sub_batch}_{}_{:x}_{:x}",
            sanitize(&self.resource),
            self.src_index.0,
            self.dst_index.0
        )
    }

    fn label(&self) -> String {
        match self.layout {
            Some((old, new)) => format!("{}\\n{} > {}", self.hazard.label(), old.name(), new.name()),
            None => self.hazard.label().to_string(),
        }
    }
}

/// One command buffer as it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpSubBatch {
    pub index: u32,
    pub name: String,
    pub tasks: Vec<DumpTask>,
    pub barriers: Vec<DumpBarrier>,
    /// Dependency edges as `(dependency, dependent)` execution orders.
    pub edges: Vec<(ExeOrderIndex, ExeOrderIndex)>,
}

impl DumpSubBatch {
    /// Captures a compiled graph and the barriers recorded for it.
    pub(crate) fn capture(
        index: u32,
        name: &str,
        graph: &TaskGraph,
        passes: &[LogicalRenderPass],
        barriers: &[Barrier],
        resources: &ResourceManager,
        debug: &DebugContext,
    ) -> Self {
        let resource_name = |resource: ResourceRef| {
            resources
                .label(resource)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{resource:?}"))
        };

        let mut tasks: Vec<DumpTask> = graph
            .tasks()
            .iter()
            .map(|node| {
                let desc = node.desc();
                DumpTask {
                    order: node.exe_order(),
                    name: desc.name.clone(),
                    kind: desc.kind.name(),
                    color: debug.color_for(desc),
                    resources: if debug.flags.contains(DebugFlags::VIS_RESOURCES) {
                        desc.kind
                            .usages(passes)
                            .iter()
                            .map(|u| format!("{}: {:?}", resource_name(u.resource()), u.state()))
                            .collect()
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();
        tasks.sort_by_key(|t| t.order);

        let order = |handle| graph.task(handle).map(|t| t.exe_order()).unwrap_or_default();
        let mut edges: Vec<_> = graph
            .edges()
            .iter()
            .map(|&(dependent, dependency)| (order(dependency), order(dependent)))
            .collect();
        edges.sort();

        Self {
            index,
            name: name.to_string(),
            tasks,
            barriers: barriers
                .iter()
                .map(|b| DumpBarrier {
                    resource: resource_name(b.resource),
                    is_image: b.resource.is_image(),
                    src_index: b.src_index,
                    dst_index: b.dst_index,
                    hazard: b.hazard,
                    layout: b.layout,
                })
                .collect(),
            edges,
        }
    }
}

/// One submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpBatch {
    pub id: BatchId,
    pub name: String,
    pub queue: QueueType,
    pub sub_batches: Vec<DumpSubBatch>,
    /// Indices of sub-batches that were skipped.
    pub skipped: Vec<u32>,
    pub waits: Vec<Semaphore>,
    pub signals: Vec<Semaphore>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct FrameDump {
    pub frame_index: u64,
    pub batches: Vec<DumpBatch>,
}

impl FrameDump {
    pub(crate) fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            batches: Vec::new(),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn semaphore_list(semaphores: &[Semaphore]) -> String {
    let ids: Vec<String> = semaphores.iter().map(|s| format!("s{}", s.id())).collect();
    format!("[{}]", ids.join(", "))
}

/// Human readable listing of a frame.
pub(crate) fn write_text(dump: &FrameDump, flags: DebugFlags) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Frame {}", dump.frame_index);
    for batch in &dump.batches {
        let _ = writeln!(
            out,
            "Batch {} '{}' on {} waits {} signals {}",
            batch.id.0,
            batch.name,
            batch.queue,
            semaphore_list(&batch.waits),
            semaphore_list(&batch.signals)
        );
        for sub in &batch.sub_batches {
            let _ = writeln!(out, "  Sub-batch {} '{}'", sub.index, sub.name);
            for task in &sub.tasks {
                let _ = writeln!(out, "    [{}] {} '{}'", task.order, task.kind, task.name);
                if flags.contains(DebugFlags::VIS_RESOURCES) {
                    for resource in &task.resources {
                        let _ = writeln!(out, "        {resource}");
                    }
                }
            }
            if flags.contains(DebugFlags::VIS_BARRIERS) {
                for barrier in &sub.barriers {
                    let _ = write!(
                        out,
                        "    barrier {} {} -> {} {}",
                        barrier.resource,
                        barrier.src_index,
                        barrier.dst_index,
                        barrier.hazard.label()
                    );
                    if let Some((old, new)) = barrier.layout {
                        let _ = write!(out, " {} -> {}", old.name(), new.name());
                    }
                    out.push('\n');
                }
            }
        }
        for index in &batch.skipped {
            let _ = writeln!(out, "  Sub-batch {index} skipped");
        }
    }
    out
}

/// GraphViz description of a frame.
///
/// Batches and sub-batches become nested clusters, tasks become nodes and
/// barriers become small nodes on the edge between the two tasks they
/// separate. Dashed edges connect semaphore signals to their waits.
pub(crate) fn write_graphviz(dump: &FrameDump, flags: DebugFlags) -> String {
    let mut out = String::new();
    let mut deps = String::new();
    let _ = writeln!(out, "digraph Frame{} {{", dump.frame_index);
    out.push_str("\trankdir=LR;\n\tbgcolor=\"#121212\";\n");
    out.push_str("\tnode [shape=box, style=filled, fontcolor=\"#ffffff\"];\n");

    for (b, batch) in dump.batches.iter().enumerate() {
        let _ = writeln!(out, "\tsubgraph cluster_Batch{b} {{");
        let _ = writeln!(out, "\t\tstyle=filled;\n\t\tcolor=\"#202020\";\n\t\tfontcolor=\"#dcdcdc\";");
        let _ = writeln!(out, "\t\tlabel=\"{} ({})\";", escape(&batch.name), batch.queue);
        let _ = writeln!(out, "\t\tbatch{b} [shape=point, style=invis];");

        for (s, sub) in batch.sub_batches.iter().enumerate() {
            let _ = writeln!(out, "\t\tsubgraph cluster_SubBatch{b}_{s} {{");
            let _ = writeln!(out, "\t\t\tstyle=filled;\n\t\t\tcolor=\"#282828\";\n\t\t\tfontcolor=\"#dcdcdc\";");
            let _ = writeln!(out, "\t\t\tlabel=\"{} / {}\";", escape(&sub.name), sub.index);
            let node = |order: ExeOrderIndex| format!("n{b}_{s}_{:x}", order.0);

            for task in &sub.tasks {
                let mut label = escape(&task.name);
                if flags.contains(DebugFlags::VIS_RESOURCES) {
                    for resource in &task.resources {
                        label.push_str("\\n");
                        label.push_str(&escape(resource));
                    }
                }
                let _ = writeln!(
                    out,
                    "\t\t\t{} [label=\"{label}\", fillcolor=\"{}\"];",
                    node(task.order),
                    hex_color(task.color)
                );
            }

            let has_task = |order: ExeOrderIndex| sub.tasks.iter().any(|t| t.order == order);
            if flags.contains(DebugFlags::VIS_BARRIERS) {
                for barrier in &sub.barriers {
                    // Barriers from the command buffer start or to its end have
                    // only one task to attach to.
                    let name = barrier.node_name(b, s);
                    let label = if flags.contains(DebugFlags::VIS_BARRIER_LABELS) {
                        escape(&barrier.label())
                    } else {
                        String::new()
                    };
                    let _ = writeln!(
                        out,
                        "\t\t\t{name} [shape=diamond, width=.2, height=.2, fontsize=8, label=\"{label}\", fillcolor=\"#b03030\"];"
                    );
                    if has_task(barrier.src_index) {
                        let _ = writeln!(deps, "\t{} -> {name} [color=\"#b03030\"];", node(barrier.src_index));
                    }
                    if has_task(barrier.dst_index) {
                        let _ = writeln!(deps, "\t{name} -> {} [color=\"#b03030\"];", node(barrier.dst_index));
                    }
                }
            }
            for &(from, to) in &sub.edges {
                let _ = writeln!(deps, "\t{} -> {} [color=\"#808080\"];", node(from), node(to));
            }
            out.push_str("\t\t}\n");
        }
        out.push_str("\t}\n");
    }

    for (consumer, batch) in dump.batches.iter().enumerate() {
        for wait in &batch.waits {
            let producer = dump.batches.iter().position(|p| p.signals.contains(wait));
            if let Some(producer) = producer {
                let _ = writeln!(
                    deps,
                    "\tbatch{producer} -> batch{consumer} [style=dashed, color=\"#e0c040\", label=\"s{}\", ltail=cluster_Batch{producer}, lhead=cluster_Batch{consumer}];",
                    wait.id()
                );
            }
        }
    }

    out.push_str(&deps);
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_batch() -> DumpSubBatch {
        DumpSubBatch {
            index: 0,
            name: "upload".to_string(),
            tasks: vec![
                DumpTask {
                    order: ExeOrderIndex(1),
                    name: "write".to_string(),
                    kind: "UpdateBuffer",
                    color: [0.0, 0.0, 1.0, 1.0],
                    resources: vec!["staging: TransferDst".to_string()],
                },
                DumpTask {
                    order: ExeOrderIndex(2),
                    name: "copy".to_string(),
                    kind: "CopyBuffer",
                    color: [0.0, 1.0, 0.0, 1.0],
                    resources: Vec::new(),
                },
            ],
            barriers: vec![DumpBarrier {
                resource: "staging".to_string(),
                is_image: false,
                src_index: ExeOrderIndex(1),
                dst_index: ExeOrderIndex(2),
                hazard: Hazard::ReadAfterWrite,
                layout: None,
            }],
            edges: vec![(ExeOrderIndex(1), ExeOrderIndex(2))],
        }
    }

    fn dump() -> FrameDump {
        FrameDump {
            frame_index: 4,
            batches: vec![
                DumpBatch {
                    id: BatchId(0),
                    name: "transfer".to_string(),
                    queue: QueueType::AsyncTransfer,
                    sub_batches: vec![sub_batch()],
                    skipped: Vec::new(),
                    waits: Vec::new(),
                    signals: vec![Semaphore::new(11)],
                },
                DumpBatch {
                    id: BatchId(1),
                    name: "main".to_string(),
                    queue: QueueType::Graphics,
                    sub_batches: Vec::new(),
                    skipped: vec![0],
                    waits: vec![Semaphore::new(11)],
                    signals: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_text_dump() {
        let text = write_text(&dump(), DebugFlags::all());
        assert!(text.starts_with("Frame 4\n"));
        assert!(text.contains("Batch 0 'transfer'"));
        assert!(text.contains("signals [s11]"));
        assert!(text.contains("[1] UpdateBuffer 'write'"));
        assert!(text.contains("staging: TransferDst"));
        assert!(text.contains("barrier staging 1 -> 2 W--R"));
        assert!(text.contains("Sub-batch 0 skipped"));
    }

    #[test]
    fn test_text_dump_without_barriers() {
        let text = write_text(&dump(), DebugFlags::empty());
        assert!(!text.contains("barrier"));
        assert!(!text.contains("TransferDst"));
    }

    #[test]
    fn test_graphviz_dump() {
        let dot = write_graphviz(&dump(), DebugFlags::all());
        assert!(dot.starts_with("digraph Frame4 {"));
        assert!(dot.contains("subgraph cluster_Batch0"));
        assert!(dot.contains("subgraph cluster_SubBatch0_0"));
        assert!(dot.contains("n0_0_1 [label=\"write\\nstaging: TransferDst\", fillcolor=\"#0000ff\"]"));
        assert!(dot.contains("n0_0_1 -> bufBar0_0_staging_1_2"));
        assert!(dot.contains("bufBar0_0_staging_1_2 -> n0_0_2"));
        assert!(dot.contains("label=\"W--R\""));
        assert!(dot.contains("n0_0_1 -> n0_0_2"));
        assert!(dot.contains("batch0 -> batch1 [style=dashed"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_graphviz_escapes_names() {
        let mut frame = dump();
        frame.batches[0].sub_batches[0].tasks[0].name = "say \"hi\"".to_string();
        let dot = write_graphviz(&frame, DebugFlags::VIS_BARRIERS);
        assert!(dot.contains("label=\"say \\\"hi\\\"\""));
        assert!(!dot.contains("W--R"));
    }
}
