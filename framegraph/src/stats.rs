//! Per-frame statistics.

use crate::compiler::CompileStats;
use crate::types::QueueType;

/// Work submitted to one queue during a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatistics {
    pub queue_type: QueueType,
    pub submitted_batches: usize,
    pub command_lists: usize,
    pub tasks: usize,
    /// Share of the frame's tasks recorded on this queue, `0.0..=1.0`.
    pub utilization: f32,
}

/// Counters of the most recently completed frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameStatistics {
    pub frame_index: u64,
    pub tasks: usize,
    pub barriers: usize,
    pub submitted_batches: usize,
    pub skipped_sub_batches: usize,
    pub render_passes: usize,
    pub subpasses: usize,
    pub draw_calls: usize,
    pub queues: Vec<QueueStatistics>,
}

impl FrameStatistics {
    pub(crate) fn new(frame_index: u64, queues: impl IntoIterator<Item = QueueType>) -> Self {
        Self {
            frame_index,
            queues: queues
                .into_iter()
                .map(|queue_type| QueueStatistics {
                    queue_type,
                    submitted_batches: 0,
                    command_lists: 0,
                    tasks: 0,
                    utilization: 0.0,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Adds one submitted batch and the recorded work it carried.
    pub(crate) fn record_batch(&mut self, queue: usize, command_lists: usize, work: &CompileStats) {
        self.submitted_batches += 1;
        self.tasks += work.tasks;
        self.barriers += work.barriers;
        self.render_passes += work.render_passes;
        self.subpasses += work.subpasses;
        self.draw_calls += work.draw_calls;
        if let Some(q) = self.queues.get_mut(queue) {
            q.submitted_batches += 1;
            q.command_lists += command_lists;
            q.tasks += work.tasks;
        }
    }

    /// Computes utilization once every batch has been recorded.
    pub(crate) fn finish(&mut self, skipped_sub_batches: usize) {
        self.skipped_sub_batches = skipped_sub_batches;
        let total = self.tasks.max(1) as f32;
        for queue in &mut self.queues {
            queue.utilization = queue.tasks as f32 / total;
        }
    }

    /// Statistics of one queue type, if the device exposes it.
    pub fn queue(&self, queue_type: QueueType) -> Option<&QueueStatistics> {
        self.queues.iter().find(|q| q.queue_type == queue_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_split() {
        let mut stats = FrameStatistics::new(3, [QueueType::Graphics, QueueType::AsyncCompute]);
        let work = |tasks| CompileStats {
            tasks,
            ..CompileStats::default()
        };
        stats.record_batch(0, 1, &work(3));
        stats.record_batch(1, 2, &work(1));
        stats.finish(2);

        assert_eq!(stats.frame_index, 3);
        assert_eq!(stats.tasks, 4);
        assert_eq!(stats.submitted_batches, 2);
        assert_eq!(stats.skipped_sub_batches, 2);
        let graphics = stats.queue(QueueType::Graphics).unwrap();
        assert!((graphics.utilization - 0.75).abs() < f32::EPSILON);
        assert_eq!(stats.queue(QueueType::AsyncCompute).unwrap().command_lists, 2);
    }

    #[test]
    fn test_empty_frame_has_zero_utilization() {
        let mut stats = FrameStatistics::new(1, [QueueType::Graphics]);
        stats.finish(0);
        assert_eq!(stats.queues[0].utilization, 0.0);
    }
}
