use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_framegraph::{
    BatchDesc, BatchId, BufferCopy, BufferDesc, BufferRange, BufferUsage, CommandBufferDesc,
    DummyDevice, FrameGraph, FrameGraphConfig, QueueType, SubmissionGraphDesc, TaskDesc, TaskGraph,
    ThreadDesc,
};

// ---------------------------------------------------------------------------
// Task graph ordering
// ---------------------------------------------------------------------------

fn bench_task_graph_chain(c: &mut Criterion) {
    c.bench_function("task_graph_compile_64_chain", |b| {
        b.iter(|| {
            let mut graph = TaskGraph::new();
            let mut prev = graph.add_task(TaskDesc::marker("task_0"), &[]).unwrap();
            for i in 1..64 {
                prev = graph
                    .add_task(TaskDesc::marker(format!("task_{i}")), &[prev])
                    .unwrap();
            }
            graph.compile().unwrap();
            black_box(graph.execution_order().unwrap().len());
        });
    });
}

fn bench_task_graph_wide(c: &mut Criterion) {
    c.bench_function("task_graph_compile_fan_out_fan_in", |b| {
        b.iter(|| {
            let mut graph = TaskGraph::new();
            let root = graph.add_task(TaskDesc::marker("root"), &[]).unwrap();
            let leaves: Vec<_> = (0..32)
                .map(|i| {
                    graph
                        .add_task(TaskDesc::marker(format!("leaf_{i}")), &[root])
                        .unwrap()
                })
                .collect();
            graph.add_task(TaskDesc::marker("join"), &leaves).unwrap();
            graph.compile().unwrap();
            black_box(graph.execution_order().unwrap().len());
        });
    });
}

// ---------------------------------------------------------------------------
// Full frames on the dummy device
// ---------------------------------------------------------------------------

fn bench_frame_transfer_chain(c: &mut Criterion) {
    let graph = FrameGraph::new(Arc::new(DummyDevice::new()), FrameGraphConfig::default()).unwrap();
    graph.initialize(2).unwrap();
    let thread = graph.create_thread(ThreadDesc::new("bench")).unwrap();
    let buffers: Vec<_> = (0..8)
        .map(|_| {
            graph
                .create_buffer(BufferDesc::new(1024, BufferUsage::all()))
                .unwrap()
        })
        .collect();
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "upload", QueueType::AsyncTransfer))
        .with_batch(BatchDesc::new(1, "graphics", QueueType::Graphics).with_dependency(0));

    c.bench_function("frame_upload_then_copy_8_buffers", |b| {
        b.iter(|| {
            graph.begin_frame(&desc).unwrap();
            let mut upload = thread.begin(CommandBufferDesc::new("upload", 0, 0), &[]).unwrap();
            for &buffer in &buffers {
                upload
                    .add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 1), &[])
                    .unwrap();
            }
            let uploaded = upload.execute().unwrap();

            let mut copy = thread.begin(CommandBufferDesc::new("copy", 1, 0), &[uploaded]).unwrap();
            let mut prev = None;
            for pair in buffers.windows(2) {
                let deps: Vec<_> = prev.into_iter().collect();
                let task = TaskDesc::copy_buffer(pair[0], pair[1], vec![BufferCopy::new(0, 0, 1024)]);
                prev = Some(copy.add_task(task, &deps).unwrap());
            }
            copy.execute().unwrap();
            graph.end_frame().unwrap();
            black_box(graph.statistics().barriers);
        });
    });

    drop(thread);
    graph.deinitialize().unwrap();
}

fn bench_frame_skipped_batches(c: &mut Criterion) {
    let graph = FrameGraph::new(Arc::new(DummyDevice::new()), FrameGraphConfig::default()).unwrap();
    graph.initialize(3).unwrap();
    let mut desc = SubmissionGraphDesc::new();
    for id in 0..16u32 {
        let queue = QueueType::ALL[id as usize % QueueType::ALL.len()];
        let mut batch = BatchDesc::new(id, format!("batch_{id}"), queue).with_thread_count(4);
        if id > 0 {
            batch = batch.with_dependency(id - 1);
        }
        desc = desc.with_batch(batch);
    }

    c.bench_function("frame_16_batches_skipped", |b| {
        b.iter(|| {
            graph.begin_frame(&desc).unwrap();
            for id in 0..16 {
                for index in 0..4 {
                    graph.skip_batch(BatchId(id), index).unwrap();
                }
            }
            graph.end_frame().unwrap();
        });
    });

    graph.deinitialize().unwrap();
}

criterion_group!(
    benches,
    bench_task_graph_chain,
    bench_task_graph_wide,
    bench_frame_transfer_chain,
    bench_frame_skipped_batches,
);
criterion_main!(benches);
