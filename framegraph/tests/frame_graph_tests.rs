//! Integration tests for the frame graph.
//!
//! These tests drive complete frames through the public API on the dummy
//! device: workers record command buffers, batches flow through the
//! scheduler onto several queues and readbacks come back through the frame
//! ring.
//!
//! # Test Categories
//!
//! - **Lifecycle Tests**: State machine, worker registration, teardown
//! - **Submission Tests**: Cross-queue dependencies, deferral, skipped work
//! - **Resource Tests**: Buffer and image work with byte-exact readback
//! - **Debug Tests**: Statistics and frame dumps
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test frame_graph_tests
//! ```

mod common;

use std::time::Duration;

use rstest::rstest;

use common::{generate_test_pattern, Readback, TestContext, TEST_TIMEOUT};
use redlilium_framegraph::types::AccessMask;
use redlilium_framegraph::{
    Barrier, BatchDesc, BatchId, BufferCopy, BufferImageCopy, BufferRange, ColorTarget,
    CommandBufferDesc, DebugFlags, DrawTask, DummyDevice, ExternalCmdBatch, FrameGraph,
    FrameGraphConfig, FrameGraphState, GraphError, PipelineStages, QueueType, Rect,
    RenderPassDesc, SubmissionGraphDesc, TaskDesc,
};

fn single_batch(queue: QueueType) -> SubmissionGraphDesc {
    SubmissionGraphDesc::new().with_batch(BatchDesc::new(0, "main", queue))
}

fn upload_then_draw() -> SubmissionGraphDesc {
    SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "upload", QueueType::AsyncTransfer))
        .with_batch(BatchDesc::new(1, "draw", QueueType::Graphics).with_dependency(0))
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_lifecycle_states() {
    let ctx = TestContext::new(2);
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    assert_eq!(ctx.graph.state(), FrameGraphState::RunThreads);
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);

    ctx.shutdown();
}

#[test]
fn test_calls_in_wrong_state_fail() {
    let ctx = TestContext::new(2);
    let desc = single_batch(QueueType::Graphics);

    assert_eq!(
        ctx.graph.end_frame(),
        Err(GraphError::InvalidState {
            expected: FrameGraphState::RunThreads,
            actual: FrameGraphState::Idle,
        })
    );
    assert!(matches!(
        ctx.thread().begin(CommandBufferDesc::new("early", 0, 0), &[]),
        Err(GraphError::InvalidState { .. })
    ));
    assert!(matches!(ctx.graph.initialize(2), Err(GraphError::InvalidState { .. })));

    ctx.graph.begin_frame(&desc).unwrap();
    assert!(matches!(ctx.graph.begin_frame(&desc), Err(GraphError::InvalidState { .. })));
    assert!(matches!(ctx.graph.wait_idle(), Err(GraphError::InvalidState { .. })));
    assert!(matches!(ctx.graph.deinitialize(), Err(GraphError::InvalidState { .. })));
    assert_eq!(ctx.graph.state(), FrameGraphState::RunThreads);

    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_uninitialized_graph_rejects_work() {
    let graph = FrameGraph::new(std::sync::Arc::new(DummyDevice::new()), FrameGraphConfig::default())
        .unwrap();
    assert_eq!(graph.state(), FrameGraphState::Initial);
    assert!(matches!(
        graph.create_buffer(redlilium_framegraph::BufferDesc::new(
            16,
            redlilium_framegraph::BufferUsage::all()
        )),
        Err(GraphError::InvalidState { .. })
    ));
    assert!(matches!(graph.initialize(0), Err(GraphError::InvalidDescriptor(_))));
    assert_eq!(graph.state(), FrameGraphState::Initial);
}

#[test]
fn test_deinitialize_with_live_thread() {
    let mut ctx = TestContext::new(2);
    assert_eq!(ctx.graph.thread_count(), 1);
    assert_eq!(ctx.graph.deinitialize(), Err(GraphError::ThreadsAlive(1)));
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);

    ctx.thread = None;
    assert_eq!(ctx.graph.thread_count(), 0);
    ctx.graph.deinitialize().unwrap();
    assert_eq!(ctx.graph.state(), FrameGraphState::Destroyed);
    assert_eq!(ctx.device.live_buffer_count(), 0);
}

#[test]
fn test_incomplete_frame_keeps_running() {
    let ctx = TestContext::new(2);
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "main", QueueType::Graphics).with_thread_count(2));
    ctx.graph.begin_frame(&desc).unwrap();
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();

    assert_eq!(ctx.graph.end_frame(), Err(GraphError::IncompleteFrame { pending: 1 }));
    assert_eq!(ctx.graph.state(), FrameGraphState::RunThreads);

    ctx.graph.skip_batch(BatchId(0), 1).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_begin_frame_times_out_on_busy_slot() {
    let ctx = TestContext::deferred(1);
    let buffer = ctx.buffer(16);
    let desc = single_batch(QueueType::Graphics);

    ctx.graph.begin_frame(&desc).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("fill", 0, 0), &[]).unwrap();
    cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 7), &[]).unwrap();
    let handle = cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();
    assert!(handle.is_submitted());
    assert!(!handle.is_complete());

    let result = ctx.graph.begin_frame_timeout(&desc, Duration::from_millis(10));
    assert_eq!(result, Err(GraphError::Timeout));
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);

    assert_eq!(ctx.device.complete_all(), 1);
    assert!(handle.is_complete());
    ctx.graph.begin_frame(&desc).unwrap();
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_device_loss_surfaces_on_next_wait() {
    let ctx = TestContext::deferred(1);
    let buffer = ctx.buffer(16);
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "before", QueueType::Graphics))
        .with_batch(BatchDesc::new(1, "after", QueueType::Graphics));
    ctx.graph.begin_frame(&desc).unwrap();

    let mut cb = ctx.thread().begin(CommandBufferDesc::new("before", 0, 0), &[]).unwrap();
    cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 1), &[]).unwrap();
    assert!(cb.execute().unwrap().is_submitted());

    ctx.device.simulate_device_lost();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("after", 1, 0), &[]).unwrap();
    cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 2), &[]).unwrap();
    let rejected = cb.execute().unwrap();
    assert!(!rejected.is_submitted());
    ctx.graph.end_frame().unwrap();
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);

    assert_eq!(ctx.graph.wait_idle(), Err(GraphError::DeviceLost));
    assert_eq!(
        ctx.graph.begin_frame(&single_batch(QueueType::Graphics)),
        Err(GraphError::DeviceLost)
    );
    assert_eq!(ctx.graph.state(), FrameGraphState::Idle);
}

// ============================================================================
// Submission Tests
// ============================================================================

#[test]
fn test_consumer_waits_for_producer() {
    let ctx = TestContext::new(2);
    let buffer = ctx.buffer(64);
    ctx.graph.begin_frame(&upload_then_draw()).unwrap();

    let mut draw = ctx.thread().begin(CommandBufferDesc::new("draw", 1, 0), &[]).unwrap();
    draw.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 0), &[]).unwrap();
    let drawn = draw.execute().unwrap();
    assert!(!drawn.is_submitted(), "consumer must wait for its producer");

    // Depending on a batch that runs later is rejected.
    assert!(matches!(
        ctx.thread().begin(CommandBufferDesc::new("upload", 0, 0), &[drawn.clone()]),
        Err(GraphError::InvalidDescriptor(_))
    ));

    let mut upload = ctx.thread().begin(CommandBufferDesc::new("upload", 0, 0), &[]).unwrap();
    upload
        .add_task(TaskDesc::update_buffer(buffer, 0, generate_test_pattern(64)), &[])
        .unwrap();
    let uploaded = upload.execute().unwrap();
    assert!(uploaded.is_submitted());
    assert!(drawn.is_submitted());
    assert!(ctx.graph.is_all_batches_submitted());
    ctx.graph.end_frame().unwrap();

    let submissions = ctx.device.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue_type, QueueType::AsyncTransfer);
    assert_eq!(submissions[0].signal_semaphores.len(), 1);
    assert_eq!(submissions[1].queue_type, QueueType::Graphics);
    assert_eq!(submissions[1].wait_semaphores, submissions[0].signal_semaphores);
    assert!(submissions[1].waits_satisfied);

    ctx.graph.wait(&[uploaded, drawn], TEST_TIMEOUT).unwrap();
    ctx.shutdown();
}

#[rstest]
#[case::graphics(QueueType::Graphics)]
#[case::compute(QueueType::AsyncCompute)]
#[case::transfer(QueueType::AsyncTransfer)]
fn test_same_queue_chain_needs_no_semaphore(#[case] queue: QueueType) {
    let ctx = TestContext::new(2);
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "first", queue))
        .with_batch(BatchDesc::new(1, "second", queue).with_dependency(0));
    ctx.graph.begin_frame(&desc).unwrap();
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.skip_batch(BatchId(1), 0).unwrap();
    ctx.graph.end_frame().unwrap();

    let submissions = ctx.device.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.queue_type == queue));
    assert!(submissions.iter().all(|s| s.wait_semaphores.is_empty()));
    ctx.shutdown();
}

#[test]
fn test_buffer_is_released_for_the_next_command_buffer_on_the_queue() {
    let ctx = TestContext::new(2);
    let (src, dst) = (ctx.buffer(16), ctx.buffer(16));
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "upload", QueueType::Graphics))
        .with_batch(BatchDesc::new(1, "consume", QueueType::Graphics).with_dependency(0));
    ctx.graph.begin_frame(&desc).unwrap();

    let mut upload = ctx.thread().begin(CommandBufferDesc::new("upload", 0, 0), &[]).unwrap();
    upload
        .add_task(TaskDesc::update_buffer(src, 0, generate_test_pattern(16)), &[])
        .unwrap();
    upload.compile().unwrap();
    let released: Vec<Barrier> = upload
        .barriers()
        .unwrap()
        .iter()
        .filter(|b| b.dst_index.is_final())
        .copied()
        .collect();
    assert_eq!(released.len(), 1, "the write must be released at the end");
    assert_eq!(released[0].src_stages, PipelineStages::TRANSFER);
    assert_eq!(released[0].src_access, AccessMask::TRANSFER_WRITE);
    assert_eq!(released[0].dst_stages, PipelineStages::ALL_COMMANDS);
    assert!(released[0].dst_access.contains(AccessMask::MEMORY_READ | AccessMask::MEMORY_WRITE));
    let uploaded = upload.execute().unwrap();

    let mut consume = ctx
        .thread()
        .begin(CommandBufferDesc::new("consume", 1, 0), &[uploaded])
        .unwrap();
    consume
        .add_task(TaskDesc::copy_buffer(src, dst, vec![BufferCopy::new(0, 0, 16)]), &[])
        .unwrap();
    consume.compile().unwrap();
    let finals = consume
        .barriers()
        .unwrap()
        .iter()
        .filter(|b| b.dst_index.is_final())
        .count();
    // The copied-from buffer waits for its reader, the copied-to one for its writer.
    assert_eq!(finals, 2);
    consume.execute().unwrap();
    ctx.graph.end_frame().unwrap();

    let submissions = ctx.device.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.wait_semaphores.is_empty()));
    assert!(submissions.iter().all(|s| s.barriers == 1));
    ctx.shutdown();
}

#[test]
fn test_wait_requires_submitted_batch() {
    let ctx = TestContext::new(2);
    ctx.graph.begin_frame(&upload_then_draw()).unwrap();
    let cb = ctx.thread().begin(CommandBufferDesc::new("draw", 1, 0), &[]);
    let mut cb = cb.unwrap();
    let drawn = cb.execute().unwrap();
    assert_eq!(
        ctx.graph.wait(&[drawn], TEST_TIMEOUT),
        Err(GraphError::NotSubmitted(1))
    );
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_skipped_sub_batches() {
    let ctx = TestContext::new(2);
    let buffer = ctx.buffer(16);
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "gbuffer", QueueType::Graphics).with_thread_count(2))
        .with_batch(BatchDesc::new(1, "lighting", QueueType::AsyncCompute).with_dependency(0));
    ctx.graph.begin_frame(&desc).unwrap();

    let mut cb = ctx.thread().begin(CommandBufferDesc::new("opaque", 0, 0), &[]).unwrap();
    cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 3), &[]).unwrap();
    cb.execute().unwrap();
    ctx.graph.skip_batch(BatchId(0), 1).unwrap();
    assert!(!ctx.graph.is_all_batches_submitted());

    let mut lighting = ctx.thread().begin(CommandBufferDesc::new("lighting", 1, 0), &[]).unwrap();
    lighting.skip().unwrap();
    assert!(ctx.graph.is_all_batches_submitted());
    assert!(matches!(lighting.execute(), Err(GraphError::AlreadySubmitted { .. })));
    ctx.graph.end_frame().unwrap();

    let stats = ctx.graph.statistics();
    assert_eq!(stats.submitted_batches, 2);
    assert_eq!(stats.skipped_sub_batches, 2);
    let dump = ctx.graph.dump_to_string();
    assert!(dump.contains("Sub-batch 0 'opaque'"), "{dump}");
    assert!(dump.contains("Sub-batch 1 skipped"), "{dump}");

    // The skipped batch still reached its queue, empty.
    let submissions = ctx.device.submissions();
    assert_eq!(submissions[1].queue_type, QueueType::AsyncCompute);
    assert_eq!(submissions[1].command_lists, 0);
    ctx.shutdown();
}

#[test]
fn test_sub_batch_accepts_one_submission() {
    let ctx = TestContext::new(2);
    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    ctx.graph.submit_batch(BatchId(0), 0, ExternalCmdBatch::new()).unwrap();
    assert_eq!(
        ctx.graph.skip_batch(BatchId(0), 0),
        Err(GraphError::AlreadySubmitted { batch: 0, index: 0 })
    );
    assert!(matches!(
        ctx.thread().begin(CommandBufferDesc::new("late", 0, 0), &[]),
        Err(GraphError::AlreadySubmitted { .. })
    ));
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_workers_record_in_parallel() {
    let ctx = TestContext::new(2);
    let workers = 4;
    let buffers: Vec<_> = (0..workers).map(|_| ctx.buffer(64)).collect();
    let desc = SubmissionGraphDesc::new()
        .with_batch(BatchDesc::new(0, "parallel", QueueType::Graphics).with_thread_count(workers));
    ctx.graph.begin_frame(&desc).unwrap();

    std::thread::scope(|scope| {
        for (index, &buffer) in buffers.iter().enumerate() {
            let graph = ctx.graph.clone();
            scope.spawn(move || {
                let thread = graph
                    .create_thread(redlilium_framegraph::ThreadDesc::new(format!("worker {index}")))
                    .unwrap();
                let mut cb = thread
                    .begin(CommandBufferDesc::new(format!("part {index}"), 0, index as u32), &[])
                    .unwrap();
                cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, index as u32), &[])
                    .unwrap();
                cb.execute().unwrap();
            });
        }
    });
    assert!(ctx.graph.is_all_batches_submitted());
    ctx.graph.end_frame().unwrap();

    let submissions = ctx.device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].command_lists, workers as usize);
    ctx.shutdown();
}

// ============================================================================
// Resource Tests
// ============================================================================

#[rstest]
#[case::single_frame(1)]
#[case::double_buffered(2)]
#[case::triple_buffered(3)]
fn test_buffer_copy_roundtrip(#[case] ring_size: usize) {
    let ctx = TestContext::new(ring_size);
    const BUFFER_SIZE: u64 = 256;
    let test_data = generate_test_pattern(BUFFER_SIZE as usize);
    let src = ctx.buffer(BUFFER_SIZE);
    let dst = ctx.buffer(BUFFER_SIZE);
    let readback = Readback::new();

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("roundtrip", 0, 0), &[]).unwrap();
    let upload = cb
        .add_task(TaskDesc::update_buffer(src, 0, test_data.clone()), &[])
        .unwrap();
    let copy = cb
        .add_task(
            TaskDesc::copy_buffer(src, dst, vec![BufferCopy::new(0, 0, BUFFER_SIZE)]),
            &[upload],
        )
        .unwrap();
    cb.add_task(
        TaskDesc::read_buffer(dst, BufferRange::WHOLE, readback.callback()),
        &[copy],
    )
    .unwrap();
    let handle = cb.execute().unwrap();
    assert!(handle.is_submitted());
    ctx.graph.end_frame().unwrap();

    // Callbacks run when the frame's slot is recycled, never earlier.
    assert!(!readback.is_ready());
    ctx.graph.wait_idle().unwrap();
    assert_eq!(readback.get(), Some(test_data));
    ctx.shutdown();
}

#[test]
fn test_readback_fires_when_slot_is_recycled() {
    let ctx = TestContext::new(2);
    let buffer = ctx.buffer(8);
    let readback = Readback::new();
    let desc = single_batch(QueueType::Graphics);

    ctx.graph.begin_frame(&desc).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("read", 0, 0), &[]).unwrap();
    let fill = cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 0x0101_0101), &[]).unwrap();
    cb.add_task(TaskDesc::read_buffer(buffer, BufferRange::new(4, 4), readback.callback()), &[fill])
        .unwrap();
    cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();

    // Frame 2 uses the other slot.
    ctx.graph.begin_frame(&desc).unwrap();
    assert!(!readback.is_ready());
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();

    // Frame 3 reuses the first slot.
    ctx.graph.begin_frame(&desc).unwrap();
    assert_eq!(readback.get(), Some(vec![1, 1, 1, 1]));
    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_dropped_command_buffer_keeps_its_callback() {
    let ctx = TestContext::new(2);
    let buffer = ctx.buffer(8);
    let readback = Readback::new();
    let live = ctx.device.live_buffer_count();

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    {
        let mut cb = ctx.thread().begin(CommandBufferDesc::new("abandoned", 0, 0), &[]).unwrap();
        cb.add_task(TaskDesc::read_buffer(buffer, BufferRange::WHOLE, readback.callback()), &[])
            .unwrap();
        cb.compile().unwrap();
        // The staging buffer of the readback exists until the recording is dropped.
        assert_eq!(ctx.device.live_buffer_count(), live + 1);
    }
    assert_eq!(ctx.device.live_buffer_count(), live);
    assert!(!readback.is_ready());

    ctx.graph.skip_batch(BatchId(0), 0).unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_clear_and_copy_image() {
    let ctx = TestContext::new(2);
    let image = ctx.image(2, 2);
    let copy = ctx.image(2, 2);
    let buffer = ctx.buffer(16);
    let readback = Readback::new();

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("image", 0, 0), &[]).unwrap();
    let clear = cb
        .add_task(TaskDesc::clear_color_image(image, [1.0, 0.0, 0.0, 1.0]), &[])
        .unwrap();
    let duplicate = cb
        .add_task(
            TaskDesc::copy_image(
                image,
                copy,
                vec![redlilium_framegraph::ImageCopy {
                    src: Rect::new(0, 0, 2, 2),
                    dst_x: 0,
                    dst_y: 0,
                }],
            ),
            &[clear],
        )
        .unwrap();
    let download = cb
        .add_task(
            TaskDesc::copy_image_to_buffer(
                copy,
                buffer,
                vec![BufferImageCopy {
                    buffer_offset: 0,
                    image_rect: Rect::new(0, 0, 2, 2),
                }],
            ),
            &[duplicate],
        )
        .unwrap();
    cb.add_task(TaskDesc::read_buffer(buffer, BufferRange::WHOLE, readback.callback()), &[download])
        .unwrap();

    let stats = cb.compile().unwrap();
    assert_eq!(stats.tasks, 4);
    assert!(stats.barriers >= 3);
    cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.graph.wait_idle().unwrap();
    assert_eq!(readback.get(), Some([255, 0, 0, 255].repeat(4)));
    ctx.shutdown();
}

#[test]
fn test_merged_render_passes() {
    let ctx = TestContext::new(2);
    let target = ctx.image(4, 4);
    let buffer = ctx.buffer(64);
    let readback = Readback::new();

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("scene", 0, 0), &[]).unwrap();
    let opaque = cb
        .create_render_pass(
            RenderPassDesc::new("opaque")
                .with_color(ColorTarget::new(target).with_clear([0.0, 0.0, 1.0, 1.0])),
        )
        .unwrap();
    let transparent = cb
        .create_render_pass(RenderPassDesc::new("transparent").with_color(ColorTarget::new(target)))
        .unwrap();
    cb.add_draw_task(opaque, DrawTask::draw(3, 1)).unwrap();
    cb.add_draw_task(opaque, DrawTask::draw(6, 1)).unwrap();
    cb.add_draw_task(transparent, DrawTask::draw(3, 2)).unwrap();

    let first = cb.add_task(TaskDesc::submit_render_pass(opaque), &[]).unwrap();
    let second = cb.add_task(TaskDesc::submit_render_pass(transparent), &[first]).unwrap();
    let download = cb
        .add_task(
            TaskDesc::copy_image_to_buffer(
                target,
                buffer,
                vec![BufferImageCopy {
                    buffer_offset: 0,
                    image_rect: Rect::new(0, 0, 4, 4),
                }],
            ),
            &[second],
        )
        .unwrap();
    cb.add_task(TaskDesc::read_buffer(buffer, BufferRange::WHOLE, readback.callback()), &[download])
        .unwrap();
    cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();

    let stats = ctx.graph.statistics();
    assert_eq!(stats.render_passes, 1);
    assert_eq!(stats.subpasses, 2);
    assert_eq!(stats.draw_calls, 3);

    ctx.graph.wait_idle().unwrap();
    assert_eq!(readback.get(), Some([0, 0, 255, 255].repeat(16)));
    ctx.shutdown();
}

#[test]
fn test_render_pass_validation() {
    let ctx = TestContext::new(2);
    let small = ctx.image(2, 2);
    let large = ctx.image(4, 4);

    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("passes", 0, 0), &[]).unwrap();
    assert!(matches!(
        cb.create_render_pass(RenderPassDesc::new("empty")),
        Err(GraphError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        cb.create_render_pass(
            RenderPassDesc::new("mixed")
                .with_color(ColorTarget::new(small))
                .with_color(ColorTarget::new(large))
        ),
        Err(GraphError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        cb.create_render_pass(
            RenderPassDesc::new("outside")
                .with_color(ColorTarget::new(small))
                .with_area(Rect::new(1, 1, 2, 2))
        ),
        Err(GraphError::InvalidDescriptor(_))
    ));
    cb.skip().unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_released_buffer_outlives_its_frame() {
    let ctx = TestContext::deferred(2);
    let buffer = ctx.buffer(16);
    let live = ctx.device.live_buffer_count();
    let desc = single_batch(QueueType::Graphics);

    ctx.graph.begin_frame(&desc).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("fill", 0, 0), &[]).unwrap();
    cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 9), &[]).unwrap();
    cb.execute().unwrap();
    ctx.graph.release_buffer(buffer).unwrap();
    ctx.graph.end_frame().unwrap();

    assert!(ctx.graph.buffer_desc(buffer).is_none());
    assert_eq!(ctx.device.live_buffer_count(), live);

    ctx.device.complete_all();
    ctx.graph.wait_idle().unwrap();
    assert_eq!(ctx.device.live_buffer_count(), live - 1);
    assert!(matches!(ctx.graph.release_buffer(buffer), Err(GraphError::InvalidDescriptor(_))));
    ctx.shutdown();
}

#[test]
fn test_compile_is_idempotent() {
    let ctx = TestContext::new(2);
    let buffer = ctx.buffer(32);
    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("twice", 0, 0), &[]).unwrap();
    let a = cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 1), &[]).unwrap();
    let b = cb.add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 2), &[a]).unwrap();

    let first = cb.compile().unwrap();
    let commands = cb.commands().unwrap().clone();
    let second = cb.compile().unwrap();
    assert_eq!(first, second);
    assert_eq!(cb.commands().unwrap(), &commands);
    assert_eq!(cb.execution_order().unwrap(), &[a, b]);
    // Write after write, then the release at the end.
    assert_eq!(cb.barriers().unwrap().len(), 2);

    // Adding a task drops the recording.
    cb.add_task(TaskDesc::marker("tail"), &[b]).unwrap();
    assert_eq!(cb.barriers().unwrap_err(), GraphError::NotCompiled);
    assert_eq!(cb.compile().unwrap().tasks, 3);

    cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

#[test]
fn test_cyclic_dependency_is_rejected() {
    let ctx = TestContext::new(2);
    ctx.graph.begin_frame(&single_batch(QueueType::Graphics)).unwrap();
    let mut cb = ctx.thread().begin(CommandBufferDesc::new("cycle", 0, 0), &[]).unwrap();
    let a = cb.add_task(TaskDesc::marker("a"), &[]).unwrap();
    let b = cb.add_task(TaskDesc::marker("b"), &[a]).unwrap();
    assert_eq!(cb.add_dependency(a, b), Err(GraphError::CyclicDependency));
    assert_eq!(cb.execution_order().unwrap_err(), GraphError::NotCompiled);
    cb.execute().unwrap();
    ctx.graph.end_frame().unwrap();
    ctx.shutdown();
}

// ============================================================================
// Debug Tests
// ============================================================================

#[test]
fn test_frame_dumps() {
    let ctx = TestContext::with_device(
        DummyDevice::new(),
        2,
        DebugFlags::VIS_BARRIERS | DebugFlags::VIS_RESOURCES,
    );
    let buffer = ctx
        .graph
        .create_buffer(
            redlilium_framegraph::BufferDesc::new(16, redlilium_framegraph::BufferUsage::all())
                .with_label("vertices"),
        )
        .unwrap();
    ctx.graph.begin_frame(&upload_then_draw()).unwrap();

    let mut upload = ctx.thread().begin(CommandBufferDesc::new("upload", 0, 0), &[]).unwrap();
    let write = upload
        .add_task(TaskDesc::update_buffer(buffer, 0, vec![0u8; 16]).with_name("write"), &[])
        .unwrap();
    upload
        .add_task(TaskDesc::fill_buffer(buffer, BufferRange::WHOLE, 0).with_name("zero"), &[write])
        .unwrap();
    upload.execute().unwrap();
    ctx.graph.skip_batch(BatchId(1), 0).unwrap();
    ctx.graph.end_frame().unwrap();

    let text = ctx.graph.dump_to_string();
    assert!(text.starts_with("Frame 1\n"), "{text}");
    assert!(text.contains("Batch 0 'upload' on AsyncTransfer"), "{text}");
    assert!(text.contains("[1] UpdateBuffer 'write'"), "{text}");
    assert!(text.contains("vertices"), "{text}");
    assert!(text.contains("barrier vertices 1 -> 2"), "{text}");
    assert!(text.contains("barrier vertices 2 -> FINAL"), "{text}");

    let dot = ctx.graph.dump_to_graphviz();
    assert!(dot.starts_with("digraph Frame1 {"), "{dot}");
    assert!(dot.contains("cluster_Batch0"), "{dot}");
    assert!(dot.contains("cluster_SubBatch0_0"), "{dot}");
    assert!(dot.contains("style=dashed"), "{dot}");

    let stats = ctx.graph.statistics();
    assert_eq!(stats.frame_index, 1);
    assert_eq!(stats.tasks, 2);
    assert_eq!(stats.barriers, 2);
    assert_eq!(stats.queue(QueueType::AsyncTransfer).unwrap().tasks, 2);
    ctx.shutdown();
}
