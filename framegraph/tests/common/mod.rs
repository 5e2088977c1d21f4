//! Common utilities for frame graph integration tests.
//!
//! Every test runs against the host-memory [`DummyDevice`], either completing
//! work on submit or holding it until the test drives it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use redlilium_framegraph::{
    BufferDesc, BufferId, BufferUsage, DebugFlags, DummyDevice, FrameGraph, FrameGraphConfig,
    FrameGraphThread, ImageDesc, ImageFormat, ImageId, ImageUsage, ThreadDesc,
};

/// Fence timeout used by every test graph; keeps failing tests fast.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// A byte pattern that differs at every position.
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Shared slot a readback callback writes its bytes into.
#[derive(Clone, Default)]
pub struct Readback(Arc<Mutex<Option<Vec<u8>>>>);

impl Readback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback storing the bytes it receives.
    pub fn callback(&self) -> impl FnOnce(&[u8]) + Send + 'static {
        let slot = self.0.clone();
        move |bytes: &[u8]| *slot.lock() = Some(bytes.to_vec())
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.0.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.0.lock().is_some()
    }
}

/// An initialized frame graph on a dummy device plus one worker.
pub struct TestContext {
    pub device: Arc<DummyDevice>,
    pub graph: Arc<FrameGraph>,
    pub thread: Option<FrameGraphThread>,
}

impl TestContext {
    pub fn new(ring_size: usize) -> Self {
        Self::with_device(DummyDevice::new(), ring_size, DebugFlags::default())
    }

    /// Work completes only when the test calls `complete_all`.
    pub fn deferred(ring_size: usize) -> Self {
        Self::with_device(DummyDevice::deferred(), ring_size, DebugFlags::default())
    }

    pub fn with_device(device: DummyDevice, ring_size: usize, flags: DebugFlags) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let device = Arc::new(device);
        let config = FrameGraphConfig::new()
            .with_debug_flags(flags)
            .with_fence_timeout(TEST_TIMEOUT);
        let graph = FrameGraph::new(device.clone(), config).expect("frame graph");
        graph.initialize(ring_size).expect("initialize");
        let thread = graph.create_thread(ThreadDesc::new("worker")).expect("thread");
        Self {
            device,
            graph,
            thread: Some(thread),
        }
    }

    pub fn thread(&self) -> &FrameGraphThread {
        self.thread.as_ref().expect("worker thread")
    }

    pub fn buffer(&self, size: u64) -> BufferId {
        self.graph
            .create_buffer(BufferDesc::new(size, BufferUsage::all()))
            .expect("buffer")
    }

    pub fn image(&self, width: u32, height: u32) -> ImageId {
        self.graph
            .create_image(ImageDesc::new(width, height, ImageFormat::Rgba8Unorm, ImageUsage::all()))
            .expect("image")
    }

    /// Drops the worker, completes outstanding work and destroys the graph.
    pub fn shutdown(mut self) {
        self.thread = None;
        self.device.complete_all();
        self.graph.deinitialize().expect("deinitialize");
    }
}
