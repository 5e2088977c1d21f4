//! Host-memory device for testing and development.
//!
//! [`DummyDevice`] keeps buffer and image contents in host memory and
//! executes recorded commands on submission. In
//! [`CompletionMode::Deferred`] submissions queue up until the test drives
//! them with [`complete_next`](DummyDevice::complete_next) or
//! [`complete_all`](DummyDevice::complete_all), which makes in-flight frames
//! observable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{GraphError, GraphResult};
use crate::graph::{BufferImageCopy, LoadOp};
use crate::scheduler::{Fence, Semaphore};
use crate::types::{BufferDesc, ImageDesc, ImageFormat, QueueInfo, QueueType};

use super::{
    AttachmentBegin, GpuDevice, NativeBuffer, NativeCommand, NativeImage, Submission,
};

/// When the dummy device executes submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Execute and signal the fence inside `submit`.
    #[default]
    Immediate,
    /// Queue submissions until completed explicitly.
    Deferred,
}

/// What the device saw for one submission, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: usize,
    pub queue_type: QueueType,
    pub command_lists: usize,
    pub commands: usize,
    pub barriers: usize,
    pub draws: usize,
    pub wait_semaphores: Vec<Semaphore>,
    pub signal_semaphores: Vec<Semaphore>,
    /// False if a wait semaphore had not been signaled by earlier work.
    pub waits_satisfied: bool,
}

#[derive(Debug)]
struct HostImage {
    width: u32,
    height: u32,
    format: ImageFormat,
    data: Vec<u8>,
}

impl HostImage {
    fn row_pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }
}

#[derive(Debug, Default)]
struct Memory {
    buffers: HashMap<NativeBuffer, Vec<u8>>,
    images: HashMap<NativeImage, HostImage>,
}

#[derive(Debug)]
struct PendingWork {
    queue: usize,
    submission: Submission,
}

/// Device that runs commands on the host.
#[derive(Debug)]
pub struct DummyDevice {
    queues: Vec<QueueInfo>,
    mode: CompletionMode,
    memory: Mutex<Memory>,
    pending: Mutex<VecDeque<PendingWork>>,
    log: Mutex<Vec<SubmissionRecord>>,
    signaled: Mutex<HashSet<Semaphore>>,
    next_id: AtomicU64,
    lost: AtomicBool,
    reject_next: AtomicBool,
}

impl DummyDevice {
    /// Device with one graphics, one compute and one transfer queue, each in
    /// its own family, completing work immediately.
    pub fn new() -> Self {
        Self::with_queues(
            vec![
                QueueInfo::new(QueueType::Graphics, 0),
                QueueInfo::new(QueueType::AsyncCompute, 1),
                QueueInfo::new(QueueType::AsyncTransfer, 2),
            ],
            CompletionMode::Immediate,
        )
    }

    /// Same queues as [`new`](Self::new), but work completes only on demand.
    pub fn deferred() -> Self {
        let mut device = Self::new();
        device.mode = CompletionMode::Deferred;
        device
    }

    pub fn with_queues(queues: Vec<QueueInfo>, mode: CompletionMode) -> Self {
        Self {
            queues,
            mode,
            memory: Mutex::new(Memory::default()),
            pending: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            signaled: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            lost: AtomicBool::new(false),
            reject_next: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Executes the oldest queued submission. Returns false if none was queued.
    pub fn complete_next(&self) -> bool {
        let work = self.pending.lock().pop_front();
        match work {
            Some(work) => {
                self.execute(work.queue, &work.submission);
                true
            }
            None => false,
        }
    }

    /// Executes every queued submission and returns how many ran.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Executed submissions, oldest first.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.log.lock().clone()
    }

    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<Vec<u8>> {
        self.memory.lock().buffers.get(&buffer).cloned()
    }

    pub fn image_contents(&self, image: NativeImage) -> Option<Vec<u8>> {
        self.memory.lock().images.get(&image).map(|i| i.data.clone())
    }

    /// Number of buffers currently allocated.
    pub fn live_buffer_count(&self) -> usize {
        self.memory.lock().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.memory.lock().images.len()
    }

    /// Makes every later submit and wait fail with [`GraphError::DeviceLost`].
    pub fn simulate_device_lost(&self) {
        log::warn!("DummyDevice: simulating device loss");
        self.lost.store(true, Ordering::Release);
    }

    /// The next submit fails with [`GraphError::InvalidDescriptor`]; the
    /// device stays usable afterwards.
    pub fn reject_next_submit(&self) {
        self.reject_next.store(true, Ordering::Release);
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn execute(&self, queue: usize, submission: &Submission) {
        let waits_satisfied = {
            let mut signaled = self.signaled.lock();
            submission
                .wait_semaphores
                .iter()
                .fold(true, |ok, (semaphore, _)| signaled.remove(semaphore) && ok)
        };
        if !waits_satisfied {
            log::error!("DummyDevice: queue {queue} waited on an unsignaled semaphore");
        }

        let mut record = SubmissionRecord {
            queue,
            queue_type: self.queues[queue].queue_type,
            command_lists: submission.command_lists.len(),
            commands: 0,
            barriers: 0,
            draws: 0,
            wait_semaphores: submission.wait_semaphores.iter().map(|(s, _)| *s).collect(),
            signal_semaphores: submission.signal_semaphores.clone(),
            waits_satisfied,
        };

        {
            let mut memory = self.memory.lock();
            for command in submission.command_lists.iter().flat_map(|l| &l.commands) {
                record.commands += 1;
                match command {
                    NativeCommand::Barrier(_) => record.barriers += 1,
                    NativeCommand::Draw { .. }
                    | NativeCommand::DrawIndexed { .. }
                    | NativeCommand::DrawIndirect { .. } => record.draws += 1,
                    _ => {}
                }
                if memory.run(command).is_none() {
                    log::error!("DummyDevice: out of bounds access in {command:?}");
                }
            }
        }

        self.signaled
            .lock()
            .extend(submission.signal_semaphores.iter().copied());
        log::trace!(
            "DummyDevice: executed {} command(s) on queue {}",
            record.commands,
            queue
        );
        self.log.lock().push(record);
        submission.fence.signal();
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Executes one command. Returns `None` on an out of bounds access.
    fn run(&mut self, command: &NativeCommand) -> Option<()> {
        match command {
            NativeCommand::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let dst = self.buffers.get_mut(buffer)?;
                dst.get_mut(span(*offset, data.len() as u64)?)?.copy_from_slice(data);
            }
            NativeCommand::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => {
                let dst = self.buffers.get_mut(buffer)?;
                let range = dst.get_mut(span(*offset, *size)?)?;
                for word in range.chunks_exact_mut(4) {
                    word.copy_from_slice(&value.to_le_bytes());
                }
            }
            NativeCommand::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    let from = span(region.src_offset, region.size)?;
                    let to = span(region.dst_offset, region.size)?;
                    let bytes = self.buffers.get(src)?.get(from)?.to_vec();
                    self.buffers.get_mut(dst)?.get_mut(to)?.copy_from_slice(&bytes);
                }
            }
            NativeCommand::CopyImage { src, dst, regions } => {
                for region in regions {
                    let source = self.images.get(src)?;
                    let bpp = source.format.bytes_per_pixel() as usize;
                    let rect = region.src;
                    let mut rows = Vec::with_capacity(rect.height as usize);
                    for y in rect.y..rect.y.checked_add(rect.height)? {
                        let start = texel_offset(y, rect.x, source.row_pitch(), bpp)?;
                        let row = span(start as u64, u64::from(rect.width) * bpp as u64)?;
                        rows.push(source.data.get(row)?.to_vec());
                    }
                    let target = self.images.get_mut(dst)?;
                    let pitch = target.row_pitch();
                    for (i, row) in rows.iter().enumerate() {
                        let y = region.dst_y.checked_add(u32::try_from(i).ok()?)?;
                        let start = texel_offset(y, region.dst_x, pitch, bpp)?;
                        target
                            .data
                            .get_mut(span(start as u64, row.len() as u64)?)?
                            .copy_from_slice(row);
                    }
                }
            }
            NativeCommand::CopyBufferToImage { src, dst, regions } => {
                for region in regions {
                    let bytes = self.buffers.get(src)?.clone();
                    let image = self.images.get_mut(dst)?;
                    copy_rows(region, image, |image_row, buffer_start| {
                        let len = image_row.len() as u64;
                        image_row.copy_from_slice(bytes.get(span(buffer_start, len)?)?);
                        Some(())
                    })?;
                }
            }
            NativeCommand::CopyImageToBuffer { src, dst, regions } => {
                for region in regions {
                    let image = self.images.get_mut(src)?;
                    let buffer = self.buffers.get_mut(dst)?;
                    copy_rows(region, image, |image_row, buffer_start| {
                        let len = image_row.len() as u64;
                        buffer
                            .get_mut(span(buffer_start, len)?)?
                            .copy_from_slice(image_row);
                        Some(())
                    })?;
                }
            }
            NativeCommand::ClearColorImage { image, color } => {
                clear_image(self.images.get_mut(image)?, *color);
            }
            NativeCommand::BeginRenderPass(begin) => {
                let cleared = begin
                    .color
                    .iter()
                    .chain(begin.depth.iter())
                    .filter(|a| a.load == LoadOp::Clear);
                for &AttachmentBegin { image, clear, .. } in cleared {
                    clear_image(self.images.get_mut(&image)?, clear);
                }
            }
            NativeCommand::Barrier(_)
            | NativeCommand::NextSubpass
            | NativeCommand::Draw { .. }
            | NativeCommand::DrawIndexed { .. }
            | NativeCommand::DrawIndirect { .. }
            | NativeCommand::EndRenderPass
            | NativeCommand::BeginLabel { .. }
            | NativeCommand::EndLabel => {}
        }
        Some(())
    }
}

/// Visits every image row of `region` with the matching tightly packed buffer offset.
fn copy_rows(
    region: &BufferImageCopy,
    image: &mut HostImage,
    mut visit: impl FnMut(&mut [u8], u64) -> Option<()>,
) -> Option<()> {
    let rect = region.image_rect;
    let bpp = image.format.bytes_per_pixel() as usize;
    let pitch = image.row_pitch();
    let row_len = u64::from(rect.width) * bpp as u64;
    for (i, y) in (rect.y..rect.y.checked_add(rect.height)?).enumerate() {
        let start = texel_offset(y, rect.x, pitch, bpp)?;
        let row = image.data.get_mut(span(start as u64, row_len)?)?;
        let buffer_start = (i as u64)
            .checked_mul(row_len)
            .and_then(|o| o.checked_add(region.buffer_offset))?;
        visit(row, buffer_start)?;
    }
    Some(())
}

/// Byte range `[start, start + len)`, or `None` when it does not fit in memory.
fn span(start: u64, len: u64) -> Option<Range<usize>> {
    let start = usize::try_from(start).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    Some(start..end)
}

fn texel_offset(y: u32, x: u32, pitch: usize, bpp: usize) -> Option<usize> {
    (y as usize)
        .checked_mul(pitch)?
        .checked_add((x as usize).checked_mul(bpp)?)
}

fn clear_image(image: &mut HostImage, color: [f32; 4]) {
    let texel = image.format.encode_color(color);
    for chunk in image.data.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(&texel);
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Device"
    }

    fn queues(&self) -> Vec<QueueInfo> {
        self.queues.clone()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GraphResult<NativeBuffer> {
        let buffer = NativeBuffer(self.next_id());
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.memory
            .lock()
            .buffers
            .insert(buffer, vec![0; desc.size as usize]);
        Ok(buffer)
    }

    fn create_image(&self, desc: &ImageDesc) -> GraphResult<NativeImage> {
        let image = NativeImage(self.next_id());
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        self.memory.lock().images.insert(
            image,
            HostImage {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                data: vec![0; desc.byte_size() as usize],
            },
        );
        Ok(image)
    }

    fn destroy_buffer(&self, buffer: NativeBuffer) {
        self.memory.lock().buffers.remove(&buffer);
    }

    fn destroy_image(&self, image: NativeImage) {
        self.memory.lock().images.remove(&image);
    }

    fn read_buffer(&self, buffer: NativeBuffer, offset: u64, size: u64) -> GraphResult<Vec<u8>> {
        if self.is_lost() {
            return Err(GraphError::DeviceLost);
        }
        let memory = self.memory.lock();
        memory
            .buffers
            .get(&buffer)
            .zip(span(offset, size))
            .and_then(|(data, range)| data.get(range))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                GraphError::InvalidDescriptor(format!("read outside of buffer {buffer:?}"))
            })
    }

    fn create_semaphore(&self) -> GraphResult<Semaphore> {
        Ok(Semaphore::new(self.next_id()))
    }

    fn submit(&self, queue: usize, submission: &Submission) -> GraphResult<()> {
        if self.is_lost() {
            return Err(GraphError::DeviceLost);
        }
        if queue >= self.queues.len() {
            return Err(GraphError::InvalidDescriptor(format!("no queue at index {queue}")));
        }
        if self.reject_next.swap(false, Ordering::AcqRel) {
            return Err(GraphError::InvalidDescriptor(
                "submission rejected by the device".to_string(),
            ));
        }
        match self.mode {
            CompletionMode::Immediate => self.execute(queue, submission),
            CompletionMode::Deferred => self.pending.lock().push_back(PendingWork {
                queue,
                submission: submission.clone(),
            }),
        }
        Ok(())
    }

    fn wait_fences(&self, fences: &[Fence], timeout: Duration) -> GraphResult<()> {
        let start = Instant::now();
        loop {
            if self.is_lost() {
                return Err(GraphError::DeviceLost);
            }
            if fences.iter().all(Fence::is_signaled) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(GraphError::Timeout);
            }
            std::thread::yield_now();
        }
    }
}

static_assertions::assert_impl_all!(DummyDevice: Send, Sync);
