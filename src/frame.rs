use bytemuck::Pod;

use crate::{
    backend::{Backend, Records, Submit},
    op::{upload::UploadOp, Op, OpChain, OpId, Printer, Stage},
    optimizations, Buffer, BufferUsage, Depth, Globals, Image, ImageDescriptor, ImageFlags,
    Optimizations, Rect, Region, Result, Texture,
};

/// Default capacity of each storage buffer of a frame.
pub const DEFAULT_STORAGE_CAPACITY: usize = 64 * 1024;

/// Storage offsets are aligned to this many bytes.
pub const STORAGE_ALIGNMENT: usize = 16;

/// Where a [`Frame`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Not bound to a device.
    Idle,
    /// Bound to a device, waiting for a target.
    Setup,
    /// Operations are being appended.
    Recording,
    /// Handed to the device; only observable until cleaned up.
    Submitted,
}

/// One unit of submitted GPU work.
///
/// A frame records operations into its chain between [`Frame::begin`]
/// and [`Frame::end`], submits them at `end`, and releases them in
/// [`Frame::cleanup`] once the device is done. Frames are reused
/// afterwards, keeping their allocations.
///
/// Misuse of the lifecycle (beginning twice, appending after `end`, ...)
/// panics.
pub struct Frame<B: Backend> {
    device: Option<B>,
    state: FrameState,
    optimizations: Optimizations,
    timestamp: u64,

    target: Option<Image>,
    depth: Depth,
    damage: Region,
    opaque: Option<Rect>,

    chain: OpChain<B::Record>,
    pass_open: bool,

    vertex_data: Vec<u8>,
    globals_data: Vec<u8>,
    vertex_buffer: Option<Buffer>,
    globals_buffer: Option<Buffer>,
    storage_buffers: Vec<Buffer>,
    storage_offset: usize,
    storage_capacity: usize,

    submission: Option<B::Submission>,
    status: Option<Result<()>>,
}

impl<B: Backend> Frame<B> {
    pub fn new() -> Self {
        Self::with_storage_capacity(DEFAULT_STORAGE_CAPACITY)
    }

    pub fn with_storage_capacity(storage_capacity: usize) -> Self {
        Self {
            device: None,
            state: FrameState::Idle,
            optimizations: Optimizations::empty(),
            timestamp: 0,
            target: None,
            depth: Depth::default(),
            damage: Region::new(),
            opaque: None,
            chain: OpChain::new(),
            pass_open: false,
            vertex_data: Vec::new(),
            globals_data: Vec::new(),
            vertex_buffer: None,
            globals_buffer: None,
            storage_buffers: Vec::new(),
            storage_offset: 0,
            storage_capacity,
            submission: None,
            status: None,
        }
    }

    /// Binds the frame to a device.
    ///
    /// The frame performs the requested optimizations the device
    /// supports, minus those disabled through the environment.
    pub fn setup(&mut self, device: B, optimizations: Optimizations) {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "setup() called on a frame that is in use"
        );
        self.optimizations =
            optimizations & device.supported_optimizations() & !optimizations::disabled_by_env();
        self.device = Some(device);
        self.state = FrameState::Setup;
        log::debug!("Frame set up with {:?}", self.optimizations);
    }

    /// Starts recording for `target`.
    pub fn begin(&mut self, target: &Image, depth: Depth, damage: &Region, opaque: Option<Rect>) {
        match self.state {
            FrameState::Setup => {}
            FrameState::Idle => panic!("begin() called before setup()"),
            FrameState::Recording | FrameState::Submitted => {
                panic!("begin() called twice without cleanup()")
            }
        }
        self.target = Some(target.clone());
        self.depth = depth;
        self.damage = damage.clone();
        self.opaque = opaque;
        self.state = FrameState::Recording;
        log::trace!("Frame began recording for {:?}", target);
    }

    fn assert_recording(&self, what: &str) {
        match self.state {
            FrameState::Recording => {}
            FrameState::Submitted => panic!("cannot {} a frame after end()", what),
            FrameState::Idle | FrameState::Setup => {
                panic!("cannot {} a frame before begin()", what)
            }
        }
    }

    /// Appends an operation to the chain.
    ///
    /// # Panics
    /// Panics when not recording, or when the operation's stage is not
    /// legal at this point: draws and pass commands only inside a render
    /// pass; uploads and transfers only outside; no nested passes.
    pub fn append<O: Op>(&mut self, op: O) -> OpId
    where
        B: Records<O>,
    {
        self.assert_recording("append to");
        let stage = op.stage();
        match stage {
            Stage::BeginPass => {
                assert!(!self.pass_open, "render passes cannot be nested");
                self.pass_open = true;
            }
            Stage::EndPass => {
                assert!(self.pass_open, "no render pass to end");
                self.pass_open = false;
            }
            Stage::Command | Stage::Shader => assert!(
                self.pass_open,
                "{:?} operations must be recorded inside a render pass",
                stage
            ),
            Stage::Upload | Stage::Pass => assert!(
                !self.pass_open,
                "{:?} operations cannot be recorded inside a render pass",
                stage
            ),
        }
        self.chain.push(B::record(op))
    }

    /// The last appended operation, if it is an `O`.
    pub fn last_op_mut<O: Op>(&mut self) -> Option<&mut O> {
        self.chain.last_mut()?.as_any_mut().downcast_mut()
    }

    pub fn is_pass_open(&self) -> bool {
        self.pass_open
    }

    /// Reserves `size` bytes of vertex data and returns their offset.
    ///
    /// Reservations are contiguous and unpadded.
    pub fn reserve_vertex_data(&mut self, size: usize) -> usize {
        self.assert_recording("reserve vertex data in");
        let offset = self.vertex_data.len();
        self.vertex_data.resize(offset + size, 0);
        offset
    }

    pub fn write_vertex_data<T: Pod>(&mut self, offset: usize, data: &[T]) {
        self.assert_recording("write vertex data in");
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.vertex_data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reserves and writes `instances`, returning their offset.
    pub fn push_instances<T: Pod>(&mut self, instances: &[T]) -> usize {
        let offset = self.reserve_vertex_data(std::mem::size_of_val(instances));
        self.write_vertex_data(offset, instances);
        offset
    }

    pub fn vertex_data_len(&self) -> usize {
        self.vertex_data.len()
    }

    /// Stores `globals` and returns their offset in the globals buffer.
    pub fn add_globals(&mut self, globals: &Globals) -> usize {
        self.assert_recording("add globals to");
        let offset = self.globals_data.len();
        self.globals_data
            .extend_from_slice(bytemuck::bytes_of(globals));
        offset
    }

    /// Copies `data` into a storage buffer, returning the buffer and
    /// the offset of the data in it.
    ///
    /// # Panics
    /// Panics if `data` exceeds the storage buffer capacity.
    pub fn write_storage_buffer(&mut self, data: &[u8]) -> Result<(Buffer, usize)> {
        self.assert_recording("write storage data in");
        assert!(
            data.len() <= self.storage_capacity,
            "storage request of {} bytes exceeds the buffer capacity of {}",
            data.len(),
            self.storage_capacity
        );

        let mut offset = align_up(self.storage_offset, STORAGE_ALIGNMENT);
        if self.storage_buffers.is_empty() || offset + data.len() > self.storage_capacity {
            let buffer = self
                .device()
                .create_buffer(BufferUsage::Storage, self.storage_capacity)?;
            log::trace!("Created storage buffer #{}", self.storage_buffers.len());
            self.storage_buffers.push(buffer);
            offset = 0;
        }

        let buffer = self.storage_buffers[self.storage_buffers.len() - 1].clone();
        buffer.write(offset, data);
        self.storage_offset = offset + data.len();
        Ok((buffer, offset))
    }

    pub fn storage_buffer_count(&self) -> usize {
        self.storage_buffers.len()
    }

    /// Creates an image holding `texture` and records its upload.
    ///
    /// A mipmap chain is requested when `want_mipmap` is set and the
    /// frame may optimize with [`Optimizations::MIPMAP`].
    pub fn upload_texture(&mut self, texture: &Texture, want_mipmap: bool) -> Result<Image>
    where
        B: Records<UploadOp>,
    {
        self.assert_recording("upload a texture in");
        let mut flags = ImageFlags::BLIT | ImageFlags::FILTERABLE | ImageFlags::DOWNLOADABLE;
        if want_mipmap && self.should_optimize(Optimizations::MIPMAP) {
            flags |= ImageFlags::CAN_MIPMAP | ImageFlags::MIPMAP;
        }
        let image = self.device().create_image(&ImageDescriptor::new(
            texture.width(),
            texture.height(),
            flags,
        ))?;
        UploadOp::append(self, &image, texture)?;
        Ok(image)
    }

    /// Finishes recording and submits the chain.
    ///
    /// The frame is submitted even if this fails; [`Frame::sync`]
    /// reports the same error afterwards.
    pub fn end(&mut self, target: &Image) -> Result<()> {
        self.assert_recording("end");
        assert!(
            self.target.as_ref().map_or(false, |t| t.ptr_eq(target)),
            "end() called with a different target than begin()"
        );
        assert!(!self.pass_open, "end() called with an open render pass");

        self.state = FrameState::Submitted;
        let result = self.submit();
        if let Err(e) = &result {
            log::warn!("Frame submission failed: {}", e);
            self.status = Some(Err(e.clone()));
        }
        result
    }

    fn submit(&mut self) -> Result<()> {
        let device = self.device().clone();
        if !self.vertex_data.is_empty() {
            let buffer = device.create_buffer(BufferUsage::Vertex, self.vertex_data.len())?;
            buffer.write(0, &self.vertex_data);
            self.vertex_buffer = Some(buffer);
        }
        if !self.globals_data.is_empty() {
            let buffer = device.create_buffer(BufferUsage::Globals, self.globals_data.len())?;
            buffer.write(0, &self.globals_data);
            self.globals_buffer = Some(buffer);
        }

        let target = self
            .target
            .as_ref()
            .expect("recording frame without target");
        log::debug!(
            "Submitting frame {} with {} operations ({} bytes of vertex data)",
            self.timestamp,
            self.chain.len(),
            self.vertex_data.len()
        );
        let submission = device.submit(Submit {
            chain: &self.chain,
            target,
            vertex_buffer: self.vertex_buffer.as_ref(),
            globals_buffer: self.globals_buffer.as_ref(),
        })?;
        self.submission = Some(submission);
        Ok(())
    }

    /// Whether the device is still executing the frame. Never blocks.
    pub fn is_busy(&self) -> bool {
        match (&self.device, &self.submission) {
            (Some(device), Some(submission)) => device.is_busy(submission),
            _ => false,
        }
    }

    /// Blocks until the device finished executing the frame.
    pub fn wait(&mut self) {
        let _ = self.sync();
    }

    /// Blocks until the device finished executing the frame and
    /// returns whether it succeeded.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(status) = &self.status {
            return status.clone();
        }
        let status = match (&self.device, &self.submission) {
            (Some(device), Some(submission)) => device.wait(submission),
            _ => return Ok(()),
        };
        if let Err(e) = &status {
            log::error!("Frame {} failed on the device: {}", self.timestamp, e);
        }
        self.status = Some(status.clone());
        status
    }

    /// Releases the chain and the transient buffers, returning the
    /// frame to [`FrameState::Idle`].
    ///
    /// Waits for the device first if the frame was submitted.
    pub fn cleanup(&mut self) {
        if self.state == FrameState::Submitted {
            self.wait();
        }
        let released = self.chain.release();
        log::debug!(
            "Cleaned up frame {}, released {} operations",
            self.timestamp,
            released
        );

        self.pass_open = false;
        self.target = None;
        self.damage = Region::new();
        self.opaque = None;
        self.vertex_data.clear();
        self.globals_data.clear();
        self.vertex_buffer = None;
        self.globals_buffer = None;
        self.storage_buffers.clear();
        self.storage_offset = 0;
        self.submission = None;
        self.status = None;
        self.state = FrameState::Idle;
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The device the frame is set up for.
    ///
    /// # Panics
    /// Panics before [`Frame::setup`].
    pub fn device(&self) -> &B {
        self.device
            .as_ref()
            .expect("frame used before setup()")
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Whether the frame may use `optimization`.
    pub fn should_optimize(&self, optimization: Optimizations) -> bool {
        self.optimizations.contains(optimization)
    }

    pub fn optimizations(&self) -> Optimizations {
        self.optimizations
    }

    pub fn target(&self) -> Option<&Image> {
        self.target.as_ref()
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn damage(&self) -> &Region {
        &self.damage
    }

    pub fn opaque(&self) -> Option<Rect> {
        self.opaque
    }

    pub fn op_count(&self) -> usize {
        self.chain.len()
    }

    pub fn chain(&self) -> &OpChain<B::Record> {
        &self.chain
    }

    /// Describes every recorded operation, one per line, indented
    /// by render pass.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut indent = 0;
        for (_, op) in self.chain.iter() {
            if op.stage() == Stage::EndPass {
                indent = indent.max(1) - 1;
            }
            op.print(&mut Printer::new(&mut out, indent));
            if op.stage() == Stage::BeginPass {
                indent += 1;
            }
        }
        out
    }
}

impl<B: Backend> Default for Frame<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Drop for Frame<B> {
    fn drop(&mut self) {
        if self.state != FrameState::Idle {
            self.cleanup();
        }
    }
}

fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        backend::immediate::{ImmediateCommandState, ImmediateDevice, ImmediateOp},
        op::{
            color::ColorOp,
            pass::{BeginPassOp, EndPassOp},
            tests::CountingOp,
        },
        Color, IntRect,
    };

    impl ImmediateOp for CountingOp {
        fn immediate_command(
            &self,
            at: OpId,
            chain: &OpChain<dyn ImmediateOp>,
            _state: &mut ImmediateCommandState<'_>,
        ) -> Result<Option<OpId>> {
            Ok(chain.next(at))
        }
    }

    fn recording() -> (Frame<ImmediateDevice>, Image) {
        let device = ImmediateDevice::new();
        let target = device
            .create_image(&ImageDescriptor::new(
                4,
                4,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ))
            .unwrap();
        let mut frame = Frame::with_storage_capacity(64);
        frame.setup(device, Optimizations::all());
        frame.begin(&target, Depth::U8, &Region::from_rect(target.bounds()), None);
        (frame, target)
    }

    #[test]
    fn release_hooks_run_once_at_cleanup() {
        let released = Arc::new(AtomicUsize::new(0));
        let (mut frame, target) = recording();
        for tag in 0..3 {
            frame.append(CountingOp {
                tag,
                stage: Stage::Pass,
                released: Arc::clone(&released),
            });
        }
        frame.end(&target).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        frame.cleanup();
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert_eq!(frame.state(), FrameState::Idle);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn records_drop_image_references_at_cleanup() {
        let (mut frame, target) = recording();
        let base = target.ref_count();
        BeginPassOp::append(&mut frame, &target, target.bounds(), None);
        EndPassOp::append(&mut frame);
        assert!(target.ref_count() > base);
        frame.end(&target).unwrap();
        assert!(!frame.is_busy());
        frame.cleanup();
        assert_eq!(target.ref_count(), base - 1);
    }

    #[test]
    fn vertex_reservations_are_contiguous() {
        let (mut frame, _target) = recording();
        assert_eq!(frame.reserve_vertex_data(12), 0);
        assert_eq!(frame.reserve_vertex_data(5), 12);
        assert_eq!(frame.reserve_vertex_data(3), 17);
        assert_eq!(frame.vertex_data_len(), 20);
    }

    #[test]
    fn globals_offsets_advance_by_size() {
        let (mut frame, _target) = recording();
        let size = std::mem::size_of::<Globals>();
        assert_eq!(frame.add_globals(&Globals::identity()), 0);
        assert_eq!(frame.add_globals(&Globals::identity()), size);
    }

    #[test]
    fn storage_is_aligned_and_overflows_into_new_buffers() {
        let (mut frame, _target) = recording();
        let (first, offset) = frame.write_storage_buffer(&[1; 20]).unwrap();
        assert_eq!(offset, 0);
        let (second, offset) = frame.write_storage_buffer(&[2; 20]).unwrap();
        assert_eq!(offset, 32);
        assert!(first.ptr_eq(&second));
        let (third, offset) = frame.write_storage_buffer(&[3; 20]).unwrap();
        assert_eq!(offset, 0);
        assert!(!third.ptr_eq(&first));
        assert_eq!(frame.storage_buffer_count(), 2);
        assert_eq!(&first.read()[32..52], &[2; 20]);
    }

    #[test]
    #[should_panic(expected = "exceeds the buffer capacity")]
    fn oversized_storage_request() {
        let (mut frame, _target) = recording();
        let _ = frame.write_storage_buffer(&[0; 65]);
    }

    #[test]
    #[should_panic(expected = "begin() called twice")]
    fn double_begin() {
        let (mut frame, target) = recording();
        frame.begin(&target, Depth::U8, &Region::new(), None);
    }

    #[test]
    #[should_panic(expected = "before begin()")]
    fn end_before_begin() {
        let device = ImmediateDevice::new();
        let target = device
            .create_image(&ImageDescriptor::new(1, 1, ImageFlags::RENDERABLE))
            .unwrap();
        let mut frame = Frame::new();
        frame.setup(device, Optimizations::all());
        let _ = frame.end(&target);
    }

    #[test]
    #[should_panic(expected = "after end()")]
    fn append_after_end() {
        let (mut frame, target) = recording();
        frame.end(&target).unwrap();
        frame.reserve_vertex_data(4);
    }

    #[test]
    #[should_panic(expected = "after end()")]
    fn vertex_write_after_end() {
        let (mut frame, target) = recording();
        let offset = frame.reserve_vertex_data(4);
        frame.end(&target).unwrap();
        frame.write_vertex_data(offset, &[7u8; 4]);
    }

    #[test]
    #[should_panic(expected = "inside a render pass")]
    fn draw_outside_pass() {
        let (mut frame, _target) = recording();
        ColorOp::append(&mut frame, Rect::from_xywh(0., 0., 1., 1.), Color::WHITE);
    }

    #[test]
    #[should_panic(expected = "cannot be nested")]
    fn nested_passes() {
        let (mut frame, target) = recording();
        BeginPassOp::append(&mut frame, &target, target.bounds(), None);
        BeginPassOp::append(&mut frame, &target, target.bounds(), None);
    }

    #[test]
    #[should_panic(expected = "open render pass")]
    fn end_with_open_pass() {
        let (mut frame, target) = recording();
        BeginPassOp::append(&mut frame, &target, IntRect::new(0, 0, 2, 2), None);
        let _ = frame.end(&target);
    }

    #[test]
    fn dump_indents_passes() {
        let (mut frame, target) = recording();
        BeginPassOp::append(&mut frame, &target, target.bounds(), Some(Color::BLACK));
        ColorOp::append(&mut frame, Rect::from_xywh(0., 0., 1., 1.), Color::WHITE);
        EndPassOp::append(&mut frame);
        assert_eq!(
            frame.dump(),
            "begin-pass 4x4 0 0 4 4 clear #000000\n  color 1\nend-pass\n"
        );
    }

    #[test]
    fn environment_and_device_narrow_optimizations() {
        let (frame, _target) = recording();
        assert_eq!(
            frame.optimizations(),
            Optimizations::all() & !optimizations::disabled_by_env()
        );
    }
}
