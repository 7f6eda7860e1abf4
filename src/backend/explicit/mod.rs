//! A device with an explicit API: commands are recorded into command
//! buffers, images carry layouts that must be transitioned with barriers,
//! and completion is reported through fences.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use glam::uvec2;

use super::{Backend, BackendKind, DeviceSettings, Records, Submit};
use crate::{
    memory::MemoryBudget,
    op::{Op, OpChain, OpId},
    Buffer, BufferUsage, Error, Image, ImageDescriptor, ImageFlags, Optimizations, Result,
    Texture,
};

use self::{
    command::CommandBuffer,
    image::ExplicitImage,
    queue::{Queue, QueueSubmission},
};

pub use self::{
    command::Pipeline,
    image::{Access, ImageState, Layout, PipelineStage},
    sync::{Fence, Semaphore, Semaphores},
};

mod command;
mod image;
mod queue;
mod sync;

pub(crate) use self::command::Command;

/// Execution hook of an operation on the [`ExplicitDevice`].
pub trait ExplicitOp: Op {
    /// Records the native commands for the record at `at`.
    ///
    /// Returns the record to continue the walk with. Most operations
    /// return `chain.next(at)`.
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>>;
}

impl<O: ExplicitOp> Records<O> for ExplicitDevice {
    fn record(op: O) -> Box<dyn ExplicitOp> {
        Box::new(op)
    }
}

/// State threaded through the execution hooks of one submission.
pub struct ExplicitCommandState<'a> {
    device: &'a ExplicitDevice,
    commands: &'a mut CommandBuffer,
    semaphores: &'a mut Semaphores,
    /// Tracked states before the submission first changed them.
    saved: Vec<(Image, ImageState)>,
    /// External waits taken over from images.
    acquired: Vec<(Image, Semaphore)>,
}

impl<'a> ExplicitCommandState<'a> {
    fn new(
        device: &'a ExplicitDevice,
        commands: &'a mut CommandBuffer,
        semaphores: &'a mut Semaphores,
    ) -> Self {
        Self {
            device,
            commands,
            semaphores,
            saved: Vec::new(),
            acquired: Vec::new(),
        }
    }

    pub fn device(&self) -> &ExplicitDevice {
        self.device
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn semaphores(&mut self) -> &mut Semaphores {
        self.semaphores
    }

    /// Layout the image will be in when the commands recorded so far
    /// have executed.
    pub fn layout(&self, image: &Image) -> Layout {
        image.backend::<ExplicitImage>().tracked.lock().layout
    }

    /// Marks the image as used by this submission. A pending external
    /// wait semaphore of the image is moved into the submission.
    pub fn acquire(&mut self, image: &Image) {
        if let Some(semaphore) = image.backend::<ExplicitImage>().pending_wait.lock().take() {
            log::debug!("Submission waits for external producer of {:?}", image);
            self.semaphores.add_wait(semaphore.clone());
            self.acquired.push((image.clone(), semaphore));
        }
    }

    /// Makes the image ready for an access in `stage` with `layout`,
    /// recording a barrier unless it is already in exactly that state.
    pub fn transition(
        &mut self,
        image: &Image,
        stage: PipelineStage,
        layout: Layout,
        access: Access,
    ) {
        self.acquire(image);

        let mut tracked = image.backend::<ExplicitImage>().tracked.lock();
        let wanted = ImageState {
            layout,
            stage,
            access,
        };
        if *tracked == wanted {
            return;
        }
        if !self.saved.iter().any(|(saved, _)| saved.ptr_eq(image)) {
            self.saved.push((image.clone(), *tracked));
        }

        self.commands.push(Command::PipelineBarrier {
            image: image.clone(),
            src_stage: tracked.stage,
            dst_stage: stage,
            src_access: tracked.access,
            dst_access: access,
            old_layout: tracked.layout,
            new_layout: layout,
        });
        *tracked = wanted;
    }

    /// Like [`transition`](Self::transition), but leaves images in a
    /// layout legal for every access as they are.
    ///
    /// Returns the layout the access happens in.
    pub fn transition_unless_shared(
        &mut self,
        image: &Image,
        stage: PipelineStage,
        layout: Layout,
        access: Access,
    ) -> Layout {
        match self.layout(image) {
            shared @ (Layout::General | Layout::SharedPresent) => {
                self.acquire(image);
                shared
            }
            _ => {
                self.transition(image, stage, layout, access);
                layout
            }
        }
    }

    /// Undoes the effects recording had on the images, for a
    /// submission that is abandoned before reaching the queue.
    fn rollback(&mut self) {
        for (image, state) in self.saved.drain(..) {
            *image.backend::<ExplicitImage>().tracked.lock() = state;
        }
        for (image, semaphore) in self.acquired.drain(..) {
            *image.backend::<ExplicitImage>().pending_wait.lock() = Some(semaphore);
        }
    }
}

/// A software device modeling an explicit API.
///
/// Submissions execute on a queue thread in the order they were made.
#[derive(Clone)]
pub struct ExplicitDevice(Arc<DeviceInner>);

struct DeviceInner {
    settings: DeviceSettings,
    budget: MemoryBudget,
    queue: Queue,
    lost: Arc<AtomicBool>,
}

impl ExplicitDevice {
    pub fn new() -> Result<Self> {
        Self::with_settings(DeviceSettings::default())
    }

    pub fn with_settings(settings: DeviceSettings) -> Result<Self> {
        let lost = Arc::new(AtomicBool::new(false));
        let queue = Queue::new(Arc::clone(&lost))?;
        log::debug!("Created explicit device with {:?}", settings);
        Ok(Self(Arc::new(DeviceInner {
            budget: MemoryBudget::new(settings.memory_budget),
            settings,
            queue,
            lost,
        })))
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.0.settings
    }

    pub fn is_lost(&self) -> bool {
        self.0.lost.load(Ordering::Acquire)
    }

    /// Puts the device into the lost state, as a driver reset would.
    pub fn lose(&self) {
        if !self.0.lost.swap(true, Ordering::AcqRel) {
            log::error!("Device lost");
        }
    }

    /// Bytes of device memory in use.
    pub fn memory_used(&self) -> usize {
        self.0.budget.used()
    }

    /// The tracked synchronization state of an image.
    pub fn image_state(&self, image: &Image) -> ImageState {
        *image.backend::<ExplicitImage>().tracked.lock()
    }

    /// Creates a presentable image. Every submission rendering to it
    /// signals the returned semaphore when it finishes.
    pub fn create_surface(&self, width: u32, height: u32) -> Result<(Image, Semaphore)> {
        let present = Semaphore::new();
        let image = self.allocate_image(
            &ImageDescriptor::new(
                width,
                height,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ),
            Layout::Undefined,
            Some(present.clone()),
        )?;
        Ok((image, present))
    }

    /// Wraps externally produced pixels into an image.
    ///
    /// When `ready` is given, the first submission using the image
    /// waits for it before executing.
    pub fn import_image(&self, texture: &Texture, ready: Option<Semaphore>) -> Result<Image> {
        let image = self.allocate_image(
            &ImageDescriptor::new(
                texture.width(),
                texture.height(),
                ImageFlags::BLIT
                    | ImageFlags::FILTERABLE
                    | ImageFlags::DOWNLOADABLE
                    | ImageFlags::EXTERNAL,
            ),
            Layout::General,
            None,
        )?;
        let backend = image.backend::<ExplicitImage>();
        backend
            .memory
            .lock()
            .pixels
            .write_rect(image.bounds(), texture.pixels());
        *backend.pending_wait.lock() = ready;
        Ok(image)
    }

    fn check_lost(&self) -> Result<()> {
        if self.is_lost() {
            Err(Error::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn allocate_image(
        &self,
        descriptor: &ImageDescriptor,
        layout: Layout,
        present: Option<Semaphore>,
    ) -> Result<Image> {
        self.check_lost()?;
        let mut flags = self.0.settings.negotiate(descriptor)?;
        flags |= descriptor.flags & ImageFlags::EXTERNAL;
        let allocation = self
            .0
            .budget
            .allocate(descriptor.width as usize * descriptor.height as usize * 4)?;
        Ok(Image::new(
            uvec2(descriptor.width, descriptor.height),
            flags,
            descriptor.depth,
            ExplicitImage::new(
                descriptor.width,
                descriptor.height,
                layout,
                present,
                allocation,
            ),
        ))
    }
}

impl Backend for ExplicitDevice {
    const KIND: BackendKind = BackendKind::Explicit;

    type Record = dyn ExplicitOp;
    type Submission = Fence;

    fn supported_optimizations(&self) -> Optimizations {
        Optimizations::all()
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<Image> {
        self.allocate_image(descriptor, Layout::Undefined, None)
    }

    fn create_buffer(&self, usage: BufferUsage, size: usize) -> Result<Buffer> {
        self.check_lost()?;
        let allocation = self.0.budget.allocate(size)?;
        Ok(Buffer::new(usage, size, allocation))
    }

    fn submit(&self, submit: Submit<'_, Self>) -> Result<Fence> {
        self.check_lost()?;

        let mut commands = CommandBuffer::new();
        let mut semaphores = Semaphores::default();
        let mut state = ExplicitCommandState::new(self, &mut commands, &mut semaphores);

        let mut cursor = submit.chain.first();
        while let Some(at) = cursor {
            match submit
                .chain
                .get(at)
                .explicit_command(at, submit.chain, &mut state)
            {
                Ok(next) => cursor = next,
                Err(e) => {
                    log::warn!("Abandoning submission: {}", e);
                    state.rollback();
                    return Err(e);
                }
            }
        }

        if let Some(present) = &submit.target.backend::<ExplicitImage>().present {
            state.transition(
                submit.target,
                PipelineStage::BOTTOM_OF_PIPE,
                Layout::SharedPresent,
                Access::empty(),
            );
            state.semaphores().add_signal(present.clone());
        }

        log::debug!(
            "Submitting {} commands for {} operations",
            commands.len(),
            submit.chain.len()
        );

        let fence = Fence::new();
        self.0.queue.submit(QueueSubmission {
            commands,
            vertex_buffer: submit.vertex_buffer.cloned(),
            globals_buffer: submit.globals_buffer.cloned(),
            semaphores,
            fence: fence.clone(),
        })?;
        Ok(fence)
    }

    fn is_busy(&self, fence: &Fence) -> bool {
        !fence.is_signaled()
    }

    fn wait(&self, fence: &Fence) -> Result<()> {
        fence.wait()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::{op::Printer, op::Stage, Color, Depth, Frame, Region};

    /// Transitions its images for writing, then fails.
    #[derive(Debug)]
    struct RefusingOp(Vec<Image>);

    impl Op for RefusingOp {
        fn stage(&self) -> Stage {
            Stage::Pass
        }

        fn print(&self, printer: &mut Printer<'_>) {
            printer.op("refusing").newline();
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    impl ExplicitOp for RefusingOp {
        fn explicit_command(
            &self,
            _at: OpId,
            _chain: &OpChain<dyn ExplicitOp>,
            state: &mut ExplicitCommandState<'_>,
        ) -> Result<Option<OpId>> {
            for image in &self.0 {
                state.transition(
                    image,
                    PipelineStage::TRANSFER,
                    Layout::TransferDst,
                    Access::TRANSFER_WRITE,
                );
            }
            Err(Error::Backend("refused".into()))
        }
    }

    #[test]
    fn transition_is_idempotent() {
        let device = ExplicitDevice::new().unwrap();
        let image = device
            .create_image(&ImageDescriptor::new(2, 2, ImageFlags::BLIT))
            .unwrap();
        let mut commands = CommandBuffer::new();
        let mut semaphores = Semaphores::default();
        let mut state = ExplicitCommandState::new(&device, &mut commands, &mut semaphores);
        for _ in 0..3 {
            state.transition(
                &image,
                PipelineStage::TRANSFER,
                Layout::TransferSrc,
                Access::TRANSFER_READ,
            );
        }
        assert_eq!(state.layout(&image), Layout::TransferSrc);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn first_transition_takes_wait_semaphore() {
        let device = ExplicitDevice::new().unwrap();
        let ready = Semaphore::new();
        let texture = Texture::new(1, 1, vec![Color::WHITE]);
        let image = device.import_image(&texture, Some(ready.clone())).unwrap();
        assert_eq!(device.image_state(&image).layout, Layout::General);

        let mut commands = CommandBuffer::new();
        let mut semaphores = Semaphores::default();
        let mut state = ExplicitCommandState::new(&device, &mut commands, &mut semaphores);
        state.transition(
            &image,
            PipelineStage::FRAGMENT_SHADER,
            Layout::ShaderReadOnly,
            Access::SHADER_READ,
        );
        state.transition(
            &image,
            PipelineStage::TRANSFER,
            Layout::TransferSrc,
            Access::TRANSFER_READ,
        );
        assert_eq!(semaphores.waits().len(), 1);
        assert!(semaphores.waits()[0].ptr_eq(&ready));
    }

    #[test]
    fn memory_budget_is_enforced() {
        let device = ExplicitDevice::with_settings(DeviceSettings {
            memory_budget: 64,
            ..Default::default()
        })
        .unwrap();
        let image = device
            .create_image(&ImageDescriptor::new(4, 4, ImageFlags::RENDERABLE))
            .unwrap();
        assert_eq!(device.memory_used(), 64);
        assert!(matches!(
            device.create_buffer(BufferUsage::Vertex, 1),
            Err(Error::OutOfDeviceMemory { .. })
        ));
        drop(image);
        assert_eq!(device.memory_used(), 0);
    }

    #[test]
    fn lost_device_refuses_work() {
        let device = ExplicitDevice::new().unwrap();
        device.lose();
        assert_eq!(
            device
                .create_image(&ImageDescriptor::new(1, 1, ImageFlags::BLIT))
                .unwrap_err(),
            Error::DeviceLost
        );
    }

    #[test]
    fn failed_submission_restores_image_state() {
        let device = ExplicitDevice::new().unwrap();
        let ready = Semaphore::new();
        let imported = device
            .import_image(&Texture::new(1, 1, vec![Color::WHITE]), Some(ready))
            .unwrap();
        let target = device
            .create_image(&ImageDescriptor::new(1, 1, ImageFlags::RENDERABLE))
            .unwrap();

        let mut frame = Frame::new();
        frame.setup(device.clone(), Optimizations::all());
        frame.begin(&target, Depth::U8, &Region::new(), None);
        frame.append(RefusingOp(vec![target.clone(), imported.clone()]));
        assert_eq!(frame.end(&target), Err(Error::Backend("refused".into())));
        frame.cleanup();

        assert_eq!(device.image_state(&target).layout, Layout::Undefined);
        assert_eq!(device.image_state(&imported).layout, Layout::General);
        assert!(imported
            .backend::<ExplicitImage>()
            .pending_wait
            .lock()
            .is_some());
        assert!(!device.is_lost());
    }

    #[test]
    fn queue_rejects_barrier_access_outside_its_stage() {
        let device = ExplicitDevice::new().unwrap();
        let image = device
            .create_image(&ImageDescriptor::new(1, 1, ImageFlags::BLIT))
            .unwrap();
        let mut commands = CommandBuffer::new();
        commands.push(Command::PipelineBarrier {
            image,
            src_stage: PipelineStage::TOP_OF_PIPE,
            dst_stage: PipelineStage::FRAGMENT_SHADER,
            src_access: Access::empty(),
            dst_access: Access::TRANSFER_WRITE,
            old_layout: Layout::Undefined,
            new_layout: Layout::TransferDst,
        });
        let fence = Fence::new();
        device
            .0
            .queue
            .submit(QueueSubmission {
                commands,
                vertex_buffer: None,
                globals_buffer: None,
                semaphores: Semaphores::default(),
                fence: fence.clone(),
            })
            .unwrap();
        assert_eq!(fence.wait(), Err(Error::DeviceLost));
        assert!(device.is_lost());
    }
}
