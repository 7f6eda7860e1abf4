//! A device with an immediate-mode API: a single context with bound
//! state, executing calls in the order they are made.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use glam::uvec2;
use parking_lot::{Mutex, MutexGuard};

use super::{Backend, BackendKind, DeviceSettings, Records, Submit};
use crate::{
    memory::{Allocation, MemoryBudget},
    op::{Op, OpChain, OpId},
    Buffer, BufferUsage, Error, Image, ImageDescriptor, ImageFlags, IntRect, Optimizations,
    Result,
};

pub use self::driver::{
    Capability, Driver, DriverError, FramebufferName, FramebufferTarget, Program, TextureName,
};

mod driver;

/// Execution hook of an operation on the [`ImmediateDevice`].
pub trait ImmediateOp: Op {
    /// Issues the driver calls for the record at `at`.
    ///
    /// Returns the record to continue the walk with.
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>>;
}

impl<O: ImmediateOp> Records<O> for ImmediateDevice {
    fn record(op: O) -> Box<dyn ImmediateOp> {
        Box::new(op)
    }
}

/// State threaded through the execution hooks of one submission.
pub struct ImmediateCommandState<'a> {
    driver: &'a mut Driver,
    flip_y: Option<u32>,
    globals_buffer: Option<&'a Buffer>,
}

impl<'a> ImmediateCommandState<'a> {
    pub fn driver(&mut self) -> &mut Driver {
        self.driver
    }

    /// Height to flip draws around, if the current draw target has
    /// its origin in the bottom-left corner.
    pub fn flip_y(&self) -> Option<u32> {
        self.flip_y
    }

    pub fn set_flip_y(&mut self, flip_y: Option<u32>) {
        self.flip_y = flip_y;
    }

    pub fn globals_buffer(&self) -> Option<&'a Buffer> {
        self.globals_buffer
    }

    /// Converts a rectangle in top-left coordinates of the current
    /// draw target into window coordinates.
    pub fn window_rect(&self, rect: IntRect) -> IntRect {
        match self.flip_y {
            Some(height) => rect.flipped_y(height as i32),
            None => rect,
        }
    }
}

/// Backend-private part of an image created by an [`ImmediateDevice`].
#[derive(Debug)]
pub(crate) struct GlImage {
    texture: TextureName,
    framebuffer: FramebufferName,
    bottom_left: bool,
    graveyard: Arc<Mutex<Vec<(TextureName, FramebufferName)>>>,
    _allocation: Allocation,
}

impl GlImage {
    pub fn get(image: &Image) -> &GlImage {
        image.backend()
    }

    pub fn texture(&self) -> TextureName {
        self.texture
    }

    pub fn framebuffer(&self) -> FramebufferName {
        self.framebuffer
    }

    /// The flip needed to address `image` in top-left coordinates.
    pub fn flip_y(image: &Image) -> Option<u32> {
        Self::get(image).bottom_left.then(|| image.height())
    }
}

impl Drop for GlImage {
    fn drop(&mut self) {
        // The context may be in use; names are deleted on its next use.
        self.graveyard.lock().push((self.texture, self.framebuffer));
    }
}

/// Completion of a submission. Calls run synchronously, so it is
/// signaled by the time `submit` returns.
#[derive(Debug, Clone)]
pub struct SyncObject {
    signaled: bool,
}

impl SyncObject {
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }
}

/// A software device modeling an immediate-mode API.
#[derive(Clone)]
pub struct ImmediateDevice(Arc<DeviceInner>);

struct DeviceInner {
    settings: DeviceSettings,
    budget: MemoryBudget,
    driver: Mutex<Driver>,
    graveyard: Arc<Mutex<Vec<(TextureName, FramebufferName)>>>,
    lost: AtomicBool,
}

impl ImmediateDevice {
    pub fn new() -> Self {
        Self::with_settings(DeviceSettings::default())
    }

    pub fn with_settings(settings: DeviceSettings) -> Self {
        log::debug!("Created immediate device with {:?}", settings);
        Self(Arc::new(DeviceInner {
            budget: MemoryBudget::new(settings.memory_budget),
            settings,
            driver: Mutex::new(Driver::new()),
            graveyard: Arc::new(Mutex::new(Vec::new())),
            lost: AtomicBool::new(false),
        }))
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.0.settings
    }

    /// Makes the context current, deleting the names of dropped images.
    pub fn driver(&self) -> MutexGuard<'_, Driver> {
        let mut driver = self.0.driver.lock();
        for (texture, framebuffer) in self.0.graveyard.lock().drain(..) {
            driver.delete_framebuffer(framebuffer);
            driver.delete_texture(texture);
        }
        driver
    }

    pub fn is_lost(&self) -> bool {
        self.0.lost.load(Ordering::Acquire)
    }

    /// Puts the context into the lost state, as a GPU reset would.
    pub fn lose(&self) {
        if !self.0.lost.swap(true, Ordering::AcqRel) {
            log::error!("Context lost");
        }
    }

    pub fn memory_used(&self) -> usize {
        self.0.budget.used()
    }

    /// Creates an image modeling the default framebuffer of a window,
    /// with its origin in the bottom-left corner.
    pub fn create_surface(&self, width: u32, height: u32) -> Result<Image> {
        self.allocate_image(
            &ImageDescriptor::new(
                width,
                height,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ),
            true,
        )
    }

    fn check_lost(&self) -> Result<()> {
        if self.is_lost() {
            Err(Error::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn allocate_image(&self, descriptor: &ImageDescriptor, bottom_left: bool) -> Result<Image> {
        self.check_lost()?;
        let flags = self.0.settings.negotiate(descriptor)?;
        let allocation = self
            .0
            .budget
            .allocate(descriptor.width as usize * descriptor.height as usize * 4)?;

        let mut driver = self.driver();
        let texture = driver.gen_texture(descriptor.width, descriptor.height);
        let framebuffer = driver.gen_framebuffer(texture);
        drop(driver);

        Ok(Image::new(
            uvec2(descriptor.width, descriptor.height),
            flags,
            descriptor.depth,
            GlImage {
                texture,
                framebuffer,
                bottom_left,
                graveyard: Arc::clone(&self.0.graveyard),
                _allocation: allocation,
            },
        ))
    }
}

impl Default for ImmediateDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ImmediateDevice {
    const KIND: BackendKind = BackendKind::Immediate;

    type Record = dyn ImmediateOp;
    type Submission = SyncObject;

    fn supported_optimizations(&self) -> Optimizations {
        Optimizations::all()
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<Image> {
        self.allocate_image(descriptor, false)
    }

    fn create_buffer(&self, usage: BufferUsage, size: usize) -> Result<Buffer> {
        self.check_lost()?;
        let allocation = self.0.budget.allocate(size)?;
        Ok(Buffer::new(usage, size, allocation))
    }

    fn submit(&self, submit: Submit<'_, Self>) -> Result<SyncObject> {
        self.check_lost()?;

        let mut driver = self.driver();
        if let Some(error) = driver.get_error() {
            log::warn!("Discarding stale driver error: {}", error);
        }
        driver.bind_vertex_buffer(submit.vertex_buffer.cloned());

        let mut state = ImmediateCommandState {
            driver: &mut driver,
            flip_y: GlImage::flip_y(submit.target),
            globals_buffer: submit.globals_buffer,
        };
        let mut cursor = submit.chain.first();
        let mut walk = Ok(());
        while let Some(at) = cursor {
            match submit
                .chain
                .get(at)
                .immediate_command(at, submit.chain, &mut state)
            {
                Ok(next) => cursor = next,
                Err(e) => {
                    walk = Err(e);
                    break;
                }
            }
        }

        driver.bind_vertex_buffer(None);
        driver.bind_framebuffer(FramebufferTarget::Read, None);
        driver.bind_framebuffer(FramebufferTarget::Draw, None);
        walk?;

        if let Some(error) = driver.get_error() {
            log::error!("Submission failed: {}", error);
            return Err(Error::Backend(error.to_string()));
        }
        let signaled = driver.finish();
        log::debug!("Executed {} operations", submit.chain.len());
        Ok(SyncObject { signaled })
    }

    fn is_busy(&self, sync: &SyncObject) -> bool {
        !sync.is_signaled()
    }

    fn wait(&self, _sync: &SyncObject) -> Result<()> {
        self.check_lost()
    }
}
