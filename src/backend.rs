use serde::{Deserialize, Serialize};

use crate::{
    op::{
        blit::BlitOp, clear::ClearOp, color::ColorOp, download::DownloadOp, globals::GlobalsOp,
        gradient::GradientOp, pass::BeginPassOp, pass::EndPassOp, scissor::ScissorOp,
        texture::TextureOp, upload::UploadOp, Op, OpChain,
    },
    Buffer, BufferUsage, Image, ImageDescriptor, ImageFlags, Optimizations, Result,
};

pub mod explicit;
pub mod immediate;

/// Which family of native API a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Recorded command buffers, explicit layouts and barriers,
    /// semaphore and fence synchronization.
    Explicit,
    /// A bound context with implicit state, executing calls in order.
    Immediate,
}

/// A device that frames record operations for and submit them to.
///
/// A backend fixes the type records are stored as. Operation kinds
/// become records through [`Records`], which is only implemented for
/// kinds that have an execution hook for the backend.
pub trait Backend: Clone + Send + Sync + 'static {
    const KIND: BackendKind;

    /// Erased form of the operations stored in a frame's chain.
    type Record: ?Sized + Op;

    /// Handle to submitted work.
    type Submission: Send;

    /// Optimizations the device is able to perform.
    fn supported_optimizations(&self) -> Optimizations;

    /// Creates an image. Flags the device cannot provide for
    /// the requested size are dropped.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<Image>;

    fn create_buffer(&self, usage: BufferUsage, size: usize) -> Result<Buffer>;

    /// Translates the chain into native work and hands it to the device.
    fn submit(&self, submit: Submit<'_, Self>) -> Result<Self::Submission>;

    fn is_busy(&self, submission: &Self::Submission) -> bool;

    /// Blocks until the submission completed and returns its status.
    fn wait(&self, submission: &Self::Submission) -> Result<()>;
}

/// Everything a backend needs to execute a frame.
pub struct Submit<'a, B: Backend> {
    pub chain: &'a OpChain<B::Record>,
    pub target: &'a Image,
    pub vertex_buffer: Option<&'a Buffer>,
    pub globals_buffer: Option<&'a Buffer>,
}

/// Conversion of an operation kind into a backend's record type.
pub trait Records<O: Op>: Backend {
    fn record(op: O) -> Box<Self::Record>;
}

/// Backends able to run every built-in operation kind.
pub trait CoreOps:
    Records<UploadOp>
    + Records<BlitOp>
    + Records<BeginPassOp>
    + Records<EndPassOp>
    + Records<ScissorOp>
    + Records<GlobalsOp>
    + Records<ClearOp>
    + Records<ColorOp>
    + Records<TextureOp>
    + Records<GradientOp>
    + Records<DownloadOp>
{
}

impl<B> CoreOps for B where
    B: Records<UploadOp>
        + Records<BlitOp>
        + Records<BeginPassOp>
        + Records<EndPassOp>
        + Records<ScissorOp>
        + Records<GlobalsOp>
        + Records<ClearOp>
        + Records<ColorOp>
        + Records<TextureOp>
        + Records<GradientOp>
        + Records<DownloadOp>
{
}

/// Limits and capabilities of a software device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Bytes of device memory available to images and buffers.
    pub memory_budget: usize,
    /// Largest width or height of an image.
    pub max_image_size: u32,
    /// Flags the image format supports.
    pub format_features: ImageFlags,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            memory_budget: 256 * 1024 * 1024,
            max_image_size: 16384,
            format_features: ImageFlags::BLIT
                | ImageFlags::FILTERABLE
                | ImageFlags::RENDERABLE
                | ImageFlags::DOWNLOADABLE
                | ImageFlags::CAN_MIPMAP,
        }
    }
}

impl DeviceSettings {
    /// Checks the size and narrows the requested flags to what the
    /// format supports.
    pub(crate) fn negotiate(&self, descriptor: &ImageDescriptor) -> Result<ImageFlags> {
        let max = self.max_image_size;
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.width > max
            || descriptor.height > max
        {
            return Err(crate::Error::ImageTooLarge {
                width: descriptor.width,
                height: descriptor.height,
                max,
            });
        }

        let mut flags = descriptor.flags & (self.format_features | ImageFlags::MIPMAP);
        let mipmap_capable = ImageFlags::BLIT | ImageFlags::FILTERABLE | ImageFlags::RENDERABLE;
        if !self.format_features.contains(mipmap_capable | ImageFlags::CAN_MIPMAP) {
            flags.remove(ImageFlags::CAN_MIPMAP | ImageFlags::MIPMAP);
        }
        if flags.contains(ImageFlags::MIPMAP) {
            flags.insert(ImageFlags::CAN_MIPMAP);
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn negotiation_drops_unsupported_flags() {
        let settings = DeviceSettings {
            format_features: ImageFlags::BLIT | ImageFlags::DOWNLOADABLE,
            ..Default::default()
        };
        let flags = settings
            .negotiate(&ImageDescriptor::new(
                4,
                4,
                ImageFlags::BLIT | ImageFlags::RENDERABLE | ImageFlags::MIPMAP,
            ))
            .unwrap();
        assert_eq!(flags, ImageFlags::BLIT);
    }

    #[test]
    fn oversized_images_fail() {
        let settings = DeviceSettings {
            max_image_size: 8,
            ..Default::default()
        };
        assert_eq!(
            settings.negotiate(&ImageDescriptor::new(9, 1, ImageFlags::BLIT)),
            Err(Error::ImageTooLarge {
                width: 9,
                height: 1,
                max: 8
            })
        );
    }
}
