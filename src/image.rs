use std::{any::Any, fmt, sync::Arc};

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::IntRect;

bitflags::bitflags! {
    /// Capabilities of an [`Image`].
    ///
    /// Operations check the flags they need when they are recorded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ImageFlags: u32 {
        /// Usable as the source of a blit.
        const BLIT = 1 << 0;
        /// Usable as a filtered (linear) sampling source.
        const FILTERABLE = 1 << 1;
        /// Usable as a render target and as the destination of a blit.
        const RENDERABLE = 1 << 2;
        /// Contents can be copied back to the CPU.
        const DOWNLOADABLE = 1 << 3;
        /// A mipmap chain can be allocated for the image.
        const CAN_MIPMAP = 1 << 4;
        /// The image was allocated with a mipmap chain.
        const MIPMAP = 1 << 5;
        /// The memory is owned by an external producer.
        const EXTERNAL = 1 << 6;
    }
}

/// Bit depth requested for a render target.
///
/// Both devices store RGBA8 texels; the depth is carried along so
/// a frame can report what its target was negotiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Depth {
    #[default]
    U8,
    U8Srgb,
    U16,
    Float16,
    Float32,
}

/// How an image is resampled when it is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Nearest,
    /// Requires [`ImageFlags::FILTERABLE`] on the source.
    Linear,
}

/// Parameters for creating an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    /// Capabilities to request. The device drops those its
    /// format cannot provide; check [`Image::flags`].
    pub flags: ImageFlags,
    pub depth: Depth,
}

impl ImageDescriptor {
    pub fn new(width: u32, height: u32, flags: ImageFlags) -> Self {
        Self {
            width,
            height,
            flags,
            depth: Depth::default(),
        }
    }
}

/// A handle to an image living in device memory.
///
/// Cloning creates another reference to the same image. Operations keep
/// a clone for as long as their record lives, so an image stays allocated
/// until every frame that uses it has been cleaned up.
///
/// The backend-private part (layout tracking, framebuffer names, ...) is
/// only accessible to the backend that created the image.
#[derive(Clone)]
pub struct Image(Arc<Inner>);

struct Inner {
    size: UVec2,
    flags: ImageFlags,
    depth: Depth,
    backend: Box<dyn Any + Send + Sync>,
}

impl Image {
    pub(crate) fn new(
        size: UVec2,
        flags: ImageFlags,
        depth: Depth,
        backend: impl Any + Send + Sync,
    ) -> Self {
        Self(Arc::new(Inner {
            size,
            flags,
            depth,
            backend: Box::new(backend),
        }))
    }

    pub fn size(&self) -> UVec2 {
        self.0.size
    }

    pub fn width(&self) -> u32 {
        self.0.size.x
    }

    pub fn height(&self) -> u32 {
        self.0.size.y
    }

    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.width(), self.height())
    }

    pub fn flags(&self) -> ImageFlags {
        self.0.flags
    }

    /// Returns whether the image has all of `flags`.
    pub fn supports(&self, flags: ImageFlags) -> bool {
        self.0.flags.contains(flags)
    }

    pub fn depth(&self) -> Depth {
        self.0.depth
    }

    /// Returns whether both handles refer to the same image.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this image.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn backend<T: 'static>(&self) -> &T {
        self.0
            .backend
            .downcast_ref()
            .expect("image does not belong to this backend")
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("size", &self.0.size)
            .field("flags", &self.0.flags)
            .field("depth", &self.0.depth)
            .finish()
    }
}
