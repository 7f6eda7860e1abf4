use parking_lot::Mutex;

use super::sync::Semaphore;
use crate::{memory::Allocation, raster::Pixels};

/// Memory layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Contents may be discarded by the next transition.
    Undefined,
    /// Written by the host before first use.
    Preinitialized,
    /// Legal for every access.
    General,
    TransferSrc,
    TransferDst,
    ColorAttachment,
    ShaderReadOnly,
    /// Shared with the presentation engine; legal for every access.
    SharedPresent,
}

impl Layout {
    /// Layouts in which the image may be read by a copy.
    pub fn allows_transfer_read(self) -> bool {
        matches!(
            self,
            Layout::TransferSrc | Layout::General | Layout::SharedPresent
        )
    }

    /// Layouts in which the image may be written by a copy.
    pub fn allows_transfer_write(self) -> bool {
        matches!(
            self,
            Layout::TransferDst | Layout::General | Layout::SharedPresent
        )
    }

    pub fn allows_sampling(self) -> bool {
        matches!(
            self,
            Layout::ShaderReadOnly | Layout::General | Layout::SharedPresent
        )
    }

    pub fn allows_rendering(self) -> bool {
        matches!(
            self,
            Layout::ColorAttachment | Layout::General | Layout::SharedPresent
        )
    }
}

bitflags::bitflags! {
    /// Pipeline stages an access happens in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 3;
        const HOST = 1 << 4;
        const BOTTOM_OF_PIPE = 1 << 5;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const TRANSFER_READ = 1 << 0;
        const TRANSFER_WRITE = 1 << 1;
        const SHADER_READ = 1 << 2;
        const COLOR_ATTACHMENT_WRITE = 1 << 3;
        const HOST_READ = 1 << 4;
        const HOST_WRITE = 1 << 5;
    }
}

impl Access {
    /// Whether `stage` contains a stage able to perform every access
    /// in `self`.
    pub fn is_supported_by(self, stage: PipelineStage) -> bool {
        [
            (
                Access::TRANSFER_READ | Access::TRANSFER_WRITE,
                PipelineStage::TRANSFER,
            ),
            (Access::SHADER_READ, PipelineStage::FRAGMENT_SHADER),
            (
                Access::COLOR_ATTACHMENT_WRITE,
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            ),
            (Access::HOST_READ | Access::HOST_WRITE, PipelineStage::HOST),
        ]
        .iter()
        .all(|&(access, required)| !self.intersects(access) || stage.intersects(required))
    }

    /// Whether an image in `layout` may be accessed this way.
    pub fn is_legal_in(self, layout: Layout) -> bool {
        (!self.contains(Access::TRANSFER_READ) || layout.allows_transfer_read())
            && (!self.contains(Access::TRANSFER_WRITE) || layout.allows_transfer_write())
            && (!self.contains(Access::SHADER_READ) || layout.allows_sampling())
            && (!self.contains(Access::COLOR_ATTACHMENT_WRITE) || layout.allows_rendering())
    }
}

/// Synchronization state of an image as tracked while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageState {
    pub layout: Layout,
    pub stage: PipelineStage,
    pub access: Access,
}

impl ImageState {
    pub(crate) fn initial(layout: Layout) -> Self {
        Self {
            layout,
            stage: PipelineStage::TOP_OF_PIPE,
            access: Access::empty(),
        }
    }
}

/// What the queue sees when it executes commands.
#[derive(Debug)]
pub(crate) struct DeviceMemory {
    pub layout: Layout,
    pub pixels: Pixels,
}

/// Backend-private part of an image created by an
/// [`ExplicitDevice`](super::ExplicitDevice).
#[derive(Debug)]
pub(crate) struct ExplicitImage {
    pub tracked: Mutex<ImageState>,
    pub memory: Mutex<DeviceMemory>,
    /// Waited on by the first submission that transitions the image.
    pub pending_wait: Mutex<Option<Semaphore>>,
    /// Signaled by every submission rendering to the image.
    pub present: Option<Semaphore>,
    _allocation: Allocation,
}

impl ExplicitImage {
    pub fn new(
        width: u32,
        height: u32,
        layout: Layout,
        present: Option<Semaphore>,
        allocation: Allocation,
    ) -> Self {
        Self {
            tracked: Mutex::new(ImageState::initial(layout)),
            memory: Mutex::new(DeviceMemory {
                layout,
                pixels: Pixels::new(width, height),
            }),
            pending_wait: Mutex::new(None),
            present,
            _allocation: allocation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accesses_need_a_matching_stage_and_layout() {
        assert!(Access::TRANSFER_WRITE.is_supported_by(PipelineStage::TRANSFER));
        assert!(!Access::SHADER_READ.is_supported_by(PipelineStage::TRANSFER));
        assert!(Access::empty().is_supported_by(PipelineStage::BOTTOM_OF_PIPE));
        assert!((Access::TRANSFER_READ | Access::TRANSFER_WRITE).is_legal_in(Layout::General));
        assert!(!(Access::TRANSFER_READ | Access::TRANSFER_WRITE).is_legal_in(Layout::TransferSrc));
        assert!(Access::COLOR_ATTACHMENT_WRITE.is_legal_in(Layout::ColorAttachment));
        assert!(!Access::SHADER_READ.is_legal_in(Layout::TransferDst));
    }
}

