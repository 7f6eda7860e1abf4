use std::{any::Any, sync::Arc};

use parking_lot::Mutex;

use crate::{
    backend::{
        explicit::{Access, Command, ExplicitCommandState, ExplicitOp, Layout, PipelineStage},
        immediate::{FramebufferTarget, GlImage, ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Buffer, BufferUsage, Color, Frame, Image, ImageFlags, IntRect, Result,
};

/// Receives the pixels of a [`DownloadOp`] once its frame completed.
#[derive(Clone, Debug, Default)]
pub struct Download(Arc<Mutex<Option<Vec<Color>>>>);

impl Download {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Takes the downloaded pixels, rows top to bottom.
    pub fn take(&self) -> Option<Vec<Color>> {
        self.0.lock().take()
    }

    fn deliver(&self, pixels: Vec<Color>) {
        *self.0.lock() = Some(pixels);
    }
}

/// Copies a rectangle of an image back to the CPU.
#[derive(Debug)]
pub struct DownloadOp {
    image: Image,
    rect: IntRect,
    buffer: Buffer,
    download: Download,
}

impl DownloadOp {
    /// # Panics
    /// Panics if the image is not downloadable or `rect` exceeds it.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        image: &Image,
        rect: IntRect,
        download: &Download,
    ) -> Result<()> {
        assert!(
            image.supports(ImageFlags::DOWNLOADABLE),
            "{:?} is not downloadable",
            image
        );
        assert!(
            image.bounds().contains_rect(&rect),
            "download of {} exceeds the image",
            rect
        );
        let size = (rect.width * rect.height) as usize * std::mem::size_of::<Color>();
        let buffer = frame.device().create_buffer(BufferUsage::Readback, size)?;
        frame.append(DownloadOp {
            image: image.clone(),
            rect,
            buffer,
            download: download.clone(),
        });
        Ok(())
    }

    fn pixel_count(&self) -> usize {
        (self.rect.width * self.rect.height) as usize
    }
}

impl Op for DownloadOp {
    fn stage(&self) -> Stage {
        Stage::Pass
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("download")
            .image(&self.image)
            .int_rect(&self.rect)
            .newline();
    }

    fn release(&mut self) {
        let pixels = self.buffer.read_pod(0, self.pixel_count());
        self.download.deliver(pixels);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for DownloadOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let layout = state.transition_unless_shared(
            &self.image,
            PipelineStage::TRANSFER,
            Layout::TransferSrc,
            Access::TRANSFER_READ,
        );
        state.push(Command::CopyImageToBuffer {
            image: self.image.clone(),
            layout,
            rect: self.rect,
            buffer: self.buffer.clone(),
            offset: 0,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for DownloadOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let flip_y = GlImage::flip_y(&self.image);
        let window = match flip_y {
            Some(height) => self.rect.flipped_y(height as i32),
            None => self.rect,
        };

        let driver = state.driver();
        driver.bind_framebuffer(
            FramebufferTarget::Read,
            Some(GlImage::get(&self.image).framebuffer()),
        );
        if let Some(mut pixels) = driver.read_pixels(window) {
            if flip_y.is_some() {
                let rows: Vec<Vec<Color>> = pixels
                    .chunks(self.rect.width as usize)
                    .rev()
                    .map(<[Color]>::to_vec)
                    .collect();
                pixels = rows.concat();
            }
            self.buffer.write(0, bytemuck::cast_slice(&pixels));
        }
        Ok(chain.next(at))
    }
}
