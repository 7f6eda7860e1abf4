use std::any::Any;

use crate::{
    backend::{
        explicit::{Access, Command, ExplicitCommandState, ExplicitOp, Layout, PipelineStage},
        immediate::{GlImage, ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Buffer, BufferUsage, Frame, Image, IntRect, Result, Texture,
};

/// Copies the pixels of a [`Texture`] into the top-left corner of an image.
#[derive(Debug)]
pub struct UploadOp {
    image: Image,
    texture: Texture,
    staging: Buffer,
}

impl UploadOp {
    /// Records the upload. The pixels are staged in device memory right
    /// away, so running out of it fails here and not at submission.
    ///
    /// # Panics
    /// Panics if the texture does not fit into `image`.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        image: &Image,
        texture: &Texture,
    ) -> Result<()> {
        assert!(
            texture.width() <= image.width() && texture.height() <= image.height(),
            "{}x{} texture does not fit into {:?}",
            texture.width(),
            texture.height(),
            image
        );
        let data = texture.as_bytes();
        let staging = frame
            .device()
            .create_buffer(BufferUsage::Staging, data.len())?;
        staging.write(0, data);
        frame.append(UploadOp {
            image: image.clone(),
            texture: texture.clone(),
            staging,
        });
        Ok(())
    }

    fn texture_rect(&self) -> IntRect {
        IntRect::from_size(self.texture.width(), self.texture.height())
    }
}

impl Op for UploadOp {
    fn stage(&self) -> Stage {
        Stage::Upload
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("upload")
            .image(&self.image)
            .text(format_args!("{}x{}", self.texture.width(), self.texture.height()))
            .newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for UploadOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let layout = state.transition_unless_shared(
            &self.image,
            PipelineStage::TRANSFER,
            Layout::TransferDst,
            Access::TRANSFER_WRITE,
        );
        state.push(Command::CopyBufferToImage {
            buffer: self.staging.clone(),
            offset: 0,
            image: self.image.clone(),
            layout,
            rect: self.texture_rect(),
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for UploadOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let texture = GlImage::get(&self.image).texture();
        state
            .driver()
            .tex_sub_image(texture, self.texture_rect(), self.texture.pixels());
        Ok(chain.next(at))
    }
}
