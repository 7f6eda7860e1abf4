use std::{any::Any, slice};

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp, Pipeline},
        immediate::{GlImage, ImmediateCommandState, ImmediateOp, Program},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    shader::TextureInstance,
    Filter, Frame, Image, ImageFlags, Rect, Result,
};

/// Draws a rectangle sampling an image.
#[derive(Debug)]
pub struct TextureOp {
    image: Image,
    filter: Filter,
    offset: usize,
}

impl TextureOp {
    /// Draws the part `tex_rect` (normalized coordinates) of `image`
    /// into `rect`.
    ///
    /// # Panics
    /// Panics if `filter` is [`Filter::Linear`] and the image is not
    /// filterable.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        image: &Image,
        filter: Filter,
        rect: Rect,
        tex_rect: Rect,
    ) {
        assert!(
            filter != Filter::Linear || image.supports(ImageFlags::FILTERABLE),
            "linear sampling of {:?}, which is not filterable",
            image
        );
        let offset = frame.push_instances(&[TextureInstance::new(rect, tex_rect)]);
        frame.append(TextureOp {
            image: image.clone(),
            filter,
            offset,
        });
    }
}

impl Op for TextureOp {
    fn stage(&self) -> Stage {
        Stage::Shader
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer.op("texture").image(&self.image).newline();
    }

    fn sampled_images(&self) -> &[Image] {
        slice::from_ref(&self.image)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for TextureOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::Draw {
            pipeline: Pipeline::Texture {
                image: self.image.clone(),
                filter: self.filter,
            },
            offset: self.offset,
            count: 1,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for TextureOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let program = Program::Texture {
            texture: GlImage::get(&self.image).texture(),
            filter: self.filter,
        };
        let flip_y = state.flip_y();
        state.driver().draw(&program, self.offset, 1, flip_y);
        Ok(chain.next(at))
    }
}
