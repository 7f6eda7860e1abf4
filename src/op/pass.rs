use std::any::Any;

use crate::{
    backend::{
        explicit::{Access, Command, ExplicitCommandState, ExplicitOp, Layout, PipelineStage},
        immediate::{Capability, FramebufferTarget, GlImage, ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Color, Frame, Image, ImageFlags, IntRect, Result,
};

/// Starts rendering to an image. Every draw until the matching
/// [`EndPassOp`] lands in `area` of the target.
#[derive(Debug)]
pub struct BeginPassOp {
    target: Image,
    area: IntRect,
    clear: Option<Color>,
}

impl BeginPassOp {
    /// # Panics
    /// Panics if `target` is not renderable or `area` exceeds it.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        target: &Image,
        area: IntRect,
        clear: Option<Color>,
    ) {
        assert!(
            target.supports(ImageFlags::RENDERABLE),
            "render pass target {:?} is not renderable",
            target
        );
        assert!(
            target.bounds().contains_rect(&area),
            "render pass area {} exceeds its target",
            area
        );
        frame.append(BeginPassOp {
            target: target.clone(),
            area,
            clear,
        });
    }
}

impl Op for BeginPassOp {
    fn stage(&self) -> Stage {
        Stage::BeginPass
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("begin-pass")
            .image(&self.target)
            .int_rect(&self.area);
        if let Some(color) = self.clear {
            printer.text("clear").color(color);
        }
        printer.newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for BeginPassOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        // Layouts cannot change inside a pass, so sampled images are
        // prepared up front.
        let mut cursor = chain.next(at);
        while let Some(id) = cursor {
            let op = chain.get(id);
            if op.stage() == Stage::EndPass {
                break;
            }
            for image in op.sampled_images() {
                state.transition_unless_shared(
                    image,
                    PipelineStage::FRAGMENT_SHADER,
                    Layout::ShaderReadOnly,
                    Access::SHADER_READ,
                );
            }
            cursor = chain.next(id);
        }

        state.transition_unless_shared(
            &self.target,
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            Layout::ColorAttachment,
            Access::COLOR_ATTACHMENT_WRITE,
        );
        state.push(Command::BeginRenderPass {
            target: self.target.clone(),
            area: self.area,
            clear: self.clear,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for BeginPassOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.set_flip_y(GlImage::flip_y(&self.target));
        let area = state.window_rect(self.area);

        let driver = state.driver();
        driver.bind_framebuffer(
            FramebufferTarget::Draw,
            Some(GlImage::get(&self.target).framebuffer()),
        );
        driver.enable(Capability::ScissorTest);
        driver.scissor(area);
        if let Some(color) = self.clear {
            driver.clear_color(color);
            driver.clear();
        }
        Ok(chain.next(at))
    }
}

/// Finishes the render pass started by the last [`BeginPassOp`].
#[derive(Debug)]
pub struct EndPassOp;

impl EndPassOp {
    pub fn append<B: Records<Self>>(frame: &mut Frame<B>) {
        frame.append(EndPassOp);
    }
}

impl Op for EndPassOp {
    fn stage(&self) -> Stage {
        Stage::EndPass
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer.op("end-pass").newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for EndPassOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::EndRenderPass);
        Ok(chain.next(at))
    }
}

impl ImmediateOp for EndPassOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let driver = state.driver();
        driver.disable(Capability::ScissorTest);
        driver.bind_framebuffer(FramebufferTarget::Draw, None);
        Ok(chain.next(at))
    }
}
