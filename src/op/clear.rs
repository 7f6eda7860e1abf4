use std::any::Any;

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp},
        immediate::{ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Color, Frame, IntRect, Result,
};

/// Replaces a rectangle of the pass target with a color, without
/// blending and regardless of the scissor.
#[derive(Debug)]
pub struct ClearOp {
    rect: IntRect,
    color: Color,
}

impl ClearOp {
    pub fn append<B: Records<Self>>(frame: &mut Frame<B>, rect: IntRect, color: Color) {
        frame.append(ClearOp { rect, color });
    }
}

impl Op for ClearOp {
    fn stage(&self) -> Stage {
        Stage::Command
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("clear")
            .int_rect(&self.rect)
            .color(self.color)
            .newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for ClearOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::ClearAttachment {
            rect: self.rect,
            color: self.color,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for ClearOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let rect = state.window_rect(self.rect);
        let driver = state.driver();
        let scissor = driver.scissor_box();
        driver.scissor(rect);
        driver.clear_color(self.color);
        driver.clear();
        driver.scissor(scissor);
        Ok(chain.next(at))
    }
}
