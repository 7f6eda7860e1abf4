use std::any::Any;

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp},
        immediate::{ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Frame, IntRect, Result,
};

/// Limits the following draws of the pass to a rectangle.
#[derive(Debug)]
pub struct ScissorOp {
    rect: IntRect,
}

impl ScissorOp {
    pub fn append<B: Records<Self>>(frame: &mut Frame<B>, rect: IntRect) {
        assert!(
            rect.width >= 0 && rect.height >= 0,
            "scissor {} has a negative size",
            rect
        );
        frame.append(ScissorOp { rect });
    }
}

impl Op for ScissorOp {
    fn stage(&self) -> Stage {
        Stage::Command
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer.op("scissor").int_rect(&self.rect).newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for ScissorOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::SetScissor(self.rect));
        Ok(chain.next(at))
    }
}

impl ImmediateOp for ScissorOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let rect = state.window_rect(self.rect);
        state.driver().scissor(rect);
        Ok(chain.next(at))
    }
}
