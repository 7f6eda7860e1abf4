use std::any::Any;

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp},
        immediate::{ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    Error, Frame, Globals, Result,
};

/// Binds new [`Globals`] for the following draws of the pass.
#[derive(Debug)]
pub struct GlobalsOp {
    offset: usize,
    globals: Globals,
}

impl GlobalsOp {
    pub fn append<B: Records<Self>>(frame: &mut Frame<B>, globals: &Globals) {
        let offset = frame.add_globals(globals);
        frame.append(GlobalsOp {
            offset,
            globals: *globals,
        });
    }
}

impl Op for GlobalsOp {
    fn stage(&self) -> Stage {
        Stage::Command
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("globals")
            .rect(&self.globals.clip_rect())
            .newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for GlobalsOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::BindGlobals {
            offset: self.offset,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for GlobalsOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let buffer = state
            .globals_buffer()
            .ok_or_else(|| Error::Backend("globals bound without a globals buffer".into()))?
            .clone();
        state.driver().bind_uniform_range(buffer, self.offset);
        Ok(chain.next(at))
    }
}
