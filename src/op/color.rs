use std::{any::Any, mem};

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp, Pipeline},
        immediate::{ImmediateCommandState, ImmediateOp, Program},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    shader::ColorInstance,
    Color, Frame, Optimizations, Rect, Result,
};

/// Fills rectangles with solid colors, blending over the target.
#[derive(Debug)]
pub struct ColorOp {
    offset: usize,
    count: usize,
}

impl ColorOp {
    /// Draws `rect` in `color`.
    ///
    /// With [`Optimizations::MERGE`], the instance is added to the
    /// previous record when that is a `ColorOp` drawing the instances
    /// right before it.
    pub fn append<B: Records<Self>>(frame: &mut Frame<B>, rect: Rect, color: Color) {
        let offset = frame.push_instances(&[ColorInstance::new(rect, color)]);

        if frame.should_optimize(Optimizations::MERGE) {
            if let Some(last) = frame.last_op_mut::<ColorOp>() {
                if last.offset + last.count * mem::size_of::<ColorInstance>() == offset {
                    last.count += 1;
                    return;
                }
            }
        }

        frame.append(ColorOp { offset, count: 1 });
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Op for ColorOp {
    fn stage(&self) -> Stage {
        Stage::Shader
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer.op("color").text(self.count).newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for ColorOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::Draw {
            pipeline: Pipeline::Color,
            offset: self.offset,
            count: self.count,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for ColorOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let flip_y = state.flip_y();
        state
            .driver()
            .draw(&Program::Color, self.offset, self.count, flip_y);
        Ok(chain.next(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{immediate::ImmediateDevice, Backend},
        op::{
            pass::{BeginPassOp, EndPassOp},
            scissor::ScissorOp,
        },
        Depth, ImageDescriptor, ImageFlags, Region,
    };

    fn record(optimizations: Optimizations) -> Frame<ImmediateDevice> {
        let device = ImmediateDevice::new();
        let target = device
            .create_image(&ImageDescriptor::new(4, 4, ImageFlags::RENDERABLE))
            .unwrap();
        let mut frame = Frame::new();
        frame.setup(device, optimizations);
        frame.begin(&target, Depth::U8, &Region::from_rect(target.bounds()), None);
        BeginPassOp::append(&mut frame, &target, target.bounds(), None);
        for i in 0..3 {
            ColorOp::append(
                &mut frame,
                Rect::from_xywh(i as f32, 0., 1., 1.),
                Color::WHITE,
            );
        }
        ScissorOp::append(&mut frame, target.bounds());
        ColorOp::append(&mut frame, Rect::from_xywh(3., 0., 1., 1.), Color::WHITE);
        EndPassOp::append(&mut frame);
        frame
    }

    #[test]
    fn contiguous_draws_merge() {
        let frame = record(Optimizations::MERGE);
        if frame.should_optimize(Optimizations::MERGE) {
            assert_eq!(frame.op_count(), 5);
            assert!(frame.dump().contains("  color 3\n"));
        }
    }

    #[test]
    fn merging_can_be_disabled() {
        let frame = record(Optimizations::empty());
        assert_eq!(frame.op_count(), 7);
        assert!(!frame.dump().contains("color 3"));
    }
}
