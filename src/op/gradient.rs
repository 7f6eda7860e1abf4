use std::any::Any;

use glam::Vec2;

use crate::{
    backend::{
        explicit::{Command, ExplicitCommandState, ExplicitOp, Pipeline},
        immediate::{ImmediateCommandState, ImmediateOp, Program},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    shader::{GradientInstance, GradientStop},
    Buffer, Color, Frame, Rect, Result,
};

/// Fills a rectangle with a linear gradient.
///
/// The color stops are stored in a storage buffer of the frame.
#[derive(Debug)]
pub struct GradientOp {
    stops: Buffer,
    stop_count: usize,
    offset: usize,
}

impl GradientOp {
    /// Draws a gradient from `start` to `end` into `rect`. `stops` are
    /// `(offset, color)` pairs with ascending offsets in `0..=1`.
    ///
    /// # Panics
    /// Panics if there are no stops.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        rect: Rect,
        start: Vec2,
        end: Vec2,
        stops: &[(f32, Color)],
    ) -> Result<()> {
        assert!(!stops.is_empty(), "gradient without color stops");
        let data: Vec<GradientStop> = stops
            .iter()
            .map(|&(offset, color)| GradientStop::new(offset, color))
            .collect();
        let (buffer, storage_offset) = frame.write_storage_buffer(bytemuck::cast_slice(&data))?;

        let instance = GradientInstance {
            rect: [rect.pos.x, rect.pos.y, rect.size.x, rect.size.y],
            points: [start.x, start.y, end.x, end.y],
            stops: [storage_offset as u32, data.len() as u32],
            _pad: [0; 2],
        };
        let offset = frame.push_instances(&[instance]);
        frame.append(GradientOp {
            stops: buffer,
            stop_count: data.len(),
            offset,
        });
        Ok(())
    }
}

impl Op for GradientOp {
    fn stage(&self) -> Stage {
        Stage::Shader
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("linear-gradient")
            .text(format_args!("{} stops", self.stop_count))
            .newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for GradientOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        state.push(Command::Draw {
            pipeline: Pipeline::Gradient {
                stops: self.stops.clone(),
            },
            offset: self.offset,
            count: 1,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for GradientOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let program = Program::Gradient {
            stops: self.stops.clone(),
        };
        let flip_y = state.flip_y();
        state.driver().draw(&program, self.offset, 1, flip_y);
        Ok(chain.next(at))
    }
}
