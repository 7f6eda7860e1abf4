use super::image::{Access, Layout, PipelineStage};
use crate::{raster::BlitBox, Buffer, Color, Filter, Image, IntRect};

/// Shader program bound by a [`Command::Draw`], with its resources.
#[derive(Debug, Clone)]
pub enum Pipeline {
    /// Instances are [`ColorInstance`](crate::shader::ColorInstance)s.
    Color,
    /// Instances are [`TextureInstance`](crate::shader::TextureInstance)s.
    Texture { image: Image, filter: Filter },
    /// Instances are [`GradientInstance`](crate::shader::GradientInstance)s
    /// whose stops live in `stops`.
    Gradient { stops: Buffer },
}

/// A native command recorded into a [`CommandBuffer`].
///
/// Commands keep their resources alive until the buffer is dropped,
/// which happens after the queue executed it.
#[derive(Debug, Clone)]
pub enum Command {
    /// Moves an image from one layout to another and makes the
    /// accesses before the barrier visible to those after it.
    PipelineBarrier {
        image: Image,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        src_access: Access,
        dst_access: Access,
        old_layout: Layout,
        new_layout: Layout,
    },
    /// Writes tightly packed RGBA8 rows from `buffer` into `rect`.
    CopyBufferToImage {
        buffer: Buffer,
        offset: usize,
        image: Image,
        layout: Layout,
        rect: IntRect,
    },
    /// Reads `rect` into `buffer` as tightly packed RGBA8 rows.
    CopyImageToBuffer {
        image: Image,
        layout: Layout,
        rect: IntRect,
        buffer: Buffer,
        offset: usize,
    },
    BlitImage {
        src: Image,
        src_layout: Layout,
        src_box: BlitBox,
        dst: Image,
        dst_layout: Layout,
        dst_box: BlitBox,
        filter: Filter,
    },
    /// Starts rendering to `target` inside `area`.
    BeginRenderPass {
        target: Image,
        area: IntRect,
        clear: Option<Color>,
    },
    EndRenderPass,
    SetScissor(IntRect),
    /// Binds the globals at `offset` in the globals buffer.
    BindGlobals { offset: usize },
    /// Draws `count` instances starting at `offset` in the vertex buffer.
    Draw {
        pipeline: Pipeline,
        offset: usize,
        count: usize,
    },
    /// Fills `rect` of the current attachment. Ignores the scissor.
    ClearAttachment { rect: IntRect, color: Color },
}

/// A list of commands waiting for submission.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        log::trace!("Recording {:?}", command);
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

impl IntoIterator for CommandBuffer {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
