//! State machine of an immediate-mode driver.
//!
//! Mirrors the subset of a GL context the operations need: texture and
//! framebuffer objects, framebuffer bindings, the scissor test, buffer
//! bindings and an error flag. Framebuffer rows are stored in window
//! order, i.e. row 0 is `y == 0`.

use slotmap::SlotMap;

use crate::{
    raster::{self, BlitBox, Pixels, View},
    shader::{self, DrawTarget, Globals},
    Buffer, Color, Filter, IntRect,
};

slotmap::new_key_type! {
    pub struct TextureName;
    pub struct FramebufferName;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferTarget {
    Read,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ScissorTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid framebuffer operation")]
    InvalidFramebufferOperation,
}

/// Program used by [`Driver::draw`].
#[derive(Debug, Clone)]
pub enum Program {
    Color,
    Texture {
        texture: TextureName,
        filter: Filter,
    },
    Gradient {
        stops: Buffer,
    },
}

#[derive(Debug, Default)]
pub struct Driver {
    textures: SlotMap<TextureName, Pixels>,
    framebuffers: SlotMap<FramebufferName, TextureName>,
    read_framebuffer: Option<FramebufferName>,
    draw_framebuffer: Option<FramebufferName>,
    scissor_test: bool,
    scissor: IntRect,
    clear_color: Color,
    vertex_buffer: Option<Buffer>,
    uniform_buffer: Option<(Buffer, usize)>,
    error: Option<DriverError>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `error` unless an earlier error is still pending.
    fn set_error(&mut self, error: DriverError) {
        log::warn!("Driver error: {}", error);
        self.error.get_or_insert(error);
    }

    /// Returns and clears the pending error.
    pub fn get_error(&mut self) -> Option<DriverError> {
        self.error.take()
    }

    pub fn gen_texture(&mut self, width: u32, height: u32) -> TextureName {
        self.textures.insert(Pixels::new(width, height))
    }

    pub fn delete_texture(&mut self, texture: TextureName) {
        self.textures.remove(texture);
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Creates a framebuffer with `texture` as its color attachment.
    pub fn gen_framebuffer(&mut self, texture: TextureName) -> FramebufferName {
        self.framebuffers.insert(texture)
    }

    pub fn delete_framebuffer(&mut self, framebuffer: FramebufferName) {
        if self.read_framebuffer == Some(framebuffer) {
            self.read_framebuffer = None;
        }
        if self.draw_framebuffer == Some(framebuffer) {
            self.draw_framebuffer = None;
        }
        self.framebuffers.remove(framebuffer);
    }

    pub fn bind_framebuffer(
        &mut self,
        target: FramebufferTarget,
        framebuffer: Option<FramebufferName>,
    ) {
        if let Some(framebuffer) = framebuffer {
            if !self.framebuffers.contains_key(framebuffer) {
                self.set_error(DriverError::InvalidOperation);
                return;
            }
        }
        match target {
            FramebufferTarget::Read => self.read_framebuffer = framebuffer,
            FramebufferTarget::Draw => self.draw_framebuffer = framebuffer,
        }
    }

    pub fn bound_framebuffer(&self, target: FramebufferTarget) -> Option<FramebufferName> {
        match target {
            FramebufferTarget::Read => self.read_framebuffer,
            FramebufferTarget::Draw => self.draw_framebuffer,
        }
    }

    pub fn enable(&mut self, capability: Capability) {
        match capability {
            Capability::ScissorTest => self.scissor_test = true,
        }
    }

    pub fn disable(&mut self, capability: Capability) {
        match capability {
            Capability::ScissorTest => self.scissor_test = false,
        }
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::ScissorTest => self.scissor_test,
        }
    }

    /// Sets the scissor box, in window coordinates.
    pub fn scissor(&mut self, rect: IntRect) {
        if rect.width < 0 || rect.height < 0 {
            self.set_error(DriverError::InvalidValue);
            return;
        }
        self.scissor = rect;
    }

    pub fn scissor_box(&self) -> IntRect {
        self.scissor
    }

    fn active_scissor(&self) -> Option<IntRect> {
        self.scissor_test.then(|| self.scissor)
    }

    /// Writes tightly packed rows into `rect` of the texture.
    pub fn tex_sub_image(&mut self, texture: TextureName, rect: IntRect, data: &[Color]) {
        match self.textures.get_mut(texture) {
            Some(pixels)
                if pixels.bounds().contains_rect(&rect)
                    && data.len() == (rect.width * rect.height) as usize =>
            {
                pixels.write_rect(rect, data)
            }
            Some(_) => self.set_error(DriverError::InvalidValue),
            None => self.set_error(DriverError::InvalidOperation),
        }
    }

    fn attachment(&self, framebuffer: Option<FramebufferName>) -> Option<TextureName> {
        framebuffer.and_then(|fb| self.framebuffers.get(fb).copied())
    }

    /// Copies between the bound read and draw framebuffers.
    ///
    /// Honors the scissor test. Reversed destination coordinates
    /// mirror the image.
    pub fn blit_framebuffer(&mut self, src: BlitBox, dst: BlitBox, filter: Filter) {
        let (read, draw) = match (
            self.attachment(self.read_framebuffer),
            self.attachment(self.draw_framebuffer),
        ) {
            (Some(read), Some(draw)) => (read, draw),
            _ => return self.set_error(DriverError::InvalidFramebufferOperation),
        };
        let scissor = self.active_scissor();
        let source = match self.textures.get(read) {
            Some(pixels) => pixels.clone(),
            None => return self.set_error(DriverError::InvalidFramebufferOperation),
        };
        match self.textures.get_mut(draw) {
            Some(dest) => raster::blit(&source, src, dest, dst, filter, scissor),
            None => self.set_error(DriverError::InvalidFramebufferOperation),
        }
    }

    pub fn clear_color(&mut self, color: Color) {
        self.clear_color = color;
    }

    /// Fills the draw framebuffer with the clear color,
    /// limited by the scissor test.
    pub fn clear(&mut self) {
        let draw = match self.attachment(self.draw_framebuffer) {
            Some(draw) => draw,
            None => return self.set_error(DriverError::InvalidFramebufferOperation),
        };
        let rect = self.active_scissor();
        let color = self.clear_color;
        if let Some(pixels) = self.textures.get_mut(draw) {
            let rect = rect.unwrap_or_else(|| pixels.bounds());
            pixels.fill(rect, color);
        }
    }

    /// Reads `rect` of the read framebuffer in window row order.
    pub fn read_pixels(&mut self, rect: IntRect) -> Option<Vec<Color>> {
        let read = match self.attachment(self.read_framebuffer) {
            Some(read) => read,
            None => {
                self.set_error(DriverError::InvalidFramebufferOperation);
                return None;
            }
        };
        match self.textures.get(read) {
            Some(pixels) if pixels.bounds().contains_rect(&rect) => Some(pixels.read_rect(rect)),
            _ => {
                self.set_error(DriverError::InvalidValue);
                None
            }
        }
    }

    pub fn bind_vertex_buffer(&mut self, buffer: Option<Buffer>) {
        self.vertex_buffer = buffer;
    }

    /// Binds `Globals` stored at `offset` of `buffer`.
    pub fn bind_uniform_range(&mut self, buffer: Buffer, offset: usize) {
        if offset + std::mem::size_of::<Globals>() > buffer.size() {
            return self.set_error(DriverError::InvalidValue);
        }
        self.uniform_buffer = Some((buffer, offset));
    }

    fn globals(&self) -> Globals {
        match &self.uniform_buffer {
            Some((buffer, offset)) => buffer
                .read_pod::<Globals>(*offset, 1)
                .pop()
                .unwrap_or_default(),
            None => Globals::identity(),
        }
    }

    /// Draws `count` instances starting at byte `offset` of the bound
    /// vertex buffer into the draw framebuffer.
    pub fn draw(&mut self, program: &Program, offset: usize, count: usize, flip_y: Option<u32>) {
        let (vertex_buffer, draw) = match (
            self.vertex_buffer.clone(),
            self.attachment(self.draw_framebuffer),
        ) {
            (Some(buffer), Some(draw)) => (buffer, draw),
            (None, _) => return self.set_error(DriverError::InvalidOperation),
            (_, None) => return self.set_error(DriverError::InvalidFramebufferOperation),
        };

        let source = match program {
            Program::Texture { texture, .. } if *texture == draw => {
                return self.set_error(DriverError::InvalidOperation)
            }
            Program::Texture { texture, .. } => match self.textures.get(*texture) {
                Some(pixels) => Some(pixels.clone()),
                None => return self.set_error(DriverError::InvalidOperation),
            },
            _ => None,
        };

        let globals = self.globals();
        let scissor = self.active_scissor();
        let pixels = match self.textures.get_mut(draw) {
            Some(pixels) => pixels,
            None => return self.set_error(DriverError::InvalidFramebufferOperation),
        };
        let target = DrawTarget {
            pixels,
            view: View { flip_y },
            scissor,
            globals,
        };

        match (program, source) {
            (Program::Texture { filter, .. }, Some(source)) => shader::draw_texture(
                target,
                &source,
                *filter,
                &vertex_buffer.read_pod(offset, count),
            ),
            (Program::Gradient { stops }, _) => {
                shader::draw_gradient(target, stops, &vertex_buffer.read_pod(offset, count))
            }
            _ => shader::draw_color(target, &vertex_buffer.read_pod(offset, count)),
        }
    }

    /// Blocks until all previous calls completed. Calls complete
    /// synchronously, so this only reports whether an error is pending.
    pub fn finish(&self) -> bool {
        self.error.is_none()
    }
}
