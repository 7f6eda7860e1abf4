//! A deferred GPU command engine. Rendering work is recorded into
//! [`Frame`]s as a chain of operations, then executed on either an
//! explicit (fence and layout based) or an immediate (bound context)
//! device.

mod buffer;
mod color;
mod error;
mod image;
mod memory;
mod raster;
mod rect;
mod texture;

pub mod backend;
pub mod frame;
pub mod node;
pub mod op;
pub mod optimizations;
pub mod renderer;
pub mod shader;

pub use backend::{
    explicit::ExplicitDevice, immediate::ImmediateDevice, Backend, BackendKind, CoreOps,
    DeviceSettings,
};
pub use buffer::{Buffer, BufferUsage};
pub use color::Color;
pub use error::{Error, Result};
pub use frame::{Frame, FrameState};
pub use image::{Depth, Filter, Image, ImageDescriptor, ImageFlags};
pub use node::Node;
pub use op::download::Download;
pub use optimizations::Optimizations;
pub use rect::{IntRect, Rect, Region};
pub use renderer::{Renderer, RendererBuilder, Settings};
pub use shader::Globals;
pub use texture::{Texture, TextureId};
