use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use glam::{uvec2, UVec2};

use crate::Color;

/// Unique ID of a [`Texture`], stable across clones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Immutable pixel data living in CPU memory.
///
/// Textures are uploaded into device [`Image`](crate::Image)s with
/// [`Frame::upload_texture`](crate::Frame::upload_texture). Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Texture(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    id: TextureId,
    size: UVec2,
    pixels: Vec<Color>,
}

impl Texture {
    /// Creates a texture from tightly packed rows, top row first.
    ///
    /// # Panics
    /// Panics if `pixels.len() != width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<Color>) -> Self {
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel data does not match {}x{} texture",
            width,
            height
        );
        Self(Arc::new(Inner {
            id: TextureId::next(),
            size: uvec2(width, height),
            pixels,
        }))
    }

    /// Creates a texture from RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> Self {
        Self::new(width, height, bytemuck::cast_slice(data).to_vec())
    }

    pub fn id(&self) -> TextureId {
        self.0.id
    }

    pub fn size(&self) -> UVec2 {
        self.0.size
    }

    pub fn width(&self) -> u32 {
        self.0.size.x
    }

    pub fn height(&self) -> u32 {
        self.0.size.y
    }

    pub fn pixels(&self) -> &[Color] {
        &self.0.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_id() {
        let a = Texture::new(1, 1, vec![Color::WHITE]);
        let b = Texture::new(1, 1, vec![Color::WHITE]);
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.as_bytes(), &[255, 255, 255, 255]);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn wrong_size() {
        Texture::new(2, 2, vec![Color::WHITE]);
    }
}
