use std::fmt::Display;

use bytemuck::{Pod, Zeroable};
use glam::{vec4, Vec4};

/// An sRGB color with an alpha channel.
///
/// Unpremultiplied by convention. This is also the texel
/// format of every image the devices allocate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Color([u8; 4]);

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(u8::MAX, u8::MAX, u8::MAX);

    /// Creates a color from its RGBA components.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    /// Creates a color from RGB components with 100% alpha.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, u8::MAX)
    }

    /// Gets the red component.
    pub fn red(&self) -> u8 {
        self.0[0]
    }

    /// Gets the green component.
    pub fn green(&self) -> u8 {
        self.0[1]
    }

    /// Gets the blue component.
    pub fn blue(&self) -> u8 {
        self.0[2]
    }

    /// Gets the alpha component.
    pub fn alpha(&self) -> u8 {
        self.0[3]
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha() == u8::MAX
    }

    /// Gets the color as an array of values in RGBA order.
    pub fn to_array(&self) -> [u8; 4] {
        self.0
    }

    /// Creates a color from an array of values in RGBA order.
    pub fn from_array(array: [u8; 4]) -> Self {
        Self(array)
    }

    /// Returns the components normalized to `[0, 1]`.
    ///
    /// No transfer function is applied.
    pub fn to_vec4(&self) -> Vec4 {
        vec4(
            self.red() as f32,
            self.green() as f32,
            self.blue() as f32,
            self.alpha() as f32,
        ) / 255.
    }

    /// Inverse of [`Color::to_vec4`]. Components are clamped and rounded.
    pub fn from_vec4(v: Vec4) -> Self {
        let v = (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.).round();
        Self([v.x as u8, v.y as u8, v.z as u8, v.w as u8])
    }

    /// Linearly interpolates between `self` and `other`.
    pub fn lerp(self, other: Color, t: f32) -> Color {
        Self::from_vec4(self.to_vec4().lerp(other.to_vec4(), t))
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rgba = self.to_array();
        write!(f, "#{:02x}{:02x}{:02x}", rgba[0], rgba[1], rgba[2])?;
        if rgba[3] != u8::MAX {
            write!(f, "{:02x}", rgba[3])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Color;

    #[test]
    fn hex_strings() {
        let color = Color::rgba(255, 254, 1, 255);
        assert_eq!(color.to_string(), "#fffe01");

        let color = Color::rgba(0, 0, 0, 128);
        assert_eq!(color.to_string(), "#00000080");
    }

    #[test]
    fn lerp_endpoints() {
        let a = Color::rgb(0, 100, 200);
        let b = Color::rgb(200, 100, 0);
        assert_eq!(a.lerp(b, 0.), a);
        assert_eq!(a.lerp(b, 1.), b);
        assert_eq!(a.lerp(b, 0.5), Color::rgb(100, 100, 100));
    }
}
