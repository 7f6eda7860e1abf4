//! Per-instance data layouts of the draw operations and the
//! programs that shade them.

use bytemuck::{Pod, Zeroable};
use glam::{vec2, Vec2, Vec4};

use crate::{
    raster::{self, Pixels, View},
    Buffer, Color, Filter, IntRect, Rect,
};

/// Values shared by every draw until the next
/// [`GlobalsOp`](crate::op::globals::GlobalsOp).
///
/// Instance positions are mapped onto the target with
/// `position * scale + offset`; the result is clipped to `clip`.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Globals {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
    /// `x, y, width, height` in target coordinates.
    pub clip: [f32; 4],
}

impl Globals {
    pub fn new(scale: Vec2, offset: Vec2, clip: Rect) -> Self {
        Self {
            scale: scale.to_array(),
            offset: offset.to_array(),
            clip: [clip.pos.x, clip.pos.y, clip.size.x, clip.size.y],
        }
    }

    /// Identity transform, no clip.
    pub fn identity() -> Self {
        Self::new(Vec2::ONE, Vec2::ZERO, Rect::infinity())
    }

    pub fn transform_point(&self, point: Vec2) -> Vec2 {
        point * Vec2::from(self.scale) + Vec2::from(self.offset)
    }

    pub fn transform_rect(&self, rect: Rect) -> Rect {
        let a = self.transform_point(rect.pos);
        let b = self.transform_point(rect.max());
        let min = a.min(b);
        Rect::new(min, a.max(b) - min)
    }

    pub fn clip_rect(&self) -> Rect {
        Rect::from_xywh(self.clip[0], self.clip[1], self.clip[2], self.clip[3])
    }
}

impl Default for Globals {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ColorInstance {
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

impl ColorInstance {
    pub fn new(rect: Rect, color: Color) -> Self {
        Self {
            rect: rect_to_array(rect),
            color: color.to_vec4().to_array(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TextureInstance {
    pub rect: [f32; 4],
    /// Normalized `u0, v0, u1, v1` of the sampled area.
    pub tex_rect: [f32; 4],
}

impl TextureInstance {
    pub fn new(rect: Rect, tex_rect: Rect) -> Self {
        let max = tex_rect.max();
        Self {
            rect: rect_to_array(rect),
            tex_rect: [tex_rect.pos.x, tex_rect.pos.y, max.x, max.y],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GradientInstance {
    pub rect: [f32; 4],
    /// Start and end point of the gradient line.
    pub points: [f32; 4],
    /// Byte offset of the first stop in the storage buffer, and stop count.
    pub stops: [u32; 2],
    pub _pad: [u32; 2],
}

/// A color stop as laid out in a storage buffer.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GradientStop {
    pub color: [f32; 4],
    pub offset: f32,
    pub _pad: [f32; 3],
}

impl GradientStop {
    pub fn new(offset: f32, color: Color) -> Self {
        Self {
            color: color.to_vec4().to_array(),
            offset,
            _pad: [0.; 3],
        }
    }
}

fn rect_to_array(rect: Rect) -> [f32; 4] {
    [rect.pos.x, rect.pos.y, rect.size.x, rect.size.y]
}

fn rect_from_array(a: [f32; 4]) -> Rect {
    Rect::from_xywh(a[0], a[1], a[2], a[3])
}

/// Where a draw lands: the target pixels, how rows map to logical
/// coordinates, the active scissor and globals.
pub(crate) struct DrawTarget<'a> {
    pub pixels: &'a mut Pixels,
    pub view: View,
    pub scissor: Option<IntRect>,
    pub globals: Globals,
}

pub(crate) fn draw_color(target: DrawTarget<'_>, instances: &[ColorInstance]) {
    let clip = target.globals.clip_rect();
    for instance in instances {
        let rect = target.globals.transform_rect(rect_from_array(instance.rect));
        let color = Color::from_vec4(Vec4::from(instance.color));
        raster::shade(target.pixels, target.view, target.scissor, clip, rect, |_| {
            color
        });
    }
}

pub(crate) fn draw_texture(
    target: DrawTarget<'_>,
    source: &Pixels,
    filter: Filter,
    instances: &[TextureInstance],
) {
    let clip = target.globals.clip_rect();
    let size = vec2(source.width as f32, source.height as f32);
    for instance in instances {
        let rect = target.globals.transform_rect(rect_from_array(instance.rect));
        let [u0, v0, u1, v1] = instance.tex_rect;
        raster::shade(target.pixels, target.view, target.scissor, clip, rect, |p| {
            let t = (p - rect.pos) / rect.size;
            let uv = vec2(u0 + t.x * (u1 - u0), v0 + t.y * (v1 - v0));
            source.sample(uv * size, filter)
        });
    }
}

/// Stops are read from `storage` at the offset each instance names.
pub(crate) fn draw_gradient(
    target: DrawTarget<'_>,
    storage: &Buffer,
    instances: &[GradientInstance],
) {
    let clip = target.globals.clip_rect();
    for instance in instances {
        let [offset, count] = instance.stops;
        let stops: Vec<GradientStop> = storage.read_pod(offset as usize, count as usize);
        let stops = &stops;
        let rect = target.globals.transform_rect(rect_from_array(instance.rect));
        let [x0, y0, x1, y1] = instance.points;
        let start = target.globals.transform_point(vec2(x0, y0));
        let end = target.globals.transform_point(vec2(x1, y1));
        let line = end - start;
        let length_sq = line.length_squared();
        raster::shade(target.pixels, target.view, target.scissor, clip, rect, |p| {
            let t = if length_sq > 0. {
                ((p - start).dot(line) / length_sq).clamp(0., 1.)
            } else {
                0.
            };
            gradient_color(stops, t)
        });
    }
}

fn gradient_color(stops: &[GradientStop], t: f32) -> Color {
    let (first, last) = match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Color::TRANSPARENT,
    };
    if t <= first.offset {
        return Color::from_vec4(Vec4::from(first.color));
    }
    for pair in stops.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if t <= b.offset {
            let span = b.offset - a.offset;
            let f = if span > 0. { (t - a.offset) / span } else { 1. };
            return Color::from_vec4(Vec4::from(a.color).lerp(Vec4::from(b.color), f));
        }
    }
    Color::from_vec4(Vec4::from(last.color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_transform() {
        let globals = Globals::new(vec2(2., 2.), vec2(-1., 0.), Rect::infinity());
        assert_eq!(
            globals.transform_rect(Rect::from_xywh(1., 1., 1., 2.)),
            Rect::from_xywh(1., 2., 2., 4.)
        );
    }

    #[test]
    fn gradient_stops_interpolate() {
        let stops = [
            GradientStop::new(0., Color::BLACK),
            GradientStop::new(1., Color::WHITE),
        ];
        assert_eq!(gradient_color(&stops, 0.), Color::BLACK);
        assert_eq!(gradient_color(&stops, 1.), Color::WHITE);
        assert_eq!(gradient_color(&stops, 0.5), Color::rgb(128, 128, 128));
        assert_eq!(gradient_color(&[], 0.5), Color::TRANSPARENT);
    }

    #[test]
    fn color_draw_respects_clip() {
        let mut pixels = Pixels::new(4, 1);
        draw_color(
            DrawTarget {
                pixels: &mut pixels,
                view: View::TOP_DOWN,
                scissor: None,
                globals: Globals::new(Vec2::ONE, Vec2::ZERO, Rect::from_xywh(0., 0., 2., 1.)),
            },
            &[ColorInstance::new(Rect::from_xywh(0., 0., 4., 1.), Color::WHITE)],
        );
        assert_eq!(
            pixels.data,
            vec![Color::WHITE, Color::WHITE, Color::TRANSPARENT, Color::TRANSPARENT]
        );
    }
}
