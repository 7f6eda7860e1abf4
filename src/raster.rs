//! Software implementation of the pixel operations both devices expose.
//!
//! Everything here works in memory coordinates: row 0 is the first row
//! of the image's storage. How a backend maps its logical coordinates
//! onto rows is described by a [`View`].

use glam::{vec2, Vec2};

use crate::{Color, Filter, IntRect, Rect};

/// Texel storage of an image.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Pixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<Color>,
}

impl Pixels {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![Color::TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> Color {
        self.data[y as usize * self.width as usize + x as usize]
    }

    fn get_mut(&mut self, x: u32, y: u32) -> &mut Color {
        &mut self.data[y as usize * self.width as usize + x as usize]
    }

    /// Copies `rect` out, top row first.
    pub fn read_rect(&self, rect: IntRect) -> Vec<Color> {
        assert!(self.bounds().contains_rect(&rect), "read outside of image");
        let mut out = Vec::with_capacity((rect.width * rect.height) as usize);
        for y in rect.y..rect.y + rect.height {
            let start = y as usize * self.width as usize + rect.x as usize;
            out.extend_from_slice(&self.data[start..start + rect.width as usize]);
        }
        out
    }

    /// Writes tightly packed rows into `rect`.
    pub fn write_rect(&mut self, rect: IntRect, data: &[Color]) {
        assert!(self.bounds().contains_rect(&rect), "write outside of image");
        assert_eq!(data.len(), (rect.width * rect.height) as usize);
        for (row, y) in (rect.y..rect.y + rect.height).enumerate() {
            let start = y as usize * self.width as usize + rect.x as usize;
            let src = &data[row * rect.width as usize..(row + 1) * rect.width as usize];
            self.data[start..start + rect.width as usize].copy_from_slice(src);
        }
    }

    /// Replaces every pixel of `rect` (clipped to the image) with `color`.
    pub fn fill(&mut self, rect: IntRect, color: Color) {
        let rect = rect.intersection(&self.bounds());
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                *self.get_mut(x as u32, y as u32) = color;
            }
        }
    }

    /// Samples at texel-space coordinates, clamping to the edges.
    pub fn sample(&self, pos: Vec2, filter: Filter) -> Color {
        let max_x = self.width as i32 - 1;
        let max_y = self.height as i32 - 1;
        let texel = |x: i32, y: i32| self.get(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32);
        match filter {
            Filter::Nearest => texel(pos.x.floor() as i32, pos.y.floor() as i32),
            Filter::Linear => {
                let p = pos - Vec2::splat(0.5);
                let base = p.floor();
                let t = p - base;
                let (x, y) = (base.x as i32, base.y as i32);
                let top = texel(x, y).to_vec4().lerp(texel(x + 1, y).to_vec4(), t.x);
                let bottom = texel(x, y + 1)
                    .to_vec4()
                    .lerp(texel(x + 1, y + 1).to_vec4(), t.x);
                Color::from_vec4(top.lerp(bottom, t.y))
            }
        }
    }
}

/// Corner coordinates of a blit region. `x1 < x0` or `y1 < y0`
/// mirror the region along that axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlitBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BlitBox {
    pub fn from_rect(rect: IntRect) -> Self {
        Self {
            x0: rect.x,
            y0: rect.y,
            x1: rect.x + rect.width,
            y1: rect.y + rect.height,
        }
    }

    fn covered(&self) -> IntRect {
        let x = self.x0.min(self.x1);
        let y = self.y0.min(self.y1);
        IntRect::new(x, y, (self.x1 - self.x0).abs(), (self.y1 - self.y0).abs())
    }
}

/// Scaled copy of `src_box` onto `dst_box`.
///
/// Only pixels inside `dst_box`, the destination bounds and the optional
/// scissor are written.
pub(crate) fn blit(
    src: &Pixels,
    src_box: BlitBox,
    dst: &mut Pixels,
    dst_box: BlitBox,
    filter: Filter,
    scissor: Option<IntRect>,
) {
    let mut area = dst_box.covered().intersection(&dst.bounds());
    if let Some(scissor) = scissor {
        area = area.intersection(&scissor);
    }
    if area.is_empty() || dst_box.x0 == dst_box.x1 || dst_box.y0 == dst_box.y1 {
        return;
    }

    let scale = vec2(
        (src_box.x1 - src_box.x0) as f32 / (dst_box.x1 - dst_box.x0) as f32,
        (src_box.y1 - src_box.y0) as f32 / (dst_box.y1 - dst_box.y0) as f32,
    );
    let src_origin = vec2(src_box.x0 as f32, src_box.y0 as f32);
    let dst_origin = vec2(dst_box.x0 as f32, dst_box.y0 as f32);

    for y in area.y..area.y + area.height {
        for x in area.x..area.x + area.width {
            let center = vec2(x as f32 + 0.5, y as f32 + 0.5);
            let pos = src_origin + (center - dst_origin) * scale;
            *dst.get_mut(x as u32, y as u32) = src.sample(pos, filter);
        }
    }
}

/// Maps storage rows to logical coordinates with the origin in the
/// top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct View {
    /// When set, row 0 is the bottom of a target this many rows high.
    pub flip_y: Option<u32>,
}

impl View {
    pub const TOP_DOWN: View = View { flip_y: None };

    fn logical_center(&self, x: i32, row: i32) -> Vec2 {
        match self.flip_y {
            None => vec2(x as f32 + 0.5, row as f32 + 0.5),
            Some(height) => vec2(x as f32 + 0.5, height as f32 - row as f32 - 0.5),
        }
    }

    fn rows_for(&self, rect: IntRect) -> IntRect {
        match self.flip_y {
            None => rect,
            Some(height) => rect.flipped_y(height as i32),
        }
    }
}

/// Source-over blending of unpremultiplied colors.
pub(crate) fn blend_over(src: Color, dst: Color) -> Color {
    let s = src.to_vec4();
    let d = dst.to_vec4();
    let alpha = s.w + d.w * (1. - s.w);
    if alpha <= 0. {
        return Color::TRANSPARENT;
    }
    let rgb = (s.truncate() * s.w + d.truncate() * d.w * (1. - s.w)) / alpha;
    Color::from_vec4(rgb.extend(alpha))
}

/// Runs `shader` for every pixel whose center lies in both `rect` and
/// `clip` (logical coordinates) and blends the result onto `dst`.
pub(crate) fn shade(
    dst: &mut Pixels,
    view: View,
    scissor: Option<IntRect>,
    clip: Rect,
    rect: Rect,
    shader: impl Fn(Vec2) -> Color,
) {
    let logical = rect.intersection(clip);
    if logical.is_empty() {
        return;
    }
    let mut area = view.rows_for(logical.round_out()).intersection(&dst.bounds());
    if let Some(scissor) = scissor {
        area = area.intersection(&scissor);
    }
    for row in area.y..area.y + area.height {
        for x in area.x..area.x + area.width {
            let center = view.logical_center(x, row);
            if !rect.contains(center) || !clip.contains(center) {
                continue;
            }
            let pixel = dst.get_mut(x as u32, row as u32);
            *pixel = blend_over(shader(center), *pixel);
        }
    }
}
