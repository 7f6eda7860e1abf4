use std::fmt;

use glam::{ivec2, vec2, IVec2, Vec2};
use smallvec::SmallVec;

/// A rectangle.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Rect {
    /// The position of the top-left corner
    /// of this rectangle.
    pub pos: Vec2,
    /// The side lengths of this rectangle.
    pub size: Vec2,
}

impl Rect {
    pub fn new(pos: Vec2, size: Vec2) -> Self {
        Self { pos, size }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(vec2(x, y), vec2(width, height))
    }

    pub fn offset(self, offset: Vec2) -> Self {
        Self {
            pos: self.pos + offset,
            size: self.size,
        }
    }

    pub fn infinity() -> Self {
        Self {
            pos: Vec2::splat(f32::MIN / 4.),
            size: Vec2::splat(f32::MAX / 2.),
        }
    }

    pub fn max(self) -> Vec2 {
        self.pos + self.size
    }

    pub fn is_empty(self) -> bool {
        self.size.x <= 0. || self.size.y <= 0.
    }

    pub fn contains(self, pos: Vec2) -> bool {
        pos.x >= self.pos.x
            && pos.y >= self.pos.y
            && pos.x < (self.pos.x + self.size.x)
            && pos.y < (self.pos.y + self.size.y)
    }

    pub fn intersection(self, other: Rect) -> Rect {
        let min = self.pos.max(other.pos);
        let max = self.max().min(other.max());
        Rect {
            pos: min,
            size: (max - min).max(Vec2::ZERO),
        }
    }

    /// Returns the integer rectangle with the same bounds, if
    /// all edges lie on whole pixels.
    pub fn to_int_rect(self) -> Option<IntRect> {
        let min = self.pos;
        let max = self.max();
        if min.round() != min || max.round() != max || !min.is_finite() || !max.is_finite() {
            return None;
        }
        Some(IntRect::new(
            min.x as i32,
            min.y as i32,
            (max.x - min.x) as i32,
            (max.y - min.y) as i32,
        ))
    }

    /// Smallest integer rectangle covering this one.
    pub fn round_out(self) -> IntRect {
        let min = self.pos.floor();
        let max = self.max().ceil();
        IntRect::new(
            min.x as i32,
            min.y as i32,
            (max.x - min.x) as i32,
            (max.y - min.y) as i32,
        )
    }
}

/// A rectangle on the pixel grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn pos(&self) -> IVec2 {
        ivec2(self.x, self.y)
    }

    pub fn max(&self) -> IVec2 {
        ivec2(self.x + self.width, self.y + self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains_rect(&self, other: &IntRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    pub fn intersection(&self, other: &IntRect) -> IntRect {
        let min = self.pos().max(other.pos());
        let max = self.max().min(other.max());
        let size = (max - min).max(IVec2::ZERO);
        IntRect::new(min.x, min.y, size.x, size.y)
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.pos().as_vec2(), vec2(self.width as f32, self.height as f32))
    }

    /// Mirrors the rectangle vertically inside a target of the given height.
    pub fn flipped_y(&self, height: i32) -> IntRect {
        IntRect::new(self.x, height - self.y - self.height, self.width, self.height)
    }
}

impl fmt::Display for IntRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.x, self.y, self.width, self.height)
    }
}

/// A set of pixel rectangles, e.g. the damaged area of a target.
///
/// Rectangles are kept as given; overlap is allowed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    rects: SmallVec<[IntRect; 4]>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: IntRect) -> Self {
        let mut region = Self::new();
        region.union_rect(rect);
        region
    }

    pub fn union_rect(&mut self, rect: IntRect) -> &mut Self {
        if !rect.is_empty() && !self.rects.iter().any(|r| r.contains_rect(&rect)) {
            self.rects.retain(|r| !rect.contains_rect(r));
            self.rects.push(rect);
        }
        self
    }

    pub fn rects(&self) -> &[IntRect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The smallest rectangle containing the whole region.
    pub fn extents(&self) -> IntRect {
        let mut iter = self.rects.iter();
        let first = match iter.next() {
            Some(r) => *r,
            None => return IntRect::default(),
        };
        let (min, max) = iter.fold((first.pos(), first.max()), |(min, max), r| {
            (min.min(r.pos()), max.max(r.max()))
        });
        IntRect::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn intersect_rect(&self, rect: IntRect) -> Region {
        let mut out = Region::new();
        for r in &self.rects {
            out.union_rect(r.intersection(&rect));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_rect_conversion() {
        assert_eq!(
            Rect::from_xywh(1., 2., 3., 4.).to_int_rect(),
            Some(IntRect::new(1, 2, 3, 4))
        );
        assert_eq!(Rect::from_xywh(0.5, 2., 3., 4.).to_int_rect(), None);
        assert_eq!(
            Rect::from_xywh(0.5, 2., 3., 4.).round_out(),
            IntRect::new(0, 2, 4, 4)
        );
    }

    #[test]
    fn flip() {
        let rect = IntRect::new(0, 1, 4, 2);
        assert_eq!(rect.flipped_y(8), IntRect::new(0, 5, 4, 2));
        assert_eq!(rect.flipped_y(8).flipped_y(8), rect);
    }

    #[test]
    fn region_extents() {
        let mut region = Region::new();
        region
            .union_rect(IntRect::new(0, 0, 2, 2))
            .union_rect(IntRect::new(4, 4, 2, 2))
            .union_rect(IntRect::new(1, 1, 1, 1));
        assert_eq!(region.rects().len(), 2);
        assert_eq!(region.extents(), IntRect::new(0, 0, 6, 6));
        assert_eq!(
            region.intersect_rect(IntRect::new(0, 0, 1, 1)).rects(),
            &[IntRect::new(0, 0, 1, 1)]
        );
    }
}
