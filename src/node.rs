//! A minimal scene description for [`Renderer::render`](crate::Renderer::render).

use glam::Vec2;

use crate::{Color, Filter, Rect, Texture};

/// A node of a scene tree. Coordinates are in scene units, mapped onto
/// the target by the viewport passed to the renderer.
#[derive(Clone, Debug)]
pub enum Node {
    /// A solid color fill.
    Color { bounds: Rect, color: Color },
    /// A texture stretched over `bounds`.
    Texture {
        bounds: Rect,
        texture: Texture,
        filter: Filter,
    },
    /// A linear gradient from `start` to `end`, with `(offset, color)`
    /// stops in ascending order.
    LinearGradient {
        bounds: Rect,
        start: Vec2,
        end: Vec2,
        stops: Vec<(f32, Color)>,
    },
    /// Restricts `child` to `clip`.
    Clip { clip: Rect, child: Box<Node> },
    /// Children drawn in order, later ones on top.
    Container(Vec<Node>),
}

impl Node {
    pub fn color(bounds: Rect, color: Color) -> Self {
        Node::Color { bounds, color }
    }

    pub fn texture(bounds: Rect, texture: &Texture, filter: Filter) -> Self {
        Node::Texture {
            bounds,
            texture: texture.clone(),
            filter,
        }
    }

    pub fn clip(clip: Rect, child: Node) -> Self {
        Node::Clip {
            clip,
            child: Box::new(child),
        }
    }

    /// Calls `f` with every texture node of the tree, in drawing order.
    pub fn for_each_texture(&self, f: &mut impl FnMut(&Texture, Filter)) {
        match self {
            Node::Texture {
                texture, filter, ..
            } => f(texture, *filter),
            Node::Clip { child, .. } => child.for_each_texture(f),
            Node::Container(children) => {
                for child in children {
                    child.for_each_texture(f);
                }
            }
            Node::Color { .. } | Node::LinearGradient { .. } => {}
        }
    }

    /// The area the node may draw to, ignoring clips below it.
    pub fn bounds(&self) -> Rect {
        match self {
            Node::Color { bounds, .. }
            | Node::Texture { bounds, .. }
            | Node::LinearGradient { bounds, .. } => *bounds,
            Node::Clip { clip, child } => clip.intersection(child.bounds()),
            Node::Container(children) => children
                .iter()
                .map(Node::bounds)
                .filter(|r| !r.is_empty())
                .reduce(|a, b| {
                    let min = a.pos.min(b.pos);
                    Rect::new(min, a.max().max(b.max()) - min)
                })
                .unwrap_or_default(),
        }
    }
}
