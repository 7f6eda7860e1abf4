//! Operation records and the chain they are recorded into.
//!
//! Each kind of operation is a plain struct implementing [`Op`] plus one
//! execution trait per backend it supports
//! ([`ExplicitOp`](crate::backend::explicit::ExplicitOp),
//! [`ImmediateOp`](crate::backend::immediate::ImmediateOp)).
//! A frame stores records as the backend's erased record type, so a kind
//! without a hook for that backend cannot be appended to its frames.

use std::{any::Any, fmt, fmt::Write};

use crate::{Color, Image, IntRect, Rect};

pub mod blit;
pub mod clear;
pub mod color;
pub mod download;
pub mod globals;
pub mod gradient;
pub mod pass;
pub mod scissor;
pub mod texture;
pub mod upload;

/// Coarse classification of where in a frame an operation may appear.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Writes CPU data into an image. Outside of render passes.
    Upload,
    /// Changes pass state. Inside a render pass.
    Command,
    /// Draws. Inside a render pass.
    Shader,
    /// A transfer that is a pass of its own. Outside of render passes.
    Pass,
    /// Opens a render pass.
    BeginPass,
    /// Closes the innermost render pass.
    EndPass,
}

impl Stage {
    /// Whether ops of this stage must be recorded inside a render pass.
    pub fn in_pass(self) -> bool {
        matches!(self, Stage::Command | Stage::Shader | Stage::EndPass)
    }
}

/// Backend-independent behavior of an operation kind.
pub trait Op: fmt::Debug + Send + 'static {
    fn stage(&self) -> Stage;

    /// Writes a one-line description for [`Frame::dump`](crate::Frame::dump).
    fn print(&self, printer: &mut Printer<'_>);

    /// Called exactly once per record when its frame is cleaned up,
    /// after the device finished executing it.
    ///
    /// References the record holds are dropped right after, together
    /// with the rest of the chain.
    fn release(&mut self) {}

    /// Images the operation samples from inside a render pass.
    ///
    /// Backends that need to prepare images before a pass starts
    /// look ahead through the pass with this.
    fn sampled_images(&self) -> &[Image] {
        &[]
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Position of a record in an [`OpChain`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Slot<R: ?Sized> {
    op: Box<R>,
    next: Option<OpId>,
}

/// Append-only arena of operation records, linked in emission order.
///
/// Records are never removed individually; [`OpChain::release`] drops
/// all of them at once and keeps the storage for the next frame.
pub struct OpChain<R: ?Sized> {
    slots: Vec<Slot<R>>,
}

impl<R: ?Sized + Op> OpChain<R> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Appends a record after the current tail.
    pub fn push(&mut self, op: Box<R>) -> OpId {
        let id = OpId(
            self.slots
                .len()
                .try_into()
                .expect("too many operations in one frame"),
        );
        if let Some(tail) = self.slots.last_mut() {
            debug_assert!(tail.next.is_none());
            tail.next = Some(id);
        }
        self.slots.push(Slot { op, next: None });
        id
    }

    pub fn first(&self) -> Option<OpId> {
        (!self.slots.is_empty()).then(|| OpId(0))
    }

    pub fn last(&self) -> Option<OpId> {
        self.slots.len().checked_sub(1).map(|i| OpId(i as u32))
    }

    /// The record following `id`, or `None` at the end of the chain.
    pub fn next(&self, id: OpId) -> Option<OpId> {
        self.slots[id.index()].next
    }

    pub fn get(&self, id: OpId) -> &R {
        &self.slots[id.index()].op
    }

    pub fn last_mut(&mut self) -> Option<&mut R> {
        self.slots.last_mut().map(|slot| &mut *slot.op)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Follows the links from the first record.
    pub fn iter(&self) -> Iter<'_, R> {
        Iter {
            chain: self,
            cursor: self.first(),
        }
    }

    /// Runs every record's release hook in order, then drops the records.
    ///
    /// Returns the number of released records.
    pub fn release(&mut self) -> usize {
        let count = self.slots.len();
        for slot in &mut self.slots {
            slot.op.release();
        }
        self.slots.clear();
        count
    }
}

impl<R: ?Sized + Op> Default for OpChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ?Sized + Op> fmt::Debug for OpChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, op)| op)).finish()
    }
}

pub struct Iter<'a, R: ?Sized> {
    chain: &'a OpChain<R>,
    cursor: Option<OpId>,
}

impl<'a, R: ?Sized + Op> Iterator for Iter<'a, R> {
    type Item = (OpId, &'a R);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.chain.next(id);
        Some((id, self.chain.get(id)))
    }
}

/// Builds the textual dump of a chain.
pub struct Printer<'a> {
    out: &'a mut String,
    indent: usize,
}

impl<'a> Printer<'a> {
    pub(crate) fn new(out: &'a mut String, indent: usize) -> Self {
        Self { out, indent }
    }

    /// Starts a line describing an operation.
    pub fn op(&mut self, name: &str) -> &mut Self {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(name);
        self.out.push(' ');
        self
    }

    pub fn int_rect(&mut self, rect: &IntRect) -> &mut Self {
        let _ = write!(self.out, "{} ", rect);
        self
    }

    pub fn rect(&mut self, rect: &Rect) -> &mut Self {
        let _ = write!(
            self.out,
            "{} {} {} {} ",
            rect.pos.x, rect.pos.y, rect.size.x, rect.size.y
        );
        self
    }

    pub fn color(&mut self, color: Color) -> &mut Self {
        let _ = write!(self.out, "{} ", color);
        self
    }

    pub fn image(&mut self, image: &Image) -> &mut Self {
        let _ = write!(self.out, "{}x{} ", image.width(), image.height());
        self
    }

    pub fn text(&mut self, text: impl fmt::Display) -> &mut Self {
        let _ = write!(self.out, "{} ", text);
        self
    }

    pub fn newline(&mut self) {
        while self.out.ends_with(' ') {
            self.out.pop();
        }
        self.out.push('\n');
    }
}
