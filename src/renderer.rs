use std::{
    collections::VecDeque,
    mem,
    time::{Duration, Instant},
};

use glam::Vec2;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::{
    backend::CoreOps,
    frame::DEFAULT_STORAGE_CAPACITY,
    node::Node,
    op::{
        blit::BlitOp,
        clear::ClearOp,
        color::ColorOp,
        download::{Download, DownloadOp},
        globals::GlobalsOp,
        gradient::GradientOp,
        pass::{BeginPassOp, EndPassOp},
        scissor::ScissorOp,
        texture::TextureOp,
    },
    Color, Error, Filter, Frame, Globals, Image, ImageFlags, IntRect, Optimizations, Rect,
    Region, Result, Texture, TextureId,
};

/// Renderer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Frames that may be executing on the device at once.
    pub frames_in_flight: usize,
    /// Capacity of each storage buffer of a frame, in bytes.
    pub storage_buffer_size: usize,
    /// How long an uploaded texture stays cached without being drawn.
    pub texture_cache_expire: Duration,
    /// Optimizations to request from the device.
    pub optimizations: Optimizations,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frames_in_flight: 4,
            storage_buffer_size: DEFAULT_STORAGE_CAPACITY,
            texture_cache_expire: Duration::from_secs(10),
            optimizations: Optimizations::all(),
        }
    }
}

/// Builder for a [`Renderer`].
pub struct RendererBuilder<B> {
    device: B,
    settings: Settings,
}

impl<B: CoreOps> RendererBuilder<B> {
    /// Sets the number of frames that may be in flight at once.
    /// Rendering blocks on the oldest frame once all are in use.
    ///
    /// The default is 4.
    pub fn frames_in_flight(mut self, frames: usize) -> Self {
        assert!(frames > 0, "at least one frame must be in flight");
        self.settings.frames_in_flight = frames;
        self
    }

    /// Sets the capacity of storage buffers, which bounds the
    /// number of color stops a single gradient may have.
    pub fn storage_buffer_size(mut self, size: usize) -> Self {
        self.settings.storage_buffer_size = size;
        self
    }

    /// Sets the duration before an unused texture is dropped
    /// from the cache, freeing its image.
    ///
    /// The default is 10 seconds.
    pub fn texture_cache_expire(mut self, duration: Duration) -> Self {
        self.settings.texture_cache_expire = duration;
        self
    }

    pub fn optimizations(mut self, optimizations: Optimizations) -> Self {
        self.settings.optimizations = optimizations;
        self
    }

    /// Replaces all settings, e.g. with ones loaded from a file.
    pub fn settings(mut self, settings: Settings) -> Self {
        assert!(
            settings.frames_in_flight > 0,
            "at least one frame must be in flight"
        );
        self.settings = settings;
        self
    }

    pub fn build(self) -> Renderer<B> {
        log::debug!("Creating {:?} renderer with {:?}", B::KIND, self.settings);
        Renderer {
            device: self.device,
            frames: VecDeque::with_capacity(self.settings.frames_in_flight),
            // textures are expired manually
            textures: LruCache::unbounded_with_hasher(ahash::RandomState::new()),
            settings: self.settings,
            epoch: Instant::now(),
            timestamp: 0,
        }
    }
}

struct CachedImage {
    image: Image,
    last_used: u64,
}

/// Renders [`Node`] trees into images, driving one [`Frame`] per call.
///
/// Frames are kept in a ring and reused once the device is done with
/// them. Errors of a submission that only show up on the device are
/// reported by the call that reuses its frame.
pub struct Renderer<B: CoreOps> {
    device: B,
    settings: Settings,
    frames: VecDeque<Frame<B>>,
    textures: LruCache<TextureId, CachedImage, ahash::RandomState>,
    epoch: Instant,
    timestamp: u64,
}

impl<B: CoreOps> Renderer<B> {
    pub fn builder(device: B) -> RendererBuilder<B> {
        RendererBuilder {
            device,
            settings: Settings::default(),
        }
    }

    pub fn new(device: B) -> Self {
        Self::builder(device).build()
    }

    pub fn device(&self) -> &B {
        &self.device
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of textures with a cached image.
    pub fn cached_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// The image `texture` was uploaded to, if it is cached.
    pub fn cached_image(&self, texture: &Texture) -> Option<&Image> {
        self.textures.peek(&texture.id()).map(|cached| &cached.image)
    }

    /// Renders `node` into `target`.
    ///
    /// `viewport` is the area of the scene mapped onto the whole
    /// target. Only the pixels inside `clip` are redrawn; an empty
    /// region redraws the whole target. Redrawn pixels are cleared to
    /// transparent first.
    pub fn render(
        &mut self,
        target: &Image,
        viewport: Rect,
        clip: &Region,
        node: &Node,
    ) -> Result<()> {
        let mut frame = self.begin_frame(target, clip)?;
        let result = self
            .record_node(&mut frame, target, viewport, node)
            .and_then(|()| frame.end(target));
        self.frames.push_back(frame);
        result
    }

    /// Reads back all pixels of `target`, rows top to bottom.
    ///
    /// Blocks until the device has executed every earlier frame
    /// touching the target.
    pub fn download(&mut self, target: &Image) -> Result<Vec<Color>> {
        let frame = self.begin_frame(target, &Region::from_rect(target.bounds()))?;
        self.finish_with_download(frame, target)
    }

    /// Renders `node` like [`render`](Self::render) and reads back the
    /// result within the same frame.
    pub fn render_to_pixels(
        &mut self,
        target: &Image,
        viewport: Rect,
        clip: &Region,
        node: &Node,
    ) -> Result<Vec<Color>> {
        let mut frame = self.begin_frame(target, clip)?;
        if let Err(e) = self.record_node(&mut frame, target, viewport, node) {
            frame.cleanup();
            self.frames.push_back(frame);
            return Err(e);
        }
        self.finish_with_download(frame, target)
    }

    /// Waits for every frame in flight and releases it.
    ///
    /// Returns the first failure among them.
    pub fn wait_idle(&mut self) -> Result<()> {
        let mut result = Ok(());
        for frame in &mut self.frames {
            let status = frame.sync();
            frame.cleanup();
            if result.is_ok() {
                result = status;
            }
        }
        result
    }

    fn finish_with_download(&mut self, mut frame: Frame<B>, target: &Image) -> Result<Vec<Color>> {
        let download = Download::new();
        let result = DownloadOp::append(&mut frame, target, target.bounds(), &download)
            .and_then(|()| frame.end(target))
            .and_then(|()| frame.sync());
        // Downloads are delivered when their records are released.
        frame.cleanup();
        self.frames.push_back(frame);
        result?;
        download
            .take()
            .ok_or_else(|| Error::Backend("download completed without pixels".into()))
    }

    /// Checks out a frame and begins recording into it.
    fn begin_frame(&mut self, target: &Image, clip: &Region) -> Result<Frame<B>> {
        let mut frame = self.checkout_frame()?;
        self.timestamp = self.next_timestamp();
        frame.setup(self.device.clone(), self.settings.optimizations);
        frame.set_timestamp(self.timestamp);
        frame.begin(target, target.depth(), clip, None);
        Ok(frame)
    }

    fn checkout_frame(&mut self) -> Result<Frame<B>> {
        if self.frames.len() < self.settings.frames_in_flight {
            return Ok(Frame::with_storage_capacity(
                self.settings.storage_buffer_size,
            ));
        }
        let mut frame = match self.frames.pop_front() {
            Some(frame) => frame,
            None => return Ok(Frame::with_storage_capacity(self.settings.storage_buffer_size)),
        };
        if frame.is_busy() {
            log::trace!("Waiting for frame {} to complete", frame.timestamp());
        }
        let status = frame.sync();
        frame.cleanup();
        status.map(|()| frame)
    }

    /// Microseconds since the renderer was created, strictly
    /// increasing between frames.
    fn next_timestamp(&self) -> u64 {
        let elapsed = self.epoch.elapsed().as_micros() as u64;
        elapsed.max(self.timestamp + 1)
    }

    fn collect_textures(&mut self) {
        let expire = self.settings.texture_cache_expire.as_micros() as u64;
        let mut evicted = 0;
        loop {
            let expired = match self.textures.peek_lru() {
                Some((_, cached)) => self.timestamp - cached.last_used > expire,
                None => false,
            };
            if !expired {
                break;
            }
            if let Some((id, cached)) = self.textures.pop_lru() {
                log::trace!(
                    "Evicting {:?} ({}x{}) from the texture cache",
                    id,
                    cached.image.width(),
                    cached.image.height()
                );
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::debug!(
                "Evicted {} textures, {} remain cached",
                evicted,
                self.textures.len()
            );
        }
    }

    /// Makes sure every texture of `node` has an image, recording
    /// uploads for new ones.
    fn prepare_textures(&mut self, frame: &mut Frame<B>, node: &Node) -> Result<()> {
        let mut textures = Vec::new();
        node.for_each_texture(&mut |texture, filter| textures.push((texture.clone(), filter)));

        for (texture, filter) in textures {
            if let Some(cached) = self.textures.get_mut(&texture.id()) {
                cached.last_used = self.timestamp;
                continue;
            }
            let image = frame.upload_texture(&texture, filter == Filter::Linear)?;
            self.textures.put(
                texture.id(),
                CachedImage {
                    image,
                    last_used: self.timestamp,
                },
            );
        }
        Ok(())
    }

    fn record_node(
        &mut self,
        frame: &mut Frame<B>,
        target: &Image,
        viewport: Rect,
        node: &Node,
    ) -> Result<()> {
        assert!(!viewport.is_empty(), "cannot render an empty viewport");
        self.collect_textures();

        let damage = frame.damage();
        let area = if damage.is_empty() {
            target.bounds()
        } else {
            damage.extents().intersection(&target.bounds())
        };
        if area.is_empty() {
            return Ok(());
        }

        let scale = target.size().as_vec2() / viewport.size;
        let globals = Globals::new(scale, -viewport.pos * scale, area.to_rect());

        self.prepare_textures(frame, node)?;
        if area == target.bounds() && self.try_blit(frame, target, &globals, node) {
            return Ok(());
        }

        BeginPassOp::append(frame, target, area, Some(Color::TRANSPARENT));
        GlobalsOp::append(frame, &globals);
        NodeProcessor {
            frame: &mut *frame,
            textures: &self.textures,
            globals,
            scissor: area,
        }
        .process(node)?;
        EndPassOp::append(frame);
        Ok(())
    }

    /// Copies a texture node covering exactly the whole target with a
    /// blit instead of a render pass.
    fn try_blit(
        &self,
        frame: &mut Frame<B>,
        target: &Image,
        globals: &Globals,
        node: &Node,
    ) -> bool {
        if !frame.should_optimize(Optimizations::BLIT) {
            return false;
        }
        let (bounds, texture, filter) = match node {
            Node::Texture {
                bounds,
                texture,
                filter,
            } => (*bounds, texture, *filter),
            Node::Container(children) if children.len() == 1 => {
                return self.try_blit(frame, target, globals, &children[0])
            }
            _ => return false,
        };
        let image = match self.textures.peek(&texture.id()) {
            Some(cached) => &cached.image,
            None => return false,
        };
        let filterable = filter == Filter::Nearest || image.supports(ImageFlags::FILTERABLE);
        if globals.transform_rect(bounds).to_int_rect() != Some(target.bounds())
            || !image.supports(ImageFlags::BLIT)
            || !filterable
        {
            return false;
        }

        BlitOp::append(
            frame,
            image,
            target,
            image.bounds(),
            target.bounds(),
            filter,
        );
        true
    }
}

/// Walks a node tree inside a render pass, tracking the clip.
///
/// Pixel-aligned clips use the scissor as long as no other clip is in
/// effect; all others are applied through the globals.
struct NodeProcessor<'a, B: CoreOps> {
    frame: &'a mut Frame<B>,
    textures: &'a LruCache<TextureId, CachedImage, ahash::RandomState>,
    /// The globals draws are recorded with. Their clip is the current
    /// clip in target coordinates, even when it is applied by the
    /// scissor instead.
    globals: Globals,
    scissor: IntRect,
}

impl<'a, B: CoreOps> NodeProcessor<'a, B> {
    fn process(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Color { bounds, color } => self.add_color(*bounds, *color),
            Node::Texture {
                bounds,
                texture,
                filter,
            } => self.add_texture(*bounds, texture, *filter),
            Node::LinearGradient {
                bounds,
                start,
                end,
                stops,
            } => {
                if !stops.is_empty() {
                    GradientOp::append(self.frame, *bounds, *start, *end, stops)?;
                }
            }
            Node::Clip { clip, child } => self.process_clipped(*clip, child)?,
            Node::Container(children) => {
                for child in children {
                    self.process(child)?;
                }
            }
        }
        Ok(())
    }

    fn clip_is_scissor(&self) -> bool {
        self.globals.clip_rect() == self.scissor.to_rect()
    }

    fn add_color(&mut self, bounds: Rect, color: Color) {
        if self.frame.should_optimize(Optimizations::CLEAR)
            && color.is_opaque()
            && self.clip_is_scissor()
        {
            if let Some(rect) = self.globals.transform_rect(bounds).to_int_rect() {
                let rect = rect.intersection(&self.scissor);
                if !rect.is_empty() {
                    ClearOp::append(self.frame, rect, color);
                }
                return;
            }
        }
        ColorOp::append(self.frame, bounds, color);
    }

    fn add_texture(&mut self, bounds: Rect, texture: &Texture, filter: Filter) {
        let image = match self.textures.peek(&texture.id()) {
            Some(cached) => cached.image.clone(),
            None => {
                log::warn!("{:?} has no cached image, skipping it", texture.id());
                return;
            }
        };
        let filter = if image.supports(ImageFlags::FILTERABLE) {
            filter
        } else {
            Filter::Nearest
        };
        TextureOp::append(
            self.frame,
            &image,
            filter,
            bounds,
            Rect::new(Vec2::ZERO, Vec2::ONE),
        );
    }

    fn process_clipped(&mut self, clip: Rect, child: &Node) -> Result<()> {
        let clip = self
            .globals
            .transform_rect(clip)
            .intersection(self.globals.clip_rect());
        if clip.is_empty() {
            return Ok(());
        }

        let scissored = self.clip_is_scissor();
        let saved = self.globals;
        self.globals = with_clip(&saved, clip);
        match clip.to_int_rect() {
            Some(scissor) if scissored => {
                let saved_scissor = mem::replace(&mut self.scissor, scissor);
                ScissorOp::append(self.frame, scissor);
                let result = self.process(child);
                self.scissor = saved_scissor;
                ScissorOp::append(self.frame, saved_scissor);
                result?;
            }
            _ => {
                GlobalsOp::append(self.frame, &self.globals);
                let result = self.process(child);
                GlobalsOp::append(self.frame, &saved);
                result?;
            }
        }
        self.globals = saved;
        Ok(())
    }
}

fn with_clip(globals: &Globals, clip: Rect) -> Globals {
    Globals::new(globals.scale.into(), globals.offset.into(), clip)
}

#[cfg(test)]
mod tests {
    use glam::vec2;

    use super::*;
    use crate::{
        backend::{immediate::ImmediateDevice, Backend},
        ImageDescriptor,
    };

    fn renderer(optimizations: Optimizations) -> (Renderer<ImmediateDevice>, Image) {
        let device = ImmediateDevice::new();
        let target = device
            .create_image(&ImageDescriptor::new(
                8,
                8,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ))
            .unwrap();
        let renderer = Renderer::builder(device)
            .frames_in_flight(2)
            .optimizations(optimizations)
            .build();
        (renderer, target)
    }

    fn last_dump(renderer: &Renderer<ImmediateDevice>) -> String {
        renderer.frames.back().unwrap().dump()
    }

    fn viewport() -> Rect {
        Rect::from_xywh(0., 0., 8., 8.)
    }

    #[test]
    fn aligned_clips_use_the_scissor() {
        let (mut renderer, target) = renderer(Optimizations::all());
        let red = Color::rgb(255, 0, 0);
        let node = Node::Container(vec![
            Node::clip(
                Rect::from_xywh(2., 2., 4., 4.),
                Node::color(Rect::from_xywh(0.5, 0., 8., 8.), red),
            ),
            Node::clip(
                Rect::from_xywh(0.5, 0., 2., 2.),
                Node::color(Rect::from_xywh(0., 0., 8., 8.), red),
            ),
        ]);
        renderer
            .render(&target, viewport(), &Region::new(), &node)
            .unwrap();
        assert_eq!(
            last_dump(&renderer),
            "begin-pass 8x8 0 0 8 8 clear #00000000\n  \
             globals 0 0 8 8\n  \
             scissor 2 2 4 4\n  \
             color 1\n  \
             scissor 0 0 8 8\n  \
             globals 0.5 0 2 2\n  \
             color 1\n  \
             globals 0 0 8 8\n\
             end-pass\n"
        );
    }

    #[test]
    fn opaque_aligned_colors_become_clears() {
        let (mut renderer, target) = renderer(Optimizations::CLEAR);
        let node = Node::clip(
            Rect::from_xywh(0., 0., 4., 8.),
            Node::color(Rect::from_xywh(2., 2., 4., 4.), Color::WHITE),
        );
        let pixels = renderer
            .render_to_pixels(&target, viewport(), &Region::new(), &node)
            .unwrap();
        assert_eq!(pixels[2 * 8 + 3], Color::WHITE);
        assert_eq!(pixels[2 * 8 + 4], Color::TRANSPARENT);
        assert_eq!(pixels[0], Color::TRANSPARENT);
    }

    #[test]
    fn clears_and_draws_produce_the_same_pixels() {
        let node = Node::Container(vec![
            Node::color(Rect::from_xywh(1., 1., 3., 2.), Color::rgb(0, 0, 255)),
            Node::clip(
                Rect::from_xywh(2., 0., 6., 8.),
                Node::color(Rect::from_xywh(0., 4., 8., 2.), Color::rgb(0, 255, 0)),
            ),
        ]);
        let (mut fast, target) = renderer(Optimizations::all());
        let (mut slow, slow_target) = renderer(Optimizations::empty());
        assert_eq!(
            fast.render_to_pixels(&target, viewport(), &Region::new(), &node)
                .unwrap(),
            slow.render_to_pixels(&slow_target, viewport(), &Region::new(), &node)
                .unwrap()
        );
    }

    #[test]
    fn full_target_texture_is_blitted() {
        let (mut renderer, target) = renderer(Optimizations::BLIT);
        let texture = Texture::new(1, 1, vec![Color::WHITE]);
        let node = Node::texture(viewport(), &texture, Filter::Nearest);
        renderer
            .render(&target, viewport(), &Region::new(), &node)
            .unwrap();
        if renderer.frames.back().unwrap().should_optimize(Optimizations::BLIT) {
            assert_eq!(last_dump(&renderer), "upload 1x1 1x1\nblit 0 0 8 8 nearest\n");
        }
    }

    #[test]
    fn viewport_maps_onto_target() {
        let (mut renderer, target) = renderer(Optimizations::empty());
        let node = Node::color(Rect::from_xywh(10., 10., 1., 1.), Color::WHITE);
        let pixels = renderer
            .render_to_pixels(
                &target,
                Rect::new(vec2(10., 10.), vec2(2., 2.)),
                &Region::new(),
                &node,
            )
            .unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let expected = if x < 4 && y < 4 {
                    Color::WHITE
                } else {
                    Color::TRANSPARENT
                };
                assert_eq!(pixels[y * 8 + x], expected, "pixel {}, {}", x, y);
            }
        }
    }

    #[test]
    fn damage_limits_the_redrawn_area() {
        let (mut renderer, target) = renderer(Optimizations::all());
        let white = Node::color(viewport(), Color::WHITE);
        let black = Node::color(viewport(), Color::BLACK);
        renderer
            .render(&target, viewport(), &Region::new(), &white)
            .unwrap();
        let pixels = renderer
            .render_to_pixels(
                &target,
                viewport(),
                &Region::from_rect(IntRect::new(0, 0, 2, 2)),
                &black,
            )
            .unwrap();
        assert_eq!(pixels[0], Color::BLACK);
        assert_eq!(pixels[2], Color::WHITE);
        assert_eq!(pixels[2 * 8], Color::WHITE);
    }

    #[test]
    fn unused_textures_expire() {
        let (mut renderer, target) = renderer(Optimizations::empty());
        let a = Texture::new(1, 1, vec![Color::WHITE]);
        let b = Texture::new(1, 1, vec![Color::BLACK]);
        let draw = |texture: &Texture| Node::texture(viewport(), texture, Filter::Nearest);

        renderer.settings.texture_cache_expire = Duration::from_secs(3600);
        renderer
            .render(&target, viewport(), &Region::new(), &draw(&a))
            .unwrap();
        renderer
            .render(&target, viewport(), &Region::new(), &draw(&b))
            .unwrap();
        assert_eq!(renderer.cached_texture_count(), 2);

        renderer.settings.texture_cache_expire = Duration::ZERO;
        renderer
            .render(&target, viewport(), &Region::new(), &draw(&a))
            .unwrap();
        assert_eq!(renderer.cached_texture_count(), 1);
        assert!(renderer.cached_image(&a).is_some());
        assert!(renderer.cached_image(&b).is_none());
    }

    #[test]
    fn frames_are_recycled() {
        let (mut renderer, target) = renderer(Optimizations::all());
        let node = Node::color(viewport(), Color::WHITE);
        for _ in 0..5 {
            renderer
                .render(&target, viewport(), &Region::new(), &node)
                .unwrap();
        }
        assert_eq!(renderer.frames.len(), 2);
        renderer.wait_idle().unwrap();
        assert!(renderer
            .frames
            .iter()
            .all(|frame| frame.state() == crate::FrameState::Idle));
    }
}
