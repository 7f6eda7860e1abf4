use std::any::Any;

use crate::{
    backend::{
        explicit::{Access, Command, ExplicitCommandState, ExplicitOp, Layout, PipelineStage},
        immediate::{Capability, FramebufferTarget, GlImage, ImmediateCommandState, ImmediateOp},
        Records,
    },
    op::{Op, OpChain, OpId, Printer, Stage},
    raster::BlitBox,
    Filter, Frame, Image, ImageFlags, IntRect, Result,
};

/// Scaled copy of a rectangle of one image into a rectangle of another.
#[derive(Debug)]
pub struct BlitOp {
    src: Image,
    dst: Image,
    src_rect: IntRect,
    dst_rect: IntRect,
    filter: Filter,
}

impl BlitOp {
    /// # Panics
    /// Panics if `src` cannot be blitted from (or filtered, for
    /// [`Filter::Linear`]), if `dst` is not renderable, or if a
    /// rectangle lies outside its image.
    pub fn append<B: Records<Self>>(
        frame: &mut Frame<B>,
        src: &Image,
        dst: &Image,
        src_rect: IntRect,
        dst_rect: IntRect,
        filter: Filter,
    ) {
        assert!(
            src.supports(ImageFlags::BLIT),
            "blit source {:?} does not support blitting",
            src
        );
        assert!(
            filter != Filter::Linear || src.supports(ImageFlags::FILTERABLE),
            "linear blit from {:?}, which is not filterable",
            src
        );
        assert!(
            dst.supports(ImageFlags::RENDERABLE),
            "blit destination {:?} is not renderable",
            dst
        );
        assert!(
            src.bounds().contains_rect(&src_rect) && dst.bounds().contains_rect(&dst_rect),
            "blit rectangles exceed their images"
        );

        frame.append(BlitOp {
            src: src.clone(),
            dst: dst.clone(),
            src_rect,
            dst_rect,
            filter,
        });
    }
}

impl Op for BlitOp {
    fn stage(&self) -> Stage {
        Stage::Pass
    }

    fn print(&self, printer: &mut Printer<'_>) {
        printer
            .op("blit")
            .int_rect(&self.dst_rect)
            .text(match self.filter {
                Filter::Nearest => "nearest",
                Filter::Linear => "linear",
            })
            .newline();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl ExplicitOp for BlitOp {
    fn explicit_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ExplicitOp>,
        state: &mut ExplicitCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let (src_layout, dst_layout) = if self.src.ptr_eq(&self.dst) {
            // Reading and writing one image needs a layout allowing both.
            let layout = state.transition_unless_shared(
                &self.src,
                PipelineStage::TRANSFER,
                Layout::General,
                Access::TRANSFER_READ | Access::TRANSFER_WRITE,
            );
            (layout, layout)
        } else {
            let src_layout = state.transition_unless_shared(
                &self.src,
                PipelineStage::TRANSFER,
                Layout::TransferSrc,
                Access::TRANSFER_READ,
            );
            let dst_layout = state.transition_unless_shared(
                &self.dst,
                PipelineStage::TRANSFER,
                Layout::TransferDst,
                Access::TRANSFER_WRITE,
            );
            (src_layout, dst_layout)
        };

        state.push(Command::BlitImage {
            src: self.src.clone(),
            src_layout,
            src_box: BlitBox::from_rect(self.src_rect),
            dst: self.dst.clone(),
            dst_layout,
            dst_box: BlitBox::from_rect(self.dst_rect),
            filter: self.filter,
        });
        Ok(chain.next(at))
    }
}

impl ImmediateOp for BlitOp {
    fn immediate_command(
        &self,
        at: OpId,
        chain: &OpChain<dyn ImmediateOp>,
        state: &mut ImmediateCommandState<'_>,
    ) -> Result<Option<OpId>> {
        let src_box = BlitBox::from_rect(self.src_rect);
        let dst_box = match GlImage::flip_y(&self.dst) {
            Some(height) => {
                let height = height as i32;
                BlitBox {
                    x0: self.dst_rect.x,
                    y0: height - self.dst_rect.y,
                    x1: self.dst_rect.x + self.dst_rect.width,
                    y1: height - (self.dst_rect.y + self.dst_rect.height),
                }
            }
            None => BlitBox::from_rect(self.dst_rect),
        };

        let driver = state.driver();
        driver.bind_framebuffer(
            FramebufferTarget::Read,
            Some(GlImage::get(&self.src).framebuffer()),
        );
        driver.bind_framebuffer(
            FramebufferTarget::Draw,
            Some(GlImage::get(&self.dst).framebuffer()),
        );

        let scissor = driver.is_enabled(Capability::ScissorTest);
        driver.disable(Capability::ScissorTest);
        driver.blit_framebuffer(src_box, dst_box, self.filter);
        if scissor {
            driver.enable(Capability::ScissorTest);
        }
        Ok(chain.next(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{explicit::ExplicitDevice, immediate::ImmediateDevice, Backend},
        op::{
            download::{Download, DownloadOp},
            upload::UploadOp,
        },
        Color, Depth, ImageDescriptor, Optimizations, Region, Texture,
    };

    const R: Color = Color::rgb(255, 0, 0);
    const G: Color = Color::rgb(0, 255, 0);
    const B: Color = Color::rgb(0, 0, 255);
    const W: Color = Color::WHITE;

    fn checkerboard() -> Texture {
        Texture::new(2, 2, vec![R, G, B, W])
    }

    fn blit_and_download<D: crate::backend::CoreOps>(device: D, dst: Image) -> Vec<Color> {
        let mut frame = Frame::new();
        frame.setup(device, Optimizations::all());
        frame.begin(&dst, Depth::U8, &Region::from_rect(dst.bounds()), None);
        let src = frame.upload_texture(&checkerboard(), false).unwrap();
        BlitOp::append(
            &mut frame,
            &src,
            &dst,
            src.bounds(),
            dst.bounds(),
            Filter::Nearest,
        );
        let download = Download::new();
        DownloadOp::append(&mut frame, &dst, dst.bounds(), &download).unwrap();
        frame.end(&dst).unwrap();
        frame.sync().unwrap();
        frame.cleanup();
        download.take().expect("download was not delivered")
    }

    fn expected() -> Vec<Color> {
        vec![R, R, G, G, R, R, G, G, B, B, W, W, B, B, W, W]
    }

    #[test]
    fn explicit_upscale() {
        let device = ExplicitDevice::new().unwrap();
        let dst = device
            .create_image(&ImageDescriptor::new(
                4,
                4,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ))
            .unwrap();
        assert_eq!(blit_and_download(device, dst), expected());
    }

    #[test]
    fn immediate_upscale_is_flip_invariant() {
        let device = ImmediateDevice::new();
        let offscreen = device
            .create_image(&ImageDescriptor::new(
                4,
                4,
                ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ))
            .unwrap();
        let surface = device.create_surface(4, 4).unwrap();
        assert_eq!(blit_and_download(device.clone(), offscreen), expected());
        assert_eq!(blit_and_download(device, surface), expected());
    }

    fn copy_within<D: crate::backend::CoreOps>(device: D) -> Vec<Color> {
        let image = device
            .create_image(&ImageDescriptor::new(
                4,
                1,
                ImageFlags::BLIT | ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
            ))
            .unwrap();
        let mut frame = Frame::new();
        frame.setup(device, Optimizations::all());
        frame.begin(&image, Depth::U8, &Region::new(), None);
        UploadOp::append(&mut frame, &image, &Texture::new(2, 1, vec![R, G])).unwrap();
        BlitOp::append(
            &mut frame,
            &image,
            &image,
            IntRect::new(0, 0, 2, 1),
            IntRect::new(2, 0, 2, 1),
            Filter::Nearest,
        );
        let download = Download::new();
        DownloadOp::append(&mut frame, &image, image.bounds(), &download).unwrap();
        frame.end(&image).unwrap();
        frame.sync().unwrap();
        frame.cleanup();
        download.take().expect("download was not delivered")
    }

    #[test]
    fn blit_within_one_image() {
        let expected = vec![R, G, R, G];
        let explicit = ExplicitDevice::new().unwrap();
        assert_eq!(copy_within(explicit.clone()), expected);
        assert!(!explicit.is_lost());
        assert_eq!(copy_within(ImmediateDevice::new()), expected);
    }

    #[test]
    fn immediate_surface_stores_rows_bottom_up() {
        let device = ImmediateDevice::new();
        let surface = device.create_surface(4, 4).unwrap();
        blit_and_download(device.clone(), surface.clone());

        let mut driver = device.driver();
        driver.bind_framebuffer(
            FramebufferTarget::Read,
            Some(GlImage::get(&surface).framebuffer()),
        );
        let rows = driver.read_pixels(surface.bounds()).unwrap();
        assert_eq!(&rows[..4], &[B, B, W, W]);
        assert_eq!(&rows[12..], &[R, R, G, G]);
    }

    #[test]
    #[should_panic(expected = "does not support blitting")]
    fn source_must_support_blit() {
        let device = ImmediateDevice::new();
        let surface = device.create_surface(2, 2).unwrap();
        let dst = device
            .create_image(&ImageDescriptor::new(2, 2, ImageFlags::RENDERABLE))
            .unwrap();
        let mut frame = Frame::new();
        frame.setup(device, Optimizations::all());
        frame.begin(&dst, Depth::U8, &Region::new(), None);
        BlitOp::append(
            &mut frame,
            &surface,
            &dst,
            surface.bounds(),
            dst.bounds(),
            Filter::Nearest,
        );
    }

    #[test]
    #[should_panic(expected = "not filterable")]
    fn linear_requires_filterable_source() {
        let device = ImmediateDevice::with_settings(crate::backend::DeviceSettings {
            format_features: ImageFlags::BLIT | ImageFlags::RENDERABLE,
            ..Default::default()
        });
        let image = device
            .create_image(&ImageDescriptor::new(
                2,
                2,
                ImageFlags::BLIT | ImageFlags::FILTERABLE | ImageFlags::RENDERABLE,
            ))
            .unwrap();
        let mut frame = Frame::new();
        frame.setup(device, Optimizations::all());
        frame.begin(&image, Depth::U8, &Region::new(), None);
        BlitOp::append(
            &mut frame,
            &image,
            &image,
            IntRect::new(0, 0, 1, 1),
            image.bounds(),
            Filter::Linear,
        );
    }
}
