//! Synchronization and failure behavior of the devices.

mod common;

use std::{thread, time::Duration};

use opframe::{
    backend::explicit::{Layout, Semaphore},
    op::{
        blit::BlitOp,
        download::{Download, DownloadOp},
        pass::{BeginPassOp, EndPassOp},
    },
    Backend, Color, Depth, DeviceSettings, Error, ExplicitDevice, Filter, Frame, ImageDescriptor,
    ImageFlags, ImmediateDevice, Optimizations, Region, Texture,
};

use common::{checkerboard, checkerboard_4x4, init_logging};

#[test]
fn imported_images_wait_for_their_producer() -> anyhow::Result<()> {
    init_logging();
    let device = ExplicitDevice::new()?;
    let ready = Semaphore::new();
    let source = device.import_image(&checkerboard(), Some(ready.clone()))?;
    let (surface, present) = device.create_surface(4, 4)?;

    let download = Download::new();
    let mut frame = Frame::new();
    frame.setup(device.clone(), Optimizations::all());
    frame.begin(&surface, Depth::U8, &Region::new(), None);
    BlitOp::append(
        &mut frame,
        &source,
        &surface,
        source.bounds(),
        surface.bounds(),
        Filter::Nearest,
    );
    DownloadOp::append(&mut frame, &surface, surface.bounds(), &download)?;
    frame.end(&surface)?;

    thread::sleep(Duration::from_millis(20));
    assert!(frame.is_busy());
    assert!(!present.is_signaled());

    ready.signal();
    frame.sync()?;
    assert!(present.is_signaled());
    assert_eq!(device.image_state(&surface).layout, Layout::SharedPresent);
    // Imported images stay in their shared layout.
    assert_eq!(device.image_state(&source).layout, Layout::General);

    frame.cleanup();
    assert_eq!(download.take(), Some(checkerboard_4x4()));
    Ok(())
}

#[test]
fn sampled_images_are_transitioned_once_per_pass() -> anyhow::Result<()> {
    init_logging();
    let device = ExplicitDevice::new()?;
    let target = device.create_image(&ImageDescriptor::new(4, 4, ImageFlags::RENDERABLE))?;

    let mut frame = Frame::new();
    frame.setup(device.clone(), Optimizations::all());
    frame.begin(&target, Depth::U8, &Region::new(), None);
    let image = frame.upload_texture(&checkerboard(), false)?;
    BeginPassOp::append(&mut frame, &target, target.bounds(), Some(Color::BLACK));
    for _ in 0..3 {
        opframe::op::texture::TextureOp::append(
            &mut frame,
            &image,
            Filter::Nearest,
            opframe::Rect::from_xywh(0., 0., 4., 4.),
            opframe::Rect::from_xywh(0., 0., 1., 1.),
        );
    }
    EndPassOp::append(&mut frame);
    frame.end(&target)?;
    frame.sync()?;

    assert_eq!(device.image_state(&image).layout, Layout::ShaderReadOnly);
    assert_eq!(device.image_state(&target).layout, Layout::ColorAttachment);
    frame.cleanup();
    Ok(())
}

#[test]
fn lost_devices_fail_creation_and_submission() -> anyhow::Result<()> {
    init_logging();
    let explicit = ExplicitDevice::new()?;
    let target = explicit.create_image(&ImageDescriptor::new(2, 2, ImageFlags::RENDERABLE))?;

    let mut frame = Frame::new();
    frame.setup(explicit.clone(), Optimizations::all());
    frame.begin(&target, Depth::U8, &Region::new(), None);
    BeginPassOp::append(&mut frame, &target, target.bounds(), Some(Color::WHITE));
    EndPassOp::append(&mut frame);
    explicit.lose();
    assert_eq!(frame.end(&target), Err(Error::DeviceLost));
    assert_eq!(frame.sync(), Err(Error::DeviceLost));
    frame.cleanup();

    assert_eq!(
        explicit
            .create_image(&ImageDescriptor::new(1, 1, ImageFlags::empty()))
            .err(),
        Some(Error::DeviceLost)
    );

    let immediate = ImmediateDevice::new();
    immediate.lose();
    assert!(immediate.is_lost());
    assert_eq!(immediate.create_surface(1, 1).err(), Some(Error::DeviceLost));
    Ok(())
}

#[test]
fn memory_budget_and_size_limits() -> anyhow::Result<()> {
    init_logging();
    let settings = DeviceSettings {
        memory_budget: 1024,
        max_image_size: 16,
        ..Default::default()
    };
    let device = ImmediateDevice::with_settings(settings.clone());

    let small = device.create_image(&ImageDescriptor::new(16, 16, ImageFlags::RENDERABLE))?;
    assert_eq!(device.memory_used(), 1024);
    assert_eq!(
        device
            .create_image(&ImageDescriptor::new(1, 1, ImageFlags::RENDERABLE))
            .err(),
        Some(Error::OutOfDeviceMemory {
            requested: 4,
            available: 0
        })
    );
    drop(small);
    assert_eq!(device.memory_used(), 0);

    assert_eq!(
        device
            .create_image(&ImageDescriptor::new(17, 1, ImageFlags::RENDERABLE))
            .err(),
        Some(Error::ImageTooLarge {
            width: 17,
            height: 1,
            max: 16
        })
    );

    let explicit = ExplicitDevice::with_settings(settings)?;
    let target = explicit.create_image(&ImageDescriptor::new(16, 16, ImageFlags::RENDERABLE))?;
    let mut frame = Frame::new();
    frame.setup(explicit.clone(), Optimizations::all());
    frame.begin(&target, Depth::U8, &Region::new(), None);
    let texture = Texture::new(1, 1, vec![Color::WHITE]);
    assert!(matches!(
        frame.upload_texture(&texture, false),
        Err(Error::OutOfDeviceMemory { .. })
    ));
    Ok(())
}

#[test]
fn format_features_narrow_image_flags() -> anyhow::Result<()> {
    init_logging();
    let device = ExplicitDevice::with_settings(DeviceSettings {
        format_features: ImageFlags::BLIT | ImageFlags::RENDERABLE,
        ..Default::default()
    })?;
    let image = device.create_image(&ImageDescriptor::new(
        2,
        2,
        ImageFlags::BLIT | ImageFlags::FILTERABLE | ImageFlags::MIPMAP,
    ))?;
    assert_eq!(image.flags(), ImageFlags::BLIT);
    Ok(())
}

#[test]
fn running_out_of_staging_memory_is_recoverable() -> anyhow::Result<()> {
    init_logging();
    let device = ExplicitDevice::with_settings(DeviceSettings {
        memory_budget: 60,
        ..Default::default()
    })?;
    let target = device.create_image(&ImageDescriptor::new(
        1,
        1,
        ImageFlags::RENDERABLE | ImageFlags::DOWNLOADABLE,
    ))?;

    let mut frame = Frame::new();
    frame.setup(device.clone(), Optimizations::all());
    frame.begin(&target, Depth::U8, &Region::new(), None);
    let uploaded = frame.upload_texture(&checkerboard(), false)?;
    assert_eq!(
        frame.upload_texture(&checkerboard(), false).err(),
        Some(Error::OutOfDeviceMemory {
            requested: 16,
            available: 8
        })
    );
    frame.end(&target)?;
    frame.sync()?;
    frame.cleanup();

    let download = Download::new();
    frame.setup(device.clone(), Optimizations::all());
    frame.begin(&target, Depth::U8, &Region::new(), None);
    DownloadOp::append(&mut frame, &uploaded, uploaded.bounds(), &download)?;
    frame.end(&target)?;
    frame.sync()?;
    frame.cleanup();

    assert!(!device.is_lost());
    assert_eq!(download.take(), Some(checkerboard().pixels().to_vec()));
    Ok(())
}

