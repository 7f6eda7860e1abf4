use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use flume::Sender;
use parking_lot::MutexGuard;

use super::{
    command::{Command, CommandBuffer, Pipeline},
    image::{DeviceMemory, ExplicitImage, Layout},
    sync::{Fence, Semaphores},
};
use crate::{
    raster::{self, View},
    shader::{self, DrawTarget, Globals},
    Buffer, Color, Error, Image, IntRect, Result,
};

/// Work handed to the queue by one frame.
pub(crate) struct QueueSubmission {
    pub commands: CommandBuffer,
    pub vertex_buffer: Option<Buffer>,
    pub globals_buffer: Option<Buffer>,
    pub semaphores: Semaphores,
    pub fence: Fence,
}

/// The device queue: a worker thread executing submissions in order.
pub(crate) struct Queue {
    submissions: Sender<QueueSubmission>,
}

impl Queue {
    pub fn new(lost: Arc<AtomicBool>) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<QueueSubmission>();

        thread::Builder::new()
            .name("opframe-queue".into())
            .spawn(move || {
                for submission in receiver {
                    run(submission, &lost);
                }
                log::debug!("Queue shut down");
            })
            .map_err(|e| Error::Backend(format!("failed to spawn queue thread: {}", e)))?;

        Ok(Self {
            submissions: sender,
        })
    }

    pub fn submit(&self, submission: QueueSubmission) -> Result<()> {
        self.submissions
            .send(submission)
            .map_err(|_| Error::DeviceLost)
    }
}

fn run(submission: QueueSubmission, lost: &AtomicBool) {
    let QueueSubmission {
        commands,
        vertex_buffer,
        globals_buffer,
        semaphores,
        fence,
    } = submission;

    for semaphore in semaphores.waits() {
        semaphore.wait();
    }

    let status = if lost.load(Ordering::Acquire) {
        Err(Error::DeviceLost)
    } else {
        let count = commands.len();
        let mut executor = Executor {
            vertex_buffer: vertex_buffer.as_ref(),
            globals_buffer: globals_buffer.as_ref(),
            pass: None,
            globals: Globals::identity(),
        };
        match commands
            .into_iter()
            .try_for_each(|command| executor.execute(command))
        {
            Ok(()) => {
                log::trace!("Executed {} commands", count);
                Ok(())
            }
            Err(message) => {
                log::error!("Device lost: {}", message);
                lost.store(true, Ordering::Release);
                Err(Error::DeviceLost)
            }
        }
    };

    for semaphore in semaphores.signals() {
        semaphore.signal();
    }
    drop(vertex_buffer);
    drop(globals_buffer);
    fence.signal(status);
}

struct ActivePass {
    target: Image,
    area: IntRect,
    scissor: IntRect,
}

/// Queue-side state while executing one command buffer.
struct Executor<'a> {
    vertex_buffer: Option<&'a Buffer>,
    globals_buffer: Option<&'a Buffer>,
    pass: Option<ActivePass>,
    globals: Globals,
}

fn memory(image: &Image) -> MutexGuard<'_, DeviceMemory> {
    image.backend::<ExplicitImage>().memory.lock()
}

fn expect_layout(
    memory: &DeviceMemory,
    recorded: Layout,
    legal: fn(Layout) -> bool,
) -> Result<(), String> {
    if memory.layout != recorded {
        return Err(format!(
            "command recorded for layout {:?} but image is in {:?}",
            recorded, memory.layout
        ));
    }
    if !legal(recorded) {
        return Err(format!("layout {:?} is not legal for this access", recorded));
    }
    Ok(())
}

impl<'a> Executor<'a> {
    fn execute(&mut self, command: Command) -> Result<(), String> {
        match command {
            Command::PipelineBarrier {
                image,
                src_stage,
                dst_stage,
                src_access,
                dst_access,
                old_layout,
                new_layout,
            } => {
                if !src_access.is_supported_by(src_stage) || !dst_access.is_supported_by(dst_stage)
                {
                    return Err(format!(
                        "barrier accesses {:?} -> {:?} are not performed in stages {:?} -> {:?}",
                        src_access, dst_access, src_stage, dst_stage
                    ));
                }
                if !dst_access.is_legal_in(new_layout) {
                    return Err(format!(
                        "barrier makes {:?} available in {:?}",
                        dst_access, new_layout
                    ));
                }
                let mut memory = memory(&image);
                if old_layout != Layout::Undefined && memory.layout != old_layout {
                    return Err(format!(
                        "barrier expects {:?} but image is in {:?}",
                        old_layout, memory.layout
                    ));
                }
                memory.layout = new_layout;
            }
            Command::CopyBufferToImage {
                buffer,
                offset,
                image,
                layout,
                rect,
            } => {
                self.expect_outside_pass("copy")?;
                let mut memory = memory(&image);
                expect_layout(&memory, layout, Layout::allows_transfer_write)?;
                let texels: Vec<Color> =
                    buffer.read_pod(offset, (rect.width * rect.height) as usize);
                memory.pixels.write_rect(rect, &texels);
            }
            Command::CopyImageToBuffer {
                image,
                layout,
                rect,
                buffer,
                offset,
            } => {
                self.expect_outside_pass("copy")?;
                let memory = memory(&image);
                expect_layout(&memory, layout, Layout::allows_transfer_read)?;
                let texels = memory.pixels.read_rect(rect);
                buffer.write(offset, bytemuck::cast_slice(&texels));
            }
            Command::BlitImage {
                src,
                src_layout,
                src_box,
                dst,
                dst_layout,
                dst_box,
                filter,
            } => {
                self.expect_outside_pass("blit")?;
                if src.ptr_eq(&dst) {
                    let mut memory = memory(&src);
                    expect_layout(&memory, src_layout, Layout::allows_transfer_read)?;
                    expect_layout(&memory, dst_layout, Layout::allows_transfer_write)?;
                    let source = memory.pixels.clone();
                    raster::blit(&source, src_box, &mut memory.pixels, dst_box, filter, None);
                } else {
                    let source = memory(&src);
                    expect_layout(&source, src_layout, Layout::allows_transfer_read)?;
                    let mut dest = memory(&dst);
                    expect_layout(&dest, dst_layout, Layout::allows_transfer_write)?;
                    raster::blit(&source.pixels, src_box, &mut dest.pixels, dst_box, filter, None);
                }
            }
            Command::BeginRenderPass {
                target,
                area,
                clear,
            } => {
                self.expect_outside_pass("render pass")?;
                {
                    let mut memory = memory(&target);
                    if !memory.layout.allows_rendering() {
                        return Err(format!(
                            "render pass target is in {:?}",
                            memory.layout
                        ));
                    }
                    if let Some(color) = clear {
                        memory.pixels.fill(area, color);
                    }
                }
                self.pass = Some(ActivePass {
                    target,
                    area,
                    scissor: area,
                });
            }
            Command::EndRenderPass => {
                if self.pass.take().is_none() {
                    return Err("no render pass to end".into());
                }
            }
            Command::SetScissor(rect) => {
                let pass = self.pass_mut("scissor")?;
                pass.scissor = rect;
            }
            Command::BindGlobals { offset } => {
                let buffer = self.globals_buffer.ok_or("no globals buffer bound")?;
                let globals = buffer
                    .read_pod::<Globals>(offset, 1)
                    .pop()
                    .ok_or("globals offset out of range")?;
                self.globals = globals;
            }
            Command::Draw {
                pipeline,
                offset,
                count,
            } => self.draw(pipeline, offset, count)?,
            Command::ClearAttachment { rect, color } => {
                let pass = self.pass_mut("clear")?;
                let rect = rect.intersection(&pass.area);
                memory(&pass.target).pixels.fill(rect, color);
            }
        }
        Ok(())
    }

    fn expect_outside_pass(&self, what: &str) -> Result<(), String> {
        match self.pass {
            Some(_) => Err(format!("{} inside a render pass", what)),
            None => Ok(()),
        }
    }

    fn pass_mut(&mut self, what: &str) -> Result<&mut ActivePass, String> {
        self.pass
            .as_mut()
            .ok_or_else(|| format!("{} outside of a render pass", what))
    }

    fn draw(&mut self, pipeline: Pipeline, offset: usize, count: usize) -> Result<(), String> {
        let globals = self.globals;
        let vertex_buffer = self.vertex_buffer.ok_or("no vertex buffer bound")?;
        let pass = self.pass_mut("draw")?;
        let mut target = memory(&pass.target);
        let target = DrawTarget {
            pixels: &mut target.pixels,
            view: View::TOP_DOWN,
            scissor: Some(pass.scissor.intersection(&pass.area)),
            globals,
        };

        match pipeline {
            Pipeline::Color => {
                shader::draw_color(target, &vertex_buffer.read_pod(offset, count));
            }
            Pipeline::Texture { image, filter } => {
                if image.ptr_eq(&pass.target) {
                    return Err("render pass samples its own target".into());
                }
                let source = memory(&image);
                if !source.layout.allows_sampling() {
                    return Err(format!("sampled image is in {:?}", source.layout));
                }
                shader::draw_texture(
                    target,
                    &source.pixels,
                    filter,
                    &vertex_buffer.read_pod(offset, count),
                );
            }
            Pipeline::Gradient { stops } => {
                shader::draw_gradient(target, &stops, &vertex_buffer.read_pod(offset, count));
            }
        }
        Ok(())
    }
}
