use ember_render_camera::GpuCamera;
use ember_render_lighting::{lights::Lights, tiles::GpuLightingParams};
use ember_render_shadows::GpuShadowCascades;
use ember_vk::{
    buffer::{Buffer, BufferCreateError, BufferCreateInfo},
    context::Context,
    sync::{Fence, Semaphore},
    vk, MemoryLocation,
};
use thiserror::Error;

use crate::frame::FrameSlot;

#[derive(Debug, Error)]
pub enum FrameResourcesCreateError {
    #[error("{0}")]
    Buffer(#[from] BufferCreateError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Everything one frame in flight records into or reads from.
pub struct FrameResources {
    ctx: Context,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image can be written.
    pub image_available: Semaphore,
    /// Signaled when the frame's commands are done and the image can be presented.
    pub render_finished: Semaphore,
    /// Signaled when the GPU is done with everything below.
    pub in_flight: Fence,
    pub camera_ubo: Buffer,
    pub lighting_ubo: Buffer,
    pub shadow_ubo: Buffer,
    pub lights: Lights,
}

impl FrameResources {
    pub fn new(
        ctx: &Context,
        index: usize,
        max_lights: u32,
    ) -> Result<Self, FrameResourcesCreateError> {
        let uniform = |size: usize, name: &str| {
            Buffer::new(
                ctx,
                BufferCreateInfo {
                    size: size as u64,
                    usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                    location: MemoryLocation::CpuToGpu,
                    debug_name: &format!("{name}_{index}"),
                },
            )
        };

        let camera_ubo = uniform(std::mem::size_of::<GpuCamera>(), "camera_ubo")?;
        let lighting_ubo = uniform(std::mem::size_of::<GpuLightingParams>(), "lighting_ubo")?;
        let shadow_ubo = uniform(std::mem::size_of::<GpuShadowCascades>(), "shadow_ubo")?;
        let lights = Lights::new(ctx, max_lights, &format!("lights_{index}"))?;

        let image_available = Semaphore::new(ctx, &format!("image_available_{index}"))?;
        let render_finished = Semaphore::new(ctx, &format!("render_finished_{index}"))?;
        // Signaled so the first wait on the slot returns immediately
        let in_flight = Fence::new(ctx, true, &format!("in_flight_{index}"))?;

        let command_buffer = match ctx.allocate_command_buffers(1)?.first() {
            Some(cb) => *cb,
            None => return Err(vk::Result::ERROR_UNKNOWN.into()),
        };
        ctx.set_debug_name(command_buffer, &format!("frame_commands_{index}"));

        Ok(Self {
            ctx: ctx.clone(),
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            camera_ubo,
            lighting_ubo,
            shadow_ubo,
            lights,
        })
    }
}

impl FrameSlot for FrameResources {
    type Error = vk::Result;

    #[inline]
    fn wait(&self) -> Result<(), vk::Result> {
        self.in_flight.wait()
    }

    #[inline]
    fn reset(&self) -> Result<(), vk::Result> {
        self.in_flight.reset()
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.ctx.free_command_buffers(&[self.command_buffer]);
    }
}
