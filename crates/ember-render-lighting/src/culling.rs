use bytemuck::{Pod, Zeroable};
use ember_log::info;
use ember_render_base::{shader_constants::*, Frame, FRAMES_IN_FLIGHT};
use ember_vk::{
    buffer::{Buffer, BufferCreateError, BufferCreateInfo},
    context::Context,
    descriptors::{
        layout_binding, update_buffers, BufferWrite, DescriptorError, DescriptorPool,
        DescriptorSetLayout,
    },
    pipeline::{Pipeline, PipelineCreateError, PipelineLayout, SpecializationConstants},
    shader::{ShaderLibrary, ShaderLoadError},
    vk, MemoryLocation,
};
use thiserror::Error;

use crate::tiles::TileGrid;

pub const LIGHT_CULLING_SHADER: &str = "light_culling.comp";

#[derive(Debug, Error)]
pub enum LightCullingCreateError {
    #[error("device cannot run {0}x{0} compute work groups")]
    Unsupported(u32),
    #[error("{0}")]
    Shader(#[from] ShaderLoadError),
    #[error("{0}")]
    Pipeline(#[from] PipelineCreateError),
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),
    #[error("{0}")]
    Buffer(#[from] BufferCreateError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LightCullingPushConstants {
    pub num_lights: u32,
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub max_lights_per_tile: u32,
}

unsafe impl Pod for LightCullingPushConstants {}
unsafe impl Zeroable for LightCullingPushConstants {}

/// Visible light lists written by one frame in flight.
struct TileBuffers {
    light_indices: Buffer,
    tile_counts: Buffer,
}

/// Compute pass filling the per-tile visible light lists. One work group runs per tile.
pub struct LightCulling {
    ctx: Context,
    grid: TileGrid,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    sets: Vec<vk::DescriptorSet>,
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
    buffers: Vec<TileBuffers>,
}

impl LightCulling {
    pub fn new(
        ctx: &Context,
        shaders: &ShaderLibrary,
        grid: TileGrid,
    ) -> Result<Self, LightCullingCreateError> {
        if !ctx.capabilities().supports_tile_work_groups(grid.tile_size()) {
            return Err(LightCullingCreateError::Unsupported(grid.tile_size()));
        }

        let shader = shaders.load(ctx, LIGHT_CULLING_SHADER)?;

        let stage = vk::ShaderStageFlags::COMPUTE;
        let layout = DescriptorSetLayout::new(
            ctx,
            &[
                layout_binding(CAMERA_UBO_BINDING, vk::DescriptorType::UNIFORM_BUFFER, 1, stage),
                layout_binding(LIGHTS_BINDING, vk::DescriptorType::STORAGE_BUFFER, 1, stage),
                layout_binding(
                    LIGHT_INDICES_BINDING,
                    vk::DescriptorType::STORAGE_BUFFER,
                    1,
                    stage,
                ),
                layout_binding(TILE_COUNTS_BINDING, vk::DescriptorType::STORAGE_BUFFER, 1, stage),
            ],
            "light_culling_set_layout",
        )?;
        let pool = DescriptorPool::for_layout(
            ctx,
            &layout,
            FRAMES_IN_FLIGHT as u32,
            "light_culling_pool",
        )?;
        let sets = pool.allocate(&layout, FRAMES_IN_FLIGHT)?;

        let pipeline_layout = PipelineLayout::new(
            ctx,
            &[layout.layout()],
            &[vk::PushConstantRange {
                stage_flags: stage,
                offset: 0,
                size: std::mem::size_of::<LightCullingPushConstants>() as u32,
            }],
            "light_culling_pipeline_layout",
        )?;

        // Work group size comes from the tile size so the two can't disagree
        let specialization = SpecializationConstants::new()
            .with_u32(TILE_SIZE_X_CONSTANT_ID, grid.tile_size())
            .with_u32(TILE_SIZE_Y_CONSTANT_ID, grid.tile_size());
        let pipeline = Pipeline::compute(
            ctx,
            &pipeline_layout,
            &shader,
            Some(&specialization),
            "light_culling_pipeline",
        )?;

        let buffers = make_tile_buffers(ctx, &grid)?;

        info!(
            "light culling ready: {}x{} tiles of {}px, {} lights per tile",
            grid.num_tiles_x(),
            grid.num_tiles_y(),
            grid.tile_size(),
            grid.max_lights_per_tile()
        );

        Ok(Self {
            ctx: ctx.clone(),
            grid,
            pipeline,
            pipeline_layout,
            sets,
            _pool: pool,
            layout,
            buffers,
        })
    }

    #[inline(always)]
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    #[inline(always)]
    pub fn light_indices(&self, frame: Frame) -> &Buffer {
        &self.buffers[usize::from(frame)].light_indices
    }

    #[inline(always)]
    pub fn tile_counts(&self, frame: Frame) -> &Buffer {
        &self.buffers[usize::from(frame)].tile_counts
    }

    /// Recomputes the tile grid for a new resolution and recreates the light lists when the
    /// grid changed. Returns `true` if the lists were recreated.
    ///
    /// No frame in flight may be using the old lists.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, BufferCreateError> {
        let grid = self.grid.resized(width, height);
        if grid == self.grid {
            return Ok(false);
        }

        self.buffers = make_tile_buffers(&self.ctx, &grid)?;
        self.grid = grid;
        Ok(true)
    }

    /// Points the set for `frame` at the camera and light buffers for that frame.
    ///
    /// Must only be called once the frame's previous work has finished.
    pub fn update_set(&self, frame: Frame, camera: &Buffer, lights: &Buffer) {
        let buffers = &self.buffers[usize::from(frame)];
        update_buffers(
            &self.ctx,
            self.sets[usize::from(frame)],
            &[
                BufferWrite {
                    binding: CAMERA_UBO_BINDING,
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    buffer: camera,
                },
                BufferWrite {
                    binding: LIGHTS_BINDING,
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    buffer: lights,
                },
                BufferWrite {
                    binding: LIGHT_INDICES_BINDING,
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    buffer: &buffers.light_indices,
                },
                BufferWrite {
                    binding: TILE_COUNTS_BINDING,
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    buffer: &buffers.tile_counts,
                },
            ],
        );
    }

    pub fn push_constants(&self, num_lights: u32) -> LightCullingPushConstants {
        LightCullingPushConstants {
            num_lights,
            num_tiles_x: self.grid.num_tiles_x(),
            num_tiles_y: self.grid.num_tiles_y(),
            screen_width: self.grid.width(),
            screen_height: self.grid.height(),
            max_lights_per_tile: self.grid.max_lights_per_tile(),
        }
    }

    /// Records the culling dispatch followed by the barrier making the light lists visible to
    /// fragment shaders.
    pub fn record(&self, cb: vk::CommandBuffer, frame: Frame, num_lights: u32) {
        let device = self.ctx.device();
        let constants = [self.push_constants(num_lights)];

        self.pipeline.bind(cb);
        unsafe {
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout.layout(),
                0,
                &[self.sets[usize::from(frame)]],
                &[],
            );
            device.cmd_push_constants(
                cb,
                self.pipeline_layout.layout(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::cast_slice(&constants),
            );
            device.cmd_dispatch(cb, self.grid.num_tiles_x(), self.grid.num_tiles_y(), 1);

            let barrier = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    #[inline(always)]
    pub fn set_layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }
}

fn make_tile_buffers(ctx: &Context, grid: &TileGrid) -> Result<Vec<TileBuffers>, BufferCreateError> {
    (0..FRAMES_IN_FLIGHT)
        .map(|frame_idx| {
            Ok(TileBuffers {
                light_indices: Buffer::new(
                    ctx,
                    BufferCreateInfo {
                        size: grid.index_buffer_size(),
                        usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                        location: MemoryLocation::GpuOnly,
                        debug_name: &format!("light_indices_{frame_idx}"),
                    },
                )?,
                tile_counts: Buffer::new(
                    ctx,
                    BufferCreateInfo {
                        size: grid.count_buffer_size(),
                        usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                        location: MemoryLocation::GpuOnly,
                        debug_name: &format!("tile_light_counts_{frame_idx}"),
                    },
                )?,
            })
        })
        .collect()
}
