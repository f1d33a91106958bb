use bytemuck::{Pod, Zeroable};
use ember_log::info;
use ember_math::{Mat4, Vec3};
use ember_render_base::{
    shader_constants::*, Frame, GpuMaterial, IndexedDraw, Vertex, FRAMES_IN_FLIGHT,
};
use ember_render_lighting::culling::LightCulling;
use ember_render_shadows::ShadowCascades;
use ember_vk::{
    buffer::Buffer,
    context::Context,
    descriptors::{
        update_buffers, update_images, BufferWrite, DescriptorError, DescriptorPool,
        DescriptorSetLayout,
    },
    image::{pick_depth_format, Image, ImageCreateError, ImageCreateInfo},
    pipeline::{DepthState, GraphicsPipelineDesc, Pipeline, PipelineCreateError, PipelineLayout},
    render_pass::{
        full_viewport, AttachmentDesc, Framebuffer, RenderPass, RenderPassCreateError,
        RenderPassCreateInfo,
    },
    shader::{ShaderLibrary, ShaderLoadError},
    surface::Surface,
    vk,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    bindings::{find_binding, global_bindings},
    strategy::RenderStrategy,
};

pub const DEPTH_PREPASS_SHADER: &str = "depth_prepass.vert";
pub const FORWARD_VERTEX_SHADER: &str = "forward.vert";

pub const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];

#[derive(Debug, Error)]
pub enum ForwardCreateError {
    #[error("no supported depth format")]
    NoDepthFormat,
    #[error("{0}")]
    Image(#[from] ImageCreateError),
    #[error("{0}")]
    RenderPass(#[from] RenderPassCreateError),
    #[error("{0}")]
    Shader(#[from] ShaderLoadError),
    #[error("{0}")]
    Pipeline(#[from] PipelineCreateError),
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// What the forward fragment shader outputs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugMode {
    #[default]
    Normal,
    /// Grayscale shadow visibility.
    ShadowFactor,
    /// Each cascade tinted a different color.
    CascadeLevels,
}

/// Per draw data pushed to both geometry passes. Mirrors `ObjectConstants` in `common.glsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ObjectPushConstants {
    pub model: Mat4,
    pub debug_mode: i32,
    pub object_id: i32,
    pub _pad: [i32; 2],
    pub material: GpuMaterial,
}

unsafe impl Pod for ObjectPushConstants {}
unsafe impl Zeroable for ObjectPushConstants {}

/// Per frame buffers the forward pass reads.
pub struct ForwardInputs<'a> {
    pub camera: &'a Buffer,
    pub lights: &'a Buffer,
    pub lighting: &'a Buffer,
    pub shadow: &'a Buffer,
    pub culling: Option<&'a LightCulling>,
    pub shadows: Option<&'a ShadowCascades>,
}

/// Depth prepass followed by a single forward shading pass into the swapchain image.
pub struct ForwardPass {
    ctx: Context,
    strategy: RenderStrategy,
    debug_mode: DebugMode,
    pipeline: Pipeline,
    prepass_pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    sets: Vec<vk::DescriptorSet>,
    _pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
    framebuffers: Vec<Framebuffer>,
    prepass_framebuffer: Framebuffer,
    depth: Image,
    pass: RenderPass,
    prepass: RenderPass,
    depth_format: vk::Format,
}

impl DebugMode {
    /// The mode after this one, wrapping around.
    pub fn next(self) -> Self {
        match self {
            DebugMode::Normal => DebugMode::ShadowFactor,
            DebugMode::ShadowFactor => DebugMode::CascadeLevels,
            DebugMode::CascadeLevels => DebugMode::Normal,
        }
    }

    #[inline(always)]
    pub fn as_i32(self) -> i32 {
        match self {
            DebugMode::Normal => 0,
            DebugMode::ShadowFactor => 1,
            DebugMode::CascadeLevels => 2,
        }
    }
}

impl ObjectPushConstants {
    #[inline]
    pub fn new(draw: &IndexedDraw, debug_mode: DebugMode) -> Self {
        Self {
            model: draw.model,
            debug_mode: debug_mode.as_i32(),
            object_id: draw.object_id as i32,
            _pad: [0; 2],
            material: draw.material.to_gpu_material(),
        }
    }
}

impl ForwardPass {
    pub fn new(
        ctx: &Context,
        shaders: &ShaderLibrary,
        surface: &Surface,
        strategy: RenderStrategy,
    ) -> Result<Self, ForwardCreateError> {
        let depth_format = pick_depth_format(ctx).ok_or(ForwardCreateError::NoDepthFormat)?;

        // Load every shader up front so a missing one fails before anything else is created
        let prepass_shader = shaders.load(ctx, DEPTH_PREPASS_SHADER)?;
        let vertex_shader = shaders.load(ctx, FORWARD_VERTEX_SHADER)?;
        let fragment_shader = shaders.load(ctx, strategy.fragment_shader())?;

        let prepass = RenderPass::new(
            ctx,
            &RenderPassCreateInfo {
                color_attachments: &[],
                depth_attachment: Some(AttachmentDesc::cleared(
                    depth_format,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )),
                dependencies: &[vk::SubpassDependency {
                    // The previous frame's forward pass may still be testing against the image
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    dependency_flags: vk::DependencyFlags::BY_REGION,
                }],
                debug_name: "depth_prepass",
            },
        )?;

        let pass = RenderPass::new(
            ctx,
            &RenderPassCreateInfo {
                color_attachments: &[AttachmentDesc::cleared(
                    surface.format(),
                    vk::ImageLayout::PRESENT_SRC_KHR,
                )],
                depth_attachment: Some(AttachmentDesc::loaded(
                    depth_format,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )),
                dependencies: &[vk::SubpassDependency {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                    dependency_flags: vk::DependencyFlags::empty(),
                }],
                debug_name: "forward_pass",
            },
        )?;

        let (depth, prepass_framebuffer, framebuffers) =
            make_targets(ctx, surface, depth_format, &prepass, &pass)?;

        let set_layout =
            DescriptorSetLayout::new(ctx, &global_bindings(strategy), "global_set_layout")?;
        let pool = DescriptorPool::for_layout(
            ctx,
            &set_layout,
            FRAMES_IN_FLIGHT as u32,
            "global_descriptor_pool",
        )?;
        let sets = pool.allocate(&set_layout, FRAMES_IN_FLIGHT)?;

        let pipeline_layout = PipelineLayout::new(
            ctx,
            &[set_layout.layout()],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: std::mem::size_of::<ObjectPushConstants>() as u32,
            }],
            "forward_pipeline_layout",
        )?;

        let prepass_pipeline = Pipeline::graphics(
            ctx,
            &GraphicsPipelineDesc {
                vertex: &prepass_shader,
                fragment: None,
                specialization: None,
                vertex_bindings: &Vertex::bindings(),
                vertex_attributes: &Vertex::position_attributes(),
                layout: &pipeline_layout,
                render_pass: &prepass,
                depth: DepthState::default(),
                cull_mode: vk::CullModeFlags::NONE,
                dynamic_depth_bias: false,
                debug_name: "depth_prepass_pipeline",
            },
        )?;

        let pipeline = Pipeline::graphics(
            ctx,
            &GraphicsPipelineDesc {
                vertex: &vertex_shader,
                fragment: Some(&fragment_shader),
                specialization: None,
                vertex_bindings: &Vertex::bindings(),
                vertex_attributes: &Vertex::attributes(),
                layout: &pipeline_layout,
                render_pass: &pass,
                // Depth is already resolved by the prepass
                depth: DepthState {
                    test: true,
                    write: false,
                    compare: vk::CompareOp::LESS_OR_EQUAL,
                    clamp: false,
                },
                cull_mode: vk::CullModeFlags::NONE,
                dynamic_depth_bias: false,
                debug_name: "forward_pipeline",
            },
        )?;

        info!(
            "forward pass ready: {} with {:?} depth and {:?} color",
            strategy,
            depth_format,
            surface.format()
        );

        Ok(Self {
            ctx: ctx.clone(),
            strategy,
            debug_mode: DebugMode::default(),
            pipeline,
            prepass_pipeline,
            pipeline_layout,
            sets,
            _pool: pool,
            set_layout,
            framebuffers,
            prepass_framebuffer,
            depth,
            pass,
            prepass,
            depth_format,
        })
    }

    #[inline(always)]
    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    #[inline(always)]
    pub fn debug_mode(&self) -> DebugMode {
        self.debug_mode
    }

    #[inline(always)]
    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        self.debug_mode = mode;
    }

    #[inline(always)]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline(always)]
    pub fn depth_extent(&self) -> vk::Extent2D {
        self.depth.extent()
    }

    /// Rebuilds the depth image and framebuffers for a recreated swapchain.
    ///
    /// The device must be idle.
    pub fn resize(&mut self, surface: &Surface) -> Result<(), ForwardCreateError> {
        // Release the old targets before allocating the new ones
        self.framebuffers.clear();
        let (depth, prepass_framebuffer, framebuffers) =
            make_targets(&self.ctx, surface, self.depth_format, &self.prepass, &self.pass)?;
        self.depth = depth;
        self.prepass_framebuffer = prepass_framebuffer;
        self.framebuffers = framebuffers;
        Ok(())
    }

    /// Points the global set of `frame` at the frame's resources.
    ///
    /// Must only be called once the frame's previous work has finished.
    pub fn update_set(&self, frame: Frame, inputs: &ForwardInputs) {
        let set = self.sets[usize::from(frame)];
        let bindings = self.set_layout.bindings();

        let mut writes: SmallVec<[BufferWrite; 6]> = SmallVec::default();
        writes.push(BufferWrite {
            binding: CAMERA_UBO_BINDING,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            buffer: inputs.camera,
        });
        writes.push(BufferWrite {
            binding: LIGHTS_BINDING,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            buffer: inputs.lights,
        });
        writes.push(BufferWrite {
            binding: LIGHTING_UBO_BINDING,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            buffer: inputs.lighting,
        });

        if let Some(culling) = inputs.culling {
            if find_binding(bindings, LIGHT_INDICES_BINDING).is_some() {
                writes.push(BufferWrite {
                    binding: LIGHT_INDICES_BINDING,
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    buffer: culling.light_indices(frame),
                });
                writes.push(BufferWrite {
                    binding: TILE_COUNTS_BINDING,
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    buffer: culling.tile_counts(frame),
                });
            }
        }

        let shadows = inputs
            .shadows
            .filter(|_| find_binding(bindings, SHADOW_MAPS_BINDING).is_some());
        if shadows.is_some() {
            writes.push(BufferWrite {
                binding: SHADOW_UBO_BINDING,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                buffer: inputs.shadow,
            });
        }

        update_buffers(&self.ctx, set, &writes);
        if let Some(shadows) = shadows {
            update_images(&self.ctx, set, SHADOW_MAPS_BINDING, &shadows.image_infos());
        }
    }

    /// Records the depth only pass over every draw.
    pub fn record_prepass(&self, cb: vk::CommandBuffer, frame: Frame, draws: &[IndexedDraw]) {
        let clear_values = [vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }];
        self.record_pass(
            cb,
            frame,
            &self.prepass,
            &self.prepass_framebuffer,
            &self.prepass_pipeline,
            &clear_values,
            draws,
        );
    }

    /// Records the shading pass into swapchain image `image_index`.
    pub fn record_forward(
        &self,
        cb: vk::CommandBuffer,
        frame: Frame,
        image_index: usize,
        draws: &[IndexedDraw],
    ) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            // Depth is loaded so this is ignored
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        self.record_pass(
            cb,
            frame,
            &self.pass,
            &self.framebuffers[image_index],
            &self.pipeline,
            &clear_values,
            draws,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record_pass(
        &self,
        cb: vk::CommandBuffer,
        frame: Frame,
        pass: &RenderPass,
        framebuffer: &Framebuffer,
        pipeline: &Pipeline,
        clear_values: &[vk::ClearValue],
        draws: &[IndexedDraw],
    ) {
        let device = self.ctx.device();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(pass.pass())
            .framebuffer(framebuffer.framebuffer())
            .render_area(framebuffer.render_area())
            .clear_values(clear_values);

        unsafe {
            device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cb, 0, &[full_viewport(framebuffer.extent())]);
            device.cmd_set_scissor(cb, 0, &[framebuffer.render_area()]);
        }
        pipeline.bind(cb);
        unsafe {
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout.layout(),
                0,
                &[self.sets[usize::from(frame)]],
                &[],
            );
        }

        for draw in draws {
            let constants = [ObjectPushConstants::new(draw, self.debug_mode)];
            unsafe {
                device.cmd_push_constants(
                    cb,
                    self.pipeline_layout.layout(),
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::cast_slice(&constants),
                );
            }
            draw.record(device, cb);
        }

        unsafe {
            device.cmd_end_render_pass(cb);
        }
    }
}

/// Orders draws front to back from `eye`. Ties keep scene order, so the same snapshot always
/// gives the same order.
///
/// Ordering only affects how much overdraw the prepass rejects. Opaque results are the same for
/// any order since blending is off and depth is resolved before shading.
pub fn sort_draws(draws: &mut [IndexedDraw], eye: Vec3) {
    draws.sort_by_key(|draw| {
        let distance = draw.model.w_axis.truncate().distance_squared(eye);
        (OrderedFloat(distance), draw.object_id)
    });
}

fn make_targets(
    ctx: &Context,
    surface: &Surface,
    depth_format: vk::Format,
    prepass: &RenderPass,
    pass: &RenderPass,
) -> Result<(Image, Framebuffer, Vec<Framebuffer>), ForwardCreateError> {
    let extent = surface.extent();
    let depth = Image::new(
        ctx,
        ImageCreateInfo {
            width: extent.width,
            height: extent.height,
            format: depth_format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            debug_name: "depth_buffer",
        },
    )?;

    let prepass_framebuffer =
        Framebuffer::new(ctx, prepass, &[depth.view()], extent, "depth_prepass_framebuffer")?;

    let framebuffers = surface
        .views()
        .iter()
        .enumerate()
        .map(|(i, view)| {
            Framebuffer::new(
                ctx,
                pass,
                &[*view, depth.view()],
                extent,
                &format!("forward_framebuffer_{i}"),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((depth, prepass_framebuffer, framebuffers))
}
