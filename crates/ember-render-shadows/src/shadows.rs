use bytemuck::{Pod, Zeroable};
use ember_log::info;
use ember_math::{Mat4, Vec3};
use ember_render_base::{shader_constants::MAX_SHADOW_CASCADES, IndexedDraw, Vertex};
use ember_render_camera::Camera;
use ember_vk::{
    context::Context,
    image::{find_supported_format, Image, ImageCreateError, ImageCreateInfo, Sampler},
    pipeline::{DepthState, GraphicsPipelineDesc, Pipeline, PipelineCreateError, PipelineLayout},
    render_pass::{
        full_viewport, AttachmentDesc, Framebuffer, RenderPass, RenderPassCreateError,
        RenderPassCreateInfo,
    },
    shader::{ShaderLibrary, ShaderLoadError},
    vk,
};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    cascades::{cascade_transforms, CascadeError, CascadeSplits, CascadeTransform, GpuShadowCascades},
    settings::ShadowSettings,
};

pub const SHADOW_VERTEX_SHADER: &str = "shadow.vert";

/// Shadow map formats in order of preference.
const SHADOW_FORMAT_CANDIDATES: [vk::Format; 2] = [vk::Format::D16_UNORM, vk::Format::D32_SFLOAT];

#[derive(Debug, Error)]
pub enum ShadowCreateError {
    #[error("no depth format usable for shadow maps")]
    NoDepthFormat,
    #[error("{0}")]
    Cascade(#[from] CascadeError),
    #[error("{0}")]
    Image(#[from] ImageCreateError),
    #[error("{0}")]
    RenderPass(#[from] RenderPassCreateError),
    #[error("{0}")]
    Shader(#[from] ShaderLoadError),
    #[error("{0}")]
    Pipeline(#[from] PipelineCreateError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ShadowPushConstants {
    pub light_vp: Mat4,
    pub model: Mat4,
}

unsafe impl Pod for ShadowPushConstants {}
unsafe impl Zeroable for ShadowPushConstants {}

/// Constant depth bias applied while rendering every cascade. No slope term is applied.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
}

impl DepthBias {
    /// The bias as it can be applied on a device. Without the `depth_bias_clamp` feature the
    /// clamp must be zero.
    pub fn for_device(self, clamp_supported: bool) -> Self {
        Self {
            clamp: if clamp_supported { self.clamp } else { 0.0 },
            ..self
        }
    }
}

/// Depth only cascades for a single directional light.
///
/// Cascade images are written once per frame and sampled by the forward pass of the same frame.
/// They are shared between frames in flight, so the render pass waits on earlier fragment reads
/// before clearing them.
pub struct ShadowCascades {
    ctx: Context,
    resolution: u32,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    framebuffers: Vec<Framebuffer>,
    images: Vec<Image>,
    render_pass: RenderPass,
    sampler: Sampler,
    splits: CascadeSplits,
    transforms: SmallVec<[CascadeTransform; MAX_SHADOW_CASCADES]>,
    light_dir: Vec3,
    bias: DepthBias,
}

impl ShadowCascades {
    pub fn new(
        ctx: &Context,
        shaders: &ShaderLibrary,
        settings: &ShadowSettings,
        camera: &Camera,
    ) -> Result<Self, ShadowCreateError> {
        if settings.resolution == 0 {
            return Err(CascadeError::ZeroResolution.into());
        }
        let splits = CascadeSplits::new(
            camera.near,
            camera.far,
            settings.cascades,
            settings.split_lambda,
        )?;

        let format = find_supported_format(
            ctx,
            &SHADOW_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
        )
        .ok_or(ShadowCreateError::NoDepthFormat)?;

        let dependencies = [
            // Earlier frames may still be sampling the maps
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::empty(),
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
        ];
        let render_pass = RenderPass::new(
            ctx,
            &RenderPassCreateInfo {
                color_attachments: &[],
                depth_attachment: Some(AttachmentDesc::cleared(
                    format,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                )),
                dependencies: &dependencies,
                debug_name: "shadow_pass",
            },
        )?;

        let extent = vk::Extent2D {
            width: settings.resolution,
            height: settings.resolution,
        };
        let mut images = Vec::with_capacity(splits.count());
        let mut framebuffers = Vec::with_capacity(splits.count());
        for i in 0..splits.count() {
            let image = Image::new(
                ctx,
                ImageCreateInfo {
                    width: settings.resolution,
                    height: settings.resolution,
                    format,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                        | vk::ImageUsageFlags::SAMPLED,
                    debug_name: &format!("shadow_cascade_{i}"),
                },
            )?;
            framebuffers.push(Framebuffer::new(
                ctx,
                &render_pass,
                &[image.view()],
                extent,
                &format!("shadow_cascade_framebuffer_{i}"),
            )?);
            images.push(image);
        }

        let sampler = Sampler::new(
            ctx,
            &vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
                .compare_enable(true)
                .compare_op(vk::CompareOp::LESS_OR_EQUAL)
                .min_lod(0.0)
                .max_lod(0.0)
                .max_anisotropy(1.0),
            "shadow_sampler",
        )?;

        let shader = shaders.load(ctx, SHADOW_VERTEX_SHADER)?;
        let pipeline_layout = PipelineLayout::new(
            ctx,
            &[],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<ShadowPushConstants>() as u32,
            }],
            "shadow_pipeline_layout",
        )?;
        let pipeline = Pipeline::graphics(
            ctx,
            &GraphicsPipelineDesc {
                vertex: &shader,
                fragment: None,
                specialization: None,
                vertex_bindings: &Vertex::bindings(),
                vertex_attributes: &Vertex::position_attributes(),
                layout: &pipeline_layout,
                render_pass: &render_pass,
                depth: DepthState {
                    test: true,
                    write: true,
                    compare: vk::CompareOp::LESS,
                    // Casters in front of the light volume are flattened onto the near plane
                    clamp: true,
                },
                cull_mode: vk::CullModeFlags::NONE,
                dynamic_depth_bias: true,
                debug_name: "shadow_pipeline",
            },
        )?;

        let light_dir = settings.light_direction();
        let transforms = cascade_transforms(camera, &splits, light_dir, settings.resolution);

        info!(
            "shadow cascades ready: {} x {}px {:?}, splits {:?}",
            splits.count(),
            settings.resolution,
            format,
            splits.splits()
        );

        Ok(Self {
            ctx: ctx.clone(),
            resolution: settings.resolution,
            pipeline,
            pipeline_layout,
            framebuffers,
            images,
            render_pass,
            sampler,
            splits,
            transforms,
            light_dir,
            bias: DepthBias {
                constant: settings.depth_bias_constant,
                clamp: settings.depth_bias_clamp,
            },
        })
    }

    #[inline(always)]
    pub fn cascade_count(&self) -> usize {
        self.splits.count()
    }

    #[inline(always)]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    #[inline(always)]
    pub fn splits(&self) -> &CascadeSplits {
        &self.splits
    }

    #[inline(always)]
    pub fn transforms(&self) -> &[CascadeTransform] {
        &self.transforms
    }

    /// Extent of every cascade image.
    pub fn image_extents(&self) -> SmallVec<[vk::Extent2D; MAX_SHADOW_CASCADES]> {
        self.images.iter().map(Image::extent).collect()
    }

    #[inline(always)]
    pub fn depth_bias(&self) -> DepthBias {
        self.bias
    }

    #[inline(always)]
    pub fn set_depth_bias(&mut self, bias: DepthBias) {
        self.bias = bias;
    }

    /// Refreshes the light space transforms for a new frame. Splits are only recomputed when the
    /// camera's clipping planes changed.
    pub fn update(&mut self, camera: &Camera, light_dir: Vec3) -> Result<(), CascadeError> {
        if self.splits.update(camera.near, camera.far)? {
            info!("shadow cascade splits recomputed: {:?}", self.splits.splits());
        }
        self.light_dir = light_dir;
        self.transforms = cascade_transforms(camera, &self.splits, light_dir, self.resolution);
        Ok(())
    }

    pub fn gpu_data(&self) -> GpuShadowCascades {
        GpuShadowCascades::new(&self.transforms, &self.splits, self.light_dir, self.resolution)
    }

    /// Sampler infos for every cascade. Unused array elements repeat the first cascade so every
    /// descriptor is valid.
    pub fn image_infos(&self) -> [vk::DescriptorImageInfo; MAX_SHADOW_CASCADES] {
        std::array::from_fn(|i| {
            let image = self.images.get(i).unwrap_or(&self.images[0]);
            vk::DescriptorImageInfo {
                sampler: self.sampler.sampler(),
                image_view: image.view(),
                image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            }
        })
    }

    /// Renders every cascade. Each cascade is its own render pass.
    pub fn record(&self, cb: vk::CommandBuffer, draws: &[IndexedDraw]) {
        let device = self.ctx.device();
        let bias = self
            .bias
            .for_device(self.ctx.capabilities().depth_bias_clamp);
        let clear_values = [vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        }];

        for (framebuffer, transform) in self.framebuffers.iter().zip(self.transforms.iter()) {
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.pass())
                .framebuffer(framebuffer.framebuffer())
                .render_area(framebuffer.render_area())
                .clear_values(&clear_values);

            unsafe {
                device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
                device.cmd_set_viewport(cb, 0, &[full_viewport(framebuffer.extent())]);
                device.cmd_set_scissor(cb, 0, &[framebuffer.render_area()]);
                device.cmd_set_depth_bias(cb, bias.constant, bias.clamp, 0.0);
            }
            self.pipeline.bind(cb);

            for draw in draws {
                let constants = [ShadowPushConstants {
                    light_vp: transform.vp,
                    model: draw.model,
                }];
                unsafe {
                    device.cmd_push_constants(
                        cb,
                        self.pipeline_layout.layout(),
                        vk::ShaderStageFlags::VERTEX,
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
}
