use std::ffi::CStr;

use ash::vk;
use smallvec::SmallVec;
use thiserror::Error;

use crate::{context::Context, render_pass::RenderPass, shader::Shader, shader::ShaderLoadError};

const ENTRY_POINT: &CStr = c"main";

#[derive(Debug, Error)]
pub enum PipelineCreateError {
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("{0}")]
    Shader(#[from] ShaderLoadError),
}

/// Owned pipeline layout.
pub struct PipelineLayout {
    ctx: Context,
    layout: vk::PipelineLayout,
}

/// Owned compute or graphics pipeline.
pub struct Pipeline {
    ctx: Context,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

/// Values for `layout(constant_id = N)` declarations, packed as 32-bit words.
#[derive(Debug, Default, Clone)]
pub struct SpecializationConstants {
    entries: SmallVec<[vk::SpecializationMapEntry; 4]>,
    data: SmallVec<[u8; 16]>,
}

#[derive(Debug, Copy, Clone)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: vk::CompareOp,
    /// Requires the `depth_clamp` device feature. Ignored when it isn't supported.
    pub clamp: bool,
}

pub struct GraphicsPipelineDesc<'a> {
    pub vertex: &'a Shader,
    /// Depth only pipelines have no fragment stage.
    pub fragment: Option<&'a Shader>,
    pub specialization: Option<&'a SpecializationConstants>,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub layout: &'a PipelineLayout,
    pub render_pass: &'a RenderPass,
    pub depth: DepthState,
    pub cull_mode: vk::CullModeFlags,
    /// Makes the depth bias dynamic so it can be set with `vkCmdSetDepthBias` per draw.
    pub dynamic_depth_bias: bool,
    pub debug_name: &'a str,
}

impl PipelineLayout {
    pub fn new(
        ctx: &Context,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        debug_name: &str,
    ) -> Result<Self, vk::Result> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { ctx.device().create_pipeline_layout(&create_info, None)? };
        ctx.set_debug_name(layout, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            layout,
        })
    }

    #[inline(always)]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_pipeline_layout(self.layout, None);
        }
    }
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets constant `id` to `value`.
    pub fn with_u32(mut self, id: u32, value: u32) -> Self {
        let offset = self.data.len() as u32;
        self.entries.push(vk::SpecializationMapEntry {
            constant_id: id,
            offset,
            size: std::mem::size_of::<u32>(),
        });
        self.data.extend_from_slice(&value.to_ne_bytes());
        self
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline(always)]
    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

impl Pipeline {
    pub fn compute(
        ctx: &Context,
        layout: &PipelineLayout,
        shader: &Shader,
        specialization: Option<&SpecializationConstants>,
        debug_name: &str,
    ) -> Result<Self, PipelineCreateError> {
        let spec_info = specialization.map(SpecializationConstants::info);
        let mut stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module())
            .name(ENTRY_POINT);
        if let Some(spec_info) = &spec_info {
            stage = stage.specialization_info(spec_info);
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout.layout());

        let pipeline = unsafe {
            ctx.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        let pipeline = take_single(ctx, pipeline)?;
        ctx.set_debug_name(pipeline, debug_name);

        Ok(Self {
            ctx: ctx.clone(),
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    pub fn graphics(ctx: &Context, desc: &GraphicsPipelineDesc) -> Result<Self, PipelineCreateError> {
        let spec_info = desc.specialization.map(SpecializationConstants::info);

        let mut stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 2]> = SmallVec::default();
        stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex.module())
                .name(ENTRY_POINT),
        );
        if let Some(fragment) = desc.fragment {
            let mut stage = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.module())
                .name(ENTRY_POINT);
            if let Some(spec_info) = &spec_info {
                stage = stage.specialization_info(spec_info);
            }
            stages.push(stage);
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic so pipelines survive a resize
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(desc.depth.clamp && ctx.capabilities().depth_clamp)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(desc.dynamic_depth_bias)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth.test)
            .depth_write_enable(desc.depth.write)
            .depth_compare_op(desc.depth.compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        // Opaque geometry only, so blending is always off
        let attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; 1]> = (0..desc
            .render_pass
            .color_attachment_count())
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&attachments);

        let mut dynamic_states: SmallVec<[vk::DynamicState; 3]> =
            SmallVec::from_slice(&[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
        if desc.dynamic_depth_bias {
            dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
        }
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.layout())
            .render_pass(desc.render_pass.pass())
            .subpass(0);

        let pipeline = unsafe {
            ctx.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        let pipeline = take_single(ctx, pipeline)?;
        ctx.set_debug_name(pipeline, desc.debug_name);

        Ok(Self {
            ctx: ctx.clone(),
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    #[inline(always)]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline(always)]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn bind(&self, cb: vk::CommandBuffer) {
        unsafe {
            self.ctx
                .device()
                .cmd_bind_pipeline(cb, self.bind_point, self.pipeline);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_pipeline(self.pipeline, None);
        }
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: vk::CompareOp::LESS,
            clamp: false,
        }
    }
}

/// Batch creation can hand back some valid pipelines alongside an error. Those are destroyed so
/// a failed create never leaves anything behind.
fn take_single(
    ctx: &Context,
    result: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
) -> Result<vk::Pipeline, PipelineCreateError> {
    match result {
        Ok(pipelines) => match pipelines.first() {
            Some(pipeline) => Ok(*pipeline),
            None => Err(vk::Result::ERROR_UNKNOWN.into()),
        },
        Err((pipelines, err)) => {
            for pipeline in pipelines {
                if pipeline != vk::Pipeline::null() {
                    unsafe { ctx.device().destroy_pipeline(pipeline, None) };
                }
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_packing() {
        let constants = SpecializationConstants::new()
            .with_u32(0, 16)
            .with_u32(1, 16)
            .with_u32(7, 1024);

        assert!(!constants.is_empty());
        assert_eq!(constants.entries().len(), 3);
        assert_eq!(constants.data().len(), 12);

        let last = constants.entries()[2];
        assert_eq!(last.constant_id, 7);
        assert_eq!(last.offset, 8);
        assert_eq!(last.size, 4);
        assert_eq!(&constants.data()[8..12], &1024u32.to_ne_bytes());

        let info = constants.info();
        assert_eq!(info.map_entry_count, 3);
        assert_eq!(info.data_size, 12);
    }

    #[test]
    fn empty_specialization() {
        assert!(SpecializationConstants::new().is_empty());
    }
}
