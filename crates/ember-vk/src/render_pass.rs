use ash::vk;
use smallvec::SmallVec;
use thiserror::Error;

use crate::context::Context;

#[derive(Debug, Error)]
pub enum RenderPassCreateError {
    #[error("a render pass needs at least one attachment")]
    NoAttachments,
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

#[derive(Debug, Copy, Clone)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// Single subpass render pass description. Color attachments come first followed by the optional
/// depth attachment, which is also the order framebuffer views must be given in.
pub struct RenderPassCreateInfo<'a> {
    pub color_attachments: &'a [AttachmentDesc],
    pub depth_attachment: Option<AttachmentDesc>,
    pub dependencies: &'a [vk::SubpassDependency],
    pub debug_name: &'a str,
}

/// Owned render pass.
pub struct RenderPass {
    ctx: Context,
    pass: vk::RenderPass,
    color_attachments: u32,
    has_depth: bool,
}

/// Owned framebuffer.
pub struct Framebuffer {
    ctx: Context,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl RenderPass {
    pub fn new(
        ctx: &Context,
        create_info: &RenderPassCreateInfo,
    ) -> Result<Self, RenderPassCreateError> {
        if create_info.color_attachments.is_empty() && create_info.depth_attachment.is_none() {
            return Err(RenderPassCreateError::NoAttachments);
        }

        let mut attachments: SmallVec<[vk::AttachmentDescription; 4]> = create_info
            .color_attachments
            .iter()
            .map(to_vk_attachment)
            .collect();

        let color_refs: SmallVec<[vk::AttachmentReference; 4]> = (0..create_info
            .color_attachments
            .len())
            .map(|i| vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let depth_ref = create_info.depth_attachment.map(|depth| {
            attachments.push(to_vk_attachment(&depth));
            vk::AttachmentReference {
                attachment: create_info.color_attachments.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let pass_create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(create_info.dependencies);

        let pass = unsafe { ctx.device().create_render_pass(&pass_create_info, None)? };
        ctx.set_debug_name(pass, create_info.debug_name);

        Ok(Self {
            ctx: ctx.clone(),
            pass,
            color_attachments: create_info.color_attachments.len() as u32,
            has_depth: create_info.depth_attachment.is_some(),
        })
    }

    #[inline(always)]
    pub fn pass(&self) -> vk::RenderPass {
        self.pass
    }

    #[inline(always)]
    pub fn color_attachment_count(&self) -> u32 {
        self.color_attachments
    }

    #[inline(always)]
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_render_pass(self.pass, None);
        }
    }
}

impl Framebuffer {
    pub fn new(
        ctx: &Context,
        pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        debug_name: &str,
    ) -> Result<Self, vk::Result> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass.pass())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { ctx.device().create_framebuffer(&create_info, None)? };
        ctx.set_debug_name(framebuffer, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            framebuffer,
            extent,
        })
    }

    #[inline(always)]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline(always)]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Full framebuffer render area.
    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_framebuffer(self.framebuffer, None);
        }
    }
}

impl AttachmentDesc {
    /// Cleared and stored attachment that ends in `final_layout`.
    #[inline]
    pub fn cleared(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// Attachment whose previous contents are kept. `layout` is used on both ends.
    #[inline]
    pub fn loaded(format: vk::Format, layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: layout,
            final_layout: layout,
        }
    }
}

/// Viewport covering `extent` with the standard `[0, 1]` depth range.
#[inline]
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn to_vk_attachment(desc: &AttachmentDesc) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(desc.format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(desc.load_op)
        .store_op(desc.store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(desc.initial_layout)
        .final_layout(desc.final_layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_presets() {
        let cleared = AttachmentDesc::cleared(
            vk::Format::D32_SFLOAT,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        );
        assert_eq!(cleared.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(cleared.initial_layout, vk::ImageLayout::UNDEFINED);

        let loaded = AttachmentDesc::loaded(
            vk::Format::D32_SFLOAT,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(loaded.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(loaded.initial_layout, loaded.final_layout);
    }

    #[test]
    fn viewport_matches_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 1920,
            height: 1080,
        });
        assert_eq!(viewport.width, 1920.0);
        assert_eq!(viewport.height, 1080.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
