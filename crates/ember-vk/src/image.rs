use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use thiserror::Error;

use crate::context::Context;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub struct ImageCreateInfo<'a> {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub debug_name: &'a str,
}

#[derive(Debug, Error)]
pub enum ImageCreateError {
    #[error("image dimensions must be non-zero")]
    ZeroSized,
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("unable to allocate image memory: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
}

/// Single mip, single layer, 2D device local image with a view covering all of it.
pub struct Image {
    ctx: Context,
    image: vk::Image,
    view: vk::ImageView,
    block: ManuallyDrop<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect_flags: vk::ImageAspectFlags,
}

/// Owned sampler object.
pub struct Sampler {
    ctx: Context,
    sampler: vk::Sampler,
}

impl Image {
    pub fn new(ctx: &Context, create_info: ImageCreateInfo) -> Result<Self, ImageCreateError> {
        if create_info.width == 0 || create_info.height == 0 {
            return Err(ImageCreateError::ZeroSized);
        }

        let device = ctx.device();

        // Create the image
        let image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: create_info.width,
                height: create_info.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(create_info.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(create_info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_create_info, None)? };

        // Allocate memory
        let mem_reqs = unsafe { device.get_image_memory_requirements(image) };
        let request = AllocationCreateDesc {
            name: create_info.debug_name,
            requirements: mem_reqs,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        };

        let block = {
            let mut allocator = ctx.allocator();
            let block = match allocator.allocate(&request) {
                Ok(block) => block,
                Err(err) => {
                    unsafe { device.destroy_image(image, None) };
                    return Err(err.into());
                }
            };

            // Bind image to memory
            if let Err(err) =
                unsafe { device.bind_image_memory(image, block.memory(), block.offset()) }
            {
                let _ = allocator.free(block);
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }

            block
        };

        // Create the view
        let aspect_flags = aspect_flags(create_info.format);
        let view_create_info = vk::ImageViewCreateInfo::default()
            .format(create_info.format)
            .view_type(vk::ImageViewType::TYPE_2D)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_flags,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .image(image);

        let view = match unsafe { device.create_image_view(&view_create_info, None) } {
            Ok(view) => view,
            Err(err) => {
                let _ = ctx.allocator().free(block);
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };

        ctx.set_debug_name(image, create_info.debug_name);
        ctx.set_debug_name(view, &format!("{}_view", create_info.debug_name));

        Ok(Image {
            ctx: ctx.clone(),
            image,
            view,
            block: ManuallyDrop::new(block),
            format: create_info.format,
            extent: vk::Extent2D {
                width: create_info.width,
                height: create_info.height,
            },
            aspect_flags,
        })
    }

    #[inline(always)]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline(always)]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline(always)]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline(always)]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline(always)]
    pub fn aspect_flags(&self) -> vk::ImageAspectFlags {
        self.aspect_flags
    }

    /// Subresource range covering the whole image.
    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_flags,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            let device = self.ctx.device();
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            let block = ManuallyDrop::take(&mut self.block);
            let _ = self.ctx.allocator().free(block);
        }
    }
}

impl Sampler {
    pub fn new(
        ctx: &Context,
        create_info: &vk::SamplerCreateInfo,
        debug_name: &str,
    ) -> Result<Self, vk::Result> {
        let sampler = unsafe { ctx.device().create_sampler(create_info, None)? };
        ctx.set_debug_name(sampler, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            sampler,
        })
    }

    #[inline(always)]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_sampler(self.sampler, None);
        }
    }
}

/// Aspects covered by a view of the given format.
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Pick the first format in `candidates` whose optimal tiling supports `features`, or return
/// `None` if there isn't one.
pub fn find_supported_format(
    ctx: &Context,
    candidates: &[vk::Format],
    features: vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|format| {
        let props = unsafe {
            ctx.instance()
                .get_physical_device_format_properties(ctx.physical_device(), *format)
        };
        props.optimal_tiling_features.contains(features)
    })
}

/// Pick a depth attachment format, or return `None` if there isn't one.
#[inline]
pub fn pick_depth_format(ctx: &Context) -> Option<vk::Format> {
    find_supported_format(
        ctx,
        &DEPTH_FORMAT_CANDIDATES,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_aspects() {
        assert_eq!(
            aspect_flags(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_flags(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }
}
