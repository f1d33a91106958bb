use ash::vk;
use ember_log::info;
use raw_window_handle::{HandleError, HasDisplayHandle, HasWindowHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    #[default]
    Fifo,
    FifoRelaxed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentMode,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("surface dimensions must be non-zero")]
    ZeroSized,
    #[error("surface reports no usable formats")]
    NoFormats,
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] HandleError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Outcome of asking the swapchain for the next image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// `suboptimal` images can still be rendered to and presented, but the swapchain should be
    /// recreated afterwards.
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated before rendering.
    OutOfDate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresentResult {
    Ok,
    /// Presentation succeeded or was skipped, but the swapchain is stale.
    Invalidated,
}

/// Window surface together with its swapchain and image views.
pub struct Surface {
    ctx: Context,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    config: SurfaceConfiguration,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl Surface {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        ctx: &Context,
        window: &W,
        config: SurfaceConfiguration,
    ) -> Result<Self, SurfaceError> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let surface = unsafe {
            ash_window::create_surface(
                &ctx.0.entry,
                &ctx.0.instance,
                display_handle,
                window_handle,
                None,
            )?
        };
        ctx.set_debug_name(surface, "surface");

        // From here on, dropping the surface releases the window surface
        let mut surface = Surface {
            ctx: ctx.clone(),
            surface,
            swapchain: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            config,
            images: Vec::default(),
            views: Vec::default(),
        };
        surface.update_config(config)?;

        Ok(surface)
    }

    /// Rebuilds the swapchain for a new configuration.
    ///
    /// The caller must make sure no submitted work still references the old swapchain images,
    /// and must rebuild anything that holds their views.
    pub fn update_config(&mut self, config: SurfaceConfiguration) -> Result<(), SurfaceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SurfaceError::ZeroSized);
        }

        let ctx = self.ctx.clone();
        let physical_device = ctx.physical_device();
        let loader = &ctx.0.surface_loader;
        let (capabilities, present_modes, formats) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(physical_device, self.surface)?,
                loader.get_physical_device_surface_present_modes(physical_device, self.surface)?,
                loader.get_physical_device_surface_formats(physical_device, self.surface)?,
            )
        };

        let extent = choose_extent(&capabilities, config.width, config.height);
        if extent.width == 0 || extent.height == 0 {
            return Err(SurfaceError::ZeroSized);
        }

        let format = choose_surface_format(&formats).ok_or(SurfaceError::NoFormats)?;
        let present_mode = choose_present_mode(&present_modes, config.present_mode);
        let image_count =
            choose_image_count(capabilities.min_image_count, capabilities.max_image_count);

        // No transformation preferred
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        // Images are shared only when presentation happens on another family
        let qfi = ctx.queue_family_indices();
        let indices = [qfi.graphics, qfi.present];
        let (sharing_mode, indices) = if qfi.graphics == qfi.present {
            (vk::SharingMode::EXCLUSIVE, &indices[..1])
        } else {
            (vk::SharingMode::CONCURRENT, &indices[..])
        };

        let old_swapchain = self.swapchain;
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_color_space(format.color_space)
            .image_format(format.format)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(indices)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain)
            .image_array_layers(1);

        let swapchain_loader = &ctx.0.swapchain_loader;
        let swapchain = unsafe { swapchain_loader.create_swapchain(&swapchain_create_info, None)? };

        // The old swapchain is retired even if the rest of this fails
        self.release();
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.config = config;

        self.images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        for (i, image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .format(format.format)
                .view_type(vk::ImageViewType::TYPE_2D);

            let view = unsafe { ctx.device().create_image_view(&create_info, None)? };
            ctx.set_debug_name(*image, &format!("swapchain_image_{i}"));
            ctx.set_debug_name(view, &format!("swapchain_view_{i}"));
            self.views.push(view);
        }

        info!(
            "swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            format.format,
            present_mode
        );

        Ok(())
    }

    /// Blocks until the next image is available. `available` is signaled once the image can be
    /// written to.
    pub fn acquire_image(&self, available: vk::Semaphore) -> Result<AcquireResult, SurfaceError> {
        let result = unsafe {
            self.ctx.0.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Queues image `index` for presentation once `wait` is signaled.
    pub fn present(&self, index: u32, wait: vk::Semaphore) -> Result<PresentResult, SurfaceError> {
        let indices = [index];
        let swapchains = [self.swapchain];
        let wait = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .image_indices(&indices)
            .swapchains(&swapchains)
            .wait_semaphores(&wait);

        let result = unsafe {
            self.ctx
                .0
                .swapchain_loader
                .queue_present(self.ctx.present_queue(), &present_info)
        };

        match result {
            Ok(false) => Ok(PresentResult::Ok),
            Ok(true)
            | Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
            | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentResult::Invalidated),
            Err(err) => Err(err.into()),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> SurfaceConfiguration {
        self.config
    }

    #[inline(always)]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline(always)]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline(always)]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline(always)]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline(always)]
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    #[inline(always)]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn release(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.ctx.device().destroy_image_view(view, None);
            }
            self.images.clear();

            if self.swapchain != vk::SwapchainKHR::null() {
                self.ctx
                    .0
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.release();
        unsafe {
            self.ctx.0.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

/// One more than the minimum so the CPU isn't stalled waiting on the presentation engine,
/// limited by the maximum when there is one.
#[inline]
pub fn choose_image_count(min_image_count: u32, max_image_count: u32) -> u32 {
    let desired = min_image_count + 1;
    if max_image_count > 0 && desired > max_image_count {
        max_image_count
    } else {
        desired
    }
}

/// A fixed current extent must be used as is. Otherwise the requested size is clamped into the
/// supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// FIFO is the fallback because every implementation is required to support it.
#[inline]
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: PresentMode,
) -> vk::PresentModeKHR {
    let preferred = vk::PresentModeKHR::from(preferred);
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Prefers an 8-bit sRGB format, otherwise takes whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

    PREFERRED
        .iter()
        .find_map(|preferred| {
            formats.iter().copied().find(|format| {
                format.format == *preferred
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count() {
        assert_eq!(choose_image_count(2, 0), 3);
        assert_eq!(choose_image_count(2, 8), 3);
        assert_eq!(choose_image_count(3, 3), 3);
    }

    #[test]
    fn fixed_extent_wins() {
        let caps = capabilities((800, 600));
        let extent = choose_extent(&caps, 1280, 720);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn free_extent_is_clamped() {
        let caps = capabilities((u32::MAX, u32::MAX));
        let extent = choose_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (1920, 1080));

        let extent = choose_extent(&caps, 8000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn present_mode_fallback() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, PresentMode::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&available, PresentMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]).map(|f| f.format), Some(srgb.format));
        assert_eq!(choose_surface_format(&[unorm]).map(|f| f.format), Some(unorm.format));
        assert!(choose_surface_format(&[]).is_none());
    }
}
