use ash::vk;

/// What the selected device can do, captured once when the context is created. Rendering
/// strategies are chosen from this and never re-queried per frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// The graphics queue family can also execute compute dispatches.
    pub compute: bool,
    pub max_compute_work_group_invocations: u32,
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_shared_memory_size: u32,
    pub max_push_constants_size: u32,
    pub max_storage_buffer_range: u32,
    pub max_image_dimension_2d: u32,
    /// Depth clamping is supported and enabled on the device.
    pub depth_clamp: bool,
    /// Non-zero depth bias clamps are supported and enabled on the device.
    pub depth_bias_clamp: bool,
}

impl DeviceCapabilities {
    pub(crate) fn new(
        graphics_family: &vk::QueueFamilyProperties,
        properties: &vk::PhysicalDeviceProperties,
        features: &vk::PhysicalDeviceFeatures,
    ) -> Self {
        let limits = &properties.limits;
        Self {
            compute: graphics_family
                .queue_flags
                .contains(vk::QueueFlags::COMPUTE),
            max_compute_work_group_invocations: limits.max_compute_work_group_invocations,
            max_compute_work_group_size: limits.max_compute_work_group_size,
            max_compute_shared_memory_size: limits.max_compute_shared_memory_size,
            max_push_constants_size: limits.max_push_constants_size,
            max_storage_buffer_range: limits.max_storage_buffer_range,
            max_image_dimension_2d: limits.max_image_dimension2_d,
            depth_clamp: features.depth_clamp == vk::TRUE,
            depth_bias_clamp: features.depth_bias_clamp == vk::TRUE,
        }
    }

    /// Determines if a compute work group covering one `tile_size` square tile, with one
    /// invocation per pixel, can be dispatched.
    pub fn supports_tile_work_groups(&self, tile_size: u32) -> bool {
        let invocations = tile_size.saturating_mul(tile_size);
        self.compute
            && tile_size != 0
            && invocations <= self.max_compute_work_group_invocations
            && tile_size <= self.max_compute_work_group_size[0]
            && tile_size <= self.max_compute_work_group_size[1]
    }

    /// Capabilities of a device with no compute support at all.
    pub fn without_compute(self) -> Self {
        Self {
            compute: false,
            ..self
        }
    }
}

impl Default for DeviceCapabilities {
    /// Minimum limits guaranteed by the Vulkan specification for a device with compute.
    fn default() -> Self {
        Self {
            compute: true,
            max_compute_work_group_invocations: 128,
            max_compute_work_group_size: [128, 128, 64],
            max_compute_shared_memory_size: 16384,
            max_push_constants_size: 128,
            max_storage_buffer_range: 1 << 27,
            max_image_dimension_2d: 4096,
            depth_clamp: false,
            depth_bias_clamp: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_work_groups() {
        let mut caps = DeviceCapabilities::default();
        assert!(caps.supports_tile_work_groups(8));
        // 16x16 needs 256 invocations which is above the guaranteed minimum
        assert!(!caps.supports_tile_work_groups(16));

        caps.max_compute_work_group_invocations = 1024;
        assert!(caps.supports_tile_work_groups(16));
        assert!(!caps.without_compute().supports_tile_work_groups(16));
        assert!(!caps.supports_tile_work_groups(0));
    }
}
