use ember_render_base::shader_constants::*;
use ember_vk::{descriptors::layout_binding, vk};
use smallvec::SmallVec;

use crate::strategy::RenderStrategy;

pub type GlobalBindings = SmallVec<[vk::DescriptorSetLayoutBinding<'static>; 8]>;

/// Bindings of the global set read by the geometry passes. Only the resources the strategy's
/// shaders declare are included, so every binding in the set always holds a valid descriptor.
pub fn global_bindings(strategy: RenderStrategy) -> GlobalBindings {
    let fragment = vk::ShaderStageFlags::FRAGMENT;

    let mut bindings = GlobalBindings::new();
    bindings.push(layout_binding(
        CAMERA_UBO_BINDING,
        vk::DescriptorType::UNIFORM_BUFFER,
        1,
        vk::ShaderStageFlags::VERTEX | fragment,
    ));
    bindings.push(layout_binding(
        LIGHTS_BINDING,
        vk::DescriptorType::STORAGE_BUFFER,
        1,
        fragment,
    ));

    if strategy.tiled() {
        bindings.push(layout_binding(
            LIGHT_INDICES_BINDING,
            vk::DescriptorType::STORAGE_BUFFER,
            1,
            fragment,
        ));
        bindings.push(layout_binding(
            TILE_COUNTS_BINDING,
            vk::DescriptorType::STORAGE_BUFFER,
            1,
            fragment,
        ));
    }

    bindings.push(layout_binding(
        LIGHTING_UBO_BINDING,
        vk::DescriptorType::UNIFORM_BUFFER,
        1,
        fragment,
    ));

    if strategy.shadows() {
        bindings.push(layout_binding(
            SHADOW_UBO_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            1,
            fragment,
        ));
        bindings.push(layout_binding(
            SHADOW_MAPS_BINDING,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            MAX_SHADOW_CASCADES as u32,
            fragment,
        ));
    }

    bindings
}

/// Looks up a binding of the global set by number.
#[inline]
pub fn find_binding(
    bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    binding: u32,
) -> Option<vk::DescriptorSetLayoutBinding<'static>> {
    bindings.iter().find(|b| b.binding == binding).copied()
}
