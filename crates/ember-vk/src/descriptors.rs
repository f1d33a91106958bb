use std::cell::Cell;

use ash::vk;
use smallvec::SmallVec;
use thiserror::Error;

use crate::{buffer::Buffer, context::Context};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("pool holds {capacity} sets but {requested} more were requested")]
    PoolExhausted { requested: usize, capacity: u32 },
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Owned descriptor set layout.
pub struct DescriptorSetLayout {
    ctx: Context,
    layout: vk::DescriptorSetLayout,
    bindings: SmallVec<[vk::DescriptorSetLayoutBinding<'static>; 8]>,
}

/// Owned descriptor pool. Sets allocated from the pool are freed along with it.
pub struct DescriptorPool {
    ctx: Context,
    pool: vk::DescriptorPool,
    capacity: u32,
    allocated: Cell<u32>,
}

impl DescriptorSetLayout {
    pub fn new(
        ctx: &Context,
        bindings: &[vk::DescriptorSetLayoutBinding<'static>],
        debug_name: &str,
    ) -> Result<Self, DescriptorError> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            ctx.device()
                .create_descriptor_set_layout(&create_info, None)?
        };
        ctx.set_debug_name(layout, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            layout,
            bindings: bindings.iter().copied().collect(),
        })
    }

    #[inline(always)]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline(always)]
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Pool sizes needed to allocate `sets` copies of this layout.
    #[inline]
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes(&self.bindings, sets)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

impl DescriptorPool {
    /// Creates a pool big enough for `sets` copies of `layout`.
    pub fn for_layout(
        ctx: &Context,
        layout: &DescriptorSetLayout,
        sets: u32,
        debug_name: &str,
    ) -> Result<Self, DescriptorError> {
        let sizes = layout.pool_sizes(sets);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(sets)
            .pool_sizes(&sizes);
        let pool = unsafe { ctx.device().create_descriptor_pool(&create_info, None)? };
        ctx.set_debug_name(pool, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            pool,
            capacity: sets,
            allocated: Cell::new(0),
        })
    }

    /// Allocates `count` sets with the given layout.
    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>, DescriptorError> {
        let allocated = self.allocated.get();
        if allocated as usize + count > self.capacity as usize {
            return Err(DescriptorError::PoolExhausted {
                requested: count,
                capacity: self.capacity,
            });
        }

        let layouts = vec![layout.layout(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.ctx.device().allocate_descriptor_sets(&alloc_info)? };
        self.allocated.set(allocated + count as u32);
        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// A buffer to write into a descriptor binding.
pub struct BufferWrite<'a> {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub buffer: &'a Buffer,
}

/// Points the given bindings of `set` at whole buffers.
///
/// The set must not be in use by any pending command buffer.
pub fn update_buffers(ctx: &Context, set: vk::DescriptorSet, writes: &[BufferWrite]) {
    let infos: SmallVec<[vk::DescriptorBufferInfo; 8]> =
        writes.iter().map(|write| write.buffer.descriptor_info()).collect();
    let vk_writes: SmallVec<[vk::WriteDescriptorSet; 8]> = writes
        .iter()
        .zip(infos.iter())
        .map(|(write, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(write.ty)
                .buffer_info(std::slice::from_ref(info))
        })
        .collect();
    unsafe {
        ctx.device().update_descriptor_sets(&vk_writes, &[]);
    }
}

/// Writes combined image samplers into consecutive array elements of one binding.
///
/// The set must not be in use by any pending command buffer.
pub fn update_images(
    ctx: &Context,
    set: vk::DescriptorSet,
    binding: u32,
    images: &[vk::DescriptorImageInfo],
) {
    if images.is_empty() {
        return;
    }
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(images);
    unsafe {
        ctx.device().update_descriptor_sets(&[write], &[]);
    }
}

/// Merges the descriptor counts of `bindings` by type, multiplied by the number of sets.
pub fn pool_sizes(
    bindings: &[vk::DescriptorSetLayoutBinding],
    sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let count = binding.descriptor_count * sets;
        match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: count,
            }),
        }
    }
    sizes
}

/// Layout binding for `count` descriptors of one type visible to `stages`.
#[inline]
pub fn layout_binding(
    binding: u32,
    ty: vk::DescriptorType,
    count: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(ty)
        .descriptor_count(count)
        .stage_flags(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_by_type() {
        let bindings = [
            layout_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL),
            layout_binding(1, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::ALL),
            layout_binding(2, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL),
            layout_binding(
                3,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                4,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];

        let sizes = pool_sizes(&bindings, 2);
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].descriptor_count, 2);
        assert_eq!(sizes[2].descriptor_count, 8);
    }
}
