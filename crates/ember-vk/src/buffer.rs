use std::mem::ManuallyDrop;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use thiserror::Error;

use crate::context::Context;

pub struct BufferCreateInfo<'a> {
    /// Requested size in bytes. The real allocation may be larger because of alignment.
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub debug_name: &'a str,
}

#[derive(Debug, Error)]
pub enum BufferCreateError {
    #[error("buffer size must be non-zero")]
    ZeroSized,
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("unable to allocate buffer memory: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferWriteError {
    #[error("buffer memory is not host visible")]
    NotMapped,
    #[error("write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

/// Device buffer bound to memory from the context allocator. The buffer and its memory are
/// released when dropped.
pub struct Buffer {
    ctx: Context,
    buffer: vk::Buffer,
    block: ManuallyDrop<Allocation>,
    /// This was the user requested size.
    size: u64,
    /// This is the size after alignment.
    aligned_size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
}

impl Buffer {
    pub fn new(ctx: &Context, create_info: BufferCreateInfo) -> Result<Self, BufferCreateError> {
        if create_info.size == 0 {
            return Err(BufferCreateError::ZeroSized);
        }

        let limits = &ctx.properties().limits;
        let aligned_size = align_up(
            create_info.size,
            alignment_requirement(limits, create_info.usage, create_info.location),
        );

        let device = ctx.device();

        // Create the buffer
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(aligned_size)
            .usage(create_info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_create_info, None)? };

        // Allocate memory
        let mem_reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
        let request = AllocationCreateDesc {
            name: create_info.debug_name,
            requirements: mem_reqs,
            location: create_info.location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        };

        let block = {
            let mut allocator = ctx.allocator();
            let block = match allocator.allocate(&request) {
                Ok(block) => block,
                Err(err) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(err.into());
                }
            };

            // Bind buffer to memory
            if let Err(err) =
                unsafe { device.bind_buffer_memory(buffer, block.memory(), block.offset()) }
            {
                let _ = allocator.free(block);
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }

            block
        };

        ctx.set_debug_name(buffer, create_info.debug_name);

        Ok(Buffer {
            ctx: ctx.clone(),
            buffer,
            block: ManuallyDrop::new(block),
            size: create_info.size,
            aligned_size,
            usage: create_info.usage,
            location: create_info.location,
        })
    }

    /// Makes a new buffer with the same usage and location but at least `size` bytes large.
    /// The contents are not copied.
    pub fn recreate(&self, size: u64, debug_name: &str) -> Result<Self, BufferCreateError> {
        Buffer::new(
            &self.ctx,
            BufferCreateInfo {
                size,
                usage: self.usage,
                location: self.location,
                debug_name,
            },
        )
    }

    #[inline(always)]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn aligned_size(&self) -> u64 {
        self.aligned_size
    }

    #[inline(always)]
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Writes a slice of values into host visible memory starting at `offset` bytes.
    pub fn write<T: Pod>(&mut self, offset: u64, data: &[T]) -> Result<(), BufferWriteError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as u64;
        check_write_range(offset, len, self.size)?;

        let mapped = self
            .block
            .mapped_slice_mut()
            .ok_or(BufferWriteError::NotMapped)?;
        let start = offset as usize;
        mapped[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Full range descriptor info for this buffer.
    #[inline]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_buffer(self.buffer, None);
            let block = ManuallyDrop::take(&mut self.block);
            let _ = self.ctx.allocator().free(block);
        }
    }
}

/// Round `size` up to a multiple of `alignment`, which must be zero or a power of two.
#[inline(always)]
pub fn align_up(size: u64, alignment: u64) -> u64 {
    match alignment {
        0 => size,
        align => {
            let align_mask = align - 1;
            (size + align_mask) & !align_mask
        }
    }
}

fn alignment_requirement(
    limits: &vk::PhysicalDeviceLimits,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> u64 {
    let mut alignment_req = 0;
    if location == MemoryLocation::CpuToGpu {
        alignment_req = alignment_req.max(limits.non_coherent_atom_size);
    }
    if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
        alignment_req = alignment_req.max(limits.min_uniform_buffer_offset_alignment);
    }
    if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
        alignment_req = alignment_req.max(limits.min_storage_buffer_offset_alignment);
    }
    alignment_req
}

#[inline]
fn check_write_range(offset: u64, len: u64, size: u64) -> Result<(), BufferWriteError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BufferWriteError::OutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn write_range() {
        assert!(check_write_range(0, 64, 64).is_ok());
        assert_eq!(
            check_write_range(32, 64, 64),
            Err(BufferWriteError::OutOfBounds {
                offset: 32,
                len: 64,
                size: 64
            })
        );
        assert!(check_write_range(u64::MAX, 1, 64).is_err());
    }
}
