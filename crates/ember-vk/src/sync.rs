use ash::vk;

use crate::context::Context;

/// Owned fence.
pub struct Fence {
    ctx: Context,
    fence: vk::Fence,
}

/// Owned binary semaphore.
pub struct Semaphore {
    ctx: Context,
    semaphore: vk::Semaphore,
}

impl Fence {
    /// Fences used to gate frame slot reuse should start signaled so the first wait on them
    /// returns immediately.
    pub fn new(ctx: &Context, signaled: bool, debug_name: &str) -> Result<Self, vk::Result> {
        let create_info = vk::FenceCreateInfo::default().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        let fence = unsafe { ctx.device().create_fence(&create_info, None)? };
        ctx.set_debug_name(fence, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            fence,
        })
    }

    #[inline(always)]
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    #[inline]
    pub fn wait(&self) -> Result<(), vk::Result> {
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }
    }

    #[inline]
    pub fn reset(&self) -> Result<(), vk::Result> {
        unsafe { self.ctx.device().reset_fences(&[self.fence]) }
    }

    #[inline]
    pub fn is_signaled(&self) -> Result<bool, vk::Result> {
        unsafe { self.ctx.device().get_fence_status(self.fence) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_fence(self.fence, None);
        }
    }
}

impl Semaphore {
    pub fn new(ctx: &Context, debug_name: &str) -> Result<Self, vk::Result> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { ctx.device().create_semaphore(&create_info, None)? };
        ctx.set_debug_name(semaphore, debug_name);
        Ok(Self {
            ctx: ctx.clone(),
            semaphore,
        })
    }

    #[inline(always)]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_semaphore(self.semaphore, None);
        }
    }
}
