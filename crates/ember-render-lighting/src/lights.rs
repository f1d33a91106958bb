use ember_log::warn;
use ember_vk::{
    buffer::{Buffer, BufferCreateError, BufferCreateInfo},
    context::Context,
    vk, MemoryLocation,
};

use crate::{GpuPointLight, PointLight};

const DEFAULT_LIGHT_CAPACITY: u32 = 64;

/// Host visible light buffer for one frame in flight.
pub struct Lights {
    lights: Buffer,
    capacity: u32,
    max_lights: u32,
    count: u32,
    /// Light count last warned about for going over `max_lights`.
    overflow: Option<u32>,
    name: String,
}

/// Result of uploading a frame's lights.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LightUpdate {
    /// The buffer was replaced, so descriptor sets referencing it must be rewritten.
    pub replaced: bool,
    /// Lights now in the buffer.
    pub count: u32,
    /// Supplied lights that didn't make it into the buffer.
    pub dropped: u32,
}

impl Lights {
    pub fn new(ctx: &Context, max_lights: u32, debug_name: &str) -> Result<Self, BufferCreateError> {
        let capacity = DEFAULT_LIGHT_CAPACITY.min(max_lights).max(1);
        let lights = Buffer::new(
            ctx,
            BufferCreateInfo {
                size: light_buffer_size(capacity),
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::CpuToGpu,
                debug_name,
            },
        )?;

        Ok(Self {
            lights,
            capacity,
            max_lights,
            count: 0,
            overflow: None,
            name: debug_name.into(),
        })
    }

    #[inline(always)]
    pub fn buffer(&self) -> &Buffer {
        &self.lights
    }

    #[inline(always)]
    pub fn light_count(&self) -> u32 {
        self.count
    }

    #[inline(always)]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Uploads the lights, growing the buffer if needed. Lights past the maximum are dropped.
    ///
    /// If the buffer can't grow, the lights that fit the current buffer are still uploaded so
    /// the count always describes this frame's lights.
    pub fn update(&mut self, lights: &[PointLight]) -> LightUpdate {
        let requested = u32::try_from(lights.len()).unwrap_or(u32::MAX);
        let (warn_overflow, overflow) = overflow_warning(self.overflow, requested, self.max_lights);
        if warn_overflow {
            warn!(
                "{} lights supplied but only {} are supported, the rest are ignored",
                requested, self.max_lights
            );
        }
        self.overflow = overflow;

        // Resize the light buffer if needed
        let mut replaced = false;
        let new_capacity =
            grown_capacity(self.capacity, requested.min(self.max_lights), self.max_lights);
        if new_capacity != self.capacity {
            match self.lights.recreate(light_buffer_size(new_capacity), &self.name) {
                Ok(lights) => {
                    self.lights = lights;
                    self.capacity = new_capacity;
                    replaced = true;
                }
                Err(err) => warn!(
                    "unable to grow light buffer `{}` to {} lights, keeping {}: {}",
                    self.name, new_capacity, self.capacity, err
                ),
            }
        }

        let count = uploaded_light_count(requested, self.max_lights, self.capacity);
        let gpu_lights: Vec<GpuPointLight> = lights
            .iter()
            .take(count as usize)
            .map(|light| light.to_gpu_light())
            .collect();

        // Count fits the capacity so the write can only fail for unmapped memory
        self.count = match self.lights.write(0, &gpu_lights) {
            Ok(()) => count,
            Err(err) => {
                warn!("unable to upload lights: {err}");
                0
            }
        };

        LightUpdate {
            replaced,
            count: self.count,
            dropped: requested - self.count,
        }
    }
}

#[inline(always)]
fn light_buffer_size(capacity: u32) -> u64 {
    capacity as u64 * std::mem::size_of::<GpuPointLight>() as u64
}

/// Capacity needed to hold `required` lights. Grows by powers of two but never past `max`, and
/// never shrinks.
pub fn grown_capacity(current: u32, required: u32, max: u32) -> u32 {
    if required <= current {
        return current;
    }
    required.next_power_of_two().min(max).max(current)
}

/// Number of lights uploaded when `requested` are supplied to a buffer holding `capacity`.
#[inline]
pub fn uploaded_light_count(requested: u32, max: u32, capacity: u32) -> u32 {
    requested.min(max).min(capacity)
}

/// Decides whether going over `max` lights should be logged. Returns the decision and the
/// overflow to remember, so a scene that stays at the same light count is only reported once.
pub fn overflow_warning(last: Option<u32>, requested: u32, max: u32) -> (bool, Option<u32>) {
    if requested <= max {
        return (false, None);
    }
    (last != Some(requested), Some(requested))
}
