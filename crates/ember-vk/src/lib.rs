pub mod buffer;
pub mod capabilities;
pub mod context;
pub mod descriptors;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod sync;

pub use ash;
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;

pub mod prelude {
    pub use crate::buffer::*;
    pub use crate::capabilities::*;
    pub use crate::context::*;
    pub use crate::descriptors::*;
    pub use crate::image::*;
    pub use crate::pipeline::*;
    pub use crate::render_pass::*;
    pub use crate::shader::*;
    pub use crate::surface::*;
    pub use crate::sync::*;
    pub use ash::vk;
    pub use gpu_allocator::MemoryLocation;
}
