pub mod draw;
pub mod frame;
pub mod material;
pub mod shader_constants;
pub mod vertex;

pub use draw::*;
pub use frame::*;
pub use material::*;
pub use shader_constants::FRAMES_IN_FLIGHT;
pub use vertex::*;
