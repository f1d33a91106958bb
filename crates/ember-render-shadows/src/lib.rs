pub mod cascades;
pub mod settings;
pub mod shadows;

#[cfg(test)]
mod tests;

pub use cascades::*;
pub use settings::*;
pub use shadows::*;
