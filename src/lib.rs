pub mod log {
    pub use ember_log::*;
}

pub mod math {
    pub use ember_math::*;
}

pub mod vk {
    pub use ember_vk::*;
}

pub mod render {
    pub use ember_render::*;

    pub mod base {
        pub use ember_render_base::*;
    }

    pub mod camera {
        pub use ember_render_camera::*;
    }

    pub mod lighting {
        pub use ember_render_lighting::*;
    }

    pub mod shadows {
        pub use ember_render_shadows::*;
    }
}

pub mod prelude {
    pub use ember_render::prelude::*;
}
