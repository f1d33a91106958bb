use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use ash::vk;
use thiserror::Error;

use crate::context::Context;

#[derive(Debug, Error)]
pub enum ShaderLoadError {
    #[error("shader binary `{0}` does not exist")]
    Missing(PathBuf),
    #[error("unable to read shader binary `{path}`: {err}")]
    Io { path: PathBuf, err: io::Error },
    #[error("shader binary `{0}` is not valid SPIR-V")]
    InvalidSpirv(PathBuf),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Owned shader module.
pub struct Shader {
    ctx: Context,
    module: vk::ShaderModule,
    name: String,
}

/// Resolves precompiled shader binaries by name from a directory. A shader named
/// `forward.frag` is read from `<root>/forward.frag.spv`.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl Shader {
    pub fn new(ctx: &Context, code: &[u32], name: &str) -> Result<Self, ShaderLoadError> {
        let module_create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { ctx.device().create_shader_module(&module_create_info, None)? };
        ctx.set_debug_name(module, name);

        Ok(Shader {
            ctx: ctx.clone(),
            module,
            name: name.into(),
        })
    }

    #[inline(always)]
    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_shader_module(self.module, None);
        }
    }
}

impl ShaderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline(always)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a shader binary is expected at.
    #[inline]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.spv"))
    }

    /// Reads the SPIR-V words for a shader.
    pub fn read(&self, name: &str) -> Result<Vec<u32>, ShaderLoadError> {
        let path = self.path(name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ShaderLoadError::Missing(path))
            }
            Err(err) => return Err(ShaderLoadError::Io { path, err }),
        };

        match ash::util::read_spv(&mut file) {
            Ok(code) if !code.is_empty() => Ok(code),
            _ => Err(ShaderLoadError::InvalidSpirv(path)),
        }
    }

    pub fn load(&self, ctx: &Context, name: &str) -> Result<Shader, ShaderLoadError> {
        let code = self.read(name)?;
        Shader::new(ctx, &code, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader() {
        let library = ShaderLibrary::new("./this/path/does/not/exist");
        assert_eq!(
            library.path("light_culling.comp"),
            PathBuf::from("./this/path/does/not/exist/light_culling.comp.spv")
        );
        match library.read("light_culling.comp") {
            Err(ShaderLoadError::Missing(path)) => {
                assert!(path.ends_with("light_culling.comp.spv"))
            }
            _ => panic!("expected a missing shader"),
        }
    }

    #[test]
    fn invalid_spirv() {
        let dir = std::env::temp_dir().join("ember_vk_invalid_spirv");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.vert.spv"), [1u8, 2, 3]).unwrap();

        let library = ShaderLibrary::new(&dir);
        assert!(matches!(
            library.read("broken.vert"),
            Err(ShaderLoadError::InvalidSpirv(_))
        ));
    }
}
