use ember_log::warn;
use ember_render_base::{IndexedDraw, Vertex};
use ember_vk::{
    buffer::{Buffer, BufferCreateError, BufferCreateInfo, BufferWriteError},
    context::Context,
    vk, MemoryLocation,
};
use thiserror::Error;

use crate::scene::{Drawable, MeshHandle, SceneSnapshot};

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("meshes need at least one vertex and one triangle")]
    Empty,
    #[error("index count {0} is not a multiple of three")]
    NotTriangles(usize),
    #[error("index {index} references a mesh with {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error("{0}")]
    Buffer(#[from] BufferCreateError),
    #[error("{0}")]
    Write(#[from] BufferWriteError),
}

/// Geometry resident on the GPU.
pub struct Mesh {
    vertices: Buffer,
    indices: Buffer,
    vertex_count: u32,
    index_count: u32,
}

/// Every mesh uploaded to the renderer. Meshes live as long as the renderer.
#[derive(Default)]
pub struct Meshes {
    meshes: Vec<Mesh>,
}

impl Mesh {
    pub fn new(ctx: &Context, vertices: &[Vertex], indices: &[u32]) -> Result<Self, MeshError> {
        validate_mesh(vertices.len(), indices)?;

        let mut vertex_buffer = Buffer::new(
            ctx,
            BufferCreateInfo {
                size: std::mem::size_of_val(vertices) as u64,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                location: MemoryLocation::CpuToGpu,
                debug_name: "mesh_vertices",
            },
        )?;
        vertex_buffer.write(0, vertices)?;

        let mut index_buffer = Buffer::new(
            ctx,
            BufferCreateInfo {
                size: std::mem::size_of_val(indices) as u64,
                usage: vk::BufferUsageFlags::INDEX_BUFFER,
                location: MemoryLocation::CpuToGpu,
                debug_name: "mesh_indices",
            },
        )?;
        index_buffer.write(0, indices)?;

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    #[inline(always)]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline(always)]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Meshes {
    pub fn insert(&mut self, mesh: Mesh) -> MeshHandle {
        let handle = MeshHandle(self.meshes.len() as u32);
        self.meshes.push(mesh);
        handle
    }

    #[inline]
    pub fn get(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle.0 as usize)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Turns the scene's drawables into draws. Drawables referencing unknown meshes or index
    /// ranges outside their mesh are skipped.
    pub fn resolve(&self, scene: &SceneSnapshot) -> Vec<IndexedDraw> {
        scene
            .drawables
            .iter()
            .enumerate()
            .filter_map(|(object_id, drawable)| self.resolve_one(object_id as u32, drawable))
            .collect()
    }

    fn resolve_one(&self, object_id: u32, drawable: &Drawable) -> Option<IndexedDraw> {
        let mesh = match self.get(drawable.mesh) {
            Some(mesh) => mesh,
            None => {
                warn!("drawable {object_id} references unknown mesh {:?}", drawable.mesh);
                return None;
            }
        };

        if !drawable.fits(mesh.index_count) {
            warn!(
                "drawable {object_id} draws indices {}..{} of a mesh with {}",
                drawable.first_index,
                drawable.first_index.saturating_add(drawable.index_count),
                mesh.index_count
            );
            return None;
        }

        Some(drawable.to_draw(mesh.vertices.buffer(), mesh.indices.buffer(), object_id))
    }
}

/// Checks that indices form triangles referencing existing vertices.
pub fn validate_mesh(vertex_count: usize, indices: &[u32]) -> Result<(), MeshError> {
    if vertex_count == 0 || indices.is_empty() {
        return Err(MeshError::Empty);
    }
    if indices.len() % 3 != 0 {
        return Err(MeshError::NotTriangles(indices.len()));
    }
    match indices.iter().find(|index| **index as usize >= vertex_count) {
        Some(index) => Err(MeshError::IndexOutOfRange {
            index: *index,
            vertex_count,
        }),
        None => Ok(()),
    }
}
