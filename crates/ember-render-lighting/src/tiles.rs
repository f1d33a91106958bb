use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Screen partitioning used for light culling.
///
/// The grid covers the whole render target, so the last row and column may hang off the edge of
/// the screen when the resolution isn't a multiple of the tile size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
    num_tiles_x: u32,
    num_tiles_y: u32,
    max_lights_per_tile: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TileGridError {
    #[error("tile size must be non-zero")]
    ZeroTileSize,
    #[error("tiles must be able to hold at least one light")]
    ZeroCapacity,
}

/// Tile parameters as laid out in the lighting uniform buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct GpuLightingParams {
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub tile_size: u32,
    pub max_lights_per_tile: u32,
    pub num_lights: u32,
    pub _pad: [u32; 3],
}

unsafe impl Pod for GpuLightingParams {}
unsafe impl Zeroable for GpuLightingParams {}

/// Screen space pixel bounds of a tile, clipped to the render target. `max` is exclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileGrid {
    pub fn new(
        width: u32,
        height: u32,
        tile_size: u32,
        max_lights_per_tile: u32,
    ) -> Result<Self, TileGridError> {
        if tile_size == 0 {
            return Err(TileGridError::ZeroTileSize);
        }
        if max_lights_per_tile == 0 {
            return Err(TileGridError::ZeroCapacity);
        }

        Ok(Self {
            width,
            height,
            tile_size,
            num_tiles_x: width.div_ceil(tile_size),
            num_tiles_y: height.div_ceil(tile_size),
            max_lights_per_tile,
        })
    }

    /// Same tiling parameters for a new resolution.
    #[inline]
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            num_tiles_x: width.div_ceil(self.tile_size),
            num_tiles_y: height.div_ceil(self.tile_size),
            ..*self
        }
    }

    #[inline(always)]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline(always)]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[inline(always)]
    pub fn num_tiles_x(&self) -> u32 {
        self.num_tiles_x
    }

    #[inline(always)]
    pub fn num_tiles_y(&self) -> u32 {
        self.num_tiles_y
    }

    #[inline(always)]
    pub fn max_lights_per_tile(&self) -> u32 {
        self.max_lights_per_tile
    }

    #[inline(always)]
    pub fn tile_count(&self) -> u32 {
        self.num_tiles_x * self.num_tiles_y
    }

    /// Number of slots in the visible light index list.
    #[inline(always)]
    pub fn index_count(&self) -> u64 {
        self.tile_count() as u64 * self.max_lights_per_tile as u64
    }

    /// Size in bytes of the visible light index buffer.
    #[inline(always)]
    pub fn index_buffer_size(&self) -> u64 {
        self.index_count() * std::mem::size_of::<u32>() as u64
    }

    /// Size in bytes of the per-tile light count buffer.
    #[inline(always)]
    pub fn count_buffer_size(&self) -> u64 {
        self.tile_count() as u64 * std::mem::size_of::<u32>() as u64
    }

    /// Linear index of a tile. Rows are stored one after another.
    #[inline(always)]
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> usize {
        (tile_y * self.num_tiles_x + tile_x) as usize
    }

    /// Tile containing the given pixel.
    #[inline]
    pub fn tile_at(&self, pixel_x: u32, pixel_y: u32) -> (u32, u32) {
        (pixel_x / self.tile_size, pixel_y / self.tile_size)
    }

    pub fn tile_bounds(&self, tile_x: u32, tile_y: u32) -> TileBounds {
        let min_x = tile_x * self.tile_size;
        let min_y = tile_y * self.tile_size;
        TileBounds {
            min_x,
            min_y,
            max_x: (min_x + self.tile_size).min(self.width),
            max_y: (min_y + self.tile_size).min(self.height),
        }
    }

    pub fn gpu_params(&self, num_lights: u32) -> GpuLightingParams {
        GpuLightingParams {
            num_tiles_x: self.num_tiles_x,
            num_tiles_y: self.num_tiles_y,
            tile_size: self.tile_size,
            max_lights_per_tile: self.max_lights_per_tile,
            num_lights,
            _pad: [0; 3],
        }
    }
}
