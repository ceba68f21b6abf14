//! Terrain classification and tile-grid generation
//!
//! Each cell samples the noise field once, clamps the sample into a gradient,
//! scales it into an elevation and bands it into one of seven biomes.

use rayon::prelude::*;

use crate::config::MapConfig;
use crate::error::ClassifyError;
use crate::noise_field::NoiseField;

// =============================================================================
// BIOME TABLE
// =============================================================================

/// Lower bound of the gradient clamp
pub const MIN_GRADIENT: f64 = -0.7;
/// Upper bound of the gradient clamp
pub const MAX_GRADIENT: f64 = 1.0;

/// Elevation bands, one per biome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Biome {
    DeepWater,
    ShallowWater,
    Beach,
    Lowland,
    Forest,
    Mountain,
    Snow,
}

/// Normalized upper thresholds, ascending, paired 1:1 with [`BIOMES`]
pub const BIOME_THRESHOLDS: [f64; 7] = [0.0, 0.075, 0.175, 0.225, 0.475, 0.675, 1.0];

/// Biomes in table order
pub const BIOMES: [Biome; 7] = [
    Biome::DeepWater,
    Biome::ShallowWater,
    Biome::Beach,
    Biome::Lowland,
    Biome::Forest,
    Biome::Mountain,
    Biome::Snow,
];

impl Biome {
    /// Position in the biome table (0-6)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Map color for this biome
    pub fn color(self) -> [u8; 3] {
        match self {
            Biome::DeepWater => [0, 0, 128],
            Biome::ShallowWater => [26, 26, 255],
            Biome::Beach => [255, 255, 153],
            Biome::Lowland => [51, 26, 0],
            Biome::Forest => [0, 51, 0],
            Biome::Mountain => [89, 89, 89],
            Biome::Snow => [255, 255, 255],
        }
    }
}

/// Palette in table order
pub fn palette() -> [[u8; 3]; 7] {
    BIOMES.map(Biome::color)
}

// =============================================================================
// CLASSIFIER
// =============================================================================

/// One grid cell
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub biome: Biome,
    /// Scaled height in `[0, max_elevation]`
    pub elevation: f64,
    /// Clamped noise sample in `[-0.7, 1.0]`
    pub gradient: f64,
}

/// Classifier output before coordinates are attached
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub biome: Biome,
    pub elevation: f64,
    pub gradient: f64,
}

/// Classify one raw noise sample.
///
/// The first band whose scaled threshold is at or above the elevation wins, so
/// an elevation sitting exactly on a threshold lands in the lower band.
pub fn classify(raw: f64, max_elevation: f64) -> Result<Classification, ClassifyError> {
    let gradient = raw.clamp(MIN_GRADIENT, MAX_GRADIENT);
    let elevation = (max_elevation * gradient).clamp(0.0, max_elevation);

    BIOME_THRESHOLDS
        .iter()
        .zip(BIOMES)
        .find(|(threshold, _)| **threshold * max_elevation >= elevation)
        .map(|(_, biome)| Classification { biome, elevation, gradient })
        .ok_or(ClassifyError::NoBiome { elevation, max_elevation })
}

// =============================================================================
// GENERATOR
// =============================================================================

fn generate_row<N: NoiseField>(
    noise: &N,
    y: u32,
    grid_size: u32,
    max_elevation: f64,
) -> Result<Vec<Tile>, ClassifyError> {
    let size = grid_size as f64;
    (0..grid_size)
        .map(|x| {
            let raw = noise.sample(x as f64 / size, y as f64 / size, 0.0);
            let c = classify(raw, max_elevation)?;
            Ok(Tile { x, y, biome: c.biome, elevation: c.elevation, gradient: c.gradient })
        })
        .collect()
}

/// Generate a `grid_size` x `grid_size` tile grid.
///
/// Tiles come out row-major (`y` outer, `x` inner), so `tiles[y * grid_size + x]`
/// is the tile at `(x, y)`. Rows are independent; with `parallel` they are
/// generated on the rayon pool and the output is identical.
pub fn generate_tiles<N: NoiseField>(
    noise: &N,
    grid_size: u32,
    max_elevation: f64,
    parallel: bool,
) -> Result<Vec<Tile>, ClassifyError> {
    let rows: Vec<Vec<Tile>> = if parallel {
        (0..grid_size)
            .into_par_iter()
            .map(|y| generate_row(noise, y, grid_size, max_elevation))
            .collect::<Result<_, _>>()?
    } else {
        (0..grid_size)
            .map(|y| generate_row(noise, y, grid_size, max_elevation))
            .collect::<Result<_, _>>()?
    };

    let mut tiles = Vec::with_capacity(grid_size as usize * grid_size as usize);
    for row in rows {
        tiles.extend(row);
    }
    Ok(tiles)
}

/// Generate with the sizes from a [`MapConfig`]
pub fn generate_map<N: NoiseField>(noise: &N, config: &MapConfig) -> Result<Vec<Tile>, ClassifyError> {
    generate_tiles(noise, config.grid_size, config.max_elevation, config.parallel)
}
