//! Coherent noise source for terrain generation
//!
//! Multi-octave Perlin noise. The map is 2-D but samples a 3-D field with a
//! fixed third coordinate.

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::seeds::MapSeed;

/// A deterministic scalar field. Implementors must be pure: the same coordinates
/// always return the same value.
pub trait NoiseField: Sync {
    /// Sample the field. Values are roughly in `[-1, 1]` but not strictly bounded.
    fn sample(&self, x: f64, y: f64, z: f64) -> f64;
}

/// Octave parameters for [`TerrainNoise`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// Number of noise octaves
    pub octaves: u32,
    /// Frequency of the first octave
    pub frequency: f64,
    /// Amplitude decay per octave (0.0-1.0)
    pub persistence: f64,
    /// Frequency multiplier per octave
    pub lacunarity: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            octaves: 3,
            frequency: 12.0,
            persistence: 0.4,
            lacunarity: 3.0,
        }
    }
}

/// Seeded fBm over Perlin noise.
///
/// Octave `i` uses its own lattice seeded with `seed + i`. The octave sum is not
/// normalized, so peaks can exceed 1.0; the classifier clamps.
pub struct TerrainNoise {
    octaves: Vec<Perlin>,
    params: NoiseParams,
}

impl TerrainNoise {
    pub fn new(seed: u32, params: NoiseParams) -> Self {
        let octaves = (0..params.octaves)
            .map(|i| Perlin::new(seed.wrapping_add(i)))
            .collect();
        Self { octaves, params }
    }

    pub fn from_seed(seed: &MapSeed, params: NoiseParams) -> Self {
        Self::new(seed.noise_seed(), params)
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }
}

impl NoiseField for TerrainNoise {
    fn sample(&self, x: f64, y: f64, z: f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = self.params.frequency;

        for octave in &self.octaves {
            total += amplitude * octave.get([x * frequency, y * frequency, z * frequency]);
            amplitude *= self.params.persistence;
            frequency *= self.params.lacunarity;
        }

        total
    }
}

/// Field that returns the same value everywhere.
#[derive(Clone, Copy, Debug)]
pub struct ConstantNoise(pub f64);

impl NoiseField for ConstantNoise {
    fn sample(&self, _x: f64, _y: f64, _z: f64) -> f64 {
        self.0
    }
}
