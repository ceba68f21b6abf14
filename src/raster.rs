//! PNG encoding of tile grids

use std::fmt;
use std::str::FromStr;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::terrain::Tile;

/// How tiles are colored
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Biome palette
    Color,
    /// Grayscale from the tile gradient
    Elevation,
}

impl RenderMode {
    /// Directory name used by the cache
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Color => "color",
            RenderMode::Elevation => "elevation",
        }
    }

    pub fn is_color(self) -> bool {
        self == RenderMode::Color
    }

    pub fn from_color_flag(color: bool) -> Self {
        if color {
            RenderMode::Color
        } else {
            RenderMode::Elevation
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "color" => Ok(RenderMode::Color),
            "elevation" | "height" => Ok(RenderMode::Elevation),
            other => Err(format!("unknown render mode '{}'", other)),
        }
    }
}

/// Pixel color for a tile in the given mode
pub fn tile_rgb(tile: &Tile, mode: RenderMode) -> [u8; 3] {
    match mode {
        RenderMode::Color => tile.biome.color(),
        RenderMode::Elevation => {
            // Negative gradients (water) floor at black
            let gray = (tile.gradient * 255.0).clamp(0.0, 255.0) as u8;
            [gray, gray, gray]
        }
    }
}

/// Rasterize tiles into an RGBA8 buffer, one pixel per tile.
pub fn rasterize(tiles: &[Tile], grid_size: u32, mode: RenderMode) -> Result<Vec<u8>, EncodeError> {
    let size = grid_size as usize;
    let mut pixels = vec![0u8; size * size * 4];

    for tile in tiles {
        if tile.x >= grid_size || tile.y >= grid_size {
            return Err(EncodeError::TileOutOfBounds { x: tile.x, y: tile.y, grid_size });
        }
        let idx = (tile.y as usize * size + tile.x as usize) * 4;
        let [r, g, b] = tile_rgb(tile, mode);
        pixels[idx] = r;
        pixels[idx + 1] = g;
        pixels[idx + 2] = b;
        pixels[idx + 3] = 255;
    }

    Ok(pixels)
}

/// Encode tiles as a PNG image.
pub fn encode_png(tiles: &[Tile], grid_size: u32, mode: RenderMode) -> Result<Vec<u8>, EncodeError> {
    let pixels = rasterize(tiles, grid_size, mode)?;

    let mut png = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut png, CompressionType::Default, FilterType::Paeth);
    encoder.write_image(&pixels, grid_size, grid_size, ExtendedColorType::Rgba8)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_field::ConstantNoise;
    use crate::terrain::{generate_tiles, Biome};

    fn decode(png: &[u8]) -> image::RgbaImage {
        image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .unwrap()
            .to_rgba8()
    }

    #[test]
    fn test_uniform_color_raster() {
        let tiles = generate_tiles(&ConstantNoise(0.5), 4, 1024.0, false).unwrap();
        let img = decode(&encode_png(&tiles, 4, RenderMode::Color).unwrap());

        assert_eq!(img.dimensions(), (4, 4));
        let expected = Biome::Mountain.color();
        for pixel in img.pixels() {
            assert_eq!(pixel.0, [expected[0], expected[1], expected[2], 255]);
        }
    }

    #[test]
    fn test_elevation_grayscale() {
        let tiles = generate_tiles(&ConstantNoise(0.5), 2, 1024.0, false).unwrap();
        let img = decode(&encode_png(&tiles, 2, RenderMode::Elevation).unwrap());
        // 0.5 * 255 = 127.5, truncated
        assert!(img.pixels().all(|p| p.0 == [127, 127, 127, 255]));
    }

    #[test]
    fn test_negative_gradient_is_black() {
        let tiles = generate_tiles(&ConstantNoise(-0.4), 2, 1024.0, false).unwrap();
        let img = decode(&encode_png(&tiles, 2, RenderMode::Elevation).unwrap());
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn test_pixel_index_is_row_major() {
        let mut tiles = generate_tiles(&ConstantNoise(0.5), 3, 1024.0, false).unwrap();
        // Paint (2, 1) as snow
        tiles[3 + 2].biome = Biome::Snow;
        let img = decode(&encode_png(&tiles, 3, RenderMode::Color).unwrap());
        assert_eq!(img.get_pixel(2, 1).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(1, 2).0, [89, 89, 89, 255]);
    }

    #[test]
    fn test_out_of_bounds_tile_rejected() {
        let mut tiles = generate_tiles(&ConstantNoise(0.5), 2, 1024.0, false).unwrap();
        tiles[0].x = 9;
        assert!(matches!(
            rasterize(&tiles, 2, RenderMode::Color),
            Err(EncodeError::TileOutOfBounds { x: 9, .. })
        ));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let tiles = generate_tiles(&ConstantNoise(0.3), 8, 1024.0, false).unwrap();
        let a = encode_png(&tiles, 8, RenderMode::Color).unwrap();
        let b = encode_png(&tiles, 8, RenderMode::Color).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[1..4], b"PNG");
    }

    #[test]
    fn test_render_mode_parsing() {
        assert_eq!("color".parse::<RenderMode>().unwrap(), RenderMode::Color);
        assert_eq!("height".parse::<RenderMode>().unwrap(), RenderMode::Elevation);
        assert!("sepia".parse::<RenderMode>().is_err());
        assert_eq!(RenderMode::from_color_flag(false), RenderMode::Elevation);
    }
}
