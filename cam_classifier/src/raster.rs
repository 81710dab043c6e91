//! Fixed-size scratch surface that camera frames are downsampled into before classification.
//!
use image::{imageops, DynamicImage, GenericImageView, RgbaImage};

/// Pack one pixel into `0xRRGGBB`.
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split a packed pixel into its `[r, g, b]` channels.
pub fn unpack_rgb(pixel: u32) -> [u8; 3] {
    [(pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8]
}

/// Pack raw RGBA bytes into one integer per pixel, dropping the alpha channel.
///
/// `out` is cleared first so the same allocation can be reused frame after frame.
pub fn pack_rgba_into(rgba: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        rgba.chunks_exact(4)
            .map(|pixel| pack_rgb(pixel[0], pixel[1], pixel[2])),
    );
}

/// Downsampling surface with the input size of the classifier.
pub struct RasterBuffer {
    surface: RgbaImage,
    packed: Vec<u32>,
}

impl RasterBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbaImage::new(width, height),
            packed: Vec::with_capacity(width as usize * height as usize),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    /// Copy a frame onto the surface, scaling it to the surface size.
    pub fn draw(&mut self, frame: &DynamicImage) {
        let (width, height) = self.surface.dimensions();
        self.surface = match frame.dimensions() == (width, height) {
            true => frame.to_rgba8(),
            false => imageops::resize(frame, width, height, imageops::FilterType::Triangle),
        };
    }

    /// Packed pixels of the current surface in row-major order.
    pub fn packed_pixels(&mut self) -> &[u32] {
        pack_rgba_into(self.surface.as_raw(), &mut self.packed);
        &self.packed
    }
}

#[cfg(test)]
mod test {

    use image::{Rgb, RgbImage, Rgba};

    use super::*;

    #[test]
    fn test_pack_primary_colors() {
        assert_eq!(pack_rgb(255, 0, 0), 0xFF0000);
        assert_eq!(pack_rgb(0, 255, 0), 0x00FF00);
        assert_eq!(pack_rgb(0, 0, 255), 0x0000FF);
        assert_eq!(unpack_rgb(0x123456), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_alpha_is_ignored() {
        let mut packed = Vec::new();
        for alpha in [0, 1, 128, 255] {
            pack_rgba_into(&[255, 0, 0, alpha, 0, 255, 0, alpha, 0, 0, 255, alpha], &mut packed);
            assert_eq!(packed, vec![0xFF0000, 0x00FF00, 0x0000FF]);
        }
    }

    #[test]
    fn test_packed_pixels_are_row_major() {
        let mut raster = RasterBuffer::new(2, 2);
        let mut frame = RgbaImage::new(2, 2);
        frame.put_pixel(1, 0, Rgba([1, 2, 3, 0]));
        frame.put_pixel(0, 1, Rgba([4, 5, 6, 0]));

        raster.draw(&DynamicImage::ImageRgba8(frame));

        assert_eq!(raster.packed_pixels(), &[0x000000, 0x010203, 0x040506, 0x000000]);
    }

    #[test]
    fn test_draw_downsamples_to_surface_size() {
        let mut raster = RasterBuffer::new(96, 96);
        let frame = RgbImage::from_pixel(384, 384, Rgb([10, 20, 30]));

        raster.draw(&DynamicImage::ImageRgb8(frame));

        assert_eq!(raster.dimensions(), (96, 96));
        let pixels = raster.packed_pixels();
        assert_eq!(pixels.len(), 96 * 96);
        assert!(pixels.iter().all(|&pixel| pixel == 0x0A141E));
    }
}
