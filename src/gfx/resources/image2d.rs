//! # Image2D
//!
//! CPU-side image with an explicit channel count (1 to 4) and byte depth
//! (1 for 8-bit unorm, 4 for `f32`). Decoding and encoding go through the
//! `image` crate; LDR files decode to 8-bit data, Radiance HDR files to
//! three `f32` channels.
//!
//! Rows are stored top row first, as in the source file. Textures upload
//! rows unchanged, so the first image row lands in the bottom texel row.

use std::fmt;
use std::path::Path;

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::ImageError;
use crate::gfx::math::power_of_two_below;

#[derive(Debug, Clone, PartialEq)]
pub struct Image2D {
    width: u32,
    height: u32,
    channels: u32,
    byte_depth: u32,
    data: Vec<u8>,
}

impl Image2D {
    /// Creates a white 8-bit image.
    pub fn new(width: u32, height: u32, channels: u32) -> Result<Self, ImageError> {
        check_dimensions(width, height, channels)?;
        Ok(Self {
            width,
            height,
            channels,
            byte_depth: 1,
            data: vec![255; (width * height * channels) as usize],
        })
    }

    /// Wraps raw texel data. The byte depth is derived from the data length
    /// and must come out as 1 (`u8`) or 4 (`f32`).
    pub fn from_data(
        width: u32,
        height: u32,
        channels: u32,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        check_dimensions(width, height, channels)?;
        let texels = (width * height * channels) as usize;
        let byte_depth = (data.len() / texels) as u32;
        if byte_depth != 1 && byte_depth != 4 {
            return Err(ImageError::UnsupportedByteDepth { byte_depth });
        }
        let expected = texels * byte_depth as usize;
        if data.len() != expected {
            return Err(ImageError::DataSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            byte_depth,
            data,
        })
    }

    /// Wraps `f32` texel data.
    pub fn from_f32(
        width: u32,
        height: u32,
        channels: u32,
        data: &[f32],
    ) -> Result<Self, ImageError> {
        Self::from_data(width, height, channels, bytemuck::cast_slice(data).to_vec())
    }

    /// Decodes an image file, picking 1 channel for grayscale sources and 4
    /// otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let (image, format) = decode(path.as_ref())?;
        if format == ImageFormat::Hdr {
            return Self::from_hdr(image);
        }
        let channels = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => 1,
            _ => 4,
        };
        Self::from_ldr(image, channels)
    }

    /// Decodes an image file into exactly `channels` channels (1 or 4).
    /// HDR files always decode to 3 `f32` channels.
    pub fn from_path_with_channels(
        path: impl AsRef<Path>,
        channels: u32,
    ) -> Result<Self, ImageError> {
        let (image, format) = decode(path.as_ref())?;
        if format == ImageFormat::Hdr {
            return Self::from_hdr(image);
        }
        Self::from_ldr(image, channels)
    }

    fn from_ldr(image: DynamicImage, channels: u32) -> Result<Self, ImageError> {
        let (width, height) = (image.width(), image.height());
        check_dimensions(width, height, channels)?;
        let data = match channels {
            1 => image.into_luma8().into_raw(),
            4 => image.into_rgba8().into_raw(),
            channels => return Err(ImageError::UnsupportedChannels { channels }),
        };
        Self::from_data(width, height, channels, data)
    }

    fn from_hdr(image: DynamicImage) -> Result<Self, ImageError> {
        let (width, height) = (image.width(), image.height());
        let texels = image.into_rgb32f().into_raw();
        Self::from_f32(width, height, 3, &texels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn byte_depth(&self) -> u32 {
        self.byte_depth
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn texel_size(&self) -> usize {
        (self.channels * self.byte_depth) as usize
    }

    fn index(&self, x: u32, y: u32) -> Result<usize, ImageError> {
        if x >= self.width || y >= self.height {
            return Err(ImageError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok((x + y * self.width) as usize * self.texel_size())
    }

    /// Channel `c` of the texel at (`x`, `y`) as a normalized float.
    pub fn texel_f32(&self, x: u32, y: u32, c: u32) -> Option<f32> {
        if c >= self.channels {
            return None;
        }
        let idx = self.index(x, y).ok()? + (c * self.byte_depth) as usize;
        match self.byte_depth {
            4 => Some(f32::from_le_bytes(self.data[idx..idx + 4].try_into().ok()?)),
            _ => Some(self.data[idx] as f32 / 255.0),
        }
    }

    /// Channel `c` of an 8-bit texel.
    pub fn channel(&self, x: u32, y: u32, c: u32) -> Option<u8> {
        if c >= self.channels || self.byte_depth != 1 {
            return None;
        }
        let idx = self.index(x, y).ok()?;
        Some(self.data[idx + c as usize])
    }

    pub fn set_channel(&mut self, x: u32, y: u32, c: u32, value: u8) -> Result<(), ImageError> {
        if self.byte_depth != 1 {
            return Err(ImageError::UnsupportedByteDepth {
                byte_depth: self.byte_depth,
            });
        }
        if c >= self.channels {
            return Err(ImageError::UnsupportedChannels { channels: c + 1 });
        }
        let idx = self.index(x, y)?;
        self.data[idx + c as usize] = value;
        Ok(())
    }

    /// 8-bit texel expanded to RGBA. Missing color channels read as 0,
    /// a missing alpha as 255.
    pub fn rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.byte_depth != 1 {
            return None;
        }
        let idx = self.index(x, y).ok()?;
        let mut out = [0, 0, 0, 255];
        let n = self.channels as usize;
        out[..n].copy_from_slice(&self.data[idx..idx + n]);
        Some(out)
    }

    /// Writes as many of `rgba`'s channels as the image holds.
    pub fn set_rgba(&mut self, x: u32, y: u32, rgba: [u8; 4]) -> Result<(), ImageError> {
        if self.byte_depth != 1 {
            return Err(ImageError::UnsupportedByteDepth {
                byte_depth: self.byte_depth,
            });
        }
        let idx = self.index(x, y)?;
        let n = self.channels as usize;
        self.data[idx..idx + n].copy_from_slice(&rgba[..n]);
        Ok(())
    }

    /// Single-channel image holding channel `c`, same byte depth.
    pub fn extract_channel(&self, c: u32) -> Result<Image2D, ImageError> {
        if c >= self.channels {
            return Err(ImageError::UnsupportedChannels { channels: c + 1 });
        }
        let depth = self.byte_depth as usize;
        let offset = c as usize * depth;
        let data = self
            .data
            .chunks_exact(self.texel_size())
            .flat_map(|texel| texel[offset..offset + depth].iter().copied())
            .collect();
        Image2D::from_data(self.width, self.height, 1, data)
    }

    /// Mirrors the image horizontally.
    pub fn flip_x(&mut self) {
        let texel = self.texel_size();
        let row = self.width as usize * texel;
        for line in self.data.chunks_exact_mut(row) {
            let flipped: Vec<u8> = line.chunks_exact(texel).rev().flatten().copied().collect();
            line.copy_from_slice(&flipped);
        }
    }

    /// Mirrors the image vertically.
    pub fn flip_y(&mut self) {
        let row = self.width as usize * self.texel_size();
        self.data = self.data.chunks_exact(row).rev().flatten().copied().collect();
    }

    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }

    pub fn is_quadratic(&self) -> bool {
        self.width == self.height
    }

    /// Resamples (nearest) into a square whose side is the smaller of the
    /// largest powers of two not exceeding width and height.
    pub fn convert_to_power_of_two(&mut self) {
        let dim = power_of_two_below(self.width).min(power_of_two_below(self.height));
        let skip_x = self.width as f64 / dim as f64;
        let skip_y = self.height as f64 / dim as f64;
        let texel = self.texel_size();

        let mut data = Vec::with_capacity(dim as usize * dim as usize * texel);
        for y in 0..dim {
            let sy = (y as f64 * skip_y) as usize;
            for x in 0..dim {
                let sx = (x as f64 * skip_x) as usize;
                let idx = (sx + sy * self.width as usize) * texel;
                data.extend_from_slice(&self.data[idx..idx + texel]);
            }
        }

        log::debug!(
            "resampled {}x{} image to {}x{}",
            self.width,
            self.height,
            dim,
            dim
        );
        self.data = data;
        self.width = dim;
        self.height = dim;
    }

    /// Channel values as normalized floats, texel by texel.
    fn to_f32(&self) -> Vec<f32> {
        match self.byte_depth {
            4 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            _ => self.data.iter().map(|b| *b as f32 / 255.0).collect(),
        }
    }

    /// Encodes the image as PNG. Float data is clamped to [0, 1].
    /// Two-channel images store their channels in red and green.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let bytes: Vec<u8> = match self.byte_depth {
            1 => self.data.clone(),
            _ => self
                .to_f32()
                .iter()
                .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        };

        let image = if self.channels == 1 {
            image::GrayImage::from_raw(self.width, self.height, bytes).map(DynamicImage::ImageLuma8)
        } else {
            let n = self.channels as usize;
            let rgba = bytes
                .chunks_exact(n)
                .flat_map(|texel| {
                    let mut out = [0, 0, 0, 255];
                    out[..n].copy_from_slice(texel);
                    out
                })
                .collect();
            image::RgbaImage::from_raw(self.width, self.height, rgba).map(DynamicImage::ImageRgba8)
        };

        let image = image.ok_or(ImageError::DataSize {
            expected: (self.width * self.height * self.channels) as usize,
            actual: self.data.len(),
        })?;
        image.save_with_format(path.as_ref(), ImageFormat::Png)?;
        Ok(())
    }

    /// Encodes the image as Radiance HDR (RGBE). Needs at least 3 channels.
    pub fn save_hdr(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        if self.channels < 3 {
            return Err(ImageError::UnsupportedChannels {
                channels: self.channels,
            });
        }
        let n = self.channels as usize;
        let rgb: Vec<f32> = self
            .to_f32()
            .chunks_exact(n)
            .flat_map(|texel| [texel[0], texel[1], texel[2]])
            .collect();
        let image = image::Rgb32FImage::from_raw(self.width, self.height, rgb).ok_or(
            ImageError::DataSize {
                expected: (self.width * self.height * 3) as usize,
                actual: self.data.len() / self.byte_depth as usize,
            },
        )?;
        DynamicImage::ImageRgb32F(image).save_with_format(path.as_ref(), ImageFormat::Hdr)?;
        Ok(())
    }
}

impl fmt::Display for Image2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.channels {
            1 => "R",
            2 => "RG",
            3 => "RGB",
            _ => "RGBA",
        };
        write!(
            f,
            "Image2D ({},{}) {} {}bit",
            self.width,
            self.height,
            name,
            self.byte_depth * 8
        )
    }
}

fn check_dimensions(width: u32, height: u32, channels: u32) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    if !(1..=4).contains(&channels) {
        return Err(ImageError::UnsupportedChannels { channels });
    }
    Ok(())
}

fn decode(path: &Path) -> Result<(DynamicImage, ImageFormat), ImageError> {
    let io_error = |source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)
        .map_err(io_error)?
        .with_guessed_format()
        .map_err(io_error)?;
    let format = reader.format().unwrap_or(ImageFormat::Png);
    let image = reader.decode()?;
    log::debug!("decoded {} ({:?}, {}x{})", path.display(), format, image.width(), image.height());
    Ok((image, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Image2D {
        let mut image = Image2D::new(width, height, 4).unwrap();
        for y in 0..height {
            for x in 0..width {
                image.set_rgba(x, y, [x as u8, y as u8, 0, 255]).unwrap();
            }
        }
        image
    }

    #[test]
    fn test_new_is_white() {
        let image = Image2D::new(2, 3, 3).unwrap();
        assert_eq!(image.data().len(), 18);
        assert!(image.data().iter().all(|b| *b == 255));
        assert_eq!(image.rgba(1, 2), Some([255, 255, 255, 255]));
        assert!(matches!(
            Image2D::new(0, 3, 3),
            Err(ImageError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            Image2D::new(2, 2, 5),
            Err(ImageError::UnsupportedChannels { channels: 5 })
        ));
    }

    #[test]
    fn test_from_data_byte_depth() {
        let bytes = Image2D::from_data(2, 2, 1, vec![0; 4]).unwrap();
        assert_eq!(bytes.byte_depth(), 1);

        let floats = Image2D::from_f32(2, 1, 1, &[0.25, 0.5]).unwrap();
        assert_eq!(floats.byte_depth(), 4);
        assert_eq!(floats.texel_f32(1, 0, 0), Some(0.5));

        assert!(matches!(
            Image2D::from_data(2, 2, 1, vec![0; 8]),
            Err(ImageError::UnsupportedByteDepth { byte_depth: 2 })
        ));
        assert!(matches!(
            Image2D::from_data(2, 2, 1, vec![0; 5]),
            Err(ImageError::DataSize { .. })
        ));
    }

    #[test]
    fn test_flips() {
        let mut image = gradient(3, 2);
        image.flip_x();
        assert_eq!(image.rgba(0, 0), Some([2, 0, 0, 255]));
        assert_eq!(image.rgba(2, 1), Some([0, 1, 0, 255]));

        image.flip_y();
        assert_eq!(image.rgba(0, 0), Some([2, 1, 0, 255]));
    }

    #[test]
    fn test_convert_to_power_of_two() {
        let mut image = gradient(6, 5);
        assert!(!image.is_power_of_two());
        image.convert_to_power_of_two();
        assert_eq!((image.width(), image.height()), (4, 4));
        assert!(image.is_power_of_two() && image.is_quadratic());
        // x step 1.5, y step 1.25
        assert_eq!(image.rgba(3, 3), Some([4, 3, 0, 255]));
    }

    #[test]
    fn test_extract_channel() {
        let image = gradient(3, 2);
        let green = image.extract_channel(1).unwrap();
        assert_eq!(green.channels(), 1);
        assert_eq!(green.channel(2, 1, 0), Some(1));
        assert!(image.extract_channel(4).is_err());
    }

    #[test]
    fn test_out_of_bounds() {
        let mut image = Image2D::new(2, 2, 1).unwrap();
        assert_eq!(image.channel(2, 0, 0), None);
        assert!(matches!(
            image.set_channel(0, 2, 0, 1),
            Err(ImageError::OutOfBounds { x: 0, y: 2, .. })
        ));
    }

    #[test]
    fn test_png_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("pbr_kit_image2d_{}.png", std::process::id()));
        let image = gradient(4, 3);
        image.save_png(&path).unwrap();

        let loaded = Image2D::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, image);

        let missing = Image2D::from_path(std::env::temp_dir().join("pbr_kit_missing.png"));
        assert!(matches!(missing, Err(ImageError::Io { .. })));
    }

    #[test]
    fn test_display() {
        let image = Image2D::from_f32(2, 2, 3, &[0.0; 12]).unwrap();
        assert_eq!(image.to_string(), "Image2D (2,2) RGB 32bit");
    }
}
