//! Random noise images and textures.
//!
//! The generator is passed in by the caller; seed a
//! [`StdRng`](rand::rngs::StdRng) to get reproducible noise.

use rand::Rng;

use super::image2d::Image2D;
use super::texture::Texture;
use crate::error::Error;
use crate::gfx::backend::RenderBackend;

/// RGBA8 image with every channel drawn uniformly from `0..=255`.
pub fn noise_image<R: Rng>(width: u32, height: u32, rng: &mut R) -> Result<Image2D, Error> {
    let mut data = vec![0u8; width as usize * height as usize * 4];
    rng.fill(data.as_mut_slice());
    Ok(Image2D::from_data(width, height, 4, data)?)
}

/// Uploads a fresh [`noise_image`] as an RGBA8 texture.
pub fn noise_texture<R: Rng>(
    backend: &mut dyn RenderBackend,
    width: u32,
    height: u32,
    rng: &mut R,
) -> Result<Texture, Error> {
    let image = noise_image(width, height, rng)?;
    Texture::from_image(backend, &image)
}

/// `len` floats drawn uniformly from `[0, 1)`.
pub fn noise_slice<R: Rng>(len: usize, rng: &mut R) -> Vec<f32> {
    (0..len).map(|_| rng.random::<f32>()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::HeadlessBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_same_seed_same_noise() {
        let a = noise_image(8, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = noise_image(8, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        let c = noise_image(8, 4, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.data().len(), 8 * 4 * 4);
    }

    #[test]
    fn test_noise_slice_range() {
        let values = noise_slice(256, &mut StdRng::seed_from_u64(1));
        assert_eq!(values.len(), 256);
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
        assert!(values.iter().any(|v| *v > 0.5));
    }

    #[test]
    fn test_noise_texture_uploads_image() {
        let mut backend = HeadlessBackend::new(4, 4);
        let texture = noise_texture(&mut backend, 4, 2, &mut StdRng::seed_from_u64(3)).unwrap();
        let expected = noise_image(4, 2, &mut StdRng::seed_from_u64(3)).unwrap();

        let downloaded = texture.download_image(&mut backend).unwrap();
        assert_eq!(downloaded, expected);
        texture.delete(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }
}
