//! Texture handles
//!
//! A [`Texture`] owns one backend texture and must be released with
//! [`Texture::delete`]. Where a texture is shared between consumers (a cube
//! map used as environment map and as skybox, say) it is wrapped in an `Rc`
//! and referenced through [`TextureRef::Shared`]; the backend texture is
//! released when the last reference goes.

use std::borrow::Cow;
use std::path::Path;
use std::rc::Rc;

use super::image2d::Image2D;
use crate::error::{BackendError, Error, ImageError};
use crate::gfx::backend::{
    FilterMode, RenderBackend, TextureDescriptor, TextureFormat, TextureId, TextureTarget, WrapMode,
};

/// File stems of cube map faces, in layer order (+X, -X, +Y, -Y, +Z, -Z)
pub const CUBE_FACE_NAMES: [&str; 6] = ["right", "left", "top", "bottom", "front", "back"];

#[derive(Debug, PartialEq)]
pub struct Texture {
    id: TextureId,
    desc: TextureDescriptor,
}

impl Texture {
    /// Allocates an uninitialized texture.
    pub fn new(
        backend: &mut dyn RenderBackend,
        desc: &TextureDescriptor,
    ) -> Result<Self, BackendError> {
        let id = backend.create_texture(desc)?;
        Ok(Self {
            id,
            desc: desc.clone(),
        })
    }

    /// RGBA8 color target with linear filtering and clamped edges.
    pub fn color(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        Self::new(
            backend,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm)
                .with_label("color"),
        )
    }

    /// RGBA32F color target, for G-buffer channels that need range.
    pub fn color_float(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        Self::new(
            backend,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Rgba32Float)
                .with_filter(FilterMode::Nearest)
                .with_label("color float"),
        )
    }

    pub fn depth(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        Self::new(
            backend,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Depth32Float)
                .with_filter(FilterMode::Nearest)
                .with_label("depth"),
        )
    }

    pub fn color_multisample(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Result<Self, BackendError> {
        Self::new(
            backend,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm)
                .with_target(TextureTarget::Texture2DMultisample { samples })
                .with_label("color multisample"),
        )
    }

    pub fn depth_multisample(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Result<Self, BackendError> {
        Self::new(
            backend,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Depth32Float)
                .with_target(TextureTarget::Texture2DMultisample { samples })
                .with_filter(FilterMode::Nearest)
                .with_label("depth multisample"),
        )
    }

    /// Uploads `image` into a new 2D texture of the matching format.
    pub fn from_image(backend: &mut dyn RenderBackend, image: &Image2D) -> Result<Self, Error> {
        let (format, data) = upload_data(image);
        let texture = Self::new(
            backend,
            &TextureDescriptor::new_2d(image.width(), image.height(), format),
        )?;
        if let Err(err) = backend.write_texture(texture.id, 0, &data) {
            texture.delete(backend);
            return Err(err.into());
        }
        Ok(texture)
    }

    pub fn from_path(
        backend: &mut dyn RenderBackend,
        path: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        let image = Image2D::from_path(path)?;
        Self::from_image(backend, &image)
    }

    /// Builds a cube map from six face images in the order right, left,
    /// top, bottom, front, back.
    ///
    /// Faces that are not square powers of two are resampled. With `inside`
    /// set (skyboxes) every face is mirrored horizontally.
    pub fn cube_map<P: AsRef<Path>>(
        backend: &mut dyn RenderBackend,
        faces: &[P; 6],
        inside: bool,
    ) -> Result<Self, Error> {
        let mut images = Vec::with_capacity(6);
        for path in faces {
            let mut image = Image2D::from_path(path)?;
            if !image.is_power_of_two() || !image.is_quadratic() {
                image.convert_to_power_of_two();
            }
            if inside {
                image.flip_x();
            }
            images.push(image);
        }
        Self::cube_map_from_images(backend, &images)
    }

    /// Loads `right.<extension>`, `left.<extension>`, ... from `dir`.
    pub fn cube_map_from_directory(
        backend: &mut dyn RenderBackend,
        dir: impl AsRef<Path>,
        extension: &str,
        inside: bool,
    ) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let faces = CUBE_FACE_NAMES.map(|name| dir.join(format!("{name}.{extension}")));
        Self::cube_map(backend, &faces, inside)
    }

    /// Builds a cube map from six equally sized square images.
    pub fn cube_map_from_images(
        backend: &mut dyn RenderBackend,
        images: &[Image2D],
    ) -> Result<Self, Error> {
        let first = images.first().ok_or(ImageError::InvalidDimensions {
            width: 0,
            height: 0,
        })?;
        let (format, _) = upload_data(first);
        let size = first.width();
        if let Some(bad) = images.iter().find(|image| {
            image.width() != size || image.height() != size || upload_data(image).0 != format
        }) {
            return Err(ImageError::InvalidDimensions {
                width: bad.width(),
                height: bad.height(),
            }
            .into());
        }
        if images.len() != 6 {
            return Err(BackendError::InvalidOperation(format!(
                "a cube map needs 6 faces, got {}",
                images.len()
            ))
            .into());
        }

        let texture = Self::new(
            backend,
            &TextureDescriptor::new_2d(size, size, format)
                .with_target(TextureTarget::CubeMap)
                .with_wrap(WrapMode::ClampToEdge)
                .with_label("cube map"),
        )?;
        for (layer, image) in images.iter().enumerate() {
            let (_, data) = upload_data(image);
            if let Err(err) = backend.write_texture(texture.id, layer as u32, &data) {
                texture.delete(backend);
                return Err(err.into());
            }
        }
        log::debug!("built {}x{} cube map ({:?})", size, size, format);
        Ok(texture)
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn target(&self) -> TextureTarget {
        self.desc.target
    }

    /// Replaces the contents of a 2D texture. The image must match the
    /// texture's size and format.
    pub fn upload(&self, backend: &mut dyn RenderBackend, image: &Image2D) -> Result<(), Error> {
        let (format, data) = upload_data(image);
        if format != self.desc.format
            || image.width() != self.width()
            || image.height() != self.height()
        {
            return Err(BackendError::InvalidOperation(format!(
                "{image} does not fit a {}x{} {:?} texture",
                self.width(),
                self.height(),
                self.desc.format
            ))
            .into());
        }
        backend.write_texture(self.id, 0, &data)?;
        Ok(())
    }

    /// Reads the texture back into an image, row 0 first.
    pub fn download_image(&self, backend: &mut dyn RenderBackend) -> Result<Image2D, Error> {
        self.download_layer(backend, 0)
    }

    /// Reads all six faces of a cube map.
    pub fn download_cube_map_images(
        &self,
        backend: &mut dyn RenderBackend,
    ) -> Result<Vec<Image2D>, Error> {
        if self.desc.target != TextureTarget::CubeMap {
            return Err(BackendError::InvalidOperation(format!(
                "texture {} is not a cube map",
                self.id.raw()
            ))
            .into());
        }
        (0..6).map(|layer| self.download_layer(backend, layer)).collect()
    }

    fn download_layer(
        &self,
        backend: &mut dyn RenderBackend,
        layer: u32,
    ) -> Result<Image2D, Error> {
        let data = backend.read_texture(self.id, layer)?;
        Ok(Image2D::from_data(
            self.width(),
            self.height(),
            self.desc.format.channels(),
            data,
        )?)
    }

    pub fn bind(&self, backend: &mut dyn RenderBackend, unit: u32) {
        backend.bind_texture(unit, Some(self.id));
    }

    pub fn unbind(&self, backend: &mut dyn RenderBackend, unit: u32) {
        backend.bind_texture(unit, None);
    }

    /// Releases the backend texture.
    pub fn delete(self, backend: &mut dyn RenderBackend) {
        backend.delete_texture(self.id);
    }
}

/// Texture as held by a mesh or framebuffer: either owned outright or
/// shared with other holders.
#[derive(Debug)]
pub enum TextureRef {
    Owned(Texture),
    Shared(Rc<Texture>),
}

impl TextureRef {
    pub fn texture(&self) -> &Texture {
        match self {
            TextureRef::Owned(texture) => texture,
            TextureRef::Shared(texture) => texture,
        }
    }

    pub fn id(&self) -> TextureId {
        self.texture().id()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, TextureRef::Shared(_))
    }

    /// Deletes an owned texture. A shared texture is deleted only when this
    /// was its last reference.
    pub fn release(self, backend: &mut dyn RenderBackend) {
        match self {
            TextureRef::Owned(texture) => texture.delete(backend),
            TextureRef::Shared(shared) => match Rc::try_unwrap(shared) {
                Ok(texture) => texture.delete(backend),
                Err(shared) => log::trace!(
                    "texture {} still has {} other holders",
                    shared.id().raw(),
                    Rc::strong_count(&shared) - 1
                ),
            },
        }
    }
}

impl From<Texture> for TextureRef {
    fn from(texture: Texture) -> Self {
        TextureRef::Owned(texture)
    }
}

impl From<Rc<Texture>> for TextureRef {
    fn from(texture: Rc<Texture>) -> Self {
        TextureRef::Shared(texture)
    }
}

/// Texture format for `image` and its data laid out for that format.
/// Three-channel and float two-channel images are widened to RGBA.
fn upload_data(image: &Image2D) -> (TextureFormat, Cow<'_, [u8]>) {
    let data = image.data();
    match (image.channels(), image.byte_depth()) {
        (1, 1) => (TextureFormat::R8Unorm, Cow::Borrowed(data)),
        (2, 1) => (TextureFormat::Rg8Unorm, Cow::Borrowed(data)),
        (4, 1) => (TextureFormat::Rgba8Unorm, Cow::Borrowed(data)),
        (3, 1) => (TextureFormat::Rgba8Unorm, Cow::Owned(widen(data, 3, &[255]))),
        (1, _) => (TextureFormat::R32Float, Cow::Borrowed(data)),
        (4, _) => (TextureFormat::Rgba32Float, Cow::Borrowed(data)),
        (channels, _) => {
            let one = 1.0f32.to_le_bytes();
            let zero = 0.0f32.to_le_bytes();
            let fill: Vec<u8> = if channels == 3 {
                one.to_vec()
            } else {
                [zero, one].concat()
            };
            (
                TextureFormat::Rgba32Float,
                Cow::Owned(widen(data, channels as usize * 4, &fill)),
            )
        }
    }
}

/// Appends `fill` after every `texel`-byte group of `data`.
fn widen(data: &[u8], texel: usize, fill: &[u8]) -> Vec<u8> {
    data.chunks_exact(texel)
        .flat_map(|t| t.iter().chain(fill).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::HeadlessBackend;

    #[test]
    fn test_upload_formats() {
        let rgb = Image2D::from_data(1, 1, 3, vec![10, 20, 30]).unwrap();
        let (format, data) = upload_data(&rgb);
        assert_eq!(format, TextureFormat::Rgba8Unorm);
        assert_eq!(data.as_ref(), &[10, 20, 30, 255]);

        let gray = Image2D::new(2, 2, 1).unwrap();
        assert_eq!(upload_data(&gray).0, TextureFormat::R8Unorm);

        let hdr = Image2D::from_f32(1, 1, 3, &[0.5, 1.5, 2.5]).unwrap();
        let (format, data) = upload_data(&hdr);
        assert_eq!(format, TextureFormat::Rgba32Float);
        let floats: Vec<f32> = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![0.5, 1.5, 2.5, 1.0]);
    }

    #[test]
    fn test_image_round_trip() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut image = Image2D::new(3, 2, 4).unwrap();
        image.set_rgba(2, 1, [1, 2, 3, 4]).unwrap();

        let texture = Texture::from_image(&mut backend, &image).unwrap();
        assert_eq!(texture.format(), TextureFormat::Rgba8Unorm);
        assert_eq!(texture.download_image(&mut backend).unwrap(), image);

        let wrong = Image2D::new(2, 2, 4).unwrap();
        assert!(texture.upload(&mut backend, &wrong).is_err());
        texture.delete(&mut backend);
    }

    #[test]
    fn test_cube_map_from_images() {
        let mut backend = HeadlessBackend::new(4, 4);
        let faces: Vec<Image2D> = (0..6u8)
            .map(|i| Image2D::from_data(2, 2, 1, vec![i; 4]).unwrap())
            .collect();

        let cube = Texture::cube_map_from_images(&mut backend, &faces).unwrap();
        assert_eq!(cube.target(), TextureTarget::CubeMap);
        let downloaded = cube.download_cube_map_images(&mut backend).unwrap();
        assert_eq!(downloaded, faces);

        let mut uneven = faces.clone();
        uneven[3] = Image2D::new(4, 4, 1).unwrap();
        assert!(Texture::cube_map_from_images(&mut backend, &uneven).is_err());
        cube.delete(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_shared_release_deletes_last_reference_only() {
        let mut backend = HeadlessBackend::new(4, 4);
        let shared = Rc::new(Texture::color(&mut backend, 2, 2).unwrap());
        let id = shared.id();

        let first = TextureRef::from(shared.clone());
        let second = TextureRef::from(shared);
        assert!(first.is_shared());

        first.release(&mut backend);
        assert!(backend.is_texture_alive(id));
        second.release(&mut backend);
        assert!(!backend.is_texture_alive(id));
        assert_eq!(backend.texture_delete_count(id), 1);
    }
}
