//! Skybox mesh: an inward-facing cube textured with a cube map.
//!
//! Depth writes are switched off while the skybox is drawn so that it never
//! occludes scene geometry.

use std::path::Path;

use super::Mesh;
use crate::error::Error;
use crate::gfx::backend::{PrimitiveTopology, RenderBackend};
use crate::gfx::geometry;
use crate::gfx::resources::{Texture, TextureRef};

/// Skybox with side length `side` around an existing cube map.
pub fn skybox_with_cube_map(side: f32, cube_map: impl Into<TextureRef>) -> Mesh {
    let mut mesh = Mesh::with_textures(
        geometry::skybox_cube(side),
        vec![cube_map.into()],
        PrimitiveTopology::Triangles,
    );
    mesh.set_pre_render(|backend| backend.set_depth_write(false));
    mesh.set_post_render(|backend| backend.set_depth_write(true));
    mesh
}

/// Skybox from six face images in the order right, left, top, bottom,
/// front, back. Faces are mirrored for viewing from inside.
pub fn skybox<P: AsRef<Path>>(
    backend: &mut dyn RenderBackend,
    side: f32,
    faces: &[P; 6],
) -> Result<Mesh, Error> {
    let cube_map = Texture::cube_map(backend, faces, true)?;
    Ok(skybox_with_cube_map(side, cube_map))
}

/// Skybox from `right.<extension>`, `left.<extension>`, ... in `dir`.
pub fn skybox_from_directory(
    backend: &mut dyn RenderBackend,
    side: f32,
    dir: impl AsRef<Path>,
    extension: &str,
) -> Result<Mesh, Error> {
    let cube_map = Texture::cube_map_from_directory(backend, dir, extension, true)?;
    Ok(skybox_with_cube_map(side, cube_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{HeadlessBackend, TextureTarget};
    use crate::gfx::resources::Image2D;

    #[test]
    fn test_skybox_draws_without_depth_writes() {
        let mut backend = HeadlessBackend::new(4, 4);
        let faces: Vec<Image2D> = (0..6).map(|_| Image2D::new(2, 2, 4).unwrap()).collect();
        let cube_map = Texture::cube_map_from_images(&mut backend, &faces).unwrap();

        let mut sky = skybox_with_cube_map(10.0, cube_map);
        assert_eq!(sky.textures()[0].texture().target(), TextureTarget::CubeMap);
        sky.render(&mut backend).unwrap();

        let call = &backend.draw_calls()[0];
        assert!(!call.depth_write);
        assert_eq!(call.vertex_count, 36);
        assert!(backend.depth_write_enabled());

        sky.delete(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_missing_faces_fail() {
        let mut backend = HeadlessBackend::new(4, 4);
        let dir = std::env::temp_dir().join("pbr_kit_no_such_skybox");
        let result = skybox_from_directory(&mut backend, 1.0, &dir, "png");
        assert!(matches!(result, Err(Error::Image(_))));
        assert_eq!(backend.live_textures(), 0);
    }
}
