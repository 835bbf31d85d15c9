//! # Mesh
//!
//! A [`Geometry`] plus the textures it is drawn with. The vertex array is
//! uploaded lazily on the first [`Mesh::build`] or [`Mesh::render`].
//!
//! Textures are bound to units in insertion order for the duration of a
//! draw. Optional pre/post render hooks run right around the draw call,
//! with the textures already bound; the skybox uses them to toggle depth
//! writes.

pub mod obj;
pub mod skybox;

use std::fmt;

use crate::error::BackendError;
use crate::gfx::backend::{PrimitiveTopology, RenderBackend, VertexArrayId};
use crate::gfx::geometry::{self, Geometry};
use crate::gfx::resources::TextureRef;

pub use skybox::{skybox, skybox_from_directory, skybox_with_cube_map};

/// Callback run before or after a mesh's draw call
pub type RenderHook = Box<dyn FnMut(&mut dyn RenderBackend)>;

pub struct Mesh {
    geometry: Geometry,
    textures: Vec<TextureRef>,
    topology: PrimitiveTopology,
    vertex_array: Option<VertexArrayId>,
    pre_render: Option<RenderHook>,
    post_render: Option<RenderHook>,
}

impl Mesh {
    pub fn new(geometry: Geometry, topology: PrimitiveTopology) -> Self {
        Self::with_textures(geometry, Vec::new(), topology)
    }

    pub fn with_textures(
        geometry: Geometry,
        textures: Vec<TextureRef>,
        topology: PrimitiveTopology,
    ) -> Self {
        Self {
            geometry,
            textures,
            topology,
            vertex_array: None,
            pre_render: None,
            post_render: None,
        }
    }

    /// Box centered at the origin, see [`geometry::cube`].
    pub fn cube(width: f32, height: f32, depth: f32, inside: bool) -> Self {
        Self::new(geometry::cube(width, height, depth, inside), PrimitiveTopology::Triangles)
    }

    /// Quad on the XZ plane facing +Y.
    pub fn plane(width: f32, height: f32) -> Self {
        Self::new(geometry::plane(width, height), PrimitiveTopology::Triangles)
    }

    /// UV sphere centered at the origin, see [`geometry::sphere`].
    pub fn sphere(hres: u32, vres: u32, radius: f32) -> Self {
        Self::new(geometry::sphere(hres, vres, radius), PrimitiveTopology::Triangles)
    }

    /// Capped cylinder between `p1` and `p2`.
    pub fn cylinder(p1: [f32; 3], p2: [f32; 3], radius: f32) -> Self {
        Self::new(geometry::cylinder(p1, p2, radius), PrimitiveTopology::Triangles)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn textures(&self) -> &[TextureRef] {
        &self.textures
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    /// Backend vertex array, once built.
    pub fn vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    pub fn is_built(&self) -> bool {
        self.vertex_array.is_some()
    }

    /// Appends a texture; it is bound to the next free unit.
    pub fn add_texture(&mut self, texture: impl Into<TextureRef>) {
        self.textures.push(texture.into());
    }

    pub fn set_pre_render(&mut self, hook: impl FnMut(&mut dyn RenderBackend) + 'static) {
        self.pre_render = Some(Box::new(hook));
    }

    pub fn set_post_render(&mut self, hook: impl FnMut(&mut dyn RenderBackend) + 'static) {
        self.post_render = Some(Box::new(hook));
    }

    /// Uploads the geometry if that has not happened yet.
    pub fn build(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> Result<VertexArrayId, BackendError> {
        if let Some(vertex_array) = self.vertex_array {
            return Ok(vertex_array);
        }
        let vertex_array = backend.create_vertex_array(&self.geometry, self.topology)?;
        self.vertex_array = Some(vertex_array);
        Ok(vertex_array)
    }

    pub fn render(&mut self, backend: &mut dyn RenderBackend) -> Result<(), BackendError> {
        self.render_instanced(backend, 1)
    }

    /// Draws `instances` copies into the bound target.
    ///
    /// Textures are unbound and the post hook runs even when the draw fails.
    pub fn render_instanced(
        &mut self,
        backend: &mut dyn RenderBackend,
        instances: u32,
    ) -> Result<(), BackendError> {
        let vertex_array = self.build(backend)?;

        for (unit, texture) in self.textures.iter().enumerate() {
            texture.texture().bind(backend, unit as u32);
        }
        if let Some(hook) = self.pre_render.as_mut() {
            hook(backend);
        }

        let result = backend.draw(vertex_array, instances);

        if let Some(hook) = self.post_render.as_mut() {
            hook(backend);
        }
        for (unit, texture) in self.textures.iter().enumerate() {
            texture.texture().unbind(backend, unit as u32);
        }
        result
    }

    /// Releases the vertex array and every texture reference.
    pub fn delete(self, backend: &mut dyn RenderBackend) {
        if let Some(vertex_array) = self.vertex_array {
            backend.delete_vertex_array(vertex_array);
        }
        for texture in self.textures {
            texture.release(backend);
        }
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("vertices", &self.geometry.vertex_count())
            .field("textures", &self.textures.len())
            .field("topology", &self.topology)
            .field("vertex_array", &self.vertex_array)
            .field("pre_render", &self.pre_render.is_some())
            .field("post_render", &self.post_render.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::HeadlessBackend;
    use crate::gfx::resources::Texture;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_build_is_lazy_and_once() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut mesh = Mesh::sphere(2, 2, 1.0);
        assert!(!mesh.is_built());

        let first = mesh.build(&mut backend).unwrap();
        let second = mesh.build(&mut backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.live_vertex_arrays(), 1);
    }

    #[test]
    fn test_render_binds_textures_in_order() {
        let mut backend = HeadlessBackend::new(4, 4);
        let albedo = Texture::color(&mut backend, 2, 2).unwrap();
        let normal = Texture::color(&mut backend, 2, 2).unwrap();
        let (albedo_id, normal_id) = (albedo.id(), normal.id());

        let mut mesh = Mesh::cube(1.0, 1.0, 1.0, false);
        mesh.add_texture(albedo);
        mesh.add_texture(normal);
        mesh.render_instanced(&mut backend, 3).unwrap();

        let call = &backend.draw_calls()[0];
        assert_eq!(call.vertex_count, 36);
        assert_eq!(call.instances, 3);
        assert_eq!(call.textures.get(&0), Some(&albedo_id));
        assert_eq!(call.textures.get(&1), Some(&normal_id));
        assert!(backend.bound_textures().is_empty());
    }

    #[test]
    fn test_hooks_wrap_the_draw() {
        let mut backend = HeadlessBackend::new(4, 4);
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut mesh = Mesh::plane(1.0, 1.0);
        let pre = log.clone();
        mesh.set_pre_render(move |backend| {
            pre.borrow_mut().push("pre");
            backend.set_depth_write(false);
        });
        let post = log.clone();
        mesh.set_post_render(move |backend| {
            post.borrow_mut().push("post");
            backend.set_depth_write(true);
        });

        mesh.render(&mut backend).unwrap();
        assert_eq!(*log.borrow(), vec!["pre", "post"]);
        assert!(!backend.draw_calls()[0].depth_write);
        assert!(backend.depth_write_enabled());
    }

    #[test]
    fn test_delete_releases_owned_and_keeps_shared() {
        let mut backend = HeadlessBackend::new(4, 4);
        let owned = Texture::color(&mut backend, 2, 2).unwrap();
        let shared = Rc::new(Texture::color(&mut backend, 2, 2).unwrap());

        let mut mesh = Mesh::sphere(1, 1, 1.0);
        mesh.add_texture(owned);
        mesh.add_texture(shared.clone());
        mesh.build(&mut backend).unwrap();
        mesh.delete(&mut backend);

        assert_eq!(backend.live_vertex_arrays(), 0);
        assert_eq!(backend.live_textures(), 1);
        assert!(backend.is_texture_alive(shared.id()));
    }
}
