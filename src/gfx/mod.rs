//! # Graphics Module
//!
//! Geometry, meshes, textures and framebuffers for the PBR test-bed, on top
//! of a small graphics backend abstraction.
//!
//! ## Architecture Overview
//!
//! - **Backend** ([`backend`]) - the GPU primitives everything else uses,
//!   with a wgpu and a CPU implementation
//! - **Geometry** ([`geometry`]) - vertex layouts and the procedural
//!   generators (cube, plane, sphere, cylinder)
//! - **Meshes** ([`mesh`]) - geometry plus textures, the OBJ loader and the
//!   skybox
//! - **Framebuffers** ([`framebuffer`]) - multi-attachment render targets
//!   and blits
//! - **Rendering** ([`rendering`]) - the G-buffer debug composite and frame
//!   pacing
//! - **Resources** ([`resources`]) - images, textures and noise
//!
//! ## Usage
//!
//! ```
//! use pbr_kit::gfx::backend::HeadlessBackend;
//! use pbr_kit::gfx::{mesh::Mesh, rendering::GBuffer};
//!
//! let mut backend = HeadlessBackend::new(200, 100);
//! let mut gbuffer = GBuffer::new(&mut backend, 200, 100, 6)?;
//! let mut sphere = Mesh::sphere(16, 8, 1.0);
//!
//! gbuffer.render_pass(&mut backend, |backend| sphere.render(backend))?;
//! gbuffer.composite_debug_view(&mut backend, 0, 5)?;
//!
//! sphere.delete(&mut backend);
//! gbuffer.delete(&mut backend);
//! # Ok::<(), pbr_kit::Error>(())
//! ```

pub mod backend;
pub mod framebuffer;
pub mod geometry;
pub mod math;
pub mod mesh;
pub mod rendering;
pub mod resources;

// Re-export commonly used types
pub use framebuffer::Fbo;
pub use geometry::Geometry;
pub use mesh::Mesh;
pub use rendering::GBuffer;
