//! # PBR kit prelude
//!
//! Commonly used types in one import.
//!
//! ```no_run
//! use pbr_kit::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut backend = HeadlessBackend::new(640, 480);
//!     let mut dragon = obj::load("assets/dragon.obj", false, true)?;
//!     dragon.build(&mut backend)?;
//!
//!     let mut fbo = Fbo::new(&mut backend, 640, 480)?;
//!     fbo.ensure_complete(&mut backend)?;
//!     fbo.bind(&mut backend);
//!     fbo.clear(&mut backend)?;
//!     dragon.render(&mut backend)?;
//!     fbo.unbind(&mut backend);
//!     fbo.copy_to_screen(&mut backend, 0, Rect::full(640, 480))?;
//!
//!     dragon.delete(&mut backend);
//!     fbo.delete(&mut backend);
//!     Ok(())
//! }
//! ```

// Re-export configuration and errors
pub use crate::config::RenderConfig;
pub use crate::error::{BackendError, Error, ImageError, LoadError, SetupError};

// Re-export the backend contract
pub use crate::gfx::backend::{
    BufferMask, FilterMode, FramebufferStatus, PrimitiveTopology, Rect, RenderBackend,
    TextureDescriptor, TextureFormat, TextureTarget,
};
pub use crate::gfx::backend::{HeadlessBackend, WgpuBackend};

// Re-export geometry, meshes and render targets
pub use crate::gfx::framebuffer::Fbo;
pub use crate::gfx::geometry::{self, Geometry, VertexAttribute};
pub use crate::gfx::mesh::{obj, skybox, Mesh};
pub use crate::gfx::rendering::{FrameLimiter, GBuffer};
pub use crate::gfx::resources::{Image2D, Texture, TextureRef};

// Re-export common external dependencies
pub use cgmath::{InnerSpace, Vector3};
