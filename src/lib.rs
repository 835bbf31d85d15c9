// src/lib.rs
//! PBR kit
//!
//! Mesh loading, procedural geometry and multi-target framebuffer
//! compositing for a physically based rendering test-bed, built on wgpu.

pub mod config;
pub mod error;
pub mod gfx;
pub mod prelude;

// Re-export main types for convenience
pub use config::RenderConfig;
pub use error::{Error, Result};
