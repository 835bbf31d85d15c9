// src/gfx/resources/mod.rs
//! GPU resource management
//!
//! Handles images, textures and noise data for rendering.

pub mod image2d;
pub mod noise;
pub mod texture;

// Re-export main types
pub use image2d::Image2D;
pub use noise::{noise_image, noise_slice, noise_texture};
pub use texture::{Texture, TextureRef, CUBE_FACE_NAMES};
