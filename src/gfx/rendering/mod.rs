// src/gfx/rendering/mod.rs
//! Render passes built on top of framebuffers
//!
//! Handles the deferred G-buffer with its debug composite and frame pacing.

pub mod frame_limiter;
pub mod gbuffer;

// Re-export main types
pub use frame_limiter::FrameLimiter;
pub use gbuffer::{GBuffer, ATTACHMENT_NAMES, DEFAULT_ATTACHMENTS};
