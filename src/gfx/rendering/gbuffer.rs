//! # G-buffer
//!
//! A deferred-rendering target: one framebuffer with a depth texture and a
//! fixed number of RGBA8 color attachments (color, albedo, normal,
//! metallic, roughness and ambient occlusion in the PBR pass). Meshes are
//! rendered into all of them at once inside [`GBuffer::render_pass`].
//!
//! [`GBuffer::composite_debug_view`] puts the primary attachment on screen
//! and lines up the others as thumbnails along the bottom edge:
//!
//! ```text
//! +-----------------------------+
//! |                             |
//! |        attachment 0         |
//! |                             |
//! +-----+-----+-----+-----+-----+
//! |  1  |  2  |  3  |  4  |  5  |
//! +-----+-----+-----+-----+-----+
//! ```

use crate::error::{BackendError, Error};
use crate::gfx::backend::{Rect, RenderBackend};
use crate::gfx::framebuffer::Fbo;
use crate::gfx::resources::Texture;

/// Attachment count of the PBR G-buffer
pub const DEFAULT_ATTACHMENTS: u32 = 6;

/// Names of the PBR G-buffer attachments, by index
pub const ATTACHMENT_NAMES: [&str; DEFAULT_ATTACHMENTS as usize] =
    ["color", "albedo", "normal", "metallic", "roughness", "ao"];

#[derive(Debug)]
pub struct GBuffer {
    fbo: Fbo,
    width: u32,
    height: u32,
    attachments: u32,
}

impl GBuffer {
    /// Builds a complete G-buffer with `attachments` color targets.
    ///
    /// Fails with a fatal [`SetupError`](crate::error::SetupError) when the
    /// backend rejects the attachment combination.
    pub fn new(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> Result<Self, Error> {
        let attachments = attachments.max(1);
        let mut fbo = Fbo::empty(backend)?;

        let result = Self::attach_all(backend, &mut fbo, width, height, attachments);
        if let Err(err) = result {
            fbo.delete(backend);
            return Err(err);
        }

        log::debug!("g-buffer {}x{} with {} color attachments", width, height, attachments);
        Ok(Self {
            fbo,
            width,
            height,
            attachments,
        })
    }

    fn attach_all(
        backend: &mut dyn RenderBackend,
        fbo: &mut Fbo,
        width: u32,
        height: u32,
        attachments: u32,
    ) -> Result<(), Error> {
        let depth = Texture::depth(backend, width, height)?;
        fbo.attach_depth_texture(backend, depth)?;
        for index in 0..attachments {
            let color = Texture::color(backend, width, height)?;
            fbo.attach_color_texture(backend, color, index)?;
        }
        fbo.ensure_complete(backend)?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn attachments(&self) -> u32 {
        self.attachments
    }

    pub fn fbo(&self) -> &Fbo {
        &self.fbo
    }

    pub fn fbo_mut(&mut self) -> &mut Fbo {
        &mut self.fbo
    }

    pub fn attachment(&self, index: u32) -> Option<&Texture> {
        self.fbo.color_texture(index)
    }

    /// Binds and clears the G-buffer, runs `render` and unbinds again, even
    /// when `render` fails.
    pub fn render_pass<F>(
        &mut self,
        backend: &mut dyn RenderBackend,
        render: F,
    ) -> Result<(), BackendError>
    where
        F: FnOnce(&mut dyn RenderBackend) -> Result<(), BackendError>,
    {
        self.fbo.bind(backend);
        let result = self.fbo.clear(backend).and_then(|_| render(backend));
        self.fbo.unbind(backend);
        result
    }

    /// Rectangle of thumbnail `slot` when the screen is split into
    /// `divisor` columns.
    pub fn thumbnail_rect(&self, slot: u32, divisor: u32) -> Rect {
        let divisor = divisor.max(1);
        Rect::new(
            (self.width * slot / divisor) as i32,
            0,
            self.width / divisor,
            self.height / divisor,
        )
    }

    /// Draws attachment `primary` over the whole screen, then attachments
    /// 1, 2, ... as `1/divisor` sized thumbnails left to right along the
    /// bottom edge. At most `divisor` thumbnails are drawn.
    ///
    /// Depth follows each color copy. Backends that cannot scale depth
    /// copies leave it out of the thumbnails.
    pub fn composite_debug_view(
        &self,
        backend: &mut dyn RenderBackend,
        primary: u32,
        divisor: u32,
    ) -> Result<(), BackendError> {
        let full = Rect::full(self.width, self.height);
        self.fbo.copy_color_to_screen(backend, primary, full)?;
        self.fbo.copy_depth_to_screen(backend, full)?;

        let mut depth_thumbnails = true;
        for (slot, index) in (1..self.attachments).take(divisor.max(1) as usize).enumerate() {
            let thumb = self.thumbnail_rect(slot as u32, divisor);
            self.fbo.copy_color_to_screen_region(backend, index, full, thumb)?;
            if !depth_thumbnails {
                continue;
            }
            match self.fbo.copy_depth_to_screen_region(backend, full, thumb) {
                Ok(()) => {}
                Err(BackendError::Unsupported(reason)) => {
                    log::debug!("depth thumbnails skipped: {reason}");
                    depth_thumbnails = false;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        self.fbo.delete(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{FramebufferStatus, HeadlessBackend};
    use crate::gfx::mesh::Mesh;

    fn filled_gbuffer(backend: &mut HeadlessBackend, w: u32, h: u32) -> GBuffer {
        let gbuffer = GBuffer::new(backend, w, h, DEFAULT_ATTACHMENTS).unwrap();
        for index in 0..DEFAULT_ATTACHMENTS {
            let id = gbuffer.attachment(index).unwrap().id();
            let value = index as f32 / 10.0;
            backend.fill_texture(id, [value, value, value, 1.0]).unwrap();
        }
        gbuffer
    }

    #[test]
    fn test_new_attaches_everything() {
        let mut backend = HeadlessBackend::new(10, 10);
        let mut gbuffer = GBuffer::new(&mut backend, 10, 10, DEFAULT_ATTACHMENTS).unwrap();
        assert_eq!(gbuffer.fbo().color_indices(), vec![0, 1, 2, 3, 4, 5]);
        assert!(gbuffer.fbo().depth_texture().is_some());
        assert_eq!(gbuffer.fbo_mut().status(&mut backend), FramebufferStatus::Complete);
        assert_eq!(backend.live_textures(), 7);

        gbuffer.delete(&mut backend);
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_framebuffers(), 0);
    }

    #[test]
    fn test_thumbnail_layout() {
        let mut backend = HeadlessBackend::new(120, 80);
        let mut gbuffer = GBuffer::new(&mut backend, 120, 80, DEFAULT_ATTACHMENTS).unwrap();
        assert_eq!(gbuffer.thumbnail_rect(0, 5), Rect::new(0, 0, 24, 16));
        assert_eq!(gbuffer.thumbnail_rect(4, 5), Rect::new(96, 0, 24, 16));
        assert_eq!(gbuffer.thumbnail_rect(1, 0), Rect::new(120, 0, 120, 80));
        gbuffer.delete(&mut backend);
    }

    #[test]
    fn test_composite_debug_view() {
        let (w, h) = (20, 10);
        let mut backend = HeadlessBackend::new(w, h);
        let mut gbuffer = filled_gbuffer(&mut backend, w, h);
        gbuffer.composite_debug_view(&mut backend, 0, 5).unwrap();

        // thumbnails are 4x2 along the bottom edge
        for slot in 0..5u32 {
            let expected = (slot + 1) as f32 / 10.0;
            for y in 0..2 {
                for x in slot * 4..slot * 4 + 4 {
                    let texel = backend.screen_texel(x, y).unwrap();
                    assert!((texel[0] - expected).abs() < 1e-2, "slot {slot} at {x},{y}");
                }
            }
        }
        assert_eq!(backend.screen_texel(10, 5), Some([0.0, 0.0, 0.0, 1.0]));
        gbuffer.delete(&mut backend);
    }

    #[test]
    fn test_composite_with_fewer_attachments() {
        let mut backend = HeadlessBackend::new(10, 10);
        let mut gbuffer = GBuffer::new(&mut backend, 10, 10, 2).unwrap();
        let id = gbuffer.attachment(1).unwrap().id();
        backend.fill_texture(id, [1.0; 4]).unwrap();

        gbuffer.composite_debug_view(&mut backend, 0, 5).unwrap();
        assert_eq!(backend.screen_texel(0, 0), Some([1.0; 4]));
        // attachment 0 was never written
        assert_eq!(backend.screen_texel(2, 0), Some([0.0; 4]));
        gbuffer.delete(&mut backend);
    }

    #[test]
    fn test_render_pass_targets_gbuffer() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut gbuffer = GBuffer::new(&mut backend, 8, 8, DEFAULT_ATTACHMENTS).unwrap();
        let mut sphere = Mesh::sphere(4, 4, 1.0);

        gbuffer
            .render_pass(&mut backend, |backend| sphere.render(backend))
            .unwrap();

        assert_eq!(backend.draw_calls()[0].target, gbuffer.fbo().id());
        assert!(!gbuffer.fbo().is_bound());
        assert_eq!(backend.bound_framebuffer(), None);

        sphere.delete(&mut backend);
        gbuffer.delete(&mut backend);
    }
}
