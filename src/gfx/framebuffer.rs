//! # Framebuffer objects
//!
//! [`Fbo`] owns a backend framebuffer together with its attachments: a
//! sparse set of color textures keyed by attachment index and an optional
//! depth texture. Attaching a texture to an occupied slot releases the
//! previous occupant right away. Textures that must outlive the FBO are
//! attached as [`TextureRef::Shared`].
//!
//! ## State
//!
//! An FBO is either bound (the current render target) or unbound. Binding
//! is not reentrant; callers pair [`Fbo::bind`] with [`Fbo::unbind`] and
//! never bind a second target in between. [`Fbo::clear`] only acts while
//! bound so the screen is never cleared by accident.
//!
//! ## Copies
//!
//! The `copy_*` family blits rectangles between this FBO and the screen or
//! another FBO. Source and destination rectangles are independent, so a
//! copy may scale; `_smooth` variants resample linearly, everything else
//! uses nearest. Depth planes always use nearest.

use std::collections::BTreeMap;
use std::mem;

use crate::error::{BackendError, SetupError};
use crate::gfx::backend::{
    BlitDescriptor, BlitEndpoint, BufferMask, FilterMode, FramebufferId, FramebufferStatus, Rect,
    RenderBackend, TextureTarget,
};
use crate::gfx::resources::{Texture, TextureRef};

#[derive(Debug)]
pub struct Fbo {
    id: Option<FramebufferId>,
    bound: bool,
    colors: BTreeMap<u32, TextureRef>,
    depth: Option<TextureRef>,
    target: TextureTarget,
}

impl Fbo {
    fn with_target(
        backend: &mut dyn RenderBackend,
        target: TextureTarget,
    ) -> Result<Self, BackendError> {
        let id = backend.create_framebuffer()?;
        Ok(Self {
            id: Some(id),
            bound: false,
            colors: BTreeMap::new(),
            depth: None,
            target,
        })
    }

    /// Framebuffer without attachments.
    pub fn empty(backend: &mut dyn RenderBackend) -> Result<Self, BackendError> {
        Self::with_target(backend, TextureTarget::Texture2D)
    }

    /// Framebuffer with an RGBA8 color texture at index 0 and a depth texture.
    pub fn new(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let mut fbo = Self::empty(backend)?;
        let result = fbo.attach_default_targets(backend, |backend| {
            let color = Texture::color(backend, width, height)?;
            match Texture::depth(backend, width, height) {
                Ok(depth) => Ok((color, depth)),
                Err(err) => {
                    color.delete(backend);
                    Err(err)
                }
            }
        });
        fbo.finish_setup(backend, result)
    }

    /// Framebuffer without attachments, meant for multisampled textures.
    pub fn empty_multisample(
        backend: &mut dyn RenderBackend,
        samples: u32,
    ) -> Result<Self, BackendError> {
        Self::with_target(backend, TextureTarget::Texture2DMultisample { samples })
    }

    /// Multisampled color (index 0) and depth framebuffer.
    pub fn new_multisample(
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Result<Self, BackendError> {
        let mut fbo = Self::empty_multisample(backend, samples)?;
        let result = fbo.attach_default_targets(backend, |backend| {
            let color = Texture::color_multisample(backend, width, height, samples)?;
            match Texture::depth_multisample(backend, width, height, samples) {
                Ok(depth) => Ok((color, depth)),
                Err(err) => {
                    color.delete(backend);
                    Err(err)
                }
            }
        });
        fbo.finish_setup(backend, result)
    }

    fn attach_default_targets<F>(
        &mut self,
        backend: &mut dyn RenderBackend,
        create: F,
    ) -> Result<(), BackendError>
    where
        F: FnOnce(&mut dyn RenderBackend) -> Result<(Texture, Texture), BackendError>,
    {
        let (color, depth) = create(backend)?;
        if let Err(err) = self.attach_color_texture(backend, color, 0) {
            depth.delete(backend);
            return Err(err);
        }
        self.attach_depth_texture(backend, depth)
    }

    /// Deletes a half-built FBO when setup failed.
    fn finish_setup(
        mut self,
        backend: &mut dyn RenderBackend,
        result: Result<(), BackendError>,
    ) -> Result<Self, BackendError> {
        match result {
            Ok(()) => Ok(self),
            Err(err) => {
                self.delete(backend);
                Err(err)
            }
        }
    }

    /// Backend handle, `None` once deleted.
    pub fn id(&self) -> Option<FramebufferId> {
        self.id
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn color_texture(&self, index: u32) -> Option<&Texture> {
        self.colors.get(&index).map(TextureRef::texture)
    }

    pub fn depth_texture(&self) -> Option<&Texture> {
        self.depth.as_ref().map(TextureRef::texture)
    }

    /// Occupied color attachment indices, ascending.
    pub fn color_indices(&self) -> Vec<u32> {
        self.colors.keys().copied().collect()
    }

    /// Size of the first attachment.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.colors
            .values()
            .chain(self.depth.as_ref())
            .next()
            .map(|t| (t.texture().width(), t.texture().height()))
    }

    fn handle(&self) -> Result<FramebufferId, BackendError> {
        self.id
            .ok_or_else(|| BackendError::InvalidOperation("framebuffer was deleted".to_string()))
    }

    pub fn bind(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.id {
            backend.bind_framebuffer(Some(id));
            self.bound = true;
        }
    }

    pub fn unbind(&mut self, backend: &mut dyn RenderBackend) {
        backend.bind_framebuffer(None);
        self.bound = false;
    }

    /// Clears color and depth. Does nothing unless the FBO is bound.
    pub fn clear(&self, backend: &mut dyn RenderBackend) -> Result<(), BackendError> {
        if !self.bound {
            log::trace!("clear on unbound framebuffer ignored");
            return Ok(());
        }
        backend.clear(BufferMask::ALL)
    }

    /// Rejects textures whose target differs from the framebuffer's.
    fn check_target(&self, texture: &TextureRef) -> Result<FramebufferId, BackendError> {
        let id = self.handle()?;
        let target = texture.texture().target();
        if target != self.target {
            return Err(BackendError::InvalidOperation(format!(
                "cannot attach a {:?} texture to a {:?} framebuffer",
                target, self.target
            )));
        }
        Ok(id)
    }

    /// Installs `texture` as color attachment `index`.
    ///
    /// A texture already at `index` is released. Every occupied color slot
    /// becomes a draw buffer. On failure `texture` is released and the
    /// slot keeps its previous occupant.
    pub fn attach_color_texture(
        &mut self,
        backend: &mut dyn RenderBackend,
        texture: impl Into<TextureRef>,
        index: u32,
    ) -> Result<(), BackendError> {
        let texture = texture.into();
        let id = match self.check_target(&texture) {
            Ok(id) => id,
            Err(err) => {
                texture.release(backend);
                return Err(err);
            }
        };

        let was_bound = self.bound;
        self.bind(backend);
        let mut draw_buffers = self.color_indices();
        if !draw_buffers.contains(&index) {
            draw_buffers.push(index);
            draw_buffers.sort_unstable();
        }
        let result = backend
            .attach_color(id, index, Some(texture.id()))
            .and_then(|_| backend.set_draw_buffers(id, &draw_buffers));
        if result.is_err() {
            let previous = self.colors.get(&index).map(TextureRef::id);
            if let Err(err) = backend.attach_color(id, index, previous) {
                log::warn!(
                    "color attachment {} of framebuffer {} not restored: {}",
                    index,
                    id.raw(),
                    err
                );
            }
        }
        if !was_bound {
            self.unbind(backend);
        }
        if let Err(err) = result {
            texture.release(backend);
            return Err(err);
        }

        if let Some(previous) = self.colors.insert(index, texture) {
            log::debug!("releasing color attachment {} of framebuffer {}", index, id.raw());
            previous.release(backend);
        }
        Ok(())
    }

    /// Installs `texture` as the depth attachment, releasing any previous one.
    ///
    /// On failure `texture` is released and the previous depth texture stays.
    pub fn attach_depth_texture(
        &mut self,
        backend: &mut dyn RenderBackend,
        texture: impl Into<TextureRef>,
    ) -> Result<(), BackendError> {
        let texture = texture.into();
        let id = match self.check_target(&texture) {
            Ok(id) => id,
            Err(err) => {
                texture.release(backend);
                return Err(err);
            }
        };

        let was_bound = self.bound;
        self.bind(backend);
        let result = backend.attach_depth(id, Some(texture.id()));
        if !was_bound {
            self.unbind(backend);
        }
        if let Err(err) = result {
            texture.release(backend);
            return Err(err);
        }

        if let Some(previous) = self.depth.replace(texture) {
            log::debug!("releasing depth attachment of framebuffer {}", id.raw());
            previous.release(backend);
        }
        Ok(())
    }

    /// Completeness as reported by the backend. The FBO is bound for the query.
    pub fn status(&mut self, backend: &mut dyn RenderBackend) -> FramebufferStatus {
        let Some(id) = self.id else {
            return FramebufferStatus::MissingAttachment;
        };
        let was_bound = self.bound;
        self.bind(backend);
        let status = backend.framebuffer_status(id);
        if !was_bound {
            self.unbind(backend);
        }
        status
    }

    pub fn is_complete(&mut self, backend: &mut dyn RenderBackend) -> bool {
        self.status(backend) == FramebufferStatus::Complete
    }

    /// Fails with a fatal setup error when the FBO is not complete.
    pub fn ensure_complete(&mut self, backend: &mut dyn RenderBackend) -> Result<(), SetupError> {
        match self.status(backend) {
            FramebufferStatus::Complete => Ok(()),
            status => {
                log::error!("framebuffer {:?} is incomplete: {:?}", self.id, status);
                Err(SetupError::IncompleteFramebuffer(status))
            }
        }
    }

    /// Releases all attachments and the backend framebuffer. Calling it
    /// again does nothing.
    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        for (_, texture) in mem::take(&mut self.colors) {
            texture.release(backend);
        }
        if let Some(depth) = self.depth.take() {
            depth.release(backend);
        }
        if self.bound {
            self.unbind(backend);
        }
        if let Some(id) = self.id.take() {
            backend.delete_framebuffer(id);
            log::debug!("deleted framebuffer {}", id.raw());
        }
    }

    fn endpoint(&self, color_attachment: u32) -> Result<BlitEndpoint, BackendError> {
        Ok(BlitEndpoint::Framebuffer {
            framebuffer: self.handle()?,
            color_attachment,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn blit(
        &self,
        backend: &mut dyn RenderBackend,
        source_index: u32,
        destination: BlitEndpoint,
        source_rect: Rect,
        destination_rect: Rect,
        mask: BufferMask,
        filter: FilterMode,
    ) -> Result<(), BackendError> {
        backend.blit(&BlitDescriptor {
            source: self.endpoint(source_index)?,
            source_rect,
            destination,
            destination_rect,
            mask,
            filter,
        })
    }

    /// Color, plus depth when a depth texture is attached.
    fn color_and_depth(&self) -> BufferMask {
        BufferMask {
            color: true,
            depth: self.depth.is_some(),
        }
    }

    /// Copies color attachment `index` (and depth, if attached) to the same
    /// rectangle of the screen.
    pub fn copy_to_screen(
        &self,
        backend: &mut dyn RenderBackend,
        index: u32,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_to_screen_region(backend, index, rect, rect)
    }

    pub fn copy_to_screen_region(
        &self,
        backend: &mut dyn RenderBackend,
        index: u32,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        let mask = self.color_and_depth();
        self.blit(
            backend,
            index,
            BlitEndpoint::Screen,
            source,
            destination,
            mask,
            FilterMode::Nearest,
        )
    }

    pub fn copy_color_to_screen(
        &self,
        backend: &mut dyn RenderBackend,
        index: u32,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_to_screen_region(backend, index, rect, rect)
    }

    pub fn copy_color_to_screen_region(
        &self,
        backend: &mut dyn RenderBackend,
        index: u32,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.blit(
            backend,
            index,
            BlitEndpoint::Screen,
            source,
            destination,
            BufferMask::COLOR,
            FilterMode::Nearest,
        )
    }

    pub fn copy_depth_to_screen(
        &self,
        backend: &mut dyn RenderBackend,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_depth_to_screen_region(backend, rect, rect)
    }

    pub fn copy_depth_to_screen_region(
        &self,
        backend: &mut dyn RenderBackend,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.blit(
            backend,
            0,
            BlitEndpoint::Screen,
            source,
            destination,
            BufferMask::DEPTH,
            FilterMode::Nearest,
        )
    }

    /// Copies color attachment 0 (and depth, if attached) into `other`.
    pub fn copy_to_fbo(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_to_fbo_region(backend, other, rect, rect)
    }

    pub fn copy_to_fbo_region(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        let mask = self.color_and_depth();
        self.blit(backend, 0, other.endpoint(0)?, source, destination, mask, FilterMode::Nearest)
    }

    pub fn copy_color_to_fbo(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_to_fbo_region(backend, other, rect, rect)
    }

    pub fn copy_color_to_fbo_region(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_attachment_to_fbo_region(backend, other, 0, 0, source, destination)
    }

    pub fn copy_color_to_fbo_smooth(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_to_fbo_region_smooth(backend, other, rect, rect)
    }

    pub fn copy_color_to_fbo_region_smooth(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_attachment_to_fbo_region_smooth(backend, other, 0, 0, source, destination)
    }

    /// Copies color attachment `source_index` into `other`'s attachment
    /// `destination_index`.
    pub fn copy_color_attachment_to_fbo(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source_index: u32,
        destination_index: u32,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_attachment_to_fbo_region(
            backend,
            other,
            source_index,
            destination_index,
            rect,
            rect,
        )
    }

    pub fn copy_color_attachment_to_fbo_region(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source_index: u32,
        destination_index: u32,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.blit(
            backend,
            source_index,
            other.endpoint(destination_index)?,
            source,
            destination,
            BufferMask::COLOR,
            FilterMode::Nearest,
        )
    }

    pub fn copy_color_attachment_to_fbo_smooth(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source_index: u32,
        destination_index: u32,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_color_attachment_to_fbo_region_smooth(
            backend,
            other,
            source_index,
            destination_index,
            rect,
            rect,
        )
    }

    pub fn copy_color_attachment_to_fbo_region_smooth(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source_index: u32,
        destination_index: u32,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.blit(
            backend,
            source_index,
            other.endpoint(destination_index)?,
            source,
            destination,
            BufferMask::COLOR,
            FilterMode::Linear,
        )
    }

    pub fn copy_depth_to_fbo(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        rect: Rect,
    ) -> Result<(), BackendError> {
        self.copy_depth_to_fbo_region(backend, other, rect, rect)
    }

    pub fn copy_depth_to_fbo_region(
        &self,
        backend: &mut dyn RenderBackend,
        other: &Fbo,
        source: Rect,
        destination: Rect,
    ) -> Result<(), BackendError> {
        self.blit(
            backend,
            0,
            other.endpoint(0)?,
            source,
            destination,
            BufferMask::DEPTH,
            FilterMode::Nearest,
        )
    }
}

impl Drop for Fbo {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            log::warn!(
                "framebuffer {} dropped without delete; {} attachments leak",
                id.raw(),
                self.colors.len() + self.depth.is_some() as usize
            );
        }
    }
}
