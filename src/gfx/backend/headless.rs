//! CPU implementation of [`RenderBackend`]
//!
//! Keeps every texture in memory as RGBA `f32` texels, performs blits with
//! real nearest/linear resampling and records draw calls instead of
//! rasterizing them. Used by the test-suite and by batch tools that run
//! without a GPU.

use std::collections::{BTreeMap, HashMap};

use super::{
    check_completeness, AttachmentSet, BlitDescriptor, BlitEndpoint, BufferMask, FilterMode,
    FramebufferId, FramebufferStatus, PrimitiveTopology, Rect, RenderBackend, TextureDescriptor,
    TextureFormat, TextureId, TextureTarget, VertexArrayId,
};
use crate::error::{BackendError, GeometryError};
use crate::gfx::geometry::{Alignment, Geometry};

type Texel = [f32; 4];

struct StoredTexture {
    desc: TextureDescriptor,
    /// One texel grid per layer, bottom row first
    layers: Vec<Vec<Texel>>,
}

#[derive(Default)]
struct StoredFramebuffer {
    colors: BTreeMap<u32, TextureId>,
    depth: Option<TextureId>,
    draw_buffers: Vec<u32>,
}

struct StoredVertexArray {
    vertex_count: usize,
    topology: PrimitiveTopology,
}

/// A draw recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub vertex_array: VertexArrayId,
    pub vertex_count: usize,
    pub instances: u32,
    pub topology: PrimitiveTopology,
    /// Bound framebuffer, `None` for the screen
    pub target: Option<FramebufferId>,
    /// Texture units bound at the time of the draw
    pub textures: BTreeMap<u32, TextureId>,
    pub depth_write: bool,
}

/// Plane of a blit endpoint resolved to texels
struct Plane {
    width: u32,
    height: u32,
    samples: u32,
}

pub struct HeadlessBackend {
    width: u32,
    height: u32,
    screen_color: Vec<Texel>,
    screen_depth: Vec<Texel>,
    textures: HashMap<TextureId, StoredTexture>,
    framebuffers: HashMap<FramebufferId, StoredFramebuffer>,
    vertex_arrays: HashMap<VertexArrayId, StoredVertexArray>,
    next_handle: u32,
    bound: Option<FramebufferId>,
    clear_color: [f32; 4],
    depth_write: bool,
    texture_units: BTreeMap<u32, TextureId>,
    draw_calls: Vec<DrawCall>,
    texture_deletes: HashMap<TextureId, usize>,
}

impl HeadlessBackend {
    /// Creates a backend whose screen is `width` x `height` texels.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texels = (width * height) as usize;
        log::debug!("headless backend with a {}x{} screen", width, height);

        Self {
            width,
            height,
            screen_color: vec![[0.0, 0.0, 0.0, 1.0]; texels],
            screen_depth: vec![[1.0, 0.0, 0.0, 0.0]; texels],
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            next_handle: 1,
            bound: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_write: true,
            texture_units: BTreeMap::new(),
            draw_calls: Vec::new(),
            texture_deletes: HashMap::new(),
        }
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Texel at (`x`, `y`) of the screen, origin bottom-left.
    pub fn screen_texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        (x < self.width && y < self.height)
            .then(|| self.screen_color[(y * self.width + x) as usize])
    }

    pub fn screen_depth(&self, x: u32, y: u32) -> Option<f32> {
        (x < self.width && y < self.height)
            .then(|| self.screen_depth[(y * self.width + x) as usize][0])
    }

    /// Texel at (`x`, `y`) of layer 0 of `texture`.
    pub fn texel(&self, texture: TextureId, x: u32, y: u32) -> Option<[f32; 4]> {
        let stored = self.textures.get(&texture)?;
        if x >= stored.desc.width || y >= stored.desc.height {
            return None;
        }
        Some(stored.layers[0][(y * stored.desc.width + x) as usize])
    }

    /// Sets every texel of every layer of `texture` to `value`.
    pub fn fill_texture(
        &mut self,
        texture: TextureId,
        value: [f32; 4],
    ) -> Result<(), BackendError> {
        let stored = self
            .textures
            .get_mut(&texture)
            .ok_or(BackendError::UnknownTexture(texture.raw()))?;
        for layer in &mut stored.layers {
            layer.fill(value);
        }
        Ok(())
    }

    /// How often `delete_texture` was called for `texture`.
    pub fn texture_delete_count(&self, texture: TextureId) -> usize {
        self.texture_deletes.get(&texture).copied().unwrap_or(0)
    }

    pub fn is_texture_alive(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    pub fn depth_write_enabled(&self) -> bool {
        self.depth_write
    }

    pub fn bound_textures(&self) -> &BTreeMap<u32, TextureId> {
        &self.texture_units
    }

    fn attachment_set(&self, framebuffer: &StoredFramebuffer) -> AttachmentSet {
        let describe = |id: &TextureId| self.textures.get(id).map(|t| t.desc.clone());
        AttachmentSet {
            colors: framebuffer
                .colors
                .iter()
                .filter_map(|(index, id)| describe(id).map(|desc| (*index, desc)))
                .collect(),
            depth: framebuffer.depth.as_ref().and_then(describe),
            draw_buffers: framebuffer.draw_buffers.clone(),
        }
    }

    fn require_complete(&self, framebuffer: FramebufferId) -> Result<(), BackendError> {
        match self.framebuffer_status(framebuffer) {
            FramebufferStatus::Complete => Ok(()),
            status => Err(BackendError::InvalidOperation(format!(
                "framebuffer {} is not complete ({status:?})",
                framebuffer.raw()
            ))),
        }
    }

    fn framebuffer(&self, framebuffer: FramebufferId) -> Result<&StoredFramebuffer, BackendError> {
        self.framebuffers
            .get(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))
    }

    /// Texture behind the color or depth plane of `endpoint`, `None` for the screen.
    fn plane_texture(
        &self,
        endpoint: BlitEndpoint,
        depth: bool,
    ) -> Result<Option<TextureId>, BackendError> {
        match endpoint {
            BlitEndpoint::Screen => Ok(None),
            BlitEndpoint::Framebuffer {
                framebuffer,
                color_attachment,
            } => {
                let stored = self.framebuffer(framebuffer)?;
                let texture = if depth {
                    stored.depth.ok_or_else(|| {
                        BackendError::InvalidOperation(format!(
                            "framebuffer {} has no depth attachment",
                            framebuffer.raw()
                        ))
                    })?
                } else {
                    *stored
                        .colors
                        .get(&color_attachment)
                        .ok_or(BackendError::MissingAttachment {
                            framebuffer: framebuffer.raw(),
                            index: color_attachment,
                        })?
                };
                Ok(Some(texture))
            }
        }
    }

    fn plane_info(&self, texture: Option<TextureId>) -> Result<Plane, BackendError> {
        match texture {
            None => Ok(Plane {
                width: self.width,
                height: self.height,
                samples: 1,
            }),
            Some(id) => {
                let stored = self.textures.get(&id).ok_or(BackendError::UnknownTexture(id.raw()))?;
                Ok(Plane {
                    width: stored.desc.width,
                    height: stored.desc.height,
                    samples: stored.desc.target.samples(),
                })
            }
        }
    }

    fn plane_texels(
        &self,
        texture: Option<TextureId>,
        depth: bool,
    ) -> Result<Vec<Texel>, BackendError> {
        match texture {
            None if depth => Ok(self.screen_depth.clone()),
            None => Ok(self.screen_color.clone()),
            Some(id) => self
                .textures
                .get(&id)
                .map(|t| t.layers[0].clone())
                .ok_or(BackendError::UnknownTexture(id.raw())),
        }
    }

    fn plane_texels_mut(
        &mut self,
        texture: Option<TextureId>,
        depth: bool,
    ) -> Result<&mut Vec<Texel>, BackendError> {
        match texture {
            None if depth => Ok(&mut self.screen_depth),
            None => Ok(&mut self.screen_color),
            Some(id) => self
                .textures
                .get_mut(&id)
                .map(|t| &mut t.layers[0])
                .ok_or(BackendError::UnknownTexture(id.raw())),
        }
    }

    fn blit_plane(&mut self, desc: &BlitDescriptor, depth: bool) -> Result<(), BackendError> {
        let src_texture = self.plane_texture(desc.source, depth)?;
        let dst_texture = self.plane_texture(desc.destination, depth)?;
        let src = self.plane_info(src_texture)?;
        let dst = self.plane_info(dst_texture)?;

        let (sr, dr) = (desc.source_rect, desc.destination_rect);
        if src.samples > 1 && (sr.width, sr.height) != (dr.width, dr.height) {
            return Err(BackendError::InvalidOperation(
                "multisampled blit source requires equal rectangle sizes".to_string(),
            ));
        }
        if dst.samples > 1 && src.samples != dst.samples {
            return Err(BackendError::InvalidOperation(
                "cannot blit into a multisampled target with a different sample count".to_string(),
            ));
        }

        let filter = if depth { FilterMode::Nearest } else { desc.filter };
        let source = self.plane_texels(src_texture, depth)?;
        let target = self.plane_texels_mut(dst_texture, depth)?;

        let scale_x = sr.width as f32 / dr.width as f32;
        let scale_y = sr.height as f32 / dr.height as f32;
        for dy in 0..dr.height {
            let ty = dr.y + dy as i32;
            if ty < 0 || ty >= dst.height as i32 {
                continue;
            }
            for dx in 0..dr.width {
                let tx = dr.x + dx as i32;
                if tx < 0 || tx >= dst.width as i32 {
                    continue;
                }
                let sx = sr.x as f32 + (dx as f32 + 0.5) * scale_x;
                let sy = sr.y as f32 + (dy as f32 + 0.5) * scale_y;
                let value = match filter {
                    FilterMode::Nearest => sample_nearest(&source, &src, sx, sy),
                    FilterMode::Linear => Some(sample_linear(&source, &src, sr, sx, sy)),
                };
                if let Some(value) = value {
                    target[(ty as u32 * dst.width + tx as u32) as usize] = value;
                }
            }
        }
        Ok(())
    }
}

fn sample_nearest(texels: &[Texel], plane: &Plane, x: f32, y: f32) -> Option<Texel> {
    let (ix, iy) = (x.floor() as i64, y.floor() as i64);
    if ix < 0 || iy < 0 || ix >= plane.width as i64 || iy >= plane.height as i64 {
        return None;
    }
    Some(texels[(iy as u32 * plane.width + ix as u32) as usize])
}

fn sample_linear(texels: &[Texel], plane: &Plane, rect: Rect, x: f32, y: f32) -> Texel {
    // clamp to texel centers inside both the source rect and the texture
    let min_x = rect.x.max(0) as f32 + 0.5;
    let min_y = rect.y.max(0) as f32 + 0.5;
    let max_x = ((rect.x + rect.width as i32).min(plane.width as i32) as f32 - 0.5).max(min_x);
    let max_y = ((rect.y + rect.height as i32).min(plane.height as i32) as f32 - 0.5).max(min_y);
    let x = x.clamp(min_x, max_x) - 0.5;
    let y = y.clamp(min_y, max_y) - 0.5;

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let clamp_x = |v: f32| (v as i64).clamp(0, plane.width as i64 - 1) as u32;
    let clamp_y = |v: f32| (v as i64).clamp(0, plane.height as i64 - 1) as u32;
    let (x0i, x1i) = (clamp_x(x0), clamp_x(x0 + 1.0));
    let (y0i, y1i) = (clamp_y(y0), clamp_y(y0 + 1.0));
    let at = |x: u32, y: u32| texels[(y * plane.width + x) as usize];

    let (a, b, c, d) = (at(x0i, y0i), at(x1i, y0i), at(x0i, y1i), at(x1i, y1i));
    let mut out = [0.0; 4];
    for i in 0..4 {
        let bottom = a[i] + (b[i] - a[i]) * fx;
        let top = c[i] + (d[i] - c[i]) * fx;
        out[i] = bottom + (top - bottom) * fy;
    }
    out
}

fn decode_texels(format: TextureFormat, data: &[u8]) -> Vec<Texel> {
    let bpt = format.bytes_per_texel() as usize;
    data.chunks_exact(bpt)
        .map(|texel| match format {
            TextureFormat::R8Unorm => [unorm(texel[0]), 0.0, 0.0, 1.0],
            TextureFormat::Rg8Unorm => [unorm(texel[0]), unorm(texel[1]), 0.0, 1.0],
            TextureFormat::Rgba8Unorm => [
                unorm(texel[0]),
                unorm(texel[1]),
                unorm(texel[2]),
                unorm(texel[3]),
            ],
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                [float(&texel[0..4]), 0.0, 0.0, 1.0]
            }
            TextureFormat::Rgba32Float => [
                float(&texel[0..4]),
                float(&texel[4..8]),
                float(&texel[8..12]),
                float(&texel[12..16]),
            ],
        })
        .collect()
}

fn encode_texels(format: TextureFormat, texels: &[Texel]) -> Vec<u8> {
    let mut out = Vec::with_capacity(texels.len() * format.bytes_per_texel() as usize);
    let channels = format.channels() as usize;
    for texel in texels {
        match format {
            TextureFormat::R8Unorm | TextureFormat::Rg8Unorm | TextureFormat::Rgba8Unorm => {
                out.extend(
                    texel[..channels]
                        .iter()
                        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8),
                );
            }
            TextureFormat::R32Float | TextureFormat::Depth32Float | TextureFormat::Rgba32Float => {
                for v in &texel[..channels] {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
    out
}

fn unorm(byte: u8) -> f32 {
    byte as f32 / 255.0
}

fn float(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, BackendError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::InvalidOperation(format!(
                "texture size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        if desc.target == TextureTarget::CubeMap && desc.width != desc.height {
            return Err(BackendError::InvalidOperation(
                "cube map faces must be square".to_string(),
            ));
        }

        let id = TextureId(self.allocate_handle());
        let texels = (desc.width * desc.height) as usize;
        let initial = if desc.format.is_depth() {
            [1.0, 0.0, 0.0, 1.0]
        } else {
            [0.0, 0.0, 0.0, 0.0]
        };
        self.textures.insert(
            id,
            StoredTexture {
                desc: desc.clone(),
                layers: vec![vec![initial; texels]; desc.target.layers() as usize],
            },
        );
        log::debug!(
            "created texture {} ({}x{} {:?} {:?})",
            id.raw(),
            desc.width,
            desc.height,
            desc.format,
            desc.target
        );
        Ok(id)
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let stored = self
            .textures
            .get_mut(&texture)
            .ok_or(BackendError::UnknownTexture(texture.raw()))?;
        if stored.desc.target.samples() > 1 {
            return Err(BackendError::InvalidOperation(
                "multisampled textures cannot be written from the CPU".to_string(),
            ));
        }
        let expected = stored.desc.layer_size();
        if data.len() != expected {
            return Err(BackendError::DataSize {
                expected,
                actual: data.len(),
            });
        }
        let format = stored.desc.format;
        let slot = stored.layers.get_mut(layer as usize).ok_or_else(|| {
            BackendError::InvalidOperation(format!(
                "texture {} has no layer {layer}",
                texture.raw()
            ))
        })?;
        *slot = decode_texels(format, data);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId, layer: u32) -> Result<Vec<u8>, BackendError> {
        let stored = self
            .textures
            .get(&texture)
            .ok_or(BackendError::UnknownTexture(texture.raw()))?;
        let texels = stored.layers.get(layer as usize).ok_or_else(|| {
            BackendError::InvalidOperation(format!(
                "texture {} has no layer {layer}",
                texture.raw()
            ))
        })?;
        Ok(encode_texels(stored.desc.format, texels))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        *self.texture_deletes.entry(texture).or_default() += 1;
        if self.textures.remove(&texture).is_none() {
            log::warn!("deleting unknown texture {}", texture.raw());
            return;
        }
        self.texture_units.retain(|_, bound| *bound != texture);
        log::debug!("deleted texture {}", texture.raw());
    }

    fn texture_descriptor(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.textures.get(&texture).map(|t| t.desc.clone())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        log::trace!("bind texture {:?} to unit {}", texture, unit);
        match texture {
            Some(texture) => {
                self.texture_units.insert(unit, texture);
            }
            None => {
                self.texture_units.remove(&unit);
            }
        }
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, BackendError> {
        let id = FramebufferId(self.allocate_handle());
        self.framebuffers.insert(id, StoredFramebuffer::default());
        log::debug!("created framebuffer {}", id.raw());
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            log::warn!("deleting unknown framebuffer {}", framebuffer.raw());
        }
        if self.bound == Some(framebuffer) {
            self.bound = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        log::trace!("bind framebuffer {:?}", framebuffer);
        self.bound = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound
    }

    fn attach_color(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    ) -> Result<(), BackendError> {
        if let Some(texture) = texture {
            if !self.textures.contains_key(&texture) {
                return Err(BackendError::UnknownTexture(texture.raw()));
            }
        }
        let stored = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        match texture {
            Some(texture) => stored.colors.insert(index, texture),
            None => stored.colors.remove(&index),
        };
        Ok(())
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferId,
        texture: Option<TextureId>,
    ) -> Result<(), BackendError> {
        if let Some(texture) = texture {
            if !self.textures.contains_key(&texture) {
                return Err(BackendError::UnknownTexture(texture.raw()));
            }
        }
        let stored = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        stored.depth = texture;
        Ok(())
    }

    fn set_draw_buffers(
        &mut self,
        framebuffer: FramebufferId,
        indices: &[u32],
    ) -> Result<(), BackendError> {
        let stored = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        stored.draw_buffers = indices.to_vec();
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        match self.framebuffers.get(&framebuffer) {
            Some(stored) => check_completeness(&self.attachment_set(stored)),
            None => FramebufferStatus::MissingAttachment,
        }
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear(&mut self, mask: BufferMask) -> Result<(), BackendError> {
        let color = self.clear_color;
        let clear_depth = mask.depth && self.depth_write;
        match self.bound {
            None => {
                if mask.color {
                    self.screen_color.fill(color);
                }
                if clear_depth {
                    self.screen_depth.fill([1.0, 0.0, 0.0, 1.0]);
                }
            }
            Some(framebuffer) => {
                self.require_complete(framebuffer)?;
                let stored = self.framebuffer(framebuffer)?;
                let mut targets: Vec<(TextureId, Texel)> = Vec::new();
                if mask.color {
                    targets.extend(
                        stored
                            .draw_buffers
                            .iter()
                            .filter_map(|index| stored.colors.get(index))
                            .map(|id| (*id, color)),
                    );
                }
                if clear_depth {
                    targets.extend(stored.depth.map(|id| (id, [1.0, 0.0, 0.0, 1.0])));
                }
                for (id, value) in targets {
                    if let Some(texture) = self.textures.get_mut(&id) {
                        texture.layers[0].fill(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn blit(&mut self, desc: &BlitDescriptor) -> Result<(), BackendError> {
        if desc.mask.is_empty() || desc.source_rect.is_empty() || desc.destination_rect.is_empty() {
            return Ok(());
        }
        log::trace!("blit {:?}", desc);
        if desc.mask.color {
            self.blit_plane(desc, false)?;
        }
        if desc.mask.depth {
            self.blit_plane(desc, true)?;
        }
        Ok(())
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
    }

    fn create_vertex_array(
        &mut self,
        geometry: &Geometry,
        topology: PrimitiveTopology,
    ) -> Result<VertexArrayId, BackendError> {
        if geometry.alignment() == Alignment::SingleBatch {
            return Err(GeometryError::SingleBatch.into());
        }
        let id = VertexArrayId(self.allocate_handle());
        self.vertex_arrays.insert(
            id,
            StoredVertexArray {
                vertex_count: geometry.vertex_count(),
                topology,
            },
        );
        log::debug!("created vertex array {} ({} vertices)", id.raw(), geometry.vertex_count());
        Ok(id)
    }

    fn draw(&mut self, vertex_array: VertexArrayId, instances: u32) -> Result<(), BackendError> {
        if let Some(framebuffer) = self.bound {
            self.require_complete(framebuffer)?;
        }
        let stored = self
            .vertex_arrays
            .get(&vertex_array)
            .ok_or(BackendError::UnknownVertexArray(vertex_array.raw()))?;
        self.draw_calls.push(DrawCall {
            vertex_array,
            vertex_count: stored.vertex_count,
            instances,
            topology: stored.topology,
            target: self.bound,
            textures: self.texture_units.clone(),
            depth_write: self.depth_write,
        });
        Ok(())
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if self.vertex_arrays.remove(&vertex_array).is_none() {
            log::warn!("deleting unknown vertex array {}", vertex_array.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_target(backend: &mut HeadlessBackend, w: u32, h: u32) -> (FramebufferId, TextureId) {
        let fb = backend.create_framebuffer().unwrap();
        let tex = backend
            .create_texture(&TextureDescriptor::new_2d(w, h, TextureFormat::Rgba32Float))
            .unwrap();
        backend.attach_color(fb, 0, Some(tex)).unwrap();
        backend.set_draw_buffers(fb, &[0]).unwrap();
        (fb, tex)
    }

    #[test]
    fn test_write_read_rgba8() {
        let mut backend = HeadlessBackend::new(4, 4);
        let tex = backend
            .create_texture(&TextureDescriptor::new_2d(2, 1, TextureFormat::Rgba8Unorm))
            .unwrap();
        let data = [255, 0, 128, 255, 0, 64, 0, 255];
        backend.write_texture(tex, 0, &data).unwrap();
        assert_eq!(backend.read_texture(tex, 0).unwrap(), data.to_vec());

        let short = backend.write_texture(tex, 0, &data[..4]);
        assert_eq!(
            short,
            Err(BackendError::DataSize {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_clear_only_touches_draw_buffers() {
        let mut backend = HeadlessBackend::new(4, 4);
        let (fb, tex) = color_target(&mut backend, 2, 2);
        let extra = backend
            .create_texture(&TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba32Float))
            .unwrap();
        backend.attach_color(fb, 1, Some(extra)).unwrap();

        backend.bind_framebuffer(Some(fb));
        backend.set_clear_color([1.0, 0.5, 0.25, 1.0]);
        backend.clear(BufferMask::ALL).unwrap();
        backend.bind_framebuffer(None);

        assert_eq!(backend.texel(tex, 1, 1), Some([1.0, 0.5, 0.25, 1.0]));
        assert_eq!(backend.texel(extra, 1, 1), Some([0.0, 0.0, 0.0, 0.0]));
        // screen untouched
        assert_eq!(backend.screen_texel(0, 0), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_nearest_blit_downscale_fills_destination() {
        let mut backend = HeadlessBackend::new(20, 10);
        let (fb, tex) = color_target(&mut backend, 20, 10);
        backend.fill_texture(tex, [0.2, 0.4, 0.6, 1.0]).unwrap();

        backend
            .blit(&BlitDescriptor {
                source: BlitEndpoint::Framebuffer {
                    framebuffer: fb,
                    color_attachment: 0,
                },
                source_rect: Rect::full(20, 10),
                destination: BlitEndpoint::Screen,
                destination_rect: Rect::new(4, 0, 4, 2),
                mask: BufferMask::COLOR,
                filter: FilterMode::Nearest,
            })
            .unwrap();

        for y in 0..2 {
            for x in 4..8 {
                assert_eq!(backend.screen_texel(x, y), Some([0.2, 0.4, 0.6, 1.0]));
            }
        }
        assert_eq!(backend.screen_texel(8, 0), Some([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(backend.screen_texel(4, 2), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_linear_blit_interpolates() {
        let mut backend = HeadlessBackend::new(4, 1);
        let fb = backend.create_framebuffer().unwrap();
        let tex = backend
            .create_texture(&TextureDescriptor::new_2d(2, 1, TextureFormat::R32Float))
            .unwrap();
        backend.attach_color(fb, 0, Some(tex)).unwrap();
        let data: Vec<u8> = [0.0f32, 1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        backend.write_texture(tex, 0, &data).unwrap();

        backend
            .blit(&BlitDescriptor {
                source: BlitEndpoint::Framebuffer {
                    framebuffer: fb,
                    color_attachment: 0,
                },
                source_rect: Rect::full(2, 1),
                destination: BlitEndpoint::Screen,
                destination_rect: Rect::full(4, 1),
                mask: BufferMask::COLOR,
                filter: FilterMode::Linear,
            })
            .unwrap();

        let red: Vec<f32> = (0..4).map(|x| backend.screen_texel(x, 0).unwrap()[0]).collect();
        assert_eq!(red[0], 0.0);
        assert!((red[1] - 0.25).abs() < 1e-6);
        assert!((red[2] - 0.75).abs() < 1e-6);
        assert_eq!(red[3], 1.0);
    }

    #[test]
    fn test_blit_missing_attachment_errors() {
        let mut backend = HeadlessBackend::new(4, 4);
        let (fb, _) = color_target(&mut backend, 4, 4);
        let result = backend.blit(&BlitDescriptor {
            source: BlitEndpoint::Framebuffer {
                framebuffer: fb,
                color_attachment: 3,
            },
            source_rect: Rect::full(4, 4),
            destination: BlitEndpoint::Screen,
            destination_rect: Rect::full(4, 4),
            mask: BufferMask::COLOR,
            filter: FilterMode::Nearest,
        });
        assert_eq!(
            result,
            Err(BackendError::MissingAttachment {
                framebuffer: fb.raw(),
                index: 3
            })
        );

        let depth = backend.blit(&BlitDescriptor {
            source: BlitEndpoint::Framebuffer {
                framebuffer: fb,
                color_attachment: 0,
            },
            source_rect: Rect::full(4, 4),
            destination: BlitEndpoint::Screen,
            destination_rect: Rect::full(4, 4),
            mask: BufferMask::DEPTH,
            filter: FilterMode::Nearest,
        });
        assert!(matches!(depth, Err(BackendError::InvalidOperation(_))));
    }

    #[test]
    fn test_draw_records_state() {
        let mut backend = HeadlessBackend::new(4, 4);
        let geometry = crate::gfx::geometry::plane(1.0, 1.0);
        let vao = backend.create_vertex_array(&geometry, PrimitiveTopology::Triangles).unwrap();
        backend.set_depth_write(false);
        backend.draw(vao, 3).unwrap();

        let call = &backend.draw_calls()[0];
        assert_eq!(call.vertex_count, 6);
        assert_eq!(call.instances, 3);
        assert_eq!(call.target, None);
        assert!(!call.depth_write);

        backend.delete_vertex_array(vao);
        assert_eq!(backend.draw(vao, 1), Err(BackendError::UnknownVertexArray(vao.raw())));
    }

    #[test]
    fn test_incomplete_target_rejects_draws() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fb = backend.create_framebuffer().unwrap();
        let vao = backend
            .create_vertex_array(
                &crate::gfx::geometry::plane(1.0, 1.0),
                PrimitiveTopology::Triangles,
            )
            .unwrap();
        backend.bind_framebuffer(Some(fb));
        assert!(backend.draw(vao, 1).is_err());
        assert!(backend.clear(BufferMask::COLOR).is_err());
    }
}
