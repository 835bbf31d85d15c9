//! # Graphics Backend
//!
//! The narrow set of GPU primitives the meshes, textures and framebuffers of
//! this crate are built on. [`RenderBackend`] is object safe so resources
//! take `&mut dyn RenderBackend` and work unchanged on the wgpu backend and
//! on the CPU [`HeadlessBackend`].
//!
//! The model is immediate mode: one framebuffer (or the screen) is bound at
//! a time and clears, draws and blits act on it right away.

pub mod headless;
pub mod wgpu_backend;

use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::gfx::geometry::Geometry;

pub use headless::HeadlessBackend;
pub use wgpu_backend::WgpuBackend;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// Backend handle of a texture
    TextureId
);
handle!(
    /// Backend handle of a framebuffer object
    FramebufferId
);
handle!(
    /// Backend handle of an uploaded vertex array
    VertexArrayId
);

/// Texel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    R32Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn channels(self) -> u32 {
        match self {
            TextureFormat::R8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 1,
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba32Float => 4,
        }
    }

    /// Bytes per channel
    pub fn channel_size(self) -> u32 {
        match self {
            TextureFormat::R8Unorm | TextureFormat::Rg8Unorm | TextureFormat::Rgba8Unorm => 1,
            TextureFormat::R32Float | TextureFormat::Rgba32Float | TextureFormat::Depth32Float => 4,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        self.channels() * self.channel_size()
    }
}

/// Texture shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    Texture2DMultisample { samples: u32 },
    /// Six square layers in the order +X, -X, +Y, -Y, +Z, -Z
    CubeMap,
}

impl TextureTarget {
    pub fn samples(self) -> u32 {
        match self {
            TextureTarget::Texture2DMultisample { samples } => samples.max(1),
            _ => 1,
        }
    }

    pub fn layers(self) -> u32 {
        match self {
            TextureTarget::CubeMap => 6,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Everything needed to allocate a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub target: TextureTarget,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            target: TextureTarget::Texture2D,
            filter: FilterMode::Linear,
            wrap: WrapMode::ClampToEdge,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_target(mut self, target: TextureTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    /// Size of one full layer in bytes
    pub fn layer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel() as usize
    }
}

/// Primitive assembly mode for a vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Result of a framebuffer completeness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    /// No color attachment at all
    MissingAttachment,
    /// A texture of the wrong kind sits in a slot
    IncompleteAttachment,
    /// A draw buffer names an empty color slot
    IncompleteDrawBuffer,
    /// Attachments differ in size
    IncompleteDimensions,
    /// Attachments differ in sample count
    IncompleteMultisample,
}

/// Planes affected by clears and blits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferMask {
    pub color: bool,
    pub depth: bool,
}

impl BufferMask {
    pub const COLOR: Self = Self {
        color: true,
        depth: false,
    };
    pub const DEPTH: Self = Self {
        color: false,
        depth: true,
    };
    pub const ALL: Self = Self {
        color: true,
        depth: true,
    };

    pub fn is_empty(self) -> bool {
        !self.color && !self.depth
    }
}

/// Pixel rectangle. The origin is the bottom-left corner of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width` x `height` target
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One side of a blit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitEndpoint {
    Screen,
    Framebuffer {
        framebuffer: FramebufferId,
        /// Color attachment read from or written to
        color_attachment: u32,
    },
}

/// Rectangle-to-rectangle copy between framebuffers and the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlitDescriptor {
    pub source: BlitEndpoint,
    pub source_rect: Rect,
    pub destination: BlitEndpoint,
    pub destination_rect: Rect,
    pub mask: BufferMask,
    /// Resampling for color planes. Depth planes always use nearest.
    pub filter: FilterMode,
}

/// GPU primitives used by meshes, textures and framebuffers
///
/// Calls must come from a single thread. Binding is not reentrant: callers
/// pair `bind_framebuffer(Some(..))` with `bind_framebuffer(None)`.
pub trait RenderBackend {
    /// Human readable backend name, for logs
    fn name(&self) -> &str;

    /// Size of the default framebuffer
    fn screen_size(&self) -> (u32, u32);

    // Textures
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, BackendError>;
    /// Replaces all texels of `layer` with tightly packed `data`.
    fn write_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        data: &[u8],
    ) -> Result<(), BackendError>;
    /// Reads all texels of `layer`, tightly packed, bottom row first.
    fn read_texture(&mut self, texture: TextureId, layer: u32) -> Result<Vec<u8>, BackendError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn texture_descriptor(&self, texture: TextureId) -> Option<TextureDescriptor>;
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);

    // Framebuffers
    fn create_framebuffer(&mut self) -> Result<FramebufferId, BackendError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    /// Makes `framebuffer` the render target. `None` selects the screen.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn bound_framebuffer(&self) -> Option<FramebufferId>;
    fn attach_color(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        texture: Option<TextureId>,
    ) -> Result<(), BackendError>;
    fn attach_depth(
        &mut self,
        framebuffer: FramebufferId,
        texture: Option<TextureId>,
    ) -> Result<(), BackendError>;
    fn set_draw_buffers(
        &mut self,
        framebuffer: FramebufferId,
        indices: &[u32],
    ) -> Result<(), BackendError>;
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    fn set_clear_color(&mut self, color: [f32; 4]);
    /// Clears the draw buffers and depth of the bound target.
    fn clear(&mut self, mask: BufferMask) -> Result<(), BackendError>;
    fn blit(&mut self, desc: &BlitDescriptor) -> Result<(), BackendError>;

    // Render state
    fn set_depth_write(&mut self, enabled: bool);

    // Vertex arrays
    fn create_vertex_array(
        &mut self,
        geometry: &Geometry,
        topology: PrimitiveTopology,
    ) -> Result<VertexArrayId, BackendError>;
    /// Draws `instances` copies of the vertex array into the bound target.
    fn draw(&mut self, vertex_array: VertexArrayId, instances: u32) -> Result<(), BackendError>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);
}

/// Attachments of one framebuffer, as seen by the completeness check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentSet {
    pub colors: BTreeMap<u32, TextureDescriptor>,
    pub depth: Option<TextureDescriptor>,
    pub draw_buffers: Vec<u32>,
}

/// Completeness rules shared by every backend.
pub fn check_completeness(attachments: &AttachmentSet) -> FramebufferStatus {
    if attachments.colors.is_empty() {
        return FramebufferStatus::MissingAttachment;
    }
    if attachments.colors.values().any(|desc| desc.format.is_depth())
        || attachments.depth.as_ref().is_some_and(|desc| !desc.format.is_depth())
    {
        return FramebufferStatus::IncompleteAttachment;
    }
    if attachments
        .draw_buffers
        .iter()
        .any(|index| !attachments.colors.contains_key(index))
    {
        return FramebufferStatus::IncompleteDrawBuffer;
    }

    let mut all = attachments.colors.values().chain(attachments.depth.as_ref());
    let Some(first) = all.next() else {
        return FramebufferStatus::MissingAttachment;
    };
    let (size, samples) = ((first.width, first.height), first.target.samples());
    for desc in all {
        if (desc.width, desc.height) != size {
            return FramebufferStatus::IncompleteDimensions;
        }
        if desc.target.samples() != samples {
            return FramebufferStatus::IncompleteMultisample;
        }
    }

    FramebufferStatus::Complete
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(w: u32, h: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(w, h, TextureFormat::Rgba8Unorm)
    }

    fn depth(w: u32, h: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(w, h, TextureFormat::Depth32Float)
    }

    #[test]
    fn test_completeness_rules() {
        let mut set = AttachmentSet::default();
        assert_eq!(check_completeness(&set), FramebufferStatus::MissingAttachment);

        set.depth = Some(depth(4, 4));
        assert_eq!(check_completeness(&set), FramebufferStatus::MissingAttachment);

        set.colors.insert(0, color(4, 4));
        set.draw_buffers = vec![0];
        assert_eq!(check_completeness(&set), FramebufferStatus::Complete);

        set.draw_buffers = vec![0, 2];
        assert_eq!(check_completeness(&set), FramebufferStatus::IncompleteDrawBuffer);

        set.draw_buffers = vec![0];
        set.colors.insert(1, color(8, 4));
        assert_eq!(check_completeness(&set), FramebufferStatus::IncompleteDimensions);

        let multisample = TextureTarget::Texture2DMultisample { samples: 4 };
        set.colors.insert(1, color(4, 4).with_target(multisample));
        assert_eq!(check_completeness(&set), FramebufferStatus::IncompleteMultisample);

        set.colors.insert(1, depth(4, 4));
        assert_eq!(check_completeness(&set), FramebufferStatus::IncompleteAttachment);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(TextureFormat::Rgba8Unorm.bytes_per_texel(), 4);
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_texel(), 16);
        assert_eq!(TextureFormat::Depth32Float.bytes_per_texel(), 4);
        assert_eq!(TextureDescriptor::new_2d(3, 2, TextureFormat::Rg8Unorm).layer_size(), 12);
    }
}
