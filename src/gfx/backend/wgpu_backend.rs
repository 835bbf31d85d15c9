//! wgpu implementation of [`RenderBackend`]
//!
//! The default framebuffer is an offscreen color + depth texture pair sized
//! at construction; callers present it by copying from
//! [`WgpuBackend::screen_texture`]. Every clear, draw and blit records and
//! submits its own command buffer, matching the immediate-mode contract of
//! the trait.
//!
//! Texel rows are flipped on upload and readback so that row 0 is the
//! bottom row, like every other backend.

use std::collections::{BTreeMap, HashMap};

use wgpu::util::DeviceExt;

use super::{
    check_completeness, AttachmentSet, BlitDescriptor, BlitEndpoint, BufferMask, FilterMode,
    FramebufferId, FramebufferStatus, PrimitiveTopology, Rect, RenderBackend, TextureDescriptor,
    TextureFormat, TextureId, TextureTarget, VertexArrayId, WrapMode,
};
use crate::error::{BackendError, GeometryError, SetupError};
use crate::gfx::geometry::{Alignment, Geometry, ScalarType, VertexAttribute};

const BLIT_SHADER: &str = r#"
struct BlitParams {
    uv_offset: vec2<f32>,
    uv_scale: vec2<f32>,
};

@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: BlitParams;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    var out: VertexOutput;
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = params.uv_offset + vec2<f32>(x, y) * params.uv_scale;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source_texture, source_sampler, in.uv);
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitParams {
    uv_offset: [f32; 2],
    uv_scale: [f32; 2],
}

struct GpuTexture {
    desc: TextureDescriptor,
    texture: wgpu::Texture,
    /// View used for sampling (cube view for cube maps)
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

impl GpuTexture {
    fn layer_view(&self, layer: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("layer view"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    fn aspect(&self) -> wgpu::TextureAspect {
        if self.desc.format.is_depth() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        }
    }
}

#[derive(Default)]
struct GpuFramebuffer {
    colors: BTreeMap<u32, TextureId>,
    depth: Option<TextureId>,
    draw_buffers: Vec<u32>,
}

struct GpuVertexArray {
    buffers: Vec<wgpu::Buffer>,
    vertex_count: u32,
    topology: PrimitiveTopology,
}

/// Owned form of a `wgpu::VertexBufferLayout` for one vertex buffer
#[derive(Debug, Clone)]
pub struct VertexBufferLayoutDesc {
    pub array_stride: wgpu::BufferAddress,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexBufferLayoutDesc {
    pub fn as_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

/// Vertex buffer layouts matching the buffers [`WgpuBackend`] creates for `geometry`.
///
/// Multi-batch geometry yields one layout per attribute, interleaved geometry
/// a single layout.
pub fn vertex_buffer_layouts(geometry: &Geometry) -> Vec<VertexBufferLayoutDesc> {
    let attribute = |a: &VertexAttribute, offset: u64| wgpu::VertexAttribute {
        format: vertex_format(a),
        offset,
        shader_location: a.location,
    };
    match geometry.alignment() {
        Alignment::Interleaved | Alignment::SingleBatch => {
            let mut offset = 0;
            let attributes = geometry
                .layout()
                .iter()
                .map(|a| {
                    let attr = attribute(a, offset);
                    offset += a.byte_size();
                    attr
                })
                .collect();
            vec![VertexBufferLayoutDesc {
                array_stride: offset,
                attributes,
            }]
        }
        Alignment::MultiBatch => geometry
            .layout()
            .iter()
            .map(|a| VertexBufferLayoutDesc {
                array_stride: a.byte_size(),
                attributes: vec![attribute(a, 0)],
            })
            .collect(),
    }
}

fn vertex_format(attribute: &VertexAttribute) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as F;
    match (attribute.scalar, attribute.components) {
        (ScalarType::Float32, 1) => F::Float32,
        (ScalarType::Float32, 2) => F::Float32x2,
        (ScalarType::Float32, 3) => F::Float32x3,
        (ScalarType::Float32, _) => F::Float32x4,
        (ScalarType::Sint32, 1) => F::Sint32,
        (ScalarType::Sint32, 2) => F::Sint32x2,
        (ScalarType::Sint32, 3) => F::Sint32x3,
        (ScalarType::Sint32, _) => F::Sint32x4,
        (ScalarType::Uint32, 1) => F::Uint32,
        (ScalarType::Uint32, 2) => F::Uint32x2,
        (ScalarType::Uint32, 3) => F::Uint32x3,
        (ScalarType::Uint32, _) => F::Uint32x4,
    }
}

/// Packs `data` (vertex by vertex over `attributes`) into buffer bytes.
fn stream_bytes(attributes: &[VertexAttribute], data: &[f32]) -> Vec<u8> {
    let stride: usize = attributes.iter().map(|a| a.components as usize).sum();
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for vertex in data.chunks_exact(stride.max(1)) {
        let mut offset = 0;
        for attribute in attributes {
            let n = attribute.components as usize;
            for value in &vertex[offset..offset + n] {
                match attribute.scalar {
                    ScalarType::Float32 => bytes.extend_from_slice(bytemuck::bytes_of(value)),
                    ScalarType::Sint32 => bytes.extend_from_slice(&(*value as i32).to_le_bytes()),
                    ScalarType::Uint32 => bytes.extend_from_slice(&(*value as u32).to_le_bytes()),
                }
            }
            offset += n;
        }
    }
    bytes
}

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Points => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn filterable(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::R8Unorm | TextureFormat::Rg8Unorm | TextureFormat::Rgba8Unorm
    )
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

/// Reverses the row order of tightly packed texel data.
fn flip_rows(data: &[u8], row_bytes: usize) -> Vec<u8> {
    data.chunks_exact(row_bytes.max(1)).rev().flatten().copied().collect()
}

/// Converts a bottom-left origin rect into a top-left origin origin/extent,
/// or `None` when it does not lie fully inside a `height` tall target.
fn to_top_left(rect: Rect, width: u32, height: u32) -> Option<(u32, u32)> {
    if rect.x < 0 || rect.y < 0 {
        return None;
    }
    let (x, y) = (rect.x as u32, rect.y as u32);
    if x + rect.width > width || y + rect.height > height {
        return None;
    }
    Some((x, height - (y + rect.height)))
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    screen_color: GpuTexture,
    screen_depth: GpuTexture,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, GpuFramebuffer>,
    vertex_arrays: HashMap<VertexArrayId, GpuVertexArray>,
    next_handle: u32,
    bound: Option<FramebufferId>,
    clear_color: wgpu::Color,
    depth_write: bool,
    texture_units: BTreeMap<u32, TextureId>,
    pipeline: Option<(wgpu::RenderPipeline, Vec<wgpu::BindGroup>)>,
    blit_pipelines:
        HashMap<(wgpu::TextureFormat, bool), (wgpu::RenderPipeline, wgpu::BindGroupLayout)>,
}

impl WgpuBackend {
    /// Opens a headless device and creates a `width` x `height` screen target.
    pub fn new(width: u32, height: u32) -> Result<Self, SetupError> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> Result<Self, SetupError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| SetupError::Device(err.to_string()))?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pbr-kit device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| SetupError::Device(err.to_string()))?;

        Ok(Self::from_device(device, queue, width, height))
    }

    /// Wraps an existing device, for embedding in an application that owns one.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let screen_color = Self::allocate(
            &device,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm)
                .with_label("screen color"),
        );
        let screen_depth = Self::allocate(
            &device,
            &TextureDescriptor::new_2d(width, height, TextureFormat::Depth32Float)
                .with_label("screen depth"),
        );

        Self {
            device,
            queue,
            width,
            height,
            screen_color,
            screen_depth,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            next_handle: 1,
            bound: None,
            clear_color: wgpu::Color::BLACK,
            depth_write: true,
            texture_units: BTreeMap::new(),
            pipeline: None,
            blit_pipelines: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color texture acting as the default framebuffer
    pub fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen_color.texture
    }

    /// View and sampler of `texture`, for building bind groups.
    pub fn texture_binding(
        &self,
        texture: TextureId,
    ) -> Option<(&wgpu::TextureView, &wgpu::Sampler)> {
        self.textures.get(&texture).map(|t| (&t.view, &t.sampler))
    }

    /// Texture units set through [`RenderBackend::bind_texture`].
    pub fn bound_textures(&self) -> &BTreeMap<u32, TextureId> {
        &self.texture_units
    }

    /// Whether pipelines built for the next draw should write depth.
    pub fn depth_write_enabled(&self) -> bool {
        self.depth_write
    }

    /// Pipeline and bind groups used by subsequent draws.
    pub fn set_pipeline(
        &mut self,
        pipeline: wgpu::RenderPipeline,
        bind_groups: Vec<wgpu::BindGroup>,
    ) {
        self.pipeline = Some((pipeline, bind_groups));
    }

    pub fn clear_pipeline(&mut self) {
        self.pipeline = None;
    }

    fn allocate(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
        let samples = desc.target.samples();
        let format = texture_format(desc.format);
        let usage = if samples > 1 {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.target.layers(),
            },
            mip_level_count: 1,
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(match desc.target {
                TextureTarget::CubeMap => wgpu::TextureViewDimension::Cube,
                _ => wgpu::TextureViewDimension::D2,
            }),
            ..Default::default()
        });
        let filter = if filterable(desc.format) {
            filter_mode(desc.filter)
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: address_mode(desc.wrap),
            address_mode_v: address_mode(desc.wrap),
            address_mode_w: address_mode(desc.wrap),
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        GpuTexture {
            desc: desc.clone(),
            texture,
            view,
            sampler,
        }
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, BackendError> {
        self.textures.get(&id).ok_or(BackendError::UnknownTexture(id.raw()))
    }

    fn framebuffer(&self, id: FramebufferId) -> Result<&GpuFramebuffer, BackendError> {
        self.framebuffers
            .get(&id)
            .ok_or(BackendError::UnknownFramebuffer(id.raw()))
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

    /// Color views to draw into and the depth view of the bound target.
    fn target_views(
        &self,
    ) -> Result<(Vec<wgpu::TextureView>, Option<wgpu::TextureView>), BackendError> {
        match self.bound {
            None => Ok((
                vec![self.screen_color.layer_view(0)],
                Some(self.screen_depth.layer_view(0)),
            )),
            Some(id) => {
                self.require_complete(id)?;
                let fb = self.framebuffer(id)?;
                let mut colors = Vec::with_capacity(fb.draw_buffers.len());
                for index in &fb.draw_buffers {
                    if let Some(texture) = fb.colors.get(index) {
                        colors.push(self.texture(*texture)?.layer_view(0));
                    }
                }
                let depth = match fb.depth {
                    Some(texture) => Some(self.texture(texture)?.layer_view(0)),
                    None => None,
                };
                Ok((colors, depth))
            }
        }
    }

    fn endpoint_texture(
        &self,
        endpoint: BlitEndpoint,
        depth: bool,
    ) -> Result<&GpuTexture, BackendError> {
        match endpoint {
            BlitEndpoint::Screen if depth => Ok(&self.screen_depth),
            BlitEndpoint::Screen => Ok(&self.screen_color),
            BlitEndpoint::Framebuffer {
                framebuffer,
                color_attachment,
            } => {
                let fb = self.framebuffer(framebuffer)?;
                let id = if depth {
                    fb.depth.ok_or_else(|| {
                        BackendError::InvalidOperation(format!(
                            "framebuffer {} has no depth attachment",
                            framebuffer.raw()
                        ))
                    })?
                } else {
                    *fb.colors
                        .get(&color_attachment)
                        .ok_or(BackendError::MissingAttachment {
                            framebuffer: framebuffer.raw(),
                            index: color_attachment,
                        })?
                };
                self.texture(id)
            }
        }
    }

    fn ensure_blit_pipeline(&mut self, format: wgpu::TextureFormat, filtering: bool) {
        if self.blit_pipelines.contains_key(&(format, filtering)) {
            return;
        }
        log::debug!("creating blit pipeline for {:?} (filtering: {})", format, filtering);

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: filtering },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(if filtering {
                        wgpu::SamplerBindingType::Filtering
                    } else {
                        wgpu::SamplerBindingType::NonFiltering
                    }),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        self.blit_pipelines.insert((format, filtering), (pipeline, layout));
    }

    fn blit_color(&mut self, desc: &BlitDescriptor) -> Result<(), BackendError> {
        let (src_desc, dst_desc) = {
            let src = self.endpoint_texture(desc.source, false)?;
            let dst = self.endpoint_texture(desc.destination, false)?;
            (src.desc.clone(), dst.desc.clone())
        };
        let (sr, dr) = (desc.source_rect, desc.destination_rect);
        let same_size = (sr.width, sr.height) == (dr.width, dr.height);

        if src_desc.target.samples() > 1 {
            return self.resolve(desc, &src_desc, &dst_desc);
        }
        if dst_desc.target.samples() > 1 {
            return Err(BackendError::Unsupported(
                "blitting into a multisampled texture".to_string(),
            ));
        }

        let src_origin = to_top_left(sr, src_desc.width, src_desc.height);
        let dst_origin = to_top_left(dr, dst_desc.width, dst_desc.height);
        if let (true, true, Some(src_origin), Some(dst_origin)) = (
            same_size,
            src_desc.format == dst_desc.format,
            src_origin,
            dst_origin,
        ) {
            let src = self.endpoint_texture(desc.source, false)?;
            let dst = self.endpoint_texture(desc.destination, false)?;
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("blit copy"),
                });
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &src.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: src_origin.0,
                        y: src_origin.1,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &dst.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: dst_origin.0,
                        y: dst_origin.1,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: sr.width,
                    height: sr.height,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(std::iter::once(encoder.finish()));
            return Ok(());
        }

        let filtering = desc.filter == FilterMode::Linear && filterable(src_desc.format);
        let dst_format = texture_format(dst_desc.format);
        self.ensure_blit_pipeline(dst_format, filtering);

        let (pipeline, layout) = self
            .blit_pipelines
            .get(&(dst_format, filtering))
            .ok_or_else(|| BackendError::InvalidOperation("blit pipeline missing".to_string()))?;
        let src = self.endpoint_texture(desc.source, false)?;
        let dst = self.endpoint_texture(desc.destination, false)?;

        let (sw, sh) = (src_desc.width as f32, src_desc.height as f32);
        let params = BlitParams {
            uv_offset: [
                sr.x as f32 / sw,
                (sh - (sr.y as f32 + sr.height as f32)) / sh,
            ],
            uv_scale: [sr.width as f32 / sw, sr.height as f32 / sh],
        };
        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let filter = if filtering {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        let source_view = src.layer_view(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
        });

        // viewport in top-left coordinates, clipped by the scissor below
        let vx = dr.x as f32;
        let vy = dst_desc.height as f32 - (dr.y as f32 + dr.height as f32);
        let x0 = dr.x.max(0) as u32;
        let x1 = (dr.x + dr.width as i32).clamp(0, dst_desc.width as i32) as u32;
        let height = dst_desc.height as i32;
        let y_top = (height - (dr.y + dr.height as i32)).clamp(0, height) as u32;
        let y_bottom = (height - dr.y).clamp(0, height) as u32;
        if x1 <= x0 || y_bottom <= y_top {
            return Ok(());
        }

        let target_view = dst.layer_view(0);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("blit") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(vx, vy, dr.width as f32, dr.height as f32, 0.0, 1.0);
            pass.set_scissor_rect(x0, y_top, x1 - x0, y_bottom - y_top);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Multisample resolve. Only whole, equally sized textures can be resolved.
    fn resolve(
        &self,
        desc: &BlitDescriptor,
        src_desc: &TextureDescriptor,
        dst_desc: &TextureDescriptor,
    ) -> Result<(), BackendError> {
        let full_src = desc.source_rect == Rect::full(src_desc.width, src_desc.height);
        let full_dst = desc.destination_rect == Rect::full(dst_desc.width, dst_desc.height);
        if !full_src
            || !full_dst
            || src_desc.format != dst_desc.format
            || dst_desc.target.samples() != 1
        {
            return Err(BackendError::Unsupported(
                "multisample resolve of partial regions or different formats".to_string(),
            ));
        }

        let src_view = self.endpoint_texture(desc.source, false)?.layer_view(0);
        let dst_view = self.endpoint_texture(desc.destination, false)?.layer_view(0);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("resolve") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("resolve pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &src_view,
                    resolve_target: Some(&dst_view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Depth planes can only be copied whole between equally sized textures.
    fn blit_depth(&self, desc: &BlitDescriptor) -> Result<(), BackendError> {
        let src = self.endpoint_texture(desc.source, true)?;
        let dst = self.endpoint_texture(desc.destination, true)?;
        let full = Rect::full(src.desc.width, src.desc.height);
        if desc.source_rect != full
            || desc.destination_rect != full
            || (dst.desc.width, dst.desc.height) != (src.desc.width, src.desc.height)
            || src.desc.target.samples() != 1
            || dst.desc.target.samples() != 1
        {
            return Err(BackendError::Unsupported(
                "depth blits must copy whole, equally sized single-sample textures".to_string(),
            ));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("depth copy") });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: src.desc.width,
                height: src.desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
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

        let texture = Self::allocate(&self.device, desc);
        let id = TextureId(self.allocate_handle());
        self.textures.insert(id, texture);
        log::debug!("created texture {} ({:?})", id.raw(), desc);
        Ok(id)
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let gpu = self.texture(texture)?;
        if gpu.desc.target.samples() > 1 {
            return Err(BackendError::InvalidOperation(
                "multisampled textures cannot be written from the CPU".to_string(),
            ));
        }
        if layer >= gpu.desc.target.layers() {
            return Err(BackendError::InvalidOperation(format!(
                "texture {} has no layer {layer}",
                texture.raw()
            )));
        }
        let expected = gpu.desc.layer_size();
        if data.len() != expected {
            return Err(BackendError::DataSize {
                expected,
                actual: data.len(),
            });
        }

        let row_bytes = gpu.desc.width * gpu.desc.format.bytes_per_texel();
        let flipped = flip_rows(data, row_bytes as usize);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: gpu.aspect(),
            },
            &flipped,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(gpu.desc.height),
            },
            wgpu::Extent3d {
                width: gpu.desc.width,
                height: gpu.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId, layer: u32) -> Result<Vec<u8>, BackendError> {
        let gpu = self.texture(texture)?;
        if gpu.desc.target.samples() > 1 {
            return Err(BackendError::Unsupported(
                "reading multisampled textures".to_string(),
            ));
        }
        if layer >= gpu.desc.target.layers() {
            return Err(BackendError::InvalidOperation(format!(
                "texture {} has no layer {layer}",
                texture.raw()
            )));
        }

        let row_bytes = gpu.desc.width * gpu.desc.format.bytes_per_texel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = row_bytes.div_ceil(align) * align;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture readback"),
            size: (padded * gpu.desc.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: gpu.aspect(),
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(gpu.desc.height),
                },
            },
            wgpu::Extent3d {
                width: gpu.desc.width,
                height: gpu.desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| BackendError::InvalidOperation(err.to_string()))?;

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {
                let mapped = slice.get_mapped_range();
                let rows: Vec<u8> = mapped
                    .chunks_exact(padded as usize)
                    .flat_map(|row| row[..row_bytes as usize].iter().copied())
                    .collect();
                drop(mapped);
                staging.unmap();
                Ok(flip_rows(&rows, row_bytes as usize))
            }
            Ok(Err(err)) => Err(BackendError::InvalidOperation(err.to_string())),
            Err(_) => Err(BackendError::InvalidOperation(
                "readback callback dropped".to_string(),
            )),
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        match self.textures.remove(&texture) {
            Some(gpu) => {
                gpu.texture.destroy();
                self.texture_units.retain(|_, bound| *bound != texture);
                log::debug!("deleted texture {}", texture.raw());
            }
            None => log::warn!("deleting unknown texture {}", texture.raw()),
        }
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
        self.framebuffers.insert(id, GpuFramebuffer::default());
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
            self.texture(texture)?;
        }
        let fb = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        match texture {
            Some(texture) => fb.colors.insert(index, texture),
            None => fb.colors.remove(&index),
        };
        Ok(())
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferId,
        texture: Option<TextureId>,
    ) -> Result<(), BackendError> {
        if let Some(texture) = texture {
            self.texture(texture)?;
        }
        let fb = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        fb.depth = texture;
        Ok(())
    }

    fn set_draw_buffers(
        &mut self,
        framebuffer: FramebufferId,
        indices: &[u32],
    ) -> Result<(), BackendError> {
        let fb = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or(BackendError::UnknownFramebuffer(framebuffer.raw()))?;
        fb.draw_buffers = indices.to_vec();
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::MissingAttachment;
        };
        let describe = |id: &TextureId| self.textures.get(id).map(|t| t.desc.clone());
        check_completeness(&AttachmentSet {
            colors: fb
                .colors
                .iter()
                .filter_map(|(index, id)| describe(id).map(|desc| (*index, desc)))
                .collect(),
            depth: fb.depth.as_ref().and_then(describe),
            draw_buffers: fb.draw_buffers.clone(),
        })
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
    }

    fn clear(&mut self, mask: BufferMask) -> Result<(), BackendError> {
        let (colors, depth) = self.target_views()?;
        let colors = if mask.color { colors } else { Vec::new() };
        let depth = depth.filter(|_| mask.depth && self.depth_write);
        if colors.is_empty() && depth.is_none() {
            return Ok(());
        }

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn blit(&mut self, desc: &BlitDescriptor) -> Result<(), BackendError> {
        if desc.mask.is_empty() || desc.source_rect.is_empty() || desc.destination_rect.is_empty() {
            return Ok(());
        }
        log::trace!("blit {:?}", desc);
        if desc.mask.color {
            self.blit_color(desc)?;
        }
        if desc.mask.depth {
            self.blit_depth(desc)?;
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
        let buffers = match geometry.alignment() {
            Alignment::SingleBatch => return Err(GeometryError::SingleBatch.into()),
            Alignment::Interleaved => vec![stream_bytes(geometry.layout(), &geometry.data()[0])],
            Alignment::MultiBatch => geometry
                .layout()
                .iter()
                .zip(geometry.data())
                .map(|(attribute, stream)| stream_bytes(std::slice::from_ref(attribute), stream))
                .collect(),
        };

        let buffers = buffers
            .iter()
            .map(|bytes| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("vertex buffer"),
                    contents: bytes,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                })
            })
            .collect();

        let id = VertexArrayId(self.allocate_handle());
        self.vertex_arrays.insert(
            id,
            GpuVertexArray {
                buffers,
                vertex_count: geometry.vertex_count() as u32,
                topology,
            },
        );
        log::debug!("created vertex array {} ({} vertices)", id.raw(), geometry.vertex_count());
        Ok(id)
    }

    fn draw(&mut self, vertex_array: VertexArrayId, instances: u32) -> Result<(), BackendError> {
        let (colors, depth) = self.target_views()?;
        let vao = self
            .vertex_arrays
            .get(&vertex_array)
            .ok_or(BackendError::UnknownVertexArray(vertex_array.raw()))?;
        let (pipeline, bind_groups) = self.pipeline.as_ref().ok_or_else(|| {
            BackendError::InvalidOperation("no pipeline set for draw".to_string())
        })?;
        log::trace!(
            "draw vertex array {} ({:?}, {} instances)",
            vertex_array.raw(),
            vao.topology,
            instances
        );

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("draw") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            for (index, group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            for (slot, buffer) in vao.buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.draw(0..vao.vertex_count, 0..instances);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        match self.vertex_arrays.remove(&vertex_array) {
            Some(vao) => {
                for buffer in vao.buffers {
                    buffer.destroy();
                }
            }
            None => log::warn!("deleting unknown vertex array {}", vertex_array.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry;

    #[test]
    fn test_vertex_layouts_follow_alignment() {
        let sphere = geometry::sphere(2, 2, 1.0);
        let batched = vertex_buffer_layouts(&sphere);
        assert_eq!(batched.len(), 3);
        assert_eq!(batched[0].array_stride, 12);
        assert_eq!(batched[1].array_stride, 8);
        assert_eq!(batched[2].attributes[0].shader_location, 2);

        let packed = vertex_buffer_layouts(&sphere.to_interleaved().unwrap());
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].array_stride, 32);
        let offsets: Vec<u64> = packed[0].attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        assert_eq!(packed[0].attributes[1].format, wgpu::VertexFormat::Float32x2);
    }

    #[test]
    fn test_stream_bytes_converts_integers() {
        let attributes = [
            VertexAttribute::new("position", 0, 2),
            VertexAttribute::new("id", 1, 1).with_scalar(ScalarType::Uint32),
        ];
        let bytes = stream_bytes(&attributes, &[1.0, 2.0, 7.0]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_flip_rows_and_origin() {
        let data = [1, 2, 3, 4, 5, 6];
        assert_eq!(flip_rows(&data, 2), vec![5, 6, 3, 4, 1, 2]);

        assert_eq!(to_top_left(Rect::new(0, 0, 4, 2), 8, 8), Some((0, 6)));
        assert_eq!(to_top_left(Rect::new(2, 6, 2, 2), 8, 8), Some((2, 0)));
        assert_eq!(to_top_left(Rect::new(-1, 0, 2, 2), 8, 8), None);
        assert_eq!(to_top_left(Rect::new(7, 0, 2, 2), 8, 8), None);
    }
}
