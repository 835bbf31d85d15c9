//! Renders the G-buffer debug view offscreen and writes it to a PNG.
//!
//! Every attachment is filled with seeded noise so the layout of the
//! composite (primary attachment full screen, the rest as thumbnails along
//! the bottom edge) is visible without any shaders.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use pbr_kit::gfx::backend::{
    BlitDescriptor, BlitEndpoint, BufferMask, FilterMode, Rect, RenderBackend,
};
use pbr_kit::gfx::backend::{HeadlessBackend, WgpuBackend};
use pbr_kit::gfx::framebuffer::Fbo;
use pbr_kit::gfx::mesh::{obj, Mesh};
use pbr_kit::gfx::rendering::{FrameLimiter, GBuffer, ATTACHMENT_NAMES};
use pbr_kit::gfx::resources::noise_image;
use pbr_kit::RenderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU backend, no GPU required.
    #[default]
    Headless,
    /// wgpu on the first available adapter.
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "gbuffer_preview",
    about = "Composite a G-buffer debug view into a PNG"
)]
struct Args {
    /// OBJ mesh to render; a UV sphere is used when omitted.
    #[arg(long)]
    obj: Option<PathBuf>,

    /// Smooth normals for meshes without normals.
    #[arg(long)]
    smooth: bool,

    /// Flip the normals of the loaded mesh.
    #[arg(long)]
    invert_normals: bool,

    /// Output PNG.
    #[arg(long, short, default_value = "gbuffer_preview.png")]
    output: PathBuf,

    #[arg(long, default_value = "headless", value_enum)]
    backend: CliBackend,

    #[arg(long, default_value = "600")]
    width: u32,

    #[arg(long, default_value = "400")]
    height: u32,

    /// Color attachments of the G-buffer.
    #[arg(long, default_value = "6")]
    attachments: u32,

    /// Thumbnail size as a fraction of the screen.
    #[arg(long, default_value = "5")]
    divisor: u32,

    /// Frames to render before the screen is captured.
    #[arg(long, default_value = "1")]
    frames: u32,

    /// Upper frame rate while rendering.
    #[arg(long)]
    fps: Option<f64>,

    /// Noise seed.
    #[arg(long, default_value = "42")]
    seed: u64,
}

impl Args {
    fn config(&self) -> RenderConfig {
        RenderConfig {
            width: self.width,
            height: self.height,
            fps_limit: self.fps,
            thumbnail_divisor: self.divisor,
            attachments: self.attachments,
            ..RenderConfig::default()
        }
        .validated()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();

    let mut backend: Box<dyn RenderBackend> = match args.backend {
        CliBackend::Headless => Box::new(HeadlessBackend::new(config.width, config.height)),
        CliBackend::Wgpu => Box::new(
            WgpuBackend::new(config.width, config.height).context("failed to initialize wgpu")?,
        ),
    };
    log::info!(
        "{} backend, {}x{} screen",
        backend.name(),
        config.width,
        config.height
    );

    run(backend.as_mut(), &args, &config)
}

fn run(backend: &mut dyn RenderBackend, args: &Args, config: &RenderConfig) -> anyhow::Result<()> {
    let mut mesh = match &args.obj {
        Some(path) => obj::load(path, args.invert_normals, args.smooth)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Mesh::sphere(32, 16, 1.0),
    };
    let mut gbuffer = GBuffer::new(backend, config.width, config.height, config.attachments)
        .context("failed to set up the g-buffer")?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut limiter = FrameLimiter::new(config.fps_limit);
    backend.set_clear_color(config.clear_color);

    for frame in 0..args.frames.max(1) {
        limiter.begin_frame();

        if let Err(err) = gbuffer.render_pass(backend, |backend| mesh.render(backend)) {
            log::warn!("mesh not rasterized: {err}");
        }
        fill_with_noise(backend, &gbuffer, &mut rng)?;

        backend.bind_framebuffer(None);
        backend.clear(BufferMask::ALL)?;
        gbuffer
            .composite_debug_view(backend, 0, config.thumbnail_divisor)
            .context("failed to composite the debug view")?;

        limiter.finish_frame();
        log::debug!("frame {frame}: {}", limiter.fps_formatted());
    }

    capture_screen(backend, config, &args.output)?;
    log::info!("wrote {}", args.output.display());

    mesh.delete(backend);
    gbuffer.delete(backend);
    Ok(())
}

fn fill_with_noise(
    backend: &mut dyn RenderBackend,
    gbuffer: &GBuffer,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    for index in 0..gbuffer.attachments() {
        let Some(texture) = gbuffer.attachment(index) else {
            continue;
        };
        let image = noise_image(gbuffer.width(), gbuffer.height(), rng)?;
        texture.upload(backend, &image).with_context(|| {
            let name = ATTACHMENT_NAMES.get(index as usize).copied().unwrap_or("extra");
            format!("failed to fill attachment {index} ({name})")
        })?;
    }
    Ok(())
}

/// Copies the screen into an offscreen target and saves it top row first.
fn capture_screen(
    backend: &mut dyn RenderBackend,
    config: &RenderConfig,
    path: &Path,
) -> anyhow::Result<()> {
    let mut capture = Fbo::new(backend, config.width, config.height)?;
    let result = (|| -> anyhow::Result<()> {
        let framebuffer = capture.id().context("capture framebuffer missing")?;
        let full = Rect::full(config.width, config.height);
        backend.blit(&BlitDescriptor {
            source: BlitEndpoint::Screen,
            source_rect: full,
            destination: BlitEndpoint::Framebuffer {
                framebuffer,
                color_attachment: 0,
            },
            destination_rect: full,
            mask: BufferMask::COLOR,
            filter: FilterMode::Nearest,
        })?;

        let texture = capture.color_texture(0).context("capture texture missing")?;
        let mut image = texture.download_image(backend)?;
        image.flip_y();
        image
            .save_png(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    })();
    capture.delete(backend);
    result
}
