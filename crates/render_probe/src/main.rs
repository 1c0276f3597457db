//! Headless probe: renders a small layered scene through `GpuRenderEngine`
//! into an offscreen image and writes it out as PNG.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use render_engine::{GpuRenderEngine, RenderEngine, RenderEngineConfig, WgpuDriver};
use render_protocol::{ColorMatrix, IDENTITY_MATRIX, Mesh, Rect, Rotation};
use tracing::info;
use tracing_subscriber::EnvFilter;

const GRAYSCALE_MATRIX: ColorMatrix = [
    0.2126, 0.2126, 0.2126, 0.0, //
    0.7152, 0.7152, 0.7152, 0.0, //
    0.0722, 0.0722, 0.0722, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Parser)]
#[command(author, version, about = "Render a probe scene through the render engine")]
struct Arguments {
    /// Output PNG path.
    #[arg(long, short = 'o', value_parser, default_value = "render_probe.png")]
    output: PathBuf,
    #[arg(long, default_value_t = 256)]
    width: u32,
    #[arg(long, default_value_t = 256)]
    height: u32,
    /// Engine configuration (TOML).
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// Composite the nested group through a grayscale color transform.
    #[arg(long)]
    grayscale: bool,
    /// Print the engine state dump after rendering.
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arguments = Arguments::parse();
    if arguments.width == 0 || arguments.height == 0 {
        return Err(anyhow!("width and height must be non-zero"));
    }
    let config = match &arguments.config {
        Some(path) => RenderEngineConfig::load_from_path(path)?,
        None => RenderEngineConfig::default(),
    };

    let (device, queue) = pollster::block_on(request_device())?;
    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("render_probe.target"),
        size: wgpu::Extent3d {
            width: arguments.width,
            height: arguments.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let mut driver = WgpuDriver::new(device, queue);
    let image = driver.register_external_image(target);
    let mut engine = GpuRenderEngine::new(driver, config)?;

    let binding =
        engine.bind_image_as_framebuffer(image, true, arguments.width, arguments.height)?;
    if !binding.status.is_complete() {
        return Err(anyhow!("probe target is incomplete: {:?}", binding.status));
    }
    let group_transform = if arguments.grayscale {
        GRAYSCALE_MATRIX
    } else {
        IDENTITY_MATRIX
    };
    let scene = render_scene(
        &mut engine,
        arguments.width,
        arguments.height,
        &group_transform,
    );
    let pixels = engine.unbind_framebuffer(binding)?;
    scene?;
    let pixels = pixels.context("readback binding returned no pixels")?;

    if arguments.dump {
        let mut out = String::new();
        engine.dump(&mut out);
        println!("{out}");
    }

    let width = pixels.width;
    let height = pixels.height;
    let buffer = image::RgbaImage::from_raw(width, height, pixels.data)
        .context("readback size does not match its dimensions")?;
    buffer
        .save(&arguments.output)
        .with_context(|| format!("write {}", arguments.output.display()))?;
    info!(
        width,
        height,
        output = %arguments.output.display(),
        pipelines = engine.driver().pipeline_count(),
        "probe image written"
    );
    Ok(())
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .context("request adapter")?;
    let device_and_queue = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("render_probe.device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await
        .context("request device")?;
    Ok(device_and_queue)
}

/// Background, two opaque panels, a translucent layer group and a dim layer.
fn render_scene<E: RenderEngine>(
    engine: &mut E,
    width: u32,
    height: u32,
    group_transform: &ColorMatrix,
) -> Result<()> {
    engine.set_viewport_and_projection(
        width,
        height,
        Rect::from_size(width, height),
        height,
        false,
        Rotation::Rot0,
    )?;
    engine.clear_with_color(0.1, 0.1, 0.12, 1.0)?;

    let half_width = (width / 2) as i32;
    let half_height = (height / 2) as i32;
    engine.fill_region_with_color(
        &[
            Rect::new(0, 0, half_width, half_height),
            Rect::new(half_width, half_height, width as i32, height as i32),
        ],
        0.9,
        0.3,
        0.2,
        1.0,
    )?;

    let mut group = engine.scoped_group(group_transform)?;
    group.fill_region_with_color(
        &[Rect::new(
            (width / 4) as i32,
            (height / 4) as i32,
            (width * 3 / 4) as i32,
            (height * 3 / 4) as i32,
        )],
        0.2,
        0.6,
        0.9,
        1.0,
    )?;
    group.setup_dim_layer_blending(96);
    group.draw_mesh(&Mesh::textured_quad(
        width as f32 / 2.0,
        height as f32 / 2.0,
    ))?;
    group.end()?;

    engine.setup_layer_blending(false, false, 160);
    engine.setup_layer_blacked_out();
    engine.draw_mesh(&Mesh::textured_quad(
        width as f32 / 8.0,
        height as f32 / 8.0,
    ))?;
    engine.disable_texturing();
    engine.disable_blending();
    engine.verify_frame_boundary()?;
    Ok(())
}
