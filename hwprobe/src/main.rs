use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ffmpeg_next::media::Type;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ffmpeg_decode::{
    Backend, CodecKind, CopyMode, DisplayKind, EnvToggles, MapRequest, Mapped, PixelFormat,
    VideoDecoder, VideoDecoderConfig, VideoFrame, backend_supports, probe,
};
use ffmpeg_transform::{CopyTier, VideoTransform, VideoTransformConfig};

#[derive(Parser, Debug)]
#[command(name = "hwprobe")]
#[command(about = "Hardware video decoding diagnostics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print what this machine offers for hardware decoding
    Caps,
    /// Decode a file and report how frames were produced
    Decode(DecodeArgs),
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    /// Media file to decode
    file: PathBuf,

    /// Backend to use (cuda, vaapi, d3d11, dxva2, videotoolbox)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// How frames reach host memory (zero-copy, optimized, generic)
    #[arg(short, long)]
    copy_mode: Option<CopyMode>,

    /// Stop after this many frames
    #[arg(short = 'n', long, default_value = "300")]
    frames: usize,

    /// Decoder threads, 0 lets FFmpeg decide
    #[arg(short, long, default_value = "0")]
    threads: usize,

    /// Native display for VA-API (auto, x11, drm, egl)
    #[arg(long)]
    display: Option<DisplayKind>,

    /// Device node or adapter to open
    #[arg(long)]
    device: Option<String>,

    /// Write the first decoded frame as a PNG
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HWPROBE_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Caps => caps(),
        Command::Decode(args) => decode(args),
    }
}

fn caps() -> Result<()> {
    const CODECS: [CodecKind; 10] = [
        CodecKind::H264,
        CodecKind::Hevc,
        CodecKind::Vp8,
        CodecKind::Vp9,
        CodecKind::Av1,
        CodecKind::Mpeg1,
        CodecKind::Mpeg2,
        CodecKind::Mpeg4,
        CodecKind::H263,
        CodecKind::Vc1,
    ];

    println!("Copy tier: {}", CopyTier::detect().name());

    let env = EnvToggles::get();
    if let Some(mode) = env.copy_mode {
        println!("Copy mode override: {mode}");
    }
    if env.no_simd {
        println!("SIMD copies disabled");
    }

    println!("Backends:");
    for &backend in Backend::platform_defaults() {
        let codecs: Vec<&str> = CODECS
            .iter()
            .filter(|&&codec| backend_supports(backend, codec))
            .map(|codec| codec.name())
            .collect();
        println!("  {:<14} {}", backend.api_name(), codecs.join(" "));
    }

    match probe::capabilities() {
        Ok(caps) => {
            println!("Rendering context:");
            println!("  Platform:   {}", caps.platform);
            println!("  Version:    {}", caps.version);
            println!("  Renderer:   {}", caps.renderer);
            println!("  Vendor:     {}", caps.vendor);
            if let Some(name) = caps.vendor_id().and_then(probe::vendor_name) {
                println!("  Adapter:    {name}");
            }
            println!("  GL ext:     {}", caps.gl_extensions.len());
            println!("  EGL ext:    {}", caps.egl_extensions.len());
        }
        Err(e) => println!("Rendering context: none ({e})"),
    }

    Ok(())
}

fn decode(args: DecodeArgs) -> Result<()> {
    ffmpeg_next::init().context("failed to initialize FFmpeg")?;

    let mut input = ffmpeg_next::format::input(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let (index, parameters, time_base) = {
        let stream = input
            .streams()
            .best(Type::Video)
            .context("no video stream")?;
        (stream.index(), stream.parameters(), stream.time_base())
    };

    let mut config = match args.backend {
        Some(backend) => VideoDecoderConfig::with_backend(backend),
        None => VideoDecoderConfig::with_hw_accel(),
    }
    .threads(args.threads);
    if let Some(mode) = args.copy_mode {
        config = config.copy_mode(mode);
    }
    if let Some(display) = args.display {
        config = config.display(display);
    }
    if let Some(device) = args.device {
        config = config.device_path(device);
    }

    let mut decoder = VideoDecoder::new(parameters, time_base, config)?;
    info!("decoding {} with {}", args.file.display(), decoder.description());

    let mut decoded = 0;
    let mut gpu_frames = 0;
    let mut dumped = args.dump.is_none();

    let mut handle = |frames: Vec<VideoFrame>| -> Result<bool> {
        for frame in frames {
            decoded += 1;
            if frame.is_gpu() {
                gpu_frames += 1;
            }
            if !dumped && let Some(path) = &args.dump {
                dump(&frame, path)?;
                dumped = true;
            }
            if decoded >= args.frames {
                return Ok(true);
            }
        }
        Ok(false)
    };

    let mut done = false;
    for (stream, packet) in input.packets() {
        if stream.index() != index {
            continue;
        }
        if handle(decoder.decode(&packet)?)? {
            done = true;
            break;
        }
    }
    if !done {
        handle(decoder.flush()?)?;
    }

    let stats = decoder.stats();
    println!("Backend:    {}", decoder.description());
    println!("State:      {:?}", decoder.state());
    match decoder.copy_mode() {
        Some(mode) => println!("Copy mode:  {mode}"),
        None => println!("Copy mode:  software"),
    }
    println!("Frames:     {decoded} ({gpu_frames} on the GPU)");
    println!("Setups:     {}", stats.setups);
    println!("Surfaces:   {}", stats.surfaces);
    println!("Dropped:    {}", stats.exhausted);

    if decoded == 0 {
        bail!("no frames decoded");
    }
    Ok(())
}

/**
    Write `frame` as an RGBA PNG, reading GPU frames back first.
*/
fn dump(frame: &VideoFrame, path: &Path) -> Result<()> {
    let host = if frame.is_gpu() {
        match frame.map(MapRequest::HostMemory {
            format: PixelFormat::Nv12,
        })? {
            Mapped::Host(host) => host,
            other => bail!("unexpected mapping {other:?}"),
        }
    } else {
        frame.clone()
    };

    let mut transform = VideoTransform::new(VideoTransformConfig::to_format(PixelFormat::Rgba));
    let rgba = transform.transform(&host)?;
    let plane = rgba.plane(0).context("converted frame has no planes")?;

    let line = rgba.width() as usize * 4;
    let mut pixels = Vec::with_capacity(line * rgba.height() as usize);
    for y in 0..rgba.height() as usize {
        pixels.extend_from_slice(plane.row(y, line).context("short plane")?);
    }

    let image = image::RgbaImage::from_raw(rgba.width(), rgba.height(), pixels)
        .context("frame does not fit an image")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!("wrote {}x{} frame to {}", rgba.width(), rgba.height(), path.display());
    println!("Dumped:     {}", path.display());
    Ok(())
}
