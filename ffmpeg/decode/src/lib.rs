/*!
    Hardware-accelerated video decoding with GPU interop.

    This crate turns encoded packets into [`VideoFrame`]s, decoding on the
    GPU when a backend accepts the stream. Hardware frames either stay on
    the GPU, ready to be mapped into the renderer's GL context, or get
    copied back to host memory.

    # Backends

    - CUDA / NVDEC (Linux, Windows)
    - VA-API (Linux)
    - Direct3D 11 and DXVA2 (Windows)
    - VideoToolbox (macOS)

    Each backend has a codec support table ([`backend_supports`]) and the
    decoder tries the configured candidates in order, falling back to
    software when none of them opens.

    # Example

    ```ignore
    use ffmpeg_decode::{VideoDecoder, VideoDecoderConfig};

    let stream = input.streams().best(ffmpeg_next::media::Type::Video).unwrap();
    let config = VideoDecoderConfig::with_hw_accel();
    let mut decoder = VideoDecoder::new(stream.parameters(), stream.time_base(), config)?;

    for (_, packet) in input.packets() {
        for frame in decoder.decode(&packet)? {
            if let Some(interop) = frame.interop() {
                // Map into the current GL context
            }
        }
    }

    let remaining = decoder.flush()?;
    ```

    # Copy Modes

    - [`CopyMode::ZeroCopy`] - Frames stay on the GPU and are mapped as textures
    - [`CopyMode::OptimizedCopy`] - Read-mapped surfaces copied with SSE4.1
      streaming loads
    - [`CopyMode::GenericCopy`] - Frames downloaded through the codec library

    `HWDECODE_COPY_MODE` overrides the configured mode, see [`EnvToggles`].
*/

pub use ffmpeg_types::{
    ColorRange, ColorSpace, CopyMode, Error, ErrorCategory, MapRequest, Mapped, NativeHandle,
    PixelFormat, Plane, Result, SurfaceInterop, SurfaceType, VideoFrame,
};

mod accel;
mod codec;
mod config;
mod decoder;
mod device;
mod dylib;
mod env;
mod ffi;
mod hooks;
mod interop;
mod negotiate;
mod pool;
mod session;
mod surface;

pub mod probe;

pub use accel::{
    AccelConfig, AccelState, AccelStats, HardwareAccelerator, device_options, fallback_copy_mode,
    resolve_copy_mode,
};
pub use codec::{CodecBinding, CodecContext, CodecKind, CodecParams, backend_supports, check_support};
pub use config::{Backend, DisplayKind, ExternalDevice, VideoDecoderConfig};
pub use decoder::VideoDecoder;
pub use env::EnvToggles;
pub use interop::{InteropBackend, InteropResource, SurfaceBinding};
pub use negotiate::{Decision, Negotiation, StreamShape};
pub use pool::{PoolSurface, SurfacePool};
pub use session::{DeviceOptions, FfmpegSession, Lend, Session};
pub use surface::{FrameTarget, HwFrame, NativeSurface};

#[cfg(any(target_os = "linux", windows))]
pub use interop::CudaInterop;
#[cfg(windows)]
pub use interop::{D3d11Interop, DxvaInterop};
#[cfg(target_os = "linux")]
pub use interop::VaapiInterop;
#[cfg(target_os = "macos")]
pub use interop::CvInterop;
