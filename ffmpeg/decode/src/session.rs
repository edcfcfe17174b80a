/*!
    Hardware decode sessions.

    A session is everything one backend allocates for one stream: the
    device, the frames context sized to the coded picture, the surface pool,
    the interop resource and the copy engine. [`Session`] is what the
    accelerator drives; [`FfmpegSession`] is the production implementation.
*/

use std::{ptr, sync::Arc};

use ffmpeg_next::util::frame::video::Video as AvFrame;
use tracing::debug;

use ffmpeg_transform::{
    CopyTier, UswcCopier, color_range_from_av, color_space_from_av, frame_from_av, to_av_pixel,
};
use ffmpeg_types::{CopyMode, Error, PixelFormat, Result, VideoFrame};

use crate::{
    codec::{CodecBinding, CodecContext},
    config::{Backend, DisplayKind, ExternalDevice},
    device::DeviceContext,
    ffi,
    interop::{
        InteropBackend, InteropResource, SurfaceBinding,
        host::{self, HostPath},
    },
    negotiate::StreamShape,
    pool::SurfacePool,
    surface::{FrameTarget, FramesContext, HwFrame, HwSurface},
};

/// Surfaces for codecs whose frames context does not fix a pool size:
/// 16 references plus the picture being decoded.
const DYNAMIC_POOL_SURFACES: usize = 17;

/**
    How a buffer request was answered.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lend {
    /// A pooled surface was handed out.
    Pooled,
    /// The codec library should allocate the buffer itself.
    Default,
}

/**
    One backend's resources for one stream.
*/
pub trait Session: Sized + Send {
    /// Device creation options.
    type Options: Clone + Send;
    /// The codec the session decodes for.
    type Codec: CodecBinding;
    /// A buffer the codec library asks to be filled.
    type Target;
    /// A decoded picture.
    type Decoded;
    /// The interop resource exported frames share.
    type Interop: InteropBackend + 'static;

    /**
        Open the device for `backend`.
    */
    fn open(backend: Backend, options: &Self::Options) -> Result<Self>;

    fn backend(&self) -> Backend;

    /**
        Returns the backend name with the adapter vendor, if known.
    */
    fn description(&self) -> String;

    /**
        Build the frames context and surface pool for `shape`, replacing any
        previous ones. The device is kept.
    */
    fn configure(
        &mut self,
        codec: &mut Self::Codec,
        shape: StreamShape,
        extra_surfaces: usize,
        mode: CopyMode,
    ) -> Result<()>;

    /**
        Hand the current frames context back to `codec`.

        The codec library drops its frames reference before every format
        query, so a query answered without [`Self::configure`] must restore
        it before surfaces are lent again.
    */
    fn reattach(&mut self, codec: &mut Self::Codec) -> Result<()>;

    /**
        Returns the number of pooled surfaces.
    */
    fn surface_count(&self) -> usize;

    /**
        Back `target` with a free surface.
    */
    fn lend_surface(&mut self, target: &mut Self::Target) -> Result<Lend>;

    /**
        Create the interop resource exported frames will share, replacing
        the previous one.
    */
    fn create_interop(&mut self) -> Result<Arc<Self::Interop>>;

    /**
        Returns true if `decoded` is a picture of this session's hardware format.
    */
    fn is_hardware(&self, decoded: &Self::Decoded) -> bool;

    /**
        Wrap a hardware picture in a GPU-resident frame.
    */
    fn export(&self, decoded: &Self::Decoded) -> Result<VideoFrame>;

    /**
        Copy a hardware picture into a host frame.
    */
    fn download(&mut self, decoded: &Self::Decoded, mode: CopyMode) -> Result<VideoFrame>;

    /**
        Convert a picture that did not go through a session.
    */
    fn software_frame(decoded: &Self::Decoded) -> Result<VideoFrame>;

    /**
        Release everything but the device and detach the codec from it.
    */
    fn teardown(&mut self, codec: &mut Self::Codec);
}

/**
    Device options for [`FfmpegSession`].
*/
#[derive(Clone, Debug, Default)]
pub struct DeviceOptions {
    pub display: DisplayKind,
    pub device_path: Option<String>,
    pub external: Option<ExternalDevice>,
    /// Use the portable copy tier.
    pub no_simd: bool,
}

/**
    A session on an FFmpeg hardware device.
*/
pub struct FfmpegSession {
    // Fields drop in declaration order: GPU objects first, the device last.
    interop: Option<Arc<InteropResource>>,
    copier: UswcCopier,
    pool: SurfacePool<HwSurface>,
    frames: Option<FramesContext>,
    device: DeviceContext,
    hw_format: PixelFormat,
}

impl FfmpegSession {
    pub fn interop(&self) -> Option<&Arc<InteropResource>> {
        self.interop.as_ref()
    }

    pub fn copy_tier(&self) -> CopyTier {
        self.copier.tier()
    }

    fn release_frames(&mut self) {
        self.pool.clear();
        self.frames = None;
    }
}

impl Session for FfmpegSession {
    type Options = DeviceOptions;
    type Codec = CodecContext;
    type Target = FrameTarget;
    type Decoded = AvFrame;
    type Interop = InteropResource;

    fn open(backend: Backend, options: &DeviceOptions) -> Result<Self> {
        let device = match options.external {
            Some(external) if external.backend == backend => {
                DeviceContext::wrap_external(external)?
            }
            _ => DeviceContext::create(backend, options.display, options.device_path.as_deref())?,
        };
        let copier = if options.no_simd {
            UswcCopier::with_tier(CopyTier::Portable)
        } else {
            UswcCopier::new()
        };
        Ok(Self {
            interop: None,
            copier,
            pool: SurfacePool::default(),
            frames: None,
            device,
            hw_format: backend.hw_format(),
        })
    }

    fn backend(&self) -> Backend {
        self.device.backend()
    }

    fn description(&self) -> String {
        self.device.description()
    }

    fn configure(
        &mut self,
        codec: &mut CodecContext,
        shape: StreamShape,
        extra_surfaces: usize,
        mode: CopyMode,
    ) -> Result<()> {
        let backend = self.backend();
        let name = backend.name();
        self.release_frames();

        let hw_pixel = to_av_pixel(self.hw_format)
            .ok_or_else(|| Error::setup(name, "no FFmpeg format for the backend"))?;
        let ctx = codec.as_mut_ptr();

        // SAFETY: the codec context is valid while the codec binding is;
        // the frames reference is owned by `frames` from here on.
        let frames = unsafe {
            if (*ctx).hw_device_ctx.is_null() {
                (*ctx).hw_device_ctx = self.device.create_ref();
                if (*ctx).hw_device_ctx.is_null() {
                    return Err(Error::setup(name, "av_buffer_ref failed"));
                }
            }
            let mut frames_ref: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret = ffi::avcodec_get_hw_frames_parameters(
                ctx,
                self.device.as_ptr(),
                hw_pixel.into(),
                &mut frames_ref,
            );
            ffi::check_setup(ret, name, "avcodec_get_hw_frames_parameters")?;
            if frames_ref.is_null() {
                return Err(Error::setup(name, "no frames context"));
            }
            FramesContext::from_raw(frames_ref)
        };

        // SAFETY: the frames context is not initialized yet, so its pool
        // size may still change.
        let capacity = unsafe {
            let fc = frames.context();
            let fixed = (*fc).initial_pool_size.max(0) as usize;
            if backend.is_library_managed() {
                0
            } else if fixed == 0 {
                DYNAMIC_POOL_SURFACES + extra_surfaces
            } else {
                let capacity = fixed + extra_surfaces;
                (*fc).initial_pool_size = i32::try_from(capacity).unwrap_or(i32::MAX);
                capacity
            }
        };

        // SAFETY: see above; the codec takes its own reference.
        let sw_format = unsafe {
            let ret = ffi::av_hwframe_ctx_init(frames.as_ptr());
            ffi::check_setup(ret, name, "av_hwframe_ctx_init")?;
            ffi::av_buffer_unref(&mut (*ctx).hw_frames_ctx);
            (*ctx).hw_frames_ctx = frames.create_ref();
            if (*ctx).hw_frames_ctx.is_null() {
                return Err(Error::setup(name, "av_buffer_ref failed"));
            }
            ffi::pixel_format((*frames.context()).sw_format)
        };

        if capacity > 0 {
            self.pool = SurfacePool::fill(capacity, |_| HwSurface::alloc(frames.as_ptr()))
                .map_err(|e| Error::setup(name, e.to_string()))?;
        }

        if mode == CopyMode::OptimizedCopy {
            let bytes = sw_format.map_or(2, |format| format.bytes_per_pixel(0).max(1));
            self.copier
                .init_cache(shape.coded_width.max(1) as usize * bytes)
                .map_err(|e| Error::setup(name, e.to_string()))?;
        } else {
            self.copier.clean_cache();
        }

        debug!(
            "{name}: frames context {}x{} ({sw_format:?}), {} pooled surfaces",
            shape.coded_width,
            shape.coded_height,
            self.pool.len()
        );
        self.frames = Some(frames);
        Ok(())
    }

    fn reattach(&mut self, codec: &mut CodecContext) -> Result<()> {
        let name = self.backend().name();
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| Error::setup(name, "no frames context"))?;
        let ctx = codec.as_mut_ptr();
        // SAFETY: the codec context is valid while the codec binding is and
        // owns the references created here.
        unsafe {
            if (*ctx).hw_device_ctx.is_null() {
                (*ctx).hw_device_ctx = self.device.create_ref();
            }
            ffi::av_buffer_unref(&mut (*ctx).hw_frames_ctx);
            (*ctx).hw_frames_ctx = frames.create_ref();
            if (*ctx).hw_device_ctx.is_null() || (*ctx).hw_frames_ctx.is_null() {
                return Err(Error::setup(name, "av_buffer_ref failed"));
            }
        }
        Ok(())
    }

    fn surface_count(&self) -> usize {
        self.pool.len()
    }

    fn lend_surface(&mut self, target: &mut FrameTarget) -> Result<Lend> {
        if self.backend().is_library_managed() || target.format() != Some(self.hw_format) {
            return Ok(Lend::Default);
        }
        if self.pool.is_empty() {
            return Err(Error::setup(self.backend().name(), "surface pool is gone"));
        }
        let total = self.pool.len();
        let surface = self
            .pool
            .acquire()
            .ok_or_else(|| Error::surface(format!("all {total} decode surfaces are in use")))?;
        surface.lend_to(target)?;
        Ok(Lend::Pooled)
    }

    fn create_interop(&mut self) -> Result<Arc<InteropResource>> {
        let interop = Arc::new(InteropResource::create(self.backend())?);
        self.interop = Some(interop.clone());
        Ok(interop)
    }

    fn is_hardware(&self, decoded: &AvFrame) -> bool {
        // SAFETY: the frame is valid while borrowed.
        ffi::frame_format(unsafe { (*decoded.as_ptr()).format }) == Some(self.hw_format)
    }

    fn export(&self, decoded: &AvFrame) -> Result<VideoFrame> {
        let interop = self
            .interop
            .clone()
            .ok_or_else(|| Error::unsupported("zero-copy interop"))?;
        // SAFETY: the frame is valid while borrowed.
        let surface = unsafe { HwFrame::clone_from(decoded.as_ptr()) }?;
        let (width, height) = (surface.width(), surface.height());
        let coded_height = surface.coded_height();
        let binding = SurfaceBinding::new(surface, width, height, coded_height, interop);
        let frame = VideoFrame::gpu(width, height, self.hw_format, Arc::new(binding));
        Ok(with_metadata(frame, decoded))
    }

    fn download(&mut self, decoded: &AvFrame, mode: CopyMode) -> Result<VideoFrame> {
        // SAFETY: the frame is valid while borrowed.
        let surface = unsafe { HwFrame::clone_from(decoded.as_ptr()) }?;
        let frame = if mode == CopyMode::OptimizedCopy {
            host::download(&surface, HostPath::ReadMap(Some(&mut self.copier))).or_else(|e| {
                debug!("optimized copy failed ({e}), transferring instead");
                host::download(&surface, HostPath::Transfer)
            })?
        } else {
            host::download(&surface, HostPath::Transfer)?
        };
        Ok(with_metadata(frame, decoded))
    }

    fn software_frame(decoded: &AvFrame) -> Result<VideoFrame> {
        // SAFETY: the frame is valid while borrowed.
        let format = ffi::frame_format(unsafe { (*decoded.as_ptr()).format });
        let frame = if format.is_some_and(PixelFormat::is_hardware) {
            // Decoded before a fallback; the frame still references its device.
            // SAFETY: see above.
            let surface = unsafe { HwFrame::clone_from(decoded.as_ptr()) }?;
            host::download(&surface, HostPath::Transfer)?
        } else {
            frame_from_av(decoded)?
        };
        Ok(with_metadata(frame, decoded))
    }

    fn teardown(&mut self, codec: &mut CodecContext) {
        self.interop = None;
        self.copier.clean_cache();
        self.release_frames();
        codec.release_hardware();
    }
}

impl std::fmt::Debug for FfmpegSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSession")
            .field("device", &self.device)
            .field("surfaces", &self.pool.len())
            .field("interop", &self.interop.is_some())
            .field("tier", &self.copier.tier())
            .finish_non_exhaustive()
    }
}

/**
    Carry the display aspect ratio and colour metadata of `decoded` over.
*/
fn with_metadata(frame: VideoFrame, decoded: &AvFrame) -> VideoFrame {
    let sar = decoded.aspect_ratio();
    let (width, height) = (frame.width(), frame.height());
    let ratio = if sar.numerator() > 0 && sar.denominator() > 0 && height > 0 {
        f64::from(sar) * f64::from(width) / f64::from(height)
    } else {
        0.0
    };
    frame
        .with_display_aspect_ratio(ratio)
        .with_color(
            color_space_from_av(decoded.color_space()),
            color_range_from_av(decoded.color_range()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::{Rational, format::Pixel};
    use ffmpeg_types::Plane;

    #[test]
    fn metadata_from_decoded_frame() {
        let mut decoded = AvFrame::new(Pixel::YUV420P, 720, 576);
        decoded.set_aspect_ratio(Rational::new(16, 15));
        let frame = VideoFrame::host(
            720,
            576,
            PixelFormat::Bgra,
            vec![Plane::new(vec![0u8; 720 * 4 * 576], 720 * 4)],
        )
        .unwrap();
        let frame = with_metadata(frame, &decoded);
        let expected = 16.0 / 15.0 * 720.0 / 576.0;
        assert!((frame.display_aspect_ratio() - expected).abs() < 1e-9);
    }

    #[test]
    fn software_frames_keep_their_layout() {
        let decoded = AvFrame::new(Pixel::NV12, 64, 32);
        let frame = FfmpegSession::software_frame(&decoded).unwrap();
        assert_eq!(frame.format(), PixelFormat::Nv12);
        assert_eq!((frame.width(), frame.height()), (64, 32));
        assert!(!frame.is_gpu());
    }
}
