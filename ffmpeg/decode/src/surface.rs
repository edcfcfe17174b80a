/*!
    Pooled hardware surfaces and decoded hardware frames.
*/

use std::{fmt, ptr};

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result};

use crate::{ffi, pool::PoolSurface};

/**
    The frame the codec library asks the buffer hook to fill.
*/
#[derive(Debug)]
pub struct FrameTarget {
    frame: *mut ffi::AVFrame,
}

impl FrameTarget {
    pub(crate) fn from_raw(frame: *mut ffi::AVFrame) -> Self {
        Self { frame }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut ffi::AVFrame {
        self.frame
    }

    /**
        Returns the pixel format the codec library is allocating for.
    */
    pub fn format(&self) -> Option<PixelFormat> {
        // SAFETY: the buffer hook only hands out valid frames.
        ffi::frame_format(unsafe { (*self.frame).format })
    }
}

/**
    One pooled decode surface.

    Owns a hardware frame allocated from the stream's frames context. The
    codec library decodes into it through references handed out by
    [`HwSurface::lend_to`]; the surface is free again once all of those are
    released.
*/
pub(crate) struct HwSurface {
    frame: *mut ffi::AVFrame,
}

impl HwSurface {
    /**
        Allocate a surface from `frames_ctx`.
    */
    pub(crate) fn alloc(frames_ctx: *mut ffi::AVBufferRef) -> Result<Self> {
        // SAFETY: a freshly allocated frame is filled by av_hwframe_get_buffer
        // and freed on every error path.
        unsafe {
            let mut frame = ffi::av_frame_alloc();
            if frame.is_null() {
                return Err(Error::surface("av_frame_alloc failed"));
            }
            let ret = ffi::av_hwframe_get_buffer(frames_ctx, frame, 0);
            if let Err(e) = ffi::check_surface(ret, "av_hwframe_get_buffer") {
                ffi::av_frame_free(&mut frame);
                return Err(e);
            }
            Ok(Self { frame })
        }
    }

    /**
        Make `target` reference this surface.
    */
    pub(crate) fn lend_to(&self, target: &mut FrameTarget) -> Result<()> {
        let dst = target.as_mut_ptr();
        // SAFETY: both frames are valid; the new references are owned by
        // `dst` and released by the codec library with the frame.
        unsafe {
            let src = self.frame;
            let buf = ffi::av_buffer_ref((*src).buf[0]);
            if buf.is_null() {
                return Err(Error::surface("av_buffer_ref failed"));
            }
            (*dst).buf[0] = buf;
            (*dst).data = (*src).data;
            (*dst).linesize = (*src).linesize;
            if (*dst).hw_frames_ctx.is_null() && !(*src).hw_frames_ctx.is_null() {
                (*dst).hw_frames_ctx = ffi::av_buffer_ref((*src).hw_frames_ctx);
                if (*dst).hw_frames_ctx.is_null() {
                    return Err(Error::surface("av_buffer_ref failed"));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn native(&self) -> Option<NativeSurface> {
        // SAFETY: the surface frame is valid while self lives.
        unsafe { NativeSurface::from_frame(self.frame) }
    }
}

impl PoolSurface for HwSurface {
    fn is_free(&self) -> bool {
        // SAFETY: buf[0] is set by av_hwframe_get_buffer and lives as long
        // as the frame.
        unsafe { ffi::av_buffer_get_ref_count((*self.frame).buf[0]) == 1 }
    }
}

impl Drop for HwSurface {
    fn drop(&mut self) {
        // SAFETY: the frame was allocated by av_frame_alloc.
        unsafe { ffi::av_frame_free(&mut self.frame) };
    }
}

impl fmt::Debug for HwSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwSurface")
            .field("native", &self.native())
            .field("free", &self.is_free())
            .finish()
    }
}

// SAFETY: the frame is only read after allocation, and its buffers are
// reference counted with atomic counters.
unsafe impl Send for HwSurface {}

/**
    A decoded picture still resident on the GPU.

    Holds its own reference to the surface, the frames context and the device,
    so it stays valid after the pool, the session and the accelerator are gone.
*/
pub struct HwFrame {
    frame: *mut ffi::AVFrame,
}

impl HwFrame {
    /**
        Take a new reference to the decoded frame `src`.

        # Safety

        `src` must be a valid frame.
    */
    pub(crate) unsafe fn clone_from(src: *const ffi::AVFrame) -> Result<Self> {
        // SAFETY: upheld by the caller.
        let frame = unsafe { ffi::av_frame_clone(src) };
        if frame.is_null() {
            return Err(Error::surface("av_frame_clone failed"));
        }
        Ok(Self { frame })
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::AVFrame {
        self.frame
    }

    pub fn width(&self) -> u32 {
        // SAFETY: the frame is valid while self lives.
        unsafe { (*self.frame).width.max(0) as u32 }
    }

    pub fn height(&self) -> u32 {
        // SAFETY: see above.
        unsafe { (*self.frame).height.max(0) as u32 }
    }

    /**
        Returns the hardware pixel format.
    */
    pub fn format(&self) -> Option<PixelFormat> {
        // SAFETY: see above.
        ffi::frame_format(unsafe { (*self.frame).format })
    }

    /**
        Returns the layout of the surface memory, e.g. NV12 or P010.
    */
    pub fn sw_format(&self) -> Option<PixelFormat> {
        // SAFETY: see above.
        unsafe { ffi::frame_sw_format(self.frame) }
    }

    /**
        Returns the allocated surface height, which is at least [`Self::height`].
    */
    pub fn coded_height(&self) -> u32 {
        // SAFETY: see above.
        unsafe { ffi::frame_surface_size(self.frame) }
            .map(|(_, height)| height.max(self.height()))
            .unwrap_or_else(|| self.height())
    }

    pub fn native(&self) -> Option<NativeSurface> {
        // SAFETY: see above.
        unsafe { NativeSurface::from_frame(self.frame) }
    }
}

impl Drop for HwFrame {
    fn drop(&mut self) {
        // SAFETY: the frame was allocated by av_frame_clone.
        unsafe { ffi::av_frame_free(&mut self.frame) };
    }
}

impl fmt::Debug for HwFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("native", &self.native())
            .finish()
    }
}

// SAFETY: the frame is never written after creation; all references it
// holds are atomically reference counted.
unsafe impl Send for HwFrame {}
unsafe impl Sync for HwFrame {}

/**
    The vendor object behind a hardware frame.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum NativeSurface {
    /// `VASurfaceID`
    Vaapi { surface: u32 },
    /// CUDA device pointers of the luma and chroma planes.
    Cuda {
        planes: [u64; 2],
        pitches: [usize; 2],
    },
    /// `ID3D11Texture2D*` and its array slice.
    D3d11 { texture: usize, slice: u32 },
    /// `IDirect3DSurface9*`
    Dxva { surface: usize },
    /// `CVPixelBufferRef`
    VideoToolbox { pixel_buffer: usize },
}

impl NativeSurface {
    /**
        Read the native surface from a hardware frame's data pointers.

        # Safety

        `frame` must be a valid frame.
    */
    pub(crate) unsafe fn from_frame(frame: *const ffi::AVFrame) -> Option<Self> {
        // SAFETY: upheld by the caller; the data layout per format is
        // documented in libavutil/pixfmt.h.
        let (format, data, linesize) =
            unsafe { ((*frame).format, (*frame).data, (*frame).linesize) };
        let surface = match ffi::frame_format(format)? {
            PixelFormat::Vaapi => Self::Vaapi {
                surface: data[3] as usize as u32,
            },
            PixelFormat::Cuda => Self::Cuda {
                planes: [data[0] as usize as u64, data[1] as usize as u64],
                pitches: [linesize[0].max(0) as usize, linesize[1].max(0) as usize],
            },
            PixelFormat::D3d11 => Self::D3d11 {
                texture: data[0] as usize,
                slice: data[1] as usize as u32,
            },
            PixelFormat::Dxva2 => Self::Dxva {
                surface: data[3] as usize,
            },
            PixelFormat::VideoToolbox => Self::VideoToolbox {
                pixel_buffer: data[3] as usize,
            },
            _ => return None,
        };
        Some(surface)
    }

    /**
        Returns the handle reported by [`ffmpeg_types::MapRequest::Native`].
    */
    pub fn handle(&self) -> NativeHandle {
        match *self {
            Self::Vaapi { surface } => NativeHandle {
                handle: surface as usize,
                slice: 0,
            },
            Self::Cuda { planes, .. } => NativeHandle {
                handle: planes[0] as usize,
                slice: 0,
            },
            Self::D3d11 { texture, slice } => NativeHandle {
                handle: texture,
                slice,
            },
            Self::Dxva { surface } => NativeHandle {
                handle: surface,
                slice: 0,
            },
            Self::VideoToolbox { pixel_buffer } => NativeHandle {
                handle: pixel_buffer,
                slice: 0,
            },
        }
    }
}

/**
    An owned reference to an `AVHWFramesContext`.
*/
pub(crate) struct FramesContext {
    buf: *mut ffi::AVBufferRef,
}

impl FramesContext {
    /**
        # Safety

        `buf` must be an owned frames context reference.
    */
    pub(crate) unsafe fn from_raw(buf: *mut ffi::AVBufferRef) -> Self {
        Self { buf }
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.buf
    }

    pub(crate) fn context(&self) -> *mut ffi::AVHWFramesContext {
        // SAFETY: the reference keeps the context alive.
        unsafe { (*self.buf).data as *mut ffi::AVHWFramesContext }
    }

    /**
        Returns a new reference for the codec context to own.
    */
    pub(crate) fn create_ref(&self) -> *mut ffi::AVBufferRef {
        // SAFETY: see above.
        unsafe { ffi::av_buffer_ref(self.buf) }
    }
}

impl Drop for FramesContext {
    fn drop(&mut self) {
        if !self.buf.is_null() {
            // SAFETY: we own one reference.
            unsafe { ffi::av_buffer_unref(&mut self.buf) };
        }
        self.buf = ptr::null_mut();
    }
}

// SAFETY: buffer references are atomically reference counted.
unsafe impl Send for FramesContext {}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(format: ffi::AVPixelFormat, data: [usize; 4]) -> ffi::AVFrame {
        // SAFETY: AVFrame is a plain C struct; all-zero is a valid value.
        let mut frame: ffi::AVFrame = unsafe { std::mem::zeroed() };
        frame.format = format as i32;
        for (slot, value) in frame.data.iter_mut().zip(data) {
            *slot = value as *mut u8;
        }
        frame.linesize[0] = 2048;
        frame.linesize[1] = 2048;
        frame
    }

    #[test]
    fn native_surfaces_from_data_pointers() {
        let frame = frame_with(ffi::AVPixelFormat::AV_PIX_FMT_VAAPI, [0, 0, 0, 17]);
        let native = unsafe { NativeSurface::from_frame(&frame) }.unwrap();
        assert_eq!(native, NativeSurface::Vaapi { surface: 17 });
        assert_eq!(native.handle().handle, 17);

        let frame = frame_with(ffi::AVPixelFormat::AV_PIX_FMT_D3D11, [0x4000, 5, 0, 0]);
        let native = unsafe { NativeSurface::from_frame(&frame) }.unwrap();
        assert_eq!(
            native.handle(),
            NativeHandle {
                handle: 0x4000,
                slice: 5
            }
        );

        let frame = frame_with(ffi::AVPixelFormat::AV_PIX_FMT_CUDA, [0x1000, 0x2000, 0, 0]);
        let native = unsafe { NativeSurface::from_frame(&frame) }.unwrap();
        assert_eq!(
            native,
            NativeSurface::Cuda {
                planes: [0x1000, 0x2000],
                pitches: [2048, 2048]
            }
        );
    }

    #[test]
    fn software_frames_have_no_native_surface() {
        let frame = frame_with(ffi::AVPixelFormat::AV_PIX_FMT_NV12, [1, 2, 0, 0]);
        assert!(unsafe { NativeSurface::from_frame(&frame) }.is_none());
    }
}
