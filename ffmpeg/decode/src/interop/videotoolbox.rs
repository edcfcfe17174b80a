/*!
    VideoToolbox pixel buffers to GL textures.

    Decoded pixel buffers are backed by IOSurfaces, which CGL can bind to a
    rectangle texture directly. Each plane is bound to its own texture, so
    the renderer samples `GL_TEXTURE_RECTANGLE` targets in pixel coordinates.
*/

use std::ffi::c_void;

use parking_lot::Mutex;
use tracing::warn;

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result, VideoFrame};

use super::{
    InteropBackend,
    state::{ContextGuard, Registry},
};
use crate::{
    config::Backend,
    probe::{
        self,
        loader::{self, cgl},
    },
    surface::{HwFrame, NativeSurface},
};

const GL_TEXTURE_RECTANGLE: u32 = 0x84F5;
const GL_R8: u32 = 0x8229;
const GL_R16: u32 = 0x822A;
const GL_RG8: u32 = 0x822B;
const GL_RG16: u32 = 0x822C;
const GL_RGBA8: u32 = 0x8058;
const GL_RED: u32 = 0x1903;
const GL_RG: u32 = 0x8227;
const GL_BGRA: u32 = 0x80E1;
const GL_UNSIGNED_BYTE: u32 = 0x1401;
const GL_UNSIGNED_SHORT: u32 = 0x1403;
const GL_UNSIGNED_INT_8_8_8_8_REV: u32 = 0x8367;

const fn four_cc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

const CV_420_VIDEO_RANGE: u32 = four_cc(b"420v");
const CV_420_FULL_RANGE: u32 = four_cc(b"420f");
const CV_420_10BIT_VIDEO_RANGE: u32 = four_cc(b"x420");
const CV_420_10BIT_FULL_RANGE: u32 = four_cc(b"xf20");
const CV_32_BGRA: u32 = four_cc(b"BGRA");

type CvPixelBufferRef = *mut c_void;

#[link(name = "CoreVideo", kind = "framework")]
unsafe extern "C" {
    fn CVPixelBufferGetIOSurface(buffer: CvPixelBufferRef) -> *mut c_void;
    fn CVPixelBufferGetPixelFormatType(buffer: CvPixelBufferRef) -> u32;
    fn CVPixelBufferGetPlaneCount(buffer: CvPixelBufferRef) -> usize;
    fn CVPixelBufferGetWidthOfPlane(buffer: CvPixelBufferRef, plane: usize) -> usize;
    fn CVPixelBufferGetHeightOfPlane(buffer: CvPixelBufferRef, plane: usize) -> usize;
    fn CVPixelBufferGetWidth(buffer: CvPixelBufferRef) -> usize;
    fn CVPixelBufferGetHeight(buffer: CvPixelBufferRef) -> usize;
    fn CVPixelBufferRetain(buffer: CvPixelBufferRef) -> CvPixelBufferRef;
    fn CVPixelBufferRelease(buffer: CvPixelBufferRef);
}

/**
    Returns the GL internal format, pixel format and type of one plane of a
    CoreVideo pixel format.
*/
const fn plane_format(cv_format: u32, plane: usize) -> Option<(u32, u32, u32)> {
    match (cv_format, plane) {
        (CV_420_VIDEO_RANGE | CV_420_FULL_RANGE, 0) => Some((GL_R8, GL_RED, GL_UNSIGNED_BYTE)),
        (CV_420_VIDEO_RANGE | CV_420_FULL_RANGE, 1) => Some((GL_RG8, GL_RG, GL_UNSIGNED_BYTE)),
        (CV_420_10BIT_VIDEO_RANGE | CV_420_10BIT_FULL_RANGE, 0) => {
            Some((GL_R16, GL_RED, GL_UNSIGNED_SHORT))
        }
        (CV_420_10BIT_VIDEO_RANGE | CV_420_10BIT_FULL_RANGE, 1) => {
            Some((GL_RG16, GL_RG, GL_UNSIGNED_SHORT))
        }
        (CV_32_BGRA, 0) => Some((GL_RGBA8, GL_BGRA, GL_UNSIGNED_INT_8_8_8_8_REV)),
        _ => None,
    }
}

/// A retained pixel buffer bound to a texture.
#[derive(Debug)]
struct Binding {
    pixel_buffer: CvPixelBufferRef,
}

impl Drop for Binding {
    fn drop(&mut self) {
        // SAFETY: retained when the binding was made.
        unsafe { CVPixelBufferRelease(self.pixel_buffer) };
    }
}

#[derive(Debug, Default)]
struct State {
    guard: ContextGuard,
    registry: Registry<Binding>,
}

// SAFETY: CoreVideo reference counting is thread safe and the buffers are
// only read through CGL on the owning context's thread.
unsafe impl Send for State {}

/**
    Zero-copy interop for VideoToolbox frames.
*/
#[derive(Debug)]
pub struct CvInterop {
    state: Mutex<State>,
}

impl CvInterop {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::VideoToolbox
    }
}

impl Default for CvInterop {
    fn default() -> Self {
        Self::new()
    }
}

impl InteropBackend for CvInterop {
    type Surface = HwFrame;

    fn map(
        &self,
        surface: &HwFrame,
        texture: u32,
        _width: u32,
        _height: u32,
        _coded_height: u32,
        plane: usize,
    ) -> Result<()> {
        let Some(NativeSurface::VideoToolbox { pixel_buffer }) = surface.native() else {
            return Err(Error::unsupported_format(
                "frame is not a VideoToolbox surface",
            ));
        };
        let pixel_buffer = pixel_buffer as CvPixelBufferRef;
        if pixel_buffer.is_null() {
            return Err(Error::surface("frame has no pixel buffer"));
        }

        let mut state = self.state.lock();
        state.guard.bind_current()?;
        loader::load()?;

        // SAFETY: the pixel buffer is kept alive by the frame, and retained
        // again below for as long as the texture is bound to it.
        unsafe {
            let io_surface = CVPixelBufferGetIOSurface(pixel_buffer);
            if io_surface.is_null() {
                return Err(Error::unsupported("pixel buffer is not IOSurface backed"));
            }
            let cv_format = CVPixelBufferGetPixelFormatType(pixel_buffer);
            let planes = CVPixelBufferGetPlaneCount(pixel_buffer);
            let (plane_width, plane_height) = if planes == 0 {
                if plane != 0 {
                    return Err(Error::invalid_data("packed pixel buffer has one plane"));
                }
                (
                    CVPixelBufferGetWidth(pixel_buffer),
                    CVPixelBufferGetHeight(pixel_buffer),
                )
            } else {
                if plane >= planes {
                    return Err(Error::invalid_data(format!(
                        "pixel buffer has no plane {plane}"
                    )));
                }
                (
                    CVPixelBufferGetWidthOfPlane(pixel_buffer, plane),
                    CVPixelBufferGetHeightOfPlane(pixel_buffer, plane),
                )
            };
            let (internal_format, format, ty) =
                plane_format(cv_format, plane).ok_or_else(|| {
                    Error::unsupported_format(format!("pixel buffer format {cv_format:#010x}"))
                })?;

            let ctx = cgl::CGLGetCurrentContext();
            gl::BindTexture(GL_TEXTURE_RECTANGLE, texture);
            let err = cgl::CGLTexImageIOSurface2D(
                ctx,
                GL_TEXTURE_RECTANGLE,
                internal_format,
                plane_width as i32,
                plane_height as i32,
                format,
                ty,
                io_surface,
                plane as u32,
            );
            gl::BindTexture(GL_TEXTURE_RECTANGLE, 0);
            if err != 0 {
                return Err(Error::surface(format!(
                    "CGLTexImageIOSurface2D failed ({err})"
                )));
            }
            state.registry.insert(
                texture,
                Binding {
                    pixel_buffer: CVPixelBufferRetain(pixel_buffer),
                },
            );
        }
        state.registry.set_mapped(texture);
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        // The texture aliases this frame's IOSurface, so the retained
        // buffer goes with the mapping.
        Ok(self.state.lock().registry.remove(texture).is_some())
    }

    fn map_to_host(
        &self,
        surface: &HwFrame,
        format: PixelFormat,
        _width: u32,
        _height: u32,
    ) -> Result<VideoFrame> {
        super::surface_to_host(surface, format)
    }

    fn native(&self, surface: &HwFrame) -> Result<NativeHandle> {
        super::surface_native(surface)
    }
}

impl Drop for CvInterop {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.registry.is_empty() && state.guard.owner() != probe::current_context() {
            warn!(
                "dropping VideoToolbox interop with {} textures bound off its GL context",
                state.registry.len()
            );
        }
    }
}
