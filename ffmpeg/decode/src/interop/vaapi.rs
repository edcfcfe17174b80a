/*!
    VA-API surfaces to GL textures.

    On EGL the surface is exported as DMA-BUF file descriptors and each plane
    is imported as its own `EGLImage`, so the texture aliases decoder memory.
    On GLX libva-glx copies the surface into an RGBA texture instead; the GLX
    surface bound to a texture is kept until the texture changes size.
*/

use std::{
    collections::HashMap,
    ffi::{c_int, c_uint, c_void},
    sync::{Arc, Weak},
};

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, warn};

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result, VideoFrame};

use super::{
    InteropBackend,
    state::{ContextGuard, Registry},
};
use crate::{
    config::Backend,
    dylib, ffi,
    probe::{self, GlPlatform, egl, loader},
    surface::{HwFrame, NativeSurface},
};

const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;
const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: i32 = 0x3443;
const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: i32 = 0x3444;
const EGL_NONE: i32 = 0x3038;

const VA_STATUS_SUCCESS: c_int = 0;
const VA_FRAME_PICTURE: c_uint = 0;

type CreateImageFn =
    unsafe extern "C" fn(*mut c_void, *mut c_void, u32, *mut c_void, *const i32) -> *mut c_void;
type DestroyImageFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type ImageTargetTextureFn = unsafe extern "C" fn(u32, *mut c_void);

type CreateSurfaceGlxFn = unsafe extern "C" fn(*mut c_void, u32, u32, *mut *mut c_void) -> c_int;
type CopySurfaceGlxFn = unsafe extern "C" fn(*mut c_void, *mut c_void, c_uint, c_uint) -> c_int;
type DestroySurfaceGlxFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int;
type SyncSurfaceFn = unsafe extern "C" fn(*mut c_void, c_uint) -> c_int;

/**
    Zero-copy interop for VA-API surfaces.
*/
#[derive(Debug)]
pub struct VaapiInterop {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    guard: ContextGuard,
    path: Option<std::result::Result<Path, String>>,
    registry: Registry<Mapping>,
    exports: HashMap<u32, Weak<DrmExport>>,
}

#[derive(Debug)]
enum Path {
    Egl(EglImport),
    Glx(GlxCopy),
}

#[derive(Debug)]
struct EglImport {
    display: *mut c_void,
    modifiers: bool,
    create_image: CreateImageFn,
    destroy_image: DestroyImageFn,
    target_texture: ImageTargetTextureFn,
}

#[derive(Debug)]
struct GlxCopy {
    create_surface: CreateSurfaceGlxFn,
    copy_surface: CopySurfaceGlxFn,
    destroy_surface: DestroySurfaceGlxFn,
    sync_surface: SyncSurfaceFn,
    _libva: Library,
    _libva_glx: Library,
}

#[derive(Debug)]
enum Mapping {
    Egl {
        image: *mut c_void,
        _export: Arc<DrmExport>,
    },
    Glx {
        display: *mut c_void,
        gl_surface: *mut c_void,
        size: (u32, u32),
    },
}

/// A surface mapped as `DRM_PRIME`, which owns the exported descriptors.
#[derive(Debug)]
struct DrmExport {
    frame: *mut ffi::AVFrame,
}

impl DrmExport {
    fn new(surface: &HwFrame) -> Result<Self> {
        // SAFETY: the mapped frame is freed by Drop, including on error.
        unsafe {
            let export = Self {
                frame: ffi::av_frame_alloc(),
            };
            if export.frame.is_null() {
                return Err(Error::surface("av_frame_alloc failed"));
            }
            (*export.frame).format = ffi::AVPixelFormat::AV_PIX_FMT_DRM_PRIME as c_int;
            let ret = ffi::av_hwframe_map(export.frame, surface.as_ptr(), ffi::HWFRAME_MAP_READ);
            ffi::check_surface(ret, "export as DRM PRIME")?;
            Ok(export)
        }
    }

    fn descriptor(&self) -> Option<&ffi::DrmFrameDescriptor> {
        // SAFETY: data[0] of a DRM_PRIME frame is its descriptor, valid
        // while the mapping lives.
        unsafe { ((*self.frame).data[0] as *const ffi::DrmFrameDescriptor).as_ref() }
    }
}

impl Drop for DrmExport {
    fn drop(&mut self) {
        // SAFETY: allocated by av_frame_alloc; freeing unmaps it.
        unsafe { ffi::av_frame_free(&mut self.frame) };
    }
}

// SAFETY: the raw pointers held here are only dereferenced under the
// interop mutex, and the GL objects only on the owning context's thread.
unsafe impl Send for State {}
unsafe impl Send for DrmExport {}
unsafe impl Sync for DrmExport {}

impl VaapiInterop {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::Vaapi
    }
}

impl Default for VaapiInterop {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_path() -> Result<Path> {
    let caps = probe::capabilities()?;
    match caps.platform {
        GlPlatform::Egl => {
            let required = ["EGL_KHR_image_base", "EGL_EXT_image_dma_buf_import"];
            if !caps.egl_extensions.contains_all(&required) {
                return Err(Error::unsupported(format!(
                    "EGL DMA-BUF import ({})",
                    required.join(", ")
                )));
            }
            if !caps.has_gl_extension("GL_OES_EGL_image") {
                return Err(Error::unsupported("GL_OES_EGL_image"));
            }
            let display = egl::current_display()
                .ok_or_else(|| Error::unsupported("no current EGL display"))?;
            // SAFETY: each entry point is checked for null before being
            // reinterpreted with its documented signature.
            unsafe {
                Ok(Path::Egl(EglImport {
                    display,
                    modifiers: caps.has_egl_extension("EGL_EXT_image_dma_buf_import_modifiers"),
                    create_image: egl_entry::<CreateImageFn>("eglCreateImageKHR")?,
                    destroy_image: egl_entry::<DestroyImageFn>("eglDestroyImageKHR")?,
                    target_texture: egl_entry::<ImageTargetTextureFn>(
                        "glEGLImageTargetTexture2DOES",
                    )?,
                }))
            }
        }
        GlPlatform::Glx => {
            let libva = dylib::probe(dylib::LIBVA)?;
            let libva_glx = dylib::probe(dylib::LIBVA_GLX)?;
            // SAFETY: the signatures match va/va_glx.h and va/va.h.
            unsafe {
                Ok(Path::Glx(GlxCopy {
                    create_surface: dylib::symbol(&libva_glx, "vaCreateSurfaceGLX")?,
                    copy_surface: dylib::symbol(&libva_glx, "vaCopySurfaceGLX")?,
                    destroy_surface: dylib::symbol(&libva_glx, "vaDestroySurfaceGLX")?,
                    sync_surface: dylib::symbol(&libva, "vaSyncSurface")?,
                    _libva: libva,
                    _libva_glx: libva_glx,
                }))
            }
        }
        other => Err(Error::unsupported(format!("VA-API interop on {other}"))),
    }
}

/// # Safety
/// `T` must be the function pointer type of `name`.
unsafe fn egl_entry<T: Copy>(name: &str) -> Result<T> {
    let ptr = egl::proc_address(name);
    if ptr.is_null() {
        return Err(Error::unsupported(name.to_string()));
    }
    // SAFETY: upheld by the caller; T is pointer sized.
    Ok(unsafe { std::mem::transmute_copy::<*const c_void, T>(&ptr) })
}

fn va_surface(surface: &HwFrame) -> Result<u32> {
    match surface.native() {
        Some(NativeSurface::Vaapi { surface }) => Ok(surface),
        _ => Err(Error::unsupported_format("frame is not a VA-API surface")),
    }
}

impl State {
    fn path(&mut self) -> Result<&Path> {
        if self.path.is_none() {
            let resolved = resolve_path().map_err(|e| e.to_string());
            match &resolved {
                Ok(Path::Egl(_)) => debug!("VA-API interop: EGL DMA-BUF import"),
                Ok(Path::Glx(_)) => debug!("VA-API interop: GLX copy"),
                Err(e) => warn!("VA-API interop unavailable: {e}"),
            }
            self.path = Some(resolved);
        }
        match &self.path {
            Some(Ok(path)) => Ok(path),
            Some(Err(e)) => Err(Error::unsupported(e.clone())),
            None => Err(Error::unsupported("VA-API interop")),
        }
    }

    fn export(&mut self, surface: &HwFrame, id: u32) -> Result<Arc<DrmExport>> {
        if let Some(export) = self.exports.get(&id).and_then(Weak::upgrade) {
            return Ok(export);
        }
        let export = Arc::new(DrmExport::new(surface)?);
        self.exports.retain(|_, weak| weak.strong_count() > 0);
        self.exports.insert(id, Arc::downgrade(&export));
        Ok(export)
    }

    fn release(&mut self, mapping: Mapping) {
        if let Some(Ok(path)) = &self.path {
            path.release(mapping);
        }
        self.exports.retain(|_, weak| weak.strong_count() > 0);
    }
}

impl Path {
    fn release(&self, mapping: Mapping) {
        match (mapping, self) {
            (Mapping::Egl { image, .. }, Path::Egl(import)) => {
                // SAFETY: the image was created on this display.
                unsafe { (import.destroy_image)(import.display, image) };
            }
            (
                Mapping::Glx {
                    display,
                    gl_surface,
                    ..
                },
                Path::Glx(glx),
            ) => {
                // SAFETY: the GLX surface was created on this display.
                unsafe { (glx.destroy_surface)(display, gl_surface) };
            }
            _ => {}
        }
    }
}

fn map_egl(
    state: &mut State,
    surface: &HwFrame,
    texture: u32,
    width: u32,
    height: u32,
    plane: usize,
) -> Result<Mapping> {
    let id = va_surface(surface)?;
    let sw_format = surface
        .sw_format()
        .ok_or_else(|| Error::unsupported_format("surface layout is unknown"))?;
    if plane >= sw_format.plane_count() {
        return Err(Error::invalid_data(format!(
            "{sw_format:?} has no plane {plane}"
        )));
    }
    let fourcc = ffi::drm_fourcc(sw_format, plane)
        .ok_or_else(|| Error::unsupported_format(format!("no DRM format for {sw_format:?}")))?;
    let export = state.export(surface, id)?;
    let planes = export
        .descriptor()
        .map(|descriptor| descriptor.planes())
        .unwrap_or_default();
    let drm_plane = *planes
        .get(plane)
        .ok_or_else(|| Error::surface(format!("exported surface has no plane {plane}")))?;

    let Some(Ok(Path::Egl(import))) = &state.path else {
        return Err(Error::unsupported("EGL DMA-BUF import"));
    };
    let mut attributes = vec![
        EGL_WIDTH,
        sw_format.plane_width(plane, width) as i32,
        EGL_HEIGHT,
        sw_format.plane_height(plane, height) as i32,
        EGL_LINUX_DRM_FOURCC_EXT,
        fourcc as i32,
        EGL_DMA_BUF_PLANE0_FD_EXT,
        drm_plane.fd,
        EGL_DMA_BUF_PLANE0_OFFSET_EXT,
        drm_plane.offset as i32,
        EGL_DMA_BUF_PLANE0_PITCH_EXT,
        drm_plane.pitch as i32,
    ];
    if import.modifiers && drm_plane.modifier != ffi::DRM_FORMAT_MOD_INVALID {
        attributes.extend([
            EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT,
            (drm_plane.modifier & 0xFFFF_FFFF) as u32 as i32,
            EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT,
            (drm_plane.modifier >> 32) as u32 as i32,
        ]);
    }
    attributes.push(EGL_NONE);

    // SAFETY: the display is the current one, the attribute list is
    // terminated, and the texture belongs to the current context.
    let image = unsafe {
        let image = (import.create_image)(
            import.display,
            std::ptr::null_mut(),
            EGL_LINUX_DMA_BUF_EXT,
            std::ptr::null_mut(),
            attributes.as_ptr(),
        );
        if image.is_null() {
            return Err(Error::surface(format!(
                "eglCreateImageKHR failed for surface {id} plane {plane}"
            )));
        }
        gl::BindTexture(gl::TEXTURE_2D, texture);
        (import.target_texture)(gl::TEXTURE_2D, image);
        gl::BindTexture(gl::TEXTURE_2D, 0);
        image
    };
    Ok(Mapping::Egl {
        image,
        _export: export,
    })
}

fn map_glx(
    path: &Path,
    registry: &mut Registry<Mapping>,
    surface: &HwFrame,
    texture: u32,
    width: u32,
    height: u32,
    plane: usize,
) -> Result<()> {
    if plane != 0 {
        return Err(Error::unsupported_format(
            "GLX interop produces a single RGBA texture",
        ));
    }
    let Path::Glx(glx) = path else {
        return Err(Error::unsupported("GLX copy"));
    };
    let id = va_surface(surface)?;
    // SAFETY: the device context of a VA-API frame is an AVVAAPIDeviceContext.
    let display = unsafe {
        let hwctx = ffi::frame_device_hwctx::<ffi::VaapiDeviceContext>(surface.as_ptr());
        hwctx.as_ref().map(|hwctx| hwctx.display)
    }
    .filter(|display| !display.is_null())
    .ok_or_else(|| Error::surface("frame has no VA display"))?;

    let size = (width, height);
    let mapping = registry.obtain(
        texture,
        |kept| {
            matches!(kept, Mapping::Glx { display: d, size: s, .. } if *d == display && *s == size)
        },
        || {
            // SAFETY: the texture belongs to the current GLX context and the
            // VA display was opened on the same X connection.
            unsafe {
                gl::BindTexture(gl::TEXTURE_2D, texture);
                gl::TexImage2D(
                    gl::TEXTURE_2D,
                    0,
                    gl::RGBA8 as i32,
                    width as i32,
                    height as i32,
                    0,
                    gl::RGBA,
                    gl::UNSIGNED_BYTE,
                    std::ptr::null(),
                );
                gl::BindTexture(gl::TEXTURE_2D, 0);
                let mut gl_surface = std::ptr::null_mut();
                let status =
                    (glx.create_surface)(display, gl::TEXTURE_2D, texture, &mut gl_surface);
                if status != VA_STATUS_SUCCESS || gl_surface.is_null() {
                    return Err(Error::surface(format!(
                        "vaCreateSurfaceGLX failed ({status})"
                    )));
                }
                debug!("GLX surface for texture {texture} at {width}x{height}");
                Ok(Mapping::Glx {
                    display,
                    gl_surface,
                    size,
                })
            }
        },
        |old| path.release(old),
    )?;
    let Mapping::Glx { gl_surface, .. } = *mapping else {
        return Err(Error::surface("texture is bound to an EGL image"));
    };
    // SAFETY: both the GLX surface and the VA surface live on `display`.
    unsafe {
        let status = (glx.sync_surface)(display, id);
        if status != VA_STATUS_SUCCESS {
            warn!("vaSyncSurface failed ({status})");
        }
        let status = (glx.copy_surface)(display, gl_surface, id, VA_FRAME_PICTURE);
        if status != VA_STATUS_SUCCESS {
            return Err(Error::surface(format!("vaCopySurfaceGLX failed ({status})")));
        }
    }
    Ok(())
}

impl InteropBackend for VaapiInterop {
    type Surface = HwFrame;

    fn map(
        &self,
        surface: &HwFrame,
        texture: u32,
        width: u32,
        height: u32,
        _coded_height: u32,
        plane: usize,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.guard.bind_current()?;
        loader::load()?;
        if matches!(state.path()?, Path::Egl(_)) {
            // a texture can only alias one image; drop the old one first
            if let Some(previous) = state.registry.remove(texture) {
                state.release(previous);
            }
            let mapping = map_egl(state, surface, texture, width, height, plane)?;
            state.registry.insert(texture, mapping);
        } else {
            let Some(Ok(path)) = &state.path else {
                return Err(Error::unsupported("VA-API interop"));
            };
            map_glx(path, &mut state.registry, surface, texture, width, height, plane)?;
        }
        state.registry.set_mapped(texture);
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.registry.is_mapped(texture) {
            return Ok(false);
        }
        // An EGL image aliases one decoded surface, so it goes with the frame.
        if matches!(state.registry.get(texture), Some(Mapping::Egl { .. })) {
            if let Some(mapping) = state.registry.remove(texture) {
                state.release(mapping);
            }
        } else {
            state.registry.unmap(texture);
        }
        Ok(true)
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

impl Drop for VaapiInterop {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.registry.is_empty() {
            return;
        }
        let owner = state.guard.owner();
        if owner.is_some() && owner == probe::current_context() {
            let mappings: Vec<_> = state.registry.drain().map(|(_, m)| m).collect();
            for mapping in mappings {
                state.release(mapping);
            }
        } else {
            warn!(
                "dropping VA-API interop with {} textures still mapped off its GL context",
                state.registry.len()
            );
        }
    }
}
