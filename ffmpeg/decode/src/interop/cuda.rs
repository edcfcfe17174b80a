/*!
    CUDA surfaces to GL textures.

    Each texture is registered with CUDA on its first map, or again after a
    size change, and each map copies one plane of the decoded picture into
    it on the device, so pixels never leave video memory. The driver library is loaded at runtime.
*/

use std::ffi::{c_char, c_int, c_uint, c_void};

use libloading::Library;
use parking_lot::Mutex;
use tracing::{trace, warn};

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result, VideoFrame};

use super::{
    InteropBackend,
    state::{ContextGuard, Registry},
};
use crate::{
    config::Backend,
    dylib, ffi,
    probe::{self, loader},
    surface::{HwFrame, NativeSurface},
};

type CuResult = c_int;
type CuContext = *mut c_void;
type CuStream = *mut c_void;
type CuResource = *mut c_void;
type CuArray = *mut c_void;

const CUDA_SUCCESS: CuResult = 0;
const CU_MEMORYTYPE_DEVICE: c_uint = 2;
const CU_MEMORYTYPE_ARRAY: c_uint = 3;
const CU_GRAPHICS_REGISTER_FLAGS_WRITE_DISCARD: c_uint = 2;

#[repr(C)]
struct CudaMemcpy2d {
    src_x_in_bytes: usize,
    src_y: usize,
    src_memory_type: c_uint,
    src_host: *const c_void,
    src_device: u64,
    src_array: CuArray,
    src_pitch: usize,
    dst_x_in_bytes: usize,
    dst_y: usize,
    dst_memory_type: c_uint,
    dst_host: *mut c_void,
    dst_device: u64,
    dst_array: CuArray,
    dst_pitch: usize,
    width_in_bytes: usize,
    height: usize,
}

/// Driver API entry points.
#[derive(Debug)]
struct CudaApi {
    ctx_push: unsafe extern "system" fn(CuContext) -> CuResult,
    ctx_pop: unsafe extern "system" fn(*mut CuContext) -> CuResult,
    register_image: unsafe extern "system" fn(*mut CuResource, c_uint, c_uint, c_uint) -> CuResult,
    unregister: unsafe extern "system" fn(CuResource) -> CuResult,
    map_resources: unsafe extern "system" fn(c_uint, *mut CuResource, CuStream) -> CuResult,
    unmap_resources: unsafe extern "system" fn(c_uint, *mut CuResource, CuStream) -> CuResult,
    mapped_array: unsafe extern "system" fn(*mut CuArray, CuResource, c_uint, c_uint) -> CuResult,
    memcpy_2d: unsafe extern "system" fn(*const CudaMemcpy2d, CuStream) -> CuResult,
    synchronize: unsafe extern "system" fn(CuStream) -> CuResult,
    error_name: unsafe extern "system" fn(CuResult, *mut *const c_char) -> CuResult,
    _library: Library,
}

impl CudaApi {
    fn load() -> Result<Self> {
        let library = dylib::probe(dylib::LIBCUDA)?;
        // SAFETY: the signatures match cuda.h and cudaGL.h.
        unsafe {
            Ok(Self {
                ctx_push: dylib::symbol(&library, "cuCtxPushCurrent_v2")?,
                ctx_pop: dylib::symbol(&library, "cuCtxPopCurrent_v2")?,
                register_image: dylib::symbol(&library, "cuGraphicsGLRegisterImage")?,
                unregister: dylib::symbol(&library, "cuGraphicsUnregisterResource")?,
                map_resources: dylib::symbol(&library, "cuGraphicsMapResources")?,
                unmap_resources: dylib::symbol(&library, "cuGraphicsUnmapResources")?,
                mapped_array: dylib::symbol(&library, "cuGraphicsSubResourceGetMappedArray")?,
                memcpy_2d: dylib::symbol(&library, "cuMemcpy2DAsync_v2")?,
                synchronize: dylib::symbol(&library, "cuStreamSynchronize")?,
                error_name: dylib::symbol(&library, "cuGetErrorName")?,
                _library: library,
            })
        }
    }

    fn check(&self, result: CuResult, what: &str) -> Result<()> {
        if result == CUDA_SUCCESS {
            return Ok(());
        }
        let mut name = std::ptr::null();
        // SAFETY: cuGetErrorName writes a static string or leaves it null.
        let known = unsafe { (self.error_name)(result, &mut name) } == CUDA_SUCCESS;
        let name = if known && !name.is_null() {
            // SAFETY: see above.
            unsafe { std::ffi::CStr::from_ptr(name) }
                .to_string_lossy()
                .into_owned()
        } else {
            format!("error {result}")
        };
        Err(Error::surface(format!("{what}: {name}")))
    }

    /**
        Run `f` with `ctx` pushed as the current CUDA context.
    */
    fn with_context<T>(&self, ctx: CuContext, f: impl FnOnce() -> Result<T>) -> Result<T> {
        // SAFETY: ctx is a live context owned by the device.
        self.check(unsafe { (self.ctx_push)(ctx) }, "cuCtxPushCurrent")?;
        let result = f();
        let mut popped = std::ptr::null_mut();
        // SAFETY: pops what was pushed above.
        if let Err(e) = self.check(unsafe { (self.ctx_pop)(&mut popped) }, "cuCtxPopCurrent") {
            warn!("{e}");
        }
        result
    }
}

/// A texture registered with CUDA.
#[derive(Debug)]
struct Registration {
    resource: CuResource,
    context: CuContext,
    width: u32,
    height: u32,
    internal_format: u32,
}

#[derive(Debug, Default)]
struct State {
    guard: ContextGuard,
    registry: Registry<Registration>,
}

// SAFETY: the CUDA handles are only used under the interop mutex, with the
// owning context pushed.
unsafe impl Send for State {}

/**
    Zero-copy interop for CUDA frames.
*/
#[derive(Debug)]
pub struct CudaInterop {
    api: CudaApi,
    state: Mutex<State>,
}

impl CudaInterop {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            api: CudaApi::load()?,
            state: Mutex::new(State::default()),
        })
    }

    pub fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn release(&self, registration: Registration) {
        let result = self.api.with_context(registration.context, || {
            // SAFETY: the resource was registered by this API instance.
            let ret = unsafe { (self.api.unregister)(registration.resource) };
            self.api.check(ret, "cuGraphicsUnregisterResource")
        });
        if let Err(e) = result {
            warn!("{e}");
        }
    }
}

/**
    Returns the GL internal format, pixel format and type a plane is stored as.
*/
const fn texture_format(format: PixelFormat, plane: usize) -> (u32, u32, u32) {
    let wide = format.bytes_per_pixel(0) == 2;
    let interleaved = plane == 1 && format.plane_count() == 2;
    match (interleaved, wide) {
        (false, false) => (gl::R8, gl::RED, gl::UNSIGNED_BYTE),
        (false, true) => (gl::R16, gl::RED, gl::UNSIGNED_SHORT),
        (true, false) => (gl::RG8, gl::RG, gl::UNSIGNED_BYTE),
        (true, true) => (gl::RG16, gl::RG, gl::UNSIGNED_SHORT),
    }
}

impl InteropBackend for CudaInterop {
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
        let Some(NativeSurface::Cuda { planes, pitches }) = surface.native() else {
            return Err(Error::unsupported_format("frame is not a CUDA surface"));
        };
        let sw_format = surface
            .sw_format()
            .ok_or_else(|| Error::unsupported_format("surface layout is unknown"))?;
        if plane >= planes.len() || plane >= sw_format.plane_count() {
            return Err(Error::invalid_data(format!(
                "{sw_format:?} has no plane {plane}"
            )));
        }
        // SAFETY: the device context of a CUDA frame is an AVCUDADeviceContext.
        let (context, stream) = unsafe {
            ffi::frame_device_hwctx::<ffi::CudaDeviceContext>(surface.as_ptr())
                .as_ref()
                .map(|hwctx| (hwctx.cuda_ctx, hwctx.stream))
        }
        .filter(|(context, _)| !context.is_null())
        .ok_or_else(|| Error::surface("frame has no CUDA context"))?;

        let mut state = self.state.lock();
        state.guard.bind_current()?;
        loader::load()?;

        let plane_width = sw_format.plane_width(plane, width);
        let plane_height = sw_format.plane_height(plane, height);
        let (internal_format, pixel_format, pixel_type) = texture_format(sw_format, plane);
        let fits = |r: &Registration| {
            r.width == plane_width
                && r.height == plane_height
                && r.internal_format == internal_format
                && r.context == context
        };

        self.api.with_context(context, || {
            let registration = state.registry.obtain(
                texture,
                fits,
                || {
                    // SAFETY: the texture belongs to the current GL context.
                    unsafe {
                        gl::BindTexture(gl::TEXTURE_2D, texture);
                        gl::TexImage2D(
                            gl::TEXTURE_2D,
                            0,
                            internal_format as i32,
                            plane_width as i32,
                            plane_height as i32,
                            0,
                            pixel_format,
                            pixel_type,
                            std::ptr::null(),
                        );
                        gl::BindTexture(gl::TEXTURE_2D, 0);
                    }
                    let mut resource = std::ptr::null_mut();
                    // SAFETY: see above.
                    let ret = unsafe {
                        (self.api.register_image)(
                            &mut resource,
                            texture,
                            gl::TEXTURE_2D,
                            CU_GRAPHICS_REGISTER_FLAGS_WRITE_DISCARD,
                        )
                    };
                    self.api.check(ret, "cuGraphicsGLRegisterImage")?;
                    trace!("registered texture {texture} with CUDA");
                    Ok(Registration {
                        resource,
                        context,
                        width: plane_width,
                        height: plane_height,
                        internal_format,
                    })
                },
                |old| self.release(old),
            )?;
            let copy = CudaMemcpy2d {
                src_x_in_bytes: 0,
                src_y: 0,
                src_memory_type: CU_MEMORYTYPE_DEVICE,
                src_host: std::ptr::null(),
                src_device: planes[plane],
                src_array: std::ptr::null_mut(),
                src_pitch: pitches[plane],
                dst_x_in_bytes: 0,
                dst_y: 0,
                dst_memory_type: CU_MEMORYTYPE_ARRAY,
                dst_host: std::ptr::null_mut(),
                dst_device: 0,
                dst_array: std::ptr::null_mut(),
                dst_pitch: 0,
                width_in_bytes: sw_format.bytes_per_line(plane, width),
                height: plane_height as usize,
            };
            copy_to_texture(&self.api, &mut registration.resource, stream, copy)
        })?;
        state.registry.set_mapped(texture);
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        // Each copy unmaps the resource again; the registration is kept.
        Ok(self.state.lock().registry.unmap(texture).is_some())
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

fn copy_to_texture(
    api: &CudaApi,
    resource: &mut CuResource,
    stream: CuStream,
    mut copy: CudaMemcpy2d,
) -> Result<()> {
    // SAFETY: the resource is registered and the owning CUDA context is
    // current; it is unmapped again on every path after a successful map.
    unsafe {
        api.check(
            (api.map_resources)(1, resource, stream),
            "cuGraphicsMapResources",
        )?;
        let mut array = std::ptr::null_mut();
        let result = api
            .check(
                (api.mapped_array)(&mut array, *resource, 0, 0),
                "cuGraphicsSubResourceGetMappedArray",
            )
            .and_then(|()| {
                copy.dst_array = array;
                api.check((api.memcpy_2d)(&copy, stream), "cuMemcpy2DAsync")
            });
        let unmapped = api.check(
            (api.unmap_resources)(1, resource, stream),
            "cuGraphicsUnmapResources",
        );
        result?;
        unmapped?;
        api.check((api.synchronize)(stream), "cuStreamSynchronize")
    }
}

impl Drop for CudaInterop {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.registry.is_empty() {
            return;
        }
        let owner = state.guard.owner();
        if owner.is_some() && owner == probe::current_context() {
            let registrations: Vec<_> = state.registry.drain().map(|(_, r)| r).collect();
            for registration in registrations {
                self.release(registration);
            }
        } else {
            warn!(
                "dropping CUDA interop with {} textures registered off its GL context",
                state.registry.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_texture_formats() {
        assert_eq!(
            texture_format(PixelFormat::Nv12, 0),
            (gl::R8, gl::RED, gl::UNSIGNED_BYTE)
        );
        assert_eq!(
            texture_format(PixelFormat::Nv12, 1),
            (gl::RG8, gl::RG, gl::UNSIGNED_BYTE)
        );
        assert_eq!(
            texture_format(PixelFormat::P010, 1),
            (gl::RG16, gl::RG, gl::UNSIGNED_SHORT)
        );
        assert_eq!(
            texture_format(PixelFormat::Yuv420p, 2),
            (gl::R8, gl::RED, gl::UNSIGNED_BYTE)
        );
    }

    #[test]
    fn memcpy_descriptor_layout() {
        // both memory type enums are padded to 8 bytes
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<CudaMemcpy2d>(), 128);
    }
}
