/*!
    Backend-specific `hwctx` layouts and accessors.

    Only the leading fields this crate reads or writes are mirrored; the
    structures are always allocated by FFmpeg at their full size.
*/

use std::ffi::{c_uint, c_void};

use ffmpeg_next::ffi::{AVBufferRef, AVFrame, AVHWDeviceContext, AVHWFramesContext};

use ffmpeg_types::PixelFormat;

/// `AVVAAPIDeviceContext`
#[repr(C)]
pub(crate) struct VaapiDeviceContext {
    pub display: *mut c_void,
    pub driver_quirks: c_uint,
}

/// `AVCUDADeviceContext`
#[repr(C)]
pub(crate) struct CudaDeviceContext {
    pub cuda_ctx: *mut c_void,
    pub stream: *mut c_void,
}

/// `AVD3D11VADeviceContext`
#[repr(C)]
pub(crate) struct D3d11DeviceContext {
    pub device: *mut c_void,
    pub device_context: *mut c_void,
    pub video_device: *mut c_void,
    pub video_context: *mut c_void,
    pub lock: Option<unsafe extern "C" fn(*mut c_void)>,
    pub unlock: Option<unsafe extern "C" fn(*mut c_void)>,
    pub lock_ctx: *mut c_void,
}

impl D3d11DeviceContext {
    /**
        Run `f` with the device lock FFmpeg uses around the immediate context held.
    */
    pub(crate) fn locked<T>(&self, f: impl FnOnce() -> T) -> T {
        if let Some(lock) = self.lock {
            // SAFETY: lock and lock_ctx are installed together by FFmpeg.
            unsafe { lock(self.lock_ctx) };
        }
        let result = f();
        if let Some(unlock) = self.unlock {
            // SAFETY: see above.
            unsafe { unlock(self.lock_ctx) };
        }
        result
    }
}

/// `AVDXVA2DeviceContext`
#[repr(C)]
pub(crate) struct Dxva2DeviceContext {
    pub devmgr: *mut c_void,
}

/**
    Returns the `hwctx` of a device reference, typed as `T`.

    # Safety

    `device` must be a live `AVHWDeviceContext` reference whose type matches `T`.
*/
pub(crate) unsafe fn device_hwctx<T>(device: *mut AVBufferRef) -> *mut T {
    if device.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: upheld by the caller.
    unsafe {
        let ctx = (*device).data as *mut AVHWDeviceContext;
        if ctx.is_null() {
            return std::ptr::null_mut();
        }
        (*ctx).hwctx as *mut T
    }
}

/**
    Returns the frames context a hardware frame was allocated from.

    # Safety

    `frame` must be a valid frame.
*/
pub(crate) unsafe fn frames_context(frame: *const AVFrame) -> *mut AVHWFramesContext {
    // SAFETY: upheld by the caller.
    unsafe {
        let frames_ref = (*frame).hw_frames_ctx;
        if frames_ref.is_null() {
            return std::ptr::null_mut();
        }
        (*frames_ref).data as *mut AVHWFramesContext
    }
}

/**
    Returns the device `hwctx` behind a hardware frame, typed as `T`.

    # Safety

    `frame` must be a valid hardware frame whose device type matches `T`.
*/
pub(crate) unsafe fn frame_device_hwctx<T>(frame: *const AVFrame) -> *mut T {
    // SAFETY: upheld by the caller.
    unsafe {
        let frames = frames_context(frame);
        if frames.is_null() || (*frames).device_ctx.is_null() {
            return std::ptr::null_mut();
        }
        (*(*frames).device_ctx).hwctx as *mut T
    }
}

/**
    Returns the software layout of a hardware frame's surfaces.

    # Safety

    `frame` must be a valid frame.
*/
pub(crate) unsafe fn frame_sw_format(frame: *const AVFrame) -> Option<PixelFormat> {
    // SAFETY: upheld by the caller.
    unsafe {
        let frames = frames_context(frame);
        if frames.is_null() {
            return None;
        }
        super::pixel_format((*frames).sw_format)
    }
}

/**
    Returns the allocated surface size of a hardware frame.

    # Safety

    `frame` must be a valid frame.
*/
pub(crate) unsafe fn frame_surface_size(frame: *const AVFrame) -> Option<(u32, u32)> {
    // SAFETY: upheld by the caller.
    unsafe {
        let frames = frames_context(frame);
        if frames.is_null() {
            return None;
        }
        Some(((*frames).width.max(0) as u32, (*frames).height.max(0) as u32))
    }
}
