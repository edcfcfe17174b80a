/*!
    Hardware device context.
*/

use std::{ffi::CString, ptr};

use tracing::{debug, info};

use ffmpeg_types::{Error, Result};

use crate::{
    config::{Backend, DisplayKind, ExternalDevice},
    ffi, probe,
};

/**
    Returns the FFmpeg device type for `backend`.
*/
pub(crate) const fn device_type(backend: Backend) -> ffi::AVHWDeviceType {
    match backend {
        Backend::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
        Backend::Vaapi => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
        Backend::D3d11 => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
        Backend::Dxva => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
        Backend::VideoToolbox => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
    }
}

/**
    Hardware device context wrapper.

    Self-created devices are destroyed when the last reference goes away,
    which is after every frames context and surface made from them. Wrapped
    external devices are only referenced; the caller's native handle is
    never destroyed here.
*/
pub(crate) struct DeviceContext {
    ctx: *mut ffi::AVBufferRef,
    backend: Backend,
    external: bool,
}

impl DeviceContext {
    /**
        Create a device for `backend`.
    */
    pub fn create(backend: Backend, display: DisplayKind, path: Option<&str>) -> Result<Self> {
        let path = path
            .map(|p| CString::new(p).map_err(|_| Error::setup(backend.name(), "nul in device path")))
            .transpose()?;

        // SAFETY: the dictionary is freed below; av_hwdevice_ctx_create only
        // reads its arguments and writes the new reference on success.
        unsafe {
            let mut options: *mut ffi::AVDictionary = ptr::null_mut();
            if backend == Backend::Vaapi
                && let Some(connection) = display.connection_type()
            {
                ffi::av_dict_set(
                    &mut options,
                    c"connection_type".as_ptr(),
                    CString::new(connection)
                        .map_err(|_| Error::setup(backend.name(), "invalid connection type"))?
                        .as_ptr(),
                    0,
                );
            }

            let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret = ffi::av_hwdevice_ctx_create(
                &mut ctx,
                device_type(backend),
                path.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
                options,
                0,
            );
            ffi::av_dict_free(&mut options);
            ffi::check_setup(ret, backend.name(), "av_hwdevice_ctx_create")?;
            if ctx.is_null() {
                return Err(Error::setup(backend.name(), "no device context"));
            }

            debug!("created {} device", backend.name());
            Ok(Self {
                ctx,
                backend,
                external: false,
            })
        }
    }

    /**
        Wrap a caller-owned native device.
    */
    pub fn wrap_external(device: ExternalDevice) -> Result<Self> {
        let backend = device.backend;
        if device.handle == 0 {
            return Err(Error::setup(backend.name(), "null external device"));
        }
        // SAFETY: the allocated context is initialized with the caller's
        // handle in the field its device type expects, and freed on failure.
        unsafe {
            let mut ctx = ffi::av_hwdevice_ctx_alloc(device_type(backend));
            if ctx.is_null() {
                return Err(Error::setup(backend.name(), "av_hwdevice_ctx_alloc failed"));
            }
            if let Err(e) = fill_external(ctx, device) {
                ffi::av_buffer_unref(&mut ctx);
                return Err(e);
            }
            let ret = ffi::av_hwdevice_ctx_init(ctx);
            if let Err(e) = ffi::check_setup(ret, backend.name(), "av_hwdevice_ctx_init") {
                ffi::av_buffer_unref(&mut ctx);
                return Err(e);
            }
            info!("decoding on external {} device", backend.name());
            Ok(Self {
                ctx,
                backend,
                external: true,
            })
        }
    }

    /**
        Get the raw context pointer.
    */
    pub fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.ctx
    }

    /**
        Create a reference to the context for use in a decoder.
    */
    pub fn create_ref(&self) -> *mut ffi::AVBufferRef {
        // SAFETY: the context is valid while self lives.
        unsafe { ffi::av_buffer_ref(self.ctx) }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    /**
        Returns the backend name with the adapter vendor, where the native
        API reports one.
    */
    pub fn description(&self) -> String {
        match self.vendor() {
            Some(vendor) => format!("{} ({vendor})", self.backend.api_name()),
            None => self.backend.api_name().to_string(),
        }
    }

    fn vendor(&self) -> Option<String> {
        match self.backend {
            Backend::Cuda => probe::vendor_name(probe::VENDOR_NVIDIA).map(str::to_string),
            Backend::VideoToolbox => Some("Apple".to_string()),
            #[cfg(target_os = "linux")]
            Backend::Vaapi => self.vaapi_vendor(),
            #[cfg(windows)]
            Backend::D3d11 => self.d3d11_vendor(),
            _ => None,
        }
    }

    #[cfg(target_os = "linux")]
    fn vaapi_vendor(&self) -> Option<String> {
        use std::ffi::{CStr, c_char, c_void};

        type QueryVendorString = unsafe extern "C" fn(*mut c_void) -> *const c_char;

        let library = crate::dylib::probe(crate::dylib::LIBVA).ok()?;
        // SAFETY: vaQueryVendorString has this signature in every libva
        // release; the display belongs to this device context.
        unsafe {
            let query: QueryVendorString =
                crate::dylib::symbol(&library, "vaQueryVendorString").ok()?;
            let hwctx = ffi::device_hwctx::<ffi::VaapiDeviceContext>(self.ctx);
            if hwctx.is_null() || (*hwctx).display.is_null() {
                return None;
            }
            let vendor = query((*hwctx).display);
            if vendor.is_null() {
                return None;
            }
            Some(CStr::from_ptr(vendor).to_string_lossy().into_owned())
        }
    }

    #[cfg(windows)]
    fn d3d11_vendor(&self) -> Option<String> {
        use windows::{
            Win32::Graphics::{Direct3D11::ID3D11Device, Dxgi::IDXGIDevice},
            core::Interface,
        };

        // SAFETY: the device pointer is owned by the device context.
        unsafe {
            let hwctx = ffi::device_hwctx::<ffi::D3d11DeviceContext>(self.ctx);
            if hwctx.is_null() {
                return None;
            }
            let device = ID3D11Device::from_raw_borrowed(&(*hwctx).device)?;
            let dxgi: IDXGIDevice = device.cast().ok()?;
            let desc = dxgi.GetAdapter().ok()?.GetDesc().ok()?;
            probe::vendor_name(desc.VendorId).map(str::to_string)
        }
    }
}

/**
    Store the external handle in the device's `hwctx`.

    # Safety

    `ctx` must be a freshly allocated, uninitialized device context of
    `device.backend`'s type.
*/
unsafe fn fill_external(ctx: *mut ffi::AVBufferRef, device: ExternalDevice) -> Result<()> {
    let handle = device.handle as *mut std::ffi::c_void;
    // SAFETY: upheld by the caller.
    unsafe {
        match device.backend {
            Backend::Vaapi => {
                (*ffi::device_hwctx::<ffi::VaapiDeviceContext>(ctx)).display = handle;
            }
            Backend::Cuda => {
                (*ffi::device_hwctx::<ffi::CudaDeviceContext>(ctx)).cuda_ctx = handle;
            }
            Backend::Dxva => {
                (*ffi::device_hwctx::<ffi::Dxva2DeviceContext>(ctx)).devmgr = handle;
            }
            #[cfg(windows)]
            Backend::D3d11 => {
                use windows::{Win32::Graphics::Direct3D11::ID3D11Device, core::Interface};

                // FFmpeg releases the device on uninit, so it gets its own reference.
                let raw = handle;
                let owned = ID3D11Device::from_raw_borrowed(&raw)
                    .cloned()
                    .ok_or_else(|| Error::setup("d3d11", "invalid ID3D11Device"))?;
                (*ffi::device_hwctx::<ffi::D3d11DeviceContext>(ctx)).device = owned.into_raw();
            }
            other => {
                return Err(Error::setup(
                    other.name(),
                    "external devices are not supported for this backend",
                ));
            }
        }
    }
    Ok(())
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            // SAFETY: we own one reference.
            unsafe {
                ffi::av_buffer_unref(&mut self.ctx);
            }
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend)
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

// SAFETY: The FFmpeg buffer reference is internally reference-counted
// and thread-safe for the operations we perform.
unsafe impl Send for DeviceContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_types() {
        assert_eq!(
            device_type(Backend::Vaapi),
            ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI
        );
        assert_eq!(
            device_type(Backend::Dxva),
            ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2
        );
    }

    #[test]
    fn null_external_device_is_rejected() {
        let err = DeviceContext::wrap_external(ExternalDevice {
            backend: Backend::Vaapi,
            handle: 0,
        })
        .unwrap_err();
        assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Setup);
    }
}
