/*!
    DXVA2 surfaces to GL textures.

    Each GL texture gets a shareable `X8R8G8B8` render target on the decoder's
    Direct3D 9Ex device. A map stretches the decoded surface into it, which
    also converts NV12 to RGB, and hands the target to GL through
    `WGL_NV_DX_interop2`. Targets stay registered until the frame size
    changes; unmapping only hands them back to Direct3D.
*/

use std::ffi::c_void;

use parking_lot::Mutex;
use tracing::{debug, warn};
use windows::{
    Win32::{
        Foundation::{FALSE, HANDLE, RECT, TRUE},
        Graphics::Direct3D9::{
            D3DFMT_X8R8G8B8, D3DPOOL_DEFAULT, D3DTEXF_LINEAR, D3DUSAGE_RENDERTARGET,
            IDirect3DDevice9, IDirect3DSurface9, IDirect3DTexture9,
        },
        Media::MediaFoundation::IDirect3DDeviceManager9,
    },
    core::Interface,
};

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result, VideoFrame};

use super::{
    InteropBackend,
    state::{ContextGuard, Registry},
    wgl::{DxInterop, SharedTexture},
};
use crate::{
    config::Backend,
    ffi,
    probe::{self, loader},
    surface::{HwFrame, NativeSurface},
};

/**
    Zero-copy interop for DXVA2 frames.
*/
#[derive(Debug)]
pub struct DxvaInterop {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    guard: ContextGuard,
    dx: Option<std::result::Result<DxInterop, String>>,
    device: Option<SharedDevice>,
    registry: Registry<Target>,
}

/// The decoder's device, opened for sharing.
#[derive(Debug)]
struct SharedDevice {
    manager: IDirect3DDeviceManager9,
    handle: HANDLE,
    device: IDirect3DDevice9,
    dx_device: *mut c_void,
}

#[derive(Debug)]
struct Target {
    _texture: IDirect3DTexture9,
    surface: IDirect3DSurface9,
    shared: SharedTexture,
    size: (u32, u32),
}

// SAFETY: the COM objects are only used under the interop mutex, and the
// device itself is guarded by the device manager lock.
unsafe impl Send for State {}

impl DxvaInterop {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::Dxva
    }
}

impl Default for DxvaInterop {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDevice {
    fn open(manager: IDirect3DDeviceManager9, dx: &DxInterop) -> Result<Self> {
        // SAFETY: the manager is live; the handle is closed in `close`.
        unsafe {
            let handle = manager
                .OpenDeviceHandle()
                .map_err(|e| Error::surface(format!("OpenDeviceHandle: {e}")))?;
            let mut device = None;
            let locked = manager.LockDevice(handle, &mut device, TRUE);
            if let Err(e) = locked {
                let _ = manager.CloseDeviceHandle(handle);
                return Err(Error::surface(format!("LockDevice: {e}")));
            }
            let _ = manager.UnlockDevice(handle, FALSE);
            let Some(device) = device else {
                let _ = manager.CloseDeviceHandle(handle);
                return Err(Error::surface("device manager has no device"));
            };
            let dx_device = match dx.open_device(device.as_raw()) {
                Ok(dx_device) => dx_device,
                Err(e) => {
                    let _ = manager.CloseDeviceHandle(handle);
                    return Err(e);
                }
            };
            debug!("DXVA2 interop opened on device {:p}", device.as_raw());
            Ok(Self {
                manager,
                handle,
                device,
                dx_device,
            })
        }
    }

    fn stretch(
        &self,
        source: &IDirect3DSurface9,
        target: &IDirect3DSurface9,
        rect: RECT,
    ) -> Result<()> {
        // SAFETY: both surfaces live on this device; the manager lock keeps
        // the decoder off the device during the blit.
        unsafe {
            let mut device = None;
            self.manager
                .LockDevice(self.handle, &mut device, TRUE)
                .map_err(|e| Error::surface(format!("LockDevice: {e}")))?;
            let result = self
                .device
                .StretchRect(source, &rect, target, &rect, D3DTEXF_LINEAR)
                .map_err(|e| Error::surface(format!("StretchRect: {e}")));
            let _ = self.manager.UnlockDevice(self.handle, FALSE);
            result
        }
    }

    fn create_target(&self, dx: &DxInterop, texture: u32, size: (u32, u32)) -> Result<Target> {
        // SAFETY: the out pointers are valid; the texture outlives its
        // registration.
        unsafe {
            let mut d3d_texture: Option<IDirect3DTexture9> = None;
            let mut share = HANDLE::default();
            self.device
                .CreateTexture(
                    size.0,
                    size.1,
                    1,
                    D3DUSAGE_RENDERTARGET as u32,
                    D3DFMT_X8R8G8B8,
                    D3DPOOL_DEFAULT,
                    &mut d3d_texture,
                    &mut share,
                )
                .map_err(|e| Error::surface(format!("CreateTexture: {e}")))?;
            let d3d_texture = d3d_texture.ok_or_else(|| Error::surface("no render target"))?;
            let surface = d3d_texture
                .GetSurfaceLevel(0)
                .map_err(|e| Error::surface(format!("GetSurfaceLevel: {e}")))?;
            dx.set_share_handle(d3d_texture.as_raw(), share.0)?;
            let object = dx.register(self.dx_device, d3d_texture.as_raw(), texture)?;
            Ok(Target {
                _texture: d3d_texture,
                surface,
                shared: SharedTexture {
                    object,
                    locked: false,
                },
                size,
            })
        }
    }

    /// # Safety
    /// No objects may still be registered on the device.
    unsafe fn close(self, dx: &DxInterop) {
        // SAFETY: upheld by the caller.
        unsafe {
            dx.close_device(self.dx_device);
            let _ = self.manager.CloseDeviceHandle(self.handle);
        }
    }
}

impl State {
    fn dx(&mut self) -> Result<&DxInterop> {
        if self.dx.is_none() {
            let loaded = DxInterop::load().map_err(|e| e.to_string());
            if let Err(e) = &loaded {
                warn!("DXVA2 interop unavailable: {e}");
            }
            self.dx = Some(loaded);
        }
        match &self.dx {
            Some(Ok(dx)) => Ok(dx),
            Some(Err(e)) => Err(Error::unsupported(e.clone())),
            None => Err(Error::unsupported("WGL_NV_DX_interop")),
        }
    }

    fn release(&mut self, target: Target) {
        if let (Some(Ok(dx)), Some(device)) = (&self.dx, &self.device) {
            // SAFETY: the target was registered on this device.
            unsafe { target.shared.destroy(dx, device.dx_device) };
        }
    }

    fn release_all(&mut self) {
        let targets: Vec<_> = self.registry.drain().map(|(_, t)| t).collect();
        for target in targets {
            self.release(target);
        }
        if let (Some(Ok(dx)), Some(device)) = (&self.dx, self.device.take()) {
            // SAFETY: every target was destroyed above.
            unsafe { device.close(dx) };
        }
    }
}

impl InteropBackend for DxvaInterop {
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
        if plane != 0 {
            return Err(Error::unsupported_format(
                "DXVA2 interop produces a single RGB texture",
            ));
        }
        let Some(NativeSurface::Dxva { surface: source }) = surface.native() else {
            return Err(Error::unsupported_format("frame is not a DXVA2 surface"));
        };
        // SAFETY: the device context of a DXVA2 frame is an
        // AVDXVA2DeviceContext, alive while the frame is.
        let devmgr = unsafe {
            ffi::frame_device_hwctx::<ffi::Dxva2DeviceContext>(surface.as_ptr())
                .as_ref()
                .map(|hwctx| hwctx.devmgr)
        }
        .ok_or_else(|| Error::surface("frame has no device manager"))?;
        let manager = unsafe { IDirect3DDeviceManager9::from_raw_borrowed(&devmgr) }
            .cloned()
            .ok_or_else(|| Error::surface("frame has no device manager"))?;
        let source_ptr = source as *mut c_void;
        let source = unsafe { IDirect3DSurface9::from_raw_borrowed(&source_ptr) }
            .ok_or_else(|| Error::surface("frame has no surface"))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.guard.bind_current()?;
        loader::load()?;
        state.dx()?;

        let same_manager = state
            .device
            .as_ref()
            .is_some_and(|d| d.manager.as_raw() == manager.as_raw());
        if !same_manager {
            state.release_all();
            let Some(Ok(dx)) = &state.dx else {
                return Err(Error::unsupported("WGL_NV_DX_interop"));
            };
            state.device = Some(SharedDevice::open(manager, dx)?);
        }
        let (Some(Ok(dx)), Some(device)) = (&state.dx, &state.device) else {
            return Err(Error::unsupported("WGL_NV_DX_interop"));
        };

        let target = state.registry.obtain(
            texture,
            |target| target.size == (width, height),
            || device.create_target(dx, texture, (width, height)),
            // SAFETY: registered on this device.
            |old| unsafe { old.shared.destroy(dx, device.dx_device) },
        )?;

        let rect = RECT {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        };
        // SAFETY: registered on this device; D3D must own the target while
        // it is written.
        unsafe {
            target.shared.release(dx, device.dx_device)?;
            device.stretch(source, &target.surface, rect)?;
            target.shared.acquire(dx, device.dx_device)?;
        }
        state.registry.set_mapped(texture);
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (Some(Ok(dx)), Some(device)) = (&state.dx, &state.device) else {
            return Ok(false);
        };
        let Some(target) = state.registry.unmap(texture) else {
            return Ok(false);
        };
        // SAFETY: registered on this device.
        unsafe { target.shared.release(dx, device.dx_device)? };
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

impl Drop for DxvaInterop {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let owner = state.guard.owner();
        if owner.is_some() && owner == probe::current_context() {
            state.release_all();
        } else if !state.registry.is_empty() {
            warn!(
                "dropping DXVA2 interop with {} textures shared off its GL context",
                state.registry.len()
            );
        }
    }
}
