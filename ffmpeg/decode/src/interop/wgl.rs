/*!
    `WGL_NV_DX_interop2`: sharing Direct3D resources with GL textures.
*/

use std::ffi::c_void;

use ffmpeg_types::{Error, Result};

use crate::probe::loader;

const GL_TEXTURE_2D: u32 = 0x0DE1;
const WGL_ACCESS_READ_ONLY_NV: u32 = 0x0000;

type Handle = *mut c_void;

/**
    The interop entry points, resolved for the current GL context.
*/
#[derive(Debug)]
pub(crate) struct DxInterop {
    open_device: unsafe extern "system" fn(*mut c_void) -> Handle,
    close_device: unsafe extern "system" fn(Handle) -> i32,
    register: unsafe extern "system" fn(Handle, *mut c_void, u32, u32, u32) -> Handle,
    unregister: unsafe extern "system" fn(Handle, Handle) -> i32,
    lock: unsafe extern "system" fn(Handle, i32, *mut Handle) -> i32,
    unlock: unsafe extern "system" fn(Handle, i32, *mut Handle) -> i32,
    set_share_handle: unsafe extern "system" fn(*mut c_void, Handle) -> i32,
}

/// # Safety
/// `T` must be the function pointer type of `name`.
unsafe fn entry<T: Copy>(name: &str) -> Result<T> {
    let ptr = loader::proc_address(name);
    if ptr.is_null() {
        return Err(Error::unsupported(format!("WGL_NV_DX_interop ({name})")));
    }
    // SAFETY: upheld by the caller; T is pointer sized.
    Ok(unsafe { std::mem::transmute_copy::<*const c_void, T>(&ptr) })
}

impl DxInterop {
    /**
        Resolve the entry points. A GL context must be current.
    */
    pub(crate) fn load() -> Result<Self> {
        // SAFETY: the signatures match WGL_NV_DX_interop.
        unsafe {
            Ok(Self {
                open_device: entry("wglDXOpenDeviceNV")?,
                close_device: entry("wglDXCloseDeviceNV")?,
                register: entry("wglDXRegisterObjectNV")?,
                unregister: entry("wglDXUnregisterObjectNV")?,
                lock: entry("wglDXLockObjectsNV")?,
                unlock: entry("wglDXUnlockObjectsNV")?,
                set_share_handle: entry("wglDXSetResourceShareHandleNV")?,
            })
        }
    }

    /**
        Open a Direct3D 9Ex or 11 device for sharing.

        # Safety

        `device` must be a live device pointer.
    */
    pub(crate) unsafe fn open_device(&self, device: *mut c_void) -> Result<Handle> {
        // SAFETY: upheld by the caller.
        let handle = unsafe { (self.open_device)(device) };
        if handle.is_null() {
            return Err(Error::surface("wglDXOpenDeviceNV failed"));
        }
        Ok(handle)
    }

    /// # Safety
    /// `device` must come from [`Self::open_device`] and have no registered objects.
    pub(crate) unsafe fn close_device(&self, device: Handle) {
        // SAFETY: upheld by the caller.
        unsafe { (self.close_device)(device) };
    }

    /**
        Let `texture` alias `resource`, read-only from GL.

        # Safety

        `device` must be open and `resource` a texture created on it.
    */
    pub(crate) unsafe fn register(
        &self,
        device: Handle,
        resource: *mut c_void,
        texture: u32,
    ) -> Result<Handle> {
        // SAFETY: upheld by the caller.
        let object = unsafe {
            (self.register)(
                device,
                resource,
                texture,
                GL_TEXTURE_2D,
                WGL_ACCESS_READ_ONLY_NV,
            )
        };
        if object.is_null() {
            return Err(Error::surface(format!(
                "wglDXRegisterObjectNV failed for texture {texture}"
            )));
        }
        Ok(object)
    }

    /// # Safety
    /// `object` must be registered on `device` and unlocked.
    pub(crate) unsafe fn unregister(&self, device: Handle, object: Handle) {
        // SAFETY: upheld by the caller.
        unsafe { (self.unregister)(device, object) };
    }

    /**
        Hand `object` to GL.

        # Safety

        `object` must be registered on `device`.
    */
    pub(crate) unsafe fn lock(&self, device: Handle, object: Handle) -> Result<()> {
        let mut objects = [object];
        // SAFETY: upheld by the caller.
        if unsafe { (self.lock)(device, 1, objects.as_mut_ptr()) } == 0 {
            return Err(Error::surface("wglDXLockObjectsNV failed"));
        }
        Ok(())
    }

    /**
        Hand `object` back to Direct3D.

        # Safety

        `object` must be locked on `device`.
    */
    pub(crate) unsafe fn unlock(&self, device: Handle, object: Handle) -> Result<()> {
        let mut objects = [object];
        // SAFETY: upheld by the caller.
        if unsafe { (self.unlock)(device, 1, objects.as_mut_ptr()) } == 0 {
            return Err(Error::surface("wglDXUnlockObjectsNV failed"));
        }
        Ok(())
    }

    /**
        Tell the driver the share handle of a Direct3D 9 resource before it is
        registered.

        # Safety

        `resource` must be live and `share` the handle it was created with.
    */
    pub(crate) unsafe fn set_share_handle(&self, resource: *mut c_void, share: Handle) -> Result<()> {
        // SAFETY: upheld by the caller.
        if unsafe { (self.set_share_handle)(resource, share) } == 0 {
            return Err(Error::surface("wglDXSetResourceShareHandleNV failed"));
        }
        Ok(())
    }
}

/**
    A GL texture aliasing a Direct3D texture.
*/
#[derive(Debug)]
pub(crate) struct SharedTexture {
    pub(crate) object: Handle,
    pub(crate) locked: bool,
}

impl SharedTexture {
    /**
        Make the texture readable from GL; a no-op if it already is.

        # Safety

        `device` must be the device `self` was registered on.
    */
    pub(crate) unsafe fn acquire(&mut self, dx: &DxInterop, device: Handle) -> Result<()> {
        if !self.locked {
            // SAFETY: upheld by the caller.
            unsafe { dx.lock(device, self.object)? };
            self.locked = true;
        }
        Ok(())
    }

    /**
        Give the texture back to Direct3D so it can be written.

        # Safety

        `device` must be the device `self` was registered on.
    */
    pub(crate) unsafe fn release(&mut self, dx: &DxInterop, device: Handle) -> Result<()> {
        if self.locked {
            // SAFETY: upheld by the caller.
            unsafe { dx.unlock(device, self.object)? };
            self.locked = false;
        }
        Ok(())
    }

    /**
        Unlock and unregister.

        # Safety

        `device` must be the device `self` was registered on.
    */
    pub(crate) unsafe fn destroy(mut self, dx: &DxInterop, device: Handle) {
        // SAFETY: upheld by the caller.
        unsafe {
            if let Err(e) = self.release(dx, device) {
                tracing::warn!("{e}");
            }
            dx.unregister(device, self.object);
        }
    }
}
