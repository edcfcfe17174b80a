/*!
    Desktop GL entry point resolution and string queries.

    Entry points are resolved through whichever window system the current
    context belongs to: EGL, GLX, WGL or CGL.
*/

use std::{
    ffi::{CStr, c_char, c_void},
    sync::OnceLock,
};

use libloading::Library;
use tracing::debug;

use ffmpeg_types::{Error, Result};

use super::{ExtensionSet, GlPlatform};

/**
    Returns the current context and the window system it belongs to.
*/
pub(crate) fn current_context() -> Option<(GlPlatform, usize)> {
    #[cfg(target_os = "linux")]
    {
        if let Some((_, context)) = super::egl::current() {
            return Some((GlPlatform::Egl, context.as_ptr() as usize));
        }
        glx_current_context().map(|context| (GlPlatform::Glx, context))
    }
    #[cfg(windows)]
    {
        // SAFETY: wglGetCurrentContext has no preconditions.
        let context = unsafe { windows::Win32::Graphics::OpenGL::wglGetCurrentContext() };
        let context = context.0 as usize;
        (context != 0).then_some((GlPlatform::Wgl, context))
    }
    #[cfg(target_os = "macos")]
    {
        // SAFETY: CGLGetCurrentContext has no preconditions.
        let context = unsafe { cgl::CGLGetCurrentContext() } as usize;
        (context != 0).then_some((GlPlatform::Cgl, context))
    }
    #[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
    {
        None
    }
}

/**
    Resolve a GL entry point for the current context.
*/
pub(crate) fn proc_address(name: &str) -> *const c_void {
    #[cfg(target_os = "linux")]
    {
        if super::egl::current().is_some() {
            return super::egl::proc_address(name);
        }
        glx_proc_address(name)
    }
    #[cfg(windows)]
    {
        wgl_proc_address(name)
    }
    #[cfg(target_os = "macos")]
    {
        library_symbol(opengl_framework(), name)
    }
    #[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
    {
        let _ = name;
        std::ptr::null()
    }
}

/**
    Load the `gl` crate's function pointers from the current context.

    Loading happens once per process after the first success; every later
    call is a no-op.
*/
pub(crate) fn load() -> Result<()> {
    static LOADED: OnceLock<()> = OnceLock::new();
    if LOADED.get().is_some() {
        return Ok(());
    }
    if current_context().is_none() {
        return Err(Error::unsupported("no current OpenGL context"));
    }
    gl::load_with(proc_address);
    if !(gl::GetString::is_loaded() && gl::BindTexture::is_loaded()) {
        return Err(Error::unsupported("OpenGL entry points could not be resolved"));
    }
    debug!("GL entry points loaded");
    LOADED.get_or_init(|| ());
    Ok(())
}

/**
    Read a GL string such as `GL_VERSION`.
*/
pub(crate) fn string(name: gl::types::GLenum) -> Option<String> {
    // SAFETY: glGetString returns a static nul-terminated string or null.
    unsafe {
        let value = gl::GetString(name);
        if value.is_null() {
            return None;
        }
        Some(
            CStr::from_ptr(value as *const c_char)
                .to_string_lossy()
                .into_owned(),
        )
    }
}

/**
    Read the extension list of the current context.
*/
pub(crate) fn extensions() -> ExtensionSet {
    if gl::GetStringi::is_loaded() {
        let mut count = 0;
        // SAFETY: GL_NUM_EXTENSIONS writes one integer.
        unsafe { gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut count) };
        if count > 0 {
            return (0..count as u32)
                .filter_map(|index| {
                    // SAFETY: index is below GL_NUM_EXTENSIONS.
                    let value = unsafe { gl::GetStringi(gl::EXTENSIONS, index) };
                    if value.is_null() {
                        return None;
                    }
                    // SAFETY: non-null GL strings are nul-terminated.
                    let name = unsafe { CStr::from_ptr(value as *const c_char) };
                    Some(name.to_string_lossy().into_owned())
                })
                .collect();
        }
    }
    string(gl::EXTENSIONS)
        .map(|list| ExtensionSet::parse(&list))
        .unwrap_or_default()
}

#[cfg(target_os = "macos")]
fn library_symbol(library: Option<&'static Library>, name: &str) -> *const c_void {
    let Some(library) = library else {
        return std::ptr::null();
    };
    // SAFETY: the symbol is only used as an opaque address here.
    unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) }
        .map_or(std::ptr::null(), |symbol| *symbol as *const c_void)
}

#[cfg(target_os = "linux")]
fn libgl() -> Option<&'static Library> {
    static LIBGL: OnceLock<Option<Library>> = OnceLock::new();
    LIBGL
        .get_or_init(|| crate::dylib::probe(crate::dylib::LIBGL).ok())
        .as_ref()
}

#[cfg(target_os = "linux")]
fn glx_current_context() -> Option<usize> {
    type GetCurrentContext = unsafe extern "C" fn() -> *mut c_void;
    let library = libgl()?;
    // SAFETY: glXGetCurrentContext takes no arguments.
    unsafe {
        let get: GetCurrentContext =
            crate::dylib::symbol(library, "glXGetCurrentContext").ok()?;
        let context = get();
        (!context.is_null()).then_some(context as usize)
    }
}

#[cfg(target_os = "linux")]
fn glx_proc_address(name: &str) -> *const c_void {
    type GetProcAddress = unsafe extern "C" fn(*const u8) -> *const c_void;
    let Some(library) = libgl() else {
        return std::ptr::null();
    };
    let Ok(name) = std::ffi::CString::new(name) else {
        return std::ptr::null();
    };
    // SAFETY: glXGetProcAddressARB takes a nul-terminated name.
    unsafe {
        match crate::dylib::symbol::<GetProcAddress>(library, "glXGetProcAddressARB") {
            Ok(get) => get(name.as_ptr() as *const u8),
            Err(_) => std::ptr::null(),
        }
    }
}

#[cfg(windows)]
fn wgl_proc_address(name: &str) -> *const c_void {
    use windows::{Win32::Graphics::OpenGL::wglGetProcAddress, core::PCSTR};

    static OPENGL32: OnceLock<Option<Library>> = OnceLock::new();

    let Ok(cname) = std::ffi::CString::new(name) else {
        return std::ptr::null();
    };
    // SAFETY: wglGetProcAddress takes a nul-terminated name.
    let address = unsafe { wglGetProcAddress(PCSTR(cname.as_ptr() as *const u8)) };
    if let Some(address) = address {
        let value = address as usize;
        // wglGetProcAddress signals failure with small sentinel values too
        if !matches!(value, 1 | 2 | 3 | usize::MAX) {
            return value as *const c_void;
        }
    }
    // GL 1.1 functions are only exported by opengl32.dll itself.
    let library = OPENGL32
        .get_or_init(|| crate::dylib::probe(&["opengl32.dll"]).ok())
        .as_ref();
    match library {
        // SAFETY: the symbol is only used as an opaque address here.
        Some(library) => unsafe { library.get::<unsafe extern "system" fn()>(name.as_bytes()) }
            .map_or(std::ptr::null(), |symbol| *symbol as *const c_void),
        None => std::ptr::null(),
    }
}

#[cfg(target_os = "macos")]
fn opengl_framework() -> Option<&'static Library> {
    static FRAMEWORK: OnceLock<Option<Library>> = OnceLock::new();
    FRAMEWORK
        .get_or_init(|| {
            crate::dylib::probe(&["/System/Library/Frameworks/OpenGL.framework/OpenGL"]).ok()
        })
        .as_ref()
}

#[cfg(target_os = "macos")]
pub(crate) mod cgl {
    use std::ffi::c_void;

    pub(crate) type CGLContextObj = *mut c_void;

    #[link(name = "OpenGL", kind = "framework")]
    unsafe extern "C" {
        pub(crate) fn CGLGetCurrentContext() -> CGLContextObj;
        pub(crate) fn CGLTexImageIOSurface2D(
            ctx: CGLContextObj,
            target: u32,
            internal_format: u32,
            width: i32,
            height: i32,
            format: u32,
            ty: u32,
            io_surface: *mut c_void,
            plane: u32,
        ) -> i32;
    }
}
