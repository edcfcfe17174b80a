/*!
    EGL, loaded at runtime.
*/

use std::{ffi::c_void, sync::OnceLock};

use khronos_egl as egl;
use tracing::debug;

use super::ExtensionSet;

pub(crate) type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

/**
    Returns the process-wide EGL instance, or `None` if libEGL is missing.
*/
pub(crate) fn instance() -> Option<&'static EglInstance> {
    static INSTANCE: OnceLock<Option<EglInstance>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            // SAFETY: libEGL has no load-time preconditions.
            match unsafe { EglInstance::load_required() } {
                Ok(instance) => Some(instance),
                Err(e) => {
                    debug!("EGL unavailable: {e}");
                    None
                }
            }
        })
        .as_ref()
}

/**
    Returns the display and context current on this thread, if any.
*/
pub(crate) fn current() -> Option<(egl::Display, egl::Context)> {
    let egl = instance()?;
    let context = egl.get_current_context()?;
    let display = egl.get_current_display()?;
    Some((display, context))
}

/**
    Returns the raw current display, for extension entry points.
*/
pub(crate) fn current_display() -> Option<*mut c_void> {
    current().map(|(display, _)| display.as_ptr())
}

/**
    Returns the client extensions of `display`.
*/
pub(crate) fn extensions(display: egl::Display) -> ExtensionSet {
    instance()
        .and_then(|egl| egl.query_string(Some(display), egl::EXTENSIONS).ok())
        .map(|list| ExtensionSet::parse(&list.to_string_lossy()))
        .unwrap_or_default()
}

/**
    Resolve an EGL or client API entry point.
*/
pub(crate) fn proc_address(name: &str) -> *const c_void {
    instance()
        .and_then(|egl| egl.get_proc_address(name))
        .map_or(std::ptr::null(), |f| f as *const c_void)
}
