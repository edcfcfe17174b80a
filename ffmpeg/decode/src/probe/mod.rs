/*!
    Platform capability probe.

    Detects which window system the current GL context belongs to, whether
    it is GLES, and which EGL and GL extensions exist. The probe needs a
    current context; its result is cached for the rest of the process once
    a probe succeeds.
*/

use std::{fmt, sync::OnceLock};

use tracing::info;

use ffmpeg_types::Result;

#[cfg(target_os = "linux")]
pub(crate) mod egl;
mod extensions;
pub(crate) mod loader;

pub use extensions::ExtensionSet;

pub const VENDOR_AMD: u32 = 0x1002;
pub const VENDOR_NVIDIA: u32 = 0x10DE;
pub const VENDOR_INTEL: u32 = 0x8086;

/**
    Window system a GL context belongs to.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlPlatform {
    Egl,
    Glx,
    Wgl,
    Cgl,
}

impl GlPlatform {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Egl => "EGL",
            Self::Glx => "GLX",
            Self::Wgl => "WGL",
            Self::Cgl => "CGL",
        }
    }
}

impl fmt::Display for GlPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/**
    What the rendering context supports.
*/
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub platform: GlPlatform,
    pub gles: bool,
    pub version: String,
    pub renderer: String,
    pub vendor: String,
    pub gl_extensions: ExtensionSet,
    pub egl_extensions: ExtensionSet,
}

impl Capabilities {
    pub fn is_egl(&self) -> bool {
        self.platform == GlPlatform::Egl
    }

    pub fn has_gl_extension(&self, name: &str) -> bool {
        self.gl_extensions.contains(name)
    }

    pub fn has_egl_extension(&self, name: &str) -> bool {
        self.egl_extensions.contains(name)
    }

    /**
        Returns the PCI vendor id guessed from the `GL_VENDOR` string.
    */
    pub fn vendor_id(&self) -> Option<u32> {
        vendor_id_from_string(&self.vendor)
    }
}

/**
    Probe the context current on this thread.

    Fails with [`ffmpeg_types::Error::Unsupported`] when no context is
    current. Successful results are cached; later calls return the cached
    value without touching GL.
*/
pub fn capabilities() -> Result<&'static Capabilities> {
    static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();
    if let Some(capabilities) = CAPABILITIES.get() {
        return Ok(capabilities);
    }
    let probed = probe_current()?;
    info!(
        "GL context: {} {} ({}), {} GL / {} EGL extensions",
        probed.platform,
        probed.version,
        probed.renderer,
        probed.gl_extensions.len(),
        probed.egl_extensions.len()
    );
    Ok(CAPABILITIES.get_or_init(|| probed))
}

fn probe_current() -> Result<Capabilities> {
    loader::load()?;
    let (platform, _) = loader::current_context()
        .ok_or_else(|| ffmpeg_types::Error::unsupported("no current OpenGL context"))?;
    let version = loader::string(gl::VERSION).unwrap_or_default();
    #[cfg(target_os = "linux")]
    let egl_extensions = egl::current()
        .map(|(display, _)| egl::extensions(display))
        .unwrap_or_default();
    #[cfg(not(target_os = "linux"))]
    let egl_extensions = ExtensionSet::default();
    Ok(Capabilities {
        platform,
        gles: is_gles_version(&version),
        renderer: loader::string(gl::RENDERER).unwrap_or_default(),
        vendor: loader::string(gl::VENDOR).unwrap_or_default(),
        version,
        gl_extensions: loader::extensions(),
        egl_extensions,
    })
}

/**
    Returns an identifier for the context current on this thread.
*/
pub fn current_context() -> Option<usize> {
    loader::current_context().map(|(_, context)| context)
}

/**
    Returns the window system of the context current on this thread.
*/
pub fn current_platform() -> Option<GlPlatform> {
    loader::current_context().map(|(platform, _)| platform)
}

/**
    Returns true if a `GL_VERSION` string describes an OpenGL ES context.
*/
pub fn is_gles_version(version: &str) -> bool {
    version.trim_start().starts_with("OpenGL ES")
}

/**
    Returns the vendor name for a PCI vendor id.
*/
pub fn vendor_name(id: u32) -> Option<&'static str> {
    match id {
        VENDOR_AMD => Some("AMD"),
        VENDOR_NVIDIA => Some("NVIDIA"),
        VENDOR_INTEL => Some("Intel"),
        0x5143 => Some("Qualcomm"),
        0x106B => Some("Apple"),
        0x1414 => Some("Microsoft"),
        _ => None,
    }
}

fn vendor_id_from_string(vendor: &str) -> Option<u32> {
    let vendor = vendor.to_ascii_lowercase();
    if vendor.contains("nvidia") {
        Some(VENDOR_NVIDIA)
    } else if vendor.contains("intel") {
        Some(VENDOR_INTEL)
    } else if vendor.contains("amd") || vendor.contains("ati ") || vendor.contains("advanced micro") {
        Some(VENDOR_AMD)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gles_versions() {
        assert!(is_gles_version("OpenGL ES 3.2 Mesa 23.1.4"));
        assert!(!is_gles_version("4.6 (Core Profile) Mesa 23.1.4"));
        assert!(!is_gles_version(""));
    }

    #[test]
    fn vendors() {
        assert_eq!(vendor_name(0x10DE), Some("NVIDIA"));
        assert_eq!(vendor_name(0x1002), Some("AMD"));
        assert_eq!(vendor_name(0x8086), Some("Intel"));
        assert_eq!(vendor_name(0xFFFF), None);
        assert_eq!(vendor_id_from_string("NVIDIA Corporation"), Some(VENDOR_NVIDIA));
        assert_eq!(vendor_id_from_string("Intel"), Some(VENDOR_INTEL));
        assert_eq!(vendor_id_from_string("AMD"), Some(VENDOR_AMD));
        assert_eq!(vendor_id_from_string("Mesa"), None);
    }

    #[test]
    fn no_context_is_unsupported() {
        // test threads never have a GL context current
        if current_context().is_none() {
            let err = capabilities().unwrap_err();
            assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Unsupported);
        }
    }
}
