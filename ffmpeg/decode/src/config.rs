/*!
    Decoder configuration types.
*/

use std::{fmt, str::FromStr};

use ffmpeg_types::{CopyMode, Error, PixelFormat};

/**
    Hardware acceleration backend.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Backend {
    /// CUDA/NVDEC (NVIDIA)
    Cuda,
    /// VA-API (Linux - AMD, Intel)
    Vaapi,
    /// D3D11 Video Acceleration (Windows 8+)
    D3d11,
    /// DirectX Video Acceleration 2 over Direct3D 9 (Windows)
    Dxva,
    /// VideoToolbox (macOS)
    VideoToolbox,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Self::Cuda,
        Self::Vaapi,
        Self::D3d11,
        Self::Dxva,
        Self::VideoToolbox,
    ];

    /**
        Returns the stable short name, as accepted by [`str::parse`].
    */
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Vaapi => "vaapi",
            Self::D3d11 => "d3d11",
            Self::Dxva => "dxva2",
            Self::VideoToolbox => "videotoolbox",
        }
    }

    /**
        Returns the human-readable API name.
    */
    pub const fn api_name(self) -> &'static str {
        match self {
            Self::Cuda => "CUDA",
            Self::Vaapi => "VA-API",
            Self::D3d11 => "D3D11 Video Acceleration",
            Self::Dxva => "DirectX Video Acceleration 2.0",
            Self::VideoToolbox => "Apple VideoToolbox",
        }
    }

    /**
        Returns the hardware pixel format decoded pictures carry.
    */
    pub const fn hw_format(self) -> PixelFormat {
        match self {
            Self::Cuda => PixelFormat::Cuda,
            Self::Vaapi => PixelFormat::Vaapi,
            Self::D3d11 => PixelFormat::D3d11,
            Self::Dxva => PixelFormat::Dxva2,
            Self::VideoToolbox => PixelFormat::VideoToolbox,
        }
    }

    /**
        Returns true if the hwaccel allocates its own output buffers.

        Such backends have no surface pool; the buffer hook defers to the
        codec library's default allocator.
    */
    pub const fn is_library_managed(self) -> bool {
        matches!(self, Self::VideoToolbox)
    }

    /**
        Returns true if read-mapped surfaces live in write-combined memory,
        which is where the optimized copy pays off.
    */
    pub const fn has_uswc_surfaces(self) -> bool {
        matches!(self, Self::Vaapi | Self::D3d11 | Self::Dxva)
    }

    /**
        Returns true if frame threading must be disabled for this backend.
    */
    pub const fn forces_single_thread(self) -> bool {
        matches!(self, Self::VideoToolbox)
    }

    /**
        Returns the backends worth trying on this platform, in order.
    */
    pub fn platform_defaults() -> &'static [Backend] {
        if cfg!(target_os = "macos") {
            &[Self::VideoToolbox]
        } else if cfg!(windows) {
            &[Self::D3d11, Self::Dxva, Self::Cuda]
        } else if cfg!(target_os = "linux") {
            &[Self::Vaapi, Self::Cuda]
        } else {
            &[]
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvdec" | "cuvid" => Ok(Self::Cuda),
            "vaapi" | "va-api" | "va" => Ok(Self::Vaapi),
            "d3d11" | "d3d11va" => Ok(Self::D3d11),
            "dxva" | "dxva2" => Ok(Self::Dxva),
            "videotoolbox" | "vt" => Ok(Self::VideoToolbox),
            other => Err(Error::invalid_data(format!("unknown backend '{other}'"))),
        }
    }
}

/**
    Which native display VA-API should be opened on.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayKind {
    /// Let the codec library pick (DRM render node first, then X11)
    #[default]
    Auto,
    /// The X11 display named by `DISPLAY`
    X11,
    /// A DRM render node, `/dev/dri/renderD128` unless a path is given
    Drm,
    /// The display of the current EGL context, imported through DMA-BUF
    Egl,
}

impl DisplayKind {
    /**
        Returns the value for the codec library's `connection_type` option.
    */
    pub const fn connection_type(self) -> Option<&'static str> {
        match self {
            Self::X11 => Some("x11"),
            Self::Drm => Some("drm"),
            Self::Auto | Self::Egl => None,
        }
    }
}

impl FromStr for DisplayKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "x11" | "glx" => Ok(Self::X11),
            "drm" => Ok(Self::Drm),
            "egl" => Ok(Self::Egl),
            other => Err(Error::invalid_data(format!("unknown display kind '{other}'"))),
        }
    }
}

/**
    A native device handle owned by the caller.

    `handle` is a `VADisplay`, `ID3D11Device*`, `IDirect3DDeviceManager9*` or
    `CUcontext` depending on `backend`. The decoder never destroys it.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalDevice {
    pub backend: Backend,
    pub handle: usize,
}

/**
    Configuration for video decoder.
*/
#[derive(Clone, Debug)]
pub struct VideoDecoderConfig {
    /// Prefer hardware decoding if available.
    pub prefer_hw: bool,
    /// Backends to try, in order (empty = platform defaults).
    pub backends: Vec<Backend>,
    /// How frames reach the renderer (None = best the backend supports).
    pub copy_mode: Option<CopyMode>,
    /// Decoder threads (0 = let the codec library decide).
    pub threads: usize,
    /// Surfaces allocated on top of what the codec needs for reference frames.
    pub extra_surfaces: usize,
    /// Native display selection for VA-API.
    pub display: DisplayKind,
    /// Device node or adapter name passed to the device constructor.
    pub device_path: Option<String>,
    /// Caller-owned device to decode on instead of creating one.
    pub external_device: Option<ExternalDevice>,
}

impl Default for VideoDecoderConfig {
    fn default() -> Self {
        Self {
            prefer_hw: false,
            backends: Vec::new(),
            copy_mode: None,
            threads: 0,
            extra_surfaces: 4,
            display: DisplayKind::Auto,
            device_path: None,
            external_device: None,
        }
    }
}

impl VideoDecoderConfig {
    /**
        Create a new config with default settings (software decoding).
    */
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Create a config that prefers hardware acceleration.
    */
    pub fn with_hw_accel() -> Self {
        Self {
            prefer_hw: true,
            ..Self::default()
        }
    }

    /**
        Create a config with a specific hardware backend.
    */
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            prefer_hw: true,
            backends: vec![backend],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn copy_mode(mut self, mode: CopyMode) -> Self {
        self.copy_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn extra_surfaces(mut self, count: usize) -> Self {
        self.extra_surfaces = count;
        self
    }

    #[must_use]
    pub fn display(mut self, display: DisplayKind) -> Self {
        self.display = display;
        self
    }

    #[must_use]
    pub fn device_path(mut self, path: impl Into<String>) -> Self {
        self.device_path = Some(path.into());
        self
    }

    /**
        Decode on a caller-owned device. Also restricts the backends to the
        device's backend.
    */
    #[must_use]
    pub fn external_device(mut self, device: ExternalDevice) -> Self {
        self.prefer_hw = true;
        self.backends = vec![device.backend];
        self.external_device = Some(device);
        self
    }

    /**
        Returns the backends to try, in order.
    */
    pub fn candidate_backends(&self) -> Vec<Backend> {
        if !self.prefer_hw {
            Vec::new()
        } else if self.backends.is_empty() {
            Backend::platform_defaults().to_vec()
        } else {
            self.backends.clone()
        }
    }
}
