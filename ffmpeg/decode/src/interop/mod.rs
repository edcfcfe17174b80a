/*!
    GPU interop resources.

    An interop resource binds decoded surfaces to renderer textures without
    a host round trip, or copies them to host memory when asked. There is
    one resource per decoder and rendering context pair; every frame the
    decoder exports holds a [`SurfaceBinding`] with a strong reference to it,
    so the resource outlives the decoder for as long as frames are alive.

    # Threading

    Resources are created on the decode thread but only touch GL on the
    render thread, inside `map` and `unmap`. The first context a resource
    maps on becomes its owner; mapping from any other context fails.
*/

use std::{fmt, sync::Arc};

use ffmpeg_types::{
    Error, MapRequest, Mapped, NativeHandle, PixelFormat, Result, SurfaceInterop, VideoFrame,
};

use crate::{config::Backend, surface::HwFrame};

pub(crate) mod host;
mod state;

#[cfg(any(target_os = "linux", windows))]
mod cuda;
#[cfg(windows)]
mod d3d11;
#[cfg(windows)]
mod dxva;
#[cfg(target_os = "linux")]
mod vaapi;
#[cfg(target_os = "macos")]
mod videotoolbox;
#[cfg(windows)]
mod wgl;

#[cfg(any(target_os = "linux", windows))]
pub use cuda::CudaInterop;
#[cfg(windows)]
pub use d3d11::D3d11Interop;
#[cfg(windows)]
pub use dxva::DxvaInterop;
#[cfg(target_os = "linux")]
pub use vaapi::VaapiInterop;
#[cfg(target_os = "macos")]
pub use videotoolbox::CvInterop;

/**
    A way of sharing decoded surfaces with a renderer.
*/
pub trait InteropBackend: Send + Sync + fmt::Debug {
    /// What a bound frame keeps alive.
    type Surface: Send + Sync + fmt::Debug;

    /**
        Bind `plane` of `surface` to the renderer's `texture`.

        The GL context owning `texture` must be current. `width` and
        `height` are the visible size; `coded_height` is the allocated
        surface height.
    */
    fn map(
        &self,
        surface: &Self::Surface,
        texture: u32,
        width: u32,
        height: u32,
        coded_height: u32,
        plane: usize,
    ) -> Result<()>;

    /**
        Release what `map` acquired for `texture`.

        Returns `Ok(false)` if nothing is mapped for `texture`.
    */
    fn unmap(&self, texture: u32) -> Result<bool>;

    /**
        Copy `surface` into a host frame in `format`.
    */
    fn map_to_host(
        &self,
        surface: &Self::Surface,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<VideoFrame>;

    /**
        Returns the native handle of `surface`.
    */
    fn native(&self, surface: &Self::Surface) -> Result<NativeHandle>;
}

/**
    One decoded surface bound to the resource that can share it.
*/
pub struct SurfaceBinding<R: InteropBackend> {
    surface: R::Surface,
    width: u32,
    height: u32,
    coded_height: u32,
    resource: Arc<R>,
}

impl<R: InteropBackend> SurfaceBinding<R> {
    pub fn new(
        surface: R::Surface,
        width: u32,
        height: u32,
        coded_height: u32,
        resource: Arc<R>,
    ) -> Self {
        Self {
            surface,
            width,
            height,
            coded_height: coded_height.max(height),
            resource,
        }
    }

    pub fn surface(&self) -> &R::Surface {
        &self.surface
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }
}

impl<R: InteropBackend> fmt::Debug for SurfaceBinding<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceBinding")
            .field("surface", &self.surface)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("coded_height", &self.coded_height)
            .finish_non_exhaustive()
    }
}

impl<R: InteropBackend> SurfaceInterop for SurfaceBinding<R> {
    fn map(&self, request: MapRequest) -> Result<Mapped> {
        match request {
            MapRequest::GlTexture { texture, plane } => {
                self.resource.map(
                    &self.surface,
                    texture,
                    self.width,
                    self.height,
                    self.coded_height,
                    plane,
                )?;
                Ok(Mapped::GlTexture(texture))
            }
            MapRequest::HostMemory { format } => Ok(Mapped::Host(self.resource.map_to_host(
                &self.surface,
                format,
                self.width,
                self.height,
            )?)),
            MapRequest::Native => Ok(Mapped::Native(self.resource.native(&self.surface)?)),
        }
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        self.resource.unmap(texture)
    }
}

/**
    The interop resource of one backend.
*/
#[derive(Debug)]
#[non_exhaustive]
pub enum InteropResource {
    #[cfg(target_os = "linux")]
    Vaapi(VaapiInterop),
    #[cfg(any(target_os = "linux", windows))]
    Cuda(CudaInterop),
    #[cfg(windows)]
    D3d11(D3d11Interop),
    #[cfg(windows)]
    Dxva(DxvaInterop),
    #[cfg(target_os = "macos")]
    VideoToolbox(CvInterop),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match *$self {
            #[cfg(target_os = "linux")]
            InteropResource::Vaapi(ref $inner) => $body,
            #[cfg(any(target_os = "linux", windows))]
            InteropResource::Cuda(ref $inner) => $body,
            #[cfg(windows)]
            InteropResource::D3d11(ref $inner) => $body,
            #[cfg(windows)]
            InteropResource::Dxva(ref $inner) => $body,
            #[cfg(target_os = "macos")]
            InteropResource::VideoToolbox(ref $inner) => $body,
        }
    };
}

impl InteropResource {
    /**
        Create the resource for `backend`.

        Nothing touches GL here; extension checks run on the first map.
    */
    pub(crate) fn create(backend: Backend) -> Result<Self> {
        match backend {
            #[cfg(target_os = "linux")]
            Backend::Vaapi => Ok(Self::Vaapi(VaapiInterop::new())),
            #[cfg(any(target_os = "linux", windows))]
            Backend::Cuda => Ok(Self::Cuda(CudaInterop::new()?)),
            #[cfg(windows)]
            Backend::D3d11 => Ok(Self::D3d11(D3d11Interop::new())),
            #[cfg(windows)]
            Backend::Dxva => Ok(Self::Dxva(DxvaInterop::new())),
            #[cfg(target_os = "macos")]
            Backend::VideoToolbox => Ok(Self::VideoToolbox(CvInterop::new())),
            #[allow(unreachable_patterns)]
            other => Err(Error::unsupported(format!(
                "zero-copy interop for {other} on this platform"
            ))),
        }
    }

    pub fn backend(&self) -> Backend {
        dispatch!(self, inner => inner.backend())
    }
}

impl InteropBackend for InteropResource {
    type Surface = HwFrame;

    fn map(
        &self,
        surface: &HwFrame,
        texture: u32,
        width: u32,
        height: u32,
        coded_height: u32,
        plane: usize,
    ) -> Result<()> {
        dispatch!(self, inner => inner.map(surface, texture, width, height, coded_height, plane))
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        dispatch!(self, inner => inner.unmap(texture))
    }

    fn map_to_host(
        &self,
        surface: &HwFrame,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<VideoFrame> {
        dispatch!(self, inner => inner.map_to_host(surface, format, width, height))
    }

    fn native(&self, surface: &HwFrame) -> Result<NativeHandle> {
        dispatch!(self, inner => inner.native(surface))
    }
}

/**
    Host copy shared by every backend: the driver's read-map, or a transfer.
*/
pub(crate) fn surface_to_host(surface: &HwFrame, format: PixelFormat) -> Result<VideoFrame> {
    host::to_host(surface, format)
}

/**
    Native handle shared by every backend.
*/
pub(crate) fn surface_native(surface: &HwFrame) -> Result<NativeHandle> {
    surface
        .native()
        .map(|native| native.handle())
        .ok_or_else(|| Error::unsupported_format("frame is not a hardware surface"))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct FakeBackend {
        mapped: Mutex<HashSet<u32>>,
        maps: Mutex<usize>,
    }

    impl InteropBackend for FakeBackend {
        type Surface = u32;

        fn map(
            &self,
            _surface: &u32,
            texture: u32,
            _width: u32,
            _height: u32,
            coded_height: u32,
            _plane: usize,
        ) -> Result<()> {
            assert!(coded_height >= 1080);
            *self.maps.lock().unwrap() += 1;
            self.mapped.lock().unwrap().insert(texture);
            Ok(())
        }

        fn unmap(&self, texture: u32) -> Result<bool> {
            Ok(self.mapped.lock().unwrap().remove(&texture))
        }

        fn map_to_host(
            &self,
            _surface: &u32,
            format: PixelFormat,
            width: u32,
            height: u32,
        ) -> Result<VideoFrame> {
            let line = format.bytes_per_line(0, width);
            let planes = (0..format.plane_count())
                .map(|i| {
                    let line = format.bytes_per_line(i, width).max(line);
                    let rows = format.plane_height(i, height) as usize;
                    ffmpeg_types::Plane::new(vec![0; line * rows], line)
                })
                .collect();
            VideoFrame::host(width, height, format, planes)
        }

        fn native(&self, surface: &u32) -> Result<NativeHandle> {
            Ok(NativeHandle {
                handle: *surface as usize,
                slice: 0,
            })
        }
    }

    fn binding() -> SurfaceBinding<FakeBackend> {
        SurfaceBinding::new(9, 1920, 1080, 1088, Arc::new(FakeBackend::default()))
    }

    #[test]
    fn map_unmap_map_matches_single_map() {
        let binding = binding();
        let request = MapRequest::GlTexture {
            texture: 5,
            plane: 0,
        };
        let first = binding.map(request).unwrap();
        assert!(binding.unmap(5).unwrap());
        let second = binding.map(request).unwrap();
        assert!(matches!(first, Mapped::GlTexture(5)));
        assert!(matches!(second, Mapped::GlTexture(5)));
        assert!(binding.unmap(5).unwrap());
        assert!(!binding.unmap(5).unwrap());
    }

    #[test]
    fn host_and_native_requests() {
        let binding = binding();
        let host = binding
            .map(MapRequest::HostMemory {
                format: PixelFormat::Nv12,
            })
            .unwrap();
        match host {
            Mapped::Host(frame) => {
                assert_eq!((frame.width(), frame.height()), (1920, 1080));
                assert_eq!(frame.format(), PixelFormat::Nv12);
            }
            other => panic!("unexpected {other:?}"),
        }
        match binding.map(MapRequest::Native).unwrap() {
            Mapped::Native(handle) => assert_eq!(handle.handle, 9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn coded_height_is_never_below_visible() {
        let binding = SurfaceBinding::new(1, 1920, 1080, 0, Arc::new(FakeBackend::default()));
        binding
            .map(MapRequest::GlTexture {
                texture: 1,
                plane: 0,
            })
            .unwrap();
        assert_eq!(*binding.resource().maps.lock().unwrap(), 1);
    }
}
