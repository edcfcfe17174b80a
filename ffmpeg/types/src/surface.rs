/*!
    Renderer-facing surface interop contract.
*/

use std::fmt;

use crate::{PixelFormat, Result, VideoFrame};

/**
    Kind of target a GPU-resident frame can be mapped to.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceType {
    /// An OpenGL texture name owned by the renderer.
    GlTexture,
    /// A host memory frame.
    HostMemory,
    /// The raw native surface handle.
    Native,
}

/**
    A request passed to [`SurfaceInterop::map`].
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapRequest {
    /**
        Bind `plane` of the surface to the renderer's GL `texture`.

        The GL context that owns `texture` must be current on the calling
        thread. Some backends bind all planes at once and ignore `plane`
        after the first call for a texture.
    */
    GlTexture { texture: u32, plane: usize },
    /**
        Copy the surface into host memory, converting to `format`.
    */
    HostMemory { format: PixelFormat },
    /**
        Return the native surface handle without touching it.
    */
    Native,
}

impl MapRequest {
    /**
        Returns the kind of target this request maps to.
    */
    pub const fn surface_type(&self) -> SurfaceType {
        match self {
            Self::GlTexture { .. } => SurfaceType::GlTexture,
            Self::HostMemory { .. } => SurfaceType::HostMemory,
            Self::Native => SurfaceType::Native,
        }
    }
}

/**
    A raw native surface handle.

    `handle` is the vendor object (VA surface id, `ID3D11Texture2D*`,
    `IDirect3DSurface9*`, `CVPixelBufferRef`, CUDA device pointer) and
    `slice` the texture array index where the API has one.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeHandle {
    pub handle: usize,
    pub slice: u32,
}

/**
    Result of a successful [`SurfaceInterop::map`].
*/
#[derive(Debug)]
pub enum Mapped {
    /// The texture that now holds the requested plane.
    GlTexture(u32),
    /// A host copy of the surface.
    Host(VideoFrame),
    /// The raw native handle.
    Native(NativeHandle),
}

/**
    Frame-scoped access to a GPU-resident decoded surface.

    Implementations keep the surface and the resources needed to share it
    alive for as long as the owning [`VideoFrame`] (or any clone of it) lives,
    even if the decoder that produced it has been closed.

    # Threading

    `map` and `unmap` for GL targets must run on the thread where the target
    GL context is current. Host and native requests may run anywhere.
*/
pub trait SurfaceInterop: Send + Sync + fmt::Debug {
    /**
        Maps the surface to the requested target.

        Mapping the same texture twice without an `unmap` in between is
        allowed and yields the same result.
    */
    fn map(&self, request: MapRequest) -> Result<Mapped>;

    /**
        Releases whatever `map` acquired for `texture`.

        Returns `Ok(false)` if nothing was mapped for `texture`.
    */
    fn unmap(&self, texture: u32) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_surface_types() {
        let request = MapRequest::GlTexture {
            texture: 3,
            plane: 1,
        };
        assert_eq!(request.surface_type(), SurfaceType::GlTexture);
        let request = MapRequest::HostMemory {
            format: PixelFormat::Nv12,
        };
        assert_eq!(request.surface_type(), SurfaceType::HostMemory);
        assert_eq!(MapRequest::Native.surface_type(), SurfaceType::Native);
    }
}
