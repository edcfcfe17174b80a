/*!
    Shared types for hardware-accelerated decoding.

    This crate defines the vocabulary that crosses crate boundaries between the
    decoder backends, the interop layer and the renderer. It has no dependency
    on FFmpeg, so renderers can consume frames without pulling in FFmpeg
    bindings.

    # Frames

    - [`VideoFrame`] - A decoded picture, either host-resident ([`Plane`]s) or
      GPU-resident behind a [`SurfaceInterop`] handle
    - [`Plane`] - One host plane with its stride

    # Surfaces

    - [`SurfaceInterop`] - Renderer-facing `map` / `unmap` contract
    - [`MapRequest`] and [`Mapped`] - What the renderer asks for and gets back
    - [`SurfaceType`] - Kind of mapping target
    - [`NativeHandle`] - Raw native surface handle for renderers that speak the
      vendor API themselves

    # Formats

    - [`PixelFormat`] - Software and hardware pixel formats
    - [`ColorSpace`] and [`ColorRange`] - Color metadata carried on frames
    - [`CopyMode`] - How decoded pixels get to the renderer

    # Error Handling

    - [`Error`], [`ErrorCategory`] and [`Result`]
*/

mod copy;
mod error;
mod format;
mod frame;
mod surface;

pub use copy::CopyMode;
pub use error::{Error, ErrorCategory, Result};
pub use format::{ColorRange, ColorSpace, PixelFormat};
pub use frame::{Plane, VideoFrame};
pub use surface::{MapRequest, Mapped, NativeHandle, SurfaceInterop, SurfaceType};
