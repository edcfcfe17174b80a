/*!
    Host-side pixel work for hardware-decoded frames.

    Decoders hand out frames in whatever layout the driver produced. This
    crate is the "adapter" layer that turns those into frames downstream
    consumers can read:

    - [`UswcCopier`] copies rows out of write-combined GPU memory, using
      SSE4.1 streaming loads where the CPU has them
    - [`SourceFrame`] and [`copy_to_frame`] assemble a host [`VideoFrame`]
      from read-mapped surface planes, deriving implicit chroma planes and
      restoring U, V order
    - [`VideoTransform`] converts host frames between pixel formats and sizes

    # Copying a mapped surface

    ```ignore
    use ffmpeg_transform::{SourceFrame, UswcCopier, copy_to_frame};
    use ffmpeg_types::PixelFormat;

    let mut copier = UswcCopier::new();
    copier.init_cache(pitch)?;

    // `mapping` is the read-mapped NV12 surface, `coded_height` its allocated height
    let source = SourceFrame::contiguous(PixelFormat::Nv12, 1920, 1080, mapping, pitch, coded_height)?;
    let frame = copy_to_frame(&source, Some(&mut copier))?;
    ```

    # Lazy Initialization

    [`VideoTransform`] lazily initializes its scaler on first use. This
    allows creating transformers before knowing the exact input format.
    If the input format or size changes mid-stream, the scaler is
    automatically reinitialized.
*/

pub use ffmpeg_types::{Error, PixelFormat, Result, VideoFrame};

mod av;
mod convert;
mod planes;
mod uswc;

pub use av::{
    color_range_from_av, color_space_from_av, frame_from_av, frame_to_av, from_av_pixel,
    to_av_pixel,
};
pub use convert::{ScalingAlgorithm, VideoTransform, VideoTransformConfig};
pub use planes::{SourceFrame, SourcePlane, copy_to_frame, host_format};
pub use uswc::{CopyTier, UswcCopier};
