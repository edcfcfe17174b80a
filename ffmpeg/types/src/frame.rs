/*!
    Decoded frame types.
*/

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    ColorRange, ColorSpace, Error, MapRequest, Mapped, PixelFormat, Result, SurfaceInterop,
};

/**
    One plane of host pixel data.

    Rows are `stride` bytes apart; only the first
    [`PixelFormat::bytes_per_line`] bytes of each row carry pixels.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
}

impl Plane {
    /**
        Create a plane from raw bytes and a row stride.
    */
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /**
        Returns row `y`, truncated to `len` bytes, or `None` if out of bounds.
    */
    pub fn row(&self, y: usize, len: usize) -> Option<&[u8]> {
        let start = y.checked_mul(self.stride)?;
        self.data.get(start..start.checked_add(len)?)
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("len", &self.data.len())
            .field("stride", &self.stride)
            .finish()
    }
}

/**
    A decoded video frame.

    A frame is either host-resident, holding one [`Plane`] per plane of its
    [`PixelFormat`], or GPU-resident, holding a hardware pixel format and a
    [`SurfaceInterop`] handle that the renderer maps on demand.

    The declared format, size and timestamp never change after construction;
    mapping only affects the GPU-side representation. Cloning a GPU-resident
    frame shares its surface.
*/
#[derive(Clone, Debug)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    timestamp: Option<Duration>,
    display_aspect_ratio: f64,
    color_space: ColorSpace,
    color_range: ColorRange,
    interop: Option<Arc<dyn SurfaceInterop>>,
}

impl VideoFrame {
    /**
        Create a host-resident frame.

        Fails if `format` is a hardware format, if the number of planes does
        not match the format, or if any plane is too small for its rows.
    */
    pub fn host(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Result<Self> {
        if format.is_hardware() {
            return Err(Error::invalid_data(format!(
                "{format:?} frames cannot carry host planes"
            )));
        }
        if planes.len() != format.plane_count() {
            return Err(Error::invalid_data(format!(
                "{format:?} needs {} planes, got {}",
                format.plane_count(),
                planes.len()
            )));
        }
        for (index, plane) in planes.iter().enumerate() {
            let line = format.bytes_per_line(index, width);
            let rows = format.plane_height(index, height) as usize;
            if plane.stride < line {
                return Err(Error::invalid_data(format!(
                    "plane {index} stride {} is shorter than a row ({line})",
                    plane.stride
                )));
            }
            let needed = match rows {
                0 => 0,
                rows => plane
                    .stride
                    .checked_mul(rows - 1)
                    .and_then(|n| n.checked_add(line))
                    .ok_or_else(|| {
                        Error::invalid_data(format!("plane {index} extent overflows"))
                    })?,
            };
            if plane.data.len() < needed {
                return Err(Error::invalid_data(format!(
                    "plane {index} holds {} bytes, needs {needed}",
                    plane.data.len()
                )));
            }
        }
        Ok(Self::with_parts(width, height, format, planes, None))
    }

    /**
        Create a GPU-resident frame backed by `interop`.
    */
    pub fn gpu(
        width: u32,
        height: u32,
        format: PixelFormat,
        interop: Arc<dyn SurfaceInterop>,
    ) -> Self {
        Self::with_parts(width, height, format, Vec::new(), Some(interop))
    }

    fn with_parts(
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
        interop: Option<Arc<dyn SurfaceInterop>>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            timestamp: None,
            display_aspect_ratio: 0.0,
            color_space: ColorSpace::Unknown,
            color_range: ColorRange::Unknown,
            interop,
        }
    }

    /**
        Set the presentation timestamp.
    */
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /**
        Set the display aspect ratio. Non-positive values mean "square pixels".
    */
    #[must_use]
    pub fn with_display_aspect_ratio(mut self, ratio: f64) -> Self {
        self.display_aspect_ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            0.0
        };
        self
    }

    /**
        Set the color space and range.
    */
    #[must_use]
    pub fn with_color(mut self, space: ColorSpace, range: ColorRange) -> Self {
        self.color_space = space;
        self.color_range = range;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn color_range(&self) -> ColorRange {
        self.color_range
    }

    /**
        Returns the display aspect ratio, falling back to width / height.
    */
    pub fn display_aspect_ratio(&self) -> f64 {
        if self.display_aspect_ratio > 0.0 {
            self.display_aspect_ratio
        } else if self.height > 0 {
            f64::from(self.width) / f64::from(self.height)
        } else {
            0.0
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    /**
        Returns true if the pixels live on the GPU behind an interop handle.
    */
    pub fn is_gpu(&self) -> bool {
        self.interop.is_some()
    }

    pub fn interop(&self) -> Option<&Arc<dyn SurfaceInterop>> {
        self.interop.as_ref()
    }

    /**
        Maps the frame to the requested target.

        GPU-resident frames delegate to their interop handle. Host frames
        can only satisfy a host request for their own format.
    */
    pub fn map(&self, request: MapRequest) -> Result<Mapped> {
        if let Some(interop) = &self.interop {
            return interop.map(request);
        }
        match request {
            MapRequest::HostMemory { format } if format == self.format => {
                Ok(Mapped::Host(self.clone()))
            }
            MapRequest::HostMemory { format } => Err(Error::unsupported_format(format!(
                "host frame is {:?}, {format:?} requested",
                self.format
            ))),
            MapRequest::GlTexture { .. } | MapRequest::Native => {
                Err(Error::unsupported("host frames have no GPU surface"))
            }
        }
    }

    /**
        Releases a mapping made with [`VideoFrame::map`].
    */
    pub fn unmap(&self, texture: u32) -> Result<bool> {
        match &self.interop {
            Some(interop) => interop.unmap(texture),
            None => Ok(false),
        }
    }
}

// Ensure frames are Send + Sync
static_assertions::assert_impl_all!(VideoFrame: Send, Sync);
static_assertions::assert_impl_all!(Plane: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::NativeHandle;

    #[derive(Debug, Default)]
    struct CountingInterop {
        maps: AtomicUsize,
        unmaps: AtomicUsize,
    }

    impl SurfaceInterop for CountingInterop {
        fn map(&self, request: MapRequest) -> Result<Mapped> {
            self.maps.fetch_add(1, Ordering::SeqCst);
            match request {
                MapRequest::GlTexture { texture, .. } => Ok(Mapped::GlTexture(texture)),
                MapRequest::Native => Ok(Mapped::Native(NativeHandle {
                    handle: 7,
                    slice: 0,
                })),
                MapRequest::HostMemory { .. } => Err(Error::unsupported("test")),
            }
        }

        fn unmap(&self, _texture: u32) -> Result<bool> {
            self.unmaps.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[test]
    fn oversized_stride_is_rejected() {
        let planes = vec![Plane::new(vec![0u8; 16], usize::MAX)];
        let err = VideoFrame::host(1, 3, PixelFormat::Bgra, planes).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    fn bgra(width: u32, height: u32) -> VideoFrame {
        let stride = width as usize * 4;
        VideoFrame::host(
            width,
            height,
            PixelFormat::Bgra,
            vec![Plane::new(vec![0u8; stride * height as usize], stride)],
        )
        .unwrap()
    }

    #[test]
    fn video_frame_construction() {
        let frame = bgra(100, 100);
        assert_eq!(frame.width(), 100);
        assert_eq!(frame.height(), 100);
        assert_eq!(frame.format(), PixelFormat::Bgra);
        assert_eq!(frame.planes().len(), 1);
        assert!(!frame.is_gpu());
    }

    #[test]
    fn host_frame_validates_planes() {
        let result = VideoFrame::host(4, 4, PixelFormat::Nv12, vec![Plane::new(vec![0; 16], 4)]);
        assert!(result.is_err());

        let result = VideoFrame::host(
            4,
            4,
            PixelFormat::Nv12,
            vec![Plane::new(vec![0; 16], 4), Plane::new(vec![0; 7], 4)],
        );
        assert!(result.is_err());

        let result = VideoFrame::host(
            4,
            4,
            PixelFormat::Nv12,
            vec![Plane::new(vec![0; 16], 4), Plane::new(vec![0; 8], 4)],
        );
        assert!(result.is_ok());

        let result = VideoFrame::host(4, 4, PixelFormat::Vaapi, vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn video_frame_metadata() {
        let frame = bgra(160, 90)
            .with_timestamp(Some(Duration::from_millis(1500)))
            .with_color(ColorSpace::Bt709, ColorRange::Limited);
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(1500)));
        assert_eq!(frame.color_space(), ColorSpace::Bt709);
        assert_eq!(frame.color_range(), ColorRange::Limited);
        assert!((frame.display_aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);

        let frame = frame.with_display_aspect_ratio(4.0 / 3.0);
        assert!((frame.display_aspect_ratio() - 4.0 / 3.0).abs() < 1e-9);

        let frame = frame.with_display_aspect_ratio(f64::NAN);
        assert!((frame.display_aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn plane_rows() {
        let plane = Plane::new((0u8..12).collect(), 4);
        assert_eq!(plane.row(1, 3), Some(&[4u8, 5, 6][..]));
        assert_eq!(plane.row(2, 4), Some(&[8u8, 9, 10, 11][..]));
        assert_eq!(plane.row(3, 1), None);
    }

    #[test]
    fn gpu_frame_delegates_to_interop() {
        let interop = Arc::new(CountingInterop::default());
        let frame = VideoFrame::gpu(1920, 1080, PixelFormat::Vaapi, interop.clone());
        assert!(frame.is_gpu());
        assert!(frame.planes().is_empty());

        let mapped = frame
            .map(MapRequest::GlTexture {
                texture: 5,
                plane: 0,
            })
            .unwrap();
        assert!(matches!(mapped, Mapped::GlTexture(5)));
        assert!(frame.unmap(5).unwrap());

        let clone = frame.clone();
        assert!(matches!(clone.map(MapRequest::Native), Ok(Mapped::Native(_))));
        assert_eq!(interop.maps.load(Ordering::SeqCst), 2);
        assert_eq!(interop.unmaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn host_frame_maps_to_itself() {
        let frame = bgra(2, 2);
        let mapped = frame
            .map(MapRequest::HostMemory {
                format: PixelFormat::Bgra,
            })
            .unwrap();
        assert!(matches!(mapped, Mapped::Host(f) if f.width() == 2));
        assert!(
            frame
                .map(MapRequest::HostMemory {
                    format: PixelFormat::Rgba
                })
                .is_err()
        );
        assert!(!frame.unmap(1).unwrap());
    }
}
