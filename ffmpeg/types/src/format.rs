/*!
    Pixel format and color metadata types.
*/

/**
    Video pixel formats.

    Software formats describe host memory layouts. Hardware formats are opaque
    handles to GPU surfaces owned by a vendor API; they have no host planes and
    must be mapped or copied before their pixels can be read.

    This is a subset of formats commonly encountered in hardware decoding.
    Not all FFmpeg pixel formats are represented.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (most common video format)
    Yuv420p,
    /// Planar YVU 4:2:0, 12bpp (V plane before U)
    Yv12,
    /// Semi-planar YUV 4:2:0, 12bpp (common hardware decoder output)
    Nv12,
    /// Semi-planar YUV 4:2:0, 10 bits in the high bits of 16-bit words
    P010,
    /// Planar YUV 4:2:2, 16bpp
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp
    Yuv444p,
    /// Planar YUV 4:2:0, 10-bit (HDR content)
    Yuv420p10,
    /// Packed YUV 4:2:2, U0 Y0 V0 Y1
    Uyvy,
    /// Packed YUV 4:2:2, Y0 U0 Y1 V0
    Yuyv,
    /// Packed BGRA, 32bpp (common for display on macOS/Windows)
    Bgra,
    /// Packed RGBA, 32bpp (common for display)
    Rgba,
    /// Packed RGB, 24bpp
    Rgb24,
    /// Packed BGR, 24bpp
    Bgr24,
    /// VA-API surface
    Vaapi,
    /// CUDA device memory
    Cuda,
    /// D3D11 texture array slice
    D3d11,
    /// Direct3D 9 surface used by DXVA2
    Dxva2,
    /// CoreVideo pixel buffer
    VideoToolbox,
}

impl PixelFormat {
    /**
        Returns true if this format is an opaque GPU surface.
    */
    pub const fn is_hardware(self) -> bool {
        matches!(
            self,
            Self::Vaapi | Self::Cuda | Self::D3d11 | Self::Dxva2 | Self::VideoToolbox
        )
    }

    /**
        Returns the number of host memory planes, or 0 for hardware formats.
    */
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p | Self::Yv12 | Self::Yuv422p | Self::Yuv444p | Self::Yuv420p10 => 3,
            Self::Nv12 | Self::P010 => 2,
            Self::Uyvy | Self::Yuyv | Self::Bgra | Self::Rgba | Self::Rgb24 | Self::Bgr24 => 1,
            Self::Vaapi | Self::Cuda | Self::D3d11 | Self::Dxva2 | Self::VideoToolbox => 0,
        }
    }

    /**
        Returns the horizontal and vertical chroma subsampling shifts.
    */
    pub const fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv420p | Self::Yv12 | Self::Nv12 | Self::P010 | Self::Yuv420p10 => (1, 1),
            Self::Yuv422p | Self::Uyvy | Self::Yuyv => (1, 0),
            _ => (0, 0),
        }
    }

    /**
        Returns the number of bytes one sample occupies in the given plane.

        For interleaved chroma planes (NV12, P010) a "sample" is a U/V pair.
    */
    pub const fn bytes_per_pixel(self, plane: usize) -> usize {
        match (self, plane) {
            (Self::Yuv420p | Self::Yv12 | Self::Yuv422p | Self::Yuv444p, 0..=2) => 1,
            (Self::Yuv420p10, 0..=2) => 2,
            (Self::Nv12, 0) => 1,
            (Self::Nv12, 1) => 2,
            (Self::P010, 0) => 2,
            (Self::P010, 1) => 4,
            (Self::Uyvy | Self::Yuyv, 0) => 2,
            (Self::Rgb24 | Self::Bgr24, 0) => 3,
            (Self::Bgra | Self::Rgba, 0) => 4,
            _ => 0,
        }
    }

    /**
        Returns the width in samples of the given plane for a picture of `width`.
    */
    pub const fn plane_width(self, plane: usize, width: u32) -> u32 {
        if plane == 0 || plane >= self.plane_count() {
            return if plane < self.plane_count() { width } else { 0 };
        }
        let (shift, _) = self.chroma_shift();
        width.div_ceil(1 << shift)
    }

    /**
        Returns the height in rows of the given plane for a picture of `height`.
    */
    pub const fn plane_height(self, plane: usize, height: u32) -> u32 {
        if plane == 0 || plane >= self.plane_count() {
            return if plane < self.plane_count() { height } else { 0 };
        }
        let (_, shift) = self.chroma_shift();
        height.div_ceil(1 << shift)
    }

    /**
        Returns the minimum number of bytes per row of the given plane.
    */
    pub const fn bytes_per_line(self, plane: usize, width: u32) -> usize {
        self.plane_width(plane, width) as usize * self.bytes_per_pixel(plane)
    }

    /**
        Returns the number of bits per pixel for this format.

        For planar formats, this is the average bits per pixel.
        Hardware formats report 0.
    */
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Yuv420p | Self::Yv12 | Self::Nv12 => 12,
            Self::Yuv420p10 | Self::P010 => 24, // 16-bit containers * 1.5 planes average
            Self::Yuv422p | Self::Uyvy | Self::Yuyv => 16,
            Self::Rgb24 | Self::Bgr24 | Self::Yuv444p => 24,
            Self::Bgra | Self::Rgba => 32,
            Self::Vaapi | Self::Cuda | Self::D3d11 | Self::Dxva2 | Self::VideoToolbox => 0,
        }
    }

    /**
        Returns true if this is a planar format.
    */
    pub const fn is_planar(self) -> bool {
        match self {
            Self::Yuv420p | Self::Yv12 | Self::Yuv422p | Self::Yuv444p | Self::Yuv420p10 => true,
            Self::Nv12 | Self::P010 => true, // semi-planar counts as planar
            _ => false,
        }
    }

    /**
        Returns true if the U and V planes are stored in swapped order.
    */
    pub const fn has_swapped_chroma(self) -> bool {
        matches!(self, Self::Yv12)
    }
}

/**
    YUV to RGB conversion matrix a frame was encoded with.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ColorSpace {
    #[default]
    Unknown,
    /// ITU-R BT.601 (SD content)
    Bt601,
    /// ITU-R BT.709 (HD content)
    Bt709,
    /// ITU-R BT.2020 (UHD / HDR content)
    Bt2020,
    /// SMPTE 240M
    Smpte240m,
    /// Already RGB
    Rgb,
}

/**
    Quantization range of the luma and chroma samples.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorRange {
    #[default]
    Unknown,
    /// Limited ("TV", "MPEG") range, 16-235 for 8-bit luma
    Limited,
    /// Full ("PC", "JPEG") range, 0-255
    Full,
}
