/*!
    Conversions between `ffmpeg-next` frames and [`VideoFrame`].
*/

use ffmpeg_next::{
    color,
    format::Pixel,
    util::frame::video::Video as AvFrame,
};

use ffmpeg_types::{ColorRange, ColorSpace, Error, PixelFormat, Plane, Result, VideoFrame};

/**
    Map a pixel format to its FFmpeg counterpart.

    [`PixelFormat::Yv12`] has no FFmpeg counterpart and maps to `None`.
*/
pub fn to_av_pixel(format: PixelFormat) -> Option<Pixel> {
    Some(match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::P010 => Pixel::P010LE,
        PixelFormat::Yuv422p => Pixel::YUV422P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Yuv420p10 => Pixel::YUV420P10LE,
        PixelFormat::Uyvy => Pixel::UYVY422,
        PixelFormat::Yuyv => Pixel::YUYV422,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Vaapi => Pixel::VAAPI,
        PixelFormat::Cuda => Pixel::CUDA,
        PixelFormat::D3d11 => Pixel::D3D11,
        PixelFormat::Dxva2 => Pixel::DXVA2_VLD,
        PixelFormat::VideoToolbox => Pixel::VIDEOTOOLBOX,
        _ => return None,
    })
}

/**
    Map an FFmpeg pixel format to ours, if it is one we handle.
*/
pub fn from_av_pixel(pixel: Pixel) -> Option<PixelFormat> {
    Some(match pixel {
        Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::Yuv420p,
        Pixel::NV12 => PixelFormat::Nv12,
        Pixel::P010LE => PixelFormat::P010,
        Pixel::YUV422P | Pixel::YUVJ422P => PixelFormat::Yuv422p,
        Pixel::YUV444P | Pixel::YUVJ444P => PixelFormat::Yuv444p,
        Pixel::YUV420P10LE => PixelFormat::Yuv420p10,
        Pixel::UYVY422 => PixelFormat::Uyvy,
        Pixel::YUYV422 => PixelFormat::Yuyv,
        Pixel::BGRA => PixelFormat::Bgra,
        Pixel::RGBA => PixelFormat::Rgba,
        Pixel::RGB24 => PixelFormat::Rgb24,
        Pixel::BGR24 => PixelFormat::Bgr24,
        Pixel::VAAPI => PixelFormat::Vaapi,
        Pixel::CUDA => PixelFormat::Cuda,
        Pixel::D3D11 => PixelFormat::D3d11,
        Pixel::DXVA2_VLD => PixelFormat::Dxva2,
        Pixel::VIDEOTOOLBOX => PixelFormat::VideoToolbox,
        _ => return None,
    })
}

pub fn color_space_from_av(space: color::Space) -> ColorSpace {
    match space {
        color::Space::BT709 => ColorSpace::Bt709,
        color::Space::BT470BG | color::Space::SMPTE170M => ColorSpace::Bt601,
        color::Space::BT2020NCL | color::Space::BT2020CL => ColorSpace::Bt2020,
        color::Space::SMPTE240M => ColorSpace::Smpte240m,
        color::Space::RGB => ColorSpace::Rgb,
        _ => ColorSpace::Unknown,
    }
}

pub fn color_range_from_av(range: color::Range) -> ColorRange {
    match range {
        color::Range::MPEG => ColorRange::Limited,
        color::Range::JPEG => ColorRange::Full,
        _ => ColorRange::Unknown,
    }
}

/**
    Copy a software FFmpeg frame into a host [`VideoFrame`].

    Only pixel data and color metadata are carried over; timing is left to
    the caller, which knows the stream time base.
*/
pub fn frame_from_av(frame: &AvFrame) -> Result<VideoFrame> {
    let format = from_av_pixel(frame.format()).ok_or_else(|| {
        Error::unsupported_format(format!("unsupported pixel format: {:?}", frame.format()))
    })?;
    if format.is_hardware() {
        return Err(Error::unsupported_format(format!(
            "{format:?} frame has no host planes"
        )));
    }
    let (width, height) = (frame.width(), frame.height());
    let mut planes = Vec::with_capacity(format.plane_count());
    for index in 0..format.plane_count() {
        let stride = frame.stride(index);
        let rows = format.plane_height(index, height) as usize;
        let data = frame.data(index);
        let len = (stride * rows).min(data.len());
        planes.push(Plane::new(data[..len].to_vec(), stride));
    }
    Ok(VideoFrame::host(width, height, format, planes)?
        .with_color(
            color_space_from_av(frame.color_space()),
            color_range_from_av(frame.color_range()),
        ))
}

/**
    Copy a host [`VideoFrame`] into a newly allocated FFmpeg frame.

    YV12 frames are written as YUV420P with their chroma planes swapped.
*/
pub fn frame_to_av(frame: &VideoFrame) -> Result<AvFrame> {
    let format = frame.format();
    let (pixel, swapped) = match format {
        PixelFormat::Yv12 => (Pixel::YUV420P, true),
        other if other.is_hardware() => {
            return Err(Error::unsupported_format(format!(
                "{other:?} frames must be mapped to host memory first"
            )));
        }
        other => (
            to_av_pixel(other).ok_or_else(|| {
                Error::unsupported_format(format!("no FFmpeg format for {other:?}"))
            })?,
            false,
        ),
    };

    let (width, height) = (frame.width(), frame.height());
    let mut av = AvFrame::new(pixel, width, height);
    for index in 0..format.plane_count() {
        let source_index = if swapped && index > 0 { 3 - index } else { index };
        let plane = frame
            .plane(source_index)
            .ok_or_else(|| Error::invalid_data(format!("missing plane {source_index}")))?;
        let line = format.bytes_per_line(index, width);
        let rows = format.plane_height(index, height) as usize;
        let stride = av.stride(index);
        let dst = av.data_mut(index);
        for y in 0..rows {
            let row = plane
                .row(y, line)
                .ok_or_else(|| Error::invalid_data(format!("plane {index} ends at row {y}")))?;
            dst[y * stride..y * stride + line].copy_from_slice(row);
        }
    }
    Ok(av)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_mapping_covers_host_and_hardware_formats() {
        for format in [
            PixelFormat::Yuv420p,
            PixelFormat::Nv12,
            PixelFormat::P010,
            PixelFormat::Bgra,
            PixelFormat::Rgb24,
            PixelFormat::Vaapi,
            PixelFormat::D3d11,
            PixelFormat::Dxva2,
            PixelFormat::VideoToolbox,
            PixelFormat::Cuda,
        ] {
            let pixel = to_av_pixel(format).unwrap();
            assert_eq!(from_av_pixel(pixel), Some(format));
        }
        assert_eq!(to_av_pixel(PixelFormat::Yv12), None);
        assert_eq!(from_av_pixel(Pixel::YUVJ420P), Some(PixelFormat::Yuv420p));
        assert_eq!(from_av_pixel(Pixel::GRAY8), None);
    }

    #[test]
    fn color_mapping() {
        assert_eq!(color_space_from_av(color::Space::BT709), ColorSpace::Bt709);
        assert_eq!(color_space_from_av(color::Space::SMPTE170M), ColorSpace::Bt601);
        assert_eq!(color_space_from_av(color::Space::Unspecified), ColorSpace::Unknown);
        assert_eq!(color_range_from_av(color::Range::JPEG), ColorRange::Full);
        assert_eq!(color_range_from_av(color::Range::MPEG), ColorRange::Limited);
    }

    #[test]
    fn host_frame_through_av_frame() {
        let (w, h) = (8u32, 4u32);
        let luma: Vec<u8> = (0..32).collect();
        let planes = vec![
            Plane::new(luma.clone(), 8),
            Plane::new(vec![50; 8], 4), // V
            Plane::new(vec![60; 8], 4), // U
        ];
        let frame = VideoFrame::host(w, h, PixelFormat::Yv12, planes).unwrap();
        let av = frame_to_av(&frame).unwrap();
        assert_eq!(av.format(), Pixel::YUV420P);

        let back = frame_from_av(&av).unwrap();
        assert_eq!(back.format(), PixelFormat::Yuv420p);
        assert_eq!(back.plane(0).unwrap().row(3, 8), luma.get(24..32));
        assert_eq!(back.plane(1).unwrap().row(0, 4), Some(&[60u8; 4][..]));
        assert_eq!(back.plane(2).unwrap().row(1, 4), Some(&[50u8; 4][..]));
    }
}
