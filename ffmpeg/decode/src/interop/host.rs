/*!
    Copying hardware surfaces into host memory.
*/

use std::ffi::c_int;

use ffmpeg_next::util::frame::video::Video as AvFrame;
use tracing::debug;

use ffmpeg_transform::{
    SourceFrame, SourcePlane, UswcCopier, VideoTransform, VideoTransformConfig, copy_to_frame,
    frame_from_av, to_av_pixel,
};
use ffmpeg_types::{Error, PixelFormat, Result, VideoFrame};

use crate::{ffi, surface::HwFrame};

/**
    How a surface reaches host memory.
*/
pub(crate) enum HostPath<'a> {
    /// Read-map the surface and copy the planes, with the SIMD engine if given.
    ReadMap(Option<&'a mut UswcCopier>),
    /// Let the driver transfer the surface.
    Transfer,
}

/**
    Copy `frame` into a host frame in its native layout.
*/
pub(crate) fn download(frame: &HwFrame, path: HostPath<'_>) -> Result<VideoFrame> {
    match path {
        HostPath::ReadMap(copier) => read_map(frame, copier),
        HostPath::Transfer => transfer(frame),
    }
}

/**
    Copy `frame` into a host frame in `format`, read-mapping where the driver
    allows it and transferring otherwise.
*/
pub(crate) fn to_host(frame: &HwFrame, format: PixelFormat) -> Result<VideoFrame> {
    let host = download(frame, HostPath::ReadMap(None)).or_else(|e| {
        debug!("read-map failed ({e}), transferring instead");
        download(frame, HostPath::Transfer)
    })?;
    convert(host, format)
}

/**
    Convert a host frame to `format` unless it already is.
*/
pub(crate) fn convert(frame: VideoFrame, format: PixelFormat) -> Result<VideoFrame> {
    if frame.format() == format {
        return Ok(frame);
    }
    VideoTransform::new(VideoTransformConfig::to_format(format)).transform(&frame)
}

/// Frees a mapped frame, which also unmaps it.
struct MappedFrame(*mut ffi::AVFrame);

impl Drop for MappedFrame {
    fn drop(&mut self) {
        // SAFETY: the frame was allocated by av_frame_alloc.
        unsafe { ffi::av_frame_free(&mut self.0) };
    }
}

fn read_map(frame: &HwFrame, copier: Option<&mut UswcCopier>) -> Result<VideoFrame> {
    let sw_format = frame
        .sw_format()
        .ok_or_else(|| Error::unsupported_format("surface layout is unknown"))?;
    let av_format = to_av_pixel(sw_format)
        .ok_or_else(|| Error::unsupported_format(format!("no FFmpeg format for {sw_format:?}")))?;

    // SAFETY: `mapped` is owned by the guard; the mapping keeps the surface
    // readable until the guard frees it at the end of this function.
    unsafe {
        let mapped = MappedFrame(ffi::av_frame_alloc());
        if mapped.0.is_null() {
            return Err(Error::surface("av_frame_alloc failed"));
        }
        (*mapped.0).format = ffi::AVPixelFormat::from(av_format) as c_int;
        let ret = ffi::av_hwframe_map(mapped.0, frame.as_ptr(), ffi::HWFRAME_MAP_READ as c_int);
        ffi::check_surface(ret, "av_hwframe_map")?;

        let width = (*mapped.0).width.max(0) as u32;
        let height = (*mapped.0).height.max(0) as u32;
        let luma = (*mapped.0).data[0];
        let pitch = (*mapped.0).linesize[0];
        if luma.is_null() || pitch <= 0 {
            return Err(Error::surface("mapped plane 0 is not readable"));
        }
        let pitch = pitch as usize;

        // Some drivers only report the luma plane; the chroma planes follow
        // it at the coded height.
        let luma_only = (1..sw_format.plane_count()).all(|index| (*mapped.0).data[index].is_null());
        if luma_only && sw_format.plane_count() > 1 {
            let surface_height = frame.coded_height().max(height);
            let len = SourceFrame::contiguous_len(sw_format, pitch, surface_height);
            let data = std::slice::from_raw_parts(luma, len);
            let source =
                SourceFrame::contiguous(sw_format, width, height, data, pitch, surface_height)?;
            return copy_to_frame(&source, copier);
        }

        let mut planes = Vec::with_capacity(sw_format.plane_count());
        for index in 0..sw_format.plane_count() {
            let data = (*mapped.0).data[index];
            let pitch = (*mapped.0).linesize[index];
            if data.is_null() || pitch <= 0 {
                return Err(Error::surface(format!("mapped plane {index} is not readable")));
            }
            let pitch = pitch as usize;
            let rows = sw_format.plane_height(index, height) as usize;
            let line = sw_format.bytes_per_line(index, width);
            let len = match rows {
                0 => 0,
                rows => pitch
                    .checked_mul(rows - 1)
                    .and_then(|len| len.checked_add(line))
                    .ok_or_else(|| Error::surface(format!("mapped plane {index} overflows")))?,
            };
            planes.push(SourcePlane {
                data: std::slice::from_raw_parts(data, len),
                pitch,
            });
        }
        let source = SourceFrame::new(sw_format, width, height, planes)?;
        copy_to_frame(&source, copier)
    }
}

fn transfer(frame: &HwFrame) -> Result<VideoFrame> {
    let mut host = AvFrame::empty();
    // SAFETY: both frames are valid; the destination buffers are allocated
    // by the call.
    let ret = unsafe { ffi::av_hwframe_transfer_data(host.as_mut_ptr(), frame.as_ptr(), 0) };
    ffi::check_surface(ret, "av_hwframe_transfer_data")?;
    frame_from_av(&host)
}
