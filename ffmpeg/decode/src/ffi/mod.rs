/*!
    Raw FFmpeg bindings plus the hardware context layouts `ffmpeg-next`
    does not expose.

    Everything from `ffmpeg_next::ffi` is re-exported, so `crate::ffi` is the
    one place unsafe code reaches for FFmpeg symbols.
*/

use std::ffi::{CStr, c_char, c_int};

pub(crate) use ffmpeg_next::ffi::*;

use ffmpeg_transform::from_av_pixel;
use ffmpeg_types::{Error, PixelFormat, Result};

mod drm;
mod hwctx;

pub(crate) use drm::{DRM_FORMAT_MOD_INVALID, DrmFrameDescriptor, DrmPlane, drm_fourcc};
pub(crate) use hwctx::*;

/// `AV_HWFRAME_MAP_READ`
pub(crate) const HWFRAME_MAP_READ: c_int = 1;

/**
    Render an FFmpeg error code as text.
*/
pub(crate) fn error_string(code: c_int) -> String {
    let mut buf = [0 as c_char; 128];
    // SAFETY: the buffer is valid for its length and av_strerror always
    // nul-terminates within it.
    let ret = unsafe { av_strerror(code, buf.as_mut_ptr(), buf.len()) };
    if ret < 0 {
        return format!("error {code}");
    }
    // SAFETY: see above.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/**
    Map a negative FFmpeg return code to a setup error for `backend`.
*/
pub(crate) fn check_setup(code: c_int, backend: &str, what: &str) -> Result<c_int> {
    if code < 0 {
        Err(Error::setup(backend, format!("{what}: {}", error_string(code))))
    } else {
        Ok(code)
    }
}

/**
    Map a negative FFmpeg return code to a per-surface error.
*/
pub(crate) fn check_surface(code: c_int, what: &str) -> Result<c_int> {
    if code < 0 {
        Err(Error::surface(format!("{what}: {}", error_string(code))))
    } else {
        Ok(code)
    }
}

/**
    Convert a raw FFmpeg pixel format to ours.
*/
pub(crate) fn pixel_format(format: AVPixelFormat) -> Option<PixelFormat> {
    from_av_pixel(format.into())
}

/**
    Convert the `format` field of an `AVFrame`.
*/
pub(crate) fn frame_format(format: c_int) -> Option<PixelFormat> {
    if format < 0 {
        return None;
    }
    // SAFETY: AVPixelFormat is a C enum with i32 representation and frames
    // only ever carry values FFmpeg produced.
    let format: AVPixelFormat = unsafe { std::mem::transmute::<c_int, AVPixelFormat>(format) };
    pixel_format(format)
}

/**
    Collect the `AV_PIX_FMT_NONE`-terminated list the format hook receives.

    # Safety

    `list` must be null or point to a terminated list.
*/
pub(crate) unsafe fn format_list(list: *const AVPixelFormat) -> Vec<AVPixelFormat> {
    let mut formats = Vec::new();
    if list.is_null() {
        return formats;
    }
    let mut cursor = list;
    // SAFETY: upheld by the caller.
    unsafe {
        while *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
            formats.push(*cursor);
            cursor = cursor.add(1);
        }
    }
    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_strings() {
        let text = error_string(AVERROR(EAGAIN));
        assert!(!text.is_empty());
        assert!(check_setup(-22, "vaapi", "create").is_err());
        assert_eq!(check_surface(0, "map").unwrap(), 0);
    }

    #[test]
    fn format_lists() {
        let list = [
            AVPixelFormat::AV_PIX_FMT_VAAPI,
            AVPixelFormat::AV_PIX_FMT_YUV420P,
            AVPixelFormat::AV_PIX_FMT_NONE,
        ];
        // SAFETY: the list is terminated.
        let formats = unsafe { format_list(list.as_ptr()) };
        assert_eq!(formats.len(), 2);
        assert_eq!(pixel_format(formats[0]), Some(PixelFormat::Vaapi));
        assert!(unsafe { format_list(std::ptr::null()) }.is_empty());
        assert_eq!(
            frame_format(AVPixelFormat::AV_PIX_FMT_NV12 as c_int),
            Some(PixelFormat::Nv12)
        );
        assert_eq!(frame_format(-1), None);
    }
}
