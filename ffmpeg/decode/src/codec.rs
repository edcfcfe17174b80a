/*!
    Codec identification and per-backend support tables.
*/

use std::fmt;

use ffmpeg_next::codec::Id;
use ffmpeg_types::{Error, Result};

use crate::{config::Backend, ffi, hooks::SavedHooks, negotiate::StreamShape};

/// `FF_PROFILE_H264_INTRA`, or'ed into intra-only H.264 profiles.
const H264_INTRA: i32 = 1 << 11;
/// `FF_PROFILE_H264_CONSTRAINED`
const H264_CONSTRAINED: i32 = 1 << 9;
const H264_HIGH_10: i32 = 110;
const H264_HIGH_422: i32 = 122;
const H264_HIGH_444_PREDICTIVE: i32 = 244;
const H264_CAVLC_444: i32 = 44;

/**
    Video codecs the backends know about.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecKind {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Mpeg1,
    Mpeg2,
    Mpeg4,
    H263,
    /// VC-1 and WMV3, which share a decoder.
    Vc1,
    Other,
}

impl CodecKind {
    pub fn from_id(id: Id) -> Self {
        match id {
            Id::H264 => Self::H264,
            Id::HEVC => Self::Hevc,
            Id::VP8 => Self::Vp8,
            Id::VP9 => Self::Vp9,
            Id::AV1 => Self::Av1,
            Id::MPEG1VIDEO => Self::Mpeg1,
            Id::MPEG2VIDEO => Self::Mpeg2,
            Id::MPEG4 => Self::Mpeg4,
            Id::H263 => Self::H263,
            Id::VC1 | Id::WMV3 => Self::Vc1,
            _ => Self::Other,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Mpeg1 => "mpeg1video",
            Self::Mpeg2 => "mpeg2video",
            Self::Mpeg4 => "mpeg4",
            Self::H263 => "h263",
            Self::Vc1 => "vc1",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/**
    What a backend needs to know about the stream before accepting it.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecParams {
    pub codec: CodecKind,
    pub profile: i32,
    pub coded_width: u32,
    pub coded_height: u32,
}

impl CodecParams {
    pub fn new(codec: CodecKind, profile: i32, coded_width: u32, coded_height: u32) -> Self {
        Self {
            codec,
            profile,
            coded_width,
            coded_height,
        }
    }

    /**
        Read the parameters of an open codec context.

        # Safety

        `ctx` must be a valid codec context.
    */
    pub(crate) unsafe fn from_raw(ctx: *const ffi::AVCodecContext) -> Self {
        // SAFETY: upheld by the caller.
        unsafe {
            Self {
                codec: CodecKind::from_id(Id::from((*ctx).codec_id)),
                profile: (*ctx).profile,
                coded_width: (*ctx).coded_width.max(0) as u32,
                coded_height: (*ctx).coded_height.max(0) as u32,
            }
        }
    }

    pub fn shape(&self) -> StreamShape {
        StreamShape {
            coded_width: self.coded_width,
            coded_height: self.coded_height,
            profile: self.profile,
        }
    }
}

/**
    Returns true if `backend` has a hardware decoder for `codec`.
*/
pub const fn backend_supports(backend: Backend, codec: CodecKind) -> bool {
    use CodecKind::*;

    match backend {
        Backend::Cuda => !matches!(codec, Other),
        Backend::Vaapi => matches!(codec, H264 | Hevc | Vp8 | Vp9 | Av1 | Mpeg2 | Vc1),
        Backend::D3d11 | Backend::Dxva => {
            matches!(codec, H264 | Hevc | Vp9 | Av1 | Mpeg2 | Vc1)
        }
        Backend::VideoToolbox => {
            matches!(codec, H264 | Hevc | Mpeg1 | Mpeg2 | Mpeg4 | H263 | Vp9 | Av1)
        }
    }
}

/**
    Returns true for the H.264 profiles above High, which VideoToolbox
    cannot decode.
*/
const fn is_h264_high_bit_depth_or_chroma(profile: i32) -> bool {
    let base = profile & !(H264_INTRA | H264_CONSTRAINED);
    matches!(
        base,
        H264_HIGH_10 | H264_HIGH_422 | H264_HIGH_444_PREDICTIVE | H264_CAVLC_444
    )
}

/**
    Check that `backend` can decode the stream described by `params`.
*/
pub fn check_support(backend: Backend, params: &CodecParams) -> Result<()> {
    if !backend_supports(backend, params.codec) {
        return Err(Error::unsupported(format!(
            "{} decoding on {}",
            params.codec,
            backend.name()
        )));
    }
    if backend == Backend::VideoToolbox
        && params.codec == CodecKind::H264
        && is_h264_high_bit_depth_or_chroma(params.profile)
    {
        return Err(Error::unsupported(format!(
            "h264 profile {} on {}",
            params.profile,
            backend.name()
        )));
    }
    Ok(())
}

/**
    The codec library side of a hardware session.

    Lets the accelerator adjust the codec it decodes for and put everything
    back on close.
*/
pub trait CodecBinding: Send {
    fn params(&self) -> CodecParams;

    /**
        Apply the decoder thread count; `0` lets the codec library decide.
    */
    fn set_threads(&mut self, threads: usize);

    /**
        Put the codec library's own buffer allocator back, leaving the
        format hook installed.
    */
    fn restore_buffer_hook(&mut self);

    /**
        Drop the device and frames references the codec holds.
    */
    fn release_hardware(&mut self);

    /**
        Restore every hook and drop any hardware context the codec holds.
    */
    fn restore(&mut self);
}

/**
    An `AVCodecContext` with the accelerator's hooks installed.

    Does not own the codec context; the decoder that does must call
    [`CodecBinding::restore`] (through the accelerator's close) before
    freeing it.
*/
pub struct CodecContext {
    ctx: *mut ffi::AVCodecContext,
    saved: Option<SavedHooks>,
}

impl CodecContext {
    /**
        # Safety

        `ctx` must be a valid codec context that outlives the returned value.
    */
    pub(crate) unsafe fn from_raw(ctx: *mut ffi::AVCodecContext) -> Self {
        Self { ctx, saved: None }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut ffi::AVCodecContext {
        self.ctx
    }

    /**
        Install the hooks, reaching `opaque` from inside them.

        # Safety

        `opaque` must stay valid until [`CodecBinding::restore`] runs.
    */
    pub(crate) unsafe fn install(&mut self, opaque: *mut std::ffi::c_void) {
        if self.saved.is_none() {
            // SAFETY: upheld by the caller and by `from_raw`.
            self.saved = Some(unsafe { crate::hooks::install(self.ctx, opaque) });
        }
    }

    pub(crate) fn is_hooked(&self) -> bool {
        self.saved.is_some()
    }
}

impl CodecBinding for CodecContext {
    fn params(&self) -> CodecParams {
        // SAFETY: valid per `from_raw`.
        unsafe { CodecParams::from_raw(self.ctx) }
    }

    fn set_threads(&mut self, threads: usize) {
        // SAFETY: valid per `from_raw`; the thread count is only read when
        // the codec is opened or flushed.
        unsafe {
            (*self.ctx).thread_count = i32::try_from(threads).unwrap_or(i32::MAX);
        }
    }

    fn restore_buffer_hook(&mut self) {
        if let Some(saved) = &self.saved {
            // SAFETY: valid per `from_raw`.
            unsafe { (*self.ctx).get_buffer2 = saved.get_buffer2 };
        }
    }

    fn release_hardware(&mut self) {
        // SAFETY: valid per `from_raw`; the references are owned by the
        // codec context and unref leaves them null.
        unsafe {
            ffi::av_buffer_unref(&mut (*self.ctx).hw_frames_ctx);
            ffi::av_buffer_unref(&mut (*self.ctx).hw_device_ctx);
        }
    }

    fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            // SAFETY: valid per `from_raw`.
            unsafe { crate::hooks::restore(self.ctx, saved) };
        }
        self.release_hardware();
    }
}

impl fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecContext")
            .field("params", &self.params())
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

// SAFETY: the codec context is only touched from the decode thread, either
// directly by the decoder or through the hooks it calls synchronously.
unsafe impl Send for CodecContext {}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(codec: CodecKind, profile: i32) -> CodecParams {
        CodecParams::new(codec, profile, 1920, 1088)
    }

    #[test]
    fn codec_ids() {
        assert_eq!(CodecKind::from_id(Id::H264), CodecKind::H264);
        assert_eq!(CodecKind::from_id(Id::WMV3), CodecKind::Vc1);
        assert_eq!(CodecKind::from_id(Id::PNG), CodecKind::Other);
    }

    #[test]
    fn support_tables() {
        assert!(backend_supports(Backend::Vaapi, CodecKind::Vp8));
        assert!(!backend_supports(Backend::D3d11, CodecKind::Vp8));
        assert!(backend_supports(Backend::VideoToolbox, CodecKind::H263));
        assert!(!backend_supports(Backend::VideoToolbox, CodecKind::Vc1));
        for backend in Backend::ALL {
            assert!(backend_supports(backend, CodecKind::H264));
            assert!(backend_supports(backend, CodecKind::Hevc));
            assert!(!backend_supports(backend, CodecKind::Other));
        }
    }

    #[test]
    fn videotoolbox_rejects_high_h264_profiles() {
        for profile in [
            H264_HIGH_10,
            H264_HIGH_10 | H264_INTRA,
            H264_HIGH_422,
            H264_HIGH_422 | H264_INTRA,
            H264_HIGH_444_PREDICTIVE,
            H264_HIGH_444_PREDICTIVE | H264_INTRA,
            H264_CAVLC_444 | H264_INTRA,
        ] {
            let err = check_support(Backend::VideoToolbox, &params(CodecKind::H264, profile))
                .unwrap_err();
            assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Unsupported);
        }
        // High profile is fine
        check_support(Backend::VideoToolbox, &params(CodecKind::H264, 100)).unwrap();
        // Profile numbers of other codecs are not H.264 profiles
        check_support(Backend::VideoToolbox, &params(CodecKind::Hevc, 110)).unwrap();
        // Other backends leave profile checks to the driver
        check_support(Backend::Vaapi, &params(CodecKind::H264, H264_HIGH_10)).unwrap();
    }

    #[test]
    fn unsupported_codec() {
        let err = check_support(Backend::D3d11, &params(CodecKind::Mpeg4, 0)).unwrap_err();
        assert!(err.to_string().contains("mpeg4"));
    }

    #[test]
    fn shape_from_params() {
        let shape = params(CodecKind::H264, 100).shape();
        assert_eq!(shape.coded_width, 1920);
        assert_eq!(shape.coded_height, 1088);
        assert_eq!(shape.profile, 100);
    }
}
