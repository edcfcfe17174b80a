/*!
    Codec library callbacks.

    `get_format` and `get_buffer2` are installed on the codec context with
    `opaque` pointing at the accelerator's shared state. Both run on the
    decode thread (or a frame thread) from inside `send_packet`.
*/

use std::ffi::{c_int, c_void};

use tracing::{trace, warn};

use ffmpeg_types::{PixelFormat, Result};

use crate::{
    accel::{HardwareAccelerator, Shared},
    codec::{CodecContext, CodecParams},
    ffi,
    session::{FfmpegSession, Lend},
    surface::FrameTarget,
};

type GetFormat =
    unsafe extern "C" fn(*mut ffi::AVCodecContext, *const ffi::AVPixelFormat) -> ffi::AVPixelFormat;
type GetBuffer2 = unsafe extern "C" fn(*mut ffi::AVCodecContext, *mut ffi::AVFrame, c_int) -> c_int;

/**
    The hooks a codec context had before ours.
*/
#[derive(Clone, Copy, Debug)]
pub(crate) struct SavedHooks {
    pub(crate) get_format: Option<GetFormat>,
    pub(crate) get_buffer2: Option<GetBuffer2>,
    pub(crate) opaque: *mut c_void,
}

/**
    Install our hooks, returning the previous ones.

    # Safety

    `ctx` must be valid and `opaque` must point at a live
    `Shared<FfmpegSession>` until [`restore`] runs.
*/
pub(crate) unsafe fn install(ctx: *mut ffi::AVCodecContext, opaque: *mut c_void) -> SavedHooks {
    // SAFETY: upheld by the caller.
    unsafe {
        let saved = SavedHooks {
            get_format: (*ctx).get_format,
            get_buffer2: (*ctx).get_buffer2,
            opaque: (*ctx).opaque,
        };
        (*ctx).opaque = opaque;
        (*ctx).get_format = Some(get_format);
        (*ctx).get_buffer2 = Some(get_buffer2);
        saved
    }
}

/**
    Put the hooks saved by [`install`] back.

    # Safety

    `ctx` must be valid.
*/
pub(crate) unsafe fn restore(ctx: *mut ffi::AVCodecContext, saved: SavedHooks) {
    // SAFETY: upheld by the caller.
    unsafe {
        (*ctx).get_format = saved.get_format;
        (*ctx).get_buffer2 = saved.get_buffer2;
        (*ctx).opaque = saved.opaque;
    }
}

/// # Safety
/// `ctx` must be valid; its `opaque` is ours while our hooks are installed.
unsafe fn shared<'a>(ctx: *mut ffi::AVCodecContext) -> Option<&'a Shared<FfmpegSession>> {
    // SAFETY: upheld by the caller.
    unsafe { ((*ctx).opaque as *const Shared<FfmpegSession>).as_ref() }
}

unsafe extern "C" fn get_format(
    ctx: *mut ffi::AVCodecContext,
    list: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    // SAFETY: the codec library passes its own context and a terminated list.
    unsafe {
        let formats = ffi::format_list(list);
        let offered: Vec<PixelFormat> = formats
            .iter()
            .filter_map(|&format| ffi::pixel_format(format))
            .collect();
        trace!("format query, offered {offered:?}");

        let shape = CodecParams::from_raw(ctx).shape();
        let chosen = shared(ctx).and_then(|shared| shared.negotiate(&offered, shape));
        if let Some(chosen) = chosen
            && let Some(&format) = formats
                .iter()
                .find(|&&format| ffi::pixel_format(format) == Some(chosen))
        {
            return format;
        }
        ffi::avcodec_default_get_format(ctx, list)
    }
}

unsafe extern "C" fn get_buffer2(
    ctx: *mut ffi::AVCodecContext,
    frame: *mut ffi::AVFrame,
    flags: c_int,
) -> c_int {
    // SAFETY: the codec library passes its own context and the frame to fill.
    unsafe {
        let Some(shared) = shared(ctx) else {
            return ffi::avcodec_default_get_buffer2(ctx, frame, flags);
        };
        let mut target = FrameTarget::from_raw(frame);
        match shared.lend(&mut target) {
            Ok(Lend::Pooled) => 0,
            Ok(Lend::Default) => ffi::avcodec_default_get_buffer2(ctx, frame, flags),
            Err(e) => {
                warn!("no decode buffer: {e}");
                -1
            }
        }
    }
}

impl HardwareAccelerator<FfmpegSession> {
    /**
        Open on the codec context `ctx` and install the hooks.

        # Safety

        `ctx` must be valid until [`HardwareAccelerator::close`] runs, which
        also happens on drop.
    */
    pub(crate) unsafe fn attach(&mut self, ctx: *mut ffi::AVCodecContext) -> Result<()> {
        // SAFETY: upheld by the caller.
        self.open(unsafe { CodecContext::from_raw(ctx) })?;
        let opaque = self.shared_ptr() as *mut c_void;
        // SAFETY: the shared state is boxed and outlives the hooks, which
        // close restores.
        self.with_codec(|codec| unsafe { codec.install(opaque) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_restore() {
        // SAFETY: the context is allocated and freed here.
        unsafe {
            let mut ctx = ffi::avcodec_alloc_context3(std::ptr::null());
            assert!(!ctx.is_null());
            let before = (*ctx).get_format.map(|f| f as usize);
            let mut marker = 0u8;
            let saved = install(ctx, (&mut marker as *mut u8).cast());
            assert_eq!((*ctx).opaque, (&mut marker as *mut u8).cast());
            assert_eq!(
                (*ctx).get_buffer2.map(|f| f as usize),
                Some(get_buffer2 as GetBuffer2 as usize)
            );
            restore(ctx, saved);
            assert!((*ctx).opaque.is_null());
            assert_eq!((*ctx).get_format.map(|f| f as usize), before);
            ffi::avcodec_free_context(&mut ctx);
        }
    }
}
