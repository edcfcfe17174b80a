/*!
    Video decoder implementation.
*/

use std::time::Duration;

use ffmpeg_next::{
    Packet, Rational,
    codec::{self, Parameters, decoder::Video as VideoDecoderFFmpeg},
    ffi,
    util::frame::video::Video as VideoFrameFFmpeg,
};
use tracing::{debug, info, warn};

use ffmpeg_types::{CopyMode, Error, Result, VideoFrame};

use crate::{
    accel::{self, AccelConfig, AccelState, AccelStats, HardwareAccelerator},
    codec::{self as codecs, CodecBinding, CodecContext, CodecParams},
    config::{Backend, VideoDecoderConfig},
    env::EnvToggles,
    session::{FfmpegSession, Session},
};

/**
    Video decoder.

    Decodes video packets into frames, in hardware when the config asks for
    it and a backend accepts the stream, in software otherwise.
*/
pub struct VideoDecoder {
    // Dropped before the codec context, whose hooks it restores.
    accelerator: Option<HardwareAccelerator<FfmpegSession>>,
    decoder: VideoDecoderFFmpeg,
    time_base: Rational,
}

impl VideoDecoder {
    /**
        Create a new video decoder.

        # Arguments

        * `parameters` - Codec parameters of the stream
        * `time_base` - Time base for the video stream
        * `config` - Decoder configuration
    */
    pub fn new(
        parameters: Parameters,
        time_base: Rational,
        config: VideoDecoderConfig,
    ) -> Result<Self> {
        ffmpeg_next::init().map_err(|e| Error::codec(e.to_string()))?;

        let mut context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| Error::codec(e.to_string()))?;

        // SAFETY: the context was just created and is not shared.
        let params = unsafe { CodecParams::from_raw(context.as_ptr()) };
        let mut accelerator = select_backend(&config, &params);

        match accelerator.as_mut() {
            Some(accel) => {
                // SAFETY: the accelerator is closed or abandoned before the
                // context is freed, see the field order of `VideoDecoder`
                // and the error path below.
                unsafe { accel.attach(context.as_mut_ptr())? };
            }
            None => {
                // SAFETY: as above, and the binding is dropped right away.
                unsafe { CodecContext::from_raw(context.as_mut_ptr()) }.set_threads(config.threads);
            }
        }

        let decoder = match context.decoder().video() {
            Ok(decoder) => decoder,
            Err(e) => {
                // The context is gone already; the hooks must not be restored.
                if let Some(accel) = accelerator.as_mut() {
                    accel.abandon();
                }
                return Err(Error::codec(e.to_string()));
            }
        };

        if accelerator.is_none() && config.prefer_hw {
            info!("no hardware backend for {}, decoding in software", params.codec);
        }

        Ok(Self {
            accelerator,
            decoder,
            time_base,
        })
    }

    /**
        Get the time base for this decoder.
    */
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    /**
        Returns the selected hardware backend, if any.
    */
    pub fn backend(&self) -> Option<Backend> {
        self.accelerator.as_ref().map(HardwareAccelerator::backend)
    }

    pub fn accelerator(&self) -> Option<&HardwareAccelerator<FfmpegSession>> {
        self.accelerator.as_ref()
    }

    /**
        Returns true while frames come out of a hardware decoder.
    */
    pub fn is_hardware(&self) -> bool {
        self.accelerator
            .as_ref()
            .is_some_and(HardwareAccelerator::is_accelerated)
    }

    pub fn state(&self) -> AccelState {
        self.accelerator
            .as_ref()
            .map_or(AccelState::Closed, HardwareAccelerator::state)
    }

    /**
        Returns how hardware frames reach the caller, if decoding in hardware.
    */
    pub fn copy_mode(&self) -> Option<CopyMode> {
        self.accelerator
            .as_ref()
            .filter(|accel| accel.is_accelerated())
            .map(HardwareAccelerator::copy_mode)
    }

    pub fn stats(&self) -> AccelStats {
        self.accelerator
            .as_ref()
            .map(HardwareAccelerator::stats)
            .unwrap_or_default()
    }

    /**
        Returns a human readable description of the decoding path.
    */
    pub fn description(&self) -> String {
        match &self.accelerator {
            Some(accel) if accel.state() != AccelState::SoftwareFallback => accel.description(),
            _ => "software".to_string(),
        }
    }

    /**
        Decode a packet, returning decoded frames.

        May return zero, one, or multiple frames depending on codec.
    */
    pub fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| Error::codec(e.to_string()))?;

        self.receive_frames()
    }

    /**
        Flush the decoder to get any remaining buffered frames.

        Call this at end of stream to retrieve any buffered frames.
    */
    pub fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        self.decoder
            .send_eof()
            .map_err(|e| Error::codec(e.to_string()))?;

        self.receive_frames()
    }

    /**
        Reset the decoder after a seek.

        Clears internal buffers. Call this after seeking.
    */
    pub fn reset(&mut self) {
        self.decoder.flush();
    }

    /**
        Receive all available frames from the decoder.
    */
    fn receive_frames(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        let mut decoded_frame = VideoFrameFFmpeg::empty();

        loop {
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => match self.convert_frame(&decoded_frame) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => {
                        warn!("frame conversion error: {e}");
                    }
                },
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::AVERROR(ffi::EAGAIN) => {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => {
                    break;
                }
                Err(e) => {
                    return Err(Error::codec(e.to_string()));
                }
            }
        }

        Ok(frames)
    }

    /**
        Convert a decoded FFmpeg frame to our VideoFrame type.
    */
    fn convert_frame(&self, decoded: &VideoFrameFFmpeg) -> Result<VideoFrame> {
        let frame = match &self.accelerator {
            Some(accel) => accel.frame(decoded)?,
            None => FfmpegSession::software_frame(decoded)?,
        };
        let pts = decoded.timestamp().or_else(|| decoded.pts());
        Ok(frame.with_timestamp(pts.and_then(|pts| timestamp(pts, self.time_base))))
    }
}

impl std::fmt::Debug for VideoDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDecoder")
            .field("accelerator", &self.accelerator)
            .field("time_base", &self.time_base)
            .finish_non_exhaustive()
    }
}

/**
    Pick the first candidate backend that supports the stream and whose
    device opens.
*/
fn select_backend(
    config: &VideoDecoderConfig,
    params: &CodecParams,
) -> Option<HardwareAccelerator<FfmpegSession>> {
    let env = EnvToggles::get();
    for backend in config.candidate_backends() {
        if let Err(e) = codecs::check_support(backend, params) {
            debug!("skipping {backend}: {e}");
            continue;
        }
        let mut accel = HardwareAccelerator::new(
            backend,
            accel::device_options(config, env),
            AccelConfig::resolve(config, env),
        );
        match accel.prepare() {
            Ok(()) => return Some(accel),
            Err(e) => warn!("skipping {backend}: {e}"),
        }
    }
    None
}

/**
    Convert a timestamp in `time_base` units.
*/
fn timestamp(pts: i64, time_base: Rational) -> Option<Duration> {
    if time_base.denominator() == 0 {
        return None;
    }
    Duration::try_from_secs_f64(pts as f64 * f64::from(time_base)).ok()
}
