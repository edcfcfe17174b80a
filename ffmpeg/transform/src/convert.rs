/*!
    Pixel format conversion and scaling of host frames.
*/

use ffmpeg_next::{
    software::scaling::{Context as ScalerContext, Flags},
    util::frame::video::Video as AvFrame,
};
use tracing::debug;

use ffmpeg_types::{Error, PixelFormat, Result, VideoFrame};

use crate::av::{frame_from_av, frame_to_av, to_av_pixel};

/**
    Scaling algorithm used when the output size differs from the input.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScalingAlgorithm {
    /// Fastest, lowest quality
    FastBilinear,
    #[default]
    Bilinear,
    Bicubic,
    /// Nearest neighbour
    Point,
    /// Slowest, highest quality
    Lanczos,
}

impl ScalingAlgorithm {
    fn flags(self) -> Flags {
        match self {
            Self::FastBilinear => Flags::FAST_BILINEAR,
            Self::Bilinear => Flags::BILINEAR,
            Self::Bicubic => Flags::BICUBIC,
            Self::Point => Flags::POINT,
            Self::Lanczos => Flags::LANCZOS,
        }
    }
}

/**
    Output parameters for a [`VideoTransform`].

    A width or height of 0 keeps the input size.
*/
#[derive(Clone, Debug)]
pub struct VideoTransformConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub algorithm: ScalingAlgorithm,
}

impl VideoTransformConfig {
    /**
        Convert to `format`, keeping the input size.
    */
    pub fn to_format(format: PixelFormat) -> Self {
        Self {
            width: 0,
            height: 0,
            format,
            algorithm: ScalingAlgorithm::default(),
        }
    }

    /**
        Convert to BGRA at the given size.
    */
    pub fn to_bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::to_format(PixelFormat::Bgra)
        }
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: ScalingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ScalerKey {
    format: PixelFormat,
    width: u32,
    height: u32,
}

/**
    Converts host frames to a fixed output format and size.

    The scaler is created on the first frame and recreated whenever the
    input format or size changes. Frames already in the output format and
    size are returned as clones without touching FFmpeg.
*/
pub struct VideoTransform {
    config: VideoTransformConfig,
    scaler: Option<(ScalerKey, ScalerContext)>,
}

impl VideoTransform {
    pub fn new(config: VideoTransformConfig) -> Self {
        Self {
            config,
            scaler: None,
        }
    }

    pub fn config(&self) -> &VideoTransformConfig {
        &self.config
    }

    fn output_size(&self, frame: &VideoFrame) -> (u32, u32) {
        let width = if self.config.width == 0 {
            frame.width()
        } else {
            self.config.width
        };
        let height = if self.config.height == 0 {
            frame.height()
        } else {
            self.config.height
        };
        (width, height)
    }

    /**
        Convert one host frame.

        Timestamp, aspect ratio and color metadata are carried over.
    */
    pub fn transform(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        if frame.is_gpu() || frame.format().is_hardware() {
            return Err(Error::unsupported_format(
                "GPU frames must be mapped to host memory before conversion",
            ));
        }
        let (width, height) = self.output_size(frame);
        if frame.format() == self.config.format && (width, height) == (frame.width(), frame.height())
        {
            return Ok(frame.clone());
        }

        let out_pixel = to_av_pixel(self.config.format).ok_or_else(|| {
            Error::unsupported_format(format!("cannot convert to {:?}", self.config.format))
        })?;
        let input = frame_to_av(frame)?;

        let key = ScalerKey {
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        };
        let scaler = match &mut self.scaler {
            Some((current, scaler)) if *current == key => scaler,
            slot => {
                debug!(
                    "creating scaler {:?} {}x{} -> {:?} {}x{}",
                    key.format, key.width, key.height, self.config.format, width, height
                );
                let scaler = ScalerContext::get(
                    input.format(),
                    key.width,
                    key.height,
                    out_pixel,
                    width,
                    height,
                    self.config.algorithm.flags(),
                )
                .map_err(|e| Error::codec(e.to_string()))?;
                &mut slot.insert((key, scaler)).1
            }
        };

        let mut output = AvFrame::new(out_pixel, width, height);
        scaler
            .run(&input, &mut output)
            .map_err(|e| Error::codec(e.to_string()))?;

        Ok(frame_from_av(&output)?
            .with_timestamp(frame.timestamp())
            .with_display_aspect_ratio(frame.display_aspect_ratio())
            .with_color(frame.color_space(), frame.color_range()))
    }
}
