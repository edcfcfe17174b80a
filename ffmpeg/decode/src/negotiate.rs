/*!
    Hardware format negotiation cache.

    The codec library asks for an output format whenever it parses a
    sequence header, which for most streams happens many times with the same
    parameters. Setup is expensive (device session, frames context, surface
    pool), so the format chosen for a given coded size and profile is cached
    and returned directly until one of them changes.
*/

use ffmpeg_types::PixelFormat;

/**
    Stream parameters that hardware setup depends on.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamShape {
    pub coded_width: u32,
    pub coded_height: u32,
    pub profile: i32,
}

/**
    Outcome of a format query.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The cached hardware format is still valid.
    Reuse(PixelFormat),
    /// The hardware format is offered but needs (re)setup first.
    Setup(PixelFormat),
    /// The hardware format is not offered; decode in software.
    Software,
}

/**
    The last successful negotiation.
*/
#[derive(Clone, Debug, Default)]
pub struct Negotiation {
    cached: Option<(StreamShape, PixelFormat)>,
}

impl Negotiation {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Decide how to answer a format query.

        `offered` are the formats the codec library can produce for this
        stream, `hw_format` the one the backend decodes to, `session_live`
        whether the backend's device session still exists.
    */
    pub fn decide(
        &self,
        offered: impl IntoIterator<Item = PixelFormat>,
        hw_format: PixelFormat,
        shape: StreamShape,
        session_live: bool,
    ) -> Decision {
        if !offered.into_iter().any(|format| format == hw_format) {
            return Decision::Software;
        }
        match self.cached {
            Some((cached_shape, format))
                if session_live && cached_shape == shape && format == hw_format =>
            {
                Decision::Reuse(format)
            }
            _ => Decision::Setup(hw_format),
        }
    }

    /**
        Record a successful setup.
    */
    pub fn commit(&mut self, shape: StreamShape, format: PixelFormat) {
        self.cached = Some((shape, format));
    }

    /**
        Forget the cached result, forcing setup on the next query.
    */
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn shape(&self) -> Option<StreamShape> {
        self.cached.map(|(shape, _)| shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: StreamShape = StreamShape {
        coded_width: 1920,
        coded_height: 1088,
        profile: 100,
    };

    fn offered() -> Vec<PixelFormat> {
        vec![PixelFormat::Vaapi, PixelFormat::Yuv420p]
    }

    #[test]
    fn no_hardware_candidate_means_software() {
        let n = Negotiation::new();
        let decision = n.decide([PixelFormat::Yuv420p], PixelFormat::Vaapi, SHAPE, true);
        assert_eq!(decision, Decision::Software);
        let decision = n.decide(offered(), PixelFormat::Cuda, SHAPE, true);
        assert_eq!(decision, Decision::Software);
    }

    #[test]
    fn first_query_sets_up_then_reuses() {
        let mut n = Negotiation::new();
        assert_eq!(
            n.decide(offered(), PixelFormat::Vaapi, SHAPE, false),
            Decision::Setup(PixelFormat::Vaapi)
        );
        n.commit(SHAPE, PixelFormat::Vaapi);
        assert_eq!(
            n.decide(offered(), PixelFormat::Vaapi, SHAPE, true),
            Decision::Reuse(PixelFormat::Vaapi)
        );
    }

    #[test]
    fn shape_change_forces_setup() {
        let mut n = Negotiation::new();
        n.commit(SHAPE, PixelFormat::Vaapi);
        let resized = StreamShape {
            coded_width: 1280,
            coded_height: 720,
            ..SHAPE
        };
        assert_eq!(
            n.decide(offered(), PixelFormat::Vaapi, resized, true),
            Decision::Setup(PixelFormat::Vaapi)
        );
        let reprofiled = StreamShape {
            profile: 110,
            ..SHAPE
        };
        assert_eq!(
            n.decide(offered(), PixelFormat::Vaapi, reprofiled, true),
            Decision::Setup(PixelFormat::Vaapi)
        );
    }

    #[test]
    fn dead_session_forces_setup() {
        let mut n = Negotiation::new();
        n.commit(SHAPE, PixelFormat::Vaapi);
        assert_eq!(
            n.decide(offered(), PixelFormat::Vaapi, SHAPE, false),
            Decision::Setup(PixelFormat::Vaapi)
        );
        n.invalidate();
        assert_eq!(n.shape(), None);
    }
}
