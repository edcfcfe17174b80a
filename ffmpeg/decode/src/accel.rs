/*!
    Hardware accelerator.

    Drives one [`Session`] through the life of a stream:

    ```text
    Closed --open--> Probing --setup ok--> Accelerated --shape change--> Probing
                        |                       |
                        +---setup failed---> SoftwareFallback
    any state --close--> Closed
    ```

    Device and surface setup is deferred to the first format query, since
    only then are the coded size and profile known. Any setup failure, or
    a session failure later on, degrades the stream to software decoding
    for good.

    A session that fails mid-stream is dropped without detaching the codec.
    The hardware decoder the codec library already set up keeps its device
    and frames context, and its pictures are downloaded until the next
    format query lets the codec switch to a software format.
*/

use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ffmpeg_transform::CopyTier;
use ffmpeg_types::{CopyMode, Error, ErrorCategory, PixelFormat, Result, VideoFrame};

use crate::{
    codec::{self, CodecBinding},
    config::{Backend, VideoDecoderConfig},
    env::EnvToggles,
    negotiate::{Decision, Negotiation, StreamShape},
    session::{DeviceOptions, Lend, Session},
};

/**
    Where the accelerator is in its life cycle.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelState {
    /// Not attached to a codec.
    Closed,
    /// Attached, waiting for the codec to ask for an output format.
    Probing,
    /// Decoding in hardware.
    Accelerated,
    /// Hardware decoding failed or is not possible for this stream.
    SoftwareFallback,
}

/**
    Counters for diagnostics.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelStats {
    /// Sessions built, counting rebuilds after stream changes.
    pub setups: u32,
    /// Format queries answered from the negotiation cache.
    pub reuses: u64,
    /// Surfaces in the current pool.
    pub surfaces: usize,
    /// Pooled surfaces handed to the codec library.
    pub lent: u64,
    /// Buffer requests refused because every surface was in use.
    pub exhausted: u64,
    /// Frames that left the accelerator on the hardware path.
    pub hardware_frames: u64,
    /// Frames that left the accelerator on the software path.
    pub software_frames: u64,
}

/**
    Accelerator policy, resolved from the decoder config and environment.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccelConfig {
    /// Decoder threads (0 = let the codec library decide).
    pub threads: usize,
    /// Surfaces on top of what the codec needs for references.
    pub extra_surfaces: usize,
    /// Requested copy mode.
    pub copy_mode: CopyMode,
    /// Force the portable copy tier.
    pub no_simd: bool,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            extra_surfaces: 4,
            copy_mode: CopyMode::ZeroCopy,
            no_simd: false,
        }
    }
}

impl AccelConfig {
    /**
        Resolve the policy. Environment toggles win over the config.
    */
    pub fn resolve(config: &VideoDecoderConfig, env: &EnvToggles) -> Self {
        Self {
            threads: config.threads,
            extra_surfaces: config.extra_surfaces,
            copy_mode: env
                .copy_mode
                .or(config.copy_mode)
                .unwrap_or(CopyMode::ZeroCopy),
            no_simd: env.no_simd,
        }
    }
}

/**
    Returns the device options for [`crate::FfmpegSession`] from a decoder config.
*/
pub fn device_options(config: &VideoDecoderConfig, env: &EnvToggles) -> DeviceOptions {
    DeviceOptions {
        display: config.display,
        device_path: config.device_path.clone(),
        external: config.external_device,
        no_simd: env.no_simd,
    }
}

/**
    Returns the host copy mode to use when zero-copy is not possible.
*/
pub fn fallback_copy_mode(backend: Backend, tier: CopyTier, no_simd: bool) -> CopyMode {
    if backend.has_uswc_surfaces() && tier > CopyTier::Portable && !no_simd {
        CopyMode::OptimizedCopy
    } else {
        CopyMode::GenericCopy
    }
}

/**
    Returns the copy mode `backend` can honour for a `requested` one.

    Read-mapping only pays off for surfaces in write-combined memory; other
    backends transfer instead.
*/
pub fn resolve_copy_mode(requested: CopyMode, backend: Backend) -> CopyMode {
    match requested {
        CopyMode::OptimizedCopy if !backend.has_uswc_surfaces() => CopyMode::GenericCopy,
        mode => mode,
    }
}

struct Inner<S: Session> {
    backend: Backend,
    options: S::Options,
    config: AccelConfig,
    state: AccelState,
    codec: Option<S::Codec>,
    session: Option<S>,
    negotiation: Negotiation,
    copy_mode: CopyMode,
    interop: Weak<S::Interop>,
    description: Option<String>,
    stats: AccelStats,
    /// The codec still holds the device and frames of a dropped session.
    codec_holds_hardware: bool,
}

impl<S: Session> Inner<S> {
    fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_none() {
            let session = S::open(self.backend, &self.options)?;
            let description = session.description();
            info!("using {description} for hardware decoding");
            self.description = Some(description);
            self.session = Some(session);
        }
        Ok(())
    }

    fn setup(&mut self, shape: StreamShape) -> Result<()> {
        let backend = self.backend;
        self.ensure_session()?;
        let (Some(codec), Some(session)) = (self.codec.as_mut(), self.session.as_mut()) else {
            return Err(Error::setup(backend.name(), "accelerator is not open"));
        };

        let mut mode = resolve_copy_mode(self.config.copy_mode, backend);
        if mode == CopyMode::ZeroCopy {
            match session.create_interop() {
                Ok(interop) => self.interop = Arc::downgrade(&interop),
                Err(e) => {
                    mode = fallback_copy_mode(backend, CopyTier::detect(), self.config.no_simd);
                    warn!("{backend}: zero-copy unavailable ({e}), using {mode} copy");
                    self.interop = Weak::new();
                }
            }
        }
        session.configure(codec, shape, self.config.extra_surfaces, mode)?;

        self.copy_mode = mode;
        self.stats.setups += 1;
        self.stats.surfaces = session.surface_count();
        debug!(
            "{backend}: {}x{} profile {} ready, {} surfaces, {mode}",
            shape.coded_width,
            shape.coded_height,
            shape.profile,
            self.stats.surfaces
        );
        Ok(())
    }

    fn fall_back(&mut self, reason: &str) {
        warn!(
            "{} hardware decoding unavailable ({reason}), decoding in software",
            self.backend
        );
        if let Some(mut session) = self.session.take()
            && let Some(codec) = self.codec.as_mut()
        {
            session.teardown(codec);
        }
        if let Some(codec) = self.codec.as_mut() {
            codec.restore_buffer_hook();
        }
        self.negotiation.invalidate();
        self.interop = Weak::new();
        self.stats.surfaces = 0;
        self.state = AccelState::SoftwareFallback;
    }

    fn degrade(&mut self, reason: &str) {
        warn!(
            "{} hardware session failed ({reason}), copying the remaining hardware frames",
            self.backend
        );
        // The codec keeps its own references to the device and frames.
        self.session = None;
        if let Some(codec) = self.codec.as_mut() {
            codec.restore_buffer_hook();
        }
        self.negotiation.invalidate();
        self.interop = Weak::new();
        self.stats.surfaces = 0;
        self.codec_holds_hardware = true;
        self.state = AccelState::SoftwareFallback;
    }

    fn negotiate(&mut self, offered: &[PixelFormat], shape: StreamShape) -> Option<PixelFormat> {
        if self.codec_holds_hardware {
            if let Some(codec) = self.codec.as_mut() {
                codec.release_hardware();
            }
            self.codec_holds_hardware = false;
        }
        if !matches!(self.state, AccelState::Probing | AccelState::Accelerated) {
            return None;
        }
        let hw_format = self.backend.hw_format();
        let live = self.session.is_some();
        match self
            .negotiation
            .decide(offered.iter().copied(), hw_format, shape, live)
        {
            Decision::Software => {
                self.fall_back("no hardware format offered");
                None
            }
            Decision::Reuse(format) => {
                let reattached = match (self.session.as_mut(), self.codec.as_mut()) {
                    (Some(session), Some(codec)) => session.reattach(codec),
                    _ => Err(Error::setup(self.backend.name(), "accelerator is not open")),
                };
                match reattached {
                    Ok(()) => {
                        self.stats.reuses += 1;
                        Some(format)
                    }
                    Err(e) => {
                        self.fall_back(&e.to_string());
                        None
                    }
                }
            }
            Decision::Setup(format) => {
                if self.state == AccelState::Accelerated {
                    debug!("{}: stream changed to {shape:?}", self.backend);
                    self.state = AccelState::Probing;
                }
                match self.setup(shape) {
                    Ok(()) => {
                        self.negotiation.commit(shape, format);
                        self.state = AccelState::Accelerated;
                        Some(format)
                    }
                    Err(e) => {
                        self.fall_back(&e.to_string());
                        None
                    }
                }
            }
        }
    }

    fn lend(&mut self, target: &mut S::Target) -> Result<Lend> {
        if self.state != AccelState::Accelerated {
            return Ok(Lend::Default);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(Lend::Default);
        };
        match session.lend_surface(target) {
            Ok(lend) => {
                if lend == Lend::Pooled {
                    self.stats.lent += 1;
                }
                Ok(lend)
            }
            Err(e) if e.category() == ErrorCategory::Setup => {
                self.degrade(&e.to_string());
                Ok(Lend::Default)
            }
            Err(e) => {
                self.stats.exhausted += 1;
                warn!("{}: {e}, dropping a frame", self.backend);
                Err(e)
            }
        }
    }

    fn frame(&mut self, decoded: &S::Decoded) -> Result<VideoFrame> {
        let Some(session) = self.session.as_mut() else {
            self.stats.software_frames += 1;
            return S::software_frame(decoded);
        };
        if !session.is_hardware(decoded) {
            self.stats.software_frames += 1;
            return S::software_frame(decoded);
        }
        let result = match self.copy_mode {
            CopyMode::ZeroCopy => session.export(decoded),
            mode => session.download(decoded, mode),
        };
        match result {
            Ok(frame) => {
                self.stats.hardware_frames += 1;
                Ok(frame)
            }
            Err(e) if e.category() == ErrorCategory::Setup => {
                self.degrade(&e.to_string());
                self.stats.software_frames += 1;
                S::software_frame(decoded)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Some(mut session) = self.session.take() {
                session.teardown(&mut codec);
            }
            codec.restore();
        }
        // Pool, frames context and device go in that order.
        self.session = None;
        self.codec_holds_hardware = false;
        self.negotiation.invalidate();
        self.interop = Weak::new();
        self.stats.surfaces = 0;
        if self.state != AccelState::Closed {
            debug!("{}: accelerator closed", self.backend);
        }
        self.state = AccelState::Closed;
    }
}

/**
    The part of the accelerator the codec hooks reach through `opaque`.

    Boxed by [`HardwareAccelerator`] so its address stays fixed while the
    hooks are installed.
*/
pub(crate) struct Shared<S: Session> {
    inner: Mutex<Inner<S>>,
}

impl<S: Session> Shared<S> {
    pub(crate) fn negotiate(
        &self,
        offered: &[PixelFormat],
        shape: StreamShape,
    ) -> Option<PixelFormat> {
        self.inner.lock().negotiate(offered, shape)
    }

    pub(crate) fn lend(&self, target: &mut S::Target) -> Result<Lend> {
        self.inner.lock().lend(target)
    }
}

/**
    Hardware decoding for one stream on one backend.

    See the [module documentation](self) for the life cycle.
*/
pub struct HardwareAccelerator<S: Session> {
    backend: Backend,
    shared: Box<Shared<S>>,
}

impl<S: Session> HardwareAccelerator<S> {
    pub fn new(backend: Backend, options: S::Options, config: AccelConfig) -> Self {
        let copy_mode = config.copy_mode;
        Self {
            backend,
            shared: Box::new(Shared {
                inner: Mutex::new(Inner {
                    backend,
                    options,
                    config,
                    state: AccelState::Closed,
                    codec: None,
                    session: None,
                    negotiation: Negotiation::new(),
                    copy_mode,
                    interop: Weak::new(),
                    description: None,
                    stats: AccelStats::default(),
                    codec_holds_hardware: false,
                }),
            }),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn state(&self) -> AccelState {
        self.shared.inner.lock().state
    }

    pub fn is_accelerated(&self) -> bool {
        self.state() == AccelState::Accelerated
    }

    /**
        Returns the copy mode in effect, which may differ from the requested
        one once setup has run.
    */
    pub fn copy_mode(&self) -> CopyMode {
        self.shared.inner.lock().copy_mode
    }

    pub fn stats(&self) -> AccelStats {
        self.shared.inner.lock().stats
    }

    /**
        Returns the backend description, with the adapter vendor once a
        device has been opened.
    */
    pub fn description(&self) -> String {
        self.shared
            .inner
            .lock()
            .description
            .clone()
            .unwrap_or_else(|| self.backend.api_name().to_string())
    }

    /**
        Returns the interop resource of the current session, if frames are
        exported zero-copy and it is still alive.
    */
    pub fn interop(&self) -> Option<Arc<S::Interop>> {
        self.shared.inner.lock().interop.upgrade()
    }

    /**
        Attach to `codec`.

        Checks that the backend supports the codec and profile and applies
        the thread count. Nothing is allocated until the first format query.
    */
    pub fn open(&mut self, mut codec: S::Codec) -> Result<()> {
        if self.state() != AccelState::Closed {
            self.close();
        }
        let params = codec.params();
        codec::check_support(self.backend, &params)?;

        let mut inner = self.shared.inner.lock();
        let threads = if self.backend.forces_single_thread() {
            1
        } else {
            inner.config.threads
        };
        codec.set_threads(threads);
        inner.codec = Some(codec);
        inner.copy_mode = inner.config.copy_mode;
        inner.stats = AccelStats::default();
        inner.state = AccelState::Probing;
        debug!("{}: opened for {}", self.backend, params.codec);
        Ok(())
    }

    /**
        Open the device now rather than on the first format query.

        Lets callers pick the first backend whose device opens. A prepared
        device survives [`Self::open`] and is released by [`Self::close`].
    */
    pub fn prepare(&mut self) -> Result<()> {
        self.shared.inner.lock().ensure_session()
    }

    /**
        Answer a format query.

        Returns the hardware format to decode to, or `None` to let the codec
        library pick a software format.
    */
    pub fn negotiate(&self, offered: &[PixelFormat], shape: StreamShape) -> Option<PixelFormat> {
        self.shared.negotiate(offered, shape)
    }

    /**
        Answer a buffer request.
    */
    pub fn lend(&self, target: &mut S::Target) -> Result<Lend> {
        self.shared.lend(target)
    }

    /**
        Turn a decoded picture into a frame for the renderer.
    */
    pub fn frame(&self, decoded: &S::Decoded) -> Result<VideoFrame> {
        self.shared.inner.lock().frame(decoded)
    }

    /**
        Restore the codec's hooks and release the session.

        Frames already handed out keep their surfaces and interop resource.
    */
    pub fn close(&mut self) {
        self.shared.inner.lock().close();
    }

    /**
        Forget the codec without touching it, for when it has already been
        freed. The session is released as in [`Self::close`].
    */
    pub(crate) fn abandon(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.codec = None;
        inner.close();
    }

    pub(crate) fn shared_ptr(&self) -> *const Shared<S> {
        &*self.shared
    }

    pub(crate) fn with_codec<T>(&self, f: impl FnOnce(&mut S::Codec) -> T) -> Option<T> {
        self.shared.inner.lock().codec.as_mut().map(f)
    }
}

impl<S: Session> Drop for HardwareAccelerator<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Session> fmt::Debug for HardwareAccelerator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("HardwareAccelerator")
            .field("backend", &self.backend)
            .field("state", &inner.state)
            .field("copy_mode", &inner.copy_mode)
            .field("stats", &inner.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_modes() {
        assert_eq!(
            fallback_copy_mode(Backend::Vaapi, CopyTier::Sse41, false),
            CopyMode::OptimizedCopy
        );
        assert_eq!(
            fallback_copy_mode(Backend::Vaapi, CopyTier::Sse41, true),
            CopyMode::GenericCopy
        );
        assert_eq!(
            fallback_copy_mode(Backend::Vaapi, CopyTier::Portable, false),
            CopyMode::GenericCopy
        );
        assert_eq!(
            fallback_copy_mode(Backend::Cuda, CopyTier::Sse2, false),
            CopyMode::GenericCopy
        );
    }

    #[test]
    fn optimized_copy_needs_write_combined_surfaces() {
        assert_eq!(
            resolve_copy_mode(CopyMode::OptimizedCopy, Backend::Cuda),
            CopyMode::GenericCopy
        );
        assert_eq!(
            resolve_copy_mode(CopyMode::OptimizedCopy, Backend::D3d11),
            CopyMode::OptimizedCopy
        );
        assert_eq!(
            resolve_copy_mode(CopyMode::ZeroCopy, Backend::Cuda),
            CopyMode::ZeroCopy
        );
    }

    #[test]
    fn environment_overrides_config() {
        let config = VideoDecoderConfig::with_hw_accel()
            .copy_mode(CopyMode::OptimizedCopy)
            .threads(3);
        let env = EnvToggles {
            copy_mode: Some(CopyMode::GenericCopy),
            no_simd: true,
            ..EnvToggles::default()
        };
        let resolved = AccelConfig::resolve(&config, &env);
        assert_eq!(resolved.copy_mode, CopyMode::GenericCopy);
        assert_eq!(resolved.threads, 3);
        assert!(resolved.no_simd);

        let resolved = AccelConfig::resolve(&VideoDecoderConfig::new(), &EnvToggles::default());
        assert_eq!(resolved, AccelConfig::default());
    }
}
