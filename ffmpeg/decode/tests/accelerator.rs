//! Accelerator life cycle against an in-memory session.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use ffmpeg_decode::{
    AccelConfig, AccelState, Backend, CodecBinding, CodecKind, CodecParams, CopyMode, Error,
    ErrorCategory, InteropBackend, Lend, MapRequest, Mapped, NativeHandle, PixelFormat, Plane,
    PoolSurface, Result, Session, StreamShape, SurfaceBinding, SurfacePool, VideoFrame,
};

static_assertions::assert_impl_all!(ffmpeg_decode::HwFrame: Send, Sync);
static_assertions::assert_impl_all!(
    ffmpeg_decode::HardwareAccelerator<ffmpeg_decode::FfmpegSession>: Send, Sync
);

/// Reference frames the mock codec keeps on top of the configured extras.
const REFERENCES: usize = 6;

#[derive(Debug, Default)]
struct World {
    sessions: AtomicUsize,
    interops: AtomicUsize,
    configures: AtomicUsize,
    reattaches: AtomicUsize,
    teardowns: AtomicUsize,
}

impl World {
    fn live_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn live_interops(&self) -> usize {
        self.interops.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
struct Options {
    world: Arc<World>,
    fail_open: bool,
    fail_configure: bool,
    fail_interop: bool,
    fail_export: bool,
    fail_reattach: bool,
}

#[derive(Debug, Default)]
struct CodecLog {
    threads: Option<usize>,
    buffer_hook_restored: bool,
    hardware_released: usize,
    restored: bool,
}

struct MockCodec {
    params: CodecParams,
    log: Arc<Mutex<CodecLog>>,
}

impl MockCodec {
    fn new(codec: CodecKind, profile: i32) -> (Self, Arc<Mutex<CodecLog>>) {
        let log = Arc::new(Mutex::new(CodecLog::default()));
        let codec = Self {
            params: CodecParams::new(codec, profile, 1920, 1088),
            log: log.clone(),
        };
        (codec, log)
    }
}

impl CodecBinding for MockCodec {
    fn params(&self) -> CodecParams {
        self.params
    }

    fn set_threads(&mut self, threads: usize) {
        self.log.lock().threads = Some(threads);
    }

    fn restore_buffer_hook(&mut self) {
        self.log.lock().buffer_hook_restored = true;
    }

    fn release_hardware(&mut self) {
        self.log.lock().hardware_released += 1;
    }

    fn restore(&mut self) {
        self.log.lock().restored = true;
    }
}

/// A reference to one pooled surface.
#[derive(Clone, Debug)]
struct SurfaceRef {
    index: usize,
    _token: Arc<()>,
}

#[derive(Debug)]
struct MockSurface {
    index: usize,
    token: Arc<()>,
}

impl PoolSurface for MockSurface {
    fn is_free(&self) -> bool {
        Arc::strong_count(&self.token) == 1
    }
}

#[derive(Debug, Default)]
struct Target {
    surface: Option<SurfaceRef>,
}

#[derive(Debug)]
struct Picture {
    format: PixelFormat,
    width: u32,
    height: u32,
    surface: Option<SurfaceRef>,
}

impl Picture {
    fn hardware(backend: Backend, target: &Target) -> Self {
        Self {
            format: backend.hw_format(),
            width: 1920,
            height: 1080,
            surface: target.surface.clone(),
        }
    }

    fn software() -> Self {
        Self {
            format: PixelFormat::Nv12,
            width: 64,
            height: 32,
            surface: None,
        }
    }
}

fn nv12(width: u32, height: u32) -> Result<VideoFrame> {
    let (w, h) = (width as usize, height as usize);
    VideoFrame::host(
        width,
        height,
        PixelFormat::Nv12,
        vec![Plane::new(vec![16; w * h], w), Plane::new(vec![128; w * h / 2], w)],
    )
}

#[derive(Debug)]
struct MockInterop {
    world: Arc<World>,
    mapped: Mutex<HashSet<u32>>,
}

impl MockInterop {
    fn new(world: Arc<World>) -> Self {
        world.interops.fetch_add(1, Ordering::SeqCst);
        Self {
            world,
            mapped: Mutex::new(HashSet::new()),
        }
    }
}

impl Drop for MockInterop {
    fn drop(&mut self) {
        self.world.interops.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InteropBackend for MockInterop {
    type Surface = SurfaceRef;

    fn map(
        &self,
        _surface: &SurfaceRef,
        texture: u32,
        _width: u32,
        height: u32,
        coded_height: u32,
        plane: usize,
    ) -> Result<()> {
        assert!(coded_height >= height);
        if plane > 1 {
            return Err(Error::invalid_data(format!("no plane {plane}")));
        }
        if !self.mapped.lock().insert(texture) {
            return Err(Error::surface(format!("texture {texture} is already mapped")));
        }
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        Ok(self.mapped.lock().remove(&texture))
    }

    fn map_to_host(
        &self,
        _surface: &SurfaceRef,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<VideoFrame> {
        if format != PixelFormat::Nv12 {
            return Err(Error::unsupported_format(format!("{format:?}")));
        }
        nv12(width, height)
    }

    fn native(&self, surface: &SurfaceRef) -> Result<NativeHandle> {
        Ok(NativeHandle {
            handle: 0x1000 + surface.index,
            slice: 0,
        })
    }
}

struct MockSession {
    backend: Backend,
    options: Options,
    pool: SurfacePool<MockSurface>,
    interop: Option<Arc<MockInterop>>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.options.world.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session for MockSession {
    type Options = Options;
    type Codec = MockCodec;
    type Target = Target;
    type Decoded = Picture;
    type Interop = MockInterop;

    fn open(backend: Backend, options: &Options) -> Result<Self> {
        if options.fail_open {
            return Err(Error::setup(backend.name(), "no device"));
        }
        options.world.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            backend,
            options: options.clone(),
            pool: SurfacePool::default(),
            interop: None,
        })
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    fn description(&self) -> String {
        format!("{} (mock)", self.backend.api_name())
    }

    fn configure(
        &mut self,
        _codec: &mut MockCodec,
        _shape: StreamShape,
        extra_surfaces: usize,
        _mode: CopyMode,
    ) -> Result<()> {
        self.pool.clear();
        if self.options.fail_configure {
            return Err(Error::setup(self.backend.name(), "frames context refused"));
        }
        self.options.world.configures.fetch_add(1, Ordering::SeqCst);
        self.pool = SurfacePool::fill(REFERENCES + extra_surfaces, |index| {
            Ok(MockSurface {
                index,
                token: Arc::new(()),
            })
        })?;
        Ok(())
    }

    fn reattach(&mut self, _codec: &mut MockCodec) -> Result<()> {
        if self.options.fail_reattach || self.pool.is_empty() {
            return Err(Error::setup(self.backend.name(), "frames context is gone"));
        }
        self.options.world.reattaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn surface_count(&self) -> usize {
        self.pool.len()
    }

    fn lend_surface(&mut self, target: &mut Target) -> Result<Lend> {
        if self.pool.is_empty() {
            return Err(Error::setup(self.backend.name(), "surface pool is gone"));
        }
        let count = self.pool.len();
        let surface = self
            .pool
            .acquire()
            .ok_or_else(|| Error::surface(format!("all {count} decode surfaces are in use")))?;
        target.surface = Some(SurfaceRef {
            index: surface.index,
            _token: surface.token.clone(),
        });
        Ok(Lend::Pooled)
    }

    fn create_interop(&mut self) -> Result<Arc<MockInterop>> {
        if self.options.fail_interop {
            return Err(Error::setup(self.backend.name(), "no GL context"));
        }
        let interop = Arc::new(MockInterop::new(self.options.world.clone()));
        self.interop = Some(interop.clone());
        Ok(interop)
    }

    fn is_hardware(&self, decoded: &Picture) -> bool {
        decoded.format == self.backend.hw_format()
    }

    fn export(&self, decoded: &Picture) -> Result<VideoFrame> {
        if self.options.fail_export {
            return Err(Error::setup(self.backend.name(), "device lost"));
        }
        let interop = self
            .interop
            .clone()
            .ok_or_else(|| Error::unsupported("zero-copy interop"))?;
        let surface = decoded
            .surface
            .clone()
            .ok_or_else(|| Error::invalid_data("picture has no surface"))?;
        let binding = SurfaceBinding::new(surface, decoded.width, decoded.height, 1088, interop);
        Ok(VideoFrame::gpu(
            decoded.width,
            decoded.height,
            decoded.format,
            Arc::new(binding),
        ))
    }

    fn download(&mut self, decoded: &Picture, _mode: CopyMode) -> Result<VideoFrame> {
        nv12(decoded.width, decoded.height)
    }

    fn software_frame(decoded: &Picture) -> Result<VideoFrame> {
        nv12(decoded.width, decoded.height)
    }

    fn teardown(&mut self, _codec: &mut MockCodec) {
        self.options.world.teardowns.fetch_add(1, Ordering::SeqCst);
        self.interop = None;
        self.pool.clear();
    }
}

type Accelerator = ffmpeg_decode::HardwareAccelerator<MockSession>;

const SHAPE: StreamShape = StreamShape {
    coded_width: 1920,
    coded_height: 1088,
    profile: 100,
};

fn accelerator(backend: Backend, options: Options) -> Accelerator {
    Accelerator::new(backend, options, AccelConfig::default())
}

fn offered(backend: Backend) -> Vec<PixelFormat> {
    vec![backend.hw_format(), PixelFormat::Yuv420p]
}

fn opened(backend: Backend, options: Options) -> (Accelerator, Arc<Mutex<CodecLog>>) {
    let mut accel = accelerator(backend, options);
    let (codec, log) = MockCodec::new(CodecKind::H264, 100);
    accel.open(codec).unwrap();
    (accel, log)
}

#[test]
fn decodes_1080p_h264_on_vaapi() {
    let options = Options::default();
    let world = options.world.clone();
    let (accel, _log) = opened(Backend::Vaapi, options);
    assert_eq!(accel.state(), AccelState::Probing);

    let chosen = accel.negotiate(&offered(Backend::Vaapi), SHAPE);
    assert_eq!(chosen, Some(PixelFormat::Vaapi));
    assert_eq!(accel.state(), AccelState::Accelerated);
    assert_eq!(accel.copy_mode(), CopyMode::ZeroCopy);
    assert_eq!(
        accel.description(),
        format!("{} (mock)", Backend::Vaapi.api_name())
    );

    let mut target = Target::default();
    assert_eq!(accel.lend(&mut target).unwrap(), Lend::Pooled);
    let frame = accel
        .frame(&Picture::hardware(Backend::Vaapi, &target))
        .unwrap();
    assert!(frame.is_gpu());
    assert_eq!((frame.width(), frame.height()), (1920, 1080));
    assert_eq!(frame.format(), PixelFormat::Vaapi);

    let stats = accel.stats();
    assert_eq!(stats.setups, 1);
    assert_eq!(stats.surfaces, REFERENCES + 4);
    assert_eq!(stats.lent, 1);
    assert_eq!(stats.hardware_frames, 1);
    assert_eq!(world.live_interops(), 1);
    assert!(accel.interop().is_some());
}

#[test]
fn open_then_close_releases_everything() {
    let options = Options::default();
    let world = options.world.clone();
    let (mut accel, log) = opened(Backend::Cuda, options);
    accel.negotiate(&offered(Backend::Cuda), SHAPE).unwrap();
    assert_eq!(world.live_sessions(), 1);

    accel.close();
    assert_eq!(accel.state(), AccelState::Closed);
    assert_eq!(world.live_sessions(), 0);
    assert_eq!(world.live_interops(), 0);
    assert_eq!(world.teardowns.load(Ordering::SeqCst), 1);
    assert!(log.lock().restored);
    assert!(accel.interop().is_none());
    assert_eq!(accel.stats().surfaces, 0);

    // Closing twice is harmless
    accel.close();
    assert_eq!(world.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn pool_never_exceeds_capacity() {
    let (accel, _log) = opened(Backend::D3d11, Options::default());
    accel.negotiate(&offered(Backend::D3d11), SHAPE).unwrap();
    let capacity = accel.stats().surfaces;

    let mut targets: Vec<Target> = (0..capacity)
        .map(|_| {
            let mut target = Target::default();
            assert_eq!(accel.lend(&mut target).unwrap(), Lend::Pooled);
            target
        })
        .collect();

    let mut extra = Target::default();
    let err = accel.lend(&mut extra).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Frame);
    assert!(extra.surface.is_none());
    assert_eq!(accel.stats().exhausted, 1);
    assert_eq!(accel.stats().surfaces, capacity);
    // Exhaustion drops a frame, not the hardware path
    assert_eq!(accel.state(), AccelState::Accelerated);

    // Releasing one surface makes exactly that one available again
    let released = targets.remove(3).surface.unwrap().index;
    accel.lend(&mut extra).unwrap();
    assert_eq!(extra.surface.as_ref().unwrap().index, released);
}

#[test]
fn mapping_can_be_repeated_after_unmap() {
    let (accel, _log) = opened(Backend::Cuda, Options::default());
    accel.negotiate(&offered(Backend::Cuda), SHAPE).unwrap();
    let mut target = Target::default();
    accel.lend(&mut target).unwrap();
    let frame = accel
        .frame(&Picture::hardware(Backend::Cuda, &target))
        .unwrap();

    let request = MapRequest::GlTexture {
        texture: 7,
        plane: 0,
    };
    assert!(matches!(frame.map(request).unwrap(), Mapped::GlTexture(7)));
    assert!(frame.map(request).is_err());
    assert!(frame.unmap(7).unwrap());
    assert!(!frame.unmap(7).unwrap());
    assert!(matches!(frame.map(request).unwrap(), Mapped::GlTexture(7)));
    assert!(frame.unmap(7).unwrap());

    match frame.map(MapRequest::Native).unwrap() {
        Mapped::Native(native) => {
            assert_eq!(native.handle, 0x1000 + target.surface.unwrap().index);
        }
        other => panic!("unexpected mapping {other:?}"),
    }
}

#[test]
fn coded_size_change_reconfigures_once() {
    let options = Options::default();
    let world = options.world.clone();
    let (accel, _log) = opened(Backend::Vaapi, options);

    for _ in 0..3 {
        accel.negotiate(&offered(Backend::Vaapi), SHAPE).unwrap();
    }
    assert_eq!(accel.stats().setups, 1);
    assert_eq!(accel.stats().reuses, 2);

    let bigger = StreamShape {
        coded_width: 3840,
        coded_height: 2160,
        ..SHAPE
    };
    for _ in 0..3 {
        accel.negotiate(&offered(Backend::Vaapi), bigger).unwrap();
    }
    assert_eq!(accel.stats().setups, 2);
    assert_eq!(accel.stats().reuses, 4);
    assert_eq!(world.configures.load(Ordering::SeqCst), 2);
    // Every answer from the cache hands the frames context back
    assert_eq!(world.reattaches.load(Ordering::SeqCst), 4);
    // The device is kept across reconfiguration
    assert_eq!(world.live_sessions(), 1);
    assert_eq!(accel.state(), AccelState::Accelerated);
}

#[test]
fn repeat_negotiation_hands_the_frames_back() {
    let options = Options::default();
    let world = options.world.clone();
    let (accel, _log) = opened(Backend::D3d11, options);
    let hw_format = Some(Backend::D3d11.hw_format());
    assert_eq!(accel.negotiate(&offered(Backend::D3d11), SHAPE), hw_format);
    assert_eq!(world.reattaches.load(Ordering::SeqCst), 0);

    // A seek or a repeated sequence header asks again with the same shape
    for expected in 1..=3 {
        assert_eq!(accel.negotiate(&offered(Backend::D3d11), SHAPE), hw_format);
        assert_eq!(world.reattaches.load(Ordering::SeqCst), expected);
    }
    assert_eq!(accel.stats().setups, 1);
    let mut target = Target::default();
    assert_eq!(accel.lend(&mut target).unwrap(), Lend::Pooled);
}

#[test]
fn failed_reattach_falls_back_to_software() {
    let options = Options {
        fail_reattach: true,
        ..Options::default()
    };
    let world = options.world.clone();
    let (accel, log) = opened(Backend::Vaapi, options);
    assert_eq!(
        accel.negotiate(&offered(Backend::Vaapi), SHAPE),
        Some(PixelFormat::Vaapi)
    );

    assert_eq!(accel.negotiate(&offered(Backend::Vaapi), SHAPE), None);
    assert_eq!(accel.state(), AccelState::SoftwareFallback);
    assert_eq!(world.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(world.live_sessions(), 0);
    assert!(log.lock().buffer_hook_restored);
}

#[test]
fn session_failure_mid_stream_keeps_frames_coming() {
    let options = Options {
        fail_export: true,
        ..Options::default()
    };
    let world = options.world.clone();
    let (accel, log) = opened(Backend::Vaapi, options);
    accel.negotiate(&offered(Backend::Vaapi), SHAPE).unwrap();

    let mut first = Target::default();
    assert_eq!(accel.lend(&mut first).unwrap(), Lend::Pooled);
    let frame = accel
        .frame(&Picture::hardware(Backend::Vaapi, &first))
        .unwrap();
    assert!(!frame.is_gpu());
    assert_eq!((frame.width(), frame.height()), (1920, 1080));
    assert_eq!(accel.state(), AccelState::SoftwareFallback);
    assert_eq!(world.live_sessions(), 0);
    // The codec keeps the device and frames it decodes into
    assert_eq!(world.teardowns.load(Ordering::SeqCst), 0);
    assert_eq!(log.lock().hardware_released, 0);
    assert!(log.lock().buffer_hook_restored);

    // Pictures the hardware decoder still produces come out as host frames
    let mut next = Target::default();
    assert_eq!(accel.lend(&mut next).unwrap(), Lend::Default);
    let frame = accel
        .frame(&Picture::hardware(Backend::Vaapi, &next))
        .unwrap();
    assert!(!frame.is_gpu());
    assert_eq!(frame.format(), PixelFormat::Nv12);
    assert_eq!(accel.stats().software_frames, 2);
    assert_eq!(accel.stats().hardware_frames, 0);

    // The next format query moves the codec to a software format
    assert_eq!(accel.negotiate(&offered(Backend::Vaapi), SHAPE), None);
    assert_eq!(log.lock().hardware_released, 1);
    assert_eq!(accel.negotiate(&offered(Backend::Vaapi), SHAPE), None);
    assert_eq!(log.lock().hardware_released, 1);
}

#[test]
fn frames_outlive_the_accelerator() {
    let options = Options::default();
    let world = options.world.clone();
    let (accel, _log) = opened(Backend::Vaapi, options);
    accel.negotiate(&offered(Backend::Vaapi), SHAPE).unwrap();
    let mut target = Target::default();
    accel.lend(&mut target).unwrap();
    let frame = accel
        .frame(&Picture::hardware(Backend::Vaapi, &target))
        .unwrap();

    drop(accel);
    assert_eq!(world.live_sessions(), 0);
    assert_eq!(world.live_interops(), 1);

    let texture = MapRequest::GlTexture {
        texture: 3,
        plane: 1,
    };
    frame.map(texture).unwrap();
    assert!(frame.unmap(3).unwrap());
    match frame
        .map(MapRequest::HostMemory {
            format: PixelFormat::Nv12,
        })
        .unwrap()
    {
        Mapped::Host(host) => assert_eq!((host.width(), host.height()), (1920, 1080)),
        other => panic!("unexpected mapping {other:?}"),
    }

    drop(frame);
    assert_eq!(world.live_interops(), 0);
}

#[test]
fn setup_failure_falls_back_to_software() {
    let options = Options {
        fail_configure: true,
        ..Options::default()
    };
    let world = options.world.clone();
    let (accel, log) = opened(Backend::Vaapi, options);

    assert_eq!(accel.negotiate(&offered(Backend::Vaapi), SHAPE), None);
    assert_eq!(accel.state(), AccelState::SoftwareFallback);
    assert!(log.lock().buffer_hook_restored);
    assert_eq!(world.live_sessions(), 0);

    // The fallback is permanent for this stream
    assert_eq!(accel.negotiate(&offered(Backend::Vaapi), SHAPE), None);
    let mut target = Target::default();
    assert_eq!(accel.lend(&mut target).unwrap(), Lend::Default);

    let frame = accel.frame(&Picture::software()).unwrap();
    assert!(!frame.is_gpu());
    assert_eq!(frame.format(), PixelFormat::Nv12);
    assert_eq!(accel.stats().software_frames, 1);
}

#[test]
fn software_only_streams_fall_back() {
    let (accel, _log) = opened(Backend::Cuda, Options::default());
    assert_eq!(accel.negotiate(&[PixelFormat::Yuv420p], SHAPE), None);
    assert_eq!(accel.state(), AccelState::SoftwareFallback);
}

#[test]
fn missing_interop_degrades_to_host_copies() {
    let options = Options {
        fail_interop: true,
        ..Options::default()
    };
    let (accel, _log) = opened(Backend::Vaapi, options);
    assert_eq!(
        accel.negotiate(&offered(Backend::Vaapi), SHAPE),
        Some(PixelFormat::Vaapi)
    );
    assert_eq!(accel.state(), AccelState::Accelerated);
    assert!(accel.copy_mode().is_host());
    assert!(accel.interop().is_none());

    let mut target = Target::default();
    accel.lend(&mut target).unwrap();
    let frame = accel
        .frame(&Picture::hardware(Backend::Vaapi, &target))
        .unwrap();
    assert!(!frame.is_gpu());
    assert_eq!(accel.stats().hardware_frames, 1);
}

#[test]
fn device_failure_surfaces_from_prepare() {
    let options = Options {
        fail_open: true,
        ..Options::default()
    };
    let mut accel = accelerator(Backend::Cuda, options);
    let err = accel.prepare().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Setup);
    assert_eq!(accel.description(), Backend::Cuda.api_name());
}

#[test]
fn prepared_device_is_kept_by_open() {
    let options = Options::default();
    let world = options.world.clone();
    let mut accel = accelerator(Backend::Cuda, options);
    accel.prepare().unwrap();
    assert_eq!(world.live_sessions(), 1);

    let (codec, _log) = MockCodec::new(CodecKind::Hevc, 1);
    accel.open(codec).unwrap();
    accel.negotiate(&offered(Backend::Cuda), SHAPE).unwrap();
    assert_eq!(world.live_sessions(), 1);
    assert_eq!(accel.state(), AccelState::Accelerated);
}

#[test]
fn videotoolbox_rejects_high_10_h264() {
    let mut accel = accelerator(Backend::VideoToolbox, Options::default());
    let (codec, log) = MockCodec::new(CodecKind::H264, 110);
    let err = accel.open(codec).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Unsupported);
    assert_eq!(accel.state(), AccelState::Closed);
    assert_eq!(log.lock().threads, None);
}

#[test]
fn videotoolbox_decodes_single_threaded() {
    let mut accel = Accelerator::new(
        Backend::VideoToolbox,
        Options::default(),
        AccelConfig {
            threads: 8,
            ..AccelConfig::default()
        },
    );
    let (codec, log) = MockCodec::new(CodecKind::H264, 100);
    accel.open(codec).unwrap();
    assert_eq!(log.lock().threads, Some(1));

    let mut accel = Accelerator::new(
        Backend::Cuda,
        Options::default(),
        AccelConfig {
            threads: 8,
            ..AccelConfig::default()
        },
    );
    let (codec, log) = MockCodec::new(CodecKind::H264, 100);
    accel.open(codec).unwrap();
    assert_eq!(log.lock().threads, Some(8));
}

#[test]
fn reopening_closes_the_previous_stream() {
    let options = Options::default();
    let world = options.world.clone();
    let (mut accel, first) = opened(Backend::Vaapi, options);
    accel.negotiate(&offered(Backend::Vaapi), SHAPE).unwrap();

    let (codec, _second) = MockCodec::new(CodecKind::Vp9, 0);
    accel.open(codec).unwrap();
    assert!(first.lock().restored);
    assert_eq!(world.live_sessions(), 0);
    assert_eq!(accel.state(), AccelState::Probing);
    assert_eq!(accel.stats().setups, 0);
}
