/*!
    D3D11 texture array slices to GL textures.

    Decoder surfaces are NV12/P010 slices of one texture array, which GL
    cannot alias directly. Each map runs the D3D11 video processor to blit
    the slice into a BGRA texture, and that texture is shared with GL
    through `WGL_NV_DX_interop2`. The BGRA texture and its registration are
    kept per GL texture until the frame size changes; unmapping only hands
    the texture back to Direct3D.
*/

use std::{collections::HashMap, ffi::c_void, mem::ManuallyDrop};

use parking_lot::Mutex;
use tracing::{debug, warn};
use windows::{
    Win32::{
        Foundation::{RECT, TRUE},
        Graphics::{
            Direct3D11::{
                D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_TEX2D_VPIV,
                D3D11_TEX2D_VPOV, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
                D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE, D3D11_VIDEO_PROCESSOR_CONTENT_DESC,
                D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC, D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0,
                D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC, D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0,
                D3D11_VIDEO_PROCESSOR_STREAM, D3D11_VIDEO_USAGE_PLAYBACK_NORMAL,
                D3D11_VPIV_DIMENSION_TEXTURE2D, D3D11_VPOV_DIMENSION_TEXTURE2D, ID3D11Device,
                ID3D11Texture2D, ID3D11VideoContext, ID3D11VideoDevice, ID3D11VideoProcessor,
                ID3D11VideoProcessorEnumerator, ID3D11VideoProcessorInputView,
                ID3D11VideoProcessorOutputView,
            },
            Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_RATIONAL, DXGI_SAMPLE_DESC},
        },
    },
    core::Interface,
};

use ffmpeg_types::{Error, NativeHandle, PixelFormat, Result, VideoFrame};

use super::{
    InteropBackend,
    state::{ContextGuard, Registry},
    wgl::{DxInterop, SharedTexture},
};
use crate::{
    config::Backend,
    ffi,
    probe::{self, loader},
    surface::{HwFrame, NativeSurface},
};

/// Input views kept before the cache is flushed.
const MAX_INPUT_VIEWS: usize = 64;

/**
    Zero-copy interop for D3D11 frames.
*/
#[derive(Debug)]
pub struct D3d11Interop {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    guard: ContextGuard,
    dx: Option<std::result::Result<DxInterop, String>>,
    pipeline: Option<Pipeline>,
    registry: Registry<Target>,
}

/// Everything tied to one decoder device.
#[derive(Debug)]
struct Pipeline {
    device: ID3D11Device,
    video_device: ID3D11VideoDevice,
    video_context: ID3D11VideoContext,
    enumerator: ID3D11VideoProcessorEnumerator,
    processor: ID3D11VideoProcessor,
    size: (u32, u32),
    dx_device: *mut c_void,
    inputs: HashMap<(usize, u32), ID3D11VideoProcessorInputView>,
}

/// A BGRA texture shared with one GL texture.
#[derive(Debug)]
struct Target {
    _texture: ID3D11Texture2D,
    view: ID3D11VideoProcessorOutputView,
    shared: SharedTexture,
    size: (u32, u32),
}

// SAFETY: the COM objects are free-threaded and only used under the interop
// mutex; the device lock guards the immediate context.
unsafe impl Send for State {}

impl D3d11Interop {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::D3d11
    }
}

impl Default for D3d11Interop {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    fn new(device: ID3D11Device, dx: &DxInterop, size: (u32, u32)) -> Result<Self> {
        let video_device: ID3D11VideoDevice = device
            .cast()
            .map_err(|e| Error::unsupported(format!("ID3D11VideoDevice: {e}")))?;
        let mut immediate = None;
        // SAFETY: the device is live.
        unsafe { device.GetImmediateContext(&mut immediate) };
        let video_context: ID3D11VideoContext = immediate
            .ok_or_else(|| Error::surface("device has no immediate context"))?
            .cast()
            .map_err(|e| Error::unsupported(format!("ID3D11VideoContext: {e}")))?;
        let (enumerator, processor) = create_processor(&video_device, size)?;
        // SAFETY: the pipeline holds the device for as long as the handle is open.
        let dx_device = unsafe { dx.open_device(device.as_raw())? };
        debug!("D3D11 video processor for {}x{}", size.0, size.1);
        Ok(Self {
            device,
            video_device,
            video_context,
            enumerator,
            processor,
            size,
            dx_device,
            inputs: HashMap::new(),
        })
    }

    fn resize(&mut self, size: (u32, u32)) -> Result<()> {
        if self.size == size {
            return Ok(());
        }
        let (enumerator, processor) = create_processor(&self.video_device, size)?;
        self.enumerator = enumerator;
        self.processor = processor;
        self.size = size;
        self.inputs.clear();
        Ok(())
    }

    fn input_view(
        &mut self,
        texture: &ID3D11Texture2D,
        slice: u32,
    ) -> Result<ID3D11VideoProcessorInputView> {
        let key = (texture.as_raw() as usize, slice);
        if let Some(view) = self.inputs.get(&key) {
            return Ok(view.clone());
        }
        if self.inputs.len() >= MAX_INPUT_VIEWS {
            self.inputs.clear();
        }
        let desc = D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC {
            FourCC: 0,
            ViewDimension: D3D11_VPIV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPIV {
                    MipSlice: 0,
                    ArraySlice: slice,
                },
            },
        };
        let mut view = None;
        // SAFETY: the texture is a decoder surface array on this device.
        unsafe {
            self.video_device.CreateVideoProcessorInputView(
                texture,
                &self.enumerator,
                &desc,
                Some(&mut view),
            )
        }
        .map_err(|e| Error::surface(format!("CreateVideoProcessorInputView: {e}")))?;
        let view = view.ok_or_else(|| Error::surface("no input view"))?;
        self.inputs.insert(key, view.clone());
        Ok(view)
    }

    fn create_target(&self, dx: &DxInterop, texture: u32, size: (u32, u32)) -> Result<Target> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: size.0,
            Height: size.1,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let mut output = None;
        // SAFETY: the descriptor is fully initialized.
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut output)) }
            .map_err(|e| Error::surface(format!("CreateTexture2D: {e}")))?;
        let output: ID3D11Texture2D = output.ok_or_else(|| Error::surface("no output texture"))?;

        let view_desc = D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC {
            ViewDimension: D3D11_VPOV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPOV { MipSlice: 0 },
            },
        };
        let mut view = None;
        // SAFETY: the texture was just created on this device.
        unsafe {
            self.video_device.CreateVideoProcessorOutputView(
                &output,
                &self.enumerator,
                &view_desc,
                Some(&mut view),
            )
        }
        .map_err(|e| Error::surface(format!("CreateVideoProcessorOutputView: {e}")))?;
        let view = view.ok_or_else(|| Error::surface("no output view"))?;

        // SAFETY: the texture lives as long as the registration.
        let object = unsafe { dx.register(self.dx_device, output.as_raw(), texture)? };
        Ok(Target {
            _texture: output,
            view,
            shared: SharedTexture {
                object,
                locked: false,
            },
            size,
        })
    }
}

fn create_processor(
    video_device: &ID3D11VideoDevice,
    (width, height): (u32, u32),
) -> Result<(ID3D11VideoProcessorEnumerator, ID3D11VideoProcessor)> {
    let rate = DXGI_RATIONAL {
        Numerator: 60,
        Denominator: 1,
    };
    let desc = D3D11_VIDEO_PROCESSOR_CONTENT_DESC {
        InputFrameFormat: D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE,
        InputFrameRate: rate,
        InputWidth: width,
        InputHeight: height,
        OutputFrameRate: rate,
        OutputWidth: width,
        OutputHeight: height,
        Usage: D3D11_VIDEO_USAGE_PLAYBACK_NORMAL,
    };
    // SAFETY: the descriptor is fully initialized.
    unsafe {
        let enumerator = video_device
            .CreateVideoProcessorEnumerator(&desc)
            .map_err(|e| Error::unsupported(format!("CreateVideoProcessorEnumerator: {e}")))?;
        let processor = video_device
            .CreateVideoProcessor(&enumerator, 0)
            .map_err(|e| Error::unsupported(format!("CreateVideoProcessor: {e}")))?;
        Ok((enumerator, processor))
    }
}

impl State {
    fn dx(&mut self) -> Result<&DxInterop> {
        if self.dx.is_none() {
            let loaded = DxInterop::load().map_err(|e| e.to_string());
            if let Err(e) = &loaded {
                warn!("D3D11 interop unavailable: {e}");
            }
            self.dx = Some(loaded);
        }
        match &self.dx {
            Some(Ok(dx)) => Ok(dx),
            Some(Err(e)) => Err(Error::unsupported(e.clone())),
            None => Err(Error::unsupported("WGL_NV_DX_interop")),
        }
    }

    fn release(&mut self, target: Target) {
        if let (Some(Ok(dx)), Some(pipeline)) = (&self.dx, &self.pipeline) {
            // SAFETY: the target was registered on the pipeline's device.
            unsafe { target.shared.destroy(dx, pipeline.dx_device) };
        }
    }
}

impl InteropBackend for D3d11Interop {
    type Surface = HwFrame;

    fn map(
        &self,
        surface: &HwFrame,
        texture: u32,
        width: u32,
        height: u32,
        coded_height: u32,
        plane: usize,
    ) -> Result<()> {
        if plane != 0 {
            return Err(Error::unsupported_format(
                "D3D11 interop produces a single BGRA texture",
            ));
        }
        let Some(NativeSurface::D3d11 {
            texture: source,
            slice,
        }) = surface.native()
        else {
            return Err(Error::unsupported_format("frame is not a D3D11 surface"));
        };
        // SAFETY: the device context of a D3D11 frame is an
        // AVD3D11VADeviceContext, alive while the frame is.
        let hwctx = unsafe {
            ffi::frame_device_hwctx::<ffi::D3d11DeviceContext>(surface.as_ptr()).as_ref()
        }
        .ok_or_else(|| Error::surface("frame has no D3D11 device"))?;
        let device = unsafe { ID3D11Device::from_raw_borrowed(&hwctx.device) }
            .cloned()
            .ok_or_else(|| Error::surface("frame has no D3D11 device"))?;
        let source_ptr = source as *mut c_void;
        let source = unsafe { ID3D11Texture2D::from_raw_borrowed(&source_ptr) }
            .ok_or_else(|| Error::surface("frame has no texture"))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.guard.bind_current()?;
        loader::load()?;
        state.dx()?;
        let Some(Ok(dx)) = &state.dx else {
            return Err(Error::unsupported("WGL_NV_DX_interop"));
        };

        let size = (width, coded_height.max(height));
        let same_device = state
            .pipeline
            .as_ref()
            .is_some_and(|p| p.device.as_raw() == device.as_raw());
        if !same_device {
            for (_, target) in state.registry.drain() {
                if let Some(pipeline) = &state.pipeline {
                    // SAFETY: registered on the old pipeline's device.
                    unsafe { target.shared.destroy(dx, pipeline.dx_device) };
                }
            }
            if let Some(old) = state.pipeline.take() {
                // SAFETY: every object registered on it was destroyed above.
                unsafe { dx.close_device(old.dx_device) };
            }
            state.pipeline = Some(Pipeline::new(device, dx, size)?);
        }
        let Some(pipeline) = state.pipeline.as_mut() else {
            return Err(Error::surface("no video processor"));
        };
        pipeline.resize(size)?;

        let dx_device = pipeline.dx_device;
        let target = state.registry.obtain(
            texture,
            |target| target.size == (width, height),
            || pipeline.create_target(dx, texture, (width, height)),
            // SAFETY: registered on this pipeline's device.
            |old| unsafe { old.shared.destroy(dx, dx_device) },
        )?;

        let input = pipeline.input_view(source, slice)?;
        let rect = RECT {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        };
        let mut stream = D3D11_VIDEO_PROCESSOR_STREAM {
            Enable: TRUE,
            pInputSurface: ManuallyDrop::new(Some(input)),
            ..Default::default()
        };
        // SAFETY: D3D must own the texture while the processor writes it;
        // the device lock serializes the immediate context with the decoder.
        let blit = unsafe {
            target.shared.release(dx, pipeline.dx_device)?;
            let blit = hwctx.locked(|| {
                pipeline.video_context.VideoProcessorSetStreamSourceRect(
                    &pipeline.processor,
                    0,
                    TRUE,
                    Some(&rect),
                );
                pipeline.video_context.VideoProcessorBlt(
                    &pipeline.processor,
                    &target.view,
                    0,
                    std::slice::from_ref(&stream),
                )
            });
            ManuallyDrop::drop(&mut stream.pInputSurface);
            blit
        };
        blit.map_err(|e| Error::surface(format!("VideoProcessorBlt: {e}")))?;
        // SAFETY: registered on this pipeline's device.
        unsafe { target.shared.acquire(dx, pipeline.dx_device)? };
        state.registry.set_mapped(texture);
        Ok(())
    }

    fn unmap(&self, texture: u32) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (Some(Ok(dx)), Some(pipeline)) = (&state.dx, &state.pipeline) else {
            return Ok(false);
        };
        let Some(target) = state.registry.unmap(texture) else {
            return Ok(false);
        };
        // SAFETY: registered on this pipeline's device.
        unsafe { target.shared.release(dx, pipeline.dx_device)? };
        Ok(true)
    }

    fn map_to_host(
        &self,
        surface: &HwFrame,
        format: PixelFormat,
        _width: u32,
        _height: u32,
    ) -> Result<VideoFrame> {
        super::surface_to_host(surface, format)
    }

    fn native(&self, surface: &HwFrame) -> Result<NativeHandle> {
        super::surface_native(surface)
    }
}

impl Drop for D3d11Interop {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let owner = state.guard.owner();
        if owner.is_none() || owner != probe::current_context() {
            if !state.registry.is_empty() {
                warn!(
                    "dropping D3D11 interop with {} textures shared off its GL context",
                    state.registry.len()
                );
            }
            return;
        }
        let targets: Vec<_> = state.registry.drain().map(|(_, t)| t).collect();
        for target in targets {
            state.release(target);
        }
        if let (Some(Ok(dx)), Some(pipeline)) = (&state.dx, state.pipeline.take()) {
            // SAFETY: every object registered on it was destroyed above.
            unsafe { dx.close_device(pipeline.dx_device) };
        }
    }
}
