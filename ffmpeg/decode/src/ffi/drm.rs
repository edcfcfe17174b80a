/*!
    `AVDRMFrameDescriptor` layout (`libavutil/hwcontext_drm.h`) and DRM
    fourcc selection for per-plane EGL import.
*/

use std::ffi::c_int;

use ffmpeg_types::PixelFormat;

const AV_DRM_MAX_PLANES: usize = 4;

pub(crate) const DRM_FORMAT_MOD_INVALID: u64 = (1 << 56) - 1;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct DrmObjectDescriptor {
    fd: c_int,
    size: usize,
    format_modifier: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct DrmPlaneDescriptor {
    object_index: c_int,
    offset: isize,
    pitch: isize,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct DrmLayerDescriptor {
    format: u32,
    nb_planes: c_int,
    planes: [DrmPlaneDescriptor; AV_DRM_MAX_PLANES],
}

/**
    Mirror of `AVDRMFrameDescriptor`, found at `data[0]` of a `DRM_PRIME` frame.
*/
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct DrmFrameDescriptor {
    nb_objects: c_int,
    objects: [DrmObjectDescriptor; AV_DRM_MAX_PLANES],
    nb_layers: c_int,
    layers: [DrmLayerDescriptor; AV_DRM_MAX_PLANES],
}

/**
    One exported image plane, flattened across layers.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DrmPlane {
    pub fd: c_int,
    pub offset: usize,
    pub pitch: usize,
    pub modifier: u64,
}

impl DrmFrameDescriptor {
    /**
        Returns every plane of every layer, in order.

        Exporters either put all planes in one layer or one plane per layer;
        flattening makes both look the same.
    */
    pub(crate) fn planes(&self) -> Vec<DrmPlane> {
        let layers = self.nb_layers.clamp(0, AV_DRM_MAX_PLANES as c_int) as usize;
        let objects = self.nb_objects.clamp(0, AV_DRM_MAX_PLANES as c_int) as usize;
        let mut planes = Vec::new();
        for layer in &self.layers[..layers] {
            let count = layer.nb_planes.clamp(0, AV_DRM_MAX_PLANES as c_int) as usize;
            for plane in &layer.planes[..count] {
                let index = plane.object_index;
                if index < 0 || index as usize >= objects {
                    continue;
                }
                let object = &self.objects[index as usize];
                planes.push(DrmPlane {
                    fd: object.fd,
                    offset: plane.offset.max(0) as usize,
                    pitch: plane.pitch.max(0) as usize,
                    modifier: object.format_modifier,
                });
            }
        }
        planes
    }
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/**
    Returns the single-plane DRM format to import `plane` of `format` with.

    Each plane is imported as its own image: one-component planes as red,
    interleaved chroma as red/green, sized by the sample width.
*/
pub(crate) fn drm_fourcc(format: PixelFormat, plane: usize) -> Option<u32> {
    match format.bytes_per_pixel(plane) {
        1 => Some(fourcc(b"R8  ")),
        2 if format == PixelFormat::P010 || format == PixelFormat::Yuv420p10 => {
            Some(fourcc(b"R16 "))
        }
        2 => Some(fourcc(b"GR88")),
        3 => Some(fourcc(b"RG24")),
        4 if format == PixelFormat::P010 => Some(fourcc(b"GR32")),
        4 => Some(fourcc(b"RA24")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DrmFrameDescriptor {
        let object = DrmObjectDescriptor {
            fd: -1,
            size: 0,
            format_modifier: 0,
        };
        let plane = DrmPlaneDescriptor {
            object_index: 0,
            offset: 0,
            pitch: 0,
        };
        let layer = DrmLayerDescriptor {
            format: 0,
            nb_planes: 0,
            planes: [plane; AV_DRM_MAX_PLANES],
        };
        DrmFrameDescriptor {
            nb_objects: 0,
            objects: [object; AV_DRM_MAX_PLANES],
            nb_layers: 0,
            layers: [layer; AV_DRM_MAX_PLANES],
        }
    }

    #[test]
    fn fourcc_codes() {
        assert_eq!(drm_fourcc(PixelFormat::Nv12, 0), Some(0x2020_3852));
        assert_eq!(drm_fourcc(PixelFormat::Nv12, 1), Some(0x3838_5247));
        assert_eq!(drm_fourcc(PixelFormat::P010, 0), Some(fourcc(b"R16 ")));
        assert_eq!(drm_fourcc(PixelFormat::P010, 1), Some(fourcc(b"GR32")));
        assert_eq!(drm_fourcc(PixelFormat::Nv12, 2), None);
    }

    #[test]
    fn separate_layers_flatten() {
        let mut d = descriptor();
        d.nb_objects = 1;
        d.objects[0].fd = 7;
        d.nb_layers = 2;
        d.layers[0].nb_planes = 1;
        d.layers[0].planes[0].pitch = 2048;
        d.layers[1].nb_planes = 1;
        d.layers[1].planes[0].offset = 2048 * 1088;
        d.layers[1].planes[0].pitch = 2048;
        let planes = d.planes();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].fd, 7);
        assert_eq!(planes[1].offset, 2048 * 1088);
    }

    #[test]
    fn single_layer_flattens_and_skips_bad_objects() {
        let mut d = descriptor();
        d.nb_objects = 1;
        d.nb_layers = 1;
        d.layers[0].nb_planes = 3;
        d.layers[0].planes[2].object_index = 3;
        assert_eq!(d.planes().len(), 2);
    }
}
