/*!
    Assembly of host frames from mapped GPU planes.

    Hardware surfaces mapped for reading expose one base address and pitch
    per plane, but several drivers only report the luma plane and leave the
    chroma planes implicit: they follow the luma plane at the surface's coded
    height. [`SourceFrame::contiguous`] derives the missing planes the same way
    the driver laid them out, and [`copy_to_frame`] copies the visible region
    into a freshly allocated [`VideoFrame`].
*/

use ffmpeg_types::{Error, PixelFormat, Plane, Result, VideoFrame};

use crate::uswc::UswcCopier;

/// Destination rows are padded to this many bytes.
const ROW_ALIGN: usize = 16;

/**
    One borrowed source plane.
*/
#[derive(Clone, Copy, Debug)]
pub struct SourcePlane<'a> {
    pub data: &'a [u8],
    pub pitch: usize,
}

/**
    A borrowed, read-mapped picture in a software pixel format.
*/
#[derive(Clone, Debug)]
pub struct SourceFrame<'a> {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<SourcePlane<'a>>,
}

impl<'a> SourceFrame<'a> {
    /**
        Wrap planes that were each reported by the driver.
    */
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<SourcePlane<'a>>,
    ) -> Result<Self> {
        if format.is_hardware() {
            return Err(Error::unsupported_format(format!(
                "{format:?} is not a host layout"
            )));
        }
        if planes.len() != format.plane_count() {
            return Err(Error::invalid_data(format!(
                "{format:?} needs {} planes, got {}",
                format.plane_count(),
                planes.len()
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            planes,
        })
    }

    /**
        Split one contiguous mapping into planes.

        `pitch` is the luma pitch. Chroma pitches are derived from it and each
        chroma plane starts right after the previous plane's `surface_height`
        rows (the coded height, which may exceed the visible `height`).
    */
    pub fn contiguous(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &'a [u8],
        pitch: usize,
        surface_height: u32,
    ) -> Result<Self> {
        if surface_height < height {
            return Err(Error::invalid_data(format!(
                "surface height {surface_height} is below visible height {height}"
            )));
        }
        let mut planes = Vec::with_capacity(format.plane_count());
        let mut offset = 0usize;
        for index in 0..format.plane_count() {
            let plane_pitch = derived_pitch(format, index, pitch);
            let rows = format.plane_height(index, surface_height) as usize;
            let size = plane_pitch * rows;
            let end = offset
                .checked_add(size)
                .ok_or_else(|| Error::invalid_data("plane extent overflows"))?;
            // the last plane may be cut short after its visible rows
            let available = data.len().saturating_sub(offset).min(size);
            if available == 0 && size > 0 {
                return Err(Error::invalid_data(format!(
                    "mapping of {} bytes ends before plane {index}",
                    data.len()
                )));
            }
            planes.push(SourcePlane {
                data: &data[offset..offset + available],
                pitch: plane_pitch,
            });
            offset = end;
        }
        Self::new(format, width, height, planes)
    }

    /**
        Returns how many bytes [`Self::contiguous`] reads for a mapping
        with luma `pitch` and `surface_height` rows.
    */
    pub fn contiguous_len(format: PixelFormat, pitch: usize, surface_height: u32) -> usize {
        (0..format.plane_count())
            .map(|index| {
                derived_pitch(format, index, pitch)
                    .saturating_mul(format.plane_height(index, surface_height) as usize)
            })
            .fold(0, usize::saturating_add)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[SourcePlane<'a>] {
        &self.planes
    }
}

/**
    Returns the pitch of chroma plane `index` given the luma `pitch`.
*/
fn derived_pitch(format: PixelFormat, index: usize, pitch: usize) -> usize {
    if index == 0 {
        return pitch;
    }
    let (shift, _) = format.chroma_shift();
    let luma_bpp = format.bytes_per_pixel(0).max(1);
    (pitch * format.bytes_per_pixel(index) / luma_bpp) >> shift
}

/**
    Returns the output format produced by [`copy_to_frame`] for `format`.

    Formats storing V before U come out in the usual U-before-V order.
*/
pub fn host_format(format: PixelFormat) -> PixelFormat {
    match format {
        PixelFormat::Yv12 => PixelFormat::Yuv420p,
        other => other,
    }
}

/**
    Copy the visible region of `source` into a new host [`VideoFrame`].

    Uses `copier` when given (the optimized path for write-combined memory),
    plain row copies otherwise. Destination rows are padded to 16 bytes.
    Chroma planes stored as V, U are swapped so the frame reads U, V.
*/
pub fn copy_to_frame(
    source: &SourceFrame<'_>,
    mut copier: Option<&mut UswcCopier>,
) -> Result<VideoFrame> {
    let format = source.format;
    let output = host_format(format);
    let mut order: Vec<usize> = (0..format.plane_count()).collect();
    if format.has_swapped_chroma() {
        order.swap(1, 2);
    }

    let mut planes = Vec::with_capacity(order.len());
    for &index in &order {
        let src = source.planes[index];
        let line = format.bytes_per_line(index, source.width);
        let rows = format.plane_height(index, source.height) as usize;
        let stride = line.next_multiple_of(ROW_ALIGN);
        let mut data = vec![0u8; stride * rows];
        match copier.as_deref_mut() {
            Some(copier) => {
                if !copier.is_ready() {
                    copier.init_cache(line.max(1))?;
                }
                copier.copy_plane(src.data, src.pitch, &mut data, stride, line, rows)?;
            }
            None => copy_rows(src, &mut data, stride, line, rows)?,
        }
        planes.push(Plane::new(data, stride));
    }

    VideoFrame::host(source.width, source.height, output, planes)
}

fn copy_rows(
    src: SourcePlane<'_>,
    dst: &mut [u8],
    stride: usize,
    line: usize,
    rows: usize,
) -> Result<()> {
    for y in 0..rows {
        let start = y * src.pitch;
        let row = src
            .data
            .get(start..start + line)
            .ok_or_else(|| Error::invalid_data(format!("source plane ends at row {y}")))?;
        dst[y * stride..y * stride + line].copy_from_slice(row);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::{format::Pixel, util::frame::video::Video as AvFrame};

    use super::*;
    use crate::av::frame_from_av;

    /// NV12 surface of `coded` rows, luma bytes 0x10, chroma bytes 0x80 + x.
    fn nv12_surface(width: usize, pitch: usize, coded: usize) -> Vec<u8> {
        let mut data = vec![0x10u8; pitch * coded];
        for _ in 0..coded / 2 {
            data.extend((0..pitch).map(|x| if x < width { 0x80 + (x % 64) as u8 } else { 0 }));
        }
        data
    }

    #[test]
    fn nv12_chroma_follows_coded_height() {
        let data = nv12_surface(64, 128, 48);
        let source = SourceFrame::contiguous(PixelFormat::Nv12, 64, 36, &data, 128, 48).unwrap();
        assert_eq!(source.planes().len(), 2);
        assert_eq!(source.planes()[1].pitch, 128);
        assert_eq!(source.planes()[1].data[0], 0x80);
        assert_eq!(source.planes()[1].data[5], 0x85);

        let frame = copy_to_frame(&source, None).unwrap();
        assert_eq!(frame.format(), PixelFormat::Nv12);
        assert_eq!((frame.width(), frame.height()), (64, 36));
        let chroma = frame.plane(1).unwrap();
        assert_eq!(chroma.stride(), 64);
        assert_eq!(chroma.data().len(), 64 * 18);
        assert_eq!(chroma.row(17, 3), Some(&[0x80u8, 0x81, 0x82][..]));
        assert!(frame.plane(0).unwrap().data().iter().all(|&b| b == 0x10));
    }

    #[test]
    fn yv12_planes_are_swapped() {
        let (w, h, pitch) = (32usize, 4usize, 32usize);
        let mut data = vec![1u8; pitch * h];
        data.extend(vec![2u8; (pitch / 2) * (h / 2)]); // V
        data.extend(vec![3u8; (pitch / 2) * (h / 2)]); // U
        let source =
            SourceFrame::contiguous(PixelFormat::Yv12, w as u32, h as u32, &data, pitch, h as u32)
                .unwrap();
        assert_eq!(source.planes()[1].pitch, 16);

        let frame = copy_to_frame(&source, None).unwrap();
        assert_eq!(frame.format(), PixelFormat::Yuv420p);
        assert!(frame.plane(1).unwrap().data().iter().all(|&b| b == 3));
        assert!(frame.plane(2).unwrap().data().iter().all(|&b| b == 2));
    }

    #[test]
    fn optimized_and_plain_copies_agree() {
        let data = nv12_surface(200, 256, 120);
        let source = SourceFrame::contiguous(PixelFormat::Nv12, 200, 113, &data, 256, 120).unwrap();
        let plain = copy_to_frame(&source, None).unwrap();
        let mut copier = UswcCopier::new();
        let fast = copy_to_frame(&source, Some(&mut copier)).unwrap();
        assert!(copier.is_ready());
        assert_eq!(plain.planes(), fast.planes());
        assert_eq!(plain.plane(0).unwrap().stride() % ROW_ALIGN, 0);
    }

    #[test]
    fn truncated_mapping_is_rejected() {
        let data = vec![0u8; 64 * 16];
        assert!(SourceFrame::contiguous(PixelFormat::Nv12, 64, 16, &data, 64, 16).is_err());
        assert!(SourceFrame::contiguous(PixelFormat::Nv12, 64, 16, &data, 64, 8).is_err());
        assert!(SourceFrame::new(PixelFormat::Vaapi, 64, 16, vec![]).is_err());
    }

    #[test]
    fn short_chroma_plane_fails_copy() {
        let mut data = vec![0u8; 64 * 16];
        data.extend(vec![0u8; 64 * 3]);
        let source = SourceFrame::contiguous(PixelFormat::Nv12, 64, 16, &data, 64, 16).unwrap();
        assert!(copy_to_frame(&source, None).is_err());
    }

    /// A decoded picture whose visible bytes all differ from their neighbours.
    fn patterned(pixel: Pixel, format: PixelFormat, width: u32, height: u32) -> AvFrame {
        let mut av = AvFrame::new(pixel, width, height);
        for index in 0..format.plane_count() {
            let line = format.bytes_per_line(index, width);
            let rows = format.plane_height(index, height) as usize;
            let stride = av.stride(index);
            let data = av.data_mut(index);
            for y in 0..rows {
                for x in 0..line {
                    data[y * stride + x] = (index * 101 + y * 7 + x * 13) as u8;
                }
            }
        }
        av
    }

    fn assert_same_pixels(a: &VideoFrame, b: &VideoFrame) {
        let format = a.format();
        assert_eq!(format, b.format());
        assert_eq!((a.width(), a.height()), (b.width(), b.height()));
        for index in 0..format.plane_count() {
            let line = format.bytes_per_line(index, a.width());
            let (pa, pb) = (a.plane(index).unwrap(), b.plane(index).unwrap());
            for y in 0..format.plane_height(index, a.height()) as usize {
                assert_eq!(pa.row(y, line), pb.row(y, line), "plane {index} row {y}");
            }
        }
    }

    #[test]
    fn read_map_and_transfer_agree() {
        for (pixel, format) in [(Pixel::NV12, PixelFormat::Nv12), (Pixel::P010LE, PixelFormat::P010)]
        {
            let av = patterned(pixel, format, 202, 114);
            let transferred = frame_from_av(&av).unwrap();

            let planes = (0..format.plane_count())
                .map(|index| SourcePlane {
                    data: av.data(index),
                    pitch: av.stride(index),
                })
                .collect();
            let source = SourceFrame::new(format, 202, 114, planes).unwrap();
            let plain = copy_to_frame(&source, None).unwrap();
            let mut copier = UswcCopier::new();
            let fast = copy_to_frame(&source, Some(&mut copier)).unwrap();

            assert_same_pixels(&transferred, &plain);
            assert_same_pixels(&transferred, &fast);
        }
    }

    #[test]
    fn luma_only_mapping_matches_transfer() {
        let (width, height, coded) = (96u32, 54u32, 64u32);
        let av = patterned(Pixel::NV12, PixelFormat::Nv12, width, height);
        let transferred = frame_from_av(&av).unwrap();

        // One mapping: luma at the coded height, then interleaved chroma
        let pitch = 128;
        let len = SourceFrame::contiguous_len(PixelFormat::Nv12, pitch, coded);
        assert_eq!(len, pitch * 64 + pitch * 32);
        let mut mapping = vec![0u8; len];
        for index in 0..2 {
            let base = index * pitch * coded as usize;
            let rows = PixelFormat::Nv12.plane_height(index, height) as usize;
            for y in 0..rows {
                let row = &av.data(index)[y * av.stride(index)..][..width as usize];
                mapping[base + y * pitch..][..width as usize].copy_from_slice(row);
            }
        }
        let source =
            SourceFrame::contiguous(PixelFormat::Nv12, width, height, &mapping, pitch, coded)
                .unwrap();
        assert_same_pixels(&transferred, &copy_to_frame(&source, None).unwrap());
    }
}
