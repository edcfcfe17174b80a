/*!
    Copies out of uncacheable speculative write-combining (USWC) memory.

    GPU surfaces mapped for CPU reads are usually write-combined: ordinary
    loads from them are uncached and very slow. SSE4.1 streaming loads
    (`movntdqa`) fetch a whole line per access, so rows are first streamed
    into a small cacheable scratch buffer and then copied to their final
    destination from there.

    The widest available tier is detected once per process:

    - [`CopyTier::Sse41`] - streaming loads through the scratch buffer
    - [`CopyTier::Sse2`] - 128-bit unaligned loads and stores
    - [`CopyTier::Portable`] - plain slice copies
*/

use std::sync::OnceLock;

use ffmpeg_types::{Error, Result};

const CACHE_ALIGN: usize = 4096;

/**
    Instruction set used by [`UswcCopier`].
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CopyTier {
    Portable,
    Sse2,
    Sse41,
}

impl CopyTier {
    /**
        Returns the widest tier supported by the current CPU.

        Detection runs once; later calls return the cached result.
    */
    pub fn detect() -> Self {
        static TIER: OnceLock<CopyTier> = OnceLock::new();
        *TIER.get_or_init(detect_tier)
    }

    /**
        Returns true if this tier can run on the current CPU.
    */
    pub fn is_available(self) -> bool {
        self <= Self::detect()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Portable => "portable",
            Self::Sse2 => "sse2",
            Self::Sse41 => "sse4.1",
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_tier() -> CopyTier {
    if is_x86_feature_detected!("sse4.1") {
        CopyTier::Sse41
    } else if is_x86_feature_detected!("sse2") {
        CopyTier::Sse2
    } else {
        CopyTier::Portable
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn detect_tier() -> CopyTier {
    CopyTier::Portable
}

/**
    Row copier for write-combined GPU memory.

    One instance per decoder. The scratch buffer is sized by
    [`UswcCopier::init_cache`] to one row rounded up to 4 KiB and reused for
    every frame until [`UswcCopier::clean_cache`].
*/
#[derive(Debug)]
pub struct UswcCopier {
    tier: CopyTier,
    cache: Vec<u8>,
}

impl Default for UswcCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl UswcCopier {
    /**
        Create a copier using the widest tier the CPU supports.
    */
    pub fn new() -> Self {
        Self::with_tier(CopyTier::detect())
    }

    /**
        Create a copier using at most `tier`.

        Requests for a tier the CPU lacks are clamped to the detected one.
    */
    pub fn with_tier(tier: CopyTier) -> Self {
        Self {
            tier: tier.min(CopyTier::detect()),
            cache: Vec::new(),
        }
    }

    pub fn tier(&self) -> CopyTier {
        self.tier
    }

    /**
        Allocate the scratch buffer for rows of `line_size` bytes.

        Calling this again with a size that fits the current buffer keeps it.
    */
    pub fn init_cache(&mut self, line_size: usize) -> Result<()> {
        if line_size == 0 {
            return Err(Error::invalid_data("copy cache line size is zero"));
        }
        let size = line_size
            .checked_add(CACHE_ALIGN - 1)
            .ok_or_else(|| Error::invalid_data("copy cache line size overflows"))?
            & !(CACHE_ALIGN - 1);
        if self.cache.len() < size {
            self.cache = vec![0u8; size];
        }
        Ok(())
    }

    /**
        Release the scratch buffer.
    */
    pub fn clean_cache(&mut self) {
        self.cache = Vec::new();
    }

    /**
        Returns true once [`UswcCopier::init_cache`] has succeeded.
    */
    pub fn is_ready(&self) -> bool {
        !self.cache.is_empty()
    }

    /**
        Returns the scratch buffer size in bytes.
    */
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /**
        Copy `height` rows of `width` bytes between buffers sharing `pitch`.
    */
    pub fn copy_frame(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        width: usize,
        height: usize,
        pitch: usize,
    ) -> Result<()> {
        self.copy_plane(src, pitch, dst, pitch, width, height)
    }

    /**
        Copy `height` rows of `width` bytes, each buffer with its own pitch.
    */
    pub fn copy_plane(
        &mut self,
        src: &[u8],
        src_pitch: usize,
        dst: &mut [u8],
        dst_pitch: usize,
        width: usize,
        height: usize,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        check_extent("source", src.len(), src_pitch, width, height)?;
        check_extent("destination", dst.len(), dst_pitch, width, height)?;
        if !self.is_ready() {
            return Err(Error::invalid_data("copy cache is not initialized"));
        }

        for y in 0..height {
            let src_row = &src[y * src_pitch..y * src_pitch + width];
            let dst_row = &mut dst[y * dst_pitch..y * dst_pitch + width];
            self.copy_row(src_row, dst_row);
        }
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if self.tier == CopyTier::Sse41 {
                // SAFETY: sse2 is implied by the detected sse4.1 tier.
                unsafe { x86::fence() };
            }
        }
        Ok(())
    }

    fn copy_row(&mut self, src: &[u8], dst: &mut [u8]) {
        match self.tier {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            CopyTier::Sse41 => {
                let chunk = self.cache.len();
                for (s, d) in src.chunks(chunk).zip(dst.chunks_mut(chunk)) {
                    let cache = &mut self.cache[..s.len()];
                    // SAFETY: the tier is only selected when the CPU reports sse4.1.
                    unsafe { x86::stream_copy(s, cache) };
                    d.copy_from_slice(cache);
                }
            }
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            CopyTier::Sse2 => {
                // SAFETY: the tier is only selected when the CPU reports sse2.
                unsafe { x86::vector_copy(src, dst) };
            }
            _ => dst.copy_from_slice(src),
        }
    }
}

fn check_extent(what: &str, len: usize, pitch: usize, width: usize, height: usize) -> Result<()> {
    if pitch < width {
        return Err(Error::invalid_data(format!(
            "{what} pitch {pitch} is shorter than a row ({width})"
        )));
    }
    let needed = pitch
        .checked_mul(height - 1)
        .and_then(|n| n.checked_add(width))
        .ok_or_else(|| Error::invalid_data(format!("{what} extent overflows")))?;
    if len < needed {
        return Err(Error::invalid_data(format!(
            "{what} holds {len} bytes, needs {needed}"
        )));
    }
    Ok(())
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    /**
        Streams `src` into `dst` with non-temporal loads.

        Leading bytes up to the first 16-byte boundary of `src` and the
        trailing partial vector are copied with scalar moves.
    */
    #[target_feature(enable = "sse4.1")]
    pub(super) unsafe fn stream_copy(src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        let len = src.len();
        let head = src.as_ptr().align_offset(16).min(len);
        dst[..head].copy_from_slice(&src[..head]);

        let mut i = head;
        while i + 16 <= len {
            // SAFETY: `src[i..]` is 16-byte aligned and holds 16 readable bytes,
            // `dst[i..]` holds 16 writable bytes.
            unsafe {
                let v = _mm_stream_load_si128(src.as_ptr().add(i) as *mut __m128i);
                _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, v);
            }
            i += 16;
        }
        dst[i..].copy_from_slice(&src[i..]);
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn vector_copy(src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        let len = src.len();
        let mut i = 0;
        while i + 16 <= len {
            // SAFETY: both slices hold 16 bytes at `i`.
            unsafe {
                let v = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
                _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, v);
            }
            i += 16;
        }
        dst[i..].copy_from_slice(&src[i..]);
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn fence() {
        _mm_mfence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn tiers() -> Vec<CopyTier> {
        [CopyTier::Portable, CopyTier::Sse2, CopyTier::Sse41]
            .into_iter()
            .filter(|t| t.is_available())
            .collect()
    }

    #[test]
    fn cache_rounds_up_to_page() {
        let mut copier = UswcCopier::new();
        assert!(!copier.is_ready());
        copier.init_cache(1920).unwrap();
        assert!(copier.is_ready());
        assert_eq!(copier.cache_size(), 4096);
        copier.init_cache(4097).unwrap();
        assert_eq!(copier.cache_size(), 8192);
        copier.init_cache(100).unwrap();
        assert_eq!(copier.cache_size(), 8192);
        copier.clean_cache();
        assert!(!copier.is_ready());
        assert!(copier.init_cache(0).is_err());
    }

    #[test]
    fn copy_requires_cache() {
        let mut copier = UswcCopier::new();
        let src = pattern(64);
        let mut dst = vec![0u8; 64];
        assert!(copier.copy_frame(&src, &mut dst, 16, 4, 16).is_err());
    }

    #[test]
    fn every_tier_matches_portable_copy() {
        let (width, height, pitch) = (1283, 7, 1344);
        let src = pattern(pitch * height + 5);
        for tier in tiers() {
            // unaligned source start
            for offset in [0usize, 1, 5] {
                let mut copier = UswcCopier::with_tier(tier);
                copier.init_cache(width).unwrap();
                let mut dst = vec![0u8; pitch * height];
                copier
                    .copy_frame(&src[offset..], &mut dst, width, height, pitch)
                    .unwrap();
                for y in 0..height {
                    let expected = &src[offset + y * pitch..offset + y * pitch + width];
                    assert_eq!(&dst[y * pitch..y * pitch + width], expected, "{tier:?} row {y}");
                    assert!(dst[y * pitch + width..(y + 1) * pitch].iter().all(|&b| b == 0));
                }
            }
        }
    }

    #[test]
    fn rows_wider_than_cache_are_chunked() {
        let mut copier = UswcCopier::new();
        copier.init_cache(16).unwrap();
        let width = 10_000;
        let src = pattern(width * 2);
        let mut dst = vec![0u8; width * 2];
        copier.copy_frame(&src, &mut dst, width, 2, width).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn different_pitches() {
        let mut copier = UswcCopier::new();
        copier.init_cache(6).unwrap();
        let src = pattern(32 * 3);
        let mut dst = vec![0u8; 8 * 3];
        copier.copy_plane(&src, 32, &mut dst, 8, 6, 3).unwrap();
        for y in 0..3 {
            assert_eq!(&dst[y * 8..y * 8 + 6], &src[y * 32..y * 32 + 6]);
        }
    }

    #[test]
    fn rejects_short_buffers() {
        let mut copier = UswcCopier::new();
        copier.init_cache(16).unwrap();
        let src = pattern(40);
        let mut dst = vec![0u8; 64];
        assert!(copier.copy_frame(&src, &mut dst, 16, 3, 16).is_err());
        assert!(copier.copy_frame(&src, &mut dst, 20, 2, 16).is_err());
        assert!(copier.copy_frame(&src, &mut dst, 16, 0, 16).is_ok());
    }

    #[test]
    fn tier_clamped_to_cpu() {
        let copier = UswcCopier::with_tier(CopyTier::Sse41);
        assert!(copier.tier() <= CopyTier::detect());
        assert_eq!(UswcCopier::with_tier(CopyTier::Portable).tier(), CopyTier::Portable);
    }
}
