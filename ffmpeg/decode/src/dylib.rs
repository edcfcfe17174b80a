/*!
    Runtime loading of vendor libraries.

    Vendor libraries are never linked: a machine without the driver must
    still decode in software. Each library is found by trying an ordered list
    of names, most specific first.
*/

use libloading::Library;
use tracing::debug;

use ffmpeg_types::{Error, Result};

#[cfg(target_os = "linux")]
pub(crate) const LIBVA: &[&str] = &["libva.so.2", "libva.so.1", "libva.so"];

#[cfg(target_os = "linux")]
pub(crate) const LIBVA_GLX: &[&str] = &["libva-glx.so.2", "libva-glx.so.1", "libva-glx.so"];

#[cfg(target_os = "linux")]
pub(crate) const LIBGL: &[&str] = &["libGL.so.1", "libGL.so"];

#[cfg(windows)]
pub(crate) const LIBCUDA: &[&str] = &["nvcuda.dll"];

#[cfg(not(windows))]
pub(crate) const LIBCUDA: &[&str] = &["libcuda.so.1", "libcuda.so"];

/**
    Load the first library in `names` that opens.
*/
pub(crate) fn probe(names: &[&str]) -> Result<Library> {
    let mut last_error = None;
    for name in names {
        // SAFETY: vendor driver libraries have no initialization routines
        // with preconditions beyond being loaded once per process.
        match unsafe { Library::new(name) } {
            Ok(library) => {
                debug!("loaded {name}");
                return Ok(library);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(Error::unsupported(match last_error {
        Some(e) => format!("none of {names:?} could be loaded ({e})"),
        None => "no library names given".to_string(),
    }))
}

/**
    Resolve `name` in `library` as a value of type `T`, usually a function pointer.

    # Safety

    `T` must match the symbol's actual type.
*/
pub(crate) unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    // SAFETY: upheld by the caller.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|e| Error::unsupported(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_libraries_are_unsupported() {
        let err = probe(&["libhwdecode-does-not-exist.so.9"]).unwrap_err();
        assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Unsupported);
        assert!(probe(&[]).is_err());
    }
}
