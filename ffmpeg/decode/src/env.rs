/*!
    Environment toggles, read once per process.
*/

use std::sync::OnceLock;

use ffmpeg_types::CopyMode;
use tracing::warn;

/**
    Process-wide switches read from the environment.

    - `HWDECODE_NO_VAO`, `HWDECODE_NO_VBO`, `HWDECODE_NO_IBO`: renderer hints
      to avoid vertex array, vertex buffer and index buffer objects
    - `HWDECODE_COPY_MODE`: overrides the configured copy mode
    - `HWDECODE_NO_SIMD`: forces the portable copy tier
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvToggles {
    pub no_vao: bool,
    pub no_vbo: bool,
    pub no_ibo: bool,
    pub copy_mode: Option<CopyMode>,
    pub no_simd: bool,
}

impl EnvToggles {
    /**
        Returns the toggles of this process, reading the environment on first use.
    */
    pub fn get() -> &'static EnvToggles {
        static TOGGLES: OnceLock<EnvToggles> = OnceLock::new();
        TOGGLES.get_or_init(|| Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /**
        Build toggles from an arbitrary variable lookup.
    */
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|value| is_truthy(&value));
        let copy_mode = lookup("HWDECODE_COPY_MODE").and_then(|value| match value.parse() {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("ignoring HWDECODE_COPY_MODE: {e}");
                None
            }
        });
        Self {
            no_vao: flag("HWDECODE_NO_VAO"),
            no_vbo: flag("HWDECODE_NO_VBO"),
            no_ibo: flag("HWDECODE_NO_IBO"),
            copy_mode,
            no_simd: flag("HWDECODE_NO_SIMD"),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
