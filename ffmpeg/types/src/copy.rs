/*!
    Copy mode selection.
*/

use std::{fmt, str::FromStr};

use crate::Error;

/**
    How decoded pixels reach the renderer.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CopyMode {
    /// The surface is shared with the renderer's GPU context, no host copy.
    #[default]
    ZeroCopy,
    /// The surface is read-mapped and copied with streaming SIMD loads.
    OptimizedCopy,
    /// The surface is copied by the driver's generic transfer path.
    GenericCopy,
}

impl CopyMode {
    /**
        Returns true if frames in this mode carry host planes.
    */
    pub const fn is_host(self) -> bool {
        !matches!(self, Self::ZeroCopy)
    }

    /**
        Returns the stable name of this mode.
    */
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ZeroCopy => "zero-copy",
            Self::OptimizedCopy => "optimized",
            Self::GenericCopy => "generic",
        }
    }
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CopyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero-copy" | "zerocopy" | "zero" => Ok(Self::ZeroCopy),
            "optimized" | "optimizedcopy" | "uswc" => Ok(Self::OptimizedCopy),
            "generic" | "genericcopy" => Ok(Self::GenericCopy),
            other => Err(Error::invalid_data(format!("unknown copy mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        for mode in [
            CopyMode::ZeroCopy,
            CopyMode::OptimizedCopy,
            CopyMode::GenericCopy,
        ] {
            assert_eq!(mode.to_string().parse::<CopyMode>().unwrap(), mode);
        }
        assert_eq!(" Optimized ".parse::<CopyMode>().unwrap(), CopyMode::OptimizedCopy);
        assert!("fast".parse::<CopyMode>().is_err());
    }

    #[test]
    fn host_modes() {
        assert!(!CopyMode::ZeroCopy.is_host());
        assert!(CopyMode::OptimizedCopy.is_host());
        assert!(CopyMode::GenericCopy.is_host());
    }
}
