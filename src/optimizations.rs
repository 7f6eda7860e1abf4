use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Environment variable listing optimizations to turn off,
/// e.g. `OPFRAME_DISABLE=clear,merge` or `OPFRAME_DISABLE=all`.
pub const DISABLE_ENV: &str = "OPFRAME_DISABLE";

bitflags::bitflags! {
    /// Fast paths a frame may take.
    ///
    /// The set used by a frame is negotiated in [`Frame::setup`](crate::Frame::setup):
    /// what the renderer asks for, minus what the backend cannot do,
    /// minus what the environment disables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Optimizations: u32 {
        /// Use clears for pixel-aligned opaque color fills.
        const CLEAR = 1 << 0;
        /// Copy a pixel-aligned texture covering the whole target with a blit.
        const BLIT = 1 << 1;
        /// Merge adjacent draws of the same kind into one record.
        const MERGE = 1 << 2;
        /// Allocate mipmap-capable images for uploads that ask for them.
        const MIPMAP = 1 << 3;
    }
}

impl Default for Optimizations {
    fn default() -> Self {
        Self::all()
    }
}

static DISABLED_BY_ENV: Lazy<Optimizations> = Lazy::new(|| match std::env::var(DISABLE_ENV) {
    Ok(value) => parse_disabled(&value),
    Err(_) => Optimizations::empty(),
});

/// Optimizations disabled through [`DISABLE_ENV`].
///
/// The variable is read once per process.
pub fn disabled_by_env() -> Optimizations {
    *DISABLED_BY_ENV
}

pub(crate) fn parse_disabled(value: &str) -> Optimizations {
    let mut disabled = Optimizations::empty();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let flag = match name.to_ascii_lowercase().as_str() {
            "all" => Optimizations::all(),
            "clear" => Optimizations::CLEAR,
            "blit" => Optimizations::BLIT,
            "merge" => Optimizations::MERGE,
            "mipmap" => Optimizations::MIPMAP,
            _ => {
                log::warn!("Unknown value '{}' in {}, ignoring", name, DISABLE_ENV);
                continue;
            }
        };
        disabled |= flag;
    }
    disabled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(parse_disabled(""), Optimizations::empty());
        assert_eq!(
            parse_disabled("clear, MERGE"),
            Optimizations::CLEAR | Optimizations::MERGE
        );
        assert_eq!(parse_disabled("bogus,blit"), Optimizations::BLIT);
        assert_eq!(parse_disabled("all"), Optimizations::all());
    }
}
