use std::fmt;

#[derive(Debug)]
pub enum PageTileError {
    MaterialInsufficient {
        requested: usize,
        available: usize,
    },
    ImageDecode(String),
    SliceGeometry(u32),
    InvalidConfiguration(String),
    Encode(String),
    Io(std::io::Error),
}

impl PageTileError {
    pub fn is_material_insufficient(&self) -> bool {
        matches!(self, PageTileError::MaterialInsufficient { .. })
    }
}

impl fmt::Display for PageTileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageTileError::MaterialInsufficient {
                requested,
                available,
            } => write!(
                f,
                "内页素材不够: page needs background unit #{} but only {} available",
                requested, available
            ),
            PageTileError::ImageDecode(message) => write!(f, "image decode failed: {}", message),
            PageTileError::SliceGeometry(count) => write!(
                f,
                "invalid slice piece count {} (expected an even number in 2..=16)",
                count
            ),
            PageTileError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            PageTileError::Encode(message) => write!(f, "encode error: {}", message),
            PageTileError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for PageTileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PageTileError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PageTileError {
    fn from(value: std::io::Error) -> Self {
        PageTileError::Io(value)
    }
}
