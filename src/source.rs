use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use sha2::{Digest, Sha256};
use tiny_skia::Pixmap;

use crate::error::PageTileError;
use crate::raster::decode_image_to_pixmap;

// The id is the SHA-256 of the bytes; identical files share sliced rasters.
#[derive(Clone)]
pub struct BackgroundSource {
    id: String,
    name: String,
    data: Arc<Vec<u8>>,
    dimensions: Option<(u32, u32)>,
}

pub type CoverSource = BackgroundSource;

impl fmt::Debug for BackgroundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl BackgroundSource {
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let id = sha256_hex(&data);
        let dimensions = probe_dimensions(&data);
        Self {
            id,
            name: name.into(),
            data: Arc::new(data),
            dimensions,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PageTileError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("background")
            .to_string();
        Ok(Self::from_bytes(name, data))
    }

    pub fn from_data_uri(name: impl Into<String>, uri: &str) -> Result<Self, PageTileError> {
        let Some(rest) = uri.trim().strip_prefix("data:") else {
            return Err(PageTileError::ImageDecode("not a data URI".to_string()));
        };
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(PageTileError::ImageDecode("data URI has no payload".to_string()));
        };
        let data = if header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
            base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|err| PageTileError::ImageDecode(format!("base64: {err}")))?
        } else {
            payload.as_bytes().to_vec()
        };
        Ok(Self::from_bytes(name, data))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn aspect_ratio(&self) -> Option<f32> {
        let (w, h) = self.dimensions?;
        if h == 0 {
            return None;
        }
        Some(w as f32 / h as f32)
    }

    pub fn decode(&self) -> Result<Pixmap, PageTileError> {
        decode_image_to_pixmap(self.data())
    }

    pub fn decode_with(&self, retry: DecodeRetry) -> Result<Pixmap, PageTileError> {
        decode_with_retry(self.data(), retry.attempts, retry.backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for DecodeRetry {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(100),
        }
    }
}

// Decodes `data`, retrying up to `attempts` times with a linearly growing
// pause (`backoff * attempt`) between tries. Returns the last error.
pub fn decode_with_retry(
    data: &[u8],
    attempts: u32,
    backoff: Duration,
) -> Result<Pixmap, PageTileError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match decode_image_to_pixmap(data) {
            Ok(pixmap) => return Ok(pixmap),
            Err(err) if attempt >= attempts => return Err(err),
            Err(_) => {
                if !backoff.is_zero() {
                    std::thread::sleep(backoff * attempt);
                }
                attempt += 1;
            }
        }
    }
}

fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::png_bytes;

    #[test]
    fn identical_bytes_share_an_id() {
        let a = BackgroundSource::from_bytes("a.png", png_bytes(4, 3, [1, 2, 3, 255]));
        let b = BackgroundSource::from_bytes("b.png", png_bytes(4, 3, [1, 2, 3, 255]));
        let c = BackgroundSource::from_bytes("c.png", png_bytes(4, 3, [9, 2, 3, 255]));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().len(), 64);
    }

    #[test]
    fn dimensions_come_from_the_header() {
        let src = BackgroundSource::from_bytes("bg.png", png_bytes(400, 300, [0, 0, 0, 255]));
        assert_eq!(src.dimensions(), Some((400, 300)));
        assert!((src.aspect_ratio().unwrap() - 4.0 / 3.0).abs() < 1e-6);

        let junk = BackgroundSource::from_bytes("junk.bin", b"junk".to_vec());
        assert_eq!(junk.dimensions(), None);
        assert!(junk.decode().is_err());
    }

    #[test]
    fn data_uri_base64_payload_is_decoded() {
        let png = png_bytes(2, 2, [10, 20, 30, 255]);
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        let src = BackgroundSource::from_data_uri("inline", &uri).unwrap();
        assert_eq!(src.data(), png.as_slice());
        assert_eq!(src.dimensions(), Some((2, 2)));
        assert!(BackgroundSource::from_data_uri("x", "http://example.com/a.png").is_err());
        assert!(BackgroundSource::from_data_uri("x", "data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn decode_with_retry_returns_last_error_after_all_attempts() {
        let err = decode_with_retry(b"nope", 3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, PageTileError::ImageDecode(_)));
        let ok = decode_with_retry(&png_bytes(3, 3, [0, 0, 0, 255]), 0, Duration::ZERO).unwrap();
        assert_eq!(ok.width(), 3);
    }
}
