//! Base64 image payloads to decoded images and back to PNG.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported image: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip a `data:image/<fmt>;base64,` prefix if present.
pub fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:") {
        if let Some(idx) = payload.find(";base64,") {
            return &payload[idx + ";base64,".len()..];
        }
    }
    payload
}

/// Decode a raw base64 string or data URL into an image.
pub fn decode_image(payload: &str) -> Result<DynamicImage, DecodeError> {
    let body = strip_data_url(payload);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = BASE64.decode(body)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Re-encode as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn sample_png() -> Vec<u8> {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(6, 4, Luma([77])));
        encode_png(&image).unwrap()
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("data:image/jpeg;base64,BBBB"), "BBBB");
        assert_eq!(strip_data_url("  CCCC \n"), "CCCC");
        assert_eq!(strip_data_url("data:text/plain,hello"), "data:text/plain,hello");
    }

    #[test]
    fn test_decode_data_url_and_raw() {
        let encoded = BASE64.encode(sample_png());

        let raw = decode_image(&encoded).unwrap();
        assert_eq!((raw.width(), raw.height()), (6, 4));

        let url = decode_image(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(url.to_luma8().get_pixel(0, 0)[0], 77);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_image(""), Err(DecodeError::Empty)));
        assert!(matches!(decode_image("data:image/png;base64,"), Err(DecodeError::Empty)));
        assert!(matches!(decode_image("not base64!!"), Err(DecodeError::Base64(_))));
        assert!(matches!(
            decode_image(&BASE64.encode(b"plain text, not an image")),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn test_encode_png_signature() {
        assert!(sample_png().starts_with(b"\x89PNG\r\n\x1a\n"));
    }
}
