//! Blob resolution and downscaling for post images.
//!
//! `data:` URIs are decoded, `http(s)` URLs fetched. Payloads over the cap
//! are decoded and re-encoded smaller; a payload that cannot be brought under
//! the cap is an item-level [`JobError::BlobTooLarge`] — never a truncated
//! buffer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::common::errors::JobError;

/// Upload safety cap.
pub const BLOB_CAP: usize = 900 * 1024;
pub const MAX_WIDTH: u32 = 1280;
pub const JPEG_QUALITY: u8 = 80;
/// Give up downscaling below this width.
const MIN_WIDTH: u32 = 64;

/// Resolve an image source to raw bytes plus a mime type.
pub async fn resolve(http: &reqwest::Client, url: &str) -> Result<(Vec<u8>, String), JobError> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| JobError::BadRequest("malformed data: URI".into()))?;
        if !header.ends_with(";base64") {
            return Err(JobError::BadRequest("data: URI must be base64".into()));
        }
        let mime = header
            .trim_end_matches(";base64")
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = BASE64
            .decode(data)
            .map_err(|e| JobError::BadRequest(format!("invalid base64 image: {e}")))?;
        return Ok((bytes, mime));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let response = http
            .get(url)
            .send()
            .await
            .map_err(|e| JobError::Upstream(format!("image fetch: {e}")))?;
        if !response.status().is_success() {
            return Err(JobError::Upstream(format!(
                "image fetch returned {}",
                response.status()
            )));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobError::Upstream(format!("image fetch: {e}")))?;
        return Ok((bytes.to_vec(), mime));
    }

    Err(JobError::BadRequest(format!(
        "unsupported image url scheme: {url}"
    )))
}

/// Bring a payload under [`BLOB_CAP`], re-encoding as JPEG when needed.
pub fn fit_to_cap(bytes: Vec<u8>, mime: &str) -> Result<(Vec<u8>, String), JobError> {
    if bytes.len() <= BLOB_CAP {
        return Ok((bytes, mime.to_string()));
    }
    let size = bytes.len();

    let decoded = image::load_from_memory(&bytes).map_err(|_| JobError::BlobTooLarge {
        size,
        cap: BLOB_CAP,
    })?;

    let mut width = decoded.width().min(MAX_WIDTH);
    loop {
        let scaled = if decoded.width() > width {
            let height =
                (decoded.height() as u64 * width as u64 / decoded.width() as u64).max(1) as u32;
            decoded.resize(width, height, FilterType::Triangle)
        } else {
            decoded.clone()
        };

        let mut out = Vec::new();
        scaled
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
            .map_err(|e| JobError::Internal(format!("jpeg encode: {e}")))?;
        if out.len() <= BLOB_CAP {
            return Ok((out, "image/jpeg".to_string()));
        }
        if width <= MIN_WIDTH {
            return Err(JobError::BlobTooLarge {
                size,
                cap: BLOB_CAP,
            });
        }
        width /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        // Noise compresses poorly, which keeps the fixture over the cap.
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            let h = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503));
            image::Rgb([(h >> 16) as u8, (h >> 8) as u8, h as u8])
        });
        let mut out = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, 95))
            .unwrap();
        out
    }

    #[tokio::test]
    async fn data_uri_decodes_with_mime() {
        let http = reqwest::Client::new();
        let payload = BASE64.encode(b"not really a jpeg");
        let (bytes, mime) = resolve(&http, &format!("data:image/png;base64,{payload}"))
            .await
            .unwrap();
        assert_eq!(bytes, b"not really a jpeg");
        assert_eq!(mime, "image/png");
    }

    #[tokio::test]
    async fn bad_schemes_and_bad_base64_are_rejected() {
        let http = reqwest::Client::new();
        assert!(matches!(
            resolve(&http, "ftp://example.com/x.jpg").await,
            Err(JobError::BadRequest(_))
        ));
        assert!(matches!(
            resolve(&http, "data:image/png;base64,@@@").await,
            Err(JobError::BadRequest(_))
        ));
        assert!(matches!(
            resolve(&http, "data:image/png,plain").await,
            Err(JobError::BadRequest(_))
        ));
    }

    #[test]
    fn small_payloads_pass_through_untouched() {
        let bytes = vec![1u8, 2, 3];
        let (out, mime) = fit_to_cap(bytes.clone(), "image/png").unwrap();
        assert_eq!(out, bytes);
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn oversized_images_are_downscaled_under_the_cap() {
        // A large noisy image comfortably over 900 KiB.
        let big = jpeg_bytes(4000, 3000);
        assert!(big.len() > BLOB_CAP, "fixture too small: {}", big.len());

        let (out, mime) = fit_to_cap(big, "image/jpeg").unwrap();
        assert!(out.len() <= BLOB_CAP);
        assert_eq!(mime, "image/jpeg");

        let reloaded = image::load_from_memory(&out).unwrap();
        assert!(reloaded.width() <= MAX_WIDTH);
    }

    #[test]
    fn undecodable_oversized_payload_is_blob_too_large() {
        let garbage = vec![0u8; BLOB_CAP + 1];
        let err = fit_to_cap(garbage, "image/jpeg").unwrap_err();
        assert!(matches!(err, JobError::BlobTooLarge { .. }));
    }
}
