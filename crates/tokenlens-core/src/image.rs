//! Image fetcher and raster transform pipeline.

use std::time::{Duration, Instant};

use image::{DynamicImage, RgbaImage};

use crate::cache::LruTtlCache;
use crate::error::ResolveError;
use crate::etag::weak_etag;

const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_BYTE_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_TRANSFORM_CACHE_TTL: Duration = Duration::from_secs(300);

pub const MIN_DIMENSION: u32 = 16;
pub const MAX_DIMENSION: u32 = 2048;
pub const DEFAULT_DIMENSION: u32 = 512;

pub const MIN_QUALITY: u8 = 30;
pub const MAX_QUALITY: u8 = 90;
pub const DEFAULT_QUALITY: u8 = 70;

/// Clamps a caller-supplied width/height to `[16, 2048]`, defaulting to 512 when
/// absent.
pub fn clamp_dimension(raw: Option<u32>) -> u32 {
    raw.unwrap_or(DEFAULT_DIMENSION).clamp(MIN_DIMENSION, MAX_DIMENSION)
}

/// Clamps a caller-supplied quality to `[30, 90]`, defaulting to 70 when absent.
pub fn clamp_quality(raw: Option<u8>) -> u8 {
    raw.unwrap_or(DEFAULT_QUALITY).clamp(MIN_QUALITY, MAX_QUALITY)
}

/// Fetches raw image bytes and their declared content type, via cache or GET.
pub struct ImageFetcher {
    client: reqwest::Client,
    cache: LruTtlCache<String, (String, Vec<u8>)>,
}

impl ImageFetcher {
    pub fn new(client: reqwest::Client, cache_capacity: usize) -> Self {
        Self { client, cache: LruTtlCache::new(cache_capacity) }
    }

    pub async fn fetch(&mut self, url: &str, ttl: Duration) -> Result<(String, Vec<u8>), ResolveError> {
        let now = Instant::now();
        if let Some(hit) = self.cache.get(&url.to_string(), now) {
            metrics::counter!("tokenlens_image_byte_cache_hits_total").increment(1);
            return Ok(hit);
        }
        metrics::counter!("tokenlens_image_byte_cache_misses_total").increment(1);

        let fetch_started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(IMAGE_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ResolveError::image_fetch(format!("image fetch error: {e}"), true))?;
        metrics::histogram!("tokenlens_image_fetch_duration_ms").record(fetch_started.elapsed().as_millis() as f64);

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "image fetch returned non-2xx");
            return Err(ResolveError::image_fetch(
                format!("image GET returned {}", status.as_u16()),
                crate::error::image_fetch_transient(&format!("rpc http {}", status.as_u16())),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::image_fetch(format!("image fetch error: {e}"), true))?
            .to_vec();

        let result = (content_type, bytes);
        self.cache.set(url.to_string(), result.clone(), ttl, Instant::now());
        Ok(result)
    }
}

/// Requested bounding box and quality for a raster transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// True when the transform should be bypassed (caller serves the original
/// bytes).
pub fn should_bypass_transform(content_type: &str, allow_svg_raster: bool) -> bool {
    let lower = content_type.to_lowercase();
    if !lower.starts_with("image/") {
        return true;
    }
    if lower.contains("svg") && !allow_svg_raster {
        return true;
    }
    if lower.contains("gif") {
        return true;
    }
    false
}

/// Computes an aspect-preserving, no-upscale fit within `(max_w, max_h)`.
fn fit_dimensions(orig_w: u32, orig_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let scale = (max_w as f64 / orig_w as f64)
        .min(max_h as f64 / orig_h as f64)
        .min(1.0);
    let new_w = ((orig_w as f64 * scale).round() as u32).max(1);
    let new_h = ((orig_h as f64 * scale).round() as u32).max(1);
    (new_w, new_h)
}

/// Builds the transform-cache derivation key: `(w x h, quality, contentType,
/// weak-etag-of-input)`.
fn derivation_key(params: TransformParams, content_type: &str, input_etag: &str) -> String {
    format!("{}x{}-q{}-{}-{}", params.width, params.height, params.quality, content_type, input_etag)
}

fn resize_and_encode_webp(img: DynamicImage, params: TransformParams) -> Result<Vec<u8>, ResolveError> {
    let (w, h) = fit_dimensions(img.width(), img.height(), params.width, params.height);
    let resized = img.resize_exact(w, h, image::imageops::FilterType::Lanczos3);
    let rgba = resized.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let encoded = encoder.encode(params.quality as f32);
    Ok(encoded.to_vec())
}

/// Hand-rolled BMP fallback decoder: parses the minimal 14+40-byte header, then
/// reassembles raw RGBA from a pixel channel order of A,B,G,R per pixel. This
/// exact byte order matches no ecosystem BMP decoder, which is why this path
/// is hand-rolled rather than reusing `image`'s own.
fn decode_bmp_abgr_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    if bytes.len() < 54 || &bytes[0..2] != b"BM" {
        return None;
    }
    let pixel_offset = u32::from_le_bytes(bytes[10..14].try_into().ok()?) as usize;
    let width = i32::from_le_bytes(bytes[18..22].try_into().ok()?);
    let height_raw = i32::from_le_bytes(bytes[22..26].try_into().ok()?);
    let bitcount = u16::from_le_bytes(bytes[28..30].try_into().ok()?);

    if width <= 0 || height_raw == 0 {
        return None;
    }
    let width = width as u32;
    let height = height_raw.unsigned_abs();
    let top_down = height_raw < 0;
    let bytes_per_pixel = match bitcount {
        32 => 4usize,
        24 => 3usize,
        _ => return None,
    };

    let row_size = (((bitcount as u32) * width + 31) / 32) * 4;
    let expected_len = pixel_offset + (row_size as usize) * (height as usize);
    if bytes.len() < expected_len {
        return None;
    }

    let mut rgba = vec![0u8; (width as usize) * (height as usize) * 4];
    let mut any_alpha_nonzero = false;

    for out_y in 0..height {
        let src_row = if top_down { out_y } else { height - 1 - out_y };
        let row_start = pixel_offset + (src_row as usize) * (row_size as usize);
        for x in 0..width {
            let px_start = row_start + (x as usize) * bytes_per_pixel;
            let out_idx = ((out_y * width + x) as usize) * 4;
            if bitcount == 32 {
                let a = bytes[px_start];
                let b = bytes[px_start + 1];
                let g = bytes[px_start + 2];
                let r = bytes[px_start + 3];
                if a != 0 {
                    any_alpha_nonzero = true;
                }
                rgba[out_idx] = r;
                rgba[out_idx + 1] = g;
                rgba[out_idx + 2] = b;
                rgba[out_idx + 3] = a;
            } else {
                let b = bytes[px_start];
                let g = bytes[px_start + 1];
                let r = bytes[px_start + 2];
                rgba[out_idx] = r;
                rgba[out_idx + 1] = g;
                rgba[out_idx + 2] = b;
                rgba[out_idx + 3] = 255;
            }
        }
    }

    if bitcount != 32 || !any_alpha_nonzero {
        for px in rgba.chunks_mut(4) {
            px[3] = 255;
        }
    }

    let buffer = RgbaImage::from_raw(width, height, rgba)?;
    Some(DynamicImage::ImageRgba8(buffer))
}

/// Runs the transform pipeline end to end. `Ok(None)` means "bypass, caller
/// serves the original bytes" — never an error.
pub fn transform(
    bytes: &[u8],
    content_type: &str,
    params: TransformParams,
    allow_svg_raster: bool,
    cache: &mut LruTtlCache<String, Vec<u8>>,
    now: Instant,
) -> Option<Vec<u8>> {
    if should_bypass_transform(content_type, allow_svg_raster) {
        return None;
    }

    let input_etag = weak_etag(bytes);
    let key = derivation_key(params, content_type, &input_etag);
    if let Some(hit) = cache.get(&key, now) {
        metrics::counter!("tokenlens_transform_cache_hits_total").increment(1);
        return Some(hit);
    }
    metrics::counter!("tokenlens_transform_cache_misses_total").increment(1);

    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => Some(img),
        Err(e) if content_type.eq_ignore_ascii_case("image/bmp") => {
            tracing::debug!(error = %e, "primary raster decode failed for image/bmp, trying ABGR fallback");
            decode_bmp_abgr_fallback(bytes)
        }
        Err(e) => {
            tracing::debug!(content_type, error = %e, "raster decode failed, bypassing transform");
            None
        }
    }?;

    let encoded = resize_and_encode_webp(decoded, params).ok()?;
    cache.set(key, encoded.clone(), DEFAULT_TRANSFORM_CACHE_TTL, now);
    Some(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_dimensions_and_quality_to_their_bounds() {
        assert_eq!(clamp_dimension(Some(1)), MIN_DIMENSION);
        assert_eq!(clamp_dimension(Some(9999)), MAX_DIMENSION);
        assert_eq!(clamp_dimension(None), DEFAULT_DIMENSION);
        assert_eq!(clamp_quality(Some(1)), MIN_QUALITY);
        assert_eq!(clamp_quality(Some(99)), MAX_QUALITY);
        assert_eq!(clamp_quality(None), DEFAULT_QUALITY);
    }

    #[test]
    fn bypass_rule_matches_non_image_svg_and_gif() {
        assert!(should_bypass_transform("text/html", false));
        assert!(should_bypass_transform("image/svg+xml", false));
        assert!(!should_bypass_transform("image/svg+xml", true));
        assert!(should_bypass_transform("image/gif", false));
        assert!(!should_bypass_transform("image/png", false));
    }

    #[test]
    fn fit_dimensions_never_upscale() {
        let (w, h) = fit_dimensions(100, 50, 2048, 2048);
        assert_eq!((w, h), (100, 50));
    }

    #[test]
    fn fit_dimensions_preserves_aspect_ratio_when_shrinking() {
        let (w, h) = fit_dimensions(1000, 500, 200, 200);
        assert_eq!(w, 200);
        assert_eq!(h, 100);
    }

    fn make_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn transforms_png_to_webp_within_bounding_box() {
        let bytes = make_png(1000, 500);
        let mut cache = LruTtlCache::new(10);
        let params = TransformParams { width: 200, height: 200, quality: 70 };
        let out = transform(&bytes, "image/png", params, false, &mut cache, Instant::now()).unwrap();
        let decoded = image::load_from_memory_with_format(&out, image::ImageFormat::WebP).unwrap();
        assert_eq!(decoded.width(), 200);
        assert_eq!(decoded.height(), 100);
    }

    #[test]
    fn transform_cache_hit_returns_identical_bytes_without_recompute() {
        let bytes = make_png(64, 64);
        let mut cache = LruTtlCache::new(10);
        let params = TransformParams { width: 32, height: 32, quality: 70 };
        let now = Instant::now();
        let first = transform(&bytes, "image/png", params, false, &mut cache, now).unwrap();
        let second = transform(&bytes, "image/png", params, false, &mut cache, now).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    fn make_bmp_32bpp_abgr(width: u32, height: u32, a: u8, b: u8, g: u8, r: u8) -> Vec<u8> {
        let row_size = width * 4;
        let pixel_data_size = row_size * height;
        let file_size = 54 + pixel_data_size;
        let mut out = Vec::with_capacity(file_size as usize);
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&file_size.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]); // reserved
        out.extend_from_slice(&54u32.to_le_bytes()); // pixel data offset
        out.extend_from_slice(&40u32.to_le_bytes()); // DIB header size
        out.extend_from_slice(&(width as i32).to_le_bytes());
        out.extend_from_slice(&(height as i32).to_le_bytes()); // positive: bottom-up
        out.extend_from_slice(&1u16.to_le_bytes()); // planes
        out.extend_from_slice(&32u16.to_le_bytes()); // bitcount
        out.extend_from_slice(&[0u8; 24]); // remaining DIB header fields, unused by the parser
        for _ in 0..(width * height) {
            out.extend_from_slice(&[a, b, g, r]);
        }
        out
    }

    #[test]
    fn bmp_fallback_decodes_abgr_order_into_rgba() {
        let bytes = make_bmp_32bpp_abgr(4, 4, 200, 10, 20, 30);
        let img = decode_bmp_abgr_fallback(&bytes).unwrap();
        let pixel = img.to_rgba8().get_pixel(0, 0).0;
        assert_eq!(pixel, [30, 20, 10, 200]);
    }

    #[test]
    fn bmp_fallback_forces_opacity_when_all_alpha_bytes_are_zero() {
        let bytes = make_bmp_32bpp_abgr(2, 2, 0, 10, 20, 30);
        let img = decode_bmp_abgr_fallback(&bytes).unwrap();
        let pixel = img.to_rgba8().get_pixel(0, 0).0;
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn bmp_fallback_rejects_non_bmp_bytes() {
        assert!(decode_bmp_abgr_fallback(b"not a bmp file at all").is_none());
    }

    #[test]
    fn transform_bypasses_when_decode_fails_and_not_bmp() {
        let mut cache = LruTtlCache::new(10);
        let params = TransformParams { width: 64, height: 64, quality: 70 };
        let out = transform(b"garbage", "image/png", params, false, &mut cache, Instant::now());
        assert!(out.is_none());
    }
}
