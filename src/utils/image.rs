use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::path::Path;

/// Reference images above this size are re-encoded before upload.
pub const COMPACT_THRESHOLD: usize = 1024 * 1024;
const COMPACT_MAX_SIDE: u32 = 1024;
const COMPACT_JPEG_QUALITY: u8 = 80;

pub fn is_data_url(value: &str) -> bool {
    value.trim_start().starts_with("data:")
}

pub fn is_remote_url(value: &str) -> bool {
    let lowered = value.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decodes `data:<mime>;base64,<payload>`. A bare base64 payload is accepted
/// as PNG.
pub fn decode_data_url(value: &str) -> Result<DecodedImage> {
    let trimmed = value.trim();
    let (mime_type, payload) = match trimmed.split_once(',') {
        Some((meta, payload)) => {
            let mime = meta
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or("image/png");
            (mime.to_string(), payload)
        }
        None => ("image/png".to_string(), trimmed),
    };

    if payload.contains(',') {
        return Err(anyhow!("Invalid image data format"));
    }

    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("Image base64 decode failed")?;
    Ok(DecodedImage { mime_type, bytes })
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// `image/png` -> `png`.
pub fn mime_subtype(mime_type: &str) -> &str {
    let subtype = mime_type.split('/').nth(1).unwrap_or("png");
    let subtype = subtype.split(|c: char| c == '+' || c == ';').next().unwrap_or(subtype).trim();
    if subtype.is_empty() {
        "png"
    } else {
        subtype
    }
}

pub fn mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Rewrites a local path into a fetchable `/api/image` URL under `base`.
/// Remote and data URLs come back unchanged.
pub fn image_url(path: &str, base: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return String::new();
    }
    if is_remote_url(path) || is_data_url(path) {
        return path.to_string();
    }
    let clean = path.strip_prefix("file://").unwrap_or(path);
    format!(
        "{}/api/image?path={}",
        base.trim_end_matches('/'),
        urlencoding::encode(clean)
    )
}

/// Last path segment of `url` when it looks like a file name.
///
/// The decoded segment must be a bare name: separators and `..` are rejected.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let name = urlencoding::decode(segment).ok()?.into_owned();
    if name.contains(['/', '\\']) || name.contains("..") || !is_plain_file_name(&name) {
        return None;
    }
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(name)
}

/// True when `name` is a single normal path component.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

pub fn timestamped_filename(extension: &str) -> String {
    format!(
        "image_{}.{}",
        chrono::Utc::now().timestamp_millis(),
        extension
    )
}

/// Shrinks large reference images to a JPEG with the long side at most
/// 1024px. Small or undecodable inputs are returned as they are.
pub fn compact_reference(data: Vec<u8>) -> (String, Vec<u8>) {
    let original_mime = image::guess_format(&data)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/png".to_string());
    if data.len() <= COMPACT_THRESHOLD {
        return (original_mime, data);
    }

    match reencode_jpeg(&data) {
        Ok(compact) => ("image/jpeg".to_string(), compact),
        Err(e) => {
            log::warn!("Keeping reference image as is: {}", e);
            (original_mime, data)
        }
    }
}

fn reencode_jpeg(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let img = if img.width() > COMPACT_MAX_SIDE || img.height() > COMPACT_MAX_SIDE {
        img.resize(COMPACT_MAX_SIDE, COMPACT_MAX_SIDE, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, COMPACT_JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(buffer)
}
