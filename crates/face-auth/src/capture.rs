//! Image intake: base64 payloads, decoding, and format sniffing.

use std::path::Path;

use image::{DynamicImage, ImageFormat};

use crate::types::{AuthError, AuthResult};

/// Decode raw image bytes in any format the `image` crate recognises.
pub fn decode_image(bytes: &[u8]) -> AuthResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(AuthError::Decode("empty image payload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| AuthError::Decode(format!("Invalid image: {e}")))
}

/// Decode a base64 image payload. A `data:<mime>;base64,` prefix is stripped.
pub fn decode_base64(data: &str) -> AuthResult<Vec<u8>> {
    use base64::Engine;
    let payload = match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AuthError::Decode(format!("Invalid base64: {e}")))
}

/// File extension for persisting raw bytes; unknown formats are stored as `.bin`.
pub fn extension_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::Bmp) => "bmp",
        Ok(ImageFormat::Tiff) => "tiff",
        _ => "bin",
    }
}

/// Check if a file path points to a supported image format.
pub fn is_supported_format(path: &str) -> bool {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" | "tiff" | "tif"
    )
}
