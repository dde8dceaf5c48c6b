use crate::models::MediaFormat;

/// Detects an image format from its leading signature bytes.
pub fn detect_image_format(bytes: &[u8]) -> Option<MediaFormat> {
    match bytes {
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(MediaFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(MediaFormat::Jpeg),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(MediaFormat::Webp),
        _ => {
            tracing::warn!(
                "Unrecognized image format (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            None
        }
    }
}

/// MP3 streams open with an ID3v2 tag or an MPEG audio frame sync (11 set bits).
pub fn is_mp3(bytes: &[u8]) -> bool {
    match bytes {
        [b'I', b'D', b'3', ..] => true,
        [0xFF, second, ..] => second & 0xE0 == 0xE0,
        _ => false,
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// True when a declared content type cannot be audio: TTS providers report
/// quota and voice errors as JSON or plain text under a 200 status.
pub fn is_error_document(content_type: &str) -> bool {
    content_type == "application/json"
        || content_type.ends_with("+json")
        || content_type.starts_with("text/")
}
