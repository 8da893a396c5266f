//! Content type constants and the classification rules built on them.

pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const IMAGE_WEBP: &str = "image/webp";
pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_JPEG: &str = "image/jpeg";
pub const LONG_MESSAGE: &str = "text/x-signal-plain";

pub fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

pub fn is_video(content_type: &str) -> bool {
    content_type.starts_with("video/")
}

pub fn is_audio(content_type: &str) -> bool {
    content_type.starts_with("audio/")
}

pub fn is_long_message(content_type: &str) -> bool {
    content_type == LONG_MESSAGE
}

/// Content types the local URL handler is willing to echo back; everything
/// else is served as an opaque byte stream.
pub fn is_servable_inline(content_type: &str) -> bool {
    is_image(content_type) || is_video(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_image("image/gif"));
        assert!(is_video("video/mp4"));
        assert!(is_audio("audio/aac"));
        assert!(!is_image("text/html"));
        assert!(is_servable_inline("video/webm"));
        assert!(!is_servable_inline("text/html"));
        assert!(is_long_message(LONG_MESSAGE));
    }
}
