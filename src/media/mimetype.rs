//! Mimetype detection for recovered media.
//!
//! Decrypted plaintext carries no headers, so the content type is sniffed
//! from magic bytes, falling back to a per-category default when no
//! signature matches.

use crate::domain::MediaType;

/// Sniff a mimetype from the leading bytes of a buffer.
pub fn sniff(buffer: &[u8]) -> Option<&'static str> {
    if buffer.len() < 12 {
        return None;
    }

    // JPEG: FF D8 FF
    if buffer[0] == 0xff && buffer[1] == 0xd8 && buffer[2] == 0xff {
        return Some("image/jpeg");
    }
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if buffer[..8] == [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a] {
        return Some("image/png");
    }
    // GIF: "GIF8"
    if buffer[..4] == *b"GIF8" {
        return Some("image/gif");
    }
    // WebP: "RIFF" .. "WEBP"
    if buffer[..4] == *b"RIFF" && buffer[8..12] == *b"WEBP" {
        return Some("image/webp");
    }
    // MP4: "ftyp" at offset 4
    if buffer[4..8] == *b"ftyp" {
        return Some("video/mp4");
    }
    // PDF: "%PDF"
    if buffer[..4] == *b"%PDF" {
        return Some("application/pdf");
    }
    // OGG: "OggS"
    if buffer[..4] == *b"OggS" {
        return Some("audio/ogg");
    }

    None
}

/// Sniff with a category-aware fallback. OGG containers are reported as
/// video when the category says video.
pub fn detect(buffer: &[u8], media_type: MediaType) -> &'static str {
    match sniff(buffer) {
        Some("audio/ogg") if media_type == MediaType::Video => "video/ogg",
        Some(mime) => mime,
        None => fallback(media_type),
    }
}

pub fn fallback(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "image/jpeg",
        MediaType::Video => "video/mp4",
        MediaType::Audio => "audio/ogg",
        MediaType::Document => "application/octet-stream",
    }
}

/// File extension for an object key, derived from the mimetype.
pub fn extension_for(mimetype: &str) -> &'static str {
    match mimetype {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "video/ogg" => ".ogv",
        "video/3gpp" => ".3gp",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/ogg" => ".ogg",
        "audio/wav" => ".wav",
        "audio/mp4" => ".m4a",
        "audio/aac" => ".aac",
        "audio/amr" => ".amr",
        "application/pdf" => ".pdf",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/zip" => ".zip",
        _ => ".bin",
    }
}

/// Last-resort mimetype guess from a URL path, used for direct downloads
/// whose response carries no usable content type.
pub fn infer_from_url(url: &str) -> &'static str {
    let path = url
        .split('?')
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();

    const BY_EXTENSION: &[(&str, &str)] = &[
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
        (".png", "image/png"),
        (".gif", "image/gif"),
        (".webp", "image/webp"),
        (".mp4", "video/mp4"),
        (".mov", "video/quicktime"),
        (".mp3", "audio/mpeg"),
        (".ogg", "audio/ogg"),
        (".wav", "audio/wav"),
        (".pdf", "application/pdf"),
    ];
    for (ext, mime) in BY_EXTENSION {
        if path.ends_with(ext) {
            return mime;
        }
    }
    "application/octet-stream"
}

/// Whether the pipeline accepts this content type for durable storage.
pub fn is_supported(mimetype: &str) -> bool {
    const SUPPORTED_PREFIXES: &[&str] = &[
        "image/",
        "video/",
        "audio/",
        "application/pdf",
        "application/msword",
        "application/vnd.openxmlformats-officedocument",
        "application/vnd.ms-excel",
        "application/vnd.ms-powerpoint",
        "text/plain",
        "text/csv",
        "application/json",
    ];
    SUPPORTED_PREFIXES.iter().any(|p| mimetype.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_signatures() {
        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe0];
        jpeg.resize(16, 0);
        assert_eq!(sniff(&jpeg), Some("image/jpeg"));

        let mut png = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
        png.resize(16, 0);
        assert_eq!(sniff(&png), Some("image/png"));

        let mut mp4 = vec![0, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.resize(16, 0);
        assert_eq!(sniff(&mp4), Some("video/mp4"));

        let mut webp = b"RIFF\x00\x00\x00\x00WEBP".to_vec();
        webp.resize(16, 0);
        assert_eq!(sniff(&webp), Some("image/webp"));

        let mut pdf = b"%PDF-1.7\n".to_vec();
        pdf.resize(16, 0);
        assert_eq!(sniff(&pdf), Some("application/pdf"));
    }

    #[test]
    fn short_or_unknown_buffers_fall_back_by_category() {
        assert_eq!(detect(b"short", MediaType::Image), "image/jpeg");
        assert_eq!(detect(&[0u8; 64], MediaType::Video), "video/mp4");
        assert_eq!(detect(&[0u8; 64], MediaType::Audio), "audio/ogg");
        assert_eq!(
            detect(&[0u8; 64], MediaType::Document),
            "application/octet-stream"
        );
    }

    #[test]
    fn ogg_in_a_video_category_is_video() {
        let mut ogg = b"OggS\x00\x02".to_vec();
        ogg.resize(16, 0);
        assert_eq!(detect(&ogg, MediaType::Audio), "audio/ogg");
        assert_eq!(detect(&ogg, MediaType::Video), "video/ogg");
    }

    #[test]
    fn url_inference_ignores_query_strings() {
        assert_eq!(infer_from_url("https://cdn.example.com/a/b.jpg?sig=x"), "image/jpeg");
        assert_eq!(infer_from_url("https://cdn.example.com/clip.MP4"), "video/mp4");
        assert_eq!(infer_from_url("https://cdn.example.com/blob"), "application/octet-stream");
    }

    #[test]
    fn supported_set_accepts_documents_and_rejects_binaries() {
        assert!(is_supported("image/png"));
        assert!(is_supported("application/pdf"));
        assert!(is_supported("text/plain"));
        assert!(!is_supported("application/x-executable"));
    }
}
