//! Input validation for submitted images.
//!
//! The coordinator only needs to know the bytes are a plausible image of an
//! allowed format before queueing them; full decoding happens on the worker.
//! Validation here is a size cap, magic-byte sniffing, and content hashing.

use sha2::{Digest, Sha256};

use crate::error::{JobError, JobResult};

/// Outcome of validating an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedInput {
    /// SHA-256 hex digest of the bytes
    pub sha256: String,
    /// Detected extension: "jpg", "png" or "webp"
    pub ext: &'static str,
}

/// Detect the image format from magic bytes.
fn detect_format(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\xff\xd8\xff") {
        return Some("jpg");
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("png");
    }
    // WebP is a RIFF container with a WEBP fourcc at offset 8
    if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP") {
        return Some("webp");
    }
    None
}

/// Validate an uploaded image: size cap, magic bytes, SHA-256.
pub fn validate_image(data: &[u8], max_bytes: usize) -> JobResult<ValidatedInput> {
    if data.is_empty() {
        return Err(JobError::Validation("Empty file".to_string()));
    }
    if data.len() > max_bytes {
        return Err(JobError::Validation(format!(
            "File too large ({} bytes, max {})",
            data.len(),
            max_bytes
        )));
    }

    let ext = detect_format(data).ok_or_else(|| {
        JobError::Validation("Unsupported image format (bad magic bytes)".to_string())
    })?;

    let sha256 = format!("{:x}", Sha256::digest(data));
    Ok(ValidatedInput { sha256, ext })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal headers for each supported format
    const JPG: &[u8] = b"\xff\xd8\xff\xe0rest-of-jpeg";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-png";
    const WEBP: &[u8] = b"RIFF\x00\x00\x00\x00WEBPrest";

    #[test]
    fn test_detects_jpg() {
        let validated = validate_image(JPG, 1024).unwrap();
        assert_eq!(validated.ext, "jpg");
    }

    #[test]
    fn test_detects_png() {
        let validated = validate_image(PNG, 1024).unwrap();
        assert_eq!(validated.ext, "png");
    }

    #[test]
    fn test_detects_webp() {
        let validated = validate_image(WEBP, 1024).unwrap();
        assert_eq!(validated.ext, "webp");
    }

    #[test]
    fn test_riff_without_webp_fourcc_rejected() {
        let data = b"RIFF\x00\x00\x00\x00WAVEdata";
        let err = validate_image(data, 1024).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let err = validate_image(b"GIF89a...", 1024).unwrap_err();
        assert!(err.to_string().contains("magic bytes"));
    }

    #[test]
    fn test_rejects_empty() {
        let err = validate_image(b"", 1024).unwrap_err();
        assert!(err.to_string().contains("Empty"));
    }

    #[test]
    fn test_rejects_oversize() {
        let err = validate_image(PNG, 4).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let a = validate_image(PNG, 1024).unwrap();
        let b = validate_image(PNG, 1024).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.sha256.len(), 64);
    }
}
