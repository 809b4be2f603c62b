//! MIME resolution from file extensions.

/// Extensions whose mime_guess answer is wrong or too generic for
/// organization purposes.
fn override_for(ext: &str) -> Option<&'static str> {
    match ext {
        "md" => Some("text/markdown"),
        "csv" => Some("text/csv"),
        "log" => Some("text/plain"),
        "ini" | "cfg" => Some("text/plain"),
        "yaml" | "yml" => Some("application/yaml"),
        "ts" => Some("text/plain"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// MIME type for an extension (lowercased, no dot). Unknown extensions
/// fall back to the generic octet stream.
pub fn mime_for_extension(ext: &str) -> String {
    if let Some(mime) = override_for(ext) {
        return mime.to_string();
    }
    mime_guess::from_ext(ext)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_types() {
        assert_eq!(mime_for_extension("pdf"), "application/pdf");
        assert_eq!(mime_for_extension("jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("txt"), "text/plain");
    }

    #[test]
    fn test_overrides_beat_guess() {
        assert_eq!(mime_for_extension("md"), "text/markdown");
        assert_eq!(mime_for_extension("ts"), "text/plain");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(mime_for_extension("xyz"), "application/octet-stream");
        assert_eq!(mime_for_extension(""), "application/octet-stream");
    }
}
