//! Filename sanitization for cross-platform targets.

/// Windows-reserved device names; reserved regardless of extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest file name component accepted.
const MAX_COMPONENT_LEN: usize = 255;

/// Sanitize a single filename component:
/// - `< > : " / \ | ? *` and control characters become `_`
/// - leading/trailing spaces and trailing dots are stripped
/// - reserved base names get a leading underscore
/// - overlong names are trimmed ahead of the extension
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect();

    sanitized = sanitized.trim().trim_end_matches(['.', ' ']).to_string();

    let base = sanitized
        .rsplit_once('.')
        .map(|(base, _)| base)
        .unwrap_or(&sanitized);
    if RESERVED_NAMES.contains(&base.to_uppercase().as_str()) {
        sanitized = format!("_{sanitized}");
    }

    if sanitized.is_empty() {
        sanitized = "unnamed".to_string();
    }

    if sanitized.len() > MAX_COMPONENT_LEN {
        let (base, ext) = match sanitized.rsplit_once('.') {
            Some((base, ext)) if !ext.is_empty() => (base.to_string(), format!(".{ext}")),
            _ => (sanitized.clone(), String::new()),
        };
        let keep = MAX_COMPONENT_LEN.saturating_sub(ext.len());
        let mut cut = keep.min(base.len());
        while cut > 0 && !base.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{ext}", &base[..cut]);
    }

    sanitized
}

/// Sanitize each component of a relative path.
pub fn sanitize_relative_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize_filename)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_reserved_characters() {
        assert_eq!(sanitize_filename("a:b|c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename("x<y>z.pdf"), "x_y_z.pdf");
    }

    #[test]
    fn test_trailing_dots_and_spaces() {
        assert_eq!(sanitize_filename("report. "), "report");
        assert_eq!(sanitize_filename("  padded.txt"), "padded.txt");
        assert_eq!(sanitize_filename("dots..."), "dots");
    }

    #[test]
    fn test_reserved_names_prefixed() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("con.txt"), "_con.txt");
        assert_eq!(sanitize_filename("lpt3.log"), "_lpt3.log");
        // Not reserved: only exact base matches.
        assert_eq!(sanitize_filename("console.txt"), "console.txt");
    }

    #[test]
    fn test_empty_becomes_unnamed() {
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("???"), "___");
        assert_eq!(sanitize_filename("..."), "unnamed");
    }

    #[test]
    fn test_component_length_capped() {
        let long = format!("{}.txt", "x".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= 255);
        assert!(sanitized.ends_with(".txt"));
    }

    #[test]
    fn test_path_components_sanitized() {
        assert_eq!(
            sanitize_relative_path("a:b/c|d/file?.txt"),
            "a_b/c_d/file_.txt"
        );
        assert_eq!(sanitize_relative_path("ok/also ok.txt"), "ok/also ok.txt");
    }
}
