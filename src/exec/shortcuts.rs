//! Cross-platform shortcut files for secondary duplicates.
//!
//! Three variants: a native symlink, an internet-shortcut text file, and
//! a desktop-entry text file. The `auto` strategy tries the symlink and
//! falls back to the internet shortcut.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutType {
    Symlink,
    Url,
    Desktop,
}

impl ShortcutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortcutType::Symlink => "symlink",
            ShortcutType::Url => "url",
            ShortcutType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutStrategy {
    Auto,
    Symlink,
    Url,
    Desktop,
}

/// Create a shortcut at `link_path` pointing at `target`. Returns the
/// type actually created and its final path (text formats append their
/// own extension).
pub fn create_shortcut(
    target: &Path,
    link_path: &Path,
    strategy: ShortcutStrategy,
) -> Result<(ShortcutType, PathBuf)> {
    match strategy {
        ShortcutStrategy::Symlink => {
            create_symlink(target, link_path).map(|p| (ShortcutType::Symlink, p))
        }
        ShortcutStrategy::Url => create_url(target, link_path).map(|p| (ShortcutType::Url, p)),
        ShortcutStrategy::Desktop => {
            create_desktop(target, link_path).map(|p| (ShortcutType::Desktop, p))
        }
        ShortcutStrategy::Auto => match create_symlink(target, link_path) {
            Ok(path) => Ok((ShortcutType::Symlink, path)),
            Err(e) => {
                tracing::debug!(error = %e, "symlink failed, falling back to .url");
                create_url(target, link_path).map(|p| (ShortcutType::Url, p))
            }
        },
    }
}

fn prepare_parent(link_path: &Path) -> Result<()> {
    if let Some(parent) = link_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn create_symlink(target: &Path, link_path: &Path) -> Result<PathBuf> {
    prepare_parent(link_path)?;
    if link_path.symlink_metadata().is_ok() {
        std::fs::remove_file(link_path)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link_path)
        .map_err(|e| PipelineError::io(format!("symlink {} failed: {e}", link_path.display())))?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target, link_path)
        .map_err(|e| PipelineError::io(format!("symlink {} failed: {e}", link_path.display())))?;

    Ok(link_path.to_path_buf())
}

fn file_url(target: &Path) -> String {
    let absolute = target
        .canonicalize()
        .unwrap_or_else(|_| target.to_path_buf());
    format!("file:///{}", absolute.display().to_string().trim_start_matches('/'))
}

fn create_url(target: &Path, link_path: &Path) -> Result<PathBuf> {
    let path = with_appended_extension(link_path, "url");
    prepare_parent(&path)?;
    let body = format!("[InternetShortcut]\nURL={}\n", file_url(target));
    std::fs::write(&path, body)
        .map_err(|e| PipelineError::io(format!("cannot write {}: {e}", path.display())))?;
    Ok(path)
}

fn create_desktop(target: &Path, link_path: &Path) -> Result<PathBuf> {
    let path = with_appended_extension(link_path, "desktop");
    prepare_parent(&path)?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "link".to_string());
    let body = format!(
        "[Desktop Entry]\nType=Link\nName={name}\nURL={}\n",
        file_url(target)
    );
    std::fs::write(&path, body)
        .map_err(|e| PipelineError::io(format!("cannot write {}: {e}", path.display())))?;
    Ok(path)
}

/// `a/b.pdf` + `url` -> `a/b.pdf.url`; existing matching extension is
/// kept as-is.
fn with_appended_extension(path: &Path, extension: &str) -> PathBuf {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case(extension) => path.to_path_buf(),
        _ => {
            let mut name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            name.push('.');
            name.push_str(extension);
            path.with_file_name(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_url_shortcut_body() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.pdf");
        std::fs::write(&target, b"data").unwrap();

        let (kind, path) =
            create_shortcut(&target, &dir.path().join("link.pdf"), ShortcutStrategy::Url).unwrap();
        assert_eq!(kind, ShortcutType::Url);
        assert!(path.to_string_lossy().ends_with("link.pdf.url"));

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("[InternetShortcut]\nURL=file:///"));
        assert!(body.ends_with("\n"));
        assert!(body.contains("target.pdf"));
    }

    #[test]
    fn test_desktop_shortcut_body() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("doc.txt");
        std::fs::write(&target, b"x").unwrap();

        let (kind, path) = create_shortcut(
            &target,
            &dir.path().join("doc.txt"),
            ShortcutStrategy::Desktop,
        )
        .unwrap();
        assert_eq!(kind, ShortcutType::Desktop);

        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            body,
            format!(
                "[Desktop Entry]\nType=Link\nName=doc.txt\nURL={}\n",
                super::file_url(&target)
            )
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_auto_prefers_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t.bin");
        std::fs::write(&target, b"x").unwrap();

        let (kind, path) =
            create_shortcut(&target, &dir.path().join("l.bin"), ShortcutStrategy::Auto).unwrap();
        assert_eq!(kind, ShortcutType::Symlink);
        assert_eq!(std::fs::read_link(&path).unwrap(), target);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_replaces_existing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t.bin");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("l.bin");
        std::fs::write(&link, b"stale").unwrap();

        let (kind, _) = create_shortcut(&target, &link, ShortcutStrategy::Symlink).unwrap();
        assert_eq!(kind, ShortcutType::Symlink);
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn test_extension_not_doubled() {
        assert_eq!(
            with_appended_extension(Path::new("a/b.url"), "url"),
            PathBuf::from("a/b.url")
        );
        assert_eq!(
            with_appended_extension(Path::new("a/b.pdf"), "url"),
            PathBuf::from("a/b.pdf.url")
        );
    }
}
