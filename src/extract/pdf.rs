//! PDF text extraction via the `pdftotext` command-line tool.
//!
//! The tool is invoked with an argument array (never through a shell) and
//! a hard per-file timeout enforced by a watchdog thread that kills the
//! child.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use super::{truncate_to_budget, TextExtractor};
use crate::error::{PipelineError, Result};

pub struct PdfExtractor {
    timeout: Duration,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path, budget: usize) -> Result<String> {
        let mut child = Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::unsupported("pdftotext not installed")
                } else {
                    PipelineError::io(format!("cannot spawn pdftotext: {e}"))
                }
            })?;

        let stdout = child.stdout.take();

        // Watchdog: kill the child if it outlives the timeout.
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let pid = child.id();
        let timeout = self.timeout;
        let watchdog = std::thread::spawn(move || {
            if done_rx.recv_timeout(timeout).is_err() {
                kill_child(pid);
                true
            } else {
                false
            }
        });

        let mut output = String::new();
        if let Some(mut out) = stdout {
            use std::io::Read;
            let mut limited = std::io::Read::take(&mut out, budget as u64 + 8);
            let _ = limited.read_to_string(&mut output);
            // Drain the rest so the child can exit.
            let mut sink = Vec::new();
            let _ = out.read_to_end(&mut sink);
        }

        let status = child
            .wait()
            .map_err(|e| PipelineError::io(format!("pdftotext wait failed: {e}")))?;
        let _ = done_tx.send(());
        let timed_out = watchdog.join().unwrap_or(false);

        if timed_out {
            return Err(PipelineError::io(format!(
                "pdftotext timed out after {:?} on {}",
                self.timeout,
                path.display()
            )));
        }

        if !status.success() {
            return Err(PipelineError::corrupt(format!(
                "pdftotext failed on {} (exit {:?})",
                path.display(),
                status.code()
            )));
        }

        Ok(truncate_to_budget(output, budget))
    }
}

/// Best-effort SIGKILL; the child handle itself is owned by the caller.
fn kill_child(pid: u32) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill").arg("-9").arg(pid.to_string()).status();
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_or_tool_fails_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.pdf");
        let result = PdfExtractor::default().extract(&path, 1024);
        // Either the tool is absent (unsupported) or it fails on the
        // missing file (corrupt); both are per-item errors, never a panic.
        let err = result.unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::Unsupported
                | crate::error::ErrorKind::Corrupt
                | crate::error::ErrorKind::Io
        ));
    }
}
