use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracker_core::{CoreError, ErrorExt, Severity};

/// Append-only fault log for one day.
///
/// The file is opened on the first entry, so a quiet day leaves no log file
/// behind. Writing never fails from the caller's point of view.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    file: Option<File>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn record(&mut self, error: &CoreError) {
        self.record_message(error.severity(), &error.error_code(), &error.to_string());
    }

    pub fn record_message(&mut self, severity: Severity, code: &str, message: &str) {
        let line = format!(
            "{} {} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            severity,
            code,
            single_line(message)
        );

        if let Err(e) = self.append(&line) {
            debug!("Could not write error log {}: {}", self.path.display(), e);
            // Reopen on the next entry in case the handle went bad.
            self.file = None;
        }
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }

        match self.file.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes())?;
                file.flush()
            }
            None => Ok(()),
        }
    }

    /// Closes the current file and sends later entries to `path`.
    pub fn redirect(&mut self, path: impl Into<PathBuf>) {
        self.close();
        self.path = path.into();
    }

    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ErrorLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn single_line(message: &str) -> String {
    message
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}
