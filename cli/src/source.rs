//! JPEG frames read from a directory, in file-name order.

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;

use std::fs;
use std::path::{Path, PathBuf};

use frames::JpegFrame;

use crate::error::CliError;

#[derive(Debug)]
pub struct FrameSource {
    paths: std::vec::IntoIter<PathBuf>,
    total: usize,
}

impl FrameSource {
    /// Collect `*.jpg` / `*.jpeg` (any case) directly inside `dir`.
    ///
    /// # Errors
    ///
    /// [`CliError::Io`] if the directory cannot be read, [`CliError::NoFrames`]
    /// if it holds no JPEG files.
    pub fn from_dir(dir: &Path) -> Result<Self, CliError> {
        let entries = fs::read_dir(dir).map_err(|source| CliError::Io { path: dir.to_path_buf(), source })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CliError::Io { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            if path.is_file() && has_jpeg_extension(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(CliError::NoFrames(dir.to_path_buf()));
        }
        paths.sort();

        let total = paths.len();
        Ok(Self { paths: paths.into_iter(), total })
    }

    /// Number of frames found, including ones already read.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for FrameSource {
    type Item = Result<JpegFrame, CliError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(read_frame(&path))
    }
}

fn read_frame(path: &Path) -> Result<JpegFrame, CliError> {
    let bytes = fs::read(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    JpegFrame::new(bytes).map_err(|source| CliError::Frame { path: path.to_path_buf(), source })
}

fn has_jpeg_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}
