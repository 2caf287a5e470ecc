//! Writes frames returned by the server to numbered files.

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;

use std::fs;
use std::path::PathBuf;

use framecast::net::dispatch::FrameSink;

use crate::error::CliError;

/// Counts received frames and, with an output directory, writes each one.
#[derive(Debug)]
pub struct FrameWriter {
    dir: Option<PathBuf>,
    received: u64,
    write_failures: u64,
}

impl FrameWriter {
    /// # Errors
    ///
    /// Returns [`CliError::Io`] if the output directory cannot be created.
    pub fn new(dir: Option<PathBuf>) -> Result<Self, CliError> {
        if let Some(dir) = &dir {
            fs::create_dir_all(dir).map_err(|source| CliError::Io { path: dir.clone(), source })?;
        }
        Ok(Self { dir, received: 0, write_failures: 0 })
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }
}

impl FrameSink for FrameWriter {
    fn accept(&mut self, jpeg: Vec<u8>) {
        self.received += 1;
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(frame_file_name(self.received));
        if let Err(error) = fs::write(&path, &jpeg) {
            self.write_failures += 1;
            tracing::warn!(path = %path.display(), %error, "failed to write received frame");
        }
    }
}

/// `frame-000001.jpg` for the first frame.
#[must_use]
pub fn frame_file_name(index: u64) -> String {
    format!("frame-{index:06}.jpg")
}
