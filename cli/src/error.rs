use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("i/o failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no .jpg/.jpeg frames found in {}", .0.display())]
    NoFrames(PathBuf),
    #[error("invalid frame {}: {source}", path.display())]
    Frame {
        path: PathBuf,
        #[source]
        source: frames::FrameError,
    },
    #[error("endpoint must be a ws:// or wss:// URL, got `{0}`")]
    InvalidEndpoint(String),
    #[error("frame producer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("gave up after {attempts} reconnect attempts")]
    GaveUp { attempts: u32 },
}
