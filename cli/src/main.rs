mod error;
mod session;
mod sink;
mod source;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use framecast::config::{DEFAULT_ENDPOINT, DEFAULT_FPS};
use framecast::media::cadence::Cadence;
use framecast::net::backoff::ReconnectPolicy;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;
use crate::session::{SessionEnd, SessionOptions};
use crate::sink::FrameWriter;
use crate::source::FrameSource;

#[derive(Parser, Debug)]
#[command(name = "framecast", about = "Stream a directory of JPEG frames to a video WebSocket endpoint")]
struct Cli {
    #[arg(long, env = "FRAMECAST_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// Directory of `.jpg` / `.jpeg` frames, sent in file-name order.
    #[arg(long)]
    input: PathBuf,

    /// Write frames returned by the server here as `frame-NNNNNN.jpg`.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Send every Nth frame.
    #[arg(long, default_value_t = 1)]
    frame_skip: u32,

    #[arg(long, env = "FRAMECAST_MAX_ATTEMPTS", default_value_t = ReconnectPolicy::default().max_attempts)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "framecast failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if !(cli.url.starts_with("ws://") || cli.url.starts_with("wss://")) {
        return Err(CliError::InvalidEndpoint(cli.url));
    }

    let source = FrameSource::from_dir(&cli.input)?;
    tracing::info!(input = %cli.input.display(), frames = source.total(), url = %cli.url, "starting stream");

    let mut writer = FrameWriter::new(cli.output)?;
    let options = SessionOptions {
        url: cli.url,
        cadence: Cadence::new(cli.fps, cli.frame_skip),
        policy: ReconnectPolicy { max_attempts: cli.max_attempts, ..ReconnectPolicy::default() },
    };

    let summary = session::run(options, source, &mut writer).await?;
    tracing::info!(
        sent = summary.stats.sent,
        dropped = summary.stats.dropped,
        skipped = summary.stats.skipped,
        failed = summary.stats.failed,
        received = writer.received(),
        write_failures = writer.write_failures(),
        "stream finished"
    );

    match summary.end {
        SessionEnd::Closed => Ok(()),
        SessionEnd::GaveUp { attempts } => Err(CliError::GaveUp { attempts }),
    }
}
