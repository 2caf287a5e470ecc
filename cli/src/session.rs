//! Native streaming session: paced uploads over tokio-tungstenite.
//!
//! SYSTEM CONTEXT
//! ==============
//! Drives the same [`ConnectionCore`] the browser client uses. A spawned
//! producer paces frames at the configured cadence and hands them to the
//! socket pump through an unbounded channel; the pump forwards them while the
//! socket is open and routes every inbound message through `route_inbound`.
//!
//! ERROR HANDLING
//! ==============
//! Socket failures never abort the session directly; they are reported to the
//! core as abnormal closures and the reconnect policy decides. Only a failed
//! producer task surfaces as an error.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::time::Duration;

use framecast::media::cadence::{Cadence, StreamStats, TickOutcome};
use framecast::net::backoff::ReconnectPolicy;
use framecast::net::connection::{CloseAction, ConnectionCore, ConnectionState};
use framecast::net::dispatch::{FrameSink, route_inbound};
use frames::{ABNORMAL_CLOSURE, Inbound, JpegFrame};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::CliError;

/// Close code reported when the peer closed without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub url: String,
    pub cadence: Cadence,
    pub policy: ReconnectPolicy,
}

/// How the session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Normal closure, from either side.
    Closed,
    /// Reconnect budget spent.
    GaveUp { attempts: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summary {
    pub end: SessionEnd,
    pub stats: StreamStats,
}

/// Stream `frames` to `options.url` and feed returned frames to `sink`.
///
/// # Errors
///
/// Returns [`CliError::Join`] if the producer task panicked.
pub async fn run<I, S>(options: SessionOptions, frames: I, sink: &mut S) -> Result<Summary, CliError>
where
    I: Iterator<Item = Result<JpegFrame, CliError>> + Send + 'static,
    S: FrameSink + ?Sized,
{
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let producer = tokio::spawn(produce(frames, options.cadence, state_rx, outbound_tx));

    let mut core = ConnectionCore::new(options.policy);
    core.start();
    let mut outbound_done = false;

    let end = loop {
        core.begin_attempt();
        state_tx.send_replace(core.state());

        let code = match connect_async(options.url.as_str()).await {
            Ok((stream, _response)) => {
                core.on_open();
                state_tx.send_replace(core.state());
                tracing::info!(url = %options.url, "WebSocket connection established.");
                let mut pump = Pump {
                    core: &mut core,
                    state_tx: &state_tx,
                    outbound: &mut outbound_rx,
                    outbound_done: &mut outbound_done,
                };
                pump.run(stream, sink).await
            }
            Err(error) => {
                tracing::warn!(url = %options.url, %error, "WebSocket error");
                core.on_error();
                ABNORMAL_CLOSURE
            }
        };

        let action = core.on_close(code);
        state_tx.send_replace(core.state());
        match action {
            CloseAction::Reconnect(delay) => {
                tracing::info!(
                    code,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt = core.attempts(),
                    "WebSocket connection closed; reconnecting"
                );
                if wait_or_finish(delay, &mut outbound_rx, &mut outbound_done).await {
                    core.request_close();
                    break SessionEnd::Closed;
                }
            }
            CloseAction::Stop => {
                tracing::info!(code, "WebSocket connection closed.");
                break SessionEnd::Closed;
            }
            CloseAction::GiveUp => {
                tracing::error!(attempts = core.attempts(), "Max reconnect attempts reached.");
                break SessionEnd::GaveUp { attempts: core.attempts() };
            }
        }
    };

    drop(state_tx);
    drop(outbound_rx);
    let stats = producer.await?;
    Ok(Summary { end, stats })
}

/// Sleep out a reconnect delay. Returns `true` if the producer finished meanwhile.
async fn wait_or_finish(
    delay: Duration,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    outbound_done: &mut bool,
) -> bool {
    if *outbound_done {
        return true;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return false,
            queued = outbound.recv() => match queued {
                Some(_stale) => tracing::debug!("dropping frame queued before disconnect"),
                None => {
                    *outbound_done = true;
                    return true;
                }
            },
        }
    }
}

/// Pace frames onto `outbound` while the connection is open.
async fn produce<I>(
    mut frames: I,
    cadence: Cadence,
    mut state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
) -> StreamStats
where
    I: Iterator<Item = Result<JpegFrame, CliError>>,
{
    let mut stats = StreamStats::default();
    if state.wait_for(|s| *s == ConnectionState::Open).await.is_err() {
        return stats;
    }

    let mut interval = tokio::time::interval(cadence.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick = 0_u64;

    loop {
        interval.tick().await;
        if state.has_changed().is_err() {
            break;
        }
        let Some(next) = frames.next() else {
            break;
        };

        let outcome = if !cadence.should_emit(tick) {
            TickOutcome::Skipped
        } else {
            match next {
                Err(error) => {
                    tracing::warn!(%error, "skipping unreadable frame");
                    TickOutcome::Failed
                }
                Ok(_) if *state.borrow_and_update() != ConnectionState::Open => TickOutcome::Dropped,
                Ok(frame) => {
                    if outbound.send(frame.into_bytes()).is_err() {
                        stats.record(TickOutcome::Dropped);
                        break;
                    }
                    TickOutcome::Sent
                }
            }
        };
        tick += 1;
        stats.record(outcome);
    }

    tracing::debug!(?stats, "frame producer finished");
    stats
}

/// One open socket's worth of session state.
struct Pump<'a> {
    core: &'a mut ConnectionCore,
    state_tx: &'a watch::Sender<ConnectionState>,
    outbound: &'a mut mpsc::UnboundedReceiver<Vec<u8>>,
    outbound_done: &'a mut bool,
}

impl Pump<'_> {
    /// Forward frames until the socket closes. Returns the close code.
    async fn run<W, S>(&mut self, stream: W, sink: &mut S) -> u16
    where
        W: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
        S: FrameSink + ?Sized,
    {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                outgoing = self.outbound.recv(), if !*self.outbound_done => match outgoing {
                    Some(jpeg) => {
                        if !self.core.can_send() {
                            continue;
                        }
                        if let Err(error) = write.send(Message::Binary(jpeg.into())).await {
                            return self.fail(&error);
                        }
                    }
                    None => {
                        *self.outbound_done = true;
                        self.core.request_close();
                        self.state_tx.send_replace(self.core.state());
                        let frame = CloseFrame { code: CloseCode::Normal, reason: "stream finished".into() };
                        if let Err(error) = write.send(Message::Close(Some(frame))).await {
                            return self.fail(&error);
                        }
                    }
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        route_inbound(Inbound::from_binary(bytes.to_vec()), sink);
                    }
                    Some(Ok(Message::Text(text))) => {
                        route_inbound(Inbound::from_text(text.as_str().to_owned()), sink);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return frame.map_or(NO_STATUS_RECEIVED, |frame| u16::from(frame.code));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return self.fail(&error),
                    None => return ABNORMAL_CLOSURE,
                },
            }
        }
    }

    fn fail(&mut self, error: &WsError) -> u16 {
        tracing::warn!(%error, "WebSocket error");
        self.core.on_error();
        self.state_tx.send_replace(self.core.state());
        ABNORMAL_CLOSURE
    }
}
