use super::frame::AccumulatedReply;
use super::tee::PumpEnd;
use crate::server::metrics;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum RelayOutcome {
    /// The upstream finished, with or without the sentinel.
    Completed(AccumulatedReply),
    /// The upstream body broke part-way; `partial` is what arrived before.
    UpstreamFailed {
        partial: AccumulatedReply,
        error: String,
    },
    /// The client left before the stream finished. Nothing is kept.
    Disconnected,
}

impl RelayOutcome {
    /// Text that should be saved as the assistant reply, if any.
    pub fn persistable_text(&self) -> Option<&str> {
        let text = match self {
            RelayOutcome::Completed(reply) => &reply.text,
            RelayOutcome::UpstreamFailed { partial, .. } => &partial.text,
            RelayOutcome::Disconnected => return None,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Completed(_) => "completed",
            RelayOutcome::UpstreamFailed { .. } => "upstream_error",
            RelayOutcome::Disconnected => "disconnected",
        }
    }
}

/// Client-facing body of a relay.
///
/// Dropping it before the relay has finished counts as a disconnect: the
/// upstream read is stopped and the pending reply is discarded.
pub struct ForwardStream {
    frames: mpsc::Receiver<Bytes>,
    client_gone: CancellationToken,
    finished: bool,
}

impl ForwardStream {
    pub(super) fn new(frames: mpsc::Receiver<Bytes>, client_gone: CancellationToken) -> Self {
        Self {
            frames,
            client_gone,
            finished: false,
        }
    }
}

impl Stream for ForwardStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ForwardStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Client stream dropped before completion");
            self.client_gone.cancel();
        }
    }
}

/// Resolves to the accumulated reply once the relay is over.
pub struct ReplyHandle {
    reply: oneshot::Receiver<AccumulatedReply>,
    pump: JoinHandle<PumpEnd>,
    client_gone: CancellationToken,
}

impl ReplyHandle {
    pub(super) fn new(
        reply: oneshot::Receiver<AccumulatedReply>,
        pump: JoinHandle<PumpEnd>,
        client_gone: CancellationToken,
    ) -> Self {
        Self {
            reply,
            pump,
            client_gone,
        }
    }

    /// Waits for the accumulated reply, but never past a client disconnect.
    pub async fn wait(mut self) -> RelayOutcome {
        let outcome = self.resolve().await;
        metrics::record_relay_session(outcome.label());
        match &outcome {
            RelayOutcome::Completed(reply) => {
                info!("Relay completed with {} characters", reply.text.chars().count())
            }
            RelayOutcome::UpstreamFailed { partial, error } => warn!(
                "Relay cut short by upstream ({}), {} characters kept",
                error,
                partial.text.chars().count()
            ),
            RelayOutcome::Disconnected => info!("Client disconnected, discarding reply"),
        }
        outcome
    }

    async fn resolve(&mut self) -> RelayOutcome {
        let reply = tokio::select! {
            biased;
            _ = self.client_gone.cancelled() => return RelayOutcome::Disconnected,
            reply = &mut self.reply => reply,
        };

        let end = tokio::select! {
            biased;
            _ = self.client_gone.cancelled() => return RelayOutcome::Disconnected,
            end = &mut self.pump => end,
        };

        let end = match end {
            Ok(end) => end,
            Err(e) => PumpEnd::UpstreamError(format!("relay task failed: {}", e)),
        };

        match (reply, end) {
            (_, PumpEnd::ClientGone) => RelayOutcome::Disconnected,
            (Ok(reply), PumpEnd::Finished) => RelayOutcome::Completed(reply),
            (Ok(partial), PumpEnd::UpstreamError(error)) => {
                RelayOutcome::UpstreamFailed { partial, error }
            }
            (Err(_), PumpEnd::Finished) | (Err(_), PumpEnd::UpstreamError(_)) => {
                RelayOutcome::UpstreamFailed {
                    partial: AccumulatedReply::default(),
                    error: "accumulator stopped without a result".to_string(),
                }
            }
        }
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        // Nobody is waiting for the reply any more.
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_empty_undisconnected_replies_are_persistable() {
        let reply = |text: &str| AccumulatedReply {
            text: text.to_string(),
            reached_sentinel: true,
        };

        assert_eq!(RelayOutcome::Completed(reply("hi")).persistable_text(), Some("hi"));
        assert_eq!(RelayOutcome::Completed(reply("")).persistable_text(), None);
        assert_eq!(
            RelayOutcome::UpstreamFailed {
                partial: reply("half"),
                error: "reset".into()
            }
            .persistable_text(),
            Some("half")
        );
        assert_eq!(RelayOutcome::Disconnected.persistable_text(), None);
    }

    #[tokio::test]
    async fn dropping_an_unfinished_stream_signals_disconnect() {
        let (_tx, rx) = mpsc::channel::<Bytes>(1);
        let gone = CancellationToken::new();
        drop(ForwardStream::new(rx, gone.clone()));
        assert!(gone.is_cancelled());
    }

    #[tokio::test]
    async fn draining_the_stream_is_not_a_disconnect() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel::<Bytes>(1);
        let gone = CancellationToken::new();
        let mut stream = ForwardStream::new(rx, gone.clone());
        tx.send(Bytes::from_static(b"data: x\n\n")).await.unwrap();
        drop(tx);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        drop(stream);
        assert!(!gone.is_cancelled());
    }
}
