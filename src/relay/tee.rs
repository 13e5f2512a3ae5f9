//! Reads an upstream completion body once and splits it two ways: framed
//! events for the client and raw chunks for reply accumulation.

use super::frame::{classify_line, AccumulatedReply, DeltaAccumulator, EventLine, LineDecoder};
use super::session::{ForwardStream, ReplyHandle};
use crate::server::metrics;
use crate::upstream::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the pump task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum PumpEnd {
    /// Sentinel forwarded or body exhausted.
    Finished,
    /// Reading the upstream body failed part-way.
    UpstreamError(String),
    /// The client went away before the upstream finished.
    ClientGone,
}

/// Starts relaying `upstream`.
///
/// Returns the client-facing stream and a handle resolving to the
/// accumulated reply. Both channels are bounded by `capacity`: a slow client
/// or a slow accumulator holds back reads from the upstream.
pub fn start(upstream: ByteStream, capacity: usize) -> (ForwardStream, ReplyHandle) {
    let capacity = capacity.max(1);
    let client_gone = CancellationToken::new();
    let (client_tx, client_rx) = mpsc::channel(capacity);
    let (acc_tx, acc_rx) = mpsc::channel(capacity);
    let (reply_tx, reply_rx) = oneshot::channel();

    let pump = tokio::spawn(pump(upstream, acc_tx, client_tx, client_gone.clone()));
    tokio::spawn(accumulate(acc_rx, reply_tx));

    (
        ForwardStream::new(client_rx, client_gone.clone()),
        ReplyHandle::new(reply_rx, pump, client_gone),
    )
}

async fn pump(
    mut upstream: ByteStream,
    acc_tx: mpsc::Sender<Bytes>,
    client_tx: mpsc::Sender<Bytes>,
    client_gone: CancellationToken,
) -> PumpEnd {
    let mut acc_tx = Some(acc_tx);
    let mut lines = LineDecoder::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = client_gone.cancelled() => return PumpEnd::ClientGone,
            next = upstream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!("Upstream stream read failed: {}", e);
                metrics::record_upstream_error("chat");
                return PumpEnd::UpstreamError(e.to_string());
            }
            None => {
                if let Some(line) = lines.finish() {
                    if let Err(end) = forward_line(&line, &client_tx, &client_gone).await {
                        return end;
                    }
                }
                debug!("Upstream stream ended without sentinel");
                return PumpEnd::Finished;
            }
        };

        // The accumulation copy goes first so the reply is never behind
        // what the client has seen.
        if let Some(tx) = &acc_tx {
            let sent = tokio::select! {
                biased;
                _ = client_gone.cancelled() => return PumpEnd::ClientGone,
                sent = tx.send(chunk.clone()) => sent,
            };
            if sent.is_err() {
                // Accumulator saw the sentinel and stopped.
                acc_tx = None;
            }
        }

        for line in lines.push(&chunk) {
            match forward_line(&line, &client_tx, &client_gone).await {
                Ok(true) => return PumpEnd::Finished,
                Ok(false) => {}
                Err(end) => return end,
            }
        }
    }
}

/// Forwards a data line to the client; returns whether it was the sentinel.
async fn forward_line(
    line: &str,
    client_tx: &mpsc::Sender<Bytes>,
    client_gone: &CancellationToken,
) -> Result<bool, PumpEnd> {
    let is_done = match classify_line(line) {
        EventLine::Ignored => return Ok(false),
        EventLine::Data(_) => false,
        EventLine::Done => true,
    };

    let frame = Bytes::from(format!("{}\n\n", line));
    let sent = tokio::select! {
        biased;
        _ = client_gone.cancelled() => return Err(PumpEnd::ClientGone),
        sent = client_tx.send(frame) => sent,
    };
    if sent.is_err() {
        return Err(PumpEnd::ClientGone);
    }
    metrics::record_event_forwarded();
    Ok(is_done)
}

async fn accumulate(mut chunks: mpsc::Receiver<Bytes>, reply_tx: oneshot::Sender<AccumulatedReply>) {
    let mut accumulator = DeltaAccumulator::default();
    while let Some(chunk) = chunks.recv().await {
        if accumulator.feed(&chunk) {
            break;
        }
    }
    // The receiver is gone if the relay was abandoned.
    let _ = reply_tx.send(accumulator.finish());
}
