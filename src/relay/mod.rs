//! Streaming relay for chat completions.
//!
//! One upstream read feeds two consumers: the client, which receives every
//! `data:` event as it arrives, and an accumulator that rebuilds the full
//! reply for persistence. A client disconnect stops the upstream read and
//! discards the reply.

pub mod frame;
mod session;
mod tee;

pub use frame::{AccumulatedReply, DeltaAccumulator, FrameEvent, FrameParser};
pub use session::{ForwardStream, RelayOutcome, ReplyHandle};
pub use tee::start;

#[cfg(test)]
pub(crate) use tee::testing;
