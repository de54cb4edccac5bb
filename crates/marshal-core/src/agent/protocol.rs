//! Streaming protocol writer.
//!
//! Sits between the engine's event channel and a transport connection,
//! stamping every event with a monotonically increasing sequence id so
//! consumers can detect gaps and reordering. Guarantees exactly one
//! terminal event per connection: whatever the engine side does, the
//! wire sees a single `done`, `cancelled`, or `error` and nothing after.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::AgentEvent;

/// One event as written to the wire, with its sequence id.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: AgentEvent,
}

/// Drain `rx` into `out`, stamping sequence ids starting at 1.
///
/// Stops after forwarding the first terminal event. If `cancel` fires
/// first, a `cancelled` terminal is written instead of whatever the
/// engine would have sent. If the engine side drops the channel without
/// a terminal event, an `error` terminal is synthesized so the consumer
/// never sees a silently truncated stream. A closed `out` means the
/// consumer disconnected: the token is fired so the engine side stops
/// instead of running an answer nobody will read. Returns the number of
/// events written.
pub async fn pump(
    mut rx: mpsc::UnboundedReceiver<AgentEvent>,
    out: mpsc::UnboundedSender<WireEvent>,
    cancel: CancellationToken,
) -> u64 {
    let mut seq = 0u64;
    let mut send = |event: AgentEvent, seq: &mut u64| {
        *seq += 1;
        out.send(WireEvent { seq: *seq, event }).is_ok()
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                send(AgentEvent::Cancelled, &mut seq);
                return seq;
            }
            next = rx.recv() => match next {
                Some(event) => {
                    let terminal = event.is_terminal();
                    if !send(event, &mut seq) {
                        // Consumer disconnected mid-stream.
                        cancel.cancel();
                        return seq;
                    }
                    if terminal {
                        return seq;
                    }
                }
                None => {
                    // Producer went away mid-stream.
                    send(
                        AgentEvent::Error {
                            error: "stream ended unexpectedly".to_string(),
                        },
                        &mut seq,
                    );
                    return seq;
                }
            },
        }
    }
}
