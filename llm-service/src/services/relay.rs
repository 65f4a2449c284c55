//! Streaming relay: pumps a registered session into an HTTP response body.
//!
//! The relay owns the session's [`SessionLease`]. Whichever way the body ends
//! (the producer is exhausted, the producer fails, or the client goes away and
//! the body is dropped) the lease is dropped with it and the registry entry
//! disappears.

use super::registry::{Pull, SessionLease};
use axum::body::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;

/// Lifecycle of one relayed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Open,
    Exhausted,
    Failed,
}

/// Body stream handed to the transport layer.
pub type StreamRelay = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

struct Relay {
    lease: Option<SessionLease>,
    state: RelayState,
    forwarded: usize,
}

/// Build the outgoing body for a leased session.
///
/// A producer failure ends the body with an error so the transport aborts
/// the response instead of finishing it cleanly. The response head and the
/// fragments already forwarded are flushed before the abort.
pub fn relay(lease: SessionLease) -> StreamRelay {
    let relay = Relay {
        lease: Some(lease),
        state: RelayState::Open,
        forwarded: 0,
    };

    Box::pin(futures::stream::unfold(relay, |mut relay| async move {
        let lease = relay.lease.take()?;

        match lease.pull().await {
            Ok(Pull::Fragment(fragment)) => {
                relay.forwarded += 1;
                relay.lease = Some(lease);
                Some((Ok(Bytes::from(fragment)), relay))
            }
            Ok(Pull::Exhausted) => {
                relay.state = RelayState::Exhausted;
                tracing::debug!(
                    session_id = %lease.id(),
                    fragments = relay.forwarded,
                    state = ?relay.state,
                    "Relay finished"
                );
                None
            }
            Err(e) => {
                relay.state = RelayState::Failed;
                tracing::warn!(
                    session_id = %lease.id(),
                    fragments = relay.forwarded,
                    state = ?relay.state,
                    error = %e,
                    "Relay aborted"
                );
                drop(lease);
                // hyper only flushes queued frames when the body is pending; an
                // error on the same poll discards them.
                tokio::task::yield_now().await;
                Some((Err(io::Error::other(e.to_string())), relay))
            }
        }
    }))
}
