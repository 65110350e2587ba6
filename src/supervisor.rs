//! Supervisor primitives shared by the caster, server loop, and rover
//! coordinator: cancellation, bounded drop-on-full queues, and a reconnect
//! timer.

use std::time::Duration;

use tokio::sync::mpsc;
pub use tokio_util::sync::CancellationToken;

/// Default bound for a subscriber's byte-chunk channel.
pub const DEFAULT_CHUNK_CAPACITY: usize = 10;

/// Delay between reconnect attempts for the server publisher loop and the
/// rover's downlink session. Constant rather than exponential backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Send a chunk into a bounded channel without blocking. If the channel is
/// full, the chunk is dropped: a slow subscriber must never stall the
/// publisher.
pub fn try_send_chunk(tx: &mpsc::Sender<Vec<u8>>, chunk: Vec<u8>) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(chunk) {
        // Best-effort delivery; a full channel means a stalled subscriber.
    }
}

/// Build a bounded chunk channel of the configured capacity.
pub fn chunk_channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_on_full_does_not_block() {
        let (tx, mut rx) = chunk_channel(2);
        try_send_chunk(&tx, vec![1]);
        try_send_chunk(&tx, vec![2]);
        try_send_chunk(&tx, vec![3]); // dropped, channel full
        assert_eq!(rx.recv().await, Some(vec![1]));
        assert_eq!(rx.recv().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn cancellation_is_composable() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
