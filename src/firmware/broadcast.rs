//! Fan-out of build status events to per-build subscribers.
//!
//! Progress events for one build are coalesced: the first pending event
//! opens a window and only the latest event seen when it closes is
//! delivered. Terminal events skip the window and end the subscription.
//! Nothing is replayed to late subscribers.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::models::StatusEvent;

const BUS_CAPACITY: usize = 256;
const SUBSCRIBER_BUFFER: usize = 16;

pub type StatusStream = ReceiverStream<StatusEvent>;

pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
    window: Duration,
    shutdown: CancellationToken,
}

impl StatusBroadcaster {
    pub fn new(window: Duration) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            window,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish an event. Events with no subscriber are dropped.
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    /// Events for `build_id` from now on.
    pub fn subscribe(&self, build_id: &str) -> StatusStream {
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if self.shutdown.is_cancelled() {
            return ReceiverStream::new(out_rx);
        }
        tokio::spawn(forward(
            build_id.to_string(),
            self.tx.subscribe(),
            out_tx,
            self.window,
            self.shutdown.clone(),
        ));
        ReceiverStream::new(out_rx)
    }

    /// Close every subscription. Later subscriptions end immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Every published event, unfiltered and uncoalesced.
    #[cfg(test)]
    pub(crate) fn raw_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

async fn forward(
    build_id: String,
    mut rx: broadcast::Receiver<StatusEvent>,
    out: mpsc::Sender<StatusEvent>,
    window: Duration,
    shutdown: CancellationToken,
) {
    let mut pending: Option<StatusEvent> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                deliver_queued_terminal(&build_id, &mut rx, &out).await;
                break;
            }
            _ = out.closed() => break,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Some(event) = pending.take() {
                    if out.send(event).await.is_err() {
                        break;
                    }
                }
            }
            msg = rx.recv() => match msg {
                Ok(event) if event.build_id == build_id => {
                    if event.status.is_terminal() {
                        let _ = out.send(event).await;
                        break;
                    }
                    pending = Some(event);
                    deadline.get_or_insert_with(|| Instant::now() + window);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(build_id = %build_id, skipped, "Status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Hand over a terminal event for `build_id` that was published before
/// shutdown but not yet received.
async fn deliver_queued_terminal(
    build_id: &str,
    rx: &mut broadcast::Receiver<StatusEvent>,
    out: &mpsc::Sender<StatusEvent>,
) {
    loop {
        match rx.try_recv() {
            Ok(event) if event.build_id == build_id && event.status.is_terminal() => {
                let _ = out.send(event).await;
                return;
            }
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return,
        }
    }
}
