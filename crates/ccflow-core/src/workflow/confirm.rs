//! Transaction confirmation pipeline.
//!
//! Submitted transaction ids go into a bounded queue. One background task
//! drains it, holds a scoped tx-status registration per id, and forwards
//! each status as it commits. Submit and confirm are decoupled; a full queue
//! makes `enqueue` wait.

use crate::{
    ids::TxId,
    log,
    log::Topic,
    ops::event::{EventService, TxStatusEvent},
};
use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use std::collections::HashMap;
use thiserror::Error as ThisError;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

///
/// ConfirmError
///

#[derive(Debug, ThisError)]
pub enum ConfirmError {
    #[error("confirmation queue is closed")]
    QueueClosed,
}

///
/// ConfirmSummary
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConfirmSummary {
    pub confirmed: usize,
    pub abandoned: usize,
}

type Pending = BoxFuture<'static, (TxId, Option<TxStatusEvent>)>;

///
/// TxConfirmer
///

pub struct TxConfirmer {
    queue: mpsc::Sender<TxId>,
    confirmed: mpsc::Receiver<TxStatusEvent>,
    stash: HashMap<TxId, TxStatusEvent>,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<ConfirmSummary>,
}

impl TxConfirmer {
    /// Start the background listener. `capacity` bounds both the queue and
    /// the number of transactions awaited at once.
    #[must_use]
    pub fn spawn(events: EventService, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue, queue_rx) = mpsc::channel(capacity);
        let (confirmed_tx, confirmed) = mpsc::channel(capacity);
        let (cancel, cancel_rx) = oneshot::channel();

        let task = tokio::spawn(run(events, capacity, queue_rx, confirmed_tx, cancel_rx));

        Self {
            queue,
            confirmed,
            stash: HashMap::new(),
            cancel,
            task,
        }
    }

    /// Hand a submitted transaction to the listener; waits while the queue
    /// is full.
    pub async fn enqueue(&self, tx_id: TxId) -> Result<(), ConfirmError> {
        self.queue
            .send(tx_id)
            .await
            .map_err(|_| ConfirmError::QueueClosed)
    }

    /// Next confirmation in commit order, whatever the transaction.
    pub async fn next_confirmation(&mut self) -> Option<TxStatusEvent> {
        if let Some(tx_id) = self.stash.keys().next().cloned() {
            return self.stash.remove(&tx_id);
        }

        self.confirmed.recv().await
    }

    /// Wait for one transaction's status, keeping others for later callers.
    pub async fn wait_for(&mut self, tx_id: &TxId) -> Option<TxStatusEvent> {
        if let Some(status) = self.stash.remove(tx_id) {
            return Some(status);
        }

        while let Some(status) = self.confirmed.recv().await {
            if &status.tx_id == tx_id {
                return Some(status);
            }
            self.stash.insert(status.tx_id.clone(), status);
        }

        None
    }

    /// Stop listening and release every outstanding registration.
    pub async fn shutdown(self) -> ConfirmSummary {
        let Self {
            queue,
            confirmed,
            cancel,
            task,
            ..
        } = self;

        drop(queue);
        let _ = cancel.send(());
        drop(confirmed);

        match task.await {
            Ok(summary) => summary,
            Err(err) => {
                log!(Topic::Event, Error, "confirmation task failed: {err}");
                ConfirmSummary::default()
            }
        }
    }
}

async fn run(
    events: EventService,
    capacity: usize,
    mut queue: mpsc::Receiver<TxId>,
    confirmed: mpsc::Sender<TxStatusEvent>,
    mut cancel: oneshot::Receiver<()>,
) -> ConfirmSummary {
    let mut pending: FuturesUnordered<Pending> = FuturesUnordered::new();
    let mut summary = ConfirmSummary::default();
    let mut queue_open = true;

    loop {
        tokio::select! {
            _ = &mut cancel => break,

            Some((tx_id, status)) = pending.next(), if !pending.is_empty() => match status {
                Some(status) => {
                    summary.confirmed += 1;
                    log!(Topic::Event, Debug, "tx {tx_id} confirmed: {}", status.validation_code);
                    let _ = confirmed.send(status).await;
                }
                None => {
                    summary.abandoned += 1;
                    log!(Topic::Event, Warn, "tx {tx_id}: event stream ended before commit");
                }
            },

            next = queue.recv(), if queue_open && pending.len() < capacity => match next {
                Some(tx_id) => match events.register_tx_status(tx_id.clone()) {
                    Ok(mut registration) => {
                        let guard = events.guard(registration.id);
                        pending.push(
                            async move {
                                let status = registration.recv().await;
                                drop(guard);
                                (tx_id, status)
                            }
                            .boxed(),
                        );
                    }
                    Err(err) => {
                        summary.abandoned += 1;
                        log!(Topic::Event, Warn, "tx {tx_id}: cannot register status listener: {err}");
                    }
                },
                None => queue_open = false,
            },

            else => break,
        }
    }

    // dropping the pending futures drops their guards
    summary.abandoned += pending.len();
    drop(pending);

    summary
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{
        event::EventSettings,
        session::{Block, BlockTransaction, DeliveredBlock, ValidationCode},
    };
    use std::{sync::Arc, time::Duration};
    use tokio::{sync::broadcast, time::timeout};

    const WAIT: Duration = Duration::from_secs(2);

    fn commit(number: u64, tx: &str, code: ValidationCode) -> DeliveredBlock {
        DeliveredBlock {
            block: Arc::new(Block {
                number,
                data_hash: Vec::new(),
                previous_hash: Vec::new(),
                transactions: vec![BlockTransaction {
                    tx_id: TxId::new(tx),
                    validation_code: code,
                    chaincode_event: None,
                }],
            }),
            source: "peer0".to_string(),
        }
    }

    #[tokio::test]
    async fn confirms_and_releases_registrations() {
        let (upstream, rx) = broadcast::channel(16);
        let events = EventService::from_stream(rx, EventSettings::default());
        let mut confirmer = TxConfirmer::spawn(events.clone(), 4);

        confirmer.enqueue(TxId::new("tx1")).await.expect("enqueue");
        confirmer.enqueue(TxId::new("tx2")).await.expect("enqueue");

        // let the task register before the blocks commit
        tokio::time::sleep(Duration::from_millis(20)).await;
        upstream
            .send(commit(1, "tx2", ValidationCode::MvccReadConflict))
            .expect("send");
        upstream.send(commit(2, "tx1", ValidationCode::Valid)).expect("send");

        let tx1 = timeout(WAIT, confirmer.wait_for(&TxId::new("tx1")))
            .await
            .expect("tx1 confirmed")
            .expect("open");
        assert_eq!(tx1.validation_code, ValidationCode::Valid);

        let tx2 = timeout(WAIT, confirmer.next_confirmation())
            .await
            .expect("tx2 stashed")
            .expect("open");
        assert_eq!(tx2.validation_code, ValidationCode::MvccReadConflict);

        let summary = confirmer.shutdown().await;
        assert_eq!(summary.confirmed, 2);
        assert_eq!(events.registration_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_abandons_outstanding() {
        let (_upstream, rx) = broadcast::channel(16);
        let events = EventService::from_stream(rx, EventSettings::default());
        let confirmer = TxConfirmer::spawn(events.clone(), 2);

        confirmer.enqueue(TxId::new("never")).await.expect("enqueue");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let summary = confirmer.shutdown().await;
        assert_eq!(summary.abandoned, 1);
        assert_eq!(events.registration_count(), 0);
    }
}
