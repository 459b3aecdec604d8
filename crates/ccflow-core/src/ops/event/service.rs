use super::{
    BlockEvent, ChaincodeEvent, EventError, EventKind, EventSettings, FilteredBlockEvent,
    RegistrationId, TxStatusEvent, cache::StatusCache,
};
use crate::{
    ids::{ChaincodeId, TxId},
    log,
    log::Topic,
    ops::session::{DeliveredBlock, Session},
};
use regex::Regex;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, oneshot,
    },
    task::JoinHandle,
};

///
/// Registration
/// Handle plus the receive side of one registration's delivery channel.
///

#[derive(Debug)]
pub struct Registration<T> {
    pub id: RegistrationId,
    pub events: mpsc::Receiver<T>,
}

impl<T> Registration<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }
}

///
/// RegistrationGuard
/// Unregisters on drop unless released explicitly first.
///

pub struct RegistrationGuard {
    service: EventService,
    id: Option<RegistrationId>,
}

impl RegistrationGuard {
    #[must_use]
    pub const fn id(&self) -> Option<RegistrationId> {
        self.id
    }

    pub fn release(mut self) -> Result<(), EventError> {
        match self.id.take() {
            Some(id) => self.service.unregister(id),
            None => Ok(()),
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.service.unregister(id);
        }
    }
}

//
// ─── Hub state ───
//

struct Entry {
    kind: EventKind,
    cancel: oneshot::Sender<()>,
}

struct HubState {
    // None once the upstream stream has ended or the service was closed
    stream: Option<broadcast::Sender<Arc<DeliveredBlock>>>,
    registrations: HashMap<RegistrationId, Entry>,
    statuses: StatusCache,
}

struct Shared {
    state: Mutex<HubState>,
    next_id: AtomicU64,
    settings: EventSettings,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Cache update and fan-out happen under one lock so a tx-status
    // registration sees a status either in the cache or on the stream.
    fn publish(&self, delivered: DeliveredBlock) {
        let delivered = Arc::new(delivered);
        let mut state = self.lock();

        for status in TxStatusEvent::all(&delivered) {
            state.statuses.insert(status);
        }
        if let Some(stream) = &state.stream {
            let _ = stream.send(delivered);
        }
    }

    fn end_stream(&self) {
        self.lock().stream = None;
    }
}

struct PumpHandle(JoinHandle<()>);

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

///
/// EventService
///
/// Multiplexes one committed-block stream onto independent registrations.
/// Each registration owns a bounded channel fed by its own task, so a slow
/// consumer only falls behind itself. Registrations live until
/// [`EventService::unregister`] (or a [`RegistrationGuard`]) releases them.
///
/// Register calls spawn tasks and must run inside a Tokio runtime.
///

#[derive(Clone)]
pub struct EventService {
    shared: Arc<Shared>,
    pump: Arc<PumpHandle>,
}

impl EventService {
    /// Open the session's block stream (newest block onward).
    pub async fn connect(session: &dyn Session, settings: EventSettings) -> Result<Self, EventError> {
        let upstream = session.deliver().await?;

        log!(
            Topic::Event,
            Info,
            "event service connected to {} on {}",
            session.context().org,
            session.context().channel
        );

        Ok(Self::from_stream(upstream, settings))
    }

    #[must_use]
    pub fn from_stream(
        upstream: broadcast::Receiver<DeliveredBlock>,
        settings: EventSettings,
    ) -> Self {
        let (stream, _) = broadcast::channel(settings.stream_capacity.max(1));
        let shared = Arc::new(Shared {
            state: Mutex::new(HubState {
                stream: Some(stream),
                registrations: HashMap::new(),
                statuses: StatusCache::new(settings.tx_status_cache),
            }),
            next_id: AtomicU64::new(1),
            settings,
        });

        let pump = tokio::spawn(pump(Arc::clone(&shared), upstream));

        Self {
            shared,
            pump: Arc::new(PumpHandle(pump)),
        }
    }

    pub fn register_block(&self) -> Result<Registration<BlockEvent>, EventError> {
        self.register(EventKind::Block, |_| Vec::new(), |d| {
            vec![BlockEvent::from(d)]
        })
    }

    pub fn register_filtered_block(&self) -> Result<Registration<FilteredBlockEvent>, EventError> {
        self.register(EventKind::FilteredBlock, |_| Vec::new(), |d| {
            vec![FilteredBlockEvent::from(d)]
        })
    }

    /// Status events for one transaction. A status committed shortly before
    /// registering is replayed from the cache.
    pub fn register_tx_status(&self, tx_id: TxId) -> Result<Registration<TxStatusEvent>, EventError> {
        let cached_id = tx_id.clone();

        self.register(
            EventKind::TxStatus,
            move |state| state.statuses.get(&cached_id).cloned().into_iter().collect(),
            move |d| {
                TxStatusEvent::all(d)
                    .filter(|status| status.tx_id == tx_id)
                    .collect()
            },
        )
    }

    /// Chaincode events from `chaincode_id` whose name matches `pattern`
    /// (unanchored regex; `.*` matches everything).
    pub fn register_chaincode_event(
        &self,
        chaincode_id: ChaincodeId,
        pattern: &str,
    ) -> Result<Registration<ChaincodeEvent>, EventError> {
        let filter = Regex::new(pattern).map_err(|err| EventError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;

        self.register(EventKind::ChaincodeEvent, |_| Vec::new(), move |d| {
            ChaincodeEvent::all(d)
                .filter(|ev| ev.chaincode_id == chaincode_id && filter.is_match(&ev.event_name))
                .collect()
        })
    }

    /// Stop delivery and release the registration. A second call for the
    /// same id returns [`EventError::NotRegistered`].
    pub fn unregister(&self, id: RegistrationId) -> Result<(), EventError> {
        let entry = self
            .shared
            .lock()
            .registrations
            .remove(&id)
            .ok_or(EventError::NotRegistered(id))?;
        let _ = entry.cancel.send(());

        log!(Topic::Event, Debug, "unregistered {} listener {id}", entry.kind);

        Ok(())
    }

    /// Wrap a registration id so it is released on every exit path.
    #[must_use]
    pub fn guard(&self, id: RegistrationId) -> RegistrationGuard {
        RegistrationGuard {
            service: self.clone(),
            id: Some(id),
        }
    }

    #[must_use]
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.shared.lock().registrations.contains_key(&id)
    }

    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.shared.lock().registrations.len()
    }

    /// Tear down: stop the upstream pump and release every registration.
    /// Returns how many registrations were still live.
    pub fn close(&self) -> usize {
        self.pump.0.abort();

        let released: Vec<Entry> = {
            let mut state = self.shared.lock();
            state.stream = None;
            state.registrations.drain().map(|(_, entry)| entry).collect()
        };
        let count = released.len();
        for entry in released {
            let _ = entry.cancel.send(());
        }

        if count > 0 {
            log!(Topic::Event, Warn, "event service closed with {count} live registrations");
        }

        count
    }

    fn register<T, B, F>(
        &self,
        kind: EventKind,
        backlog: B,
        select: F,
    ) -> Result<Registration<T>, EventError>
    where
        T: Send + 'static,
        B: FnOnce(&HubState) -> Vec<T>,
        F: FnMut(&DeliveredBlock) -> Vec<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.shared.settings.listener_buffer.max(1));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id = RegistrationId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        let (blocks, backlog) = {
            let mut state = self.shared.lock();
            let blocks = state
                .stream
                .as_ref()
                .ok_or(EventError::Closed)?
                .subscribe();
            let backlog = backlog(&*state);
            state.registrations.insert(
                id,
                Entry {
                    kind,
                    cancel: cancel_tx,
                },
            );

            (blocks, backlog)
        };

        tokio::spawn(forward(id, blocks, tx, cancel_rx, backlog, select));
        log!(Topic::Event, Debug, "registered {kind} listener {id}");

        Ok(Registration { id, events: rx })
    }
}

//
// ─── Tasks ───
//

async fn pump(shared: Arc<Shared>, mut upstream: broadcast::Receiver<DeliveredBlock>) {
    loop {
        match upstream.recv().await {
            Ok(delivered) => shared.publish(delivered),
            Err(RecvError::Lagged(skipped)) => {
                log!(Topic::Event, Warn, "block stream lagged; {skipped} blocks skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    shared.end_stream();
    log!(Topic::Event, Info, "block stream ended");
}

async fn forward<T, F>(
    id: RegistrationId,
    mut blocks: broadcast::Receiver<Arc<DeliveredBlock>>,
    tx: mpsc::Sender<T>,
    mut cancel: oneshot::Receiver<()>,
    backlog: Vec<T>,
    mut select: F,
) where
    T: Send + 'static,
    F: FnMut(&DeliveredBlock) -> Vec<T> + Send + 'static,
{
    for item in backlog {
        tokio::select! {
            _ = &mut cancel => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    loop {
        let delivered = tokio::select! {
            _ = &mut cancel => return,
            next = blocks.recv() => match next {
                Ok(delivered) => delivered,
                Err(RecvError::Lagged(skipped)) => {
                    log!(Topic::Event, Warn, "listener {id} fell behind; {skipped} blocks dropped");
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
        };

        for item in select(delivered.as_ref()) {
            tokio::select! {
                _ = &mut cancel => return,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::session::{Block, BlockTransaction, ChaincodeEventRecord, ValidationCode};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn block(number: u64, txs: &[(&str, ValidationCode, Option<&str>)]) -> DeliveredBlock {
        DeliveredBlock {
            block: Arc::new(Block {
                number,
                data_hash: vec![number as u8; 4],
                previous_hash: vec![number.saturating_sub(1) as u8; 4],
                transactions: txs
                    .iter()
                    .map(|(tx, code, event)| BlockTransaction {
                        tx_id: TxId::new(*tx),
                        validation_code: *code,
                        chaincode_event: event.map(|name| ChaincodeEventRecord {
                            chaincode_id: ChaincodeId::new("mycc"),
                            event_name: name.to_string(),
                            payload: name.as_bytes().to_vec(),
                        }),
                    })
                    .collect(),
            }),
            source: "peer0".to_string(),
        }
    }

    fn service(settings: EventSettings) -> (broadcast::Sender<DeliveredBlock>, EventService) {
        let (upstream, rx) = broadcast::channel(64);
        (upstream, EventService::from_stream(rx, settings))
    }

    #[tokio::test]
    async fn second_unregister_is_not_registered() {
        let (_upstream, events) = service(EventSettings::default());
        let reg = events.register_block().expect("register");

        events.unregister(reg.id).expect("first unregister");
        assert!(matches!(
            events.unregister(reg.id),
            Err(EventError::NotRegistered(id)) if id == reg.id
        ));
        assert_eq!(events.registration_count(), 0);
    }

    #[tokio::test]
    async fn unregister_closes_delivery() {
        let (_upstream, events) = service(EventSettings::default());
        let mut reg = events.register_block().expect("register");

        events.unregister(reg.id).expect("unregister");

        let next = timeout(WAIT, reg.recv()).await.expect("closed promptly");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn blocks_arrive_in_order() {
        let (upstream, events) = service(EventSettings::default());
        let mut reg = events.register_block().expect("register");

        for n in 1..=3 {
            upstream.send(block(n, &[])).expect("send");
        }

        for n in 1..=3 {
            let ev = timeout(WAIT, reg.recv()).await.expect("delivered").expect("open");
            assert_eq!(ev.number, n);
        }
    }

    #[tokio::test]
    async fn slow_consumer_does_not_stall_others() {
        let settings = EventSettings {
            listener_buffer: 1,
            ..EventSettings::default()
        };
        let (upstream, events) = service(settings);
        let _stalled = events.register_block().expect("register stalled");
        let mut live = events.register_filtered_block().expect("register live");

        for n in 1..=5 {
            upstream.send(block(n, &[])).expect("send");
        }

        for n in 1..=5 {
            let ev = timeout(WAIT, live.recv()).await.expect("not stalled").expect("open");
            assert_eq!(ev.number, n);
        }
    }

    #[tokio::test]
    async fn late_tx_status_registration_replays_cache() {
        let (upstream, events) = service(EventSettings::default());
        let mut blocks = events.register_block().expect("register");

        upstream
            .send(block(1, &[("tx1", ValidationCode::Valid, None)]))
            .expect("send");
        timeout(WAIT, blocks.recv()).await.expect("published");

        let mut status = events
            .register_tx_status(TxId::new("tx1"))
            .expect("register");
        let ev = timeout(WAIT, status.recv()).await.expect("replayed").expect("open");

        assert_eq!(ev.validation_code, ValidationCode::Valid);
        assert_eq!(ev.block_number, 1);
    }

    #[tokio::test]
    async fn chaincode_events_match_pattern() {
        let (upstream, events) = service(EventSettings::default());
        let mut all = events
            .register_chaincode_event(ChaincodeId::new("mycc"), ".*")
            .expect("register all");
        let mut sets = events
            .register_chaincode_event(ChaincodeId::new("mycc"), "^set$")
            .expect("register set");

        upstream
            .send(block(
                1,
                &[
                    ("tx1", ValidationCode::Valid, Some("get")),
                    ("tx2", ValidationCode::Valid, Some("set")),
                ],
            ))
            .expect("send");

        let first = timeout(WAIT, all.recv()).await.expect("all").expect("open");
        let second = timeout(WAIT, all.recv()).await.expect("all").expect("open");
        assert_eq!((first.event_name.as_str(), second.event_name.as_str()), ("get", "set"));

        let only = timeout(WAIT, sets.recv()).await.expect("set").expect("open");
        assert_eq!(only.tx_id, TxId::new("tx2"));
        assert_eq!(only.payload, b"set".to_vec());
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let (_upstream, events) = service(EventSettings::default());

        assert!(matches!(
            events.register_chaincode_event(ChaincodeId::new("mycc"), "("),
            Err(EventError::InvalidPattern { .. })
        ));
        assert_eq!(events.registration_count(), 0);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let (_upstream, events) = service(EventSettings::default());
        let reg = events.register_block().expect("register");

        {
            let _guard = events.guard(reg.id);
            assert!(events.is_registered(reg.id));
        }

        assert!(!events.is_registered(reg.id));
    }

    #[tokio::test]
    async fn close_releases_everything() {
        let (_upstream, events) = service(EventSettings::default());
        events.register_block().expect("register");
        events.register_filtered_block().expect("register");

        assert_eq!(events.close(), 2);
        assert!(matches!(events.register_block(), Err(EventError::Closed)));
    }
}
