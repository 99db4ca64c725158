//! Change notifier
//!
//! Fans committed [`ChangeEvent`]s out to subscribers of a network. Every
//! subscriber owns a bounded channel; publishing never blocks the commit
//! that produced the events. When a subscriber's buffer is full, undelivered
//! events queue in a per-subscriber backlog that a background task flushes
//! with exponential backoff. Events for one subscriber are always delivered
//! in commit order. A subscriber that stays full past the retry budget loses
//! its backlog; since events are only hints, it recovers by re-fetching.

mod event;

pub use event::{ChangeEvent, ChangeKind};

use crate::config::NotifierConfig;
use crate::model::NetworkId;
use crate::monitoring::{MetricType, MetricsCollector};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Receiving end of a subscription
pub struct Subscription {
    id: u64,
    network_id: NetworkId,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Subscriber identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Network this subscription follows
    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    /// Wait for the next event; `None` once the network is closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Next buffered event, if any
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<ChangeEvent>,
    backlog: Mutex<VecDeque<ChangeEvent>>,
    retrying: AtomicBool,
    closed: AtomicBool,
}

impl Slot {
    fn backlog(&self) -> MutexGuard<'_, VecDeque<ChangeEvent>> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

enum Flush {
    Done,
    Pending,
    Closed(usize),
}

/// Per-network event fan-out
pub struct Notifier {
    config: NotifierConfig,
    subscribers: Mutex<HashMap<NetworkId, Vec<Arc<Slot>>>>,
    next_id: AtomicU64,
    metrics: Arc<MetricsCollector>,
}

impl Notifier {
    /// Create a notifier
    pub fn new(config: NotifierConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<NetworkId, Vec<Arc<Slot>>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Follow changes to a network
    pub fn subscribe(&self, network_id: NetworkId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let slot = Arc::new(Slot {
            id,
            tx,
            backlog: Mutex::new(VecDeque::new()),
            retrying: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let mut subscribers = self.subscribers();
        subscribers.entry(network_id).or_default().push(slot);
        self.refresh_gauge(&subscribers);
        debug!("Subscriber {} following network {}", id, network_id);

        Subscription { id, network_id, rx }
    }

    /// Stop delivering to a subscriber
    pub fn unsubscribe(&self, network_id: &NetworkId, id: u64) -> bool {
        let mut subscribers = self.subscribers();
        let removed = match subscribers.get_mut(network_id) {
            Some(slots) => {
                let before = slots.len();
                slots.retain(|slot| {
                    if slot.id == id {
                        slot.closed.store(true, Ordering::Release);
                        false
                    } else {
                        true
                    }
                });
                before != slots.len()
            }
            None => false,
        };
        self.refresh_gauge(&subscribers);
        removed
    }

    /// Drop every subscriber of a network
    pub fn close_network(&self, network_id: &NetworkId) {
        let mut subscribers = self.subscribers();
        if let Some(slots) = subscribers.remove(network_id) {
            for slot in &slots {
                slot.closed.store(true, Ordering::Release);
            }
            debug!("Closed {} subscriber(s) of network {}", slots.len(), network_id);
        }
        self.refresh_gauge(&subscribers);
    }

    /// Number of live subscribers of a network
    pub fn subscriber_count(&self, network_id: &NetworkId) -> usize {
        self.subscribers()
            .get(network_id)
            .map_or(0, |slots| slots.iter().filter(|s| !s.is_closed()).count())
    }

    /// Deliver events to every subscriber of their network
    pub fn publish(&self, events: &[ChangeEvent]) {
        for event in events {
            let slots: Vec<Arc<Slot>> = {
                let mut subscribers = self.subscribers();
                let Some(slots) = subscribers.get_mut(&event.network_id) else {
                    continue;
                };
                slots.retain(|slot| !slot.is_closed());
                let live = slots.clone();
                self.refresh_gauge(&subscribers);
                live
            };

            for slot in &slots {
                self.deliver(slot, event.clone());
            }
        }
    }

    fn deliver(&self, slot: &Arc<Slot>, event: ChangeEvent) {
        let mut backlog = slot.backlog();
        if !backlog.is_empty() {
            backlog.push_back(event);
            return;
        }

        match slot.tx.try_send(event) {
            Ok(()) => self.metrics.increment(MetricType::EventsDelivered),
            Err(TrySendError::Full(event)) => {
                backlog.push_back(event);
                drop(backlog);
                self.schedule_retry(slot);
            }
            Err(TrySendError::Closed(_)) => {
                slot.closed.store(true, Ordering::Release);
                self.metrics.increment(MetricType::EventsDropped);
            }
        }
    }

    fn schedule_retry(&self, slot: &Arc<Slot>) {
        if slot.retrying.swap(true, Ordering::AcqRel) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(retry_loop(
                    slot.clone(),
                    self.config.clone(),
                    self.metrics.clone(),
                ));
            }
            Err(_) => {
                let mut backlog = slot.backlog();
                warn!(
                    "No runtime to retry delivery; dropping {} event(s) for subscriber {}",
                    backlog.len(),
                    slot.id
                );
                for _ in 0..backlog.len() {
                    self.metrics.increment(MetricType::EventsDropped);
                }
                backlog.clear();
                slot.retrying.store(false, Ordering::Release);
            }
        }
    }

    fn refresh_gauge(&self, subscribers: &HashMap<NetworkId, Vec<Arc<Slot>>>) {
        let total: usize = subscribers.values().map(Vec::len).sum();
        self.metrics.record(MetricType::Subscribers, total as f64);
    }
}

async fn retry_loop(slot: Arc<Slot>, config: NotifierConfig, metrics: Arc<MetricsCollector>) {
    let mut backoff = config.initial_backoff;
    let mut attempts = 0u32;

    loop {
        tokio::time::sleep(backoff).await;

        let outcome = flush(&slot, &metrics);
        match outcome {
            Flush::Done => {
                debug!("Subscriber {} caught up", slot.id);
                return;
            }
            Flush::Closed(dropped) => {
                debug!(
                    "Subscriber {} went away with {} pending event(s)",
                    slot.id, dropped
                );
                return;
            }
            Flush::Pending => {}
        }

        attempts += 1;
        metrics.increment(MetricType::EventsRetried);
        if attempts >= config.max_retries {
            let mut backlog = slot.backlog();
            warn!(
                "Subscriber {} still full after {} retries; dropping {} event(s)",
                slot.id,
                attempts,
                backlog.len()
            );
            for _ in 0..backlog.len() {
                metrics.increment(MetricType::EventsDropped);
            }
            backlog.clear();
            slot.retrying.store(false, Ordering::Release);
            return;
        }
        backoff = backoff.saturating_mul(2);
    }
}

fn flush(slot: &Slot, metrics: &MetricsCollector) -> Flush {
    let mut backlog = slot.backlog();

    if slot.closed.load(Ordering::Acquire) {
        let dropped = backlog.len();
        backlog.clear();
        slot.retrying.store(false, Ordering::Release);
        return Flush::Closed(dropped);
    }

    while let Some(event) = backlog.pop_front() {
        match slot.tx.try_send(event) {
            Ok(()) => metrics.increment(MetricType::EventsDelivered),
            Err(TrySendError::Full(event)) => {
                backlog.push_front(event);
                return Flush::Pending;
            }
            Err(TrySendError::Closed(_)) => {
                let dropped = backlog.len() + 1;
                backlog.clear();
                slot.closed.store(true, Ordering::Release);
                slot.retrying.store(false, Ordering::Release);
                return Flush::Closed(dropped);
            }
        }
    }

    slot.retrying.store(false, Ordering::Release);
    Flush::Done
}
