//! Bus de eventos: cola buffered single-producer/many-consumer con un pool
//! de workers acotado por `maxConcurrency` (§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sred_core::model::{Event, EventType};
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use uuid::Uuid;

use crate::error::EventBusError;
use crate::filter::EventFilter;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_CAPACITY: usize = 1024;

/// Destino de entrega. `on_event` puede fallar: un `Err` se trata igual que
/// un timeout, como fallo de entrega (ver `on_error`).
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_event(&self, event: &Event) -> Result<(), String>;
    async fn on_error(&self, event: &Event, err: &str);
}

struct Subscription {
    event_type: EventType,
    filter: Option<Arc<dyn EventFilter>>,
    listener: Arc<dyn Listener>,
}

#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub total_published: u64,
    pub total_processed: u64,
    pub active_subscriptions: usize,
    pub error_count: u64,
    pub average_processing_time_ms: f64,
}

struct StatsInner {
    total_published: AtomicU64,
    total_processed: AtomicU64,
    error_count: AtomicU64,
    average_processing_time_ms: Mutex<f64>,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            total_published: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            average_processing_time_ms: Mutex::new(0.0),
        }
    }
}

impl StatsInner {
    async fn record_processed(&self, elapsed_ms: f64) {
        let processed = self.total_processed.fetch_add(1, Ordering::SeqCst) + 1;
        let mut avg = self.average_processing_time_ms.lock().await;
        *avg += (elapsed_ms - *avg) / processed as f64;
    }
}

struct Shared {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    stats: StatsInner,
    delivery_timeout: Duration,
    max_concurrency: usize,
}

/// Pool de workers que drenan la cola y reparten eventos. `start` lo crea
/// de forma idempotente; `stop` cierra la cola y espera a que terminen las
/// entregas en vuelo, descartando lo que quedase encolado.
pub struct EventBus {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker_count: usize,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(worker_count: usize, max_concurrency: usize) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                subscriptions: RwLock::new(HashMap::new()),
                stats: StatsInner::default(),
                delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
                max_concurrency: max_concurrency.max(1),
            }),
            sender: Mutex::new(None),
            shutdown,
            shutdown_rx,
            worker_count: worker_count.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) {
        let mut sender_guard = self.sender.lock().await;
        if sender_guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        *sender_guard = Some(tx);
        let _ = self.shutdown.send(false);

        let rx = Arc::new(Mutex::new(rx));
        let semaphore = Arc::new(Semaphore::new(self.shared.max_concurrency));
        let mut handles = self.workers.lock().await;
        for _ in 0..self.worker_count {
            let rx = rx.clone();
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let event = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => None,
                            event = rx.recv() => event,
                        }
                    };
                    let Some(event) = event else { break };
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    dispatch(&shared, &semaphore, event).await;
                }
            }));
        }
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        *self.sender.lock().await = None;
        let mut handles = self.workers.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        let sender = self.sender.lock().await;
        match sender.as_ref() {
            Some(tx) => {
                self.shared.stats.total_published.fetch_add(1, Ordering::SeqCst);
                tx.send(event).await.map_err(|_| EventBusError::EventBusStopped)
            }
            None => Err(EventBusError::EventBusStopped),
        }
    }

    pub async fn subscribe(&self, event_type: EventType, listener: Arc<dyn Listener>, filter: Option<Arc<dyn EventFilter>>) -> String {
        let id = Uuid::new_v4().to_string();
        let subscription = Subscription { event_type, filter, listener };
        self.shared.subscriptions.write().await.insert(id.clone(), subscription);
        id
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<(), EventBusError> {
        self.shared
            .subscriptions
            .write()
            .await
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| EventBusError::UnknownSubscription(subscription_id.to_string()))
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            total_published: self.shared.stats.total_published.load(Ordering::SeqCst),
            total_processed: self.shared.stats.total_processed.load(Ordering::SeqCst),
            active_subscriptions: self.shared.subscriptions.read().await.len(),
            error_count: self.shared.stats.error_count.load(Ordering::SeqCst),
            average_processing_time_ms: *self.shared.stats.average_processing_time_ms.lock().await,
        }
    }
}

async fn dispatch(shared: &Arc<Shared>, semaphore: &Arc<Semaphore>, event: Event) {
    let matching: Vec<Arc<dyn Listener>> = {
        let subs = shared.subscriptions.read().await;
        subs.values()
            .filter(|s| s.event_type == event.event_type)
            .filter(|s| s.filter.as_ref().map_or(true, |f| f.matches(&event)))
            .map(|s| s.listener.clone())
            .collect()
    };

    let mut deliveries = Vec::with_capacity(matching.len());
    for listener in matching {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let shared = shared.clone();
        let event = event.clone();
        deliveries.push(tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let outcome = tokio::time::timeout(shared.delivery_timeout, listener.on_event(&event)).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            shared.stats.record_processed(elapsed_ms).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    shared.stats.error_count.fetch_add(1, Ordering::SeqCst);
                    listener.on_error(&event, &err).await;
                }
                Err(_) => {
                    shared.stats.error_count.fetch_add(1, Ordering::SeqCst);
                    listener.on_error(&event, "delivery timed out").await;
                }
            }
        }));
    }
    for d in deliveries {
        let _ = d.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::time::Duration as StdDuration;

    struct RecordingListener {
        delivered: UnboundedSender<String>,
        fail: bool,
    }

    #[async_trait]
    impl Listener for RecordingListener {
        async fn on_event(&self, event: &Event) -> Result<(), String> {
            if self.fail {
                return Err("boom".to_string());
            }
            let _ = self.delivered.send(event.name.clone());
            Ok(())
        }

        async fn on_error(&self, event: &Event, err: &str) {
            let _ = self.delivered.send(format!("error:{}:{}", event.name, err));
        }
    }

    fn sample_event(event_type: EventType) -> Event {
        Event {
            id: "evt-1".to_string(),
            event_type,
            name: "fired".to_string(),
            description: None,
            timestamp: chrono::Utc::now(),
            source: "test".to_string(),
            priority: sred_core::model::Priority::Normal,
            payload: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn publish_before_start_fails_with_event_bus_stopped() {
        let bus = EventBus::new(1, 1);
        let err = bus.publish(sample_event(EventType::new("ns", "evt", 1))).await.unwrap_err();
        assert_eq!(err, EventBusError::EventBusStopped);
    }

    #[tokio::test]
    async fn subscribed_listener_receives_matching_event() {
        let bus = EventBus::new(1, 4);
        bus.start().await;
        let (tx, mut rx) = unbounded_channel();
        let listener = Arc::new(RecordingListener { delivered: tx, fail: false });
        let event_type = EventType::new("ns", "evt", 1);
        bus.subscribe(event_type.clone(), listener, None).await;

        bus.publish(sample_event(event_type)).await.unwrap();
        let received = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some("fired".to_string()));

        bus.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let bus = EventBus::new(1, 4);
        bus.start().await;
        let (tx, mut rx) = unbounded_channel();
        let listener = Arc::new(RecordingListener { delivered: tx, fail: false });
        let event_type = EventType::new("ns", "evt", 1);
        let sub_id = bus.subscribe(event_type.clone(), listener, None).await;

        bus.unsubscribe(&sub_id).await.unwrap();
        bus.publish(sample_event(event_type)).await.unwrap();

        let received = tokio::time::timeout(StdDuration::from_millis(200), rx.recv()).await;
        assert!(received.is_err(), "no delivery expected after unsubscribe");

        bus.stop().await;
    }

    #[tokio::test]
    async fn handler_failure_invokes_on_error_and_counts_it() {
        let bus = EventBus::new(1, 4);
        bus.start().await;
        let (tx, mut rx) = unbounded_channel();
        let listener = Arc::new(RecordingListener { delivered: tx, fail: true });
        let event_type = EventType::new("ns", "evt", 1);
        bus.subscribe(event_type.clone(), listener, None).await;

        bus.publish(sample_event(event_type)).await.unwrap();
        let received = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some("error:fired:boom".to_string()));

        let stats = bus.stats().await;
        assert_eq!(stats.error_count, 1);

        bus.stop().await;
    }

    #[tokio::test]
    async fn filter_blocks_non_matching_events() {
        let bus = EventBus::new(1, 4);
        bus.start().await;
        let (tx, mut rx) = unbounded_channel();
        let listener = Arc::new(RecordingListener { delivered: tx, fail: false });
        let event_type = EventType::new("ns", "evt", 1);
        let filter: Arc<dyn EventFilter> = Arc::new(crate::filter::PriorityFloorFilter::new(sred_core::model::Priority::High));
        bus.subscribe(event_type.clone(), listener, Some(filter)).await;

        bus.publish(sample_event(event_type)).await.unwrap();
        let received = tokio::time::timeout(StdDuration::from_millis(200), rx.recv()).await;
        assert!(received.is_err(), "normal-priority event should be filtered out");

        bus.stop().await;
    }
}
