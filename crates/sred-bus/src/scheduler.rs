//! Scheduler temporal: vence entradas `Deferred`/`Periodic` y las publica en
//! el bus cuando corresponde (§4.6). `Synchronous`/`Asynchronous` no pasan
//! por aquí, el llamador los entrega directamente al bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sred_core::model::TemporalEvent;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::bus::EventBus;

const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Programa eventos diferidos/periódicos y los entrega al `EventBus` cuando
/// vencen. `start` lanza un único worker de fondo; `schedule`/`cancel` son
/// seguros de llamar desde cualquier momento, antes o después de `start`.
pub struct TemporalScheduler {
    bus: Arc<EventBus>,
    entries: Arc<Mutex<HashMap<String, TemporalEvent>>>,
    tick: Duration,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TemporalScheduler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_tick(bus, DEFAULT_TICK)
    }

    pub fn with_tick(bus: Arc<EventBus>, tick: Duration) -> Self {
        Self {
            bus,
            entries: Arc::new(Mutex::new(HashMap::new())),
            tick,
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub async fn schedule(&self, temporal: TemporalEvent) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.lock().await.insert(id.clone(), temporal);
        id
    }

    pub async fn cancel(&self, id: &str) -> bool {
        self.entries.lock().await.remove(id).is_some()
    }

    pub async fn start(&self) {
        let mut shutdown_guard = self.shutdown.lock().await;
        if shutdown_guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown_guard = Some(tx);

        let entries = self.entries.clone();
        let bus = self.bus.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => sweep(&entries, &bus).await,
                }
            }
        });
        *self.worker.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn sweep(entries: &Arc<Mutex<HashMap<String, TemporalEvent>>>, bus: &Arc<EventBus>) {
    let now = Utc::now();
    let mut due = Vec::new();
    let mut reschedule = Vec::new();
    let mut expired = Vec::new();

    {
        let mut guard = entries.lock().await;
        for (id, temporal) in guard.iter() {
            match temporal {
                TemporalEvent::Deferred { event, scheduled_time } => {
                    if *scheduled_time <= now {
                        due.push(event.clone());
                        expired.push(id.clone());
                    }
                }
                TemporalEvent::Periodic { event, period, start, end, last_run } => {
                    if *start > now {
                        continue;
                    }
                    if let Some(end) = end {
                        if *end < now {
                            expired.push(id.clone());
                            continue;
                        }
                    }
                    let next_fire = last_run.map(|t| t + *period).unwrap_or(*start);
                    if next_fire <= now {
                        due.push(event.clone());
                        reschedule.push((id.clone(), now));
                    }
                }
                TemporalEvent::Synchronous(_) | TemporalEvent::Asynchronous(_) => {}
            }
        }
        for id in &expired {
            guard.remove(id);
        }
        for (id, fired_at) in reschedule {
            if let Some(TemporalEvent::Periodic { last_run, .. }) = guard.get_mut(&id) {
                *last_run = Some(fired_at);
            }
        }
    }

    for event in due {
        let _ = bus.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use sred_core::model::{Event, EventType, Priority};

    fn event(name: &str) -> Event {
        Event {
            id: "evt".to_string(),
            event_type: EventType::new("ns", name, 1),
            name: name.to_string(),
            description: None,
            timestamp: Utc::now(),
            source: "scheduler-test".to_string(),
            priority: Priority::Normal,
            payload: StdHashMap::new(),
            metadata: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn deferred_event_fires_once_past_scheduled_time() {
        let bus = Arc::new(EventBus::new(1, 2));
        bus.start().await;
        let scheduler = TemporalScheduler::with_tick(bus.clone(), Duration::from_millis(20));
        scheduler.start().await;

        scheduler
            .schedule(TemporalEvent::Deferred { event: event("due"), scheduled_time: Utc::now() - chrono::Duration::seconds(1) })
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(bus.stats().await.total_published, 1);
        assert!(scheduler.entries.lock().await.is_empty());

        scheduler.stop().await;
        bus.stop().await;
    }

    #[tokio::test]
    async fn cancel_removes_a_pending_entry() {
        let bus = Arc::new(EventBus::new(1, 2));
        let scheduler = TemporalScheduler::new(bus);
        let id = scheduler
            .schedule(TemporalEvent::Deferred { event: event("never"), scheduled_time: Utc::now() + chrono::Duration::hours(1) })
            .await;

        assert!(scheduler.cancel(&id).await);
        assert!(!scheduler.cancel(&id).await);
    }

    #[tokio::test]
    async fn periodic_event_reschedules_itself_until_end() {
        let bus = Arc::new(EventBus::new(1, 2));
        bus.start().await;
        let scheduler = TemporalScheduler::with_tick(bus.clone(), Duration::from_millis(20));
        scheduler.start().await;

        scheduler
            .schedule(TemporalEvent::Periodic {
                event: event("tick"),
                period: chrono::Duration::milliseconds(30),
                start: Utc::now() - chrono::Duration::seconds(1),
                end: Some(Utc::now() + chrono::Duration::milliseconds(60)),
                last_run: None,
            })
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bus.stats().await.total_published >= 2);

        scheduler.stop().await;
        bus.stop().await;
    }
}
