//! Sweeper de timeouts: recorre periódicamente las instancias pausadas y,
//! para las que vencieron su `_pauseTimeout`, aplica el `timeoutAction`
//! declarado en el estado (§4.8). `timeout == -1` deshabilita el vencimiento.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sred_bus::EventBus;
use sred_core::model::{Event, StateContext};
use sred_core::workflow::TimeoutAction;
use sred_persistence::PersistenceAdapter;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::instance_manager::InstanceManager;

const DEFAULT_TICK: Duration = Duration::from_secs(5);
const FORCE_TRANSITION_REASON: &str = "timeout";

pub struct ControlPlane<P: PersistenceAdapter> {
    instances: Arc<InstanceManager<P>>,
    bus: Option<Arc<EventBus>>,
    tick: Duration,
    shutdown: AsyncMutex<Option<watch::Sender<bool>>>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<P: PersistenceAdapter + 'static> ControlPlane<P> {
    pub fn new(instances: Arc<InstanceManager<P>>, bus: Option<Arc<EventBus>>) -> Self {
        Self::with_tick(instances, bus, DEFAULT_TICK)
    }

    pub fn with_tick(instances: Arc<InstanceManager<P>>, bus: Option<Arc<EventBus>>, tick: Duration) -> Self {
        Self { instances, bus, tick, shutdown: AsyncMutex::new(None), worker: AsyncMutex::new(None) }
    }

    pub async fn start(&self) {
        let mut shutdown_guard = self.shutdown.lock().await;
        if shutdown_guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown_guard = Some(tx);

        let instances = self.instances.clone();
        let bus = self.bus.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => sweep(&instances, &bus).await,
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

fn pause_timeout_seconds(ctx: &StateContext) -> Option<i64> {
    match ctx.get_metadata("_pauseTimeout").and_then(Value::as_i64) {
        Some(-1) | None => None,
        Some(seconds) => Some(seconds),
    }
}

fn paused_at(ctx: &StateContext) -> Option<DateTime<Utc>> {
    ctx.get_metadata("_pausedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn paused_state(ctx: &StateContext) -> Option<String> {
    ctx.get_metadata("_pausedState").and_then(Value::as_str).map(str::to_string)
}

async fn sweep<P: PersistenceAdapter>(instances: &Arc<InstanceManager<P>>, bus: &Option<Arc<EventBus>>) {
    let Ok(paused_ids) = instances.find_paused_instances().await else { return };

    for instance_id in paused_ids {
        let Ok((flow, ctx)) = instances.load_instance(&instance_id).await else { continue };
        let Some(timeout_secs) = pause_timeout_seconds(&ctx) else { continue };
        let Some(since) = paused_at(&ctx) else { continue };
        if Utc::now().signed_duration_since(since).num_seconds() < timeout_secs {
            continue;
        }
        let Some(state_id) = paused_state(&ctx) else { continue };
        let Some(state_def) = flow.state(&state_id) else { continue };

        match &state_def.timeout_action {
            Some(TimeoutAction::Transition { target_state }) => {
                let _ = instances.force_transition(&instance_id, target_state, FORCE_TRANSITION_REASON).await;
            }
            Some(TimeoutAction::Event { event_type, event_name }) => {
                if let Some(bus) = bus {
                    let _ = bus.publish(Event::new(event_type, event_name, Default::default())).await;
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sred_core::handler::FnHandler;
    use sred_core::model::StepResult;
    use sred_core::workflow::{Condition, StateDefinition, TransitionDefinition, WorkflowBuilder};
    use sred_persistence::InMemoryPersistence;

    fn pausing_flow() -> sred_core::workflow::WorkflowFlow {
        WorkflowBuilder::new("approval")
            .state(StateDefinition::initial("submitted", "Submitted"))
            .state(
                StateDefinition::normal("waiting", "Waiting")
                    .pause_on_enter(true)
                    .timeout(1)
                    .timeout_action(TimeoutAction::Transition { target_state: "expired".into() }),
            )
            .state(StateDefinition::terminal("expired", "Expired"))
            .transition(TransitionDefinition::new("submitted", "waiting", Condition::Success, 0))
            .bind("submitted", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::success(Default::default())))))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn a_paused_instance_past_its_timeout_is_force_transitioned() {
        let instances = Arc::new(InstanceManager::new(Arc::new(InMemoryPersistence::new())));
        instances.register_workflow("approval", pausing_flow()).await;
        instances.start("inst-1", Default::default(), None).await.unwrap();
        instances.process("inst-1", "approval", "submit", Default::default()).await.unwrap();

        let ctx = instances.get_context("inst-1").await.unwrap();
        assert!(ctx.is_paused());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        sweep(&instances, &None).await;

        let ctx = instances.get_context("inst-1").await.unwrap();
        assert_eq!(ctx.current_state_id, "expired");
        assert!(!ctx.is_paused());
    }

    #[tokio::test]
    async fn an_instance_still_within_its_timeout_window_is_left_alone() {
        let instances = Arc::new(InstanceManager::new(Arc::new(InMemoryPersistence::new())));
        instances.register_workflow("approval", pausing_flow()).await;
        instances.start("inst-2", Default::default(), None).await.unwrap();
        instances.process("inst-2", "approval", "submit", Default::default()).await.unwrap();

        sweep(&instances, &None).await;

        let ctx = instances.get_context("inst-2").await.unwrap();
        assert_eq!(ctx.current_state_id, "waiting");
    }
}
