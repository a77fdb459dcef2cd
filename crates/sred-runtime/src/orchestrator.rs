//! Traduce un evento recibido en, a lo más, una transición sobre la
//! instancia (§4.7). Mantiene estadísticas de procesamiento y consulta, si
//! está configurado, un hook advisory de selección de transición (ver
//! `sred-policies`) puramente para auditoría: la decisión real sigue siendo
//! la del executor determinista.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sred_bus::{EventBus, TemporalScheduler};
use sred_core::engine::StepOutcome;
use sred_core::model::{Event, TemporalEvent};
use sred_policies::{CandidateTransition, PolicyInput, TransitionSelectionPolicy};
use sred_persistence::PersistenceAdapter;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::RuntimeError;
use crate::instance_manager::InstanceManager;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    pub total_events_processed: u64,
    pub successful_transitions: u64,
    pub failed_transitions: u64,
    pub average_processing_time_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

pub struct Orchestrator<P: PersistenceAdapter> {
    instances: Arc<InstanceManager<P>>,
    policy: Option<Arc<dyn TransitionSelectionPolicy>>,
    bus: Option<Arc<EventBus>>,
    scheduler: Option<Arc<TemporalScheduler>>,
    stats: AsyncMutex<OrchestratorStats>,
}

impl<P: PersistenceAdapter> Orchestrator<P> {
    pub fn new(instances: Arc<InstanceManager<P>>, policy: Option<Arc<dyn TransitionSelectionPolicy>>) -> Self {
        Self { instances, policy, bus: None, scheduler: None, stats: AsyncMutex::new(OrchestratorStats::default()) }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TemporalScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Enruta un `TemporalEvent` según su variante (§4.6/§4.7):
    /// `Synchronous` se procesa inline y devuelve el resultado; `Asynchronous`
    /// se publica en el bus y retorna de inmediato; `Deferred`/`Periodic` se
    /// entregan al scheduler temporal, que los publicará al bus cuando
    /// venzan. Si el colaborador correspondiente no está configurado, la
    /// entrada se descarta silenciosamente -- es responsabilidad del
    /// builder del engine cablear bus y scheduler cuando se usan.
    pub async fn dispatch(&self, instance_id: &str, temporal: TemporalEvent) -> Result<Option<StepOutcome>, RuntimeError> {
        match temporal {
            TemporalEvent::Synchronous(event) => {
                let outcome = self.handle_event(instance_id, &event.event_type.namespace, &event.name, event.payload).await?;
                Ok(Some(outcome))
            }
            TemporalEvent::Asynchronous(event) => {
                if let Some(bus) = &self.bus {
                    bus.publish(event).await?;
                }
                Ok(None)
            }
            deferred @ (TemporalEvent::Deferred { .. } | TemporalEvent::Periodic { .. }) => {
                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule(deferred).await;
                }
                Ok(None)
            }
        }
    }

    async fn advise(&self, instance_id: &str, event: &Event) {
        let Some(policy) = self.policy.as_ref() else { return };
        let Ok((flow, ctx)) = self.instances.load_instance(instance_id).await else { return };
        let declared: Vec<_> = flow.outgoing_transitions(&ctx.current_state_id).into_iter().cloned().collect();
        let candidates = CandidateTransition::from_declared(&declared);
        let input = PolicyInput { current_state_id: &ctx.current_state_id, event, context: &ctx, candidates: &candidates };
        if let Some(decision) = policy.rank(&input) {
            log::debug!("advisory policy `{}` ranked transitions for `{instance_id}`: {:?}", decision.policy_id, decision.ranked);
        }
    }

    /// Procesa un evento sobre una instancia. `next_state == None` tras un
    /// paso exitoso se reporta como `NoApplicableTransition`, un soft
    /// failure que no mutó la instancia más allá de lo ya committeado.
    pub async fn handle_event(
        &self,
        instance_id: &str,
        event_namespace: &str,
        event_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<StepOutcome, RuntimeError> {
        let started = Instant::now();
        self.advise(instance_id, &Event::new(event_namespace, event_name, payload.clone())).await;

        let result = self.instances.process(instance_id, event_namespace, event_name, payload).await;
        let classified = match result {
            Ok(outcome) if outcome.next_state.is_none() => Err(RuntimeError::NoApplicableTransition(instance_id.to_string())),
            other => other,
        };

        self.record(started.elapsed(), classified.is_ok()).await;
        classified
    }

    async fn record(&self, elapsed: Duration, success: bool) {
        let mut stats = self.stats.lock().await;
        stats.total_events_processed += 1;
        if success {
            stats.successful_transitions += 1;
        } else {
            stats.failed_transitions += 1;
        }
        stats.last_processed_at = Some(Utc::now());
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        stats.average_processing_time_ms += (elapsed_ms - stats.average_processing_time_ms) / stats.total_events_processed as f64;
    }

    pub async fn stats(&self) -> OrchestratorStats {
        self.stats.lock().await.clone()
    }

    pub fn instances(&self) -> &Arc<InstanceManager<P>> {
        &self.instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sred_core::handler::FnHandler;
    use sred_core::model::StepResult;
    use sred_core::workflow::{Condition, StateDefinition, TransitionDefinition, WorkflowBuilder};
    use sred_persistence::InMemoryPersistence;

    fn approval_flow() -> sred_core::workflow::WorkflowFlow {
        WorkflowBuilder::new("approval")
            .state(StateDefinition::initial("submitted", "Submitted"))
            .state(StateDefinition::terminal("approved", "Approved"))
            .transition(TransitionDefinition::new("submitted", "approved", Condition::Success, 0))
            .bind(
                "submitted",
                Arc::new(FnHandler(|_ctx, evt| {
                    if evt.name == "approve" {
                        Ok(StepResult::success(Default::default()))
                    } else {
                        Ok(StepResult::failure("not approved"))
                    }
                })),
            )
            .build()
            .unwrap()
    }

    async fn orchestrator() -> Orchestrator<InMemoryPersistence> {
        let instances = Arc::new(InstanceManager::new(Arc::new(InMemoryPersistence::new())));
        instances.register_workflow("approval", approval_flow()).await;
        Orchestrator::new(instances, None)
    }

    #[tokio::test]
    async fn a_matching_event_advances_the_instance_and_counts_as_success() {
        let orchestrator = orchestrator().await;
        orchestrator.instances().start("inst-1", Default::default(), None).await.unwrap();

        let outcome = orchestrator.handle_event("inst-1", "approval", "approve", Default::default()).await.unwrap();
        assert_eq!(outcome.next_state.as_deref(), Some("approved"));

        let stats = orchestrator.stats().await;
        assert_eq!(stats.total_events_processed, 1);
        assert_eq!(stats.successful_transitions, 1);
        assert_eq!(stats.failed_transitions, 0);
    }

    #[tokio::test]
    async fn an_event_with_no_declared_transition_is_a_soft_failure() {
        let orchestrator = orchestrator().await;
        orchestrator.instances().start("inst-2", Default::default(), None).await.unwrap();

        let err = orchestrator.handle_event("inst-2", "approval", "deny", Default::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NoApplicableTransition(id) if id == "inst-2"));

        let stats = orchestrator.stats().await;
        assert_eq!(stats.failed_transitions, 1);
    }

    #[tokio::test]
    async fn dispatching_a_synchronous_temporal_event_runs_it_inline() {
        let orchestrator = orchestrator().await;
        orchestrator.instances().start("inst-3", Default::default(), None).await.unwrap();

        let temporal = TemporalEvent::Synchronous(Event::new("approval", "approve", Default::default()));
        let outcome = orchestrator.dispatch("inst-3", temporal).await.unwrap().expect("synchronous dispatch resolves inline");
        assert_eq!(outcome.next_state.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn dispatching_asynchronous_without_a_configured_bus_is_a_noop() {
        let orchestrator = orchestrator().await;
        orchestrator.instances().start("inst-4", Default::default(), None).await.unwrap();

        let temporal = TemporalEvent::Asynchronous(Event::new("approval", "approve", Default::default()));
        let outcome = orchestrator.dispatch("inst-4", temporal).await.unwrap();
        assert!(outcome.is_none());
    }
}
