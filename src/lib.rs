//! sred: fachada pública que cablea `sred-core` + `sred-persistence` +
//! `sred-bus` + `sred-policies` + `sred-runtime` en un único punto de
//! entrada (§6). Nada aquí implementa lógica propia; `EngineBuilder` sólo
//! decide el orden de construcción y qué colaboradores son opcionales.

use std::sync::Arc;

pub use sred_bus::{EventBus, Listener, TemporalScheduler};
pub use sred_core::workflow::{WorkflowBuilder, WorkflowFlow};
pub use sred_persistence::{InMemoryPersistence, PersistenceAdapter};
pub use sred_policies::{DeclaredPriorityPolicy, TransitionSelectionPolicy};
pub use sred_runtime::{ControlPlane, InstanceManager, Orchestrator, RuntimeError, RunOutcome};

/// Ensambla un [`Engine`]. La persistencia es el único colaborador
/// obligatorio; bus, scheduler y política de selección son opcionales y, si
/// se omiten, el orquestador cae a su comportamiento declarado por defecto
/// (ver `sred-policies::DeclaredPriorityPolicy` y
/// `Orchestrator::dispatch`).
pub struct EngineBuilder<P: PersistenceAdapter> {
    persistence: Arc<P>,
    policy: Option<Arc<dyn TransitionSelectionPolicy>>,
    bus: Option<Arc<EventBus>>,
    scheduler: Option<Arc<TemporalScheduler>>,
    workflows: Vec<(String, WorkflowFlow)>,
}

impl<P: PersistenceAdapter + 'static> EngineBuilder<P> {
    pub fn new(persistence: Arc<P>) -> Self {
        Self { persistence, policy: None, bus: None, scheduler: None, workflows: Vec::new() }
    }

    pub fn with_policy(mut self, policy: Arc<dyn TransitionSelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TemporalScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn register_workflow(mut self, workflow_id: impl Into<String>, flow: WorkflowFlow) -> Self {
        self.workflows.push((workflow_id.into(), flow));
        self
    }

    pub async fn build(self) -> Engine<P> {
        let instances = Arc::new(InstanceManager::new(self.persistence));
        for (id, flow) in self.workflows {
            instances.register_workflow(id, flow).await;
        }

        let mut orchestrator = Orchestrator::new(instances.clone(), self.policy);
        if let Some(bus) = self.bus.clone() {
            orchestrator = orchestrator.with_bus(bus);
        }
        if let Some(scheduler) = self.scheduler.clone() {
            orchestrator = orchestrator.with_scheduler(scheduler);
        }

        let control_plane = ControlPlane::new(instances.clone(), self.bus);
        Engine { instances, orchestrator: Arc::new(orchestrator), control_plane: Arc::new(control_plane) }
    }
}

/// El engine ensamblado: instancias vivas, traducción evento→transición y el
/// sweeper de timeouts de pausa, todos apuntando a la misma persistencia.
pub struct Engine<P: PersistenceAdapter> {
    instances: Arc<InstanceManager<P>>,
    orchestrator: Arc<Orchestrator<P>>,
    control_plane: Arc<ControlPlane<P>>,
}

impl<P: PersistenceAdapter + 'static> Engine<P> {
    pub fn instances(&self) -> &Arc<InstanceManager<P>> {
        &self.instances
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<P>> {
        &self.orchestrator
    }

    pub async fn start_control_plane(&self) {
        self.control_plane.start().await;
    }

    pub async fn stop_control_plane(&self) {
        self.control_plane.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sred_core::handler::FnHandler;
    use sred_core::model::StepResult;
    use sred_core::workflow::{Condition, StateDefinition, TransitionDefinition};
    use std::collections::HashMap;

    fn approval_flow() -> WorkflowFlow {
        WorkflowBuilder::new("approval")
            .state(StateDefinition::initial("submitted", "Submitted"))
            .state(StateDefinition::terminal("approved", "Approved"))
            .transition(TransitionDefinition::new("submitted", "approved", Condition::Success, 0))
            .bind("submitted", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::success(Default::default())))))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn a_built_engine_processes_an_instance_end_to_end() {
        let engine = EngineBuilder::new(Arc::new(InMemoryPersistence::new()))
            .register_workflow("approval", approval_flow())
            .build()
            .await;

        engine.instances().start("inst-1", HashMap::new(), Some("approval")).await.unwrap();
        let outcome = engine.orchestrator().handle_event("inst-1", "approval", "submit", HashMap::new()).await.unwrap();
        assert_eq!(outcome.next_state.as_deref(), Some("approved"));
    }
}
