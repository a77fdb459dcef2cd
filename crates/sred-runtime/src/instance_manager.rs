//! Dueño de las instancias vivas: media entre el llamador y el executor,
//! serializa mutaciones por instancia, y aplica la marca/limpieza de pausa
//! alrededor de cada paso (§4.3/§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use sred_core::engine::{StepExecutor, StepOutcome};
use sred_core::model::{Event, StateContext, StateHistoryEntry};
use sred_core::workflow::WorkflowFlow;
use sred_persistence::{PersistenceAdapter, TransactionScope};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::RuntimeError;

const WORKFLOW_ID_KEY: &str = "workflowId";

/// Resultado de `run_until_complete`: en qué condición se detuvo el loop.
pub enum RunOutcome {
    Completed(StepOutcome),
    Paused(StepOutcome),
    Waiting(StepOutcome),
    Failed(StepOutcome),
}

pub struct InstanceManager<P: PersistenceAdapter> {
    flows: DashMap<String, Arc<WorkflowFlow>>,
    default_workflow: AsyncMutex<Option<String>>,
    loaded: DashMap<String, String>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    persistence: Arc<P>,
    executor: StepExecutor,
}

impl<P: PersistenceAdapter> InstanceManager<P> {
    pub fn new(persistence: Arc<P>) -> Self {
        Self {
            flows: DashMap::new(),
            default_workflow: AsyncMutex::new(None),
            loaded: DashMap::new(),
            locks: DashMap::new(),
            persistence,
            executor: StepExecutor::new(),
        }
    }

    pub async fn register_workflow(&self, workflow_id: impl Into<String>, flow: WorkflowFlow) {
        let workflow_id = workflow_id.into();
        self.flows.insert(workflow_id.clone(), Arc::new(flow));
        let mut default = self.default_workflow.lock().await;
        if default.is_none() {
            *default = Some(workflow_id);
        }
    }

    /// Reemplaza el flujo asociado a `workflow_id` de forma atómica. Las
    /// instancias vivas conservan el `Arc` que ya resolvieron hasta su
    /// próximo `load_instance`.
    pub fn refresh_workflow(&self, workflow_id: impl Into<String>, flow: WorkflowFlow) {
        self.flows.insert(workflow_id.into(), Arc::new(flow));
    }

    pub async fn switch_workflow(&self, workflow_id: &str) -> Result<(), RuntimeError> {
        if !self.flows.contains_key(workflow_id) {
            return Err(RuntimeError::UnknownWorkflow(workflow_id.to_string()));
        }
        *self.default_workflow.lock().await = Some(workflow_id.to_string());
        Ok(())
    }

    fn lock_for(&self, instance_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(instance_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn flow_for(&self, instance_id: &str) -> Option<Arc<WorkflowFlow>> {
        let workflow_id = self.loaded.get(instance_id)?.clone();
        self.flows.get(&workflow_id).map(|f| f.clone())
    }

    pub async fn start(
        &self,
        instance_id: &str,
        initial_local_state: HashMap<String, Value>,
        workflow_id: Option<&str>,
    ) -> Result<StateContext, RuntimeError> {
        let workflow_id = match workflow_id {
            Some(id) => id.to_string(),
            None => self.default_workflow.lock().await.clone().ok_or_else(|| RuntimeError::UnknownWorkflow("<default>".into()))?,
        };
        let flow = self.flows.get(&workflow_id).map(|f| f.clone()).ok_or_else(|| RuntimeError::UnknownWorkflow(workflow_id.clone()))?;

        let mut ctx = StateContext::new(instance_id.to_string(), flow.initial_state_id()).merged_with(&initial_local_state);
        ctx.metadata.insert(WORKFLOW_ID_KEY.to_string(), Value::String(workflow_id.clone()));
        self.persistence.save_context(&ctx, None).await?;
        self.loaded.insert(instance_id.to_string(), workflow_id);
        Ok(ctx)
    }

    pub async fn load_instance(&self, instance_id: &str) -> Result<(Arc<WorkflowFlow>, StateContext), RuntimeError> {
        let ctx = self
            .persistence
            .load_context(instance_id, None)
            .await?
            .ok_or_else(|| RuntimeError::UnknownInstance(instance_id.to_string()))?;

        let workflow_id = match self.loaded.get(instance_id) {
            Some(w) => w.clone(),
            None => ctx
                .get_metadata(WORKFLOW_ID_KEY)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| RuntimeError::UnknownWorkflow(instance_id.to_string()))?,
        };
        let flow = self.flows.get(&workflow_id).map(|f| f.clone()).ok_or_else(|| RuntimeError::UnknownWorkflow(workflow_id.clone()))?;
        self.loaded.insert(instance_id.to_string(), workflow_id);
        Ok((flow, ctx))
    }

    /// Un paso completo bajo transacción: evento + contexto + historial
    /// comparten la misma `TransactionScope` y se confirman o descartan
    /// juntos (§4.4, atomicidad de `process`).
    async fn step_under_transaction(
        &self,
        flow: &WorkflowFlow,
        instance_id: &str,
        ctx: StateContext,
        event: Event,
        tx: &TransactionScope,
    ) -> Result<StepOutcome, RuntimeError> {
        let prior_was_paused = ctx.is_paused();

        self.persistence.save_event(instance_id, &event, Some(tx)).await?;
        let StepOutcome { next_state, mut context, result, history } = self.executor.step(flow, ctx, event).await?;

        if next_state.is_some() {
            if prior_was_paused {
                context = context.without_pause_markers();
            }
            if let Some(state_def) = flow.state(&context.current_state_id) {
                if state_def.pause_on_enter {
                    let timeout = flow.timeout_for(state_def);
                    context = context.with_pause_markers(&state_def.id, timeout);
                }
            }
        }

        self.persistence.save_context(&context, Some(tx)).await?;
        if let Some(entry) = &history {
            self.persistence.save_state_history(entry, Some(tx)).await?;
        }

        Ok(StepOutcome { next_state, context, result, history })
    }

    pub async fn process(
        &self,
        instance_id: &str,
        event_namespace: &str,
        event_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<StepOutcome, RuntimeError> {
        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;

        let (flow, ctx) = self.load_instance(instance_id).await?;
        let event = Event::new(event_namespace, event_name, payload);

        let tx = self.persistence.begin().await?;
        match self.step_under_transaction(&flow, instance_id, ctx, event, &tx).await {
            Ok(outcome) => {
                self.persistence.commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = self.persistence.rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Reprocesa el mismo evento disparador hasta que la instancia alcance
    /// un estado terminal, una pausa, o se quede sin transición aplicable.
    /// Pensado para flujos cuyas transiciones intermedias están totalmente
    /// guiadas por handlers, sin necesitar un evento externo distinto en
    /// cada paso.
    pub async fn run_until_complete(
        &self,
        instance_id: &str,
        event_namespace: &str,
        event_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<RunOutcome, RuntimeError> {
        loop {
            let outcome = self.process(instance_id, event_namespace, event_name, payload.clone()).await?;
            if !outcome.result.success {
                return Ok(RunOutcome::Failed(outcome));
            }

            let flow = self.flow_for(instance_id).ok_or_else(|| RuntimeError::UnknownInstance(instance_id.to_string()))?;
            let state_id = outcome.context.current_state_id.clone();
            if flow.is_terminal(&state_id) {
                return Ok(RunOutcome::Completed(outcome));
            }
            if flow.state(&state_id).map(|s| s.pause_on_enter).unwrap_or(false) {
                return Ok(RunOutcome::Paused(outcome));
            }
            if outcome.next_state.is_none() {
                return Ok(RunOutcome::Waiting(outcome));
            }
        }
    }

    pub async fn force_transition(&self, instance_id: &str, target_state_id: &str, reason: &str) -> Result<StateContext, RuntimeError> {
        let lock = self.lock_for(instance_id);
        let _guard = lock.lock().await;

        let (flow, ctx) = self.load_instance(instance_id).await?;
        let target_state_def = flow.state(target_state_id).ok_or_else(|| RuntimeError::UnknownState(target_state_id.to_string()))?;

        let from_state_id = ctx.current_state_id.clone();
        let prior_was_paused = ctx.is_paused();
        let mut new_ctx = ctx.with_current_state(target_state_id);
        if prior_was_paused {
            new_ctx = new_ctx.without_pause_markers();
        }
        if target_state_def.pause_on_enter {
            let timeout = flow.timeout_for(target_state_def);
            new_ctx = new_ctx.with_pause_markers(target_state_id, timeout);
        }
        let entry = StateHistoryEntry::new(instance_id.to_string(), Some(from_state_id), target_state_id.to_string(), None).with_reason(reason);

        let tx = self.persistence.begin().await?;
        let outcome: Result<(), RuntimeError> = async {
            self.persistence.save_context(&new_ctx, Some(&tx)).await?;
            self.persistence.save_state_history(&entry, Some(&tx)).await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                self.persistence.commit(tx).await?;
                Ok(new_ctx)
            }
            Err(err) => {
                let _ = self.persistence.rollback(tx).await;
                Err(err)
            }
        }
    }

    pub async fn update_metadata(&self, instance_id: &str, patch: HashMap<String, Value>) -> Result<StateContext, RuntimeError> {
        let (_, mut ctx) = self.load_instance(instance_id).await?;
        for (k, v) in patch {
            ctx.metadata.insert(k, v);
        }
        self.persistence.save_context(&ctx, None).await?;
        Ok(ctx)
    }

    pub async fn get_current_state(&self, instance_id: &str) -> Result<String, RuntimeError> {
        Ok(self.load_instance(instance_id).await?.1.current_state_id)
    }

    pub async fn get_context(&self, instance_id: &str) -> Result<StateContext, RuntimeError> {
        Ok(self.load_instance(instance_id).await?.1)
    }

    /// Ids de instancias actualmente pausadas, para que el control plane
    /// decida cuáles vencieron su timeout (§4.8).
    pub async fn find_paused_instances(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.persistence.find_paused_instances(None).await?)
    }

    pub fn stop(&self, instance_id: &str) {
        self.loaded.remove(instance_id);
        self.locks.remove(instance_id);
    }

    pub fn stop_all(&self) {
        self.loaded.clear();
        self.locks.clear();
    }
}
