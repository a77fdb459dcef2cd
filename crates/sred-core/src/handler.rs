//! Handlers: funciones por estado, suministradas por binders externos.
//!
//! Colapsa la jerarquía de subclases de "State" (`onEnter`/`onExit`/
//! `canHandle`) de fuentes orientadas a objetos en un único método, resuelto
//! por id de estado en vez de por herencia. La ausencia de un handler para un
//! estado significa "sin comportamiento": el paso se considera exitoso de
//! forma trivial (ver §4.2, modo SEQUENTIAL).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Event, StateContext, StepResult};

/// Contrato de un handler de estado. Los errores devueltos por `handle` se
/// capturan en el step boundary y se transforman en `StepResult { success:
/// false, .. }`: nunca se propagan como panic ni abortan el paso.
#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn handle(&self, ctx: &StateContext, event: &Event) -> anyhow::Result<StepResult>;
}

/// Adaptador para registrar closures síncronas como handlers, útil en tests y
/// en demos embebidos.
pub struct FnHandler<F>(pub F)
where
    F: Fn(&StateContext, &Event) -> anyhow::Result<StepResult> + Send + Sync;

#[async_trait]
impl<F> StateHandler for FnHandler<F>
where
    F: Fn(&StateContext, &Event) -> anyhow::Result<StepResult> + Send + Sync,
{
    async fn handle(&self, ctx: &StateContext, event: &Event) -> anyhow::Result<StepResult> {
        (self.0)(ctx, event)
    }
}

/// Resolver de handlers por nombre, poblado por el binder externo (ver §6:
/// "an external facility scans supplied objects for handler bindings").
/// Independiente del mapeo `stateId -> handler` que vive en `WorkflowFlow`:
/// este registro existe para que los binders puedan resolver una función por
/// nombre lógico antes de llamar a `flow.bind(stateId, handler)`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_name: HashMap<String, Arc<dyn StateHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StateHandler>) {
        self.by_name.insert(name.into(), handler);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn StateHandler>> {
        self.by_name.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(|s| s.as_str())
    }
}
