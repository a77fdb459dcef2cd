use std::fmt;
use std::sync::Arc;

use crate::model::{Event, StateContext, StateId, StepResult};

/// Datos disponibles para evaluar una `Condition`: el estado que se está
/// abandonando, el evento que disparó el paso, el contexto ya fusionado con
/// los datos del handler, y el `StepResult` producido por éste. Una única
/// forma de condición cubre tanto transiciones (`Success`/`Failure` sobre el
/// resultado) como ramas condicionales (que también pueden mirar el
/// contexto), evitando introducir un lenguaje de expresiones general.
pub struct DecisionContext<'a> {
    pub state_id: &'a str,
    pub event: &'a Event,
    pub context: &'a StateContext,
    pub result: &'a StepResult,
}

#[derive(Clone)]
pub enum Condition {
    Success,
    Failure,
    Custom(Arc<dyn Fn(&DecisionContext) -> bool + Send + Sync>),
}

impl Condition {
    pub fn matches(&self, dc: &DecisionContext) -> bool {
        match self {
            Condition::Success => dc.result.success,
            Condition::Failure => !dc.result.success,
            Condition::Custom(predicate) => predicate(dc),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Success => write!(f, "Condition::Success"),
            Condition::Failure => write!(f, "Condition::Failure"),
            Condition::Custom(_) => write!(f, "Condition::Custom(..)"),
        }
    }
}

/// Arista dirigida entre dos estados del mismo workflow.
#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    pub from: StateId,
    pub to: StateId,
    pub condition: Condition,
    pub priority: i32,
}

impl TransitionDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, condition: Condition, priority: i32) -> Self {
        Self { from: from.into(), to: to.into(), condition, priority }
    }
}
