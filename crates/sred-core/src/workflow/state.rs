use serde::{Deserialize, Serialize};

use crate::model::StateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Initial,
    Normal,
    Final,
    Error,
}

/// Modo de ejecución de un estado (ver §4.2 del executor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Sequential,
    Conditional,
    Parallel,
    Join,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// Acción a aplicar cuando un estado supera su timeout sin ser abandonado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutAction {
    Transition { target_state: StateId },
    Event { event_type: String, event_name: String },
}

/// Rama de un estado `Conditional`. Entre las ramas cuya condición resulte
/// verdadera se elige la de mayor prioridad; empates se resuelven por orden
/// de declaración.
#[derive(Debug, Clone)]
pub struct BranchConfiguration {
    pub name: String,
    pub target_state_id: StateId,
    pub condition: super::Condition,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStrategy {
    All,
    Any,
    NCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStrategy {
    FailAll,
    IgnoreFailures,
    TolerateFailures,
}

#[derive(Debug, Clone)]
pub struct ParallelConfiguration {
    /// Pares `(branch_id, target_state_id)`, ejecutados concurrentemente sin
    /// orden definido entre sí.
    pub branches: Vec<(String, StateId)>,
    pub wait_strategy: WaitStrategy,
    pub timeout: Option<std::time::Duration>,
    pub error_strategy: ErrorStrategy,
}

#[derive(Debug, Clone)]
pub struct StateDefinition {
    pub id: StateId,
    pub name: String,
    pub state_type: StateType,
    pub parent_id: Option<StateId>,
    pub is_initial: bool,
    pub is_final: bool,
    pub is_error: bool,
    /// `None` hereda el valor por defecto del flujo (`FlowConfig::pauseable`).
    pub pauseable: Option<bool>,
    /// `None` = sin timeout, `Some(-1)` = ilimitado, `Some(n>0)` = límite en
    /// segundos. `Some(0)` es inválido y se rechaza en `build()`.
    pub timeout: Option<i64>,
    pub pause_on_enter: bool,
    pub timeout_action: Option<TimeoutAction>,
    pub execution_mode: ExecutionMode,
    pub branches: Option<Vec<BranchConfiguration>>,
    pub parallel: Option<ParallelConfiguration>,
}

impl StateDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, state_type: StateType) -> Self {
        let id = id.into();
        Self {
            id,
            name: name.into(),
            state_type,
            parent_id: None,
            is_initial: matches!(state_type, StateType::Initial),
            is_final: matches!(state_type, StateType::Final),
            is_error: matches!(state_type, StateType::Error),
            pauseable: None,
            timeout: None,
            pause_on_enter: false,
            timeout_action: None,
            execution_mode: ExecutionMode::Sequential,
            branches: None,
            parallel: None,
        }
    }

    pub fn is_terminal_by_flags(&self) -> bool {
        self.is_final || self.is_error
    }
}
