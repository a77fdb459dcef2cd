//! Errores del core: construcción de workflow (§4.1) y ejecución de un paso
//! (§4.2). Los fallos de handler nunca llegan aquí: se capturan en
//! `StepResult` y dirigen la transición de Failure.

use thiserror::Error;

/// Errores de validación detectados en `WorkflowBuilder::build()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowBuildError {
    #[error("transition references unknown state `{0}`")]
    UnknownState(String),
    #[error("workflow has no initial state")]
    NoInitialState,
    #[error("workflow declares more than one initial state: `{0}` and `{1}`")]
    DuplicateInitialState(String, String),
    #[error("state `{0}` has an invalid timeout: must be null, -1, or a positive integer")]
    InvalidTimeout(String),
    #[error("state `{0}` declares a timeoutAction that references unknown state `{1}`")]
    InvalidTimeoutAction(String, String),
    #[error("conditional state `{0}` has no branch configuration")]
    MissingBranchConfig(String),
    #[error("parallel state `{0}` references unknown target state `{1}`")]
    UnknownParallelTarget(String, String),
}

/// Errores de invariantes internas del executor. Nunca surgen de fallos de
/// handler: esos se capturan como `StepResult { success: false, .. }`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("unknown state `{0}`")]
    UnknownState(String),
    #[error("conditional state `{0}` had no branch whose condition matched")]
    NoBranchMatched(String),
    #[error("internal executor error: {0}")]
    Internal(String),
}
