//! sred-core: state rotation + event-driven (SRED) execution primitives.
//!
//! Propósito:
//! - Proveer el modelo neutral (sin semántica de dominio) de estados,
//!   transiciones y contexto que describe un flujo de trabajo declarativo.
//! - Ejecutar un único evento contra una instancia (`(currentState, event,
//!   context) -> nextState`) de forma determinista, incluyendo fan-out
//!   paralelo, selección de rama condicional y fan-in de join.
//!
//! Componentes principales:
//! - `model`: tipos de datos inmutables (`Event`, `StateContext`,
//!   `StepResult`, `StateHistoryEntry`, `StateSnapshot`).
//! - `workflow`: definición de estados/transiciones (`WorkflowFlow`) y su
//!   builder con las invariantes de `build()`.
//! - `handler`: contrato de los handlers por estado y el registro por nombre.
//! - `engine`: el executor de un paso (`StepExecutor`).
//! - `hashing`: canonicalización JSON y hash estable, usado para fingerprints
//!   de snapshot y deduplicación de contenido.
//! - `errors`: taxonomía de errores de construcción y ejecución.

pub mod engine;
pub mod errors;
pub mod handler;
pub mod hashing;
pub mod model;
pub mod workflow;

pub use engine::{StepExecutor, StepOutcome};
pub use errors::{ExecutionError, WorkflowBuildError};
pub use handler::{HandlerRegistry, StateHandler};
pub use hashing::fingerprint_context;
pub use model::{
    Event, EventId, EventType, InstanceId, Priority, StateContext, StateHistoryEntry, StateId,
    StateSnapshot, StepResult, TemporalEvent, WorkflowId,
};
pub use workflow::{
    BranchConfiguration, Condition, ErrorStrategy, ExecutionMode, FlowConfig, ParallelConfiguration,
    StateDefinition, StateType, TimeoutAction, TransitionDefinition, WaitStrategy, WorkflowBuilder,
    WorkflowFlow,
};
