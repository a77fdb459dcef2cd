//! Tipos de datos inmutables del motor: identificadores, eventos, contexto de
//! instancia, resultado de paso, historial y snapshots.
//!
//! Invariante transversal: todas las actualizaciones de `StateContext`
//! producen un nuevo valor inmutable; el motor nunca muta un contexto
//! observado in place.

mod context;
mod event;
mod history;
mod ids;
mod priority;
mod snapshot;
mod step_result;
mod temporal;

pub use context::{StateContext, DEFAULT_RECENT_EVENTS_CAPACITY};
pub use event::{Event, EventType};
pub use history::StateHistoryEntry;
pub use ids::{EventId, InstanceId, StateId, WorkflowId};
pub use priority::Priority;
pub use snapshot::StateSnapshot;
pub use step_result::StepResult;
pub use temporal::TemporalEvent;
