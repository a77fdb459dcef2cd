use sred_core::errors::ExecutionError;
use sred_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown workflow `{0}`")]
    UnknownWorkflow(String),
    #[error("unknown instance `{0}`")]
    UnknownInstance(String),
    #[error("unknown state `{0}`")]
    UnknownState(String),
    #[error("no applicable transition for instance `{0}`")]
    NoApplicableTransition(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Bus(#[from] sred_bus::EventBusError),
}
