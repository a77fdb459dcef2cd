use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus is stopped")]
    EventBusStopped,
    #[error("no subscription with id `{0}`")]
    UnknownSubscription(String),
}
