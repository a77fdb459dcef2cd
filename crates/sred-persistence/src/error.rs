//! Errores de persistencia, compartidos entre el adaptador en memoria y el
//! adaptador Postgres. Mapea errores de Diesel a las variantes semánticas
//! requeridas por el contrato (§4.4 "Failure semantics").

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence backend temporarily unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("no such transaction scope `{0}`")]
    TransactionNotFound(String),
    #[error("adapter is closed")]
    AdapterClosed,
    #[error("context `{0}` not found")]
    ContextNotFound(String),
    #[error("snapshot `{0}` not found")]
    SnapshotNotFound(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("unknown persistence error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::ContextNotFound("<unspecified>".into()),
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => {
                    Self::PersistenceUnavailable(format!("serialization conflict: {}", info.message()))
                }
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::BrokenTransactionManager => {
                Self::PersistenceUnavailable("broken transaction manager".into())
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}
