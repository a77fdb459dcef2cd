//! sred-persistence: el contrato de persistencia durable (§4.4) y sus dos
//! implementaciones.
//!
//! - `memory`: backend de referencia en memoria, usado por defecto y en
//!   tests.
//! - `pg`: backend Postgres (Diesel + r2d2), con paridad de comportamiento
//!   respecto al backend en memoria salvo donde el layout persistido de §6
//!   no cubre un campo transitorio (ver nota en `pg::ContextRow`).

pub mod config;
pub mod contract;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use contract::{ExportedContext, PersistenceAdapter, Severity, TransactionScope, ValidationIssue};
pub use error::PersistenceError;
pub use memory::InMemoryPersistence;
pub use pg::{build_dev_pool_from_env, build_pool, PgPersistence, PgPool};
