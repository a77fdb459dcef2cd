//! El contrato de persistencia (§4.4): almacenamiento durable del contexto
//! por instancia más un log append-only de eventos, historial de estado y
//! snapshots, bajo un alcance transaccional opcional.
//!
//! Reemplaza los pares `EventStore`/`FlowRepository` separados de fuentes
//! orientadas a objetos por un único trait de superficie amplia: el core no
//! necesita distinguir "almacén de eventos" de "repositorio de flujo" porque
//! ambos viven detrás de la misma transacción lógica (ver invariante de
//! atomicidad de `process`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sred_core::model::{Event, StateContext, StateHistoryEntry, StateSnapshot};

use crate::error::PersistenceError;

/// Alcance transaccional opaco devuelto por `begin`. Los adaptadores son
/// libres de interpretar el id como quieran (nombre de savepoint, clave de
/// staging, etc.); el contrato sólo exige que se pueda pasar de vuelta a
/// `commit`/`rollback` y a cualquier llamada `tx: Option<&TransactionScope>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionScope {
    pub id: String,
}

impl TransactionScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into() }
    }
}

/// Snapshot portable de un contexto y su historia, usado por
/// `exportContext`/`importContext` para mover instancias entre procesos o
/// almacenes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedContext {
    pub ctx: StateContext,
    pub history: Vec<StateHistoryEntry>,
    pub snapshots: Vec<StateSnapshot>,
    pub meta: HashMap<String, serde_json::Value>,
    pub exported_at: DateTime<Utc>,
    pub source_instance: String,
    pub version: String,
}

/// Contrato durable detrás del instance manager. Toda escritura que admite
/// `tx` debe poder enrutarse a través de un `TransactionScope` abierto con
/// `begin`, de forma que `process` (§4.3) pueda comprometer
/// `saveEvent`+`saveContext`+`saveStateHistory` atómicamente.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save_context(&self, ctx: &StateContext, tx: Option<&TransactionScope>) -> Result<(), PersistenceError>;
    async fn load_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateContext>, PersistenceError>;
    async fn delete_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError>;
    /// Ids ordenados por `lastUpdatedAt` descendente.
    async fn list_context_ids(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError>;

    async fn save_event(&self, context_id: &str, event: &Event, tx: Option<&TransactionScope>) -> Result<(), PersistenceError>;
    async fn save_state_history(&self, entry: &StateHistoryEntry, tx: Option<&TransactionScope>) -> Result<(), PersistenceError>;
    /// Entradas en orden ascendente de timestamp.
    async fn get_state_history(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateHistoryEntry>, PersistenceError>;

    /// Ids de todos los contextos cuya metadata contiene `_pausedAt`.
    async fn find_paused_instances(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError>;

    async fn create_snapshot(
        &self,
        context_id: &str,
        description: Option<String>,
        tx: Option<&TransactionScope>,
    ) -> Result<StateSnapshot, PersistenceError>;
    async fn list_snapshots(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateSnapshot>, PersistenceError>;
    async fn load_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError>;
    /// El snapshot más reciente con `timestamp <= t`.
    async fn load_snapshot_by_time(&self, context_id: &str, t: DateTime<Utc>, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError>;
    /// Primero crea un snapshot del estado actual con descripción
    /// `"pre-rollback"`, luego reemplaza el contexto vivo por el snapshot
    /// objetivo (§8 propiedad de "Snapshot identity").
    async fn rollback_to_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<StateContext, PersistenceError>;
    async fn delete_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError>;

    /// Validación pura, sin I/O: id vacío/ausente, `currentStateId`
    /// vacío/inválido, valores `null` en metadata.
    fn validate_context(&self, ctx: &StateContext) -> Vec<ValidationIssue>;
    /// Reparación best-effort: estado actual inválido -> `"unknown"`;
    /// caracteres de id de estado fuera de `[A-Za-z0-9_]` se sanean.
    async fn repair_context(&self, id: &str, issues: &[ValidationIssue], tx: Option<&TransactionScope>) -> Result<StateContext, PersistenceError>;

    async fn export_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<ExportedContext, PersistenceError>;
    /// Conserva la identidad del contexto salvo que se indique `target_id`.
    async fn import_context(&self, exported: ExportedContext, target_id: Option<String>, tx: Option<&TransactionScope>) -> Result<String, PersistenceError>;

    async fn begin(&self) -> Result<TransactionScope, PersistenceError>;
    async fn commit(&self, tx: TransactionScope) -> Result<(), PersistenceError>;
    async fn rollback(&self, tx: TransactionScope) -> Result<(), PersistenceError>;

    /// Drena transacciones en curso (con rollback) y libera recursos.
    async fn close(&self) -> Result<(), PersistenceError>;
}

pub fn sanitize_state_id(raw: &str) -> String {
    let sanitized: String = raw.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
