//! Implementación Postgres (Diesel) del contrato de persistencia.
//!
//! Cada método async delega el trabajo bloqueante de Diesel a
//! `spawn_blocking`. Una transacción abierta con `begin` retiene una
//! conexión dedicada (bajo un `std::sync::Mutex`) entre llamadas, hasta
//! `commit`/`rollback`; sin `tx`, cada llamada toma una conexión fresca del
//! pool y no ve efectos de transacciones ajenas en curso.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use serde_json::Value;
use uuid::Uuid;

use sred_core::model::{Event, EventType, Priority, StateContext, StateHistoryEntry, StateSnapshot};

use crate::contract::{sanitize_state_id, ExportedContext, PersistenceAdapter, Severity, TransactionScope, ValidationIssue};
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{event_history, state_contexts, state_history, state_snapshots};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
type PooledConn = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let min = min_size.max(1).min(max_size.max(1));
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(min))
        .max_size(max_size.max(1))
        .build(manager)
        .map_err(|e| PersistenceError::PersistenceUnavailable(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::PersistenceUnavailable(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = state_contexts)]
struct ContextRow {
    id: String,
    current_state_id: String,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    local_state: Value,
    global_state: Value,
    metadata: Value,
}

impl ContextRow {
    fn from_context(ctx: &StateContext) -> Self {
        Self {
            id: ctx.id.clone(),
            current_state_id: ctx.current_state_id.clone(),
            created_at: ctx.created_at,
            last_updated_at: ctx.last_updated_at,
            local_state: serde_json::to_value(&ctx.local_state).unwrap_or(Value::Null),
            global_state: serde_json::to_value(&ctx.global_state).unwrap_or(Value::Null),
            metadata: serde_json::to_value(&ctx.metadata).unwrap_or(Value::Null),
        }
    }

    /// `recent_events` no forma parte del layout persistido (§6): el
    /// contexto rehidratado desde Postgres siempre arranca con la ventana
    /// vacía, a diferencia del adaptador en memoria que preserva todo.
    fn into_context(self) -> StateContext {
        let mut ctx = StateContext::new(self.id, self.current_state_id);
        ctx.created_at = self.created_at;
        ctx.last_updated_at = self.last_updated_at;
        ctx.local_state = serde_json::from_value(self.local_state).unwrap_or_default();
        ctx.global_state = serde_json::from_value(self.global_state).unwrap_or_default();
        ctx.metadata = serde_json::from_value(self.metadata).unwrap_or_default();
        ctx
    }
}

#[derive(Insertable)]
#[diesel(table_name = event_history)]
struct NewEventRow<'a> {
    context_id: &'a str,
    event_id: &'a str,
    event_type: String,
    event_name: &'a str,
    event_data: Value,
    timestamp: DateTime<Utc>,
}

#[derive(Queryable)]
struct EventRow {
    #[allow(dead_code)]
    auto_id: i64,
    #[allow(dead_code)]
    context_id: String,
    event_id: String,
    #[allow(dead_code)]
    event_type: String,
    event_name: String,
    event_data: Value,
    timestamp: DateTime<Utc>,
}

impl EventRow {
    fn into_event(self) -> Option<Event> {
        let payload: HashMap<String, Value> = serde_json::from_value(self.event_data).ok()?;
        let (namespace, name) = self.event_type.split_once('.').unwrap_or(("event", self.event_name.as_str()));
        Some(Event {
            id: self.event_id,
            event_type: EventType::new(namespace, name, 1),
            name: self.event_name,
            description: None,
            timestamp: self.timestamp,
            source: "postgres".to_string(),
            priority: Priority::Normal,
            payload,
            metadata: HashMap::new(),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = state_history)]
struct NewHistoryRow<'a> {
    context_id: &'a str,
    from_state_id: Option<&'a str>,
    to_state_id: &'a str,
    event_id: Option<&'a str>,
    timestamp: DateTime<Utc>,
    reason: Option<&'a str>,
}

#[derive(Queryable)]
struct HistoryRow {
    #[allow(dead_code)]
    auto_id: i64,
    context_id: String,
    from_state_id: Option<String>,
    to_state_id: String,
    event_id: Option<String>,
    timestamp: DateTime<Utc>,
    reason: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> StateHistoryEntry {
        StateHistoryEntry {
            timestamp: self.timestamp,
            from_state_id: self.from_state_id,
            to_state_id: self.to_state_id,
            event_id: self.event_id,
            context_id: self.context_id,
            reason: self.reason,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = state_snapshots)]
struct NewSnapshotRow<'a> {
    snapshot_id: &'a str,
    context_id: &'a str,
    timestamp: DateTime<Utc>,
    description: Option<&'a str>,
    local_state: Value,
    global_state: Value,
    snapshot_metadata: Value,
    current_state_id: &'a str,
    context_created_at: DateTime<Utc>,
}

#[derive(Queryable)]
struct SnapshotRow {
    snapshot_id: String,
    context_id: String,
    timestamp: DateTime<Utc>,
    description: Option<String>,
    local_state: Value,
    global_state: Value,
    snapshot_metadata: Value,
    current_state_id: String,
    context_created_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> StateSnapshot {
        let mut ctx = StateContext::new(self.context_id.clone(), self.current_state_id);
        ctx.created_at = self.context_created_at;
        ctx.last_updated_at = self.timestamp;
        ctx.local_state = serde_json::from_value(self.local_state).unwrap_or_default();
        ctx.global_state = serde_json::from_value(self.global_state).unwrap_or_default();
        StateSnapshot {
            snapshot_id: self.snapshot_id,
            context_id: self.context_id,
            timestamp: self.timestamp,
            description: self.description,
            context: ctx,
            metadata: serde_json::from_value(self.snapshot_metadata).unwrap_or_default(),
        }
    }
}

enum Handle {
    Pooled(PgPool),
    Txn(Arc<StdMutex<PooledConn>>),
}

impl Handle {
    fn with_conn<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T, PersistenceError>) -> Result<T, PersistenceError> {
        match self {
            Handle::Pooled(pool) => {
                let mut conn = pool.get().map_err(|e| PersistenceError::PersistenceUnavailable(format!("pool get: {e}")))?;
                f(&mut conn)
            }
            Handle::Txn(shared) => {
                let mut conn = shared.lock().expect("transaction connection mutex poisoned");
                f(&mut conn)
            }
        }
    }
}

/// Adaptador Postgres del contrato de persistencia.
pub struct PgPersistence {
    pool: PgPool,
    open_txns: DashMap<String, Arc<StdMutex<PooledConn>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl PgPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, open_txns: DashMap::new(), closed: std::sync::atomic::AtomicBool::new(false) }
    }

    fn handle_for(&self, tx: Option<&TransactionScope>) -> Result<Handle, PersistenceError> {
        match tx {
            None => Ok(Handle::Pooled(self.pool.clone())),
            Some(scope) => self
                .open_txns
                .get(&scope.id)
                .map(|entry| Handle::Txn(entry.clone()))
                .ok_or_else(|| PersistenceError::TransactionNotFound(scope.id.clone())),
        }
    }

    fn ensure_open(&self) -> Result<(), PersistenceError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            Err(PersistenceError::AdapterClosed)
        } else {
            Ok(())
        }
    }
}

macro_rules! blocking {
    ($self:expr, $tx:expr, $body:expr) => {{
        $self.ensure_open()?;
        let handle = $self.handle_for($tx)?;
        tokio::task::spawn_blocking(move || handle.with_conn($body))
            .await
            .map_err(|e| PersistenceError::Unknown(format!("blocking task join error: {e}")))?
    }};
}

#[async_trait::async_trait]
impl PersistenceAdapter for PgPersistence {
    async fn save_context(&self, ctx: &StateContext, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let row = ContextRow::from_context(ctx);
        blocking!(self, tx, move |conn: &mut PgConnection| {
            diesel::insert_into(state_contexts::table)
                .values(&row)
                .on_conflict(state_contexts::id)
                .do_update()
                .set(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
    }

    async fn load_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateContext>, PersistenceError> {
        let id = id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_contexts::table
                .find(&id)
                .first::<ContextRow>(conn)
                .optional()
                .map(|row| row.map(ContextRow::into_context))
                .map_err(PersistenceError::from)
        })
    }

    async fn delete_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let id = id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            diesel::delete(state_contexts::table.find(&id)).execute(conn).map(|_| ()).map_err(PersistenceError::from)
        })
    }

    async fn list_context_ids(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError> {
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_contexts::table
                .order(state_contexts::last_updated_at.desc())
                .select(state_contexts::id)
                .load(conn)
                .map_err(PersistenceError::from)
        })
    }

    async fn save_event(&self, context_id: &str, event: &Event, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let context_id = context_id.to_string();
        let event = event.clone();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            let row = NewEventRow {
                context_id: &context_id,
                event_id: &event.id,
                event_type: event.event_type.to_string(),
                event_name: &event.name,
                event_data: serde_json::to_value(&event.payload).unwrap_or(Value::Null),
                timestamp: event.timestamp,
            };
            diesel::insert_into(event_history::table).values(&row).execute(conn).map(|_| ()).map_err(PersistenceError::from)
        })
    }

    async fn save_state_history(&self, entry: &StateHistoryEntry, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let entry = entry.clone();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            let row = NewHistoryRow {
                context_id: &entry.context_id,
                from_state_id: entry.from_state_id.as_deref(),
                to_state_id: &entry.to_state_id,
                event_id: entry.event_id.as_deref(),
                timestamp: entry.timestamp,
                reason: entry.reason.as_deref(),
            };
            diesel::insert_into(state_history::table).values(&row).execute(conn).map(|_| ()).map_err(PersistenceError::from)
        })
    }

    async fn get_state_history(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateHistoryEntry>, PersistenceError> {
        let context_id = context_id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_history::table
                .filter(state_history::context_id.eq(&context_id))
                .order(state_history::timestamp.asc())
                .load::<HistoryRow>(conn)
                .map(|rows| rows.into_iter().map(HistoryRow::into_entry).collect())
                .map_err(PersistenceError::from)
        })
    }

    async fn find_paused_instances(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError> {
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_contexts::table
                .filter(diesel::dsl::sql::<diesel::sql_types::Bool>("metadata ? '_pausedAt'"))
                .select(state_contexts::id)
                .load(conn)
                .map_err(PersistenceError::from)
        })
    }

    async fn create_snapshot(&self, context_id: &str, description: Option<String>, tx: Option<&TransactionScope>) -> Result<StateSnapshot, PersistenceError> {
        let context = self.load_context(context_id, tx).await?.ok_or_else(|| PersistenceError::ContextNotFound(context_id.to_string()))?;
        let snapshot = StateSnapshot::new(context, description);
        blocking!(self, tx, move |conn: &mut PgConnection| {
            let row = NewSnapshotRow {
                snapshot_id: &snapshot.snapshot_id,
                context_id: &snapshot.context_id,
                timestamp: snapshot.timestamp,
                description: snapshot.description.as_deref(),
                local_state: serde_json::to_value(&snapshot.context.local_state).unwrap_or(Value::Null),
                global_state: serde_json::to_value(&snapshot.context.global_state).unwrap_or(Value::Null),
                snapshot_metadata: serde_json::to_value(&snapshot.metadata).unwrap_or(Value::Null),
                current_state_id: &snapshot.context.current_state_id,
                context_created_at: snapshot.context.created_at,
            };
            diesel::insert_into(state_snapshots::table)
                .values(&row)
                .execute(conn)
                .map(|_| snapshot)
                .map_err(PersistenceError::from)
        })
    }

    async fn list_snapshots(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateSnapshot>, PersistenceError> {
        let context_id = context_id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_snapshots::table
                .filter(state_snapshots::context_id.eq(&context_id))
                .order(state_snapshots::timestamp.asc())
                .load::<SnapshotRow>(conn)
                .map(|rows| rows.into_iter().map(SnapshotRow::into_snapshot).collect())
                .map_err(PersistenceError::from)
        })
    }

    async fn load_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError> {
        let context_id = context_id.to_string();
        let snapshot_id = snapshot_id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_snapshots::table
                .filter(state_snapshots::context_id.eq(&context_id))
                .filter(state_snapshots::snapshot_id.eq(&snapshot_id))
                .first::<SnapshotRow>(conn)
                .optional()
                .map(|row| row.map(SnapshotRow::into_snapshot))
                .map_err(PersistenceError::from)
        })
    }

    async fn load_snapshot_by_time(&self, context_id: &str, t: DateTime<Utc>, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError> {
        let context_id = context_id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            state_snapshots::table
                .filter(state_snapshots::context_id.eq(&context_id))
                .filter(state_snapshots::timestamp.le(t))
                .order(state_snapshots::timestamp.desc())
                .first::<SnapshotRow>(conn)
                .optional()
                .map(|row| row.map(SnapshotRow::into_snapshot))
                .map_err(PersistenceError::from)
        })
    }

    async fn rollback_to_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<StateContext, PersistenceError> {
        self.create_snapshot(context_id, Some("pre-rollback".to_string()), tx).await?;
        let target = self.load_snapshot(context_id, snapshot_id, tx).await?.ok_or_else(|| PersistenceError::SnapshotNotFound(snapshot_id.to_string()))?;
        self.save_context(&target.context, tx).await?;
        Ok(target.context)
    }

    async fn delete_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let context_id = context_id.to_string();
        let snapshot_id = snapshot_id.to_string();
        blocking!(self, tx, move |conn: &mut PgConnection| {
            diesel::delete(
                state_snapshots::table
                    .filter(state_snapshots::context_id.eq(&context_id))
                    .filter(state_snapshots::snapshot_id.eq(&snapshot_id)),
            )
            .execute(conn)
            .map(|_| ())
            .map_err(PersistenceError::from)
        })
    }

    fn validate_context(&self, ctx: &StateContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if ctx.id.trim().is_empty() {
            issues.push(ValidationIssue::new(Severity::Critical, "context is missing an id"));
        }
        if ctx.current_state_id.trim().is_empty() {
            issues.push(ValidationIssue::new(Severity::Error, "currentStateId is empty"));
        } else if ctx.current_state_id.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
            issues.push(ValidationIssue::new(Severity::Warning, format!("currentStateId `{}` has non-sanitized characters", ctx.current_state_id)));
        }
        for (k, v) in ctx.metadata.iter() {
            if v.is_null() {
                issues.push(ValidationIssue::new(Severity::Warning, format!("metadata key `{k}` has a null value")));
            }
        }
        issues
    }

    async fn repair_context(&self, id: &str, _issues: &[ValidationIssue], tx: Option<&TransactionScope>) -> Result<StateContext, PersistenceError> {
        let mut ctx = self.load_context(id, tx).await?.ok_or_else(|| PersistenceError::ContextNotFound(id.to_string()))?;
        ctx.current_state_id =
            if ctx.current_state_id.trim().is_empty() { "unknown".to_string() } else { sanitize_state_id(&ctx.current_state_id) };
        ctx.metadata.retain(|_, v| !v.is_null());
        self.save_context(&ctx, tx).await?;
        Ok(ctx)
    }

    async fn export_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<ExportedContext, PersistenceError> {
        let ctx = self.load_context(id, tx).await?.ok_or_else(|| PersistenceError::ContextNotFound(id.to_string()))?;
        let history = self.get_state_history(id, tx).await?;
        let snapshots = self.list_snapshots(id, tx).await?;
        Ok(ExportedContext {
            ctx,
            history,
            snapshots,
            meta: HashMap::new(),
            exported_at: Utc::now(),
            source_instance: id.to_string(),
            version: "1".to_string(),
        })
    }

    async fn import_context(&self, exported: ExportedContext, target_id: Option<String>, tx: Option<&TransactionScope>) -> Result<String, PersistenceError> {
        let new_id = target_id.unwrap_or_else(|| exported.ctx.id.clone());
        let mut ctx = exported.ctx;
        ctx.id = new_id.clone();
        self.save_context(&ctx, tx).await?;
        for mut entry in exported.history {
            entry.context_id = new_id.clone();
            self.save_state_history(&entry, tx).await?;
        }
        for mut snapshot in exported.snapshots {
            snapshot.context_id = new_id.clone();
            snapshot.context.id = new_id.clone();
            self.create_snapshot(&new_id, snapshot.description.clone(), tx).await?;
        }
        Ok(new_id)
    }

    async fn begin(&self) -> Result<TransactionScope, PersistenceError> {
        self.ensure_open()?;
        let pool = self.pool.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<PooledConn, PersistenceError> {
            let mut conn = pool.get().map_err(|e| PersistenceError::PersistenceUnavailable(format!("pool get: {e}")))?;
            conn.batch_execute("BEGIN").map_err(|e| PersistenceError::Unknown(format!("begin: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| PersistenceError::Unknown(format!("join error: {e}")))??;

        let id = Uuid::new_v4().to_string();
        self.open_txns.insert(id.clone(), Arc::new(StdMutex::new(conn)));
        Ok(TransactionScope::new(id))
    }

    async fn commit(&self, tx: TransactionScope) -> Result<(), PersistenceError> {
        let (_, shared) = self.open_txns.remove(&tx.id).ok_or_else(|| PersistenceError::TransactionNotFound(tx.id.clone()))?;
        tokio::task::spawn_blocking(move || {
            let mut conn = shared.lock().expect("transaction connection mutex poisoned");
            conn.batch_execute("COMMIT").map_err(|e| PersistenceError::Unknown(format!("commit: {e}")))
        })
        .await
        .map_err(|e| PersistenceError::Unknown(format!("join error: {e}")))?
    }

    async fn rollback(&self, tx: TransactionScope) -> Result<(), PersistenceError> {
        let (_, shared) = self.open_txns.remove(&tx.id).ok_or_else(|| PersistenceError::TransactionNotFound(tx.id.clone()))?;
        tokio::task::spawn_blocking(move || {
            let mut conn = shared.lock().expect("transaction connection mutex poisoned");
            conn.batch_execute("ROLLBACK").map_err(|e| PersistenceError::Unknown(format!("rollback: {e}")))
        })
        .await
        .map_err(|e| PersistenceError::Unknown(format!("join error: {e}")))?
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        let pending: Vec<String> = self.open_txns.iter().map(|e| e.key().clone()).collect();
        for id in pending {
            if let Some((_, shared)) = self.open_txns.remove(&id) {
                let _ = tokio::task::spawn_blocking(move || {
                    let mut conn = shared.lock().expect("transaction connection mutex poisoned");
                    conn.batch_execute("ROLLBACK")
                })
                .await;
            }
        }
        Ok(())
    }
}
