//! Adaptador en memoria: backend primario para tests y demos, y referencia
//! de comportamiento para el adaptador Postgres (deben tener paridad en
//! semántica, no sólo en firma).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use sred_core::model::{Event, StateContext, StateHistoryEntry, StateSnapshot};

use crate::contract::{sanitize_state_id, ExportedContext, PersistenceAdapter, Severity, TransactionScope, ValidationIssue};
use crate::error::PersistenceError;

#[derive(Default, Clone)]
struct Store {
    contexts: HashMap<String, StateContext>,
    events: HashMap<String, Vec<Event>>,
    history: HashMap<String, Vec<StateHistoryEntry>>,
    snapshots: HashMap<String, Vec<StateSnapshot>>,
}

struct Inner {
    main: Store,
    staged: HashMap<String, Store>,
    closed: bool,
}

/// Adaptador de referencia: todo vive en un `Store` protegido por un único
/// mutex async. Una transacción abierta con `begin` opera sobre una copia
/// completa del store, reemplazada atómicamente en `commit` y descartada en
/// `rollback` (aislamiento de snapshot, suficiente para un backend de
/// desarrollo/test de un solo proceso).
pub struct InMemoryPersistence {
    inner: Mutex<Inner>,
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { main: Store::default(), staged: HashMap::new(), closed: false }) }
    }
}

fn store_mut<'a>(inner: &'a mut Inner, tx: Option<&TransactionScope>) -> Result<&'a mut Store, PersistenceError> {
    match tx {
        None => Ok(&mut inner.main),
        Some(scope) => inner.staged.get_mut(&scope.id).ok_or_else(|| PersistenceError::TransactionNotFound(scope.id.clone())),
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn save_context(&self, ctx: &StateContext, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        store_mut(&mut guard, tx)?.contexts.insert(ctx.id.clone(), ctx.clone());
        Ok(())
    }

    async fn load_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateContext>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        Ok(store_mut(&mut guard, tx)?.contexts.get(id).cloned())
    }

    async fn delete_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        store.contexts.remove(id);
        store.events.remove(id);
        store.history.remove(id);
        store.snapshots.remove(id);
        Ok(())
    }

    async fn list_context_ids(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        let mut ids: Vec<&StateContext> = store.contexts.values().collect();
        ids.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        Ok(ids.into_iter().map(|c| c.id.clone()).collect())
    }

    async fn save_event(&self, context_id: &str, event: &Event, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        store_mut(&mut guard, tx)?.events.entry(context_id.to_string()).or_default().push(event.clone());
        Ok(())
    }

    async fn save_state_history(&self, entry: &StateHistoryEntry, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        store_mut(&mut guard, tx)?.history.entry(entry.context_id.clone()).or_default().push(entry.clone());
        Ok(())
    }

    async fn get_state_history(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateHistoryEntry>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let mut entries = store_mut(&mut guard, tx)?.history.get(context_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn find_paused_instances(&self, tx: Option<&TransactionScope>) -> Result<Vec<String>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        Ok(store_mut(&mut guard, tx)?.contexts.values().filter(|c| c.is_paused()).map(|c| c.id.clone()).collect())
    }

    async fn create_snapshot(
        &self,
        context_id: &str,
        description: Option<String>,
        tx: Option<&TransactionScope>,
    ) -> Result<StateSnapshot, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        let ctx = store.contexts.get(context_id).cloned().ok_or_else(|| PersistenceError::ContextNotFound(context_id.to_string()))?;
        let snapshot = StateSnapshot::new(ctx, description);
        store.snapshots.entry(context_id.to_string()).or_default().push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_snapshots(&self, context_id: &str, tx: Option<&TransactionScope>) -> Result<Vec<StateSnapshot>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let mut snapshots = store_mut(&mut guard, tx)?.snapshots.get(context_id).cloned().unwrap_or_default();
        snapshots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(snapshots)
    }

    async fn load_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        Ok(store_mut(&mut guard, tx)?
            .snapshots
            .get(context_id)
            .and_then(|v| v.iter().find(|s| s.snapshot_id == snapshot_id))
            .cloned())
    }

    async fn load_snapshot_by_time(&self, context_id: &str, t: DateTime<Utc>, tx: Option<&TransactionScope>) -> Result<Option<StateSnapshot>, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        Ok(store_mut(&mut guard, tx)?
            .snapshots
            .get(context_id)
            .and_then(|v| v.iter().filter(|s| s.timestamp <= t).max_by_key(|s| s.timestamp))
            .cloned())
    }

    async fn rollback_to_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<StateContext, PersistenceError> {
        {
            let current = self.load_context(context_id, tx).await?.ok_or_else(|| PersistenceError::ContextNotFound(context_id.to_string()))?;
            let mut guard = self.inner.lock().await;
            if guard.closed {
                return Err(PersistenceError::AdapterClosed);
            }
            let store = store_mut(&mut guard, tx)?;
            let pre_rollback = StateSnapshot::new(current, Some("pre-rollback".to_string()));
            store.snapshots.entry(context_id.to_string()).or_default().push(pre_rollback);
        }

        let target = self
            .load_snapshot(context_id, snapshot_id, tx)
            .await?
            .ok_or_else(|| PersistenceError::SnapshotNotFound(snapshot_id.to_string()))?;

        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        store.contexts.insert(context_id.to_string(), target.context.clone());
        Ok(target.context)
    }

    async fn delete_snapshot(&self, context_id: &str, snapshot_id: &str, tx: Option<&TransactionScope>) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        if let Some(v) = store_mut(&mut guard, tx)?.snapshots.get_mut(context_id) {
            v.retain(|s| s.snapshot_id != snapshot_id);
        }
        Ok(())
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
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        let mut repaired = store.contexts.get(id).cloned().ok_or_else(|| PersistenceError::ContextNotFound(id.to_string()))?;

        repaired.current_state_id = if repaired.current_state_id.trim().is_empty() {
            "unknown".to_string()
        } else {
            sanitize_state_id(&repaired.current_state_id)
        };
        repaired.metadata.retain(|_, v| !v.is_null());

        store.contexts.insert(id.to_string(), repaired.clone());
        Ok(repaired)
    }

    async fn export_context(&self, id: &str, tx: Option<&TransactionScope>) -> Result<ExportedContext, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let store = store_mut(&mut guard, tx)?;
        let ctx = store.contexts.get(id).cloned().ok_or_else(|| PersistenceError::ContextNotFound(id.to_string()))?;
        Ok(ExportedContext {
            ctx,
            history: store.history.get(id).cloned().unwrap_or_default(),
            snapshots: store.snapshots.get(id).cloned().unwrap_or_default(),
            meta: HashMap::new(),
            exported_at: Utc::now(),
            source_instance: id.to_string(),
            version: "1".to_string(),
        })
    }

    async fn import_context(&self, exported: ExportedContext, target_id: Option<String>, tx: Option<&TransactionScope>) -> Result<String, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let new_id = target_id.unwrap_or_else(|| exported.ctx.id.clone());

        let mut ctx = exported.ctx;
        ctx.id = new_id.clone();
        let history: Vec<StateHistoryEntry> = exported
            .history
            .into_iter()
            .map(|mut h| {
                h.context_id = new_id.clone();
                h
            })
            .collect();
        let snapshots: Vec<StateSnapshot> = exported
            .snapshots
            .into_iter()
            .map(|mut s| {
                s.context_id = new_id.clone();
                s
            })
            .collect();

        let store = store_mut(&mut guard, tx)?;
        store.contexts.insert(new_id.clone(), ctx);
        store.history.insert(new_id.clone(), history);
        store.snapshots.insert(new_id.clone(), snapshots);
        Ok(new_id)
    }

    async fn begin(&self) -> Result<TransactionScope, PersistenceError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(PersistenceError::AdapterClosed);
        }
        let id = Uuid::new_v4().to_string();
        let snapshot = guard.main.clone();
        guard.staged.insert(id.clone(), snapshot);
        Ok(TransactionScope::new(id))
    }

    async fn commit(&self, tx: TransactionScope) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        let staged = guard.staged.remove(&tx.id).ok_or_else(|| PersistenceError::TransactionNotFound(tx.id.clone()))?;
        guard.main = staged;
        Ok(())
    }

    async fn rollback(&self, tx: TransactionScope) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        guard.staged.remove(&tx.id).ok_or_else(|| PersistenceError::TransactionNotFound(tx.id.clone()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        let mut guard = self.inner.lock().await;
        guard.staged.clear();
        guard.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str, state: &str) -> StateContext {
        StateContext::new(id.to_string(), state)
    }

    #[tokio::test]
    async fn save_then_load_roundtrips_exactly() {
        let store = InMemoryPersistence::new();
        let context = ctx("inst-1", "start");
        store.save_context(&context, None).await.unwrap();
        let loaded = store.load_context("inst-1", None).await.unwrap().unwrap();
        assert_eq!(loaded.current_state_id, "start");
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_invisible_outside_it() {
        let store = InMemoryPersistence::new();
        let tx = store.begin().await.unwrap();
        store.save_context(&ctx("inst-2", "start"), Some(&tx)).await.unwrap();

        assert!(store.load_context("inst-2", None).await.unwrap().is_none());
        assert!(store.load_context("inst-2", Some(&tx)).await.unwrap().is_some());

        store.commit(tx).await.unwrap();
        assert!(store.load_context("inst-2", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryPersistence::new();
        let tx = store.begin().await.unwrap();
        store.save_context(&ctx("inst-3", "start"), Some(&tx)).await.unwrap();
        store.rollback(tx).await.unwrap();
        assert!(store.load_context("inst-3", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_paused_instances_sees_pause_markers() {
        let store = InMemoryPersistence::new();
        let paused = ctx("inst-4", "waiting").with_pause_markers("waiting", Some(30));
        store.save_context(&paused, None).await.unwrap();
        store.save_context(&ctx("inst-5", "running"), None).await.unwrap();

        let ids = store.find_paused_instances(None).await.unwrap();
        assert_eq!(ids, vec!["inst-4".to_string()]);
    }

    #[tokio::test]
    async fn rollback_to_snapshot_inserts_pre_rollback_snapshot() {
        let store = InMemoryPersistence::new();
        store.save_context(&ctx("inst-6", "a"), None).await.unwrap();
        let snap = store.create_snapshot("inst-6", Some("checkpoint".to_string()), None).await.unwrap();

        store.save_context(&ctx("inst-6", "b"), None).await.unwrap();
        let restored = store.rollback_to_snapshot("inst-6", &snap.snapshot_id, None).await.unwrap();
        assert_eq!(restored.current_state_id, "a");

        let snapshots = store.list_snapshots("inst-6", None).await.unwrap();
        assert!(snapshots.iter().any(|s| s.description.as_deref() == Some("pre-rollback")));
    }

    #[tokio::test]
    async fn export_then_import_preserves_identity_without_target_id() {
        let store = InMemoryPersistence::new();
        store.save_context(&ctx("inst-7", "a"), None).await.unwrap();
        store.save_event("inst-7", &Event::new("ns", "go", Default::default()), None).await.unwrap();

        let exported = store.export_context("inst-7", None).await.unwrap();
        let store2 = InMemoryPersistence::new();
        let new_id = store2.import_context(exported, None, None).await.unwrap();
        assert_eq!(new_id, "inst-7");
        assert!(store2.load_context("inst-7", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn import_with_target_id_remaps_identity() {
        let store = InMemoryPersistence::new();
        store.save_context(&ctx("inst-8", "a"), None).await.unwrap();
        let exported = store.export_context("inst-8", None).await.unwrap();

        let new_id = store.import_context(exported, Some("inst-9".to_string()), None).await.unwrap();
        assert_eq!(new_id, "inst-9");
        assert!(store.load_context("inst-9", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repair_context_sanitizes_invalid_state_id() {
        let store = InMemoryPersistence::new();
        let mut broken = ctx("inst-10", "bad state!");
        broken.current_state_id = "bad state!".to_string();
        store.save_context(&broken, None).await.unwrap();

        let issues = store.validate_context(&broken);
        assert!(!issues.is_empty());

        let repaired = store.repair_context("inst-10", &issues, None).await.unwrap();
        assert_eq!(repaired.current_state_id, "bad_state_");
    }

    #[tokio::test]
    async fn operations_fail_after_close() {
        let store = InMemoryPersistence::new();
        store.close().await.unwrap();
        let err = store.save_context(&ctx("inst-11", "a"), None).await.unwrap_err();
        assert!(matches!(err, PersistenceError::AdapterClosed));
    }
}
