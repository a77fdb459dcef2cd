use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{InstanceId, StateContext};

/// Copia durable de un contexto en un punto en el tiempo, identificada por
/// `snapshot_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub snapshot_id: String,
    pub context_id: InstanceId,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
    pub context: StateContext,
    pub metadata: IndexMap<String, Value>,
}

impl StateSnapshot {
    pub fn new(context: StateContext, description: Option<String>) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            context_id: context.id.clone(),
            timestamp: Utc::now(),
            description,
            context,
            metadata: IndexMap::new(),
        }
    }
}
