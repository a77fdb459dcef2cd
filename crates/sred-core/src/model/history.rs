use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, InstanceId};

/// Fila de historial, append-only. `event_id` es `None` para transiciones
/// forzadas (`forceTransition`) o disparadas por el sweeper de timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state_id: Option<String>,
    pub to_state_id: String,
    pub event_id: Option<EventId>,
    pub context_id: InstanceId,
    /// Razón humana, presente en transiciones forzadas o por timeout
    /// (p.ej. `"admin"`, `"timeout"`).
    pub reason: Option<String>,
}

impl StateHistoryEntry {
    pub fn new(
        context_id: InstanceId,
        from_state_id: Option<String>,
        to_state_id: impl Into<String>,
        event_id: Option<EventId>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            from_state_id,
            to_state_id: to_state_id.into(),
            event_id,
            context_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
