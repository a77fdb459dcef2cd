//! Evento inmutable consumido por el executor.
//!
//! Invariante: un `Event` nunca se muta una vez creado. Los envoltorios
//! temporales (síncrono/asíncrono/diferido/periódico, ver
//! [`crate::model::TemporalEvent`]) añaden semántica de vencimiento sin
//! alterar la identidad del evento subyacente.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{EventId, Priority};

/// Tipo de evento: namespace, nombre y versión. Dos eventos con el mismo
/// `EventType` son tratados por el mismo conjunto de transiciones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    pub namespace: String,
    pub name: String,
    pub version: u32,
}

impl EventType {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: u32) -> Self {
        Self { namespace: namespace.into(), name: name.into(), version }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}@v{}", self.namespace, self.name, self.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,
    pub name: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub priority: Priority,
    pub payload: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

impl Event {
    /// Construye un evento con id autogenerado, prioridad `Normal` y
    /// timestamp `now`. Pensado para la ruta `process(instanceId, eventType,
    /// eventName, payload)` del instance manager.
    pub fn new(namespace: &str, name: &str, payload: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: EventType::new(namespace, name, 1),
            name: name.to_string(),
            description: None,
            timestamp: Utc::now(),
            source: "orchestrator".to_string(),
            priority: Priority::Normal,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
