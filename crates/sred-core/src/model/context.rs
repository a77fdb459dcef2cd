//! Contexto de instancia: el entorno de cuatro dimensiones
//! `(local, global, recentEvents, metadata)` descrito por la especificación.
//!
//! Reemplaza la jerarquía de getters tipados por reflexión que se ve en
//! fuentes orientadas a objetos: en vez de dispatch dinámico, exponemos un
//! pequeño conjunto de lookups tipados (`get_local`, `get_local_as::<T>`)
//! que devuelven `Option` en lugar de lanzar.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Event, InstanceId};

/// Tamaño por defecto de la ventana de `recent_events`.
pub const DEFAULT_RECENT_EVENTS_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateContext {
    pub id: InstanceId,
    pub current_state_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub local_state: IndexMap<String, Value>,
    pub global_state: IndexMap<String, Value>,
    pub recent_events: VecDeque<Event>,
    pub metadata: IndexMap<String, Value>,
}

impl StateContext {
    pub fn new(id: InstanceId, initial_state_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            current_state_id: initial_state_id.into(),
            created_at: now,
            last_updated_at: now,
            local_state: IndexMap::new(),
            global_state: IndexMap::new(),
            recent_events: VecDeque::new(),
            metadata: IndexMap::new(),
        }
    }

    /// Lookup tipado sobre `local_state`.
    pub fn get_local(&self, key: &str) -> Option<&Value> {
        self.local_state.get(key)
    }

    /// Lookup tipado sobre `global_state`.
    pub fn get_global(&self, key: &str) -> Option<&Value> {
        self.global_state.get(key)
    }

    /// Deserializa `local_state[key]` a `T`, devolviendo `None` si la clave
    /// no existe o no calza con el tipo pedido. Nunca entra en pánico.
    pub fn get_local_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.local_state.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Deserializa `global_state[key]` a `T`.
    pub fn get_global_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.global_state.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Clave de metadata reservada (prefijo `_`), usada por el control plane
    /// para marcadores de pausa.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn is_paused(&self) -> bool {
        self.metadata.contains_key("_pausedAt")
    }

    /// Produce un nuevo contexto con el evento anexado a `recent_events`,
    /// truncando por la izquierda si se excede `capacity`. El contexto
    /// original no se modifica.
    pub fn with_event_appended(mut self, event: Event, capacity: usize) -> Self {
        self.recent_events.push_back(event);
        while self.recent_events.len() > capacity {
            self.recent_events.pop_front();
        }
        self
    }

    /// Produce un nuevo contexto con `local_state` fusionado con `data` y
    /// `last_updated_at` refrescado.
    pub fn merged_with(mut self, data: &std::collections::HashMap<String, Value>) -> Self {
        for (k, v) in data {
            self.local_state.insert(k.clone(), v.clone());
        }
        self.last_updated_at = Utc::now();
        self
    }

    pub fn with_current_state(mut self, state_id: impl Into<String>) -> Self {
        self.current_state_id = state_id.into();
        self.last_updated_at = Utc::now();
        self
    }

    /// Marca la instancia como pausada: establece `_pausedAt`, `_pausedState`
    /// y `_pauseTimeout` en `metadata` (ver §4.8 del control plane).
    pub fn with_pause_markers(mut self, state_id: &str, timeout: Option<i64>) -> Self {
        self.metadata.insert("_pausedAt".into(), Value::String(Utc::now().to_rfc3339()));
        self.metadata.insert("_pausedState".into(), Value::String(state_id.to_string()));
        self.metadata.insert("_pauseTimeout".into(), Value::from(timeout.unwrap_or(-1)));
        self
    }

    /// Elimina exactamente las claves de pausa reservadas, sin tocar el
    /// resto de `metadata`.
    pub fn without_pause_markers(mut self) -> Self {
        self.metadata.shift_remove("_pausedAt");
        self.metadata.shift_remove("_pausedState");
        self.metadata.shift_remove("_pauseTimeout");
        self
    }
}
