//! Filtros puros sobre eventos, evaluados antes de entregar a un listener.

use std::collections::HashSet;
use std::sync::Arc;

use sred_core::model::{Event, EventType, Priority};

pub trait EventFilter: Send + Sync {
    fn matches(&self, event: &Event) -> bool;
}

/// Acepta únicamente eventos cuyo `EventType` esté en el conjunto dado.
pub struct TypeSetFilter {
    types: HashSet<EventType>,
}

impl TypeSetFilter {
    pub fn new(types: impl IntoIterator<Item = EventType>) -> Self {
        Self { types: types.into_iter().collect() }
    }
}

impl EventFilter for TypeSetFilter {
    fn matches(&self, event: &Event) -> bool {
        self.types.contains(&event.event_type)
    }
}

/// Acepta eventos cuya prioridad sea `>= floor`.
pub struct PriorityFloorFilter {
    floor: Priority,
}

impl PriorityFloorFilter {
    pub fn new(floor: Priority) -> Self {
        Self { floor }
    }
}

impl EventFilter for PriorityFloorFilter {
    fn matches(&self, event: &Event) -> bool {
        event.priority >= self.floor
    }
}

/// Predicado genérico, para filtros que no calzan en las formas anteriores.
pub struct PredicateFilter {
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

impl PredicateFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self { predicate: Arc::new(predicate) }
    }
}

impl EventFilter for PredicateFilter {
    fn matches(&self, event: &Event) -> bool {
        (self.predicate)(event)
    }
}
