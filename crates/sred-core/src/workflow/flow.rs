use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::handler::StateHandler;
use crate::model::StateId;

use super::state::StateDefinition;
use super::transition::TransitionDefinition;

/// Configuración a nivel de flujo: valores por defecto heredados por los
/// estados que no los fijan explícitamente.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub pauseable: bool,
    pub default_timeout: Option<i64>,
    pub auto_resume: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self { pauseable: true, default_timeout: None, auto_resume: false }
    }
}

/// Workflow ya validado. Los estados y transiciones sólo se referencian por
/// id entre sí: no hay referencias propietarias cruzadas, lo que hace a la
/// estructura trivialmente serializable y clonable por valor barato (los
/// handlers viven detrás de `Arc`).
#[derive(Clone)]
pub struct WorkflowFlow {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    states: IndexMap<StateId, StateDefinition>,
    transitions: HashMap<StateId, Vec<TransitionDefinition>>,
    handlers: HashMap<StateId, Arc<dyn StateHandler>>,
    pub config: FlowConfig,
    initial_state_id: StateId,
}

impl std::fmt::Debug for WorkflowFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowFlow")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("version", &self.version)
            .field("states", &self.states)
            .field("transitions", &self.transitions)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("initial_state_id", &self.initial_state_id)
            .finish()
    }
}

impl WorkflowFlow {
    pub(crate) fn new(
        name: String,
        description: Option<String>,
        version: String,
        states: IndexMap<StateId, StateDefinition>,
        transitions: HashMap<StateId, Vec<TransitionDefinition>>,
        handlers: HashMap<StateId, Arc<dyn StateHandler>>,
        config: FlowConfig,
        initial_state_id: StateId,
    ) -> Self {
        Self { name, description, version, states, transitions, handlers, config, initial_state_id }
    }

    pub fn initial_state_id(&self) -> &str {
        &self.initial_state_id
    }

    pub fn state(&self, id: &str) -> Option<&StateDefinition> {
        self.states.get(id)
    }

    pub fn states(&self) -> impl Iterator<Item = &StateDefinition> {
        self.states.values()
    }

    pub fn handler(&self, state_id: &str) -> Option<Arc<dyn StateHandler>> {
        self.handlers.get(state_id).cloned()
    }

    /// Transiciones salientes de `state_id`, ordenadas por prioridad
    /// descendente. Al ser un sort estable, los empates conservan el orden de
    /// declaración (ver §4.2 "Tie-breaks").
    pub fn outgoing_transitions(&self, state_id: &str) -> Vec<&TransitionDefinition> {
        let mut out: Vec<&TransitionDefinition> =
            self.transitions.get(state_id).map(|v| v.iter().collect()).unwrap_or_default();
        out.sort_by(|a, b| b.priority.cmp(&a.priority));
        out
    }

    pub fn pauseable_for(&self, state: &StateDefinition) -> bool {
        state.pauseable.unwrap_or(self.config.pauseable)
    }

    pub fn timeout_for(&self, state: &StateDefinition) -> Option<i64> {
        state.timeout.or(self.config.default_timeout)
    }

    /// Un estado es terminal únicamente si el workflow lo marca con
    /// `isFinal`/`isError`; no se aplica ninguna heurística sobre el id del
    /// estado.
    pub fn is_terminal(&self, state_id: &str) -> bool {
        self.states.get(state_id).is_some_and(|s| s.is_terminal_by_flags())
    }
}
