//! Builder de `WorkflowFlow`. Reemplaza los singletons globales (factories,
//! procesadores de anotaciones) de las fuentes orientadas a objetos: el
//! motor recibe siempre un builder explícito, sin estado oculto.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::WorkflowBuildError;
use crate::handler::StateHandler;
use crate::model::StateId;

use super::flow::{FlowConfig, WorkflowFlow};
use super::state::{ParallelConfiguration, StateDefinition, StateType};
use super::transition::TransitionDefinition;

#[derive(Default)]
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    version: String,
    states: IndexMap<StateId, StateDefinition>,
    transitions: HashMap<StateId, Vec<TransitionDefinition>>,
    handlers: HashMap<StateId, Arc<dyn StateHandler>>,
    config: FlowConfig,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), version: "1".to_string(), config: FlowConfig::default(), ..Default::default() }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn config(mut self, pauseable: bool, default_timeout: Option<i64>, auto_resume: bool) -> Self {
        self.config = FlowConfig { pauseable, default_timeout, auto_resume };
        self
    }

    pub fn state(mut self, def: StateDefinition) -> Self {
        self.states.insert(def.id.clone(), def);
        self
    }

    /// Azúcar para el caso común de un estado `Conditional` ya cargado con su
    /// lista de ramas.
    pub fn conditional_state(self, mut def: StateDefinition, branches: Vec<super::BranchConfiguration>) -> Self {
        def.execution_mode = super::ExecutionMode::Conditional;
        def.branches = Some(branches);
        self.state(def)
    }

    /// Azúcar para un estado `Parallel` (fork).
    pub fn parallel_state(self, mut def: StateDefinition, parallel: ParallelConfiguration) -> Self {
        def.execution_mode = super::ExecutionMode::Parallel;
        def.parallel = Some(parallel);
        self.state(def)
    }

    /// Azúcar para un estado `Join`, el destino convencional de un fork.
    pub fn join_state(self, mut def: StateDefinition) -> Self {
        def.execution_mode = super::ExecutionMode::Join;
        self.state(def)
    }

    pub fn transition(mut self, t: TransitionDefinition) -> Self {
        self.transitions.entry(t.from.clone()).or_default().push(t);
        self
    }

    /// Vincula un handler a un estado. Llamado por el binder externo (ver
    /// §6) una vez que resolvió la función por nombre/anotación.
    pub fn bind(mut self, state_id: impl Into<String>, handler: Arc<dyn StateHandler>) -> Self {
        self.handlers.insert(state_id.into(), handler);
        self
    }

    pub fn build(self) -> Result<WorkflowFlow, WorkflowBuildError> {
        let mut initial: Option<StateId> = None;
        for state in self.states.values() {
            if state.is_initial {
                if let Some(existing) = &initial {
                    if existing != &state.id {
                        return Err(WorkflowBuildError::DuplicateInitialState(existing.clone(), state.id.clone()));
                    }
                } else {
                    initial = Some(state.id.clone());
                }
            }

            match state.timeout {
                None | Some(-1) => {}
                Some(n) if n > 0 => {}
                Some(_) => return Err(WorkflowBuildError::InvalidTimeout(state.id.clone())),
            }

            if let Some(super::TimeoutAction::Transition { target_state }) = &state.timeout_action {
                if !self.states.contains_key(target_state) {
                    return Err(WorkflowBuildError::InvalidTimeoutAction(state.id.clone(), target_state.clone()));
                }
            }

            if matches!(state.execution_mode, super::ExecutionMode::Conditional) {
                match &state.branches {
                    Some(branches) if !branches.is_empty() => {
                        for b in branches {
                            if !self.states.contains_key(&b.target_state_id) {
                                return Err(WorkflowBuildError::UnknownState(b.target_state_id.clone()));
                            }
                        }
                    }
                    _ => return Err(WorkflowBuildError::MissingBranchConfig(state.id.clone())),
                }
            }

            if matches!(state.execution_mode, super::ExecutionMode::Parallel) {
                if let Some(parallel) = &state.parallel {
                    for (_, target) in &parallel.branches {
                        if !self.states.contains_key(target) {
                            return Err(WorkflowBuildError::UnknownParallelTarget(state.id.clone(), target.clone()));
                        }
                    }
                }
            }
        }

        let initial = initial.ok_or(WorkflowBuildError::NoInitialState)?;

        for (from, ts) in &self.transitions {
            if !self.states.contains_key(from) {
                return Err(WorkflowBuildError::UnknownState(from.clone()));
            }
            for t in ts {
                if !self.states.contains_key(&t.to) {
                    return Err(WorkflowBuildError::UnknownState(t.to.clone()));
                }
            }
        }

        Ok(WorkflowFlow::new(
            self.name,
            self.description,
            self.version,
            self.states,
            self.transitions,
            self.handlers,
            self.config,
            initial,
        ))
    }
}

impl StateDefinition {
    pub fn initial(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StateType::Initial)
    }

    pub fn normal(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StateType::Normal)
    }

    pub fn terminal(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StateType::Final)
    }

    pub fn error(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StateType::Error)
    }

    pub fn pauseable(mut self, value: bool) -> Self {
        self.pauseable = Some(value);
        self
    }

    pub fn timeout(mut self, seconds: i64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn pause_on_enter(mut self, value: bool) -> Self {
        self.pause_on_enter = value;
        self
    }

    pub fn timeout_action(mut self, action: super::TimeoutAction) -> Self {
        self.timeout_action = Some(action);
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Condition;

    fn flow_with_two_states() -> WorkflowBuilder {
        WorkflowBuilder::new("order")
            .state(StateDefinition::initial("start", "Start"))
            .state(StateDefinition::terminal("done", "Done"))
    }

    #[test]
    fn build_fails_without_initial_state() {
        let err = WorkflowBuilder::new("no-initial")
            .state(StateDefinition::normal("a", "A"))
            .build()
            .unwrap_err();
        assert_eq!(err, WorkflowBuildError::NoInitialState);
    }

    #[test]
    fn build_fails_on_duplicate_initial_state() {
        let err = WorkflowBuilder::new("two-initials")
            .state(StateDefinition::initial("a", "A"))
            .state(StateDefinition::initial("b", "B"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowBuildError::DuplicateInitialState(_, _)));
    }

    #[test]
    fn build_fails_on_zero_timeout() {
        let err = WorkflowBuilder::new("bad-timeout")
            .state(StateDefinition::initial("start", "Start").timeout(0))
            .build()
            .unwrap_err();
        assert_eq!(err, WorkflowBuildError::InvalidTimeout("start".to_string()));
    }

    #[test]
    fn build_fails_on_transition_to_unknown_state() {
        let err = flow_with_two_states()
            .transition(TransitionDefinition::new("start", "nowhere", Condition::Success, 0))
            .build()
            .unwrap_err();
        assert_eq!(err, WorkflowBuildError::UnknownState("nowhere".to_string()));
    }

    #[test]
    fn build_fails_on_conditional_state_without_branches() {
        let mut def = StateDefinition::normal("decide", "Decide");
        def.execution_mode = super::super::ExecutionMode::Conditional;
        let err = flow_with_two_states().state(def).build().unwrap_err();
        assert_eq!(err, WorkflowBuildError::MissingBranchConfig("decide".to_string()));
    }

    #[test]
    fn build_succeeds_for_a_minimal_flow() {
        let flow = flow_with_two_states()
            .transition(TransitionDefinition::new("start", "done", Condition::Success, 0))
            .build()
            .expect("minimal flow should build");
        assert_eq!(flow.initial_state_id(), "start");
        assert!(flow.state("done").unwrap().is_terminal_by_flags());
    }
}
