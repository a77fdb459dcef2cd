//! `StepExecutor`: un único paso `(currentState, event, context) ->
//! (nextState, context', result, history?)` (§4.2). Despacha sobre
//! `ExecutionMode` y delega el fan-out de `Parallel` al módulo hermano.

use crate::errors::ExecutionError;
use crate::model::{Event, StateContext, StateHistoryEntry, StepResult};
use crate::workflow::{DecisionContext, ExecutionMode, WorkflowFlow};

use super::parallel;

/// Salida de un paso: el contexto ya refleja `nextState` (si hubo
/// transición) y trae el evento anexado a `recentEvents`. `history` está
/// presente únicamente cuando el estado efectivamente cambió.
#[derive(Debug)]
pub struct StepOutcome {
    pub next_state: Option<String>,
    pub context: StateContext,
    pub result: StepResult,
    pub history: Option<StateHistoryEntry>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Ejecuta un paso completo sobre `context.current_state_id`. No muta
    /// `context` in-place: el caller decide cuándo persistir `StepOutcome`.
    pub async fn step(
        &self,
        flow: &WorkflowFlow,
        context: StateContext,
        event: Event,
    ) -> Result<StepOutcome, ExecutionError> {
        let state_id = context.current_state_id.clone();
        let state_def = flow
            .state(&state_id)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownState(state_id.clone()))?;

        let merged_context = context.clone().merged_with(&event.payload);

        let (result, next_state) = match state_def.execution_mode {
            ExecutionMode::Sequential | ExecutionMode::Join => {
                let result = self.run_handler(flow, &state_id, &merged_context, &event).await;
                let next = self.select_transition(flow, &state_id, &merged_context, &event, &result);
                (result, next)
            }
            ExecutionMode::Conditional => {
                let result = self.run_handler(flow, &state_id, &merged_context, &event).await;
                let next = self.select_branch(&state_def, &state_id, &merged_context, &event, &result)?;
                (result, Some(next))
            }
            ExecutionMode::Parallel => {
                let fork_result = self.run_handler(flow, &state_id, &merged_context, &event).await;
                let result = match (&state_def.parallel, fork_result.success) {
                    (Some(cfg), true) => {
                        let fork_ctx = merged_context.clone().merged_with(&fork_result.data);
                        let outcomes = parallel::run_branches(flow, cfg, &fork_ctx, &event).await;
                        let mut aggregated = parallel::aggregate(&outcomes, cfg.error_strategy);
                        aggregated.data.extend(fork_result.data.clone());
                        aggregated
                    }
                    _ => fork_result,
                };
                let next = self.select_transition(flow, &state_id, &merged_context, &event, &result);
                (result, next)
            }
        };

        let mut new_context = merged_context
            .merged_with(&result.data)
            .with_event_appended(event.clone(), crate::model::DEFAULT_RECENT_EVENTS_CAPACITY);

        let history = if let Some(ref next) = next_state {
            if next != &state_id {
                let entry = StateHistoryEntry::new(new_context.id.clone(), Some(state_id.clone()), next.clone(), Some(event.id.clone()));
                new_context = new_context.with_current_state(next.clone());
                Some(entry)
            } else {
                None
            }
        } else {
            None
        };

        Ok(StepOutcome { next_state, context: new_context, result, history })
    }

    async fn run_handler(&self, flow: &WorkflowFlow, state_id: &str, context: &StateContext, event: &Event) -> StepResult {
        match flow.handler(state_id) {
            Some(handler) => match handler.handle(context, event).await {
                Ok(result) => result,
                Err(err) => StepResult::failure(err.to_string()),
            },
            None => StepResult::success_empty(),
        }
    }

    fn select_transition(
        &self,
        flow: &WorkflowFlow,
        state_id: &str,
        context: &StateContext,
        event: &Event,
        result: &StepResult,
    ) -> Option<String> {
        let dc = DecisionContext { state_id, event, context, result };
        flow.outgoing_transitions(state_id).into_iter().find(|t| t.condition.matches(&dc)).map(|t| t.to.clone())
    }

    fn select_branch(
        &self,
        state_def: &crate::workflow::StateDefinition,
        state_id: &str,
        context: &StateContext,
        event: &Event,
        result: &StepResult,
    ) -> Result<String, ExecutionError> {
        let branches = state_def.branches.as_ref().ok_or_else(|| ExecutionError::NoBranchMatched(state_id.to_string()))?;
        let dc = DecisionContext { state_id, event, context, result };

        let mut candidates: Vec<&crate::workflow::BranchConfiguration> =
            branches.iter().filter(|b| b.condition.matches(&dc)).collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        candidates
            .first()
            .map(|b| b.target_state_id.clone())
            .ok_or_else(|| ExecutionError::NoBranchMatched(state_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::handler::FnHandler;
    use crate::model::{Event, StateContext, StepResult};
    use crate::workflow::{
        BranchConfiguration, Condition, ErrorStrategy, ParallelConfiguration, StateDefinition, TransitionDefinition,
        WaitStrategy, WorkflowBuilder,
    };

    use super::StepExecutor;

    fn event(name: &str) -> Event {
        Event::new("test", name, Default::default())
    }

    #[tokio::test]
    async fn sequential_step_follows_success_transition() {
        let flow = WorkflowBuilder::new("seq")
            .state(StateDefinition::initial("start", "Start"))
            .state(StateDefinition::terminal("done", "Done"))
            .transition(TransitionDefinition::new("start", "done", Condition::Success, 0))
            .build()
            .unwrap();

        let context = StateContext::new("inst-1".to_string(), "start");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("done"));
        assert!(outcome.history.is_some());
        assert_eq!(outcome.context.current_state_id, "done");
    }

    #[tokio::test]
    async fn sequential_step_follows_failure_transition_when_handler_errs() {
        let flow = WorkflowBuilder::new("seq-fail")
            .state(StateDefinition::initial("start", "Start"))
            .state(StateDefinition::terminal("ok", "Ok"))
            .state(StateDefinition::error("err", "Err"))
            .transition(TransitionDefinition::new("start", "ok", Condition::Success, 0))
            .transition(TransitionDefinition::new("start", "err", Condition::Failure, 0))
            .bind("start", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::failure("boom")))))
            .build()
            .unwrap();

        let context = StateContext::new("inst-2".to_string(), "start");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("err"));
        assert!(!outcome.result.success);
    }

    #[tokio::test]
    async fn conditional_state_picks_highest_priority_matching_branch() {
        let def = StateDefinition::normal("decide", "Decide");
        let flow = WorkflowBuilder::new("cond")
            .state(StateDefinition::initial("start", "Start"))
            .conditional_state(
                def,
                vec![
                    BranchConfiguration { name: "low".into(), target_state_id: "a".into(), condition: Condition::Success, priority: 1 },
                    BranchConfiguration { name: "high".into(), target_state_id: "b".into(), condition: Condition::Success, priority: 10 },
                ],
            )
            .transition(TransitionDefinition::new("start", "decide", Condition::Success, 0))
            .state(StateDefinition::terminal("a", "A"))
            .state(StateDefinition::terminal("b", "B"))
            .build()
            .unwrap();

        let context = StateContext::new("inst-3".to_string(), "decide");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn parallel_state_with_all_strategy_merges_every_branch() {
        let parallel = ParallelConfiguration {
            branches: vec![("left".into(), "a".into()), ("right".into(), "b".into())],
            wait_strategy: WaitStrategy::All,
            timeout: None,
            error_strategy: ErrorStrategy::FailAll,
        };
        let flow = WorkflowBuilder::new("par")
            .state(StateDefinition::initial("start", "Start"))
            .parallel_state(StateDefinition::normal("fork", "Fork"), parallel)
            .transition(TransitionDefinition::new("fork", "join", Condition::Success, 0))
            .state(StateDefinition::terminal("join", "Join"))
            .state(StateDefinition::normal("a", "A"))
            .state(StateDefinition::normal("b", "B"))
            .bind("a", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::success(Default::default())))))
            .bind("b", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::success(Default::default())))))
            .build()
            .unwrap();

        let context = StateContext::new("inst-4".to_string(), "fork");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("join"));
        assert!(outcome.result.success);
    }

    #[tokio::test]
    async fn parallel_state_runs_its_own_handler_before_fanning_out() {
        let parallel = ParallelConfiguration {
            branches: vec![("left".into(), "a".into())],
            wait_strategy: WaitStrategy::All,
            timeout: None,
            error_strategy: ErrorStrategy::FailAll,
        };
        let flow = WorkflowBuilder::new("par-fork-handler")
            .state(StateDefinition::initial("start", "Start"))
            .parallel_state(StateDefinition::normal("fork", "Fork"), parallel)
            .transition(TransitionDefinition::new("fork", "join", Condition::Success, 0))
            .state(StateDefinition::terminal("join", "Join"))
            .state(StateDefinition::normal("a", "A"))
            .bind(
                "fork",
                Arc::new(FnHandler(|_ctx, _evt| {
                    let mut data = std::collections::HashMap::new();
                    data.insert("forked".to_string(), serde_json::Value::Bool(true));
                    Ok(StepResult::success(data))
                })),
            )
            .bind("a", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::success(Default::default())))))
            .build()
            .unwrap();

        let context = StateContext::new("inst-5".to_string(), "fork");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("join"));
        assert!(outcome.result.success);
        assert_eq!(outcome.result.data.get("forked"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn parallel_state_short_circuits_when_its_own_handler_fails() {
        let parallel = ParallelConfiguration {
            branches: vec![("left".into(), "a".into())],
            wait_strategy: WaitStrategy::All,
            timeout: None,
            error_strategy: ErrorStrategy::FailAll,
        };
        let flow = WorkflowBuilder::new("par-fork-failure")
            .state(StateDefinition::initial("start", "Start"))
            .parallel_state(StateDefinition::normal("fork", "Fork"), parallel)
            .transition(TransitionDefinition::new("fork", "join", Condition::Success, 0))
            .state(StateDefinition::error("err", "Err"))
            .transition(TransitionDefinition::new("fork", "err", Condition::Failure, 0))
            .state(StateDefinition::terminal("join", "Join"))
            .state(StateDefinition::normal("a", "A"))
            .bind("fork", Arc::new(FnHandler(|_ctx, _evt| Ok(StepResult::failure("fork handler boom")))))
            .bind(
                "a",
                Arc::new(FnHandler(|_ctx, _evt| {
                    panic!("branch handler must not run when the fork handler already failed")
                })),
            )
            .build()
            .unwrap();

        let context = StateContext::new("inst-6".to_string(), "fork");
        let outcome = StepExecutor::new().step(&flow, context, event("go")).await.unwrap();

        assert_eq!(outcome.next_state.as_deref(), Some("err"));
        assert!(!outcome.result.success);
    }
}
