//! Ejercita el contrato de persistencia contra una ejecución real de
//! `sred-core`: un paso del executor produce contexto + evento + historial,
//! que se guardan atómicamente bajo una transacción y luego se recuperan.

use std::sync::Arc;

use sred_core::engine::StepExecutor;
use sred_core::handler::FnHandler;
use sred_core::model::{Event, StateContext, StepResult};
use sred_core::workflow::{Condition, StateDefinition, TransitionDefinition, WorkflowBuilder};
use sred_persistence::{InMemoryPersistence, PersistenceAdapter};

fn approval_flow() -> sred_core::workflow::WorkflowFlow {
    WorkflowBuilder::new("approval")
        .state(StateDefinition::initial("submitted", "Submitted"))
        .state(StateDefinition::terminal("approved", "Approved"))
        .state(StateDefinition::error("rejected", "Rejected"))
        .transition(TransitionDefinition::new("submitted", "approved", Condition::Success, 0))
        .transition(TransitionDefinition::new("submitted", "rejected", Condition::Failure, 0))
        .bind(
            "submitted",
            Arc::new(FnHandler(|_ctx, evt| {
                if evt.name == "approve" {
                    Ok(StepResult::success(Default::default()))
                } else {
                    Ok(StepResult::failure("not approved"))
                }
            })),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn a_step_outcome_persists_atomically_and_reloads() {
    let flow = approval_flow();
    let persistence = InMemoryPersistence::new();
    let context = StateContext::new("instance-1".to_string(), "submitted");
    let event = Event::new("approval", "approve", Default::default());

    let outcome = StepExecutor::new().step(&flow, context, event.clone()).await.unwrap();
    assert_eq!(outcome.next_state.as_deref(), Some("approved"));

    let tx = persistence.begin().await.unwrap();
    persistence.save_event("instance-1", &event, Some(&tx)).await.unwrap();
    persistence.save_context(&outcome.context, Some(&tx)).await.unwrap();
    if let Some(entry) = &outcome.history {
        persistence.save_state_history(entry, Some(&tx)).await.unwrap();
    }
    persistence.commit(tx).await.unwrap();

    let reloaded = persistence.load_context("instance-1", None).await.unwrap().expect("context persisted");
    assert_eq!(reloaded.current_state_id, "approved");

    let history = persistence.get_state_history("instance-1", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to_state_id, "approved");
}

#[tokio::test]
async fn a_rejected_step_is_discarded_on_rollback() {
    let flow = approval_flow();
    let persistence = InMemoryPersistence::new();
    let context = StateContext::new("instance-2".to_string(), "submitted");
    let event = Event::new("approval", "deny", Default::default());

    let outcome = StepExecutor::new().step(&flow, context, event).await.unwrap();
    assert_eq!(outcome.next_state.as_deref(), Some("rejected"));

    let tx = persistence.begin().await.unwrap();
    persistence.save_context(&outcome.context, Some(&tx)).await.unwrap();
    persistence.rollback(tx).await.unwrap();

    let reloaded = persistence.load_context("instance-2", None).await.unwrap();
    assert!(reloaded.is_none(), "rolled-back writes must not be visible");
}

#[tokio::test]
async fn exported_context_round_trips_through_a_fresh_instance_id() {
    let flow = approval_flow();
    let persistence = InMemoryPersistence::new();
    let context = StateContext::new("instance-3".to_string(), "submitted");
    let event = Event::new("approval", "approve", Default::default());

    let outcome = StepExecutor::new().step(&flow, context, event).await.unwrap();
    persistence.save_context(&outcome.context, None).await.unwrap();

    let exported = persistence.export_context("instance-3", None).await.unwrap();
    let new_id = persistence.import_context(exported, Some("instance-3-clone".to_string()), None).await.unwrap();

    let clone = persistence.load_context(&new_id, None).await.unwrap().expect("clone persisted");
    assert_eq!(clone.current_state_id, "approved");
    assert_eq!(clone.id, "instance-3-clone");
}
