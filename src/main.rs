//! Demo harness: construye un flujo de aprobación de dos pasos, lo corre de
//! punta a punta sobre `InMemoryPersistence`, y deja pausada una instancia
//! para mostrar al sweeper de timeouts del control plane disparando su
//! `timeoutAction`. No es parte de la superficie pública del engine -- es un
//! colaborador externo como cualquier otro consumidor de `sred`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sred::{EngineBuilder, InMemoryPersistence, TransitionSelectionPolicy};
use sred_core::handler::FnHandler;
use sred_core::model::StepResult;
use sred_core::workflow::{Condition, StateDefinition, TimeoutAction, TransitionDefinition, WorkflowBuilder};
use sred_policies::DeclaredPriorityPolicy;

fn approval_flow() -> sred_core::workflow::WorkflowFlow {
    WorkflowBuilder::new("approval")
        .state(StateDefinition::initial("submitted", "Submitted"))
        .state(
            StateDefinition::normal("awaiting_countersign", "AwaitingCountersign")
                .pause_on_enter(true)
                .timeout(1)
                .timeout_action(TimeoutAction::Transition { target_state: "auto_approved".into() }),
        )
        .state(StateDefinition::terminal("auto_approved", "AutoApproved"))
        .state(StateDefinition::terminal("rejected", "Rejected"))
        .transition(TransitionDefinition::new("submitted", "awaiting_countersign", Condition::Success, 0))
        .transition(TransitionDefinition::new("submitted", "rejected", Condition::Failure, 0))
        .bind(
            "submitted",
            Arc::new(FnHandler(|_ctx, evt| {
                if evt.name == "submit" {
                    Ok(StepResult::success(Default::default()))
                } else {
                    Ok(StepResult::failure("rejected at intake"))
                }
            })),
        )
        .build()
        .expect("el flujo de demo debe construirse sin errores")
}

#[tokio::main]
async fn main() {
    sred_persistence::init_dotenv();
    env_logger::init();

    println!("sred demo: flujo de aprobación con pausa y vencimiento de timeout");
    println!("=================================================================");

    let policy: Arc<dyn TransitionSelectionPolicy> = Arc::new(DeclaredPriorityPolicy::new());
    let engine = EngineBuilder::new(Arc::new(InMemoryPersistence::new()))
        .with_policy(policy)
        .register_workflow("approval", approval_flow())
        .build()
        .await;

    engine.instances().start("request-1", HashMap::new(), Some("approval")).await.expect("start debe tener éxito");
    let outcome = engine
        .orchestrator()
        .handle_event("request-1", "approval", "submit", HashMap::new())
        .await
        .expect("la transición inicial debe aplicarse");
    println!("request-1 entró a `{}` (pausada: {})", outcome.context.current_state_id, outcome.context.is_paused());

    engine.start_control_plane().await;
    println!("control plane arrancado, esperando a que venza el timeout de la pausa...");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let final_state = engine.instances().get_current_state("request-1").await.expect("la instancia debe existir");
    println!("request-1 terminó en `{final_state}` tras el vencimiento del timeout");
    assert_eq!(final_state, "auto_approved", "el sweeper de timeouts debe forzar la transición declarada");

    engine.stop_control_plane().await;
    println!("demo completada: transición inicial + pausa + vencimiento de timeout, todo sobre persistencia en memoria.");
}
