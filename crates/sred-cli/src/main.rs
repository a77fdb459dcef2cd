//! sred-cli: CLI mínima para correr un flujo SRED de punta a punta.
//!
//! Para el uso más completo (bus, scheduler, control plane), ver el binario
//! en la raíz del workspace.

use std::collections::HashMap;
use std::sync::Arc;

use sred_core::handler::FnHandler;
use sred_core::model::StepResult;
use sred_core::workflow::{Condition, StateDefinition, TransitionDefinition, WorkflowBuilder};
use sred_persistence::InMemoryPersistence;
use sred_runtime::InstanceManager;

#[tokio::main]
async fn main() {
    sred_persistence::init_dotenv();

    println!("🚀 sred-cli");
    println!("===========");

    let flow = WorkflowBuilder::new("greeting")
        .state(StateDefinition::initial("pending", "Pending"))
        .state(StateDefinition::terminal("greeted", "Greeted"))
        .transition(TransitionDefinition::new("pending", "greeted", Condition::Success, 0))
        .bind(
            "pending",
            Arc::new(FnHandler(|_ctx, _evt| {
                println!("Hello from sred-cli!");
                Ok(StepResult::success(Default::default()))
            })),
        )
        .build()
        .expect("el flujo de demo debe construirse sin errores");

    let instances = Arc::new(InstanceManager::new(Arc::new(InMemoryPersistence::new())));
    instances.register_workflow("greeting", flow).await;
    instances.start("cli-run", HashMap::new(), Some("greeting")).await.expect("start debe tener éxito");

    match instances.process("cli-run", "greeting", "start", HashMap::new()).await {
        Ok(outcome) => {
            println!("✅ instancia avanzó a `{}`", outcome.context.current_state_id);
        }
        Err(err) => {
            println!("❌ error procesando el flujo: {err}");
        }
    }
}
