//! Ejecución de un estado `Parallel` (fork): corre cada rama concurrentemente
//! y agrega los resultados según `waitStrategy`/`errorStrategy` (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::handler::StateHandler;
use crate::model::{Event, StateContext, StepResult};
use crate::workflow::{ErrorStrategy, ParallelConfiguration, WaitStrategy, WorkflowFlow};

pub struct BranchOutcome {
    pub branch_id: String,
    pub target_state: String,
    pub result: StepResult,
}

/// Corre todas las ramas de `parallel` concurrentemente y retorna las
/// salidas que cuentan según `waitStrategy`. Para `Any`/`NCount` las ramas
/// restantes se cancelan (abort) antes de devolver el control.
pub async fn run_branches(
    flow: &WorkflowFlow,
    parallel: &ParallelConfiguration,
    context: &StateContext,
    event: &Event,
) -> Vec<BranchOutcome> {
    let mut set: JoinSet<BranchOutcome> = JoinSet::new();

    for (branch_id, target_state) in &parallel.branches {
        let handler: Option<Arc<dyn StateHandler>> = flow.handler(target_state);
        let branch_id = branch_id.clone();
        let target_state = target_state.clone();
        let mut branch_ctx = context.clone();
        branch_ctx
            .metadata
            .insert("_branchId".to_string(), serde_json::Value::String(branch_id.clone()));
        let event = event.clone();

        set.spawn(async move {
            let result = match handler {
                Some(h) => match h.handle(&branch_ctx, &event).await {
                    Ok(r) => r,
                    Err(e) => StepResult::failure(e.to_string()),
                },
                None => StepResult::success_empty(),
            };
            BranchOutcome { branch_id, target_state, result }
        });
    }

    let target_count = match parallel.wait_strategy {
        WaitStrategy::All => parallel.branches.len(),
        WaitStrategy::Any => 1.min(parallel.branches.len()),
        WaitStrategy::NCount(n) => n.min(parallel.branches.len()),
    };

    let mut outcomes = Vec::with_capacity(target_count);
    let deadline = parallel.timeout.map(|d| tokio::time::Instant::now() + d);

    while outcomes.len() < target_count {
        let next = match deadline {
            Some(dl) => tokio::time::timeout_at(dl, set.join_next()).await.ok().flatten(),
            None => set.join_next().await,
        };
        match next {
            Some(Ok(outcome)) => outcomes.push(outcome),
            Some(Err(_join_err)) => continue, // branch task panicked; treat as no contribution
            None => break,                    // set exhausted or timed out
        }
    }

    set.abort_all();
    outcomes
}

/// Combina las salidas de rama en un único `StepResult` agregado según
/// `errorStrategy`.
pub fn aggregate(outcomes: &[BranchOutcome], error_strategy: ErrorStrategy) -> StepResult {
    let any_failed = outcomes.iter().any(|o| !o.result.success);
    let all_succeeded = outcomes.iter().all(|o| o.result.success);

    let merge_all = |only_success: bool| -> HashMap<String, serde_json::Value> {
        let mut data = HashMap::new();
        for o in outcomes {
            if only_success && !o.result.success {
                continue;
            }
            for (k, v) in &o.result.data {
                data.insert(format!("{}.{}", o.branch_id, k), v.clone());
            }
        }
        data
    };

    match error_strategy {
        ErrorStrategy::FailAll => {
            if any_failed {
                let errors: Vec<String> =
                    outcomes.iter().filter(|o| !o.result.success).filter_map(|o| o.result.error.clone()).collect();
                StepResult::failure(errors.join("; "))
            } else {
                StepResult::success(merge_all(false))
            }
        }
        ErrorStrategy::IgnoreFailures => {
            let succeeded = outcomes.iter().any(|o| o.result.success);
            if succeeded {
                StepResult::success(merge_all(true))
            } else {
                StepResult::failure("all parallel branches failed")
            }
        }
        ErrorStrategy::TolerateFailures => {
            let mut result = StepResult { success: all_succeeded, data: merge_all(false), error: None };
            if !all_succeeded {
                let errors: Vec<String> =
                    outcomes.iter().filter(|o| !o.result.success).filter_map(|o| o.result.error.clone()).collect();
                result.error = Some(errors.join("; "));
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(branch_id: &str, success: bool) -> BranchOutcome {
        let result = if success { StepResult::success(HashMap::new()) } else { StepResult::failure("down") };
        BranchOutcome { branch_id: branch_id.to_string(), target_state: "x".to_string(), result }
    }

    #[test]
    fn fail_all_fails_when_any_branch_fails() {
        let outcomes = vec![outcome("a", true), outcome("b", false)];
        let result = aggregate(&outcomes, ErrorStrategy::FailAll);
        assert!(!result.success);
    }

    #[test]
    fn ignore_failures_succeeds_if_at_least_one_branch_succeeds() {
        let outcomes = vec![outcome("a", true), outcome("b", false)];
        let result = aggregate(&outcomes, ErrorStrategy::IgnoreFailures);
        assert!(result.success);
    }

    #[test]
    fn tolerate_failures_reports_aggregate_but_requires_all_for_success() {
        let outcomes = vec![outcome("a", true), outcome("b", false)];
        let result = aggregate(&outcomes, ErrorStrategy::TolerateFailures);
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
