//! Forma externa consumida por el motor (§6): el objeto que producen los
//! parsers de DSL/XML/YAML/JSON. El core nunca parsea esos formatos; sólo
//! sabe deserializar esta forma JSON-compatible y construir un
//! `WorkflowBuilder` a partir de ella.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::WorkflowBuildError;

use super::builder::WorkflowBuilder;
use super::state::{
    BranchConfiguration, ErrorStrategy, ExecutionMode, ParallelConfiguration, StateDefinition, StateType,
    TimeoutAction, WaitStrategy,
};
use super::transition::{Condition, DecisionContext, TransitionDefinition};
use super::flow::FlowConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionDto {
    Success,
    Failure,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutActionDto {
    #[serde(rename = "type")]
    pub kind: String, // "transition" | "event"
    pub target_state: Option<String>,
    pub event_type: Option<String>,
    pub event_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfigDto {
    pub name: String,
    pub target_state: String,
    pub condition: ConditionDto,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfigDto {
    pub branches: Vec<(String, String)>,
    pub wait_strategy: String, // "all" | "any" | "n_count"
    #[serde(default)]
    pub n_count: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub error_strategy: String, // "fail_all" | "ignore_failures" | "tolerate_failures"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDto {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String, // "initial" | "normal" | "final" | "error"
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_initial: Option<bool>,
    #[serde(default)]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub pauseable: Option<bool>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub pause_on_enter: Option<bool>,
    #[serde(default)]
    pub timeout_action: Option<TimeoutActionDto>,
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default)]
    pub branch_config: Option<Vec<BranchConfigDto>>,
    #[serde(default)]
    pub parallel_config: Option<ParallelConfigDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDto {
    pub from: String,
    pub to: String,
    pub condition: ConditionDto,
    #[serde(default)]
    pub priority: i32,
}

/// Ligadura de función, advisoria: la resolución real de `className`/
/// `functionName` a un `StateHandler` corre fuera del core (ver §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionBindingDto {
    pub state_id: String,
    pub function_name: String,
    #[serde(default)]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowConfigDto {
    #[serde(default)]
    pub pauseable: Option<bool>,
    #[serde(default)]
    pub default_timeout: Option<i64>,
    #[serde(default)]
    pub auto_resume: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinitionDto {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub config: Option<FlowConfigDto>,
    pub states: Vec<StateDto>,
    #[serde(default)]
    pub transitions: Vec<TransitionDto>,
    #[serde(default)]
    pub functions: Vec<FunctionBindingDto>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

pub type PredicateRegistry = HashMap<String, Arc<dyn Fn(&DecisionContext) -> bool + Send + Sync>>;

fn resolve_condition(dto: &ConditionDto, predicates: &PredicateRegistry) -> Result<Condition, WorkflowBuildError> {
    match dto {
        ConditionDto::Success => Ok(Condition::Success),
        ConditionDto::Failure => Ok(Condition::Failure),
        ConditionDto::Custom(name) => predicates
            .get(name)
            .cloned()
            .map(Condition::Custom)
            .ok_or_else(|| WorkflowBuildError::UnknownState(format!("unresolved custom condition `{name}`"))),
    }
}

fn state_type_of(dto: &StateDto) -> StateType {
    match dto.kind.as_str() {
        "initial" => StateType::Initial,
        "final" => StateType::Final,
        "error" => StateType::Error,
        _ => StateType::Normal,
    }
}

/// Construye un `WorkflowBuilder` (sin handlers vinculados aún) a partir de
/// la forma externa. El llamador debe encadenar `.bind(...)` por cada
/// entrada en `functions` antes de `.build()`.
pub fn builder_from_definition(
    dto: WorkflowDefinitionDto,
    predicates: &PredicateRegistry,
) -> Result<WorkflowBuilder, WorkflowBuildError> {
    let mut builder = WorkflowBuilder::new(dto.name);
    if let Some(d) = dto.description {
        builder = builder.description(d);
    }
    builder = builder.version(dto.version.unwrap_or_else(|| "1".to_string()));

    if let Some(cfg) = dto.config {
        let defaults = FlowConfig::default();
        builder = builder.config(
            cfg.pauseable.unwrap_or(defaults.pauseable),
            cfg.default_timeout,
            cfg.auto_resume.unwrap_or(defaults.auto_resume),
        );
    }

    for s in dto.states {
        let mut def = StateDefinition::new(s.id.clone(), s.name.clone(), state_type_of(&s));
        def.is_initial = s.is_initial.unwrap_or(def.is_initial);
        def.is_final = s.is_final.unwrap_or(def.is_final);
        def.is_error = s.is_error.unwrap_or(def.is_error);
        def.parent_id = s.parent_id;
        def.pauseable = s.pauseable;
        def.timeout = s.timeout;
        def.pause_on_enter = s.pause_on_enter.unwrap_or(false);

        if let Some(ta) = &s.timeout_action {
            def.timeout_action = Some(match ta.kind.as_str() {
                "transition" => TimeoutAction::Transition {
                    target_state: ta
                        .target_state
                        .clone()
                        .ok_or_else(|| WorkflowBuildError::InvalidTimeoutAction(s.id.clone(), "<missing>".into()))?,
                },
                "event" => TimeoutAction::Event {
                    event_type: ta.event_type.clone().unwrap_or_default(),
                    event_name: ta.event_name.clone().unwrap_or_default(),
                },
                other => {
                    return Err(WorkflowBuildError::InvalidTimeoutAction(s.id.clone(), other.to_string()))
                }
            });
        }

        def.execution_mode = match s.execution_mode.as_deref() {
            Some("conditional") => ExecutionMode::Conditional,
            Some("parallel") => ExecutionMode::Parallel,
            Some("join") => ExecutionMode::Join,
            _ => ExecutionMode::Sequential,
        };

        if let Some(branches) = s.branch_config {
            let mut resolved = Vec::with_capacity(branches.len());
            for b in branches {
                resolved.push(BranchConfiguration {
                    name: b.name,
                    target_state_id: b.target_state,
                    condition: resolve_condition(&b.condition, predicates)?,
                    priority: b.priority,
                });
            }
            def.branches = Some(resolved);
        }

        if let Some(p) = s.parallel_config {
            let wait_strategy = match p.wait_strategy.as_str() {
                "any" => WaitStrategy::Any,
                "n_count" => WaitStrategy::NCount(p.n_count.unwrap_or(1)),
                _ => WaitStrategy::All,
            };
            let error_strategy = match p.error_strategy.as_str() {
                "ignore_failures" => ErrorStrategy::IgnoreFailures,
                "tolerate_failures" => ErrorStrategy::TolerateFailures,
                _ => ErrorStrategy::FailAll,
            };
            def.parallel = Some(ParallelConfiguration {
                branches: p.branches,
                wait_strategy,
                timeout: p.timeout_seconds.map(std::time::Duration::from_secs),
                error_strategy,
            });
        }

        builder = builder.state(def);
    }

    for t in dto.transitions {
        let condition = resolve_condition(&t.condition, predicates)?;
        builder = builder.transition(TransitionDefinition::new(t.from, t.to, condition, t.priority));
    }

    Ok(builder)
}
